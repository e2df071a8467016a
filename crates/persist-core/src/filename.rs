//! File name normalization for saved and exported outlines.

use crate::config::PlatformFamily;

const INVALID_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Extensions stripped before the target extension is appended.
const KNOWN_EXTENSIONS: &[&str] = &["bike", "xhtml", "html", "htm", "xml", "opml", "txt"];

const FALLBACK_STEM: &str = "outline";

/// Produce a safe file name ending in the extension the platform prefers.
///
/// ```
/// use persist_core::{normalize_file_name, PlatformFamily};
///
/// assert_eq!(normalize_file_name("My Notes.txt", ".bike", PlatformFamily::Desktop), "My Notes.bike");
/// assert_eq!(normalize_file_name("", ".bike", PlatformFamily::Desktop), "outline.bike");
/// ```
pub fn normalize_file_name(name: &str, default_ext: &str, platform: PlatformFamily) -> String {
    if name.is_empty() {
        return format!("{FALLBACK_STEM}{default_ext}");
    }

    let extension = match platform {
        PlatformFamily::AppleMobile if default_ext.eq_ignore_ascii_case(".bike") => ".xhtml",
        _ => default_ext,
    };

    let cleaned: String = name.chars().filter(|c| !INVALID_CHARS.contains(c)).collect();
    let mut stem = strip_known_extension(&cleaned).to_string();

    if !stem.to_lowercase().ends_with(&extension.to_lowercase()) {
        stem.push_str(extension);
    }

    if stem.is_empty() || stem == extension {
        return format!("{FALLBACK_STEM}{extension}");
    }
    stem
}

/// Name shown in the UI for a file: normalized, with `.xhtml` presented as `.bike`.
pub fn display_name_for(file_name: &str, default_ext: &str, platform: PlatformFamily) -> String {
    let normalized = normalize_file_name(file_name, default_ext, platform);
    match split_extension(&normalized) {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("xhtml") => format!("{stem}.bike"),
        _ => normalized,
    }
}

fn split_extension(name: &str) -> Option<(&str, &str)> {
    let dot = name.rfind('.')?;
    Some((&name[..dot], &name[dot + 1..]))
}

fn strip_known_extension(name: &str) -> &str {
    match split_extension(name) {
        Some((stem, ext))
            if KNOWN_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext)) =>
        {
            stem
        }
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desktop(name: &str) -> String {
        normalize_file_name(name, ".bike", PlatformFamily::Desktop)
    }

    #[test]
    fn test_replaces_text_extension() {
        assert_eq!(desktop("My Notes.txt"), "My Notes.bike");
    }

    #[test]
    fn test_empty_name_falls_back() {
        assert_eq!(desktop(""), "outline.bike");
    }

    #[test]
    fn test_strips_invalid_characters() {
        assert_eq!(desktop("a/b:c.bike"), "abc.bike");
        assert_eq!(desktop("what?*|.BIKE"), "what.bike");
    }

    #[test]
    fn test_name_of_only_invalid_characters_falls_back() {
        assert_eq!(desktop("<>.bike"), "outline.bike");
        assert_eq!(desktop(".bike"), "outline.bike");
    }

    #[test]
    fn test_unknown_extension_is_kept() {
        assert_eq!(desktop("report.2024"), "report.2024.bike");
    }

    #[test]
    fn test_apple_mobile_prefers_xhtml() {
        assert_eq!(
            normalize_file_name("Plan.bike", ".bike", PlatformFamily::AppleMobile),
            "Plan.xhtml"
        );
        assert_eq!(
            normalize_file_name("Plan", ".opml", PlatformFamily::AppleMobile),
            "Plan.opml"
        );
    }

    #[test]
    fn test_display_name_rewrites_xhtml() {
        assert_eq!(
            display_name_for("Plan.xhtml", ".bike", PlatformFamily::AppleMobile),
            "Plan.bike"
        );
        assert_eq!(
            display_name_for("Plan.xhtml", ".bike", PlatformFamily::Desktop),
            "Plan.bike"
        );
    }
}

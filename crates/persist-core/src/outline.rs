//! Reference outline codec for Bike-flavoured XHTML.
//!
//! Outlines are nested lists inside the document body:
//! ```html
//! <ul>
//!   <li><p>Parent</p>
//!     <ul><li><p>Child</p></li></ul>
//!   </li>
//! </ul>
//! ```
//! Everything outside the first root `<ul>` is ignored when parsing.

use crate::codec::{OutlineCodec, ParseError};

/// A single outline row and its children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutlineItem {
    pub text: String,
    pub children: Vec<OutlineItem>,
}

impl OutlineItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(text: impl Into<String>, children: Vec<OutlineItem>) -> Self {
        Self {
            text: text.into(),
            children,
        }
    }
}

/// A parsed outline document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Outline {
    pub items: Vec<OutlineItem>,
}

impl Outline {
    pub fn new(items: Vec<OutlineItem>) -> Self {
        Self { items }
    }

    /// Total number of items at every depth.
    pub fn len(&self) -> usize {
        fn count(items: &[OutlineItem]) -> usize {
            items.iter().map(|i| 1 + count(&i.children)).sum()
        }
        count(&self.items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&OutlineItem> {
        self.items.first()
    }
}

/// Codec for the Bike outline file format.
#[derive(Debug, Clone, Copy, Default)]
pub struct BikeCodec;

impl OutlineCodec for BikeCodec {
    type Document = Outline;

    fn parse(&self, text: &str) -> Result<Outline, ParseError> {
        parse_outline(text)
    }

    fn serialize(&self, document: &Outline) -> Option<String> {
        let mut out = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <html xmlns=\"http://www.w3.org/1999/xhtml\">\n  \
             <head>\n    <meta charset=\"utf-8\"/>\n  </head>\n  <body>\n",
        );
        write_list(&mut out, &document.items, 2);
        out.push_str("  </body>\n</html>\n");
        Some(out)
    }

    fn minimal_structure(&self) -> Outline {
        Outline::new(vec![OutlineItem::default()])
    }
}

fn write_list(out: &mut String, items: &[OutlineItem], depth: usize) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push_str("<ul>\n");
    for item in items {
        out.push_str(&indent);
        out.push_str("  <li><p>");
        out.push_str(&escape(&item.text));
        out.push_str("</p>");
        if item.children.is_empty() {
            out.push_str("</li>\n");
        } else {
            out.push('\n');
            write_list(out, &item.children, depth + 2);
            out.push_str(&indent);
            out.push_str("  </li>\n");
        }
    }
    out.push_str(&indent);
    out.push_str("</ul>\n");
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Open(&'a str),
    Close(&'a str),
    Text(&'a str),
}

/// Split markup into open/close tags of interest and text runs.
fn tokenize(input: &str) -> Result<Vec<Token<'_>>, ParseError> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        match rest.find('<') {
            Some(0) => {
                let end = rest
                    .find('>')
                    .ok_or_else(|| ParseError::Unbalanced("unterminated tag".to_string()))?;
                let tag = &rest[1..end];
                rest = &rest[end + 1..];

                if tag.starts_with('?') || tag.starts_with('!') {
                    continue;
                }
                let self_closing = tag.ends_with('/');
                let tag = tag.trim_end_matches('/');
                if let Some(name) = tag.strip_prefix('/') {
                    tokens.push(Token::Close(name.trim()));
                } else {
                    let name = tag.split_whitespace().next().unwrap_or("");
                    tokens.push(Token::Open(name));
                    if self_closing {
                        tokens.push(Token::Close(name));
                    }
                }
            }
            Some(pos) => {
                tokens.push(Token::Text(&rest[..pos]));
                rest = &rest[pos..];
            }
            None => {
                tokens.push(Token::Text(rest));
                rest = "";
            }
        }
    }

    Ok(tokens)
}

fn parse_outline(text: &str) -> Result<Outline, ParseError> {
    let tokens = tokenize(text)?;
    let start = tokens
        .iter()
        .position(|t| *t == Token::Open("ul"))
        .ok_or(ParseError::MissingRoot)?;

    let mut pos = start + 1;
    let items = parse_list(&tokens, &mut pos)?;
    Ok(Outline::new(items))
}

/// Parse items until the `</ul>` closing the list whose `<ul>` was just consumed.
fn parse_list(tokens: &[Token<'_>], pos: &mut usize) -> Result<Vec<OutlineItem>, ParseError> {
    let mut items = Vec::new();

    while let Some(token) = tokens.get(*pos) {
        *pos += 1;
        match token {
            Token::Open("li") => items.push(parse_item(tokens, pos)?),
            Token::Close("ul") => return Ok(items),
            Token::Close(name) if *name == "li" || *name == "body" || *name == "html" => {
                return Err(ParseError::Unbalanced(format!("unexpected </{}> in list", name)));
            }
            _ => {}
        }
    }

    Err(ParseError::Unbalanced("list not closed".to_string()))
}

fn parse_item(tokens: &[Token<'_>], pos: &mut usize) -> Result<OutlineItem, ParseError> {
    let mut item = OutlineItem::default();
    let mut in_paragraph = false;

    while let Some(token) = tokens.get(*pos) {
        *pos += 1;
        match token {
            Token::Open("p") => in_paragraph = true,
            Token::Close("p") => in_paragraph = false,
            Token::Text(text) if in_paragraph => item.text.push_str(&unescape(text)),
            Token::Open("ul") => item.children.extend(parse_list(tokens, pos)?),
            Token::Open("li") => {
                return Err(ParseError::Unbalanced("nested <li> outside a list".to_string()));
            }
            Token::Close("li") => return Ok(item),
            Token::Close("ul") => {
                return Err(ParseError::Unbalanced("</ul> before </li>".to_string()));
            }
            _ => {}
        }
    }

    Err(ParseError::Unbalanced("item not closed".to_string()))
}

//! Lenient HTML tokenizer and tree builder
//!
//! Only what the template compiler needs: element structure, attributes with
//! their original quoting, comments, doctype, void and raw-text elements and
//! the common implied end tags. Text is kept exactly as written so the
//! emitted markup reproduces the source.

use crate::error::Span;
use std::fmt::Write as _;

pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is never parsed or interpolated
pub const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "noscript",
];

/// Elements whose content is text only but still interpolated
pub const ESCAPABLE_RAW_TEXT_ELEMENTS: &[&str] = &["title", "textarea"];

const CLOSES_P: &[&str] = &[
    "address", "article", "aside", "blockquote", "details", "div", "dl", "fieldset", "figure",
    "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "main", "nav", "ol",
    "p", "pre", "section", "table", "ul",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
    /// Quote character used in the source, `None` for unquoted or valueless
    pub quote: Option<char>,
    pub span: Span,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: Option<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            value,
            quote: Some('"'),
            span,
        }
    }

    pub fn value_str(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }

    /// Serialised form with a leading space, `name="value"` or `name`
    pub fn to_html(&self) -> String {
        match &self.value {
            None => format!(" {}", self.name),
            Some(value) => {
                let quote = match self.quote {
                    Some('\'') => '\'',
                    Some(_) => '"',
                    None if value.contains('"') => '\'',
                    None => '"',
                };
                format!(" {}={}{}{}", self.name, quote, value, quote)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<Attribute>,
    pub children: Vec<Node>,
    pub self_closing: bool,
    pub span: Span,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.name == name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn is_void(&self) -> bool {
        VOID_ELEMENTS.contains(&self.name.as_str())
    }

    pub fn is_raw_text(&self) -> bool {
        RAW_TEXT_ELEMENTS.contains(&self.name.as_str())
    }

    pub fn is_escapable_raw_text(&self) -> bool {
        ESCAPABLE_RAW_TEXT_ELEMENTS.contains(&self.name.as_str())
    }

    pub fn start_tag(&self) -> String {
        let mut out = format!("<{}", self.name);
        for attr in &self.attrs {
            out.push_str(&attr.to_html());
        }
        out.push('>');
        out
    }

    pub fn end_tag(&self) -> Option<String> {
        if self.is_void() {
            None
        } else {
            Some(format!("</{}>", self.name))
        }
    }

    /// Concatenated text of all descendants
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.collect_text(&mut out);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text {
    pub content: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(Text),
    Comment(String, Span),
    Doctype(String, Span),
}

impl Node {
    pub fn span(&self) -> &Span {
        match self {
            Node::Element(el) => &el.span,
            Node::Text(text) => &text.span,
            Node::Comment(_, span) | Node::Doctype(_, span) => span,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Whitespace-only text or a comment
    pub fn is_blank(&self) -> bool {
        match self {
            Node::Text(text) => text.content.trim().is_empty(),
            Node::Comment(..) => true,
            _ => false,
        }
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match self {
            Node::Element(el) => {
                out.push_str(&el.start_tag());
                for child in &el.children {
                    child.write_html(out);
                }
                if let Some(end) = el.end_tag() {
                    out.push_str(&end);
                }
            }
            Node::Text(text) => out.push_str(&text.content),
            Node::Comment(text, _) => {
                let _ = write!(out, "<!--{}-->", text);
            }
            Node::Doctype(text, _) => {
                let _ = write!(out, "<!{}>", text);
            }
        }
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Element(el) => {
                for child in &el.children {
                    child.collect_text(out);
                }
            }
            Node::Text(text) => out.push_str(&text.content),
            Node::Comment(..) | Node::Doctype(..) => {}
        }
    }
}

/// Serialise a node list back to markup
pub fn to_html(nodes: &[Node]) -> String {
    nodes.iter().map(Node::to_html).collect()
}

/// Byte offset → (line, column) lookup
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn locate(&self, source: &str, offset: usize) -> (usize, usize) {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.starts[line];
        let column = source[start..offset.min(source.len())].chars().count() + 1;
        (line + 1, column)
    }
}

enum Token {
    StartTag {
        name: String,
        attrs: Vec<Attribute>,
        self_closing: bool,
        offset: usize,
    },
    EndTag {
        name: String,
    },
    Text {
        content: String,
        offset: usize,
    },
    Comment {
        content: String,
        offset: usize,
    },
    Doctype {
        content: String,
        offset: usize,
    },
}

struct Tokenizer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    file: String,
    lines: LineIndex,
}

impl<'a> Tokenizer<'a> {
    fn new(source: &'a str, file: &str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            file: file.to_string(),
            lines: LineIndex::new(source),
        }
    }

    fn span_at(&self, offset: usize) -> Span {
        let (line, column) = self.lines.locate(self.source, offset);
        Span::new(self.file.clone(), line, column)
    }

    fn starts_with_ci(&self, at: usize, needle: &str) -> bool {
        self.source
            .get(at..at + needle.len())
            .map_or(false, |s| s.eq_ignore_ascii_case(needle))
    }

    fn is_tag_start(&self, at: usize) -> bool {
        if self.bytes.get(at) != Some(&b'<') {
            return false;
        }
        match self.bytes.get(at + 1) {
            Some(b'!') => true,
            Some(b'/') => self.bytes.get(at + 2).map_or(false, |b| b.is_ascii_alphabetic()),
            Some(b) => b.is_ascii_alphabetic(),
            None => false,
        }
    }

    fn next_token(&mut self) -> Option<Token> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let start = self.pos;

        if !self.is_tag_start(start) {
            let mut end = start + 1;
            while end < self.bytes.len() && !self.is_tag_start(end) {
                end += 1;
            }
            self.pos = end;
            return Some(Token::Text {
                content: self.source[start..end].to_string(),
                offset: start,
            });
        }

        if self.source[start..].starts_with("<!--") {
            let body_start = start + 4;
            let (content_end, next) = match self.source[body_start..].find("-->") {
                Some(i) => (body_start + i, body_start + i + 3),
                None => (self.bytes.len(), self.bytes.len()),
            };
            self.pos = next;
            return Some(Token::Comment {
                content: self.source[body_start..content_end].to_string(),
                offset: start,
            });
        }

        if self.bytes[start + 1] == b'!' {
            let body_start = start + 2;
            let (content_end, next) = match self.source[body_start..].find('>') {
                Some(i) => (body_start + i, body_start + i + 1),
                None => (self.bytes.len(), self.bytes.len()),
            };
            self.pos = next;
            let content = self.source[body_start..content_end].to_string();
            return Some(if self.starts_with_ci(body_start, "doctype") {
                Token::Doctype { content, offset: start }
            } else {
                Token::Comment { content, offset: start }
            });
        }

        if self.bytes[start + 1] == b'/' {
            self.pos = start + 2;
            let name = self.read_name();
            match self.source[self.pos..].find('>') {
                Some(i) => self.pos += i + 1,
                None => self.pos = self.bytes.len(),
            }
            return Some(Token::EndTag { name });
        }

        self.pos = start + 1;
        let name = self.read_name();
        let mut attrs = Vec::new();
        let mut self_closing = false;
        loop {
            self.skip_whitespace();
            match self.bytes.get(self.pos) {
                None => break,
                Some(b'>') => {
                    self.pos += 1;
                    break;
                }
                Some(b'/') => {
                    self.pos += 1;
                    if self.bytes.get(self.pos) == Some(&b'>') {
                        self_closing = true;
                    }
                }
                Some(_) => attrs.push(self.read_attribute()),
            }
        }
        Some(Token::StartTag {
            name,
            attrs,
            self_closing,
            offset: start,
        })
    }

    fn read_name(&mut self) -> String {
        let start = self.pos;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() || b == b'/' || b == b'>' {
                break;
            }
            self.pos += 1;
        }
        self.source[start..self.pos].to_ascii_lowercase()
    }

    fn skip_whitespace(&mut self) {
        while self.bytes.get(self.pos).map_or(false, |b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn read_attribute(&mut self) -> Attribute {
        let start = self.pos;
        // A name may start with '=' or '/' only as its first character
        self.pos += 1;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() || b == b'/' || b == b'>' || b == b'=' {
                break;
            }
            self.pos += 1;
        }
        let name = self.source[start..self.pos].to_ascii_lowercase();
        let span = self.span_at(start);

        let before_eq = self.pos;
        self.skip_whitespace();
        if self.bytes.get(self.pos) != Some(&b'=') {
            self.pos = before_eq;
            return Attribute {
                name,
                value: None,
                quote: None,
                span,
            };
        }
        self.pos += 1;
        self.skip_whitespace();

        match self.bytes.get(self.pos).copied() {
            Some(q @ (b'"' | b'\'')) => {
                let value_start = self.pos + 1;
                let value_end = self.source[value_start..]
                    .find(q as char)
                    .map_or(self.bytes.len(), |i| value_start + i);
                self.pos = (value_end + 1).min(self.bytes.len());
                Attribute {
                    name,
                    value: Some(self.source[value_start..value_end].to_string()),
                    quote: Some(q as char),
                    span,
                }
            }
            _ => {
                let value_start = self.pos;
                while let Some(&b) = self.bytes.get(self.pos) {
                    if b.is_ascii_whitespace() || b == b'>' {
                        break;
                    }
                    self.pos += 1;
                }
                Attribute {
                    name,
                    value: Some(self.source[value_start..self.pos].to_string()),
                    quote: None,
                    span,
                }
            }
        }
    }

    /// Raw content of a raw-text element, up to its end tag
    fn read_raw_text(&mut self, name: &str) -> Option<Token> {
        let start = self.pos;
        let closing = format!("</{}", name);
        let mut end = self.bytes.len();
        let mut search = start;
        while let Some(i) = self.source[search..].find("</") {
            let at = search + i;
            if self.starts_with_ci(at, &closing) {
                end = at;
                break;
            }
            search = at + 2;
        }
        self.pos = end;
        if end == start {
            None
        } else {
            Some(Token::Text {
                content: self.source[start..end].to_string(),
                offset: start,
            })
        }
    }
}

struct TreeBuilder {
    stack: Vec<Element>,
    roots: Vec<Node>,
}

impl TreeBuilder {
    fn append(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
    }

    fn current_name(&self) -> Option<&str> {
        self.stack.last().map(|el| el.name.as_str())
    }

    fn pop(&mut self) {
        if let Some(el) = self.stack.pop() {
            self.append(Node::Element(el));
        }
    }

    /// Close the innermost open `names` element unless a `boundary` element is
    /// open inside it.
    fn close_open(&mut self, names: &[&str], boundaries: &[&str]) {
        for i in (0..self.stack.len()).rev() {
            let name = self.stack[i].name.as_str();
            if names.contains(&name) {
                while self.stack.len() > i {
                    self.pop();
                }
                return;
            }
            if boundaries.contains(&name) {
                return;
            }
        }
    }

    fn apply_implied_end_tags(&mut self, name: &str) {
        match name {
            "li" => self.close_open(&["li"], &["ul", "ol", "menu"]),
            "dt" | "dd" => self.close_open(&["dt", "dd"], &["dl"]),
            "option" => self.close_open(&["option"], &["select", "datalist"]),
            "tr" => self.close_open(&["tr"], &["table", "thead", "tbody", "tfoot"]),
            "td" | "th" => self.close_open(&["td", "th"], &["tr", "table"]),
            _ => {}
        }
        if CLOSES_P.contains(&name) && self.current_name() == Some("p") {
            self.pop();
        }
    }

    fn end_tag(&mut self, name: &str) {
        if let Some(i) = self.stack.iter().rposition(|el| el.name == name) {
            while self.stack.len() > i {
                self.pop();
            }
        }
    }
}

/// Parse markup into a node list. Never fails: malformed input is recovered
/// the way browsers broadly do.
pub fn parse(source: &str, file: &str) -> Vec<Node> {
    let mut tokenizer = Tokenizer::new(source, file);
    let mut builder = TreeBuilder {
        stack: Vec::new(),
        roots: Vec::new(),
    };

    while let Some(token) = tokenizer.next_token() {
        match token {
            Token::Text { content, offset } => {
                let span = tokenizer.span_at(offset);
                builder.append(Node::Text(Text { content, span }));
            }
            Token::Comment { content, offset } => {
                let span = tokenizer.span_at(offset);
                builder.append(Node::Comment(content, span));
            }
            Token::Doctype { content, offset } => {
                let span = tokenizer.span_at(offset);
                builder.append(Node::Doctype(content, span));
            }
            Token::EndTag { name } => builder.end_tag(&name),
            Token::StartTag {
                name,
                attrs,
                self_closing,
                offset,
            } => {
                builder.apply_implied_end_tags(&name);
                let element = Element {
                    span: tokenizer.span_at(offset),
                    name,
                    attrs,
                    children: Vec::new(),
                    self_closing,
                };

                if element.is_void() || self_closing {
                    builder.append(Node::Element(element));
                    continue;
                }

                let raw = element.is_raw_text() || element.is_escapable_raw_text();
                let name = element.name.clone();
                builder.stack.push(element);
                if raw {
                    if let Some(Token::Text { content, offset }) = tokenizer.read_raw_text(&name) {
                        let span = tokenizer.span_at(offset);
                        builder.append(Node::Text(Text { content, span }));
                    }
                }
            }
        }
    }

    while !builder.stack.is_empty() {
        builder.pop();
    }
    builder.roots
}

/// Decodes character references in attribute text. Unknown references are kept as written.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&rest[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(dec) = name.strip_prefix('#') {
        return dec.parse::<u32>().ok().and_then(char::from_u32);
    }
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{00A0}'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(nodes: &[Node], index: usize) -> &Element {
        nodes[index].as_element().expect("element")
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp; b"), "a & b");
        assert_eq!(decode_entities("&lt;p&gt; &#39;x&#x27;"), "<p> 'x'");
        assert_eq!(decode_entities("fish & chips &unknown; &amp"), "fish & chips &unknown; &amp");
    }

    #[test]
    fn test_attributes_keep_quoting() {
        let nodes = parse(r#"<div id="a" class='b' data-x=c hidden></div>"#, "t.html");
        let div = element(&nodes, 0);
        assert_eq!(div.attrs.len(), 4);
        assert_eq!(div.attr("class").unwrap().quote, Some('\''));
        assert_eq!(div.attr("data-x").unwrap().value_str(), "c");
        assert!(div.attr("hidden").unwrap().value.is_none());
        assert_eq!(div.start_tag(), r#"<div id="a" class='b' data-x="c" hidden>"#);
    }

    #[test]
    fn test_names_are_lowercased() {
        let nodes = parse("<DIV TX-OnClick=\"x++\"></DIV>", "t.html");
        let div = element(&nodes, 0);
        assert_eq!(div.name, "div");
        assert_eq!(div.attrs[0].name, "tx-onclick");
    }

    #[test]
    fn test_void_and_self_closing() {
        let nodes = parse("<p>a<br>b<tx-card /></p>", "t.html");
        let p = element(&nodes, 0);
        assert_eq!(p.children.len(), 4);
        assert_eq!(to_html(&nodes), "<p>a<br>b<tx-card></tx-card></p>");
    }

    #[test]
    fn test_raw_text_is_not_parsed() {
        let nodes = parse("<script>if (a < b) { x() }</script><p>x</p>", "t.html");
        let script = element(&nodes, 0);
        assert_eq!(script.text_content(), "if (a < b) { x() }");
        assert_eq!(element(&nodes, 1).name, "p");
    }

    #[test]
    fn test_implied_end_tags() {
        let nodes = parse("<ul><li>a<li>b</ul><p>one<p>two", "t.html");
        let ul = element(&nodes, 0);
        assert_eq!(ul.children.len(), 2);
        assert_eq!(element(&nodes, 1).text_content(), "one");
        assert_eq!(element(&nodes, 2).text_content(), "two");
    }

    #[test]
    fn test_comments_and_doctype() {
        let nodes = parse("<!DOCTYPE html><!-- note --><p>x</p>", "t.html");
        assert!(matches!(&nodes[0], Node::Doctype(d, _) if d == "DOCTYPE html"));
        assert!(matches!(&nodes[1], Node::Comment(c, _) if c == " note "));
    }

    #[test]
    fn test_spans() {
        let nodes = parse("<div>\n  <span>x</span>\n</div>", "t.html");
        let div = element(&nodes, 0);
        let span = div.children[1].as_element().unwrap();
        assert_eq!(span.span, Span::new("t.html", 2, 3));
    }

    #[test]
    fn test_stray_end_tag_is_ignored() {
        let nodes = parse("<div>a</span>b</div>", "t.html");
        assert_eq!(element(&nodes, 0).text_content(), "ab");
    }

    #[test]
    fn test_lone_angle_bracket_is_text() {
        let nodes = parse("<p>a < b</p>", "t.html");
        assert_eq!(element(&nodes, 0).text_content(), "a < b");
    }
}

//! Curly-brace interpolation scanner for text and attribute values

use crate::error::{Diagnostic, Span};
use crate::utils::line_col;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Expression text between the braces, trimmed. `offset` is the byte
    /// position of the opening brace.
    Expr { expr: String, offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    pub offset: usize,
    pub message: String,
}

impl ScanError {
    /// Attach a file position, `base` being where `text` starts
    pub fn into_diagnostic(self, text: &str, base: &Span) -> Diagnostic {
        let (line, column) = line_col(text, self.offset);
        Diagnostic::template(base.offset_by(line, column), self.message)
    }
}

/// Split `text` into literal runs and `{ expr }` interpolations. Braces and
/// quotes inside an expression are balanced Go-style; `{ }` with only
/// whitespace inside stays literal.
pub fn scan(text: &str) -> Result<Vec<Segment>, ScanError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = text.char_indices().peekable();

    while let Some((offset, ch)) = rest.next() {
        if ch != '{' {
            literal.push(ch);
            continue;
        }

        let end = find_closing(text, offset)?;
        let inner = &text[offset + 1..end];
        // consume through the closing brace
        while let Some(&(i, _)) = rest.peek() {
            if i > end {
                break;
            }
            rest.next();
        }

        if inner.trim().is_empty() {
            literal.push_str(&text[offset..=end]);
            continue;
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Expr {
            expr: inner.trim().to_string(),
            offset,
        });
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Byte offset of the brace closing the one at `open`
fn find_closing(text: &str, open: usize) -> Result<usize, ScanError> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            quote @ (b'"' | b'\'' | b'`') => {
                let start = i;
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => {
                            return Err(ScanError {
                                offset: start,
                                message: format!("unclosed {} in interpolation", quote_name(quote)),
                            })
                        }
                        Some(b'\\') if quote != b'`' => i += 1,
                        Some(&b) if b == quote => break,
                        Some(b'\n') if quote != b'`' => {
                            return Err(ScanError {
                                offset: start,
                                message: format!("unclosed {} in interpolation", quote_name(quote)),
                            })
                        }
                        Some(_) => {}
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(ScanError {
        offset: open,
        message: "unclosed '{' in interpolation".to_string(),
    })
}

fn quote_name(quote: u8) -> &'static str {
    match quote {
        b'"' => "string literal",
        b'\'' => "rune literal",
        _ => "raw string literal",
    }
}

/// True if `text` holds at least one interpolation
pub fn has_interpolation(text: &str) -> bool {
    matches!(scan(text), Ok(segments) if segments.iter().any(|s| matches!(s, Segment::Expr { .. })))
}

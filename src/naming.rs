//! Naming rules: routes, component tags and generated Go identifiers

use crate::types::COMPONENT_TAG_PREFIX;
use crate::utils::is_valid_identifier;

/// Marker the Go multiplexer uses for "exactly this path"
pub const ROOT_MARKER: &str = "{$}";

/// Injective escaping into Go identifier syntax. ASCII letters and digits are
/// kept, every other byte becomes `_XX_` with uppercase hex.
pub fn escape_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02X}_", byte));
        }
    }
    out
}

/// Inverse of [`escape_ident`]
pub fn unescape_ident(ident: &str) -> Option<String> {
    let bytes = ident.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let hex = ident.get(i + 1..i + 3)?;
            if bytes.get(i + 3) != Some(&b'_') {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn strip_extension(rel_path: &str) -> &str {
    let file_start = rel_path.rfind('/').map_or(0, |i| i + 1);
    match rel_path[file_start..].rfind('.') {
        Some(dot) if dot > 0 => &rel_path[..file_start + dot],
        _ => rel_path,
    }
}

fn segments(rel_path: &str) -> Vec<&str> {
    strip_extension(rel_path)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

/// Route pattern of a page, e.g. `blog/{slug}.html` → `/blog/{slug}`,
/// `index.html` → `/{$}`.
pub fn route_for_page(rel_path: &str) -> Result<String, String> {
    let mut parts = segments(rel_path);
    if parts.last() == Some(&"index") {
        parts.pop();
    }

    let last = parts.len().saturating_sub(1);
    for (i, segment) in parts.iter().enumerate() {
        check_segment(segment, i == last)?;
    }

    if parts.is_empty() {
        Ok(format!("/{}", ROOT_MARKER))
    } else {
        Ok(format!("/{}", parts.join("/")))
    }
}

fn check_segment(segment: &str, is_last: bool) -> Result<(), String> {
    let opens = segment.starts_with('{');
    let closes = segment.ends_with('}');
    if !opens && !closes {
        if segment.contains('{') || segment.contains('}') {
            return Err(format!(
                "path segment '{}' mixes literal text and a path parameter",
                segment
            ));
        }
        return Ok(());
    }
    if !(opens && closes) || segment.len() < 2 {
        return Err(format!("path segment '{}' is not fully enclosed in braces", segment));
    }

    let inner = &segment[1..segment.len() - 1];
    let name = match inner.strip_suffix("...") {
        Some(name) if is_last => name,
        Some(_) => {
            return Err(format!(
                "wildcard parameter '{}' must be the last path segment",
                segment
            ))
        }
        None => inner,
    };
    if !is_valid_identifier(name) {
        return Err(format!("path parameter '{}' is not a valid Go identifier", name));
    }
    Ok(())
}

/// Component tag, e.g. `ui/Todo.html` → `tx-ui-todo`
pub fn tag_for_component(rel_path: &str) -> Result<String, String> {
    let parts = segments(rel_path);
    if parts.is_empty() {
        return Err(format!("cannot derive a component tag from '{}'", rel_path));
    }
    let tag = format!(
        "{}{}",
        COMPONENT_TAG_PREFIX,
        parts
            .iter()
            .map(|s| s.to_lowercase())
            .collect::<Vec<_>>()
            .join("-")
    );
    let valid = tag
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(format!("component tag '{}' contains characters not allowed in a tag name", tag));
    }
    Ok(tag)
}

pub fn page_ident(route: &str) -> String {
    let route = route.strip_suffix(ROOT_MARKER).unwrap_or(route);
    format!("page{}", escape_ident(route))
}

pub fn component_ident(tag: &str) -> String {
    escape_ident(tag)
}

/// Page name embedded in component keys: `/index`, `/blog/{slug}`
pub fn page_owner_name(rel_path: &str) -> String {
    format!("/{}", segments(rel_path).join("/"))
}

/// Pattern registered with the multiplexer for a page
pub fn page_route_pattern(route: &str) -> String {
    format!("GET {}", route)
}

/// Pattern registered with the multiplexer for a handler endpoint
pub fn handler_route_pattern(handler_id: &str) -> String {
    format!("GET {}{}", crate::types::HANDLER_ROUTE_PREFIX, handler_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes() {
        assert_eq!(route_for_page("index.html").unwrap(), "/{$}");
        assert_eq!(route_for_page("about.html").unwrap(), "/about");
        assert_eq!(route_for_page("blog/index.html").unwrap(), "/blog");
        assert_eq!(route_for_page("user/{id}.html").unwrap(), "/user/{id}");
        assert_eq!(route_for_page("files/{rest...}.html").unwrap(), "/files/{rest...}");
    }

    #[test]
    fn test_route_errors() {
        assert!(route_for_page("user/{user-id}.html").is_err());
        assert!(route_for_page("user/a{id}.html").is_err());
        assert!(route_for_page("{id.html").is_err());
        assert!(route_for_page("{rest...}/x.html").is_err());
    }

    #[test]
    fn test_tags() {
        assert_eq!(tag_for_component("todo.html").unwrap(), "tx-todo");
        assert_eq!(tag_for_component("docs/Todo.html").unwrap(), "tx-docs-todo");
        assert!(tag_for_component("a b.html").is_err());
    }

    #[test]
    fn test_idents() {
        assert_eq!(page_ident("/{$}"), "page_2F_");
        assert_eq!(page_ident("/about"), "page_2F_about");
        assert_eq!(component_ident("tx-todo"), "tx_2D_todo");
    }

    #[test]
    fn test_escape_is_reversible() {
        for name in ["/user/{id}", "tx-docs-todo", "a_b", "/", "x_2D_y"] {
            assert_eq!(unescape_ident(&escape_ident(name)).as_deref(), Some(name));
        }
    }

    #[test]
    fn test_escape_is_injective_on_lookalikes() {
        assert_ne!(escape_ident("a-b"), escape_ident("a_2D_b"));
        assert_ne!(escape_ident("a_b"), escape_ident("a-b"));
    }

    #[test]
    fn test_owner_names() {
        assert_eq!(page_owner_name("index.html"), "/index");
        assert_eq!(page_owner_name("docs/todo.html"), "/docs/todo");
    }
}

//! Client runtime embedded into every generated file

use crate::utils::go_string_literal;

/// The browser side of the fragment-swap protocol
pub const RUNTIME_SOURCE: &str = include_str!("runtime.js");

/// Name of the Go constant holding [`RUNTIME_SOURCE`]
pub const RUNTIME_CONST: &str = "runtimeScript";

/// Go declaration of the runtime constant. A raw string literal is used
/// unless the script itself contains a backtick.
pub fn go_declaration() -> String {
    go_declaration_for(RUNTIME_SOURCE)
}

fn go_declaration_for(source: &str) -> String {
    if source.contains('`') {
        format!("const {} = {}\n", RUNTIME_CONST, go_string_literal(source))
    } else {
        format!("const {} = `{}`\n", RUNTIME_CONST, source)
    }
}

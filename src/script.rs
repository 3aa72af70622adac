//! Script analysis: classify the top-level declarations of a tmplx script

use crate::error::{Diagnostic, Span, UnitResult};
use crate::lexer::{
    code_tokens, referenced_identifiers, split_top_level, top_level_position, Lexer, Token, TokenType,
};
use crate::types::{
    Handler, ImportSpec, Param, ScriptBlock, SourceUnit, Symbol, SymbolKind, SymbolTable,
    RESERVED_IDENT_PREFIX,
};
use crate::utils::dedent;
use std::collections::{BTreeMap, BTreeSet};

const ASSIGN_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<=", ">>=", "&^=", "++", "--",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Marker {
    Prop,
    Path(String),
}

#[derive(Debug, Clone)]
struct PendingMarker {
    marker: Marker,
    span: Span,
}

#[derive(Debug)]
struct VarDecl {
    name: String,
    span: Span,
    ty: String,
    init: Option<String>,
    refs: Vec<String>,
    marker: Option<Marker>,
}

#[derive(Debug)]
struct FuncDecl {
    name: String,
    span: Span,
    params: Vec<Param>,
    body: String,
    body_span: Span,
}

#[derive(Debug)]
enum Decl {
    Var(VarDecl),
    Func(FuncDecl),
}

/// Analyse the script of `unit`. A unit without a script has an empty table.
pub fn analyze(unit: &SourceUnit, script: Option<&ScriptBlock>) -> UnitResult<SymbolTable> {
    let Some(script) = script else {
        return Ok(SymbolTable::default());
    };
    let tokens = Lexer::new(&script.source, script.span.clone()).tokenize()?;
    let mut analyzer = ScriptAnalyzer {
        unit,
        source: &script.source,
        base: script.span.clone(),
        tokens,
        position: 0,
        marker: None,
        last_comment_end: None,
        decls: Vec::new(),
        imports: Vec::new(),
    };
    analyzer.parse_declarations()?;
    let table = analyzer.classify()?;
    check_handlers(&table)?;

    log::debug!(
        "Analysed script of {}: {} symbol(s), {} derived",
        unit.display_path(),
        table.symbols.len(),
        table.derived_order.len()
    );
    Ok(table)
}

struct ScriptAnalyzer<'a> {
    unit: &'a SourceUnit,
    source: &'a str,
    base: Span,
    tokens: Vec<Token>,
    position: usize,
    marker: Option<PendingMarker>,
    last_comment_end: Option<usize>,
    decls: Vec<Decl>,
    imports: Vec<ImportSpec>,
}

impl<'a> ScriptAnalyzer<'a> {
    fn span(&self, token: &Token) -> Span {
        self.base.offset_by(token.line, token.column)
    }

    fn error(&self, token: &Token, message: impl Into<String>) -> Diagnostic {
        Diagnostic::script(self.span(token), message)
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.position.min(last)]
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    /// Next token that is not a comment
    fn next_code(&mut self) -> Token {
        loop {
            let token = self.next();
            if token.token_type != TokenType::Comment {
                return token;
            }
        }
    }

    fn peek_code_at(&self, offset: usize) -> &Token {
        self.tokens[self.position..]
            .iter()
            .filter(|t| t.token_type != TokenType::Comment)
            .nth(offset)
            .unwrap_or_else(|| &self.tokens[self.tokens.len() - 1])
    }

    fn expect_op(&mut self, op: &str) -> UnitResult<Token> {
        let token = self.next_code();
        if token.is_op(op) {
            Ok(token)
        } else {
            Err(self.error(&token, format!("expected '{}', found {}", op, describe(&token))))
        }
    }

    fn slice(&self, first: &Token, last: &Token) -> String {
        self.source[first.start..last.end].trim().to_string()
    }

    /// True when nothing but a single line break separates `from` and `to`
    fn adjacent(&self, from: usize, to: usize) -> bool {
        self.source[from..to].matches('\n').count() <= 1
    }

    fn take_marker(&mut self, decl_start: usize) -> Option<PendingMarker> {
        let marker = self.marker.take()?;
        match self.last_comment_end {
            Some(end) if self.adjacent(end, decl_start) => Some(marker),
            _ => None,
        }
    }

    fn note_comment(&mut self, token: &Token) {
        if let Some(end) = self.last_comment_end {
            if !self.adjacent(end, token.start) {
                self.marker = None;
            }
        }
        let line_start = self.source[..token.start].rfind('\n').map_or(0, |i| i + 1);
        let own_line = self.source[line_start..token.start].trim().is_empty();
        if !own_line {
            self.marker = None;
        } else if let Some(marker) = parse_marker(&token.text) {
            self.marker = Some(PendingMarker {
                marker,
                span: self.span(token),
            });
        }
        self.last_comment_end = Some(token.end);
    }

    fn parse_declarations(&mut self) -> UnitResult<()> {
        while !self.at_eof() {
            let token = self.peek().clone();
            match token.token_type {
                TokenType::Semicolon => {
                    self.next();
                }
                TokenType::Comment => {
                    self.next();
                    self.note_comment(&token);
                }
                TokenType::Keyword if token.text == "var" => {
                    self.next();
                    let marker = self.take_marker(token.start);
                    self.parse_var(marker)?;
                }
                TokenType::Keyword if token.text == "func" => {
                    self.reject_marker(token.start)?;
                    self.next();
                    self.parse_func(&token)?;
                }
                TokenType::Keyword if token.text == "import" => {
                    self.reject_marker(token.start)?;
                    self.next();
                    self.parse_import()?;
                }
                TokenType::Keyword if token.text == "const" || token.text == "type" => {
                    return Err(self.error(
                        &token,
                        format!("{} declarations are not supported in a tmplx script", token.text),
                    ));
                }
                TokenType::Keyword if token.text == "package" => {
                    return Err(self.error(&token, "a tmplx script has no package clause"));
                }
                TokenType::Identifier if self.peek_code_at(1).is_op(":=") => {
                    return Err(self.error(
                        &token,
                        format!(
                            "short variable declaration of '{}' is not allowed at top level; use 'var {} <type> = ...'",
                            token.text, token.text
                        ),
                    ));
                }
                _ => {
                    return Err(self.error(
                        &token,
                        format!("expected a var, func or import declaration, found {}", describe(&token)),
                    ));
                }
            }
        }
        Ok(())
    }

    fn reject_marker(&mut self, decl_start: usize) -> UnitResult<()> {
        match self.take_marker(decl_start) {
            Some(pending) => Err(Diagnostic::script(
                pending.span,
                "tx:prop and tx:path markers may only precede a var declaration",
            )),
            None => Ok(()),
        }
    }

    fn parse_import(&mut self) -> UnitResult<()> {
        if self.peek_code_at(0).is_op("(") {
            self.next_code();
            loop {
                let token = self.peek_code_at(0).clone();
                if token.is_op(")") {
                    self.next_code();
                    break;
                }
                if token.token_type == TokenType::Semicolon {
                    self.next_code();
                    continue;
                }
                if token.token_type == TokenType::Eof {
                    return Err(self.error(&token, "unterminated import group"));
                }
                self.parse_import_spec()?;
            }
        } else {
            self.parse_import_spec()?;
        }
        Ok(())
    }

    fn parse_import_spec(&mut self) -> UnitResult<()> {
        let mut token = self.next_code();
        let mut alias = None;
        if token.token_type == TokenType::Identifier || token.is_op(".") {
            alias = Some(token.text.clone());
            token = self.next_code();
        }
        if !matches!(token.token_type, TokenType::String | TokenType::RawString) {
            return Err(self.error(&token, format!("expected import path, found {}", describe(&token))));
        }
        let spec = ImportSpec {
            alias,
            path: token.text.clone(),
        };
        if !self.imports.contains(&spec) {
            self.imports.push(spec);
        }
        Ok(())
    }

    fn parse_var(&mut self, marker: Option<PendingMarker>) -> UnitResult<()> {
        if !self.peek_code_at(0).is_op("(") {
            let spec = self.collect_spec(false);
            return self.var_spec(spec, marker);
        }

        let open = self.next_code();
        let mut first = true;
        let mut group_marker = marker;
        loop {
            let token = self.peek().clone();
            match token.token_type {
                TokenType::Eof => return Err(self.error(&open, "unterminated var group")),
                TokenType::Semicolon => {
                    self.next();
                }
                TokenType::Comment => {
                    self.next();
                    self.note_comment(&token);
                }
                TokenType::Operator if token.text == ")" => {
                    self.next();
                    return Ok(());
                }
                _ => {
                    let inner = self.take_marker(token.start);
                    let marker = match (first, group_marker.take(), inner) {
                        (_, Some(outer), Some(_)) => {
                            return Err(Diagnostic::script(outer.span, "conflicting markers on a var group"))
                        }
                        (true, outer, inner) => outer.or(inner),
                        (false, _, inner) => inner,
                    };
                    first = false;
                    let spec = self.collect_spec(true);
                    self.var_spec(spec, marker)?;
                }
            }
        }
    }

    /// Code tokens of one spec, up to its terminating semicolon
    fn collect_spec(&mut self, in_group: bool) -> Vec<Token> {
        let mut spec = Vec::new();
        let mut depth = 0usize;
        loop {
            let token = self.peek().clone();
            match token.token_type {
                TokenType::Eof => break,
                TokenType::Semicolon if depth == 0 => {
                    self.next();
                    break;
                }
                TokenType::Operator if in_group && depth == 0 && token.text == ")" => break,
                TokenType::Comment => {
                    self.next();
                    continue;
                }
                TokenType::Operator => match token.text.as_str() {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => depth = depth.saturating_sub(1),
                    _ => {}
                },
                _ => {}
            }
            spec.push(self.next());
        }
        spec
    }

    fn var_spec(&mut self, spec: Vec<Token>, marker: Option<PendingMarker>) -> UnitResult<()> {
        let Some(name_token) = spec.first() else {
            return Err(self.error(self.peek(), "expected a variable name"));
        };
        if name_token.token_type != TokenType::Identifier {
            return Err(self.error(name_token, format!("expected a variable name, found {}", describe(name_token))));
        }
        if spec.get(1).map_or(false, |t| t.is_op(",")) {
            return Err(self.error(name_token, "declare exactly one variable per var declaration"));
        }

        let eq = top_level_position(&spec, "=");
        let type_tokens = &spec[1..eq.unwrap_or(spec.len())];
        let (Some(first), Some(last)) = (type_tokens.first(), type_tokens.last()) else {
            return Err(self.error(
                name_token,
                format!("variable '{}' must have an explicit type", name_token.text),
            ));
        };
        let ty = self.slice(first, last);

        let (init, refs) = match eq {
            Some(eq) => {
                let value = &spec[eq + 1..];
                let (Some(first), Some(last)) = (value.first(), value.last()) else {
                    return Err(self.error(&spec[eq], format!("missing value for '{}'", name_token.text)));
                };
                if let Some(comma) = top_level_position(value, ",") {
                    return Err(self.error(&value[comma], "declare exactly one value per var declaration"));
                }
                (Some(self.slice(first, last)), referenced_identifiers(value))
            }
            None => (None, Vec::new()),
        };

        self.decls.push(Decl::Var(VarDecl {
            name: name_token.text.clone(),
            span: self.span(name_token),
            ty,
            init,
            refs,
            marker: marker.map(|m| m.marker),
        }));
        Ok(())
    }

    fn parse_func(&mut self, func: &Token) -> UnitResult<()> {
        let name = self.next_code();
        if name.is_op("(") {
            return Err(self.error(&name, "methods are not supported in a tmplx script"));
        }
        if name.token_type != TokenType::Identifier {
            return Err(self.error(&name, format!("expected a function name, found {}", describe(&name))));
        }
        if self.peek_code_at(0).is_op("[") {
            return Err(self.error(&name, format!("handler '{}' cannot have type parameters", name.text)));
        }

        self.expect_op("(")?;
        let mut param_tokens = Vec::new();
        let mut depth = 0usize;
        loop {
            let token = self.next_code();
            match token.token_type {
                TokenType::Eof => return Err(self.error(func, "unterminated parameter list")),
                TokenType::Operator if token.text == ")" && depth == 0 => break,
                TokenType::Operator if matches!(token.text.as_str(), "(" | "[" | "{") => depth += 1,
                TokenType::Operator if matches!(token.text.as_str(), ")" | "]" | "}") => {
                    depth = depth.saturating_sub(1)
                }
                _ => {}
            }
            param_tokens.push(token);
        }
        let params = self.parse_params(&name, &param_tokens)?;

        let open = self.next_code();
        if !open.is_op("{") {
            return Err(self.error(
                &open,
                format!("handler '{}' cannot declare results", name.text),
            ));
        }
        let mut depth = 1usize;
        let close = loop {
            let token = self.next();
            match token.token_type {
                TokenType::Eof => return Err(self.error(&open, format!("unterminated body of '{}'", name.text))),
                TokenType::Operator if token.text == "{" => depth += 1,
                TokenType::Operator if token.text == "}" => {
                    depth -= 1;
                    if depth == 0 {
                        break token;
                    }
                }
                _ => {}
            }
        };

        let raw_body = &self.source[open.end..close.start];
        self.decls.push(Decl::Func(FuncDecl {
            name: name.text.clone(),
            span: self.span(&name),
            params,
            body: prepare_body(raw_body),
            body_span: self.base.offset_by(open.line, open.column + 1),
        }));
        Ok(())
    }

    fn parse_params(&self, func: &Token, tokens: &[Token]) -> UnitResult<Vec<Param>> {
        let mut params = Vec::new();
        let mut pending: Vec<&Token> = Vec::new();

        for group in split_top_level(tokens, ",") {
            match group {
                [] => return Err(self.error(func, "empty parameter in parameter list")),
                [single] if single.token_type == TokenType::Identifier => pending.push(single),
                [name, ty @ ..] if name.token_type == TokenType::Identifier && !ty.is_empty() => {
                    let ty = self.slice(&ty[0], &ty[ty.len() - 1]);
                    for earlier in pending.drain(..) {
                        params.push(Param {
                            name: earlier.text.clone(),
                            ty: ty.clone(),
                        });
                    }
                    params.push(Param {
                        name: name.text.clone(),
                        ty,
                    });
                }
                [other, ..] => {
                    return Err(self.error(other, format!("parameters of '{}' must be named", func.text)));
                }
            }
        }

        if let Some(orphan) = pending.first() {
            return Err(self.error(
                orphan,
                format!("parameter '{}' of '{}' has no type", orphan.text, func.text),
            ));
        }
        Ok(params)
    }

    fn classify(self) -> UnitResult<SymbolTable> {
        let is_page = self.unit.is_page();
        let path_params = self.unit.path_params();
        let mut table = SymbolTable {
            imports: self.imports,
            ..SymbolTable::default()
        };
        let mut declared: Vec<String> = Vec::new();
        let mut refs_of: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for decl in self.decls {
            let (name, span) = match &decl {
                Decl::Var(v) => (v.name.clone(), v.span.clone()),
                Decl::Func(f) => (f.name.clone(), f.span.clone()),
            };
            if name.starts_with(RESERVED_IDENT_PREFIX) {
                return Err(Diagnostic::script(
                    span,
                    format!("'{}' uses the reserved prefix '{}'", name, RESERVED_IDENT_PREFIX),
                ));
            }
            if table.get(&name).is_some() {
                return Err(Diagnostic::script(span, format!("'{}' is declared more than once", name)));
            }

            let kind = match decl {
                Decl::Var(var) => {
                    let kind = match var.marker {
                        Some(Marker::Prop) => {
                            if is_page {
                                return Err(Diagnostic::script(span, "tx:prop is only allowed in components"));
                            }
                            SymbolKind::Prop {
                                ty: var.ty,
                                default: var.init,
                            }
                        }
                        Some(Marker::Path(param)) => {
                            if !is_page {
                                return Err(Diagnostic::script(span, "tx:path is only allowed in pages"));
                            }
                            if !path_params.contains(&param) {
                                return Err(Diagnostic::script(
                                    span,
                                    format!("route {} has no path parameter '{}'", self.unit.name(), param),
                                ));
                            }
                            if var.ty != "string" {
                                return Err(Diagnostic::script(
                                    span,
                                    format!("tx:path state '{}' must have type string", var.name),
                                ));
                            }
                            if var.init.is_some() {
                                return Err(Diagnostic::script(
                                    span,
                                    format!("tx:path state '{}' cannot have an initialiser", var.name),
                                ));
                            }
                            SymbolKind::State {
                                ty: var.ty,
                                init: None,
                                path_param: Some(param),
                            }
                        }
                        None => match var.init {
                            Some(init) if var.refs.iter().any(|r| declared.contains(r)) => SymbolKind::Derived {
                                ty: var.ty,
                                init,
                                deps: BTreeSet::new(),
                            },
                            init => SymbolKind::State {
                                ty: var.ty,
                                init,
                                path_param: None,
                            },
                        },
                    };
                    refs_of.insert(var.name.clone(), var.refs);
                    declared.push(var.name);
                    kind
                }
                Decl::Func(func) if func.name == "init" => {
                    if !is_page {
                        return Err(Diagnostic::script(span, "init is not allowed in components"));
                    }
                    if !func.params.is_empty() {
                        return Err(Diagnostic::script(span, "init cannot take parameters"));
                    }
                    SymbolKind::Init { body: func.body }
                }
                Decl::Func(func) => SymbolKind::Handler(Handler {
                    name: func.name,
                    params: func.params,
                    body: func.body,
                    owner: self.unit.ident.clone(),
                    span: func.body_span,
                }),
            };
            table.symbols.push(Symbol { name, span, kind });
        }

        // State initialisers may only use values declared before them
        for symbol in &table.symbols {
            if let SymbolKind::State { init: Some(_), .. } = &symbol.kind {
                let position = declared.iter().position(|d| d == &symbol.name).unwrap_or(0);
                if let Some(later) = refs_of
                    .get(&symbol.name)
                    .and_then(|refs| refs.iter().find(|r| declared[position + 1..].contains(r)))
                {
                    return Err(Diagnostic::script(
                        symbol.span.clone(),
                        format!(
                            "initialiser of '{}' refers to '{}', which is declared later",
                            symbol.name, later
                        ),
                    ));
                }
            }
        }

        for symbol in &mut table.symbols {
            if let SymbolKind::Derived { deps, .. } = &mut symbol.kind {
                if let Some(refs) = refs_of.get(&symbol.name) {
                    deps.extend(refs.iter().filter(|r| declared.contains(r)).cloned());
                }
            }
        }

        table.derived_order = derived_order(&table)?;
        Ok(table)
    }
}

/// Topological order of derived values, declaration order among independents
fn derived_order(table: &SymbolTable) -> UnitResult<Vec<String>> {
    let derived: Vec<&Symbol> = table.symbols.iter().filter(|s| s.is_derived()).collect();
    let names: BTreeSet<&str> = derived.iter().map(|s| s.name.as_str()).collect();
    let mut order: Vec<String> = Vec::new();
    let mut remaining: Vec<&Symbol> = derived.clone();

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|symbol| match &symbol.kind {
            SymbolKind::Derived { deps, .. } => deps
                .iter()
                .filter(|d| names.contains(d.as_str()))
                .all(|d| order.contains(d)),
            _ => true,
        });
        match ready {
            Some(index) => order.push(remaining.remove(index).name.clone()),
            None => {
                let participants: Vec<&str> = remaining.iter().map(|s| s.name.as_str()).collect();
                return Err(Diagnostic::script(
                    remaining[0].span.clone(),
                    format!("cycle among derived values: {}", participants.join(", ")),
                ));
            }
        }
    }
    Ok(order)
}

fn check_handlers(table: &SymbolTable) -> UnitResult<()> {
    for handler in table.handlers() {
        check_handler(table, handler)?;
    }
    Ok(())
}

/// Validate a handler's parameters and body against the unit's values.
/// Also used for handlers synthesised from inline event statements.
pub fn check_handler(table: &SymbolTable, handler: &Handler) -> UnitResult<()> {
    let mut seen = BTreeSet::new();
    for param in &handler.params {
        if param.name.starts_with(RESERVED_IDENT_PREFIX) {
            return Err(Diagnostic::script(
                handler.span.clone(),
                format!("parameter '{}' uses the reserved prefix '{}'", param.name, RESERVED_IDENT_PREFIX),
            ));
        }
        if table.get(&param.name).map_or(false, Symbol::is_value) {
            return Err(Diagnostic::script(
                handler.span.clone(),
                format!("parameter '{}' of '{}' shadows a value of the same name", param.name, handler.name),
            ));
        }
        if !seen.insert(param.name.as_str()) {
            return Err(Diagnostic::script(
                handler.span.clone(),
                format!("duplicate parameter '{}' in '{}'", param.name, handler.name),
            ));
        }
    }

    let derived: BTreeSet<&str> = table
        .symbols
        .iter()
        .filter(|s| s.is_derived())
        .map(|s| s.name.as_str())
        .collect();
    if derived.is_empty() {
        return Ok(());
    }

    let tokens = code_tokens(&handler.body, handler.span.clone())?;
    let mut shadowed: BTreeSet<&str> = BTreeSet::new();
    for (i, token) in tokens.iter().enumerate() {
        if token.token_type != TokenType::Identifier || !derived.contains(token.text.as_str()) {
            continue;
        }
        if i > 0 && tokens[i - 1].is_op(".") {
            continue;
        }
        let Some(next) = tokens.get(i + 1) else { continue };
        if next.is_op(":=") {
            shadowed.insert(token.text.as_str());
            continue;
        }
        if next.token_type == TokenType::Operator
            && ASSIGN_OPS.contains(&next.text.as_str())
            && !shadowed.contains(token.text.as_str())
        {
            return Err(Diagnostic::script(
                handler.span.offset_by(token.line, token.column),
                format!(
                    "'{}' is derived and cannot be assigned in handler '{}'",
                    token.text, handler.name
                ),
            ));
        }
    }
    Ok(())
}

fn parse_marker(comment: &str) -> Option<Marker> {
    let text = comment.strip_prefix("//")?.trim();
    if text == "tx:prop" {
        return Some(Marker::Prop);
    }
    let param = text.strip_prefix("tx:path")?;
    let param = param.trim();
    if param.is_empty() || param.contains(char::is_whitespace) || !param.starts_with(|c: char| c.is_alphabetic() || c == '_') {
        return None;
    }
    Some(Marker::Path(param.to_string()))
}

fn prepare_body(raw: &str) -> String {
    if raw.contains('`') {
        raw.trim_matches(|c| c == '\n' || c == '\r').trim_end().to_string()
    } else {
        dedent(raw)
    }
}

fn describe(token: &Token) -> String {
    match token.token_type {
        TokenType::Eof | TokenType::Semicolon => token.token_type.to_string(),
        _ => format!("'{}'", token.text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UnitKind;
    use std::path::PathBuf;

    fn unit(kind: UnitKind, route: Option<&str>) -> SourceUnit {
        SourceUnit {
            kind,
            rel_path: "x.html".to_string(),
            path: PathBuf::from("x.html"),
            route_pattern: route.map(str::to_string),
            component_tag: if kind == UnitKind::Component { Some("tx-x".to_string()) } else { None },
            ident: if kind == UnitKind::Page { "page_2F_x".to_string() } else { "tx_2D_x".to_string() },
            owner_name: "/x".to_string(),
            raw_html: String::new(),
        }
    }

    fn analyze_page(source: &str) -> UnitResult<SymbolTable> {
        let script = ScriptBlock {
            source: source.to_string(),
            span: Span::new("x.html", 2, 1),
        };
        analyze(&unit(UnitKind::Page, Some("/user/{id}")), Some(&script))
    }

    fn analyze_component(source: &str) -> UnitResult<SymbolTable> {
        let script = ScriptBlock {
            source: source.to_string(),
            span: Span::new("x.html", 1, 1),
        };
        analyze(&unit(UnitKind::Component, None), Some(&script))
    }

    #[test]
    fn test_state_and_derived_classification() {
        let table = analyze_page("var a int = 1\nvar b int = a * 10\nvar c string = \"x\"\n").unwrap();
        assert!(table.get("a").unwrap().is_state());
        assert!(table.get("b").unwrap().is_derived());
        assert!(table.get("c").unwrap().is_state());
        assert_eq!(table.derived_order, vec!["b"]);
        match &table.get("b").unwrap().kind {
            SymbolKind::Derived { deps, init, .. } => {
                assert_eq!(init, "a * 10");
                assert!(deps.contains("a"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_selector_does_not_make_derived() {
        let table = analyze_page("var name string\nvar upper string = strings.ToUpper(x.name)\n").unwrap();
        assert!(table.get("upper").unwrap().is_state());
    }

    #[test]
    fn test_derived_forward_reference_orders_topologically() {
        let src = "var a int = 1\nvar b int = a + c\nvar c int = a * 2\n";
        let table = analyze_page(src).unwrap();
        assert_eq!(table.derived_order, vec!["c", "b"]);
    }

    #[test]
    fn test_derived_cycle_names_participants() {
        let src = "var a int = 1\nvar b int = a + c\nvar c int = a + b\n";
        let err = analyze_page(src).unwrap_err();
        assert!(err.message.contains("cycle"));
        assert!(err.message.contains("b, c"));
    }

    #[test]
    fn test_grouped_var_and_markers() {
        let src = "var (\n\tcount int\n\t// tx:path id\n\tuser string\n)\n";
        let table = analyze_page(src).unwrap();
        match &table.get("user").unwrap().kind {
            SymbolKind::State { path_param, .. } => assert_eq!(path_param.as_deref(), Some("id")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(table.get("count").unwrap().is_state());
    }

    #[test]
    fn test_marker_separated_by_blank_line_is_ignored() {
        let src = "// tx:prop\n\nvar title string\n";
        let table = analyze_component(src).unwrap();
        assert!(table.get("title").unwrap().is_state());
    }

    #[test]
    fn test_prop_with_default() {
        let src = "// tx:prop\nvar title string = \"untitled\"\nvar upper string = strings.ToUpper(title)\n";
        let table = analyze_component(src).unwrap();
        match &table.get("title").unwrap().kind {
            SymbolKind::Prop { default, .. } => assert_eq!(default.as_deref(), Some("\"untitled\"")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(table.get("upper").unwrap().is_derived());
    }

    #[test]
    fn test_handlers_and_init() {
        let src = "var list []string\nvar item string\n\nfunc add(pos, extra int, label string) {\n\tlist = append(list, item)\n\titem = \"\"\n}\n\nfunc init() {\n\titem = \"x\"\n}\n";
        let table = analyze_page(src).unwrap();
        let add = table.handler("add").unwrap();
        assert_eq!(
            add.params,
            vec![
                Param { name: "pos".into(), ty: "int".into() },
                Param { name: "extra".into(), ty: "int".into() },
                Param { name: "label".into(), ty: "string".into() },
            ]
        );
        assert_eq!(add.body, "list = append(list, item)\nitem = \"\"");
        assert_eq!(add.owner, "page_2F_x");
        assert_eq!(table.init_body(), Some("item = \"x\""));
    }

    #[test]
    fn test_imports_are_collected() {
        let src = "import \"strings\"\nimport (\n\tfmtx \"fmt\"\n\t\"strings\"\n)\nvar s string\n";
        let table = analyze_page(src).unwrap();
        assert_eq!(table.imports.len(), 2);
        assert_eq!(table.imports[1].alias.as_deref(), Some("fmtx"));
    }

    #[test]
    fn test_rejections() {
        let cases = [
            ("var a, b int\n", "exactly one variable"),
            ("var a = 1\n", "explicit type"),
            ("a := 1\n", "short variable declaration"),
            ("const a = 1\n", "const declarations"),
            ("type T int\n", "type declarations"),
            ("var tx_a int\n", "reserved prefix"),
            ("var a int\nvar a int\n", "more than once"),
            ("func (s S) m() {}\n", "methods"),
            ("func f() int { return 1 }\n", "cannot declare results"),
            ("func init(a int) {}\n", "init cannot take parameters"),
            ("var a int\nfunc f(a int) {}\n", "shadows"),
            ("var a int = 1\nvar d int = a + 1\nfunc f() { d++ }\n", "derived and cannot be assigned"),
            ("var a int = b\nvar b int\n", "declared later"),
            ("// tx:prop\nvar title string\n", "only allowed in components"),
            ("// tx:path slug\nvar s string\n", "no path parameter 'slug'"),
            ("// tx:path id\nvar s int\n", "must have type string"),
            ("var s string = \"unterminated\n", "not terminated"),
        ];
        for (src, expected) in cases {
            let err = analyze_page(src).unwrap_err();
            assert!(
                err.message.contains(expected),
                "source {:?}: expected '{}', got '{}'",
                src,
                expected,
                err.message
            );
        }
    }

    #[test]
    fn test_component_rejects_init_and_path() {
        assert!(analyze_component("func init() {}\n").unwrap_err().message.contains("init is not allowed"));
        assert!(analyze_component("// tx:path id\nvar s string\n")
            .unwrap_err()
            .message
            .contains("only allowed in pages"));
    }

    #[test]
    fn test_local_shadow_of_derived_may_be_assigned() {
        let src = "var a int = 1\nvar d int = a + 1\nfunc f() {\n\td := 3\n\td++\n\ta = d\n}\n";
        assert!(analyze_page(src).is_ok());
    }

    #[test]
    fn test_error_span_is_file_relative() {
        let err = analyze_page("var a int\nvar b, c int\n").unwrap_err();
        assert_eq!(err.span, Span::new("x.html", 3, 5));
    }
}

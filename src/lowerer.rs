//! Template lowering: annotated HTML tree → render ops

use crate::error::{Diagnostic, DiagnosticKind, Diagnostics, Span, UnitResult};
use crate::html::{decode_entities, Attribute, Element, Node, Text};
use crate::interpolation::{scan, Segment};
use crate::lexer::{code_tokens, referenced_identifiers, short_var_names, split_top_level, Token, TokenType};
use crate::registry::ComponentRegistry;
use crate::runtime::RUNTIME_CONST;
use crate::script;
use crate::types::{
    ComponentCall, CondBranch, Document, DocumentBody, EscapeMode, Handler, HandlerArg, KeyExpr,
    LoweredUnit, PageDocument, PropBinding, PropValue, RenderOp, SourceUnit, SymbolTable,
    STATE_PLACEHOLDER,
};
use crate::utils::go_string_literal;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const CONTROL_ATTRS: &[&str] = &["tx-if", "tx-else-if", "tx-else", "tx-for", "tx-key"];

fn query_form_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\s*\?").expect("valid query form pattern"))
}

/// Lower one unit. Pages produce the whole document, components their body.
pub fn lower_unit(
    unit: &SourceUnit,
    document: &Document,
    symbols: &SymbolTable,
    registry: &ComponentRegistry,
    diagnostics: &mut Diagnostics,
) -> UnitResult<LoweredUnit> {
    let mut lowerer = Lowerer {
        unit,
        symbols,
        registry,
        diagnostics,
        anon_handlers: Vec::new(),
        ordinals: BTreeMap::new(),
        locals: Vec::new(),
        loop_keys: Vec::new(),
    };

    let ops = match &document.body {
        DocumentBody::Page(page) => lowerer.lower_page(page)?,
        DocumentBody::Component(component) => {
            let body = lowerer.lower_nodes(&component.template, true)?;
            vec![RenderOp::SwapAnchors {
                key: KeyExpr::current(),
                body,
            }]
        }
    };

    log::debug!(
        "Lowered {}: {} top-level op(s), {} inline handler(s)",
        unit.display_path(),
        ops.len(),
        lowerer.anon_handlers.len()
    );
    Ok(LoweredUnit {
        ops,
        anon_handlers: lowerer.anon_handlers,
    })
}

/// Append literal text, merging with a preceding literal
pub fn push_literal(ops: &mut Vec<RenderOp>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(RenderOp::EmitLiteral(last)) = ops.last_mut() {
        last.push_str(text);
    } else {
        ops.push(RenderOp::EmitLiteral(text.to_string()));
    }
}

struct Lowerer<'a, 'd> {
    unit: &'a SourceUnit,
    symbols: &'a SymbolTable,
    registry: &'a ComponentRegistry,
    diagnostics: &'d mut Diagnostics,
    anon_handlers: Vec<Handler>,
    /// Instances seen so far per component tag
    ordinals: BTreeMap<String, usize>,
    /// Locals declared by enclosing tx-for / tx-if headers
    locals: Vec<String>,
    /// Key expressions of enclosing keyed loops
    loop_keys: Vec<String>,
}

impl<'a, 'd> Lowerer<'a, 'd> {
    fn lower_page(&mut self, page: &PageDocument) -> UnitResult<Vec<RenderOp>> {
        let mut ops = Vec::new();
        let doctype = page.doctype.as_deref().unwrap_or("DOCTYPE html");
        push_literal(&mut ops, &format!("<!{}>\n", doctype));

        push_literal(&mut ops, "<html");
        self.lower_attributes(&page.html_attrs, false, &mut ops)?;
        push_literal(&mut ops, ">\n<head");
        self.lower_attributes(&page.head_attrs, false, &mut ops)?;
        push_literal(&mut ops, ">");

        let head = self.lower_nodes(&page.head, true)?;
        ops.extend(head);
        push_literal(&mut ops, "<script id=\"tx-runtime\">");
        ops.push(RenderOp::EmitInterp {
            expr: RUNTIME_CONST.to_string(),
            mode: EscapeMode::Raw,
        });
        push_literal(
            &mut ops,
            &format!(
                "</script>\n<script type=\"application/json\" id=\"tx-state\">{}</script>\n</head>\n<body",
                STATE_PLACEHOLDER
            ),
        );
        self.lower_attributes(&page.body_attrs, false, &mut ops)?;
        push_literal(&mut ops, ">");

        let body = self.lower_nodes(&page.body, true)?;
        ops.push(RenderOp::SwapAnchors {
            key: KeyExpr::current(),
            body,
        });
        push_literal(&mut ops, "</body>\n</html>\n");
        Ok(ops)
    }

    fn warn(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::warning(DiagnosticKind::Template, span, message));
    }

    fn lower_nodes(&mut self, nodes: &[Node], interpolate_text: bool) -> UnitResult<Vec<RenderOp>> {
        let mut ops = Vec::new();
        let mut i = 0;
        while i < nodes.len() {
            match &nodes[i] {
                Node::Text(text) => self.lower_text(text, interpolate_text, &mut ops)?,
                Node::Comment(comment, _) => push_literal(&mut ops, &format!("<!--{}-->", comment)),
                Node::Doctype(doctype, _) => push_literal(&mut ops, &format!("<!{}>", doctype)),
                Node::Element(el) => {
                    if el.has_attr("tx-if") {
                        let (op, consumed) = self.lower_chain(&nodes[i..])?;
                        ops.push(op);
                        i += consumed;
                        continue;
                    }
                    if el.has_attr("tx-else-if") || el.has_attr("tx-else") {
                        return Err(Diagnostic::template(
                            el.span.clone(),
                            "tx-else-if/tx-else without a preceding tx-if",
                        ));
                    }
                    self.lower_element(el, &mut ops)?;
                }
            }
            i += 1;
        }
        Ok(ops)
    }

    fn lower_text(&mut self, text: &Text, interpolate: bool, ops: &mut Vec<RenderOp>) -> UnitResult<()> {
        if !interpolate || !text.content.contains('{') {
            push_literal(ops, &text.content);
            return Ok(());
        }
        let segments = scan(&text.content).map_err(|e| e.into_diagnostic(&text.content, &text.span))?;
        for segment in segments {
            match segment {
                Segment::Literal(literal) => push_literal(ops, &literal),
                Segment::Expr { expr, .. } => ops.push(RenderOp::EmitInterp {
                    expr,
                    mode: EscapeMode::Escape,
                }),
            }
        }
        Ok(())
    }

    fn condition(el: &Element, name: &str) -> UnitResult<(String, Span)> {
        let attr = el.attr(name).ok_or_else(|| {
            Diagnostic::template(el.span.clone(), format!("missing {} attribute", name))
        })?;
        let value = attr.value_str().trim();
        if value.is_empty() {
            return Err(Diagnostic::template(attr.span.clone(), format!("{} requires an expression", name)));
        }
        Ok((value.to_string(), attr.span.clone()))
    }

    /// Lower a `tx-if` element and the `tx-else-if`/`tx-else` siblings that
    /// follow it. Returns the op and the number of nodes consumed.
    fn lower_chain(&mut self, nodes: &[Node]) -> UnitResult<(RenderOp, usize)> {
        let Some(first) = nodes.first().and_then(Node::as_element) else {
            return Err(Diagnostic::template(nodes[0].span().clone(), "expected a tx-if element"));
        };
        let scope = self.locals.len();

        let (cond, span) = Self::condition(first, "tx-if")?;
        self.declare_locals(&cond, &span)?;
        let mut chain = vec![CondBranch {
            cond,
            body: self.lower_branch(first)?,
        }];
        let mut else_body = None;
        let mut consumed = 1;

        loop {
            let mut next = consumed;
            while next < nodes.len() && nodes[next].is_blank() {
                next += 1;
            }
            let Some(el) = nodes.get(next).and_then(Node::as_element) else {
                break;
            };
            if el.has_attr("tx-else-if") {
                let (cond, span) = Self::condition(el, "tx-else-if")?;
                self.declare_locals(&cond, &span)?;
                chain.push(CondBranch {
                    cond,
                    body: self.lower_branch(el)?,
                });
                consumed = next + 1;
            } else if el.has_attr("tx-else") {
                else_body = Some(self.lower_branch(el)?);
                consumed = next + 1;
                break;
            } else {
                break;
            }
        }

        self.locals.truncate(scope);
        Ok((RenderOp::Cond { chain, else_body }, consumed))
    }

    fn lower_branch(&mut self, el: &Element) -> UnitResult<Vec<RenderOp>> {
        let mut body = Vec::new();
        self.lower_element(el, &mut body)?;
        Ok(body)
    }

    fn declare_locals(&mut self, header: &str, span: &Span) -> UnitResult<()> {
        let tokens = code_tokens(header, span.clone())?;
        self.locals.extend(short_var_names(&tokens));
        Ok(())
    }

    fn lower_element(&mut self, el: &Element, ops: &mut Vec<RenderOp>) -> UnitResult<()> {
        let Some(for_attr) = el.attr("tx-for") else {
            return self.lower_core(el, ops);
        };

        let header = for_attr.value_str().trim().to_string();
        if header.is_empty() {
            return Err(Diagnostic::template(for_attr.span.clone(), "tx-for requires a loop header"));
        }
        let key_expr = el
            .attr("tx-key")
            .map(|a| a.value_str().trim().to_string())
            .filter(|k| !k.is_empty());
        if key_expr.is_none() {
            self.warn(
                for_attr.span.clone(),
                format!("tx-for on <{}> has no tx-key; component state inside may mix between iterations", el.name),
            );
        }

        let scope = self.locals.len();
        let keys = self.loop_keys.len();
        self.declare_locals(&header, &for_attr.span)?;
        if let Some(key) = &key_expr {
            self.loop_keys.push(key.clone());
        }
        let mut body = Vec::new();
        let result = self.lower_core(el, &mut body);
        self.locals.truncate(scope);
        self.loop_keys.truncate(keys);
        result?;

        ops.push(RenderOp::Loop {
            header,
            key_expr,
            body,
        });
        Ok(())
    }

    fn lower_core(&mut self, el: &Element, ops: &mut Vec<RenderOp>) -> UnitResult<()> {
        if el.name == "template" && CONTROL_ATTRS.iter().any(|a| el.has_attr(a)) {
            let children = self.lower_nodes(&el.children, true)?;
            ops.extend(children);
            return Ok(());
        }
        if self.registry.contains(&el.name) {
            return self.lower_component(el, ops);
        }
        if el.name.starts_with("tx-") {
            return Err(Diagnostic::template(
                el.span.clone(),
                format!("unknown component <{}>", el.name),
            ));
        }
        if el.name == "slot" && !self.unit.is_page() {
            let name = el
                .attr("name")
                .map(|a| a.value_str().trim().to_string())
                .filter(|n| !n.is_empty());
            let fallback = self.lower_nodes(&el.children, true)?;
            ops.push(RenderOp::Slot { name, fallback });
            return Ok(());
        }
        self.lower_plain(el, ops)
    }

    fn lower_plain(&mut self, el: &Element, ops: &mut Vec<RenderOp>) -> UnitResult<()> {
        let ignore = el.has_attr("tx-ignore");
        let value_binding = el.has_attr("tx-value");
        let mut swap_written = value_binding;

        push_literal(ops, &format!("<{}", el.name));
        for attr in &el.attrs {
            let name = attr.name.as_str();
            if CONTROL_ATTRS.contains(&name) || name == "tx-ignore" {
                continue;
            }
            check_attr_name(attr)?;

            if name == "tx-value" {
                ops.push(self.lower_input_binding(el, attr)?);
            } else if let Some(event) = name.strip_prefix("tx-on") {
                let (handler_id, args) = self.lower_event(event, attr)?;
                ops.push(RenderOp::EventBinding {
                    event: event.to_string(),
                    handler_id,
                    args,
                    swap_key: if swap_written { None } else { Some(KeyExpr::current()) },
                });
                swap_written = true;
            } else if name.starts_with("tx-") {
                return Err(Diagnostic::template(
                    attr.span.clone(),
                    format!("unknown tmplx attribute '{}'", name),
                ));
            } else if name == "value" && value_binding {
                return Err(Diagnostic::template(
                    attr.span.clone(),
                    "an element with tx-value cannot also set value",
                ));
            } else {
                self.lower_attribute(attr, ignore, ops)?;
            }
        }
        push_literal(ops, ">");

        if el.is_void() {
            return Ok(());
        }
        if el.is_raw_text() {
            push_literal(ops, &el.text_content());
        } else {
            let children = self.lower_nodes(&el.children, !ignore)?;
            ops.extend(children);
        }
        push_literal(ops, &format!("</{}>", el.name));
        Ok(())
    }

    fn lower_attributes(&mut self, attrs: &[Attribute], ignore: bool, ops: &mut Vec<RenderOp>) -> UnitResult<()> {
        for attr in attrs {
            check_attr_name(attr)?;
            self.lower_attribute(attr, ignore, ops)?;
        }
        Ok(())
    }

    fn lower_attribute(&mut self, attr: &Attribute, ignore: bool, ops: &mut Vec<RenderOp>) -> UnitResult<()> {
        let value = match &attr.value {
            Some(value) if !ignore && value.contains('{') => value,
            _ => {
                push_literal(ops, &attr.to_html());
                return Ok(());
            }
        };

        let segments = scan(value).map_err(|e| e.into_diagnostic(value, &attr.span))?;
        if !segments.iter().any(|s| matches!(s, Segment::Expr { .. })) {
            push_literal(ops, &attr.to_html());
            return Ok(());
        }

        let quote = if attr.quote == Some('\'') { '\'' } else { '"' };
        push_literal(ops, &format!(" {}={}", attr.name, quote));
        for segment in segments {
            match segment {
                Segment::Literal(literal) => push_literal(ops, &literal),
                Segment::Expr { expr, .. } => ops.push(RenderOp::EmitInterp {
                    expr,
                    mode: EscapeMode::Raw,
                }),
            }
        }
        push_literal(ops, &quote.to_string());
        Ok(())
    }

    fn lower_input_binding(&mut self, el: &Element, attr: &Attribute) -> UnitResult<RenderOp> {
        if el.name != "input" {
            return Err(Diagnostic::template(
                attr.span.clone(),
                format!("tx-value is only supported on <input>, not <{}>", el.name),
            ));
        }
        let state = attr.value_str().trim();
        match self.symbols.get(state) {
            Some(symbol) if symbol.is_state() => Ok(RenderOp::InputBinding {
                state: state.to_string(),
                swap_key: KeyExpr::current(),
            }),
            Some(_) => Err(Diagnostic::template(
                attr.span.clone(),
                format!("tx-value must name a state; '{}' is not one", state),
            )),
            None => Err(Diagnostic::template(
                attr.span.clone(),
                format!("tx-value refers to unknown state '{}'", state),
            )),
        }
    }

    /// Resolve a `tx-on<event>` value to a handler id and its arguments
    fn lower_event(&mut self, event: &str, attr: &Attribute) -> UnitResult<(String, Vec<HandlerArg>)> {
        if event.is_empty() {
            return Err(Diagnostic::template(attr.span.clone(), "tx-on needs an event name, e.g. tx-onclick"));
        }
        let value = attr.value_str().trim();
        if value.is_empty() {
            return Err(Diagnostic::template(
                attr.span.clone(),
                format!("{} needs a handler call or a statement", attr.name),
            ));
        }
        if query_form_regex().is_match(value) {
            return Err(Diagnostic::template(
                attr.span.clone(),
                format!(
                    "'{}' mixes a handler name with a literal query string; call the handler with arguments instead",
                    value
                ),
            ));
        }

        let tokens: Vec<Token> = code_tokens(value, attr.span.clone())?
            .into_iter()
            .filter(|t| t.token_type != TokenType::Semicolon)
            .collect();

        if let Some((name, args)) = as_call(&tokens, value) {
            if name == "init" {
                return Err(Diagnostic::template(attr.span.clone(), "init cannot be bound to an event"));
            }
            if let Some(handler) = self.symbols.handler(&name) {
                if args.len() != handler.params.len() {
                    return Err(Diagnostic::template(
                        attr.span.clone(),
                        format!(
                            "handler '{}' takes {} argument(s), {} given",
                            name,
                            handler.params.len(),
                            args.len()
                        ),
                    ));
                }
                let args = handler
                    .params
                    .iter()
                    .zip(args)
                    .map(|(param, expr)| HandlerArg {
                        param: param.name.clone(),
                        expr,
                    })
                    .collect();
                return Ok((handler.id(), args));
            }
        }

        if let [single] = tokens.as_slice() {
            if single.text == "init" {
                return Err(Diagnostic::template(attr.span.clone(), "init cannot be bound to an event"));
            }
            if let Some(handler) = self.symbols.handler(&single.text) {
                if handler.params.is_empty() {
                    return Ok((handler.id(), Vec::new()));
                }
            }
        }

        let refs = referenced_identifiers(&tokens);
        if let Some(local) = refs.iter().find(|r| self.locals.contains(r)) {
            return Err(Diagnostic::template(
                attr.span.clone(),
                format!(
                    "inline handler refers to template local '{}'; pass it as an argument to a named handler",
                    local
                ),
            ));
        }

        let handler = Handler {
            name: format!("anon_func_{}", self.anon_handlers.len() + 1),
            params: Vec::new(),
            body: value.to_string(),
            owner: self.unit.ident.clone(),
            span: attr.span.clone(),
        };
        if self.symbols.get(&handler.name).is_some() {
            return Err(Diagnostic::template(
                attr.span.clone(),
                format!("'{}' is reserved for inline handlers", handler.name),
            ));
        }
        script::check_handler(self.symbols, &handler)?;
        let id = handler.id();
        self.anon_handlers.push(handler);
        Ok((id, Vec::new()))
    }

    fn lower_component(&mut self, el: &Element, ops: &mut Vec<RenderOp>) -> UnitResult<()> {
        let registry = self.registry;
        let Some(info) = registry.get(&el.name) else {
            return Err(Diagnostic::template(el.span.clone(), format!("unknown component <{}>", el.name)));
        };

        let mut props: Vec<PropBinding> = Vec::new();
        for attr in &el.attrs {
            if CONTROL_ATTRS.contains(&attr.name.as_str()) || attr.name == "slot" {
                continue;
            }
            check_attr_name(attr)?;
            let Some(prop) = registry.resolve_prop(&el.name, &attr.name) else {
                return Err(Diagnostic::template(
                    attr.span.clone(),
                    format!("unknown attribute '{}' on <{}>", attr.name, el.name),
                ));
            };
            if props.iter().any(|p| p.prop == prop.name) {
                return Err(Diagnostic::template(
                    attr.span.clone(),
                    format!("prop '{}' of <{}> is bound more than once", prop.name, el.name),
                ));
            }
            let value = match &attr.value {
                None => PropValue::Flag,
                Some(value) => prop_value(value, attr)?,
            };
            props.push(PropBinding {
                prop: prop.name.clone(),
                value,
            });
        }

        let ordinal = {
            let count = self.ordinals.entry(el.name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let key = KeyExpr {
            suffix: format!("_{}_{}_{}", self.unit.owner_name, el.name, ordinal),
            loop_keys: self.loop_keys.clone(),
        };

        let mut named: Vec<(String, Vec<Node>)> = Vec::new();
        let mut default_nodes: Vec<Node> = Vec::new();
        for child in &el.children {
            let projected = child
                .as_element()
                .and_then(|c| c.attr("slot").map(|a| (c, a.value_str().trim().to_string())));
            match projected {
                Some((child_el, slot)) if !slot.is_empty() => {
                    if !info.slots.contains(&slot) {
                        return Err(Diagnostic::template(
                            child_el.span.clone(),
                            format!("<{}> has no slot named '{}'", el.name, slot),
                        ));
                    }
                    let mut child_el = child_el.clone();
                    if !registry.contains(&child_el.name) {
                        child_el.attrs.retain(|a| a.name != "slot");
                    }
                    match named.iter_mut().find(|(name, _)| *name == slot) {
                        Some((_, nodes)) => nodes.push(Node::Element(child_el)),
                        None => named.push((slot, vec![Node::Element(child_el)])),
                    }
                }
                _ => default_nodes.push(child.clone()),
            }
        }

        let default_slot = match default_nodes.iter().find(|n| !n.is_blank()) {
            None => None,
            Some(first) => {
                if !info.slots.default {
                    return Err(Diagnostic::template(
                        first.span().clone(),
                        format!("<{}> has no default slot for this content", el.name),
                    ));
                }
                Some(self.lower_nodes(&default_nodes, true)?)
            }
        };
        let mut named_slots = Vec::with_capacity(named.len());
        for (name, nodes) in named {
            let ops = self.lower_nodes(&nodes, true)?;
            named_slots.push((name, ops));
        }

        ops.push(RenderOp::Component(ComponentCall {
            tag: el.name.clone(),
            props,
            named_slots,
            default_slot,
            key,
            span: el.span.clone(),
        }));
        Ok(())
    }
}

fn check_attr_name(attr: &Attribute) -> UnitResult<()> {
    if attr.name.contains('{') || attr.name.contains('}') {
        return Err(Diagnostic::template(
            attr.span.clone(),
            format!("curly expression in a disallowed location: attribute name '{}'", attr.name),
        ));
    }
    Ok(())
}

/// Value bound to a prop: a single `{expr}`, plain text, or text mixed with
/// interpolations concatenated into a Go string expression.
fn prop_value(value: &str, attr: &Attribute) -> UnitResult<PropValue> {
    let segments = scan(value).map_err(|e| e.into_diagnostic(value, &attr.span))?;
    if let [Segment::Expr { expr, .. }] = segments.as_slice() {
        return Ok(PropValue::Expr(expr.clone()));
    }
    if !segments.iter().any(|s| matches!(s, Segment::Expr { .. })) {
        return Ok(PropValue::Literal(decode_entities(value)));
    }
    let parts: Vec<String> = segments
        .iter()
        .map(|segment| match segment {
            Segment::Literal(text) => go_string_literal(&decode_entities(text)),
            Segment::Expr { expr, .. } => format!("fmt.Sprint({})", expr),
        })
        .collect();
    Ok(PropValue::Expr(parts.join(" + ")))
}

/// `name(args...)` spanning the whole token list
fn as_call(tokens: &[Token], source: &str) -> Option<(String, Vec<String>)> {
    let (name, rest) = match tokens {
        [name, open, rest @ ..] if name.token_type == TokenType::Identifier && open.is_op("(") => (name, rest),
        _ => return None,
    };
    let (close, inner) = rest.split_last()?;
    if !close.is_op(")") {
        return None;
    }

    let mut depth = 0i32;
    for token in inner {
        if token.token_type != TokenType::Operator {
            continue;
        }
        match token.text.as_str() {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => {
                depth -= 1;
                if depth < 0 {
                    // the opening paren closes before the end
                    return None;
                }
            }
            _ => {}
        }
    }

    let args = split_top_level(inner, ",")
        .into_iter()
        .filter(|group| !group.is_empty())
        .map(|group| source[group[0].start..group[group.len() - 1].end].trim().to_string())
        .collect();
    Some((name.text.clone(), args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor;
    use crate::registry::{scan_slots, ComponentInfo};
    use crate::types::{SymbolKind, UnitKind};
    use std::path::PathBuf;

    fn unit(kind: UnitKind, html: &str) -> SourceUnit {
        let (ident, owner) = match kind {
            UnitKind::Page => ("page_2F_", "/index"),
            UnitKind::Component => ("tx_2D_card", "tx-card"),
        };
        SourceUnit {
            kind,
            rel_path: "index.html".to_string(),
            path: PathBuf::from("index.html"),
            route_pattern: (kind == UnitKind::Page).then(|| "/{$}".to_string()),
            component_tag: (kind == UnitKind::Component).then(|| "tx-card".to_string()),
            ident: ident.to_string(),
            owner_name: owner.to_string(),
            raw_html: html.to_string(),
        }
    }

    fn wrapper_registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        let wrapper = unit(UnitKind::Component, "");
        let template = crate::html::parse("<div><slot></slot><slot name=\"footer\"></slot></div>", "w.html");
        let script = crate::types::ScriptBlock {
            source: "// tx:prop\nvar title string\n// tx:prop\nvar isDone bool\n".to_string(),
            span: Span::file_start("w.html"),
        };
        registry.register(ComponentInfo {
            tag: "tx-wrapper".to_string(),
            ident: "tx_2D_wrapper".to_string(),
            span: Span::file_start("w.html"),
            symbols: script::analyze(&wrapper, Some(&script)).unwrap(),
            slots: scan_slots(&template),
            lowered: None,
        });
        registry
    }

    fn lower(kind: UnitKind, html: &str) -> (UnitResult<LoweredUnit>, Diagnostics) {
        let registry = wrapper_registry();
        let unit = unit(kind, html);
        let mut diagnostics = Diagnostics::new();
        let document = extractor::extract(&unit, &mut diagnostics).unwrap();
        let symbols = script::analyze(&unit, document.script.as_ref()).unwrap();
        let result = lower_unit(&unit, &document, &symbols, &registry, &mut diagnostics);
        (result, diagnostics)
    }

    fn body_ops(lowered: &LoweredUnit) -> &[RenderOp] {
        lowered
            .ops
            .iter()
            .find_map(|op| match op {
                RenderOp::SwapAnchors { body, .. } => Some(body.as_slice()),
                _ => None,
            })
            .expect("swap anchors")
    }

    const SCRIPT: &str = "<script type=\"text/tmplx\">\nvar counter int\nvar list []string\nvar item string\nfunc add(label string) {\n\tlist = append(list, label)\n}\n</script>\n";

    #[test]
    fn test_text_and_attribute_interpolation() {
        let (result, _) = lower(UnitKind::Page, &format!("{}<p class=\"c-{{counter}}\">n={{counter}}</p>", SCRIPT));
        let lowered = result.unwrap();
        assert_eq!(
            body_ops(&lowered),
            &[
                RenderOp::EmitLiteral("<p class=\"c-".into()),
                RenderOp::EmitInterp { expr: "counter".into(), mode: EscapeMode::Raw },
                RenderOp::EmitLiteral("\">n=".into()),
                RenderOp::EmitInterp { expr: "counter".into(), mode: EscapeMode::Escape },
                RenderOp::EmitLiteral("</p>".into()),
            ]
        );
    }

    #[test]
    fn test_page_document_shell() {
        let (result, _) = lower(UnitKind::Page, &format!("{}<p>x</p>", SCRIPT));
        let lowered = result.unwrap();
        match &lowered.ops[0] {
            RenderOp::EmitLiteral(text) => assert!(text.starts_with("<!DOCTYPE html>")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(lowered.ops.iter().any(|op| matches!(op, RenderOp::EmitInterp { expr, .. } if expr == RUNTIME_CONST)));
        assert!(lowered.ops.iter().any(|op| matches!(op, RenderOp::EmitLiteral(t) if t.contains("TX_STATE_JSON"))));
    }

    #[test]
    fn test_tx_ignore_is_shallow() {
        let (result, _) = lower(UnitKind::Page, &format!("{}<div tx-ignore title=\"{{a}}\">{{a}}<b>{{counter}}</b></div>", SCRIPT));
        let lowered = result.unwrap();
        let ops = body_ops(&lowered);
        assert_eq!(ops[0], RenderOp::EmitLiteral("<div title=\"{a}\">{a}<b>".into()));
        assert_eq!(ops[1], RenderOp::EmitInterp { expr: "counter".into(), mode: EscapeMode::Escape });
    }

    #[test]
    fn test_conditional_chain() {
        let html = format!(
            "{}<p tx-if=\"counter > 1\">a</p>\n  <!-- c -->\n<p tx-else-if=\"counter > 0\">b</p><p tx-else>c</p><p>d</p>",
            SCRIPT
        );
        let (result, _) = lower(UnitKind::Page, &html);
        let lowered = result.unwrap();
        let ops = body_ops(&lowered);
        match &ops[0] {
            RenderOp::Cond { chain, else_body } => {
                assert_eq!(chain.len(), 2);
                assert_eq!(chain[1].cond, "counter > 0");
                assert_eq!(else_body.as_ref().unwrap(), &vec![RenderOp::EmitLiteral("<p>c</p>".into())]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(ops[1], RenderOp::EmitLiteral("<p>d</p>".into()));
    }

    #[test]
    fn test_stray_else_is_error() {
        let (result, _) = lower(UnitKind::Page, &format!("{}<p tx-if=\"true\">a</p><div></div><p tx-else>b</p>", SCRIPT));
        let err = result.unwrap_err();
        assert!(err.message.contains("without a preceding tx-if"));
    }

    #[test]
    fn test_if_with_for_becomes_cond_around_loop() {
        let html = format!("{}<li tx-if=\"len(list) > 0\" tx-for=\"_, l := range list\" tx-key=\"l\">{{l}}</li>", SCRIPT);
        let (result, diagnostics) = lower(UnitKind::Page, &html);
        let lowered = result.unwrap();
        assert!(diagnostics.is_empty());
        match &body_ops(&lowered)[0] {
            RenderOp::Cond { chain, .. } => match &chain[0].body[0] {
                RenderOp::Loop { header, key_expr, .. } => {
                    assert_eq!(header, "_, l := range list");
                    assert_eq!(key_expr.as_deref(), Some("l"));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_loop_without_key_warns() {
        let (result, diagnostics) = lower(UnitKind::Page, &format!("{}<li tx-for=\"_, l := range list\">{{l}}</li>", SCRIPT));
        assert!(result.is_ok());
        assert_eq!(diagnostics.warning_count(), 1);
    }

    #[test]
    fn test_template_with_control_is_transparent() {
        let (result, _) = lower(UnitKind::Page, &format!("{}<template tx-if=\"true\"><b>x</b></template>", SCRIPT));
        let lowered = result.unwrap();
        match &body_ops(&lowered)[0] {
            RenderOp::Cond { chain, .. } => assert_eq!(chain[0].body, vec![RenderOp::EmitLiteral("<b>x</b>".into())]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_events() {
        let html = format!(
            "{}<button tx-onclick=\"counter++\">+</button><li tx-for=\"_, l := range list\" tx-key=\"l\"><a tx-onclick=\"add(l)\">x</a></li>",
            SCRIPT
        );
        let (result, _) = lower(UnitKind::Page, &html);
        let lowered = result.unwrap();
        assert_eq!(lowered.anon_handlers.len(), 1);
        assert_eq!(lowered.anon_handlers[0].id(), "page_2F__anon_func_1");
        assert_eq!(lowered.anon_handlers[0].body, "counter++");

        let ops = body_ops(&lowered);
        assert_eq!(
            ops[1],
            RenderOp::EventBinding {
                event: "click".into(),
                handler_id: "page_2F__anon_func_1".into(),
                args: vec![],
                swap_key: Some(KeyExpr::current()),
            }
        );
        match &ops[3] {
            RenderOp::Loop { body, .. } => assert!(body.iter().any(|op| matches!(
                op,
                RenderOp::EventBinding { handler_id, args, .. }
                    if handler_id == "page_2F__add" && args == &vec![HandlerArg { param: "label".into(), expr: "l".into() }]
            ))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_event_errors() {
        let cases = [
            ("<button tx-onclick=\"add?x=1\"></button>", "literal query string"),
            ("<button tx-onclick=\"add()\"></button>", "takes 1 argument(s), 0 given"),
            ("<li tx-for=\"_, l := range list\" tx-key=\"l\"><a tx-onclick=\"item = l\"></a></li>", "template local 'l'"),
            ("<button tx-onclick=\"init()\"></button>", "init cannot be bound"),
        ];
        for (html, expected) in cases {
            let (result, _) = lower(UnitKind::Page, &format!("{}{}", SCRIPT, html));
            let err = result.unwrap_err();
            assert!(err.message.contains(expected), "{}: got {}", html, err.message);
        }
    }

    #[test]
    fn test_input_binding() {
        let (result, _) = lower(UnitKind::Page, &format!("{}<input type=\"text\" tx-value=\"item\">", SCRIPT));
        let lowered = result.unwrap();
        assert_eq!(
            body_ops(&lowered)[1],
            RenderOp::InputBinding { state: "item".into(), swap_key: KeyExpr::current() }
        );

        let (result, _) = lower(UnitKind::Page, &format!("{}<input tx-value=\"item\" value=\"x\">", SCRIPT));
        assert!(result.unwrap_err().message.contains("cannot also set value"));

        let (result, _) = lower(UnitKind::Page, &format!("{}<input tx-value=\"nope\">", SCRIPT));
        assert!(result.unwrap_err().message.contains("unknown state"));
    }

    #[test]
    fn test_component_call() {
        let html = format!(
            "{}<tx-wrapper title=\"Hi {{item}}\" is-done><p>hi</p><span slot=\"footer\">f</span></tx-wrapper><tx-wrapper title=\"plain\"></tx-wrapper>",
            SCRIPT
        );
        let (result, _) = lower(UnitKind::Page, &html);
        let lowered = result.unwrap();
        let ops = body_ops(&lowered);
        let RenderOp::Component(first) = &ops[0] else { panic!("expected component") };
        assert_eq!(first.key.suffix, "_/index_tx-wrapper_1");
        assert_eq!(
            first.props,
            vec![
                PropBinding { prop: "title".into(), value: PropValue::Expr("\"Hi \" + fmt.Sprint(item)".into()) },
                PropBinding { prop: "isDone".into(), value: PropValue::Flag },
            ]
        );
        assert_eq!(first.default_slot.as_ref().unwrap(), &vec![RenderOp::EmitLiteral("<p>hi</p>".into())]);
        assert_eq!(first.named_slots[0].0, "footer");
        assert_eq!(first.named_slots[0].1, vec![RenderOp::EmitLiteral("<span>f</span>".into())]);

        let RenderOp::Component(second) = &ops[1] else { panic!("expected component") };
        assert_eq!(second.key.suffix, "_/index_tx-wrapper_2");
        assert_eq!(second.props[0].value, PropValue::Literal("plain".into()));
        assert!(second.default_slot.is_none());
    }

    #[test]
    fn test_literal_prop_decodes_entities() {
        let html = format!(
            "{}<tx-wrapper title=\"a &amp; b\"></tx-wrapper><tx-wrapper title=\"&lt;{{item}}&gt;\"></tx-wrapper>",
            SCRIPT
        );
        let (result, _) = lower(UnitKind::Page, &html);
        let lowered = result.unwrap();
        let ops = body_ops(&lowered);
        let RenderOp::Component(first) = &ops[0] else { panic!("expected component") };
        assert_eq!(first.props[0].value, PropValue::Literal("a & b".into()));
        let RenderOp::Component(second) = &ops[1] else { panic!("expected component") };
        assert_eq!(
            second.props[0].value,
            PropValue::Expr("\"<\" + fmt.Sprint(item) + \">\"".into())
        );
    }

    #[test]
    fn test_component_in_keyed_loop_gets_loop_key() {
        let html = format!("{}<div tx-for=\"i, l := range list\" tx-key=\"i\"><tx-wrapper></tx-wrapper></div>", SCRIPT);
        let (result, _) = lower(UnitKind::Page, &html);
        let lowered = result.unwrap();
        let RenderOp::Loop { body, .. } = &body_ops(&lowered)[0] else { panic!("expected loop") };
        let call = body.iter().find_map(|op| match op {
            RenderOp::Component(call) => Some(call),
            _ => None,
        });
        assert_eq!(call.unwrap().key.loop_keys, vec!["i"]);
    }

    #[test]
    fn test_component_errors() {
        let cases = [
            ("<tx-wrapper colour=\"red\"></tx-wrapper>", "unknown attribute 'colour'"),
            ("<tx-wrapper><p slot=\"header\">x</p></tx-wrapper>", "no slot named 'header'"),
            ("<tx-missing></tx-missing>", "unknown component"),
            ("<div {x}=\"1\"></div>", "disallowed location"),
        ];
        for (html, expected) in cases {
            let (result, _) = lower(UnitKind::Page, &format!("{}{}", SCRIPT, html));
            let err = result.unwrap_err();
            assert!(err.message.contains(expected), "{}: got {}", html, err.message);
        }
    }

    #[test]
    fn test_component_body_slots() {
        let (result, _) = lower(
            UnitKind::Component,
            "<template><div><slot>none</slot></div></template>",
        );
        let lowered = result.unwrap();
        assert_eq!(
            body_ops(&lowered)[1],
            RenderOp::Slot { name: None, fallback: vec![RenderOp::EmitLiteral("none".into())] }
        );
    }

    #[test]
    fn test_raw_text_elements_are_not_interpolated() {
        let (result, _) = lower(
            UnitKind::Page,
            &format!("{}<style>p {{ color: red }}</style><textarea>{{item}}</textarea>", SCRIPT),
        );
        let lowered = result.unwrap();
        let ops = body_ops(&lowered);
        assert_eq!(ops[0], RenderOp::EmitLiteral("<style>p { color: red }</style><textarea>".into()));
        assert_eq!(ops[1], RenderOp::EmitInterp { expr: "item".into(), mode: EscapeMode::Escape });
    }

    #[test]
    fn test_symbol_kinds_are_visible() {
        let registry = wrapper_registry();
        let info = registry.get("tx-wrapper").unwrap();
        assert!(matches!(info.symbols.get("title").unwrap().kind, SymbolKind::Prop { .. }));
    }
}

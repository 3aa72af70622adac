//! Go source generation

use crate::error::{CompilerError, Result};
use crate::lexer::{code_tokens, short_var_names};
use crate::naming::{escape_ident, handler_route_pattern, page_route_pattern};
use crate::registry::{ComponentInfo, ComponentRegistry};
use crate::runtime;
use crate::types::*;
use crate::utils::{go_string_literal, indent, is_valid_identifier};
use serde::Serialize;

pub const GENERATED_HEADER: &str = "// Code generated by tmplx. DO NOT EDIT.";

const FIXED_IMPORTS: &[&str] = &[
    "bytes",
    "encoding/json",
    "fmt",
    "html",
    "io",
    "net/http",
    "net/url",
    "strings",
];

const HELPERS: &str = r#"// TxRoute pairs a net/http pattern with the function serving it.
type TxRoute struct {
	Pattern string
	Handler http.HandlerFunc
}

func txEscape(v any) string {
	return html.EscapeString(fmt.Sprint(v))
}

func txArg(name string, v any) string {
	b, err := json.Marshal(v)
	if err != nil {
		panic(err)
	}
	return url.QueryEscape(name) + "=" + url.QueryEscape(string(b))
}

func txStates(query url.Values, prefix string) map[string]string {
	states := map[string]string{}
	for key, values := range query {
		if key != "tx-swap" && strings.HasPrefix(key, prefix) && len(values) > 0 {
			states[key] = values[0]
		}
	}
	return states
}

func txDecode(raw string, v any) error {
	return json.Unmarshal([]byte(raw), v)
}

func txFail(tx_w http.ResponseWriter, err error) {
	http.Error(tx_w, err.Error(), http.StatusInternalServerError)
}

func txRecover(tx_w http.ResponseWriter) {
	if err := recover(); err != nil {
		http.Error(tx_w, fmt.Sprint(err), http.StatusInternalServerError)
	}
}

func txWritePage(tx_w http.ResponseWriter, tx_buf *bytes.Buffer, tx_newStates map[string]any) {
	states, err := json.Marshal(tx_newStates)
	if err != nil {
		txFail(tx_w, err)
		return
	}
	tx_w.Header().Set("Content-Type", "text/html; charset=utf-8")
	tx_w.Write(bytes.Replace(tx_buf.Bytes(), []byte("TX_STATE_JSON"), states, 1))
}

func txWriteFragment(tx_w http.ResponseWriter, tx_buf *bytes.Buffer, tx_newStates map[string]any) {
	states, err := json.Marshal(tx_newStates)
	if err != nil {
		txFail(tx_w, err)
		return
	}
	tx_buf.WriteString(`<script id="tx-state" type="application/json">`)
	tx_buf.Write(states)
	tx_buf.WriteString("</script>")
	tx_w.Header().Set("Content-Type", "text/html; charset=utf-8")
	tx_w.Write(tx_buf.Bytes())
}
"#;

/// One analysed and lowered unit ready for emission
#[derive(Debug, Clone, Copy)]
pub struct CompiledUnit<'a> {
    pub unit: &'a SourceUnit,
    pub symbols: &'a SymbolTable,
    pub lowered: &'a LoweredUnit,
}

impl<'a> CompiledUnit<'a> {
    /// Named handlers in declaration order, then inline ones in template order
    pub fn handlers(&self) -> impl Iterator<Item = &'a Handler> {
        self.symbols.handlers().chain(self.lowered.anon_handlers.iter())
    }
}

/// An entry of the generated route table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub pattern: String,
    pub function: String,
}

/// Pages sorted by pattern, then every handler endpoint
pub fn route_table(units: &[CompiledUnit]) -> Vec<Route> {
    let mut routes: Vec<Route> = units
        .iter()
        .filter_map(|cu| {
            cu.unit.route_pattern.as_ref().map(|route| Route {
                pattern: page_route_pattern(route),
                function: page_function(cu.unit),
            })
        })
        .collect();
    routes.sort_by(|a, b| a.pattern.cmp(&b.pattern));

    for cu in units {
        for handler in cu.handlers() {
            let id = handler.id();
            routes.push(Route {
                pattern: handler_route_pattern(&id),
                function: format!("endpoint_{}", id),
            });
        }
    }
    routes
}

fn page_function(unit: &SourceUnit) -> String {
    format!("route_{}", unit.ident)
}

/// Import block entries: the fixed set plus every script import, sorted by
/// path with duplicates removed.
pub fn collect_imports(units: &[CompiledUnit]) -> Vec<ImportSpec> {
    let mut imports: Vec<ImportSpec> = FIXED_IMPORTS
        .iter()
        .map(|path| ImportSpec {
            alias: None,
            path: go_string_literal(path),
        })
        .collect();
    for cu in units {
        imports.extend(cu.symbols.imports.iter().cloned());
    }
    imports.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.alias.cmp(&b.alias)));
    imports.dedup();
    imports
}

/// Go expression evaluating a key relative to the enclosing `tx_key`
pub fn key_expr(key: &KeyExpr) -> String {
    let mut parts = vec!["tx_key".to_string()];
    if !key.suffix.is_empty() {
        parts.push(go_string_literal(&key.suffix));
    }
    for loop_key in &key.loop_keys {
        parts.push(format!("\"_\" + fmt.Sprint({})", loop_key));
    }
    parts.join(" + ")
}

fn state_type(ident: &str) -> String {
    format!("state_{}", ident)
}

fn render_function(ident: &str) -> String {
    format!("render_{}", ident)
}

fn field(name: &str) -> String {
    format!("S_{}", name)
}

/// Parameter name of a slot outlet inside a component's render procedure
fn slot_param(name: Option<&str>) -> String {
    match name {
        None => "tx_slot".to_string(),
        Some(name) => format!("tx_slot_{}", escape_ident(name)),
    }
}

/// Closure variable holding projected content at an instantiation site
fn slot_arg(name: Option<&str>) -> String {
    match name {
        None => "tx_slotarg".to_string(),
        Some(name) => format!("tx_slotarg_{}", escape_ident(name)),
    }
}

fn slot_names(slots: &SlotSet) -> Vec<Option<&str>> {
    let mut names = Vec::new();
    if slots.default {
        names.push(None);
    }
    names.extend(slots.named.iter().map(|n| Some(n.as_str())));
    names
}

/// Locals introduced by a `tx-if`/`tx-for` header
fn header_locals(header: &str) -> Vec<String> {
    code_tokens(header, crate::error::Span::file_start(""))
        .map(|tokens| short_var_names(&tokens))
        .unwrap_or_default()
}

fn value_names(symbols: &SymbolTable) -> Vec<String> {
    symbols.values().map(|s| s.name.clone()).collect()
}

#[derive(Default)]
struct GoWriter {
    out: String,
    depth: usize,
}

impl GoWriter {
    fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.depth {
                self.out.push('\t');
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.depth += 1;
    }

    fn close(&mut self, text: impl AsRef<str>) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
    }

    /// `} else {`-style lines that close one block and open the next
    fn reopen(&mut self, text: impl AsRef<str>) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
        self.depth += 1;
    }

    /// Script code re-emitted at the current depth. Text holding raw
    /// strings is written untouched.
    fn code(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if text.contains('`') {
            self.out.push_str(text);
        } else {
            self.out.push_str(&indent(text, self.depth));
        }
        self.out.push('\n');
    }

    fn raw(&mut self, text: &str) {
        self.out.push_str(text);
    }
}

pub struct CodeGenerator<'a> {
    package_name: String,
    registry: &'a ComponentRegistry,
    w: GoWriter,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(package_name: impl Into<String>, registry: &'a ComponentRegistry) -> Self {
        Self {
            package_name: package_name.into(),
            registry,
            w: GoWriter::default(),
        }
    }

    pub fn generate(mut self, units: &[CompiledUnit]) -> Result<String> {
        if !is_valid_identifier(&self.package_name) {
            return Err(CompilerError::InvalidFormat {
                message: format!("'{}' is not a valid Go package name", self.package_name),
            });
        }

        self.write_preamble(units);
        for cu in units {
            log::debug!("Emitting {}", cu.unit.name());
            self.write_unit(cu)?;
        }
        self.write_routes(units);

        log::debug!("Generated {} bytes of Go", self.w.out.len());
        Ok(self.w.out)
    }

    fn write_preamble(&mut self, units: &[CompiledUnit]) {
        self.w.line(GENERATED_HEADER);
        self.w.line("");
        self.w.line(format!("package {}", self.package_name));
        self.w.line("");
        self.w.open("import (");
        for import in collect_imports(units) {
            match &import.alias {
                Some(alias) => self.w.line(format!("{} {}", alias, import.path)),
                None => self.w.line(&import.path),
            }
        }
        self.w.close(")");
        self.w.line("");
        self.w.raw(&runtime::go_declaration());
        self.w.line("");
        self.w.raw(HELPERS);
    }

    fn write_unit(&mut self, cu: &CompiledUnit) -> Result<()> {
        let ident = &cu.unit.ident;
        let slots = match &cu.unit.component_tag {
            Some(tag) => self.component(tag)?.slots.clone(),
            None => SlotSet::default(),
        };

        self.w.line("");
        self.w.open(format!("type {} struct {{", state_type(ident)));
        for symbol in cu.symbols.persisted() {
            let ty = symbol.ty().unwrap_or_default();
            self.w.line(format!("{} {} `json:\"{}\"`", field(&symbol.name), ty, symbol.name));
        }
        self.w.close("}");

        let mut params = vec![
            "tx_w io.Writer".to_string(),
            "tx_key string".to_string(),
            "tx_states map[string]string".to_string(),
            "tx_newStates map[string]any".to_string(),
        ];
        params.extend(
            cu.symbols
                .values()
                .map(|s| format!("{} {}", s.name, s.ty().unwrap_or_default())),
        );
        params.extend(slot_names(&slots).into_iter().map(|n| format!("{} func()", slot_param(n))));

        self.w.line("");
        self.w.open(format!("func {}({}) {{", render_function(ident), params.join(", ")));
        self.write_ops(&cu.lowered.ops)?;
        self.w.close("}");

        if cu.unit.is_page() {
            self.write_page_route(cu);
        }
        for handler in cu.handlers() {
            self.write_endpoint(cu, handler, &slots);
        }
        Ok(())
    }

    fn component(&self, tag: &str) -> Result<&'a ComponentInfo> {
        self.registry.get(tag).ok_or_else(|| CompilerError::InvalidFormat {
            message: format!("component <{}> is not registered", tag),
        })
    }

    fn write_ops(&mut self, ops: &[RenderOp]) -> Result<()> {
        for op in ops {
            self.write_op(op)?;
        }
        Ok(())
    }

    fn write_op(&mut self, op: &RenderOp) -> Result<()> {
        match op {
            RenderOp::EmitLiteral(text) => {
                self.w.line(format!("io.WriteString(tx_w, {})", go_string_literal(text)));
            }
            RenderOp::EmitInterp { expr, mode } => match mode {
                EscapeMode::Escape => self.w.line(format!("io.WriteString(tx_w, txEscape({}))", expr)),
                EscapeMode::Raw => self.w.line(format!("io.WriteString(tx_w, fmt.Sprint({}))", expr)),
            },
            RenderOp::Cond { chain, else_body } => {
                for (i, branch) in chain.iter().enumerate() {
                    if i == 0 {
                        self.w.open(format!("if {} {{", branch.cond));
                    } else {
                        self.w.reopen(format!("}} else if {} {{", branch.cond));
                    }
                    for local in header_locals(&branch.cond) {
                        self.w.line(format!("_ = {}", local));
                    }
                    self.write_ops(&branch.body)?;
                }
                if let Some(body) = else_body {
                    self.w.reopen("} else {");
                    self.write_ops(body)?;
                }
                self.w.close("}");
            }
            RenderOp::Loop { header, body, .. } => {
                self.w.open(format!("for {} {{", header));
                for local in header_locals(header) {
                    self.w.line(format!("_ = {}", local));
                }
                self.write_ops(body)?;
                self.w.close("}");
            }
            RenderOp::Component(call) => self.write_component(call)?,
            RenderOp::Slot { name, fallback } => {
                let param = slot_param(name.as_deref());
                self.w.open(format!("if {} != nil {{", param));
                self.w.line(format!("{}()", param));
                if fallback.is_empty() {
                    self.w.close("}");
                } else {
                    self.w.reopen("} else {");
                    self.write_ops(fallback)?;
                    self.w.close("}");
                }
            }
            RenderOp::InputBinding { state, swap_key } => {
                self.w.line(format!(
                    "io.WriteString(tx_w, \" tx-value=\\\"{}\\\" tx-swap=\\\"\" + txEscape({}) + \"\\\" value=\\\"\" + txEscape({}) + \"\\\"\")",
                    state,
                    key_expr(swap_key),
                    state
                ));
            }
            RenderOp::EventBinding {
                event,
                handler_id,
                args,
                swap_key,
            } => {
                let mut value = go_string_literal(handler_id);
                if !args.is_empty() {
                    let encoded: Vec<String> = args
                        .iter()
                        .map(|arg| format!("txArg({}, {})", go_string_literal(&arg.param), arg.expr))
                        .collect();
                    value = format!("{} + \"?\" + {}", value, encoded.join(" + \"&amp;\" + "));
                }
                self.w.line(format!(
                    "io.WriteString(tx_w, \" tx-on{}=\\\"\" + {} + \"\\\"\")",
                    event, value
                ));
                if let Some(key) = swap_key {
                    self.w.line(format!(
                        "io.WriteString(tx_w, \" tx-swap=\\\"\" + txEscape({}) + \"\\\"\")",
                        key_expr(key)
                    ));
                }
            }
            RenderOp::SwapAnchors { key, body } => {
                let key = key_expr(key);
                self.w.line(format!(
                    "io.WriteString(tx_w, \"<template id=\\\"\" + txEscape({}) + \"\\\"></template>\")",
                    key
                ));
                self.write_ops(body)?;
                self.w.line(format!(
                    "io.WriteString(tx_w, \"<template id=\\\"\" + txEscape({}) + \"_e\\\"></template>\")",
                    key
                ));
            }
        }
        Ok(())
    }

    /// Inlined instantiation block of a component call site
    fn write_component(&mut self, call: &ComponentCall) -> Result<()> {
        let info = self.component(&call.tag)?;
        let symbols = &info.symbols;
        self.w.open("{");

        let mut slot_args = Vec::new();
        for name in slot_names(&info.slots) {
            let content = match name {
                None => call.default_slot.as_ref(),
                Some(name) => call.named_slots.iter().find(|(n, _)| n == name).map(|(_, ops)| ops),
            };
            match content {
                Some(ops) => {
                    let var = slot_arg(name);
                    self.w.open(format!("{} := func() {{", var));
                    self.write_ops(ops)?;
                    self.w.close("}");
                    slot_args.push(var);
                }
                None => slot_args.push("nil".to_string()),
            }
        }

        self.w.line(format!("tx_ckey := {}", key_expr(&call.key)));
        self.w.line(format!("tx_state := &{}{{}}", state_type(&info.ident)));
        self.w.open("if tx_raw, ok := tx_states[tx_ckey]; ok {");
        self.w.open("if err := txDecode(tx_raw, tx_state); err != nil {");
        self.w.line("panic(err)");
        self.w.close("}");
        // first render: initialisers run in the component's own scope
        let persisted: Vec<&Symbol> = symbols.persisted().collect();
        if !persisted.is_empty() {
            self.w.reopen("} else {");
            for symbol in &persisted {
                let ty = symbol.ty().unwrap_or_default();
                match initialiser(symbol) {
                    Some(init) => self.w.line(format!("var {} {} = {}", symbol.name, ty, init)),
                    None => self.w.line(format!("var {} {}", symbol.name, ty)),
                }
            }
            for symbol in &persisted {
                self.w.line(format!("tx_state.{} = {}", field(&symbol.name), symbol.name));
            }
        }
        self.w.close("}");

        for binding in &call.props {
            let value = match &binding.value {
                PropValue::Expr(expr) => expr.clone(),
                PropValue::Literal(text) => go_string_literal(text),
                PropValue::Flag => "true".to_string(),
            };
            self.w.line(format!("tx_state.{} = {}", field(&binding.prop), value));
        }
        self.w.line("tx_newStates[tx_ckey] = tx_state");
        self.write_locals(symbols);

        let mut args = vec![
            "tx_w".to_string(),
            "tx_ckey".to_string(),
            "tx_states".to_string(),
            "tx_newStates".to_string(),
        ];
        args.extend(value_names(symbols));
        args.extend(slot_args);
        self.w.line(format!("{}({})", render_function(&info.ident), args.join(", ")));
        self.w.close("}");
        Ok(())
    }

    /// Persisted values read from `tx_state`, then derived values in order
    fn write_locals(&mut self, symbols: &SymbolTable) {
        for symbol in symbols.persisted() {
            self.w.line(format!(
                "var {} {} = tx_state.{}",
                symbol.name,
                symbol.ty().unwrap_or_default(),
                field(&symbol.name)
            ));
        }
        self.write_derived(symbols, true);
    }

    fn write_derived(&mut self, symbols: &SymbolTable, declare: bool) {
        for symbol in symbols.derived_in_order() {
            let SymbolKind::Derived { ty, init, .. } = &symbol.kind else {
                continue;
            };
            if declare {
                self.w.line(format!("var {} {} = {}", symbol.name, ty, init));
            } else {
                self.w.line(format!("{} = {}", symbol.name, init));
            }
        }
    }

    fn write_render_call(&mut self, cu: &CompiledUnit, key: &str, slots: &SlotSet) {
        let mut args = vec![
            "&tx_buf".to_string(),
            key.to_string(),
            "tx_states".to_string(),
            "tx_newStates".to_string(),
        ];
        args.extend(value_names(cu.symbols));
        args.extend(slot_names(slots).into_iter().map(|_| "nil".to_string()));
        self.w.line("var tx_buf bytes.Buffer");
        self.w.line(format!("{}({})", render_function(&cu.unit.ident), args.join(", ")));
    }

    fn write_page_route(&mut self, cu: &CompiledUnit) {
        let symbols = cu.symbols;
        self.w.line("");
        self.w.open(format!(
            "func {}(tx_w http.ResponseWriter, tx_r *http.Request) {{",
            page_function(cu.unit)
        ));
        self.w.line("defer txRecover(tx_w)");
        self.w.line("tx_states := map[string]string{}");
        self.w.line("tx_newStates := map[string]any{}");

        for symbol in symbols.persisted() {
            let SymbolKind::State { ty, init, path_param } = &symbol.kind else {
                continue;
            };
            match (init, path_param) {
                (_, Some(param)) => self.w.line(format!(
                    "var {} {} = tx_r.PathValue({})",
                    symbol.name,
                    ty,
                    go_string_literal(param)
                )),
                (Some(init), None) => self.w.line(format!("var {} {} = {}", symbol.name, ty, init)),
                (None, None) => self.w.line(format!("var {} {}", symbol.name, ty)),
            }
        }
        self.write_derived(symbols, true);
        if let Some(body) = symbols.init_body() {
            self.w.open("func() {");
            self.w.code(body);
            self.w.close("}()");
            self.write_derived(symbols, false);
        }

        let fields: Vec<String> = symbols
            .persisted()
            .map(|s| format!("{}: {}", field(&s.name), s.name))
            .collect();
        self.w.line(format!(
            "tx_newStates[{}] = &{}{{{}}}",
            go_string_literal(PAGE_ROOT_KEY),
            state_type(&cu.unit.ident),
            fields.join(", ")
        ));
        self.write_render_call(cu, &go_string_literal(PAGE_ROOT_KEY), &SlotSet::default());
        self.w.line("txWritePage(tx_w, &tx_buf, tx_newStates)");
        self.w.close("}");
    }

    fn write_endpoint(&mut self, cu: &CompiledUnit, handler: &Handler, slots: &SlotSet) {
        let symbols = cu.symbols;
        self.w.line("");
        self.w.open(format!(
            "func endpoint_{}(tx_w http.ResponseWriter, tx_r *http.Request) {{",
            handler.id()
        ));
        self.w.line("defer txRecover(tx_w)");
        self.w.line("tx_query := tx_r.URL.Query()");
        self.w.line("tx_swap := tx_query.Get(\"tx-swap\")");
        self.w.line("tx_states := txStates(tx_query, tx_swap)");
        self.w.line("tx_newStates := map[string]any{}");
        self.w.line(format!("tx_state := &{}{{}}", state_type(&cu.unit.ident)));
        self.write_decode("tx_states[tx_swap]", "tx_state");
        for param in &handler.params {
            self.w.line(format!("var {} {}", param.name, param.ty));
            self.write_decode(
                &format!("tx_query.Get({})", go_string_literal(&param.name)),
                &format!("&{}", param.name),
            );
        }

        self.write_locals(symbols);
        self.w.open("func() {");
        self.w.code(&handler.body);
        self.w.close("}()");
        self.write_derived(symbols, false);
        for symbol in symbols.persisted() {
            self.w.line(format!("tx_state.{} = {}", field(&symbol.name), symbol.name));
        }
        self.w.line("tx_newStates[tx_swap] = tx_state");

        self.write_render_call(cu, "tx_swap", slots);
        if cu.unit.is_page() {
            self.w.line("txWritePage(tx_w, &tx_buf, tx_newStates)");
        } else {
            self.w.line("txWriteFragment(tx_w, &tx_buf, tx_newStates)");
        }
        self.w.close("}");
    }

    fn write_decode(&mut self, raw: &str, target: &str) {
        self.w.open(format!("if err := txDecode({}, {}); err != nil {{", raw, target));
        self.w.line("txFail(tx_w, err)");
        self.w.line("return");
        self.w.close("}");
    }

    fn write_routes(&mut self, units: &[CompiledUnit]) {
        self.w.line("");
        self.w.open("var txRoutes = []TxRoute{");
        for route in route_table(units) {
            self.w.line(format!(
                "{{Pattern: {}, Handler: {}}},",
                go_string_literal(&route.pattern),
                route.function
            ));
        }
        self.w.close("}");
        self.w.line("");
        self.w.line("// Routes returns every page and handler endpoint of this package.");
        self.w.open("func Routes() []TxRoute {");
        self.w.line("return append([]TxRoute(nil), txRoutes...)");
        self.w.close("}");
    }
}

fn initialiser(symbol: &Symbol) -> Option<&str> {
    match &symbol.kind {
        SymbolKind::State { init, .. } => init.as_deref(),
        SymbolKind::Prop { default, .. } => default.as_deref(),
        _ => None,
    }
}

//! Component registry: tag → symbols, slots and lowered body

use crate::error::{Diagnostic, Span, UnitResult};
use crate::html::Node;
use crate::types::{LoweredUnit, RenderOp, SlotSet, Symbol, SymbolTable};
use crate::utils::kebab_to_camel;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub tag: String,
    pub ident: String,
    pub span: Span,
    pub symbols: SymbolTable,
    pub slots: SlotSet,
    pub lowered: Option<LoweredUnit>,
}

impl ComponentInfo {
    pub fn ops(&self) -> &[RenderOp] {
        self.lowered.as_ref().map_or(&[], |l| l.ops.as_slice())
    }
}

#[derive(Debug, Default)]
pub struct ComponentRegistry {
    components: BTreeMap<String, ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: ComponentInfo) {
        log::debug!("Registered component <{}> as {}", info.tag, info.ident);
        self.components.insert(info.tag.clone(), info);
    }

    pub fn get(&self, tag: &str) -> Option<&ComponentInfo> {
        self.components.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.components.contains_key(tag)
    }

    pub fn set_lowered(&mut self, tag: &str, lowered: LoweredUnit) {
        if let Some(info) = self.components.get_mut(tag) {
            info.lowered = Some(lowered);
        }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Prop of `tag` an attribute binds to: kebab-case is converted to
    /// camelCase, then names are compared case-insensitively.
    pub fn resolve_prop(&self, tag: &str, attr_name: &str) -> Option<&Symbol> {
        let info = self.get(tag)?;
        let wanted = kebab_to_camel(attr_name);
        info.symbols
            .props()
            .find(|prop| prop.name == wanted)
            .or_else(|| info.symbols.props().find(|prop| prop.name.eq_ignore_ascii_case(&wanted)))
    }

    /// Verify that expanding unconditional component edges stays within
    /// `max_depth` levels when starting from `root_ops`.
    pub fn check_depth(&self, root: &str, root_ops: &[RenderOp], max_depth: usize) -> UnitResult<()> {
        let mut path = vec![root.to_string()];
        let mut heights: BTreeMap<String, usize> = BTreeMap::new();
        self.walk(root_ops, 0, max_depth, &mut path, &mut heights).map(|_| ())
    }

    /// Returns the expansion height below `ops`
    fn walk(
        &self,
        ops: &[RenderOp],
        depth: usize,
        max_depth: usize,
        path: &mut Vec<String>,
        heights: &mut BTreeMap<String, usize>,
    ) -> UnitResult<usize> {
        let mut height = 0;
        for op in ops {
            let below = match op {
                RenderOp::Component(call) => {
                    let slot_height = self.walk_slots(call, depth, max_depth, path, heights)?;
                    let child_height = self.expand(&call.tag, &call.span, depth + 1, max_depth, path, heights)?;
                    slot_height.max(child_height)
                }
                RenderOp::SwapAnchors { body, .. } => self.walk(body, depth, max_depth, path, heights)?,
                RenderOp::Slot { fallback, .. } => self.walk(fallback, depth, max_depth, path, heights)?,
                // Edges under a conditional or a loop are terminated at runtime
                RenderOp::Cond { .. } | RenderOp::Loop { .. } => 0,
                RenderOp::EmitLiteral(_)
                | RenderOp::EmitInterp { .. }
                | RenderOp::InputBinding { .. }
                | RenderOp::EventBinding { .. } => 0,
            };
            height = height.max(below);
        }
        Ok(height)
    }

    fn walk_slots(
        &self,
        call: &crate::types::ComponentCall,
        depth: usize,
        max_depth: usize,
        path: &mut Vec<String>,
        heights: &mut BTreeMap<String, usize>,
    ) -> UnitResult<usize> {
        let mut height = 0;
        for (_, ops) in &call.named_slots {
            height = height.max(self.walk(ops, depth, max_depth, path, heights)?);
        }
        if let Some(ops) = &call.default_slot {
            height = height.max(self.walk(ops, depth, max_depth, path, heights)?);
        }
        Ok(height)
    }

    fn expand(
        &self,
        tag: &str,
        span: &Span,
        depth: usize,
        max_depth: usize,
        path: &mut Vec<String>,
        heights: &mut BTreeMap<String, usize>,
    ) -> UnitResult<usize> {
        if path.iter().skip(1).any(|p| p == tag) {
            return Err(Diagnostic::template(
                span.clone(),
                format!(
                    "component <{}> instantiates itself unconditionally: {} -> {}",
                    tag,
                    path.join(" -> "),
                    tag
                ),
            ));
        }
        if let Some(height) = heights.get(tag) {
            if depth + height <= max_depth {
                return Ok(height + 1);
            }
        }
        if depth > max_depth {
            return Err(Diagnostic::template(
                span.clone(),
                format!(
                    "component expansion exceeds the maximum depth of {}: {} -> {}",
                    max_depth,
                    path.join(" -> "),
                    tag
                ),
            ));
        }
        let Some(info) = self.get(tag) else {
            return Ok(1);
        };

        path.push(tag.to_string());
        let below = self.walk(info.ops(), depth, max_depth, path, heights);
        path.pop();
        let below = below?;

        heights.insert(tag.to_string(), below);
        Ok(below + 1)
    }
}

/// Slot outlets declared in a component body
pub fn scan_slots(nodes: &[Node]) -> SlotSet {
    let mut slots = SlotSet::default();
    collect_slots(nodes, &mut slots);
    slots
}

fn collect_slots(nodes: &[Node], slots: &mut SlotSet) {
    for node in nodes {
        let Node::Element(el) = node else { continue };
        if el.name == "slot" {
            match el.attr("name").map(|a| a.value_str().trim()) {
                Some(name) if !name.is_empty() => {
                    if !slots.contains(name) {
                        slots.named.push(name.to_string());
                    }
                }
                _ => slots.default = true,
            }
        }
        collect_slots(&el.children, slots);
    }
}

use anyhow::{Result, anyhow, bail};
use tracing::debug;

use crate::api::{DebugApiWrapper, DebugMessage, MathOp, MessageCategory, MessageSeverity};
use crate::util::{FastHashMap, fast_hash_map_new};
use crate::val::ShaderVariable;

/// Signature of one extended instruction: operands are resolved values
/// (pointers included); the returned value must have the result template's shape.
pub type ExtInstFn = fn(&mut ExtInstContext<'_>, &[ShaderVariable]) -> Result<ShaderVariable>;

#[derive(Debug, Clone, Copy)]
pub struct ExtInstEntry {
    pub name: &'static str,
    pub func: ExtInstFn,
}

/// Per-call context handed to an extended instruction.
pub struct ExtInstContext<'a> {
    opcode: u32,
    template: &'a ShaderVariable,
    api: &'a mut dyn DebugApiWrapper,
    pointees: Vec<Option<ShaderVariable>>,
    stores: Vec<(ShaderVariable, ShaderVariable)>,
}

impl<'a> ExtInstContext<'a> {
    pub fn new(opcode: u32, template: &'a ShaderVariable, api: &'a mut dyn DebugApiWrapper) -> Self {
        Self { opcode, template, api, pointees: Vec::new(), stores: Vec::new() }
    }

    /// Values behind pointer operands, by operand index, for callees that
    /// read through their pointers (interpolation of stage inputs).
    pub fn with_pointees(mut self, pointees: Vec<Option<ShaderVariable>>) -> Self {
        self.pointees = pointees;
        self
    }

    pub fn pointee(&self, operand: usize) -> Option<&ShaderVariable> {
        self.pointees.get(operand)?.as_ref()
    }

    pub fn opcode(&self) -> u32 {
        self.opcode
    }

    /// Zeroed value shaped like the instruction's result type.
    pub fn result(&self) -> ShaderVariable {
        self.template.zeroed()
    }

    /// Ask the host to evaluate `op` at higher precision.
    pub fn math_op(&mut self, op: MathOp, args: &[ShaderVariable]) -> Option<ShaderVariable> {
        self.api.calculate_math_op(op, args)
    }

    /// Write `value` through `pointer` once the instruction completes.
    pub fn store(&mut self, pointer: &ShaderVariable, value: ShaderVariable) -> Result<()> {
        if !pointer.is_pointer() {
            bail!("out-parameter operand is not a pointer");
        }
        self.stores.push((pointer.clone(), value));
        Ok(())
    }

    pub fn report(&mut self, severity: MessageSeverity, text: impl Into<String>) {
        self.api
            .add_debug_message(DebugMessage::new(severity, text).with_category(MessageCategory::Shaders));
    }

    pub(crate) fn take_stores(&mut self) -> Vec<(ShaderVariable, ShaderVariable)> {
        std::mem::take(&mut self.stores)
    }
}

/// A named collection of extended instructions.
pub trait ExtInstLibrary: Send + Sync + std::fmt::Debug {
    /// Set name as imported by programs, e.g. `GLSL.std.450`.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn register(&self, registry: &mut ExtInstRegistry) -> Result<()>;
}

/// Extended instruction sets by name, each an opcode table.
#[derive(Debug, Default, Clone)]
pub struct ExtInstRegistry {
    sets: FastHashMap<String, FastHashMap<u32, ExtInstEntry>>,
    libraries: Vec<String>,
}

impl ExtInstRegistry {
    pub fn new() -> Self {
        Self { sets: fast_hash_map_new(), libraries: Vec::new() }
    }

    pub fn register_library(&mut self, library: &dyn ExtInstLibrary) -> Result<()> {
        library.register(self)?;
        self.libraries.push(library.name().to_string());
        debug!(target: "shdbg::exec", set = library.name(), "registered extended instruction library");
        Ok(())
    }

    /// Register (or replace) one opcode of `set`.
    pub fn register_function(&mut self, set: &str, opcode: u32, name: &'static str, func: ExtInstFn) {
        self.sets
            .entry(set.to_string())
            .or_insert_with(fast_hash_map_new)
            .insert(opcode, ExtInstEntry { name, func });
    }

    pub fn lookup(&self, set: &str, opcode: u32) -> Option<&ExtInstEntry> {
        self.sets.get(set)?.get(&opcode)
    }

    pub fn has_set(&self, set: &str) -> bool {
        self.sets.contains_key(set)
    }

    pub fn set_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sets.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn libraries(&self) -> &[String] {
        &self.libraries
    }

    /// Call `set`/`opcode` directly, outside of a lane.
    pub fn invoke(
        &self,
        set: &str,
        opcode: u32,
        template: &ShaderVariable,
        args: &[ShaderVariable],
        api: &mut dyn DebugApiWrapper,
    ) -> Result<ShaderVariable> {
        let entry = self
            .lookup(set, opcode)
            .ok_or_else(|| anyhow!("{set} has no instruction {opcode}"))?;
        let mut ctx = ExtInstContext::new(opcode, template, api);
        (entry.func)(&mut ctx, args)
    }
}

//! Straight-line register tracking.
//!
//! A forward abstract interpreter over one method body that knows just enough to
//! answer two questions: "is this register a compile-time constant here?" and "which
//! strings or table entries does this `String[]` hold?". It never merges states: at
//! every branch target label the state is dropped, so a value is only known when it
//! was produced on the same straight-line path. Anything the tracker cannot model
//! turns the affected registers into unknowns.
//!
//! `:try_start_*`/`:try_end_*` labels only delimit exception ranges and are not jump
//! targets, so they keep the state.

use std::collections::HashMap;

use crate::{
    deobfuscation::locator::{ChunkBinding, ChunkRef},
    smali::{FieldRef, Instruction, JavaString, Register, RegisterFrame, STRING_ARRAY_TYPE},
};

/// Upper bound on tracked `new-array` sizes.
const MAX_TRACKED_ARRAY: i64 = 1 << 16;

type ArrayId = usize;

/// What a register is known to hold.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    /// Integer literal; `wide` values also occupy the next slot
    Int { value: i64, wide: bool },
    /// High half of a wide literal
    WideHigh,
    /// String literal
    Str(JavaString),
    /// Contents of a static `String[]` field
    Table(FieldRef),
    /// One entry of a static `String[]` field at a constant index
    TableElement { table: FieldRef, index: i64 },
    /// A `String[]` built in this method
    Array(ArrayId),
}

#[derive(Debug, Clone, Default)]
struct TrackedArray {
    elements: Vec<Option<ChunkRef>>,
    escaped: bool,
}

impl TrackedArray {
    fn poison(&mut self) {
        self.elements.iter_mut().for_each(|e| *e = None);
    }
}

/// Register state for one method.
#[derive(Debug)]
pub(crate) struct RegisterTracker {
    frame: RegisterFrame,
    registers: HashMap<u32, Value>,
    arrays: Vec<TrackedArray>,
    statics: HashMap<FieldRef, ArrayId>,
    pending: Option<Value>,
}

impl RegisterTracker {
    pub(crate) fn new(frame: RegisterFrame) -> Self {
        Self {
            frame,
            registers: HashMap::new(),
            arrays: Vec::new(),
            statics: HashMap::new(),
            pending: None,
        }
    }

    /// Forget everything known about registers.
    pub(crate) fn reset(&mut self) {
        self.registers.clear();
        self.pending = None;
    }

    /// Apply a label: branch targets reset the state.
    pub(crate) fn label(&mut self, name: &str) {
        if !(name.starts_with("try_start") || name.starts_with("try_end")) {
            self.reset();
        }
    }

    pub(crate) fn get(&self, reg: Register) -> Option<&Value> {
        self.registers.get(&self.frame.slot(reg))
    }

    /// The 64-bit literal held by the pair starting at `reg`, if the pair is intact.
    pub(crate) fn wide_constant(&self, reg: Register) -> Option<i64> {
        let slot = self.frame.slot(reg);
        match (self.registers.get(&slot), self.registers.get(&(slot + 1))) {
            (Some(Value::Int { value, wide: true }), Some(Value::WideHigh)) => Some(*value),
            _ => None,
        }
    }

    fn int(&self, reg: Register) -> Option<i64> {
        match self.get(reg) {
            Some(Value::Int { value, wide: false }) => Some(*value),
            _ => None,
        }
    }

    /// What a `String[]` argument register is bound to.
    pub(crate) fn chunk_binding(&self, reg: Register) -> Option<ChunkBinding> {
        match self.get(reg)? {
            Value::Table(field) => Some(ChunkBinding::Table(field.clone())),
            Value::Array(id) => Some(ChunkBinding::Elements(self.arrays[*id].elements.clone())),
            _ => None,
        }
    }

    /// The literals of a locally built array, if every element is a string literal.
    pub(crate) fn array_literals(&self, reg: Register) -> Option<Vec<JavaString>> {
        match self.get(reg) {
            Some(Value::Array(id)) => self.literals(*id),
            _ => None,
        }
    }

    /// Returns `true` if `reg` holds an array built in this method.
    pub(crate) fn holds_array(&self, reg: Register) -> bool {
        matches!(self.get(reg), Some(Value::Array(_)))
    }

    /// The literals of the array last stored into `field` by this method, if every
    /// element is a string literal.
    pub(crate) fn stored_literals(&self, field: &FieldRef) -> Option<Vec<JavaString>> {
        self.literals(*self.statics.get(field)?)
    }

    fn literals(&self, id: ArrayId) -> Option<Vec<JavaString>> {
        self.arrays[id]
            .elements
            .iter()
            .map(|e| match e {
                Some(ChunkRef::Literal(s)) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    fn element(&self, reg: Register) -> Option<ChunkRef> {
        match self.get(reg)? {
            Value::Str(s) => Some(ChunkRef::Literal(s.clone())),
            Value::TableElement { table, index } => Some(ChunkRef::Table {
                field: table.clone(),
                index: *index,
            }),
            _ => None,
        }
    }

    fn clobber(&mut self, slot: u32) {
        self.registers.remove(&slot);
        if slot > 0 {
            if let Some(Value::Int { wide: true, .. }) = self.registers.get(&(slot - 1)) {
                self.registers.remove(&(slot - 1));
            }
        }
        if let Some(Value::WideHigh) = self.registers.get(&(slot + 1)) {
            self.registers.remove(&(slot + 1));
        }
    }

    fn write(&mut self, reg: Register, wide: bool, value: Option<Value>) {
        let slot = self.frame.slot(reg);
        self.clobber(slot);
        if wide {
            self.clobber(slot + 1);
        }
        if let Some(value) = value {
            let is_wide_int = matches!(value, Value::Int { wide: true, .. });
            self.registers.insert(slot, value);
            if is_wide_int {
                self.registers.insert(slot + 1, Value::WideHigh);
            }
        }
    }

    fn allocate(&mut self, elements: Vec<Option<ChunkRef>>) -> Value {
        self.arrays.push(TrackedArray {
            elements,
            escaped: false,
        });
        Value::Array(self.arrays.len() - 1)
    }

    fn escape_arguments(&mut self, args: &[Register]) {
        for &arg in args {
            if let Some(Value::Array(id)) = self.get(arg) {
                let id = *id;
                self.arrays[id].escaped = true;
            }
        }
        for array in self.arrays.iter_mut().filter(|a| a.escaped) {
            array.poison();
        }
    }

    /// Advance over one instruction.
    pub(crate) fn step(&mut self, instruction: &Instruction) {
        let pending = self.pending.take();

        match instruction {
            Instruction::ConstString { dst, value } => {
                self.write(*dst, false, Some(Value::Str(value.clone())));
            }
            Instruction::Const { dst, value } => {
                self.write(
                    *dst,
                    false,
                    Some(Value::Int {
                        value: *value,
                        wide: false,
                    }),
                );
            }
            Instruction::ConstWide { dst, value } => {
                self.write(
                    *dst,
                    true,
                    Some(Value::Int {
                        value: *value,
                        wide: true,
                    }),
                );
            }
            Instruction::NewArray { dst, size, ty } => {
                let value = match self.int(*size) {
                    Some(n) if ty == STRING_ARRAY_TYPE && (0..=MAX_TRACKED_ARRAY).contains(&n) => {
                        Some(self.allocate(vec![None; n as usize]))
                    }
                    _ => None,
                };
                self.write(*dst, false, value);
            }
            Instruction::FilledNewArray { args, ty } => {
                if ty == STRING_ARRAY_TYPE {
                    let elements = args.iter().map(|r| self.element(*r)).collect();
                    self.pending = Some(self.allocate(elements));
                }
            }
            Instruction::ArrayGetObject { dst, array, index } => {
                let value = match (self.get(*array), self.int(*index)) {
                    (Some(Value::Table(table)), Some(index)) => Some(Value::TableElement {
                        table: table.clone(),
                        index,
                    }),
                    (Some(Value::Array(id)), Some(index)) => usize::try_from(index)
                        .ok()
                        .and_then(|i| self.arrays[*id].elements.get(i).cloned().flatten())
                        .map(|e| match e {
                            ChunkRef::Literal(s) => Value::Str(s),
                            ChunkRef::Table { field, index } => Value::TableElement {
                                table: field,
                                index,
                            },
                        }),
                    _ => None,
                };
                self.write(*dst, false, value);
            }
            Instruction::ArrayPutObject { src, array, index } => {
                if let Some(Value::Array(id)) = self.get(*array) {
                    let id = *id;
                    let element = self.element(*src);
                    let slot = self
                        .int(*index)
                        .and_then(|i| usize::try_from(i).ok())
                        .filter(|i| *i < self.arrays[id].elements.len());
                    match slot {
                        Some(i) => self.arrays[id].elements[i] = element,
                        None => self.arrays[id].poison(),
                    }
                }
            }
            Instruction::StaticGet { dst, field } => {
                // a field this method stored a local array into aliases that array
                let value = match self.statics.get(field) {
                    Some(id) => Some(Value::Array(*id)),
                    None => field.is_string_array().then(|| Value::Table(field.clone())),
                };
                let wide = field.ty == "J" || field.ty == "D";
                self.write(*dst, wide, value);
            }
            Instruction::StaticPut { src, field } => {
                if let Some(Value::Array(id)) = self.get(*src) {
                    let id = *id;
                    self.arrays[id].escaped = true;
                    self.statics.insert(field.clone(), id);
                } else {
                    self.statics.remove(field);
                }
            }
            Instruction::Invoke { args, .. } => {
                self.escape_arguments(args);
            }
            Instruction::MoveResult { dst, wide, .. } => {
                self.write(*dst, *wide, pending);
            }
            Instruction::Move { dst, src, wide } => {
                let src_slot = self.frame.slot(*src);
                let low = self.registers.get(&src_slot).cloned();
                let high = self.registers.get(&(src_slot + 1)).cloned();
                self.write(*dst, *wide, None);
                let dst_slot = self.frame.slot(*dst);
                match (*wide, low, high) {
                    (true, Some(low @ Value::Int { wide: true, .. }), Some(Value::WideHigh)) => {
                        self.registers.insert(dst_slot, low);
                        self.registers.insert(dst_slot + 1, Value::WideHigh);
                    }
                    (false, Some(low), _)
                        if !matches!(low, Value::Int { wide: true, .. } | Value::WideHigh) =>
                    {
                        self.registers.insert(dst_slot, low);
                    }
                    _ => {}
                }
            }
            Instruction::Nop => {}
            Instruction::Other { registers, .. } => {
                if instruction.produces_result() {
                    self.escape_arguments(registers);
                }
                if let Some((dst, wide)) = instruction.destination() {
                    self.write(dst, wide, None);
                }
            }
        }
    }
}

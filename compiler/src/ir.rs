// ir.rs — Arena IR: operations, values, blocks, attributes
//
// A module owns every operation, value, and block in flat arenas addressed by
// `OpId`, `ValueId`, and `BlockId`. Regions are single blocks. Operation kinds
// form a closed enum; anything the rewrite does not synthesize or inspect is
// carried as `OpKind::Other`.
//
// Preconditions: ids passed to accessors were produced by the same module.
// Postconditions: erased operations are unlinked from their block and every
//                 nested operation is erased with them.
// Failure modes: accessing an erased op panics (stale id is a logic error);
//                cross-module cloning of a value defined outside the cloned
//                tree → `IrError::ValueOutOfScope`.
// Side effects: none.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

use crate::ast::Span;
use crate::types::Type;

/// Attribute holding a symbol's name (functions).
pub const SYM_NAME_ATTR: &str = "sym_name";

// ── Identifiers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

// ── Operation kinds ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKind {
    Func,
    Return,
    LaunchFunc,
    Replicate,
    Launch,
    DeviceReturn,
    ParallelExecute,
    Shape,
    CompileMlir,
    CompileSucceededAssert,
    Execute,
    CompilationResult,
    Other(String),
}

impl OpKind {
    pub fn from_name(name: &str) -> OpKind {
        match name {
            "func" => OpKind::Func,
            "std.return" => OpKind::Return,
            "tf_device.launch_func" => OpKind::LaunchFunc,
            "tf_device.replicate" => OpKind::Replicate,
            "tf_device.launch" => OpKind::Launch,
            "tf_device.return" => OpKind::DeviceReturn,
            "tf_device.parallel_execute" => OpKind::ParallelExecute,
            "tf.Shape" => OpKind::Shape,
            "tf._TPUCompileMlir" => OpKind::CompileMlir,
            "tf.TPUCompileSucceededAssert" => OpKind::CompileSucceededAssert,
            "tf.TPUExecute" => OpKind::Execute,
            "tf.TPUCompilationResult" => OpKind::CompilationResult,
            other => OpKind::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            OpKind::Func => "func",
            OpKind::Return => "std.return",
            OpKind::LaunchFunc => "tf_device.launch_func",
            OpKind::Replicate => "tf_device.replicate",
            OpKind::Launch => "tf_device.launch",
            OpKind::DeviceReturn => "tf_device.return",
            OpKind::ParallelExecute => "tf_device.parallel_execute",
            OpKind::Shape => "tf.Shape",
            OpKind::CompileMlir => "tf._TPUCompileMlir",
            OpKind::CompileSucceededAssert => "tf.TPUCompileSucceededAssert",
            OpKind::Execute => "tf.TPUExecute",
            OpKind::CompilationResult => "tf.TPUCompilationResult",
            OpKind::Other(name) => name,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Attributes ──────────────────────────────────────────────────────────────

/// Attribute dictionary. Sorted so printing is deterministic.
pub type Attributes = BTreeMap<String, Attribute>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Unit,
    Bool(bool),
    Int(i64),
    Str(String),
    SymbolRef(String),
    Array(Vec<Attribute>),
    Dict(Attributes),
}

impl Attribute {
    pub fn str(s: impl Into<String>) -> Attribute {
        Attribute::Str(s.into())
    }

    pub fn str_array<S: AsRef<str>>(items: &[S]) -> Attribute {
        Attribute::Array(
            items
                .iter()
                .map(|s| Attribute::Str(s.as_ref().to_string()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Attribute]> {
        match self {
            Attribute::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Attributes> {
        match self {
            Attribute::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_symbol_ref(&self) -> Option<&str> {
        match self {
            Attribute::SymbolRef(s) => Some(s),
            _ => None,
        }
    }

    fn collect_symbol_refs(&self, out: &mut Vec<String>) {
        match self {
            Attribute::SymbolRef(name) => out.push(name.clone()),
            Attribute::Array(items) => items.iter().for_each(|a| a.collect_symbol_refs(out)),
            Attribute::Dict(entries) => entries.values().for_each(|a| a.collect_symbol_refs(out)),
            _ => {}
        }
    }

    /// Rewrite symbol references through `renames`, recursing into containers.
    pub fn rename_symbols(&mut self, renames: &HashMap<String, String>) {
        match self {
            Attribute::SymbolRef(name) => {
                if let Some(new_name) = renames.get(name) {
                    *name = new_name.clone();
                }
            }
            Attribute::Array(items) => items.iter_mut().for_each(|a| a.rename_symbols(renames)),
            Attribute::Dict(entries) => entries
                .values_mut()
                .for_each(|a| a.rename_symbols(renames)),
            _ => {}
        }
    }
}

// ── Operations, values, blocks ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OpKind,
    pub operands: Vec<ValueId>,
    pub results: Vec<ValueId>,
    pub attrs: Attributes,
    pub regions: Vec<BlockId>,
    pub parent: Option<BlockId>,
    pub span: Option<Span>,
}

impl Operation {
    pub fn name(&self) -> &str {
        self.kind.name()
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn result(&self, index: usize) -> ValueId {
        self.results[index]
    }
}

/// Everything needed to create an operation.
#[derive(Debug, Clone)]
pub struct OperationState {
    pub kind: OpKind,
    pub operands: Vec<ValueId>,
    pub result_types: Vec<Type>,
    pub attrs: Attributes,
    pub num_regions: usize,
    pub span: Option<Span>,
}

impl OperationState {
    pub fn new(kind: OpKind) -> Self {
        OperationState {
            kind,
            operands: Vec::new(),
            result_types: Vec::new(),
            attrs: Attributes::new(),
            num_regions: 0,
            span: None,
        }
    }

    pub fn with_operands(mut self, operands: impl IntoIterator<Item = ValueId>) -> Self {
        self.operands.extend(operands);
        self
    }

    pub fn with_result_types(mut self, types: impl IntoIterator<Item = Type>) -> Self {
        self.result_types.extend(types);
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn with_regions(mut self, count: usize) -> Self {
        self.num_regions = count;
        self
    }

    pub fn with_span(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    OpResult { op: OpId, index: usize },
    BlockArg { block: BlockId, index: usize },
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: Type,
    pub def: ValueDef,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub args: Vec<ValueId>,
    pub ops: Vec<OpId>,
    pub parent: Option<OpId>,
}

/// A position inside a block: before an op, or at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    Before(OpId),
    End(BlockId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("operation {0:?} is not attached to a block")]
    Detached(OpId),
    #[error("value {0:?} is used but not defined inside the cloned operation")]
    ValueOutOfScope(ValueId),
}

// ── Module ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Module {
    pub attrs: Attributes,
    ops: Vec<Option<Operation>>,
    values: Vec<ValueData>,
    blocks: Vec<Block>,
    body: BlockId,
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl Module {
    pub fn new() -> Self {
        Module {
            attrs: Attributes::new(),
            ops: Vec::new(),
            values: Vec::new(),
            blocks: vec![Block::default()],
            body: BlockId(0),
        }
    }

    /// The top-level block holding functions.
    pub fn body(&self) -> BlockId {
        self.body
    }

    // ── Accessors ──

    pub fn try_op(&self, id: OpId) -> Option<&Operation> {
        self.ops.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn op(&self, id: OpId) -> &Operation {
        match self.try_op(id) {
            Some(op) => op,
            None => panic!("use of erased operation {:?}", id),
        }
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut Operation {
        match self.ops.get_mut(id.0 as usize).and_then(Option::as_mut) {
            Some(op) => op,
            None => panic!("use of erased operation {:?}", id),
        }
    }

    pub fn is_live(&self, id: OpId) -> bool {
        self.try_op(id).is_some()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn value_type(&self, v: ValueId) -> &Type {
        &self.values[v.0 as usize].ty
    }

    pub fn value_def(&self, v: ValueId) -> ValueDef {
        self.values[v.0 as usize].def
    }

    pub fn result_types(&self, op: OpId) -> Vec<Type> {
        self.op(op)
            .results
            .iter()
            .map(|v| self.value_type(*v).clone())
            .collect()
    }

    pub fn set_attr(&mut self, op: OpId, name: impl Into<String>, value: Attribute) {
        self.op_mut(op).attrs.insert(name.into(), value);
    }

    // ── Creation ──

    /// Create a detached operation (and its result values and region blocks).
    pub fn create_op(&mut self, state: OperationState) -> OpId {
        let id = OpId(self.ops.len() as u32);
        let results = state
            .result_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| {
                self.new_value(ty, ValueDef::OpResult { op: id, index })
            })
            .collect();
        let regions = (0..state.num_regions)
            .map(|_| {
                let block = BlockId(self.blocks.len() as u32);
                self.blocks.push(Block {
                    parent: Some(id),
                    ..Block::default()
                });
                block
            })
            .collect();
        self.ops.push(Some(Operation {
            kind: state.kind,
            operands: state.operands,
            results,
            attrs: state.attrs,
            regions,
            parent: None,
            span: state.span,
        }));
        id
    }

    pub fn add_block_arg(&mut self, block: BlockId, ty: Type) -> ValueId {
        let index = self.blocks[block.0 as usize].args.len();
        let v = self.new_value(ty, ValueDef::BlockArg { block, index });
        self.blocks[block.0 as usize].args.push(v);
        v
    }

    fn new_value(&mut self, ty: Type, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData { ty, def });
        id
    }

    // ── Placement ──

    /// Attach a detached op at `point`.
    pub fn insert_op(&mut self, op: OpId, point: InsertPoint) -> Result<(), IrError> {
        let (block, index) = match point {
            InsertPoint::End(block) => (block, self.blocks[block.0 as usize].ops.len()),
            InsertPoint::Before(anchor) => {
                let block = self.op(anchor).parent.ok_or(IrError::Detached(anchor))?;
                let index = self.position_in_block(block, anchor)?;
                (block, index)
            }
        };
        self.blocks[block.0 as usize].ops.insert(index, op);
        self.op_mut(op).parent = Some(block);
        Ok(())
    }

    pub fn append_op(&mut self, op: OpId, block: BlockId) {
        self.blocks[block.0 as usize].ops.push(op);
        self.op_mut(op).parent = Some(block);
    }

    /// Move an attached or detached op to `point`.
    pub fn move_op(&mut self, op: OpId, point: InsertPoint) -> Result<(), IrError> {
        self.detach(op);
        self.insert_op(op, point)
    }

    fn detach(&mut self, op: OpId) {
        if let Some(block) = self.op_mut(op).parent.take() {
            self.blocks[block.0 as usize].ops.retain(|o| *o != op);
        }
    }

    fn position_in_block(&self, block: BlockId, op: OpId) -> Result<usize, IrError> {
        self.block(block)
            .ops
            .iter()
            .position(|o| *o == op)
            .ok_or(IrError::Detached(op))
    }

    /// Unlink `op` and erase it together with everything nested inside it.
    pub fn erase_op(&mut self, op: OpId) {
        self.detach(op);
        let mut nested = Vec::new();
        self.walk_nested(op, &mut nested);
        for id in nested {
            self.ops[id.0 as usize] = None;
        }
    }

    // ── Structure queries ──

    pub fn parent_op(&self, op: OpId) -> Option<OpId> {
        self.op(op)
            .parent
            .and_then(|block| self.block(block).parent)
    }

    /// All live ops reachable from the module body, in pre-order.
    pub fn walk(&self) -> Vec<OpId> {
        let mut out = Vec::new();
        for op in &self.block(self.body).ops {
            self.walk_nested(*op, &mut out);
        }
        out
    }

    /// `op` followed by every op nested in its regions, in pre-order.
    pub fn walk_nested(&self, op: OpId, out: &mut Vec<OpId>) {
        let mut stack = vec![op];
        while let Some(current) = stack.pop() {
            out.push(current);
            for region in self.op(current).regions.iter().rev() {
                stack.extend(self.block(*region).ops.iter().rev().copied());
            }
        }
    }

    /// Every (user op, operand index) pair that reads `value`.
    pub fn users(&self, value: ValueId) -> Vec<(OpId, usize)> {
        self.walk()
            .into_iter()
            .flat_map(|op| {
                self.op(op)
                    .operands
                    .iter()
                    .enumerate()
                    .filter(move |(_, v)| **v == value)
                    .map(move |(i, _)| (op, i))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn replace_all_uses_with(&mut self, from: ValueId, to: ValueId) {
        for op in self.ops.iter_mut().flatten() {
            for operand in op.operands.iter_mut() {
                if *operand == from {
                    *operand = to;
                }
            }
        }
    }

    // ── Symbols ──

    pub fn symbol_name(&self, op: OpId) -> Option<&str> {
        self.op(op).attr(SYM_NAME_ATTR).and_then(Attribute::as_str)
    }

    /// Top-level op whose `sym_name` is `name`.
    pub fn lookup_symbol(&self, name: &str) -> Option<OpId> {
        self.block(self.body)
            .ops
            .iter()
            .copied()
            .find(|op| self.symbol_name(*op) == Some(name))
    }

    pub fn lookup_func(&self, name: &str) -> Option<OpId> {
        self.lookup_symbol(name)
            .filter(|op| self.op(*op).kind == OpKind::Func)
    }

    /// Symbol references made by ops nested inside `op`, in walk order.
    pub fn symbol_uses(&self, op: OpId) -> Vec<String> {
        let mut nested = Vec::new();
        self.walk_nested(op, &mut nested);
        let mut uses = Vec::new();
        for id in nested.into_iter().skip(1) {
            for attr in self.op(id).attrs.values() {
                attr.collect_symbol_refs(&mut uses);
            }
        }
        uses
    }

    /// Rewrite symbol references in every op nested inside `op`.
    pub fn rename_symbol_uses(&mut self, op: OpId, renames: &HashMap<String, String>) {
        let mut nested = Vec::new();
        self.walk_nested(op, &mut nested);
        for id in nested.into_iter().skip(1) {
            for attr in self.op_mut(id).attrs.values_mut() {
                attr.rename_symbols(renames);
            }
        }
    }

    // ── Cloning ──

    /// Deep-copy `op` into `dst`. The copy is returned detached.
    pub fn clone_into(&self, op: OpId, dst: &mut Module) -> Result<OpId, IrError> {
        let mut mapping = HashMap::new();
        self.clone_rec(op, dst, &mut mapping)
    }

    fn clone_rec(
        &self,
        op: OpId,
        dst: &mut Module,
        mapping: &mut HashMap<ValueId, ValueId>,
    ) -> Result<OpId, IrError> {
        let src = self.op(op);
        let operands = src
            .operands
            .iter()
            .map(|v| mapping.get(v).copied().ok_or(IrError::ValueOutOfScope(*v)))
            .collect::<Result<Vec<_>, _>>()?;
        let mut state = OperationState::new(src.kind.clone())
            .with_operands(operands)
            .with_result_types(self.result_types(op))
            .with_regions(src.regions.len())
            .with_span(src.span);
        state.attrs = src.attrs.clone();
        let copy = dst.create_op(state);

        for (old, new) in src.results.iter().zip(dst.op(copy).results.clone()) {
            mapping.insert(*old, new);
        }
        let new_regions = dst.op(copy).regions.clone();
        for (old_block, new_block) in src.regions.iter().zip(new_regions) {
            for arg in &self.block(*old_block).args {
                let new_arg = dst.add_block_arg(new_block, self.value_type(*arg).clone());
                mapping.insert(*arg, new_arg);
            }
            for nested in &self.block(*old_block).ops {
                let nested_copy = self.clone_rec(*nested, dst, mapping)?;
                dst.append_op(nested_copy, new_block);
            }
        }
        Ok(copy)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ElementType, TensorType};

    fn i32_tensor() -> Type {
        Type::Tensor(TensorType::scalar(ElementType::I32))
    }

    fn func(module: &mut Module, name: &str) -> (OpId, BlockId) {
        let f = module.create_op(
            OperationState::new(OpKind::Func)
                .with_attr(SYM_NAME_ATTR, Attribute::str(name))
                .with_regions(1),
        );
        let body = module.body();
        module.append_op(f, body);
        let block = module.op(f).regions[0];
        (f, block)
    }

    #[test]
    fn op_kind_names_round_trip() {
        for name in [
            "tf_device.launch_func",
            "tf_device.replicate",
            "tf._TPUCompileMlir",
            "tf.TPUExecute",
            "my.custom_op",
        ] {
            assert_eq!(OpKind::from_name(name).name(), name);
        }
    }

    #[test]
    fn insert_before_keeps_creation_order() {
        let mut m = Module::new();
        let (_, block) = func(&mut m, "main");
        let anchor = m.create_op(OperationState::new(OpKind::Return));
        m.append_op(anchor, block);
        let a = m.create_op(OperationState::new(OpKind::Other("a".into())));
        let b = m.create_op(OperationState::new(OpKind::Other("b".into())));
        m.insert_op(a, InsertPoint::Before(anchor)).unwrap();
        m.insert_op(b, InsertPoint::Before(anchor)).unwrap();
        assert_eq!(m.block(block).ops, vec![a, b, anchor]);
    }

    #[test]
    fn erase_removes_nested_ops() {
        let mut m = Module::new();
        let (f, block) = func(&mut m, "main");
        let outer = m.create_op(OperationState::new(OpKind::Launch).with_regions(1));
        m.append_op(outer, block);
        let inner_block = m.op(outer).regions[0];
        let inner = m.create_op(OperationState::new(OpKind::DeviceReturn));
        m.append_op(inner, inner_block);

        assert_eq!(m.walk(), vec![f, outer, inner]);
        m.erase_op(outer);
        assert!(!m.is_live(outer));
        assert!(!m.is_live(inner));
        assert_eq!(m.walk(), vec![f]);
    }

    #[test]
    fn replace_all_uses_rewires_operands() {
        let mut m = Module::new();
        let (_, block) = func(&mut m, "main");
        let arg = m.add_block_arg(block, i32_tensor());
        let producer = m.create_op(
            OperationState::new(OpKind::Other("p".into())).with_result_types([i32_tensor()]),
        );
        m.append_op(producer, block);
        let consumer =
            m.create_op(OperationState::new(OpKind::Return).with_operands([arg, arg]));
        m.append_op(consumer, block);

        let new_value = m.op(producer).result(0);
        m.replace_all_uses_with(arg, new_value);
        assert_eq!(m.op(consumer).operands, vec![new_value, new_value]);
        assert_eq!(m.users(new_value), vec![(consumer, 0), (consumer, 1)]);
        assert!(m.users(arg).is_empty());
    }

    #[test]
    fn symbol_uses_skip_the_op_itself() {
        let mut m = Module::new();
        let (f, block) = func(&mut m, "main");
        let call = m.create_op(
            OperationState::new(OpKind::Other("call".into())).with_attr(
                "callees",
                Attribute::Array(vec![
                    Attribute::SymbolRef("a".into()),
                    Attribute::Dict(Attributes::from([(
                        "k".to_string(),
                        Attribute::SymbolRef("b".into()),
                    )])),
                ]),
            ),
        );
        m.append_op(call, block);
        assert_eq!(m.symbol_uses(f), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(m.lookup_func("main"), Some(f));
        assert_eq!(m.lookup_func("a"), None);
    }

    #[test]
    fn clone_into_remaps_values() {
        let mut src = Module::new();
        let (f, block) = func(&mut src, "main");
        let arg = src.add_block_arg(block, i32_tensor());
        let ret = src.create_op(OperationState::new(OpKind::Return).with_operands([arg]));
        src.append_op(ret, block);

        let mut dst = Module::new();
        let copy = src.clone_into(f, &mut dst).unwrap();
        let copy_block = dst.op(copy).regions[0];
        let copy_arg = dst.block(copy_block).args[0];
        let copy_ret = dst.block(copy_block).ops[0];
        assert_eq!(dst.op(copy_ret).operands, vec![copy_arg]);
        assert_eq!(dst.value_type(copy_arg), &i32_tensor());
    }

    #[test]
    fn clone_into_rejects_free_values() {
        let mut src = Module::new();
        let (_, block) = func(&mut src, "main");
        let arg = src.add_block_arg(block, i32_tensor());
        let ret = src.create_op(OperationState::new(OpKind::Return).with_operands([arg]));
        src.append_op(ret, block);

        let mut dst = Module::new();
        assert_eq!(
            src.clone_into(ret, &mut dst),
            Err(IrError::ValueOutOfScope(arg))
        );
    }
}

// builder.rs — Insertion cursor over a module
//
// `OpBuilder` creates operations at an explicit insertion point. Nested
// construction (filling a region, then continuing after the parent) uses
// `with_insertion_point`, which restores the outer cursor on return.
//
// Preconditions: the insertion point names a live op or block of `module`.
// Postconditions: created ops are attached at the cursor in creation order.
// Failure modes: a cursor anchored on a detached op → `IrError::Detached`.
// Side effects: mutates the borrowed module.

use crate::ir::{BlockId, InsertPoint, IrError, Module, OpId, OperationState};

pub struct OpBuilder<'m> {
    module: &'m mut Module,
    point: InsertPoint,
}

impl<'m> OpBuilder<'m> {
    pub fn new(module: &'m mut Module, point: InsertPoint) -> Self {
        OpBuilder { module, point }
    }

    /// Builder positioned immediately before `op`.
    pub fn before(module: &'m mut Module, op: OpId) -> Self {
        Self::new(module, InsertPoint::Before(op))
    }

    pub fn at_end(module: &'m mut Module, block: BlockId) -> Self {
        Self::new(module, InsertPoint::End(block))
    }

    pub fn module(&self) -> &Module {
        self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        self.module
    }

    pub fn insertion_point(&self) -> InsertPoint {
        self.point
    }

    pub fn set_insertion_point(&mut self, point: InsertPoint) {
        self.point = point;
    }

    /// Create an op from `state` and attach it at the cursor.
    pub fn create(&mut self, state: OperationState) -> Result<OpId, IrError> {
        let op = self.module.create_op(state);
        self.module.insert_op(op, self.point)?;
        Ok(op)
    }

    /// Run `f` with the cursor at `point`, then restore the previous cursor.
    pub fn with_insertion_point<T>(
        &mut self,
        point: InsertPoint,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        let saved = self.point;
        self.point = point;
        let result = f(self);
        self.point = saved;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::OpKind;

    #[test]
    fn nested_insertion_restores_cursor() {
        let mut m = Module::new();
        let body = m.body();
        let anchor = m.create_op(OperationState::new(OpKind::Return));
        m.append_op(anchor, body);

        let mut b = OpBuilder::before(&mut m, anchor);
        let wrapper = b
            .create(OperationState::new(OpKind::Launch).with_regions(1))
            .unwrap();
        let region = b.module().op(wrapper).regions[0];
        let inner = b
            .with_insertion_point(InsertPoint::End(region), |b| {
                b.create(OperationState::new(OpKind::DeviceReturn))
            })
            .unwrap();
        let after = b
            .create(OperationState::new(OpKind::Other("after".into())))
            .unwrap();
        assert_eq!(b.insertion_point(), InsertPoint::Before(anchor));

        assert_eq!(m.block(body).ops, vec![wrapper, after, anchor]);
        assert_eq!(m.block(region).ops, vec![inner]);
        assert_eq!(m.parent_op(inner), Some(wrapper));
    }

    #[test]
    fn detached_anchor_is_an_error() {
        let mut m = Module::new();
        let loose = m.create_op(OperationState::new(OpKind::Return));
        let mut b = OpBuilder::before(&mut m, loose);
        assert_eq!(
            b.create(OperationState::new(OpKind::Return)),
            Err(IrError::Detached(loose))
        );
    }
}

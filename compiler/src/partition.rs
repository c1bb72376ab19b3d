// partition.rs — Per-logical-core input lists for multi-core execution
//
// When a launch runs on several logical cores, each core's execute op needs
// its own operand list. `InputPartitioner` is the seam for that decision.
//
// Preconditions: `launch` is a live launch op of `module`.
// Postconditions: the returned list has one entry per logical core.
// Failure modes: none.
// Side effects: none.

use crate::ir::{Module, OpId, ValueId};

pub trait InputPartitioner {
    /// Operand list for each of `num_cores_per_replica` logical cores.
    fn partition(
        &self,
        module: &Module,
        launch: OpId,
        num_cores_per_replica: usize,
    ) -> Vec<Vec<ValueId>>;
}

/// Hands every launch operand to every logical core.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicateInputsPartitioner;

impl InputPartitioner for ReplicateInputsPartitioner {
    fn partition(
        &self,
        module: &Module,
        launch: OpId,
        num_cores_per_replica: usize,
    ) -> Vec<Vec<ValueId>> {
        let operands = &module.op(launch).operands;
        vec![operands.clone(); num_cores_per_replica]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::parse_module;

    #[test]
    fn every_core_gets_all_operands() {
        let module = parse_module(
            r#"
            func @main(%arg0: tensor<i32>, %arg1: tensor<f32>) {
              "tf_device.launch_func"(%arg0, %arg1) {func = @f} : (tensor<i32>, tensor<f32>) -> ()
              "std.return"() : () -> ()
            }
            "#,
        )
        .unwrap();
        let main = module.lookup_func("main").unwrap();
        let block = module.op(main).regions[0];
        let launch = module.block(block).ops[0];
        let args = module.block(block).args.clone();

        let parts = ReplicateInputsPartitioner.partition(&module, launch, 3);
        assert_eq!(parts, vec![args.clone(), args.clone(), args]);
    }
}

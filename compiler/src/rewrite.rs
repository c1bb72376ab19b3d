// rewrite.rs — Lowering of one `tf_device.launch_func` into runtime ops
//
// For a launch op marked with `_tpu_replicate`, emits in order: shape queries
// for operands without a static shape, the compile op (wrapped in a
// `tf_device.launch` on the compilation device), a compile-status assert,
// and either a single execute op or a `tf_device.parallel_execute` holding
// one execute op per logical core. Uses of the launch results are rewired and
// the launch op is erased.
//
// Preconditions: `launch` is a live, attached op of the builder's module.
// Postconditions: on `Rewritten` the launch op is gone and every former use
//                 of its results reads the corresponding execute result.
// Failure modes: attribute validation, device resolution, missing function
//                → op-anchored `Diagnostic`. Ops created before the failure
//                are left in place.
// Side effects: mutates the module through the builder.

use std::iter;

use tracing::{debug, trace};

use crate::builder::OpBuilder;
use crate::closure::encapsulate_func_and_serialize;
use crate::device::{device_alias_for_logical_core, DeviceResolver, ParsedDeviceName};
use crate::diag::{codes, Diagnostic};
use crate::ir::{
    Attribute, Attributes, InsertPoint, IrError, Module, OpId, OpKind, OperationState, ValueId,
};
use crate::metadata::{build_metadata, DeviceAssignmentProto};
use crate::partition::InputPartitioner;
use crate::types::{ElementType, TensorType, Type, DYNAMIC_DIM};

// ── Attribute names ──────────────────────────────────────────────────────

/// Marks a launch op as an accelerator rewrite target.
pub const REPLICATE_MARKER_ATTR: &str = "_tpu_replicate";
pub const NUM_CORES_PER_REPLICA_ATTR: &str = "num_cores_per_replica";
pub const FUNC_ATTR: &str = "func";
pub const DEVICE_ATTR: &str = "device";
/// Per-alias device lists attached to a `tf_device.replicate`.
pub const REPLICATE_DEVICES_ATTR: &str = "devices";
pub const REPLICA_COUNT_ATTR: &str = "n";
pub const METADATA_ATTR: &str = "metadata";
pub const NUM_DYNAMIC_SHAPES_ATTR: &str = "NumDynamicShapes";
pub const MLIR_MODULE_ATTR: &str = "mlir_module";

// ── Configuration ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteOptions {
    /// Serialize compile metadata as indented JSON instead of compact JSON.
    pub metadata_debug: bool,
}

/// Collaborators and options shared by every launch rewrite in a pass.
#[derive(Clone, Copy)]
pub struct RewriteContext<'a> {
    pub options: RewriteOptions,
    pub resolver: &'a dyn DeviceResolver,
    pub partitioner: &'a dyn InputPartitioner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// Not marked for rewriting; left untouched.
    Skipped,
    Rewritten,
}

// ── Building blocks ──────────────────────────────────────────────────────

/// Wrap `op` in a `tf_device.launch` bound to `device`.
///
/// The wrapper is created at the builder's cursor; `op` moves into its body
/// ahead of a `tf_device.return` of its results. The wrapper's results
/// mirror `op`'s results.
pub fn wrap_op_in_launch(
    builder: &mut OpBuilder,
    op: OpId,
    device: &str,
) -> Result<OpId, Diagnostic> {
    let module = builder.module();
    let result_types = module.result_types(op);
    let results = module.op(op).results.clone();
    let span = module.op(op).span;

    let launch = builder.create(
        OperationState::new(OpKind::Launch)
            .with_attr(DEVICE_ATTR, Attribute::str(device))
            .with_result_types(result_types)
            .with_regions(1)
            .with_span(span),
    )?;
    let body = builder.module().op(launch).regions[0];
    let terminator = builder.with_insertion_point(InsertPoint::End(body), |b| {
        b.create(
            OperationState::new(OpKind::DeviceReturn)
                .with_operands(results)
                .with_span(span),
        )
    })?;
    builder
        .module_mut()
        .move_op(op, InsertPoint::Before(terminator))?;
    Ok(launch)
}

/// Create the compile op for `launch`, wrapped on `compilation_device`.
///
/// Returns the wrapper, whose result 0 is the compile status and result
/// `1 + core` the compilation key for each logical core.
pub fn build_compile_op(
    builder: &mut OpBuilder,
    launch: OpId,
    num_replicas: usize,
    num_cores_per_replica: usize,
    compilation_device: &str,
    xla_device_assignment: Option<&DeviceAssignmentProto>,
    options: &RewriteOptions,
) -> Result<OpId, Diagnostic> {
    let metadata = build_metadata(
        builder.module(),
        launch,
        num_replicas,
        num_cores_per_replica,
        xla_device_assignment,
    )?;
    let metadata_text = metadata.to_json(options.metadata_debug).map_err(|e| {
        Diagnostic::op_error(
            builder.module(),
            launch,
            format!("failed to serialize compile metadata: {}", e),
        )
        .with_code(codes::E0002)
    })?;

    let span = builder.module().op(launch).span;
    let operands = builder.module().op(launch).operands.clone();
    let mut dynamic_shapes: Vec<ValueId> = Vec::new();
    for (operand, arg) in operands.iter().zip(&metadata.args) {
        if arg.shape.is_fully_defined() {
            continue;
        }
        let shape = builder.create(
            OperationState::new(OpKind::Shape)
                .with_operands([*operand])
                .with_result_types([Type::Tensor(TensorType::ranked(
                    ElementType::I64,
                    vec![DYNAMIC_DIM],
                ))])
                .with_span(span),
        )?;
        dynamic_shapes.push(builder.module().op(shape).result(0));
    }

    let module = builder.module();
    let func_name = module
        .op(launch)
        .attr(FUNC_ATTR)
        .and_then(Attribute::as_symbol_ref)
        .ok_or_else(|| {
            Diagnostic::op_error(module, launch, "does not have `func` attribute")
                .with_code(codes::E0001)
        })?
        .to_string();
    let func = module.lookup_func(&func_name).ok_or_else(|| {
        Diagnostic::op_error(
            module,
            launch,
            format!("referenced function '@{}' not found", func_name),
        )
        .with_code(codes::E0005)
    })?;
    let mlir_module =
        encapsulate_func_and_serialize(module, func).map_err(|d| d.at_op(module, launch))?;

    let num_dynamic_shapes = dynamic_shapes.len() as i64;
    let compile = builder.create(
        OperationState::new(OpKind::CompileMlir)
            .with_operands(dynamic_shapes)
            .with_attr(METADATA_ATTR, Attribute::Str(metadata_text))
            .with_attr(NUM_DYNAMIC_SHAPES_ATTR, Attribute::Int(num_dynamic_shapes))
            .with_attr(MLIR_MODULE_ATTR, Attribute::Str(mlir_module))
            .with_result_types(iter::repeat(Type::string_tensor()).take(1 + num_cores_per_replica))
            .with_span(span),
    )?;
    trace!(
        func = %func_name,
        num_dynamic_shapes,
        "built compile op"
    );

    wrap_op_in_launch(builder, compile, compilation_device)
}

/// Create a `tf.TPUCompileSucceededAssert` on the compile status.
pub fn build_compile_succeeded_assert_op(
    builder: &mut OpBuilder,
    compile: OpId,
    compilation_device: &str,
) -> Result<OpId, Diagnostic> {
    let status = builder.module().op(compile).result(0);
    let span = builder.module().op(compile).span;
    let assert = builder.create(
        OperationState::new(OpKind::CompileSucceededAssert)
            .with_operands([status])
            .with_span(span),
    )?;
    wrap_op_in_launch(builder, assert, compilation_device)
}

/// Create a `tf.TPUExecute` with the launch op's result types.
pub fn build_execute_op(
    builder: &mut OpBuilder,
    inputs: Vec<ValueId>,
    launch: OpId,
) -> Result<OpId, Diagnostic> {
    let result_types = builder.module().result_types(launch);
    let span = builder.module().op(launch).span;
    let execute = builder.create(
        OperationState::new(OpKind::Execute)
            .with_operands(inputs)
            .with_result_types(result_types)
            .with_span(span),
    )?;
    Ok(execute)
}

/// Create a `tf_device.parallel_execute` with one region per logical core.
///
/// Results are the launch result types repeated per core, in core order.
/// Region `i` runs `tf.TPUExecute` on the partitioner's inputs for core `i`
/// plus compilation key `1 + i`, wrapped with no device.
pub fn build_parallel_execute_op(
    builder: &mut OpBuilder,
    num_cores_per_replica: usize,
    compile: OpId,
    launch: OpId,
    partitioner: &dyn InputPartitioner,
) -> Result<OpId, Diagnostic> {
    let launch_result_types = builder.module().result_types(launch);
    let span = builder.module().op(launch).span;
    let concatenated: Vec<Type> = (0..num_cores_per_replica)
        .flat_map(|_| launch_result_types.iter().cloned())
        .collect();

    let parallel = builder.create(
        OperationState::new(OpKind::ParallelExecute)
            .with_result_types(concatenated)
            .with_regions(num_cores_per_replica)
            .with_span(span),
    )?;

    let input_list = partitioner.partition(builder.module(), launch, num_cores_per_replica);
    let regions = builder.module().op(parallel).regions.clone();
    for (core, region) in regions.into_iter().enumerate() {
        builder.with_insertion_point(InsertPoint::End(region), |b| -> Result<(), Diagnostic> {
            let mut inputs = input_list.get(core).cloned().unwrap_or_default();
            inputs.push(b.module().op(compile).result(1 + core));
            let execute = build_execute_op(b, inputs, launch)?;
            let wrapper = wrap_op_in_launch(b, execute, "")?;
            let results = b.module().op(wrapper).results.clone();
            b.create(
                OperationState::new(OpKind::DeviceReturn)
                    .with_operands(results)
                    .with_span(span),
            )?;
            Ok(())
        })?;
    }
    trace!(cores = num_cores_per_replica, "built parallel execute op");
    Ok(parallel)
}

/// Point every use of the launch results at the first core's results.
pub fn remap_outputs_of_parallel_execute(module: &mut Module, launch: OpId, parallel: OpId) {
    let pairs: Vec<(ValueId, ValueId)> = module
        .op(launch)
        .results
        .iter()
        .copied()
        .zip(module.op(parallel).results.iter().copied())
        .collect();
    for (from, to) in pairs {
        module.replace_all_uses_with(from, to);
    }
}

/// Bind the execute op to its device(s) and wrap it.
///
/// Under a `tf_device.replicate`, the replicate gains a `devices` entry
/// mapping the logical core 0 alias to core 0 of every replica, and the
/// wrapper's device is left empty. Otherwise the wrapper runs on replica 0,
/// core 0.
pub fn assign_devices_to_replicated_execute(
    builder: &mut OpBuilder,
    execution_devices: &[Vec<String>],
    replicate: Option<OpId>,
    execute: OpId,
) -> Result<OpId, Diagnostic> {
    let device = match replicate {
        Some(replicate) => {
            let core0: Vec<&str> = execution_devices
                .iter()
                .filter_map(|replica| replica.first().map(String::as_str))
                .collect();
            let devices = Attributes::from([(
                device_alias_for_logical_core(0),
                Attribute::str_array(&core0),
            )]);
            builder
                .module_mut()
                .set_attr(replicate, REPLICATE_DEVICES_ATTR, Attribute::Dict(devices));
            String::new()
        }
        None => execution_devices
            .first()
            .and_then(|replica| replica.first())
            .cloned()
            .ok_or_else(|| {
                Diagnostic::op_error(builder.module(), execute, "no execution device assigned")
                    .with_code(codes::E0004)
            })?,
    };
    wrap_op_in_launch(builder, execute, &device)
}

// ── Orchestration ────────────────────────────────────────────────────────

fn positive_count(
    module: &Module,
    op: OpId,
    name: &str,
) -> Result<usize, Diagnostic> {
    let value = module
        .op(op)
        .attr(name)
        .and_then(Attribute::as_int)
        .ok_or_else(|| Diagnostic::missing_attribute(name).at_op(module, op))?;
    usize::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            Diagnostic::op_error(
                module,
                op,
                format!("bad '{}' attribute with value '{}'", name, value),
            )
            .with_code(codes::E0002)
        })
}

/// Rewrite one launch op. Non-targets are skipped untouched.
pub fn rewrite_launch_func(
    builder: &mut OpBuilder,
    launch: OpId,
    devices: &[ParsedDeviceName],
    ctx: &RewriteContext,
) -> Result<RewriteOutcome, Diagnostic> {
    let module = builder.module();
    if module
        .op(launch)
        .attr(REPLICATE_MARKER_ATTR)
        .and_then(Attribute::as_str)
        .is_none()
    {
        return Ok(RewriteOutcome::Skipped);
    }

    let replicate = module
        .parent_op(launch)
        .filter(|parent| module.op(*parent).kind == OpKind::Replicate);
    let num_replicas = match replicate {
        Some(replicate) => positive_count(module, replicate, REPLICA_COUNT_ATTR)?,
        None => 1,
    };
    let num_cores_per_replica = positive_count(module, launch, NUM_CORES_PER_REPLICA_ATTR)?;

    let assignment = ctx
        .resolver
        .resolve(devices, num_replicas, num_cores_per_replica, "", &[])
        .map_err(|e| {
            Diagnostic::op_error(
                module,
                launch,
                format!("error in fetching TPU compilation/execution devices: {}", e),
            )
            .with_code(codes::E0004)
        })?;

    builder.set_insertion_point(InsertPoint::Before(launch));
    let compile = build_compile_op(
        builder,
        launch,
        num_replicas,
        num_cores_per_replica,
        &assignment.compilation_device,
        assignment.xla_device_assignment.as_ref(),
        &ctx.options,
    )?;

    // Placeholders in the same block now read the real compile status.
    let status = builder.module().op(compile).result(0);
    let block = builder
        .module()
        .op(launch)
        .parent
        .ok_or(IrError::Detached(launch))?;
    let placeholders: Vec<ValueId> = builder
        .module()
        .block(block)
        .ops
        .iter()
        .filter(|op| builder.module().op(**op).kind == OpKind::CompilationResult)
        .filter_map(|op| builder.module().op(*op).results.first().copied())
        .collect();
    for placeholder in placeholders {
        builder.module_mut().replace_all_uses_with(placeholder, status);
    }

    build_compile_succeeded_assert_op(builder, compile, &assignment.compilation_device)?;

    if num_cores_per_replica > 1 {
        let parallel = build_parallel_execute_op(
            builder,
            num_cores_per_replica,
            compile,
            launch,
            ctx.partitioner,
        )?;
        remap_outputs_of_parallel_execute(builder.module_mut(), launch, parallel);
    } else {
        let mut inputs = builder.module().op(launch).operands.clone();
        inputs.push(builder.module().op(compile).result(1));
        let execute = build_execute_op(builder, inputs, launch)?;
        let wrapper = assign_devices_to_replicated_execute(
            builder,
            &assignment.execution_devices,
            replicate,
            execute,
        )?;
        let pairs: Vec<(ValueId, ValueId)> = builder
            .module()
            .op(launch)
            .results
            .iter()
            .copied()
            .zip(builder.module().op(wrapper).results.iter().copied())
            .collect();
        for (from, to) in pairs {
            builder.module_mut().replace_all_uses_with(from, to);
        }
    }

    builder.module_mut().erase_op(launch);
    builder.set_insertion_point(InsertPoint::End(block));
    debug!(
        num_replicas,
        num_cores_per_replica,
        compilation_device = %assignment.compilation_device,
        "rewrote launch op"
    );
    Ok(RewriteOutcome::Rewritten)
}

// ── Tests ────────────────────────────────────────────────────────────────

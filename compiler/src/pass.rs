// pass.rs — Module pass driving the launch rewrite
//
// Walks the module, rewrites every `tf_device.launch_func` marked for
// accelerator replication, and on success removes the compilation result
// placeholders the rewrite has rewired.
//
// Preconditions: the module passed import checks.
// Postconditions: on success no marked launch op and no placeholder remains.
// Failure modes: malformed `tf.devices`, the first failing launch rewrite, or a
//                placeholder whose uses no rewrite rewired (nothing is erased).
//                Launch ops rewritten before the failure stay rewritten.
// Side effects: mutates the module; emits `tracing` events.

use tracing::{debug, warn};

use crate::builder::OpBuilder;
use crate::device::{devices_from_module, DefaultDeviceResolver, DeviceResolver};
use crate::diag::{codes, Diagnostic};
use crate::ir::{InsertPoint, Module, OpKind};
use crate::partition::{InputPartitioner, ReplicateInputsPartitioner};
use crate::rewrite::{rewrite_launch_func, RewriteContext, RewriteOptions, RewriteOutcome};

/// Registered name of the pass.
pub const PASS_NAME: &str = "tf-tpu-rewrite";

// ── Result ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PassResult {
    pub diagnostics: Vec<Diagnostic>,
    /// Launch ops replaced by compile/execute sequences.
    pub rewritten: usize,
    /// Launch ops without the replication marker.
    pub skipped: usize,
}

impl PassResult {
    pub fn failed(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

// ── Pass ─────────────────────────────────────────────────────────────────

pub struct TpuRewritePass {
    pub options: RewriteOptions,
    resolver: Box<dyn DeviceResolver>,
    partitioner: Box<dyn InputPartitioner>,
}

impl TpuRewritePass {
    pub fn new(options: RewriteOptions) -> Self {
        TpuRewritePass {
            options,
            resolver: Box::new(DefaultDeviceResolver),
            partitioner: Box::new(ReplicateInputsPartitioner),
        }
    }

    /// Swap in a different device resolver.
    pub fn with_resolver(mut self, resolver: impl DeviceResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Swap in a different input partitioner.
    pub fn with_partitioner(mut self, partitioner: impl InputPartitioner + 'static) -> Self {
        self.partitioner = Box::new(partitioner);
        self
    }

    /// Run the rewrite over every launch op in `module`.
    #[tracing::instrument(name = "tpu_rewrite", skip_all)]
    pub fn run(&self, module: &mut Module) -> PassResult {
        let mut result = PassResult::default();

        let devices = match devices_from_module(module) {
            Ok(devices) => devices,
            Err(diag) => {
                warn!(%diag, "malformed device list");
                result.diagnostics.push(diag);
                return result;
            }
        };

        let ctx = RewriteContext {
            options: self.options,
            resolver: self.resolver.as_ref(),
            partitioner: self.partitioner.as_ref(),
        };

        // Snapshot first; the rewrite erases and creates ops as it goes.
        let launches: Vec<_> = module
            .walk()
            .into_iter()
            .filter(|op| module.op(*op).kind == OpKind::LaunchFunc)
            .collect();

        let body = module.body();
        let mut builder = OpBuilder::new(module, InsertPoint::End(body));
        for launch in launches {
            if !builder.module().is_live(launch) {
                continue;
            }
            match rewrite_launch_func(&mut builder, launch, &devices, &ctx) {
                Ok(RewriteOutcome::Rewritten) => result.rewritten += 1,
                Ok(RewriteOutcome::Skipped) => result.skipped += 1,
                Err(diag) => {
                    warn!(%diag, "launch rewrite failed");
                    result.diagnostics.push(diag);
                    return result;
                }
            }
        }

        let placeholders: Vec<_> = module
            .walk()
            .into_iter()
            .filter(|op| module.op(*op).kind == OpKind::CompilationResult)
            .collect();

        // Placeholders are erased only once nothing reads them.
        for placeholder in &placeholders {
            let still_used = module
                .op(*placeholder)
                .results
                .iter()
                .any(|value| !module.users(*value).is_empty());
            if still_used {
                let diag = Diagnostic::op_error(
                    module,
                    *placeholder,
                    "compilation result still has uses after rewrite",
                )
                .with_code(codes::E0005);
                warn!(%diag, "placeholder left in place");
                result.diagnostics.push(diag);
            }
        }
        if result.failed() {
            return result;
        }
        for placeholder in &placeholders {
            module.erase_op(*placeholder);
        }

        debug!(
            pass = PASS_NAME,
            rewritten = result.rewritten,
            skipped = result.skipped,
            placeholders = placeholders.len(),
            "pass complete"
        );
        result
    }
}

impl Default for TpuRewritePass {
    fn default() -> Self {
        TpuRewritePass::new(RewriteOptions::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::parse_module;

    fn count(module: &Module, kind: OpKind) -> usize {
        module
            .walk()
            .into_iter()
            .filter(|op| module.op(*op).kind == kind)
            .count()
    }

    #[test]
    fn empty_module_is_a_no_op() {
        let mut m = parse_module(
            r#"
            func @main() {
              "std.return"() : () -> ()
            }
            "#,
        )
        .unwrap();
        let result = TpuRewritePass::default().run(&mut m);
        assert!(!result.failed());
        assert_eq!(result.rewritten, 0);
        assert_eq!(result.skipped, 0);
    }

    #[test]
    fn unmarked_launch_is_counted_as_skipped() {
        let mut m = parse_module(
            r#"
            func @main() {
              "tf_device.launch_func"() {func = @f} : () -> ()
              "std.return"() : () -> ()
            }
            func @f() {
              "std.return"() : () -> ()
            }
            "#,
        )
        .unwrap();
        let result = TpuRewritePass::default().run(&mut m);
        assert!(!result.failed());
        assert_eq!(result.skipped, 1);
        assert_eq!(count(&m, OpKind::LaunchFunc), 1);
    }

    #[test]
    fn malformed_device_list_fails_before_rewriting() {
        let mut m = parse_module(
            r#"
            module attributes {tf.devices = [1]} {
              func @main() {
                "std.return"() : () -> ()
              }
            }
            "#,
        )
        .unwrap();
        let result = TpuRewritePass::default().run(&mut m);
        assert!(result.failed());
        assert_eq!(
            result.diagnostics[0].message,
            "bad 'tf.devices' attribute at index 0, not a string"
        );
    }

    #[test]
    fn placeholders_survive_a_failed_run() {
        let mut m = parse_module(
            r#"
            module attributes {tf.versions = {}} {
              func @main() {
                %0 = "tf.TPUCompilationResult"() : () -> tensor<!tf.string>
                "tf_device.launch_func"() {_tpu_replicate = "c", func = @f, num_cores_per_replica = 1, step_marker_location = "", padding_map = [], input_sharding_configuration = [], output_sharding_configuration = []} : () -> ()
                "std.return"() : () -> ()
              }
              func @f() {
                "std.return"() : () -> ()
              }
            }
            "#,
        )
        .unwrap();
        // No devices at all: resolution fails.
        let result = TpuRewritePass::default().run(&mut m);
        assert!(result.failed());
        assert_eq!(count(&m, OpKind::CompilationResult), 1);
        assert!(result.diagnostics[0]
            .message
            .starts_with("error in fetching TPU compilation/execution devices: "));
    }
}

// pipeline.rs — Text-to-text driver around the rewrite pass
//
// Parses module text, imports it into the IR, runs the rewrite pass, and
// renders the requested artifact.
//
// Preconditions: none.
// Postconditions: `output` is set only when `has_error` is false.
// Failure modes: parse/import diagnostics, pass diagnostics.
// Side effects: calls `on_phase_complete` after each phase; `tracing` events.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::diag::{codes, Diagnostic};
use crate::import::parse_module;
use crate::ir::{Attribute, Module, OpKind};
use crate::metadata::CompileMetadata;
use crate::pass::TpuRewritePass;
use crate::printer::print_module;
use crate::rewrite::{RewriteOptions, METADATA_ATTR};

// ── Emit target ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitTarget {
    /// The rewritten module text.
    Ir,
    /// The compile metadata of every compile op, as a JSON array.
    Metadata,
    /// Provenance JSON; no pass is run.
    BuildInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Import,
    Rewrite,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Import => "import",
            Phase::Rewrite => "rewrite",
        }
    }
}

// ── Provenance ───────────────────────────────────────────────────────────

/// Identifies an input and the tool that processed it.
///
/// `source_hash`: SHA-256 of the raw module text.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    #[serde(serialize_with = "hex_bytes")]
    pub source_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Pretty JSON for `--emit build-info`.
    pub fn to_json(&self) -> String {
        match serde_json::to_string_pretty(self) {
            Ok(mut s) => {
                s.push('\n');
                s
            }
            Err(_) => String::new(),
        }
    }
}

fn hex_bytes<S: serde::Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&bytes_to_hex(bytes))
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&hasher.finalize());

    Provenance {
        source_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── State ────────────────────────────────────────────────────────────────

pub struct PipelineOutput {
    pub module: Option<Module>,
    pub output: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Provenance,
}

/// Collect and decode the metadata attribute of every compile op.
pub fn collect_metadata(module: &Module) -> Result<Vec<CompileMetadata>, Diagnostic> {
    module
        .walk()
        .into_iter()
        .filter(|op| module.op(*op).kind == OpKind::CompileMlir)
        .map(|op| {
            let text = module
                .op(op)
                .attr(METADATA_ATTR)
                .and_then(Attribute::as_str)
                .ok_or_else(|| Diagnostic::missing_attribute(METADATA_ATTR).at_op(module, op))?;
            CompileMetadata::from_json(text).map_err(|e| {
                Diagnostic::op_error(module, op, format!("unreadable compile metadata: {}", e))
                    .with_code(codes::E0002)
            })
        })
        .collect()
}

// ── Runner ───────────────────────────────────────────────────────────────

/// Run the full pipeline over `source`.
///
/// Per-phase sequence: execute → on_phase_complete → error check.
pub fn run_pipeline(
    source: &str,
    emit: EmitTarget,
    options: RewriteOptions,
    mut on_phase_complete: impl FnMut(Phase, Duration, &[Diagnostic]),
) -> PipelineOutput {
    let provenance = compute_provenance(source);
    let mut out = PipelineOutput {
        module: None,
        output: None,
        diagnostics: Vec::new(),
        has_error: false,
        provenance,
    };
    if emit == EmitTarget::BuildInfo {
        out.output = Some(out.provenance.to_json());
        return out;
    }

    let t = Instant::now();
    let imported = parse_module(source);
    let elapsed = t.elapsed();
    let mut module = match imported {
        Ok(module) => {
            on_phase_complete(Phase::Import, elapsed, &[]);
            module
        }
        Err(diags) => {
            on_phase_complete(Phase::Import, elapsed, &diags);
            out.has_error = diags.iter().any(Diagnostic::is_error);
            out.diagnostics = diags;
            return out;
        }
    };

    let t = Instant::now();
    let result = TpuRewritePass::new(options).run(&mut module);
    let elapsed = t.elapsed();
    on_phase_complete(Phase::Rewrite, elapsed, &result.diagnostics);
    info!(
        rewritten = result.rewritten,
        skipped = result.skipped,
        "rewrite finished"
    );
    out.has_error = result.failed();
    out.diagnostics = result.diagnostics;

    if !out.has_error {
        match emit {
            EmitTarget::Ir => out.output = Some(print_module(&module)),
            EmitTarget::Metadata => match collect_metadata(&module) {
                Ok(records) => match serde_json::to_string_pretty(&records) {
                    Ok(mut text) => {
                        text.push('\n');
                        out.output = Some(text);
                    }
                    Err(e) => {
                        out.diagnostics.push(
                            Diagnostic::error(format!("failed to serialize metadata: {}", e))
                                .with_code(codes::E0002),
                        );
                        out.has_error = true;
                    }
                },
                Err(diag) => {
                    out.diagnostics.push(diag);
                    out.has_error = true;
                }
            },
            EmitTarget::BuildInfo => {}
        }
    }
    out.module = Some(module);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        module attributes {tf.versions = {producer = 1}, tf.devices = ["/job:w/replica:0/task:0/device:TPU:0"]} {
          func @main(%arg0: tensor<?xi32>) {
            %0 = "tf_device.launch_func"(%arg0) {_tpu_replicate = "c", func = @f, num_cores_per_replica = 1, step_marker_location = "", padding_map = [], input_sharding_configuration = [""], output_sharding_configuration = [""]} : (tensor<?xi32>) -> tensor<?xi32>
            "std.return"(%0) : (tensor<?xi32>) -> ()
          }
          func @f(%a: tensor<?xi32>) {
            "std.return"(%a) : (tensor<?xi32>) -> ()
          }
        }
    "#;

    #[test]
    fn provenance_is_stable() {
        let a = compute_provenance(SOURCE);
        let b = compute_provenance(SOURCE);
        assert_eq!(a.source_hash, b.source_hash);
        assert_eq!(a.source_hash_hex().len(), 64);
        assert_ne!(a.source_hash, compute_provenance("x").source_hash);
    }

    #[test]
    fn build_info_skips_the_pass() {
        let out = run_pipeline("not even text", EmitTarget::BuildInfo, RewriteOptions::default(), |_, _, _| {});
        assert!(!out.has_error);
        let json: serde_json::Value = serde_json::from_str(out.output.as_deref().unwrap()).unwrap();
        assert_eq!(json["compiler_version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["source_hash"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn phases_are_reported_in_order() {
        let mut phases = Vec::new();
        let out = run_pipeline(SOURCE, EmitTarget::Ir, RewriteOptions::default(), |p, _, _| {
            phases.push(p)
        });
        assert!(!out.has_error, "{:?}", out.diagnostics);
        assert_eq!(phases, vec![Phase::Import, Phase::Rewrite]);
        assert!(out.output.unwrap().contains("tf.TPUExecute"));
    }

    #[test]
    fn metadata_emit_decodes_each_compile_op() {
        let out = run_pipeline(SOURCE, EmitTarget::Metadata, RewriteOptions::default(), |_, _, _| {});
        let records: Vec<CompileMetadata> =
            serde_json::from_str(out.output.as_deref().unwrap()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].num_replicas, 1);
        assert_eq!(records[0].args.len(), 1);
    }

    #[test]
    fn syntax_errors_stop_before_the_pass() {
        let mut phases = Vec::new();
        let out = run_pipeline("func @main(", EmitTarget::Ir, RewriteOptions::default(), |p, _, _| {
            phases.push(p)
        });
        assert!(out.has_error);
        assert_eq!(phases, vec![Phase::Import]);
        assert_eq!(out.diagnostics[0].code, Some(codes::E0100));
    }
}

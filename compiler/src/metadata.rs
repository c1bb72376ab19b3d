// metadata.rs — Compile-metadata record and its construction from a launch op
//
// Validates the launch op's attributes and assembles the `CompileMetadata`
// record that accompanies every compile request: replica/core counts, step
// marker placement, padding maps, an optional device assignment, and one
// entry per argument and per result.
//
// Preconditions: `launch` is a live op of `module`.
// Postconditions: on success `args.len()` equals the operand count and
//                 `retvals.len()` equals the result count.
// Failure modes: missing or malformed attributes, operand types with no
//                runtime data type → op-anchored `Diagnostic` (first failure
//                wins, checks run in field order).
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diag::{codes, Diagnostic};
use crate::ir::{Attribute, Module, OpId};
use crate::types::{DataType, Type};

pub const STEP_MARKER_LOCATION_ATTR: &str = "step_marker_location";
pub const PADDING_MAP_ATTR: &str = "padding_map";
pub const INPUT_SHARDING_ATTR: &str = "input_sharding_configuration";
pub const OUTPUT_SHARDING_ATTR: &str = "output_sharding_configuration";

// ── Record types ─────────────────────────────────────────────────────────

/// Where the runtime places its step marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StepMarkerLocation {
    #[default]
    #[serde(rename = "STEP_MARK_AT_ENTRY")]
    AtEntry,
    #[serde(rename = "STEP_MARK_AT_TOP_LEVEL_WHILE_LOOP")]
    AtTopLevelWhileLoop,
    #[serde(rename = "STEP_MARK_AT_SECOND_LEVEL_WHILE_LOOP")]
    AtSecondLevelWhileLoop,
    #[serde(rename = "STEP_MARK_NONE")]
    None,
}

impl StepMarkerLocation {
    pub fn from_name(name: &str) -> Option<Self> {
        let location = match name {
            "STEP_MARK_AT_ENTRY" => StepMarkerLocation::AtEntry,
            "STEP_MARK_AT_TOP_LEVEL_WHILE_LOOP" => StepMarkerLocation::AtTopLevelWhileLoop,
            "STEP_MARK_AT_SECOND_LEVEL_WHILE_LOOP" => StepMarkerLocation::AtSecondLevelWhileLoop,
            "STEP_MARK_NONE" => StepMarkerLocation::None,
            _ => return None,
        };
        Some(location)
    }
}

/// Links a dynamic dimension of one argument to the argument that carries
/// its real size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaddingMap {
    pub arg_index: i32,
    pub shape_index: i32,
    pub padding_arg_index: i32,
}

/// Explicit replica × computation → device id table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAssignmentProto {
    pub replica_count: i32,
    pub computation_count: i32,
    pub computation_devices: Vec<ComputationDevice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationDevice {
    pub replica_device_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgKind {
    #[serde(rename = "PARAMETER")]
    Parameter,
    #[serde(rename = "VARIABLE")]
    Variable,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Static shape of an argument. Dynamic dimensions are `-1`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TensorShape {
    pub dims: Vec<i64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unknown_rank: bool,
}

impl TensorShape {
    pub fn unknown() -> Self {
        TensorShape {
            dims: Vec::new(),
            unknown_rank: true,
        }
    }

    pub fn from_type(ty: &Type) -> Self {
        match ty {
            Type::Tensor(t) => match &t.shape {
                Some(dims) => TensorShape {
                    dims: dims.clone(),
                    unknown_rank: false,
                },
                None => TensorShape::unknown(),
            },
            Type::Element(_) => TensorShape::default(),
            Type::Opaque(_) => TensorShape::unknown(),
        }
    }

    pub fn is_fully_defined(&self) -> bool {
        !self.unknown_rank && self.dims.iter().all(|d| *d >= 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgMetadata {
    pub dtype: DataType,
    pub kind: ArgKind,
    pub shape: TensorShape,
    pub sharding: OpSharding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetvalMetadata {
    pub sharding: OpSharding,
}

/// Everything the compiler needs besides the program text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileMetadata {
    pub num_replicas: usize,
    pub num_cores_per_replica: usize,
    pub step_marker_location: StepMarkerLocation,
    pub padding_maps: Vec<PaddingMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_assignment: Option<DeviceAssignmentProto>,
    pub args: Vec<ArgMetadata>,
    pub retvals: Vec<RetvalMetadata>,
}

impl CompileMetadata {
    /// Serialize for the compile op: compact by default, indented in debug mode.
    pub fn to_json(&self, debug: bool) -> Result<String, serde_json::Error> {
        if debug {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ── Sharding ─────────────────────────────────────────────────────────────

/// How a value is split across logical cores.
///
/// Written in HLO text form: `{replicated}`, `{maximal device=1}`,
/// `{manual}`, `{devices=[2,1]0,1}`. The empty string is the default
/// (replicated) sharding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpSharding {
    Replicated,
    Maximal {
        device: i64,
    },
    Manual,
    Other {
        tile_assignment_dimensions: Vec<i64>,
        tile_assignment_devices: Vec<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShardingParseError {
    #[error("sharding must be enclosed in braces")]
    Unbraced,
    #[error("unknown sharding kind '{0}'")]
    UnknownKind(String),
    #[error("malformed integer '{0}' in sharding")]
    BadNumber(String),
    #[error("tile shape covers {expected} devices but {actual} were listed")]
    TileMismatch { expected: i64, actual: usize },
}

fn parse_int(text: &str) -> Result<i64, ShardingParseError> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| ShardingParseError::BadNumber(text.trim().to_string()))
}

fn parse_int_list(text: &str) -> Result<Vec<i64>, ShardingParseError> {
    text.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(parse_int)
        .collect()
}

impl OpSharding {
    pub fn parse(text: &str) -> Result<OpSharding, ShardingParseError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(OpSharding::Replicated);
        }
        let inner = text
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or(ShardingParseError::Unbraced)?
            .trim();

        if inner == "replicated" {
            return Ok(OpSharding::Replicated);
        }
        if inner == "manual" {
            return Ok(OpSharding::Manual);
        }
        if let Some(rest) = inner.strip_prefix("maximal") {
            let device = rest
                .trim()
                .strip_prefix("device=")
                .ok_or_else(|| ShardingParseError::UnknownKind(inner.to_string()))?;
            return Ok(OpSharding::Maximal {
                device: parse_int(device)?,
            });
        }
        if let Some(rest) = inner.strip_prefix("devices=[") {
            let (dims, devices) = rest
                .split_once(']')
                .ok_or_else(|| ShardingParseError::UnknownKind(inner.to_string()))?;
            let dims = parse_int_list(dims)?;
            let devices = parse_int_list(devices)?;
            let expected: i64 = dims.iter().product();
            if dims.is_empty() || expected != devices.len() as i64 {
                return Err(ShardingParseError::TileMismatch {
                    expected,
                    actual: devices.len(),
                });
            }
            return Ok(OpSharding::Other {
                tile_assignment_dimensions: dims,
                tile_assignment_devices: devices,
            });
        }
        let kind = inner.split_whitespace().next().unwrap_or(inner);
        Err(ShardingParseError::UnknownKind(kind.to_string()))
    }
}

fn join(values: &[i64]) -> String {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Display for OpSharding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpSharding::Replicated => write!(f, "{{replicated}}"),
            OpSharding::Maximal { device } => write!(f, "{{maximal device={}}}", device),
            OpSharding::Manual => write!(f, "{{manual}}"),
            OpSharding::Other {
                tile_assignment_dimensions,
                tile_assignment_devices,
            } => write!(
                f,
                "{{devices=[{}]{}}}",
                join(tile_assignment_dimensions),
                join(tile_assignment_devices)
            ),
        }
    }
}

// ── Construction from a launch op ────────────────────────────────────────

/// Build the compile metadata for `launch`.
///
/// Checks run in field order: step marker, padding maps, arguments, results.
pub fn build_metadata(
    module: &Module,
    launch: OpId,
    num_replicas: usize,
    num_cores_per_replica: usize,
    device_assignment: Option<&DeviceAssignmentProto>,
) -> Result<CompileMetadata, Diagnostic> {
    let step_marker_location =
        step_marker_location(module, launch).map_err(|d| d.at_op(module, launch))?;
    let padding_maps = padding_maps(module, launch).map_err(|d| d.at_op(module, launch))?;
    let args = arg_metadata(module, launch).map_err(|d| d.at_op(module, launch))?;
    let retvals = retval_metadata(module, launch).map_err(|d| d.at_op(module, launch))?;

    Ok(CompileMetadata {
        num_replicas,
        num_cores_per_replica,
        step_marker_location,
        padding_maps,
        device_assignment: device_assignment.cloned(),
        args,
        retvals,
    })
}

fn step_marker_location(module: &Module, launch: OpId) -> Result<StepMarkerLocation, Diagnostic> {
    let value = module
        .op(launch)
        .attr(STEP_MARKER_LOCATION_ATTR)
        .and_then(Attribute::as_str)
        .ok_or_else(|| Diagnostic::missing_attribute(STEP_MARKER_LOCATION_ATTR))?;
    if value.is_empty() {
        return Ok(StepMarkerLocation::AtEntry);
    }
    StepMarkerLocation::from_name(value).ok_or_else(|| {
        Diagnostic::error(format!(
            "bad '{}' attribute with value '{}'",
            STEP_MARKER_LOCATION_ATTR, value
        ))
        .with_code(codes::E0002)
    })
}

fn string_array<'m>(module: &'m Module, op: OpId, name: &str) -> Result<&'m [Attribute], Diagnostic> {
    module
        .op(op)
        .attr(name)
        .and_then(Attribute::as_array)
        .ok_or_else(|| Diagnostic::missing_attribute(name))
}

fn padding_maps(module: &Module, launch: OpId) -> Result<Vec<PaddingMap>, Diagnostic> {
    let entries = string_array(module, launch, PADDING_MAP_ATTR)?;
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let text = entry
                .as_str()
                .ok_or_else(|| Diagnostic::attribute_not_a_string(PADDING_MAP_ATTR, index))?;
            serde_json::from_str::<PaddingMap>(text).map_err(|_| {
                Diagnostic::attribute_parse_failure(PADDING_MAP_ATTR, index, text, "tpu::PaddingMap")
            })
        })
        .collect()
}

fn parse_sharding(attr: &Attribute, name: &str, index: usize) -> Result<OpSharding, Diagnostic> {
    let text = attr
        .as_str()
        .ok_or_else(|| Diagnostic::attribute_not_a_string(name, index))?;
    OpSharding::parse(text)
        .map_err(|_| Diagnostic::attribute_parse_failure(name, index, text, "xla::OpSharding"))
}

fn arg_metadata(module: &Module, launch: OpId) -> Result<Vec<ArgMetadata>, Diagnostic> {
    let op = module.op(launch);
    let shardings = string_array(module, launch, INPUT_SHARDING_ATTR)?;
    if shardings.len() != op.operands.len() {
        return Err(Diagnostic::attribute_size_mismatch(
            INPUT_SHARDING_ATTR,
            op.operands.len(),
            shardings.len(),
        ));
    }

    let mut args = Vec::with_capacity(op.operands.len());
    for (index, operand) in op.operands.iter().enumerate() {
        let ty = module.value_type(*operand);
        let dtype = DataType::try_from(ty).map_err(|e| {
            Diagnostic::error(format!(
                "failed to determine operand type at index {}: {}",
                index, e
            ))
            .with_code(codes::E0003)
        })?;
        let kind = if dtype == DataType::Resource {
            ArgKind::Variable
        } else {
            ArgKind::Parameter
        };
        let sharding = parse_sharding(&shardings[index], INPUT_SHARDING_ATTR, index)?;
        args.push(ArgMetadata {
            dtype,
            kind,
            shape: TensorShape::from_type(ty),
            sharding,
        });
    }
    Ok(args)
}

fn retval_metadata(module: &Module, launch: OpId) -> Result<Vec<RetvalMetadata>, Diagnostic> {
    let op = module.op(launch);
    let shardings = string_array(module, launch, OUTPUT_SHARDING_ATTR)?;
    if shardings.len() != op.results.len() {
        return Err(Diagnostic::attribute_size_mismatch(
            OUTPUT_SHARDING_ATTR,
            op.results.len(),
            shardings.len(),
        ));
    }
    shardings
        .iter()
        .enumerate()
        .map(|(index, attr)| {
            Ok(RetvalMetadata {
                sharding: parse_sharding(attr, OUTPUT_SHARDING_ATTR, index)?,
            })
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────

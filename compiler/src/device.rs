// device.rs — Device names, device discovery, and compile/execute placement
//
// Parses fully qualified device names, reads the devices a module may run on
// from its `tf.devices` attribute, and maps (replica, logical core) pairs to
// physical devices through the `DeviceResolver` seam.
//
// Preconditions: none.
// Postconditions: a successful resolution has `num_replicas` execution
//                 device lists of `num_cores_per_replica` names each.
// Failure modes: malformed `tf.devices` entries → `Diagnostic`; too few
//                accelerator devices or unsupported options → `DeviceError`.
// Side effects: none.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::diag::{codes, Diagnostic};
use crate::ir::{Attribute, Module};
use crate::metadata::DeviceAssignmentProto;

/// Module attribute listing the devices available to the program.
pub const DEVICES_ATTR: &str = "tf.devices";

pub const TPU_DEVICE: &str = "TPU";
pub const CPU_DEVICE: &str = "CPU";

/// Virtual device name standing for logical core `core` of every replica.
pub fn device_alias_for_logical_core(core: usize) -> String {
    format!("TPU_REPLICATED_CORE_{}", core)
}

// ── Device names ─────────────────────────────────────────────────────────

/// `/job:<job>/replica:<r>/task:<t>/device:<TYPE>:<id>`
///
/// Field order gives the sort order used when assigning devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParsedDeviceName {
    pub job: String,
    pub replica: u32,
    pub task: u32,
    pub device_type: String,
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed device name '{0}'")]
pub struct DeviceNameError(pub String);

impl FromStr for ParsedDeviceName {
    type Err = DeviceNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || DeviceNameError(s.to_string());
        let rest = s.strip_prefix('/').ok_or_else(err)?;
        let mut parts = rest.split('/');

        let mut field = |prefix: &str| {
            parts
                .next()
                .and_then(|p| p.strip_prefix(prefix))
                .filter(|v| !v.is_empty())
                .ok_or_else(err)
        };
        let job = field("job:")?.to_string();
        let replica: u32 = field("replica:")?.parse().map_err(|_| err())?;
        let task: u32 = field("task:")?.parse().map_err(|_| err())?;
        let device = field("device:")?;
        let (device_type, id) = device.rsplit_once(':').ok_or_else(err)?;
        let id: u32 = id.parse().map_err(|_| err())?;
        if device_type.is_empty() || parts.next().is_some() {
            return Err(err());
        }

        Ok(ParsedDeviceName {
            job,
            replica,
            task,
            device_type: device_type.to_string(),
            id,
        })
    }
}

impl fmt::Display for ParsedDeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/job:{}/replica:{}/task:{}/device:{}:{}",
            self.job, self.replica, self.task, self.device_type, self.id
        )
    }
}

impl ParsedDeviceName {
    /// Device `device_type:id` on the same host.
    pub fn on_same_host(&self, device_type: &str, id: u32) -> ParsedDeviceName {
        ParsedDeviceName {
            device_type: device_type.to_string(),
            id,
            ..self.clone()
        }
    }
}

/// Read the optional `tf.devices` string array from the module.
///
/// A missing attribute means no devices are known.
pub fn devices_from_module(module: &Module) -> Result<Vec<ParsedDeviceName>, Diagnostic> {
    let Some(attr) = module.attrs.get(DEVICES_ATTR) else {
        return Ok(Vec::new());
    };
    let entries = attr.as_array().ok_or_else(|| {
        Diagnostic::error(format!("bad '{}' attribute, not an array", DEVICES_ATTR))
            .with_code(codes::E0002)
    })?;
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let name = entry
                .as_str()
                .ok_or_else(|| Diagnostic::attribute_not_a_string(DEVICES_ATTR, index))?;
            name.parse().map_err(|_| {
                Diagnostic::attribute_parse_failure(
                    DEVICES_ATTR,
                    index,
                    name,
                    "DeviceNameUtils::ParsedName",
                )
            })
        })
        .collect()
}

/// Store `devices` as the module's `tf.devices` attribute.
pub fn set_module_devices(module: &mut Module, devices: &[ParsedDeviceName]) {
    let names: Vec<String> = devices.iter().map(ToString::to_string).collect();
    module
        .attrs
        .insert(DEVICES_ATTR.to_string(), Attribute::str_array(&names));
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Where to compile and where each (replica, core) executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpuDeviceAssignment {
    pub compilation_device: String,
    /// Outer index is the replica, inner index the logical core.
    pub execution_devices: Vec<Vec<String>>,
    pub xla_device_assignment: Option<DeviceAssignmentProto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("replica count ({num_replicas}) and cores per replica ({num_cores_per_replica}) must be positive")]
    InvalidCount {
        num_replicas: usize,
        num_cores_per_replica: usize,
    },
    #[error("replica count ({num_replicas}) times cores per replica ({num_cores_per_replica}) overflows")]
    CountOverflow {
        num_replicas: usize,
        num_cores_per_replica: usize,
    },
    #[error("no TPU devices found")]
    NoTpuDevices,
    #[error("requires {required} TPU devices for {num_replicas} replica(s) with {num_cores_per_replica} core(s) each, but only {available} are available")]
    NotEnoughDevices {
        required: usize,
        available: usize,
        num_replicas: usize,
        num_cores_per_replica: usize,
    },
    #[error("device topology is not supported")]
    TopologyUnsupported,
    #[error("explicit device assignment is not supported")]
    DeviceAssignmentUnsupported,
    #[error("{0}")]
    Other(String),
}

/// Maps logical replicas and cores onto physical devices.
pub trait DeviceResolver {
    fn resolve(
        &self,
        devices: &[ParsedDeviceName],
        num_replicas: usize,
        num_cores_per_replica: usize,
        topology: &str,
        device_assignment: &[i64],
    ) -> Result<TpuDeviceAssignment, DeviceError>;
}

/// Assigns accelerator devices in sorted order without a topology.
///
/// Replica `r`, core `c` runs on the `r * cores + c`-th accelerator device;
/// compilation happens on CPU:0 of the first accelerator's host.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDeviceResolver;

impl DeviceResolver for DefaultDeviceResolver {
    fn resolve(
        &self,
        devices: &[ParsedDeviceName],
        num_replicas: usize,
        num_cores_per_replica: usize,
        topology: &str,
        device_assignment: &[i64],
    ) -> Result<TpuDeviceAssignment, DeviceError> {
        if !topology.is_empty() {
            return Err(DeviceError::TopologyUnsupported);
        }
        if !device_assignment.is_empty() {
            return Err(DeviceError::DeviceAssignmentUnsupported);
        }
        if num_replicas == 0 || num_cores_per_replica == 0 {
            return Err(DeviceError::InvalidCount {
                num_replicas,
                num_cores_per_replica,
            });
        }

        let mut tpus: Vec<&ParsedDeviceName> = devices
            .iter()
            .filter(|d| d.device_type == TPU_DEVICE)
            .collect();
        tpus.sort();
        let Some(first) = tpus.first() else {
            return Err(DeviceError::NoTpuDevices);
        };

        let required = num_replicas.checked_mul(num_cores_per_replica).ok_or(
            DeviceError::CountOverflow {
                num_replicas,
                num_cores_per_replica,
            },
        )?;
        if tpus.len() < required {
            return Err(DeviceError::NotEnoughDevices {
                required,
                available: tpus.len(),
                num_replicas,
                num_cores_per_replica,
            });
        }

        let compilation_device = first.on_same_host(CPU_DEVICE, 0).to_string();
        let execution_devices = (0..num_replicas)
            .map(|replica| {
                (0..num_cores_per_replica)
                    .map(|core| tpus[replica * num_cores_per_replica + core].to_string())
                    .collect()
            })
            .collect();

        Ok(TpuDeviceAssignment {
            compilation_device,
            execution_devices,
            xla_device_assignment: None,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> ParsedDeviceName {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        let d = name("/job:worker/replica:0/task:1/device:TPU:3");
        assert_eq!(d.job, "worker");
        assert_eq!(d.task, 1);
        assert_eq!(d.device_type, "TPU");
        assert_eq!(d.id, 3);
        assert_eq!(d.to_string(), "/job:worker/replica:0/task:1/device:TPU:3");
        assert_eq!(
            d.on_same_host(CPU_DEVICE, 0).to_string(),
            "/job:worker/replica:0/task:1/device:CPU:0"
        );
    }

    #[test]
    fn parse_rejects_malformed_names() {
        for bad in [
            "",
            "job:w/replica:0/task:0/device:TPU:0",
            "/job:w/replica:x/task:0/device:TPU:0",
            "/job:w/replica:0/task:0/device:TPU",
            "/job:w/replica:0/task:0/device:TPU:0/extra",
        ] {
            assert!(bad.parse::<ParsedDeviceName>().is_err(), "{bad}");
        }
    }

    #[test]
    fn default_resolver_orders_devices() {
        let devices = vec![
            name("/job:w/replica:0/task:0/device:TPU:1"),
            name("/job:w/replica:0/task:0/device:CPU:0"),
            name("/job:w/replica:0/task:1/device:TPU:0"),
            name("/job:w/replica:0/task:0/device:TPU:0"),
            name("/job:w/replica:0/task:1/device:TPU:1"),
        ];
        let assignment = DefaultDeviceResolver
            .resolve(&devices, 2, 2, "", &[])
            .unwrap();
        assert_eq!(
            assignment.compilation_device,
            "/job:w/replica:0/task:0/device:CPU:0"
        );
        assert_eq!(
            assignment.execution_devices,
            vec![
                vec![
                    "/job:w/replica:0/task:0/device:TPU:0".to_string(),
                    "/job:w/replica:0/task:0/device:TPU:1".to_string(),
                ],
                vec![
                    "/job:w/replica:0/task:1/device:TPU:0".to_string(),
                    "/job:w/replica:0/task:1/device:TPU:1".to_string(),
                ],
            ]
        );
        assert_eq!(assignment.xla_device_assignment, None);
    }

    #[test]
    fn default_resolver_failures() {
        let one_tpu = vec![name("/job:w/replica:0/task:0/device:TPU:0")];
        let r = DefaultDeviceResolver;
        assert_eq!(r.resolve(&[], 1, 1, "", &[]), Err(DeviceError::NoTpuDevices));
        assert_eq!(
            r.resolve(&one_tpu, 2, 1, "", &[]).unwrap_err().to_string(),
            "requires 2 TPU devices for 2 replica(s) with 1 core(s) each, but only 1 are available"
        );
        assert_eq!(
            r.resolve(&one_tpu, 1, 1, "topo", &[]),
            Err(DeviceError::TopologyUnsupported)
        );
        assert_eq!(
            r.resolve(&one_tpu, 1, 1, "", &[0]),
            Err(DeviceError::DeviceAssignmentUnsupported)
        );
    }

    #[test]
    fn default_resolver_rejects_overflowing_counts() {
        let one_tpu = vec![name("/job:w/replica:0/task:0/device:TPU:0")];
        assert_eq!(
            DefaultDeviceResolver.resolve(&one_tpu, usize::MAX / 2 + 1, 4, "", &[]),
            Err(DeviceError::CountOverflow {
                num_replicas: usize::MAX / 2 + 1,
                num_cores_per_replica: 4,
            })
        );
    }

    #[test]
    fn module_devices_round_trip() {
        let mut m = Module::new();
        assert_eq!(devices_from_module(&m).unwrap(), Vec::new());

        let devices = vec![name("/job:w/replica:0/task:0/device:TPU:0")];
        set_module_devices(&mut m, &devices);
        assert_eq!(devices_from_module(&m).unwrap(), devices);
    }

    #[test]
    fn module_devices_errors() {
        let mut m = Module::new();
        m.attrs.insert(
            DEVICES_ATTR.to_string(),
            Attribute::Array(vec![Attribute::Int(1)]),
        );
        assert_eq!(
            devices_from_module(&m).unwrap_err().message,
            "bad 'tf.devices' attribute at index 0, not a string"
        );

        m.attrs
            .insert(DEVICES_ATTR.to_string(), Attribute::str_array(&["/cpu"]));
        assert_eq!(
            devices_from_module(&m).unwrap_err().message,
            "bad 'tf.devices' attribute at index 0 with value '/cpu': failed to parse to DeviceNameUtils::ParsedName"
        );

        m.attrs
            .insert(DEVICES_ATTR.to_string(), Attribute::str("/cpu"));
        let diag = devices_from_module(&m).unwrap_err();
        assert_eq!(diag.message, "bad 'tf.devices' attribute, not an array");
        assert_eq!(diag.code, Some(codes::E0002));
    }
}

//! Runtime capability probing for local inference.
//!
//! The verdict is computed once per session from [`RuntimeHints`] and never
//! mutated afterwards. GPU compute only selects the execution device; it does
//! not gate compatibility on its own.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Minimum approximate device memory for running local models.
pub const DEFAULT_MIN_MEMORY_GB: f64 = 4.0;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Hints exposed by the hosting runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeHints {
    /// Approximate device memory in GB. `None` when the runtime does not say.
    pub device_memory_gb: Option<f64>,
    pub gpu_compute: bool,
    pub shared_memory: bool,
    pub wasm_runtime: bool,
}

impl RuntimeHints {
    /// Read hints from the current host.
    ///
    /// Native hosts always have threads with shared memory and a portable CPU
    /// backend; accelerator presence cannot be discovered without the
    /// inference runtime, so the caller passes it in.
    pub fn detect(gpu_compute: bool) -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let total = sys.total_memory();

        Self {
            device_memory_gb: (total > 0).then(|| total as f64 / BYTES_PER_GB),
            gpu_compute,
            shared_memory: true,
            wasm_runtime: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeThresholds {
    pub min_memory_gb: f64,
}

impl Default for ProbeThresholds {
    fn default() -> Self {
        Self {
            min_memory_gb: DEFAULT_MIN_MEMORY_GB,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionDevice {
    Accelerated,
    Wasm,
}

impl ExecutionDevice {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accelerated => "accelerated",
            Self::Wasm => "wasm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityResult {
    pub supports_compute: bool,
    pub supports_shared_memory: bool,
    #[serde(rename = "supportsWASM")]
    pub supports_wasm: bool,
    pub has_sufficient_memory: bool,
    #[serde(rename = "approximateMemoryGB")]
    pub approximate_memory_gb: f64,
    pub compatible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CapabilityResult {
    pub fn preferred_device(&self) -> ExecutionDevice {
        if self.supports_compute {
            ExecutionDevice::Accelerated
        } else {
            ExecutionDevice::Wasm
        }
    }
}

/// Produce the compatibility verdict for the given hints.
pub fn probe(hints: &RuntimeHints, thresholds: &ProbeThresholds) -> CapabilityResult {
    let approximate_memory_gb = hints.device_memory_gb.unwrap_or(0.0).max(0.0);
    let has_sufficient_memory = approximate_memory_gb >= thresholds.min_memory_gb;

    let reason = if !has_sufficient_memory {
        Some(format!(
            "Insufficient memory: {approximate_memory_gb:.1}GB available, {:.1}GB required",
            thresholds.min_memory_gb
        ))
    } else if !hints.shared_memory {
        Some("Shared memory primitives are unavailable".to_string())
    } else if !hints.wasm_runtime {
        Some("WebAssembly runtime is unavailable".to_string())
    } else {
        None
    };

    let result = CapabilityResult {
        supports_compute: hints.gpu_compute,
        supports_shared_memory: hints.shared_memory,
        supports_wasm: hints.wasm_runtime,
        has_sufficient_memory,
        approximate_memory_gb,
        compatible: reason.is_none(),
        reason,
    };

    info!(
        memory_gb = approximate_memory_gb,
        gpu = hints.gpu_compute,
        compatible = result.compatible,
        "Probed local inference capability"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capable_hints() -> RuntimeHints {
        RuntimeHints {
            device_memory_gb: Some(8.0),
            gpu_compute: false,
            shared_memory: true,
            wasm_runtime: true,
        }
    }

    #[test]
    fn capable_runtime_is_compatible_without_gpu() {
        let result = probe(&capable_hints(), &ProbeThresholds::default());

        assert!(result.compatible);
        assert!(result.reason.is_none());
        assert_eq!(result.preferred_device(), ExecutionDevice::Wasm);
    }

    #[test]
    fn gpu_selects_accelerated_device() {
        let hints = RuntimeHints {
            gpu_compute: true,
            ..capable_hints()
        };
        let result = probe(&hints, &ProbeThresholds::default());

        assert!(result.compatible);
        assert_eq!(result.preferred_device(), ExecutionDevice::Accelerated);
    }

    #[test]
    fn insufficient_memory_is_incompatible_with_reason() {
        for memory in [None, Some(0.5), Some(2.0), Some(3.99)] {
            let hints = RuntimeHints {
                device_memory_gb: memory,
                ..capable_hints()
            };
            let result = probe(&hints, &ProbeThresholds::default());

            assert!(!result.compatible);
            assert!(!result.has_sufficient_memory);
            let reason = result.reason.expect("reason should be set");
            assert!(!reason.is_empty());
            assert!(reason.contains("memory"));
        }
    }

    #[test]
    fn missing_shared_memory_or_wasm_is_reported() {
        let no_shared = RuntimeHints {
            shared_memory: false,
            ..capable_hints()
        };
        let result = probe(&no_shared, &ProbeThresholds::default());
        assert!(!result.compatible);
        assert!(result.reason.unwrap().contains("Shared memory"));

        let no_wasm = RuntimeHints {
            wasm_runtime: false,
            ..capable_hints()
        };
        let result = probe(&no_wasm, &ProbeThresholds::default());
        assert!(!result.compatible);
        assert!(result.reason.unwrap().contains("WebAssembly"));
    }

    #[test]
    fn serializes_with_wire_names() {
        let result = probe(&capable_hints(), &ProbeThresholds::default());
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["supportsWASM"], true);
        assert_eq!(json["approximateMemoryGB"], 8.0);
        assert!(json.get("reason").is_none());
    }
}

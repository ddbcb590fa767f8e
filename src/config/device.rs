use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Compute backend a device string resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Pure Rust CPU backend.
    NdArray,
    /// WebGPU (Vulkan/Metal/DX12, auto-detected).
    Wgpu,
    /// Candle on CUDA.
    CandleCuda,
    /// Candle on Metal.
    CandleMetal,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::NdArray => write!(f, "ndarray"),
            BackendKind::Wgpu => write!(f, "wgpu"),
            BackendKind::CandleCuda => write!(f, "candle-cuda"),
            BackendKind::CandleMetal => write!(f, "candle-metal"),
        }
    }
}

/// Parsed form of the `device` config string.
///
/// Accepts `cpu`, `ndarray`, `wgpu`, `gpu`, `cuda`, `cuda:N`, `mps`, `metal`
/// and `metal:N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    pub backend: BackendKind,
    pub index: usize,
}

impl DeviceSpec {
    pub fn cpu() -> Self {
        DeviceSpec {
            backend: BackendKind::NdArray,
            index: 0,
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        let (name, index) = match lowered.split_once(':') {
            Some((name, idx)) => {
                let index = idx
                    .parse::<usize>()
                    .map_err(|_| Error::invalid("device", format!("bad device index in `{s}`")))?;
                (name.to_string(), index)
            }
            None => (lowered.clone(), 0),
        };

        let backend = match name.as_str() {
            "cpu" | "ndarray" => BackendKind::NdArray,
            "wgpu" | "gpu" => BackendKind::Wgpu,
            "cuda" => BackendKind::CandleCuda,
            "mps" | "metal" => BackendKind::CandleMetal,
            _ => return Err(Error::invalid("device", format!("unknown device `{s}`"))),
        };

        Ok(DeviceSpec { backend, index })
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.backend {
            BackendKind::NdArray | BackendKind::Wgpu => write!(f, "{}", self.backend),
            _ => write!(f, "{}:{}", self.backend, self.index),
        }
    }
}

/// Floating point precision used for model compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Precision {
    #[default]
    #[serde(rename = "float32", alias = "f32", alias = "fp32")]
    F32,
    #[serde(rename = "float16", alias = "f16", alias = "fp16", alias = "half")]
    F16,
    #[serde(rename = "bfloat16", alias = "bf16")]
    BF16,
}

impl Precision {
    pub fn bytes_per_param(&self) -> usize {
        match self {
            Precision::F32 => 4,
            Precision::F16 | Precision::BF16 => 2,
        }
    }

    /// Compute precision after applying the mixed-precision flag: a float32
    /// run with mixed precision computes in float16.
    pub fn effective(self, mixed_precision: bool) -> Precision {
        match (self, mixed_precision) {
            (Precision::F32, true) => Precision::F16,
            (p, _) => p,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::F32 => write!(f, "float32"),
            Precision::F16 => write!(f, "float16"),
            Precision::BF16 => write!(f, "bfloat16"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_strings() {
        assert_eq!("cpu".parse::<DeviceSpec>().unwrap(), DeviceSpec::cpu());
        assert_eq!(
            "CUDA:1".parse::<DeviceSpec>().unwrap(),
            DeviceSpec {
                backend: BackendKind::CandleCuda,
                index: 1
            }
        );
        assert_eq!(
            "mps".parse::<DeviceSpec>().unwrap().backend,
            BackendKind::CandleMetal
        );
        assert_eq!("gpu".parse::<DeviceSpec>().unwrap().backend, BackendKind::Wgpu);
    }

    #[test]
    fn rejects_unknown_devices() {
        assert!("tpu".parse::<DeviceSpec>().is_err());
        assert!("cuda:x".parse::<DeviceSpec>().is_err());
    }

    #[test]
    fn mixed_precision_halves_float32_only() {
        assert_eq!(Precision::F32.effective(true), Precision::F16);
        assert_eq!(Precision::F32.effective(false), Precision::F32);
        assert_eq!(Precision::BF16.effective(true), Precision::BF16);
    }
}

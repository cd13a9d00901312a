//! Compute device selection
//!
//! Chosen once at startup and shared by every backend. A CUDA device enables
//! half-precision inference; the CPU path always runs full precision.

use crate::config::DevicePreference;
use std::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    /// Resolve the configured preference into a concrete device
    pub fn detect(preference: DevicePreference) -> Self {
        let device = match preference {
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Device::Cuda,
            DevicePreference::Auto => {
                let masked = std::env::var("CUDA_VISIBLE_DEVICES").ok();
                if cuda_masked(masked.as_deref()) {
                    Device::Cpu
                } else if has_nvidia_gpu() {
                    Device::Cuda
                } else {
                    Device::Cpu
                }
            }
        };

        match device {
            Device::Cuda => info!("🚀 GPU detected, using half-precision inference"),
            Device::Cpu => warn!("⚠️ No GPU found, running full-precision CPU inference (slower)"),
        }
        device
    }

    pub fn is_accelerated(&self) -> bool {
        matches!(self, Device::Cuda)
    }

    /// CUDA always runs fp16
    pub fn half_precision(&self) -> bool {
        self.is_accelerated()
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Device::Cuda => "CUDA (fp16)",
            Device::Cpu => "CPU (fp32)",
        }
    }
}

/// An empty or negative `CUDA_VISIBLE_DEVICES` hides every GPU
fn cuda_masked(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        Some("") => true,
        Some(v) => v.starts_with('-'),
        None => false,
    }
}

fn has_nvidia_gpu() -> bool {
    Command::new("nvidia-smi")
        .arg("-L")
        .output()
        .map(|out| out.status.success() && String::from_utf8_lossy(&out.stdout).contains("GPU"))
        .unwrap_or(false)
}

//! Tensor re-exports, named parameter state and device selection.
//!
//! Numerics run on `candle`. Image-like data is laid out `[batch, channels,
//! height, width]`.

use std::collections::BTreeMap;
use std::fmt;

pub use candle_core::{DType, Tensor};

use crate::error::ModelResult;

/// Named parameter state of one network, ordered by key.
pub type StateDict = BTreeMap<String, Tensor>;

/// Host copy of a [`StateDict`]: shape and flat `f32` values per key.
pub type HostState = BTreeMap<String, (Vec<usize>, Vec<f32>)>;

/// Shape and flat `f32` values of `tensor`, copied to the host.
pub fn host_values(tensor: &Tensor) -> ModelResult<(Vec<usize>, Vec<f32>)> {
    let values = tensor
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok((tensor.dims().to_vec(), values))
}

pub fn to_host(state: &StateDict) -> ModelResult<HostState> {
    state
        .iter()
        .map(|(key, tensor)| Ok((key.clone(), host_values(tensor)?)))
        .collect()
}

/// Compute device a model targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

/// Tensor kind selected for a device, the precision/placement pair the
/// numeric backend allocates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorKind {
    Float,
    CudaFloat,
}

impl Device {
    /// First listed GPU when any are configured, CPU otherwise.
    pub fn from_gpu_ids(gpu_ids: &[usize]) -> Self {
        match gpu_ids.first() {
            Some(&id) => Device::Cuda(id),
            None => Device::Cpu,
        }
    }

    pub fn is_accelerated(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }

    pub fn tensor_kind(&self) -> TensorKind {
        match self {
            Device::Cpu => TensorKind::Float,
            Device::Cuda(_) => TensorKind::CudaFloat,
        }
    }

    /// Backend device; builds without CUDA support fall back to the CPU.
    pub fn backend(&self) -> ModelResult<candle_core::Device> {
        match self {
            Device::Cpu => Ok(candle_core::Device::Cpu),
            Device::Cuda(id) => Ok(candle_core::Device::cuda_if_available(*id)?),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(id) => write!(f, "cuda:{}", id),
        }
    }
}

//! 計算バックエンドの選択

use burn::backend::{Autodiff, NdArray};
use tracing::warn;

use crate::model::config::DeviceType;

/// CPU (NdArray) バックエンド
pub type CpuBackend = NdArray;
pub type CpuTrainBackend = Autodiff<CpuBackend>;

/// WGPU バックエンド
#[cfg(feature = "wgpu")]
pub type GpuBackend = burn::backend::Wgpu;
#[cfg(feature = "wgpu")]
pub type GpuTrainBackend = Autodiff<GpuBackend>;

#[cfg(feature = "wgpu")]
pub fn gpu_device() -> burn_wgpu::WgpuDevice {
    burn_wgpu::WgpuDevice::DiscreteGpu(0)
}

/// 実際に使えるデバイス種別
///
/// `wgpu` フィーチャー無しでビルドした場合、Wgpu の指定は CPU に置き換えます。
pub fn resolve_device_type(requested: &DeviceType) -> DeviceType {
    match requested {
        DeviceType::Wgpu if cfg!(feature = "wgpu") => DeviceType::Wgpu,
        DeviceType::Wgpu => {
            warn!("wgpu フィーチャーが無効なため CPU (NdArray) で実行します");
            DeviceType::Cpu
        }
        DeviceType::Cpu => DeviceType::Cpu,
    }
}

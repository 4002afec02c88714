use candle_core::Device;

/// Hardware capabilities.
///
/// Capabilities are queried every time a checkpoint is loaded.
/// Implementations other than [`SystemHardware`] are mostly useful for
/// testing device target resolution without the corresponding hardware.
pub trait Hardware {
    /// Check whether a CUDA device can be used.
    fn cuda_available(&self) -> bool;

    /// Check whether the Metal backend is built and a device can be used.
    fn metal_available(&self) -> bool;
}

/// Hardware that candle was built for.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemHardware;

impl Hardware for SystemHardware {
    fn cuda_available(&self) -> bool {
        candle_core::utils::cuda_is_available() && Device::new_cuda(0).is_ok()
    }

    fn metal_available(&self) -> bool {
        candle_core::utils::metal_is_available() && Device::new_metal(0).is_ok()
    }
}

/// Hardware with fixed capabilities.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StaticHardware {
    /// Report CUDA as available.
    pub cuda: bool,

    /// Report Metal as available.
    pub metal: bool,
}

impl Hardware for StaticHardware {
    fn cuda_available(&self) -> bool {
        self.cuda
    }

    fn metal_available(&self) -> bool {
        self.metal
    }
}

/// Where deserialized tensors are materialized.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceTarget {
    /// Place tensors directly on the CUDA device.
    Accelerator,

    /// Place tensors in CPU memory, parameters are moved to the Metal
    /// device when they are assigned.
    CpuStaged,

    /// Place tensors in CPU memory.
    Cpu,
}

impl DeviceTarget {
    /// Get the device that tensors are deserialized to.
    pub fn device(&self) -> Result<Device, candle_core::Error> {
        match self {
            DeviceTarget::Accelerator => Device::new_cuda(0),
            DeviceTarget::CpuStaged | DeviceTarget::Cpu => Ok(Device::Cpu),
        }
    }
}

/// Resolve the deserialization target for the available hardware.
///
/// CUDA is preferred. When only Metal is available, tensors are staged
/// in CPU memory, since Metal tensors cannot be deserialized directly.
/// Otherwise the CPU is used.
pub fn resolve_device_target(hardware: &impl Hardware) -> DeviceTarget {
    if hardware.cuda_available() {
        DeviceTarget::Accelerator
    } else if hardware.metal_available() {
        DeviceTarget::CpuStaged
    } else {
        DeviceTarget::Cpu
    }
}

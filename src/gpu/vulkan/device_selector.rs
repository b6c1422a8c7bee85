use std::ffi::CStr;

use ash::{vk, Instance};

use crate::gpu::error::{GPUError, Result};
use crate::gpu::structs::QueueType;

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceType {
    Dedicated,
    Integrated,
    Cpu,
    Other,
}

impl From<vk::PhysicalDeviceType> for DeviceType {
    fn from(value: vk::PhysicalDeviceType) -> Self {
        match value {
            vk::PhysicalDeviceType::DISCRETE_GPU => DeviceType::Dedicated,
            vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceType::Integrated,
            vk::PhysicalDeviceType::CPU => DeviceType::Cpu,
            _ => DeviceType::Other,
        }
    }
}

/// What device selection needs to know about one physical device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub kind: DeviceType,
    /// Vulkan 1.3 with a graphics queue.
    pub capable: bool,
}

/// Result of [`choose_device`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Choice {
    pub index: usize,
    /// No hardware device qualified and a CPU implementation was taken.
    pub fallback: bool,
}

/// Picks the requested device if it is capable hardware, otherwise the first
/// capable dedicated then integrated device, otherwise a capable CPU device.
pub fn choose_device(devices: &[DeviceInfo], requested: usize) -> Option<Choice> {
    let hardware = |d: &DeviceInfo| {
        d.capable && matches!(d.kind, DeviceType::Dedicated | DeviceType::Integrated)
    };

    if devices.get(requested).map_or(false, hardware) {
        return Some(Choice {
            index: requested,
            fallback: false,
        });
    }

    for kind in [DeviceType::Dedicated, DeviceType::Integrated] {
        if let Some(index) = devices.iter().position(|d| d.capable && d.kind == kind) {
            return Some(Choice {
                index,
                fallback: false,
            });
        }
    }

    devices
        .iter()
        .position(|d| d.capable && d.kind == DeviceType::Cpu)
        .map(|index| Choice {
            index,
            fallback: true,
        })
}

/// Queue family serving each queue type. Compute and copy prefer dedicated
/// families and fall back to the graphics one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    pub fn find(families: &[vk::QueueFamilyProperties]) -> Option<Self> {
        let position = |want: vk::QueueFlags, avoid: vk::QueueFlags| {
            families
                .iter()
                .position(|f| f.queue_count > 0 && f.queue_flags.contains(want) && !f.queue_flags.intersects(avoid))
                .map(|i| i as u32)
        };

        let graphics = position(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, vk::QueueFlags::empty())?;
        let compute = position(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS).unwrap_or(graphics);
        let transfer = position(
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
        .unwrap_or(compute);

        Some(Self {
            graphics,
            compute,
            transfer,
        })
    }

    pub fn family(&self, ty: QueueType) -> u32 {
        match ty {
            QueueType::Direct => self.graphics,
            QueueType::Compute => self.compute,
            QueueType::Copy => self.transfer,
        }
    }

    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.compute, self.transfer];
        families.sort_unstable();
        families.dedup();
        families
    }
}

pub(super) fn describe(instance: &Instance, device: vk::PhysicalDevice) -> DeviceInfo {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    let version_ok = properties.api_version >= vk::API_VERSION_1_3;
    DeviceInfo {
        name,
        kind: properties.device_type.into(),
        capable: version_ok && QueueFamilies::find(&families).is_some(),
    }
}

/// Enumerates physical devices and picks one for `requested`.
pub(super) fn select(
    instance: &Instance,
    requested: usize,
) -> Result<(vk::PhysicalDevice, DeviceInfo)> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    let infos: Vec<DeviceInfo> = devices.iter().map(|d| describe(instance, *d)).collect();
    for (index, info) in infos.iter().enumerate() {
        log::debug!(
            "vulkan device {}: `{}` ({:?}{})",
            index,
            info.name,
            info.kind,
            if info.capable { "" } else { ", not capable" }
        );
    }

    let choice = choose_device(&infos, requested)
        .ok_or(GPUError::Unsupported("no Vulkan 1.3 device with a graphics queue"))?;
    let info = infos[choice.index].clone();
    if choice.fallback {
        log::warn!(
            "no hardware Vulkan device available, falling back to `{}`",
            info.name
        );
    }
    Ok((devices[choice.index], info))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(kind: DeviceType, capable: bool) -> DeviceInfo {
        DeviceInfo {
            name: format!("{:?}", kind),
            kind,
            capable,
        }
    }

    #[test]
    fn requested_hardware_device_wins() {
        let devices = [
            device(DeviceType::Dedicated, true),
            device(DeviceType::Integrated, true),
        ];
        assert_eq!(
            choose_device(&devices, 1),
            Some(Choice {
                index: 1,
                fallback: false
            })
        );
    }

    #[test]
    fn dedicated_preferred_over_integrated() {
        let devices = [
            device(DeviceType::Integrated, true),
            device(DeviceType::Dedicated, true),
            device(DeviceType::Dedicated, false),
        ];
        assert_eq!(choose_device(&devices, 2).map(|c| c.index), Some(1));
    }

    #[test]
    fn cpu_device_is_a_fallback() {
        let devices = [
            device(DeviceType::Dedicated, false),
            device(DeviceType::Cpu, true),
        ];
        assert_eq!(
            choose_device(&devices, 0),
            Some(Choice {
                index: 1,
                fallback: true
            })
        );
        assert_eq!(choose_device(&devices[..1], 0), None);
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn dedicated_families_are_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let found = QueueFamilies::find(&families).unwrap();
        assert_eq!(found.family(QueueType::Direct), 0);
        assert_eq!(found.family(QueueType::Compute), 1);
        assert_eq!(found.family(QueueType::Copy), 2);
        assert_eq!(found.unique(), vec![0, 1, 2]);
    }

    #[test]
    fn single_family_serves_every_queue() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let found = QueueFamilies::find(&families).unwrap();
        assert_eq!(found.unique(), vec![0]);
        assert_eq!(found.family(QueueType::Copy), 0);
    }
}

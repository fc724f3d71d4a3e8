use std::{ffi::CStr, ptr::null_mut};

use ash::vk;
use itertools::Itertools;

use crate::{
    backend::types::{DeviceCapabilities, ShaderTableProperties},
    error::{GfxError, GfxResult},
};

/// 一张物理显卡，以及创建 device 需要的信息
pub struct PhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    pub(crate) basic_props: vk::PhysicalDeviceProperties,
    pub(crate) rt_pipeline_props: vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static>,
    pub(crate) acc_struct_props: vk::PhysicalDeviceAccelerationStructurePropertiesKHR<'static>,

    /// 同时支持 acceleration structure 和 ray tracing pipeline 扩展
    pub(crate) ray_tracing: bool,

    /// graphics + compute + transfer 的 queue family
    pub(crate) gfx_queue_family: u32,
    pub(crate) gfx_queue_count: u32,
}

impl PhysicalDevice {
    /// 优先选择支持光追的独立显卡，其次是支持光追的显卡，最后是第一张显卡
    pub fn pick(instance: &ash::Instance) -> GfxResult<Self> {
        let candidates = unsafe { instance.enumerate_physical_devices()? }
            .into_iter()
            .filter_map(|pdevice| match Self::new(pdevice, instance) {
                Ok(device) => Some(device),
                Err(err) => {
                    log::warn!("skip physical device: {}", err);
                    None
                }
            })
            .collect_vec();

        let index = candidates
            .iter()
            .position(|device| device.ray_tracing && device.is_discrete_gpu())
            .or_else(|| candidates.iter().position(|device| device.ray_tracing))
            .unwrap_or(0);

        candidates
            .into_iter()
            .nth(index)
            .ok_or_else(|| GfxError::DeviceUnavailable("no vulkan physical device with a graphics queue".to_string()))
    }

    fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance) -> GfxResult<Self> {
        unsafe {
            let mut rt_props = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut acc_props = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
            let basic_props;
            {
                let mut props2 =
                    vk::PhysicalDeviceProperties2::default().push_next(&mut rt_props).push_next(&mut acc_props);
                instance.get_physical_device_properties2(pdevice, &mut props2);
                basic_props = props2.properties;
            }
            rt_props.p_next = null_mut();
            acc_props.p_next = null_mut();

            let name = CStr::from_ptr(basic_props.device_name.as_ptr()).to_string_lossy().to_string();
            log::info!("found gpu: {}", name);

            let device_extensions = instance.enumerate_device_extension_properties(pdevice)?;
            let supports = |ext: &CStr| {
                device_extensions.iter().any(|props| CStr::from_ptr(props.extension_name.as_ptr()) == ext)
            };
            let ray_tracing =
                supports(ash::khr::acceleration_structure::NAME) && supports(ash::khr::ray_tracing_pipeline::NAME);
            if ray_tracing {
                log::debug!("ray tracing props of '{}':\n{:#?}", name, rt_props);
                log::debug!("acceleration structure props of '{}':\n{:#?}", name, acc_props);
            }

            // 全能的 queue family：graphics, compute, transfer
            let queue_family_props = instance.get_physical_device_queue_family_properties(pdevice);
            let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
            let (gfx_queue_family, gfx_queue_count) = queue_family_props
                .iter()
                .enumerate()
                .find(|(_, props)| props.queue_flags.contains(required))
                .map(|(index, props)| (index as u32, props.queue_count))
                .ok_or_else(|| GfxError::DeviceUnavailable(format!("'{}' has no graphics queue family", name)))?;

            Ok(Self {
                vk_handle: pdevice,
                basic_props,
                rt_pipeline_props: rt_props,
                acc_struct_props: acc_props,
                ray_tracing,
                gfx_queue_family,
                gfx_queue_count,
            })
        }
    }
}

// getters
impl PhysicalDevice {
    #[inline]
    pub fn is_discrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.basic_props.device_name.as_ptr()) }.to_string_lossy().to_string()
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            adapter_name: self.name(),
            ray_tracing: self.ray_tracing,
            shader_table: ShaderTableProperties {
                handle_size: self.rt_pipeline_props.shader_group_handle_size,
                handle_alignment: self.rt_pipeline_props.shader_group_handle_alignment,
                base_alignment: self.rt_pipeline_props.shader_group_base_alignment,
                max_recursion_depth: self.rt_pipeline_props.max_ray_recursion_depth,
            },
            max_push_constant_size: self.basic_props.limits.max_push_constants_size,
            scratch_alignment: (self.acc_struct_props.min_acceleration_structure_scratch_offset_alignment as u64)
                .max(1),
        }
    }
}

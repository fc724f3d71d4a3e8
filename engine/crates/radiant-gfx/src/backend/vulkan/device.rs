use std::ffi::{CStr, CString};

use ash::vk;
use itertools::Itertools;

use crate::{
    backend::vulkan::{debug_messenger::DebugMessenger, physical_device::PhysicalDevice},
    error::{GfxError, GfxResult},
};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// 创建 instance，validation 为 true 时开启 validation layer 和 debug utils
///
/// 无窗口，因此不需要 surface 相关的扩展
pub fn create_instance(entry: &ash::Entry, app_name: &str, validation: bool) -> GfxResult<ash::Instance> {
    let app_name = CString::new(app_name).unwrap_or_default();
    let app_info = vk::ApplicationInfo::default()
        .application_name(app_name.as_c_str())
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(c"radiant")
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_3);

    let layer_available = unsafe { entry.enumerate_instance_layer_properties()? }
        .iter()
        .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);
    if validation && !layer_available {
        log::warn!("validation layer is not installed, continue without it");
    }
    let validation = validation && layer_available;

    let layers = if validation { vec![VALIDATION_LAYER.as_ptr()] } else { vec![] };
    let exts = if validation { vec![ash::ext::debug_utils::NAME.as_ptr()] } else { vec![] };

    let mut debug_ci = DebugMessenger::create_info();
    let mut instance_ci = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&exts);
    if validation {
        instance_ci = instance_ci.push_next(&mut debug_ci);
    }

    let instance = unsafe { entry.create_instance(&instance_ci, None)? };
    log::info!("vulkan instance created, validation: {}", validation);
    Ok(instance)
}

/// 逻辑设备以及扩展的函数指针
pub struct DeviceFunctions {
    pub(crate) device: ash::Device,
    pub(crate) acceleration_structure: ash::khr::acceleration_structure::Device,
    pub(crate) ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device,
    /// 只有开启了 validation 才存在
    pub(crate) debug_utils: Option<ash::ext::debug_utils::Device>,
}

// new & init
impl DeviceFunctions {
    pub fn new(
        instance: &ash::Instance,
        pdevice: &PhysicalDevice,
        queue_count: u32,
        debug_utils: bool,
    ) -> GfxResult<Self> {
        let _span = radiant_crate_tools::profile_span!("DeviceFunctions::new");

        let device_exts = Self::device_exts(pdevice.ray_tracing);
        log::info!("device exts: {}", device_exts.iter().map(|ext| format!("\n\t{:?}", ext)).join(""));
        let device_exts = device_exts.iter().map(|ext| ext.as_ptr()).collect_vec();

        let mut address_features = vk::PhysicalDeviceBufferDeviceAddressFeatures::default().buffer_device_address(true);
        let mut sync2_features = vk::PhysicalDeviceSynchronization2Features::default().synchronization2(true);
        let mut timeline_features = vk::PhysicalDeviceTimelineSemaphoreFeatures::default().timeline_semaphore(true);
        let mut indexing_features = vk::PhysicalDeviceDescriptorIndexingFeatures::default()
            // 即使一些 descriptor 是 invalid
            .descriptor_binding_partially_bound(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_image_update_after_bind(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .descriptor_binding_uniform_buffer_update_after_bind(true);
        let mut rt_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);
        let mut as_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);

        let mut all_features = vk::PhysicalDeviceFeatures2::default()
            .features(
                vk::PhysicalDeviceFeatures::default()
                    .sampler_anisotropy(true)
                    // 用于 buffer device address
                    .shader_int64(true),
            )
            .push_next(&mut address_features)
            .push_next(&mut sync2_features)
            .push_next(&mut timeline_features)
            .push_next(&mut indexing_features);
        if pdevice.ray_tracing {
            all_features = all_features.push_next(&mut rt_features).push_next(&mut as_features);
        }

        let priorities = vec![1.0; queue_count as usize];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(pdevice.gfx_queue_family)
            .queue_priorities(&priorities)];

        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features);

        let device = unsafe { instance.create_device(pdevice.vk_handle, &device_ci, None) }
            .map_err(|err| GfxError::DeviceUnavailable(format!("failed to create device: {err}")))?;

        Ok(Self {
            acceleration_structure: ash::khr::acceleration_structure::Device::new(instance, &device),
            ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device::new(instance, &device),
            debug_utils: debug_utils.then(|| ash::ext::debug_utils::Device::new(instance, &device)),
            device,
        })
    }

    /// 必要的 device extensions
    fn device_exts(ray_tracing: bool) -> Vec<&'static CStr> {
        // buffer device address, descriptor indexing, timeline semaphore, synchronization2 已经提升到 core
        let mut exts = vec![];
        if ray_tracing {
            exts.append(&mut vec![
                ash::khr::acceleration_structure::NAME,
                ash::khr::ray_tracing_pipeline::NAME,
                ash::khr::deferred_host_operations::NAME,
            ]);
        }
        exts
    }

    pub fn destroy(&self) {
        log::info!("destroying device");
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

// tools
impl DeviceFunctions {
    /// 没有开启 debug utils 时什么也不做
    pub fn set_debug_name<T: vk::Handle>(&self, handle: T, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default().object_handle(handle).object_name(name.as_c_str());
        if let Err(err) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            log::warn!("failed to set debug name '{}': {}", name.to_string_lossy(), err);
        }
    }
}

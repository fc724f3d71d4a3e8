//! 基于 ash + vk-mem 的无窗口后端
//!
//! - 所有队列都来自同一个 queue family，资源不需要 ownership transfer
//! - Fence 对应 timeline semaphore
//! - 描述符堆是一个 bindless 的 descriptor set，四种 view 各自占用一个 binding，slot 的下标就是数组下标
//! - named binding 全部放在 push constant 中，table 写入下标，direct 写入设备地址

mod conv;
mod debug_messenger;
mod device;
mod encode;
mod physical_device;

use std::{cell::RefCell, ffi::CString, mem::ManuallyDrop};

use ash::vk;
use itertools::Itertools;
use slotmap::SlotMap;
use vk_mem::Alloc;

use crate::{
    backend::{
        GfxBackend, SubmitBatch,
        types::{
            AsBuildDesc, AsKind, AsPrebuildInfo, BindingLayoutDesc, BufferDesc, ComputePipelineDesc, DescriptorHeapInfo,
            DescriptorView, DeviceCapabilities, MemoryKind, QueueKind, RtPipelineDesc, TextureDesc, TextureFormat,
        },
        vulkan::{
            debug_messenger::DebugMessenger, device::DeviceFunctions, encode::CommandEncoder,
            physical_device::PhysicalDevice,
        },
    },
    error::{GfxError, GfxResult},
    resources::handles::{
        AccelHandle, BindingLayoutHandle, BufferHandle, CommandStorageHandle, DescriptorHeapHandle, PipelineHandle,
        QueueHandle, TextureHandle, TimelineHandle,
    },
};

/// 描述符堆中每种 view 对应的 binding
const HEAP_BINDING_STORAGE_IMAGE: u32 = 0;
const HEAP_BINDING_SAMPLED_IMAGE: u32 = 1;
const HEAP_BINDING_STORAGE_BUFFER: u32 = 2;
const HEAP_BINDING_UNIFORM_BUFFER: u32 = 3;

struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: u64,
    /// CPU 可见的内存在创建时 map，销毁时 unmap
    mapped: Option<*mut u8>,
    address: u64,
    label: String,
}

struct VulkanTexture {
    image: vk::Image,
    view: vk::ImageView,
    allocation: vk_mem::Allocation,
    format: TextureFormat,
    width: u32,
    height: u32,
    /// 编码命令时跟踪的 layout
    layout: vk::ImageLayout,
}

struct VulkanHeap {
    pool: vk::DescriptorPool,
    set_layout: vk::DescriptorSetLayout,
    set: vk::DescriptorSet,
}

struct VulkanStorage {
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
}

struct VulkanLayout {
    pipeline_layout: vk::PipelineLayout,
    samplers: Vec<vk::Sampler>,
    /// static sampler 所在的 set，位于描述符堆之后
    sampler_set_layout: Option<vk::DescriptorSetLayout>,
    sampler_pool: Option<vk::DescriptorPool>,
    sampler_set: Option<vk::DescriptorSet>,
}

struct VulkanPipeline {
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
    group_count: u32,
}

#[derive(Default)]
struct VulkanState {
    buffers: SlotMap<BufferHandle, VulkanBuffer>,
    textures: SlotMap<TextureHandle, VulkanTexture>,
    heaps: SlotMap<DescriptorHeapHandle, VulkanHeap>,
    queues: SlotMap<QueueHandle, vk::Queue>,
    timelines: SlotMap<TimelineHandle, vk::Semaphore>,
    storages: SlotMap<CommandStorageHandle, VulkanStorage>,
    accels: SlotMap<AccelHandle, vk::AccelerationStructureKHR>,
    layouts: SlotMap<BindingLayoutHandle, VulkanLayout>,
    pipelines: SlotMap<PipelineHandle, VulkanPipeline>,
}

pub struct VulkanBackend {
    caps: DeviceCapabilities,
    state: RefCell<VulkanState>,

    /// 需要在 device 之前销毁
    allocator: ManuallyDrop<vk_mem::Allocator>,
    device: DeviceFunctions,
    /// graphics 使用第 0 个队列，upload 在有多个队列时使用第 1 个
    queue_count: u32,
    gfx_queue_family: u32,
    debug_messenger: Option<DebugMessenger>,
    instance: ash::Instance,

    /// 在 drop 之后，会卸载 dll，因此需要确保该字段最后 drop
    _entry: ash::Entry,
}

// new & init
impl VulkanBackend {
    pub fn new(app_name: &str, validation: bool) -> GfxResult<Self> {
        let _span = radiant_crate_tools::profile_span!("VulkanBackend::new");

        let entry = unsafe { ash::Entry::load() }
            .map_err(|err| GfxError::DeviceUnavailable(format!("failed to load vulkan: {err}")))?;
        let instance = device::create_instance(&entry, app_name, validation)?;
        let debug_messenger = if validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(err) => {
                    log::warn!("debug messenger is unavailable: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let physical_device = PhysicalDevice::pick(&instance)?;
        let caps = physical_device.capabilities();
        log::info!("use gpu '{}', ray tracing: {}", caps.adapter_name, caps.ray_tracing);

        let queue_count = physical_device.gfx_queue_count.clamp(1, 2);
        let device = DeviceFunctions::new(&instance, &physical_device, queue_count, debug_messenger.is_some())?;

        let mut allocator_ci =
            vk_mem::AllocatorCreateInfo::new(&instance, &device.device, physical_device.vk_handle);
        allocator_ci.vulkan_api_version = vk::API_VERSION_1_3;
        allocator_ci.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
        let allocator = unsafe { vk_mem::Allocator::new(allocator_ci)? };

        Ok(Self {
            caps,
            state: RefCell::new(VulkanState::default()),
            allocator: ManuallyDrop::new(allocator),
            device,
            queue_count,
            gfx_queue_family: physical_device.gfx_queue_family,
            debug_messenger,
            instance,
            _entry: entry,
        })
    }
}

// tools
impl VulkanBackend {
    /// ERROR_DEVICE_LOST 单独表示，其余的保留原始的错误码
    fn map_vk(err: vk::Result) -> GfxError {
        if err == vk::Result::ERROR_DEVICE_LOST {
            GfxError::DeviceLost("vulkan reported VK_ERROR_DEVICE_LOST".to_string())
        } else {
            GfxError::Vulkan(err)
        }
    }

    fn creation_error(what: &'static str, label: &str, err: vk::Result) -> GfxError {
        match Self::map_vk(err) {
            GfxError::Vulkan(err) => GfxError::creation(what, label, err),
            lost => lost,
        }
    }

    fn check_range(buffer: &VulkanBuffer, offset: u64, len: u64) -> GfxResult<*mut u8> {
        let Some(mapped) = buffer.mapped else {
            return Err(GfxError::NotHostVisible {
                label: buffer.label.clone(),
            });
        };
        if offset.checked_add(len).is_none_or(|end| end > buffer.size) {
            return Err(GfxError::OutOfBounds {
                label: buffer.label.clone(),
                offset,
                len,
                size: buffer.size,
            });
        }
        Ok(mapped)
    }

    fn destroy_layout_objects(&self, layout: VulkanLayout) {
        unsafe {
            self.device.device.destroy_pipeline_layout(layout.pipeline_layout, None);
            if let Some(pool) = layout.sampler_pool {
                self.device.device.destroy_descriptor_pool(pool, None);
            }
            if let Some(set_layout) = layout.sampler_set_layout {
                self.device.device.destroy_descriptor_set_layout(set_layout, None);
            }
            for sampler in layout.samplers {
                self.device.device.destroy_sampler(sampler, None);
            }
        }
    }
}

impl GfxBackend for VulkanBackend {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.device.device.device_wait_idle() }.map_err(Self::map_vk)
    }

    fn create_buffer(&self, desc: &BufferDesc) -> GfxResult<BufferHandle> {
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(desc.size.max(1))
            .usage(conv::buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = conv::allocation_info(desc.memory);

        let (buffer, mut allocation) = unsafe {
            self.allocator.create_buffer_with_alignment(&buffer_ci, &alloc_ci, desc.alignment.unwrap_or(8))
        }
        .map_err(|err| Self::creation_error("buffer", &desc.label, err))?;

        let mapped = if desc.memory.is_host_visible() {
            match unsafe { self.allocator.map_memory(&mut allocation) } {
                Ok(ptr) => Some(ptr),
                Err(err) => {
                    unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
                    return Err(Self::creation_error("buffer", &desc.label, err));
                }
            }
        } else {
            None
        };

        let address = unsafe {
            self.device.device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
        };
        self.device.set_debug_name(buffer, &format!("Buffer::{}", desc.label));

        Ok(self.state.borrow_mut().buffers.insert(VulkanBuffer {
            buffer,
            allocation,
            size: desc.size,
            mapped,
            address,
            label: desc.label.clone(),
        }))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let Some(mut buffer) = self.state.borrow_mut().buffers.remove(buffer) else {
            return;
        };
        unsafe {
            if buffer.mapped.is_some() {
                self.allocator.unmap_memory(&mut buffer.allocation);
            }
            self.allocator.destroy_buffer(buffer.buffer, &mut buffer.allocation);
        }
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        let state = self.state.borrow();
        let buffer = &state.buffers[buffer];
        let mapped = Self::check_range(buffer, offset, data.len() as u64)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
        }
        self.allocator.flush_allocation(&buffer.allocation, offset, data.len() as u64)?;
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> GfxResult<()> {
        let state = self.state.borrow();
        let buffer = &state.buffers[buffer];
        let mapped = Self::check_range(buffer, offset, out.len() as u64)?;
        self.allocator.invalidate_allocation(&buffer.allocation, offset, out.len() as u64)?;
        unsafe {
            std::ptr::copy_nonoverlapping(mapped.add(offset as usize), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    fn buffer_device_address(&self, buffer: BufferHandle) -> u64 {
        self.state.borrow().buffers[buffer].address
    }

    fn create_texture(&self, desc: &TextureDesc) -> GfxResult<TextureHandle> {
        let format = conv::format(desc.format);
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(conv::texture_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = conv::allocation_info(MemoryKind::DeviceLocal);

        let (image, mut allocation) = unsafe { self.allocator.create_image(&image_ci, &alloc_ci) }
            .map_err(|err| Self::creation_error("texture", &desc.label, err))?;

        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        let view = match unsafe { self.device.device.create_image_view(&view_ci, None) } {
            Ok(view) => view,
            Err(err) => {
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(Self::creation_error("texture view", &desc.label, err));
            }
        };
        self.device.set_debug_name(image, &format!("Image::{}", desc.label));
        self.device.set_debug_name(view, &format!("ImageView::{}", desc.label));

        Ok(self.state.borrow_mut().textures.insert(VulkanTexture {
            image,
            view,
            allocation,
            format: desc.format,
            width: desc.width,
            height: desc.height,
            layout: vk::ImageLayout::UNDEFINED,
        }))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let Some(mut texture) = self.state.borrow_mut().textures.remove(texture) else {
            return;
        };
        unsafe {
            self.device.device.destroy_image_view(texture.view, None);
            self.allocator.destroy_image(texture.image, &mut texture.allocation);
        }
    }

    fn create_descriptor_heap(&self, capacity: u32, label: &str) -> GfxResult<DescriptorHeapInfo> {
        let types = [
            (HEAP_BINDING_STORAGE_IMAGE, vk::DescriptorType::STORAGE_IMAGE),
            (HEAP_BINDING_SAMPLED_IMAGE, vk::DescriptorType::SAMPLED_IMAGE),
            (HEAP_BINDING_STORAGE_BUFFER, vk::DescriptorType::STORAGE_BUFFER),
            (HEAP_BINDING_UNIFORM_BUFFER, vk::DescriptorType::UNIFORM_BUFFER),
        ];
        let bindings = types
            .iter()
            .map(|(binding, ty)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(*binding)
                    .descriptor_type(*ty)
                    .descriptor_count(capacity)
                    .stage_flags(conv::SHADER_STAGES)
            })
            .collect_vec();
        let binding_flags = vec![
            vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND;
            bindings.len()
        ];
        let mut flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(&bindings)
            .push_next(&mut flags_ci);
        let set_layout = unsafe { self.device.device.create_descriptor_set_layout(&layout_ci, None) }
            .map_err(|err| Self::creation_error("descriptor heap", label, err))?;

        let pool_sizes = types
            .iter()
            .map(|(_, ty)| vk::DescriptorPoolSize::default().ty(*ty).descriptor_count(capacity))
            .collect_vec();
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = match unsafe { self.device.device.create_descriptor_pool(&pool_ci, None) } {
            Ok(pool) => pool,
            Err(err) => {
                unsafe { self.device.device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(Self::creation_error("descriptor heap", label, err));
            }
        };

        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(std::slice::from_ref(&set_layout));
        let set = match unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(err) => unsafe {
                self.device.device.destroy_descriptor_pool(pool, None);
                self.device.device.destroy_descriptor_set_layout(set_layout, None);
                return Err(Self::creation_error("descriptor heap", label, err));
            },
        };
        self.device.set_debug_name(set, &format!("DescriptorSet::{}", label));

        let heap = self.state.borrow_mut().heaps.insert(VulkanHeap { pool, set_layout, set });
        Ok(DescriptorHeapInfo {
            heap,
            cpu_start: 0,
            gpu_start: 0,
            increment: 1,
        })
    }

    fn write_descriptor(&self, heap: DescriptorHeapHandle, index: u32, view: &DescriptorView) {
        let state = self.state.borrow();
        let set = state.heaps[heap].set;

        let mut image_info = None;
        let mut buffer_info = None;
        let (binding, ty) = match view {
            DescriptorView::StorageTexture(texture) => {
                image_info = Some(
                    vk::DescriptorImageInfo::default()
                        .image_view(state.textures[*texture].view)
                        .image_layout(vk::ImageLayout::GENERAL),
                );
                (HEAP_BINDING_STORAGE_IMAGE, vk::DescriptorType::STORAGE_IMAGE)
            }
            DescriptorView::SampledTexture(texture) => {
                image_info = Some(
                    vk::DescriptorImageInfo::default()
                        .image_view(state.textures[*texture].view)
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                );
                (HEAP_BINDING_SAMPLED_IMAGE, vk::DescriptorType::SAMPLED_IMAGE)
            }
            DescriptorView::StorageBuffer { buffer, offset, range } => {
                buffer_info = Some(
                    vk::DescriptorBufferInfo::default()
                        .buffer(state.buffers[*buffer].buffer)
                        .offset(*offset)
                        .range(*range),
                );
                (HEAP_BINDING_STORAGE_BUFFER, vk::DescriptorType::STORAGE_BUFFER)
            }
            DescriptorView::UniformBuffer { buffer, offset, range } => {
                buffer_info = Some(
                    vk::DescriptorBufferInfo::default()
                        .buffer(state.buffers[*buffer].buffer)
                        .offset(*offset)
                        .range(*range),
                );
                (HEAP_BINDING_UNIFORM_BUFFER, vk::DescriptorType::UNIFORM_BUFFER)
            }
        };

        let mut write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(index)
            .descriptor_type(ty);
        if let Some(image_info) = &image_info {
            write = write.image_info(std::slice::from_ref(image_info));
        }
        if let Some(buffer_info) = &buffer_info {
            write = write.buffer_info(std::slice::from_ref(buffer_info));
        }
        unsafe { self.device.device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
    }

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapHandle) {
        let Some(heap) = self.state.borrow_mut().heaps.remove(heap) else {
            return;
        };
        unsafe {
            self.device.device.destroy_descriptor_pool(heap.pool, None);
            self.device.device.destroy_descriptor_set_layout(heap.set_layout, None);
        }
    }

    fn create_queue(&self, kind: QueueKind, label: &str) -> GfxResult<QueueHandle> {
        let queue_index = match kind {
            QueueKind::Graphics => 0,
            QueueKind::Upload => self.queue_count - 1,
        };
        let queue = unsafe { self.device.device.get_device_queue(self.gfx_queue_family, queue_index) };
        self.device.set_debug_name(queue, &format!("Queue::{}", label));
        log::info!("queue '{}' uses family {} index {}", label, self.gfx_queue_family, queue_index);
        Ok(self.state.borrow_mut().queues.insert(queue))
    }

    fn create_timeline(&self, label: &str) -> GfxResult<TimelineHandle> {
        let mut timeline_type_ci =
            vk::SemaphoreTypeCreateInfo::default().semaphore_type(vk::SemaphoreType::TIMELINE).initial_value(0);
        let semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_type_ci);
        let semaphore = unsafe { self.device.device.create_semaphore(&semaphore_ci, None) }
            .map_err(|err| Self::creation_error("timeline", label, err))?;
        self.device.set_debug_name(semaphore, &format!("Timeline::{}", label));
        Ok(self.state.borrow_mut().timelines.insert(semaphore))
    }

    fn timeline_completed_value(&self, timeline: TimelineHandle) -> GfxResult<u64> {
        let semaphore = self.state.borrow().timelines[timeline];
        unsafe { self.device.device.get_semaphore_counter_value(semaphore) }.map_err(Self::map_vk)
    }

    fn wait_timeline(&self, timeline: TimelineHandle, value: u64) -> GfxResult<()> {
        let semaphore = self.state.borrow().timelines[timeline];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(std::slice::from_ref(&semaphore))
            .values(std::slice::from_ref(&value));
        unsafe { self.device.device.wait_semaphores(&wait_info, u64::MAX) }.map_err(Self::map_vk)
    }

    fn destroy_timeline(&self, timeline: TimelineHandle) {
        if let Some(semaphore) = self.state.borrow_mut().timelines.remove(timeline) {
            unsafe { self.device.device.destroy_semaphore(semaphore, None) };
        }
    }

    fn create_command_storage(&self, _queue: QueueHandle, label: &str) -> GfxResult<CommandStorageHandle> {
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.gfx_queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { self.device.device.create_command_pool(&pool_ci, None) }
            .map_err(|err| Self::creation_error("command pool", label, err))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { self.device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(err) => {
                unsafe { self.device.device.destroy_command_pool(pool, None) };
                return Err(Self::creation_error("command buffer", label, err));
            }
        };
        self.device.set_debug_name(pool, &format!("CommandPool::{}", label));
        self.device.set_debug_name(command_buffer, &format!("CommandBuffer::{}", label));

        Ok(self.state.borrow_mut().storages.insert(VulkanStorage { pool, command_buffer }))
    }

    fn reset_command_storage(&self, storage: CommandStorageHandle) -> GfxResult<()> {
        let pool = self.state.borrow().storages[storage].pool;
        unsafe { self.device.device.reset_command_pool(pool, vk::CommandPoolResetFlags::empty()) }
            .map_err(Self::map_vk)
    }

    fn destroy_command_storage(&self, storage: CommandStorageHandle) {
        if let Some(storage) = self.state.borrow_mut().storages.remove(storage) {
            unsafe { self.device.device.destroy_command_pool(storage.pool, None) };
        }
    }

    fn submit(&self, queue: QueueHandle, batch: SubmitBatch<'_>) -> GfxResult<()> {
        let _span = radiant_crate_tools::profile_span!("VulkanBackend::submit");
        let mut state = self.state.borrow_mut();
        let vk_queue = state.queues[queue];
        let device = &self.device.device;

        let mut command_infos = Vec::new();
        if let Some((storage, commands)) = batch.commands {
            let cmd = state.storages[storage].command_buffer;
            unsafe {
                device
                    .begin_command_buffer(
                        cmd,
                        &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                    )
                    .map_err(Self::map_vk)?;
            }
            CommandEncoder {
                device: &self.device,
                state: &mut state,
                cmd,
                bind_point: vk::PipelineBindPoint::RAY_TRACING_KHR,
            }
            .encode_all(commands);
            unsafe { device.end_command_buffer(cmd) }.map_err(Self::map_vk)?;
            command_infos.push(vk::CommandBufferSubmitInfo::default().command_buffer(cmd));
        }

        let semaphore_info = |(timeline, value): &(TimelineHandle, u64)| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(state.timelines[*timeline])
                .value(*value)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        };
        let wait_infos = batch.waits.iter().map(semaphore_info).collect_vec();
        let signal_infos = batch.signal.iter().map(semaphore_info).collect_vec();

        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_infos)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos);
        unsafe { device.queue_submit2(vk_queue, std::slice::from_ref(&submit_info), vk::Fence::null()) }
            .map_err(Self::map_vk)
    }

    fn acceleration_structure_sizes(&self, desc: &AsBuildDesc) -> AsPrebuildInfo {
        let (geometries, counts) = encode::as_geometries(desc);
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(conv::accel_type(desc.kind()))
            .flags(conv::build_flags(desc.flags))
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);
        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            self.device.acceleration_structure.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &counts,
                &mut sizes,
            );
        }
        AsPrebuildInfo {
            result_size: sizes.acceleration_structure_size,
            build_scratch_size: sizes.build_scratch_size,
            update_scratch_size: sizes.update_scratch_size,
        }
    }

    fn create_acceleration_structure(
        &self,
        kind: AsKind,
        buffer: BufferHandle,
        size: u64,
        label: &str,
    ) -> GfxResult<AccelHandle> {
        let vk_buffer = self.state.borrow().buffers[buffer].buffer;
        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .ty(conv::accel_type(kind))
            .buffer(vk_buffer)
            .size(size);
        let accel = unsafe { self.device.acceleration_structure.create_acceleration_structure(&create_info, None) }
            .map_err(|err| Self::creation_error("acceleration structure", label, err))?;
        self.device.set_debug_name(accel, &format!("AccelerationStructure::{}", label));
        Ok(self.state.borrow_mut().accels.insert(accel))
    }

    fn acceleration_structure_address(&self, accel: AccelHandle) -> u64 {
        let accel = self.state.borrow().accels[accel];
        unsafe {
            self.device.acceleration_structure.get_acceleration_structure_device_address(
                &vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(accel),
            )
        }
    }

    fn destroy_acceleration_structure(&self, accel: AccelHandle) {
        if let Some(accel) = self.state.borrow_mut().accels.remove(accel) {
            unsafe { self.device.acceleration_structure.destroy_acceleration_structure(accel, None) };
        }
    }

    fn create_binding_layout(&self, desc: &BindingLayoutDesc) -> GfxResult<BindingLayoutHandle> {
        if desc.push_constant_size > self.caps.max_push_constant_size {
            return Err(GfxError::BindingLayoutTooLarge {
                label: desc.label.clone(),
                required: desc.push_constant_size,
                limit: self.caps.max_push_constant_size,
            });
        }
        let device = &self.device.device;
        let heap_set_layout = desc.heap.map(|heap| self.state.borrow().heaps[heap].set_layout);

        let mut layout = VulkanLayout {
            pipeline_layout: vk::PipelineLayout::null(),
            samplers: Vec::new(),
            sampler_set_layout: None,
            sampler_pool: None,
            sampler_set: None,
        };
        // 出错时销毁已经创建的对象
        let fail = |layout: VulkanLayout, err: vk::Result| {
            self.destroy_layout_objects(layout);
            Self::creation_error("binding layout", &desc.label, err)
        };

        for sampler in &desc.static_samplers {
            let sampler_ci = conv::sampler_info(sampler.filter, sampler.address_mode, sampler.max_anisotropy);
            match unsafe { device.create_sampler(&sampler_ci, None) } {
                Ok(vk_sampler) => layout.samplers.push(vk_sampler),
                Err(err) => return Err(fail(layout, err)),
            }
        }

        if !layout.samplers.is_empty() {
            let bindings = desc
                .static_samplers
                .iter()
                .zip(&layout.samplers)
                .map(|(sampler, vk_sampler)| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(sampler.slot)
                        .descriptor_type(vk::DescriptorType::SAMPLER)
                        .stage_flags(conv::SHADER_STAGES)
                        .immutable_samplers(std::slice::from_ref(vk_sampler))
                })
                .collect_vec();
            let set_layout_ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            match unsafe { device.create_descriptor_set_layout(&set_layout_ci, None) } {
                Ok(set_layout) => layout.sampler_set_layout = Some(set_layout),
                Err(err) => return Err(fail(layout, err)),
            }

            let pool_size =
                vk::DescriptorPoolSize::default().ty(vk::DescriptorType::SAMPLER).descriptor_count(bindings.len() as u32);
            let pool_ci = vk::DescriptorPoolCreateInfo::default()
                .max_sets(1)
                .pool_sizes(std::slice::from_ref(&pool_size));
            match unsafe { device.create_descriptor_pool(&pool_ci, None) } {
                Ok(pool) => layout.sampler_pool = Some(pool),
                Err(err) => return Err(fail(layout, err)),
            }

            let set_layouts = layout.sampler_set_layout.into_iter().collect_vec();
            let alloc_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(layout.sampler_pool.unwrap_or_default())
                .set_layouts(&set_layouts);
            match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
                Ok(sets) => layout.sampler_set = sets.first().copied(),
                Err(err) => return Err(fail(layout, err)),
            }
        }

        let set_layouts = heap_set_layout.into_iter().chain(layout.sampler_set_layout).collect_vec();
        let push_ranges = (desc.push_constant_size > 0)
            .then(|| {
                vk::PushConstantRange::default()
                    .stage_flags(conv::SHADER_STAGES)
                    .offset(0)
                    .size(desc.push_constant_size)
            })
            .into_iter()
            .collect_vec();
        let pipeline_layout_ci =
            vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts).push_constant_ranges(&push_ranges);
        match unsafe { device.create_pipeline_layout(&pipeline_layout_ci, None) } {
            Ok(pipeline_layout) => layout.pipeline_layout = pipeline_layout,
            Err(err) => return Err(fail(layout, err)),
        }
        self.device.set_debug_name(layout.pipeline_layout, &format!("PipelineLayout::{}", desc.label));

        Ok(self.state.borrow_mut().layouts.insert(layout))
    }

    fn destroy_binding_layout(&self, layout: BindingLayoutHandle) {
        let layout = self.state.borrow_mut().layouts.remove(layout);
        if let Some(layout) = layout {
            self.destroy_layout_objects(layout);
        }
    }

    fn create_rt_pipeline(&self, desc: &RtPipelineDesc<'_>) -> GfxResult<PipelineHandle> {
        let _span = radiant_crate_tools::profile_span!("VulkanBackend::create_rt_pipeline");
        let device = &self.device.device;
        let pipeline_layout = self.state.borrow().layouts[desc.layout].pipeline_layout;

        // stage 的顺序：raygen，miss，每个 hit group 的 closest hit / any hit / intersection
        let mut entries: Vec<(vk::ShaderStageFlags, &str)> = vec![(vk::ShaderStageFlags::RAYGEN_KHR, desc.raygen)];
        let general_group = |stage: usize| {
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(stage as u32)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
        };
        let mut groups = vec![general_group(0)];
        for miss in desc.miss {
            groups.push(general_group(entries.len()));
            entries.push((vk::ShaderStageFlags::MISS_KHR, miss.as_str()));
        }
        for hit_group in desc.hit_groups {
            let ty = if hit_group.intersection.is_some() {
                vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP
            } else {
                vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP
            };
            let mut group = vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(ty)
                .general_shader(vk::SHADER_UNUSED_KHR)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR);
            if let Some(name) = &hit_group.closest_hit {
                group = group.closest_hit_shader(entries.len() as u32);
                entries.push((vk::ShaderStageFlags::CLOSEST_HIT_KHR, name.as_str()));
            }
            if let Some(name) = &hit_group.any_hit {
                group = group.any_hit_shader(entries.len() as u32);
                entries.push((vk::ShaderStageFlags::ANY_HIT_KHR, name.as_str()));
            }
            if let Some(name) = &hit_group.intersection {
                group = group.intersection_shader(entries.len() as u32);
                entries.push((vk::ShaderStageFlags::INTERSECTION_KHR, name.as_str()));
            }
            groups.push(group);
        }

        let names = entries
            .iter()
            .map(|(_, name)| CString::new(*name))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| GfxError::creation("rt pipeline", desc.label, err))?;

        let words = desc.binary.words();
        let module_ci = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { device.create_shader_module(&module_ci, None) }
            .map_err(|err| Self::creation_error("shader module", desc.label, err))?;

        let stages = entries
            .iter()
            .zip(&names)
            .map(|((stage, _), name)| {
                vk::PipelineShaderStageCreateInfo::default().stage(*stage).module(module).name(name.as_c_str())
            })
            .collect_vec();
        let pipeline_ci = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(desc.max_recursion_depth)
            .layout(pipeline_layout);

        let result = unsafe {
            self.device.ray_tracing_pipeline.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_ci),
                None,
            )
        };
        unsafe { device.destroy_shader_module(module, None) };

        let pipeline = result
            .map_err(|(_, err)| Self::creation_error("rt pipeline", desc.label, err))?
            .first()
            .copied()
            .ok_or_else(|| GfxError::creation("rt pipeline", desc.label, "driver returned no pipeline"))?;
        self.device.set_debug_name(pipeline, &format!("Pipeline::{}", desc.label));

        Ok(self.state.borrow_mut().pipelines.insert(VulkanPipeline {
            pipeline,
            bind_point: vk::PipelineBindPoint::RAY_TRACING_KHR,
            group_count: desc.group_count(),
        }))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> GfxResult<PipelineHandle> {
        let _span = radiant_crate_tools::profile_span!("VulkanBackend::create_compute_pipeline");
        let device = &self.device.device;
        let pipeline_layout = self.state.borrow().layouts[desc.layout].pipeline_layout;

        let name =
            CString::new(desc.entry_point).map_err(|err| GfxError::creation("compute pipeline", desc.label, err))?;
        let words = desc.binary.words();
        let module_ci = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe { device.create_shader_module(&module_ci, None) }
            .map_err(|err| Self::creation_error("shader module", desc.label, err))?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(name.as_c_str());
        let pipeline_ci = vk::ComputePipelineCreateInfo::default().stage(stage).layout(pipeline_layout);

        let result = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_ci), None)
        };
        unsafe { device.destroy_shader_module(module, None) };

        let pipeline = result
            .map_err(|(_, err)| Self::creation_error("compute pipeline", desc.label, err))?
            .first()
            .copied()
            .ok_or_else(|| GfxError::creation("compute pipeline", desc.label, "driver returned no pipeline"))?;
        self.device.set_debug_name(pipeline, &format!("Pipeline::{}", desc.label));

        Ok(self.state.borrow_mut().pipelines.insert(VulkanPipeline {
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            group_count: 0,
        }))
    }

    fn shader_group_handles(&self, pipeline: PipelineHandle, group_count: u32) -> GfxResult<Vec<u8>> {
        let state = self.state.borrow();
        let pipeline = &state.pipelines[pipeline];
        assert!(
            group_count <= pipeline.group_count,
            "requested {group_count} groups, pipeline has {}",
            pipeline.group_count
        );

        let data_size = (group_count * self.caps.shader_table.handle_size) as usize;
        unsafe {
            self.device.ray_tracing_pipeline.get_ray_tracing_shader_group_handles(
                pipeline.pipeline,
                0,
                group_count,
                data_size,
            )
        }
        .map_err(Self::map_vk)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        if let Some(pipeline) = self.state.borrow_mut().pipelines.remove(pipeline) {
            unsafe { self.device.device.destroy_pipeline(pipeline.pipeline, None) };
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            log::error!("failed to wait for device idle: {}", err);
        }

        // 正常情况下所有对象已经由各自的 owner 销毁，这里只处理遗漏的部分
        let state = std::mem::take(self.state.get_mut());
        let leaked = state.buffers.len() + state.textures.len() + state.accels.len() + state.pipelines.len();
        if leaked > 0 {
            log::warn!("{} gpu objects are still alive when the device is destroyed", leaked);
        }
        unsafe {
            for (_, pipeline) in state.pipelines {
                self.device.device.destroy_pipeline(pipeline.pipeline, None);
            }
            for (_, layout) in state.layouts {
                self.destroy_layout_objects(layout);
            }
            for (_, accel) in state.accels {
                self.device.acceleration_structure.destroy_acceleration_structure(accel, None);
            }
            for (_, storage) in state.storages {
                self.device.device.destroy_command_pool(storage.pool, None);
            }
            for (_, semaphore) in state.timelines {
                self.device.device.destroy_semaphore(semaphore, None);
            }
            for (_, heap) in state.heaps {
                self.device.device.destroy_descriptor_pool(heap.pool, None);
                self.device.device.destroy_descriptor_set_layout(heap.set_layout, None);
            }
            for (_, mut texture) in state.textures {
                self.device.device.destroy_image_view(texture.view, None);
                self.allocator.destroy_image(texture.image, &mut texture.allocation);
            }
            for (_, mut buffer) in state.buffers {
                if buffer.mapped.is_some() {
                    self.allocator.unmap_memory(&mut buffer.allocation);
                }
                self.allocator.destroy_buffer(buffer.buffer, &mut buffer.allocation);
            }

            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy();
            if let Some(messenger) = &self.debug_messenger {
                messenger.destroy();
            }
            log::info!("destroying instance");
            self.instance.destroy_instance(None);
        }
    }
}

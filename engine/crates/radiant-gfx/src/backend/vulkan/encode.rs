//! 把 [`GfxCommand`] 编码为 vulkan 命令
//!
//! texture 的 layout 在编码时跟踪，编码顺序就是提交顺序

use ash::vk;
use itertools::Itertools;

use crate::{
    backend::{
        types::{AsBuildDesc, AsGeometry, StridedRegion},
        vulkan::{VulkanState, conv, device::DeviceFunctions},
    },
    basic::color::LabelColor,
    commands::gfx_command::{BindingValue, GfxCommand, TextureState},
    resources::handles::TextureHandle,
};

/// 加速结构的 geometry 以及每个 geometry 的 primitive 数量
pub(super) fn as_geometries(desc: &AsBuildDesc) -> (Vec<vk::AccelerationStructureGeometryKHR<'static>>, Vec<u32>) {
    match &desc.geometry {
        AsGeometry::Triangles(triangles) => triangles
            .iter()
            .map(|triangle| {
                let data = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                    .vertex_format(conv::vertex_format(triangle.vertex_format))
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: triangle.vertex_address,
                    })
                    .vertex_stride(triangle.vertex_stride)
                    .max_vertex(triangle.vertex_count.saturating_sub(1))
                    .index_type(conv::index_type(triangle.index_format))
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: triangle.index_address,
                    });
                let flags = if triangle.opaque { vk::GeometryFlagsKHR::OPAQUE } else { vk::GeometryFlagsKHR::empty() };
                let geometry = vk::AccelerationStructureGeometryKHR::default()
                    .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                    .geometry(vk::AccelerationStructureGeometryDataKHR { triangles: data })
                    .flags(flags);
                (geometry, triangle.primitive_count())
            })
            .unzip(),
        AsGeometry::Instances { address, count } => {
            let data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: *address,
                });
            let geometry = vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                .geometry(vk::AccelerationStructureGeometryDataKHR { instances: data });
            (vec![geometry], vec![*count])
        }
    }
}

pub(super) struct CommandEncoder<'a> {
    pub device: &'a DeviceFunctions,
    pub state: &'a mut VulkanState,
    pub cmd: vk::CommandBuffer,
    /// 最近一次绑定的管线类型，描述符跟随它绑定
    pub bind_point: vk::PipelineBindPoint,
}

impl CommandEncoder<'_> {
    pub fn encode_all(&mut self, commands: &[GfxCommand]) {
        for command in commands {
            self.encode(command);
        }
    }

    fn encode(&mut self, command: &GfxCommand) {
        let functions: &DeviceFunctions = self.device;
        let device = &functions.device;
        match command {
            GfxCommand::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let region = vk::BufferCopy::default().src_offset(*src_offset).dst_offset(*dst_offset).size(*size);
                unsafe {
                    device.cmd_copy_buffer(
                        self.cmd,
                        self.state.buffers[*src].buffer,
                        self.state.buffers[*dst].buffer,
                        std::slice::from_ref(&region),
                    );
                }
            }
            GfxCommand::CopyBufferToTexture {
                src,
                src_offset,
                row_pitch,
                dst,
                width,
                height,
            } => {
                let texture = &self.state.textures[*dst];
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(*src_offset)
                    .buffer_row_length(row_pitch / texture.format.texel_size())
                    .buffer_image_height(*height)
                    .image_subresource(Self::color_layers())
                    .image_extent(vk::Extent3D {
                        width: *width,
                        height: *height,
                        depth: 1,
                    });
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        self.cmd,
                        self.state.buffers[*src].buffer,
                        texture.image,
                        texture.layout,
                        std::slice::from_ref(&region),
                    );
                }
            }
            GfxCommand::CopyTexture { src, dst, width, height } => {
                let src = &self.state.textures[*src];
                let dst = &self.state.textures[*dst];
                let extent = vk::Extent3D {
                    width: (*width).min(src.width).min(dst.width),
                    height: (*height).min(src.height).min(dst.height),
                    depth: 1,
                };
                let region = vk::ImageCopy::default()
                    .src_subresource(Self::color_layers())
                    .dst_subresource(Self::color_layers())
                    .extent(extent);
                unsafe {
                    device.cmd_copy_image(
                        self.cmd,
                        src.image,
                        src.layout,
                        dst.image,
                        dst.layout,
                        std::slice::from_ref(&region),
                    );
                }
            }
            GfxCommand::TextureBarrier { texture, from, to } => self.texture_barrier(*texture, *from, *to),
            GfxCommand::MemoryBarrier(scope) => {
                let (src_stage, src_access, dst_stage, dst_access) = conv::barrier_scope(*scope);
                let barrier = vk::MemoryBarrier2::default()
                    .src_stage_mask(src_stage)
                    .src_access_mask(src_access)
                    .dst_stage_mask(dst_stage)
                    .dst_access_mask(dst_access);
                let dependency_info = vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
                unsafe { device.cmd_pipeline_barrier2(self.cmd, &dependency_info) };
            }
            GfxCommand::BuildAccelerationStructure {
                desc,
                mode,
                dst,
                src,
                scratch_address,
            } => {
                let (geometries, counts) = as_geometries(desc);
                let ranges = counts
                    .iter()
                    .map(|count| vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(*count))
                    .collect_vec();
                let src = src.map_or(vk::AccelerationStructureKHR::null(), |src| self.state.accels[src]);
                let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
                    .ty(conv::accel_type(desc.kind()))
                    .flags(conv::build_flags(desc.flags))
                    .mode(conv::build_mode(*mode))
                    .geometries(&geometries)
                    .src_acceleration_structure(src)
                    .dst_acceleration_structure(self.state.accels[*dst])
                    .scratch_data(vk::DeviceOrHostAddressKHR {
                        device_address: *scratch_address,
                    });
                unsafe {
                    // 一次只构建一个加速结构
                    functions.acceleration_structure.cmd_build_acceleration_structures(
                        self.cmd,
                        std::slice::from_ref(&build_info),
                        &[&ranges],
                    );
                }
            }
            GfxCommand::BindPipeline(pipeline) => {
                let pipeline = &self.state.pipelines[*pipeline];
                self.bind_point = pipeline.bind_point;
                unsafe { device.cmd_bind_pipeline(self.cmd, pipeline.bind_point, pipeline.pipeline) };
            }
            GfxCommand::BindDescriptorHeap { heap, layout } => {
                let layout = &self.state.layouts[*layout];
                let sets = [Some(self.state.heaps[*heap].set), layout.sampler_set].into_iter().flatten().collect_vec();
                unsafe {
                    device.cmd_bind_descriptor_sets(
                        self.cmd,
                        self.bind_point,
                        layout.pipeline_layout,
                        0,
                        &sets,
                        &[],
                    );
                }
            }
            GfxCommand::SetBinding { layout, offset, value } => {
                // table 在 vulkan 中是描述符数组的下标
                let bytes = match value {
                    BindingValue::Table(index) => (*index as u32).to_le_bytes().to_vec(),
                    BindingValue::Direct(address) => address.to_le_bytes().to_vec(),
                    BindingValue::Constants(values) => bytemuck::cast_slice(values).to_vec(),
                };
                unsafe {
                    device.cmd_push_constants(
                        self.cmd,
                        self.state.layouts[*layout].pipeline_layout,
                        conv::SHADER_STAGES,
                        *offset,
                        &bytes,
                    );
                }
            }
            GfxCommand::TraceRays {
                raygen,
                miss,
                hit,
                callable,
                width,
                height,
                depth,
            } => {
                let region = |region: &StridedRegion| {
                    vk::StridedDeviceAddressRegionKHR::default()
                        .device_address(region.address)
                        .stride(region.stride)
                        .size(region.size)
                };
                unsafe {
                    functions.ray_tracing_pipeline.cmd_trace_rays(
                        self.cmd,
                        &region(raygen),
                        &region(miss),
                        &region(hit),
                        &region(callable),
                        *width,
                        *height,
                        *depth,
                    );
                }
            }
            GfxCommand::Dispatch { x, y, z } => unsafe {
                device.cmd_dispatch(self.cmd, *x, *y, *z);
            },
            GfxCommand::BeginLabel(name) => {
                if let Some(debug_utils) = &functions.debug_utils {
                    let name = std::ffi::CString::new(name.as_str()).unwrap_or_default();
                    let label = vk::DebugUtilsLabelEXT::default()
                        .label_name(name.as_c_str())
                        .color(LabelColor::COLOR_PASS.into());
                    unsafe { debug_utils.cmd_begin_debug_utils_label(self.cmd, &label) };
                }
            }
            GfxCommand::EndLabel => {
                if let Some(debug_utils) = &functions.debug_utils {
                    unsafe { debug_utils.cmd_end_debug_utils_label(self.cmd) };
                }
            }
        }
    }

    fn texture_barrier(
        &mut self,
        texture: TextureHandle,
        from: TextureState,
        to: TextureState,
    ) {
        let (_, src_stage, src_access) = conv::texture_state(from);
        let (new_layout, dst_stage, dst_access) = conv::texture_state(to);
        let texture = &mut self.state.textures[texture];
        let old_layout = if from == TextureState::Undefined {
            vk::ImageLayout::UNDEFINED
        } else {
            texture.layout
        };

        let barrier = vk::ImageMemoryBarrier2::default()
            .image(texture.image)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        texture.layout = new_layout;

        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.device.cmd_pipeline_barrier2(self.cmd, &dependency_info) };
    }

    #[inline]
    fn color_layers() -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers::default().aspect_mask(vk::ImageAspectFlags::COLOR).layer_count(1)
    }
}

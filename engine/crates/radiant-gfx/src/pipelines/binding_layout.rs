//! 通过名称绑定资源的管线布局
//!
//! 所有的 binding 在构建期注册，`build` 之后布局不再变化。
//! 每一个 binding 占用 root data（vulkan 中是 push constant）中的一段：
//! - table：描述符表中的起始 index，4 字节
//! - direct：buffer 或者加速结构的设备地址，8 字节，按 8 字节对齐
//! - constants：count 个 32 位常量

use indexmap::IndexMap;

use crate::{
    backend::types::BindingLayoutDesc,
    basic::align::align_up_u32,
    commands::{command_recorder::CommandRecorder, gfx_command::BindingValue},
    error::GfxResult,
    foundation::device::DeviceHandle,
    resources::handles::{BindingLayoutHandle, DescriptorHeapHandle},
};

/// 资源的访问方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// 只读，SRV
    ShaderResource,
    /// 读写，UAV
    UnorderedAccess,
    /// CBV
    ConstantBuffer,
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotType {
    /// 描述符表中连续的 count 个描述符
    Table {
        kind: BindingKind,
        count: u32,
        base_slot: u32,
        space: u32,
    },
    /// 直接绑定一个地址
    Direct { kind: BindingKind, slot: u32, space: u32 },
    /// 直接写入 root data 的 32 位常量
    Constants { count: u32, slot: u32, space: u32 },
}

impl SlotType {
    #[inline]
    fn size(&self) -> u32 {
        match self {
            Self::Table { .. } => 4,
            Self::Direct { .. } => 8,
            Self::Constants { count, .. } => 4 * count,
        }
    }

    #[inline]
    fn alignment(&self) -> u32 {
        match self {
            Self::Direct { .. } => 8,
            _ => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerFilter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerAddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

/// 固定在布局中的 sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaticSamplerDesc {
    pub slot: u32,
    pub space: u32,
    pub filter: SamplerFilter,
    pub address_mode: SamplerAddressMode,
    /// 0 表示不开启各向异性过滤
    pub max_anisotropy: u32,
}

impl Default for StaticSamplerDesc {
    fn default() -> Self {
        Self {
            slot: 0,
            space: 0,
            filter: SamplerFilter::Linear,
            address_mode: SamplerAddressMode::Repeat,
            max_anisotropy: 0,
        }
    }
}

/// 一个命名的 binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedBindingSlot {
    /// 注册的顺序
    pub index: usize,
    pub slot: SlotType,
    /// 在 root data 中的字节偏移，build 之后才有意义
    pub offset: u32,
    pub size: u32,
}

pub struct PipelineResourceBinding {
    slots: IndexMap<String, NamedBindingSlot>,
    static_samplers: Vec<StaticSamplerDesc>,
    /// build 之后才有值
    layout: Option<BindingLayoutHandle>,
    root_data_size: u32,
    label: String,

    device: Option<DeviceHandle>,
}

// new & init
impl PipelineResourceBinding {
    pub fn new(label: impl AsRef<str>) -> Self {
        Self {
            slots: IndexMap::new(),
            static_samplers: Vec::new(),
            layout: None,
            root_data_size: 0,
            label: label.as_ref().to_string(),
            device: None,
        }
    }

    pub fn add_table(&mut self, kind: BindingKind, count: u32, base_slot: u32, space: u32, name: &str) -> usize {
        self.add(
            name,
            SlotType::Table {
                kind,
                count,
                base_slot,
                space,
            },
        )
    }

    pub fn add_direct_binding(&mut self, kind: BindingKind, slot: u32, space: u32, name: &str) -> usize {
        assert!(kind != BindingKind::Sampler, "sampler '{}' can not be bound directly", name);
        self.add(name, SlotType::Direct { kind, slot, space })
    }

    pub fn add_constants(&mut self, count: u32, slot: u32, space: u32, name: &str) -> usize {
        assert!(count > 0, "constants '{}' need at least one value", name);
        self.add(name, SlotType::Constants { count, slot, space })
    }

    pub fn add_static_sampler(&mut self, desc: StaticSamplerDesc) {
        self.assert_not_built();
        self.static_samplers.push(desc);
    }

    fn add(&mut self, name: &str, slot: SlotType) -> usize {
        self.assert_not_built();
        assert!(!self.slots.contains_key(name), "binding '{}' registered twice in '{}'", name, self.label);

        let index = self.slots.len();
        self.slots.insert(
            name.to_string(),
            NamedBindingSlot {
                index,
                slot,
                offset: 0,
                size: slot.size(),
            },
        );
        index
    }

    #[inline]
    fn assert_not_built(&self) {
        assert!(self.layout.is_none(), "binding layout '{}' is already built", self.label);
    }

    /// 计算每个 binding 的偏移，然后创建后端的布局
    ///
    /// table 类型的 binding 需要传入描述符堆
    pub fn build(&mut self, device: &DeviceHandle, heap: Option<DescriptorHeapHandle>) -> GfxResult<()> {
        self.assert_not_built();

        let mut offset = 0;
        for slot in self.slots.values_mut() {
            offset = align_up_u32(offset, slot.slot.alignment());
            slot.offset = offset;
            offset += slot.size;
        }
        self.root_data_size = offset;

        let has_table = self.slots.values().any(|slot| matches!(slot.slot, SlotType::Table { .. }));
        debug_assert!(!has_table || heap.is_some(), "layout '{}' has tables but no descriptor heap", self.label);

        let layout = device.backend().create_binding_layout(&BindingLayoutDesc {
            label: self.label.clone(),
            heap,
            push_constant_size: self.root_data_size,
            static_samplers: self.static_samplers.clone(),
        })?;
        log::info!(
            "binding layout '{}' built: {} bindings, {} bytes of root data",
            self.label,
            self.slots.len(),
            self.root_data_size
        );

        self.layout = Some(layout);
        self.device = Some(device.clone());
        Ok(())
    }
}

// getters
impl PipelineResourceBinding {
    /// 只有 build 之后才能调用
    #[inline]
    pub fn layout(&self) -> BindingLayoutHandle {
        match self.layout {
            Some(layout) => layout,
            None => panic!("binding layout '{}' is not built", self.label),
        }
    }
    #[inline]
    pub fn is_built(&self) -> bool {
        self.layout.is_some()
    }
    #[inline]
    pub fn root_data_size(&self) -> u32 {
        self.root_data_size
    }
    #[inline]
    pub fn slot(&self, name: &str) -> Option<&NamedBindingSlot> {
        self.slots.get(name)
    }
    #[inline]
    pub fn slots(&self) -> impl Iterator<Item = (&str, &NamedBindingSlot)> {
        self.slots.iter().map(|(name, slot)| (name.as_str(), slot))
    }
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    fn expect_slot(&self, name: &str) -> &NamedBindingSlot {
        match self.slots.get(name) {
            Some(slot) => slot,
            None => panic!("unknown binding '{}' in layout '{}'", name, self.label),
        }
    }
}

// 录制
impl PipelineResourceBinding {
    /// 绑定描述符表中的一段，gpu_handle 是起始的 DescriptorAllocation
    pub fn bind_table(&self, cmd: &mut CommandRecorder, gpu_handle: u64, name: &str) {
        let slot = self.expect_slot(name);
        assert!(
            matches!(slot.slot, SlotType::Table { .. }),
            "binding '{}' is {:?}, not a table",
            name,
            slot.slot
        );
        cmd.set_binding(self.layout(), slot.offset, BindingValue::Table(gpu_handle));
    }

    /// 绑定 buffer 或者加速结构的设备地址
    pub fn bind_direct(&self, cmd: &mut CommandRecorder, address: u64, name: &str) {
        let slot = self.expect_slot(name);
        assert!(
            matches!(slot.slot, SlotType::Direct { .. }),
            "binding '{}' is {:?}, not a direct binding",
            name,
            slot.slot
        );
        cmd.set_binding(self.layout(), slot.offset, BindingValue::Direct(address));
    }

    pub fn bind_constants(&self, cmd: &mut CommandRecorder, values: &[u32], name: &str) {
        let slot = self.expect_slot(name);
        let SlotType::Constants { count, .. } = slot.slot else {
            panic!("binding '{}' is {:?}, not constants", name, slot.slot);
        };
        assert!(values.len() as u32 <= count, "binding '{}' holds {} constants, got {}", name, count, values.len());
        cmd.set_binding(self.layout(), slot.offset, BindingValue::Constants(values.to_vec()));
    }
}

impl Drop for PipelineResourceBinding {
    fn drop(&mut self) {
        if let (Some(layout), Some(device)) = (self.layout, &self.device) {
            device.backend().destroy_binding_layout(layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        backend::{mock::MockBackend, types::QueueKind},
        commands::{command_queue::ExecutionQueue, gfx_command::GfxCommand},
        descriptors::descriptor_table::DescriptorTable,
        error::GfxError,
    };

    fn device() -> DeviceHandle {
        DeviceHandle::new(Rc::new(MockBackend::new()))
    }

    fn heap(device: &DeviceHandle) -> DescriptorTable {
        DescriptorTable::new(device.clone(), 4, "heap").unwrap()
    }

    fn renderer_layout() -> PipelineResourceBinding {
        let mut binding = PipelineResourceBinding::new("rt");
        binding.add_table(BindingKind::UnorderedAccess, 1, 0, 0, "outputTexture");
        binding.add_direct_binding(BindingKind::ShaderResource, 0, 0, "sceneBVH");
        binding.add_direct_binding(BindingKind::ConstantBuffer, 0, 0, "camera");
        binding.add_table(BindingKind::ShaderResource, 1, 1, 0, "materials");
        binding.add_constants(2, 1, 0, "renderData");
        binding
    }

    #[test]
    fn test_offsets() {
        let device = device();
        let table = heap(&device);
        let mut binding = renderer_layout();
        binding.build(&device, Some(table.heap())).unwrap();

        let offsets = binding.slots().map(|(name, slot)| (name, slot.offset)).collect::<Vec<_>>();
        assert_eq!(
            offsets,
            vec![("outputTexture", 0), ("sceneBVH", 8), ("camera", 16), ("materials", 24), ("renderData", 28)]
        );
        assert_eq!(binding.root_data_size(), 36);
        assert_eq!(binding.slot("materials").unwrap().index, 3);
    }

    #[test]
    fn test_over_limit_rejected() {
        let device = DeviceHandle::new(Rc::new(MockBackend::new().with_max_push_constant_size(16)));
        let table = heap(&device);
        let mut binding = renderer_layout();
        assert!(matches!(
            binding.build(&device, Some(table.heap())),
            Err(GfxError::BindingLayoutTooLarge {
                required: 36,
                limit: 16,
                ..
            })
        ));
        assert!(!binding.is_built());
    }

    #[test]
    fn test_bind_by_name_records_offsets() {
        let device = device();
        let queue = ExecutionQueue::new(device.clone(), QueueKind::Graphics, "gfx").unwrap();
        let table = heap(&device);
        let mut binding = renderer_layout();
        binding.build(&device, Some(table.heap())).unwrap();

        let mut cmd = queue.new_recorder("bind").unwrap();
        binding.bind_direct(&mut cmd, 0xBEEF, "sceneBVH");
        binding.bind_constants(&mut cmd, &[7, 1], "renderData");
        assert_eq!(
            cmd.commands(),
            &[
                GfxCommand::SetBinding {
                    layout: binding.layout(),
                    offset: 8,
                    value: BindingValue::Direct(0xBEEF),
                },
                GfxCommand::SetBinding {
                    layout: binding.layout(),
                    offset: 28,
                    value: BindingValue::Constants(vec![7, 1]),
                },
            ]
        );
    }

    #[test]
    #[should_panic(expected = "unknown binding")]
    fn test_unknown_name_panics() {
        let device = device();
        let queue = ExecutionQueue::new(device.clone(), QueueKind::Graphics, "gfx").unwrap();
        let table = heap(&device);
        let mut binding = renderer_layout();
        binding.build(&device, Some(table.heap())).unwrap();
        let mut cmd = queue.new_recorder("bind").unwrap();
        binding.bind_table(&mut cmd, 0, "outputTex");
    }

    #[test]
    #[should_panic(expected = "not a table")]
    fn test_kind_mismatch_panics() {
        let device = device();
        let queue = ExecutionQueue::new(device.clone(), QueueKind::Graphics, "gfx").unwrap();
        let table = heap(&device);
        let mut binding = renderer_layout();
        binding.build(&device, Some(table.heap())).unwrap();
        let mut cmd = queue.new_recorder("bind").unwrap();
        binding.bind_table(&mut cmd, 0, "camera");
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_name_panics() {
        let mut binding = PipelineResourceBinding::new("dup");
        binding.add_direct_binding(BindingKind::ConstantBuffer, 0, 0, "camera");
        binding.add_direct_binding(BindingKind::ConstantBuffer, 1, 0, "camera");
    }

    #[test]
    #[should_panic(expected = "already built")]
    fn test_add_after_build_panics() {
        let device = device();
        let mut binding = PipelineResourceBinding::new("late");
        binding.add_constants(1, 0, 0, "a");
        binding.build(&device, None).unwrap();
        binding.add_constants(1, 1, 0, "b");
    }
}

use slotmap::new_key_type;

// 后端对象的 Handle
//
// 核心层只持有这些 key，真正的对象存放在后端的 SlotMap 中
new_key_type! {
    /// GPU Buffer
    pub struct BufferHandle;
    /// GPU Texture
    pub struct TextureHandle;
    /// 可绑定 view 的描述符堆
    pub struct DescriptorHeapHandle;
    /// 设备队列
    pub struct QueueHandle;
    /// 单调递增的 timeline，Fence 的设备侧对象
    pub struct TimelineHandle;
    /// 命令的存储，对应 command pool + command buffer
    pub struct CommandStorageHandle;
    /// 加速结构
    pub struct AccelHandle;
    /// 资源绑定布局
    pub struct BindingLayoutHandle;
    /// 光追管线
    pub struct PipelineHandle;
}

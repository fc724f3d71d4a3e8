/// 顶点布局：position | normal | uv
///
/// BLAS 只读取 position，hit shader 通过 hit group record 中的地址读取完整的顶点
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: glam::Vec3,
    pub normal: glam::Vec3,
    pub tex_coord: glam::Vec2,
}

impl Vertex {
    pub const STRIDE: u64 = std::mem::size_of::<Self>() as u64;

    #[inline]
    pub const fn new(position: glam::Vec3, normal: glam::Vec3, tex_coord: glam::Vec2) -> Self {
        Self {
            position,
            normal,
            tex_coord,
        }
    }
}

/// 加载器输出的一个 mesh，CPU 侧的数据
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    /// 该 mesh 在 TLAS 中的变换
    pub transform: glam::Mat4,
    /// 在所属 model 的材质列表中的位置，小于 0 表示没有材质
    pub material_index: i32,
}

impl MeshData {
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// 返回不合法的原因
    pub fn validate(&self, material_count: usize) -> Result<(), String> {
        if self.vertices.is_empty() {
            return Err("mesh has no vertices".to_string());
        }
        if self.indices.is_empty() || self.indices.len() % 3 != 0 {
            return Err(format!("index count {} is not a positive multiple of 3", self.indices.len()));
        }
        if let Some(index) = self.indices.iter().find(|index| **index as usize >= self.vertices.len()) {
            return Err(format!("index {} out of range, {} vertices", index, self.vertices.len()));
        }
        if self.material_index >= 0 && self.material_index as usize >= material_count {
            return Err(format!("material {} out of range, {} materials", self.material_index, material_count));
        }
        Ok(())
    }
}

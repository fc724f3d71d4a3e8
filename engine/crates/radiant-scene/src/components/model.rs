use std::path::Path;

use crate::{
    components::{material::MaterialData, mesh::MeshData, texture::TextureData},
    error::{SceneError, SceneResult},
};

/// 加载器的输出：一个 model 中的所有 mesh、材质以及贴图
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelData {
    pub name: String,
    pub meshes: Vec<MeshData>,
    pub materials: Vec<MaterialData>,
    /// 材质中的 texture index 指向这里
    pub textures: Vec<TextureData>,
}

impl ModelData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 检查所有的 mesh、贴图以及材质，返回第一个错误
    pub fn validate(&self) -> SceneResult<()> {
        for mesh in &self.meshes {
            mesh.validate(self.materials.len()).map_err(|reason| SceneError::InvalidMesh {
                model: self.name.clone(),
                mesh: mesh.name.clone(),
                reason,
            })?;
        }
        for texture in &self.textures {
            texture.validate().map_err(|reason| SceneError::InvalidTexture {
                model: self.name.clone(),
                texture: texture.name.clone(),
                reason,
            })?;
        }
        let texture_count = self.textures.len();
        for (material_index, material) in self.materials.iter().enumerate() {
            let out_of_range = |index: &i32| *index >= 0 && *index as usize >= texture_count;
            if let Some(index) = material.texture_indices().into_iter().find(out_of_range) {
                return Err(SceneError::InvalidMaterial {
                    model: self.name.clone(),
                    material: material_index,
                    reason: format!("texture {} out of range, {} textures", index, texture_count),
                });
            }
        }
        Ok(())
    }
}

/// 模型文件的解析在核心之外，场景只依赖这个接口
pub trait ModelLoader {
    /// 不支持的格式返回 `SceneError::UnsupportedFormat`
    fn load(&self, path: &Path) -> SceneResult<ModelData>;
}

/// GPU 上的材质，与 shader 中 structured buffer 的元素布局一致
///
/// 小于 0 的 texture index 表示没有该贴图。
/// 加载器输出的 index 是 model 内的贴图序号，加载之后是描述符表中的位置
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialData {
    pub albedo_factor: glam::Vec3,
    pub albedo_index: i32,
    pub metallic: f32,
    pub roughness: f32,
    pub metallic_roughness_index: i32,
    pub normal_index: i32,
    pub emissive_index: i32,
    pub _pad: i32,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            albedo_factor: glam::Vec3::ONE,
            albedo_index: -1,
            metallic: 1.0,
            roughness: 1.0,
            metallic_roughness_index: -1,
            normal_index: -1,
            emissive_index: -1,
            _pad: -1,
        }
    }
}

impl MaterialData {
    /// 没有贴图的纯色材质
    pub fn from_color(albedo: glam::Vec3, metallic: f32, roughness: f32) -> Self {
        Self {
            albedo_factor: albedo,
            metallic,
            roughness,
            ..Default::default()
        }
    }

    #[inline]
    pub fn texture_indices(&self) -> [i32; 4] {
        [self.albedo_index, self.metallic_roughness_index, self.normal_index, self.emissive_index]
    }

    /// 把 model 内的贴图序号替换为 slots 中对应的描述符位置，没有对应的贴图时为 -1
    pub fn with_texture_slots(mut self, slots: &[u32]) -> Self {
        for index in [
            &mut self.albedo_index,
            &mut self.metallic_roughness_index,
            &mut self.normal_index,
            &mut self.emissive_index,
        ] {
            *index = match usize::try_from(*index).ok().and_then(|i| slots.get(i)) {
                Some(slot) => *slot as i32,
                None => -1,
            };
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(std::mem::size_of::<MaterialData>(), 40);
        assert_eq!(std::mem::offset_of!(MaterialData, albedo_index), 12);
        assert_eq!(std::mem::offset_of!(MaterialData, emissive_index), 32);
    }

    #[test]
    fn test_default_has_no_textures() {
        let material = MaterialData::default();
        assert_eq!(material.albedo_factor, glam::Vec3::ONE);
        assert!(material.albedo_index < 0);
        assert!(material.normal_index < 0);
        assert!(material.emissive_index < 0);
    }

    #[test]
    fn test_texture_slots() {
        let material = MaterialData {
            albedo_index: 1,
            normal_index: 0,
            emissive_index: 5,
            ..Default::default()
        };
        let remapped = material.with_texture_slots(&[40, 17]);
        assert_eq!(remapped.texture_indices(), [17, -1, 40, -1]);
        assert_eq!(remapped.albedo_factor, material.albedo_factor);
    }
}

//! 程序生成的几何体，用于无模型文件的运行以及测试

pub mod cube;
pub mod triangle;

use crate::{
    components::{material::MaterialData, model::ModelData, texture::TextureData},
    shapes::{cube::Cube, triangle::Triangle},
};

/// 一个地面，以及排成一行的 cube_count 个立方体
///
/// 材质：0 地面，使用棋盘格贴图；1 和 2 交替用于立方体；最后一个立方体没有材质
pub fn demo_model(name: impl Into<String>, cube_count: usize) -> ModelData {
    let mut model = ModelData::new(name);
    model.textures = vec![TextureData::checker("checker", 64, 8, [230, 230, 230, 255], [40, 40, 40, 255])];
    model.materials = vec![
        MaterialData {
            albedo_index: 0,
            ..MaterialData::from_color(glam::vec3(0.8, 0.8, 0.8), 0.0, 0.9)
        },
        MaterialData::from_color(glam::vec3(0.9, 0.2, 0.2), 0.0, 0.5),
        MaterialData::from_color(glam::vec3(0.9, 0.9, 0.9), 1.0, 0.1),
    ];

    let ground = glam::Mat4::from_scale_rotation_translation(
        glam::vec3(20.0, 20.0, 1.0),
        glam::Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2),
        glam::vec3(0.0, -1.0, 0.0),
    );
    model.meshes.push(Triangle::mesh_data("ground", ground, 0));

    for i in 0..cube_count {
        let x = (i as f32 - (cube_count as f32 - 1.0) * 0.5) * 3.0;
        let material_index = if i + 1 == cube_count && cube_count > 1 { -1 } else { 1 + (i % 2) as i32 };
        model.meshes.push(Cube::mesh_data(
            format!("cube-{}", i),
            glam::Mat4::from_translation(glam::vec3(x, 0.0, 0.0)),
            material_index,
        ));
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_model_is_valid() {
        let model = demo_model("demo", 4);
        assert_eq!(model.meshes.len(), 5);
        assert!(model.validate().is_ok());
        assert_eq!(model.meshes[4].material_index, -1);
        assert_eq!(model.materials[0].albedo_index, 0);
        assert_eq!(model.textures.len(), 1);
    }
}

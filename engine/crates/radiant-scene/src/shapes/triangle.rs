use crate::components::mesh::{MeshData, Vertex};

/// 坐标系：RightHand, X-Right, Y-Up
///
/// 位于 XY 平面上的正立三角形，法线 +Z
///
/// 三角形绕序: CCW
///
/// ```text
///          y^
///           |
///           C
///          /|\
///         / | \
///        /  |  \
///       /   |   \
///      /    |    \
///     /     |     \
///    A------+------B---->x
///           |
/// ```
pub struct Triangle;

impl Triangle {
    const VERTICES: [Vertex; 3] = [
        // A (左下)
        Vertex::new(glam::vec3(-1.0, -1.0, 0.0), glam::vec3(0.0, 0.0, 1.0), glam::vec2(0.0, 1.0)),
        // B (右下)
        Vertex::new(glam::vec3(1.0, -1.0, 0.0), glam::vec3(0.0, 0.0, 1.0), glam::vec2(1.0, 1.0)),
        // C (顶部)
        Vertex::new(glam::vec3(0.0, 1.0, 0.0), glam::vec3(0.0, 0.0, 1.0), glam::vec2(0.5, 0.0)),
    ];

    const INDICES: [u32; 3] = [0, 1, 2];

    pub fn mesh_data(name: impl Into<String>, transform: glam::Mat4, material_index: i32) -> MeshData {
        MeshData {
            name: name.into(),
            vertices: Self::VERTICES.to_vec(),
            indices: Self::INDICES.to_vec(),
            transform,
            material_index,
        }
    }
}

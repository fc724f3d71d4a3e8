use crate::components::mesh::{MeshData, Vertex};

/// 中心位于原点、边长为 2 的立方体
///
/// 每个面 4 个独立的顶点，法线朝外，绕序 CCW
pub struct Cube;

impl Cube {
    /// (法线, u 方向, v 方向)
    const FACES: [(glam::Vec3, glam::Vec3, glam::Vec3); 6] = [
        (glam::Vec3::X, glam::Vec3::NEG_Z, glam::Vec3::Y),
        (glam::Vec3::NEG_X, glam::Vec3::Z, glam::Vec3::Y),
        (glam::Vec3::Y, glam::Vec3::X, glam::Vec3::NEG_Z),
        (glam::Vec3::NEG_Y, glam::Vec3::X, glam::Vec3::Z),
        (glam::Vec3::Z, glam::Vec3::X, glam::Vec3::Y),
        (glam::Vec3::NEG_Z, glam::Vec3::NEG_X, glam::Vec3::Y),
    ];

    pub fn mesh_data(name: impl Into<String>, transform: glam::Mat4, material_index: i32) -> MeshData {
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);

        for (normal, u, v) in Self::FACES {
            let base = vertices.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                vertices.push(Vertex::new(
                    normal + u * su + v * sv,
                    normal,
                    glam::vec2((su + 1.0) * 0.5, (1.0 - sv) * 0.5),
                ));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        MeshData {
            name: name.into(),
            vertices,
            indices,
            transform,
            material_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_counts() {
        let cube = Cube::mesh_data("cube", glam::Mat4::IDENTITY, -1);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert!(cube.validate(0).is_ok());
    }

    #[test]
    fn test_faces_wind_outward() {
        let cube = Cube::mesh_data("cube", glam::Mat4::IDENTITY, -1);
        for triangle in cube.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|i| cube.vertices[triangle[i] as usize]);
            let face_normal = (b.position - a.position).cross(c.position - a.position);
            assert!(face_normal.dot(a.normal) > 0.0);
        }
    }
}

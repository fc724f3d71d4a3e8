/// 写入 constant buffer 的相机数据，raygen 用它生成主光线
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraData {
    pub position: glam::Vec3,
    /// 垂直方向的视角，单位是度
    pub fov: f32,
    pub forward: glam::Vec3,
    pub _pad0: u32,
    pub right: glam::Vec3,
    pub _pad1: u32,
    pub up: glam::Vec3,
    pub _pad2: u32,
}

pub struct Camera {
    pub position: glam::Vec3,

    pub euler_yaw_deg: f32,
    pub euler_pitch_deg: f32,

    pub fov_deg: f32,
}

impl Camera {
    /// 相机的上参考向量
    const CAMERA_UP: glam::Vec3 = glam::Vec3::new(0.0, 1.0, 0.0);

    /// YXZ 表示 Y(yaw)-X(Pitch)-Z(Roll) 的旋转顺序
    const CAMERA_EULER: glam::EulerRot = glam::EulerRot::YXZ;

    /// 没有旋转的情况下，相机看向的是 -Z
    const CAMERA_FORWARD: glam::Vec3 = glam::Vec3::new(0.0, 0.0, -1.0);

    const K_PITCH: f32 = 89.5;

    pub fn new(position: glam::Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    #[inline]
    fn rotation(&self) -> glam::Mat4 {
        glam::Mat4::from_euler(
            Self::CAMERA_EULER,
            self.euler_yaw_deg.to_radians(),
            self.euler_pitch_deg.to_radians(),
            0.0,
        )
    }

    pub fn camera_forward(&self) -> glam::Vec3 {
        self.rotation().transform_vector3(Self::CAMERA_FORWARD)
    }

    /// 与世界的 Up 正交，pitch 接近 90 度时仍然稳定
    pub fn camera_right(&self) -> glam::Vec3 {
        self.camera_forward().cross(Self::CAMERA_UP).normalize()
    }

    pub fn camera_up(&self) -> glam::Vec3 {
        self.camera_right().cross(self.camera_forward()).normalize()
    }

    pub fn get_view_matrix(&self) -> glam::Mat4 {
        glam::Mat4::look_to_rh(self.position, self.camera_forward(), Self::CAMERA_UP)
    }

    /// 朝相机看向的方向进行移动
    pub fn move_forward(&mut self, length: f32) {
        self.position += self.camera_forward() * length;
    }

    pub fn move_right(&mut self, length: f32) {
        self.position += self.camera_right() * length;
    }

    pub fn rotate_yaw(&mut self, angle: f32) {
        self.euler_yaw_deg = (self.euler_yaw_deg + angle).rem_euclid(360.0);
    }

    pub fn rotate_pitch(&mut self, angle: f32) {
        self.euler_pitch_deg = (self.euler_pitch_deg + angle).clamp(-Self::K_PITCH, Self::K_PITCH);
    }

    pub fn data(&self) -> CameraData {
        CameraData {
            position: self.position,
            fov: self.fov_deg,
            forward: self.camera_forward(),
            _pad0: 0,
            right: self.camera_right(),
            _pad1: 0,
            up: self.camera_up(),
            _pad2: 0,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: glam::Vec3::ZERO,
            euler_yaw_deg: 0.0,
            euler_pitch_deg: 0.0,
            fov_deg: 60.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_data_layout() {
        assert_eq!(std::mem::size_of::<CameraData>(), 64);
        assert_eq!(std::mem::offset_of!(CameraData, forward), 16);
    }

    #[test]
    fn test_default_basis() {
        let data = Camera::default().data();
        assert!(data.forward.abs_diff_eq(glam::Vec3::NEG_Z, 1e-6));
        assert!(data.right.abs_diff_eq(glam::Vec3::X, 1e-6));
        assert!(data.up.abs_diff_eq(glam::Vec3::Y, 1e-6));
        assert_eq!(data.fov, 60.0);
    }

    #[test]
    fn test_rotation_limits() {
        let mut camera = Camera::new(glam::vec3(0.0, 1.0, 5.0));
        camera.rotate_pitch(120.0);
        assert_eq!(camera.euler_pitch_deg, 89.5);
        camera.rotate_yaw(-90.0);
        assert_eq!(camera.euler_yaw_deg, 270.0);

        // yaw 270 度：看向 +X
        camera.euler_pitch_deg = 0.0;
        assert!(camera.camera_forward().abs_diff_eq(glam::Vec3::X, 1e-5));
        camera.move_forward(2.0);
        assert!(camera.position.abs_diff_eq(glam::vec3(2.0, 1.0, 5.0), 1e-5));
    }
}

//! Radiant 的渲染循环
//!
//! 每一帧：检查 shader 热重载，refit TLAS，写入当前槽位的相机数据，
//! 录制 trace rays、tonemap 以及到 back buffer 的复制，提交之后 present。

pub mod camera;
pub mod config;
pub mod output_texture;
pub mod renderer;

//! Radiant 的 GFX 层
//!
//! 管理 GPU 资源以及光追加速结构的生命周期：描述符的分配与回收、基于 Fence 的执行跟踪、
//! FRAMES_IN_FLIGHT 个帧槽位、BLAS/TLAS 的构建与 refit，以及通过 staging buffer 的上传。
//!
//! 核心不变量：GPU 可能还在读取的资源，不能被复用、释放或者重新绑定。
//!
//! 设备相关的部分都在 [`backend::GfxBackend`] 之后，核心层只持有 handle。
//! 所有对象通过 [`render_context::RenderContext`] 以引用的方式共享，只在一个线程中使用。

pub mod backend;
pub mod basic;
pub mod commands;
pub mod config;
pub mod descriptors;
pub mod error;
pub mod foundation;
pub mod pipelines;
pub mod raytracing;
pub mod render_context;
pub mod resources;
pub mod swapchain;
pub mod upload;

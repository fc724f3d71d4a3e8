//! Radiant 的场景
//!
//! 把加载器输出的 [`components::model::ModelData`] 转换为 GPU 上的数据：
//! - 每个 mesh 一个 BLAS，以及它的顶点和索引 buffer
//! - 所有 mesh 按照 model/mesh 的顺序组成一个 TLAS
//! - 所有材质组成一个 structured buffer，通过描述符表访问
//! - 每个 mesh 一个 hit group record，顺序与 TLAS 中的 instance 一致

pub mod components;
pub mod error;
pub mod scene;
pub mod shapes;

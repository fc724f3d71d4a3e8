pub mod binding_layout;
pub mod compute_pipeline;
pub mod rt_pipeline;
pub mod shader;
pub mod shader_table;

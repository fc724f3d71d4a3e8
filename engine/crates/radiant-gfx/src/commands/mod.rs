pub mod command_queue;
pub mod command_recorder;
pub mod fence;
pub mod frame_ring;
pub mod gfx_command;

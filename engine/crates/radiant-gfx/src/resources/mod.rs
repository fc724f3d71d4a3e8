pub mod allocator;
pub mod buffer;
pub mod handles;
pub mod per_frame_buffer;
pub mod release_queue;
pub mod texture;

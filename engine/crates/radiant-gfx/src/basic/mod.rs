pub mod align;
pub mod color;

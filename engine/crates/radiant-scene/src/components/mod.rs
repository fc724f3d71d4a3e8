pub mod material;
pub mod mesh;
pub mod model;
pub mod texture;

pub mod acceleration;
pub mod blas;
pub mod instance;
pub mod tlas;

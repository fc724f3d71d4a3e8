pub mod swap_surface;

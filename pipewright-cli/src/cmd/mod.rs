pub mod build;
pub mod cache;
pub mod config;
pub mod emit;
pub mod run;
pub mod shapes;
pub mod toolchain;
pub mod validate;

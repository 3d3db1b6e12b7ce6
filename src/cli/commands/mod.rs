pub mod animate;
pub mod config;
pub mod status;
pub mod submit;
pub mod sweep;
pub mod token;

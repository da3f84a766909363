pub mod camera;
pub mod cli;
pub mod config;
pub mod culling;
pub mod light;
pub mod renderer;
pub mod scene;

pub use renderer::{CameraMetrics, ForwardPipeline};

mod camera;
pub mod geometry;
mod renderer;
pub mod scene;
pub mod screen_block;
mod util;

pub use crate::renderer::{RenderProgress, RenderSettings, render};
pub use camera::Camera;
pub use scene::Scene;

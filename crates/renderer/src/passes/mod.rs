//! Render passes built on [`RenderPass`](crate::render_pass::RenderPass).

mod composite;
mod geometry;

pub use composite::CompositePass;
pub use geometry::GeometryPass;

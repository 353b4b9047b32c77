//! Platform layer for the lumen frame engine.
//!
//! - Window creation via winit
//! - Vulkan surface creation, owned by [`Surface`]
//! - [`FramebufferSource`], the renderer's view of the window size

mod window;

pub use window::{FramebufferSource, Surface, Window};

// Re-export winit types that hosts need to drive the event loop
pub use winit::event::{Event, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};

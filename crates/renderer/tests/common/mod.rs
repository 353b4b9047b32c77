#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use ash::vk::Handle;
use lumen_platform::FramebufferSource;
use lumen_renderer::{RenderResult, Renderer, RendererConfig};
use lumen_rhi::mock::MockDevice;

/// Window stand-in whose size tests change at will.
pub struct TestWindow(AtomicU64);

impl TestWindow {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        let window = Arc::new(Self(AtomicU64::new(0)));
        window.resize(width, height);
        window
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.0
            .store((u64::from(width) << 32) | u64::from(height), Ordering::Relaxed);
    }
}

impl FramebufferSource for TestWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        let packed = self.0.load(Ordering::Relaxed);
        ((packed >> 32) as u32, packed as u32)
    }
}

pub fn init_logging() {
    let _ = lumen_core::try_init_logging();
}

pub fn renderer_with(
    device: &Arc<MockDevice>,
    window: &Arc<TestWindow>,
    config: RendererConfig,
) -> RenderResult<Renderer> {
    init_logging();
    Renderer::new(
        device.clone(),
        vk::SurfaceKHR::from_raw(0xface),
        window.clone(),
        config,
    )
}

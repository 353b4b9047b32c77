mod common;

use std::sync::Arc;

use ash::vk;
use lumen_renderer::{PassContext, RenderResult, RendererConfig};
use lumen_rhi::mock::{MockDevice, MockObject};

use common::{TestWindow, renderer_with};

#[test]
fn test_ten_frames_cycle_through_two_slots() {
    let device = Arc::new(MockDevice::new());
    let window = TestWindow::new(800, 600);
    let mut renderer = renderer_with(&device, &window, RendererConfig::default()).unwrap();
    let frames_in_flight = renderer.frames_in_flight() as u64;

    let mut slots = Vec::new();
    for _ in 0..10 {
        let rendered = renderer
            .render_frame(&mut |ctx: &PassContext<'_>| -> RenderResult<()> {
                slots.push(ctx.frame_index());
                ctx.draw(3, 1, 0, 0);
                Ok(())
            })
            .unwrap();
        assert!(rendered);
    }
    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    assert_eq!(renderer.current_frame(), 0);
    assert_eq!(device.submissions().len(), 10);
    assert_eq!(device.presents().len(), 10);

    // Every wait that blocked covered the slot's previous submission.
    let waits = device.fence_waits();
    let blocked: Vec<_> = waits.iter().filter_map(|w| w.blocked_on.map(|s| (s, w.latest_submission))).collect();
    assert_eq!(blocked.len(), 8);
    for (serial, latest) in blocked {
        assert!(latest - serial <= frames_in_flight - 1, "waited on {serial} with {latest} submitted");
    }
    assert!(device.max_pending_fences() <= frames_in_flight as usize);
}

#[test]
fn test_three_frames_in_flight() {
    let device = Arc::new(MockDevice::new());
    let window = TestWindow::new(640, 480);
    let config = RendererConfig {
        frames_in_flight: 3,
        ..Default::default()
    };
    let mut renderer = renderer_with(&device, &window, config).unwrap();

    let mut slots = Vec::new();
    for _ in 0..7 {
        let frame = renderer.begin_render().unwrap().unwrap();
        slots.push(frame.frame_index());
        renderer.end_render(frame).unwrap();
    }
    assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(device.max_pending_fences(), 3);
    for wait in device.fence_waits() {
        if let Some(serial) = wait.blocked_on {
            assert!(wait.latest_submission - serial <= 2);
        }
    }
}

#[test]
fn test_out_of_date_acquire_rebuilds_swapchain_resources() {
    let device = Arc::new(MockDevice::new());
    let window = TestWindow::new(800, 600);
    let mut renderer = renderer_with(&device, &window, RendererConfig::default()).unwrap();

    for _ in 0..3 {
        assert!(renderer.render_frame(&mut |_: &PassContext<'_>| -> RenderResult<()> { Ok(()) }).unwrap());
    }
    let slot_before = renderer.current_frame();
    let old_views: Vec<_> = renderer.swapchain().image_views().collect();
    let old_framebuffers: Vec<_> = renderer.render_pass().framebuffers().collect();
    let old_depth = renderer.depth_buffer().image_view();
    let old_swapchain = renderer.swapchain().handle();

    window.resize(1280, 720);
    device.push_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
    assert!(renderer.begin_render().unwrap().is_none());

    assert_eq!(renderer.current_frame(), slot_before);
    assert_eq!(renderer.swapchain_generation(), 1);
    assert_eq!(renderer.swapchain_extent(), vk::Extent2D { width: 1280, height: 720 });

    let new_views: Vec<_> = renderer.swapchain().image_views().collect();
    let new_framebuffers: Vec<_> = renderer.render_pass().framebuffers().collect();
    assert!(new_views.iter().all(|v| !old_views.contains(v)));
    assert!(new_framebuffers.iter().all(|f| !old_framebuffers.contains(f)));
    assert_eq!(new_framebuffers.len(), new_views.len());
    assert_ne!(renderer.depth_buffer().image_view(), old_depth);
    assert_eq!(renderer.depth_buffer().extent().width, 1280);
    assert_eq!(device.swapchains().last().unwrap().old_swapchain, old_swapchain);

    // The old generation is gone, the render pass object is not.
    assert_eq!(device.live(MockObject::Swapchain), 1);
    assert_eq!(device.live(MockObject::Framebuffer), new_framebuffers.len());
    assert_eq!(device.created(MockObject::RenderPass), 1);

    let frame = renderer.begin_render().unwrap().unwrap();
    assert_eq!(frame.frame_index(), slot_before);
    assert_eq!(frame.extent().height, 720);
    renderer.end_render(frame).unwrap();
    assert_eq!(renderer.current_frame(), (slot_before + 1) % 2);
}

#[test]
fn test_out_of_date_present_rebuilds_after_advancing() {
    let device = Arc::new(MockDevice::new());
    let window = TestWindow::new(800, 600);
    let mut renderer = renderer_with(&device, &window, RendererConfig::default()).unwrap();

    device.push_present_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
    assert!(renderer.render_frame(&mut |_: &PassContext<'_>| -> RenderResult<()> { Ok(()) }).unwrap());
    assert_eq!(renderer.current_frame(), 1);
    assert_eq!(renderer.swapchain_generation(), 1);

    assert!(renderer.render_frame(&mut |_: &PassContext<'_>| -> RenderResult<()> { Ok(()) }).unwrap());
    assert_eq!(renderer.current_frame(), 0);
}

#[test]
fn test_minimised_window_postpones_frames() {
    let device = Arc::new(MockDevice::new());
    let window = TestWindow::new(800, 600);
    let mut renderer = renderer_with(&device, &window, RendererConfig::default()).unwrap();

    window.resize(0, 0);
    device.push_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
    assert!(renderer.begin_render().unwrap().is_none());
    for _ in 0..3 {
        assert!(renderer.begin_render().unwrap().is_none());
    }
    assert_eq!(renderer.swapchain_generation(), 0);
    assert_eq!(renderer.current_frame(), 0);
    assert!(device.submissions().is_empty());

    window.resize(400, 300);
    let frame = renderer.begin_render().unwrap().unwrap();
    assert_eq!(renderer.swapchain_generation(), 1);
    assert_eq!(frame.extent(), vk::Extent2D { width: 400, height: 300 });
    renderer.end_render(frame).unwrap();
}

#[test]
fn test_failing_content_still_presents_the_acquired_image() {
    let device = Arc::new(MockDevice::new());
    let window = TestWindow::new(800, 600);
    let mut renderer = renderer_with(&device, &window, RendererConfig::default()).unwrap();

    for _ in 0..3 {
        let result = renderer.render_frame(&mut |ctx: &PassContext<'_>| -> RenderResult<()> {
            ctx.draw(3, 1, 0, 0);
            Err(lumen_renderer::RenderError::Config("scene not ready".to_string()))
        });
        assert!(matches!(result, Err(lumen_renderer::RenderError::Config(_))));
    }
    assert!(renderer.render_frame(&mut |_: &PassContext<'_>| -> RenderResult<()> { Ok(()) }).unwrap());

    // Every acquired image went back to the presentation engine, in order.
    let presents = device.presents();
    let indices: Vec<u32> = presents.iter().map(|p| p.image_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 0]);
    assert!(presents.iter().all(|p| p.result == vk::Result::SUCCESS));
    assert_eq!(device.submissions().len(), 4);
    assert_eq!(renderer.current_frame(), 0);

    // No slot is left holding an unconsumed acquire signal.
    for submit in device.submissions() {
        for semaphore in &submit.wait_semaphores {
            assert!(!device.semaphore_signaled(*semaphore));
        }
    }
}

#[test]
fn test_invalid_configs_are_rejected() {
    let device = Arc::new(MockDevice::new());
    let window = TestWindow::new(800, 600);
    let config = RendererConfig {
        frames_in_flight: 0,
        ..Default::default()
    };
    assert!(matches!(
        renderer_with(&device, &window, config),
        Err(lumen_renderer::RenderError::Config(_))
    ));
    assert_eq!(device.created(MockObject::Swapchain), 0);
}

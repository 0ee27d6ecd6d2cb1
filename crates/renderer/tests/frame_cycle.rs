//! End-to-end frame cycle tests against the mock device.

use std::sync::Arc;

use framechain_renderer::{PresentOutcome, ResizeCoordinator, SwapchainDependents};
use framechain_rhi::mock::{MockCall, MockDevice};
use framechain_rhi::physical_device::QueueFamilyIndices;
use framechain_rhi::swapchain::{PREFERRED_SURFACE_FORMAT, SwapchainManager, SwapchainSelectors};
use framechain_rhi::{RhiResult, vk};

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

fn coordinator(device: &Arc<MockDevice>, frames_in_flight: usize) -> ResizeCoordinator<MockDevice> {
    ResizeCoordinator::new(
        Arc::clone(device),
        SwapchainSelectors::default(),
        extent(800, 600),
        frames_in_flight,
    )
    .unwrap()
}

/// Stand-in for per-image framebuffers.
#[derive(Default)]
struct Framebuffers {
    views: Vec<vk::ImageView>,
    rebuilds: usize,
}

impl SwapchainDependents<MockDevice> for Framebuffers {
    fn on_swapchain_recreated(&mut self, swapchain: &SwapchainManager<MockDevice>) -> RhiResult<()> {
        self.views = swapchain.image_chain().iter().map(|i| i.view()).collect();
        self.rebuilds += 1;
        Ok(())
    }
}

#[test]
fn slot_sequence_is_independent_of_image_count() {
    let device = Arc::new(MockDevice::new());
    let mut coordinator = coordinator(&device, 2);
    let mut framebuffers = Framebuffers::default();

    let mut slots = Vec::new();
    for _ in 0..7 {
        let frame = coordinator.begin_frame(&mut framebuffers).unwrap().unwrap();
        slots.push(frame.slot);
        let view = framebuffers.views[frame.image_index as usize];
        assert_ne!(view, vk::ImageView::null());
        coordinator.end_frame(&[], &mut framebuffers).unwrap();
    }

    assert_eq!(coordinator.image_chain().len(), 3);
    assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0]);
}

#[test]
fn recreating_twice_yields_equivalent_chain() {
    let device = Arc::new(MockDevice::new());
    let mut coordinator = coordinator(&device, 2);
    let mut framebuffers = Framebuffers::default();
    coordinator.swapchain_handle().unwrap();

    coordinator.resize(extent(800, 600), &mut framebuffers).unwrap();
    let first_views = framebuffers.views.clone();
    let first_format = coordinator.surface_format();

    coordinator.resize(extent(800, 600), &mut framebuffers).unwrap();
    assert_eq!(framebuffers.views.len(), first_views.len());
    assert_eq!(coordinator.surface_format(), first_format);
    assert_eq!(coordinator.surface_format(), Some(PREFERRED_SURFACE_FORMAT));
    assert_ne!(framebuffers.views, first_views);
    assert_eq!(coordinator.recreations(), 2);
}

#[test]
fn resize_keeps_slot_index() {
    let device = Arc::new(MockDevice::new());
    let mut coordinator = coordinator(&device, 3);

    for _ in 0..2 {
        coordinator.begin_frame(&mut ()).unwrap().unwrap();
        coordinator.end_frame(&[], &mut ()).unwrap();
    }
    assert_eq!(coordinator.frame_slot(), 2);

    device.set_current_extent(extent(1024, 768));
    coordinator.request_resize(extent(1024, 768));

    let frame = coordinator.begin_frame(&mut ()).unwrap().unwrap();
    assert_eq!(frame.slot, 2);
    assert_eq!(coordinator.extent(), Some(extent(1024, 768)));
    coordinator.end_frame(&[], &mut ()).unwrap();
    assert_eq!(coordinator.frame_slot(), 0);
}

#[test]
fn staleness_never_reaches_the_caller() {
    let device = Arc::new(MockDevice::new());
    let mut coordinator = coordinator(&device, 2);
    let mut framebuffers = Framebuffers::default();

    let mut presented = 0;
    for cycle in 0..30 {
        match cycle % 10 {
            3 => device.push_acquire_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            6 => device.push_present_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            8 => device.push_present_result(Ok(true)),
            _ => {}
        }

        let Some(_frame) = coordinator.begin_frame(&mut framebuffers).unwrap() else {
            continue;
        };
        if coordinator.end_frame(&[], &mut framebuffers).unwrap() == PresentOutcome::Presented {
            presented += 1;
        }
    }

    // Three stale events per ten cycles, one of which skips the frame
    assert_eq!(coordinator.recreations(), 9);
    assert_eq!(presented, 21);
    assert_eq!(framebuffers.rebuilds, 10);

    // Nothing leaked across recreations
    assert_eq!(device.live_swapchains(), 1);
    assert_eq!(device.live_image_views(), 3);
    assert_eq!(device.live_semaphores(), 4);
    assert_eq!(device.live_fences(), 2);
}

#[test]
fn split_queue_families_use_concurrent_images() {
    let device = Arc::new(MockDevice::new().with_queue_families(QueueFamilyIndices {
        graphics_family: 2,
        present_family: 5,
    }));
    let mut coordinator = coordinator(&device, 2);
    coordinator.swapchain_handle().unwrap();

    let desc = device.swapchain_descs()[0];
    assert_eq!(desc.sharing.mode(), vk::SharingMode::CONCURRENT);
    assert_eq!(desc.sharing.queue_family_indices(), &[2, 5]);
}

#[test]
fn recreation_hands_over_the_previous_swapchain() {
    let device = Arc::new(MockDevice::new());
    let mut coordinator = coordinator(&device, 2);
    let first = coordinator.swapchain_handle().unwrap();
    device.clear_calls();

    coordinator.resize(extent(800, 600), &mut ()).unwrap();
    let second = coordinator.swapchain_handle().unwrap();

    let calls = device.calls();
    let created = calls
        .iter()
        .position(|c| {
            *c == MockCall::CreateSwapchain {
                swapchain: second,
                old_swapchain: first,
            }
        })
        .unwrap();
    let destroyed = calls
        .iter()
        .position(|c| *c == MockCall::DestroySwapchain(first))
        .unwrap();
    assert!(created < destroyed);
}

#[test]
fn resize_during_a_frame_waits_for_end_frame() {
    let device = Arc::new(MockDevice::new());
    let mut coordinator = coordinator(&device, 2);
    let mut framebuffers = Framebuffers::default();

    let frame = coordinator.begin_frame(&mut framebuffers).unwrap().unwrap();
    let first = coordinator.swapchain_handle().unwrap();
    coordinator.resize(extent(800, 600), &mut framebuffers).unwrap();

    // Nothing replaced under the acquired image
    assert!(coordinator.is_resize_pending());
    assert_eq!(coordinator.recreations(), 0);
    assert_eq!(coordinator.swapchain_handle().unwrap(), first);

    device.clear_calls();
    let outcome = coordinator.end_frame(&[], &mut framebuffers).unwrap();
    assert_eq!(outcome, PresentOutcome::Presented);
    assert!(device.calls().iter().any(|c| matches!(
        c,
        MockCall::Present { swapchain, image_index, .. }
            if *swapchain == first && *image_index == frame.image_index
    )));
    assert!(!coordinator.is_resize_pending());
    assert_eq!(coordinator.recreations(), 1);
    assert_eq!(framebuffers.rebuilds, 2);

    let mut slots = Vec::new();
    for _ in 0..5 {
        let frame = coordinator.begin_frame(&mut framebuffers).unwrap().unwrap();
        slots.push(frame.slot);
        coordinator.end_frame(&[], &mut framebuffers).unwrap();
    }
    assert_eq!(slots, vec![1, 0, 1, 0, 1]);
}

#[test]
fn failed_submit_does_not_wedge_the_slot() {
    let device = Arc::new(MockDevice::new());
    let mut coordinator = coordinator(&device, 2);

    coordinator.begin_frame(&mut ()).unwrap().unwrap();
    device.fail_next_submit(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    assert!(coordinator.end_frame(&[], &mut ()).is_err());
    assert!(coordinator.is_resize_pending());
    assert!(coordinator.frames().semaphores_stale());

    coordinator.resize(extent(800, 600), &mut ()).unwrap();
    assert!(!coordinator.frames().semaphores_stale());
    assert_eq!(coordinator.recreations(), 1);

    let mut slots = Vec::new();
    for _ in 0..3 {
        let frame = coordinator.begin_frame(&mut ()).unwrap().unwrap();
        slots.push(frame.slot);
        coordinator.end_frame(&[], &mut ()).unwrap();
    }
    assert_eq!(slots, vec![0, 1, 0]);
    assert_eq!(device.live_fences(), 2);
}

#[test]
fn failed_submit_recovers_on_next_frame() {
    let device = Arc::new(MockDevice::new());
    let mut coordinator = coordinator(&device, 1);

    coordinator.begin_frame(&mut ()).unwrap().unwrap();
    device.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);
    let err = coordinator.end_frame(&[], &mut ()).unwrap_err();
    assert!(err.is_fatal());

    // The next frame quiesces and renews the semaphores first
    device.clear_calls();
    let frame = coordinator.begin_frame(&mut ()).unwrap().unwrap();
    assert_eq!(frame.slot, 0);
    assert_eq!(coordinator.recreations(), 1);
    assert!(!coordinator.frames().semaphores_stale());
    assert!(matches!(device.calls()[0], MockCall::QueueWaitIdle(_)));
    coordinator.end_frame(&[], &mut ()).unwrap();
}

#[test]
fn shutdown_releases_everything() {
    let device = Arc::new(MockDevice::new());
    {
        let mut coordinator = coordinator(&device, 2);
        coordinator.begin_frame(&mut ()).unwrap().unwrap();
        coordinator.end_frame(&[], &mut ()).unwrap();
        coordinator.wait_idle().unwrap();
    }

    assert_eq!(device.live_swapchains(), 0);
    assert_eq!(device.live_image_views(), 0);
    assert_eq!(device.live_semaphores(), 0);
    assert_eq!(device.live_fences(), 0);
}

//! framechain demo.
//!
//! Opens a window and clears every swapchain image to a cycling color,
//! exercising acquisition, submission, presentation and recreation on
//! resize. Settings are read from `framechain.toml` if present.

mod clear;

use std::sync::Arc;

use anyhow::{Context, Result};
use framechain_core::config::{DEFAULT_CONFIG_FILE, PresentConfig};
use framechain_core::FrameCounter;
use framechain_platform::{Surface, Window, required_instance_extensions};
use framechain_renderer::ResizeCoordinator;
use framechain_rhi::device::VulkanDevice;
use framechain_rhi::instance::Instance;
use framechain_rhi::physical_device::select_physical_device;
use framechain_rhi::{RhiError, RhiResult, vk};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use crate::clear::{ClearCommands, clear_color};

/// Everything tied to the Vulkan instance.
///
/// Field order is drop order: swapchain and sync objects, command pool,
/// logical device, surface, instance.
struct Presenter {
    coordinator: ResizeCoordinator<VulkanDevice>,
    commands: ClearCommands,
    _device: Arc<VulkanDevice>,
    _surface: Surface,
    _instance: Instance,
}

impl Presenter {
    fn new(window: &Window, config: &PresentConfig) -> Result<Self> {
        let extensions = required_instance_extensions(window)?;
        let instance = Instance::new(c"framechain", &extensions, config.validation)?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let info = select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        info!(
            "Using {} ({})",
            info.device_name(),
            info.device_type_name()
        );

        let device = Arc::new(VulkanDevice::new(
            instance.handle(),
            &info,
            surface.handle(),
            surface.loader().clone(),
        )?);

        let mut coordinator = ResizeCoordinator::from_config(Arc::clone(&device), config)?;
        coordinator.request_resize(window.extent());

        let commands = ClearCommands::new(Arc::clone(&device), config.frames_in_flight)?;

        Ok(Self {
            coordinator,
            commands,
            _device: device,
            _surface: surface,
            _instance: instance,
        })
    }

    /// Renders one frame. Skipped frames (minimised, stale) are not errors.
    fn render(&mut self, frame_number: u64) -> RhiResult<bool> {
        let Some(frame) = self.coordinator.begin_frame(&mut ())? else {
            return Ok(false);
        };

        let swapchain = self.coordinator.swapchain();
        let image = swapchain
            .image_chain()
            .get(frame.image_index as usize)
            .map(|entry| entry.image())
            .ok_or_else(|| {
                RhiError::SwapchainError(format!("acquired image {} out of range", frame.image_index))
            })?;
        let clear = swapchain
            .state()
            .is_some_and(|s| s.image_usage().contains(vk::ImageUsageFlags::TRANSFER_DST));

        let cmd = self
            .commands
            .record(frame.slot, image, clear_color(frame_number), clear)?;

        self.coordinator.end_frame(&[cmd], &mut ())?;
        Ok(true)
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        if let Err(e) = self.coordinator.wait_idle() {
            error!("Failed to wait for idle on shutdown: {}", e);
        }
    }
}

/// Field order is drop order: the presenter (and its surface) goes before
/// the window.
struct App {
    presenter: Option<Presenter>,
    window: Option<Window>,
    config: PresentConfig,
    counter: FrameCounter,
}

impl App {
    fn new(config: PresentConfig) -> Self {
        Self {
            presenter: None,
            window: None,
            config,
            counter: FrameCounter::new(),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, &self.config.window) {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match Presenter::new(&window, &self.config) {
            Ok(presenter) => {
                info!("Initialization complete, entering main loop");
                self.presenter = Some(presenter);
                self.window = Some(window);
            }
            Err(e) => {
                error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                // Presenter goes before the window it renders to
                self.presenter = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(ref mut presenter) = self.presenter {
                    presenter.coordinator.request_resize(vk::Extent2D {
                        width: size.width,
                        height: size.height,
                    });
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(ref mut presenter) = self.presenter else {
                    return;
                };

                match presenter.render(self.counter.total_frames()) {
                    Ok(true) => {
                        if let Some(fps) = self.counter.tick() {
                            info!(
                                "{:.1} fps, {} swapchain recreations",
                                fps,
                                presenter.coordinator.recreations()
                            );
                        }
                    }
                    Ok(false) => {}
                    Err(e) if e.is_fatal() => {
                        error!("Render error: {}", e);
                        self.presenter = None;
                        event_loop.exit();
                    }
                    Err(e) => warn!("Frame skipped: {}", e),
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    framechain_core::init_logging();
    info!("Starting framechain demo");

    let config = PresentConfig::load(DEFAULT_CONFIG_FILE)
        .with_context(|| format!("Failed to load {}", DEFAULT_CONFIG_FILE))?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}

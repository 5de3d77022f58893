// =============================================================================
// VULKAN TRIANGLE - minimal presentation session
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, resize, close)                       │
// │    └── ResizeCoordinator (queued size changes)                  │
// │          └── Renderer                                           │
// │                ├── DeviceContext (instance, surface, device)    │
// │                ├── SessionResources (vertex buffer, pool, sync) │
// │                └── RenderGeneration (swapchain ... commands)    │
// └─────────────────────────────────────────────────────────────────┘
//
// LOOP:
// 1. winit delivers events (resize notifications are only queued)
// 2. Pending resize, if any, rebuilds the render generation
// 3. One acquire → submit → present cycle
// 4. Repeat until the window asks to close
//
// =============================================================================

mod backend;
mod config;
mod error;
mod renderer;
mod resize;
mod scene;
mod timer;

use anyhow::{Context, Result};
use ash::vk;
use config::Config;
use renderer::{FrameOutcome, Renderer};
use resize::ResizeCoordinator;
use std::time::Instant;
use timer::FpsTimer;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    init_logging();

    // Load configuration from config.toml
    let config = Config::load();
    log::info!("Starting Vulkan renderer");
    log::info!("Window: {}x{}", config.window.width, config.window.height);

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Renderer goes before the window it presents to
    app.renderer = None;
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Info by default, `RUST_LOG` overrides
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer owns the surface,
/// which must go before the window.
struct App {
    renderer: Option<Renderer>,
    window: Option<Window>,
    resize: ResizeCoordinator,
    config: Config,
    fps: FpsTimer,
    /// First unrecoverable error; ends the loop and the process
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            renderer: None,
            window: None,
            resize: ResizeCoordinator::default(),
            config,
            fps: FpsTimer::start(Instant::now()),
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.fatal.get_or_insert(error);
        event_loop.exit();
    }

    fn create_window_and_renderer(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = event_loop
            .create_window(window_attributes)
            .context("Failed to create window")?;

        let renderer = Renderer::new(&window, window_extent(&window), &self.config)?;

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Apply a queued resize, then draw one frame
    fn redraw(&mut self) -> Result<()> {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };

        if self.resize.is_minimized() {
            return Ok(());
        }
        self.resize.apply(renderer)?;

        match renderer.render_frame()? {
            FrameOutcome::Presented => {
                if self.config.debug.show_fps {
                    if let Some(fps) = self.fps.frame(Instant::now()) {
                        window.set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
                    }
                }
            }
            FrameOutcome::SwapchainStale => {
                let size = window.inner_size();
                self.resize.notify(size.width, size.height);
            }
            FrameOutcome::Skipped => {}
        }
        Ok(())
    }
}

fn window_extent(window: &Window) -> vk::Extent2D {
    let size = window.inner_size();
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        if let Err(e) = self.create_window_and_renderer(event_loop) {
            self.fail(event_loop, e.context("Failed to initialize Vulkan"));
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resize.notify(size.width, size.height);
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e.context("Render error"));
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Keep the loop spinning: one redraw per pass
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

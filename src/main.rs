// =============================================================================
// FRAME PACER - Vulkan frame pacing and presentation recovery
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, window, input, FPS title)               │
// │    └── Renderer (command buffers, render pass, depth)           │
// │          └── PresentationController (frame protocol)            │
// │                ├── FrameScheduler + SyncObjectPool              │
// │                └── SurfaceSwapchain (images, views, framebuffers)│
// │                      └── VulkanDevice (instance, queues, memory)│
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait on the slot's in-flight fence
// 2. Acquire a swapchain image (out of date: rebuild and skip the frame)
// 3. Reset the fence, record, submit
// 4. Present (out of date, suboptimal or resized: rebuild)
// 5. Advance to the next slot
//
// =============================================================================

mod backend;
mod config;
mod error;
mod frame;
mod renderer;

use anyhow::Result;
use backend::VulkanDevice;
use config::Config;
use frame::GpuDevice;
use renderer::Renderer;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    let (config, load_error) = Config::load_or_default(CONFIG_PATH);

    init_logging(&config);
    match load_error {
        Some(e) => log::warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_PATH, e),
        None => log::debug!("Config: {:?}", config),
    }
    log::info!("Starting frame pacer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Present mode: {}, {} frames in flight",
        config.graphics.present_mode,
        config.graphics.max_frames_in_flight
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Surface fatal errors through the exit code
    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Level comes from config.toml; RUST_LOG overrides it
fn init_logging(config: &Config) {
    use env_logger::Builder;

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_default_env();
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Owns the window and everything rendered into it.
///
/// IMPORTANT: Field order matters for Drop! The renderer goes before the
/// device, and the window must outlive the surface the device owns.
struct App {
    renderer: Option<Renderer>,
    device: Option<Arc<VulkanDevice>>,
    window: Option<Arc<Window>>,

    config: Config,
    is_fullscreen: bool,
    /// Window reports a zero-sized framebuffer - skip rendering
    is_minimized: bool,
    /// First fatal error; ends the event loop
    error: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            renderer: None,
            device: None,
            window: None,
            config,
            is_fullscreen,
            is_minimized: false,
            error: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_vulkan(&mut self, window: &mut Arc<Window>) -> Result<()> {
        log::info!("Initializing Vulkan...");

        // Validation only in debug builds, and only if enabled in config
        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let device = VulkanDevice::new(&self.config.window.title, enable_validation, window)?;
        self.device = Some(device.clone());

        let renderer = Renderer::new(device, &self.config, window)?;
        log::info!(
            "Vulkan initialized: {} swapchain images at {}x{}",
            renderer.image_count(),
            renderer.extent().width,
            renderer.extent().height
        );
        self.renderer = Some(renderer);

        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }

        match (self.renderer.as_mut(), self.window.as_mut()) {
            (Some(renderer), Some(window)) => renderer.draw_frame(window),
            _ => Ok(false),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal: {:?}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            if let Some(ref mut renderer) = self.renderer {
                renderer.request_resize();
            }
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let mut window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::anyhow!("Failed to create window: {}", e));
                return;
            }
        };

        let result = self.init_vulkan(&mut window);
        self.window = Some(window);
        if let Err(e) = result {
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
                if let Some(ref device) = self.device {
                    if let Err(e) = device.wait_idle() {
                        log::warn!("Device wait on close failed: {}", e);
                    }
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    if let Some(ref mut renderer) = self.renderer {
                        renderer.request_resize();
                    }
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => self.fail(event_loop, e),
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws; pacing comes from the in-flight fences.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(ref renderer) = self.renderer {
            log::info!("Presented {} frames", renderer.frames_presented());
        }

        // Everything else is released by the fields' own Drop, in field order
        self.renderer = None;
        self.device = None;

        log::info!("Cleanup complete");
    }
}

// Example renderer - clears color and depth every frame
//
// Shows the consumer side of the frame core: per-slot command buffers indexed
// by the current frame index, a render pass over the swapchain image plus a
// depth attachment, and the recreate hook that keeps both in step with the
// swapchain.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use winit::window::Window;

use crate::backend::render_pass::{create_render_pass, DepthAttachment, DEPTH_FORMAT_CANDIDATES};
use crate::backend::{SurfaceSwapchain, VulkanDevice};
use crate::config::Config;
use crate::error::{PresentationError, PresentationResult};
use crate::frame::{
    BeginFrame, FramebufferSize, GpuDevice, PresentChain, PresentOutcome, PresentationController,
    SwapchainListener,
};

impl FramebufferSize for Arc<Window> {
    fn framebuffer_size(&mut self) -> vk::Extent2D {
        let size = self.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

/// Render pass plus the attachments sized to the swapchain extent.
pub struct RenderTargets {
    render_pass: vk::RenderPass,
    depth: DepthAttachment,
    device: Arc<VulkanDevice>,
}

impl RenderTargets {
    fn new(
        device: Arc<VulkanDevice>,
        color_format: vk::Format,
        depth_format: vk::Format,
        extent: vk::Extent2D,
    ) -> PresentationResult<Self> {
        let render_pass = create_render_pass(&device, color_format, depth_format)?;
        let depth = match DepthAttachment::new(device.clone(), depth_format, extent) {
            Ok(depth) => depth,
            Err(e) => {
                unsafe { device.device.destroy_render_pass(render_pass, None) };
                return Err(e);
            }
        };

        Ok(Self {
            render_pass,
            depth,
            device,
        })
    }
}

impl SwapchainListener<SurfaceSwapchain> for RenderTargets {
    fn swapchain_recreated(&mut self, swapchain: &mut SurfaceSwapchain) -> PresentationResult<()> {
        let extent = swapchain.config().extent;
        if self.depth.extent != extent {
            self.depth = DepthAttachment::new(self.device.clone(), self.depth.format, extent)?;
        }
        swapchain.create_framebuffers(self.render_pass, &[self.depth.view()])
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_render_pass(self.render_pass, None) };
    }
}

/// One primary command buffer per frame in flight.
struct FrameCommands {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    device: Arc<VulkanDevice>,
}

impl FrameCommands {
    fn new(device: Arc<VulkanDevice>, count: usize) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families.graphics)
            // RESET: each slot re-records its own buffer every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);

        let buffers = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(pool, None) };
                return Err(e).context("Failed to allocate command buffers");
            }
        };

        Ok(Self {
            pool,
            buffers,
            device,
        })
    }
}

impl Drop for FrameCommands {
    fn drop(&mut self) {
        // Also frees the command buffers
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

pub struct Renderer {
    // Field order is drop order
    commands: FrameCommands,
    controller: PresentationController<Arc<VulkanDevice>, SurfaceSwapchain>,
    targets: RenderTargets,
    clear_color: [f32; 4],
    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new(device: Arc<VulkanDevice>, config: &Config, window: &mut Arc<Window>) -> Result<Self> {
        let extent = window.framebuffer_size();

        let mut swapchain = SurfaceSwapchain::new(
            device.clone(),
            extent,
            &config.format_request(),
            config.present_mode(),
        )
        .context("Failed to create swapchain")?;

        let depth_format = device
            .find_depth_format(&DEPTH_FORMAT_CANDIDATES)
            .ok_or(PresentationError::NoDepthFormat)?;

        // A deferred chain has no extent yet; the recreate hook resizes depth
        let depth_extent = vk::Extent2D {
            width: swapchain.config().extent.width.max(1),
            height: swapchain.config().extent.height.max(1),
        };
        let targets = RenderTargets::new(
            device.clone(),
            swapchain.config().format,
            depth_format,
            depth_extent,
        )?;
        swapchain.create_framebuffers(targets.render_pass, &[targets.depth.view()])?;

        let controller = PresentationController::new(
            device.clone(),
            swapchain,
            config.graphics.max_frames_in_flight,
            config.graphics.fence_timeout_ns,
        )?;

        let commands = FrameCommands::new(device.clone(), controller.frames_in_flight())?;

        Ok(Self {
            commands,
            controller,
            targets,
            clear_color: config.graphics.clear_color,
            device,
        })
    }

    /// Draws one frame. Returns `false` when the frame was skipped for a rebuild.
    pub fn draw_frame(&mut self, window: &mut Arc<Window>) -> Result<bool> {
        let frame = match self.controller.begin_frame(window, &mut self.targets)? {
            BeginFrame::Ready(frame) => frame,
            BeginFrame::RebuildRequested => return Ok(false),
        };

        // The slot's fence was just waited on, so its command buffer is free
        let cmd = self.commands.buffers[self.controller.current_frame_index()];
        self.record(cmd, frame.image_index)?;

        self.controller.submit(&frame, cmd)?;
        if self.controller.present_frame(&frame, window, &mut self.targets)? == PresentOutcome::Rebuilt {
            log::debug!(
                "Swapchain now {}x{}",
                self.controller.swapchain_extent().width,
                self.controller.swapchain_extent().height
            );
        }

        Ok(true)
    }

    fn record(&self, cmd: vk::CommandBuffer, image_index: u32) -> Result<()> {
        let device = &self.device.device;
        let extent = self.controller.swapchain_extent();

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.targets.render_pass)
            .framebuffer(self.controller.swapchain().framebuffer(image_index))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    /// Flags a window resize; handled after the next present.
    pub fn request_resize(&mut self) {
        self.controller.request_resize();
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.controller.swapchain_extent()
    }

    pub fn image_count(&self) -> usize {
        self.controller.swapchain_image_count()
    }

    pub fn frames_presented(&self) -> u64 {
        self.controller.frames_presented()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during renderer teardown: {}", e);
        }
    }
}

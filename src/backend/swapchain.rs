// Swapchain - Window presentation
//
// Owns the chain of images we render to and present to the screen, their
// views and the framebuffers bound to them. Rebuilt whenever the surface
// changes; format and present mode stay fixed across rebuilds.

use ash::prelude::VkResult;
use ash::{khr, vk};
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::{PresentationError, PresentationResult};
use crate::frame::{FormatRequest, PresentChain, SwapchainConfig, SwapchainSupport};

pub struct SurfaceSwapchain {
    swapchain: vk::SwapchainKHR,
    swapchain_loader: khr::swapchain::Device,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    config: SwapchainConfig,
    device: Arc<VulkanDevice>,
}

impl SurfaceSwapchain {
    /// Queries the surface and builds the first chain.
    ///
    /// A surface with no area (minimized window) yields an empty chain that
    /// the first successful `rebuild` fills in.
    pub fn new(
        device: Arc<VulkanDevice>,
        preferred_extent: vk::Extent2D,
        format_request: &FormatRequest,
        preferred_mode: Option<vk::PresentModeKHR>,
    ) -> PresentationResult<Self> {
        let support = Self::query_support(&device)?;
        let config = SwapchainConfig::select(&support, format_request, preferred_mode, preferred_extent)?;

        log::info!(
            "Swapchain config: {:?} / {:?}, present mode {:?}",
            config.format,
            config.color_space,
            config.present_mode
        );

        let swapchain_loader = khr::swapchain::Device::new(&device.instance, &device.device);

        let mut swapchain = Self {
            swapchain: vk::SwapchainKHR::null(),
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            config,
            device,
        };
        if swapchain.config.has_area() {
            swapchain.create_chain(&support.capabilities)?;
        } else {
            log::info!("Surface has no area yet, deferring swapchain creation");
        }
        Ok(swapchain)
    }

    fn query_support(device: &VulkanDevice) -> PresentationResult<SwapchainSupport> {
        SwapchainSupport::query(&device.surface_loader, device.physical_device, device.surface)
            .map_err(PresentationError::fatal("vkGetPhysicalDeviceSurface*KHR"))
    }

    /// Creates a chain for `self.config`, chained from the current handle.
    ///
    /// The old swapchain and everything referencing its images is destroyed
    /// only once the new one exists.
    fn create_chain(&mut self, capabilities: &vk::SurfaceCapabilitiesKHR) -> PresentationResult<()> {
        let config = self.config;
        log::info!(
            "Creating swapchain: {}x{}",
            config.extent.width,
            config.extent.height
        );

        let (sharing_mode, queue_family_indices) = self.device.queue_families.sharing();

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.device.surface)
            .min_image_count(config.image_count)
            .image_format(config.format)
            .image_color_space(config.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(self.swapchain);

        let new_swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(PresentationError::fatal("vkCreateSwapchainKHR"))?;

        // New chain is live, retire the old one
        self.destroy_chain();
        self.swapchain = new_swapchain;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(new_swapchain) }
            .map_err(PresentationError::fatal("vkGetSwapchainImagesKHR"))?;

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(config.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { self.device.device.create_image_view(&view_info, None) }
                .map_err(PresentationError::fatal("vkCreateImageView"))?;
            self.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", self.images.len());
        Ok(())
    }

    /// Destroys framebuffers, views and the swapchain handle.
    fn destroy_chain(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.image_views.drain(..) {
                self.device.device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
            }
        }
        self.images.clear();
        self.swapchain = vk::SwapchainKHR::null();
    }

    /// One framebuffer per image: the image's view followed by `extra_attachments`.
    ///
    /// Must be called again after every rebuild; the old framebuffers are
    /// destroyed together with the old image views.
    pub fn create_framebuffers(
        &mut self,
        render_pass: vk::RenderPass,
        extra_attachments: &[vk::ImageView],
    ) -> PresentationResult<()> {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
        }

        for &view in &self.image_views {
            let mut attachments = Vec::with_capacity(1 + extra_attachments.len());
            attachments.push(view);
            attachments.extend_from_slice(extra_attachments);

            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.config.extent.width)
                .height(self.config.extent.height)
                .layers(1);

            let framebuffer = unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }
                .map_err(PresentationError::fatal("vkCreateFramebuffer"))?;
            self.framebuffers.push(framebuffer);
        }

        log::debug!("Created {} framebuffers", self.framebuffers.len());
        Ok(())
    }

    #[inline]
    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

}

impl PresentChain for SurfaceSwapchain {
    fn acquire_next_image(&mut self, signal: vk::Semaphore, timeout: u64) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, timeout, signal, vk::Fence::null())
        }
    }

    fn queue_present(&mut self, image_index: u32, wait: vk::Semaphore) -> VkResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_loader
                .queue_present(self.device.present_queue, &present_info)
        }
    }

    fn rebuild(&mut self, preferred: vk::Extent2D) -> PresentationResult<bool> {
        let support = Self::query_support(&self.device)?;
        let Some(config) = self.config.resized(&support.capabilities, preferred) else {
            return Ok(false);
        };
        self.config = config;
        self.create_chain(&support.capabilities)?;
        Ok(true)
    }

    fn config(&self) -> &SwapchainConfig {
        &self.config
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for SurfaceSwapchain {
    fn drop(&mut self) {
        self.destroy_chain();
    }
}

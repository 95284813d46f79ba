// Swapchain support query and configuration selection
//
// Querying the surface is the only impure part; every choice below is a pure
// function over the queried lists plus caller preferences.

use ash::prelude::VkResult;
use ash::vk;

use crate::error::{PresentationError, PresentationResult};

/// What a physical device can do with a particular surface.
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(
        surface_loader: &ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                formats: surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            })
        }
    }
}

/// Caller's format wishes, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRequest {
    pub candidates: Vec<vk::Format>,
    pub color_space: vk::ColorSpaceKHR,
}

impl FormatRequest {
    pub fn srgb() -> Self {
        Self {
            candidates: vec![vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB],
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    pub fn unorm() -> Self {
        Self {
            candidates: vec![vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM],
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }
}

/// Chooses a surface format.
///
/// A lone `UNDEFINED` entry means the surface takes anything, so the first
/// candidate wins. Otherwise the first candidate the surface lists is used,
/// falling back to whatever the surface lists first.
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    request: &FormatRequest,
) -> PresentationResult<vk::SurfaceFormatKHR> {
    let first = available.first().ok_or(PresentationError::NoSurfaceFormat)?;

    if available.len() == 1 && first.format == vk::Format::UNDEFINED {
        if let Some(&format) = request.candidates.first() {
            return Ok(vk::SurfaceFormatKHR {
                format,
                color_space: request.color_space,
            });
        }
    }

    let matched = request.candidates.iter().find_map(|&wanted| {
        available
            .iter()
            .find(|f| f.format == wanted && f.color_space == request.color_space)
    });

    Ok(*matched.unwrap_or(first))
}

/// Chooses a present mode.
///
/// Order: the configured preference if supported, then MAILBOX (low latency
/// without tearing), then FIFO which every implementation must support.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: Option<vk::PresentModeKHR>,
) -> vk::PresentModeKHR {
    preferred
        .into_iter()
        .chain(std::iter::once(vk::PresentModeKHR::MAILBOX))
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Chooses the image extent.
///
/// A current extent other than the `u32::MAX` sentinel is authoritative.
/// Otherwise each axis is clamped into the surface's supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    preferred: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: preferred.width.clamp(min.width, max.width),
        height: preferred.height.clamp(min.height, max.height),
    }
}

/// One image above the minimum, capped by the maximum (0 means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Parameters of one swapchain build. Never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl SwapchainConfig {
    /// Full selection, used when the swapchain is first created.
    pub fn select(
        support: &SwapchainSupport,
        request: &FormatRequest,
        preferred_mode: Option<vk::PresentModeKHR>,
        preferred_extent: vk::Extent2D,
    ) -> PresentationResult<Self> {
        let surface_format = choose_surface_format(&support.formats, request)?;
        Ok(Self {
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode: choose_present_mode(&support.present_modes, preferred_mode),
            extent: choose_extent(&support.capabilities, preferred_extent),
            image_count: choose_image_count(&support.capabilities),
        })
    }

    /// Configuration for a rebuild: only the extent is recomputed.
    ///
    /// `None` while the surface has no area (a minimized window reports a
    /// 0x0 current extent); the old chain stays in place until it has one.
    pub fn resized(
        &self,
        capabilities: &vk::SurfaceCapabilitiesKHR,
        preferred_extent: vk::Extent2D,
    ) -> Option<Self> {
        let config = Self {
            extent: choose_extent(capabilities, preferred_extent),
            ..*self
        };
        config.has_area().then_some(config)
    }

    /// A swapchain can only be created with both extent axes non-zero.
    pub fn has_area(&self) -> bool {
        self.extent.width > 0 && self.extent.height > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn free_extent_caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_undefined_format_takes_first_request() {
        let available = [surface_format(
            vk::Format::UNDEFINED,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )];
        let request = FormatRequest {
            candidates: vec![vk::Format::R8G8B8A8_UNORM, vk::Format::B8G8R8A8_SRGB],
            color_space: vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
        };

        let chosen = choose_surface_format(&available, &request).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT);
    }

    #[test]
    fn test_no_match_falls_back_to_first_available() {
        let available = [
            surface_format(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&available, &FormatRequest::srgb()).unwrap();
        assert_eq!(chosen, available[0]);
    }

    #[test]
    fn test_candidates_respect_priority_order() {
        let available = [
            surface_format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        // B8G8R8A8 is first in the request even though the surface lists it second
        let chosen = choose_surface_format(&available, &FormatRequest::srgb()).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_color_space_must_match() {
        let available = [
            surface_format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        let chosen = choose_surface_format(&available, &FormatRequest::srgb()).unwrap();
        assert_eq!(chosen, available[0]);
    }

    #[test]
    fn test_empty_format_list_is_an_error() {
        let result = choose_surface_format(&[], &FormatRequest::srgb());
        assert!(matches!(result, Err(PresentationError::NoSurfaceFormat)));
    }

    #[test]
    fn test_present_mode_prefers_mailbox() {
        let available = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&available, None), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&available, None), vk::PresentModeKHR::FIFO);
        // FIFO even if the surface forgot to list it
        assert_eq!(choose_present_mode(&[], None), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_configured_present_mode_wins_when_supported() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&available, Some(vk::PresentModeKHR::IMMEDIATE)),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], Some(vk::PresentModeKHR::IMMEDIATE)),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_clamped_per_axis() {
        let chosen = choose_extent(&free_extent_caps(), vk::Extent2D { width: 50, height: 5000 });
        assert_eq!(chosen, vk::Extent2D { width: 100, height: 4096 });
    }

    #[test]
    fn test_fixed_current_extent_is_authoritative() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 800, height: 600 },
            ..free_extent_caps()
        };
        let chosen = choose_extent(&caps, vk::Extent2D { width: 50, height: 5000 });
        assert_eq!(chosen, vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn test_image_count_bounds() {
        let mut caps = free_extent_caps();
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        // Zero maximum means no upper bound
        caps.max_image_count = 0;
        caps.min_image_count = 5;
        assert_eq!(choose_image_count(&caps), 6);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let support = SwapchainSupport {
            capabilities: free_extent_caps(),
            formats: vec![surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };
        let initial = SwapchainConfig::select(
            &support,
            &FormatRequest::srgb(),
            None,
            vk::Extent2D { width: 1280, height: 720 },
        )
        .unwrap();

        let resize_to = vk::Extent2D { width: 1920, height: 1080 };
        let first = initial.resized(&support.capabilities, resize_to).unwrap();
        let second = first.resized(&support.capabilities, resize_to).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.extent, resize_to);
        assert_eq!(first.format, initial.format);
        assert_eq!(first.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(first.image_count, initial.image_count);
    }

    #[test]
    fn test_zero_current_extent_has_no_area() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 0, height: 0 },
            ..free_extent_caps()
        };
        let support = SwapchainSupport {
            capabilities: caps,
            formats: vec![surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let config = SwapchainConfig::select(
            &support,
            &FormatRequest::srgb(),
            None,
            vk::Extent2D { width: 800, height: 600 },
        )
        .unwrap();
        assert!(!config.has_area());
    }

    #[test]
    fn test_resize_against_zero_surface_is_deferred() {
        let mut caps = free_extent_caps();
        let config = crate::frame::testing::test_config(vk::Extent2D { width: 800, height: 600 });

        caps.current_extent = vk::Extent2D { width: 0, height: 0 };
        assert_eq!(config.resized(&caps, vk::Extent2D { width: 800, height: 600 }), None);

        caps.current_extent = vk::Extent2D { width: 800, height: 0 };
        assert_eq!(config.resized(&caps, vk::Extent2D { width: 800, height: 600 }), None);

        // Surface restored
        caps.current_extent = vk::Extent2D { width: 1024, height: 768 };
        let restored = config.resized(&caps, vk::Extent2D { width: 800, height: 600 }).unwrap();
        assert_eq!(restored.extent, vk::Extent2D { width: 1024, height: 768 });
        assert!(restored.has_area());
    }
}

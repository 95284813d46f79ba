// Backend module - Vulkan implementations of the frame core's platform seams
//
// Design: Thin wrapper around ash; the protocol itself lives in `frame`

pub mod device;
pub mod render_pass;
pub mod swapchain;

pub use device::VulkanDevice;
pub use swapchain::SurfaceSwapchain;

// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Negotiation (format, present mode, image count, extent, sharing) is plain
// data in, plain data out; only `SwapchainResources::create` talks to the
// driver.

use ash::vk;

use super::device::{DeviceContext, QueueFamilyIndices};
use super::handles::{take, Factory, Releaser};
use crate::error::{RenderError, Result, VkResultExt};

/// Used when the driver accepts anything, and preferred whenever listed
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Everything the surface reports for the selected GPU
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(ctx: &DeviceContext) -> Result<Self> {
        let loader = &ctx.surface_loader;
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
                    .initializing("surface capabilities query")?,
                formats: loader
                    .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
                    .initializing("surface format query")?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
                    .initializing("present mode query")?,
            })
        }
    }
}

/// A sole UNDEFINED entry means "any format": take the default pair.
/// Otherwise the preferred pair if listed, else the first entry.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(PREFERRED_SURFACE_FORMAT);
        }
    }

    formats
        .iter()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX if advertised, otherwise whatever the platform lists first.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }
    modes.first().copied().unwrap_or(vk::PresentModeKHR::FIFO) // FIFO is always supported
}

/// One more than the minimum, clamped to the maximum (0 = unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        image_count.min(caps.max_image_count)
    } else {
        image_count
    }
}

/// The surface's current extent; `window_size` only matters when the
/// platform leaves the size up to us (current width of u32::MAX).
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window_size: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window_size
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window_size
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// EXCLUSIVE for a shared family, CONCURRENT across both otherwise.
pub fn choose_sharing(families: QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, families.unique())
    }
}

/// Negotiated creation parameters for one swapchain generation
#[derive(Debug, Clone)]
pub struct SwapchainConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
}

impl SwapchainConfig {
    pub fn negotiate(
        support: &SurfaceSupport,
        families: QueueFamilyIndices,
        window_size: vk::Extent2D,
    ) -> Result<Self> {
        let surface_format = choose_surface_format(&support.formats).ok_or(
            RenderError::ResourceCreationFailure {
                resource: "swapchain (surface reports no formats)",
                result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            },
        )?;
        let (sharing_mode, queue_family_indices) = choose_sharing(families);

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, window_size),
            image_count: choose_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
            sharing_mode,
            queue_family_indices,
        })
    }

    pub fn is_degenerate(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }
}

/// The presentable chain and one view per image
#[derive(Debug, Default)]
pub struct SwapchainResources {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl SwapchainResources {
    /// Build the chain; `previous` (possibly null) is handed to the driver
    /// for reuse and must be destroyed by the caller afterwards.
    pub fn create(
        device: &impl Factory,
        config: &SwapchainConfig,
        previous: vk::SwapchainKHR,
    ) -> Result<Self> {
        let handle = device.create_swapchain(config, previous)?;

        let mut resources = Self {
            handle,
            images: Vec::new(),
            image_views: Vec::new(),
            format: config.surface_format.format,
            extent: config.extent,
        };

        // Anything created so far is released again if a later step fails
        if let Err(e) = resources.create_views(device) {
            resources.release(device);
            return Err(e);
        }

        log::info!(
            "Created swapchain: {} images, {:?}/{:?}, {:?}, {}x{}",
            resources.images.len(),
            config.surface_format.format,
            config.surface_format.color_space,
            config.present_mode,
            config.extent.width,
            config.extent.height
        );

        Ok(resources)
    }

    fn create_views(&mut self, device: &impl Factory) -> Result<()> {
        self.images = device.swapchain_images(self.handle)?;

        for &image in &self.images {
            let view = device.create_image_view(image, self.format)?;
            self.image_views.push(view);
        }
        Ok(())
    }

    /// Destroy the views but hand back the chain itself, so it can serve as
    /// `old_swapchain` for the next generation.
    pub fn retire(&mut self, releaser: &impl Releaser) -> vk::SwapchainKHR {
        for view in self.image_views.drain(..) {
            releaser.destroy_image_view(view);
        }
        self.images.clear();
        take(&mut self.handle).unwrap_or_default()
    }

    pub fn release(&mut self, releaser: &impl Releaser) {
        let handle = self.retire(releaser);
        if handle != vk::SwapchainKHR::null() {
            releaser.destroy_swapchain(handle);
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

/// Driver call behind `Factory::create_swapchain`
pub(crate) fn create_swapchain_handle(
    ctx: &DeviceContext,
    config: &SwapchainConfig,
    previous: vk::SwapchainKHR,
) -> Result<vk::SwapchainKHR> {
    let create_info = vk::SwapchainCreateInfoKHR::builder()
        .surface(ctx.surface)
        .min_image_count(config.image_count)
        .image_format(config.surface_format.format)
        .image_color_space(config.surface_format.color_space)
        .image_extent(config.extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(config.sharing_mode)
        .queue_family_indices(&config.queue_family_indices)
        .pre_transform(config.pre_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(config.present_mode)
        .clipped(true)
        .old_swapchain(previous);

    unsafe { ctx.swapchain_loader.create_swapchain(&create_info, None) }.creating("swapchain")
}

/// Color view over one swapchain image, single mip and layer
pub(crate) fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.creating("swapchain image view")
}

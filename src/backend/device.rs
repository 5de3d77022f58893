// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with (optional) validation layers
// - Surface binding for the window
// - Physical device selection: required extensions + graphics/present queues
// - Logical device + queue creation
//
// The context is created once and dropped last; everything else in the
// session borrows it.

use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{c_char, CStr, CString};

use super::frames::{self, DrawRecipe};
use super::handles::{Factory, Releaser};
use super::pipeline::{self, PipelineResources};
use super::shader::ShaderCode;
use super::swapchain::{self, SwapchainConfig};
use crate::error::{RenderError, Result, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device extensions every candidate GPU must expose
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [khr::Swapchain::name()]
}

/// Graphics and present queue families, fixed for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// What the selector needs to know about one queue family
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFamilySupport {
    pub graphics: bool,
    pub present: bool,
}

/// Capability snapshot of one physical device
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub name: String,
    pub extensions: Vec<CString>,
    pub queue_families: Vec<QueueFamilySupport>,
}

impl DeviceCandidate {
    fn supports_extensions(&self, required: &[&CStr]) -> bool {
        required
            .iter()
            .all(|name| self.extensions.iter().any(|ext| ext.as_c_str() == *name))
    }

    /// First graphics family and first present family, looked up independently
    fn queue_families(&self) -> Option<QueueFamilyIndices> {
        let graphics = self.queue_families.iter().position(|f| f.graphics)?;
        let present = self.queue_families.iter().position(|f| f.present)?;
        Some(QueueFamilyIndices {
            graphics: graphics as u32,
            present: present as u32,
        })
    }
}

/// Pick the first candidate that has every required extension and both queue roles.
pub fn select_device(
    candidates: &[DeviceCandidate],
    required_extensions: &[&CStr],
) -> Result<(usize, QueueFamilyIndices)> {
    if candidates.is_empty() {
        return Err(RenderError::NoSuitableDevice(
            "no Vulkan-capable GPU reported".to_string(),
        ));
    }

    for (index, candidate) in candidates.iter().enumerate() {
        if !candidate.supports_extensions(required_extensions) {
            log::debug!("Skipping {}: missing required extensions", candidate.name);
            continue;
        }
        match candidate.queue_families() {
            Some(families) => return Ok((index, families)),
            None => log::debug!("Skipping {}: no graphics/present queue", candidate.name),
        }
    }

    Err(RenderError::NoSuitableDevice(format!(
        "none of {} GPU(s) has the required extensions and queues",
        candidates.len()
    )))
}

/// Device context with automatic cleanup
pub struct DeviceContext {
    pub device: ash::Device,
    pub swapchain_loader: khr::Swapchain,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,
    pub physical_device: vk::PhysicalDevice,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    _entry: Entry,
}

impl DeviceContext {
    /// Create instance, surface and device for `window`.
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Request Vulkan validation layers (debug only)
    pub fn new<W>(window: &W, app_name: &str, enable_validation: bool) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::init("Vulkan loader", e))?;

        let display_handle = window.raw_display_handle();
        let enable_validation = enable_validation && validation_available(&entry)?;
        let instance = create_instance(&entry, app_name, display_handle, enable_validation)?;

        // Until the context exists, every early return undoes what was created
        let mut unwind = Unwind::default();
        {
            let instance = instance.clone();
            unwind.push(move || unsafe { instance.destroy_instance(None) });
        }

        let debug_utils = if enable_validation {
            let (utils, messenger) = setup_debug_messenger(&entry, &instance)?;
            let loader = utils.clone();
            unwind.push(move || unsafe { loader.destroy_debug_utils_messenger(messenger, None) });
            Some((utils, messenger))
        } else {
            None
        };

        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                display_handle,
                window.raw_window_handle(),
                None,
            )
        }
        .creating("window surface")?;
        {
            let loader = surface_loader.clone();
            unwind.push(move || unsafe { loader.destroy_surface(surface, None) });
        }

        let (physical_device, queue_families) =
            pick_physical_device(&instance, &surface_loader, surface)?;

        let (device, graphics_queue, present_queue) =
            create_logical_device(&instance, physical_device, queue_families)?;
        unwind.disarm();

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let swapchain_loader = khr::Swapchain::new(&instance, &device);

        log_device_info(&instance, physical_device, queue_families);

        Ok(Self {
            device,
            swapchain_loader,
            graphics_queue,
            present_queue,
            queue_families,
            physical_device,
            memory_properties,
            surface,
            surface_loader,
            debug_utils,
            instance,
            _entry: entry,
        })
    }

    /// Wait for device to be idle (e.g., before destroying anything)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.recording("wait for device idle")
    }
}

impl Releaser for DeviceContext {
    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }
}

impl Factory for DeviceContext {
    fn create_swapchain(
        &self,
        config: &SwapchainConfig,
        previous: vk::SwapchainKHR,
    ) -> Result<vk::SwapchainKHR> {
        swapchain::create_swapchain_handle(self, config, previous)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .creating("swapchain images")
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
        swapchain::create_image_view(&self.device, image, format)
    }

    fn create_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass> {
        pipeline::create_render_pass(&self.device, format)
    }

    fn create_pipeline(
        &self,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        shaders: &ShaderCode,
    ) -> Result<PipelineResources> {
        PipelineResources::build(&self.device, render_pass, extent, shaders)
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        frames::create_framebuffer(&self.device, render_pass, view, extent)
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&info, None) }.creating("semaphore")
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&info, None) }.creating("fence")
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        frames::allocate_command_buffers(&self.device, pool, count)
    }

    fn record_draw(
        &self,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        recipe: &DrawRecipe,
    ) -> Result<()> {
        frames::record_draw(&self.device, cmd, framebuffer, recipe)
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = self.wait_idle() {
            log::warn!("{}", e);
        }

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Undo actions for a multi-step construction, run newest first on drop
/// unless the construction completed.
#[derive(Default)]
struct Unwind {
    actions: Vec<Box<dyn FnOnce()>>,
}

impl Unwind {
    fn push(&mut self, action: impl FnOnce() + 'static) {
        self.actions.push(Box::new(action));
    }

    fn disarm(mut self) {
        self.actions.clear();
    }
}

impl Drop for Unwind {
    fn drop(&mut self) {
        while let Some(action) = self.actions.pop() {
            action();
        }
    }
}

/// Validation needs both the Khronos layer and the debug-utils extension.
fn validation_available(entry: &Entry) -> Result<bool> {
    let layers = entry
        .enumerate_instance_layer_properties()
        .initializing("instance layer query")?;
    let has_layer = layers
        .iter()
        .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

    let extensions = entry
        .enumerate_instance_extension_properties(None)
        .initializing("instance extension query")?;
    let has_debug_utils = extensions
        .iter()
        .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == DebugUtils::name());

    if !has_layer || !has_debug_utils {
        log::warn!("Validation requested but not installed, continuing without it");
    }
    Ok(has_layer && has_debug_utils)
}

fn create_instance(
    entry: &Entry,
    app_name: &str,
    display_handle: raw_window_handle::RawDisplayHandle,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name_cstr =
        CString::new(app_name).map_err(|e| RenderError::init("application name", e))?;
    let engine_name = c"vk-triangle";

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name_cstr)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_0);

    // Surface extensions for this platform
    let mut extensions: Vec<*const c_char> =
        ash_window::enumerate_required_extensions(display_handle)
            .initializing("surface extension lookup")?
            .to_vec();
    if enable_validation {
        extensions.push(DebugUtils::name().as_ptr());
    }
    check_instance_extensions(entry, &extensions)?;

    let layer_names = if enable_validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    unsafe { entry.create_instance(&create_info, None) }.initializing("Vulkan instance")
}

fn check_instance_extensions(entry: &Entry, required: &[*const c_char]) -> Result<()> {
    let available = entry
        .enumerate_instance_extension_properties(None)
        .initializing("instance extension query")?;

    for &name in required {
        let name = unsafe { CStr::from_ptr(name) };
        let found = available
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name);
        if !found {
            return Err(RenderError::init(
                "Vulkan instance",
                format!("missing instance extension {}", name.to_string_lossy()),
            ));
        }
    }
    Ok(())
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .creating("debug messenger")?;

    Ok((debug_utils, messenger))
}

/// Snapshot every GPU, then let `select_device` decide.
fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.initializing("physical device list")?;

    let candidates = devices
        .iter()
        .map(|&device| describe_device(instance, surface_loader, surface, device))
        .collect::<Result<Vec<_>>>()?;

    let (index, families) = select_device(&candidates, &required_device_extensions())?;
    Ok((devices[index], families))
}

fn describe_device(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> Result<DeviceCandidate> {
    let props = unsafe { instance.get_physical_device_properties(device) };
    let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
        .initializing("device extension query")?
        .iter()
        .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
        .collect();

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut queue_families = Vec::with_capacity(families.len());
    for (index, family) in families.iter().enumerate() {
        // Present support is per family and per surface, never assumed
        let present = present_support(
            unsafe {
                surface_loader.get_physical_device_surface_support(device, index as u32, surface)
            },
            &name,
            index,
        );

        queue_families.push(QueueFamilySupport {
            graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            present,
        });
    }

    Ok(DeviceCandidate {
        name,
        extensions,
        queue_families,
    })
}

/// A failed support query only rules out that family
fn present_support(query: ash::prelude::VkResult<bool>, device_name: &str, family: usize) -> bool {
    query.unwrap_or_else(|e| {
        log::debug!("{}: present support query for family {} failed: {}", device_name, family, e);
        false
    })
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: QueueFamilyIndices,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let queue_priorities = [1.0];
    let queue_create_infos: Vec<_> = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let extensions: Vec<_> = required_device_extensions()
        .iter()
        .map(|name| name.as_ptr())
        .collect();
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .creating("logical device")?;

    let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
    let present_queue = unsafe { device.get_device_queue(families.present, 0) };

    Ok((device, graphics_queue, present_queue))
}

fn log_device_info(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: QueueFamilyIndices,
) {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };

    log::info!(
        "Selected GPU: {} ({:?})",
        unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
        properties.device_type
    );
    log::info!(
        "API Version: {}.{}.{}",
        vk::api_version_major(properties.api_version),
        vk::api_version_minor(properties.api_version),
        vk::api_version_patch(properties.api_version)
    );
    log::info!(
        "Queue families: graphics={} present={}{}",
        families.graphics,
        families.present,
        if families.is_shared() { " (shared)" } else { "" }
    );
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

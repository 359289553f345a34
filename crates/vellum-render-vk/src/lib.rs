use anyhow::{anyhow, Context, Result};
#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;
use ash::khr::{surface, swapchain};
use ash::util::read_spv;
use ash::{vk, Entry, Instance};
use glam::Mat4;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::io::Cursor;
use thiserror::Error;
use tracing::{error, info};
use vellum_geom::{DrawList, Vertex};
use vellum_render::{RenderSize, Renderer};

/// Frames the CPU may record ahead of the GPU. Independent of the
/// swapchain image count.
const FRAMES_IN_FLIGHT: usize = 2;

/// Upper bound on a frame-slot fence wait. Hitting it means the device is
/// lost or the cycle deadlocked; surfaced as an error, never ignored.
const SLOT_FENCE_TIMEOUT_NS: u64 = 5_000_000_000;

#[cfg(debug_assertions)]
type DebugState = vk::DebugUtilsMessengerEXT;
#[cfg(not(debug_assertions))]
type DebugState = ();

pub struct VkRenderer {
    instance: ash::Instance,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,

    phys: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,

    swapchain_loader: swapchain::Device,
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,

    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,

    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    pipeline_samples: vk::SampleCountFlags,

    cmd_pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    frame_cursor: usize,

    msaa: Option<MsaaTarget>,
    sample_count: vk::SampleCountFlags,
    supported_samples: vk::SampleCountFlags,

    clear: vk::ClearValue,
    paused: bool,
    cfg: RuntimeConfig,

    #[cfg(debug_assertions)]
    debug_messenger: vk::DebugUtilsMessengerEXT,
}

/// Per-frame resource bundle, reused round-robin by the cycle.
///
/// A slot may only be touched again once `in_flight` has signaled; the
/// slot's command buffer and vertex buffer are guaranteed idle from then
/// on. The vertex buffer starts out null and is created/grown on first
/// upload.
struct FrameSlot {
    cmd: vk::CommandBuffer,
    in_flight: vk::Fence,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    vertex_buf: vk::Buffer,
    vertex_mem: vk::DeviceMemory,
    vertex_cap: vk::DeviceSize,
}

/// Offscreen multisampled color target, resolved into the swapchain image
/// every frame. Extent-dependent: rebuilt on resize.
struct MsaaTarget {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

#[derive(Clone, Copy, Debug)]
struct SwapchainConfig {
    hint: RenderSize,
    vsync: bool,
    vsync_mode: VkVsyncMode,
}

struct SwapchainBundle {
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
}

#[derive(Clone, Copy, Debug)]
struct RuntimeConfig {
    vsync: bool,
    vsync_mode: VkVsyncMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            vsync_mode: VkVsyncMode::Mailbox,
        }
    }
}

impl RuntimeConfig {
    fn to_swapchain_config(&self, hint: RenderSize) -> SwapchainConfig {
        SwapchainConfig {
            hint,
            vsync: self.vsync,
            vsync_mode: self.vsync_mode,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VkVsyncMode {
    Fifo,    // Target monitor refresh rate
    Mailbox, // Smart Vsync, fps uncapped
}

/// Per-frame failures the cycle must tell apart: a stale surface is
/// recoverable (rebuild the swapchain and retry next tick), anything else
/// is not.
#[derive(Debug, Error)]
enum FrameError {
    #[error("surface out of date")]
    SurfaceOutOfDate,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Transform block pushed to the vertex stage every frame.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PushTransform {
    proj: Mat4,
    model: Mat4,
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    _severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if !data.is_null() {
        let msg = std::ffi::CStr::from_ptr((*data).p_message);
        eprintln!("[Vulkan] {:?}", msg);
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Result<DebugState> {
    let debug_loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    Ok(debug_loader.create_debug_utils_messenger(&ci, None)?)
}

#[cfg(not(debug_assertions))]
unsafe fn create_debug_messenger(
    _entry: &ash::Entry,
    _instance: &ash::Instance,
) -> Result<DebugState> {
    Ok(())
}

#[cfg(debug_assertions)]
unsafe fn destroy_debug_messenger(entry: &ash::Entry, instance: &ash::Instance, dbg: DebugState) {
    let loader = ext_debug::Instance::new(entry, instance);
    loader.destroy_debug_utils_messenger(dbg, None);
}

#[cfg(not(debug_assertions))]
unsafe fn destroy_debug_messenger(
    _entry: &ash::Entry,
    _instance: &ash::Instance,
    _dbg: DebugState,
) {
    // no-op
}

// STRICT TEARDOWN ORDER:
// - Wait all slot fences
// - device_wait_idle()
// - Destroy pipeline/layout BEFORE swapchain
// - Destroy image views BEFORE swapchain
// - Free command buffers BEFORE destroying their pool
// - Destroy swapchain BEFORE device
// - Destroy per-slot syncs + vertex buffers BEFORE device
// - Destroy surface AFTER device; instance last.
impl Drop for VkRenderer {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        unsafe {
            let entry = Entry::linked();
            destroy_debug_messenger(&entry, &self.instance, self.debug_messenger);
        }

        unsafe {
            let d = &self.device;

            // 1) WAIT ALL SLOT FENCES
            //    Ensures no submission still references slot resources.
            if !self.slots.is_empty() {
                let fences: Vec<_> = self.slots.iter().map(|s| s.in_flight).collect();
                let _ = d.wait_for_fences(&fences, true, u64::MAX);
            }

            // 2) QUIESCE DEVICE (covers any remaining queue work)
            d.device_wait_idle().ok();

            // 3) PIPELINE & LAYOUT BEFORE SWAPCHAIN (pipeline depends on sc format)
            d.destroy_pipeline(self.pipeline, None);
            d.destroy_pipeline_layout(self.pipeline_layout, None);

            // 4) IMAGE VIEWS BEFORE SWAPCHAIN (views are created from sc images)
            for &iv in &self.image_views {
                d.destroy_image_view(iv, None);
            }

            // 5) FREE COMMAND BUFFERS BEFORE DESTROYING THEIR POOL
            let cmds: Vec<_> = self.slots.iter().map(|s| s.cmd).collect();
            if !cmds.is_empty() {
                d.free_command_buffers(self.cmd_pool, &cmds);
            }
            d.destroy_command_pool(self.cmd_pool, None);

            // 6) DESTROY SWAPCHAIN BEFORE DEVICE
            self.swapchain_loader
                .destroy_swapchain(self.swapchain, None);

            // 7) DESTROY PER-SLOT SYNCS + VERTEX BUFFERS BEFORE DEVICE
            for s in &self.slots {
                d.destroy_fence(s.in_flight, None);
                d.destroy_semaphore(s.image_available, None);
                d.destroy_semaphore(s.render_finished, None);
                if s.vertex_buf != vk::Buffer::null() {
                    d.destroy_buffer(s.vertex_buf, None);
                    d.free_memory(s.vertex_mem, None);
                }
            }
            //    And the multisample target
            if let Some(msaa) = &self.msaa {
                d.destroy_image_view(msaa.view, None);
                d.destroy_image(msaa.image, None);
                d.free_memory(msaa.memory, None);
            }

            // 8) DESTROY DEVICE, THEN SURFACE, THEN INSTANCE
            d.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

// Info only
fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        _ => "OTHER",
    }
}
fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    mode: VkVsyncMode,
) -> vk::PresentModeKHR {
    if !vsync {
        return [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO);
    }
    match mode {
        VkVsyncMode::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        // FIFO is the only mode the spec guarantees
        _ => vk::PresentModeKHR::FIFO,
    }
}

fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Next frame-slot index; wraps at the pool size.
#[inline]
fn next_slot(cursor: usize, pool_len: usize) -> usize {
    (cursor + 1) % pool_len
}

/// Byte capacity for a slot vertex buffer holding `needed` bytes:
/// power-of-two growth with a floor, so steady frames stop reallocating.
fn vertex_buffer_capacity(needed: vk::DeviceSize) -> vk::DeviceSize {
    const MIN_CAPACITY: vk::DeviceSize = 64 * 1024;
    needed.next_power_of_two().max(MIN_CAPACITY)
}

/// Largest device-supported sample count not exceeding the request.
fn pick_sample_count(supported: vk::SampleCountFlags, requested: u32) -> vk::SampleCountFlags {
    let ladder = [
        (8u32, vk::SampleCountFlags::TYPE_8),
        (4, vk::SampleCountFlags::TYPE_4),
        (2, vk::SampleCountFlags::TYPE_2),
    ];
    for (n, flag) in ladder {
        if requested >= n && supported.contains(flag) {
            return flag;
        }
    }
    vk::SampleCountFlags::TYPE_1
}

fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize].property_flags.contains(flags)
        })
        .ok_or_else(|| anyhow!("no suitable memory type (bits {type_bits:#x}, flags {flags:?})"))
}

unsafe fn create_instance(entry: &Entry, display_raw: RawDisplayHandle) -> Result<Instance> {
    let app = std::ffi::CString::new("vellum").unwrap();

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let ext_slice = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?;

    #[cfg(debug_assertions)]
    let ext_vec = {
        let mut v = ext_slice.to_vec();
        v.push(ash::ext::debug_utils::NAME.as_ptr());
        v
    };
    #[cfg(not(debug_assertions))]
    let ext_vec = ext_slice.to_vec();

    #[cfg(debug_assertions)]
    let layers = [std::ffi::CString::new("VK_LAYER_KHRONOS_validation").unwrap()];
    #[cfg(debug_assertions)]
    let layer_ptrs: Vec<*const i8> = layers.iter().map(|l| l.as_ptr()).collect();

    let (enabled_layer_count, pp_enabled_layer_names) = {
        #[cfg(debug_assertions)]
        {
            (layer_ptrs.len() as u32, layer_ptrs.as_ptr())
        }
        #[cfg(not(debug_assertions))]
        {
            (0u32, std::ptr::null())
        }
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count,
        pp_enabled_layer_names,
        ..Default::default()
    };

    Ok(entry.create_instance(&create_info, None)?)
}

unsafe fn init_instance_and_surface(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
) -> Result<(
    ash::Entry,
    ash::Instance,
    surface::Instance,
    vk::SurfaceKHR,
    DebugState,
)> {
    // STRICT ORDER:
    // 1) Create VkInstance (enables platform WSI + debug ext)
    // 2) Create VkSurfaceKHR FROM THIS INSTANCE
    // 3) (Later) Query physical devices/queues AGAINST THIS SURFACE
    // Changing this order => surface may be incompatible with chosen device/queue.

    let dh = display
        .display_handle()
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .as_raw();
    let wh = window
        .window_handle()
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .as_raw();

    let entry = Entry::linked();
    let instance = create_instance(&entry, dh).context("create_instance")?;

    let surface_loader = surface::Instance::new(&entry, &instance);
    let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
        .context("ash_window::create_surface")?;

    let debug_state = create_debug_messenger(&entry, &instance)?;

    Ok((entry, instance, surface_loader, surface, debug_state))
}

unsafe fn pick_device_and_queue(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    for phys in instance.enumerate_physical_devices()? {
        let qprops = instance.get_physical_device_queue_family_properties(phys);

        for (i, q) in qprops.iter().enumerate() {
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && surf_i
                    .get_physical_device_surface_support(phys, i as u32, surface)
                    .unwrap_or(false)
            {
                return Ok((phys, i as u32));
            }
        }
    }
    Err(anyhow!("no suitable physical device/queue family"))
}

unsafe fn create_device(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<(ash::Device, vk::Queue)> {
    // STRICT ORDER (feature pNext chain): feats13 -> feats12 -> feats2.
    // Wrong chain = undefined features; validation won't always catch it.

    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let dev_api = instance.get_physical_device_properties(phys).api_version;
    let maj = vk::api_version_major(dev_api);
    let min = vk::api_version_minor(dev_api);
    if maj == 1 && min < 3 {
        return Err(anyhow!(
            "device reports Vulkan {maj}.{min}; 1.3 (dynamic rendering + sync2) required"
        ));
    }

    let device_exts = [swapchain::NAME.as_ptr()];

    let mut feats13 = vk::PhysicalDeviceVulkan13Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
        synchronization2: vk::TRUE,
        dynamic_rendering: vk::TRUE,
        ..Default::default()
    };
    let mut feats12 = vk::PhysicalDeviceVulkan12Features {
        s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES,
        ..Default::default()
    };
    let mut feats2 = vk::PhysicalDeviceFeatures2 {
        s_type: vk::StructureType::PHYSICAL_DEVICE_FEATURES_2,
        ..Default::default()
    };
    feats12.p_next = (&mut feats13) as *mut _ as *mut _;
    feats2.p_next = (&mut feats12) as *mut _ as *mut _;

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        p_next: (&mut feats2) as *mut _ as *const _,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    let device = instance
        .create_device(phys, &dinfo, None)
        .context("create_device")?;

    let queue = device.get_device_queue(queue_family, 0);
    Ok((device, queue))
}

fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> (vk::SurfaceFormatKHR, &'static str) {
    if let Some(f) = formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB)
    {
        return (f, "bgra8_srgb");
    }
    if let Some(f) = formats
        .iter()
        .copied()
        .find(|f| f.format == vk::Format::R8G8B8A8_SRGB)
    {
        return (f, "rgba8_srgb");
    }
    if let Some(f) = formats.iter().copied().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    }) {
        return (f, "bgra8_unorm_srgbcs");
    }

    (formats[0], "driver_default")
}

unsafe fn create_swapchain_bundle(
    device: &ash::Device,
    surf_i: &surface::Instance,
    swap_d: &swapchain::Device,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    old_swapchain: vk::SwapchainKHR,
    cfg: SwapchainConfig,
) -> Result<SwapchainBundle> {
    // --- Query surface capabilities / formats / present modes ---
    let caps = surf_i.get_physical_device_surface_capabilities(phys, surface)?;
    let formats = surf_i.get_physical_device_surface_formats(phys, surface)?;
    let modes = surf_i.get_physical_device_surface_present_modes(phys, surface)?;

    // --- Choose (format, colorspace) and present mode based on config ---
    let (surf_format, pick_reason) = pick_surface_format(&formats);
    // Prefer MAILBOX if vsync==true && mode==Mailbox (& available), else FIFO fallback
    let present_mode = choose_present_mode(&modes, cfg.vsync, cfg.vsync_mode);
    // Resolve desired extent respecting min/max if current_extent is UINT_MAX (free-size)
    let extent = extent_from_caps(&caps, cfg.hint);

    // --- Decide image count ---
    // Heuristic: one more than minimum (for better overlap) but capped by max (0 == "no max").
    let min_count = if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    };

    info!(
        "reason: {}, format: {} / cs {:?}, present_mode: {}, vsync={}, mode={:?}, extent: {}x{}, images(min={} → picked={})",
        pick_reason,
        fmt_name(surf_format.format),
        surf_format.color_space,
        pm_name(present_mode),
        cfg.vsync,
        cfg.vsync_mode,
        extent.width,
        extent.height,
        caps.min_image_count,
        min_count
    );

    // --- Surface transform ---
    // Prefer IDENTITY if supported (common), otherwise use current to avoid extra blits.
    let pre_transform = if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    };

    // --- Swapchain create info ---
    // IMPORTANT: image_usage must match how we use the images; we only render
    // (or resolve) into them.
    let swap_info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface,
        min_image_count: min_count,
        image_format: surf_format.format,
        image_color_space: surf_format.color_space,
        image_extent: extent,
        image_array_layers: 1, // non-stereo
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: vk::SharingMode::EXCLUSIVE, // single graphics queue family
        pre_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE, // ignore window alpha
        present_mode,
        clipped: vk::TRUE, // don't care about obscured pixels
        old_swapchain,     // enables seamless re-creation w/ resource reuse
        ..Default::default()
    };

    // --- Create swapchain + fetch images ---
    let new_swapchain = swap_d.create_swapchain(&swap_info, None)?;
    let images = swap_d.get_swapchain_images(new_swapchain)?;

    // --- Create image views (one per swapchain image) ---
    // View format MUST match swapchain image format for direct rendering.
    let mut views = Vec::with_capacity(images.len());
    for &img in &images {
        let sub = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: img,
            view_type: vk::ImageViewType::TYPE_2D,
            format: surf_format.format,
            subresource_range: sub,
            ..Default::default()
        };
        views.push(device.create_image_view(&iv_info, None)?);
    }

    Ok(SwapchainBundle {
        swapchain: new_swapchain,
        format: surf_format.format,
        extent,
        images,
        image_views: views,
    })
}

unsafe fn create_msaa_target(
    instance: &ash::Instance,
    device: &ash::Device,
    phys: vk::PhysicalDevice,
    extent: vk::Extent2D,
    format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Result<MsaaTarget> {
    let img_ci = vk::ImageCreateInfo {
        s_type: vk::StructureType::IMAGE_CREATE_INFO,
        image_type: vk::ImageType::TYPE_2D,
        format,
        extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
        mip_levels: 1,
        array_layers: 1,
        samples,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let image = device.create_image(&img_ci, None)?;

    let mem_req = device.get_image_memory_requirements(image);
    let mem_props = instance.get_physical_device_memory_properties(phys);
    let mem_type_idx = find_memory_type(
        &mem_props,
        mem_req.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let alloc = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: mem_req.size,
        memory_type_index: mem_type_idx,
        ..Default::default()
    };
    let memory = device.allocate_memory(&alloc, None)?;
    device.bind_image_memory(image, memory, 0)?;

    let sub = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };
    let view_ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: sub,
        ..Default::default()
    };
    let view = device.create_image_view(&view_ci, None)?;
    Ok(MsaaTarget {
        image,
        memory,
        view,
    })
}

unsafe fn create_command_pool(device: &ash::Device, queue_family: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: queue_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    Ok(device.create_command_pool(&pool_info, None)?)
}

/// Fixed pool of per-frame slots. Fences start SIGNALED so the first use
/// of a slot does not block; vertex buffers are created lazily on first
/// upload.
unsafe fn create_frame_slots(
    device: &ash::Device,
    cmd_pool: vk::CommandPool,
    count: usize,
) -> Result<Vec<FrameSlot>> {
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: cmd_pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: count as u32,
        ..Default::default()
    };
    let cmds = device.allocate_command_buffers(&alloc_info)?;

    let sem_ci = vk::SemaphoreCreateInfo::default();
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };

    let mut slots = Vec::with_capacity(count);
    for &cmd in &cmds {
        slots.push(FrameSlot {
            cmd,
            in_flight: device.create_fence(&fence_ci, None)?,
            image_available: device.create_semaphore(&sem_ci, None)?,
            render_finished: device.create_semaphore(&sem_ci, None)?,
            vertex_buf: vk::Buffer::null(),
            vertex_mem: vk::DeviceMemory::null(),
            vertex_cap: 0,
        });
    }
    Ok(slots)
}

unsafe fn create_pipeline(
    device: &ash::Device,
    color_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    // STRICT: color_attachment_formats and sample count MUST match the
    // current swapchain/msaa target. On either changing, the pipeline must
    // be rebuilt before recording.

    // --- Load + create shader modules (destroyed before return) ---
    let vs_bytes = include_bytes!(concat!(env!("OUT_DIR"), "/ui.vert.spv"));
    let fs_bytes = include_bytes!(concat!(env!("OUT_DIR"), "/ui.frag.spv"));
    let vs_code = read_spv(&mut Cursor::new(&vs_bytes[..]))?;
    let fs_code = read_spv(&mut Cursor::new(&fs_bytes[..]))?;
    let vs_ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: vs_code.as_ptr(),
        code_size: vs_code.len() * 4,
        ..Default::default()
    };
    let fs_ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: fs_code.as_ptr(),
        code_size: fs_code.len() * 4,
        ..Default::default()
    };
    let vs = device.create_shader_module(&vs_ci, None)?;
    let fs = device.create_shader_module(&fs_ci, None)?;
    let entry = std::ffi::CString::new("main").unwrap();

    // --- Shader stage infos ---
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    // --- Fixed-function pipeline states ---
    // Vertex input: the batched stream, pos (2×f32) then color (4×f32), tightly packed
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attrs = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32A32_SFLOAT,
            offset: 8,
        },
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: attrs.len() as u32,
        p_vertex_attribute_descriptions: attrs.as_ptr(),
        ..Default::default()
    };
    // Input assembly (flat triangle list, no index buffer)
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    // Dynamic state (viewport/scissor set at record time)
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: std::ptr::null(), // dynamic
        scissor_count: 1,
        p_scissors: std::ptr::null(), // dynamic
        ..Default::default()
    };
    // Rasterization. NO CULLING: the tessellator emits arc fans and filler
    // quads with mixed winding.
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    // Multisampling: must match the offscreen color target
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: samples,
        ..Default::default()
    };
    // Straight-alpha blending for translucent UI colors
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    // --- Pipeline layout: one push-constant block for the transform ---
    let push_range = vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: std::mem::size_of::<PushTransform>() as u32,
    };
    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        push_constant_range_count: 1,
        p_push_constant_ranges: &push_range,
        ..Default::default()
    };
    let layout = device.create_pipeline_layout(&layout_info, None)?;

    // --- Dynamic rendering info (core 1.3 replacement for render passes) ---
    let rendering = vk::PipelineRenderingCreateInfo {
        s_type: vk::StructureType::PIPELINE_RENDERING_CREATE_INFO,
        color_attachment_count: 1,
        p_color_attachment_formats: &color_format,
        ..Default::default()
    };

    // --- Graphics pipeline create info (glues everything together) ---
    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        p_next: (&rendering as *const _) as *const _,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        ..Default::default()
    };

    // --- Create pipeline; destroy shader modules afterwards ---
    let pipelines = match device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    ) {
        Ok(p) => p,
        Err((_, err)) => return Err(anyhow!("create_graphics_pipelines failed: {:?}", err)),
    };
    device.destroy_shader_module(vs, None);
    device.destroy_shader_module(fs, None);

    Ok((layout, pipelines[0]))
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
) -> Result<VkRenderer> {
    // 1) Instance + surface
    let (_entry, instance, surface_loader, surface, debug_state) =
        init_instance_and_surface(window, display)?;

    // 2) Pick device/queue family (graphics + present on one family)
    let (phys, queue_family) = pick_device_and_queue(&instance, &surface_loader, surface)?;

    // 3) Create device (Vulkan 1.3: dynamic rendering + sync2)
    let (device, queue) = create_device(&instance, phys, queue_family)?;

    // 4) WSI device wrapper
    let swapchain_loader = swapchain::Device::new(&instance, &device);

    // 5) Initial runtime knobs + multisampling ceiling
    let cfg = RuntimeConfig::default();
    let supported_samples = instance
        .get_physical_device_properties(phys)
        .limits
        .framebuffer_color_sample_counts;
    let sample_count = pick_sample_count(supported_samples, 4);

    // 6) Swapchain bundle + size-dependent msaa target
    let bundle = create_swapchain_bundle(
        &device,
        &surface_loader,
        &swapchain_loader,
        phys,
        surface,
        vk::SwapchainKHR::null(),
        cfg.to_swapchain_config(size),
    )?;
    let msaa = if sample_count != vk::SampleCountFlags::TYPE_1 {
        Some(create_msaa_target(
            &instance,
            &device,
            phys,
            bundle.extent,
            bundle.format,
            sample_count,
        )?)
    } else {
        None
    };

    // 7) Pipeline + frame slot pool (slot count independent of image count)
    let (pipeline_layout, pipeline) = create_pipeline(&device, bundle.format, sample_count)?;
    let cmd_pool = create_command_pool(&device, queue_family)?;
    let slots = create_frame_slots(&device, cmd_pool, FRAMES_IN_FLIGHT)?;

    Ok(VkRenderer {
        instance,
        surface_loader,
        surface,

        phys,
        device,
        queue,

        swapchain_loader,
        swapchain: bundle.swapchain,
        format: bundle.format,
        extent: bundle.extent,

        images: bundle.images,
        image_views: bundle.image_views,

        pipeline_layout,
        pipeline,
        pipeline_samples: sample_count,

        cmd_pool,
        slots,
        frame_cursor: 0,

        msaa,
        sample_count,
        supported_samples,

        clear: vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.02, 0.02, 0.04, 1.0],
            },
        },
        paused: false,
        cfg,

        #[cfg(debug_assertions)]
        debug_messenger: debug_state,
    })
}

impl VkRenderer {
    pub fn set_vsync_mode(&mut self, mode: VkVsyncMode) {
        if self.cfg.vsync_mode == mode {
            return;
        }
        self.cfg.vsync_mode = mode;
        let want = RenderSize {
            width: self.extent.width,
            height: self.extent.height,
        };
        let _ = unsafe { self.recreate_swapchain(want) };
    }

    pub fn set_msaa_samples(&mut self, samples: u32) {
        let want = pick_sample_count(self.supported_samples, samples);
        if want == self.sample_count {
            return;
        }
        self.sample_count = want;
        let size = RenderSize {
            width: self.extent.width,
            height: self.extent.height,
        };
        let _ = unsafe { self.recreate_swapchain(size) };
    }

    #[inline]
    unsafe fn transition_to_color(&self, cmd: vk::CommandBuffer, image: vk::Image) {
        let subrange = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        let pre_barrier = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: vk::PipelineStageFlags2::TOP_OF_PIPE,
            src_access_mask: vk::AccessFlags2::empty(),
            dst_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags2::COLOR_ATTACHMENT_READ,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            image,
            subresource_range: subrange,
            ..Default::default()
        };

        let dep_pre = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            image_memory_barrier_count: 1,
            p_image_memory_barriers: &pre_barrier,
            ..Default::default()
        };
        self.device.cmd_pipeline_barrier2(cmd, &dep_pre);
    }

    #[inline]
    unsafe fn transition_to_present(&self, cmd: vk::CommandBuffer, image: vk::Image) {
        let subrange = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        let post_barrier = vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            src_stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            dst_stage_mask: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            dst_access_mask: vk::AccessFlags2::empty(),
            old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            image,
            subresource_range: subrange,
            ..Default::default()
        };

        let dep_post = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            image_memory_barrier_count: 1,
            p_image_memory_barriers: &post_barrier,
            ..Default::default()
        };
        self.device.cmd_pipeline_barrier2(cmd, &dep_post);
    }

    /// Color attachment setup: render into the msaa target and resolve into
    /// the swapchain image, or straight into the swapchain image when
    /// multisampling is off.
    #[inline]
    unsafe fn begin_rendering(&self, cmd: vk::CommandBuffer, swap_view: vk::ImageView) {
        let color_att = match &self.msaa {
            Some(msaa) => vk::RenderingAttachmentInfo {
                s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
                image_view: msaa.view,
                image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                resolve_mode: vk::ResolveModeFlags::AVERAGE,
                resolve_image_view: swap_view,
                resolve_image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                clear_value: self.clear,
                ..Default::default()
            },
            None => vk::RenderingAttachmentInfo {
                s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
                image_view: swap_view,
                image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                clear_value: self.clear,
                ..Default::default()
            },
        };
        let rendering_info = vk::RenderingInfo {
            s_type: vk::StructureType::RENDERING_INFO,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
            layer_count: 1,
            color_attachment_count: 1,
            p_color_attachments: &color_att,
            ..Default::default()
        };
        self.device.cmd_begin_rendering(cmd, &rendering_info);
    }

    /// Ensures the slot's vertex buffer holds at least `needed` bytes.
    /// Safe only after the slot's fence has been waited: the old buffer may
    /// be destroyed here.
    unsafe fn grow_vertex_buffer(&mut self, cursor: usize, needed: vk::DeviceSize) -> Result<()> {
        let cap = vertex_buffer_capacity(needed);
        {
            let slot = &self.slots[cursor];
            if slot.vertex_buf != vk::Buffer::null() {
                self.device.destroy_buffer(slot.vertex_buf, None);
                self.device.free_memory(slot.vertex_mem, None);
            }
        }

        let buf_ci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size: cap,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = self
            .device
            .create_buffer(&buf_ci, None)
            .context("create_buffer(vertex)")?;

        let mem_req = self.device.get_buffer_memory_requirements(buffer);
        let mem_props = self.instance.get_physical_device_memory_properties(self.phys);
        let mem_type_idx = find_memory_type(
            &mem_props,
            mem_req.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: mem_req.size,
            memory_type_index: mem_type_idx,
            ..Default::default()
        };
        let memory = self
            .device
            .allocate_memory(&alloc, None)
            .context("allocate_memory(vertex)")?;
        self.device.bind_buffer_memory(buffer, memory, 0)?;

        let slot = &mut self.slots[cursor];
        slot.vertex_buf = buffer;
        slot.vertex_mem = memory;
        slot.vertex_cap = cap;
        Ok(())
    }

    unsafe fn upload_vertices(&mut self, cursor: usize, vertices: &[Vertex]) -> Result<()> {
        if vertices.is_empty() {
            return Ok(());
        }
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let needed = bytes.len() as vk::DeviceSize;
        if self.slots[cursor].vertex_cap < needed {
            self.grow_vertex_buffer(cursor, needed)?;
        }

        let slot = &self.slots[cursor];
        let ptr = self
            .device
            .map_memory(slot.vertex_mem, 0, needed, vk::MemoryMapFlags::empty())
            .context("map_memory(vertex)")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
        self.device.unmap_memory(slot.vertex_mem);
        Ok(())
    }

    unsafe fn record_frame(
        &self,
        cursor: usize,
        image_index: usize,
        vertex_count: u32,
    ) -> Result<()> {
        let slot = &self.slots[cursor];
        let cmd = slot.cmd;

        // reset + begin
        self.device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        self.device.begin_command_buffer(cmd, &begin)?;

        // body
        self.transition_to_color(cmd, self.images[image_index]);
        if let Some(msaa) = &self.msaa {
            self.transition_to_color(cmd, msaa.image);
        }
        self.begin_rendering(cmd, self.image_views[image_index]);

        // An empty batch still clears + presents; just nothing to draw.
        if vertex_count > 0 {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);

            let vp = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: self.extent.width as f32,
                height: self.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            self.device
                .cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
            let sc = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            };
            self.device
                .cmd_set_scissor(cmd, 0, std::slice::from_ref(&sc));

            self.device
                .cmd_bind_vertex_buffers(cmd, 0, &[slot.vertex_buf], &[0]);

            let pc = PushTransform {
                proj: Mat4::orthographic_rh_gl(
                    0.0,
                    self.extent.width as f32,
                    0.0,
                    self.extent.height as f32,
                    -1.0,
                    1.0,
                ),
                model: Mat4::IDENTITY,
            };
            self.device.cmd_push_constants(
                cmd,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(&pc),
            );

            // One draw over the whole batch: every 3 vertices is a triangle.
            self.device.cmd_draw(cmd, vertex_count, 1, 0, 0);
        }

        self.device.cmd_end_rendering(cmd);
        self.transition_to_present(cmd, self.images[image_index]);

        // end
        self.device.end_command_buffer(cmd)?;
        Ok(())
    }

    unsafe fn acquire_image(&self, cursor: usize) -> Result<u32, FrameError> {
        match self.swapchain_loader.acquire_next_image(
            self.swapchain,
            u64::MAX,
            self.slots[cursor].image_available,
            vk::Fence::null(),
        ) {
            // A suboptimal acquire still delivered an image; present will
            // report it and trigger the rebuild.
            Ok((index, _suboptimal)) => Ok(index),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(FrameError::SurfaceOutOfDate),
            Err(e) => Err(FrameError::Other(anyhow!("acquire_next_image: {e:?}"))),
        }
    }

    /// Upload → record → submit for one frame. Runs after the slot fence
    /// was reset; the caller must re-arm the fence if this fails.
    unsafe fn prepare_and_submit(
        &mut self,
        cursor: usize,
        image_index: u32,
        list: &DrawList,
    ) -> Result<()> {
        self.upload_vertices(cursor, list.vertices())?;
        self.record_frame(cursor, image_index as usize, list.len() as u32)?;

        let slot = &self.slots[cursor];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &slot.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &slot.render_finished,
            ..Default::default()
        };
        self.device
            .queue_submit(self.queue, std::slice::from_ref(&submit), slot.in_flight)
            .context("queue_submit")
    }

    unsafe fn present_frame(&self, cursor: usize, image_index: u32) -> Result<(), FrameError> {
        let slot = &self.slots[cursor];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.render_finished,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match self.swapchain_loader.queue_present(self.queue, &present) {
            Ok(false) => Ok(()),
            Ok(true) => Err(FrameError::SurfaceOutOfDate), // suboptimal
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(FrameError::SurfaceOutOfDate),
            Err(e) => Err(FrameError::Other(anyhow!("queue_present: {e:?}"))),
        }
    }

    /// Signals a slot's fence (and consumes its acquire semaphore) with an
    /// empty submission, after a frame had to be abandoned between fence
    /// reset and queue submit. Without this the next use of the slot would
    /// wait forever.
    unsafe fn arm_slot_fence(&self, cursor: usize) -> Result<()> {
        let slot = &self.slots[cursor];
        let wait_stages = [vk::PipelineStageFlags::TOP_OF_PIPE];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            ..Default::default()
        };
        self.device
            .queue_submit(self.queue, std::slice::from_ref(&submit), slot.in_flight)
            .context("queue_submit(slot fence re-arm)")
    }

    // STRICT ORDER (recreate):
    // 1) Wait all slot fences (no submission may reference the old swapchain)
    // 2) device_wait_idle() to avoid destroying in-use views
    // 3) Destroy per-image views + msaa target tied to OLD extent
    // 4) Create NEW swapchain + images + views (+ msaa target)
    // 5) Recreate pipeline ONLY if format or sample count changed
    // Frame slots are sized to the pool, not the surface — NOT touched here.
    unsafe fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()> {
        // Guard min size window
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }

        // 1) Wait all slot fences
        let fences: Vec<_> = self.slots.iter().map(|s| s.in_flight).collect();
        if !fences.is_empty() {
            let _ = self.device.wait_for_fences(&fences, true, u64::MAX);
        }

        // 2) Quiesce device
        self.device.device_wait_idle().ok();

        // 3) Destroy extent-dependent resources tied to the OLD swapchain
        for &iv in &self.image_views {
            self.device.destroy_image_view(iv, None);
        }
        if let Some(msaa) = self.msaa.take() {
            self.device.destroy_image_view(msaa.view, None);
            self.device.destroy_image(msaa.image, None);
            self.device.free_memory(msaa.memory, None);
        }

        // 4a) New swapchain + images + views
        let bundle = create_swapchain_bundle(
            &self.device,
            &self.surface_loader,
            &self.swapchain_loader,
            self.phys,
            self.surface,
            self.swapchain,
            self.cfg.to_swapchain_config(size),
        )?;
        self.swapchain_loader
            .destroy_swapchain(self.swapchain, None);
        let old_format = self.format;
        self.swapchain = bundle.swapchain;
        self.format = bundle.format;
        self.extent = bundle.extent;
        self.images = bundle.images;
        self.image_views = bundle.image_views;

        // 4b) New msaa target at the new extent
        self.msaa = if self.sample_count != vk::SampleCountFlags::TYPE_1 {
            Some(create_msaa_target(
                &self.instance,
                &self.device,
                self.phys,
                self.extent,
                self.format,
                self.sample_count,
            )?)
        } else {
            None
        };

        // 5) Recreate pipeline only if format or sample count changed
        if self.format != old_format || self.pipeline_samples != self.sample_count {
            let (new_layout, new_pipeline) =
                create_pipeline(&self.device, self.format, self.sample_count)?;
            self.device.destroy_pipeline(self.pipeline, None);
            self.device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.pipeline_layout = new_layout;
            self.pipeline = new_pipeline;
            self.pipeline_samples = self.sample_count;
        }

        self.frame_cursor = 0;
        Ok(())
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self> {
        unsafe {
            let r = build_renderer(window, display, size)?;
            info!(
                "Vulkan swapchain ready ({}x{}, fmt {}, {} frames in flight, {:?} msaa)",
                r.extent.width,
                r.extent.height,
                fmt_name(r.format),
                r.slots.len(),
                r.sample_count,
            );
            Ok(r)
        }
    }

    fn set_vsync(&mut self, on: bool) {
        if self.cfg.vsync == on {
            return;
        }
        self.cfg.vsync = on;
        let want = RenderSize {
            width: self.extent.width,
            height: self.extent.height,
        };
        let _ = unsafe { self.recreate_swapchain(want) };
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.width == 0 || size.height == 0 {
            if !self.paused {
                info!("vk: resize to 0x0 → paused=true");
            }

            self.paused = true;
            return Ok(());
        }

        if self.paused {
            info!(
                "vk: resize to {}x{} → paused=false",
                size.width, size.height
            );
        }

        self.paused = false;

        unsafe { self.recreate_swapchain(size) }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        // Picked up by the next frame's recording.
        self.clear = vk::ClearValue {
            color: vk::ClearColorValue { float32: rgba },
        };
    }

    // STRICT PER-FRAME ORDER:
    // 1) wait slot fence (previous use of this slot fully retired)
    // 2) acquire_next_image (signals the slot's acquire semaphore)
    // 3) upload + record + queue_submit (signals render-finished + fence)
    // 4) queue_present (waits on render-finished)
    // 5) clear batch, advance cursor
    // The swapchain image index is the display's choice and is NOT the slot
    // index; never use one for the other.
    fn render(&mut self, list: &mut DrawList) -> Result<()> {
        // Guard on pause
        if self.paused {
            return Ok(());
        }

        unsafe {
            // Guard for min surface
            match self
                .surface_loader
                .get_physical_device_surface_capabilities(self.phys, self.surface)
            {
                Ok(caps) => {
                    if caps.current_extent.width == 0 || caps.current_extent.height == 0 {
                        self.paused = true;
                        info!("vk: current_extent is 0x0 → paused=true");
                        return Ok(());
                    }
                }
                Err(e) => {
                    self.paused = true;
                    info!("vk: surface caps error {:?} → paused=true", e);
                    return Ok(());
                }
            }

            // 1) Wait for this slot's previous use to fully retire on the GPU
            let cursor = self.frame_cursor;
            self.device
                .wait_for_fences(&[self.slots[cursor].in_flight], true, SLOT_FENCE_TIMEOUT_NS)
                .context("wait_for_fences(frame slot): device lost or presentation stalled")?;

            // 2) Acquire. A stale surface restarts the cycle WITHOUT
            // advancing the cursor; the slot fence is still signaled.
            let image_index = match self.acquire_image(cursor) {
                Ok(index) => index,
                Err(FrameError::SurfaceOutOfDate) => {
                    let want = RenderSize {
                        width: self.extent.width,
                        height: self.extent.height,
                    };
                    let _ = self.recreate_swapchain(want);
                    return Ok(());
                }
                Err(FrameError::Other(e)) => return Err(e),
            };

            // The image is ours; only now un-signal the fence so the early
            // returns above leave the slot re-waitable.
            self.device.reset_fences(&[self.slots[cursor].in_flight])?;

            // 3) Upload + record + submit; 4) present. Transient failures
            // drop the frame but still advance, so one bad frame cannot
            // stall the pool.
            match self.prepare_and_submit(cursor, image_index, list) {
                Ok(()) => match self.present_frame(cursor, image_index) {
                    Ok(()) => {}
                    Err(FrameError::SurfaceOutOfDate) => {
                        let want = RenderSize {
                            width: self.extent.width,
                            height: self.extent.height,
                        };
                        let _ = self.recreate_swapchain(want);
                    }
                    Err(FrameError::Other(e)) => {
                        error!("present failed, frame dropped: {e:#}");
                    }
                },
                Err(e) => {
                    error!("frame dropped: {e:#}");
                    self.arm_slot_fence(cursor)
                        .context("re-arm slot fence after dropped frame")?;
                }
            }

            // 5) Advance: batch is consumed, next frame uses the next slot
            list.clear();
            self.frame_cursor = next_slot(self.frame_cursor, self.slots.len());

            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── frame cursor ──────────────────────────────────────────────────────

    #[test]
    fn frame_cursor_wraps_over_a_pool_of_two() {
        let mut cursor = 0;
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(cursor);
            cursor = next_slot(cursor, 2);
        }
        assert_eq!(seen, [0, 1, 0, 1]);
    }

    #[test]
    fn frame_cursor_wraps_over_a_pool_of_three() {
        let mut cursor = 2;
        cursor = next_slot(cursor, 3);
        assert_eq!(cursor, 0);
    }

    // ── vertex buffer sizing ──────────────────────────────────────────────

    #[test]
    fn vertex_buffer_capacity_has_a_floor() {
        assert_eq!(vertex_buffer_capacity(1), 64 * 1024);
        assert_eq!(vertex_buffer_capacity(64 * 1024), 64 * 1024);
    }

    #[test]
    fn vertex_buffer_capacity_grows_in_powers_of_two() {
        assert_eq!(vertex_buffer_capacity(64 * 1024 + 1), 128 * 1024);
        assert_eq!(vertex_buffer_capacity(300_000), 512 * 1024);
    }

    // ── msaa sample selection ─────────────────────────────────────────────

    #[test]
    fn sample_count_clamps_to_device_support() {
        let supported = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4;
        assert_eq!(pick_sample_count(supported, 8), vk::SampleCountFlags::TYPE_4);
        assert_eq!(pick_sample_count(supported, 4), vk::SampleCountFlags::TYPE_4);
        assert_eq!(pick_sample_count(supported, 3), vk::SampleCountFlags::TYPE_2);
        assert_eq!(pick_sample_count(supported, 1), vk::SampleCountFlags::TYPE_1);
        assert_eq!(pick_sample_count(supported, 0), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn sample_count_falls_back_to_single_sample() {
        assert_eq!(
            pick_sample_count(vk::SampleCountFlags::TYPE_1, 8),
            vk::SampleCountFlags::TYPE_1
        );
    }
}

// Shared fakes for exercising the compositor core through its public API:
// a recording display controller with signalable imported events, a renderer
// that completes instantly, and an allocator whose negotiation outcomes are
// scripted per collection.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use parking_lot::Mutex;

use strata::allocator::{
    BufferAllocator, BufferCollectionConstraints, CollectionHandle, CollectionInfo,
    CollectionToken,
};
use strata::color::ColorConversion;
use strata::controller::{
    AlphaMode, ClientCompositionOp, ConfigResult, ConfigStamp, Display, DisplayController,
    EventId, Frame, ImageConfig, LayerId,
};
use strata::fence::Fence;
use strata::renderer::Renderer;
use strata::transform::DisplayTransform;
use strata::types::{
    BufferCollectionUsage, CollectionId, DisplayId, DisplayInfo, ImageId, ImageMetadata,
    ImageRect, PixelFormat, PixelFormatKind, RenderData, SizeU,
};
use strata::{CompositorConfig, StandardReleaseFenceManager, StrataCompositor};

pub fn bgra() -> PixelFormat {
    PixelFormat::linear(PixelFormatKind::Bgra32)
}

pub fn nv12() -> PixelFormat {
    PixelFormat::linear(PixelFormatKind::Nv12)
}

// ---------------------------------------------------------------------------
// Display controller fake

/// Every staging/commit call the compositor issues, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum ControllerOp {
    SetDisplayLayers { display: DisplayId, layers: Vec<LayerId> },
    SetLayerPrimaryConfig { layer: LayerId, config: ImageConfig },
    SetLayerPrimaryPosition { layer: LayerId, transform: DisplayTransform, src: Frame, dst: Frame },
    SetLayerPrimaryAlpha { layer: LayerId, mode: AlphaMode, alpha: f32 },
    SetLayerImage { layer: LayerId, image: ImageId, wait: EventId, signal: EventId },
    SetLayerColorConfig { layer: LayerId, rgba: [u8; 4] },
    SetDisplayColorConversion { display: DisplayId, coefficients: [f32; 9] },
    ImportImage { collection: CollectionId, image: ImageId },
    CheckConfig { discard: bool },
    ApplyConfig,
}

#[derive(Default)]
pub struct ControllerState {
    pub ops: Vec<ControllerOp>,
    /// Imported fence handles, signalable from tests as the hardware would.
    pub events: HashMap<EventId, Fence>,
    /// Scripted results for non-discard `check_config` calls; `Ok` once
    /// drained.
    pub check_results: VecDeque<ConfigResult>,
    pub imported_collections: Vec<CollectionId>,
    pub released_collections: Vec<CollectionId>,
    pub imported_images: Vec<ImageId>,
    pub released_images: Vec<ImageId>,
    pub minimum_rgb: Option<u8>,
    pub fail_collection_import: bool,
    pub fail_minimum_rgb: bool,
    applied: u64,
    next_layer: u64,
    next_event: u64,
}

/// Clonable handle; all clones share the same recorded state.
#[derive(Clone, Default)]
pub struct FakeDisplayController {
    pub state: Arc<Mutex<ControllerState>>,
}

impl FakeDisplayController {
    pub fn ops(&self) -> Vec<ControllerOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    /// Signals an imported event, as the hardware does at image retirement.
    pub fn signal_event(&self, event: EventId) {
        self.state.lock().events[&event].signal();
    }

    pub fn event_is_signaled(&self, event: EventId) -> bool {
        self.state.lock().events[&event].is_signaled()
    }

    /// Queue one failing result for the next non-discard config check.
    pub fn reject_next_check(&self) {
        self.state.lock().check_results.push_back(ConfigResult::UnsupportedConfig);
    }

    pub fn latest_stamp(&self) -> ConfigStamp {
        ConfigStamp(self.state.lock().applied)
    }

    /// The signal event of the most recent `set_layer_image` op.
    pub fn last_layer_image(&self) -> Option<(LayerId, ImageId, EventId, EventId)> {
        self.state.lock().ops.iter().rev().find_map(|op| match op {
            ControllerOp::SetLayerImage { layer, image, wait, signal } => {
                Some((*layer, *image, *wait, *signal))
            }
            _ => None,
        })
    }
}

impl DisplayController for FakeDisplayController {
    fn create_layer(&mut self) -> Result<LayerId> {
        let mut state = self.state.lock();
        state.next_layer += 1;
        Ok(LayerId(state.next_layer))
    }

    fn destroy_layer(&mut self, _layer: LayerId) -> Result<()> {
        Ok(())
    }

    fn set_display_layers(&mut self, display: DisplayId, layers: &[LayerId]) -> Result<()> {
        self.state
            .lock()
            .ops
            .push(ControllerOp::SetDisplayLayers { display, layers: layers.to_vec() });
        Ok(())
    }

    fn import_buffer_collection(
        &mut self,
        collection: CollectionId,
        _token: Box<dyn CollectionToken>,
        _config: ImageConfig,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_collection_import {
            bail!("collection import refused");
        }
        state.imported_collections.push(collection);
        Ok(())
    }

    fn release_buffer_collection(&mut self, collection: CollectionId) -> Result<()> {
        self.state.lock().released_collections.push(collection);
        Ok(())
    }

    fn import_image(
        &mut self,
        _config: ImageConfig,
        collection: CollectionId,
        image: ImageId,
        _vmo_index: u32,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.imported_images.push(image);
        state.ops.push(ControllerOp::ImportImage { collection, image });
        Ok(())
    }

    fn release_image(&mut self, image: ImageId) -> Result<()> {
        self.state.lock().released_images.push(image);
        Ok(())
    }

    fn import_event(&mut self, fence: Fence) -> Result<EventId> {
        let mut state = self.state.lock();
        state.next_event += 1;
        let id = EventId(state.next_event);
        state.events.insert(id, fence);
        Ok(id)
    }

    fn release_event(&mut self, event: EventId) -> Result<()> {
        self.state.lock().events.remove(&event);
        Ok(())
    }

    fn set_layer_primary_config(&mut self, layer: LayerId, config: ImageConfig) -> Result<()> {
        self.state.lock().ops.push(ControllerOp::SetLayerPrimaryConfig { layer, config });
        Ok(())
    }

    fn set_layer_primary_position(
        &mut self,
        layer: LayerId,
        transform: DisplayTransform,
        src: Frame,
        dst: Frame,
    ) -> Result<()> {
        self.state
            .lock()
            .ops
            .push(ControllerOp::SetLayerPrimaryPosition { layer, transform, src, dst });
        Ok(())
    }

    fn set_layer_primary_alpha(&mut self, layer: LayerId, mode: AlphaMode, alpha: f32) -> Result<()> {
        self.state.lock().ops.push(ControllerOp::SetLayerPrimaryAlpha { layer, mode, alpha });
        Ok(())
    }

    fn set_layer_image(
        &mut self,
        layer: LayerId,
        image: ImageId,
        wait: EventId,
        signal: EventId,
    ) -> Result<()> {
        self.state.lock().ops.push(ControllerOp::SetLayerImage { layer, image, wait, signal });
        Ok(())
    }

    fn set_layer_color_config(
        &mut self,
        layer: LayerId,
        _format: PixelFormat,
        rgba: [u8; 4],
    ) -> Result<()> {
        self.state.lock().ops.push(ControllerOp::SetLayerColorConfig { layer, rgba });
        Ok(())
    }

    fn set_display_color_conversion(
        &mut self,
        display: DisplayId,
        _preoffsets: [f32; 3],
        coefficients: [f32; 9],
        _postoffsets: [f32; 3],
    ) -> Result<()> {
        self.state
            .lock()
            .ops
            .push(ControllerOp::SetDisplayColorConversion { display, coefficients });
        Ok(())
    }

    fn check_config(&mut self, discard: bool) -> Result<(ConfigResult, Vec<ClientCompositionOp>)> {
        let mut state = self.state.lock();
        state.ops.push(ControllerOp::CheckConfig { discard });
        if discard {
            return Ok((ConfigResult::Ok, Vec::new()));
        }
        let result = state.check_results.pop_front().unwrap_or(ConfigResult::Ok);
        Ok((result, Vec::new()))
    }

    fn apply_config(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.applied += 1;
        state.ops.push(ControllerOp::ApplyConfig);
        Ok(())
    }

    fn latest_applied_config_stamp(&mut self) -> Result<ConfigStamp> {
        Ok(ConfigStamp(self.state.lock().applied))
    }

    fn set_minimum_rgb(&mut self, minimum: u8) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_minimum_rgb {
            bail!("minimum RGB not supported");
        }
        state.minimum_rgb = Some(minimum);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Renderer fake

#[derive(Clone, Debug)]
pub struct RenderCall {
    pub target: ImageId,
    pub rectangle_count: usize,
    pub images: Vec<ImageId>,
    pub multiply_colors: Vec<[f32; 4]>,
    pub apply_cc: bool,
}

#[derive(Default)]
pub struct RendererState {
    pub render_calls: Vec<RenderCall>,
    pub imported_collections: Vec<(CollectionId, BufferCollectionUsage)>,
    pub released_collections: Vec<(CollectionId, BufferCollectionUsage)>,
    pub imported_images: Vec<ImageId>,
    pub released_images: Vec<ImageId>,
    pub color_conversions: Vec<ColorConversion>,
    pub fail_collection_import: bool,
    pub fail_image_import: bool,
    pub protected_supported: bool,
    pub requires_protected: bool,
}

/// Completes every render immediately, signaling all fences it is given.
#[derive(Clone, Default)]
pub struct FakeRenderer {
    pub state: Arc<Mutex<RendererState>>,
}

impl FakeRenderer {
    pub fn render_calls(&self) -> Vec<RenderCall> {
        self.state.lock().render_calls.clone()
    }
}

impl Renderer for FakeRenderer {
    fn import_buffer_collection(
        &self,
        collection: CollectionId,
        _token: Box<dyn CollectionToken>,
        usage: BufferCollectionUsage,
        _size: Option<SizeU>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_collection_import && usage == BufferCollectionUsage::ClientImage {
            bail!("renderer refused the collection");
        }
        state.imported_collections.push((collection, usage));
        Ok(())
    }

    fn release_buffer_collection(&self, collection: CollectionId, usage: BufferCollectionUsage) {
        self.state.lock().released_collections.push((collection, usage));
    }

    fn import_buffer_image(
        &self,
        metadata: &ImageMetadata,
        _usage: BufferCollectionUsage,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_image_import {
            bail!("renderer refused the image");
        }
        state.imported_images.push(metadata.identifier);
        Ok(())
    }

    fn release_buffer_image(&self, image: ImageId) {
        self.state.lock().released_images.push(image);
    }

    fn render(
        &self,
        target: &ImageMetadata,
        rectangles: &[ImageRect],
        images: &[ImageMetadata],
        signal_fences: &[Fence],
        apply_color_conversion: bool,
    ) -> Result<()> {
        self.state.lock().render_calls.push(RenderCall {
            target: target.identifier,
            rectangle_count: rectangles.len(),
            images: images.iter().map(|image| image.identifier).collect(),
            multiply_colors: images.iter().map(|image| image.multiply_color).collect(),
            apply_cc: apply_color_conversion,
        });
        for fence in signal_fences {
            fence.signal();
        }
        Ok(())
    }

    fn choose_preferred_pixel_format(&self, available: &[PixelFormat]) -> PixelFormat {
        available[0]
    }

    fn supports_render_in_protected(&self) -> bool {
        self.state.lock().protected_supported
    }

    fn requires_render_in_protected(&self, _images: &[ImageMetadata]) -> bool {
        self.state.lock().requires_protected
    }

    fn set_color_conversion(&self, conversion: &ColorConversion) {
        self.state.lock().color_conversions.push(*conversion);
    }
}

// ---------------------------------------------------------------------------
// Allocator fakes

/// Scripted negotiation outcome shared by every token of one collection.
pub struct CollectionSpec {
    pub allocated: bool,
    pub pixel_format: PixelFormat,
    pub fail_duplicate: AtomicBool,
    pub attach_converted: AtomicBool,
    pub constraints: Mutex<Vec<BufferCollectionConstraints>>,
    pub names: Mutex<Vec<String>>,
    pub closed_handles: AtomicUsize,
}

impl CollectionSpec {
    pub fn allocated(pixel_format: PixelFormat) -> Arc<Self> {
        Arc::new(Self {
            allocated: true,
            pixel_format,
            fail_duplicate: AtomicBool::new(false),
            attach_converted: AtomicBool::new(false),
            constraints: Mutex::new(Vec::new()),
            names: Mutex::new(Vec::new()),
            closed_handles: AtomicUsize::new(0),
        })
    }

    pub fn unallocated() -> Arc<Self> {
        Arc::new(Self {
            allocated: false,
            pixel_format: bgra(),
            fail_duplicate: AtomicBool::new(false),
            attach_converted: AtomicBool::new(false),
            constraints: Mutex::new(Vec::new()),
            names: Mutex::new(Vec::new()),
            closed_handles: AtomicUsize::new(0),
        })
    }

    pub fn was_attach_converted(&self) -> bool {
        self.attach_converted.load(Ordering::SeqCst)
    }
}

pub struct FakeToken {
    pub spec: Arc<CollectionSpec>,
}

impl FakeToken {
    pub fn new(spec: Arc<CollectionSpec>) -> Box<Self> {
        Box::new(Self { spec })
    }
}

impl CollectionToken for FakeToken {
    fn duplicate_sync(&mut self, count: usize) -> Result<Vec<Box<dyn CollectionToken>>> {
        if self.spec.fail_duplicate.load(Ordering::SeqCst) {
            bail!("token channel closed");
        }
        Ok((0..count)
            .map(|_| FakeToken::new(self.spec.clone()) as Box<dyn CollectionToken>)
            .collect())
    }

    fn bind(self: Box<Self>) -> Result<Box<dyn CollectionHandle>> {
        Ok(Box::new(FakeCollection { spec: self.spec }))
    }
}

pub struct FakeCollection {
    spec: Arc<CollectionSpec>,
}

impl CollectionHandle for FakeCollection {
    fn set_name(&mut self, _priority: u32, name: &str) {
        self.spec.names.lock().push(name.to_string());
    }

    fn set_constraints(&mut self, constraints: BufferCollectionConstraints) -> Result<()> {
        self.spec.constraints.lock().push(constraints);
        Ok(())
    }

    fn check_buffers_allocated(&mut self) -> Result<bool> {
        Ok(self.spec.allocated)
    }

    fn wait_for_buffers_allocated(&mut self) -> Result<CollectionInfo> {
        if !self.spec.allocated {
            bail!("allocation failed");
        }
        let buffer_count = self
            .spec
            .constraints
            .lock()
            .last()
            .map(|constraints| constraints.min_buffer_count_for_camping.max(1))
            .unwrap_or(1);
        Ok(CollectionInfo { buffer_count, pixel_format: self.spec.pixel_format })
    }

    fn attach_token(&mut self) -> Result<Box<dyn CollectionToken>> {
        self.spec.attach_converted.store(true, Ordering::SeqCst);
        Ok(FakeToken::new(self.spec.clone()))
    }

    fn close(&mut self) {
        self.spec.closed_handles.fetch_add(1, Ordering::SeqCst);
    }
}

/// Allocator used for render-target rings; every collection it mints
/// negotiates successfully with the given format.
pub struct FakeAllocator {
    pub pixel_format: PixelFormat,
    pub specs: Mutex<Vec<Arc<CollectionSpec>>>,
}

impl FakeAllocator {
    pub fn new(pixel_format: PixelFormat) -> Arc<Self> {
        Arc::new(Self { pixel_format, specs: Mutex::new(Vec::new()) })
    }
}

impl BufferAllocator for FakeAllocator {
    fn allocate_collection(&self) -> Result<Box<dyn CollectionToken>> {
        let spec = CollectionSpec::allocated(self.pixel_format);
        self.specs.lock().push(spec.clone());
        Ok(FakeToken::new(spec))
    }
}

// ---------------------------------------------------------------------------
// Test rig

pub const DISPLAY_SIZE: SizeU = SizeU { width: 1920, height: 1080 };

pub struct TestRig {
    pub compositor: Arc<StrataCompositor>,
    pub controller: FakeDisplayController,
    pub renderer: FakeRenderer,
    pub allocator: Arc<FakeAllocator>,
    pub display: Display,
}

impl TestRig {
    /// Compositor plus one 1920x1080 display with a 2-buffer ring.
    pub fn new() -> Self {
        Self::with_config(CompositorConfig::default())
    }

    pub fn with_config(config: CompositorConfig) -> Self {
        Self::with_config_and_targets(config, 2)
    }

    pub fn with_config_and_targets(config: CompositorConfig, num_render_targets: u32) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let controller = FakeDisplayController::default();
        let renderer = FakeRenderer::default();
        let allocator = FakeAllocator::new(bgra());
        let compositor = StrataCompositor::new(
            Box::new(controller.clone()),
            Arc::new(renderer.clone()),
            allocator.clone(),
            Box::new(StandardReleaseFenceManager::new()),
            config,
        );
        let display = Display::new(DisplayId(1));
        let info = DisplayInfo { dimensions: DISPLAY_SIZE, formats: vec![bgra()] };
        compositor
            .add_display(&display, info, num_render_targets)
            .expect("add_display failed");
        Self { compositor, controller, renderer, allocator, display }
    }

    /// Imports a collection and one image from it, returning the metadata.
    pub fn import_client_image(&self, spec: Arc<CollectionSpec>, width: u32, height: u32) -> ImageMetadata {
        let metadata = self.client_image_metadata(spec, width, height);
        self.compositor
            .import_buffer_image(&metadata, BufferCollectionUsage::ClientImage)
            .expect("image import failed");
        metadata
    }

    /// Imports the collection only and builds metadata for its first image.
    pub fn client_image_metadata(
        &self,
        spec: Arc<CollectionSpec>,
        width: u32,
        height: u32,
    ) -> ImageMetadata {
        let collection = CollectionId::generate();
        self.compositor
            .import_buffer_collection(
                collection,
                FakeToken::new(spec),
                BufferCollectionUsage::ClientImage,
                None,
            )
            .expect("collection import failed");
        ImageMetadata {
            identifier: ImageId::generate(),
            collection_id: collection,
            width,
            height,
            ..Default::default()
        }
    }

    /// Submits one frame for the rig's display and returns the callback
    /// fire counter.
    pub fn present(&self, frame_number: u64, data: RenderData) -> Arc<AtomicUsize> {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_callback = fired.clone();
        self.compositor.render_frame(
            frame_number,
            Instant::now(),
            &[data],
            vec![],
            Box::new(move |_timestamp| {
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
        );
        fired
    }

    /// Delivers a vsync for the most recently applied configuration.
    pub fn vsync_latest(&self) {
        let stamp = self.controller.latest_stamp();
        self.compositor.on_vsync(Instant::now(), stamp);
    }

    /// Render data pairing each image with a rect covering the display.
    pub fn fullscreen_data(&self, images: &[ImageMetadata]) -> RenderData {
        RenderData {
            display_id: self.display.id(),
            rectangles: images.iter().map(|_| ImageRect::full_display(DISPLAY_SIZE)).collect(),
            images: images.to_vec(),
        }
    }
}

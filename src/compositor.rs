//! The frame orchestrator: tries direct scanout, falls back to GPU
//! composition, applies the winning configuration and retires it against
//! vsync.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Context;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::allocator::{BufferAllocator, CollectionInfo, CollectionToken};
use crate::buffers::BufferRegistry;
use crate::color::{ColorConversion, ColorConversionStateMachine};
use crate::config::CompositorConfig;
use crate::controller::{ConfigResult, ConfigStamp, Display, DisplayController};
use crate::error::CompositorError;
use crate::fence::{Fence, FenceRegistry, FrameEventData};
use crate::release::{PresentCallback, ReleaseFenceManager};
use crate::renderer::Renderer;
use crate::scanout::{apply_layer_image, assign_render_data};
use crate::targets::{allocate_render_targets, DisplayEngineData, LAYERS_PER_DISPLAY};
use crate::types::{
    BufferCollectionUsage, CollectionId, DisplayId, DisplayInfo, ImageId, ImageMetadata,
    ImageRect, RenderData, SizeU, Timestamp,
};

/// One applied configuration awaiting its vsync.
#[derive(Clone, Copy, Debug)]
struct PendingApply {
    config_stamp: ConfigStamp,
    frame_number: u64,
}

/// Everything mutated per frame, serialized under one mutex. The display
/// controller handle lives here so controller round-trips are serialized
/// with vsync handling.
struct CompositorState {
    controller: Box<dyn DisplayController>,
    release_fence_manager: Box<dyn ReleaseFenceManager>,
    buffers: BufferRegistry,
    fences: FenceRegistry,
    color_conversion: ColorConversionStateMachine,
    displays: HashMap<DisplayId, DisplayEngineData>,
    display_infos: HashMap<DisplayId, DisplayInfo>,
    /// Images staged into the config being built; their signal events are
    /// cleared only after the config passes its check.
    pending_images_in_config: Vec<ImageId>,
    /// FIFO of applied configs not yet retired by vsync.
    pending_applies: VecDeque<PendingApply>,
    last_presented_stamp: Option<ConfigStamp>,
}

/// The display compositor core.
///
/// Each frame is attempted as a set of hardware display layers (direct
/// scanout); when the hardware declines, the renderer composites the scene
/// into a back-buffer that is scanned out instead. Client buffers are
/// negotiated once across both consumers, and every applied configuration is
/// retired against a vsync stamp through the release-fence manager.
pub struct StrataCompositor {
    renderer: Arc<dyn Renderer>,
    allocator: Arc<dyn BufferAllocator>,
    config: CompositorConfig,
    state: Mutex<CompositorState>,
}

impl StrataCompositor {
    /// Creates the compositor around its four collaborators.
    ///
    /// Returned as an `Arc` because displays hold a weak reference back into
    /// the compositor for vsync delivery.
    pub fn new(
        controller: Box<dyn DisplayController>,
        renderer: Arc<dyn Renderer>,
        allocator: Arc<dyn BufferAllocator>,
        release_fence_manager: Box<dyn ReleaseFenceManager>,
        config: CompositorConfig,
    ) -> Arc<Self> {
        info!("🧱 Initializing compositor core ({:?} import mode)", config.import_mode);
        Arc::new(Self {
            renderer,
            allocator,
            state: Mutex::new(CompositorState {
                controller,
                release_fence_manager,
                buffers: BufferRegistry::new(config.import_mode),
                fences: FenceRegistry::new(),
                color_conversion: ColorConversionStateMachine::new(),
                displays: HashMap::new(),
                display_infos: HashMap::new(),
                pending_images_in_config: Vec::new(),
                pending_applies: VecDeque::new(),
                last_presented_stamp: None,
            }),
            config,
        })
    }

    /// Imports a client buffer collection, splitting its token between the
    /// renderer, a local observation binding and the display controller.
    pub fn import_buffer_collection(
        &self,
        collection: CollectionId,
        token: Box<dyn CollectionToken>,
        usage: BufferCollectionUsage,
        size: Option<SizeU>,
    ) -> crate::error::Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.buffers.import_collection(
            collection,
            token,
            usage,
            size,
            &*self.renderer,
            state.controller.as_mut(),
        )
    }

    /// Releases a collection from both consumers and drops its state.
    pub fn release_buffer_collection(&self, collection: CollectionId, usage: BufferCollectionUsage) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.buffers.release_collection(collection, usage, &*self.renderer, state.controller.as_mut());
    }

    /// Imports one image; the first image of a collection decides whether
    /// the collection can be scanned out directly.
    pub fn import_buffer_image(
        &self,
        metadata: &ImageMetadata,
        usage: BufferCollectionUsage,
    ) -> crate::error::Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.buffers.import_image(metadata, usage, &*self.renderer, state.controller.as_mut())
    }

    /// Releases an image from both consumers and drops its fence entry.
    pub fn release_buffer_image(&self, image: ImageId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Err(error) = state.controller.release_image(image) {
            warn!("could not release image {image:?} from display: {error:#}");
        }
        self.renderer.release_buffer_image(image);
        state.fences.release_image(state.controller.as_mut(), image);
    }

    /// Registers a display: preallocates its hardware layers, installs the
    /// vsync callback, and (when `num_render_targets > 0`) negotiates the
    /// back-buffer ring used for GPU fallback.
    ///
    /// Returns the ring's allocation outcome so the caller can hand the
    /// buffers to screenshot tooling, or `None` when no ring was requested.
    pub fn add_display(
        self: &Arc<Self>,
        display: &Display,
        info: DisplayInfo,
        num_render_targets: u32,
    ) -> anyhow::Result<Option<CollectionInfo>> {
        let display_id = display.id();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        anyhow::ensure!(
            !state.displays.contains_key(&display_id),
            "display {display_id:?} already exists"
        );
        anyhow::ensure!(!info.formats.is_empty(), "display {display_id:?} reports no formats");

        let pixel_format = self.renderer.choose_preferred_pixel_format(&info.formats);

        // A couple of layers up front for direct composition of render data.
        let mut layers = Vec::with_capacity(LAYERS_PER_DISPLAY);
        for _ in 0..LAYERS_PER_DISPLAY {
            layers.push(state.controller.create_layer().context("could not create display layer")?);
        }
        let mut engine = DisplayEngineData::new(layers);

        let mut collection_info = None;
        if num_render_targets > 0 {
            let (targets, allocated) = allocate_render_targets(
                &*self.allocator,
                &*self.renderer,
                state.controller.as_mut(),
                &mut state.buffers,
                false,
                num_render_targets,
                info.dimensions,
                pixel_format,
                self.config.cpu_readable_render_targets,
            )?;
            engine.render_targets = targets;
            for _ in 0..num_render_targets {
                engine.frame_events.push(
                    FrameEventData::new(state.controller.as_mut())
                        .context("could not create frame events")?,
                );
            }
            engine.target_count = num_render_targets as usize;

            // Protected pools are small; preallocate rather than risk
            // blocking on exhausted protected memory mid-session.
            if self.renderer.supports_render_in_protected() {
                let (protected, _) = allocate_render_targets(
                    &*self.allocator,
                    &*self.renderer,
                    state.controller.as_mut(),
                    &mut state.buffers,
                    true,
                    num_render_targets,
                    info.dimensions,
                    pixel_format,
                    false,
                )?;
                engine.protected_render_targets = protected;
            }
            collection_info = Some(allocated);
        }

        let dimensions = info.dimensions;
        state.displays.insert(display_id, engine);
        state.display_infos.insert(display_id, info);
        drop(guard);

        // The callback holds a weak reference so display lifetime does not
        // extend the compositor; installed outside the state lock to keep
        // lock order one-way.
        let weak = Arc::downgrade(self);
        display.set_vsync_callback(Box::new(move |timestamp, stamp| {
            if let Some(compositor) = weak.upgrade() {
                compositor.on_vsync(timestamp, stamp);
            }
        }));

        info!(
            "🖥️ Added display {display_id:?} ({}x{}, {num_render_targets} render targets)",
            dimensions.width, dimensions.height
        );
        Ok(collection_info)
    }

    /// Presents one frame across all displays in `render_data_list`.
    ///
    /// The frame is staged for direct scanout first; if the scene or the
    /// hardware declines, the renderer composites each display into its next
    /// back-buffer. On success the applied configuration joins the pending
    /// FIFO and `callback` fires when vsync retires it; if both paths fail
    /// the frame is dropped and the callback is never invoked.
    pub fn render_frame(
        &self,
        frame_number: u64,
        presentation_time: Timestamp,
        render_data_list: &[RenderData],
        release_fences: Vec<Fence>,
        callback: PresentCallback,
    ) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        debug!("🎬 Frame {frame_number} (target {presentation_time:?})");

        // Any state staged by a previous, failed frame must not leak in.
        state.discard_config();

        let hardware_ok =
            !self.config.disable_direct_scanout && state.try_direct_scanout(render_data_list);

        // Skip the check round-trip when the planner already declined.
        let fallback_to_gpu = !hardware_ok || state.check_config().is_err();

        if fallback_to_gpu {
            state.discard_config();
            if !state.perform_gpu_composition(
                &*self.renderer,
                &self.config,
                frame_number,
                render_data_list,
                release_fences,
                callback,
            ) {
                warn!("frame {frame_number} failed both composition paths; dropping");
                return;
            }
        } else {
            // The config, including any staged color conversion, is good.
            state.color_conversion.apply_config_succeeded();
            let pending = std::mem::take(&mut state.pending_images_in_config);
            state.fences.unsignal_images(&pending);
            state.release_fence_manager.on_direct_scanout_frame(frame_number, release_fences, callback);
        }

        let stamp = match state.apply_config() {
            Ok(stamp) => stamp,
            Err(error) => {
                error!("dropping frame {frame_number}: {error}");
                return;
            }
        };
        state.pending_applies.push_back(PendingApply { config_stamp: stamp, frame_number });
    }

    /// Handles one vsync event: retires every pending configuration up to
    /// and including the one matching `stamp`.
    ///
    /// Duplicate stamps (unchanged scene) and stamps applied by other
    /// clients of the controller are ignored.
    pub fn on_vsync(&self, timestamp: Timestamp, stamp: ConfigStamp) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.last_presented_stamp == Some(stamp) {
            return;
        }

        let Some(position) =
            state.pending_applies.iter().position(|pending| pending.config_stamp == stamp)
        else {
            info!("config stamp {} was not applied by this compositor; vsync skipped", stamp.0);
            return;
        };

        let CompositorState { pending_applies, release_fence_manager, .. } = &mut *state;
        for pending in pending_applies.drain(..=position) {
            release_fence_manager.on_vsync(pending.frame_number, timestamp);
        }
        state.last_presented_stamp = Some(stamp);
    }

    /// Records a color conversion to be applied by whichever path presents
    /// the next frame.
    pub fn set_color_conversion(&self, conversion: ColorConversion) {
        let mut guard = self.state.lock();
        guard.color_conversion.set_data(conversion);
        self.renderer.set_color_conversion(&conversion);
    }

    /// Clamps the display's output channels to at least `minimum`. Returns
    /// whether the hardware accepted the clamp.
    pub fn set_minimum_rgb(&self, minimum: u8) -> bool {
        let mut guard = self.state.lock();
        match guard.controller.set_minimum_rgb(minimum) {
            Ok(()) => true,
            Err(error) => {
                warn!("set_minimum_rgb({minimum}) failed: {error:#}");
                false
            }
        }
    }
}

impl Drop for StrataCompositor {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.pending_images_in_config.clear();
        let _ = state.controller.check_config(true);

        let CompositorState { controller, displays, fences, .. } = state;
        for (_, engine) in displays.drain() {
            for layer in engine.layers {
                let _ = controller.destroy_layer(layer);
            }
            for event in engine.frame_events {
                let _ = controller.release_event(event.wait_id);
                let _ = controller.release_event(event.signal_id);
            }
        }
        for (_, event) in fences.drain() {
            let _ = controller.release_event(event.signal_id);
        }
    }
}

impl CompositorState {
    /// Drops whatever configuration is currently staged in the controller.
    fn discard_config(&mut self) {
        self.pending_images_in_config.clear();
        if let Err(error) = self.controller.check_config(true) {
            warn!("could not discard staged config: {error:#}");
        }
    }

    /// Asks the hardware whether the staged configuration can be scanned
    /// out.
    fn check_config(&mut self) -> crate::error::Result<()> {
        match self.controller.check_config(false) {
            Ok((ConfigResult::Ok, _)) => Ok(()),
            Ok((ConfigResult::UnsupportedConfig, ops)) => {
                debug!("display rejected the staged config ({} composition ops suggested)", ops.len());
                Err(CompositorError::CheckConfigFailed)
            }
            Err(error) => Err(CompositorError::ControllerTransportFailed(error)),
        }
    }

    /// Commits the staged configuration and returns its stamp.
    fn apply_config(&mut self) -> crate::error::Result<ConfigStamp> {
        self.controller.apply_config().map_err(CompositorError::ApplyConfigFailed)?;
        self.controller
            .latest_applied_config_stamp()
            .map_err(CompositorError::ControllerTransportFailed)
    }

    /// Stages every display's render data for direct scanout. Returns false
    /// as soon as one display declines; the whole frame then uses the GPU
    /// path.
    fn try_direct_scanout(&mut self, render_data_list: &[RenderData]) -> bool {
        for data in render_data_list {
            let Some(engine) = self.displays.get(&data.display_id) else {
                warn!("render data for unknown display {:?}", data.display_id);
                return false;
            };
            let Some(display_info) = self.display_infos.get(&data.display_id) else {
                warn!("no display info for display {:?}", data.display_id);
                return false;
            };

            if let Err(rejection) = assign_render_data(
                self.controller.as_mut(),
                &self.buffers,
                &mut self.fences,
                engine,
                display_info,
                data,
                &mut self.pending_images_in_config,
            ) {
                debug!("direct scanout rejected for display {:?}: {rejection}", data.display_id);
                return false;
            }

            if let Some(conversion) = self.color_conversion.data_to_apply() {
                if let Err(error) = self.controller.set_display_color_conversion(
                    data.display_id,
                    conversion.preoffsets,
                    conversion.coefficients,
                    conversion.postoffsets,
                ) {
                    error!("could not apply hardware color conversion: {error:#}");
                    return false;
                }
            }
        }
        true
    }

    /// Composites every display's scene into its next back-buffer and
    /// stages the back-buffers as single-layer configurations.
    fn perform_gpu_composition(
        &mut self,
        renderer: &dyn Renderer,
        config: &CompositorConfig,
        frame_number: u64,
        render_data_list: &[RenderData],
        release_fences: Vec<Fence>,
        callback: PresentCallback,
    ) -> bool {
        // Signaled when the final display's composition lands, which also
        // guarantees every earlier display's content finished.
        let render_finished_fence = Fence::new();
        let display_count = render_data_list.len();

        for (index, data) in render_data_list.iter().enumerate() {
            let is_final_display = index + 1 == display_count;

            // The shader applies color conversion on this path; stale
            // hardware conversion would double-apply it.
            if self.color_conversion.gpu_requires_display_clearing() {
                let identity = ColorConversion::IDENTITY;
                if let Err(error) = self.controller.set_display_color_conversion(
                    data.display_id,
                    identity.preoffsets,
                    identity.coefficients,
                    identity.postoffsets,
                ) {
                    error!("could not clear hardware color conversion: {error:#}");
                    return false;
                }
                self.color_conversion.display_cleared();
            }

            let Some(engine) = self.displays.get_mut(&data.display_id) else {
                warn!("render data for unknown display {:?}", data.display_id);
                return false;
            };
            if engine.target_count == 0 {
                warn!("display {:?} has no render targets; dropping frame", data.display_id);
                return false;
            }

            let current = engine.current_target;
            engine.current_target = (engine.current_target + 1) % engine.target_count;
            let targets = if renderer.requires_render_in_protected(&data.images) {
                &engine.protected_render_targets
            } else {
                &engine.render_targets
            };
            debug_assert!(current < targets.len());
            debug_assert!(current < engine.frame_events.len());
            let target = targets[current].clone();

            let event_data = &engine.frame_events[current];
            // The retired event should already be signaled; a miss means the
            // controller is still scanning this slot out.
            if !event_data.signal_event.is_signaled() {
                error!("rendering into an in-use back-buffer on display {:?}", data.display_id);
            }
            event_data.wait_event.reset();
            event_data.signal_event.reset();
            let wait_event = event_data.wait_event.clone();
            let wait_id = event_data.wait_id;
            let signal_id = event_data.signal_id;
            let layer = engine.layers[0];

            let tinted;
            let images: &[ImageMetadata] = if config.visual_debugging {
                tinted = tint_images(&data.images, config.gpu_debug_color);
                &tinted
            } else {
                &data.images
            };

            let apply_cc = self.color_conversion.data_to_apply().is_some();
            let mut signal_fences = vec![wait_event];
            if is_final_display {
                signal_fences.push(render_finished_fence.clone());
            }
            if let Err(error) =
                renderer.render(&target, &data.rectangles, images, &signal_fences, apply_cc)
            {
                error!("renderer failed on display {:?}: {error:#}", data.display_id);
                return false;
            }

            if let Err(error) = self.controller.set_display_layers(data.display_id, &[layer]) {
                error!("could not set display layers: {error:#}");
                return false;
            }
            let Some(target_config) = self.buffers.image_config(&target) else {
                error!("render target collection lost display support");
                return false;
            };
            let full_rect =
                ImageRect::new([0.0, 0.0], [target.width as f32, target.height as f32]);
            if let Err(error) = apply_layer_image(
                self.controller.as_mut(),
                layer,
                &full_rect,
                &target,
                target_config,
                wait_id,
                signal_id,
            ) {
                error!("could not stage back-buffer: {error:#}");
                return false;
            }

            if let Err(error) = self.check_config() {
                error!("both display hardware composition and GPU rendering have failed: {error}");
                return false;
            }
        }

        self.release_fence_manager.on_gpu_composited_frame(
            frame_number,
            render_finished_fence,
            release_fences,
            callback,
        );
        true
    }
}

/// Multiplies the debug tint into every image's multiply color.
fn tint_images(images: &[ImageMetadata], tint: [f32; 4]) -> Vec<ImageMetadata> {
    images
        .iter()
        .map(|image| {
            let mut image = image.clone();
            for (channel, factor) in image.multiply_color.iter_mut().zip(tint) {
                *channel *= factor;
            }
            image
        })
        .collect()
}

//! The display-controller seam: the wire surface the compositor drives and
//! the per-display handle that delivers vsync events.
//!
//! The controller is modeled as a uniquely-owned handle; the compositor keeps
//! it behind its state mutex, so implementations may assume calls are
//! serialized. Methods return `anyhow::Result` for transport failures; the
//! compositor decides per call site whether a failure is fatal, an import
//! error, or a dropped frame.

use anyhow::Result;
use parking_lot::Mutex;

use crate::allocator::CollectionToken;
use crate::fence::Fence;
use crate::transform::DisplayTransform;
use crate::types::{
    CollectionId, DisplayId, ImageId, ImageTiling, PixelFormat, Timestamp,
};

/// Identifies one hardware display layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(pub u64);

/// Identifies an event (fence handle) imported into the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventId(pub u64);

impl EventId {
    /// The null event ID; passed where no fence applies.
    pub const INVALID: Self = EventId(0);
}

/// Opaque, monotonically-increasing identifier of an applied configuration,
/// echoed back in vsync events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigStamp(pub u64);

/// An axis-aligned integer rectangle in controller coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Per-layer alpha behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlphaMode {
    /// Layer is opaque; alpha is ignored.
    Disable,
    /// Layer content has premultiplied alpha.
    Premultiplied,
}

/// The image description the controller receives at import and layer-config
/// time. Field meanings are wire facts and must not drift.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImageConfig {
    /// Width in pixels (0 when unconstrained).
    pub width: u32,
    /// Height in pixels (0 when unconstrained).
    pub height: u32,
    /// Pixel format; `None` states no preference.
    pub pixel_format: Option<PixelFormat>,
    /// Driver tiling mode, derived from the format modifier.
    pub tiling: ImageTiling,
}

impl ImageConfig {
    /// A config with no size, format, or tiling preference. Used when
    /// importing client collections, where the display states its real
    /// constraints during allocation instead.
    pub fn unconstrained() -> Self {
        Self::default()
    }
}

/// Outcome of a `check_config` round-trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigResult {
    /// The staged configuration can be applied.
    Ok,
    /// The hardware cannot scan out the staged configuration.
    UnsupportedConfig,
}

/// A correction the controller suggests when a config check fails.
#[derive(Clone, Copy, Debug)]
pub struct ClientCompositionOp {
    /// The display the correction applies to.
    pub display_id: DisplayId,
    /// The offending layer.
    pub layer_id: LayerId,
}

/// The operations the compositor core issues to display hardware.
pub trait DisplayController: Send {
    /// Creates a hardware layer usable on any of the controller's displays.
    fn create_layer(&mut self) -> Result<LayerId>;

    /// Destroys a previously created layer.
    fn destroy_layer(&mut self, layer: LayerId) -> Result<()>;

    /// Sets the ordered (back-to-front) layer list of a display.
    fn set_display_layers(&mut self, display: DisplayId, layers: &[LayerId]) -> Result<()>;

    /// Registers a buffer collection, consuming its token.
    fn import_buffer_collection(
        &mut self,
        collection: CollectionId,
        token: Box<dyn CollectionToken>,
        config: ImageConfig,
    ) -> Result<()>;

    /// Releases a previously imported buffer collection.
    fn release_buffer_collection(&mut self, collection: CollectionId) -> Result<()>;

    /// Imports one image out of a registered collection.
    fn import_image(
        &mut self,
        config: ImageConfig,
        collection: CollectionId,
        image: ImageId,
        vmo_index: u32,
    ) -> Result<()>;

    /// Releases a previously imported image.
    fn release_image(&mut self, image: ImageId) -> Result<()>;

    /// Registers a fence handle; the controller may wait on or signal it.
    fn import_event(&mut self, fence: Fence) -> Result<EventId>;

    /// Drops a previously imported fence handle.
    fn release_event(&mut self, event: EventId) -> Result<()>;

    /// Stages the image description of a primary layer.
    fn set_layer_primary_config(&mut self, layer: LayerId, config: ImageConfig) -> Result<()>;

    /// Stages source/destination frames and the scanout transform.
    fn set_layer_primary_position(
        &mut self,
        layer: LayerId,
        transform: DisplayTransform,
        src: Frame,
        dst: Frame,
    ) -> Result<()>;

    /// Stages the alpha behavior of a primary layer.
    fn set_layer_primary_alpha(&mut self, layer: LayerId, mode: AlphaMode, alpha: f32)
        -> Result<()>;

    /// Stages an image onto a layer. The controller waits on `wait` before
    /// scanning the image out and signals `signal` once the image has been
    /// replaced by a later configuration.
    fn set_layer_image(
        &mut self,
        layer: LayerId,
        image: ImageId,
        wait: EventId,
        signal: EventId,
    ) -> Result<()>;

    /// Turns a layer into a solid fill of the given 8-bit RGBA color.
    fn set_layer_color_config(
        &mut self,
        layer: LayerId,
        format: PixelFormat,
        rgba: [u8; 4],
    ) -> Result<()>;

    /// Programs the display's hardware color conversion.
    fn set_display_color_conversion(
        &mut self,
        display: DisplayId,
        preoffsets: [f32; 3],
        coefficients: [f32; 9],
        postoffsets: [f32; 3],
    ) -> Result<()>;

    /// Validates the staged configuration; `discard` drops it instead.
    fn check_config(&mut self, discard: bool)
        -> Result<(ConfigResult, Vec<ClientCompositionOp>)>;

    /// Commits the staged configuration to the hardware.
    fn apply_config(&mut self) -> Result<()>;

    /// The stamp of the most recently applied configuration.
    fn latest_applied_config_stamp(&mut self) -> Result<ConfigStamp>;

    /// Clamps every output channel to at least `minimum`.
    fn set_minimum_rgb(&mut self, minimum: u8) -> Result<()>;
}

/// Callback invoked on each vsync with the hardware timestamp and the stamp
/// of the configuration that was on screen.
pub type VsyncCallback = Box<dyn FnMut(Timestamp, ConfigStamp) + Send>;

/// A handle to one physical display, owning its vsync callback slot.
///
/// The compositor installs a callback holding a weak back-reference to
/// itself, so a display outliving the compositor delivers vsyncs into a
/// no-op rather than extending the compositor's lifetime.
pub struct Display {
    id: DisplayId,
    vsync_callback: Mutex<Option<VsyncCallback>>,
}

impl Display {
    /// Creates a handle for the display with the given ID.
    pub fn new(id: DisplayId) -> Self {
        Self { id, vsync_callback: Mutex::new(None) }
    }

    /// The display's ID.
    pub fn id(&self) -> DisplayId {
        self.id
    }

    /// Installs the vsync callback, replacing any previous one.
    pub fn set_vsync_callback(&self, callback: VsyncCallback) {
        *self.vsync_callback.lock() = Some(callback);
    }

    /// Delivers one vsync event to the installed callback, if any. Called by
    /// the wire glue from whatever thread the controller events arrive on.
    pub fn notify_vsync(&self, timestamp: Timestamp, stamp: ConfigStamp) {
        if let Some(callback) = self.vsync_callback.lock().as_mut() {
            callback(timestamp, stamp);
        }
    }
}

//! Core identifiers and per-frame data types shared across the compositor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::transform::{Flip, Orientation};

/// Timestamps attached to vsync events and presentation callbacks.
pub type Timestamp = Instant;

static NEXT_COLLECTION_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one buffer collection across the renderer, the display
/// controller and the local registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(pub u64);

impl CollectionId {
    /// The invalid/null collection ID.
    pub const INVALID: Self = CollectionId(0);

    /// Returns a process-unique collection ID.
    pub fn generate() -> Self {
        CollectionId(NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Check if this is a valid collection ID.
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Identifies one image within a buffer collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u64);

impl ImageId {
    /// The invalid/null image ID. A rectangle carrying this ID is a solid
    /// color fill rather than a sampled image.
    pub const INVALID: Self = ImageId(0);

    /// Returns a process-unique image ID.
    pub fn generate() -> Self {
        ImageId(NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Check if this is a valid image ID.
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Identifies one physical display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayId(pub u64);

/// An unsigned pixel size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeU {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl SizeU {
    /// Convenience constructor.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Pixel format kinds negotiated by the buffer allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormatKind {
    /// 32-bit BGRA.
    Bgra32,
    /// 32-bit RGBA.
    R8g8b8a8,
    /// Two-plane YUV.
    Nv12,
    /// Three-plane YUV.
    I420,
}

/// Memory layout modifier attached to a negotiated pixel format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FormatModifier {
    /// Plain linear layout.
    #[default]
    Linear,
    /// Intel X tiling.
    IntelXTiled,
    /// Intel Y (legacy) tiling.
    IntelYTiled,
    /// Intel Yf tiling.
    IntelYfTiled,
}

/// Tiling mode carried in the display controller's image config.
///
/// The numeric values are display-driver specific; `Simple` is the linear
/// layout every driver accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageTiling {
    /// Linear layout.
    #[default]
    Simple,
    /// X-tiled layout.
    XTiled,
    /// Y (legacy) tiled layout.
    YLegacyTiled,
    /// Yf-tiled layout.
    YfTiled,
}

/// A pixel format as yielded by buffer-collection negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    /// The color format.
    pub kind: PixelFormatKind,
    /// The memory layout modifier.
    pub modifier: FormatModifier,
}

impl PixelFormat {
    /// A linear format of the given kind.
    pub fn linear(kind: PixelFormatKind) -> Self {
        Self { kind, modifier: FormatModifier::Linear }
    }

    /// YUV formats cannot be imported on the direct-scanout path.
    pub fn is_yuv(&self) -> bool {
        matches!(self.kind, PixelFormatKind::Nv12 | PixelFormatKind::I420)
    }

    /// The tiling mode the display controller expects for this format.
    pub fn tiling(&self) -> ImageTiling {
        match self.modifier {
            FormatModifier::Linear => ImageTiling::Simple,
            FormatModifier::IntelXTiled => ImageTiling::XTiled,
            FormatModifier::IntelYTiled => ImageTiling::YLegacyTiled,
            FormatModifier::IntelYfTiled => ImageTiling::YfTiled,
        }
    }
}

/// How a rectangle's image is blended with the content beneath it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    /// Opaque copy; destination is ignored.
    #[default]
    Src,
    /// Premultiplied source-over blending.
    SrcOver,
}

/// Everything the compositor needs to know about one imported image.
#[derive(Clone, Debug)]
pub struct ImageMetadata {
    /// Unique image ID; [`ImageId::INVALID`] marks a solid-color fill.
    pub identifier: ImageId,
    /// The collection the image was allocated from.
    pub collection_id: CollectionId,
    /// Which buffer of the collection holds the pixels.
    pub vmo_index: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Mirroring applied to the image before orientation.
    pub flip: Flip,
    /// Blend mode for composition.
    pub blend_mode: BlendMode,
    /// Normalized RGBA multiply color; also the fill color of solid rects.
    pub multiply_color: [f32; 4],
}

impl Default for ImageMetadata {
    fn default() -> Self {
        Self {
            identifier: ImageId::INVALID,
            collection_id: CollectionId::INVALID,
            vmo_index: 0,
            width: 0,
            height: 0,
            flip: Flip::None,
            blend_mode: BlendMode::Src,
            multiply_color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

/// A screen-space rectangle an image is composited into.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageRect {
    /// Top-left corner in display pixels.
    pub origin: [f32; 2],
    /// Width and height in display pixels.
    pub extent: [f32; 2],
    /// Rotation applied after the image's flip.
    pub orientation: Orientation,
}

impl ImageRect {
    /// An axis-aligned rectangle with no rotation.
    pub fn new(origin: [f32; 2], extent: [f32; 2]) -> Self {
        Self { origin, extent, orientation: Orientation::Deg0 }
    }

    /// A rectangle covering a full display of the given size.
    pub fn full_display(size: SizeU) -> Self {
        Self::new([0.0, 0.0], [size.width as f32, size.height as f32])
    }
}

/// The scene content for one display in one frame: N rectangles, each backed
/// by the image at the same index.
#[derive(Clone, Debug, Default)]
pub struct RenderData {
    /// The display this content targets.
    pub display_id: DisplayId,
    /// Destination rectangles, back to front.
    pub rectangles: Vec<ImageRect>,
    /// One image per rectangle.
    pub images: Vec<ImageMetadata>,
}

/// Static facts about a display, fixed at [`add_display`] time.
///
/// [`add_display`]: crate::StrataCompositor::add_display
#[derive(Clone, Debug)]
pub struct DisplayInfo {
    /// Display size in pixels.
    pub dimensions: SizeU,
    /// Pixel formats the display supports, in preference order.
    pub formats: Vec<PixelFormat>,
}

/// What a buffer collection is imported for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferCollectionUsage {
    /// Client-provided images composited each frame.
    ClientImage,
    /// Back-buffers the renderer composites into.
    RenderTarget,
}

//! The renderer seam: the GPU pipeline the compositor falls back to when
//! display hardware cannot scan a scene out directly.

use anyhow::Result;

use crate::allocator::CollectionToken;
use crate::color::ColorConversion;
use crate::fence::Fence;
use crate::types::{
    BufferCollectionUsage, CollectionId, ImageId, ImageMetadata, ImageRect, PixelFormat, SizeU,
};

/// The GPU pipeline consuming the same client buffers as the display.
///
/// Implementations are internally synchronized; the compositor calls them
/// while holding its state lock.
pub trait Renderer: Send + Sync {
    /// Sets the renderer's constraints on a collection, consuming the token.
    fn import_buffer_collection(
        &self,
        collection: CollectionId,
        token: Box<dyn CollectionToken>,
        usage: BufferCollectionUsage,
        size: Option<SizeU>,
    ) -> Result<()>;

    /// Releases a previously imported collection.
    fn release_buffer_collection(&self, collection: CollectionId, usage: BufferCollectionUsage);

    /// Imports one image of a collection for sampling or rendering.
    fn import_buffer_image(
        &self,
        metadata: &ImageMetadata,
        usage: BufferCollectionUsage,
    ) -> Result<()>;

    /// Releases a previously imported image.
    fn release_buffer_image(&self, image: ImageId);

    /// Composites `images` into `target` at the given rectangles and signals
    /// every fence in `signal_fences` once the pixels have landed. When
    /// `apply_color_conversion` is set, the shader applies the values last
    /// given to [`set_color_conversion`].
    ///
    /// [`set_color_conversion`]: Renderer::set_color_conversion
    fn render(
        &self,
        target: &ImageMetadata,
        rectangles: &[ImageRect],
        images: &[ImageMetadata],
        signal_fences: &[Fence],
        apply_color_conversion: bool,
    ) -> Result<()>;

    /// Picks the renderer's preferred format out of a display's supported
    /// list.
    fn choose_preferred_pixel_format(&self, available: &[PixelFormat]) -> PixelFormat;

    /// Whether the renderer can composite into protected memory.
    fn supports_render_in_protected(&self) -> bool;

    /// Whether any of `images` forces composition into protected memory.
    fn requires_render_in_protected(&self, images: &[ImageMetadata]) -> bool;

    /// Hands the renderer the color-conversion values to use whenever a
    /// render call asks for them.
    fn set_color_conversion(&self, conversion: &ColorConversion);
}

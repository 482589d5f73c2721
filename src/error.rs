//! Error kinds surfaced by the compositor's public API.

use thiserror::Error;

use crate::types::ImageId;

/// Failures surfaced to callers of the import/release and setup entry points.
///
/// Per-frame planning failures are deliberately absent: a scene the display
/// hardware cannot take falls back to GPU composition instead of erroring.
#[derive(Debug, Error)]
pub enum CompositorError {
    /// A buffer-collection token could not be duplicated for one of the
    /// three constraint-setters.
    #[error("could not duplicate buffer collection token")]
    TokenDuplicateFailed(#[source] anyhow::Error),

    /// The renderer refused the buffer collection or image.
    #[error("renderer rejected the buffer collection or image")]
    RendererRejected(#[source] anyhow::Error),

    /// The display controller leg of an import failed, or the collection
    /// turned out not to be display-compatible in enforcing mode.
    #[error("display import failed: {reason}")]
    DisplayImportFailed {
        /// What went wrong on the display leg.
        reason: String,
    },

    /// Image metadata failed validation.
    #[error("invalid image metadata: {0}")]
    ImageInvalid(String),

    /// The image still has a frame in flight on the display.
    #[error("image {0:?} is still in use by the display")]
    ImageInUse(ImageId),

    /// The scene needs more hardware layers than the display owns.
    #[error("scene needs {needed} layers but the display has {available}")]
    LayersExhausted {
        /// Layers the scene would require.
        needed: usize,
        /// Layers preallocated for the display.
        available: usize,
    },

    /// A solid-color rectangle that is not the backmost, display-covering
    /// layer.
    #[error("solid color rectangles must be the backmost, display-covering layer")]
    UnsupportedSolidColorGeometry,

    /// The display controller rejected the staged configuration.
    #[error("display rejected the staged configuration")]
    CheckConfigFailed,

    /// Applying the staged configuration failed.
    #[error("could not apply the display configuration")]
    ApplyConfigFailed(#[source] anyhow::Error),

    /// The display controller channel itself failed.
    #[error("display controller transport failed")]
    ControllerTransportFailed(#[source] anyhow::Error),
}

/// Convenience alias for results carrying a [`CompositorError`].
pub type Result<T> = std::result::Result<T, CompositorError>;

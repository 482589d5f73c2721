//! Strata Display Compositor Core
//!
//! A per-frame engine that presents scenes as hardware display layers
//! (direct scanout) whenever the display controller accepts them, and falls
//! back to GPU composition into a scanned-out back-buffer when it does not.
//! The core arbitrates between two consumers of the same client buffers — a
//! renderer and a display controller — synchronizes frame lifetime with
//! fences, and retires every applied configuration against a vsync stamp.
//!
//! ## Architecture
//!
//! ```text
//!   RenderFrame
//!       │
//!       ▼
//!   discard staged config ──► direct-scanout planner ──► check_config
//!                                   │ rejected                │ rejected
//!                                   ▼                         ▼
//!                             GPU fallback ◄──────────────────┘
//!                       (back-buffer ring + renderer)
//!                                   │
//!                                   ▼
//!                            apply_config ──► pending FIFO ──► OnVsync
//! ```
//!
//! The display controller, renderer, buffer allocator and release-fence
//! bookkeeping are trait seams ([`DisplayController`], [`Renderer`],
//! [`BufferAllocator`], [`ReleaseFenceManager`]); platform glue implements
//! them against real hardware, tests against fakes.
//!
//! [`DisplayController`]: controller::DisplayController
//! [`Renderer`]: renderer::Renderer
//! [`BufferAllocator`]: allocator::BufferAllocator
//! [`ReleaseFenceManager`]: release::ReleaseFenceManager

#![warn(missing_docs, rust_2018_idioms)]

pub mod allocator;
pub mod buffers;
pub mod color;
pub mod compositor;
pub mod config;
pub mod controller;
pub mod error;
pub mod fence;
pub mod release;
pub mod renderer;
mod scanout;
mod targets;
pub mod transform;
pub mod types;

pub use crate::buffers::{BufferCollectionImportMode, BufferRegistry, DisplaySupport};
pub use crate::color::{ColorConversion, ColorConversionStateMachine};
pub use crate::compositor::StrataCompositor;
pub use crate::config::CompositorConfig;
pub use crate::controller::{ConfigStamp, Display, DisplayController};
pub use crate::error::CompositorError;
pub use crate::fence::Fence;
pub use crate::release::{
    PresentCallback, ReleaseFenceManager, StandardReleaseFenceManager,
};
pub use crate::renderer::Renderer;
pub use crate::types::{
    BufferCollectionUsage, CollectionId, DisplayId, DisplayInfo, ImageId, ImageMetadata,
    ImageRect, RenderData, SizeU, Timestamp,
};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

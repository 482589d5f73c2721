//! The buffer-allocator seam: collection tokens, bound collections and the
//! constraint vocabulary the compositor states for its render targets.
//!
//! Tokens are move-only: every hand-off to the renderer, the display
//! controller or a local binding consumes the `Box`, so a token can never be
//! retained after it was sent.

use anyhow::Result;

use crate::types::{PixelFormat, SizeU};

/// How buffers of a collection will be touched by this participant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BufferUsage {
    /// No CPU access; the participant only needs the buffers to exist.
    #[default]
    None,
    /// Frequent CPU writes (debug-readable render targets).
    CpuWriteOften,
}

/// Memory placement requirements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryConstraints {
    /// Buffers must live in protected (secure) memory.
    pub secure_required: bool,
    /// The inaccessible domain is acceptable.
    pub inaccessible_domain_supported: bool,
    /// The CPU domain is acceptable.
    pub cpu_domain_supported: bool,
    /// The RAM domain is acceptable.
    pub ram_domain_supported: bool,
}

/// Image-shape requirements attached to a constraint set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageConstraints {
    /// Minimum image size.
    pub min_size: SizeU,
    /// Required pixel format.
    pub pixel_format: PixelFormat,
}

/// One participant's constraints on a shared buffer collection.
///
/// The default value is the empty constraint set, used for observation
/// bindings that only probe allocation status.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BufferCollectionConstraints {
    /// Buffers this participant needs to hold concurrently.
    pub min_buffer_count_for_camping: u32,
    /// CPU usage pattern.
    pub usage: BufferUsage,
    /// Memory placement requirements, if any.
    pub memory: Option<MemoryConstraints>,
    /// Image-shape requirements, if any.
    pub image: Option<ImageConstraints>,
}

/// The outcome of a successful allocation, as observed by one binding.
#[derive(Clone, Copy, Debug)]
pub struct CollectionInfo {
    /// Number of buffers allocated.
    pub buffer_count: u32,
    /// The pixel format every participant agreed on.
    pub pixel_format: PixelFormat,
}

/// Entry point to the allocator service.
pub trait BufferAllocator: Send + Sync {
    /// Creates a fresh shared collection and returns its root token.
    fn allocate_collection(&self) -> Result<Box<dyn CollectionToken>>;
}

/// A participation right in one shared buffer collection.
pub trait CollectionToken: Send {
    /// Synchronously mints `count` sibling tokens in the same failure
    /// domain.
    fn duplicate_sync(&mut self, count: usize) -> Result<Vec<Box<dyn CollectionToken>>>;

    /// Binds the token into a collection handle, consuming it.
    fn bind(self: Box<Self>) -> Result<Box<dyn CollectionHandle>>;
}

/// A bound participant of a shared buffer collection.
pub trait CollectionHandle: Send {
    /// Attaches a debug name to the collection.
    fn set_name(&mut self, priority: u32, name: &str);

    /// States this participant's constraints.
    fn set_constraints(&mut self, constraints: BufferCollectionConstraints) -> Result<()>;

    /// Non-blocking probe: whether buffers have been allocated successfully.
    fn check_buffers_allocated(&mut self) -> Result<bool>;

    /// Blocks until allocation completes and returns its outcome.
    fn wait_for_buffers_allocated(&mut self) -> Result<CollectionInfo>;

    /// Mints a token in an *independent* failure domain: constraints set
    /// through it may fail without aborting the parent allocation.
    fn attach_token(&mut self) -> Result<Box<dyn CollectionToken>>;

    /// Leaves the collection without failing it.
    fn close(&mut self);
}

/// Consumes `token` and returns an attach token in an independent failure
/// domain, so display constraints may fail without taking the renderer's
/// allocation down with them.
pub(crate) fn convert_to_attach_token(
    token: Box<dyn CollectionToken>,
) -> Result<Box<dyn CollectionToken>> {
    let mut handle = token.bind()?;
    let attach = handle.attach_token()?;
    handle.close();
    Ok(attach)
}

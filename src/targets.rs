//! Per-display engine state: preallocated hardware layers, the back-buffer
//! ring for GPU fallback, and the negotiation that allocates the ring.

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::allocator::{
    BufferAllocator, BufferCollectionConstraints, BufferUsage, CollectionInfo, ImageConstraints,
    MemoryConstraints,
};
use crate::buffers::BufferRegistry;
use crate::controller::{DisplayController, ImageConfig, LayerId};
use crate::fence::FrameEventData;
use crate::renderer::Renderer;
use crate::types::{BufferCollectionUsage, CollectionId, ImageId, ImageMetadata, PixelFormat, SizeU};

/// Hardware layers preallocated per display for direct scanout. Scenes with
/// more images than this fall back to GPU composition.
pub(crate) const LAYERS_PER_DISPLAY: usize = 2;

/// Everything the compositor owns for one display.
pub(crate) struct DisplayEngineData {
    /// Preallocated hardware layers, backmost first.
    pub layers: Vec<LayerId>,
    /// Back-buffer ring the renderer composites into.
    pub render_targets: Vec<ImageMetadata>,
    /// Optional protected-memory ring, preallocated because protected pools
    /// are small and easily exhausted.
    pub protected_render_targets: Vec<ImageMetadata>,
    /// Fence pair per back-buffer slot.
    pub frame_events: Vec<FrameEventData>,
    /// Ring cursor; advances modulo `target_count` per GPU frame.
    pub current_target: usize,
    /// Number of back-buffers in each ring.
    pub target_count: usize,
}

impl DisplayEngineData {
    pub fn new(layers: Vec<LayerId>) -> Self {
        Self {
            layers,
            render_targets: Vec::new(),
            protected_render_targets: Vec::new(),
            frame_events: Vec::new(),
            current_target: 0,
            target_count: 0,
        }
    }
}

/// Negotiates a fresh buffer collection for a display's back-buffer ring
/// across the renderer, the display controller and the compositor's own
/// camping constraints, then imports every buffer as a render-target image.
///
/// Returns the ring's image metadata plus the allocation outcome.
pub(crate) fn allocate_render_targets(
    allocator: &dyn BufferAllocator,
    renderer: &dyn Renderer,
    controller: &mut dyn DisplayController,
    buffers: &mut BufferRegistry,
    protected: bool,
    count: u32,
    size: SizeU,
    pixel_format: PixelFormat,
    cpu_readable: bool,
) -> Result<(Vec<ImageMetadata>, CollectionInfo)> {
    let mut compositor_token = allocator
        .allocate_collection()
        .context("could not allocate render target collection")?;
    let mut duplicates = compositor_token
        .duplicate_sync(2)
        .context("could not duplicate render target tokens")?;
    anyhow::ensure!(duplicates.len() == 2, "expected 2 duplicated tokens");
    let display_token = duplicates.pop().ok_or_else(|| anyhow!("missing display token"))?;
    let renderer_token = duplicates.pop().ok_or_else(|| anyhow!("missing renderer token"))?;

    let collection_id = CollectionId::generate();
    renderer
        .import_buffer_collection(
            collection_id,
            renderer_token,
            BufferCollectionUsage::RenderTarget,
            Some(size),
        )
        .context("renderer rejected the render target collection")?;
    controller
        .import_buffer_collection(
            collection_id,
            display_token,
            ImageConfig { pixel_format: Some(pixel_format), ..ImageConfig::unconstrained() },
        )
        .context("display rejected the render target collection")?;

    // The compositor camps on every buffer of the ring. Debug-readable
    // targets additionally pin the CPU usage and image shape; protected
    // rings must land in secure, inaccessible memory.
    let constraints = if cpu_readable && !protected {
        BufferCollectionConstraints {
            min_buffer_count_for_camping: count,
            usage: BufferUsage::CpuWriteOften,
            memory: None,
            image: Some(ImageConstraints { min_size: size, pixel_format }),
        }
    } else {
        BufferCollectionConstraints {
            min_buffer_count_for_camping: count,
            usage: BufferUsage::None,
            memory: protected.then_some(MemoryConstraints {
                secure_required: true,
                inaccessible_domain_supported: true,
                cpu_domain_supported: false,
                ram_domain_supported: false,
            }),
            image: None,
        }
    };

    let mut local = compositor_token.bind().context("could not bind render target collection")?;
    local.set_name(10, if protected { "StrataProtectedRenderTarget" } else { "StrataRenderTarget" });
    local.set_constraints(constraints).context("could not set render target constraints")?;
    let collection_info = local
        .wait_for_buffers_allocated()
        .context("render target allocation failed")?;
    local.close();

    // Constraints came from the display itself, so this collection is
    // display-compatible by construction.
    buffers.mark_supported(collection_id, collection_info.pixel_format);

    let mut render_targets = Vec::with_capacity(count as usize);
    for vmo_index in 0..count {
        let target = ImageMetadata {
            collection_id,
            identifier: ImageId::generate(),
            vmo_index,
            width: size.width,
            height: size.height,
            ..Default::default()
        };
        buffers
            .import_image(&target, BufferCollectionUsage::RenderTarget, renderer, controller)
            .with_context(|| format!("could not import render target {vmo_index}"))?;
        render_targets.push(target);
    }

    info!(
        "🖼️ Allocated {} {}render targets ({}x{}, {:?})",
        count,
        if protected { "protected " } else { "" },
        size.width,
        size.height,
        collection_info.pixel_format
    );
    Ok((render_targets, collection_info))
}

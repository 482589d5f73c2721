//! Per-collection import state: the three-way token split, display-support
//! probing, and the negotiated pixel format.

use std::collections::HashMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::allocator::{
    convert_to_attach_token, BufferCollectionConstraints, CollectionHandle, CollectionToken,
};
use crate::controller::{DisplayController, ImageConfig};
use crate::error::{CompositorError, Result};
use crate::renderer::Renderer;
use crate::types::{
    BufferCollectionUsage, CollectionId, ImageMetadata, PixelFormat, SizeU,
};

/// How the display controller participates in client-buffer negotiation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BufferCollectionImportMode {
    /// Never attempt direct scanout of client buffers; every frame is GPU
    /// composited.
    RendererOnly,
    /// The display's constraints join the allocation outright; a conflict
    /// fails the whole collection.
    EnforceDisplayConstraints,
    /// The display joins through an attach token, so its constraints may
    /// fail without taking the renderer's allocation down.
    #[default]
    AttemptDisplayConstraints,
}

/// Display compatibility of one collection.
///
/// The negotiated pixel format exists exactly when the collection is
/// supported, and the state never moves back to `Unknown` once decided.
#[derive(Debug, Default)]
pub enum DisplaySupport {
    /// Not yet probed; decided on the first image import.
    #[default]
    Unknown,
    /// Allocation satisfied the display's constraints with this format.
    Supported(PixelFormat),
    /// The display cannot scan buffers of this collection out.
    Unsupported,
}

struct CollectionState {
    support: DisplaySupport,
    /// Empty-constraints binding used to probe allocation status; consumed
    /// by the first probe.
    observation: Option<Box<dyn CollectionHandle>>,
}

/// Tracks every imported buffer collection and its display compatibility.
pub struct BufferRegistry {
    import_mode: BufferCollectionImportMode,
    collections: HashMap<CollectionId, CollectionState>,
}

impl BufferRegistry {
    /// Creates an empty registry operating in `import_mode`.
    pub fn new(import_mode: BufferCollectionImportMode) -> Self {
        Self { import_mode, collections: HashMap::new() }
    }

    /// The mode this registry splits display tokens under.
    pub fn import_mode(&self) -> BufferCollectionImportMode {
        self.import_mode
    }

    /// Imports a client buffer collection, splitting its token three ways:
    /// renderer constraints, a local empty-constraints observation binding,
    /// and (mode permitting) the display controller.
    pub fn import_collection(
        &mut self,
        collection: CollectionId,
        token: Box<dyn CollectionToken>,
        usage: BufferCollectionUsage,
        size: Option<SizeU>,
        renderer: &dyn Renderer,
        controller: &mut dyn DisplayController,
    ) -> Result<()> {
        debug_assert_eq!(usage, BufferCollectionUsage::ClientImage);

        let mut renderer_token = token;
        let mut display_token = renderer_token
            .duplicate_sync(1)
            .map_err(CompositorError::TokenDuplicateFailed)?
            .pop()
            .ok_or_else(|| {
                CompositorError::TokenDuplicateFailed(anyhow::anyhow!("duplicate returned nothing"))
            })?;

        renderer
            .import_buffer_collection(collection, renderer_token, usage, size)
            .map_err(CompositorError::RendererRejected)?;

        match self.import_mode {
            BufferCollectionImportMode::RendererOnly => {
                // No direct-to-display attempt; drop the display leg
                // entirely and decide support on first image import.
                drop(display_token);
                self.collections
                    .insert(collection, CollectionState { support: DisplaySupport::Unknown, observation: None });
                return Ok(());
            }
            BufferCollectionImportMode::EnforceDisplayConstraints => {}
            BufferCollectionImportMode::AttemptDisplayConstraints => {
                display_token = match convert_to_attach_token(display_token) {
                    Ok(attach) => attach,
                    Err(error) => {
                        warn!("could not convert display token to attach token: {error:#}");
                        renderer.release_buffer_collection(collection, usage);
                        return Err(CompositorError::DisplayImportFailed {
                            reason: format!("attach token conversion failed: {error:#}"),
                        });
                    }
                };
            }
        }

        // An empty-constraints duplicate shares the display token's failure
        // domain and is probed later for allocation status.
        let observation = (|| -> anyhow::Result<Box<dyn CollectionHandle>> {
            let observation_token =
                display_token.duplicate_sync(1)?.pop().ok_or_else(|| {
                    anyhow::anyhow!("duplicate returned nothing")
                })?;
            let mut handle = observation_token.bind()?;
            handle.set_constraints(BufferCollectionConstraints::default())?;
            Ok(handle)
        })();
        let observation = match observation {
            Ok(handle) => handle,
            Err(error) => {
                renderer.release_buffer_collection(collection, usage);
                return Err(CompositorError::TokenDuplicateFailed(error));
            }
        };

        // Indicate no size, format, or tiling preference; the display states
        // its real constraints during allocation.
        if let Err(error) =
            controller.import_buffer_collection(collection, display_token, ImageConfig::unconstrained())
        {
            renderer.release_buffer_collection(collection, usage);
            let _ = controller.release_buffer_collection(collection);
            return Err(CompositorError::DisplayImportFailed {
                reason: format!("controller import failed: {error:#}"),
            });
        }

        self.collections.insert(
            collection,
            CollectionState { support: DisplaySupport::Unknown, observation: Some(observation) },
        );
        Ok(())
    }

    /// Releases a collection from the display and renderer and drops all
    /// cached state.
    pub fn release_collection(
        &mut self,
        collection: CollectionId,
        usage: BufferCollectionUsage,
        renderer: &dyn Renderer,
        controller: &mut dyn DisplayController,
    ) {
        if let Err(error) = controller.release_buffer_collection(collection) {
            warn!("could not release collection {collection:?} from display: {error:#}");
        }
        renderer.release_buffer_collection(collection, usage);
        self.collections.remove(&collection);
    }

    /// Imports one image: validates it, hands it to the renderer, decides
    /// display support on the collection's first image, and (when supported)
    /// imports it into the display controller.
    pub fn import_image(
        &mut self,
        metadata: &ImageMetadata,
        usage: BufferCollectionUsage,
        renderer: &dyn Renderer,
        controller: &mut dyn DisplayController,
    ) -> Result<()> {
        validate_image(metadata)?;

        renderer
            .import_buffer_image(metadata, usage)
            .map_err(CompositorError::RendererRejected)?;

        let state = self
            .collections
            .get_mut(&metadata.collection_id)
            .ok_or_else(|| {
                CompositorError::ImageInvalid(format!(
                    "collection {:?} was never imported",
                    metadata.collection_id
                ))
            })?;

        // In renderer-only mode the only display-imported images are the
        // render-target rings, whose support was decided at display setup.
        if self.import_mode == BufferCollectionImportMode::RendererOnly
            && !matches!(state.support, DisplaySupport::Supported(_))
        {
            state.support = DisplaySupport::Unsupported;
            return Ok(());
        }

        if matches!(state.support, DisplaySupport::Unknown) {
            state.support = match state.observation.take() {
                Some(observation) => match determine_display_support(observation) {
                    Some(format) => {
                        info!("collection {:?} is display-compatible ({format:?})", metadata.collection_id);
                        DisplaySupport::Supported(format)
                    }
                    None => DisplaySupport::Unsupported,
                },
                None => DisplaySupport::Unsupported,
            };
        }

        let format = match state.support {
            DisplaySupport::Supported(format) => format,
            DisplaySupport::Unsupported | DisplaySupport::Unknown => {
                return match self.import_mode {
                    // Not display-compatible, but the renderer path works.
                    BufferCollectionImportMode::AttemptDisplayConstraints => Ok(()),
                    BufferCollectionImportMode::EnforceDisplayConstraints => {
                        Err(CompositorError::DisplayImportFailed {
                            reason: format!(
                                "collection {:?} did not satisfy display constraints",
                                metadata.collection_id
                            ),
                        })
                    }
                    BufferCollectionImportMode::RendererOnly => Ok(()),
                };
            }
        };

        let config = image_config_for(metadata, format);
        controller
            .import_image(config, metadata.collection_id, metadata.identifier, metadata.vmo_index)
            .map_err(|error| CompositorError::DisplayImportFailed {
                reason: format!("controller could not import the image: {error:#}"),
            })?;
        Ok(())
    }

    /// Whether the collection may be scanned out directly.
    pub fn supports_display(&self, collection: CollectionId) -> bool {
        matches!(
            self.collections.get(&collection).map(|state| &state.support),
            Some(DisplaySupport::Supported(_))
        )
    }

    /// The negotiated pixel format, present iff the collection is supported.
    pub fn pixel_format(&self, collection: CollectionId) -> Option<PixelFormat> {
        match self.collections.get(&collection)?.support {
            DisplaySupport::Supported(format) => Some(format),
            _ => None,
        }
    }

    /// Records a collection whose display compatibility was proven during
    /// allocation (render-target rings negotiated at display setup).
    pub fn mark_supported(&mut self, collection: CollectionId, format: PixelFormat) {
        self.collections.insert(
            collection,
            CollectionState { support: DisplaySupport::Supported(format), observation: None },
        );
    }

    /// The display controller image config for an image of a supported
    /// collection.
    pub fn image_config(&self, metadata: &ImageMetadata) -> Option<ImageConfig> {
        self.pixel_format(metadata.collection_id)
            .map(|format| image_config_for(metadata, format))
    }
}

/// Builds the wire image config: metadata size plus the collection's
/// negotiated format and its tiling mode.
fn image_config_for(metadata: &ImageMetadata, format: PixelFormat) -> ImageConfig {
    ImageConfig {
        width: metadata.width,
        height: metadata.height,
        pixel_format: Some(format),
        tiling: format.tiling(),
    }
}

fn validate_image(metadata: &ImageMetadata) -> Result<()> {
    if !metadata.identifier.is_valid() {
        return Err(CompositorError::ImageInvalid("image identifier is invalid".into()));
    }
    if !metadata.collection_id.is_valid() {
        return Err(CompositorError::ImageInvalid("collection ID is invalid".into()));
    }
    if metadata.width == 0 || metadata.height == 0 {
        return Err(CompositorError::ImageInvalid(format!(
            "image has a null dimension: ({}, {})",
            metadata.width, metadata.height
        )));
    }
    Ok(())
}

/// Probes an observation binding for allocation status and returns the
/// allocated pixel format when the display side succeeded.
///
/// YUV formats are filtered out unconditionally: the display path cannot
/// import them, whatever the probe says.
fn determine_display_support(mut observation: Box<dyn CollectionHandle>) -> Option<PixelFormat> {
    match observation.check_buffers_allocated() {
        Ok(true) => {}
        Ok(false) => {
            debug!("display-side allocation did not complete; falling back to the renderer path");
            return None;
        }
        Err(error) => {
            debug!("allocation probe failed: {error:#}");
            return None;
        }
    }

    let info = match observation.wait_for_buffers_allocated() {
        Ok(info) => info,
        Err(error) => {
            warn!("could not fetch allocated pixel format: {error:#}");
            return None;
        }
    };
    observation.close();

    if info.pixel_format.is_yuv() {
        debug!("YUV collections cannot be scanned out directly");
        return None;
    }

    Some(info.pixel_format)
}

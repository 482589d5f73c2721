//! Fences bracketing buffer use between the renderer and the display, and
//! the per-image registry enforcing at most one in-flight frame per image.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::controller::{DisplayController, EventId};
use crate::types::ImageId;

/// A shareable one-bit fence. Clones are handles onto the same underlying
/// event, so a clone registered with the display controller observes and
/// produces the same signals as the original held by the compositor.
#[derive(Clone, Debug, Default)]
pub struct Fence {
    inner: Arc<AtomicBool>,
}

impl Fence {
    /// Creates an unsignaled fence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fence that starts out signaled.
    pub fn new_signaled() -> Self {
        let fence = Self::new();
        fence.signal();
        fence
    }

    /// Signals the fence.
    pub fn signal(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    /// Clears the signal so the fence can bracket another frame.
    pub fn reset(&self) {
        self.inner.store(false, Ordering::SeqCst);
    }

    /// Non-blocking signal test.
    pub fn is_signaled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    /// Whether two fences are handles onto the same event.
    pub fn same_event(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// The fence pair bracketing one back-buffer's trip through the display.
#[derive(Debug)]
pub struct FrameEventData {
    /// Signaled by the renderer once drawing into the back-buffer finished;
    /// the controller waits on it before scanout.
    pub wait_event: Fence,
    /// Signaled by the controller once the back-buffer has been replaced on
    /// screen. Pre-signaled at creation so the first use behaves as though
    /// the buffer was previously retired.
    pub signal_event: Fence,
    /// Controller handle for `wait_event`.
    pub wait_id: EventId,
    /// Controller handle for `signal_event`.
    pub signal_id: EventId,
}

impl FrameEventData {
    /// Creates the pair and registers both fences with the controller.
    pub fn new(controller: &mut dyn DisplayController) -> Result<Self> {
        let wait_event = Fence::new();
        let wait_id = controller.import_event(wait_event.clone())?;
        let signal_event = Fence::new_signaled();
        let signal_id = controller.import_event(signal_event.clone())?;
        Ok(Self { wait_event, signal_event, wait_id, signal_id })
    }
}

/// The single retirement fence attached to a client image.
#[derive(Debug)]
pub struct ImageEventData {
    /// Signaled by the controller when the image leaves the screen.
    /// Pre-signaled at creation.
    pub signal_event: Fence,
    /// Controller handle for `signal_event`.
    pub signal_id: EventId,
}

impl ImageEventData {
    fn new(controller: &mut dyn DisplayController) -> Result<Self> {
        let signal_event = Fence::new_signaled();
        let signal_id = controller.import_event(signal_event.clone())?;
        Ok(Self { signal_event, signal_id })
    }
}

/// Per-image in-flight tracking for the direct-scanout path.
///
/// An image may appear in at most one applied configuration at a time: its
/// signal event is cleared when a config using it commits, and the controller
/// re-signals it once a later config replaces the image on screen.
#[derive(Default)]
pub struct FenceRegistry {
    image_events: HashMap<ImageId, ImageEventData>,
}

impl FenceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepares `image` for use in the configuration being staged.
    ///
    /// Returns the controller handle to pass as the layer's signal event, or
    /// `None` when the image still has a frame in flight and the staged
    /// config must be abandoned.
    pub fn prepare_image(
        &mut self,
        controller: &mut dyn DisplayController,
        image: ImageId,
    ) -> Result<Option<EventId>> {
        if let Some(event) = self.image_events.get(&image) {
            if !event.signal_event.is_signaled() {
                return Ok(None);
            }
            return Ok(Some(event.signal_id));
        }
        let event = ImageEventData::new(controller)?;
        let signal_id = event.signal_id;
        self.image_events.insert(image, event);
        Ok(Some(signal_id))
    }

    /// Clears the signal events of every image in a committed configuration,
    /// marking them in flight until the controller re-signals them.
    pub fn unsignal_images(&self, images: &[ImageId]) {
        for image in images {
            if let Some(event) = self.image_events.get(image) {
                event.signal_event.reset();
            }
        }
    }

    /// Whether `image` currently has a frame in flight.
    pub fn image_in_flight(&self, image: ImageId) -> bool {
        self.image_events
            .get(&image)
            .is_some_and(|event| !event.signal_event.is_signaled())
    }

    /// Drops the image's fence entry, releasing its controller handle.
    pub fn release_image(&mut self, controller: &mut dyn DisplayController, image: ImageId) {
        if let Some(event) = self.image_events.remove(&image) {
            let _ = controller.release_event(event.signal_id);
        }
    }

    /// Iterates over all tracked entries. Used during teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = (ImageId, ImageEventData)> + '_ {
        self.image_events.drain()
    }
}

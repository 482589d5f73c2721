//! Release-fence bookkeeping: correlating submitted frames with vsync
//! retirement and firing present callbacks exactly once.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::fence::Fence;
use crate::types::Timestamp;

/// Invoked exactly once when a frame's configuration retires against a
/// vsync. Never invoked for frames that failed both composition paths.
pub type PresentCallback = Box<dyn FnOnce(Timestamp) + Send>;

/// Consumes per-frame retirement bookkeeping from the orchestrator.
pub trait ReleaseFenceManager: Send {
    /// A frame went on screen via direct scanout: the client images stay in
    /// use by the hardware until a newer frame replaces them.
    fn on_direct_scanout_frame(
        &mut self,
        frame_number: u64,
        release_fences: Vec<Fence>,
        callback: PresentCallback,
    );

    /// A frame was composited by the GPU into a back-buffer;
    /// `render_finished_fence` signals when the last display's composition
    /// completed, after which the client images are no longer read.
    fn on_gpu_composited_frame(
        &mut self,
        frame_number: u64,
        render_finished_fence: Fence,
        release_fences: Vec<Fence>,
        callback: PresentCallback,
    );

    /// The configuration submitted as `frame_number` retired at `timestamp`.
    fn on_vsync(&mut self, frame_number: u64, timestamp: Timestamp);
}

enum FrameKind {
    Direct,
    Gpu { render_finished_fence: Fence },
}

struct FrameRecord {
    kind: FrameKind,
    release_fences: Vec<Fence>,
    callback: PresentCallback,
}

/// Default [`ReleaseFenceManager`]: fires each frame's callback at its own
/// vsync; signals a GPU frame's release fences at its retirement (the
/// back-buffer copy ended the client images' use) and a direct frame's when
/// a newer frame's retirement takes its images off screen.
#[derive(Default)]
pub struct StandardReleaseFenceManager {
    frames: BTreeMap<u64, FrameRecord>,
    /// The direct-scanout frame currently on screen, whose release fences
    /// are still held back.
    on_screen: Option<(u64, Vec<Fence>)>,
}

impl StandardReleaseFenceManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReleaseFenceManager for StandardReleaseFenceManager {
    fn on_direct_scanout_frame(
        &mut self,
        frame_number: u64,
        release_fences: Vec<Fence>,
        callback: PresentCallback,
    ) {
        let record =
            FrameRecord { kind: FrameKind::Direct, release_fences, callback };
        self.frames.insert(frame_number, record);
    }

    fn on_gpu_composited_frame(
        &mut self,
        frame_number: u64,
        render_finished_fence: Fence,
        release_fences: Vec<Fence>,
        callback: PresentCallback,
    ) {
        let record = FrameRecord {
            kind: FrameKind::Gpu { render_finished_fence },
            release_fences,
            callback,
        };
        self.frames.insert(frame_number, record);
    }

    fn on_vsync(&mut self, frame_number: u64, timestamp: Timestamp) {
        let Some(record) = self.frames.remove(&frame_number) else {
            warn!("vsync for unknown frame {frame_number}");
            return;
        };

        // Whatever was on screen has now been replaced; its images are free.
        if let Some((replaced, fences)) = self.on_screen.take() {
            debug!("frame {replaced} left the screen; releasing {} fences", fences.len());
            for fence in fences {
                fence.signal();
            }
        }

        match record.kind {
            FrameKind::Direct => {
                self.on_screen = Some((frame_number, record.release_fences));
            }
            FrameKind::Gpu { render_finished_fence } => {
                if !render_finished_fence.is_signaled() {
                    warn!("frame {frame_number} retired before GPU composition finished");
                }
                for fence in record.release_fences {
                    fence.signal();
                }
            }
        }

        (record.callback)(timestamp);
    }
}

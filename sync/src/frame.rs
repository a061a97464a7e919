//! Frame-based retirement of transient sync objects.
//!
//! GPU commands are executed asynchronously - when work is submitted, the CPU
//! continues while the GPU processes commands 1-3 frames behind. Semaphores
//! and command buffers created for synchronization can't be destroyed as soon
//! as the CPU is done with them, because the GPU may still reference them.
//!
//! [`FrameRetirement`] holds such objects until the frame that used them is no
//! longer in flight.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      FrameRetirement                            │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐                       │
//! │  │ Frame 0  │  │ Frame 1  │  │ Frame 2  │  ...                  │
//! │  │ retired  │  │ retired  │  │ retired  │                       │
//! │  └──────────┘  └──────────┘  └──────────┘                       │
//! └─────────────────────────────────────────────────────────────────┘
//!
//! On retire(object):
//!   1. Store it in the current frame's slot
//!
//! On advance_frame (after waiting for the oldest frame's fence):
//!   1. Drop everything in the slot about to be reused
//!   2. Move to the next frame
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::backend::SyncBackend;
use crate::semaphore::Semaphore;

/// Maximum number of frames in flight.
/// Retired objects are held for this many frames before being dropped.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Frame lifetime tracker, usually owned by a window's swapchain.
///
/// Objects handed to a tracker are dropped once the frame that was current at
/// the time of the call is no longer in flight.
pub trait FrameLifetime<B: SyncBackend> {
    /// Index of the frame currently being recorded.
    fn current_frame(&self) -> u64;

    /// Keep `semaphore` alive until the current frame retires.
    fn retire_semaphore(&self, semaphore: Semaphore<B>);

    /// Keep `command_buffer` alive until the current frame retires.
    fn retire_command_buffer(&self, command_buffer: B::CommandBuffer);
}

/// An object waiting for its frame to retire.
enum Retired<B: SyncBackend> {
    Semaphore(Semaphore<B>),
    CommandBuffer(B::CommandBuffer),
}

/// Frame-indexed retirement queues.
pub struct FrameRetirement<B: SyncBackend> {
    /// Per-frame queues. Index is `frame % frames_in_flight`.
    frame_queues: Vec<Mutex<Vec<Retired<B>>>>,

    /// Current frame index (monotonically increasing).
    current_frame: AtomicU64,
}

impl<B: SyncBackend> std::fmt::Debug for FrameRetirement<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRetirement")
            .field("current_frame", &self.current_frame())
            .field("frames_in_flight", &self.frames_in_flight())
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

impl<B: SyncBackend> FrameRetirement<B> {
    /// Create a tracker for [`MAX_FRAMES_IN_FLIGHT`] frames.
    pub fn new() -> Self {
        Self::with_frames_in_flight(MAX_FRAMES_IN_FLIGHT)
    }

    /// Create a tracker for a custom number of frames in flight.
    ///
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is zero.
    pub fn with_frames_in_flight(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "at least one frame must be in flight");
        Self {
            frame_queues: (0..frames_in_flight).map(|_| Mutex::new(Vec::new())).collect(),
            current_frame: AtomicU64::new(0),
        }
    }

    /// Number of frames objects are held for.
    pub fn frames_in_flight(&self) -> usize {
        self.frame_queues.len()
    }

    fn push(&self, retired: Retired<B>) {
        let frame = self.current_frame.load(Ordering::Relaxed);
        let slot = frame as usize % self.frame_queues.len();
        self.frame_queues[slot].lock().push(retired);
    }

    /// Advance to the next frame, dropping everything retired
    /// `frames_in_flight` frames ago.
    ///
    /// Call at frame boundaries, after the fence of the oldest in-flight frame
    /// has been waited on. Returns the number of objects dropped.
    pub fn advance_frame(&self) -> usize {
        let next = self.current_frame.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = next as usize % self.frame_queues.len();
        let retired: Vec<_> = self.frame_queues[slot].lock().drain(..).collect();
        let count = retired.len();
        if count > 0 {
            log::debug!("Frame {next}: dropping {count} retired sync objects");
        }
        drop(retired);
        count
    }

    /// Drop every pending object regardless of frame timing.
    ///
    /// Only valid once the device is idle, e.g. during shutdown.
    pub fn flush_all(&self) -> usize {
        let mut total = 0;
        for queue in &self.frame_queues {
            let retired: Vec<_> = queue.lock().drain(..).collect();
            total += retired.len();
        }
        if total > 0 {
            log::debug!("Flushed {total} retired sync objects");
        }
        total
    }

    /// Get the number of objects currently waiting for their frame.
    pub fn pending_count(&self) -> usize {
        self.frame_queues.iter().map(|q| q.lock().len()).sum()
    }

    /// Number of pending semaphores.
    pub fn pending_semaphores(&self) -> usize {
        self.frame_queues
            .iter()
            .map(|q| {
                q.lock()
                    .iter()
                    .filter(|r| matches!(r, Retired::Semaphore(_)))
                    .count()
            })
            .sum()
    }

    /// Get the current frame number.
    pub fn current_frame(&self) -> u64 {
        self.current_frame.load(Ordering::Relaxed)
    }
}

impl<B: SyncBackend> Default for FrameRetirement<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: SyncBackend> FrameLifetime<B> for FrameRetirement<B> {
    fn current_frame(&self) -> u64 {
        FrameRetirement::current_frame(self)
    }

    fn retire_semaphore(&self, semaphore: Semaphore<B>) {
        log::trace!("Retiring {semaphore:?} with frame {}", self.current_frame());
        self.push(Retired::Semaphore(semaphore));
    }

    fn retire_command_buffer(&self, command_buffer: B::CommandBuffer) {
        log::trace!("Retiring command buffer with frame {}", self.current_frame());
        self.push(Retired::CommandBuffer(command_buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::{CommandBuffer, SyncBackend};
    use crate::types::QueueId;

    static_assertions::assert_impl_all!(FrameRetirement<DummyBackend>: Send, Sync);

    fn finished_command_buffer(backend: &DummyBackend) -> <DummyBackend as SyncBackend>::CommandBuffer {
        let mut cmd = backend.allocate_command_buffer(QueueId::new(0)).unwrap();
        cmd.finish().unwrap();
        cmd
    }

    #[test]
    fn test_frame_cycling() {
        let retirement = FrameRetirement::<DummyBackend>::new();

        assert_eq!(retirement.current_frame(), 0);
        assert_eq!(retirement.pending_count(), 0);

        for i in 0..MAX_FRAMES_IN_FLIGHT * 2 {
            assert_eq!(retirement.advance_frame(), 0);
            assert_eq!(retirement.current_frame(), i as u64 + 1);
        }
    }

    #[test]
    fn test_objects_held_for_frames_in_flight() {
        let backend = DummyBackend::new();
        let retirement = FrameRetirement::<DummyBackend>::new();

        retirement.retire_command_buffer(finished_command_buffer(&backend));
        retirement.retire_semaphore(Semaphore::from_raw(backend.create_semaphore().unwrap()));
        assert_eq!(retirement.pending_count(), 2);
        assert_eq!(retirement.pending_semaphores(), 1);

        for _ in 0..MAX_FRAMES_IN_FLIGHT - 1 {
            assert_eq!(retirement.advance_frame(), 0);
            assert_eq!(backend.released_command_buffers(), 0);
        }

        assert_eq!(retirement.advance_frame(), 2);
        assert_eq!(retirement.pending_count(), 0);
        assert_eq!(backend.released_command_buffers(), 1);
        assert_eq!(backend.released_semaphores(), 1);
    }

    #[test]
    fn test_single_frame_in_flight() {
        let backend = DummyBackend::new();
        let retirement = FrameRetirement::<DummyBackend>::with_frames_in_flight(1);

        retirement.retire_command_buffer(finished_command_buffer(&backend));
        assert_eq!(retirement.advance_frame(), 1);
    }

    #[test]
    fn test_flush_all() {
        let backend = DummyBackend::new();
        let retirement = FrameRetirement::<DummyBackend>::new();

        retirement.retire_command_buffer(finished_command_buffer(&backend));
        retirement.advance_frame();
        retirement.retire_command_buffer(finished_command_buffer(&backend));

        assert_eq!(retirement.flush_all(), 2);
        assert_eq!(retirement.pending_count(), 0);
        assert_eq!(backend.released_command_buffers(), 2);
    }

    #[test]
    #[should_panic(expected = "at least one frame must be in flight")]
    fn test_zero_frames_in_flight_rejected() {
        let _ = FrameRetirement::<DummyBackend>::with_frames_in_flight(0);
    }
}

//! Owning semaphore wrapper.

use crate::backend::SyncBackend;
use crate::types::PipelineStage;

/// GPU semaphore for ordering work across submissions.
///
/// One submission signals the semaphore when it completes; later submissions
/// wait on it at [`wait_stage`](Self::wait_stage). Unlike fences, semaphores
/// cannot be waited on from the CPU.
///
/// A semaphore produced by a semaphore-based sync policy keeps the command
/// buffers of its submission and the semaphores that submission waited on
/// alive. They are released together with the semaphore, so whoever owns the
/// semaphore owns the lifetime of everything the GPU might still touch.
///
/// An optional drop callback runs with the backend handle before any retained
/// resource or the handle itself is released.
pub struct Semaphore<B: SyncBackend> {
    on_drop: Option<DropCallback<B>>,
    // Field order is drop order: dependants go before the handle.
    retained_command_buffers: Vec<B::CommandBuffer>,
    retained_waits: Vec<Semaphore<B>>,
    raw: B::RawSemaphore,
    wait_stage: PipelineStage,
}

/// Callback invoked once when a [`Semaphore`] is dropped.
pub type DropCallback<B> = Box<dyn FnOnce(&<B as SyncBackend>::RawSemaphore) + Send>;

impl<B: SyncBackend> Semaphore<B> {
    /// Wrap a backend semaphore. Waits happen at `ALL_COMMANDS` by default.
    pub fn from_raw(raw: B::RawSemaphore) -> Self {
        Self {
            on_drop: None,
            retained_command_buffers: Vec::new(),
            retained_waits: Vec::new(),
            raw,
            wait_stage: PipelineStage::ALL_COMMANDS,
        }
    }

    /// Get the backend handle.
    pub fn raw(&self) -> &B::RawSemaphore {
        &self.raw
    }

    /// Stage at which the next submission waits on this semaphore.
    pub fn wait_stage(&self) -> PipelineStage {
        self.wait_stage
    }

    /// Set the stage at which the next submission waits on this semaphore.
    pub fn set_wait_stage(&mut self, stage: PipelineStage) -> &mut Self {
        self.wait_stage = stage;
        self
    }

    /// Builder form of [`set_wait_stage`](Self::set_wait_stage).
    pub fn with_wait_stage(mut self, stage: PipelineStage) -> Self {
        self.wait_stage = stage;
        self
    }

    /// Run `callback` with the backend handle when this semaphore is dropped.
    ///
    /// Replaces any previously installed callback.
    pub fn set_drop_callback(
        &mut self,
        callback: impl FnOnce(&B::RawSemaphore) + Send + 'static,
    ) -> &mut Self {
        self.on_drop = Some(Box::new(callback));
        self
    }

    /// Builder form of [`set_drop_callback`](Self::set_drop_callback).
    pub fn with_drop_callback(
        mut self,
        callback: impl FnOnce(&B::RawSemaphore) + Send + 'static,
    ) -> Self {
        self.set_drop_callback(callback);
        self
    }

    pub fn has_drop_callback(&self) -> bool {
        self.on_drop.is_some()
    }

    /// Command buffers kept alive by this semaphore.
    pub fn retained_command_buffers(&self) -> &[B::CommandBuffer] {
        &self.retained_command_buffers
    }

    /// Semaphores kept alive by this semaphore.
    pub fn retained_waits(&self) -> &[Semaphore<B>] {
        &self.retained_waits
    }

    pub(crate) fn retain_command_buffer(&mut self, command_buffer: B::CommandBuffer) {
        self.retained_command_buffers.push(command_buffer);
    }

    pub(crate) fn retain_waits(&mut self, waits: Vec<Semaphore<B>>) {
        self.retained_waits.extend(waits);
    }
}

impl<B: SyncBackend> Drop for Semaphore<B> {
    fn drop(&mut self) {
        if let Some(callback) = self.on_drop.take() {
            callback(&self.raw);
        }
    }
}

impl<B: SyncBackend> std::fmt::Debug for Semaphore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("raw", &self.raw)
            .field("wait_stage", &self.wait_stage)
            .field("retained_command_buffers", &self.retained_command_buffers.len())
            .field("retained_waits", &self.retained_waits.len())
            .field("on_drop", &self.on_drop.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::{CommandBuffer, SyncBackend};
    use crate::types::QueueId;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[test]
    fn test_default_wait_stage() {
        let backend = DummyBackend::new();
        let semaphore = Semaphore::<DummyBackend>::from_raw(backend.create_semaphore().unwrap());
        assert_eq!(semaphore.wait_stage(), PipelineStage::ALL_COMMANDS);

        let semaphore = semaphore.with_wait_stage(PipelineStage::FRAGMENT_SHADER);
        assert_eq!(semaphore.wait_stage(), PipelineStage::FRAGMENT_SHADER);
    }

    #[test]
    fn test_retained_resources_released_with_semaphore() {
        let backend = DummyBackend::new();
        let mut semaphore =
            Semaphore::<DummyBackend>::from_raw(backend.create_semaphore().unwrap());
        let mut cmd = backend.allocate_command_buffer(QueueId::new(0)).unwrap();
        cmd.finish().unwrap();
        semaphore.retain_command_buffer(cmd);
        semaphore.retain_waits(vec![Semaphore::from_raw(
            backend.create_semaphore().unwrap(),
        )]);

        assert_eq!(semaphore.retained_command_buffers().len(), 1);
        assert_eq!(semaphore.retained_waits().len(), 1);
        assert_eq!(backend.released_command_buffers(), 0);

        drop(semaphore);
        assert_eq!(backend.released_command_buffers(), 1);
        assert_eq!(backend.released_semaphores(), 2);
    }

    #[test]
    fn test_drop_callback_runs_before_release() {
        let backend = Arc::new(DummyBackend::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let released_at_callback = Arc::new(AtomicU64::new(u64::MAX));

        let raw = backend.create_semaphore().unwrap();
        let raw_id = raw.id();
        let mut semaphore = Semaphore::<DummyBackend>::from_raw(raw);
        let mut cmd = backend.allocate_command_buffer(QueueId::new(0)).unwrap();
        cmd.finish().unwrap();
        semaphore.retain_command_buffer(cmd);

        let seen_calls = Arc::clone(&calls);
        let seen_released = Arc::clone(&released_at_callback);
        let counters = Arc::clone(&backend);
        let semaphore = semaphore.with_drop_callback(move |raw| {
            assert_eq!(raw.id(), raw_id);
            seen_calls.fetch_add(1, Ordering::SeqCst);
            seen_released.store(
                counters.released_command_buffers() as u64,
                Ordering::SeqCst,
            );
        });
        assert!(semaphore.has_drop_callback());

        drop(semaphore);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(released_at_callback.load(Ordering::SeqCst), 0);
        assert_eq!(backend.released_command_buffers(), 1);
        assert_eq!(backend.released_semaphores(), 1);
    }

    #[test]
    fn test_drop_callback_replaced() {
        let backend = DummyBackend::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut semaphore =
            Semaphore::<DummyBackend>::from_raw(backend.create_semaphore().unwrap());

        let first = Arc::clone(&calls);
        semaphore.set_drop_callback(move |_| {
            first.fetch_add(10, Ordering::SeqCst);
        });
        let second = Arc::clone(&calls);
        semaphore.set_drop_callback(move |_| {
            second.fetch_add(1, Ordering::SeqCst);
        });

        drop(semaphore);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! Submission driver: executes the configured strategy.

use crate::backend::{CommandBuffer, Submission, SyncBackend};
use crate::error::{SyncError, SyncResult};
use crate::semaphore::Semaphore;
use crate::types::PipelineStage;

use super::{CommandBufferSink, SemaphoreSink, Strategy, SyncPolicy};

impl<B: SyncBackend> SemaphoreSink<B> {
    fn deliver(self, backend: &B, semaphore: Semaphore<B>) {
        match self {
            Self::Handler(handler) => handler(semaphore),
            Self::CurrentFrame(Some(window)) => window.retire_semaphore(semaphore),
            Self::CurrentFrame(None) => backend.frame_lifetime().retire_semaphore(semaphore),
        }
    }
}

impl<B: SyncBackend> CommandBufferSink<B> {
    /// Take over a submitted command buffer.
    ///
    /// If the master is gone the buffer is retired with the backend's frame
    /// instead, since the GPU may still be executing it.
    fn accept(&mut self, backend: &B, command_buffer: B::CommandBuffer) -> SyncResult<()> {
        match self {
            Self::Handler(handler) => handler(command_buffer),
            Self::CurrentFrame(Some(window)) => window.retire_command_buffer(command_buffer),
            Self::CurrentFrame(None) => backend
                .frame_lifetime()
                .retire_command_buffer(command_buffer),
            Self::Master(link) => {
                if let Err(command_buffer) = link.adopt(command_buffer) {
                    backend.frame_lifetime().retire_command_buffer(command_buffer);
                    return Err(SyncError::MasterAlreadySubmitted);
                }
            }
        }
        Ok(())
    }
}

/// Hand objects the GPU may still reference to the backend's current frame.
fn retire_with_backend_frame<B: SyncBackend>(
    backend: &B,
    command_buffers: impl IntoIterator<Item = B::CommandBuffer>,
    semaphores: Vec<Semaphore<B>>,
) {
    let frames = backend.frame_lifetime();
    for command_buffer in command_buffers {
        frames.retire_command_buffer(command_buffer);
    }
    for semaphore in semaphores {
        frames.retire_semaphore(semaphore);
    }
}

impl<B: SyncBackend> SyncPolicy<B> {
    /// Submit the command buffer and engage sync.
    ///
    /// Intended for the submission pipeline, not for code consuming it. The
    /// command buffer is handed over "fire and forget": whichever strategy is
    /// configured decides when it may be destroyed.
    ///
    /// | Strategy | Effect |
    /// |----------|--------|
    /// | not required | Submit; the buffer is retired with the backend's current frame |
    /// | wait idle | Submit, then block until the queue is idle; the buffer is dropped |
    /// | semaphore | Submit waiting on the wait list and signaling a new semaphore, which keeps the buffer and the wait list alive and goes to the signal sink |
    /// | barrier | Submit; the buffer goes to the lifetime sink (or the master) |
    ///
    /// Command buffers adopted from subordinates follow the policy's own buffer.
    ///
    /// On error, the command buffer, the adopted buffers and the wait list are
    /// retired with the backend's current frame rather than dropped.
    pub fn submit_and_sync(self, backend: &B, command_buffer: B::CommandBuffer) -> SyncResult<()> {
        let queue = if self.is_configured() {
            self.queue_to_use()
        } else {
            Err(SyncError::Unconfigured)
        };
        let queue = match queue {
            Ok(queue) => queue,
            Err(e) => {
                backend.frame_lifetime().retire_command_buffer(command_buffer);
                self.abandon(backend);
                return Err(e);
            }
        };

        let sync_type = self.get_sync_type();
        let SyncPolicy {
            strategy,
            mut subordinates,
            ..
        } = self;
        let adopted = subordinates.take_adopted();

        match strategy {
            Strategy::Unconfigured => {
                retire_with_backend_frame(
                    backend,
                    std::iter::once(command_buffer).chain(adopted),
                    Vec::new(),
                );
                return Err(SyncError::Unconfigured);
            }
            Strategy::NotRequired => {
                let submitted = backend.submit(queue, Submission::new(&command_buffer));
                retire_with_backend_frame(
                    backend,
                    std::iter::once(command_buffer).chain(adopted),
                    Vec::new(),
                );
                submitted?;
            }
            Strategy::WaitIdle => {
                let idle = backend
                    .submit(queue, Submission::new(&command_buffer))
                    .and_then(|()| backend.wait_idle(queue));
                if let Err(e) = idle {
                    retire_with_backend_frame(
                        backend,
                        std::iter::once(command_buffer).chain(adopted),
                        Vec::new(),
                    );
                    return Err(e);
                }
                // The queue is idle, nothing can reference these anymore.
                drop(command_buffer);
                drop(adopted);
            }
            Strategy::Semaphore {
                signal,
                wait_before,
            } => {
                let submitted = backend.create_semaphore().and_then(|raw| {
                    backend.submit(
                        queue,
                        Submission::new(&command_buffer)
                            .waiting_on(&wait_before)
                            .signalling(&raw),
                    )?;
                    Ok(raw)
                });
                let raw = match submitted {
                    Ok(raw) => raw,
                    Err(e) => {
                        retire_with_backend_frame(
                            backend,
                            std::iter::once(command_buffer).chain(adopted),
                            wait_before,
                        );
                        return Err(e);
                    }
                };
                let mut semaphore = Semaphore::from_raw(raw);
                semaphore.retain_command_buffer(command_buffer);
                for adopted in adopted {
                    semaphore.retain_command_buffer(adopted);
                }
                semaphore.retain_waits(wait_before);
                signal.deliver(backend, semaphore);
            }
            Strategy::Barrier { mut lifetime, .. } => {
                let submitted = match &lifetime {
                    CommandBufferSink::Master(link) => link.ensure_master_alive(),
                    _ => Ok(()),
                }
                .and_then(|()| backend.submit(queue, Submission::new(&command_buffer)));
                if let Err(e) = submitted {
                    retire_with_backend_frame(
                        backend,
                        std::iter::once(command_buffer).chain(adopted),
                        Vec::new(),
                    );
                    return Err(e);
                }

                // Every buffer is handed over even if an earlier one was refused.
                let mut accepted = lifetime.accept(backend, command_buffer);
                for adopted in adopted {
                    accepted = accepted.and(lifetime.accept(backend, adopted));
                }
                accepted?;
            }
        }

        log::trace!("Submitted to {queue:?} and synchronized {sync_type}");
        Ok(())
    }

    /// Engage sync without any recorded work.
    ///
    /// Allocates an empty command buffer on the bound queue, establishes the
    /// policy's barriers around "nothing" and submits it with
    /// [`submit_and_sync`](Self::submit_and_sync). Used when a strategy must
    /// still be carried out, e.g. to flush subordinate command buffers.
    pub fn sync_with_dummy_command_buffer(self, backend: &B) -> SyncResult<()> {
        match self.record_empty_command_buffer(backend) {
            Ok(command_buffer) => self.submit_and_sync(backend, command_buffer),
            Err(e) => {
                self.abandon(backend);
                Err(e)
            }
        }
    }

    fn record_empty_command_buffer(&self, backend: &B) -> SyncResult<B::CommandBuffer> {
        if !self.is_configured() {
            return Err(SyncError::Unconfigured);
        }
        let queue = self.queue_to_use()?;
        let mut command_buffer = backend.allocate_command_buffer(queue)?;
        self.establish_barrier_before_the_operation(
            &mut command_buffer,
            PipelineStage::ALL_COMMANDS,
            None,
        );
        self.establish_barrier_after_the_operation(
            &mut command_buffer,
            PipelineStage::ALL_COMMANDS,
            None,
        );
        command_buffer.finish()?;
        Ok(command_buffer)
    }

    /// Release a policy that will not be submitted.
    ///
    /// Command buffers adopted from subordinates were already submitted, and
    /// semaphores on the wait list may still be signaled by work in flight.
    /// Both are retired with the backend's current frame instead of being
    /// dropped. Call this when an operation fails before it reaches
    /// [`submit_and_sync`](Self::submit_and_sync).
    pub fn abandon(self, backend: &B) {
        let SyncPolicy {
            strategy,
            mut subordinates,
            ..
        } = self;
        let waits = match strategy {
            Strategy::Semaphore { wait_before, .. } => wait_before,
            _ => Vec::new(),
        };
        let adopted = subordinates.take_adopted();
        if !adopted.is_empty() || !waits.is_empty() {
            log::debug!(
                "Abandoned sync policy: retiring {} subordinate command buffers and {} semaphores",
                adopted.len(),
                waits.len()
            );
        }
        retire_with_backend_frame(backend, adopted, waits);
    }
}

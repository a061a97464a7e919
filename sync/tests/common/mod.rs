//! Common utilities for sync integration tests.

use std::cell::RefCell;
use std::rc::Rc;

use redlilium_sync::backend::dummy::{DummyCommandBuffer, DummyEvent};
use redlilium_sync::{CommandBuffer, DummyBackend, QueueId, Semaphore, SyncBackend};

/// Queue every scenario submits to unless stated otherwise.
pub const QUEUE: QueueId = QueueId::new(0);

/// Route `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Allocate and finish an empty command buffer on [`QUEUE`].
pub fn finished_command_buffer(backend: &DummyBackend) -> DummyCommandBuffer {
    let mut cmd = backend
        .allocate_command_buffer(QUEUE)
        .expect("allocation on queue 0");
    cmd.finish().expect("fresh command buffer finishes");
    cmd
}

/// Create a semaphore which is not tied to any submission.
pub fn standalone_semaphore(backend: &DummyBackend) -> Semaphore<DummyBackend> {
    Semaphore::from_raw(backend.create_semaphore().expect("semaphore creation"))
}

/// Shared storage for objects handed to a sink closure.
pub struct Collected<T>(Rc<RefCell<Vec<T>>>);

impl<T: 'static> Collected<T> {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(Vec::new())))
    }

    /// A sink pushing everything it receives into this collection.
    pub fn sink(&self) -> impl FnMut(T) + 'static {
        let items = Rc::clone(&self.0);
        move |item| items.borrow_mut().push(item)
    }

    /// A single-shot sink, for semaphore handlers.
    pub fn once(&self) -> impl FnOnce(T) + 'static {
        let items = Rc::clone(&self.0);
        move |item| items.borrow_mut().push(item)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

/// All submissions recorded by the backend, in order.
pub struct RecordedSubmission {
    pub queue: QueueId,
    pub command_buffer: u64,
    pub barrier_count: usize,
    pub wait: Vec<u64>,
    pub signal: Option<u64>,
}

pub fn submissions(backend: &DummyBackend) -> Vec<RecordedSubmission> {
    backend
        .events()
        .into_iter()
        .filter_map(|event| match event {
            DummyEvent::Submitted {
                queue,
                command_buffer,
                barriers,
                wait,
                signal,
            } => Some(RecordedSubmission {
                queue,
                command_buffer,
                barrier_count: barriers.len(),
                wait: wait.into_iter().map(|(id, _)| id).collect(),
                signal,
            }),
            _ => None,
        })
        .collect()
}

//! Master/subordinate coupling between sync policies.
//!
//! A subordinate policy created with [`SyncPolicy::auxiliary`] does not own
//! the lifetime of its command buffer. After submission it hands the buffer
//! to its master's [`SubordinateRegistry`], and the master disposes of the
//! adopted buffers together with its own when it is submitted.
//!
//! [`SyncPolicy::auxiliary`]: super::SyncPolicy::auxiliary

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::backend::SyncBackend;
use crate::error::{SyncError, SyncResult};

type Adopted<B> = RefCell<Vec<<B as SyncBackend>::CommandBuffer>>;

/// Command buffers a master policy has taken responsibility for.
pub struct SubordinateRegistry<B: SyncBackend> {
    adopted: Option<Rc<Adopted<B>>>,
    registered: usize,
}

impl<B: SyncBackend> SubordinateRegistry<B> {
    pub(crate) fn new() -> Self {
        Self {
            adopted: None,
            registered: 0,
        }
    }

    /// Register a new subordinate and get the link it reports back through.
    pub(crate) fn register(&mut self) -> SubordinateLink<B> {
        let adopted = self
            .adopted
            .get_or_insert_with(|| Rc::new(RefCell::new(Vec::new())));
        self.registered += 1;
        SubordinateLink {
            adopted: Rc::downgrade(adopted),
        }
    }

    /// Number of subordinates registered with this master.
    pub fn registered(&self) -> usize {
        self.registered
    }

    /// Number of subordinate command buffers adopted so far.
    pub fn adopted_count(&self) -> usize {
        self.adopted.as_ref().map_or(0, |a| a.borrow().len())
    }

    /// Take all adopted command buffers, oldest first.
    pub(crate) fn take_adopted(&mut self) -> Vec<B::CommandBuffer> {
        self.adopted
            .as_ref()
            .map(|a| std::mem::take(&mut *a.borrow_mut()))
            .unwrap_or_default()
    }
}

impl<B: SyncBackend> Drop for SubordinateRegistry<B> {
    fn drop(&mut self) {
        let unclaimed = self.adopted_count();
        if unclaimed > 0 {
            log::warn!(
                "Master sync policy dropped without submission or abandon(); \
                 releasing {unclaimed} subordinate command buffers immediately"
            );
        }
    }
}

impl<B: SyncBackend> std::fmt::Debug for SubordinateRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubordinateRegistry")
            .field("registered", &self.registered)
            .field("adopted", &self.adopted_count())
            .finish()
    }
}

/// A subordinate's connection to its master's registry.
pub(crate) struct SubordinateLink<B: SyncBackend> {
    adopted: Weak<Adopted<B>>,
}

impl<B: SyncBackend> SubordinateLink<B> {
    /// Fail if the master has already been submitted or dropped.
    pub(crate) fn ensure_master_alive(&self) -> SyncResult<()> {
        if self.adopted.strong_count() > 0 {
            Ok(())
        } else {
            Err(SyncError::MasterAlreadySubmitted)
        }
    }

    /// Hand a submitted command buffer over to the master.
    ///
    /// Gives the buffer back if the master is gone.
    pub(crate) fn adopt(&self, command_buffer: B::CommandBuffer) -> Result<(), B::CommandBuffer> {
        match self.adopted.upgrade() {
            Some(adopted) => {
                adopted.borrow_mut().push(command_buffer);
                Ok(())
            }
            None => Err(command_buffer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::types::QueueId;

    #[test]
    fn test_registry_adopts_in_order() {
        let backend = DummyBackend::new();
        let mut registry = SubordinateRegistry::<DummyBackend>::new();
        let first = registry.register();
        let second = registry.register();
        assert_eq!(registry.registered(), 2);
        assert_eq!(registry.adopted_count(), 0);

        let a = backend.allocate_command_buffer(QueueId::new(0)).unwrap();
        let b = backend.allocate_command_buffer(QueueId::new(0)).unwrap();
        let (a_id, b_id) = (a.id(), b.id());
        second.adopt(a).unwrap();
        first.adopt(b).unwrap();
        assert_eq!(registry.adopted_count(), 2);

        let ids: Vec<u64> = registry.take_adopted().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![a_id, b_id]);
        assert_eq!(registry.adopted_count(), 0);
    }

    #[test]
    fn test_link_fails_after_master_dropped() {
        let backend = DummyBackend::new();
        let mut registry = SubordinateRegistry::<DummyBackend>::new();
        let link = registry.register();
        assert!(link.ensure_master_alive().is_ok());

        drop(registry);
        assert_eq!(
            link.ensure_master_alive().unwrap_err(),
            SyncError::MasterAlreadySubmitted
        );
        let cmd = backend.allocate_command_buffer(QueueId::new(0)).unwrap();
        let id = cmd.id();
        let returned = link.adopt(cmd).unwrap_err();
        assert_eq!(returned.id(), id);
        assert_eq!(backend.released_command_buffers(), 0);
    }

    #[test]
    fn test_empty_registry() {
        let mut registry = SubordinateRegistry::<DummyBackend>::new();
        assert_eq!(registry.registered(), 0);
        assert!(registry.take_adopted().is_empty());
    }
}

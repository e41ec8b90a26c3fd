use std::sync::Arc;

use cabincan_frame::{filter_match, Filter, Frame};

use crate::liveness::Liveness;

/// Per-channel subscription id. Starts at 1 and is never reused.
pub type SubscriptionId = u32;

/// Subscriber callback, run on the backend's receive path.
///
/// Must return quickly and must not call `subscribe`, `unsubscribe` or
/// `close` on the channel that is dispatching to it.
pub type FrameCallback = Arc<dyn Fn(&Frame) + Send + Sync>;

pub(crate) struct Subscription {
    pub(crate) id: SubscriptionId,
    filter: Option<Filter>,
    callback: FrameCallback,
    liveness: Liveness,
}

impl Subscription {
    pub(crate) fn matches(&self, id: u32) -> bool {
        filter_match(self.filter.as_ref(), id)
    }

    /// Invoke the callback unless the subscription has been removed.
    /// Returns `false` if it was skipped.
    pub(crate) fn deliver(&self, frame: &Frame) -> bool {
        self.liveness.run(|| (self.callback)(frame)).is_some()
    }

    /// Block until no other thread is inside the callback; later
    /// deliveries are skipped.
    pub(crate) fn retire(&self) {
        self.liveness.retire();
    }
}

/// Insertion-ordered subscription list.
pub(crate) struct SubscriptionTable {
    entries: Vec<Arc<Subscription>>,
    last_id: SubscriptionId,
}

impl SubscriptionTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            last_id: 0,
        }
    }

    pub(crate) fn insert(&mut self, filter: Option<Filter>, callback: FrameCallback) -> SubscriptionId {
        self.last_id += 1;
        let id = self.last_id;
        self.entries.push(Arc::new(Subscription {
            id,
            filter,
            callback,
            liveness: Liveness::new(),
        }));
        id
    }

    /// Unlink an entry. The caller retires it after dropping the table lock.
    pub(crate) fn remove(&mut self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        let pos = self.entries.iter().position(|s| s.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Snapshot of the entries whose filter accepts `frame_id`, in
    /// insertion order.
    pub(crate) fn matching(&self, frame_id: u32) -> Vec<Arc<Subscription>> {
        self.entries
            .iter()
            .filter(|s| s.matches(frame_id))
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) -> Vec<Arc<Subscription>> {
        std::mem::take(&mut self.entries)
    }
}

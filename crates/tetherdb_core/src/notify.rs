//! Change notifications for contexts.
//!
//! Every [`crate::Context`] owns a hub of subscriptions keyed by entity kind.
//! When the context's snapshot advances, the context computes one
//! [`ChangeSet`] per subscribed kind and calls each subscriber whose kind
//! changed. Several commits that become visible in one refresh arrive as a
//! single changeset.
//!
//! Callbacks run on the context's own thread, inside the call that made the
//! snapshot advance. A callback is taken out of the hub while it runs so it
//! may freely re-enter the context, subscribe, or unsubscribe.

use crate::entity::EntityKey;
use crate::error::CoreError;
use crate::types::ContextId;
use std::fmt;

/// Keys of one entity kind that changed between two snapshots.
///
/// A key is classified by whether its row existed at the old and the new
/// snapshot. A row inserted and removed in between does not appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Rows visible now that were not visible before.
    pub insertions: Vec<EntityKey>,
    /// Rows visible before that are gone now.
    pub deletions: Vec<EntityKey>,
    /// Rows visible at both ends that were written in between.
    pub modifications: Vec<EntityKey>,
}

impl ChangeSet {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty() && self.modifications.is_empty()
    }

    /// Returns the number of changed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.insertions.len() + self.deletions.len() + self.modifications.len()
    }
}

/// Identifies a subscription for [`crate::Context::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    context: ContextId,
    id: u64,
}

impl SubscriptionToken {
    /// Returns the context the subscription belongs to.
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }
}

/// Type-erased subscriber. The error is set once, when the context is
/// closed by factory shutdown.
pub(crate) type Callback = Box<dyn FnMut(&ChangeSet, Option<&CoreError>)>;

struct Subscription {
    id: u64,
    kind: &'static str,
    /// Generation at subscribe time; only later advances are delivered.
    since_generation: u64,
    /// `None` while the callback is running.
    callback: Option<Callback>,
}

/// Subscriptions of one context.
#[derive(Default)]
pub(crate) struct NotificationHub {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

impl NotificationHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(
        &mut self,
        context: ContextId,
        kind: &'static str,
        generation: u64,
        callback: Callback,
    ) -> SubscriptionToken {
        self.next_id += 1;
        let id = self.next_id;
        self.subscriptions.push(Subscription {
            id,
            kind,
            since_generation: generation,
            callback: Some(callback),
        });
        SubscriptionToken { context, id }
    }

    /// Removes a subscription. A callback that is running right now is
    /// dropped when it returns.
    pub(crate) fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|sub| sub.id != token.id);
        self.subscriptions.len() != before
    }

    /// Returns every subscribed kind once.
    pub(crate) fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = Vec::new();
        for sub in &self.subscriptions {
            if !kinds.contains(&sub.kind) {
                kinds.push(sub.kind);
            }
        }
        kinds
    }

    /// Returns the subscriptions that should see the advance to `generation`,
    /// in subscription order.
    pub(crate) fn due(&self, generation: u64) -> Vec<(u64, &'static str)> {
        self.subscriptions
            .iter()
            .filter(|sub| sub.since_generation < generation)
            .map(|sub| (sub.id, sub.kind))
            .collect()
    }

    pub(crate) fn take_callback(&mut self, id: u64) -> Option<Callback> {
        self.subscriptions
            .iter_mut()
            .find(|sub| sub.id == id)
            .and_then(|sub| sub.callback.take())
    }

    /// Puts a callback back after it ran. Dropped if it was unsubscribed
    /// in the meantime.
    pub(crate) fn restore_callback(&mut self, id: u64, callback: Callback) {
        if let Some(sub) = self.subscriptions.iter_mut().find(|sub| sub.id == id) {
            sub.callback = Some(callback);
        }
    }

    /// Removes every subscription and returns the callbacks not currently
    /// running.
    pub(crate) fn drain(&mut self) -> Vec<Callback> {
        self.subscriptions
            .drain(..)
            .filter_map(|sub| sub.callback)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }
}

impl fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationHub")
            .field("subscriptions", &self.subscriptions.len())
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counting(counter: &Rc<Cell<usize>>) -> Callback {
        let counter = Rc::clone(counter);
        Box::new(move |_, _| counter.set(counter.get() + 1))
    }

    #[test]
    fn empty_changeset() {
        let mut changes = ChangeSet::default();
        assert!(changes.is_empty());
        changes
            .modifications
            .push(EntityKey::new("beatmap", EntityId::new()));
        assert!(!changes.is_empty());
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn kinds_are_deduplicated() {
        let counter = Rc::new(Cell::new(0));
        let mut hub = NotificationHub::new();
        hub.subscribe(ContextId::new(1), "beatmap", 0, counting(&counter));
        hub.subscribe(ContextId::new(1), "ruleset", 0, counting(&counter));
        hub.subscribe(ContextId::new(1), "beatmap", 0, counting(&counter));
        assert_eq!(hub.kinds(), vec!["beatmap", "ruleset"]);
        assert_eq!(hub.len(), 3);
    }

    #[test]
    fn late_subscriptions_skip_current_generation() {
        let counter = Rc::new(Cell::new(0));
        let mut hub = NotificationHub::new();
        hub.subscribe(ContextId::new(1), "beatmap", 0, counting(&counter));
        hub.subscribe(ContextId::new(1), "beatmap", 3, counting(&counter));

        assert_eq!(hub.due(3).len(), 1);
        assert_eq!(hub.due(4).len(), 2);
    }

    #[test]
    fn unsubscribed_while_running_is_dropped() {
        let counter = Rc::new(Cell::new(0));
        let mut hub = NotificationHub::new();
        let token = hub.subscribe(ContextId::new(1), "beatmap", 0, counting(&counter));
        let (id, _) = hub.due(1)[0];

        let mut callback = hub.take_callback(id).unwrap();
        callback(&ChangeSet::default(), None);
        assert!(hub.unsubscribe(token));
        hub.restore_callback(id, callback);

        assert_eq!(counter.get(), 1);
        assert_eq!(hub.len(), 0);
        assert!(hub.drain().is_empty());
        // The hub no longer holds the callback's clone.
        assert_eq!(Rc::strong_count(&counter), 1);
    }

    #[test]
    fn drain_returns_idle_callbacks() {
        let counter = Rc::new(Cell::new(0));
        let mut hub = NotificationHub::new();
        hub.subscribe(ContextId::new(1), "beatmap", 0, counting(&counter));
        let busy = hub.subscribe(ContextId::new(1), "ruleset", 0, counting(&counter));
        let _running = hub.take_callback(busy.id);

        let mut drained = hub.drain();
        assert_eq!(drained.len(), 1);
        for callback in &mut drained {
            callback(&ChangeSet::default(), Some(&CoreError::ContextClosed));
        }
        assert_eq!(counter.get(), 1);
        assert_eq!(hub.len(), 0);
    }
}

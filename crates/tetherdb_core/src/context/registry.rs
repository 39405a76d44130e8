//! Per-thread registry of open contexts.
//!
//! Scoped access through a [`crate::LiveRef`] looks here to find the
//! contexts the calling thread already holds. Entries are weak; a context
//! removes itself when it closes.

use super::factory::FactoryShared;
use super::ContextInner;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

thread_local! {
    static OPEN_CONTEXTS: RefCell<Vec<Weak<ContextInner>>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn register(context: &Rc<ContextInner>) {
    let _ = OPEN_CONTEXTS.try_with(|open| open.borrow_mut().push(Rc::downgrade(context)));
}

pub(crate) fn deregister(context: &ContextInner) {
    // Fails only while the thread's locals are being torn down.
    let _ = OPEN_CONTEXTS.try_with(|open| {
        open.borrow_mut()
            .retain(|entry| entry.strong_count() > 0 && !std::ptr::eq(entry.as_ptr(), context));
    });
}

/// Returns this thread's open contexts of `factory`, oldest first.
pub(crate) fn open_contexts(factory: &Arc<FactoryShared>) -> Vec<Rc<ContextInner>> {
    let live: Vec<Rc<ContextInner>> = OPEN_CONTEXTS
        .try_with(|open| open.borrow().iter().filter_map(Weak::upgrade).collect())
        .unwrap_or_default();

    // Filtered after the borrow ends: dropping an entry runs subscriber
    // destructors, which may close other contexts.
    live.into_iter()
        .filter(|context| context.is_open() && Arc::ptr_eq(context.factory(), factory))
        .collect()
}

#[cfg(test)]
pub(crate) fn registered_count() -> usize {
    OPEN_CONTEXTS
        .try_with(|open| open.borrow().iter().filter(|e| e.strong_count() > 0).count())
        .unwrap_or(0)
}

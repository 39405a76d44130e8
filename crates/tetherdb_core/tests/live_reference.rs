//! Live reference behaviour across contexts and threads.

use proptest::prelude::*;
use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;
use tetherdb_core::{CoreError, IntoLive, LiveRef, Link};
use tetherdb_testkit::prelude::*;

fn add_ruleset(factory: &TestFactory) -> Link<Ruleset> {
    let context = factory.create_context().unwrap();
    context
        .write(|scope| scope.add(ruleset("osu")))
        .unwrap()
        .link()
}

fn add_beatmap(factory: &TestFactory, title: &str) -> LiveRef<Beatmap> {
    let ruleset = add_ruleset(factory);
    let context = factory.create_context().unwrap();
    context
        .write(|scope| scope.add(Beatmap::new(ruleset, title)))
        .unwrap()
        .to_live()
}

#[test]
fn live_equality_across_contexts() {
    let factory = TestFactory::memory();
    let live = add_beatmap(&factory, "Triumph & Regret");
    let key = live.key().unwrap().clone();

    let first = factory.create_context().unwrap();
    let second = factory.create_context().unwrap();
    let a = first.resolve::<Beatmap>(&key).unwrap().to_live();
    let b = second.resolve::<Beatmap>(&key).unwrap().to_live();

    assert_eq!(a, b);
    assert_eq!(a, live);

    let set: HashSet<_> = [a, b, live].into_iter().collect();
    assert_eq!(set.len(), 1);
}

#[test]
fn unmanaged_references_compare_by_allocation() {
    let ruleset = Link::new(tetherdb_core::EntityId::new());
    let beatmap = Beatmap::new(ruleset, "same");

    let a = beatmap.to_live();
    let b = beatmap.to_live();
    assert_ne!(a, b);
    assert_eq!(a, a.clone());
}

#[test]
fn access_after_attach() {
    let factory = TestFactory::memory();
    let ruleset = add_ruleset(&factory);
    let beatmap = Beatmap::new(ruleset, "attached later");
    let live = beatmap.to_live();

    let context = factory.create_context().unwrap();
    let managed = context.write(|scope| scope.add(beatmap.clone())).unwrap();

    assert!(!live.is_managed());
    assert!(!live.perform_read(|b| b.hidden).unwrap());
    assert_ne!(live, managed.to_live());
}

#[test]
fn access_non_managed() {
    let beatmap = Beatmap::new(Link::new(tetherdb_core::EntityId::new()), "loose");
    let live = beatmap.to_live();

    assert!(!beatmap.hidden);
    assert!(!live.value().unwrap().hidden);
    assert!(!live.perform_read(|b| b.hidden).unwrap());

    let err = live.perform_write(|b| b.hidden = true).unwrap_err();
    assert!(matches!(err, CoreError::UnmanagedWriteAttempt));

    assert!(!beatmap.hidden);
    assert!(!live.value().unwrap().hidden);
    assert!(!live.perform_read(|b| b.hidden).unwrap());
    assert!(!live.last_known().unwrap().hidden);
}

#[test]
fn value_access_with_open_context_on_other_thread() {
    let factory = TestFactory::memory();
    let live = add_beatmap(&factory, "elsewhere");

    let factory_handle = factory.factory.clone();
    let outcome = on_new_thread(move || {
        let context = factory_handle.create_context().unwrap();
        let before = live.value();
        let scoped = live.perform_read(|b| b.title.clone());

        context.resolve::<Beatmap>(live.key().unwrap()).unwrap();
        let resolved = live.value();
        (before, scoped, resolved)
    });

    let (before, scoped, resolved) = outcome;
    assert!(matches!(before, Err(CoreError::InvalidScopeAccess { .. })));
    assert_eq!(scoped.unwrap(), "elsewhere");
    assert_eq!(resolved.unwrap().title, "elsewhere");
}

#[test]
fn value_access_without_open_context_fails() {
    let factory = TestFactory::memory();
    let live = add_beatmap(&factory, "nowhere");

    let err = on_new_thread(move || live.value().unwrap_err());
    assert!(matches!(err, CoreError::InvalidScopeAccess { .. }));
    assert!(err.is_scope_error());
}

#[test]
fn value_of_removed_row_is_invalid() {
    let factory = TestFactory::memory();
    let live = add_beatmap(&factory, "removed");
    let key = live.key().unwrap().clone();

    let context = factory.create_context().unwrap();
    let managed = context.resolve::<Beatmap>(&key).unwrap();
    assert_eq!(live.value().unwrap().title, "removed");

    context.write(|scope| scope.remove(&managed)).unwrap();

    assert!(!managed.is_valid());
    let err = live.value().unwrap_err();
    assert!(matches!(err, CoreError::EntityInvalid { .. }));
    assert!(!err.is_scope_error());
}

#[test]
fn scoped_read_without_context() {
    let factory = TestFactory::memory();
    let live = add_beatmap(&factory, "transient");

    let (hidden, open) = on_new_thread({
        let factory = factory.factory.clone();
        move || {
            let hidden = live.perform_read(|b| b.hidden).unwrap();
            (hidden, factory.open_context_count())
        }
    });

    assert!(!hidden);
    assert_eq!(open, 0);
}

#[test]
fn scoped_write_without_context() {
    let factory = TestFactory::memory();
    let live = add_beatmap(&factory, "to hide");

    let writer = live.clone();
    on_new_thread(move || writer.perform_write(|b| b.hidden = true).unwrap());

    assert!(live.perform_read(|b| b.hidden).unwrap());
    assert!(live.last_known().unwrap().hidden);
}

#[test]
fn perform_write_returns_action_result() {
    let factory = TestFactory::memory();
    let live = add_beatmap(&factory, "old");

    let previous = live
        .perform_write(|b| std::mem::replace(&mut b.title, "new".into()))
        .unwrap();

    assert_eq!(previous, "old");
    assert_eq!(live.perform_read(|b| b.title.clone()).unwrap(), "new");
}

#[test]
fn live_assumptions() {
    let factory = TestFactory::memory();
    let changes_triggered = Rc::new(Cell::new(0));

    let update_context = factory.create_context().unwrap();
    let counter = Rc::clone(&changes_triggered);
    update_context
        .all::<Beatmap>()
        .unwrap()
        .subscribe(move |_, changes, error| {
            assert!(error.is_none());
            assert!(!changes.is_empty());
            counter.set(counter.get() + 1);
        })
        .unwrap();

    let live = on_new_thread({
        let factory = factory.factory.clone();
        move || {
            let context = factory.create_context().unwrap();
            let rules = context
                .write(|scope| scope.add(ruleset("osu")))
                .unwrap()
                .link();
            let beatmap = context
                .write(|scope| scope.add(Beatmap::new(rules, "first")))
                .unwrap();
            // A second commit makes sure the refresh below is a full one.
            context
                .write(|scope| scope.add(Beatmap::new(rules, "second")))
                .unwrap();
            beatmap.to_live()
        }
    });

    // Not yet seen by the update context.
    let beatmaps = update_context.all::<Beatmap>().unwrap();
    assert_eq!(beatmaps.count().unwrap(), 0);
    assert_eq!(changes_triggered.get(), 0);

    live.perform_read(|resolved| {
        // Retrieval refreshes every context on this thread, firing even
        // notifications unrelated to the retrieved row.
        assert_eq!(beatmaps.count().unwrap(), 2);
        assert_eq!(changes_triggered.get(), 1);
        assert!(!resolved.hidden);

        let key = live.key().unwrap();
        update_context
            .write(|scope| scope.remove_key(key))
            .unwrap();
    })
    .unwrap();

    assert_eq!(beatmaps.count().unwrap(), 1);
    assert_eq!(changes_triggered.get(), 2);

    let err = live.perform_read(|b| b.hidden).unwrap_err();
    assert!(matches!(err, CoreError::EntityInvalid { .. }));
}

#[test]
fn notification_reports_batched_keys() {
    let factory = TestFactory::memory();
    let context = factory.create_context().unwrap();
    let seen = Rc::new(Cell::new((0, 0, 0)));

    let sink = Rc::clone(&seen);
    context
        .subscribe::<Beatmap, _>(move |_, changes, _| {
            let (i, d, m) = sink.get();
            sink.set((
                i + changes.insertions.len(),
                d + changes.deletions.len(),
                m + changes.modifications.len(),
            ));
        })
        .unwrap();

    let live = add_beatmap(&factory, "batched");
    let writer = live.clone();
    on_new_thread(move || {
        writer.perform_write(|b| b.hidden = true).unwrap();
        writer.perform_write(|b| b.title = "renamed".into()).unwrap();
    });

    context.refresh().unwrap();
    // Inserted and modified since the last refresh folds into one insertion.
    assert_eq!(seen.get(), (1, 0, 0));

    on_new_thread(move || live.perform_write(|b| b.hidden = false).unwrap());
    context.refresh().unwrap();
    assert_eq!(seen.get(), (1, 0, 1));
}

#[test]
fn cross_thread_write_visibility() {
    let factory = TestFactory::memory();
    let live = add_beatmap(&factory, "shared");

    let context = factory.create_context().unwrap();
    let managed = context.resolve::<Beatmap>(live.key().unwrap()).unwrap();
    assert!(!managed.get().unwrap().hidden);

    let writer = live.clone();
    on_new_thread(move || writer.perform_write(|b| b.hidden = true).unwrap());

    // The open context keeps its snapshot until something refreshes it.
    assert!(!managed.get().unwrap().hidden);
    assert!(!live.value().unwrap().hidden);

    assert!(live.perform_read(|b| b.hidden).unwrap());
    assert!(managed.get().unwrap().hidden);
    assert!(live.value().unwrap().hidden);
}

#[test]
fn link_resolution() {
    let factory = TestFactory::memory();
    let live = add_beatmap(&factory, "linked");

    let context = factory.create_context().unwrap();
    let beatmap = context.resolve::<Beatmap>(live.key().unwrap()).unwrap();
    let ruleset = context.resolve_link(&beatmap.get().unwrap().ruleset).unwrap();
    assert_eq!(ruleset.get().unwrap().short_name, "osu");

    let dangling = Link::<Ruleset>::new(tetherdb_core::EntityId::new());
    assert!(matches!(
        context.resolve_link(&dangling),
        Err(CoreError::EntityInvalid { .. })
    ));
}

#[test]
fn live_refs_are_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<LiveRef<Beatmap>>();
    assert_send_sync::<tetherdb_core::ContextFactory>();
    assert_send_sync::<Link<Ruleset>>();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn unmanaged_round_trip(beatmap in beatmap_strategy(Link::new(tetherdb_core::EntityId::new()))) {
        let live = beatmap.to_live();
        prop_assert_eq!(live.perform_read(Beatmap::clone).unwrap(), beatmap);
    }

    #[test]
    fn managed_round_trip(
        rules in ruleset_strategy(),
        title in title_strategy(),
        difficulty in difficulty_strategy(),
        hidden in any::<bool>(),
    ) {
        let factory = TestFactory::memory();
        let context = factory.create_context().unwrap();
        let link = context.write(|scope| scope.add(rules.clone())).unwrap().link();
        let beatmap = Beatmap { ruleset: link, title, difficulty, hidden };

        let live = context.write(|scope| scope.add(beatmap.clone())).unwrap().to_live();
        prop_assert!(live.is_managed());
        prop_assert_eq!(live.perform_read(Beatmap::clone).unwrap(), beatmap.clone());

        let reader = live.clone();
        let seen = on_new_thread(move || reader.perform_read(Beatmap::clone).unwrap());
        prop_assert_eq!(seen, beatmap);
    }
}

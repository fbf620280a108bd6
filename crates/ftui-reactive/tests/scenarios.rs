//! End-to-end scenarios driving the engine the way a host event loop would:
//! mutate, then drain the microtask queue.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ftui_reactive::config::{self, ReactiveConfig};
use ftui_reactive::observer::field_dep;
use ftui_reactive::{
    Expression, Owner, Value, WatchOptions, Watcher, WatcherOptions, callback, define_tracked_field,
    delete, drain_microtasks, make_observable, scheduler, set,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn num(v: &Value) -> f64 {
    v.as_f64().unwrap_or(f64::NAN)
}

type Log<T> = Rc<RefCell<Vec<T>>>;

fn log<T>() -> Log<T> {
    Rc::new(RefCell::new(Vec::new()))
}

fn capture_errors() -> Log<String> {
    let seen = log();
    let sink = Rc::clone(&seen);
    config::install(
        ReactiveConfig::default()
            .with_error_handler(move |err, info| sink.borrow_mut().push(format!("{info}: {err}"))),
    );
    seen
}

/// Eager watcher over `compute` that counts callback invocations.
fn counting<F>(compute: F, hits: &Rc<Cell<u32>>) -> Watcher
where
    F: Fn() -> Value + 'static,
{
    let hits = Rc::clone(hits);
    Watcher::detached(
        Expression::func(move |_| Ok(compute())),
        Some(callback(move |_, _| {
            hits.set(hits.get() + 1);
            Ok(())
        })),
        WatcherOptions::default(),
    )
    .unwrap()
}

// ═════════════════════════════════════════════════════════════════════════
// Basic notification
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn callback_receives_new_and_old_after_flush() {
    let obj = make_observable(Value::object([("a", Value::from(1))]));
    let seen = log();
    let sink = Rc::clone(&seen);
    let source = obj.clone();
    let _w = Watcher::detached(
        Expression::func(move |_| Ok(source.get("a"))),
        Some(callback(move |new, old| {
            sink.borrow_mut().push((num(new), num(old)));
            Ok(())
        })),
        WatcherOptions::default(),
    )
    .unwrap();
    assert!(seen.borrow().is_empty());

    obj.assign("a", Value::from(2));
    assert!(seen.borrow().is_empty());
    drain_microtasks();
    assert_eq!(*seen.borrow(), vec![(2.0, 1.0)]);
}

#[test]
fn lazy_computation_is_not_invoked_until_peeked() {
    let obj = make_observable(Value::object([("a", Value::from(1))]));
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let source = obj.clone();
    let w = Watcher::detached(
        Expression::func(move |_| {
            counter.set(counter.get() + 1);
            Ok(source.get("a"))
        }),
        Some(callback(|_, _| Err("lazy callbacks never fire".into()))),
        WatcherOptions::default().with_lazy(true),
    )
    .unwrap();
    assert_eq!(calls.get(), 0);

    assert_eq!(w.peek().unwrap(), Value::from(1));
    assert_eq!(w.peek().unwrap(), Value::from(1));
    assert_eq!(calls.get(), 2);

    obj.assign("a", Value::from(2));
    drain_microtasks();
    assert!(w.is_dirty());
    assert_eq!(calls.get(), 2);
    assert_eq!(w.peek().unwrap(), Value::from(2));
    assert_eq!(calls.get(), 3);
}

#[test]
fn sequence_pushes_coalesce_into_one_callback() {
    let obj = make_observable(Value::object([("list", Value::array([]))]));
    let hits = Rc::new(Cell::new(0));
    let source = obj.clone();
    let _w = counting(
        move || {
            let list = source.get("list");
            Value::from(list.as_array().map_or(0.0, |a| a.len() as f64))
        },
        &hits,
    );

    let list = obj.get("list");
    let arr = list.as_array().unwrap();
    arr.push([Value::from(1)]);
    arr.push([Value::from(2)]);
    arr.push([Value::from(3)]);
    assert_eq!(scheduler::queued_len(), 1);
    drain_microtasks();
    assert_eq!(hits.get(), 1);
}

#[test]
fn invalidated_together_run_in_creation_order() {
    let obj = make_observable(Value::object([("x", Value::from(0))]));
    let order = log();
    let mut watchers = Vec::new();
    for label in ["first", "second", "third"] {
        let source = obj.clone();
        let sink = Rc::clone(&order);
        watchers.push(
            Watcher::detached(
                Expression::func(move |_| Ok(source.get("x"))),
                Some(callback(move |_, _| {
                    sink.borrow_mut().push(label);
                    Ok(())
                })),
                WatcherOptions::default(),
            )
            .unwrap(),
        );
    }
    obj.assign("x", Value::from(1));
    drain_microtasks();
    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
}

// ═════════════════════════════════════════════════════════════════════════
// Dependency tracking
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn untaken_branch_stops_triggering() {
    let obj = make_observable(Value::object([
        ("use_left", Value::from(true)),
        ("left", Value::from(1)),
        ("right", Value::from(2)),
    ]));
    let hits = Rc::new(Cell::new(0));
    let source = obj.clone();
    let _w = counting(
        move || {
            if source.get("use_left").as_bool() == Some(true) {
                source.get("left")
            } else {
                source.get("right")
            }
        },
        &hits,
    );

    obj.assign("right", Value::from(20));
    drain_microtasks();
    assert_eq!(hits.get(), 0);

    obj.assign("use_left", Value::from(false));
    drain_microtasks();
    assert_eq!(hits.get(), 1);

    obj.assign("left", Value::from(10));
    drain_microtasks();
    assert_eq!(hits.get(), 1);
}

#[test]
fn nested_element_mutation_retriggers_sequence_reader() {
    let obj = make_observable(Value::object([(
        "rows",
        Value::array([
            Value::object([("label", Value::from("a"))]),
            Value::object([("label", Value::from("b"))]),
        ]),
    )]));
    let hits = Rc::new(Cell::new(0));
    let source = obj.clone();
    let _w = counting(move || source.get("rows"), &hits);

    let rows = obj.get("rows");
    let second = rows.as_array().unwrap().get(1);
    set(&second, "extra", Value::from(true));
    drain_microtasks();
    assert_eq!(hits.get(), 1);
    assert_eq!(rows.as_array().unwrap().len(), 2);
}

#[test]
fn deep_watch_sees_nested_field_writes() {
    let owner = Owner::with_data(
        "settings",
        Value::object([(
            "theme",
            Value::object([("colors", Value::object([("fg", Value::from("white"))]))]),
        )]),
    );
    let hits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&hits);
    owner
        .watch(
            "theme",
            callback(move |_, _| {
                counter.set(counter.get() + 1);
                Ok(())
            }),
            WatchOptions::default().with_deep(true),
        )
        .unwrap();

    let colors = owner.get("theme").get("colors");
    colors.assign("fg", Value::from("black"));
    drain_microtasks();
    assert_eq!(hits.get(), 1);
}

#[test]
fn shallow_watch_ignores_nested_field_writes() {
    let owner = Owner::with_data(
        "settings",
        Value::object([(
            "theme",
            Value::object([("colors", Value::object([("fg", Value::from("white"))]))]),
        )]),
    );
    let hits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&hits);
    owner
        .watch(
            "theme",
            callback(move |_, _| {
                counter.set(counter.get() + 1);
                Ok(())
            }),
            WatchOptions::default(),
        )
        .unwrap();

    owner.get("theme").get("colors").assign("fg", Value::from("black"));
    drain_microtasks();
    assert_eq!(hits.get(), 0);
}

// ═════════════════════════════════════════════════════════════════════════
// Imperative helpers
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn set_new_key_notifies_container_readers() {
    let obj = make_observable(Value::object([("user", Value::empty_object())]));
    let hits = Rc::new(Cell::new(0));
    let source = obj.clone();
    let _w = counting(move || source.get("user"), &hits);

    let user = obj.get("user");
    set(&user, "name", Value::from("ada"));
    drain_microtasks();
    assert_eq!(hits.get(), 1);
    assert!(user.as_object().unwrap().is_tracked("name"));

    let name_hits = Rc::new(Cell::new(0));
    let reader = user.clone();
    let _name = counting(move || reader.get("name"), &name_hits);
    user.assign("name", Value::from("grace"));
    drain_microtasks();
    assert_eq!(name_hits.get(), 1);
}

#[test]
fn set_index_wraps_and_notifies() {
    let obj = make_observable(Value::object([("list", Value::array([Value::from(1)]))]));
    let hits = Rc::new(Cell::new(0));
    let source = obj.clone();
    let _w = counting(move || source.get("list"), &hits);

    let list = obj.get("list");
    let item = Value::object([("x", Value::from(1))]);
    set(&list, 3, item.clone());
    drain_microtasks();
    assert_eq!(hits.get(), 1);
    assert_eq!(list.as_array().unwrap().len(), 4);
    assert!(item.is_reactive());
}

#[test]
fn delete_fires_root_handle_only() {
    let obj = make_observable(Value::object([("k", Value::from(1)), ("j", Value::from(2))]));
    let object = obj.as_object().unwrap().clone();
    let field = field_dep(&object, "k").unwrap();

    let field_hits = Rc::new(Cell::new(0));
    let reader = obj.clone();
    let _field_reader = counting(move || reader.get("k"), &field_hits);

    let root_hits = Rc::new(Cell::new(0));
    let root = obj.observer().unwrap();
    let root_dep = root.dep().clone();
    let _root_reader = counting(
        move || {
            root_dep.declare_read();
            Value::empty_object()
        },
        &root_hits,
    );
    drain_microtasks();
    root_hits.set(0);

    delete(&obj, "k");
    drain_microtasks();
    assert_eq!(root_hits.get(), 1);
    assert_eq!(field_hits.get(), 0);
    assert!(!object.has("k"));
    assert_eq!(field.subscriber_count(), 1);
}

#[test]
fn invalid_write_hook_reports_but_write_proceeds() {
    let warnings = Rc::new(Cell::new(0));
    let counter = Rc::clone(&warnings);
    let obj = make_observable(Value::empty_object());
    let object = obj.as_object().unwrap().clone();
    define_tracked_field(
        &object,
        "readonly",
        Value::from(1),
        Some(Rc::new(move || counter.set(counter.get() + 1))),
        false,
    );
    obj.assign("readonly", Value::from(2));
    assert_eq!(warnings.get(), 1);
    assert_eq!(obj.get("readonly"), Value::from(2));

    obj.assign("readonly", Value::from(2));
    assert_eq!(warnings.get(), 1);
}

#[test]
fn shallow_field_leaves_value_plain() {
    let obj = make_observable(Value::empty_object());
    let object = obj.as_object().unwrap().clone();
    let payload = Value::object([("big", Value::from(1))]);
    define_tracked_field(&object, "payload", payload.clone(), None, true);
    assert!(!payload.is_reactive());
    assert!(obj.is_reactive());
}

#[test]
fn make_observable_is_idempotent() {
    let obj = make_observable(Value::object([("a", Value::from(1))]));
    let first = obj.observer().unwrap();
    let again = make_observable(obj.clone());
    assert!(Rc::ptr_eq(&first, &again.observer().unwrap()));
}

// ═════════════════════════════════════════════════════════════════════════
// Scheduler behaviour
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn runaway_watch_is_stopped_and_reported() {
    let errors = capture_errors();
    let owner = Owner::with_data(
        "loop",
        Value::object([("n", Value::from(0)), ("other", Value::from(0))]),
    );
    let runs = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&runs);
    let writer = owner.clone();
    owner
        .watch(
            "n",
            callback(move |new, _| {
                counter.set(counter.get() + 1);
                writer.assign("n", Value::from(num(new) + 1.0));
                Ok(())
            }),
            WatchOptions::default(),
        )
        .unwrap();
    let other_hits = Rc::new(Cell::new(0));
    let other = Rc::clone(&other_hits);
    owner
        .watch(
            "other",
            callback(move |_, _| {
                other.set(other.get() + 1);
                Ok(())
            }),
            WatchOptions::default(),
        )
        .unwrap();

    owner.assign("n", Value::from(1));
    owner.assign("other", Value::from(1));
    drain_microtasks();

    assert_eq!(runs.get(), 101);
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("infinite update loop"));
    assert_eq!(other_hits.get(), 1);
    assert_eq!(scheduler::queued_len(), 0);
}

#[test]
fn teardown_inside_flush_skips_queued_entry() {
    let obj = make_observable(Value::object([("x", Value::from(0))]));
    let victim_slot: Rc<RefCell<Option<Watcher>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&victim_slot);
    let source = obj.clone();
    let _killer = Watcher::detached(
        Expression::func(move |_| Ok(source.get("x"))),
        Some(callback(move |_, _| {
            if let Some(victim) = slot.borrow().as_ref() {
                victim.teardown();
            }
            Ok(())
        })),
        WatcherOptions::default(),
    )
    .unwrap();
    let victim_hits = Rc::new(Cell::new(0));
    let reader = obj.clone();
    let victim = counting(move || reader.get("x"), &victim_hits);
    *victim_slot.borrow_mut() = Some(victim.clone());

    obj.assign("x", Value::from(1));
    assert_eq!(scheduler::queued_len(), 2);
    drain_microtasks();
    assert_eq!(victim_hits.get(), 0);
    assert!(!victim.is_active());
}

#[test]
fn internal_failure_inside_flush_is_reported_and_flush_continues() {
    let errors = capture_errors();
    let owner = Owner::with_data("broken", Value::object([("ok", Value::from(true))]));
    owner
        .mount(|ctx| {
            if ctx.get("ok").as_bool() == Some(true) {
                Ok(Value::Null)
            } else {
                Err("render failed".into())
            }
        })
        .unwrap();
    let hits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&hits);
    owner
        .watch(
            "ok",
            callback(move |_, _| {
                counter.set(counter.get() + 1);
                Ok(())
            }),
            WatchOptions::default(),
        )
        .unwrap();

    owner.assign("ok", Value::from(false));
    drain_microtasks();
    assert_eq!(errors.borrow().len(), 1);
    assert!(errors.borrow()[0].contains("render failed"));
    assert_eq!(hits.get(), 1);
}

#[test]
fn sync_watcher_bypasses_the_queue() {
    let obj = make_observable(Value::object([("a", Value::from(1))]));
    let seen = log();
    let sink = Rc::clone(&seen);
    let source = obj.clone();
    let _w = Watcher::detached(
        Expression::func(move |_| Ok(source.get("a"))),
        Some(callback(move |new, _| {
            sink.borrow_mut().push(num(new));
            Ok(())
        })),
        WatcherOptions::default().with_sync(true),
    )
    .unwrap();
    obj.assign("a", Value::from(2));
    assert_eq!(*seen.borrow(), vec![2.0]);
    assert_eq!(scheduler::queued_len(), 0);
    assert!(!scheduler::is_waiting());
}

// ═════════════════════════════════════════════════════════════════════════
// Owners
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn updated_hooks_run_children_before_parents() {
    let order = log();
    let parent = Owner::with_data("parent", Value::object([("v", Value::from(0))]));
    let child = Owner::with_data("child", Value::object([("v", Value::from(0))]));
    for owner in [&parent, &child] {
        let sink = Rc::clone(&order);
        let name = owner.name().to_string();
        owner.on_updated(move || {
            sink.borrow_mut().push(name.clone());
            Ok(())
        });
    }
    parent.mount(|ctx| Ok(ctx.get("v"))).unwrap();
    child.mount(|ctx| Ok(ctx.get("v"))).unwrap();

    child.assign("v", Value::from(1));
    parent.assign("v", Value::from(1));
    drain_microtasks();
    assert_eq!(*order.borrow(), vec!["child".to_string(), "parent".to_string()]);
}

#[test]
fn destroyed_owner_stops_updating() {
    let owner = Owner::with_data("gone", Value::object([("v", Value::from(0))]));
    let renders = Rc::new(Cell::new(0));
    let counter = Rc::clone(&renders);
    owner
        .mount(move |ctx| {
            counter.set(counter.get() + 1);
            Ok(ctx.get("v"))
        })
        .unwrap();
    assert_eq!(renders.get(), 1);

    owner.assign("v", Value::from(1));
    owner.destroy();
    drain_microtasks();
    assert_eq!(renders.get(), 1);
    assert!(owner.watchers().is_empty());
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use embed_js::{
  CollectionMode, ContextGroup, GlobalContext, GroupOptions, HeapLimits, JsString,
  PropertyAttributes, Value, VmError,
};

#[test]
fn contexts_in_a_group_share_objects() -> Result<(), VmError> {
  let group = ContextGroup::new();
  let first = GlobalContext::new_in_group(&group, None)?;
  let second = GlobalContext::new_in_group(&group, None)?;
  assert!(first.group().ptr_eq(second.group()));
  assert_ne!(first.global_object(), second.global_object());

  let shared = {
    let mut cx = first.enter();
    let shared = cx.make_object(None, None)?;
    let global = cx.global_object();
    cx.set_property(
      global,
      &JsString::from("shared"),
      Value::Object(shared),
      PropertyAttributes::NONE,
    )?;
    shared
  };

  let mut cx = second.enter();
  let global = cx.global_object();
  cx.set_property(
    global,
    &JsString::from("borrowed"),
    Value::Object(shared),
    PropertyAttributes::NONE,
  )?;
  assert_eq!(
    cx.get_property(global, &JsString::from("borrowed"))?,
    Value::Object(shared)
  );
  Ok(())
}

#[test]
fn handles_from_other_groups_are_rejected() -> Result<(), VmError> {
  let first = GlobalContext::new(None)?;
  let second = GlobalContext::new(None)?;
  assert!(!first.group().ptr_eq(second.group()));

  let foreign = first.enter().make_object(None, None)?;
  let mut cx = second.enter();
  assert!(matches!(
    cx.get_property(foreign, &JsString::from("x")),
    Err(VmError::ForeignHandle)
  ));
  let global = cx.global_object();
  assert!(matches!(
    cx.set_property(
      global,
      &JsString::from("x"),
      Value::Object(foreign),
      PropertyAttributes::NONE
    ),
    Err(VmError::ForeignHandle)
  ));
  assert!(matches!(
    cx.set_prototype(global, Some(foreign)),
    Err(VmError::ForeignHandle)
  ));
  Ok(())
}

#[test]
fn contexts_retain_their_group() -> Result<(), VmError> {
  let group = ContextGroup::new();
  assert_eq!(group.ref_count(), 1);

  let global = GlobalContext::new_in_group(&group, None)?;
  assert_eq!(group.ref_count(), 2);

  let retained = global.clone();
  assert_eq!(global.ref_count(), 2);
  drop(retained);
  assert_eq!(global.ref_count(), 1);

  {
    let cx = global.enter();
    assert!(cx.global_context().ptr_eq(&global));
    assert!(cx.group().ptr_eq(&group));
  }

  drop(global);
  assert_eq!(group.ref_count(), 1);
  Ok(())
}

#[test]
fn context_names_are_diagnostic_only() -> Result<(), VmError> {
  let global = GlobalContext::new(None)?;
  assert_eq!(global.name(), None);
  global.set_name(Some("main"));
  assert_eq!(global.name().as_deref(), Some("main"));
  assert!(format!("{global:?}").contains("main"));
  global.set_name(None);
  assert_eq!(global.name(), None);
  Ok(())
}

#[test]
fn try_enter_does_not_block() -> Result<(), VmError> {
  let global = GlobalContext::new(None)?;
  let cx = global.enter();
  assert!(global.try_enter().is_none());
  drop(cx);
  assert!(global.try_enter().is_some());
  Ok(())
}

#[test]
fn dropping_a_context_releases_its_global_object() -> Result<(), VmError> {
  let group = ContextGroup::new();
  let global = GlobalContext::new_in_group(&group, None)?;
  let global_object = global.global_object();

  group.collect_garbage();
  assert!(group.lock_heap().is_valid_object(global_object));

  drop(global);
  group.collect_garbage();
  assert!(!group.lock_heap().is_valid_object(global_object));
  Ok(())
}

#[test]
fn deferred_collections_run_on_the_run_loop() -> Result<(), VmError> {
  let group = ContextGroup::with_options(GroupOptions {
    heap_limits: HeapLimits::new(1024 * 1024, 1024),
    collection: CollectionMode::Deferred,
    bind_to_current_thread: true,
  });
  let global = GlobalContext::new_in_group(&group, None)?;

  let runs_before = group.lock_heap().gc_runs();
  {
    let mut cx = global.enter();
    for _ in 0..64 {
      cx.make_object(None, None)?;
    }
  }
  assert!(group.lock_heap().collection_scheduled());
  assert_eq!(group.lock_heap().gc_runs(), runs_before);
  assert!(group.has_pending_work());

  assert_eq!(group.run_deferred()?, 0);
  assert!(group.lock_heap().gc_runs() > runs_before);
  assert!(!group.lock_heap().collection_scheduled());
  assert!(!group.has_pending_work());
  Ok(())
}

#[test]
fn deferred_tasks_run_in_order_on_the_bound_thread() -> Result<(), VmError> {
  let group = ContextGroup::new();
  let ran = Arc::new(AtomicUsize::new(0));

  let counter = ran.clone();
  group.defer(move |group| {
    counter.fetch_add(1, Ordering::SeqCst);
    let counter = counter.clone();
    // Tasks may queue more work; it runs in the same drain.
    group.defer(move |_| {
      counter.fetch_add(10, Ordering::SeqCst);
    });
  });
  assert_eq!(group.pending_tasks(), 1);

  let remote = group.clone();
  let result = thread::spawn(move || remote.run_deferred())
    .join()
    .map_err(|_| VmError::WrongThread)?;
  assert!(matches!(result, Err(VmError::WrongThread)));
  assert_eq!(ran.load(Ordering::SeqCst), 0);

  assert_eq!(group.run_deferred()?, 2);
  assert_eq!(ran.load(Ordering::SeqCst), 11);
  assert_eq!(group.pending_tasks(), 0);
  Ok(())
}

#[test]
fn groups_run_in_parallel() -> Result<(), VmError> {
  let handles: Vec<_> = (0..4u8)
    .map(|i| {
      thread::spawn(move || -> Result<f64, VmError> {
        let global = GlobalContext::new(None)?;
        let mut cx = global.enter();
        let obj = cx.make_object(None, None)?;
        cx.set_property_at_index(obj, 0, Value::Number(f64::from(i)))?;
        let value = cx.get_property_at_index(obj, 0)?;
        cx.to_number(&value)
      })
    })
    .collect();

  for (i, handle) in handles.into_iter().enumerate() {
    let value = handle.join().map_err(|_| VmError::WrongThread)??;
    assert_eq!(value, i as f64);
  }
  Ok(())
}

#[test]
fn group_options_load_from_json() {
  let options: GroupOptions = serde_json::from_str(
    r#"{ "heap_limits": { "max_bytes": 4096, "gc_threshold": 1024 }, "collection": "deferred" }"#,
  )
  .unwrap();
  assert_eq!(options.heap_limits, HeapLimits::new(4096, 1024));
  assert_eq!(options.collection, CollectionMode::Deferred);
  assert!(options.bind_to_current_thread);

  let defaults: GroupOptions = serde_json::from_str("{}").unwrap();
  assert_eq!(defaults, GroupOptions::default());
}

use std::sync::Arc;

use parking_lot::Mutex;

use embed_js::{
  Class, ClassDefinition, GlobalContext, JsString, PropertyAttributes, StaticValue, Value, VmError,
  MAX_CLASS_CHAIN,
};

type Log = Arc<Mutex<Vec<String>>>;

fn logging_class(name: &'static str, parent: Option<&Class>, log: &Log) -> Result<Class, VmError> {
  let init_log = log.clone();
  let finalize_log = log.clone();
  let mut definition = ClassDefinition::new(name)
    .initialize(move |_, _| {
      init_log.lock().push(format!("initialize {name}"));
      Ok(())
    })
    .finalize(move |_| finalize_log.lock().push(format!("finalize {name}")));
  if let Some(parent) = parent {
    definition = definition.parent(parent);
  }
  definition.build()
}

#[test]
fn initializers_run_base_first_and_finalizers_derived_first() -> Result<(), VmError> {
  let log = Log::default();
  let a = logging_class("A", None, &log)?;
  let b = logging_class("B", Some(&a), &log)?;
  let c = logging_class("C", Some(&b), &log)?;

  let global = GlobalContext::new(None)?;
  let obj = global.enter().make_object(Some(&c), None)?;
  assert_eq!(
    *log.lock(),
    ["initialize A", "initialize B", "initialize C"]
  );

  log.lock().clear();
  global.collect_garbage();
  assert!(!global.group().lock_heap().is_valid_object(obj));
  assert_eq!(*log.lock(), ["finalize C", "finalize B", "finalize A"]);
  Ok(())
}

#[test]
fn initializer_error_aborts_creation() -> Result<(), VmError> {
  let class = ClassDefinition::new("Failing")
    .initialize(|_, _| Err(VmError::Throw(Value::from("boom"))))
    .build()?;
  let global = GlobalContext::new(None)?;
  let err = global.enter().make_object(Some(&class), None).unwrap_err();
  assert!(matches!(&err, VmError::Throw(Value::String(s)) if s == "boom"));
  Ok(())
}

#[test]
fn private_data_is_visible_to_initializers_and_finalizers() -> Result<(), VmError> {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let init_seen = seen.clone();
  let finalize_seen = seen.clone();
  let class = ClassDefinition::new("Counter")
    .initialize(move |cx, obj| {
      let value = cx.private_data::<u32>(obj)?.copied();
      init_seen.lock().push(value);
      Ok(())
    })
    .finalize(move |f| {
      finalize_seen.lock().push(f.private::<u32>().copied());
    })
    .build()?;

  let global = GlobalContext::new(None)?;
  {
    let mut cx = global.enter();
    let obj = cx.make_object(Some(&class), Some(Box::new(7u32)))?;
    if let Some(count) = cx.private_data_mut::<u32>(obj)? {
      *count += 1;
    }
    assert_eq!(cx.private_data::<u32>(obj)?, Some(&8));
    assert_eq!(cx.private_data::<String>(obj)?, None);
  }
  global.collect_garbage();
  assert_eq!(*seen.lock(), [Some(7), Some(8)]);
  Ok(())
}

#[test]
fn default_class_objects_have_no_private_storage() -> Result<(), VmError> {
  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let obj = cx.make_object(None, Some(Box::new(1u8)))?;
  assert_eq!(cx.private_data::<u8>(obj)?, None);
  assert!(!cx.set_private(obj, Some(Box::new(2u8)))?);
  assert!(cx.object_class(obj)?.is_none());
  Ok(())
}

#[test]
fn classes_outlive_their_last_external_reference() -> Result<(), VmError> {
  let log = Log::default();
  let class = logging_class("Kept", None, &log)?;
  let global = GlobalContext::new(None)?;
  let obj = global.enter().make_object(Some(&class), None)?;
  global.enter().protect(&Value::Object(obj))?;

  // Instances hold a reference, so dropping the host's handle keeps the class alive.
  assert_eq!(class.ref_count(), 2);
  drop(class);

  let mut cx = global.enter();
  let class = cx.object_class(obj)?.ok_or(VmError::InvalidHandle)?;
  assert_eq!(class.name(), &JsString::from("Kept"));
  Ok(())
}

#[test]
fn global_class_initializes_before_creation_returns() -> Result<(), VmError> {
  let class = ClassDefinition::new("Window")
    .static_value(
      StaticValue::new("kind", PropertyAttributes::READ_ONLY)
        .getter(|_, _, _| Ok(Some(Value::from("window")))),
    )
    .initialize(|cx, obj| {
      cx.set_property(
        obj,
        &JsString::from("ready"),
        Value::Bool(true),
        PropertyAttributes::NONE,
      )
    })
    .build()?;

  let global = GlobalContext::new(Some(&class))?;
  let mut cx = global.enter();
  let global_object = cx.global_object();
  assert!(cx.is_object_of_class(global_object, &class)?);
  assert_eq!(
    cx.get_property(global_object, &JsString::from("ready"))?,
    Value::Bool(true)
  );
  assert_eq!(
    cx.get_property(global_object, &JsString::from("kind"))?,
    Value::from("window")
  );
  Ok(())
}

#[test]
fn over_deep_class_chains_are_rejected() -> Result<(), VmError> {
  let mut class = ClassDefinition::new("Level").build()?;
  for _ in 1..MAX_CLASS_CHAIN {
    class = ClassDefinition::new("Level").parent(&class).build()?;
  }
  let err = ClassDefinition::new("TooDeep")
    .parent(&class)
    .build()
    .unwrap_err();
  assert!(matches!(err, VmError::InvalidClassDefinition(_)));
  Ok(())
}

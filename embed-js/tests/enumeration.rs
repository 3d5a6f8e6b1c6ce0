use embed_js::{
  ClassAttributes, ClassDefinition, GlobalContext, JsString, PropertyAttributes, PropertyNameArray,
  StaticFunction, StaticValue, Value, VmError,
};

fn names(array: &PropertyNameArray) -> Vec<String> {
  array.iter().map(JsString::to_utf8_lossy).collect()
}

#[test]
fn enumeration_order_is_callbacks_statics_own_then_prototype() -> Result<(), VmError> {
  let base = ClassDefinition::new("Base")
    .static_value(StaticValue::new("baseStatic", PropertyAttributes::NONE))
    .get_property_names(|_, _, acc| {
      acc.add_name("fromBase");
      acc.add_name("shared");
      Ok(())
    })
    .build()?;
  // Without an automatic prototype, "method" resolves on the instance itself.
  let derived = ClassDefinition::new("Derived")
    .parent(&base)
    .attributes(ClassAttributes::NO_AUTOMATIC_PROTOTYPE)
    .static_value(StaticValue::new("hidden", PropertyAttributes::DONT_ENUM))
    .static_function(StaticFunction::new(
      "method",
      PropertyAttributes::NONE,
      |_, _, _, _| Ok(Value::Undefined),
    ))
    .get_property_names(|_, _, acc| {
      acc.add_name("fromDerived");
      acc.add_name("shared");
      Ok(())
    })
    .build()?;

  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let proto = cx.make_object(None, None)?;
  cx.set_property(proto, &"inherited".into(), Value::Null, PropertyAttributes::NONE)?;

  let obj = cx.make_object(Some(&derived), None)?;
  cx.set_prototype(obj, Some(proto))?;
  cx.set_property(obj, &"own".into(), Value::Null, PropertyAttributes::NONE)?;
  cx.set_property(obj, &"secret".into(), Value::Null, PropertyAttributes::DONT_ENUM)?;

  let array = cx.copy_property_names(obj)?;
  assert_eq!(
    names(&array),
    [
      "fromDerived",
      "shared",
      "fromBase",
      "method",
      "baseStatic",
      "own",
      "inherited"
    ]
  );
  Ok(())
}

#[test]
fn enumerated_names_are_all_present() -> Result<(), VmError> {
  let class = ClassDefinition::new("Bag")
    .static_value(StaticValue::new("size", PropertyAttributes::READ_ONLY))
    .get_property_names(|_, _, acc| {
      acc.add_name("virtual");
      acc.add_name("virtual");
      Ok(())
    })
    .has_property(|_, _, name| Ok(name == "virtual"))
    .build()?;

  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let obj = cx.make_object(Some(&class), None)?;
  cx.set_property(obj, &"own".into(), Value::Null, PropertyAttributes::NONE)?;

  let array = cx.copy_property_names(obj)?;
  assert_eq!(names(&array), ["virtual", "size", "own"]);
  for name in &array {
    assert!(cx.has_property(obj, name)?, "{name} should be present");
  }
  Ok(())
}

#[test]
fn enumeration_matches_has_property_with_a_shared_prototype() -> Result<(), VmError> {
  let class = ClassDefinition::new("Widget")
    .static_value(StaticValue::new("size", PropertyAttributes::NONE))
    .static_function(StaticFunction::new(
      "method",
      PropertyAttributes::NONE,
      |_, _, _, _| Ok(Value::Undefined),
    ))
    .static_function(StaticFunction::new(
      "hidden",
      PropertyAttributes::DONT_ENUM,
      |_, _, _, _| Ok(Value::Undefined),
    ))
    .build()?;

  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let obj = cx.make_object(Some(&class), None)?;
  cx.set_property(obj, &"own".into(), Value::Null, PropertyAttributes::NONE)?;

  // Static functions are own properties of the class prototype.
  let array = cx.copy_property_names(obj)?;
  assert_eq!(names(&array), ["size", "own", "method"]);
  for name in &array {
    assert!(cx.has_property(obj, name)?, "{name} should be present");
  }
  for name in ["size", "own", "method", "hidden"] {
    let name = JsString::from(name);
    let enumerable = name != "hidden";
    assert!(cx.has_property(obj, &name)?);
    assert_eq!(array.contains(&name), enumerable);
  }

  // Once the prototype is replaced, the functions are gone from both views.
  let plain = cx.make_object(None, None)?;
  cx.set_prototype(obj, Some(plain))?;
  let array = cx.copy_property_names(obj)?;
  assert_eq!(names(&array), ["size", "own"]);
  assert!(!cx.has_property(obj, &"method".into())?);
  assert!(!cx.has_property(obj, &"hidden".into())?);
  Ok(())
}

#[test]
fn duplicate_statics_enumerate_once() -> Result<(), VmError> {
  let class = ClassDefinition::new("Dup")
    .static_value(StaticValue::new("x", PropertyAttributes::NONE))
    .static_value(StaticValue::new("x", PropertyAttributes::DONT_ENUM))
    .static_value(StaticValue::new("y", PropertyAttributes::DONT_ENUM))
    .static_value(StaticValue::new("y", PropertyAttributes::NONE))
    .build()?;

  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let obj = cx.make_object(Some(&class), None)?;
  let array = cx.copy_property_names(obj)?;

  // The first entry decides; the shadowed "y" never enumerates.
  assert_eq!(names(&array), ["x"]);
  Ok(())
}

#[test]
fn arrays_are_snapshots() -> Result<(), VmError> {
  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let obj = cx.make_object(None, None)?;
  cx.set_property(obj, &"a".into(), Value::Null, PropertyAttributes::NONE)?;

  let array = cx.copy_property_names(obj)?;
  let retained = array.clone();
  assert_eq!(array.ref_count(), 2);

  cx.set_property(obj, &"b".into(), Value::Null, PropertyAttributes::NONE)?;
  assert_eq!(names(&retained), ["a"]);
  assert_eq!(retained.len(), 1);
  assert!(retained.contains(&JsString::from("a")));
  assert_eq!(names(&cx.copy_property_names(obj)?), ["a", "b"]);
  Ok(())
}

#[test]
fn self_prototypes_are_rejected_by_the_heap() -> Result<(), VmError> {
  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let obj = cx.make_object(None, None)?;

  assert!(matches!(
    cx.heap_mut().object_set_prototype(obj, Some(obj)),
    Err(VmError::PrototypeCycle)
  ));
  assert!(cx.copy_property_names(obj)?.is_empty());
  Ok(())
}

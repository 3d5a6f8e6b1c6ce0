use embed_js::{
  ClassDefinition, GlobalContext, JsString, JsType, PropertyAttributes, Value, VmError,
};

#[test]
fn class_call_callback_receives_this_and_arguments() -> Result<(), VmError> {
  let base = ClassDefinition::new("Adder")
    .call_as_function(|cx, _, this, args| {
      let mut sum = cx.to_number(this)?;
      for arg in args {
        sum += cx.to_number(arg)?;
      }
      Ok(Value::Number(sum))
    })
    .build()?;
  let derived = ClassDefinition::new("DerivedAdder").parent(&base).build()?;

  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let adder = cx.make_object(Some(&derived), None)?;
  assert!(cx.is_function(adder)?);
  assert_eq!(
    cx.call_as_function(adder, &Value::Number(1.0), &[Value::Number(2.0), Value::from("3")])?,
    Value::Number(6.0)
  );
  Ok(())
}

#[test]
fn plain_objects_are_not_callable() -> Result<(), VmError> {
  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let obj = cx.make_object(None, None)?;
  assert!(!cx.is_function(obj)?);
  assert!(!cx.is_constructor(obj)?);
  assert!(matches!(
    cx.call_as_function(obj, &Value::Undefined, &[]),
    Err(VmError::NotCallable)
  ));
  assert!(matches!(
    cx.call_as_constructor(obj, &[]),
    Err(VmError::NotConstructable)
  ));
  Ok(())
}

#[test]
fn host_functions_are_callable() -> Result<(), VmError> {
  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let func = cx.make_function_with_callback("argc", |_, _, _, args| {
    Ok(Value::Number(args.len() as f64))
  })?;
  assert_eq!(
    cx.get_property(func, &JsString::from("name"))?,
    Value::from("argc")
  );
  assert_eq!(cx.object_class_name(func)?, JsString::from("Function"));
  assert_eq!(
    cx.call_as_function(func, &Value::Undefined, &[Value::Null, Value::Null])?,
    Value::Number(2.0)
  );
  Ok(())
}

#[test]
fn default_constructor_builds_class_instances() -> Result<(), VmError> {
  let class = ClassDefinition::new("Point").build()?;
  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let ctor = cx.make_constructor(Some(&class))?;
  assert!(cx.is_constructor(ctor)?);

  let point = cx.call_as_constructor(ctor, &[])?;
  assert!(cx.is_object_of_class(point, &class)?);
  assert!(cx.has_instance(ctor, &Value::Object(point))?);

  let stranger = cx.make_object(None, None)?;
  assert!(!cx.has_instance(ctor, &Value::Object(stranger))?);
  assert!(!cx.has_instance(ctor, &Value::Number(1.0))?);

  // The prototype link is fixed.
  assert!(!cx.delete_property(ctor, &JsString::from("prototype"))?);
  Ok(())
}

#[test]
fn constructor_callbacks_receive_arguments() -> Result<(), VmError> {
  let class = ClassDefinition::new("Boxed").build()?;
  let instance_class = class.clone();
  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let ctor = cx.make_constructor_with_callback(Some(&class), move |cx, _, args| {
    let obj = cx.make_object(Some(&instance_class), None)?;
    let value = args.first().cloned().unwrap_or_default();
    cx.set_property(obj, &JsString::from("value"), value, PropertyAttributes::NONE)?;
    Ok(obj)
  })?;

  let boxed = cx.call_as_constructor(ctor, &[Value::Number(9.0)])?;
  assert_eq!(
    cx.get_property(boxed, &JsString::from("value"))?,
    Value::Number(9.0)
  );
  assert!(cx.has_instance(ctor, &Value::Object(boxed))?);
  Ok(())
}

#[test]
fn class_construct_and_has_instance_callbacks_win() -> Result<(), VmError> {
  let class = ClassDefinition::new("Factory")
    .call_as_constructor(|cx, _, _| cx.make_object(None, None))
    .has_instance(|_, _, value| Ok(matches!(value, Value::Number(_))))
    .build()?;

  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let factory = cx.make_object(Some(&class), None)?;
  assert!(cx.is_constructor(factory)?);

  let made = cx.call_as_constructor(factory, &[])?;
  assert!(cx.object_class(made)?.is_none());
  assert!(cx.has_instance(factory, &Value::Number(0.0))?);
  assert!(!cx.has_instance(factory, &Value::Object(made))?);
  Ok(())
}

#[test]
fn conversions_consult_the_most_derived_callback() -> Result<(), VmError> {
  let base = ClassDefinition::new("Temperature")
    .convert_to_type(|_, _, hint| {
      Ok(match hint {
        JsType::Number => Some(Value::Number(21.5)),
        _ => None,
      })
    })
    .build()?;
  let derived = ClassDefinition::new("Celsius")
    .parent(&base)
    .convert_to_type(|_, _, hint| {
      Ok(match hint {
        JsType::String => Some(Value::from("21.5C")),
        _ => None,
      })
    })
    .build()?;

  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  let base_obj = cx.make_object(Some(&base), None)?;
  let derived_obj = cx.make_object(Some(&derived), None)?;

  assert_eq!(cx.to_number(&Value::Object(base_obj))?, 21.5);
  assert_eq!(
    cx.to_js_string(&Value::Object(base_obj))?,
    JsString::from("[object Temperature]")
  );
  assert_eq!(
    cx.to_js_string(&Value::Object(derived_obj))?,
    JsString::from("21.5C")
  );
  // The derived callback declines numbers and the base one is not consulted.
  assert!(cx.to_number(&Value::Object(derived_obj))?.is_nan());

  assert_eq!(
    cx.convert_to_type(derived_obj, JsType::Boolean)?,
    Value::Bool(true)
  );
  assert_eq!(
    cx.convert_to_type(derived_obj, JsType::Object)?,
    Value::Object(derived_obj)
  );
  assert!(cx.to_boolean(&Value::Object(derived_obj)));
  Ok(())
}

#[test]
fn primitive_conversions() -> Result<(), VmError> {
  let global = GlobalContext::new(None)?;
  let mut cx = global.enter();
  assert_eq!(cx.to_js_string(&Value::Number(1.0))?, JsString::from("1"));
  assert_eq!(cx.to_js_string(&Value::Number(0.5))?, JsString::from("0.5"));
  assert_eq!(cx.to_js_string(&Value::Null)?, JsString::from("null"));
  assert_eq!(cx.to_number(&Value::from(" 42 "))?, 42.0);
  assert_eq!(cx.to_number(&Value::Bool(true))?, 1.0);
  assert!(cx.to_number(&Value::Undefined)?.is_nan());
  assert!(!cx.to_boolean(&Value::from("")));
  assert!(!cx.to_boolean(&Value::Number(f64::NAN)));

  let obj = cx.make_object(None, None)?;
  assert_eq!(
    cx.to_js_string(&Value::Object(obj))?,
    JsString::from("[object Object]")
  );
  Ok(())
}

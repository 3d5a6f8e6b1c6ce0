//! Property, call and conversion dispatch over class chains and prototype chains.
//!
//! For an object `o` whose class chain is `C0 -> C1 -> ... -> Cn` (most-derived first), each
//! property operation consults, in order:
//!
//! 1. the matching callback of every `Ci` that defines one,
//! 2. the static value tables of every `Ci`, and the static function tables of the classes whose
//!    functions live on the instance (see below),
//! 3. `o`'s ordinary own properties,
//!
//! and then (for has/get/enumerate) repeats the whole procedure on `o`'s prototype. Call,
//! construct, has-instance and convert-to-type instead dispatch once, to the most-derived class
//! that defines the callback.
//!
//! Static functions of classes with an automatic prototype are own properties of that shared
//! prototype and are found by the prototype walk like any inherited property. Starting at the first
//! class of the chain built with `NO_AUTOMATIC_PROTOTYPE`, static functions resolve on the instance
//! and are materialized there on first access.
//!
//! Any callback error aborts the operation and is returned unchanged. Operands are stack-rooted
//! only while the operation runs; values an operation returns stay rooted in the calling view.

use ahash::AHashSet;

use crate::class::ClassOperation;
use crate::heap::{ObjectKind, MAX_PROTOTYPE_CHAIN};
use crate::value::{number_to_string, string_to_number};
use crate::{Class, Context, GcObject, JsString, JsType, PropertyAttributes};
use crate::{PropertyNameAccumulator, PropertyNameArray, Value, VmError};

/// Bounds a prototype-chain walk and detects cycles.
struct ChainGuard {
  visited: AHashSet<GcObject>,
  steps: usize,
}

impl ChainGuard {
  fn new() -> Self {
    Self {
      visited: AHashSet::new(),
      steps: 0,
    }
  }

  fn visit(&mut self, obj: GcObject) -> Result<(), VmError> {
    if self.steps >= MAX_PROTOTYPE_CHAIN {
      return Err(VmError::PrototypeChainTooDeep);
    }
    self.steps += 1;
    if !self.visited.insert(obj) {
      tracing::warn!(?obj, "prototype cycle detected during lookup");
      return Err(VmError::PrototypeCycle);
    }
    Ok(())
  }
}

/// The classes of `class`'s chain whose static functions resolve on the instance itself.
///
/// Class prototypes only link to the prototypes of ancestors that have one too, so once the chain
/// reaches a class without an automatic prototype, the functions of every remaining class are
/// unreachable through the prototype chain.
fn instance_function_classes(class: &Class) -> impl Iterator<Item = &Class> {
  class.chain().skip_while(|c| c.has_automatic_prototype())
}

impl<'a> Context<'a> {
  /// Whether `name` resolves anywhere on `obj`'s class chains or prototype chain.
  pub fn has_property(&mut self, obj: GcObject, name: &JsString) -> Result<bool, VmError> {
    self.operation(obj, |cx| {
      let mut guard = ChainGuard::new();
      let mut current = Some(obj);
      while let Some(o) = current {
        guard.visit(o)?;
        if cx.has_property_at(o, name)? {
          return Ok(true);
        }
        current = cx.heap.object_prototype(o)?;
      }
      Ok(false)
    })
  }

  fn has_property_at(&mut self, o: GcObject, name: &JsString) -> Result<bool, VmError> {
    if let Some(class) = self.heap.object_class(o)? {
      for c in class.chain() {
        if let Some(has) = c.has_property_callback() {
          if has(self, o, name)? {
            return Ok(true);
          }
        } else if let Some(get) = c.get_property_callback() {
          // Without a has-property callback, a successful get answers the question.
          if get(self, o, name)?.is_some() {
            return Ok(true);
          }
        }
      }
      if class.chain().any(|c| c.static_value(name).is_some())
        || instance_function_classes(&class).any(|c| c.static_function(name).is_some())
      {
        return Ok(true);
      }
    }
    self.heap.has_own_property(o, name)
  }

  /// Resolves `name` on `obj`, returning `undefined` if nothing answers.
  pub fn get_property(&mut self, obj: GcObject, name: &JsString) -> Result<Value, VmError> {
    let value = self.operation(obj, |cx| {
      let mut guard = ChainGuard::new();
      let mut current = Some(obj);
      while let Some(o) = current {
        guard.visit(o)?;
        if let Some(value) = cx.get_property_at(o, name)? {
          return Ok(value);
        }
        current = cx.heap.object_prototype(o)?;
      }
      Ok(Value::Undefined)
    })?;
    self.root_operand(&value);
    Ok(value)
  }

  fn get_property_at(&mut self, o: GcObject, name: &JsString) -> Result<Option<Value>, VmError> {
    let Some(class) = self.heap.object_class(o)? else {
      return self.heap.get_own_property(o, name);
    };

    for c in class.chain() {
      if let Some(get) = c.get_property_callback() {
        if let Some(value) = get(self, o, name)? {
          return Ok(Some(value));
        }
      }
    }

    for c in class.chain() {
      let Some(getter) = c.static_value(name).and_then(|entry| entry.get_callback()) else {
        continue;
      };
      if let Some(value) = getter(self, o, name)? {
        return Ok(Some(value));
      }
    }

    if let Some(c) = instance_function_classes(&class).find(|c| c.static_function(name).is_some())
    {
      return self.static_function_value(o, c, name);
    }

    self.heap.get_own_property(o, name)
  }

  /// The per-instance function object for static function `name` of `class`, created on first
  /// access and stored on `o`. An own property of the same name always takes precedence.
  fn static_function_value(
    &mut self,
    o: GcObject,
    class: &Class,
    name: &JsString,
  ) -> Result<Option<Value>, VmError> {
    if let Some(own) = self.heap.get_own_property(o, name)? {
      return Ok(Some(own));
    }
    let Some(entry) = class.static_function(name) else {
      return Ok(None);
    };
    let func = self.alloc_function(name.clone(), entry.call_callback().clone())?;
    self
      .heap
      .define_own_property(o, name.clone(), Value::Object(func), entry.attributes())?;
    tracing::trace!(class = %class.name(), %name, ?func, "static function materialized");
    Ok(Some(Value::Object(func)))
  }

  /// Assigns `name` on `obj`.
  ///
  /// Set callbacks run first (most-derived first) and stop the operation by returning `true`. A
  /// read-only static value, instance static function or own property turns the assignment into a
  /// silent no-op. Otherwise the value lands in an own property, created with `attributes` if it
  /// does not exist.
  pub fn set_property(
    &mut self,
    obj: GcObject,
    name: &JsString,
    value: Value,
    attributes: PropertyAttributes,
  ) -> Result<(), VmError> {
    self.operation(obj, |cx| {
      cx.root_operand(&value);

      if let Some(class) = cx.heap.object_class(obj)? {
        for c in class.chain() {
          if let Some(set) = c.set_property_callback() {
            if set(cx, obj, name, &value)? {
              return Ok(());
            }
          }
        }

        for c in class.chain() {
          if let Some(entry) = c.static_value(name) {
            if entry.attributes().is_read_only() {
              return Ok(());
            }
            if let Some(setter) = entry.set_callback() {
              if setter(cx, obj, name, &value)? {
                return Ok(());
              }
            }
          }
        }
        if instance_function_classes(&class).any(|c| {
          c.static_function(name)
            .is_some_and(|entry| entry.attributes().is_read_only())
        }) {
          return Ok(());
        }
      }

      if !cx.heap.put_own_property(obj, name, value, attributes)? {
        tracing::trace!(%name, "write to read-only property ignored");
      }
      Ok(())
    })
  }

  /// Deletes `name` from `obj`. Returns `false` if the property is marked `DONT_DELETE`.
  ///
  /// The `DONT_DELETE` check (static entries and own properties) happens before any
  /// delete-property callback runs, so callbacks cannot override it.
  pub fn delete_property(&mut self, obj: GcObject, name: &JsString) -> Result<bool, VmError> {
    self.operation(obj, |cx| {
      let class = cx.heap.object_class(obj)?;

      if let Some(class) = &class {
        let undeletable_static = class.chain().any(|c| {
          c.static_value(name)
            .is_some_and(|entry| !entry.attributes().is_deletable())
        }) || instance_function_classes(class).any(|c| {
          c.static_function(name)
            .is_some_and(|entry| !entry.attributes().is_deletable())
        });
        if undeletable_static {
          return Ok(false);
        }
      }
      if cx
        .heap
        .own_property_attributes(obj, name)?
        .is_some_and(|attributes| !attributes.is_deletable())
      {
        return Ok(false);
      }

      if let Some(class) = &class {
        for c in class.chain() {
          if let Some(delete) = c.delete_property_callback() {
            if delete(cx, obj, name)? {
              return Ok(true);
            }
          }
        }
      }

      cx.heap.delete_own_property(obj, name)
    })
  }

  /// Collects the enumerable property names of `obj` and its prototype chain.
  ///
  /// Per object: get-property-names callbacks (most-derived first, sharing one accumulator), then
  /// static entries without `DONT_ENUM`, then enumerable own properties. Duplicates collapse to
  /// their first occurrence.
  pub fn copy_property_names(&mut self, obj: GcObject) -> Result<PropertyNameArray, VmError> {
    self.operation(obj, |cx| {
      let _span = tracing::trace_span!("copy_property_names", ?obj).entered();
      let mut names = PropertyNameAccumulator::new();
      let mut guard = ChainGuard::new();
      let mut current = Some(obj);
      while let Some(o) = current {
        guard.visit(o)?;
        cx.collect_property_names_at(o, &mut names)?;
        current = cx.heap.object_prototype(o)?;
      }
      Ok(names.finish())
    })
  }

  fn collect_property_names_at(
    &mut self,
    o: GcObject,
    names: &mut PropertyNameAccumulator,
  ) -> Result<(), VmError> {
    if let Some(class) = self.heap.object_class(o)? {
      for c in class.chain() {
        if let Some(get_names) = c.get_property_names_callback() {
          get_names(self, o, &mut *names)?;
        }
      }
      let mut functions_on_instance = false;
      for c in class.chain() {
        for entry in c.static_values() {
          let first = c
            .static_value(entry.name())
            .is_some_and(|first| std::ptr::eq(first, entry));
          if first && entry.attributes().is_enumerable() {
            names.add_name(entry.name().clone());
          }
        }
        functions_on_instance |= !c.has_automatic_prototype();
        if !functions_on_instance {
          // Enumerated with the class prototype's own properties.
          continue;
        }
        for entry in c.static_functions() {
          let first = c
            .static_function(entry.name())
            .is_some_and(|first| std::ptr::eq(first, entry));
          if first && entry.attributes().is_enumerable() {
            names.add_name(entry.name().clone());
          }
        }
      }
    }
    for name in self.heap.own_enumerable_property_names(o)? {
      names.add_name(name);
    }
    Ok(())
  }

  pub fn get_property_at_index(&mut self, obj: GcObject, index: u32) -> Result<Value, VmError> {
    self.get_property(obj, &JsString::from(index))
  }

  pub fn set_property_at_index(
    &mut self,
    obj: GcObject,
    index: u32,
    value: Value,
  ) -> Result<(), VmError> {
    self.set_property(obj, &JsString::from(index), value, PropertyAttributes::NONE)
  }

  /// [`Context::has_property`] with an arbitrary value as the key, converted with
  /// [`Context::to_js_string`].
  pub fn has_property_for_key(&mut self, obj: GcObject, key: &Value) -> Result<bool, VmError> {
    let name = self.to_js_string(key)?;
    self.has_property(obj, &name)
  }

  pub fn get_property_for_key(&mut self, obj: GcObject, key: &Value) -> Result<Value, VmError> {
    let name = self.to_js_string(key)?;
    self.get_property(obj, &name)
  }

  pub fn set_property_for_key(
    &mut self,
    obj: GcObject,
    key: &Value,
    value: Value,
    attributes: PropertyAttributes,
  ) -> Result<(), VmError> {
    // The value must survive callbacks run by the key conversion.
    let name = self.scope(|cx| {
      cx.root_operand(&value);
      cx.to_js_string(key)
    })?;
    self.set_property(obj, &name, value, attributes)
  }

  pub fn delete_property_for_key(&mut self, obj: GcObject, key: &Value) -> Result<bool, VmError> {
    let name = self.to_js_string(key)?;
    self.delete_property(obj, &name)
  }

  /// Calls `obj` as a function.
  pub fn call_as_function(
    &mut self,
    obj: GcObject,
    this: &Value,
    args: &[Value],
  ) -> Result<Value, VmError> {
    let result = self.operation(obj, |cx| {
      cx.root_operand(this);
      for arg in args {
        cx.root_operand(arg);
      }
      let _span = tracing::trace_span!("call_as_function", ?obj, argc = args.len()).entered();

      let class = cx.heap.object_class(obj)?;
      match class
        .as_ref()
        .and_then(|c| c.resolve(ClassOperation::CallAsFunction))
        .and_then(|c| c.call_as_function_callback())
      {
        Some(call) => call(cx, obj, this, args),
        None => {
          let call = match &cx.heap.get_object(obj)?.kind {
            ObjectKind::Function { call, .. } => call.clone(),
            _ => return Err(VmError::NotCallable),
          };
          call(cx, obj, this, args)
        }
      }
    })?;
    self.root_operand(&result);
    Ok(result)
  }

  /// Calls `obj` as a constructor (`new obj(...args)`).
  pub fn call_as_constructor(&mut self, obj: GcObject, args: &[Value]) -> Result<GcObject, VmError> {
    let constructed = self.operation(obj, |cx| {
      for arg in args {
        cx.root_operand(arg);
      }
      let _span = tracing::trace_span!("call_as_constructor", ?obj, argc = args.len()).entered();

      let class = cx.heap.object_class(obj)?;
      match class
        .as_ref()
        .and_then(|c| c.resolve(ClassOperation::CallAsConstructor))
        .and_then(|c| c.call_as_constructor_callback())
      {
        Some(construct) => construct(cx, obj, args),
        None => {
          let (instance_class, construct) = match &cx.heap.get_object(obj)?.kind {
            ObjectKind::Constructor { class, construct } => (class.clone(), construct.clone()),
            _ => return Err(VmError::NotConstructable),
          };
          match construct {
            Some(construct) => construct(cx, obj, args),
            None => cx.make_object(instance_class.as_ref(), None),
          }
        }
      }
    })?;
    self.root_operand(&Value::Object(constructed));
    Ok(constructed)
  }

  /// `value instanceof ctor`.
  ///
  /// Classes may override this with a has-instance callback. Constructors made by
  /// [`Context::make_constructor`] compare against their `prototype` property; every other object
  /// answers `false`.
  pub fn has_instance(&mut self, ctor: GcObject, value: &Value) -> Result<bool, VmError> {
    self.operation(ctor, |cx| {
      cx.root_operand(value);

      let class = cx.heap.object_class(ctor)?;
      if let Some(has_instance) = class
        .as_ref()
        .and_then(|c| c.resolve(ClassOperation::HasInstance))
        .and_then(|c| c.has_instance_callback())
      {
        return has_instance(cx, ctor, value);
      }

      if !matches!(
        cx.heap.get_object(ctor)?.kind,
        ObjectKind::Constructor { .. }
      ) {
        return Ok(false);
      }
      let Value::Object(instance) = value else {
        return Ok(false);
      };
      let Value::Object(proto) = cx.get_property(ctor, &JsString::from("prototype"))? else {
        return Err(VmError::TypeError("constructor prototype is not an object"));
      };

      let mut guard = ChainGuard::new();
      let mut current = cx.heap.object_prototype(*instance)?;
      while let Some(p) = current {
        guard.visit(p)?;
        if p == proto {
          return Ok(true);
        }
        current = cx.heap.object_prototype(p)?;
      }
      Ok(false)
    })
  }

  /// Converts `obj` according to `hint`.
  ///
  /// Boolean conversion is always `true`. Number and string conversions go to the most-derived
  /// convert-to-type callback; without one (or when it declines) the object itself is returned.
  pub fn convert_to_type(&mut self, obj: GcObject, hint: JsType) -> Result<Value, VmError> {
    let value = self.operation(obj, |cx| {
      match hint {
        JsType::Boolean => return Ok(Value::Bool(true)),
        JsType::Number | JsType::String => {}
        JsType::Undefined | JsType::Null | JsType::Object => return Ok(Value::Object(obj)),
      }

      let class = cx.heap.object_class(obj)?;
      if let Some(convert) = class
        .as_ref()
        .and_then(|c| c.resolve(ClassOperation::ConvertToType))
        .and_then(|c| c.convert_to_type_callback())
      {
        if let Some(value) = convert(cx, obj, hint)? {
          return Ok(value);
        }
      }
      Ok(Value::Object(obj))
    })?;
    self.root_operand(&value);
    Ok(value)
  }

  /// ECMAScript `ToBoolean`.
  pub fn to_boolean(&self, value: &Value) -> bool {
    match value {
      Value::Undefined | Value::Null => false,
      Value::Bool(b) => *b,
      Value::Number(n) => *n != 0.0 && !n.is_nan(),
      Value::String(s) => !s.is_empty(),
      Value::Object(_) => true,
    }
  }

  /// `ToNumber`, consulting convert-to-type callbacks for objects. Objects that do not convert to
  /// a primitive become `NaN`.
  pub fn to_number(&mut self, value: &Value) -> Result<f64, VmError> {
    Ok(match value {
      Value::Undefined => f64::NAN,
      Value::Null => 0.0,
      Value::Bool(b) => f64::from(u8::from(*b)),
      Value::Number(n) => *n,
      Value::String(s) => string_to_number(s),
      Value::Object(obj) => {
        let primitive = self.scope(|cx| cx.convert_to_type(*obj, JsType::Number))?;
        match primitive {
          Value::Object(_) => f64::NAN,
          primitive => return self.to_number(&primitive),
        }
      }
    })
  }

  /// `ToString`, consulting convert-to-type callbacks for objects. Objects that do not convert to
  /// a primitive become `[object ClassName]`.
  pub fn to_js_string(&mut self, value: &Value) -> Result<JsString, VmError> {
    Ok(match value {
      Value::Undefined => JsString::from("undefined"),
      Value::Null => JsString::from("null"),
      Value::Bool(true) => JsString::from("true"),
      Value::Bool(false) => JsString::from("false"),
      Value::Number(n) => JsString::from(number_to_string(*n)),
      Value::String(s) => s.clone(),
      Value::Object(obj) => {
        let primitive = self.scope(|cx| cx.convert_to_type(*obj, JsType::String))?;
        match primitive {
          Value::Object(obj) => {
            let class_name = self.object_class_name(obj)?;
            JsString::from(format!("[object {class_name}]"))
          }
          primitive => return self.to_js_string(&primitive),
        }
      }
    })
  }

  /// Validates `obj` and runs `op` in a rooting scope in which `obj` is stack-rooted. Everything
  /// the operation roots is popped when it returns.
  fn operation<R>(
    &mut self,
    obj: GcObject,
    op: impl FnOnce(&mut Context<'a>) -> Result<R, VmError>,
  ) -> Result<R, VmError> {
    self.heap.get_object(obj)?;
    self.scope(|cx| {
      cx.root_operand(&Value::Object(obj));
      op(cx)
    })
  }
}

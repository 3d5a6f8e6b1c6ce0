//! Object creation and instance shape: classes, private data, prototypes and host functions.

use core::any::Any;
use std::sync::Arc;

use crate::class::{CallAsConstructorCallback, CallAsFunctionCallback, ClassOperation};
use crate::heap::{JsObject, ObjectKind};
use crate::{Class, Context, GcObject, Heap, JsString, PropertyAttributes, Value, VmError};

const FUNCTION_NAME_ATTRIBUTES: PropertyAttributes = PropertyAttributes::from_bits_truncate(
  PropertyAttributes::READ_ONLY.bits() | PropertyAttributes::DONT_ENUM.bits(),
);

const CONSTRUCTOR_PROTOTYPE_ATTRIBUTES: PropertyAttributes = PropertyAttributes::from_bits_truncate(
  PropertyAttributes::READ_ONLY.bits()
    | PropertyAttributes::DONT_ENUM.bits()
    | PropertyAttributes::DONT_DELETE.bits(),
);

impl Heap {
  /// The prototype new instances of `class` start with.
  ///
  /// Classes with an automatic prototype share one lazily built prototype per heap; classes with
  /// [`ClassAttributes::NO_AUTOMATIC_PROTOTYPE`](crate::ClassAttributes::NO_AUTOMATIC_PROTOTYPE)
  /// start at the object prototype.
  pub(crate) fn prototype_for_class(&mut self, class: &Class) -> Result<GcObject, VmError> {
    if !class.has_automatic_prototype() {
      return Ok(self.intrinsic_object_prototype());
    }
    if let Some(proto) = self.cached_class_prototype(class.id()) {
      return Ok(proto);
    }

    let parent_proto = match class.parent() {
      Some(parent) => self.prototype_for_class(parent)?,
      None => self.intrinsic_object_prototype(),
    };
    let proto = self.alloc(JsObject::ordinary(Some(parent_proto)))?;

    self.root_stack.push(Value::Object(proto));
    let populated = self.populate_class_prototype(proto, class);
    self.root_stack.pop();
    populated?;

    self.cache_class_prototype(class, proto);
    tracing::debug!(class = %class.name(), ?proto, "class prototype built");
    Ok(proto)
  }

  fn populate_class_prototype(&mut self, proto: GcObject, class: &Class) -> Result<(), VmError> {
    for entry in class.static_functions() {
      // Shadowed duplicates never resolve, so they get no function object.
      if !class
        .static_function(entry.name())
        .is_some_and(|first| std::ptr::eq(first, entry))
      {
        continue;
      }
      let func = self.alloc_function(entry.name().clone(), entry.call_callback().clone())?;
      self.root_stack.push(Value::Object(func));
      let defined =
        self.define_own_property(proto, entry.name().clone(), Value::Object(func), entry.attributes());
      self.root_stack.pop();
      defined?;
    }
    Ok(())
  }

  pub(crate) fn alloc_instance(
    &mut self,
    class: &Class,
    private: Option<Box<dyn Any + Send>>,
    prototype: GcObject,
  ) -> Result<GcObject, VmError> {
    let mut obj = JsObject::new(ObjectKind::Ordinary, Some(class.clone()), Some(prototype));
    obj.private = private;
    self.alloc(obj)
  }

  /// Allocates a host function object with a non-enumerable, read-only `name` property.
  pub(crate) fn alloc_function(
    &mut self,
    name: JsString,
    call: Arc<CallAsFunctionCallback>,
  ) -> Result<GcObject, VmError> {
    let proto = self.intrinsic_function_prototype();
    let func = self.alloc(JsObject::new(
      ObjectKind::Function {
        name: name.clone(),
        call,
      },
      None,
      Some(proto),
    ))?;
    self.root_stack.push(Value::Object(func));
    let defined = self.define_own_property(
      func,
      JsString::from("name"),
      Value::String(name),
      FUNCTION_NAME_ATTRIBUTES,
    );
    self.root_stack.pop();
    defined?;
    Ok(func)
  }
}

impl<'a> Context<'a> {
  /// Creates an object of `class` (or of the default class when `None`).
  ///
  /// `private` is stored before any initializer runs, so initializers can read it. Objects of the
  /// default class have no private storage and drop `private`. Initializers run least-derived
  /// first; an initializer error aborts creation and is returned.
  pub fn make_object(
    &mut self,
    class: Option<&Class>,
    private: Option<Box<dyn Any + Send>>,
  ) -> Result<GcObject, VmError> {
    let Some(class) = class else {
      if private.is_some() {
        tracing::warn!("private data passed for an object without a class; dropping it");
      }
      let proto = self.heap.intrinsic_object_prototype();
      return self.alloc_rooted(JsObject::ordinary(Some(proto)));
    };

    let prototype = self.heap.prototype_for_class(class)?;
    let obj = self.heap.alloc_instance(class, private, prototype)?;
    self.push_root(Value::Object(obj));
    tracing::trace!(class = %class.name(), ?obj, "object created");
    self.initialize(obj, class)?;
    Ok(obj)
  }

  pub(crate) fn initialize(&mut self, obj: GcObject, class: &Class) -> Result<(), VmError> {
    let chain: Vec<&Class> = class.chain().collect();
    for c in chain.into_iter().rev() {
      if let Some(initialize) = c.initialize_callback() {
        initialize(self, obj)?;
      }
    }
    Ok(())
  }

  /// Creates a function object that invokes `call` with `(function, this, arguments)`.
  pub fn make_function_with_callback(
    &mut self,
    name: &str,
    call: impl Fn(&mut Context<'_>, GcObject, &Value, &[Value]) -> Result<Value, VmError>
      + Send
      + Sync
      + 'static,
  ) -> Result<GcObject, VmError> {
    self.alloc_function(JsString::from(name), Arc::new(call))
  }

  pub(crate) fn alloc_function(
    &mut self,
    name: JsString,
    call: Arc<CallAsFunctionCallback>,
  ) -> Result<GcObject, VmError> {
    let func = self.heap.alloc_function(name, call)?;
    self.push_root(Value::Object(func));
    Ok(func)
  }

  /// Creates a constructor whose `new` creates a plain instance of `class`.
  ///
  /// The constructor's `prototype` property is the class's shared prototype (or the object
  /// prototype), which also drives its default `instanceof` behavior.
  pub fn make_constructor(&mut self, class: Option<&Class>) -> Result<GcObject, VmError> {
    self.make_constructor_inner(class, None)
  }

  /// Creates a constructor that invokes `construct` with `(constructor, arguments)`.
  pub fn make_constructor_with_callback(
    &mut self,
    class: Option<&Class>,
    construct: impl Fn(&mut Context<'_>, GcObject, &[Value]) -> Result<GcObject, VmError>
      + Send
      + Sync
      + 'static,
  ) -> Result<GcObject, VmError> {
    self.make_constructor_inner(class, Some(Arc::new(construct)))
  }

  fn make_constructor_inner(
    &mut self,
    class: Option<&Class>,
    construct: Option<Arc<CallAsConstructorCallback>>,
  ) -> Result<GcObject, VmError> {
    let prototype = match class {
      Some(class) => self.heap.prototype_for_class(class)?,
      None => self.heap.intrinsic_object_prototype(),
    };
    let function_proto = self.heap.intrinsic_function_prototype();
    let ctor = self.alloc_rooted(JsObject::new(
      ObjectKind::Constructor {
        class: class.cloned(),
        construct,
      },
      None,
      Some(function_proto),
    ))?;
    self.heap.define_own_property(
      ctor,
      JsString::from("prototype"),
      Value::Object(prototype),
      CONSTRUCTOR_PROTOTYPE_ATTRIBUTES,
    )?;
    Ok(ctor)
  }

  /// Borrows `obj`'s private data if it is a `T`.
  pub fn private_data<T: Any>(&self, obj: GcObject) -> Result<Option<&T>, VmError> {
    Ok(
      self
        .heap
        .get_object(obj)?
        .private
        .as_ref()
        .and_then(|data| data.downcast_ref::<T>()),
    )
  }

  pub fn private_data_mut<T: Any>(&mut self, obj: GcObject) -> Result<Option<&mut T>, VmError> {
    Ok(
      self
        .heap
        .get_object_mut(obj)?
        .private
        .as_mut()
        .and_then(|data| data.downcast_mut::<T>()),
    )
  }

  /// Replaces `obj`'s private data. Returns `false` (and stores nothing) for default-class objects,
  /// which have no private storage.
  pub fn set_private(
    &mut self,
    obj: GcObject,
    data: Option<Box<dyn Any + Send>>,
  ) -> Result<bool, VmError> {
    let object = self.heap.get_object_mut(obj)?;
    if object.class.is_none() {
      return Ok(false);
    }
    object.private = data;
    Ok(true)
  }

  pub fn take_private(&mut self, obj: GcObject) -> Result<Option<Box<dyn Any + Send>>, VmError> {
    Ok(self.heap.get_object_mut(obj)?.private.take())
  }

  pub fn prototype(&self, obj: GcObject) -> Result<Option<GcObject>, VmError> {
    self.heap.object_prototype(obj)
  }

  /// Sets `obj`'s prototype. Cycles are rejected with [`VmError::PrototypeCycle`].
  pub fn set_prototype(&mut self, obj: GcObject, prototype: Option<GcObject>) -> Result<(), VmError> {
    if let Some(proto) = prototype {
      // Also rejects stale and foreign prototypes.
      self.heap.get_object(proto)?;
    }
    self.heap.object_set_prototype(obj, prototype)
  }

  /// The shared prototype of `class` in this group, built on first use. `None` for classes
  /// without an automatic prototype.
  pub fn class_prototype(&mut self, class: &Class) -> Result<Option<GcObject>, VmError> {
    if !class.has_automatic_prototype() {
      return Ok(None);
    }
    self.heap.prototype_for_class(class).map(Some)
  }

  pub fn object_class(&self, obj: GcObject) -> Result<Option<Class>, VmError> {
    self.heap.object_class(obj)
  }

  /// Whether `obj` was created with `class` or a subclass of it.
  pub fn is_object_of_class(&self, obj: GcObject, class: &Class) -> Result<bool, VmError> {
    Ok(
      self
        .heap
        .get_object(obj)?
        .class
        .as_ref()
        .is_some_and(|c| c.inherits_from(class)),
    )
  }

  pub fn is_function(&self, obj: GcObject) -> Result<bool, VmError> {
    let object = self.heap.get_object(obj)?;
    Ok(
      matches!(object.kind, ObjectKind::Function { .. })
        || object
          .class
          .as_ref()
          .is_some_and(|c| c.resolve(ClassOperation::CallAsFunction).is_some()),
    )
  }

  pub fn is_constructor(&self, obj: GcObject) -> Result<bool, VmError> {
    let object = self.heap.get_object(obj)?;
    Ok(
      matches!(object.kind, ObjectKind::Constructor { .. })
        || object
          .class
          .as_ref()
          .is_some_and(|c| c.resolve(ClassOperation::CallAsConstructor).is_some()),
    )
  }

  /// The name a host function was created with.
  pub fn function_name(&self, obj: GcObject) -> Result<Option<JsString>, VmError> {
    Ok(match &self.heap.get_object(obj)?.kind {
      ObjectKind::Function { name, .. } => Some(name.clone()),
      _ => None,
    })
  }

  /// `[object ClassName]`-style tag: the class name, `Function`, or `Object`.
  pub fn object_class_name(&self, obj: GcObject) -> Result<JsString, VmError> {
    let object = self.heap.get_object(obj)?;
    Ok(match (&object.class, &object.kind) {
      (Some(class), _) => class.name().clone(),
      (None, ObjectKind::Function { .. } | ObjectKind::Constructor { .. }) => JsString::from("Function"),
      (None, ObjectKind::Ordinary) => JsString::from("Object"),
    })
  }
}

//! Host class descriptors.
//!
//! A [`Class`] is built once from a [`ClassDefinition`] and is immutable afterwards. Classes are
//! reference counted: cloning a `Class` retains it and dropping a clone releases it. Every object
//! instance holds a reference to its class, so a class lives at least as long as its instances.

use core::any::Any;
use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::{Context, GcObject, JsString, JsType, PropertyAttributes, PropertyNameAccumulator};
use crate::{Value, VmError};

/// Hard upper bound on the length of a class's parent chain.
pub const MAX_CLASS_CHAIN: usize = 256;

/// The only class definition version this crate understands.
pub const CLASS_DEFINITION_VERSION: u32 = 0;

/// Runs once when an instance is created, least-derived class first.
pub type InitializeCallback = dyn Fn(&mut Context<'_>, GcObject) -> Result<(), VmError> + Send + Sync;

/// Runs when an instance is collected (or its heap is torn down), most-derived class first.
pub type FinalizeCallback = dyn Fn(&mut Finalizer<'_>) + Send + Sync;

pub type HasPropertyCallback =
  dyn Fn(&mut Context<'_>, GcObject, &JsString) -> Result<bool, VmError> + Send + Sync;

/// Returns `Ok(None)` to forward the request to the next handler.
pub type GetPropertyCallback =
  dyn Fn(&mut Context<'_>, GcObject, &JsString) -> Result<Option<Value>, VmError> + Send + Sync;

/// Returns `Ok(false)` to forward the request to the next handler.
pub type SetPropertyCallback =
  dyn Fn(&mut Context<'_>, GcObject, &JsString, &Value) -> Result<bool, VmError> + Send + Sync;

/// Returns `Ok(false)` to forward the request to the next handler.
pub type DeletePropertyCallback =
  dyn Fn(&mut Context<'_>, GcObject, &JsString) -> Result<bool, VmError> + Send + Sync;

pub type GetPropertyNamesCallback = dyn Fn(&mut Context<'_>, GcObject, &mut PropertyNameAccumulator) -> Result<(), VmError>
  + Send
  + Sync;

/// Receives `(function, this, arguments)`.
pub type CallAsFunctionCallback =
  dyn Fn(&mut Context<'_>, GcObject, &Value, &[Value]) -> Result<Value, VmError> + Send + Sync;

/// Receives `(constructor, arguments)` and returns the constructed object.
pub type CallAsConstructorCallback =
  dyn Fn(&mut Context<'_>, GcObject, &[Value]) -> Result<GcObject, VmError> + Send + Sync;

/// Receives `(constructor, candidate instance)`.
pub type HasInstanceCallback =
  dyn Fn(&mut Context<'_>, GcObject, &Value) -> Result<bool, VmError> + Send + Sync;

/// Only invoked with [`JsType::Number`] or [`JsType::String`]. Returns `Ok(None)` to use the default
/// conversion.
pub type ConvertToTypeCallback =
  dyn Fn(&mut Context<'_>, GcObject, JsType) -> Result<Option<Value>, VmError> + Send + Sync;

/// Class-level attribute flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct ClassAttributes(u8);

impl ClassAttributes {
  pub const NONE: Self = Self(0);
  /// Do not build a shared prototype holding the class's static functions. Instances get their own
  /// function objects and default to the object prototype.
  pub const NO_AUTOMATIC_PROTOTYPE: Self = Self(1 << 1);

  pub const fn bits(self) -> u8 {
    self.0
  }

  pub const fn contains(self, other: Self) -> bool {
    self.0 & other.0 == other.0
  }
}

/// The dispatch operations a class may define a callback for.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ClassOperation {
  Initialize,
  Finalize,
  HasProperty,
  GetProperty,
  SetProperty,
  DeleteProperty,
  GetPropertyNames,
  CallAsFunction,
  CallAsConstructor,
  HasInstance,
  ConvertToType,
}

/// A statically declared value property, backed by getter/setter callbacks.
#[derive(Clone)]
pub struct StaticValue {
  name: JsString,
  getter: Option<Arc<GetPropertyCallback>>,
  setter: Option<Arc<SetPropertyCallback>>,
  attributes: PropertyAttributes,
}

impl StaticValue {
  pub fn new(name: &str, attributes: PropertyAttributes) -> Self {
    Self {
      name: JsString::from(name),
      getter: None,
      setter: None,
      attributes,
    }
  }

  pub fn getter(
    mut self,
    getter: impl Fn(&mut Context<'_>, GcObject, &JsString) -> Result<Option<Value>, VmError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    self.getter = Some(Arc::new(getter));
    self
  }

  pub fn setter(
    mut self,
    setter: impl Fn(&mut Context<'_>, GcObject, &JsString, &Value) -> Result<bool, VmError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    self.setter = Some(Arc::new(setter));
    self
  }

  pub fn name(&self) -> &JsString {
    &self.name
  }

  pub fn attributes(&self) -> PropertyAttributes {
    self.attributes
  }

  pub(crate) fn get_callback(&self) -> Option<&Arc<GetPropertyCallback>> {
    self.getter.as_ref()
  }

  pub(crate) fn set_callback(&self) -> Option<&Arc<SetPropertyCallback>> {
    self.setter.as_ref()
  }
}

/// A statically declared function property.
#[derive(Clone)]
pub struct StaticFunction {
  name: JsString,
  call: Arc<CallAsFunctionCallback>,
  attributes: PropertyAttributes,
}

impl StaticFunction {
  pub fn new(
    name: &str,
    attributes: PropertyAttributes,
    call: impl Fn(&mut Context<'_>, GcObject, &Value, &[Value]) -> Result<Value, VmError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    Self {
      name: JsString::from(name),
      call: Arc::new(call),
      attributes,
    }
  }

  pub fn name(&self) -> &JsString {
    &self.name
  }

  pub fn attributes(&self) -> PropertyAttributes {
    self.attributes
  }

  pub(crate) fn call_callback(&self) -> &Arc<CallAsFunctionCallback> {
    &self.call
  }
}

#[derive(Clone, Default)]
struct ClassCallbacks {
  initialize: Option<Arc<InitializeCallback>>,
  finalize: Option<Arc<FinalizeCallback>>,
  has_property: Option<Arc<HasPropertyCallback>>,
  get_property: Option<Arc<GetPropertyCallback>>,
  set_property: Option<Arc<SetPropertyCallback>>,
  delete_property: Option<Arc<DeletePropertyCallback>>,
  get_property_names: Option<Arc<GetPropertyNamesCallback>>,
  call_as_function: Option<Arc<CallAsFunctionCallback>>,
  call_as_constructor: Option<Arc<CallAsConstructorCallback>>,
  has_instance: Option<Arc<HasInstanceCallback>>,
  convert_to_type: Option<Arc<ConvertToTypeCallback>>,
}

/// The shape description a [`Class`] is built from.
#[derive(Clone)]
pub struct ClassDefinition {
  version: u32,
  attributes: ClassAttributes,
  name: JsString,
  parent: Option<Class>,
  static_values: Vec<StaticValue>,
  static_functions: Vec<StaticFunction>,
  callbacks: ClassCallbacks,
}

impl ClassDefinition {
  pub fn new(name: &str) -> Self {
    Self {
      version: CLASS_DEFINITION_VERSION,
      attributes: ClassAttributes::NONE,
      name: JsString::from(name),
      parent: None,
      static_values: Vec::new(),
      static_functions: Vec::new(),
      callbacks: ClassCallbacks::default(),
    }
  }

  pub fn version(mut self, version: u32) -> Self {
    self.version = version;
    self
  }

  pub fn attributes(mut self, attributes: ClassAttributes) -> Self {
    self.attributes = attributes;
    self
  }

  pub fn parent(mut self, parent: &Class) -> Self {
    self.parent = Some(parent.clone());
    self
  }

  pub fn static_value(mut self, value: StaticValue) -> Self {
    self.static_values.push(value);
    self
  }

  pub fn static_function(mut self, function: StaticFunction) -> Self {
    self.static_functions.push(function);
    self
  }

  pub fn initialize(
    mut self,
    f: impl Fn(&mut Context<'_>, GcObject) -> Result<(), VmError> + Send + Sync + 'static,
  ) -> Self {
    self.callbacks.initialize = Some(Arc::new(f));
    self
  }

  pub fn finalize(mut self, f: impl Fn(&mut Finalizer<'_>) + Send + Sync + 'static) -> Self {
    self.callbacks.finalize = Some(Arc::new(f));
    self
  }

  pub fn has_property(
    mut self,
    f: impl Fn(&mut Context<'_>, GcObject, &JsString) -> Result<bool, VmError> + Send + Sync + 'static,
  ) -> Self {
    self.callbacks.has_property = Some(Arc::new(f));
    self
  }

  pub fn get_property(
    mut self,
    f: impl Fn(&mut Context<'_>, GcObject, &JsString) -> Result<Option<Value>, VmError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    self.callbacks.get_property = Some(Arc::new(f));
    self
  }

  pub fn set_property(
    mut self,
    f: impl Fn(&mut Context<'_>, GcObject, &JsString, &Value) -> Result<bool, VmError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    self.callbacks.set_property = Some(Arc::new(f));
    self
  }

  pub fn delete_property(
    mut self,
    f: impl Fn(&mut Context<'_>, GcObject, &JsString) -> Result<bool, VmError> + Send + Sync + 'static,
  ) -> Self {
    self.callbacks.delete_property = Some(Arc::new(f));
    self
  }

  pub fn get_property_names(
    mut self,
    f: impl Fn(&mut Context<'_>, GcObject, &mut PropertyNameAccumulator) -> Result<(), VmError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    self.callbacks.get_property_names = Some(Arc::new(f));
    self
  }

  pub fn call_as_function(
    mut self,
    f: impl Fn(&mut Context<'_>, GcObject, &Value, &[Value]) -> Result<Value, VmError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    self.callbacks.call_as_function = Some(Arc::new(f));
    self
  }

  pub fn call_as_constructor(
    mut self,
    f: impl Fn(&mut Context<'_>, GcObject, &[Value]) -> Result<GcObject, VmError> + Send + Sync + 'static,
  ) -> Self {
    self.callbacks.call_as_constructor = Some(Arc::new(f));
    self
  }

  pub fn has_instance(
    mut self,
    f: impl Fn(&mut Context<'_>, GcObject, &Value) -> Result<bool, VmError> + Send + Sync + 'static,
  ) -> Self {
    self.callbacks.has_instance = Some(Arc::new(f));
    self
  }

  pub fn convert_to_type(
    mut self,
    f: impl Fn(&mut Context<'_>, GcObject, JsType) -> Result<Option<Value>, VmError>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    self.callbacks.convert_to_type = Some(Arc::new(f));
    self
  }

  /// Validates this definition and builds an immutable [`Class`].
  pub fn build(self) -> Result<Class, VmError> {
    Class::new(self)
  }
}

/// Process-unique class identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct ClassId(u64);

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

struct ClassInner {
  id: ClassId,
  version: u32,
  attributes: ClassAttributes,
  name: JsString,
  parent: Option<Class>,
  depth: usize,
  static_values: Vec<StaticValue>,
  static_functions: Vec<StaticFunction>,
  callbacks: ClassCallbacks,
}

/// An immutable, reference-counted host class descriptor.
#[derive(Clone)]
pub struct Class(Arc<ClassInner>);

impl Class {
  pub fn new(definition: ClassDefinition) -> Result<Self, VmError> {
    let ClassDefinition {
      version,
      attributes,
      name,
      parent,
      static_values,
      static_functions,
      callbacks,
    } = definition;

    let _span = tracing::debug_span!("class_create", name = %name).entered();

    if version != CLASS_DEFINITION_VERSION {
      return Err(VmError::InvalidClassDefinition(format!(
        "unsupported version {version}"
      )));
    }
    let depth = match &parent {
      Some(parent) => parent.0.depth + 1,
      None => 1,
    };
    if depth > MAX_CLASS_CHAIN {
      return Err(VmError::InvalidClassDefinition(format!(
        "parent chain deeper than {MAX_CLASS_CHAIN}"
      )));
    }
    if static_values.iter().any(|v| v.name.is_empty())
      || static_functions.iter().any(|f| f.name.is_empty())
    {
      return Err(VmError::InvalidClassDefinition(
        "static entry with an empty name".to_string(),
      ));
    }

    // Duplicates are tolerated; lookups always resolve to the first entry.
    let mut seen = ahash::AHashSet::new();
    for entry in static_values
      .iter()
      .map(|v| &v.name)
      .chain(static_functions.iter().map(|f| &f.name))
    {
      if !seen.insert(entry) {
        tracing::warn!(class = %name, property = %entry, "duplicate static entry; first one wins");
      }
    }

    let id = ClassId(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed));
    tracing::debug!(?id, depth, "class created");
    Ok(Self(Arc::new(ClassInner {
      id,
      version,
      attributes,
      name,
      parent,
      depth,
      static_values,
      static_functions,
      callbacks,
    })))
  }

  pub fn id(&self) -> ClassId {
    self.0.id
  }

  pub fn version(&self) -> u32 {
    self.0.version
  }

  pub fn name(&self) -> &JsString {
    &self.0.name
  }

  pub fn attributes(&self) -> ClassAttributes {
    self.0.attributes
  }

  pub fn parent(&self) -> Option<&Class> {
    self.0.parent.as_ref()
  }

  pub fn has_automatic_prototype(&self) -> bool {
    !self
      .0
      .attributes
      .contains(ClassAttributes::NO_AUTOMATIC_PROTOTYPE)
  }

  pub fn static_values(&self) -> &[StaticValue] {
    &self.0.static_values
  }

  pub fn static_functions(&self) -> &[StaticFunction] {
    &self.0.static_functions
  }

  /// Looks up a static value entry. The first entry with a matching name wins.
  pub fn static_value(&self, name: &JsString) -> Option<&StaticValue> {
    self.0.static_values.iter().find(|v| &v.name == name)
  }

  /// Looks up a static function entry. The first entry with a matching name wins.
  pub fn static_function(&self, name: &JsString) -> Option<&StaticFunction> {
    self.0.static_functions.iter().find(|f| &f.name == name)
  }

  /// Whether this class itself (not its parents) defines a callback for `op`.
  pub fn defines(&self, op: ClassOperation) -> bool {
    let cb = &self.0.callbacks;
    match op {
      ClassOperation::Initialize => cb.initialize.is_some(),
      ClassOperation::Finalize => cb.finalize.is_some(),
      ClassOperation::HasProperty => cb.has_property.is_some(),
      ClassOperation::GetProperty => cb.get_property.is_some(),
      ClassOperation::SetProperty => cb.set_property.is_some(),
      ClassOperation::DeleteProperty => cb.delete_property.is_some(),
      ClassOperation::GetPropertyNames => cb.get_property_names.is_some(),
      ClassOperation::CallAsFunction => cb.call_as_function.is_some(),
      ClassOperation::CallAsConstructor => cb.call_as_constructor.is_some(),
      ClassOperation::HasInstance => cb.has_instance.is_some(),
      ClassOperation::ConvertToType => cb.convert_to_type.is_some(),
    }
  }

  /// Iterates this class and its ancestors, most-derived first.
  pub fn chain(&self) -> ClassChain<'_> {
    ClassChain { next: Some(self) }
  }

  /// The most-derived class in the chain that defines `op`.
  pub fn resolve(&self, op: ClassOperation) -> Option<&Class> {
    self.chain().find(|c| c.defines(op))
  }

  /// Whether `other` is this class or one of its ancestors.
  pub fn inherits_from(&self, other: &Class) -> bool {
    self.chain().any(|c| c.ptr_eq(other))
  }

  /// Number of live references to this class.
  pub fn ref_count(&self) -> usize {
    Arc::strong_count(&self.0)
  }

  pub fn ptr_eq(&self, other: &Class) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }

  pub(crate) fn downgrade(&self) -> WeakClass {
    WeakClass(Arc::downgrade(&self.0))
  }

  pub(crate) fn initialize_callback(&self) -> Option<&Arc<InitializeCallback>> {
    self.0.callbacks.initialize.as_ref()
  }

  pub(crate) fn finalize_callback(&self) -> Option<&Arc<FinalizeCallback>> {
    self.0.callbacks.finalize.as_ref()
  }

  pub(crate) fn has_property_callback(&self) -> Option<&Arc<HasPropertyCallback>> {
    self.0.callbacks.has_property.as_ref()
  }

  pub(crate) fn get_property_callback(&self) -> Option<&Arc<GetPropertyCallback>> {
    self.0.callbacks.get_property.as_ref()
  }

  pub(crate) fn set_property_callback(&self) -> Option<&Arc<SetPropertyCallback>> {
    self.0.callbacks.set_property.as_ref()
  }

  pub(crate) fn delete_property_callback(&self) -> Option<&Arc<DeletePropertyCallback>> {
    self.0.callbacks.delete_property.as_ref()
  }

  pub(crate) fn get_property_names_callback(&self) -> Option<&Arc<GetPropertyNamesCallback>> {
    self.0.callbacks.get_property_names.as_ref()
  }

  pub(crate) fn call_as_function_callback(&self) -> Option<&Arc<CallAsFunctionCallback>> {
    self.0.callbacks.call_as_function.as_ref()
  }

  pub(crate) fn call_as_constructor_callback(&self) -> Option<&Arc<CallAsConstructorCallback>> {
    self.0.callbacks.call_as_constructor.as_ref()
  }

  pub(crate) fn has_instance_callback(&self) -> Option<&Arc<HasInstanceCallback>> {
    self.0.callbacks.has_instance.as_ref()
  }

  pub(crate) fn convert_to_type_callback(&self) -> Option<&Arc<ConvertToTypeCallback>> {
    self.0.callbacks.convert_to_type.as_ref()
  }
}

/// A class reference that does not keep the class alive.
#[derive(Clone)]
pub(crate) struct WeakClass(Weak<ClassInner>);

impl WeakClass {
  /// Whether the host or some instance still holds the class.
  pub(crate) fn is_alive(&self) -> bool {
    self.0.strong_count() > 0
  }
}

impl fmt::Debug for Class {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Class")
      .field("id", &self.0.id)
      .field("name", &self.0.name)
      .field("parent", &self.0.parent.as_ref().map(|p| p.name()))
      .finish()
  }
}

/// Iterator over a class and its ancestors, most-derived first.
pub struct ClassChain<'a> {
  next: Option<&'a Class>,
}

impl<'a> Iterator for ClassChain<'a> {
  type Item = &'a Class;

  fn next(&mut self) -> Option<&'a Class> {
    let current = self.next?;
    self.next = current.parent();
    Some(current)
  }
}

/// The restricted view handed to finalize callbacks.
///
/// Finalizers may run on any thread, during a collection or during heap teardown, so they get no
/// [`Context`]: only the identity of the dying object and its private data.
pub struct Finalizer<'a> {
  object: GcObject,
  class: &'a Class,
  private: &'a mut Option<Box<dyn Any + Send>>,
}

impl<'a> Finalizer<'a> {
  pub(crate) fn new(
    object: GcObject,
    class: &'a Class,
    private: &'a mut Option<Box<dyn Any + Send>>,
  ) -> Self {
    Self {
      object,
      class,
      private,
    }
  }

  /// The handle of the object being finalized. It must not be dereferenced.
  pub fn object(&self) -> GcObject {
    self.object
  }

  /// The class whose finalizer is running.
  pub fn class(&self) -> &Class {
    self.class
  }

  pub fn private<T: Any>(&self) -> Option<&T> {
    self.private.as_ref()?.downcast_ref::<T>()
  }

  pub fn private_mut<T: Any>(&mut self) -> Option<&mut T> {
    self.private.as_mut()?.downcast_mut::<T>()
  }

  /// Takes ownership of the private data; less-derived finalizers will then see none.
  pub fn take_private(&mut self) -> Option<Box<dyn Any + Send>> {
    self.private.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_unknown_versions() {
    let err = ClassDefinition::new("Widget").version(1).build().unwrap_err();
    assert!(matches!(err, VmError::InvalidClassDefinition(_)));
  }

  #[test]
  fn rejects_empty_static_names() {
    let err = ClassDefinition::new("Widget")
      .static_value(StaticValue::new("", PropertyAttributes::NONE))
      .build()
      .unwrap_err();
    assert!(matches!(err, VmError::InvalidClassDefinition(_)));
  }

  #[test]
  fn chain_and_resolution() -> Result<(), VmError> {
    let base = ClassDefinition::new("Base")
      .has_instance(|_, _, _| Ok(true))
      .build()?;
    let derived = ClassDefinition::new("Derived").parent(&base).build()?;

    let names: Vec<String> = derived.chain().map(|c| c.name().to_utf8_lossy()).collect();
    assert_eq!(names, ["Derived", "Base"]);
    assert!(derived.inherits_from(&base));
    assert!(!base.inherits_from(&derived));
    assert!(derived
      .resolve(ClassOperation::HasInstance)
      .is_some_and(|c| c.ptr_eq(&base)));
    assert!(derived.resolve(ClassOperation::CallAsFunction).is_none());
    Ok(())
  }

  #[test]
  fn duplicate_static_names_resolve_to_first() -> Result<(), VmError> {
    let class = ClassDefinition::new("Dup")
      .static_value(StaticValue::new("x", PropertyAttributes::READ_ONLY))
      .static_value(StaticValue::new("x", PropertyAttributes::NONE))
      .build()?;
    let entry = class.static_value(&"x".into());
    assert!(entry.is_some_and(|e| e.attributes().is_read_only()));
    Ok(())
  }

  #[test]
  fn clone_is_retain() -> Result<(), VmError> {
    let class = ClassDefinition::new("Counted").build()?;
    assert_eq!(class.ref_count(), 1);
    let retained = class.clone();
    assert!(retained.ptr_eq(&class));
    assert_eq!(class.ref_count(), 2);
    drop(retained);
    assert_eq!(class.ref_count(), 1);
    Ok(())
  }
}

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::group::PendingRelease;
use crate::heap::JsObject;
use crate::{Class, ContextGroup, GcObject, Heap, RootId, Value, VmError};

struct GlobalContextInner {
  group: ContextGroup,
  global: GcObject,
  root: RootId,
  name: Mutex<Option<String>>,
}

impl Drop for GlobalContextInner {
  fn drop(&mut self) {
    tracing::debug!(global = ?self.global, "global context released");
    self.group.inner().release(PendingRelease::Root(self.root));
  }
}

/// An owned execution context: a global object living in a [`ContextGroup`].
///
/// Global contexts are reference counted (clone retains, drop releases) and keep their group
/// alive. All operations go through a [`Context`] obtained with [`GlobalContext::enter`].
#[derive(Clone)]
pub struct GlobalContext {
  inner: Arc<GlobalContextInner>,
}

impl GlobalContext {
  /// Creates a global context in a fresh group.
  ///
  /// With `global_class`, the global object is an instance of that class and its initializers run
  /// before this returns.
  pub fn new(global_class: Option<&Class>) -> Result<Self, VmError> {
    Self::new_in_group(&ContextGroup::new(), global_class)
  }

  /// Creates a global context sharing `group`'s heap with the group's other contexts.
  pub fn new_in_group(group: &ContextGroup, global_class: Option<&Class>) -> Result<Self, VmError> {
    let (global, root) = {
      let mut heap = group.lock_heap();
      let global = match global_class {
        Some(class) => {
          let prototype = heap.prototype_for_class(class)?;
          heap.alloc_instance(class, None, prototype)?
        }
        None => heap.alloc_object()?,
      };
      let root = heap.add_root(Value::Object(global));
      (global, root)
    };

    let context = Self {
      inner: Arc::new(GlobalContextInner {
        group: group.clone(),
        global,
        root,
        name: Mutex::new(None),
      }),
    };
    tracing::debug!(heap = group.heap_tag().0, ?global, "global context created");

    if let Some(class) = global_class {
      context.enter().initialize(global, class)?;
    }
    Ok(context)
  }

  pub fn group(&self) -> &ContextGroup {
    &self.inner.group
  }

  pub fn global_object(&self) -> GcObject {
    self.inner.global
  }

  /// The debug name, used only for diagnostics.
  pub fn name(&self) -> Option<String> {
    self.inner.name.lock().clone()
  }

  pub fn set_name(&self, name: Option<&str>) {
    *self.inner.name.lock() = name.map(str::to_string);
  }

  /// Enters the context, blocking until the group's heap is available.
  ///
  /// Entering again on a thread that is already inside this group deadlocks; callbacks receive the
  /// active [`Context`] instead.
  pub fn enter(&self) -> Context<'_> {
    Context::new(self, self.inner.group.lock_heap())
  }

  /// Enters the context if the group's heap is not locked.
  pub fn try_enter(&self) -> Option<Context<'_>> {
    let heap = self.inner.group.try_lock_heap()?;
    Some(Context::new(self, heap))
  }

  /// Runs a collection between top-level calls.
  pub fn collect_garbage(&self) {
    self.enter().collect_garbage();
  }

  /// Number of live references to this context.
  pub fn ref_count(&self) -> usize {
    Arc::strong_count(&self.inner)
  }

  pub fn ptr_eq(&self, other: &GlobalContext) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl std::fmt::Debug for GlobalContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GlobalContext")
      .field("name", &self.name())
      .field("global", &self.inner.global)
      .field("group", &self.inner.group)
      .finish()
  }
}

/// The active view of a [`GlobalContext`]: holds the group's heap lock and acts as the stack-root
/// scope for the current call.
///
/// Objects created through a `Context`, and the objects returned by operations performed through
/// it, are stack-rooted until the `Context` is dropped (or until the enclosing [`Context::scope`]
/// ends). Operands are rooted only while their operation runs. Every host callback receives the
/// active `Context`.
pub struct Context<'a> {
  global: &'a GlobalContext,
  pub(crate) heap: MutexGuard<'a, Heap>,
  root_stack_len_at_entry: usize,
}

impl Drop for Context<'_> {
  fn drop(&mut self) {
    let len = self.root_stack_len_at_entry;
    self.heap.root_stack.truncate(len);
  }
}

impl<'a> Context<'a> {
  fn new(global: &'a GlobalContext, heap: MutexGuard<'a, Heap>) -> Self {
    let root_stack_len_at_entry = heap.root_stack.len();
    Self {
      global,
      heap,
      root_stack_len_at_entry,
    }
  }

  /// The owning global context (a fresh reference).
  pub fn global_context(&self) -> GlobalContext {
    self.global.clone()
  }

  pub fn group(&self) -> &ContextGroup {
    self.global.group()
  }

  pub fn global_object(&self) -> GcObject {
    self.global.global_object()
  }

  /// Borrows the group's heap immutably.
  pub fn heap(&self) -> &Heap {
    &self.heap
  }

  /// Borrows the group's heap mutably.
  pub fn heap_mut(&mut self) -> &mut Heap {
    &mut self.heap
  }

  /// Pushes a stack root, live until this view (or the enclosing [`Context::scope`]) ends.
  ///
  /// The returned `Value` is the input, allowing `let v = cx.push_root(v);`.
  pub fn push_root(&mut self, value: Value) -> Value {
    debug_assert!(self.root_is_traceable(&value));
    self.heap.root_stack.push(value.clone());
    value
  }

  /// Runs `f` in a nested rooting scope; stack roots pushed inside are popped when it returns.
  ///
  /// Values returned from `f` are not rooted by the outer scope; push them again if needed.
  pub fn scope<R>(&mut self, f: impl FnOnce(&mut Context<'a>) -> R) -> R {
    let len = self.heap.root_stack.len();
    let out = f(self);
    self.heap.root_stack.truncate(len);
    out
  }

  /// Pins `value` across collections until a matching [`Context::unprotect`].
  pub fn protect(&mut self, value: &Value) -> Result<(), VmError> {
    self.heap.protect(value)
  }

  pub fn unprotect(&mut self, value: &Value) {
    self.heap.unprotect(value)
  }

  /// Runs a collection now. Everything rooted by active views survives.
  pub fn collect_garbage(&mut self) {
    self.heap.collect_garbage();
  }

  /// Stack-roots an object operand or result, skipping handles the collector could not trace.
  pub(crate) fn root_operand(&mut self, value: &Value) {
    let Value::Object(obj) = value else {
      return;
    };
    if obj.heap == self.heap.tag() && !self.heap.is_valid_object(*obj) {
      return;
    }
    self.heap.root_stack.push(value.clone());
  }

  /// Number of stack roots currently held by this view and the views it was entered from.
  pub fn stack_root_count(&self) -> usize {
    self.heap.root_stack.len()
  }

  fn root_is_traceable(&self, value: &Value) -> bool {
    match value {
      Value::Object(obj) => obj.heap != self.heap.tag() || self.heap.is_valid_object(*obj),
      _ => true,
    }
  }

  /// Allocates through the heap and stack-roots the result.
  pub(crate) fn alloc_rooted(&mut self, obj: JsObject) -> Result<GcObject, VmError> {
    let obj = self.heap.alloc(obj)?;
    self.heap.root_stack.push(Value::Object(obj));
    Ok(obj)
  }
}

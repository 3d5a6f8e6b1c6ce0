use core::any::Any;
use core::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

use crate::class::{
  CallAsConstructorCallback, CallAsFunctionCallback, ClassId, Finalizer, WeakClass,
};
use crate::external::{ExternalNode, ExternalReferences, HostKey};
use crate::property::PropertyEntry;
use crate::{Class, GcObject, HeapId, HeapTag, JsString, PropertyAttributes, RootId, Value};
use crate::VmError;

/// Hard upper bound for prototype chain traversals.
///
/// `object_set_prototype` rejects cycles, but every walk is still bounded so a corrupted chain
/// can never hang the host.
pub const MAX_PROTOTYPE_CHAIN: usize = 10_000;

/// Heap configuration and memory limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapLimits {
  /// Hard memory limit for live heap allocations, in bytes.
  pub max_bytes: usize,
  /// When an allocation would cause `used_bytes` to exceed this threshold, the heap collects (or
  /// schedules a collection, see [`CollectionMode`]) before attempting the allocation.
  pub gc_threshold: usize,
}

impl HeapLimits {
  /// Creates a new set of heap limits.
  pub fn new(max_bytes: usize, gc_threshold: usize) -> Self {
    Self {
      max_bytes,
      gc_threshold,
    }
  }
}

impl Default for HeapLimits {
  fn default() -> Self {
    Self::new(256 * 1024 * 1024, 64 * 1024 * 1024)
  }
}

/// When threshold-triggered collections run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMode {
  /// Collect inside the allocation that crossed the threshold.
  #[default]
  Synchronous,
  /// Schedule the collection on the group's run loop; it runs on the next
  /// [`ContextGroup::run_deferred`](crate::ContextGroup::run_deferred). Allocations that would
  /// exceed `max_bytes` still collect immediately.
  Deferred,
}

static NEXT_HEAP_TAG: AtomicU32 = AtomicU32::new(1);

/// A non-moving mark/sweep GC heap holding the object instances of one context group.
///
/// The heap stores objects in a `Vec` of slots. GC handles store the slot `index` and a
/// per-slot `generation`, which makes handles stable across `Vec` reallocations and allows
/// detection of stale handles when slots are reused. Every handle also carries the heap's
/// [`HeapTag`]; handles from another heap are rejected with [`VmError::ForeignHandle`].
pub struct Heap {
  tag: HeapTag,
  limits: HeapLimits,
  collection_mode: CollectionMode,
  collection_scheduled: bool,

  /// Bytes used by live allocations.
  used_bytes: usize,
  gc_runs: u64,

  // GC-managed allocations.
  slots: Vec<Slot>,
  marks: Vec<u8>,
  free_list: Vec<u32>,

  // Root sets.
  pub(crate) root_stack: Vec<Value>,
  persistent_roots: Vec<Option<Value>>,
  persistent_roots_free: Vec<u32>,
  protected: AHashMap<GcObject, usize>,
  external: ExternalReferences,

  // Intrinsics and lazily built class prototypes. Both are scanned as roots; a class prototype
  // only while its class is alive.
  object_prototype: GcObject,
  function_prototype: GcObject,
  class_prototypes: AHashMap<ClassId, (WeakClass, GcObject)>,
}

impl Heap {
  /// Creates a new heap with the provided memory limits.
  pub fn new(limits: HeapLimits) -> Self {
    debug_assert!(
      limits.gc_threshold <= limits.max_bytes,
      "gc_threshold should be <= max_bytes"
    );

    let tag = HeapTag(NEXT_HEAP_TAG.fetch_add(1, Ordering::Relaxed));
    // The two intrinsics always occupy the first two slots.
    let mut heap = Self {
      tag,
      limits,
      collection_mode: CollectionMode::Synchronous,
      collection_scheduled: false,
      used_bytes: 0,
      gc_runs: 0,
      slots: Vec::new(),
      marks: Vec::new(),
      free_list: Vec::new(),
      root_stack: Vec::new(),
      persistent_roots: Vec::new(),
      persistent_roots_free: Vec::new(),
      protected: AHashMap::new(),
      external: ExternalReferences::default(),
      object_prototype: GcObject {
        id: HeapId::from_parts(0, 0),
        heap: tag,
      },
      function_prototype: GcObject {
        id: HeapId::from_parts(1, 0),
        heap: tag,
      },
      class_prototypes: AHashMap::new(),
    };
    let object_prototype = heap.alloc_unchecked(JsObject::ordinary(None));
    let function_prototype = heap.alloc_unchecked(JsObject::ordinary(Some(object_prototype)));
    debug_assert_eq!(object_prototype, heap.object_prototype);
    debug_assert_eq!(function_prototype, heap.function_prototype);
    heap
  }

  /// The tag stamped into every handle allocated by this heap.
  pub fn tag(&self) -> HeapTag {
    self.tag
  }

  pub fn limits(&self) -> HeapLimits {
    self.limits
  }

  pub fn collection_mode(&self) -> CollectionMode {
    self.collection_mode
  }

  pub fn set_collection_mode(&mut self, mode: CollectionMode) {
    self.collection_mode = mode;
  }

  /// Whether a threshold-triggered collection is waiting for the run loop.
  pub fn collection_scheduled(&self) -> bool {
    self.collection_scheduled
  }

  pub(crate) fn take_scheduled_collection(&mut self) -> bool {
    mem::take(&mut self.collection_scheduled)
  }

  /// Bytes currently used by live heap allocations.
  pub fn used_bytes(&self) -> usize {
    self.used_bytes
  }

  #[cfg(debug_assertions)]
  fn debug_recompute_used_bytes(&self) -> usize {
    self
      .slots
      .iter()
      .filter(|slot| slot.value.is_some())
      .fold(0usize, |acc, slot| acc.saturating_add(slot.bytes))
  }

  #[cfg(debug_assertions)]
  fn debug_assert_used_bytes_is_correct(&self) {
    let recomputed = self.debug_recompute_used_bytes();
    debug_assert_eq!(
      self.used_bytes, recomputed,
      "Heap::used_bytes mismatch: used_bytes={}, recomputed={}",
      self.used_bytes, recomputed
    );
  }

  /// Total number of GC cycles that have run.
  pub fn gc_runs(&self) -> u64 {
    self.gc_runs
  }

  /// Number of live object allocations, intrinsics included.
  pub fn live_object_count(&self) -> usize {
    self.slots.iter().filter(|slot| slot.value.is_some()).count()
  }

  /// Explicitly runs a GC cycle.
  ///
  /// Unreachable objects are freed and their class finalizers run (most-derived first) before this
  /// returns.
  pub fn collect_garbage(&mut self) {
    self.gc_runs += 1;
    self.collection_scheduled = false;
    let _span = tracing::debug_span!("gc", heap = self.tag.0, run = self.gc_runs).entered();
    let bytes_before = self.used_bytes;

    let cached = self.class_prototypes.len();
    self.class_prototypes.retain(|_, (class, _)| class.is_alive());
    let evicted = cached - self.class_prototypes.len();
    if evicted > 0 {
      tracing::trace!(evicted, "class prototypes of released classes evicted");
    }

    // Mark.
    {
      debug_assert_eq!(self.slots.len(), self.marks.len());

      let mut tracer = Tracer::new(self.tag, &self.slots, &mut self.marks[..], &self.external);
      for value in &self.root_stack {
        tracer.trace_value(value);
      }
      for value in self.persistent_roots.iter().flatten() {
        tracer.trace_value(value);
      }
      for obj in self.protected.keys() {
        tracer.trace_object(*obj);
      }
      tracer.trace_object(self.object_prototype);
      tracer.trace_object(self.function_prototype);
      for (_, proto) in self.class_prototypes.values() {
        tracer.trace_object(*proto);
      }
      for key in self.external.host_roots() {
        tracer.trace_host(key);
      }
      tracer.drain();
    }

    // Sweep.
    let tag = self.tag;
    let mut dead = Vec::new();
    let mut freed = 0usize;
    for (idx, slot) in self.slots.iter_mut().enumerate() {
      let marked = self.marks[idx] != 0;
      // Reset mark bits for next cycle.
      self.marks[idx] = 0;

      if slot.value.is_none() {
        debug_assert!(!marked);
        continue;
      }

      if marked {
        continue;
      }

      // Unreachable: take the object and free the slot.
      let handle = GcObject {
        id: HeapId::from_parts(idx as u32, slot.generation),
        heap: tag,
      };
      self.used_bytes = self.used_bytes.saturating_sub(slot.bytes);
      let obj = slot.value.take();
      slot.bytes = 0;
      slot.generation = slot.generation.wrapping_add(1);
      self.free_list.push(idx as u32);
      freed += 1;
      if let Some(obj) = obj {
        dead.push((handle, obj));
      }
    }

    let slots = &self.slots;
    self
      .external
      .prune(|obj| obj.heap != tag || validate_slot(slots, obj.id).is_some());

    // Finalizers observe a heap in which every dead object is already gone.
    let mut finalized = 0usize;
    for (handle, obj) in dead {
      if finalize_object(handle, obj) {
        finalized += 1;
      }
    }

    tracing::debug!(
      freed,
      finalized,
      bytes_before,
      bytes_after = self.used_bytes,
      "gc finished"
    );

    #[cfg(debug_assertions)]
    self.debug_assert_used_bytes_is_correct();
  }

  /// Adds a persistent root, keeping `value` live until the returned [`RootId`] is removed.
  pub fn add_root(&mut self, value: Value) -> RootId {
    // Root sets should not contain stale handles; detect issues early in debug builds.
    debug_assert!(self.debug_value_is_valid_or_primitive(&value));

    let idx = match self.persistent_roots_free.pop() {
      Some(idx) => idx as usize,
      None => {
        self.persistent_roots.push(None);
        self.persistent_roots.len() - 1
      }
    };
    debug_assert!(self.persistent_roots[idx].is_none());
    self.persistent_roots[idx] = Some(value);
    RootId(idx as u32)
  }

  /// Returns the current value of a persistent root.
  pub fn get_root(&self, id: RootId) -> Option<Value> {
    self
      .persistent_roots
      .get(id.0 as usize)
      .and_then(|slot| slot.clone())
  }

  /// Updates a persistent root's value.
  ///
  /// Panics only in debug builds if `id` is invalid.
  pub fn set_root(&mut self, id: RootId, value: Value) {
    debug_assert!(self.debug_value_is_valid_or_primitive(&value));

    let idx = id.0 as usize;
    debug_assert!(idx < self.persistent_roots.len(), "invalid RootId");
    match self.persistent_roots.get_mut(idx) {
      Some(slot @ Some(_)) => *slot = Some(value),
      _ => debug_assert!(false, "RootId already removed"),
    }
  }

  /// Removes a persistent root previously created by [`Heap::add_root`].
  pub fn remove_root(&mut self, id: RootId) {
    let idx = id.0 as usize;
    debug_assert!(idx < self.persistent_roots.len(), "invalid RootId");
    let Some(slot) = self.persistent_roots.get_mut(idx) else {
      return;
    };
    debug_assert!(slot.is_some(), "RootId already removed");
    if slot.take().is_some() {
      self.persistent_roots_free.push(id.0);
    }
  }

  /// Pins `value` so it survives collections regardless of reachability.
  ///
  /// Pins are counted: each `protect` must be balanced by one [`Heap::unprotect`]. Primitive values
  /// need no pinning and are ignored.
  pub fn protect(&mut self, value: &Value) -> Result<(), VmError> {
    let Value::Object(obj) = value else {
      return Ok(());
    };
    self.object_index(*obj)?;
    *self.protected.entry(*obj).or_insert(0) += 1;
    tracing::trace!(?obj, count = self.protected[obj], "protect");
    Ok(())
  }

  /// Releases one [`Heap::protect`] pin. Unbalanced calls are ignored (and assert in debug builds).
  pub fn unprotect(&mut self, value: &Value) {
    let Value::Object(obj) = value else {
      return;
    };
    let Some(count) = self.protected.get_mut(obj) else {
      debug_assert!(false, "unprotect without a matching protect: {obj:?}");
      return;
    };
    *count -= 1;
    if *count == 0 {
      self.protected.remove(obj);
    }
    tracing::trace!(?obj, "unprotect");
  }

  /// Current pin count of `obj`.
  pub fn protect_count(&self, obj: GcObject) -> usize {
    self.protected.get(&obj).copied().unwrap_or(0)
  }

  /// Registers a host-graph edge: while `owner` is reached by the collector, `target` is too.
  ///
  /// Edges are counted; each registration must be balanced by one
  /// [`Heap::remove_external_reference`].
  pub fn add_external_reference(
    &mut self,
    owner: impl Into<ExternalNode>,
    target: impl Into<ExternalNode>,
  ) -> Result<(), VmError> {
    let owner = owner.into();
    let target = target.into();
    for node in [owner, target] {
      if let ExternalNode::Object(obj) = node {
        self.object_index(obj)?;
      }
    }
    self.external.add(owner, target);
    tracing::trace!(?owner, ?target, "external reference added");
    Ok(())
  }

  /// Removes one registration of `owner -> target`. Returns `false` if none was registered, which
  /// includes edges pruned because an endpoint object was collected.
  pub fn remove_external_reference(
    &mut self,
    owner: impl Into<ExternalNode>,
    target: impl Into<ExternalNode>,
  ) -> bool {
    self.external.remove(owner.into(), target.into())
  }

  /// Number of registrations of `owner -> target`.
  pub fn external_reference_count(
    &self,
    owner: impl Into<ExternalNode>,
    target: impl Into<ExternalNode>,
  ) -> usize {
    self.external.count(owner.into(), target.into())
  }

  /// Number of distinct external edges.
  pub fn external_edge_count(&self) -> usize {
    self.external.edge_count()
  }

  /// Marks a host node as alive, making every edge leaving it a root. Counted.
  pub fn add_host_root(&mut self, key: HostKey) {
    self.external.add_host_root(key);
  }

  pub fn remove_host_root(&mut self, key: HostKey) -> bool {
    self.external.remove_host_root(key)
  }

  /// Returns `true` if `obj` currently points to a live object allocation of this heap.
  pub fn is_valid_object(&self, obj: GcObject) -> bool {
    self.object_index(obj).is_ok()
  }

  /// The root object prototype (`Object.prototype`).
  pub fn intrinsic_object_prototype(&self) -> GcObject {
    self.object_prototype
  }

  /// The prototype of host function objects (`Function.prototype`).
  pub fn intrinsic_function_prototype(&self) -> GcObject {
    self.function_prototype
  }

  /// Gets an object's prototype.
  pub fn object_prototype(&self, obj: GcObject) -> Result<Option<GcObject>, VmError> {
    Ok(self.get_object(obj)?.prototype)
  }

  /// Sets an object's prototype, rejecting cycles.
  pub fn object_set_prototype(
    &mut self,
    obj: GcObject,
    prototype: Option<GcObject>,
  ) -> Result<(), VmError> {
    // Validate `obj` early so we don't silently accept stale handles.
    self.object_index(obj)?;

    // Direct self-cycle.
    if prototype == Some(obj) {
      return Err(VmError::PrototypeCycle);
    }

    // Reject indirect cycles by walking `prototype`'s chain and checking whether it contains `obj`.
    let mut current = prototype;
    let mut steps = 0usize;
    let mut visited: AHashSet<GcObject> = AHashSet::new();
    while let Some(p) = current {
      if steps >= MAX_PROTOTYPE_CHAIN {
        return Err(VmError::PrototypeChainTooDeep);
      }
      steps += 1;

      if !visited.insert(p) {
        return Err(VmError::PrototypeCycle);
      }
      if p == obj {
        return Err(VmError::PrototypeCycle);
      }

      current = self.object_prototype(p)?;
    }

    self.get_object_mut(obj)?.prototype = prototype;
    Ok(())
  }

  /// The class `obj` was created with, or `None` for default-class objects.
  pub fn object_class(&self, obj: GcObject) -> Result<Option<Class>, VmError> {
    Ok(self.get_object(obj)?.class.clone())
  }

  /// Allocates an ordinary object whose prototype is the object prototype.
  ///
  /// The object is not rooted.
  pub fn alloc_object(&mut self) -> Result<GcObject, VmError> {
    let proto = self.object_prototype;
    self.alloc(JsObject::ordinary(Some(proto)))
  }

  /// Reads an own property without consulting classes or prototypes.
  pub fn get_own_property(&self, obj: GcObject, name: &JsString) -> Result<Option<Value>, VmError> {
    let obj = self.get_object(obj)?;
    Ok(obj.find(name).map(|idx| obj.properties[idx].value.clone()))
  }

  pub fn own_property_attributes(
    &self,
    obj: GcObject,
    name: &JsString,
  ) -> Result<Option<PropertyAttributes>, VmError> {
    let obj = self.get_object(obj)?;
    Ok(obj.find(name).map(|idx| obj.properties[idx].attributes))
  }

  pub fn has_own_property(&self, obj: GcObject, name: &JsString) -> Result<bool, VmError> {
    Ok(self.get_object(obj)?.find(name).is_some())
  }

  /// Creates or replaces an own property, including its attributes. Read-only is not enforced.
  pub fn define_own_property(
    &mut self,
    obj: GcObject,
    name: JsString,
    value: Value,
    attributes: PropertyAttributes,
  ) -> Result<(), VmError> {
    self.check_storable(&value)?;
    let idx = self.object_index(obj)?;
    if let Some(existing) = self.object_at_mut(idx).find(&name) {
      let entry = &mut self.object_at_mut(idx).properties[existing];
      entry.value = value;
      entry.attributes = attributes;
      return Ok(());
    }

    self.ensure_can_allocate(mem::size_of::<PropertyEntry>())?;
    // The collection above may have reclaimed `obj` if the caller did not root it.
    let idx = self.object_index(obj)?;
    let object = self.object_at_mut(idx);
    object.properties.push(PropertyEntry {
      name,
      value,
      attributes,
    });
    let new_bytes = object.heap_size_bytes();
    self.update_slot_bytes(idx, new_bytes);
    Ok(())
  }

  /// Ordinary `[[Set]]` of an own property: read-only properties are left untouched (returning
  /// `false`), existing properties are updated, missing ones are created with `attributes`.
  ///
  /// Non-empty `attributes` replace the attributes of an existing property.
  pub fn put_own_property(
    &mut self,
    obj: GcObject,
    name: &JsString,
    value: Value,
    attributes: PropertyAttributes,
  ) -> Result<bool, VmError> {
    self.check_storable(&value)?;
    let idx = self.object_index(obj)?;
    let object = self.object_at_mut(idx);
    match object.find(name) {
      Some(existing) => {
        let entry = &mut object.properties[existing];
        if entry.attributes.is_read_only() {
          return Ok(false);
        }
        entry.value = value;
        if attributes != PropertyAttributes::NONE {
          entry.attributes = attributes;
        }
        Ok(true)
      }
      None => {
        self.define_own_property(obj, name.clone(), value, attributes)?;
        Ok(true)
      }
    }
  }

  /// Removes an own property. Returns `false` only if the property is marked `DONT_DELETE`.
  pub fn delete_own_property(&mut self, obj: GcObject, name: &JsString) -> Result<bool, VmError> {
    let idx = self.object_index(obj)?;
    let object = self.object_at_mut(idx);
    let Some(existing) = object.find(name) else {
      return Ok(true);
    };
    if !object.properties[existing].attributes.is_deletable() {
      return Ok(false);
    }
    object.properties.remove(existing);
    let new_bytes = object.heap_size_bytes();
    self.update_slot_bytes(idx, new_bytes);
    Ok(true)
  }

  /// Names of the enumerable own properties, in insertion order.
  pub fn own_enumerable_property_names(&self, obj: GcObject) -> Result<Vec<JsString>, VmError> {
    Ok(
      self
        .get_object(obj)?
        .properties
        .iter()
        .filter(|entry| entry.attributes.is_enumerable())
        .map(|entry| entry.name.clone())
        .collect(),
    )
  }

  pub(crate) fn alloc(&mut self, obj: JsObject) -> Result<GcObject, VmError> {
    let new_bytes = obj.heap_size_bytes();
    self.ensure_can_allocate(new_bytes)?;
    Ok(self.alloc_unchecked(obj))
  }

  pub(crate) fn get_object(&self, obj: GcObject) -> Result<&JsObject, VmError> {
    let idx = self.object_index(obj)?;
    Ok(self.object_at(idx))
  }

  pub(crate) fn get_object_mut(&mut self, obj: GcObject) -> Result<&mut JsObject, VmError> {
    let idx = self.object_index(obj)?;
    Ok(self.object_at_mut(idx))
  }

  pub(crate) fn cached_class_prototype(&self, class: ClassId) -> Option<GcObject> {
    self.class_prototypes.get(&class).map(|(_, proto)| *proto)
  }

  pub(crate) fn cache_class_prototype(&mut self, class: &Class, prototype: GcObject) {
    self
      .class_prototypes
      .insert(class.id(), (class.downgrade(), prototype));
  }

  /// Number of class prototypes currently cached (and rooted) by this heap.
  pub fn cached_class_prototypes(&self) -> usize {
    self.class_prototypes.len()
  }

  fn object_index(&self, obj: GcObject) -> Result<usize, VmError> {
    if obj.heap != self.tag {
      return Err(VmError::ForeignHandle);
    }
    validate_slot(&self.slots, obj.id).ok_or(VmError::InvalidHandle)
  }

  /// Values stored in the object graph must be live objects of this heap (or primitives).
  fn check_storable(&self, value: &Value) -> Result<(), VmError> {
    match value {
      Value::Object(obj) => self.object_index(*obj).map(|_| ()),
      _ => Ok(()),
    }
  }

  fn object_at(&self, idx: usize) -> &JsObject {
    match self.slots[idx].value.as_ref() {
      Some(obj) => obj,
      None => unreachable!("validated slot is empty"),
    }
  }

  fn object_at_mut(&mut self, idx: usize) -> &mut JsObject {
    match self.slots[idx].value.as_mut() {
      Some(obj) => obj,
      None => unreachable!("validated slot is empty"),
    }
  }

  fn ensure_can_allocate(&mut self, new_bytes: usize) -> Result<(), VmError> {
    let after = self.used_bytes.saturating_add(new_bytes);
    if after > self.limits.gc_threshold {
      match self.collection_mode {
        CollectionMode::Synchronous => self.collect_garbage(),
        CollectionMode::Deferred => {
          if !self.collection_scheduled {
            tracing::debug!(heap = self.tag.0, used_bytes = self.used_bytes, "gc scheduled");
          }
          self.collection_scheduled = true;
        }
      }
    }

    let after = self.used_bytes.saturating_add(new_bytes);
    if after > self.limits.max_bytes && self.collection_mode == CollectionMode::Deferred {
      self.collect_garbage();
    }

    let after = self.used_bytes.saturating_add(new_bytes);
    if after > self.limits.max_bytes {
      return Err(VmError::OutOfMemory);
    }
    Ok(())
  }

  fn update_slot_bytes(&mut self, idx: usize, new_bytes: usize) {
    let slot = &mut self.slots[idx];
    let old_bytes = slot.bytes;

    if new_bytes >= old_bytes {
      self.used_bytes = self.used_bytes.saturating_add(new_bytes - old_bytes);
    } else {
      self.used_bytes = self.used_bytes.saturating_sub(old_bytes - new_bytes);
    }

    slot.bytes = new_bytes;
  }

  fn alloc_unchecked(&mut self, obj: JsObject) -> GcObject {
    let new_bytes = obj.heap_size_bytes();
    let idx = match self.free_list.pop() {
      Some(idx) => idx as usize,
      None => {
        let idx = self.slots.len();
        self.slots.push(Slot::new());
        self.marks.push(0);
        idx
      }
    };

    let slot = &mut self.slots[idx];
    debug_assert!(slot.value.is_none(), "free list returned an occupied slot");

    slot.value = Some(obj);
    slot.bytes = new_bytes;
    self.used_bytes = self.used_bytes.saturating_add(new_bytes);

    let id = HeapId::from_parts(idx as u32, slot.generation);

    #[cfg(debug_assertions)]
    self.debug_assert_used_bytes_is_correct();

    GcObject { id, heap: self.tag }
  }

  fn debug_value_is_valid_or_primitive(&self, value: &Value) -> bool {
    match value {
      Value::Object(o) => self.is_valid_object(*o),
      _ => true,
    }
  }
}

impl Drop for Heap {
  fn drop(&mut self) {
    // Tearing down the heap finalizes everything that is still allocated.
    let tag = self.tag;
    let mut finalized = 0usize;
    for (idx, slot) in self.slots.iter_mut().enumerate() {
      let Some(obj) = slot.value.take() else {
        continue;
      };
      let handle = GcObject {
        id: HeapId::from_parts(idx as u32, slot.generation),
        heap: tag,
      };
      if finalize_object(handle, obj) {
        finalized += 1;
      }
    }
    tracing::debug!(heap = tag.0, finalized, "heap dropped");
  }
}

/// Runs the finalizers of `obj`'s class chain, most-derived first. Returns `false` for objects
/// without a class.
fn finalize_object(handle: GcObject, mut obj: JsObject) -> bool {
  let Some(class) = obj.class.take() else {
    return false;
  };
  for c in class.chain() {
    if let Some(finalize) = c.finalize_callback() {
      finalize(&mut Finalizer::new(handle, c, &mut obj.private));
    }
  }
  tracing::trace!(object = ?handle, class = %class.name(), "finalized");
  true
}

fn validate_slot(slots: &[Slot], id: HeapId) -> Option<usize> {
  let idx = id.index() as usize;
  let slot = slots.get(idx)?;
  if slot.generation != id.generation() {
    return None;
  }
  if slot.value.is_none() {
    return None;
  }
  Some(idx)
}

struct Slot {
  generation: u32,
  value: Option<JsObject>,
  bytes: usize,
}

impl Slot {
  fn new() -> Self {
    Self {
      generation: 0,
      value: None,
      bytes: 0,
    }
  }
}

/// What an object does when called or constructed, independent of its class.
pub(crate) enum ObjectKind {
  Ordinary,
  Function {
    name: JsString,
    call: Arc<CallAsFunctionCallback>,
  },
  Constructor {
    class: Option<Class>,
    construct: Option<Arc<CallAsConstructorCallback>>,
  },
}

pub(crate) struct JsObject {
  pub(crate) prototype: Option<GcObject>,
  pub(crate) class: Option<Class>,
  pub(crate) kind: ObjectKind,
  pub(crate) properties: Vec<PropertyEntry>,
  /// Only meaningful for objects with a class; default-class objects have no private storage.
  pub(crate) private: Option<Box<dyn Any + Send>>,
}

impl JsObject {
  pub(crate) fn ordinary(prototype: Option<GcObject>) -> Self {
    Self::new(ObjectKind::Ordinary, None, prototype)
  }

  pub(crate) fn new(kind: ObjectKind, class: Option<Class>, prototype: Option<GcObject>) -> Self {
    Self {
      prototype,
      class,
      kind,
      properties: Vec::new(),
      private: None,
    }
  }

  pub(crate) fn find(&self, name: &JsString) -> Option<usize> {
    self.properties.iter().position(|entry| &entry.name == name)
  }

  fn heap_size_bytes(&self) -> usize {
    Self::heap_size_bytes_for_property_count(self.properties.len())
  }

  fn heap_size_bytes_for_property_count(count: usize) -> usize {
    // Object headers are stored inline in the slot table, but counting them keeps allocation
    // pressure proportional to the number of objects.
    mem::size_of::<JsObject>()
      .saturating_add(count.saturating_mul(mem::size_of::<PropertyEntry>()))
  }
}

impl Trace for JsObject {
  fn trace(&self, tracer: &mut Tracer<'_>) {
    if let Some(proto) = self.prototype {
      tracer.trace_object(proto);
    }
    for entry in &self.properties {
      entry.trace(tracer);
    }
  }
}

pub(crate) trait Trace {
  fn trace(&self, tracer: &mut Tracer<'_>);
}

pub(crate) struct Tracer<'a> {
  tag: HeapTag,
  slots: &'a [Slot],
  marks: &'a mut [u8],
  external: &'a ExternalReferences,
  worklist: Vec<HeapId>,
  host_worklist: Vec<HostKey>,
  hosts_seen: AHashSet<HostKey>,
}

impl<'a> Tracer<'a> {
  fn new(
    tag: HeapTag,
    slots: &'a [Slot],
    marks: &'a mut [u8],
    external: &'a ExternalReferences,
  ) -> Self {
    Self {
      tag,
      slots,
      marks,
      external,
      worklist: Vec::new(),
      host_worklist: Vec::new(),
      hosts_seen: AHashSet::new(),
    }
  }

  pub(crate) fn trace_value(&mut self, value: &Value) {
    if let Value::Object(obj) = value {
      self.trace_object(*obj);
    }
  }

  pub(crate) fn trace_object(&mut self, obj: GcObject) {
    // Foreign handles can only get here through cross-group misuse; they are never ours to mark.
    if obj.heap != self.tag {
      return;
    }
    self.trace_heap_id(obj.id);
  }

  fn trace_host(&mut self, key: HostKey) {
    if self.hosts_seen.insert(key) {
      self.host_worklist.push(key);
    }
  }

  fn trace_external(&mut self, node: ExternalNode) {
    let external = self.external;
    for target in external.targets(node) {
      match target {
        ExternalNode::Object(obj) => self.trace_object(obj),
        ExternalNode::Host(key) => self.trace_host(key),
      }
    }
  }

  fn drain(&mut self) {
    loop {
      if let Some(id) = self.worklist.pop() {
        let Some(idx) = self.validate(id) else {
          continue;
        };
        if self.marks[idx] != 0 {
          continue;
        }
        self.marks[idx] = 1;

        let slots = self.slots;
        let Some(obj) = slots[idx].value.as_ref() else {
          debug_assert!(false, "validated heap id points to a free slot: {id:?}");
          continue;
        };
        obj.trace(self);
        self.trace_external(ExternalNode::Object(GcObject { id, heap: self.tag }));
        continue;
      }
      if let Some(key) = self.host_worklist.pop() {
        self.trace_external(ExternalNode::Host(key));
        continue;
      }
      break;
    }
  }

  fn trace_heap_id(&mut self, id: HeapId) {
    let Some(idx) = self.validate(id) else {
      return;
    };
    if self.marks[idx] != 0 {
      return;
    }
    self.worklist.push(id);
  }

  fn validate(&self, id: HeapId) -> Option<usize> {
    let idx = id.index() as usize;
    let slot = self.slots.get(idx)?;
    if slot.generation != id.generation() {
      debug_assert!(false, "stale handle during GC: {id:?}");
      return None;
    }
    if slot.value.is_none() {
      debug_assert!(false, "handle points at a free slot during GC: {id:?}");
      return None;
    }
    Some(idx)
  }
}

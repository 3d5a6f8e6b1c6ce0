use core::fmt;

use crate::Heap;

/// A stable identifier for an allocation in a [`Heap`](crate::Heap).
///
/// This is a packed `{ index: u32, generation: u32 }`.
/// - `index` selects a slot in the heap's slot vector.
/// - `generation` is incremented each time that slot is freed.
///
/// A `HeapId` is **only valid** if:
/// - `index` is in-bounds for the current heap,
/// - the slot at `index` is occupied, and
/// - the slot's generation matches this handle's generation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct HeapId(pub(crate) u64);

impl HeapId {
  pub(crate) fn from_parts(index: u32, generation: u32) -> Self {
    Self((index as u64) | ((generation as u64) << 32))
  }

  /// The slot index within the heap.
  #[inline]
  pub fn index(self) -> u32 {
    self.0 as u32
  }

  /// The generation of the slot when this handle was created.
  #[inline]
  pub fn generation(self) -> u32 {
    (self.0 >> 32) as u32
  }
}

impl fmt::Debug for HeapId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HeapId")
      .field("index", &self.index())
      .field("generation", &self.generation())
      .finish()
  }
}

/// Identifies the heap (and therefore the [`ContextGroup`](crate::ContextGroup)) that allocated a
/// handle.
///
/// Tags are process-unique and never reused, so a handle from one group is always recognized as
/// foreign by every other group.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct HeapTag(pub(crate) u32);

/// A GC-managed object instance.
///
/// Handles are plain data: copying one does not keep the object alive. Use
/// [`Context::protect`](crate::Context::protect) or a persistent root for values stored outside of
/// the object graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GcObject {
  pub(crate) id: HeapId,
  pub(crate) heap: HeapTag,
}

impl GcObject {
  /// The underlying [`HeapId`].
  #[inline]
  pub fn id(self) -> HeapId {
    self.id
  }

  /// The tag of the heap that allocated this object.
  #[inline]
  pub fn heap_tag(self) -> HeapTag {
    self.heap
  }

  /// The slot index within the heap.
  #[inline]
  pub fn index(self) -> u32 {
    self.id.index()
  }

  /// The slot generation within the heap.
  #[inline]
  pub fn generation(self) -> u32 {
    self.id.generation()
  }
}

/// A weak, generation-checked handle to a GC-managed object.
///
/// Host wrapper tables can store `WeakGcObject` values without keeping the wrapped objects alive.
/// On lookup, call [`WeakGcObject::upgrade`] to check whether the object is still alive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct WeakGcObject(GcObject);

impl WeakGcObject {
  /// Creates a weak handle pointing at `obj`.
  #[inline]
  pub fn new(obj: GcObject) -> Self {
    Self(obj)
  }

  /// Attempts to upgrade this weak handle to a strong [`GcObject`].
  ///
  /// Returns `Some(GcObject)` only if the handle still points to a currently-live object
  /// allocation of `heap`.
  #[inline]
  pub fn upgrade(self, heap: &Heap) -> Option<GcObject> {
    heap.is_valid_object(self.0).then_some(self.0)
  }

  /// The underlying [`HeapId`].
  #[inline]
  pub fn id(self) -> HeapId {
    self.0.id
  }

  pub(crate) fn object(self) -> GcObject {
    self.0
  }
}

impl From<GcObject> for WeakGcObject {
  #[inline]
  fn from(obj: GcObject) -> Self {
    Self::new(obj)
  }
}

/// An ID for a persistent root stored in the heap.
///
/// Returned by [`Heap::add_root`](crate::Heap::add_root) and later passed to
/// [`Heap::remove_root`](crate::Heap::remove_root).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct RootId(pub(crate) u32);

impl RootId {
  /// The underlying index into the heap's persistent root table.
  #[inline]
  pub fn index(self) -> u32 {
    self.0
  }
}

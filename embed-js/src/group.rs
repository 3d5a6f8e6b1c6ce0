use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::external::ExternalNode;
use crate::{CollectionMode, Heap, HeapLimits, HeapTag, RootId, VmError};

/// Options for creating a [`ContextGroup`].
///
/// Deserializable so hosts can load them from their configuration files; missing fields take
/// their defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupOptions {
  pub heap_limits: HeapLimits,
  pub collection: CollectionMode,
  /// Bind the group's deferred-work queue to the creating thread.
  pub bind_to_current_thread: bool,
}

impl Default for GroupOptions {
  fn default() -> Self {
    Self {
      heap_limits: HeapLimits::default(),
      collection: CollectionMode::Synchronous,
      bind_to_current_thread: true,
    }
  }
}

/// Host work queued onto a group's run loop.
pub type DeferredTask = Box<dyn FnOnce(&ContextGroup) + Send>;

/// Releases requested while the heap lock was unavailable, applied on the next lock.
pub(crate) enum PendingRelease {
  Root(RootId),
  ExternalReference {
    owner: ExternalNode,
    target: ExternalNode,
  },
}

impl PendingRelease {
  fn apply(self, heap: &mut Heap) {
    match self {
      PendingRelease::Root(id) => heap.remove_root(id),
      PendingRelease::ExternalReference { owner, target } => {
        heap.remove_external_reference(owner, target);
      }
    }
  }
}

pub(crate) struct GroupInner {
  heap: Mutex<Heap>,
  tag: HeapTag,
  options: GroupOptions,
  bound_thread: Option<ThreadId>,
  deferred: Mutex<VecDeque<DeferredTask>>,
  pending_releases: Mutex<Vec<PendingRelease>>,
}

impl GroupInner {
  /// Applies `release` now if the heap is free, otherwise queues it for the next lock holder.
  ///
  /// Drops of owned handles can happen while the same thread holds the heap lock (inside a
  /// callback, say); blocking there would deadlock.
  pub(crate) fn release(&self, release: PendingRelease) {
    match self.heap.try_lock() {
      Some(mut heap) => release.apply(&mut heap),
      None => self.pending_releases.lock().push(release),
    }
  }

  fn apply_pending_releases(&self, heap: &mut Heap) {
    let pending = mem::take(&mut *self.pending_releases.lock());
    for release in pending {
      release.apply(heap);
    }
  }
}

/// A set of contexts that may share objects, served by one heap.
///
/// Groups are reference counted: cloning retains and dropping releases. Every
/// [`GlobalContext`](crate::GlobalContext) in the group holds a reference, so the heap (and every
/// object in it) is torn down only after the last context and the last explicit handle are gone.
///
/// Different groups share nothing and can be driven from different threads in parallel. Within a
/// group, the heap lock serializes all access.
#[derive(Clone)]
pub struct ContextGroup {
  inner: Arc<GroupInner>,
}

impl ContextGroup {
  /// Creates a group with default options, bound to the calling thread.
  pub fn new() -> Self {
    Self::with_options(GroupOptions::default())
  }

  pub fn with_options(options: GroupOptions) -> Self {
    let mut heap = Heap::new(options.heap_limits);
    heap.set_collection_mode(options.collection);
    let tag = heap.tag();
    let bound_thread = options
      .bind_to_current_thread
      .then(|| thread::current().id());
    tracing::debug!(heap = tag.0, ?options, "context group created");
    Self {
      inner: Arc::new(GroupInner {
        heap: Mutex::new(heap),
        tag,
        options,
        bound_thread,
        deferred: Mutex::new(VecDeque::new()),
        pending_releases: Mutex::new(Vec::new()),
      }),
    }
  }

  pub fn options(&self) -> &GroupOptions {
    &self.inner.options
  }

  /// The tag carried by every object handle allocated in this group.
  pub fn heap_tag(&self) -> HeapTag {
    self.inner.tag
  }

  /// The thread whose run loop executes deferred work, if the group is bound.
  pub fn bound_thread(&self) -> Option<ThreadId> {
    self.inner.bound_thread
  }

  /// Locks the group's heap.
  ///
  /// Must not be called while the current thread already holds the lock (for example from a
  /// callback); use the [`Context`](crate::Context) passed to the callback instead.
  pub fn lock_heap(&self) -> MutexGuard<'_, Heap> {
    let mut heap = self.inner.heap.lock();
    self.inner.apply_pending_releases(&mut heap);
    heap
  }

  /// Non-blocking variant of [`ContextGroup::lock_heap`].
  pub fn try_lock_heap(&self) -> Option<MutexGuard<'_, Heap>> {
    let mut heap = self.inner.heap.try_lock()?;
    self.inner.apply_pending_releases(&mut heap);
    Some(heap)
  }

  /// Runs a collection now, outside of any context.
  pub fn collect_garbage(&self) {
    self.lock_heap().collect_garbage();
  }

  /// Queues `task` on the group's run loop.
  pub fn defer(&self, task: impl FnOnce(&ContextGroup) + Send + 'static) {
    self.inner.deferred.lock().push_back(Box::new(task));
  }

  /// Number of queued host tasks.
  pub fn pending_tasks(&self) -> usize {
    self.inner.deferred.lock().len()
  }

  /// Whether the run loop has anything to do: queued tasks or a scheduled collection.
  pub fn has_pending_work(&self) -> bool {
    self.pending_tasks() > 0 || self.lock_heap().collection_scheduled()
  }

  /// Drains the run loop: every queued task (including tasks queued by tasks), then any
  /// collection scheduled by a [`CollectionMode::Deferred`] heap. Returns the number of tasks run.
  ///
  /// A bound group only runs its queue on the bound thread.
  pub fn run_deferred(&self) -> Result<usize, VmError> {
    if let Some(bound) = self.inner.bound_thread {
      if bound != thread::current().id() {
        return Err(VmError::WrongThread);
      }
    }

    let _span = tracing::debug_span!("run_deferred", heap = self.inner.tag.0).entered();
    let mut ran = 0usize;
    loop {
      // Pop without holding the queue lock while the task runs; tasks may defer more work.
      let task = self.inner.deferred.lock().pop_front();
      let Some(task) = task else {
        break;
      };
      task(self);
      ran += 1;
    }

    let mut heap = self.lock_heap();
    if heap.take_scheduled_collection() {
      heap.collect_garbage();
    }
    tracing::debug!(tasks = ran, "run loop drained");
    Ok(ran)
  }

  /// Number of live references to this group, including those held by its contexts.
  pub fn ref_count(&self) -> usize {
    Arc::strong_count(&self.inner)
  }

  pub fn ptr_eq(&self, other: &ContextGroup) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  pub(crate) fn downgrade(&self) -> Weak<GroupInner> {
    Arc::downgrade(&self.inner)
  }

  pub(crate) fn inner(&self) -> &GroupInner {
    &self.inner
  }
}

impl Default for ContextGroup {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for ContextGroup {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ContextGroup")
      .field("heap", &self.inner.tag)
      .field("bound_thread", &self.inner.bound_thread)
      .finish()
  }
}

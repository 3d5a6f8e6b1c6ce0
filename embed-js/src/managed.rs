use std::sync::Weak;

use crate::external::ExternalNode;
use crate::group::{GroupInner, PendingRelease};
use crate::{Context, RootId, Value, VmError, WeakGcObject};

/// An owned persistent root, released when dropped.
///
/// Unlike [`Heap::add_root`](crate::Heap::add_root), the root does not have to be removed by hand,
/// and may be dropped from any thread (also while the group's heap is locked).
pub struct PersistentRoot {
  id: RootId,
  group: Weak<GroupInner>,
}

impl PersistentRoot {
  pub fn new(cx: &mut Context<'_>, value: Value) -> Result<Self, VmError> {
    if let Value::Object(obj) = &value {
      cx.heap.get_object(*obj)?;
    }
    let id = cx.heap.add_root(value);
    Ok(Self {
      id,
      group: cx.group().downgrade(),
    })
  }

  pub fn id(&self) -> RootId {
    self.id
  }

  pub fn get(&self, cx: &Context<'_>) -> Option<Value> {
    cx.heap.get_root(self.id)
  }

  /// Replaces the rooted value.
  pub fn set(&self, cx: &mut Context<'_>, value: Value) -> Result<(), VmError> {
    if let Value::Object(obj) = &value {
      cx.heap.get_object(*obj)?;
    }
    cx.heap.set_root(self.id, value);
    Ok(())
  }
}

impl Drop for PersistentRoot {
  fn drop(&mut self) {
    if let Some(group) = self.group.upgrade() {
      group.release(PendingRelease::Root(self.id));
    }
  }
}

impl std::fmt::Debug for PersistentRoot {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("PersistentRoot").field(&self.id).finish()
  }
}

enum Slot {
  Primitive(Value),
  Object(WeakGcObject),
}

/// A conditionally retained value.
///
/// A `ManagedValue` never keeps its object alive by itself: once the collector reclaims the
/// object, [`ManagedValue::get`] returns `None`. Created with an owner, it registers the external
/// edge `owner -> object`, so the object stays alive for as long as the owner is reached by the
/// collector. The edge is released when the `ManagedValue` is dropped.
pub struct ManagedValue {
  slot: Slot,
  owner: Option<ExternalNode>,
  group: Weak<GroupInner>,
}

impl ManagedValue {
  /// Wraps `value` without an owner.
  pub fn new(cx: &Context<'_>, value: Value) -> Self {
    Self {
      slot: Self::slot_for(value),
      owner: None,
      group: cx.group().downgrade(),
    }
  }

  /// Wraps `value`, keeping its object alive while `owner` is reachable.
  pub fn with_owner(
    cx: &mut Context<'_>,
    value: Value,
    owner: impl Into<ExternalNode>,
  ) -> Result<Self, VmError> {
    let owner = owner.into();
    let registered = match &value {
      Value::Object(obj) => {
        cx.heap.add_external_reference(owner, *obj)?;
        Some(owner)
      }
      _ => None,
    };
    Ok(Self {
      slot: Self::slot_for(value),
      owner: registered,
      group: cx.group().downgrade(),
    })
  }

  fn slot_for(value: Value) -> Slot {
    match value {
      Value::Object(obj) => Slot::Object(WeakGcObject::new(obj)),
      primitive => Slot::Primitive(primitive),
    }
  }

  /// The wrapped value, stack-rooted in `cx`, or `None` if its object was collected.
  pub fn get(&self, cx: &mut Context<'_>) -> Option<Value> {
    match &self.slot {
      Slot::Primitive(value) => Some(value.clone()),
      Slot::Object(weak) => {
        let obj = weak.upgrade(&cx.heap)?;
        Some(cx.push_root(Value::Object(obj)))
      }
    }
  }

  /// The node whose reachability keeps the object alive, if any.
  pub fn owner(&self) -> Option<ExternalNode> {
    self.owner
  }
}

impl Drop for ManagedValue {
  fn drop(&mut self) {
    let (Some(owner), Slot::Object(weak)) = (self.owner, &self.slot) else {
      return;
    };
    let Some(group) = self.group.upgrade() else {
      return;
    };
    group.release(PendingRelease::ExternalReference {
      owner,
      target: ExternalNode::Object(weak.object()),
    });
  }
}

impl std::fmt::Debug for ManagedValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut s = f.debug_struct("ManagedValue");
    match &self.slot {
      Slot::Primitive(value) => s.field("value", value),
      Slot::Object(weak) => s.field("object", weak),
    };
    s.field("owner", &self.owner).finish()
  }
}

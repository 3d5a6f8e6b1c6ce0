//! Host-graph reachability edges.
//!
//! Hosts often keep JS objects alive through native structures the collector cannot scan (a DOM
//! node owning its JS wrapper's listeners, say). Such structures are registered as edges
//! `owner -> target` between [`ExternalNode`]s. The mark phase treats the edges leaving any reached
//! node as additional references, so a target stays alive exactly as long as some owner is reached.
//! Host nodes are reached either through an edge from a marked object or by being rooted
//! explicitly with [`Heap::add_host_root`](crate::Heap::add_host_root).

use ahash::AHashMap;

use crate::GcObject;

/// Opaque identifier for a host-side object participating in the reference graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct HostKey(pub u64);

/// An endpoint of an external reference edge.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ExternalNode {
  Object(GcObject),
  Host(HostKey),
}

impl From<GcObject> for ExternalNode {
  fn from(value: GcObject) -> Self {
    Self::Object(value)
  }
}

impl From<HostKey> for ExternalNode {
  fn from(value: HostKey) -> Self {
    Self::Host(value)
  }
}

/// Counted edge set consulted by the collector's mark phase.
#[derive(Debug, Default)]
pub(crate) struct ExternalReferences {
  edges: AHashMap<ExternalNode, AHashMap<ExternalNode, usize>>,
  host_roots: AHashMap<HostKey, usize>,
}

impl ExternalReferences {
  pub(crate) fn add(&mut self, owner: ExternalNode, target: ExternalNode) {
    *self.edges.entry(owner).or_default().entry(target).or_insert(0) += 1;
  }

  /// Removes one registration of `owner -> target`. Returns `false` if no such edge exists.
  pub(crate) fn remove(&mut self, owner: ExternalNode, target: ExternalNode) -> bool {
    let Some(targets) = self.edges.get_mut(&owner) else {
      return false;
    };
    let Some(count) = targets.get_mut(&target) else {
      return false;
    };
    *count -= 1;
    if *count == 0 {
      targets.remove(&target);
      if targets.is_empty() {
        self.edges.remove(&owner);
      }
    }
    true
  }

  pub(crate) fn count(&self, owner: ExternalNode, target: ExternalNode) -> usize {
    self
      .edges
      .get(&owner)
      .and_then(|targets| targets.get(&target))
      .copied()
      .unwrap_or(0)
  }

  pub(crate) fn edge_count(&self) -> usize {
    self.edges.values().map(|targets| targets.len()).sum()
  }

  pub(crate) fn targets(&self, owner: ExternalNode) -> impl Iterator<Item = ExternalNode> + '_ {
    self
      .edges
      .get(&owner)
      .into_iter()
      .flat_map(|targets| targets.keys().copied())
  }

  pub(crate) fn add_host_root(&mut self, key: HostKey) {
    *self.host_roots.entry(key).or_insert(0) += 1;
  }

  pub(crate) fn remove_host_root(&mut self, key: HostKey) -> bool {
    let Some(count) = self.host_roots.get_mut(&key) else {
      return false;
    };
    *count -= 1;
    if *count == 0 {
      self.host_roots.remove(&key);
    }
    true
  }

  pub(crate) fn host_roots(&self) -> impl Iterator<Item = HostKey> + '_ {
    self.host_roots.keys().copied()
  }

  /// Drops every edge that starts or ends at a collected object.
  pub(crate) fn prune(&mut self, is_live: impl Fn(GcObject) -> bool) {
    let node_is_live = |node: &ExternalNode| match node {
      ExternalNode::Object(obj) => is_live(*obj),
      ExternalNode::Host(_) => true,
    };
    self.edges.retain(|owner, targets| {
      if !node_is_live(owner) {
        return false;
      }
      targets.retain(|target, _| node_is_live(target));
      !targets.is_empty()
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn edges_are_counted() {
    let mut refs = ExternalReferences::default();
    let owner = ExternalNode::Host(HostKey(1));
    let target = ExternalNode::Host(HostKey(2));

    refs.add(owner, target);
    refs.add(owner, target);
    assert_eq!(refs.count(owner, target), 2);
    assert_eq!(refs.edge_count(), 1);

    assert!(refs.remove(owner, target));
    assert_eq!(refs.count(owner, target), 1);
    assert!(refs.remove(owner, target));
    assert!(!refs.remove(owner, target));
    assert_eq!(refs.edge_count(), 0);
  }

  #[test]
  fn host_roots_are_counted() {
    let mut refs = ExternalReferences::default();
    refs.add_host_root(HostKey(7));
    refs.add_host_root(HostKey(7));
    assert!(refs.remove_host_root(HostKey(7)));
    assert_eq!(refs.host_roots().count(), 1);
    assert!(refs.remove_host_root(HostKey(7)));
    assert!(!refs.remove_host_root(HostKey(7)));
  }
}

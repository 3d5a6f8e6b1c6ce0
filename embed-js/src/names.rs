use core::ops::Index;
use std::sync::Arc;

use ahash::AHashSet;

use crate::JsString;

/// Append-only collector handed to get-property-names callbacks.
///
/// The accumulator is borrowed for the duration of a single callback and cannot outlive it. Names
/// keep their insertion order; duplicates are allowed here and collapsed when the final
/// [`PropertyNameArray`] is built.
#[derive(Debug, Default)]
pub struct PropertyNameAccumulator {
  names: Vec<JsString>,
}

impl PropertyNameAccumulator {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub fn add_name(&mut self, name: impl Into<JsString>) {
    self.names.push(name.into());
  }

  /// Number of names added so far, duplicates included.
  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub(crate) fn finish(self) -> PropertyNameArray {
    PropertyNameArray::from_names(self.names)
  }
}

/// An immutable, reference-counted snapshot of property names.
///
/// Cloning retains the same snapshot. Names are unique, in order of first occurrence.
#[derive(Clone, Debug)]
pub struct PropertyNameArray(Arc<[JsString]>);

impl PropertyNameArray {
  /// Builds an array from `names`, keeping the first occurrence of each name.
  pub fn from_names(names: impl IntoIterator<Item = JsString>) -> Self {
    let mut seen = AHashSet::new();
    let unique: Vec<JsString> = names
      .into_iter()
      .filter(|name| seen.insert(name.clone()))
      .collect();
    Self(Arc::from(unique))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&JsString> {
    self.0.get(index)
  }

  pub fn iter(&self) -> impl Iterator<Item = &JsString> + '_ {
    self.0.iter()
  }

  pub fn contains(&self, name: &JsString) -> bool {
    self.0.contains(name)
  }

  pub fn as_slice(&self) -> &[JsString] {
    &self.0
  }

  /// Number of live references to this snapshot.
  pub fn ref_count(&self) -> usize {
    Arc::strong_count(&self.0)
  }
}

impl Index<usize> for PropertyNameArray {
  type Output = JsString;

  fn index(&self, index: usize) -> &JsString {
    &self.0[index]
  }
}

impl<'a> IntoIterator for &'a PropertyNameArray {
  type Item = &'a JsString;
  type IntoIter = core::slice::Iter<'a, JsString>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.iter()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn first_occurrence_wins() {
    let mut acc = PropertyNameAccumulator::new();
    acc.add_name("b");
    acc.add_name("a");
    acc.add_name("b");
    acc.add_name("c");
    assert_eq!(acc.len(), 4);

    let names = acc.finish();
    let names: Vec<String> = names.iter().map(|n| n.to_utf8_lossy()).collect();
    assert_eq!(names, ["b", "a", "c"]);
  }

  #[test]
  fn clone_is_retain() {
    let names = PropertyNameArray::from_names([JsString::from("x")]);
    let retained = names.clone();
    assert_eq!(names.ref_count(), 2);
    assert_eq!(retained[0], "x");
    assert!(retained.get(1).is_none());
  }
}

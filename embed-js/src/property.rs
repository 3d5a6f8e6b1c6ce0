use core::fmt;
use core::ops::{BitOr, BitOrAssign};

use crate::heap::{Trace, Tracer};
use crate::{JsString, Value};

/// Attribute flags for own properties and static class entries.
///
/// The bit values match the classic embedding API (`1 << 1`, `1 << 2`, `1 << 3`) so tables ported
/// from other hosts keep their meaning.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PropertyAttributes(u8);

impl PropertyAttributes {
  pub const NONE: Self = Self(0);
  /// Writes are silently ignored.
  pub const READ_ONLY: Self = Self(1 << 1);
  /// Skipped by property-name enumeration.
  pub const DONT_ENUM: Self = Self(1 << 2);
  /// Deletion always reports failure.
  pub const DONT_DELETE: Self = Self(1 << 3);

  pub const fn bits(self) -> u8 {
    self.0
  }

  /// Builds attributes from raw bits, dropping unknown bits.
  pub const fn from_bits_truncate(bits: u8) -> Self {
    Self(bits & (Self::READ_ONLY.0 | Self::DONT_ENUM.0 | Self::DONT_DELETE.0))
  }

  pub const fn contains(self, other: Self) -> bool {
    self.0 & other.0 == other.0
  }

  pub const fn is_read_only(self) -> bool {
    self.contains(Self::READ_ONLY)
  }

  pub const fn is_enumerable(self) -> bool {
    !self.contains(Self::DONT_ENUM)
  }

  pub const fn is_deletable(self) -> bool {
    !self.contains(Self::DONT_DELETE)
  }
}

impl BitOr for PropertyAttributes {
  type Output = Self;

  fn bitor(self, rhs: Self) -> Self {
    Self(self.0 | rhs.0)
  }
}

impl BitOrAssign for PropertyAttributes {
  fn bitor_assign(&mut self, rhs: Self) {
    self.0 |= rhs.0;
  }
}

impl fmt::Debug for PropertyAttributes {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut list = f.debug_set();
    if self.is_read_only() {
      list.entry(&"READ_ONLY");
    }
    if !self.is_enumerable() {
      list.entry(&"DONT_ENUM");
    }
    if !self.is_deletable() {
      list.entry(&"DONT_DELETE");
    }
    list.finish()
  }
}

/// An ordinary own property stored on an object.
#[derive(Debug, Clone)]
pub(crate) struct PropertyEntry {
  pub(crate) name: JsString,
  pub(crate) value: Value,
  pub(crate) attributes: PropertyAttributes,
}

impl Trace for PropertyEntry {
  fn trace(&self, tracer: &mut Tracer<'_>) {
    tracer.trace_value(&self.value);
  }
}

#[cfg(test)]
mod tests {
  use super::PropertyAttributes;

  #[test]
  fn attribute_bits() {
    let attrs = PropertyAttributes::READ_ONLY | PropertyAttributes::DONT_DELETE;
    assert_eq!(attrs.bits(), 0b1010);
    assert!(attrs.is_read_only());
    assert!(attrs.is_enumerable());
    assert!(!attrs.is_deletable());
    assert_eq!(PropertyAttributes::from_bits_truncate(0xff).bits(), 0b1110);
  }
}

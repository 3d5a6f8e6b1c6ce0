use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An immutable JavaScript string.
///
/// Strings are sequences of UTF-16 code units and may contain unpaired surrogate code units.
/// Property names, class names and function names are all `JsString`s. Cloning is cheap: the code
/// units are shared behind an `Arc`.
#[derive(Clone)]
pub struct JsString {
  units: Arc<[u16]>,
  hash64: u64,
}

impl JsString {
  pub fn from_code_units(units: &[u16]) -> Self {
    let hash64 = stable_hash64(units);
    Self {
      units: Arc::from(units),
      hash64,
    }
  }

  pub fn from_u16_vec(units: Vec<u16>) -> Self {
    let hash64 = stable_hash64(&units);
    Self {
      units: Arc::from(units),
      hash64,
    }
  }

  pub fn len_code_units(&self) -> usize {
    self.units.len()
  }

  pub fn is_empty(&self) -> bool {
    self.units.is_empty()
  }

  pub fn as_code_units(&self) -> &[u16] {
    self.units.as_ref()
  }

  pub fn to_utf8_lossy(&self) -> String {
    String::from_utf16_lossy(self.as_code_units())
  }

  /// Compares against UTF-8 text without allocating.
  pub fn eq_str(&self, other: &str) -> bool {
    self.units.iter().copied().eq(other.encode_utf16())
  }

  /// Parses this string as a canonical array index (`"0"`, `"1"`, ... without leading zeros).
  pub fn as_array_index(&self) -> Option<u32> {
    let units = self.as_code_units();
    if units.is_empty() || (units.len() > 1 && units[0] == b'0' as u16) {
      return None;
    }
    let mut n: u32 = 0;
    for &unit in units {
      if !(b'0' as u16..=b'9' as u16).contains(&unit) {
        return None;
      }
      n = n.checked_mul(10)?.checked_add((unit - b'0' as u16) as u32)?;
    }
    // 2^32 - 1 is not an array index.
    (n != u32::MAX).then_some(n)
  }

  pub fn stable_hash64(&self) -> u64 {
    self.hash64
  }
}

impl From<&str> for JsString {
  fn from(value: &str) -> Self {
    Self::from_u16_vec(value.encode_utf16().collect())
  }
}

impl From<String> for JsString {
  fn from(value: String) -> Self {
    Self::from(value.as_str())
  }
}

impl From<&String> for JsString {
  fn from(value: &String) -> Self {
    Self::from(value.as_str())
  }
}

impl From<u32> for JsString {
  fn from(value: u32) -> Self {
    Self::from(value.to_string())
  }
}

impl PartialEq for JsString {
  fn eq(&self, other: &Self) -> bool {
    self.hash64 == other.hash64 && self.units == other.units
  }
}

impl Eq for JsString {}

impl PartialEq<str> for JsString {
  fn eq(&self, other: &str) -> bool {
    self.eq_str(other)
  }
}

impl PartialEq<&str> for JsString {
  fn eq(&self, other: &&str) -> bool {
    self.eq_str(other)
  }
}

impl Hash for JsString {
  fn hash<H: Hasher>(&self, state: &mut H) {
    state.write_u64(self.hash64);
  }
}

impl PartialOrd for JsString {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for JsString {
  fn cmp(&self, other: &Self) -> Ordering {
    self.units.as_ref().cmp(other.units.as_ref())
  }
}

impl fmt::Debug for JsString {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Rust `String` cannot represent lone surrogates; use a lossy conversion so
    // Debug never panics.
    write!(f, "{:?}", self.to_utf8_lossy())
  }
}

impl fmt::Display for JsString {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_utf8_lossy())
  }
}

const FNV_OFFSET_BASIS_64: u64 = 0xcbf29ce484222325;
const FNV_PRIME_64: u64 = 0x00000100000001B3;

fn stable_hash64(units: &[u16]) -> u64 {
  let mut hash = FNV_OFFSET_BASIS_64;
  for unit in units {
    for byte in unit.to_le_bytes() {
      hash ^= byte as u64;
      hash = hash.wrapping_mul(FNV_PRIME_64);
    }
  }
  hash
}

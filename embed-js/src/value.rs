use crate::{GcObject, JsString};

/// A JavaScript value.
///
/// Strings are immutable shared buffers and live outside the GC heap; objects are GC-managed
/// handles.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
  /// The JavaScript `undefined` value.
  #[default]
  Undefined,
  /// The JavaScript `null` value.
  Null,
  /// A JavaScript boolean.
  Bool(bool),
  /// A JavaScript number (IEEE-754 double).
  Number(f64),
  /// A JavaScript string.
  String(JsString),
  /// A GC-managed object.
  Object(GcObject),
}

/// The type of a [`Value`], also used as the conversion hint passed to convert-to-type callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JsType {
  Undefined,
  Null,
  Boolean,
  Number,
  String,
  Object,
}

impl Value {
  pub fn js_type(&self) -> JsType {
    match self {
      Value::Undefined => JsType::Undefined,
      Value::Null => JsType::Null,
      Value::Bool(_) => JsType::Boolean,
      Value::Number(_) => JsType::Number,
      Value::String(_) => JsType::String,
      Value::Object(_) => JsType::Object,
    }
  }

  pub fn as_object(&self) -> Option<GcObject> {
    match self {
      Value::Object(o) => Some(*o),
      _ => None,
    }
  }

  pub fn is_undefined(&self) -> bool {
    matches!(self, Value::Undefined)
  }

  /// ECMAScript `SameValue(x, y)`.
  ///
  /// This differs from `==`/`===` for Numbers:
  /// - `NaN` is the same as `NaN`
  /// - `+0` and `-0` are distinct
  pub fn same_value(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Number(a), Value::Number(b)) => {
        if a.is_nan() && b.is_nan() {
          return true;
        }
        if *a == 0.0 && *b == 0.0 {
          // Distinguish +0 and -0.
          return a.to_bits() == b.to_bits();
        }
        a == b
      }
      (a, b) => a == b,
    }
  }
}

/// ECMAScript `Number::toString` for finite and non-finite doubles.
pub(crate) fn number_to_string(n: f64) -> String {
  if n.is_nan() {
    "NaN".to_string()
  } else if n.is_infinite() {
    if n.is_sign_negative() {
      "-Infinity".to_string()
    } else {
      "Infinity".to_string()
    }
  } else if n == 0.0 {
    // `ToString(-0)` is `"0"` in ECMAScript.
    "0".to_string()
  } else {
    let mut buf = ryu::Buffer::new();
    let formatted = buf.format(n);
    // `ryu` formats `1.0` as `"1.0"`, but ECMAScript `ToString(1)` is `"1"`.
    formatted
      .strip_suffix(".0")
      .unwrap_or(formatted)
      .to_string()
  }
}

/// ECMAScript `StringToNumber`: decimal literals, unsigned `0x`/`0o`/`0b` integer literals,
/// `Infinity`, and surrounding whitespace.
pub(crate) fn string_to_number(s: &JsString) -> f64 {
  let text = s.to_utf8_lossy();
  let trimmed = text.trim();
  if trimmed.is_empty() {
    return 0.0;
  }
  if let Some(n) = non_decimal_integer(trimmed) {
    return n;
  }
  match trimmed {
    "Infinity" | "+Infinity" => f64::INFINITY,
    "-Infinity" => f64::NEG_INFINITY,
    // Rust accepts spellings like "inf" and "nan" that JavaScript does not.
    t if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
    t => t.parse::<f64>().unwrap_or(f64::NAN),
  }
}

fn non_decimal_integer(text: &str) -> Option<f64> {
  let radix = match text.get(..2)? {
    "0x" | "0X" => 16,
    "0o" | "0O" => 8,
    "0b" | "0B" => 2,
    _ => return None,
  };
  let digits = &text[2..];
  if digits.is_empty() {
    return Some(f64::NAN);
  }
  // Accumulate in f64: literals may exceed u64.
  let value = digits.chars().try_fold(0.0f64, |acc, c| {
    c.to_digit(radix)
      .map(|digit| acc * f64::from(radix) + f64::from(digit))
  });
  Some(value.unwrap_or(f64::NAN))
}

impl From<bool> for Value {
  fn from(value: bool) -> Self {
    Self::Bool(value)
  }
}

impl From<f64> for Value {
  fn from(value: f64) -> Self {
    Self::Number(value)
  }
}

impl From<JsString> for Value {
  fn from(value: JsString) -> Self {
    Self::String(value)
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Self::String(JsString::from(value))
  }
}

impl From<GcObject> for Value {
  fn from(value: GcObject) -> Self {
    Self::Object(value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn number_formatting() {
    assert_eq!(number_to_string(1.0), "1");
    assert_eq!(number_to_string(-0.0), "0");
    assert_eq!(number_to_string(1.5), "1.5");
    assert_eq!(number_to_string(f64::NAN), "NaN");
    assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
  }

  #[test]
  fn string_parsing() {
    assert_eq!(string_to_number(&"  12 ".into()), 12.0);
    assert_eq!(string_to_number(&"".into()), 0.0);
    assert_eq!(string_to_number(&"1e3".into()), 1000.0);
    assert!(string_to_number(&"inf".into()).is_nan());
    assert!(string_to_number(&"abc".into()).is_nan());
  }

  #[test]
  fn string_parsing_radix_prefixes() {
    assert_eq!(string_to_number(&"0x10".into()), 16.0);
    assert_eq!(string_to_number(&" 0XfF ".into()), 255.0);
    assert_eq!(string_to_number(&"0o17".into()), 15.0);
    assert_eq!(string_to_number(&"0b101".into()), 5.0);
    assert_eq!(
      string_to_number(&"0x10000000000000000".into()),
      18446744073709551616.0
    );
    assert!(string_to_number(&"0x".into()).is_nan());
    assert!(string_to_number(&"0b102".into()).is_nan());
    // Signs are only allowed on decimal literals.
    assert!(string_to_number(&"-0x10".into()).is_nan());
  }

  #[test]
  fn same_value_distinguishes_zeroes() {
    assert!(Value::Number(f64::NAN).same_value(&Value::Number(f64::NAN)));
    assert!(!Value::Number(0.0).same_value(&Value::Number(-0.0)));
    assert!(Value::from("a").same_value(&Value::from("a")));
  }
}

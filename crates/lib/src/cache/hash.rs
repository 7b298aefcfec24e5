//! Order-independent hashing of descriptor values.
//!
//! The digest is defined recursively over strings, lists and maps:
//!
//! - a string is the SHA-1 of its UTF-8 bytes
//! - a list is the SHA-1 of `digest(item) + "\n"` for each item in order
//! - a map is the SHA-1 of `digest(value) + "\n"` for each entry, sorted by key
//!
//! Keys contribute only through their ordering, so two maps with the same
//! entries hash identically whatever order they were built in. Numbers,
//! booleans and null have no defined digest and are rejected.

use serde::Serialize;
use serde_json::Value;
use sha1::{Digest as _, Sha1};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
  #[error("cannot hash a {kind} value; descriptors may only hold strings, lists and maps")]
  UnsupportedType { kind: &'static str },

  #[error("failed to serialize value for hashing: {0}")]
  Serialize(#[source] serde_json::Error),
}

fn sha1_hex(data: &[u8]) -> String {
  format!("{:x}", Sha1::digest(data))
}

pub fn stable_sha(value: &Value) -> Result<String, HashError> {
  match value {
    Value::String(s) => Ok(sha1_hex(s.as_bytes())),
    Value::Array(items) => {
      let mut joined = String::new();
      for item in items {
        joined.push_str(&stable_sha(item)?);
        joined.push('\n');
      }
      Ok(sha1_hex(joined.as_bytes()))
    }
    Value::Object(map) => {
      let mut entries: Vec<_> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));
      let mut joined = String::new();
      for (_, v) in entries {
        joined.push_str(&stable_sha(v)?);
        joined.push('\n');
      }
      Ok(sha1_hex(joined.as_bytes()))
    }
    Value::Number(_) => Err(HashError::UnsupportedType { kind: "number" }),
    Value::Bool(_) => Err(HashError::UnsupportedType { kind: "boolean" }),
    Value::Null => Err(HashError::UnsupportedType { kind: "null" }),
  }
}

/// Serialize `value` to JSON and hash the result with [`stable_sha`].
pub fn stable_sha_of<T: Serialize>(value: &T) -> Result<String, HashError> {
  let value = serde_json::to_value(value).map_err(HashError::Serialize)?;
  stable_sha(&value)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn string_is_plain_sha1() {
    assert_eq!(
      stable_sha(&json!("abc")).unwrap(),
      "a9993e364706816aba3e25717850c26c9cd0d89d"
    );
  }

  #[test]
  fn map_ignores_insertion_order() {
    let mut first = serde_json::Map::new();
    first.insert("platform".into(), json!("linux"));
    first.insert("compiler".into(), json!("gcc"));
    first.insert("variant".into(), json!("src"));

    let mut second = serde_json::Map::new();
    second.insert("variant".into(), json!("src"));
    second.insert("platform".into(), json!("linux"));
    second.insert("compiler".into(), json!("gcc"));

    assert_eq!(
      stable_sha(&Value::Object(first)).unwrap(),
      stable_sha(&Value::Object(second)).unwrap()
    );
  }

  #[test]
  fn map_is_hash_of_sorted_value_digests() {
    let value = json!({"b": "2", "a": "1"});
    let expected = sha1_hex(format!("{}\n{}\n", sha1_hex(b"1"), sha1_hex(b"2")).as_bytes());
    assert_eq!(stable_sha(&value).unwrap(), expected);
  }

  #[test]
  fn every_list_element_counts() {
    let short = stable_sha(&json!(["a"])).unwrap();
    let long = stable_sha(&json!(["a", "b"])).unwrap();
    assert_ne!(short, long);
    assert_ne!(stable_sha(&json!(["a", "b"])).unwrap(), stable_sha(&json!(["b", "a"])).unwrap());
  }

  #[test]
  fn nested_values_change_the_digest() {
    let base = json!({"name": "log", "traits": {"compiler": "gcc"}});
    let other = json!({"name": "log", "traits": {"compiler": "clang"}});
    assert_ne!(stable_sha(&base).unwrap(), stable_sha(&other).unwrap());
  }

  #[test]
  fn unsupported_types_are_errors() {
    for value in [json!(1), json!(true), json!(null), json!({"a": [1]})] {
      assert!(matches!(stable_sha(&value), Err(HashError::UnsupportedType { .. })), "{value}");
    }
  }
}

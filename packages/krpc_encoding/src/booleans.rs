//! Bencode has no boolean type; BEP-5 messages encode booleans as the
//! integers `0`/`1`. These helpers bridge that to a plain Rust `bool`.

use serde::{de::Error as DeError, Deserialize, Deserializer};

pub fn is_false(value: &bool) -> bool {
    !value
}

pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = i64::deserialize(deserializer)?;
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(DeError::custom(format!(
            "expected 0 or 1 for boolean field, got {other}"
        ))),
    }
}

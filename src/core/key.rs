use super::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

const SEPARATOR: char = ':';

/// Anything that can be located by `(item_id, collection_id)`.
pub trait Keyed {
    fn item_id(&self) -> &str;
    fn collection_id(&self) -> &str;
}

/// Stable identity of a record across the catalog and every cart.
///
/// Only produced by [`derive_key`], so two keys are equal exactly when
/// they were derived from the same `(item_id, collection_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the key back into `(item_id, collection_id)`.
    pub fn parts(&self) -> Result<(String, String)> {
        let (collection, item) = self
            .0
            .split_once(SEPARATOR)
            .ok_or_else(|| SyncError::KeyDerivation(format!("malformed key '{}'", self.0)))?;
        Ok((unescape(item)?, unescape(collection)?))
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdentityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the identity key of `(item_id, collection_id)`.
///
/// Both fields are escaped so the separator can never appear inside
/// them, which keeps the encoding injective for arbitrary input.
pub fn derive_key(item_id: &str, collection_id: &str) -> Result<IdentityKey> {
    if item_id.is_empty() {
        return Err(SyncError::KeyDerivation(format!(
            "empty item_id in collection '{}'",
            collection_id
        )));
    }
    if collection_id.is_empty() {
        return Err(SyncError::KeyDerivation(format!(
            "empty collection_id for item '{}'",
            item_id
        )));
    }

    let mut key = String::with_capacity(item_id.len() + collection_id.len() + 1);
    escape_into(&mut key, collection_id);
    key.push(SEPARATOR);
    escape_into(&mut key, item_id);
    Ok(IdentityKey(key))
}

pub fn derive_key_from_record<R: Keyed + ?Sized>(record: &R) -> Result<IdentityKey> {
    derive_key(record.item_id(), record.collection_id())
}

fn escape_into(out: &mut String, field: &str) {
    for ch in field.chars() {
        match ch {
            '%' => out.push_str("%25"),
            SEPARATOR => out.push_str("%3A"),
            other => out.push(other),
        }
    }
}

fn unescape(field: &str) -> Result<String> {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3);
        match code {
            Some("25") => out.push('%'),
            Some("3A") => out.push(SEPARATOR),
            _ => {
                return Err(SyncError::KeyDerivation(format!(
                    "bad escape in key field '{}'",
                    field
                )));
            }
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_is_deterministic() {
        let a = derive_key("nft1", "col1").unwrap();
        let b = derive_key("nft1", "col1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "col1:nft1");
    }

    #[test]
    fn test_separator_inside_fields_does_not_collide() {
        let a = derive_key("b:c", "a").unwrap();
        let b = derive_key("c", "a:b").unwrap();
        assert_ne!(a, b);

        let c = derive_key("%3A", "x").unwrap();
        let d = derive_key(":", "x").unwrap();
        assert_ne!(c, d);
    }

    #[test]
    fn test_empty_fields_are_rejected() {
        assert!(matches!(derive_key("", "col"), Err(SyncError::KeyDerivation(_))));
        assert!(matches!(derive_key("item", ""), Err(SyncError::KeyDerivation(_))));
    }

    #[test]
    fn test_parts_decodes_escaped_fields() {
        let key = derive_key("50%:off", "col:1").unwrap();
        let (item, collection) = key.parts().unwrap();
        assert_eq!(item, "50%:off");
        assert_eq!(collection, "col:1");
    }
}

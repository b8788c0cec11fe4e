use crate::errors::ServiceError;
use serde::Serialize;
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// Name of the field that carries the digest; never part of the signed values.
pub const SIGNATURE_FIELD: &str = "signature";

/// Signs any request whose serialized form is a flat JSON object.
///
/// String-valued fields other than `signature` are collected, ordered by field name,
/// empty values dropped, the password prepended, joined with `|` and SHA-1 hashed.
/// Non-string values take no part in the digest.
pub fn sign<T: Serialize>(password: &str, request: &T) -> Result<String, ServiceError> {
    let value = serde_json::to_value(request)?;
    let object = match value {
        Value::Object(map) => map,
        other => {
            return Err(ServiceError::SerializationError(format!(
                "signed request must serialize to an object, got {}",
                other
            )))
        }
    };

    let fields: BTreeMap<&str, &str> = object
        .iter()
        .filter(|(name, _)| name.as_str() != SIGNATURE_FIELD)
        .filter_map(|(name, value)| value.as_str().map(|v| (name.as_str(), v)))
        .collect();

    Ok(sign_fields(password, &fields))
}

/// Digest over already-collected `name -> value` pairs.
pub fn sign_fields(password: &str, fields: &BTreeMap<&str, &str>) -> String {
    let mut parts = Vec::with_capacity(fields.len() + 1);
    parts.push(password);
    parts.extend(
        fields
            .iter()
            .filter(|(name, value)| **name != SIGNATURE_FIELD && !value.is_empty())
            .map(|(_, value)| *value),
    );

    let mut hasher = Sha1::new();
    hasher.update(parts.join("|").as_bytes());
    hex::encode(hasher.finalize())
}

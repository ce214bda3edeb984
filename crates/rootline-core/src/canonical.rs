//! Canonical JSON encoding for signature computation
//!
//! The bytes that are signed and the bytes that are verified must be
//! identical, so a single canonical encoder is used across the whole stack.
//! Canonical JSON sorts object keys, emits no insignificant whitespace, and
//! rejects floating-point values.

use crate::error::Result;
use olpc_cjson::CanonicalFormatter;
use serde::Serialize;

/// Serialize a value into its canonical JSON form.
///
/// This is the only encoding used for signing payloads and for deriving
/// key IDs. The stored (pretty-printed) form of a document is never signed
/// directly; it is re-canonicalized first.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
    value.serialize(&mut ser)?;
    Ok(data)
}

/// Serialize a value the way it is written to disk: pretty-printed with
/// tab indentation, matching the hand-audited ceremony artifacts.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut data, formatter);
    value.serialize(&mut ser)?;
    Ok(data)
}

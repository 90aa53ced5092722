//! Type-preserving text codec for BSON documents.
//!
//! Each document becomes one line of canonical MongoDB Extended JSON v2.
//! Every value JSON cannot represent natively carries an explicit `$` tag
//! (`$oid`, `$date`, `$binary`, `$numberDecimal`, `$regularExpression`, ...)
//! and even numbers are tagged (`$numberInt`, `$numberLong`,
//! `$numberDouble`), so decoding never has to guess a type.
//!
//! Decoding also accepts relaxed Extended JSON, which is what older backups
//! contain, and the legacy `{"$regex", "$options"}` and
//! `{"$binary": <base64>, "$type": <hex>}` forms.

use bson::{Bson, Document, RawDocument};
use serde_json::{Map, Value, json};

use crate::error::{BackupError, BackupResult};

/// Revision of the record format written by [`encode`].
pub const FORMAT_VERSION: u32 = 2;

/// Name of the record format, stored next to [`FORMAT_VERSION`].
pub const FORMAT_NAME: &str = "extjson-canonical";

/// Every key Extended JSON v2 uses as a type marker.
const KNOWN_TAGS: &[&str] = &[
    "$oid",
    "$symbol",
    "$numberInt",
    "$numberLong",
    "$numberDouble",
    "$numberDecimal",
    "$numberDecimalBytes",
    "$binary",
    "$uuid",
    "$code",
    "$scope",
    "$timestamp",
    "$regularExpression",
    "$dbPointer",
    "$ref",
    "$id",
    "$db",
    "$date",
    "$minKey",
    "$maxKey",
    "$undefined",
];

/// Encode a document as one canonical Extended JSON line.
pub fn encode(document: &Document) -> String {
    Bson::Document(document.clone())
        .into_canonical_extjson()
        .to_string()
}

/// Encode a document straight from the wire format.
///
/// Fails when the raw bytes cannot be materialised, e.g. a string element
/// holding invalid UTF-8.
pub fn encode_raw(raw: &RawDocument) -> BackupResult<String> {
    Ok(encode(&materialize(raw)?))
}

/// Parse wire-format bytes into an owned document.
pub fn materialize(raw: &RawDocument) -> BackupResult<Document> {
    Document::try_from(raw).map_err(|e| BackupError::malformed(0, e.to_string()))
}

/// Decode one text record back into a document.
pub fn decode(record: &str) -> BackupResult<Document> {
    decode_line(record, 0)
}

/// Decode one text record, reporting `line` in any error.
pub fn decode_line(record: &str, line: u64) -> BackupResult<Document> {
    let value: Value =
        serde_json::from_str(record).map_err(|e| BackupError::malformed(line, e.to_string()))?;

    if !value.is_object() {
        return Err(BackupError::malformed(line, "record is not a JSON object"));
    }
    let value = upgrade_legacy(value);
    check_tags(&value).map_err(|tag| {
        BackupError::malformed(line, format!("unrecognized type tag '{}'", tag))
    })?;

    match Bson::try_from(value) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(other) => Err(BackupError::malformed(
            line,
            format!("record decodes to {}, not a document", bson_type_name(&other)),
        )),
        Err(e) => Err(BackupError::malformed(line, e.to_string())),
    }
}

/// Rewrite legacy regex and binary objects into their v2 shape.
fn upgrade_legacy(value: Value) -> Value {
    match value {
        Value::Object(map) => match legacy_tagged(&map) {
            Some(upgraded) => upgraded,
            None => Value::Object(
                map.into_iter()
                    .map(|(key, nested)| (key, upgrade_legacy(nested)))
                    .collect(),
            ),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(upgrade_legacy).collect()),
        other => other,
    }
}

fn legacy_tagged(map: &Map<String, Value>) -> Option<Value> {
    if map.len() != 2 {
        return None;
    }
    if let (Some(Value::String(pattern)), Some(Value::String(options))) =
        (map.get("$regex"), map.get("$options"))
    {
        return Some(json!({
            "$regularExpression": { "pattern": pattern, "options": options }
        }));
    }
    if let (Some(Value::String(base64)), Some(Value::String(sub_type))) =
        (map.get("$binary"), map.get("$type"))
    {
        return Some(json!({
            "$binary": { "base64": base64, "subType": sub_type }
        }));
    }
    None
}

/// Reject objects using a `$` key that is not an Extended JSON marker.
fn check_tags(value: &Value) -> Result<(), String> {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if key.starts_with('$') && !KNOWN_TAGS.contains(&key.as_str()) {
                    return Err(key.clone());
                }
                check_tags(nested)?;
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(check_tags),
        _ => Ok(()),
    }
}

/// Extended JSON name of a value's BSON type.
pub fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::JavaScriptCode(_) => "javascript",
        Bson::JavaScriptCodeWithScope(_) => "javascriptWithScope",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Timestamp(_) => "timestamp",
        Bson::Binary(b) if b.subtype == bson::spec::BinarySubtype::Uuid => "uuid",
        Bson::Binary(_) => "binData",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "date",
        Bson::Symbol(_) => "symbol",
        Bson::Decimal128(_) => "decimal",
        Bson::Undefined => "undefined",
        Bson::MaxKey => "maxKey",
        Bson::MinKey => "minKey",
        Bson::DbPointer(_) => "dbPointer",
    }
}

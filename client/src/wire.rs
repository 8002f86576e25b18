//! Wire encoding of values and operations for the batch envelope.
//!
//! Scalars cross the wire as plain JSON; everything JSON cannot express
//! natively travels as a `__type`-tagged object, and queued mutations as a
//! `__op`-tagged object. Pointer encoding consults the context registry:
//! a persisted target embeds its real identity, a newborn target its
//! temporary local id, which the server resolves within the envelope.

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use tether_engine::{Context, Error, OpKind, Operation, RecordRef, ServerDelta, Value};

/// Encode a field value. `field` only labels type errors.
pub fn encode_value(value: &Value, ctx: &Context, field: &str) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Number(n) => encode_number(*n, field)?,
        Value::String(s) => json!(s),
        Value::Array(items) => Json::Array(
            items
                .iter()
                .map(|item| encode_value(item, ctx, field))
                .collect::<Result<_>>()?,
        ),
        Value::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (key, entry) in entries {
                map.insert(key.clone(), encode_value(entry, ctx, field)?);
            }
            Json::Object(map)
        }
        Value::Pointer(reference) => encode_pointer(reference, ctx)?,
        Value::Relation(refs) => json!({
            "__type": "Relation",
            "objects": refs
                .iter()
                .map(|r| encode_pointer(r, ctx))
                .collect::<Result<Vec<_>>>()?,
        }),
        Value::Date(date) => json!({
            "__type": "Date",
            "iso": date.to_rfc3339_opts(SecondsFormat::Millis, true),
        }),
        Value::Bytes(bytes) => json!({
            "__type": "Bytes",
            "hex": hex::encode(bytes),
        }),
    })
}

fn encode_number(n: f64, field: &str) -> Result<Json> {
    serde_json::Number::from_f64(n)
        .map(Json::Number)
        .ok_or_else(|| {
            Error::InvalidType {
                field: field.to_string(),
                expected: "a finite number".to_string(),
                got: "number".to_string(),
            }
            .into()
        })
}

fn encode_pointer(reference: &RecordRef, ctx: &Context) -> Result<Json> {
    if !ctx.contains(reference) {
        return Err(Error::NotFound(format!(
            "record '{}/{}' is not registered in this context",
            reference.class, reference.local_id
        ))
        .into());
    }
    Ok(match ctx.identity_of(reference) {
        Some(identity) => json!({
            "__type": "Pointer",
            "className": reference.class,
            "objectId": identity,
        }),
        None => json!({
            "__type": "Pointer",
            "className": reference.class,
            "localId": reference.local_id,
        }),
    })
}

/// Encode one queued operation.
pub fn encode_operation(op: &Operation, ctx: &Context) -> Result<Json> {
    let field = op.target().to_string();
    let objects = |payload: Option<&Value>| -> Result<Json> {
        match payload {
            Some(Value::Array(items)) => Ok(Json::Array(
                items
                    .iter()
                    .map(|item| encode_value(item, ctx, &field))
                    .collect::<Result<_>>()?,
            )),
            Some(Value::Relation(refs)) => Ok(Json::Array(
                refs.iter()
                    .map(|r| encode_pointer(r, ctx))
                    .collect::<Result<_>>()?,
            )),
            _ => Ok(Json::Array(Vec::new())),
        }
    };

    Ok(match op.kind() {
        OpKind::Set => {
            let payload = op.payload().unwrap_or(&Value::Null);
            encode_value(payload, ctx, &field)?
        }
        OpKind::Delete => json!({ "__op": "Delete" }),
        OpKind::Increment => {
            let amount = op.payload().and_then(Value::as_number).unwrap_or(0.0);
            json!({ "__op": "Increment", "amount": encode_number(amount, &field)? })
        }
        OpKind::Add => json!({ "__op": "Add", "objects": objects(op.payload())? }),
        OpKind::AddUnique => json!({ "__op": "AddUnique", "objects": objects(op.payload())? }),
        OpKind::Remove => json!({ "__op": "Remove", "objects": objects(op.payload())? }),
        OpKind::AddRelation => {
            json!({ "__op": "AddRelation", "objects": objects(op.payload())? })
        }
        OpKind::RemoveRelation => {
            json!({ "__op": "RemoveRelation", "objects": objects(op.payload())? })
        }
    })
}

/// Encode a per-field operation table into a sub-request body.
pub fn encode_table(table: &BTreeMap<String, Operation>, ctx: &Context) -> Result<Json> {
    let mut body = serde_json::Map::new();
    for (field, op) in table {
        body.insert(field.clone(), encode_operation(op, ctx)?);
    }
    Ok(Json::Object(body))
}

/// Decode a server value into the field model. Unknown tagged shapes fall
/// back to plain maps; decoding is deliberately lenient.
pub fn decode_value(json: &Json, ctx: &Context) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => {
            Value::Array(items.iter().map(|item| decode_value(item, ctx)).collect())
        }
        Json::Object(map) => decode_object(map, ctx),
    }
}

fn decode_object(map: &serde_json::Map<String, Json>, ctx: &Context) -> Value {
    match map.get("__type").and_then(Json::as_str) {
        Some("Pointer") => {
            if let Some(reference) = decode_pointer(map, ctx) {
                return Value::Pointer(reference);
            }
        }
        Some("Relation") => {
            if let Some(Json::Array(objects)) = map.get("objects") {
                let refs = objects
                    .iter()
                    .filter_map(|o| o.as_object())
                    .filter_map(|o| decode_pointer(o, ctx))
                    .collect();
                return Value::Relation(refs);
            }
        }
        Some("Date") => {
            if let Some(date) = map
                .get("iso")
                .and_then(Json::as_str)
                .and_then(parse_rfc3339)
            {
                return Value::Date(date);
            }
        }
        Some("Bytes") => {
            if let Some(bytes) = map
                .get("hex")
                .and_then(Json::as_str)
                .and_then(|s| hex::decode(s).ok())
            {
                return Value::Bytes(bytes);
            }
        }
        _ => {}
    }

    Value::Map(
        map.iter()
            .map(|(key, entry)| (key.clone(), decode_value(entry, ctx)))
            .collect(),
    )
}

fn decode_pointer(map: &serde_json::Map<String, Json>, ctx: &Context) -> Option<RecordRef> {
    let class = map.get("className").and_then(Json::as_str)?;
    let identity = map.get("objectId").and_then(Json::as_str)?;
    Some(ctx.record_for(class, identity).reference())
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Decode a save outcome payload into the delta merged back into the
/// record: assigned identity, server timestamps, and any overwritten or
/// computed fields.
pub fn decode_delta(json: &Json, ctx: &Context) -> ServerDelta {
    let Some(map) = json.as_object() else {
        return ServerDelta::default();
    };

    let mut delta = ServerDelta {
        identity: map
            .get("objectId")
            .and_then(Json::as_str)
            .map(str::to_string),
        created_at: map
            .get("createdAt")
            .and_then(Json::as_str)
            .and_then(parse_rfc3339),
        updated_at: map
            .get("updatedAt")
            .and_then(Json::as_str)
            .and_then(parse_rfc3339),
        fields: BTreeMap::new(),
    };

    for (key, entry) in map {
        if matches!(key.as_str(), "objectId" | "createdAt" | "updatedAt") {
            continue;
        }
        delta.fields.insert(key.clone(), decode_value(entry, ctx));
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_engine::ServerId;

    #[test]
    fn scalars_encode_as_plain_json() {
        let ctx = Context::new();
        assert_eq!(
            encode_value(&Value::from("hi"), &ctx, "f").unwrap(),
            json!("hi")
        );
        assert_eq!(
            encode_value(&Value::Number(2.0), &ctx, "f").unwrap(),
            json!(2.0)
        );
        assert_eq!(encode_value(&Value::Null, &ctx, "f").unwrap(), Json::Null);
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let ctx = Context::new();
        let err = encode_value(&Value::Number(f64::NAN), &ctx, "score").unwrap_err();
        assert!(err.to_string().contains("score"));
    }

    #[test]
    fn persisted_pointer_embeds_identity() {
        let ctx = Context::new();
        let author = ctx.record_for("author", "a9");
        let encoded =
            encode_value(&Value::Pointer(author.reference()), &ctx, "author").unwrap();

        assert_eq!(
            encoded,
            json!({"__type": "Pointer", "className": "author", "objectId": "a9"})
        );
    }

    #[test]
    fn newborn_pointer_embeds_local_id() {
        let ctx = Context::new();
        let author = ctx.create("author");
        let encoded =
            encode_value(&Value::Pointer(author.reference()), &ctx, "author").unwrap();

        assert_eq!(
            encoded,
            json!({
                "__type": "Pointer",
                "className": "author",
                "localId": author.local_id(),
            })
        );
    }

    #[test]
    fn unregistered_pointer_is_not_found() {
        let ctx = Context::new();
        let stray = RecordRef::new("ghost", "nowhere");
        let err = encode_value(&Value::Pointer(stray), &ctx, "f").unwrap_err();
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn operations_encode_with_op_tags() {
        let ctx = Context::new();

        let inc = Operation::increment("score", 3.0).unwrap();
        assert_eq!(
            encode_operation(&inc, &ctx).unwrap(),
            json!({"__op": "Increment", "amount": 3.0})
        );

        let del = Operation::delete("score").unwrap();
        assert_eq!(encode_operation(&del, &ctx).unwrap(), json!({"__op": "Delete"}));

        let add = Operation::add("tags", vec![Value::from("a")]).unwrap();
        assert_eq!(
            encode_operation(&add, &ctx).unwrap(),
            json!({"__op": "Add", "objects": ["a"]})
        );
    }

    #[test]
    fn set_encodes_as_bare_value() {
        let ctx = Context::new();
        let set = Operation::set("name", Value::from("Ari")).unwrap();
        assert_eq!(encode_operation(&set, &ctx).unwrap(), json!("Ari"));
    }

    #[test]
    fn relation_operation_encodes_pointer_objects() {
        let ctx = Context::new();
        let friend = ctx.record_for("player", "p2");
        let op =
            Operation::add_relation("friends", [friend.reference()].into_iter().collect())
                .unwrap();

        assert_eq!(
            encode_operation(&op, &ctx).unwrap(),
            json!({
                "__op": "AddRelation",
                "objects": [
                    {"__type": "Pointer", "className": "player", "objectId": "p2"}
                ],
            })
        );
    }

    #[test]
    fn decode_pointer_registers_record() {
        let ctx = Context::new();
        let value = decode_value(
            &json!({"__type": "Pointer", "className": "author", "objectId": "a1"}),
            &ctx,
        );

        let reference = value.as_pointer().unwrap();
        assert_eq!(reference.class, "author");
        assert_eq!(
            ctx.identity_of(reference),
            Some(ServerId::from("a1"))
        );
    }

    #[test]
    fn decode_date_and_bytes() {
        let ctx = Context::new();

        let date = decode_value(
            &json!({"__type": "Date", "iso": "2026-03-01T12:00:00.000Z"}),
            &ctx,
        );
        assert!(date.as_date().is_some());

        let bytes = decode_value(&json!({"__type": "Bytes", "hex": "deadbeef"}), &ctx);
        assert_eq!(bytes, Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn unknown_tagged_object_decodes_as_map() {
        let ctx = Context::new();
        let value = decode_value(&json!({"__type": "File", "name": "x"}), &ctx);
        assert!(value.as_map().is_some());
    }

    #[test]
    fn date_roundtrip() {
        let ctx = Context::new();
        let now = Utc::now();
        let encoded = encode_value(&Value::Date(now), &ctx, "f").unwrap();
        let decoded = decode_value(&encoded, &ctx);

        // Millisecond precision on the wire
        let decoded = decoded.as_date().unwrap();
        assert_eq!(decoded.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn decode_delta_splits_identity_timestamps_and_fields() {
        let ctx = Context::new();
        let delta = decode_delta(
            &json!({
                "objectId": "p1",
                "createdAt": "2026-03-01T12:00:00.000Z",
                "updatedAt": "2026-03-02T12:00:00.000Z",
                "rank": 4,
            }),
            &ctx,
        );

        assert_eq!(delta.identity.as_deref(), Some("p1"));
        assert!(delta.created_at.is_some());
        assert!(delta.updated_at.is_some());
        assert_eq!(delta.fields["rank"], Value::Number(4.0));
        assert!(!delta.fields.contains_key("objectId"));
    }
}

//! Dotted field-path resolution against nested map values.

use crate::error::{Error, Result};
use crate::operation::FieldPath;
use crate::value::Value;
use std::collections::BTreeMap;

/// Resolve a path against a record's field table.
///
/// Fails with [`Error::NotFound`] if any segment is absent or a
/// non-terminal segment is not a map.
pub fn resolve<'a>(fields: &'a BTreeMap<String, Value>, path: &FieldPath) -> Result<&'a Value> {
    let (head, rest) = split(path);
    let mut current = fields
        .get(head)
        .ok_or_else(|| Error::NotFound(path.to_string()))?;

    for segment in rest {
        let map = current
            .as_map()
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        current = map
            .get(segment)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
    }
    Ok(current)
}

/// Rewrite the slot a path addresses.
///
/// `f` receives the current slot content (`None` when absent) and returns
/// the new content (`None` removes the slot). Missing or non-map
/// intermediate segments are carved out as empty maps on the way down.
pub fn apply<F>(fields: &mut BTreeMap<String, Value>, path: &FieldPath, f: F)
where
    F: FnOnce(Option<Value>) -> Option<Value>,
{
    let (head, rest) = split(path);

    if rest.is_empty() {
        write_slot(fields, head, f);
        return;
    }

    let mut current = fields
        .entry(head.to_string())
        .and_modify(|v| {
            if !matches!(v, Value::Map(_)) {
                *v = Value::Map(BTreeMap::new());
            }
        })
        .or_insert_with(|| Value::Map(BTreeMap::new()));

    for segment in &rest[..rest.len() - 1] {
        let Value::Map(map) = current else { unreachable!() };
        current = map
            .entry(segment.to_string())
            .and_modify(|v| {
                if !matches!(v, Value::Map(_)) {
                    *v = Value::Map(BTreeMap::new());
                }
            })
            .or_insert_with(|| Value::Map(BTreeMap::new()));
    }

    let Value::Map(map) = current else { unreachable!() };
    write_slot(map, rest.last().map(String::as_str).unwrap_or_default(), f);
}

fn write_slot<F>(map: &mut BTreeMap<String, Value>, key: &str, f: F)
where
    F: FnOnce(Option<Value>) -> Option<Value>,
{
    if let Some(value) = f(map.remove(key)) {
        map.insert(key.to_string(), value);
    }
}

fn split(path: &FieldPath) -> (&str, &[String]) {
    let segments = path.segments();
    (&segments[0], &segments[1..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(key: &str) -> FieldPath {
        FieldPath::parse(key).unwrap()
    }

    fn fields_with_nested() -> BTreeMap<String, Value> {
        let mut inner = BTreeMap::new();
        inner.insert("wins".to_string(), Value::Number(3.0));

        let mut fields = BTreeMap::new();
        fields.insert("stats".to_string(), Value::Map(inner));
        fields.insert("name".to_string(), Value::from("Ari"));
        fields
    }

    #[test]
    fn resolve_plain_field() {
        let fields = fields_with_nested();
        assert_eq!(resolve(&fields, &path("name")).unwrap(), &Value::from("Ari"));
    }

    #[test]
    fn resolve_nested_field() {
        let fields = fields_with_nested();
        assert_eq!(
            resolve(&fields, &path("stats.wins")).unwrap(),
            &Value::Number(3.0)
        );
    }

    #[test]
    fn resolve_missing_terminal_is_not_found() {
        let fields = fields_with_nested();
        let err = resolve(&fields, &path("stats.losses")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn resolve_missing_intermediate_is_not_found() {
        let fields = fields_with_nested();
        let err = resolve(&fields, &path("meta.flags.dark")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn resolve_through_non_map_is_not_found() {
        let fields = fields_with_nested();
        let err = resolve(&fields, &path("name.length")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn apply_writes_plain_field() {
        let mut fields = BTreeMap::new();
        apply(&mut fields, &path("name"), |_| Some(Value::from("Ari")));
        assert_eq!(fields["name"], Value::from("Ari"));
    }

    #[test]
    fn apply_removes_field() {
        let mut fields = fields_with_nested();
        apply(&mut fields, &path("name"), |_| None);
        assert!(!fields.contains_key("name"));
    }

    #[test]
    fn apply_carves_intermediate_maps() {
        let mut fields = BTreeMap::new();
        apply(&mut fields, &path("meta.flags.dark"), |_| {
            Some(Value::Bool(true))
        });

        let meta = fields["meta"].as_map().unwrap();
        let flags = meta["flags"].as_map().unwrap();
        assert_eq!(flags["dark"], Value::Bool(true));
    }

    #[test]
    fn apply_sees_existing_slot() {
        let mut fields = fields_with_nested();
        apply(&mut fields, &path("stats.wins"), |slot| {
            let n = slot.and_then(|v| v.as_number()).unwrap_or(0.0);
            Some(Value::Number(n + 1.0))
        });
        assert_eq!(
            resolve(&fields, &path("stats.wins")).unwrap(),
            &Value::Number(4.0)
        );
    }
}

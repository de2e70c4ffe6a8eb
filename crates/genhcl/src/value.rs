//! helpers on evaluated [hcl::Value]s
//!
//! The evaluator hands back plain [hcl::Value]s. The generation pipeline only cares about a few shapes:
//! - booleans (conditions, inherit, assertions)
//! - strings and lists of strings (labels, messages)
//! - iterable collections (`tm_dynamic.for_each`)
//! - objects (`tm_dynamic.attributes`)
use hcl::Value;

/// Name of the value's type as shown in error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "tuple",
        Value::Object(_) => "object",
    }
}

pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

/// Accepts a list whose elements are all strings
pub fn as_string_list(value: Value) -> Result<Vec<String>, String> {
    let elements = match value {
        Value::Array(elements) => elements,
        other => {
            return Err(format!(
                "must be a list of strings, got {}",
                type_name(&other)
            ))
        }
    };

    elements
        .into_iter()
        .enumerate()
        .map(|(idx, element)| match element {
            Value::String(s) => Ok(s),
            other => Err(format!(
                "element {idx} has type {} but must be string",
                type_name(&other)
            )),
        })
        .collect()
}

/// Key/value pairs of an iterable collection
///
/// Lists yield their index as key. Objects yield their keys in lexical order, independent of declaration order.
/// Everything else is not iterable.
pub fn iter_elements(value: Value) -> Option<Vec<(Value, Value)>> {
    match value {
        Value::Array(elements) => Some(
            elements
                .into_iter()
                .enumerate()
                .map(|(idx, element)| (Value::Number(hcl::Number::from(idx as u64)), element))
                .collect(),
        ),
        Value::Object(object) => {
            let mut entries: Vec<_> = object.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Some(
                entries
                    .into_iter()
                    .map(|(key, element)| (Value::String(key), element))
                    .collect(),
            )
        }
        _ => None,
    }
}

/// Whether `name` can be used as an hcl attribute name
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    (first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn string(s: &str) -> Value {
        Value::String(s.to_string())
    }

    #[test]
    fn objects_iterate_in_key_order() {
        let mut object = hcl::value::Map::new();
        object.insert("b".to_string(), Value::Number(2u64.into()));
        object.insert("a".to_string(), Value::Number(1u64.into()));

        let keys: Vec<_> = iter_elements(Value::Object(object))
            .expect("objects are iterable")
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        assert_eq!(keys, vec![string("a"), string("b")]);
    }

    #[test]
    fn strings_are_not_iterable() {
        assert!(iter_elements(string("abc")).is_none());
        assert!(iter_elements(Value::Null).is_none());
    }

    #[test]
    fn string_lists() {
        let list = Value::Array(vec![string("a"), string("b")]);
        assert_eq!(as_string_list(list), Ok(vec!["a".to_string(), "b".to_string()]));

        let mixed = Value::Array(vec![string("a"), Value::Bool(true)]);
        assert!(as_string_list(mixed).is_err());
        assert!(as_string_list(string("a")).is_err());
    }

    #[test]
    fn identifiers() {
        assert!(is_valid_identifier("name"));
        assert!(is_valid_identifier("_name-2"));
        assert!(!is_valid_identifier("2name"));
        assert!(!is_valid_identifier("a b"));
        assert!(!is_valid_identifier(""));
    }
}

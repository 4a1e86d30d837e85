//! Helpers over `serde_yaml::Value` trees

use serde_yaml::{Mapping, Value};

/// Merge `overlay` into `base`
///
/// Mappings merge key by key, recursively. Anything else (sequences, scalars,
/// a mapping replacing a scalar) replaces the base value structurally.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Insert `value` at a dotted path, creating intermediate mappings
///
/// `insert_path(map, "client_encryption_options.enabled", true)` yields
/// `{client_encryption_options: {enabled: true}}`. Intermediate scalars are
/// replaced by mappings.
pub fn insert_path(map: &mut Mapping, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = map;
    while let Some(segment) = segments.next() {
        let key = Value::String(segment.to_string());
        if segments.peek().is_none() {
            current.insert(key, value);
            return;
        }
        let entry = current
            .entry(key)
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if !entry.is_mapping() {
            *entry = Value::Mapping(Mapping::new());
        }
        current = match entry {
            Value::Mapping(next) => next,
            _ => unreachable!("entry was just made a mapping"),
        };
    }
}

/// Look up a dotted path
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

/// Read a port number from a number or numeric string
pub fn as_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a boolean from a bool or `true`/`false` string
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Read a scalar as a string
pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_merge_preserves_unspecified_defaults() {
        let mut base = yaml("cluster_name: Test\nnative_transport_port: 9042\nseeds: [a]\n");
        deep_merge(&mut base, &yaml("native_transport_port: 9142\n"));

        assert_eq!(base["cluster_name"], yaml("Test"));
        assert_eq!(as_port(&base["native_transport_port"]), Some(9142));
        assert_eq!(base["seeds"], yaml("[a]"));
    }

    #[test]
    fn test_merge_nested_blocks_structurally() {
        let mut base = yaml(
            "client_encryption_options:\n  enabled: false\n  keystore: conf/.keystore\n  cipher_suites: [A, B]\n",
        );
        deep_merge(
            &mut base,
            &yaml("client_encryption_options:\n  enabled: true\n  cipher_suites: [C]\n"),
        );

        let options = &base["client_encryption_options"];
        assert_eq!(as_bool(&options["enabled"]), Some(true));
        assert_eq!(options["keystore"], yaml("conf/.keystore"));
        assert_eq!(options["cipher_suites"], yaml("[C]"));
    }

    #[test]
    fn test_insert_and_get_path() {
        let mut map = Mapping::new();
        insert_path(&mut map, "client_encryption_options.enabled", Value::Bool(true));
        insert_path(&mut map, "client_encryption_options.optional", Value::Bool(false));
        insert_path(&mut map, "cluster_name", Value::String("x".into()));

        let value = Value::Mapping(map);
        assert_eq!(
            get_path(&value, "client_encryption_options.enabled").and_then(as_bool),
            Some(true)
        );
        assert_eq!(get_path(&value, "client_encryption_options.missing"), None);
        assert_eq!(get_path(&value, "cluster_name").and_then(as_string).as_deref(), Some("x"));
    }

    #[test]
    fn test_insert_path_replaces_scalar_parent() {
        let mut map = Mapping::new();
        insert_path(&mut map, "a", Value::Bool(true));
        insert_path(&mut map, "a.b", Value::Bool(false));
        assert_eq!(get_path(&Value::Mapping(map), "a.b").and_then(as_bool), Some(false));
    }

    #[test]
    fn test_scalar_conversions() {
        assert_eq!(as_port(&yaml("'7000'")), Some(7000));
        assert_eq!(as_port(&yaml("70000")), None);
        assert_eq!(as_bool(&yaml("'TRUE'")), Some(true));
        assert_eq!(as_bool(&yaml("1")), None);
    }
}

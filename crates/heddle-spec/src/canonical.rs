use serde::Serialize;

/// Canonical pretty form: sorted keys, two-space indent, LF, trailing
/// newline. Repeated serialization of equal values is byte-identical.
///
/// Sorting falls out of routing through [`serde_json::Value`], whose object
/// representation keeps keys ordered.
pub fn canonical_pretty<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let mut out = serde_json::to_string_pretty(&value)?;
    out.push('\n');
    Ok(out)
}

/// Canonical compact form; the digest input.
pub fn canonical_compact<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{canonical_compact, canonical_pretty};

    #[test]
    fn keys_are_sorted() {
        let mut map = HashMap::new();
        map.insert("zebra", 1);
        map.insert("alpha", 2);
        map.insert("mid", 3);
        let compact = canonical_compact(&map).unwrap();
        assert_eq!(compact, r#"{"alpha":2,"mid":3,"zebra":1}"#);
    }

    #[test]
    fn pretty_ends_with_newline_and_uses_two_spaces() {
        let mut map = HashMap::new();
        map.insert("key", "value");
        let pretty = canonical_pretty(&map).unwrap();
        assert_eq!(pretty, "{\n  \"key\": \"value\"\n}\n");
    }
}

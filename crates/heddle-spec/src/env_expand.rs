/// Expand `${VAR}` references in a spec-provided environment value.
///
/// Unknown variables expand to the empty string; a literal `$` not followed
/// by `{` passes through unchanged. There is no recursion: the replacement
/// text is emitted verbatim.
pub fn expand_vars(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if let Some(replacement) = lookup(name) {
                    out.push_str(&replacement);
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference; keep the text as written.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::expand_vars;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/ferris".to_string()),
            "PORT" => Some("8188".to_string()),
            _ => None,
        }
    }

    #[test]
    fn expands_known_variables() {
        assert_eq!(
            expand_vars("${HOME}/models:${PORT}", lookup),
            "/home/ferris/models:8188"
        );
    }

    #[test]
    fn unknown_variables_expand_to_empty() {
        assert_eq!(expand_vars("x${NOPE}y", lookup), "xy");
    }

    #[test]
    fn literal_dollars_and_unterminated_refs_pass_through() {
        assert_eq!(expand_vars("cost: $5", lookup), "cost: $5");
        assert_eq!(expand_vars("broken ${HOME", lookup), "broken ${HOME");
        assert_eq!(expand_vars("no refs", lookup), "no refs");
    }
}

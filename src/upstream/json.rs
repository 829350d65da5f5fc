//! JSON decoding helpers for upstream payloads.

use anyhow::Result;

/// Decode a response body. On failure the error names the serde path, the
/// type mismatch and a snippet of the offending line.
pub fn parse_json_with_context<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let jd = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(jd).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let msg = inner.to_string();
        let msg = msg
            .strip_suffix(&format!(" at line {line} column {column}"))
            .unwrap_or(&msg);

        let path = err.path().to_string();
        let at = if path.is_empty() || path == "." {
            String::new()
        } else {
            format!("at path '{path}': ")
        };
        anyhow::anyhow!(
            "{at}{} (line {line} col {column})\n{}",
            describe_mismatch(msg),
            build_error_snippet(body, line, column, 20)
        )
    })
}

/// Decode an already-parsed value (e.g. a cached payload), reporting the
/// serde path of the first mismatch.
pub fn from_value_with_path<T: serde::de::DeserializeOwned>(
    value: &serde_json::Value,
) -> Result<T> {
    serde_path_to_error::deserialize(value).map_err(|err| {
        let path = err.path().to_string();
        anyhow::anyhow!("at path '{path}': {}", describe_mismatch(&err.inner().to_string()))
    })
}

/// `"invalid type: X, expected Y"` becomes `"expected Y, got X"`. Anything
/// else (missing fields, syntax errors) is returned unchanged.
fn describe_mismatch(msg: &str) -> String {
    msg.strip_prefix("invalid type: ")
        .and_then(|rest| rest.split_once(", expected "))
        .map(|(got, expected)| format!("expected {expected}, got {got}"))
        .unwrap_or_else(|| msg.to_string())
}

fn build_error_snippet(body: &str, line: usize, column: usize, context_len: usize) -> String {
    let target_line = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if target_line.is_empty() {
        return "(empty line)".to_string();
    }

    // column is 1-based
    let error_idx = column.saturating_sub(1).min(target_line.len());

    let half_len = context_len / 2;
    let mut start = error_idx.saturating_sub(half_len);
    let mut end = (error_idx + half_len).min(target_line.len());
    while !target_line.is_char_boundary(start) {
        start -= 1;
    }
    while !target_line.is_char_boundary(end) {
        end += 1;
    }

    let slice = &target_line[start..end];
    let indicator = " ".repeat(error_idx - start) + "^";

    format!("...{slice}...\n   {indicator}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Page {
        #[allow(dead_code)]
        data: Vec<Item>,
    }

    #[derive(Debug, Deserialize)]
    struct Item {
        #[allow(dead_code)]
        id: String,
    }

    #[test]
    fn invalid_type_reads_expected_first() {
        let msg = "invalid type: null, expected a string";
        assert_eq!(describe_mismatch(msg), "expected a string, got null");
    }

    #[test]
    fn other_messages_pass_through() {
        assert_eq!(describe_mismatch("missing field `id`"), "missing field `id`");
    }

    #[test]
    fn syntax_error_drops_location_suffix() {
        let err = parse_json_with_context::<Page>("{").unwrap_err().to_string();
        assert!(err.starts_with("EOF while parsing"), "{err}");
        assert!(!err.contains(" at line "), "{err}");
    }

    #[test]
    fn error_names_the_failing_path() {
        let body = r#"{"data": [{"id": "a"}, {"id": 7}]}"#;
        let err = parse_json_with_context::<Page>(body).unwrap_err().to_string();
        assert!(err.contains("data[1].id"), "{err}");
        assert!(err.contains("expected a string, got integer"), "{err}");
    }

    #[test]
    fn value_errors_name_the_path() {
        let value = serde_json::json!({ "data": [{ "id": null }] });
        let err = from_value_with_path::<Page>(&value).unwrap_err().to_string();
        assert!(err.contains("data[0].id"), "{err}");
    }

    #[test]
    fn snippet_handles_multibyte_text() {
        let body = r#"{"data": [{"id": "é€"}], "x": }"#;
        let err = parse_json_with_context::<Page>(body).unwrap_err().to_string();
        assert!(err.contains('^'));
    }
}

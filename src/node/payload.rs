//! Flat string-record payload codec.
//!
//! The wire payload is a deliberately restricted structural-JSON subset: one
//! flat object whose keys and values are all strings, one pair per line.
//! Nested objects, arrays, numbers and booleans are out of scope.

use crate::utils::WeathersetError;

/// Parses a flat payload into its key-value fields, preserving field order.
/// The payload must be brace-enclosed and every field colon-delimited.
pub fn parse(raw: &str) -> Result<Vec<(String, String)>, WeathersetError> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| {
            WeathersetError::msg("payload missing enclosing braces")
        })?;

    let mut fields = Vec::new();
    for field in inner.trim().split(",\n") {
        let (key, value) = field.split_once(':').ok_or_else(|| {
            WeathersetError::msg(format!(
                "invalid key-value field '{}'",
                field.trim()
            ))
        })?;
        fields.push((strip_quotes(key), strip_quotes(value)));
    }

    Ok(fields)
}

/// Renders key-value fields into the canonical payload form: one indented
/// `"key": "value"` pair per line, comma-separated, brace-enclosed.
pub fn render(fields: &[(String, String)]) -> String {
    let mut out = String::from("{\n");
    for (i, (key, value)) in fields.iter().enumerate() {
        out.push_str(&format!("    \"{}\": \"{}\"", key, value));
        if i + 1 < fields.len() {
            out.push(',');
        }
        out.push('\n');
    }
    out.push('}');
    out
}

/// Extracts the value of the `id` field identifying the station. Fails on a
/// malformed payload or when no `id` field is present.
pub fn extract_id(raw: &str) -> Result<String, WeathersetError> {
    for (key, value) in parse(raw)? {
        if key == "id" {
            return Ok(value);
        }
    }
    Err(WeathersetError::msg("no 'id' field in payload"))
}

/// Indents every line of a payload by four spaces, for embedding records
/// inside the "get all" array body.
pub fn indent(raw: &str) -> String {
    raw.lines()
        .map(|line| format!("    {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_quotes(part: &str) -> String {
    part.trim().replace('"', "")
}

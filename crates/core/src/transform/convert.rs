//! Format conversion stages: Markdown→HTML, CSV↔JSON, YAML→JSON.
//!
//! CSV↔JSON works over order-preserving JSON maps so a convert-and-back
//! keeps both row order and column order.

use crate::error::{FsError, FsResult};
use pulldown_cmark::{html, Options, Parser};
use serde_json::Value;

fn utf8(bytes: &[u8]) -> FsResult<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| FsError::InvalidInput(format!("input is not UTF-8: {e}")))
}

/// Render CommonMark (plus tables and strikethrough) to an HTML fragment.
pub fn markdown_to_html(bytes: &[u8]) -> FsResult<Vec<u8>> {
    let text = utf8(bytes)?;
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_FOOTNOTES);
    let parser = Parser::new_ext(text, options);
    let mut out = String::with_capacity(text.len() * 2);
    html::push_html(&mut out, parser);
    Ok(out.into_bytes())
}

/// Headered CSV to a JSON array of objects, one object per row.
pub fn csv_to_json(bytes: &[u8], delimiter: u8) -> FsResult<Vec<u8>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| FsError::InvalidInput(format!("bad csv header: {e}")))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| FsError::InvalidInput(format!("bad csv row: {e}")))?;
        let mut obj = serde_json::Map::new();
        for (header, field) in headers.iter().zip(record.iter()) {
            obj.insert(header.to_string(), Value::String(field.to_string()));
        }
        rows.push(Value::Object(obj));
    }

    serde_json::to_vec_pretty(&Value::Array(rows))
        .map_err(|e| FsError::Internal(format!("json encode: {e}")))
}

/// JSON array of objects back to headered CSV. Headers come from the first
/// object's key order; rows follow array order; missing keys become empty
/// fields.
pub fn json_to_csv(bytes: &[u8], delimiter: u8) -> FsResult<Vec<u8>> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| FsError::InvalidInput(format!("bad json: {e}")))?;
    let rows = value
        .as_array()
        .ok_or_else(|| FsError::InvalidInput("expected a json array of objects".into()))?;

    let mut writer = csv::WriterBuilder::new().delimiter(delimiter).from_writer(Vec::new());

    let headers: Vec<String> = match rows.first() {
        Some(Value::Object(obj)) => obj.keys().cloned().collect(),
        Some(_) => {
            return Err(FsError::InvalidInput("array elements must be objects".into()));
        }
        None => Vec::new(),
    };

    if !headers.is_empty() {
        writer
            .write_record(&headers)
            .map_err(|e| FsError::Internal(format!("csv encode: {e}")))?;
        for row in rows {
            let obj = row
                .as_object()
                .ok_or_else(|| FsError::InvalidInput("array elements must be objects".into()))?;
            let fields: Vec<String> = headers
                .iter()
                .map(|h| match obj.get(h) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect();
            writer
                .write_record(&fields)
                .map_err(|e| FsError::Internal(format!("csv encode: {e}")))?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| FsError::Internal(format!("csv flush: {e}")))
}

/// YAML document to pretty-printed JSON.
pub fn yaml_to_json(bytes: &[u8]) -> FsResult<Vec<u8>> {
    let value: serde_yaml::Value = serde_yaml::from_slice(bytes)
        .map_err(|e| FsError::InvalidInput(format!("bad yaml: {e}")))?;
    let json: Value = serde_json::to_value(&value)
        .map_err(|e| FsError::InvalidInput(format!("yaml not representable as json: {e}")))?;
    serde_json::to_vec_pretty(&json).map_err(|e| FsError::Internal(format!("json encode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_heading_renders() {
        let out = markdown_to_html(b"# T").unwrap();
        let html = String::from_utf8(out).unwrap();
        assert!(html.contains("<h1>T</h1>"), "got: {html}");
    }

    #[test]
    fn markdown_rejects_non_utf8() {
        assert!(markdown_to_html(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn csv_to_json_objects_per_row() {
        let csv = b"name,size\nalpha,1\nbeta,2\n";
        let out = csv_to_json(csv, b',').unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        let rows = value.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "alpha");
        assert_eq!(rows[1]["size"], "2");
    }

    #[test]
    fn csv_json_round_trip_preserves_rows_and_columns() {
        let csv = "name,size,kind\nalpha,1,x\nbeta,2,y\ngamma,3,z\n";
        let json = csv_to_json(csv.as_bytes(), b',').unwrap();
        let back = json_to_csv(&json, b',').unwrap();
        assert_eq!(String::from_utf8(back).unwrap(), csv);
    }

    #[test]
    fn json_to_csv_fills_missing_keys() {
        let json = br#"[{"a":"1","b":"2"},{"a":"3"}]"#;
        let out = json_to_csv(json, b',').unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a,b\n1,2\n3,\n");
    }

    #[test]
    fn json_to_csv_rejects_non_arrays() {
        assert!(json_to_csv(br#"{"a":1}"#, b',').is_err());
        assert!(json_to_csv(br#"[1,2,3]"#, b',').is_err());
    }

    #[test]
    fn custom_delimiter() {
        let out = csv_to_json(b"a;b\n1;2\n", b';').unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value[0]["b"], "2");
    }

    #[test]
    fn yaml_to_json_maps_and_lists() {
        let yaml = b"name: alpha\nitems:\n  - 1\n  - 2\n";
        let out = yaml_to_json(yaml).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["name"], "alpha");
        assert_eq!(value["items"][1], 2);
    }

    #[test]
    fn bad_yaml_is_invalid_input() {
        let err = yaml_to_json(b"{unclosed").unwrap_err();
        assert!(matches!(err, FsError::InvalidInput(_)));
    }
}

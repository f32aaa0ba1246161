//! Request body formatting.

use crate::definition::BodyFormat;
use crate::ops::text_form;
use crate::xml::value_to_xml;

/// Serialize a resolved body value per the declared format.
pub fn format_body(value: &serde_json::Value, format: BodyFormat) -> String {
    match format {
        BodyFormat::Json => serde_json::to_string(value).unwrap_or_default(),
        BodyFormat::Xml => value_to_xml(value),
        BodyFormat::Text => text_form(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_body() {
        let body = format_body(&serde_json::json!({"id": 7}), BodyFormat::Json);
        assert_eq!(body, r#"{"id":7}"#);
    }

    #[test]
    fn test_xml_body() {
        let body = format_body(&serde_json::json!({"user": {"id": 7}}), BodyFormat::Xml);
        assert_eq!(body, "<user><id>7</id></user>");
    }

    #[test]
    fn test_text_body() {
        assert_eq!(format_body(&serde_json::json!("raw"), BodyFormat::Text), "raw");
        assert_eq!(format_body(&serde_json::json!(42), BodyFormat::Text), "42");
    }
}

use std::collections::BTreeMap;

use base64::Engine;
use serde::Serialize;

use bridge_api::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    /// UTF-8, invalid sequences replaced.
    Text,
    Base64,
}

#[derive(Serialize)]
struct Line<'a> {
    headers: &'a BTreeMap<String, String>,
    body: String,
}

/// One JSON line: `{"headers":{...},"body":"..."}`.
pub fn format_event(event: &Event, encoding: BodyEncoding) -> Result<String, serde_json::Error> {
    let body = match encoding {
        BodyEncoding::Text => String::from_utf8_lossy(event.body()).into_owned(),
        BodyEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(event.body()),
    };
    serde_json::to_string(&Line { headers: event.headers(), body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_body_is_inlined() {
        let event = Event::with_body("hello").header("peer", "10.0.0.1:5000");
        assert_eq!(
            format_event(&event, BodyEncoding::Text).unwrap(),
            r#"{"headers":{"peer":"10.0.0.1:5000"},"body":"hello"}"#
        );
    }

    #[test]
    fn binary_body_as_base64() {
        let event = Event::with_body(vec![0xff, 0x00, 0x10]);
        assert_eq!(format_event(&event, BodyEncoding::Base64).unwrap(), r#"{"headers":{},"body":"/wAQ"}"#);
        // lossy text keeps the line valid JSON
        let text = format_event(&event, BodyEncoding::Text).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&text).is_ok());
    }
}

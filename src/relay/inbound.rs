use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

use super::error::DecodeError;

/// Literal escape sequence that publishers use in place of a line break
const ESCAPED_LINE_BREAK: &str = "\\r\\n";

/// JSON as published on the bus, after key canonicalization. Binary fields
/// are base64 strings and may be `null`.
#[derive(Deserialize, Default)]
#[serde(default)]
struct WireMessage {
    server: String,
    client_id: String,
    client_secret: String,
    user: String,
    pass: String,
    message: String,
    image: Option<String>,
    images: Option<Vec<Option<String>>>,
}

/// Maps a key to its field name. Matching ignores case and accepts the
/// field names of older publishers (`MastodonClientID` and friends).
fn canonical_key(key: &str) -> Option<&'static str> {
    let field = match key.to_ascii_lowercase().as_str() {
        "server" | "mastodonserver" => "server",
        "client_id" | "mastodonclientid" => "client_id",
        "client_secret" | "mastodonclientsecret" => "client_secret",
        "user" | "mastodonuser" => "user",
        "pass" | "mastodonpass" => "pass",
        "message" => "message",
        "image" => "image",
        "images" => "images",
        _ => return None,
    };
    Some(field)
}

/// Later keys win over earlier ones naming the same field; `null` leaves the
/// field untouched. Unknown keys are dropped.
fn canonicalize(value: Value) -> Result<Map<String, Value>, serde_json::Error> {
    let Value::Object(object) = value else {
        return Err(serde::de::Error::custom("expected a JSON object"));
    };

    let mut fields = Map::new();
    for (key, value) in object {
        if value.is_null() {
            continue;
        }
        if let Some(field) = canonical_key(&key) {
            fields.insert(field.to_string(), value);
        }
    }
    Ok(fields)
}

/// Line breaks inside a blob are wrapping, not data
fn decode_blob(index: usize, blob: &str) -> Result<Vec<u8>, DecodeError> {
    let unwrapped: String = blob.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
    STANDARD
        .decode(unwrapped)
        .map_err(|source| DecodeError::Media { index, source })
}

/// Decoded post request. The legacy singular attachment is already merged,
/// so `media` is the only attachment list anything downstream sees.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub server: String,
    pub client_id: String,
    pub client_secret: String,
    pub user: String,
    pub pass: String,
    pub message: String,
    pub media: Vec<Vec<u8>>,
}

impl InboundMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let raw: Value = serde_json::from_slice(payload)?;
        let wire: WireMessage = serde_json::from_value(Value::Object(canonicalize(raw)?))?;

        // A null element is an empty blob
        let mut encoded: Vec<String> = wire
            .images
            .unwrap_or_default()
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();
        if let Some(image) = wire.image.filter(|image| !image.is_empty()) {
            encoded.push(image);
        }

        let media = encoded
            .iter()
            .enumerate()
            .map(|(index, blob)| decode_blob(index, blob))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(InboundMessage {
            server: wire.server,
            client_id: wire.client_id,
            client_secret: wire.client_secret,
            user: wire.user,
            pass: wire.pass,
            message: wire.message,
            media,
        })
    }

    /// Messages without application credentials are not meant for posting
    pub fn has_posting_intent(&self) -> bool {
        !self.client_id.is_empty()
    }

    pub fn normalized_text(&self) -> String {
        normalize_line_breaks(&self.message)
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("server", &self.server)
            .field("client_id", &self.client_id)
            .field("user", &self.user)
            .field("message", &self.message)
            .field("media", &self.media.len())
            .finish_non_exhaustive()
    }
}

pub fn normalize_line_breaks(text: &str) -> String {
    text.replace(ESCAPED_LINE_BREAK, "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_all_fields() {
        let message = InboundMessage::decode(
            br#"{
                "server": "https://mastodon.example",
                "client_id": "a",
                "client_secret": "b",
                "user": "u",
                "pass": "p",
                "message": "hi",
                "images": ["aGVsbG8=", "d29ybGQ="]
            }"#,
        )
        .unwrap();

        assert_eq!(message.server, "https://mastodon.example");
        assert_eq!(message.client_id, "a");
        assert_eq!(message.client_secret, "b");
        assert_eq!(message.user, "u");
        assert_eq!(message.pass, "p");
        assert_eq!(message.message, "hi");
        assert_eq!(message.media, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[test]
    fn accepts_legacy_field_names_and_nulls() {
        let message = InboundMessage::decode(
            br#"{
                "MastodonServer": "",
                "MastodonClientID": "a",
                "MastodonClientSecret": "b",
                "MastodonUser": "u",
                "MastodonPass": "p",
                "Message": "hi",
                "Image": null,
                "Images": null
            }"#,
        )
        .unwrap();

        assert_eq!(message.client_id, "a");
        assert_eq!(message.pass, "p");
        assert!(message.media.is_empty());
    }

    #[test]
    fn keys_match_regardless_of_case() {
        let message = InboundMessage::decode(
            br#"{"mastodonclientid":"a","CLIENT_SECRET":"b","User":"u","MESSAGE":"hi"}"#,
        )
        .unwrap();

        assert_eq!(message.client_id, "a");
        assert_eq!(message.client_secret, "b");
        assert_eq!(message.user, "u");
        assert_eq!(message.message, "hi");
        assert!(message.has_posting_intent());
    }

    #[test]
    fn repeated_field_keeps_last_value() {
        let message =
            InboundMessage::decode(br#"{"message":"first","Message":"second","server":null}"#)
                .unwrap();
        assert_eq!(message.message, "second");
        assert_eq!(message.server, "");

        let message =
            InboundMessage::decode(br#"{"Message":"kept","message":null}"#).unwrap();
        assert_eq!(message.message, "kept");
    }

    #[test]
    fn null_image_entry_is_an_empty_blob() {
        let message =
            InboundMessage::decode(br#"{"client_id":"a","images":["aGVsbG8=",null]}"#).unwrap();
        assert_eq!(message.media, vec![b"hello".to_vec(), Vec::new()]);
    }

    #[test]
    fn wrapped_base64_is_accepted() {
        let message = InboundMessage::decode(
            br#"{"client_id":"a","images":["aGVs\nbG8="],"image":"d29y\r\nbGQ="}"#,
        )
        .unwrap();
        assert_eq!(message.media, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[test]
    fn legacy_image_matches_single_element_images() {
        let legacy =
            InboundMessage::decode(br#"{"client_id":"a","image":"aGVsbG8=","images":[]}"#)
                .unwrap();
        let plural = InboundMessage::decode(br#"{"client_id":"a","images":["aGVsbG8="]}"#)
            .unwrap();

        assert_eq!(legacy, plural);
    }

    #[test]
    fn legacy_image_is_appended_after_images() {
        let message = InboundMessage::decode(
            br#"{"client_id":"a","image":"d29ybGQ=","images":["aGVsbG8="]}"#,
        )
        .unwrap();
        assert_eq!(message.media, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let message = InboundMessage::decode(b"{}").unwrap();
        assert_eq!(message, InboundMessage::default());
        assert!(!message.has_posting_intent());
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        for payload in [&b"not json"[..], b"[1,2]", b"[]", b"null", br#"{"client_id": 5}"#] {
            assert!(matches!(
                InboundMessage::decode(payload),
                Err(DecodeError::Json(_))
            ));
        }
    }

    #[test]
    fn invalid_base64_names_the_attachment() {
        let err = InboundMessage::decode(br#"{"images":["aGVsbG8=","%%%"]}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Media { index: 1, .. }));
    }

    #[test]
    fn normalizes_only_escaped_line_breaks() {
        assert_eq!(normalize_line_breaks(r"hello\r\nworld"), "hello\nworld");
        assert_eq!(normalize_line_breaks(r"a\r\nb\r\nc"), "a\nb\nc");
        assert_eq!(normalize_line_breaks(r"keep \n and \r alone"), r"keep \n and \r alone");
        assert_eq!(normalize_line_breaks("real\r\nbreak"), "real\r\nbreak");
    }

    #[test]
    fn debug_hides_secrets() {
        let message = InboundMessage {
            client_secret: "top-secret".to_string(),
            pass: "hunter2".to_string(),
            ..InboundMessage::default()
        };
        let rendered = format!("{:?}", message);
        assert!(!rendered.contains("top-secret"));
        assert!(!rendered.contains("hunter2"));
    }
}

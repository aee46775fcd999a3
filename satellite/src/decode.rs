use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use tracing::debug;
use uuid::Uuid;

/// Webhook payload fields arrive in whatever escaping the satellite's
/// change-capture pipeline applied: `\x`-prefixed hex, bare hex, standard
/// or URL-safe base64, or plain text. Try the encodings in that order and
/// accept the first decoding that is round-trip stable; otherwise pass the
/// value through untouched.
pub fn decode_field(value: &str) -> String {
    if let Some(stripped) = value.strip_prefix("\\x") {
        if let Ok(bytes) = hex::decode(stripped) {
            if let Ok(text) = String::from_utf8(bytes) {
                debug!(encoding = "hex-escape", "webhook field decoded");
                return text;
            }
        }
    }

    if let Ok(bytes) = hex::decode(value) {
        if hex::encode(&bytes) == value.to_lowercase() {
            if let Ok(text) = String::from_utf8(bytes) {
                debug!(encoding = "hex", "webhook field decoded");
                return text;
            }
        }
    }

    if let Ok(bytes) = STANDARD.decode(value) {
        if STANDARD.encode(&bytes) == value {
            if let Ok(text) = String::from_utf8(bytes) {
                debug!(encoding = "base64", "webhook field decoded");
                return text;
            }
        }
    }

    if let Ok(bytes) = URL_SAFE_NO_PAD.decode(value) {
        if URL_SAFE_NO_PAD.encode(&bytes) == value {
            if let Ok(text) = String::from_utf8(bytes) {
                debug!(encoding = "base64url", "webhook field decoded");
                return text;
            }
        }
    }

    value.to_string()
}

/// Normalize a project/user id to the canonical hyphenated UUID form.
/// Accepts formatted UUIDs, bare 32-hex and `\x`-prefixed hex bytes.
pub fn normalize_uuid(value: &str) -> Option<String> {
    let value = value.trim();
    if let Some(stripped) = value.strip_prefix("\\x") {
        let bytes = hex::decode(stripped).ok()?;
        return Uuid::from_slice(&bytes).ok().map(|u| u.to_string());
    }
    Uuid::parse_str(value).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_escape_wins_first() {
        assert_eq!(decode_field("\\x676d61696c"), "gmail");
    }

    #[test]
    fn bare_hex_decodes_when_stable() {
        assert_eq!(decode_field("676d61696c"), "gmail");
    }

    #[test]
    fn standard_base64_decodes() {
        assert_eq!(decode_field("Z21haWw="), "gmail");
    }

    #[test]
    fn url_safe_base64_decodes() {
        // '>' forces URL-safe alphabet output on re-encode
        let encoded = URL_SAFE_NO_PAD.encode("a>b?c");
        assert_eq!(decode_field(&encoded), "a>b?c");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(decode_field("a@x/mail.json"), "a@x/mail.json");
        assert_eq!(decode_field(""), "");
    }

    #[test]
    fn uuid_forms_normalize() {
        let canonical = "0f9cf1f0-9ab7-4f2c-8e11-7c51d7a2c201";
        assert_eq!(normalize_uuid(canonical).as_deref(), Some(canonical));
        assert_eq!(
            normalize_uuid("0f9cf1f09ab74f2c8e117c51d7a2c201").as_deref(),
            Some(canonical)
        );
        assert_eq!(
            normalize_uuid("\\x0f9cf1f09ab74f2c8e117c51d7a2c201").as_deref(),
            Some(canonical)
        );
        assert_eq!(normalize_uuid("not-a-uuid"), None);
    }
}

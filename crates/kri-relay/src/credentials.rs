//! Portal login credentials.
//!
//! The portal's login forms carry the identity twice: base64-encoded in
//! `id`/`pw` (and the exec query), and in plain form in `uid`/`upw`.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Identity/secret pair in both encoded and plain form.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    id_b64: String,
    pw_b64: String,
    uid: String,
    upw: String,
}

impl Credentials {
    /// Build from an already-encoded pair.
    ///
    /// Plain values are decoded from the encoded ones unless given
    /// explicitly; input that is not valid base64 UTF-8 decodes to empty.
    pub fn from_encoded(
        id_b64: impl Into<String>,
        pw_b64: impl Into<String>,
        uid: Option<String>,
        upw: Option<String>,
    ) -> Self {
        let id_b64 = id_b64.into();
        let pw_b64 = pw_b64.into();
        let uid = uid
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| decode_or_empty(&id_b64));
        let upw = upw
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| decode_or_empty(&pw_b64));
        Self {
            id_b64,
            pw_b64,
            uid,
            upw,
        }
    }

    /// Build from a plaintext pair, encoding it with standard base64.
    pub fn from_plain(id: impl Into<String>, pw: impl Into<String>) -> Self {
        let uid = id.into();
        let upw = pw.into();
        Self {
            id_b64: STANDARD.encode(uid.as_bytes()),
            pw_b64: STANDARD.encode(upw.as_bytes()),
            uid,
            upw,
        }
    }

    pub fn id_b64(&self) -> &str {
        &self.id_b64
    }

    pub fn pw_b64(&self) -> &str {
        &self.pw_b64
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn upw(&self) -> &str {
        &self.upw
    }

    /// Both encoded halves are present.
    pub fn is_complete(&self) -> bool {
        !self.id_b64.is_empty() && !self.pw_b64.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("id_b64", &"<redacted>")
            .field("pw_b64", &"<redacted>")
            .field("uid", &"<redacted>")
            .field("upw", &"<redacted>")
            .finish()
    }
}

fn decode_or_empty(encoded: &str) -> String {
    STANDARD
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

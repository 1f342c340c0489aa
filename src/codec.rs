//! Reversible obfuscation for values kept in the local store.
//!
//! `base64(uri_encode(json))`. This only keeps stored payloads from being
//! casually read or edited; it is not encryption.

use crate::error::CodecError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    let json = serde_json::to_string(value)?;
    let escaped = urlencoding::encode(&json);
    Ok(STANDARD.encode(escaped.as_bytes()))
}

pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CodecError> {
    let bytes = STANDARD.decode(raw.trim())?;
    let escaped = String::from_utf8(bytes)?;
    let json = urlencoding::decode(&escaped)?;
    Ok(serde_json::from_str(&json)?)
}

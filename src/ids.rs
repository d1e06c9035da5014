//! Identifier and token primitives.
//!
//! Request and event ids are a short prefix followed by 16 random bytes in
//! lowercased unpadded base32. Interaction tokens are 32 random bytes in
//! unpadded base32; only their hex SHA-256 is ever persisted.

use data_encoding::BASE32_NOPAD;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Prefix for request identifiers.
pub const REQUEST_ID_PREFIX: &str = "req_";

/// Prefix for event identifiers.
pub const EVENT_ID_PREFIX: &str = "evt_";

const REQUEST_ID_MIN_LEN: usize = 5;
const REQUEST_ID_MAX_LEN: usize = 128;

fn random_base32(len: usize) -> String {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    BASE32_NOPAD.encode(&buf)
}

/// Mints a fresh request id: `req_` + 16 random bytes, lowercased base32.
#[must_use]
pub fn new_request_id() -> String {
    format!("{}{}", REQUEST_ID_PREFIX, random_base32(16).to_lowercase())
}

/// Mints a fresh event id: `evt_` + 16 random bytes, lowercased base32.
#[must_use]
pub fn new_event_id() -> String {
    format!("{}{}", EVENT_ID_PREFIX, random_base32(16).to_lowercase())
}

/// Mints a plaintext interaction token: 32 random bytes, unpadded base32.
#[must_use]
pub fn new_token() -> String {
    random_base32(32)
}

/// Hex SHA-256 of a token plaintext. This is the only form that is stored.
#[must_use]
pub fn token_hash_hex(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Validity predicate for caller-chosen request ids.
///
/// Accepts `req_` followed by lowercase letters, digits, and underscores,
/// total length 5..=128.
#[must_use]
pub fn is_valid_request_id(id: &str) -> bool {
    let id = id.trim();
    if id.len() < REQUEST_ID_MIN_LEN || id.len() > REQUEST_ID_MAX_LEN {
        return false;
    }
    if !id.starts_with(REQUEST_ID_PREFIX) {
        return false;
    }
    id.bytes()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'_')
}

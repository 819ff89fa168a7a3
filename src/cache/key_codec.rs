//! Key Codec Module
//!
//! Maps arbitrary cache keys to tokens usable as a single file name in the
//! data area.
//!
//! Path separators, the ticket delimiter `-`, `.` and NUL are replaced by
//! `%XX` escapes. `%` itself is escaped as well, so distinct keys always
//! produce distinct tokens.

use crate::error::{CacheError, Result};

/// Longest token most filesystems accept as one path component.
pub const MAX_TOKEN_LENGTH: usize = 255;

const ESCAPES: [(char, &str); 6] = [
    ('%', "%25"),
    ('/', "%2F"),
    ('\\', "%5C"),
    ('-', "%2D"),
    ('.', "%2E"),
    ('\0', "%00"),
];

// == Encode ==
/// Encodes `key` into a filesystem-safe token.
///
/// Fails on an empty key or when the token would exceed [`MAX_TOKEN_LENGTH`].
pub fn encode(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key cannot be empty".to_string()));
    }

    let mut token = String::with_capacity(key.len());
    for c in key.chars() {
        match ESCAPES.iter().find(|(raw, _)| *raw == c) {
            Some((_, escaped)) => token.push_str(escaped),
            None => token.push(c),
        }
    }

    if token.len() > MAX_TOKEN_LENGTH {
        return Err(CacheError::InvalidKey(format!(
            "encoded key exceeds {} bytes",
            MAX_TOKEN_LENGTH
        )));
    }
    Ok(token)
}

// == Decode ==
/// Best-effort inverse of [`encode`], for diagnostics only.
///
/// Returns `None` for tokens `encode` cannot have produced.
pub fn decode(token: &str) -> Option<String> {
    let mut key = String::with_capacity(token.len());
    let mut rest = token;

    while let Some(pos) = rest.find('%') {
        key.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3)?;
        let (raw, _) = ESCAPES.iter().find(|(_, e)| *e == escape)?;
        key.push(*raw);
        rest = &rest[pos + 3..];
    }
    key.push_str(rest);

    Some(key)
}

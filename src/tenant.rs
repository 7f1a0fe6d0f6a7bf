//! Tenant identifiers and their storage keys.
//!
//! A raw tenant id is opaque, trusted input. Before it touches the
//! filesystem it is encoded into a [`TenantKey`]: lowercase ASCII letters,
//! digits, `_` and `-` pass through, every other byte of the UTF-8 encoding
//! becomes `~` followed by two lowercase hex digits. The encoding is
//! reversible, so distinct ids never share a key, and a key can never
//! contain `/`, `\` or `.`, so it can never name anything outside the
//! storage root.

use std::fmt;

use crate::error::{RagError, Result};

/// Longest accepted raw tenant id, in bytes. Worst-case encoding triples
/// the length, which keeps keys under common 255-byte name limits.
pub const MAX_TENANT_ID_BYTES: usize = 80;

const ESCAPE: char = '~';

/// Filesystem-safe, reversible encoding of a tenant id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantKey(String);

impl TenantKey {
    /// Encode a raw tenant id.
    ///
    /// Fails with [`RagError::BadRequest`] for empty or overlong ids.
    pub fn encode(tenant_id: &str) -> Result<Self> {
        if tenant_id.is_empty() {
            return Err(RagError::bad_request("tenant id must not be empty"));
        }
        if tenant_id.len() > MAX_TENANT_ID_BYTES {
            return Err(RagError::bad_request(format!(
                "tenant id exceeds {} bytes",
                MAX_TENANT_ID_BYTES
            )));
        }

        let mut key = String::with_capacity(tenant_id.len());
        for byte in tenant_id.bytes() {
            if is_passthrough(byte) {
                key.push(byte as char);
            } else {
                key.push(ESCAPE);
                key.push_str(&format!("{:02x}", byte));
            }
        }
        Ok(Self(key))
    }

    /// Recover the raw tenant id from a storage directory name.
    ///
    /// Returns `None` for names that are not valid keys (scratch
    /// directories, stray files).
    pub fn decode(key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        let bytes = key.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b == ESCAPE as u8 {
                let hex = key.get(i + 1..i + 3)?;
                if hex.bytes().any(|h| h.is_ascii_uppercase()) {
                    return None;
                }
                let value = u8::from_str_radix(hex, 16).ok()?;
                if is_passthrough(value) {
                    // Non-canonical: this byte is never escaped.
                    return None;
                }
                out.push(value);
                i += 3;
            } else if is_passthrough(b) {
                out.push(b);
                i += 1;
            } else {
                return None;
            }
        }
        String::from_utf8(out).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_passthrough(byte: u8) -> bool {
    byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'_' || byte == b'-'
}

/// Reduce an uploaded file name to a safe basename.
///
/// Directory components are discarded, whitespace becomes `_`, and any
/// character outside `[A-Za-z0-9._-]` is dropped. Leading dots are
/// stripped so the result is never hidden and never `.` or `..`.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                Some(c)
            } else {
                None
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches(['.', '_']);
    if trimmed.is_empty() {
        return Err(RagError::bad_request(format!(
            "file name '{}' has no usable characters",
            name
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::{Component, Path};

    #[test]
    fn plain_ids_pass_through() {
        assert_eq!(TenantKey::encode("alice").unwrap().as_str(), "alice");
        assert_eq!(TenantKey::encode("team-7_x").unwrap().as_str(), "team-7_x");
    }

    #[test]
    fn traversal_attempts_stay_single_component() {
        for raw in ["..", "../etc", "a/b", "..\\..\\win", ".hidden", "/abs", "~"] {
            let key = TenantKey::encode(raw).unwrap();
            let components: Vec<_> = Path::new(key.as_str()).components().collect();
            assert_eq!(components.len(), 1, "{raw} -> {key}");
            assert!(matches!(components[0], Component::Normal(_)));
            assert!(!key.as_str().contains('.'));
            assert!(!key.as_str().starts_with('.'));
        }
    }

    #[test]
    fn distinct_ids_get_distinct_keys() {
        let ids = [
            "alice", "Alice", "ALICE", "a/b", "a_b", "a~2fb", "a.b", "a b", "ä", "~", "~7e", "",
        ];
        let mut seen = HashSet::new();
        for raw in ids.iter().filter(|s| !s.is_empty()) {
            let key = TenantKey::encode(raw).unwrap();
            assert!(seen.insert(key.clone()), "collision on {raw}");
        }
    }

    #[test]
    fn decode_inverts_encode() {
        for raw in ["alice", "Bob Smith", "../x", "ünïcödé", "~tilde~", "a.b.c"] {
            let key = TenantKey::encode(raw).unwrap();
            assert_eq!(TenantKey::decode(key.as_str()).as_deref(), Some(raw));
        }
    }

    #[test]
    fn decode_rejects_non_keys() {
        assert_eq!(TenantKey::decode(".staging-1234"), None);
        assert_eq!(TenantKey::decode("Upper"), None);
        assert_eq!(TenantKey::decode("~61"), None); // 'a' is never escaped
        assert_eq!(TenantKey::decode("~2F"), None);
        assert_eq!(TenantKey::decode("~2"), None);
        assert_eq!(TenantKey::decode(""), None);
    }

    #[test]
    fn empty_and_overlong_ids_are_bad_requests() {
        assert_eq!(TenantKey::encode("").unwrap_err().kind(), "bad_request");
        let long = "x".repeat(MAX_TENANT_ID_BYTES + 1);
        assert_eq!(TenantKey::encode(&long).unwrap_err().kind(), "bad_request");
    }

    #[test]
    fn filenames_reduce_to_basename() {
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\data\\q3 sales.xlsx").unwrap(), "q3_sales.xlsx");
        assert_eq!(sanitize_filename("..hidden.csv").unwrap(), "hidden.csv");
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("///").is_err());
    }
}

//! Stable string fingerprints of heterogeneous tuples.
//!
//! Each part is rendered to its canonical textual form followed by a `$`
//! separator, the whole sequence is SHA-1 hashed, and the digest is
//! base32-encoded. The result is always 32 characters long and is used as a
//! directory name in the fetch engine's caches.

use data_encoding::BASE32;
use sha1::{Digest, Sha1};

/// One input to [`hash`]. Byte inputs are hashed by content, everything else
/// by its rendered form (string lists render as `[a b]`).
pub enum HashPart<'a> {
    Str(&'a str),
    StrList(&'a [String]),
    Bytes(&'a [u8]),
}

impl<'a> From<&'a str> for HashPart<'a> {
    fn from(s: &'a str) -> Self {
        HashPart::Str(s)
    }
}

impl<'a> From<&'a String> for HashPart<'a> {
    fn from(s: &'a String) -> Self {
        HashPart::Str(s)
    }
}

impl<'a> From<&'a [String]> for HashPart<'a> {
    fn from(s: &'a [String]) -> Self {
        HashPart::StrList(s)
    }
}

impl<'a> From<&'a Vec<String>> for HashPart<'a> {
    fn from(s: &'a Vec<String>) -> Self {
        HashPart::StrList(s)
    }
}

pub fn hash(parts: &[HashPart<'_>]) -> String {
    let mut hasher = Sha1::new();
    for part in parts {
        match part {
            HashPart::Str(s) => hasher.update(s.as_bytes()),
            HashPart::StrList(items) => {
                hasher.update(b"[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        hasher.update(b" ");
                    }
                    hasher.update(item.as_bytes());
                }
                hasher.update(b"]");
            }
            HashPart::Bytes(b) => hasher.update(b),
        }
        hasher.update(b"$");
    }
    BASE32.encode(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_32_chars() {
        assert_eq!(hash(&["hello".into()]).len(), 32);
        assert_eq!(hash(&[]).len(), 32);
    }

    #[test]
    fn deterministic_over_tuples() {
        let a = hash(&[
            "abc".into(),
            (&vec!["def".to_owned(), "ghi".to_owned()]).into(),
            "jkl".into(),
        ]);
        let b = hash(&[
            "abc".into(),
            (&vec!["def".to_owned(), "ghi".to_owned()]).into(),
            "jkl".into(),
        ]);
        assert_eq!(a, b);
    }

    #[test]
    fn parts_are_separated() {
        // "ab" + "c" must not collide with "a" + "bc".
        assert_ne!(hash(&["ab".into(), "c".into()]), hash(&["a".into(), "bc".into()]));
    }

    #[test]
    fn bytes_hash_by_content() {
        let a = hash(&[HashPart::Bytes(b"payload")]);
        let b = hash(&[HashPart::Bytes(b"payload")]);
        let c = hash(&[HashPart::Bytes(b"other")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

//! Subresource Integrity (W3C SRI) expressions over multi-algorithm digests.
//!
//! An integrity string is a whitespace-separated list of
//! `alg-base64digest[?options]` expressions. Algorithms carry fixed
//! priorities; only the digests of the highest recognised priority are
//! enforced, and a check passes when any one of them matches. Unrecognised
//! algorithms are ignored for forward compatibility, while a string
//! consisting solely of deprecated algorithms is rejected.

use base64::Engine as _;
use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("bad integrity metadata: couldn't parse hash-with-options: {0}")]
    Malformed(String),
    #[error("bad integrity metadata: couldn't decode base64 payload: {0}")]
    BadBase64(String),
    #[error("bad integrity metadata: only deprecated hash algorithms found {0:?}")]
    DeprecatedOnly(Vec<String>),
}

/// Priority of an algorithm; negative means deprecated, zero unrecognised.
fn priority(algorithm: &str) -> i32 {
    match algorithm {
        "md5" | "sha1" => -1,
        "sha256" => 100,
        "sha384" => 200,
        "sha512" => 300,
        _ => 0,
    }
}

#[derive(Clone)]
enum Hasher {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: &str) -> Hasher {
        match algorithm {
            "sha256" => Hasher::Sha256(Sha256::new()),
            "sha384" => Hasher::Sha384(Sha384::new()),
            "sha512" => Hasher::Sha512(Sha512::new()),
            other => unreachable!("no hasher for {other}"),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn digest(&self) -> Vec<u8> {
        match self.clone() {
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha384(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        }
    }

    fn reset(&mut self) {
        match self {
            Hasher::Sha256(h) => h.reset(),
            Hasher::Sha384(h) => h.reset(),
            Hasher::Sha512(h) => h.reset(),
        }
    }
}

struct SubChecker {
    hasher: Hasher,
    expected: Vec<u8>,
}

/// A running integrity check. Feed data with [`update`](Checker::update),
/// then ask [`check`](Checker::check) whether any enforced digest matched.
pub struct Checker {
    subs: Vec<SubChecker>,
}

impl Checker {
    /// Parses integrity metadata into a checker. Keeps sub-checkers only for
    /// the highest recognised priority present in the input.
    pub fn parse(integrity: &str) -> Result<Checker, IntegrityError> {
        // Start at 1 to weed out unrecognised and deprecated algorithms.
        let mut cur_priority = 1;
        let mut subs: Vec<SubChecker> = Vec::new();
        let mut deprecated: Vec<String> = Vec::new();

        for expr in integrity.split_whitespace() {
            let (algorithm, payload) = parse_expr(expr)?;
            let prio = priority(algorithm);
            if prio == -1 {
                deprecated.push(algorithm.to_owned());
                continue;
            }
            if prio >= cur_priority {
                if prio > cur_priority {
                    cur_priority = prio;
                    subs.clear();
                }
                let expected = base64::engine::general_purpose::STANDARD
                    .decode(payload)
                    .map_err(|_| IntegrityError::BadBase64(payload.to_owned()))?;
                subs.push(SubChecker {
                    hasher: Hasher::new(algorithm),
                    expected,
                });
            }
        }

        if subs.is_empty() && !deprecated.is_empty() {
            return Err(IntegrityError::DeprecatedOnly(deprecated));
        }
        Ok(Checker { subs })
    }

    /// Adds more data to the underlying running hashes.
    pub fn update(&mut self, data: &[u8]) {
        for sub in &mut self.subs {
            sub.hasher.update(data);
        }
    }

    /// Whether the data written so far matches the integrity metadata. An
    /// empty checker (no recognised algorithms at all) always passes; a
    /// non-empty one passes when at least one digest is byte-equal.
    pub fn check(&self) -> bool {
        if self.subs.is_empty() {
            return true;
        }
        self.subs.iter().any(|sub| sub.hasher.digest() == sub.expected)
    }

    /// Resets the checker so previously written data no longer counts.
    pub fn reset(&mut self) {
        for sub in &mut self.subs {
            sub.hasher.reset();
        }
    }
}

/// Splits `alg-base64[?options]` into its algorithm and payload parts,
/// enforcing the SRI expression shape.
fn parse_expr(expr: &str) -> Result<(&str, &str), IntegrityError> {
    let malformed = || IntegrityError::Malformed(expr.to_owned());
    let (algorithm, rest) = expr.split_once('-').ok_or_else(malformed)?;
    if algorithm.is_empty()
        || !algorithm.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Err(malformed());
    }
    let payload = match rest.find('?') {
        Some(idx) => &rest[..idx],
        None => rest,
    };
    if payload.is_empty() {
        return Err(malformed());
    }
    let body_len = payload.trim_end_matches('=').len();
    if payload.len() - body_len > 2 {
        return Err(malformed());
    }
    if !payload[..body_len]
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'+' || b == b'/')
    {
        return Err(malformed());
    }
    Ok((algorithm, payload))
}

/// Convenience one-shot check of a byte string against integrity metadata.
pub fn check_bytes(data: &[u8], integrity: &str) -> Result<bool, IntegrityError> {
    let mut checker = Checker::parse(integrity)?;
    checker.update(data);
    Ok(checker.check())
}

/// Generates integrity metadata from the given algorithm and bytes. Returns
/// `None` for unrecognised or deprecated algorithms.
pub fn generate(algorithm: &str, data: &[u8]) -> Option<String> {
    if priority(algorithm) <= 0 {
        return None;
    }
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    Some(format!(
        "{algorithm}-{}",
        base64::engine::general_purpose::STANDARD.encode(hasher.digest())
    ))
}

/// Builds the canonical `sha256-...` expression from a raw SHA-256 digest.
pub fn from_sha256_digest(digest: &[u8]) -> String {
    format!(
        "sha256-{}",
        base64::engine::general_purpose::STANDARD.encode(digest)
    )
}

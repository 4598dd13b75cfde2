//! Tolerant dotted-version parsing and comparison.
//!
//! Registry versions are not strict semver (`1.0`, `2020.11`, `1.0-rc1` all
//! occur), so this comparator accepts any dot-separated sequence of numeric
//! or alphanumeric segments with an optional `-prerelease` suffix. Numeric
//! segments compare numerically, alphanumeric ones lexicographically, and a
//! release always orders above its own pre-releases.

use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("can't parse version {0:?}")]
pub struct VersionError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Num(u64),
    Alpha(String),
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Num(a), Segment::Num(b)) => a.cmp(b),
            (Segment::Alpha(a), Segment::Alpha(b)) => a.cmp(b),
            // Numeric identifiers order below alphanumeric ones.
            (Segment::Num(_), Segment::Alpha(_)) => Ordering::Less,
            (Segment::Alpha(_), Segment::Num(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Eq)]
pub struct Version {
    original: String,
    release: Vec<Segment>,
    prerelease: Vec<Segment>,
}

impl Version {
    pub fn parse(s: &str) -> Result<Version, VersionError> {
        if s.is_empty() {
            return Err(VersionError(s.to_owned()));
        }
        let (release_part, pre_part) = match s.split_once('-') {
            Some((r, p)) => (r, Some(p)),
            None => (s, None),
        };
        let release = parse_segments(s, release_part)?;
        let prerelease = match pre_part {
            Some(p) => parse_segments(s, p)?,
            None => Vec::new(),
        };
        Ok(Version {
            original: s.to_owned(),
            release,
            prerelease,
        })
    }

    /// The string this version was parsed from.
    pub fn original(&self) -> &str {
        &self.original
    }
}

fn parse_segments(whole: &str, part: &str) -> Result<Vec<Segment>, VersionError> {
    part.split('.')
        .map(|seg| {
            if seg.is_empty() {
                return Err(VersionError(whole.to_owned()));
            }
            if seg.bytes().all(|b| b.is_ascii_digit()) {
                seg.parse::<u64>()
                    .map(Segment::Num)
                    .map_err(|_| VersionError(whole.to_owned()))
            } else if seg.bytes().all(|b| b.is_ascii_alphanumeric()) {
                Ok(Segment::Alpha(seg.to_owned()))
            } else {
                Err(VersionError(whole.to_owned()))
            }
        })
        .collect()
}

fn cmp_segments(a: &[Segment], b: &[Segment]) -> Ordering {
    let len = a.len().max(b.len());
    let zero = Segment::Num(0);
    for i in 0..len {
        let sa = a.get(i).unwrap_or(&zero);
        let sb = b.get(i).unwrap_or(&zero);
        match sa.cmp(sb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match cmp_segments(&self.release, &other.release) {
            Ordering::Equal => {}
            other => return other,
        }
        // Equal releases: no prerelease beats any prerelease.
        match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => cmp_segments_no_padding(&self.prerelease, &other.prerelease),
        }
    }
}

/// Prerelease comparison: a shorter list that is a prefix of a longer one
/// orders below it.
fn cmp_segments_no_padding(a: &[Segment], b: &[Segment]) -> Ordering {
    for (sa, sb) in a.iter().zip(b.iter()) {
        match sa.cmp(sb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn numeric_ordering() {
        assert!(v("1.2.3") < v("1.2.4"));
        assert!(v("1.2.3") < v("1.3.0"));
        assert!(v("1.9") < v("1.10"));
        assert!(v("2.0") > v("1.99.99"));
    }

    #[test]
    fn missing_segments_count_as_zero() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert!(v("1.0") < v("1.0.1"));
    }

    #[test]
    fn release_beats_prerelease() {
        assert!(v("1.0.0-beta") < v("1.0.0"));
        assert!(v("1.0.0-rc1") < v("1.0.0"));
    }

    #[test]
    fn prerelease_ordering() {
        assert!(v("1.0.0-alpha") < v("1.0.0-beta"));
        assert!(v("1.0.0-beta.1") < v("1.0.0-beta.2"));
        assert!(v("1.0.0-beta") < v("1.0.0-beta.1"));
        assert!(v("1.0.0-1") < v("1.0.0-alpha"));
    }

    #[test]
    fn alphanumeric_segments() {
        assert!(v("2020.11") < v("2021.1"));
        assert!(v("1.0.patch1") < v("1.0.patch2"));
        // Numeric orders below alphanumeric in the same position.
        assert!(v("1.0") < v("1.a"));
    }

    #[test]
    fn original_is_preserved() {
        assert_eq!(v("1.0").original(), "1.0");
    }

    #[test]
    fn parse_errors() {
        for s in ["", ".", "1..0", "1.0-", "1.0.", "1 0", "1.0+meta"] {
            assert!(Version::parse(s).is_err(), "expected failure for {s:?}");
        }
    }
}

//! Host database version used to select the protocol dialect.
//!
//! The host announces which release it is; older releases speak older
//! command sets and encodings. Versions compare lexicographically on
//! `(major, minor, patch)`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A `major.minor.patch` triple. Missing trailing parts parse as zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolVersion {
    major: u32,
    minor: u32,
    patch: u32,
}

impl ProtocolVersion {
    /// Builds a version from its parts.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Major component.
    #[must_use]
    pub const fn major(self) -> u32 {
        self.major
    }

    /// Minor component.
    #[must_use]
    pub const fn minor(self) -> u32 {
        self.minor
    }

    /// Patch component.
    #[must_use]
    pub const fn patch(self) -> u32 {
        self.patch
    }
}

/// Errors raised while parsing a [`ProtocolVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    /// The input was empty.
    #[error("host version must not be empty")]
    Empty,
    /// More than three dot-separated parts were supplied.
    #[error("host version '{input}' has more than three parts")]
    TooManyParts {
        /// Offending input.
        input: String,
    },
    /// A part was not an unsigned integer.
    #[error("host version '{input}' has a non-numeric part '{part}'")]
    NotNumeric {
        /// Offending input.
        input: String,
        /// The part that failed to parse.
        part: String,
    },
}

impl FromStr for ProtocolVersion {
    type Err = VersionParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let mut parts = [0_u32; 3];
        let mut count = 0_usize;
        for piece in trimmed.split('.') {
            let slot = parts
                .get_mut(count)
                .ok_or_else(|| VersionParseError::TooManyParts {
                    input: trimmed.to_owned(),
                })?;
            *slot = piece
                .parse::<u32>()
                .map_err(|_| VersionParseError::NotNumeric {
                    input: trimmed.to_owned(),
                    part: piece.to_owned(),
                })?;
            count += 1;
        }

        let [major, minor, patch] = parts;
        Ok(Self::new(major, minor, patch))
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(version: ProtocolVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::full("1.1.0", ProtocolVersion::new(1, 1, 0))]
    #[case::short("0.9", ProtocolVersion::new(0, 9, 0))]
    #[case::major_only("2", ProtocolVersion::new(2, 0, 0))]
    #[case::padded(" 0.11.1 ", ProtocolVersion::new(0, 11, 1))]
    fn parses_versions(#[case] input: &str, #[case] expected: ProtocolVersion) {
        assert_eq!(input.parse::<ProtocolVersion>(), Ok(expected));
    }

    #[rstest]
    #[case::empty("")]
    #[case::letters("one.two")]
    #[case::too_long("1.2.3.4")]
    #[case::dangling_dot("1.")]
    fn rejects_malformed_versions(#[case] input: &str) {
        assert!(input.parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn orders_by_component() {
        let legacy = ProtocolVersion::new(0, 9, 0);
        let current = ProtocolVersion::new(0, 11, 0);
        let patched = ProtocolVersion::new(0, 11, 1);
        assert!(legacy < current);
        assert!(current < patched);
        assert_eq!(patched.to_string(), "0.11.1");
    }
}

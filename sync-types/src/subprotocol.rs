//! Subprotocol negotiation.
//!
//! Two independent checks guard a connection: the wire protocol version
//! (exact match) and the application subprotocol (semver range match).

use crate::error::SyncError;
use semver::{Version, VersionReq};
use std::fmt;
use std::str::FromStr;

/// Version of the sync wire protocol itself.
pub const PROTOCOL_VERSION: u32 = 4;

/// Check whether a peer's wire protocol version can be served.
pub fn protocol_version_is_supported(version: u32) -> bool {
    version == PROTOCOL_VERSION
}

/// Application-level subprotocol version, e.g. `1.0.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subprotocol(Version);

impl Subprotocol {
    /// The underlying semantic version.
    pub fn version(&self) -> &Version {
        &self.0
    }
}

impl FromStr for Subprotocol {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Version::parse(s)?))
    }
}

impl fmt::Display for Subprotocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Npm-style range of supported subprotocols, e.g. `1.x` or `^1.0.0`.
#[derive(Debug, Clone)]
pub struct SupportedRange(VersionReq);

impl SupportedRange {
    /// Whether the given subprotocol falls inside this range.
    pub fn matches(&self, subprotocol: &Subprotocol) -> bool {
        self.0.matches(&subprotocol.0)
    }
}

impl FromStr for SupportedRange {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(VersionReq::parse(s)?))
    }
}

impl fmt::Display for SupportedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_version_exact_match_only() {
        assert!(protocol_version_is_supported(PROTOCOL_VERSION));
        assert!(!protocol_version_is_supported(PROTOCOL_VERSION - 1));
        assert!(!protocol_version_is_supported(PROTOCOL_VERSION + 1));
    }

    #[test]
    fn subprotocol_parses_semver() {
        let sp: Subprotocol = "1.0.0".parse().unwrap();
        assert_eq!(sp.to_string(), "1.0.0");
    }

    #[test]
    fn subprotocol_rejects_garbage() {
        assert!("one-dot-oh".parse::<Subprotocol>().is_err());
        assert!("".parse::<Subprotocol>().is_err());
    }

    #[test]
    fn wildcard_range_matches_major_line() {
        let range: SupportedRange = "1.x".parse().unwrap();
        assert!(range.matches(&"1.0.0".parse().unwrap()));
        assert!(range.matches(&"1.9.3".parse().unwrap()));
        assert!(!range.matches(&"2.0.0".parse().unwrap()));
        assert!(!range.matches(&"0.9.0".parse().unwrap()));
    }

    #[test]
    fn caret_range_matches_compatible_versions() {
        let range: SupportedRange = "^1.0.0".parse().unwrap();
        assert!(range.matches(&"1.2.0".parse().unwrap()));
        assert!(!range.matches(&"2.0.0".parse().unwrap()));
    }
}

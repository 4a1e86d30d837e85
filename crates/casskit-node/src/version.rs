//! Cassandra version numbers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// Cassandra version, `major.minor[.patch][-pre]`
///
/// Missing components default to 0, so `"4.1"` and `"4.1.0"` are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(semver::Version);

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version(semver::Version::new(major, minor, patch))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    /// `true` when this version is at or above `major.minor`
    ///
    /// Pre-releases of `major.minor.0` count as that release.
    pub fn at_least(&self, major: u64, minor: u64) -> bool {
        (self.0.major, self.0.minor) >= (major, minor)
    }

    /// `true` when this version is below `major.minor`
    pub fn below(&self, major: u64, minor: u64) -> bool {
        !self.at_least(major, minor)
    }
}

impl FromStr for Version {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NodeError::InvalidDistribution(format!("invalid Cassandra version '{}'", s));

        let trimmed = s.trim();
        let (numbers, pre) = match trimmed.split_once('-') {
            Some((numbers, pre)) => (numbers, Some(pre)),
            None => (trimmed, None),
        };

        let mut components = [0u64; 3];
        let mut count = 0;
        for part in numbers.split('.') {
            if count == components.len() {
                return Err(invalid());
            }
            components[count] = part.parse().map_err(|_| invalid())?;
            count += 1;
        }

        let mut version = semver::Version::new(components[0], components[1], components[2]);
        if let Some(pre) = pre {
            version.pre = semver::Prerelease::new(pre).map_err(|_| invalid())?;
        }
        Ok(Version(version))
    }
}

impl TryFrom<String> for Version {
    type Error = NodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

//! Identifier grammars used on the wire and on disk.

use core::fmt;
use std::{str::FromStr, sync::LazyLock};

use regex::Regex;

use crate::{LayerpullError, LayerpullResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Repository names are dotted/slashed paths of lowercase components.
static REPO_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$").unwrap()
});

/// Tags are short word-like identifiers.
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").unwrap());

/// Layer ids are 256-bit content addresses in lowercase hex.
static LAYER_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{64}$").unwrap());

/// Maximum length of a repository name.
const REPO_NAME_MAX: usize = 256;

/// Maximum length of a machine (local alias) name.
const MACHINE_NAME_MAX: usize = 64;

/// Maximum length of a hostname.
const HOSTNAME_MAX: usize = 253;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A validated repository name, e.g. `library/alpine`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoName(String);

/// A validated tag name, e.g. `latest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagName(String);

/// A validated content address of a single layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerId(String);

/// A validated machine name usable as a local image alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineName(String);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RepoName {
    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TagName {
    /// Returns the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl LayerId {
    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form for log output.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl MachineName {
    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn hostname_is_valid(host: &str) -> bool {
    if host.is_empty() || host.len() > HOSTNAME_MAX {
        return false;
    }

    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

/// Validates a registry endpoint as discovered from response headers.
///
/// Endpoints are hostnames or IPv4 literals, optionally carrying an explicit
/// port. Anything else is a protocol violation on the remote side.
pub(crate) fn validate_endpoint(endpoint: &str) -> LayerpullResult<()> {
    let host = match endpoint.rsplit_once(':') {
        Some((host, port)) => {
            port.parse::<u16>().ok().filter(|port| *port != 0).ok_or_else(|| {
                LayerpullError::Protocol(format!("invalid port in registry endpoint: {endpoint}"))
            })?;
            host
        }
        None => endpoint,
    };

    if !hostname_is_valid(host) {
        return Err(LayerpullError::Protocol(format!(
            "invalid registry endpoint: {endpoint}"
        )));
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for RepoName {
    type Err = LayerpullError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > REPO_NAME_MAX || !REPO_NAME_RE.is_match(s) {
            return Err(LayerpullError::InvalidArgument(format!(
                "invalid repository name: {s:?}"
            )));
        }
        Ok(RepoName(s.to_string()))
    }
}

impl FromStr for TagName {
    type Err = LayerpullError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !TAG_RE.is_match(s) {
            return Err(LayerpullError::InvalidArgument(format!(
                "invalid tag name: {s:?}"
            )));
        }
        Ok(TagName(s.to_string()))
    }
}

impl FromStr for LayerId {
    type Err = LayerpullError;

    // Layer ids only ever arrive from the wire, so a bad one is a protocol
    // error rather than an invalid argument.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !LAYER_ID_RE.is_match(s) {
            return Err(LayerpullError::Protocol(format!("invalid layer id: {s:?}")));
        }
        Ok(LayerId(s.to_string()))
    }
}

impl FromStr for MachineName {
    type Err = LayerpullError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > MACHINE_NAME_MAX || !hostname_is_valid(s) {
            return Err(LayerpullError::InvalidArgument(format!(
                "invalid local machine name: {s:?}"
            )));
        }
        Ok(MachineName(s.to_string()))
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MachineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

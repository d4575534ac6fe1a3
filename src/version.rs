//! SDK Version
//!
//! Version reported to the identity service.

use std::fmt;

/// A `major.minor.patch` version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Parse a version string, ignoring any `-suffix`.
///
/// Malformed input yields `0.0.0`.
pub fn parse_version(version: &str) -> Version {
    let core = version.split('-').next().unwrap_or_default();
    let parts: Vec<u32> = match core.split('.').map(str::parse).collect() {
        Ok(parts) => parts,
        Err(_) => return Version::default(),
    };

    match parts.as_slice() {
        [major, minor, patch] => Version {
            major: *major,
            minor: *minor,
            patch: *patch,
        },
        _ => Version::default(),
    }
}

/// Version of this crate.
pub fn sdk_version() -> Version {
    parse_version(env!("CARGO_PKG_VERSION"))
}

/// Value of the client version header, `<platform>-<version>`.
pub fn client_version_header(platform: &str) -> String {
    format!("{}-{}", platform, sdk_version())
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code signing identities.

use {
    crate::{certificate::DeveloperCertificate, error::ResignError},
    std::str::FromStr,
};

/// Substrings identifying development (as opposed to distribution) identities.
const DEVELOPER_IDENTITY_MARKERS: &[&str] = &["iPhone Developer", "Apple Development"];

/// A signing identity applied to a bundle.
///
/// `codesign` looks up the keychain identity by this name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CodesignIdentity {
    name: String,
    hash: String,
}

impl CodesignIdentity {
    pub fn new(name: impl ToString, hash: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            hash: hash.to_string(),
        }
    }

    /// Display name of the identity.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upper-case hex SHA-1 of the backing certificate.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Whether this is a development identity.
    pub fn is_developer(&self) -> bool {
        DEVELOPER_IDENTITY_MARKERS
            .iter()
            .any(|marker| self.name.contains(marker))
    }
}

impl From<&DeveloperCertificate> for CodesignIdentity {
    fn from(cert: &DeveloperCertificate) -> Self {
        Self::new(cert.common_name(), cert.hash())
    }
}

/// How to choose the signing identity among a profile's certificates.
///
/// Profiles frequently embed certificates of several team members. Nothing in
/// a profile says which of them the local keychain holds a key for, so the
/// choice is the caller's.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IdentityPolicy {
    /// Use the first certificate in the profile.
    First,

    /// Use the certificate whose common name equals this value.
    CommonName(String),

    /// Use the certificate whose SHA-1 fingerprint equals this hex value.
    ///
    /// Comparison is case-insensitive.
    Fingerprint(String),
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self::First
    }
}

impl IdentityPolicy {
    /// Select an identity from an ordered certificate list.
    pub fn select(
        &self,
        certificates: &[DeveloperCertificate],
    ) -> Result<CodesignIdentity, ResignError> {
        let cert = match self {
            Self::First => certificates.first(),
            Self::CommonName(name) => certificates.iter().find(|c| c.common_name() == name),
            Self::Fingerprint(hash) => certificates
                .iter()
                .find(|c| c.hash().eq_ignore_ascii_case(hash)),
        };

        cert.map(CodesignIdentity::from)
            .ok_or_else(|| ResignError::IdentityNotFound(self.to_string()))
    }
}

impl std::fmt::Display for IdentityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::First => f.write_str("first"),
            Self::CommonName(name) => write!(f, "name:{}", name),
            Self::Fingerprint(hash) => write!(f, "sha1:{}", hash),
        }
    }
}

impl FromStr for IdentityPolicy {
    type Err = ResignError;

    /// Parse `first`, `name:<common name>` or `sha1:<hex fingerprint>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "first" {
            Ok(Self::First)
        } else if let Some(name) = s.strip_prefix("name:") {
            if name.is_empty() {
                Err(ResignError::BadIdentityPolicy(s.to_string()))
            } else {
                Ok(Self::CommonName(name.to_string()))
            }
        } else if let Some(hash) = s.strip_prefix("sha1:") {
            let hash = hash.replace(':', "");

            if hash.len() == 40 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
                Ok(Self::Fingerprint(hash.to_ascii_uppercase()))
            } else {
                Err(ResignError::BadIdentityPolicy(s.to_string()))
            }
        } else {
            Err(ResignError::BadIdentityPolicy(s.to_string()))
        }
    }
}

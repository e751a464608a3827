// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Developer certificates embedded in provisioning profiles.

use {
    crate::error::ResignError,
    x509_certificate::{CapturedX509Certificate, X509Certificate},
};

/// A signer certificate embedded in a provisioning profile.
#[derive(Clone, Debug)]
pub struct DeveloperCertificate {
    common_name: String,
    hash: String,
    subject: String,
    team_id: Option<String>,
    der: Vec<u8>,
}

impl DeveloperCertificate {
    /// Parse a base64 encoded DER certificate.
    ///
    /// Whitespace inside the base64 text is ignored, as plist `<data>` values
    /// are usually wrapped over several lines.
    pub fn from_base64(data: &str) -> Result<Self, ResignError> {
        let compact = data
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>();

        let der = base64::decode(compact)
            .map_err(|e| ResignError::MalformedCertificate(format!("invalid base64: {}", e)))?;

        Self::from_der(der)
    }

    /// Parse DER encoded certificate data.
    pub fn from_der(der: Vec<u8>) -> Result<Self, ResignError> {
        let cert = CapturedX509Certificate::from_der(der.clone())
            .map_err(|e| ResignError::MalformedCertificate(e.to_string()))?;

        let subject = cert
            .subject_name()
            .user_friendly_str()
            .map_err(|e| ResignError::MalformedCertificate(format!("bad subject: {}", e)))?;

        let common_name = cert
            .subject_name()
            .iter_common_name()
            .next()
            .ok_or_else(|| ResignError::MissingCommonName(subject.clone()))?
            .to_string()
            .map_err(|e| ResignError::MalformedCertificate(format!("bad common name: {}", e)))?;

        let team_id = cert
            .subject_name()
            .iter_organizational_unit()
            .next()
            .and_then(|atv| atv.to_string().ok());

        Ok(Self {
            common_name,
            hash: certificate_hash(&cert)?,
            subject,
            team_id,
            der,
        })
    }

    /// The subject common name. e.g. `iPhone Developer: Jane Appleseed (ABCDE12345)`.
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// Upper-case hex SHA-1 fingerprint of the certificate.
    ///
    /// This is the hash `security find-identity` and `codesign` display for
    /// identities.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The rendered subject, e.g. `CN=..., OU=..., O=..., C=US`.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The team identifier (subject organizational unit), if present.
    pub fn team_id(&self) -> Option<&str> {
        self.team_id.as_deref()
    }

    /// Raw DER data of the certificate.
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

fn certificate_hash(cert: &X509Certificate) -> Result<String, ResignError> {
    let digest = cert
        .sha1_fingerprint()
        .map_err(|e| ResignError::MalformedCertificate(format!("unable to digest: {}", e)))?;

    Ok(hex::encode_upper(digest))
}

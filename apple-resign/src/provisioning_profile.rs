// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning profile decoding.
//!
//! A `.mobileprovision` file is a CMS (RFC 5652) `SignedData` structure whose
//! content is an XML plist. The plist holds, among other things, the
//! `Entitlements` dictionary granted to apps signed with the profile and a
//! `DeveloperCertificates` array of DER certificates allowed to sign them.
//!
//! Decoding happens in three steps, each provided by a [ProfileDecoder]:
//!
//! 1. Unwrap the CMS envelope into a plist file.
//! 2. Print the `Entitlements` value as an XML plist.
//! 3. Print the `DeveloperCertificates` value as an XML plist.
//!
//! [crate::tools::ToolProfileDecoder] drives `security` and `PlistBuddy` for
//! these steps. [NativeProfileDecoder] performs them in-process.

use {
    crate::{
        certificate::DeveloperCertificate,
        error::ResignError,
        identity::{CodesignIdentity, IdentityPolicy},
    },
    cryptographic_message_syntax::SignedData,
    log::{info, warn},
    std::path::{Path, PathBuf},
    xml::reader::{EventReader, XmlEvent},
};

/// File name of the extracted entitlements, written beside the decoded plist.
pub const ENTITLEMENTS_FILE_NAME: &str = "entitlements.plist";

/// Directory name under the system temporary directory used by default.
pub const DEFAULT_WORK_DIR_NAME: &str = "apple-resign";

/// The default directory receiving decoded profile artifacts.
pub fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_WORK_DIR_NAME)
}

/// Create a new, uniquely named directory under `work_dir`.
///
/// The directory is not removed automatically.
pub fn create_scratch_dir(work_dir: &Path, prefix: &str) -> Result<PathBuf, ResignError> {
    std::fs::create_dir_all(work_dir)?;

    let dir = tempfile::Builder::new()
        .prefix(&format!("{}-", prefix))
        .tempdir_in(work_dir)?;

    Ok(dir.into_path())
}

/// Provides the capabilities needed to decode a provisioning profile.
pub trait ProfileDecoder {
    /// Decode the CMS envelope of `profile`, writing the plist to `decoded_path`.
    fn decode_profile(&self, profile: &Path, decoded_path: &Path) -> Result<(), ResignError>;

    /// Print the `Entitlements` of a decoded profile as an XML plist.
    fn print_entitlements(&self, decoded_path: &Path) -> Result<String, ResignError>;

    /// Print the `DeveloperCertificates` of a decoded profile as an XML plist.
    fn print_developer_certificates(&self, decoded_path: &Path) -> Result<String, ResignError>;
}

/// Decoded signing material for one `.mobileprovision` file.
#[derive(Clone, Debug)]
pub struct ProvisioningProfile {
    source_path: PathBuf,
    decoded_path: PathBuf,
    entitlements_path: PathBuf,
    certificates: Vec<DeveloperCertificate>,
}

impl ProvisioningProfile {
    /// Decode a provisioning profile file.
    ///
    /// Decoded artifacts are written to a new directory under `work_dir`, or
    /// under [default_work_dir] if `None`, so decoding several profiles (or
    /// running several processes) against one work directory never mixes
    /// their files. They are left in place for the caller to inspect or remove.
    ///
    /// Fails unless the profile yields non-empty entitlements and at least one
    /// developer certificate.
    pub fn from_path(
        source: impl AsRef<Path>,
        work_dir: Option<&Path>,
        decoder: &dyn ProfileDecoder,
    ) -> Result<Self, ResignError> {
        let source_path = source.as_ref().to_path_buf();
        let work_dir = work_dir
            .map(|p| p.to_path_buf())
            .unwrap_or_else(default_work_dir);

        let stem = source_path
            .file_stem()
            .map(|x| x.to_string_lossy().to_string())
            .unwrap_or_else(|| "profile".to_string());
        let output_dir = create_scratch_dir(&work_dir, &stem)?;
        let decoded_path = output_dir.join(format!("{}.plist", stem));

        info!(
            "decoding provisioning profile {} to {}",
            source_path.display(),
            decoded_path.display()
        );

        decoder.decode_profile(&source_path, &decoded_path)?;

        if !decoded_path.is_file() || std::fs::metadata(&decoded_path)?.len() == 0 {
            return Err(ResignError::ProfileDecodeFailed(source_path));
        }

        let entitlements = decoder.print_entitlements(&decoded_path)?;
        if entitlements.trim().is_empty() {
            return Err(ResignError::EntitlementsExtractionFailed(decoded_path));
        }

        let entitlements_path = output_dir.join(ENTITLEMENTS_FILE_NAME);
        std::fs::write(&entitlements_path, entitlements.as_bytes())?;

        let certificates_xml = decoder.print_developer_certificates(&decoded_path)?;
        let certificates = parse_certificate_list(&certificates_xml)?
            .iter()
            .map(|data| DeveloperCertificate::from_base64(data))
            .collect::<Result<Vec<_>, _>>()?;

        if certificates.is_empty() {
            return Err(ResignError::NoCertificatesFound(source_path));
        }

        for cert in &certificates {
            info!(
                "profile certificate: {} ({})",
                cert.common_name(),
                cert.hash()
            );
        }

        Ok(Self {
            source_path,
            decoded_path,
            entitlements_path,
            certificates,
        })
    }

    /// The `.mobileprovision` file this instance was decoded from.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// The decoded plist file.
    pub fn decoded_path(&self) -> &Path {
        &self.decoded_path
    }

    /// The extracted entitlements plist file.
    pub fn entitlements_path(&self) -> &Path {
        &self.entitlements_path
    }

    /// Developer certificates in profile order. Never empty.
    pub fn certificates(&self) -> &[DeveloperCertificate] {
        &self.certificates
    }

    /// The identity of the first developer certificate.
    pub fn extract_codesign_identity(&self) -> CodesignIdentity {
        CodesignIdentity::from(&self.certificates[0])
    }

    /// Select an identity according to a policy.
    pub fn select_codesign_identity(
        &self,
        policy: &IdentityPolicy,
    ) -> Result<CodesignIdentity, ResignError> {
        let identity = policy.select(&self.certificates)?;

        if self.certificates.len() > 1 && *policy == IdentityPolicy::First {
            warn!(
                "profile contains {} certificates; using first: {}",
                self.certificates.len(),
                identity.name()
            );
        }

        Ok(identity)
    }

    /// Parse the extracted entitlements.
    pub fn entitlements(&self) -> Result<plist::Dictionary, ResignError> {
        let value = plist::Value::from_file(&self.entitlements_path)
            .map_err(|e| ResignError::Plist(self.entitlements_path.clone(), e))?;

        value.into_dictionary().ok_or_else(|| {
            ResignError::EntitlementsExtractionFailed(self.entitlements_path.clone())
        })
    }
}

/// Collect the text of every `<data>` element of an XML plist fragment.
///
/// Values are returned in document order, still base64 encoded.
pub fn parse_certificate_list(xml: &str) -> Result<Vec<String>, ResignError> {
    let mut res = vec![];
    let mut current: Option<String> = None;

    for event in EventReader::new(xml.as_bytes()) {
        match event.map_err(|e| ResignError::CertificateListParseFailed(e.to_string()))? {
            XmlEvent::StartElement { name, .. } if name.local_name == "data" => {
                current = Some(String::new());
            }
            XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                if let Some(current) = current.as_mut() {
                    current.push_str(&text);
                }
            }
            XmlEvent::EndElement { name } if name.local_name == "data" => {
                if let Some(data) = current.take() {
                    res.push(data);
                }
            }
            _ => {}
        }
    }

    Ok(res)
}

/// A [ProfileDecoder] that works in-process without Apple tooling.
///
/// The CMS envelope is parsed with `cryptographic-message-syntax`; its signature
/// is not verified. Plist values are rendered with the `plist` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeProfileDecoder;

impl NativeProfileDecoder {
    fn decoded_value(
        &self,
        decoded_path: &Path,
        key: &str,
    ) -> Result<Option<plist::Value>, ResignError> {
        let value = plist::Value::from_file(decoded_path)
            .map_err(|e| ResignError::Plist(decoded_path.to_path_buf(), e))?;

        Ok(value
            .as_dictionary()
            .and_then(|dict| dict.get(key))
            .cloned())
    }

    fn render_xml(&self, decoded_path: &Path, value: &plist::Value) -> Result<String, ResignError> {
        let mut data = Vec::<u8>::new();
        value
            .to_writer_xml(&mut data)
            .map_err(|e| ResignError::Plist(decoded_path.to_path_buf(), e))?;

        Ok(String::from_utf8_lossy(&data).to_string())
    }
}

impl ProfileDecoder for NativeProfileDecoder {
    fn decode_profile(&self, profile: &Path, decoded_path: &Path) -> Result<(), ResignError> {
        let data = std::fs::read(profile)?;
        let signed_data = SignedData::parse_ber(&data)?;

        // Absent content leaves no output, which the caller reports.
        if let Some(content) = signed_data.signed_content() {
            std::fs::write(decoded_path, content)?;
        }

        Ok(())
    }

    fn print_entitlements(&self, decoded_path: &Path) -> Result<String, ResignError> {
        match self.decoded_value(decoded_path, "Entitlements")? {
            Some(value) => self.render_xml(decoded_path, &value),
            None => Ok(String::new()),
        }
    }

    fn print_developer_certificates(&self, decoded_path: &Path) -> Result<String, ResignError> {
        let value = self
            .decoded_value(decoded_path, "DeveloperCertificates")?
            .unwrap_or_else(|| plist::Value::Array(vec![]));

        self.render_xml(decoded_path, &value)
    }
}

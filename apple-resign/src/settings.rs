// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Re-signing settings.

use {
    crate::{
        error::ResignError, identity::IdentityPolicy, provisioning_profile::default_work_dir,
        tools::ToolPaths,
    },
    log::info,
    std::{
        path::{Path, PathBuf},
        str::FromStr,
        time::Duration,
    },
};

/// Default upper bound on the run time of a single external tool.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Which [crate::ProfileDecoder] implementation decodes provisioning profiles.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProfileDecoderKind {
    /// `security cms -D` and `PlistBuddy`.
    Security,

    /// In-process CMS and plist parsing.
    Native,
}

impl Default for ProfileDecoderKind {
    fn default() -> Self {
        Self::Security
    }
}

impl FromStr for ProfileDecoderKind {
    type Err = ResignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "security" => Ok(Self::Security),
            "native" => Ok(Self::Native),
            _ => Err(ResignError::CliBadArgument),
        }
    }
}

/// Represents settings for re-signing a bundle.
///
/// Instances are constructed with defaults and then customized with setters.
#[derive(Clone, Debug)]
pub struct ResignSettings {
    provisioning_profile: Option<PathBuf>,
    work_dir: PathBuf,
    identity_policy: IdentityPolicy,
    decoder_kind: ProfileDecoderKind,
    tool_paths: ToolPaths,
    tool_timeout: Option<Duration>,
    staged: bool,
    verify: bool,
}

impl Default for ResignSettings {
    fn default() -> Self {
        Self {
            provisioning_profile: None,
            work_dir: default_work_dir(),
            identity_policy: IdentityPolicy::default(),
            decoder_kind: ProfileDecoderKind::default(),
            tool_paths: ToolPaths::default(),
            tool_timeout: Some(DEFAULT_TOOL_TIMEOUT),
            staged: false,
            verify: false,
        }
    }
}

impl ResignSettings {
    /// Explicit provisioning profile to sign with.
    ///
    /// If unset, the profile embedded in the bundle being signed is used.
    pub fn provisioning_profile(&self) -> Option<&Path> {
        self.provisioning_profile.as_deref()
    }

    pub fn set_provisioning_profile(&mut self, path: impl AsRef<Path>) {
        info!(
            "using explicit provisioning profile {}",
            path.as_ref().display()
        );
        self.provisioning_profile = Some(path.as_ref().to_path_buf());
    }

    /// Directory receiving extracted and decoded profile artifacts.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn set_work_dir(&mut self, path: impl AsRef<Path>) {
        self.work_dir = path.as_ref().to_path_buf();
    }

    /// How the signing identity is chosen among the profile's certificates.
    pub fn identity_policy(&self) -> &IdentityPolicy {
        &self.identity_policy
    }

    pub fn set_identity_policy(&mut self, policy: IdentityPolicy) {
        self.identity_policy = policy;
    }

    pub fn decoder_kind(&self) -> ProfileDecoderKind {
        self.decoder_kind
    }

    pub fn set_decoder_kind(&mut self, kind: ProfileDecoderKind) {
        self.decoder_kind = kind;
    }

    /// Locations of `security`, `PlistBuddy` and `codesign`.
    pub fn tool_paths(&self) -> &ToolPaths {
        &self.tool_paths
    }

    pub fn tool_paths_mut(&mut self) -> &mut ToolPaths {
        &mut self.tool_paths
    }

    /// Upper bound on the run time of each external tool invocation.
    ///
    /// `None` means no limit.
    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout
    }

    pub fn set_tool_timeout(&mut self, timeout: Option<Duration>) {
        self.tool_timeout = timeout;
    }

    /// Whether to sign a copy of the bundle and swap it into place.
    pub fn staged(&self) -> bool {
        self.staged
    }

    pub fn set_staged(&mut self, value: bool) {
        self.staged = value;
    }

    /// Whether to run `codesign --verify` once signing completes.
    pub fn verify(&self) -> bool {
        self.verify
    }

    pub fn set_verify(&mut self, value: bool) {
        self.verify = value;
    }
}

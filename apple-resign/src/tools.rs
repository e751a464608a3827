// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Interfaces to Apple's `security`, `PlistBuddy` and `codesign` tools. */

use {
    crate::{
        bundle_signing::CodeSigner,
        error::ResignError,
        identity::CodesignIdentity,
        process::{ProcessRunner, ToolInvocation},
        provisioning_profile::ProfileDecoder,
    },
    log::info,
    std::path::{Path, PathBuf},
};

/// Locations of the external tools.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolPaths {
    /// `security`, used for `security cms -D`.
    pub security: PathBuf,

    /// `PlistBuddy`.
    pub plist_buddy: PathBuf,

    /// `codesign`.
    pub codesign: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            security: PathBuf::from("security"),
            plist_buddy: PathBuf::from("/usr/libexec/PlistBuddy"),
            codesign: PathBuf::from("codesign"),
        }
    }
}

/// A [ProfileDecoder] backed by `security cms` and `PlistBuddy`.
pub struct ToolProfileDecoder<'a> {
    runner: &'a dyn ProcessRunner,
    paths: &'a ToolPaths,
}

impl<'a> ToolProfileDecoder<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, paths: &'a ToolPaths) -> Self {
        Self { runner, paths }
    }

    fn print_key(&self, decoded_path: &Path, key: &str) -> Result<String, ResignError> {
        let invocation = ToolInvocation::new(&self.paths.plist_buddy)
            .arg("-x")
            .arg("-c")
            .arg(format!("Print :{}", key))
            .arg(decoded_path);

        Ok(self.runner.run_checked(&invocation)?.stdout_string())
    }
}

impl<'a> ProfileDecoder for ToolProfileDecoder<'a> {
    fn decode_profile(&self, profile: &Path, decoded_path: &Path) -> Result<(), ResignError> {
        let invocation = ToolInvocation::new(&self.paths.security)
            .arg("cms")
            .arg("-D")
            .arg("-i")
            .arg(profile)
            .arg("-o")
            .arg(decoded_path);

        self.runner.run_checked(&invocation)?;

        Ok(())
    }

    fn print_entitlements(&self, decoded_path: &Path) -> Result<String, ResignError> {
        self.print_key(decoded_path, "Entitlements")
    }

    fn print_developer_certificates(&self, decoded_path: &Path) -> Result<String, ResignError> {
        self.print_key(decoded_path, "DeveloperCertificates")
    }
}

/// A [CodeSigner] backed by `codesign`.
pub struct CodesignTool<'a> {
    runner: &'a dyn ProcessRunner,
    paths: &'a ToolPaths,
}

impl<'a> CodesignTool<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, paths: &'a ToolPaths) -> Self {
        Self { runner, paths }
    }
}

impl<'a> CodeSigner for CodesignTool<'a> {
    fn remove_signature(&self, path: &Path) -> Result<(), ResignError> {
        let invocation = ToolInvocation::new(&self.paths.codesign)
            .arg("--remove-signature")
            .arg(path);

        self.runner.run_checked(&invocation)?;

        Ok(())
    }

    fn sign(
        &self,
        path: &Path,
        identity: &CodesignIdentity,
        entitlements: &Path,
    ) -> Result<(), ResignError> {
        info!("signing {} as {}", path.display(), identity.name());

        let invocation = ToolInvocation::new(&self.paths.codesign)
            .arg("-f")
            .arg("-s")
            .arg(identity.name())
            .arg("--entitlements")
            .arg(entitlements)
            .arg(path);

        self.runner.run_checked(&invocation)?;

        Ok(())
    }

    fn verify(&self, path: &Path) -> Result<(), ResignError> {
        let invocation = ToolInvocation::new(&self.paths.codesign)
            .arg("--verify")
            .arg("--deep")
            .arg("--strict")
            .arg(path);

        self.runner.run_checked(&invocation)?;

        Ok(())
    }
}

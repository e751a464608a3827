// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Functionality for re-signing Apple bundles.
//!
//! Code signatures nest: the signature of a bundle seals the signatures of
//! the frameworks, libraries and plugins inside it. An outer signature is
//! only valid if everything it contains was already signed when it was
//! computed. So signing always proceeds from the inside out:
//!
//! 1. The embedded provisioning profile is replaced.
//! 2. Embedded frameworks are re-signed.
//! 3. Nested test bundles are re-signed, recursively, as full bundles.
//! 4. Dynamic libraries in `Frameworks/` are re-signed.
//! 5. The bundle itself is signed.
//!
//! Signing the container first produces a bundle that fails verification
//! even though every individual `codesign` invocation succeeded.

use {
    crate::{
        error::ResignError,
        identity::CodesignIdentity,
        provisioning_profile::{create_scratch_dir, ProfileDecoder, ProvisioningProfile},
        settings::ResignSettings,
    },
    apple_bundles::ApplicationBundle,
    log::{info, warn},
    std::path::{Path, PathBuf},
};

/// Applies and removes code signatures.
pub trait CodeSigner {
    /// Remove any existing signature from a path.
    ///
    /// Removing the signature of unsigned code is not an error.
    fn remove_signature(&self, path: &Path) -> Result<(), ResignError>;

    /// Sign a path with an identity and entitlements.
    fn sign(
        &self,
        path: &Path,
        identity: &CodesignIdentity,
        entitlements: &Path,
    ) -> Result<(), ResignError>;

    /// Verify the signature of a path and everything nested in it.
    fn verify(&self, path: &Path) -> Result<(), ResignError>;
}

/// Code that can be signed as a unit after its nested code.
///
/// This is the shape [BundleResigner::sign_bundle] recurses over. Nested
/// bundles are themselves [SignableCode], so a test bundle inside an app gets
/// the full pipeline rather than a single `codesign` call.
pub trait SignableCode: Sized {
    /// Path that is signed last, sealing everything else.
    fn code_path(&self) -> &Path;

    /// Framework directories, signed as single items.
    fn frameworks(&self) -> Result<Vec<PathBuf>, ResignError>;

    /// Nested bundles, signed recursively.
    fn nested_bundles(&self) -> Result<Vec<Self>, ResignError>;

    /// Dynamic libraries, signed as single items.
    fn dylibs(&self) -> Result<Vec<PathBuf>, ResignError>;

    /// Install a provisioning profile file into this code.
    fn install_provisioning_profile(&self, profile: &Path) -> Result<(), ResignError>;
}

impl SignableCode for ApplicationBundle {
    fn code_path(&self) -> &Path {
        self.root_dir()
    }

    fn frameworks(&self) -> Result<Vec<PathBuf>, ResignError> {
        Ok(self.embedded_frameworks()?)
    }

    fn nested_bundles(&self) -> Result<Vec<Self>, ResignError> {
        self.xctest_bundles()?
            .into_iter()
            .map(|path| Ok(ApplicationBundle::new_from_path(path)?))
            .collect()
    }

    fn dylibs(&self) -> Result<Vec<PathBuf>, ResignError> {
        Ok(self.frameworks_dylibs()?)
    }

    fn install_provisioning_profile(&self, profile: &Path) -> Result<(), ResignError> {
        Ok(self.replace_embedded_provisioning_profile(profile)?)
    }
}

/// An item signed by [BundleResigner::sign_bundle].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningStep {
    /// Nesting level. 0 for items of the outermost bundle.
    pub depth: usize,

    /// Path passed to `codesign`.
    pub path: PathBuf,
}

/// The items [BundleResigner::sign_bundle] signs, in the order it signs them.
///
/// The bundle itself is always the final step.
pub fn signing_plan<C: SignableCode>(bundle: &C) -> Result<Vec<SigningStep>, ResignError> {
    fn walk<C: SignableCode>(
        bundle: &C,
        depth: usize,
        steps: &mut Vec<SigningStep>,
    ) -> Result<(), ResignError> {
        for path in bundle.frameworks()? {
            steps.push(SigningStep { depth, path });
        }

        for nested in bundle.nested_bundles()? {
            walk(&nested, depth + 1, steps)?;
        }

        for path in bundle.dylibs()? {
            steps.push(SigningStep { depth, path });
        }

        steps.push(SigningStep {
            depth,
            path: bundle.code_path().to_path_buf(),
        });

        Ok(())
    }

    let mut steps = vec![];
    walk(bundle, 0, &mut steps)?;

    Ok(steps)
}

/// Summary of a completed [BundleResigner::resign].
#[derive(Clone, Debug)]
pub struct ResignOutcome {
    /// The bundle that was signed.
    pub bundle_path: PathBuf,

    /// The provisioning profile installed into the bundle.
    pub profile_path: PathBuf,

    /// The identity used for signing.
    pub identity: CodesignIdentity,

    /// Number of `codesign` signing operations performed.
    pub signed_items: usize,
}

/// Drives the re-signing of bundles.
///
/// Holds no state between calls besides its collaborators. Callers must not
/// operate on the same bundle from concurrent invocations.
pub struct BundleResigner<'a> {
    settings: &'a ResignSettings,
    decoder: &'a dyn ProfileDecoder,
    signer: &'a dyn CodeSigner,
}

impl<'a> BundleResigner<'a> {
    /// Construct a new instance from settings and tool collaborators.
    pub fn new(
        settings: &'a ResignSettings,
        decoder: &'a dyn ProfileDecoder,
        signer: &'a dyn CodeSigner,
    ) -> Self {
        Self {
            settings,
            decoder,
            signer,
        }
    }

    /// Resolve the provisioning profile to sign with.
    ///
    /// An explicit profile from the settings wins. Otherwise the profile
    /// embedded in the bundle at `app_bundle_path` is extracted into the work
    /// directory and decoded.
    pub fn extract_profile(
        &self,
        app_bundle_path: Option<&Path>,
    ) -> Result<ProvisioningProfile, ResignError> {
        let work_dir = self.settings.work_dir();

        if let Some(explicit) = self.settings.provisioning_profile() {
            info!("using provisioning profile {}", explicit.display());

            return ProvisioningProfile::from_path(explicit, Some(work_dir), self.decoder).map_err(
                |e| {
                    ResignError::ProfileResolutionFailed(format!(
                        "decoding {}: {}",
                        explicit.display(),
                        e
                    ))
                },
            );
        }

        let app_bundle_path = app_bundle_path.ok_or_else(|| {
            ResignError::ProfileResolutionFailed(
                "no provisioning profile or bundle path given".to_string(),
            )
        })?;

        let extraction_dir = create_scratch_dir(work_dir, "embedded")?;

        let extracted = ApplicationBundle::new_from_path(app_bundle_path)
            .and_then(|bundle| bundle.extract_embedded_provisioning_profile(&extraction_dir))
            .map_err(|e| {
                ResignError::ProfileResolutionFailed(format!(
                    "extracting from {}: {}",
                    app_bundle_path.display(),
                    e
                ))
            })?
            .ok_or_else(|| {
                ResignError::ProfileResolutionFailed(format!(
                    "{} has no embedded provisioning profile",
                    app_bundle_path.display()
                ))
            })?;

        info!(
            "using provisioning profile embedded in {}",
            app_bundle_path.display()
        );

        ProvisioningProfile::from_path(&extracted, Some(work_dir), self.decoder).map_err(|e| {
            ResignError::ProfileResolutionFailed(format!("decoding {}: {}", extracted.display(), e))
        })
    }

    /// Re-sign a bundle and everything nested in it.
    ///
    /// Returns the number of signing operations performed.
    ///
    /// The first failure aborts the remaining steps and leaves the bundle
    /// partially re-signed. Use [BundleResigner::resign] with
    /// [ResignSettings::set_staged] for all-or-nothing behavior.
    pub fn sign_bundle<C: SignableCode>(
        &self,
        bundle: &C,
        profile: &ProvisioningProfile,
        identity: &CodesignIdentity,
    ) -> Result<usize, ResignError> {
        warn!("signing bundle at {}", bundle.code_path().display());

        let entitlements = profile.entitlements_path();
        let mut signed = 0;

        bundle.install_provisioning_profile(profile.source_path())?;

        for framework in bundle.frameworks()? {
            self.sign_item(&framework, identity, entitlements)?;
            signed += 1;
        }

        for nested in bundle.nested_bundles()? {
            info!("entering nested bundle {}", nested.code_path().display());
            signed += self.sign_bundle(&nested, profile, identity)?;
            info!("leaving nested bundle {}", nested.code_path().display());
        }

        for dylib in bundle.dylibs()? {
            self.sign_item(&dylib, identity, entitlements)?;
            signed += 1;
        }

        self.sign_item(bundle.code_path(), identity, entitlements)?;
        signed += 1;

        Ok(signed)
    }

    /// Strip the existing signature of an item and sign it again.
    ///
    /// The old signature is always discarded, even if it was already made by
    /// `identity`.
    pub fn sign_item(
        &self,
        item: &Path,
        identity: &CodesignIdentity,
        entitlements: &Path,
    ) -> Result<(), ResignError> {
        self.signer.remove_signature(item)?;
        self.signer.sign(item, identity, entitlements)
    }

    /// Re-sign the bundle at a path end to end.
    ///
    /// Resolves the profile, selects the identity with the configured policy,
    /// signs (in place, or staged and swapped in) and optionally verifies.
    pub fn resign(&self, bundle_path: impl AsRef<Path>) -> Result<ResignOutcome, ResignError> {
        let bundle_path = bundle_path.as_ref();
        let bundle = ApplicationBundle::new_from_path(bundle_path)?;

        let profile = self.extract_profile(Some(bundle_path))?;
        let identity = profile.select_codesign_identity(self.settings.identity_policy())?;

        warn!(
            "re-signing {} as {} ({})",
            bundle_path.display(),
            identity.name(),
            identity.hash()
        );

        let signed_items = if self.settings.staged() {
            self.sign_staged(&bundle, &profile, &identity)?
        } else {
            let signed = self.sign_bundle(&bundle, &profile, &identity)?;

            if self.settings.verify() {
                warn!("verifying {}", bundle_path.display());
                self.signer.verify(bundle_path)?;
            }

            signed
        };

        Ok(ResignOutcome {
            bundle_path: bundle_path.to_path_buf(),
            profile_path: profile.source_path().to_path_buf(),
            identity,
            signed_items,
        })
    }

    /// Sign a copy of the bundle and swap it into place on success.
    ///
    /// The copy lives in a temporary directory next to the bundle so the final
    /// swap is a same-filesystem rename. Verification, if enabled, runs on the
    /// copy so a failure leaves the original in place.
    fn sign_staged(
        &self,
        bundle: &ApplicationBundle,
        profile: &ProvisioningProfile,
        identity: &CodesignIdentity,
    ) -> Result<usize, ResignError> {
        let root = bundle.root_dir();
        let parent = root
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let staging = tempfile::Builder::new()
            .prefix(".apple-resign-")
            .tempdir_in(parent)?;

        let staged = bundle.copy_to(staging.path().join(bundle.name()))?;
        let signed = self.sign_bundle(&staged, profile, identity)?;

        if self.settings.verify() {
            warn!("verifying staged copy {}", staged.root_dir().display());
            self.signer.verify(staged.root_dir())?;
        }

        info!("swapping signed bundle into {}", root.display());
        swap_staged_bundle(
            staging,
            staged.root_dir(),
            root,
            &format!("{}.orig", bundle.name()),
            |from, to| std::fs::rename(from, to),
        )?;

        Ok(signed)
    }
}

/// Move a signed copy living in `staging` over `root`.
///
/// The original is first moved into `staging` as `backup_name`. If the copy
/// cannot be moved into place the original is moved back. If that fails too,
/// `staging` is kept on disk and the error names the preserved original.
/// Otherwise dropping `staging` discards the original.
fn swap_staged_bundle(
    staging: tempfile::TempDir,
    staged: &Path,
    root: &Path,
    backup_name: &str,
    rename: impl Fn(&Path, &Path) -> std::io::Result<()>,
) -> Result<(), ResignError> {
    let backup = staging.path().join(backup_name);

    rename(root, &backup)?;

    if let Err(swap) = rename(staged, root) {
        if let Err(restore) = rename(&backup, root) {
            // Holds the only copy of the original bundle now.
            let kept = staging.into_path();

            return Err(ResignError::StagedSwapFailed {
                bundle: root.to_path_buf(),
                backup: kept.join(backup_name),
                swap,
                restore,
            });
        }

        return Err(swap.into());
    }

    Ok(())
}

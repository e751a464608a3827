// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application bundles backed by a directory.

use {
    crate::BundleError,
    log::{debug, info},
    std::{
        io::Write,
        path::{Path, PathBuf},
    },
};

/// File name of the `Info.plist` in a bundle.
pub const INFO_PLIST: &str = "Info.plist";

/// File name of the provisioning profile embedded in a bundle.
pub const EMBEDDED_PROVISIONING_PROFILE: &str = "embedded.mobileprovision";

/// Directory holding embedded frameworks and dynamic libraries.
pub const FRAMEWORKS_DIR: &str = "Frameworks";

/// Directory holding plugin bundles.
pub const PLUGINS_DIR: &str = "PlugIns";

/// Extension of test plugin bundles.
pub const XCTEST_EXTENSION: &str = "xctest";

/// Extension of dynamic libraries.
pub const DYLIB_EXTENSION: &str = "dylib";

/// An application bundle backed by a filesystem directory.
///
/// Instances are a read-mostly view over the directory: nothing is cached
/// besides resolved paths, so every query reflects what is currently on disk.
/// The only mutating operation is
/// [ApplicationBundle::replace_embedded_provisioning_profile].
///
/// Nested test bundles (`PlugIns/*.xctest`) share the same layout and can be
/// opened as their own [ApplicationBundle].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApplicationBundle {
    /// Root directory of this bundle.
    root: PathBuf,

    /// Path to the `Info.plist` file. May not exist.
    info_plist_path: PathBuf,

    /// Path to the embedded provisioning profile. May not exist.
    embedded_profile_path: PathBuf,
}

impl ApplicationBundle {
    /// Open an existing bundle from a filesystem path.
    ///
    /// The path should be the root directory of the bundle. e.g. `MyApp.app`.
    ///
    /// Only the existence of the directory is validated. A missing `Info.plist`
    /// is reported by the functions that need it.
    pub fn new_from_path(path: impl AsRef<Path>) -> Result<Self, BundleError> {
        let root = path.as_ref();

        if root.as_os_str().is_empty() {
            return Err(BundleError::InvalidBundlePath);
        }

        if !root.is_dir() {
            return Err(BundleError::BundleNotFound(root.to_path_buf()));
        }

        Ok(Self {
            root: root.to_path_buf(),
            info_plist_path: root.join(INFO_PLIST),
            embedded_profile_path: root.join(EMBEDDED_PROVISIONING_PROFILE),
        })
    }

    /// The root directory of this bundle.
    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    /// The on-disk name of this bundle.
    ///
    /// Contains the `.app`, `.xctest`, etc suffix.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|x| x.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Path to the `Info.plist` file.
    pub fn info_plist_path(&self) -> &Path {
        &self.info_plist_path
    }

    /// Path where the embedded provisioning profile lives (or would live).
    pub fn embedded_provisioning_profile_path(&self) -> &Path {
        &self.embedded_profile_path
    }

    /// Obtain the parsed `Info.plist` file.
    pub fn info_plist(&self) -> Result<plist::Dictionary, BundleError> {
        if !self.info_plist_path.is_file() {
            return Err(BundleError::InfoPlistMissing(self.root.clone()));
        }

        let value = plist::Value::from_file(&self.info_plist_path)
            .map_err(|e| BundleError::InfoPlistParse(self.info_plist_path.clone(), e))?;

        value
            .into_dictionary()
            .ok_or_else(|| BundleError::InfoPlistNotDictionary(self.info_plist_path.clone()))
    }

    /// Obtain an `Info.plist` key as a `String`.
    ///
    /// Will return `None` if the specified key doesn't exist. Errors if the key value
    /// is not a string.
    pub fn info_plist_key_string(&self, key: &str) -> Result<Option<String>, BundleError> {
        if let Some(value) = self.info_plist()?.get(key) {
            Ok(Some(
                value
                    .as_string()
                    .ok_or_else(|| BundleError::InfoPlistKeyNotString(key.to_string()))?
                    .to_string(),
            ))
        } else {
            Ok(None)
        }
    }

    /// Obtain the bundle identifier.
    ///
    /// This retrieves `CFBundleIdentifier` from the `Info.plist`.
    pub fn identifier(&self) -> Result<Option<String>, BundleError> {
        self.info_plist_key_string("CFBundleIdentifier")
    }

    /// Human readable label: the bundle name, plus the identifier if known.
    ///
    /// A bundle without an `Info.plist` is labeled by its name alone. Other
    /// `Info.plist` problems are errors.
    pub fn display_name(&self) -> Result<String, BundleError> {
        match self.identifier() {
            Ok(Some(identifier)) => Ok(format!("{} ({})", self.name(), identifier)),
            Ok(None) | Err(BundleError::InfoPlistMissing(_)) => Ok(self.name()),
            Err(e) => Err(e),
        }
    }

    /// Obtain the name of the bundle's main executable file.
    ///
    /// This retrieves `CFBundleExecutable` from the `Info.plist`.
    pub fn main_executable(&self) -> Result<Option<String>, BundleError> {
        self.info_plist_key_string("CFBundleExecutable")
    }

    /// Obtain the absolute path to the bundle's main executable.
    pub fn main_executable_path(&self) -> Result<Option<PathBuf>, BundleError> {
        Ok(self.main_executable()?.map(|name| self.root.join(name)))
    }

    /// Whether the bundle currently carries an embedded provisioning profile.
    pub fn has_embedded_provisioning_profile(&self) -> bool {
        self.embedded_profile_path.is_file()
    }

    /// Copy the embedded provisioning profile into a directory.
    ///
    /// The directory is created if missing and an existing copy is overwritten.
    /// Returns the path of the copy, or `None` if the bundle has no embedded
    /// profile. Unsigned bundles legitimately lack one.
    pub fn extract_embedded_provisioning_profile(
        &self,
        extraction_dir: impl AsRef<Path>,
    ) -> Result<Option<PathBuf>, BundleError> {
        if !self.has_embedded_provisioning_profile() {
            debug!(
                "{} has no embedded provisioning profile",
                self.root.display()
            );
            return Ok(None);
        }

        let extraction_dir = extraction_dir.as_ref();
        std::fs::create_dir_all(extraction_dir)?;

        let dest_path = extraction_dir.join(EMBEDDED_PROVISIONING_PROFILE);
        info!(
            "copying {} -> {}",
            self.embedded_profile_path.display(),
            dest_path.display()
        );
        std::fs::copy(&self.embedded_profile_path, &dest_path)?;

        Ok(Some(dest_path))
    }

    /// Install a provisioning profile as the bundle's embedded profile.
    ///
    /// Content is written to a temporary file inside the bundle and renamed over
    /// `embedded.mobileprovision`, so readers observe either the old or the new
    /// profile and never a partial file.
    pub fn replace_embedded_provisioning_profile(
        &self,
        source: impl AsRef<Path>,
    ) -> Result<(), BundleError> {
        let source = source.as_ref();

        info!(
            "installing provisioning profile {} into {}",
            source.display(),
            self.root.display()
        );

        let data = std::fs::read(source)?;
        let permissions = std::fs::metadata(source)?.permissions();

        let mut temp = tempfile::NamedTempFile::new_in(&self.root)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        temp.as_file().set_permissions(permissions)?;

        temp.persist(&self.embedded_profile_path)
            .map_err(|e| BundleError::Io(e.error))?;

        Ok(())
    }

    /// Embedded framework directories.
    ///
    /// These are the immediate sub-directories of `Frameworks/`, sorted by name.
    /// Empty if the bundle has no `Frameworks` directory.
    pub fn embedded_frameworks(&self) -> Result<Vec<PathBuf>, BundleError> {
        list_directory(&self.root.join(FRAMEWORKS_DIR), |path| path.is_dir())
    }

    /// Nested test bundles.
    ///
    /// These are the `*.xctest` directories in `PlugIns/`, sorted by name.
    /// Empty if the bundle has no `PlugIns` directory.
    pub fn xctest_bundles(&self) -> Result<Vec<PathBuf>, BundleError> {
        list_directory(&self.root.join(PLUGINS_DIR), |path| {
            path.is_dir() && has_extension(path, XCTEST_EXTENSION)
        })
    }

    /// Dynamic libraries directly under `Frameworks/`.
    ///
    /// Libraries inside an embedded framework are not returned: they are
    /// covered by that framework's own signature.
    pub fn frameworks_dylibs(&self) -> Result<Vec<PathBuf>, BundleError> {
        list_directory(&self.root.join(FRAMEWORKS_DIR), |path| {
            path.is_file() && has_extension(path, DYLIB_EXTENSION)
        })
    }

    /// Copy the full bundle tree to a new directory.
    ///
    /// `dest_dir` must not exist. Symlinks are recreated rather than followed.
    /// Returns a view over the copy.
    pub fn copy_to(&self, dest_dir: impl AsRef<Path>) -> Result<Self, BundleError> {
        let dest_dir = dest_dir.as_ref();

        info!(
            "copying bundle {} -> {}",
            self.root.display(),
            dest_dir.display()
        );

        for entry in walkdir::WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry?;

            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            let dest_path = dest_dir.join(rel);

            let file_type = entry.file_type();

            if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path())?;
                copy_symlink(&target, &dest_path)?;
            } else if file_type.is_dir() {
                std::fs::create_dir_all(&dest_path)?;
            } else {
                std::fs::copy(entry.path(), &dest_path)?;
            }
        }

        Self::new_from_path(dest_dir)
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|x| x.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// List entries of a directory satisfying a filter, sorted by path.
///
/// A missing directory yields an empty list.
fn list_directory(
    dir: &Path,
    filter: impl Fn(&Path) -> bool,
) -> Result<Vec<PathBuf>, BundleError> {
    if !dir.is_dir() {
        return Ok(vec![]);
    }

    let mut res = vec![];

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if filter(&path) {
            res.push(path);
        }
    }

    // Be deterministic.
    res.sort();

    Ok(res)
}

#[cfg(unix)]
fn copy_symlink(target: &Path, dest: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, dest)
}

#[cfg(not(unix))]
fn copy_symlink(target: &Path, dest: &Path) -> std::io::Result<()> {
    let resolved = dest.parent().map(|p| p.join(target)).unwrap_or_default();

    std::fs::copy(resolved, dest).map(|_| ())
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interact with Apple application bundles on the filesystem.
//!
//! An iOS application bundle is a directory with a well-known layout:
//!
//! ```text
//! MyApp.app/
//!   Info.plist
//!   embedded.mobileprovision
//!   Frameworks/
//!     Foo.framework/
//!     libswiftCore.dylib
//!   PlugIns/
//!     MyAppTests.xctest/
//! ```
//!
//! [ApplicationBundle] exposes the pieces of that layout that matter when
//! re-signing a bundle: the embedded provisioning profile, the embedded
//! frameworks and dynamic libraries, and nested test bundles (which are
//! themselves bundles with the same layout).

mod application_bundle;
pub use application_bundle::*;

use std::path::PathBuf;

/// Errors from interacting with bundles.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("bundle path is empty")]
    InvalidBundlePath,

    #[error("bundle directory does not exist: {0}")]
    BundleNotFound(PathBuf),

    #[error("bundle does not contain an Info.plist: {0}")]
    InfoPlistMissing(PathBuf),

    #[error("error parsing {0}: {1}")]
    InfoPlistParse(PathBuf, plist::Error),

    #[error("{0} is not a dictionary")]
    InfoPlistNotDictionary(PathBuf),

    #[error("Info.plist key {0} is not a string")]
    InfoPlistKeyNotString(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error walking bundle directory: {0}")]
    WalkDir(#[from] walkdir::Error),
}

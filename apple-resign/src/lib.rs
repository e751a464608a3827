// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Re-signing of iOS application bundles.
//!
//! This crate takes an existing `.app` bundle (typically a test runner
//! produced by a build on another machine) and re-signs it with a local
//! developer identity so it can be installed on a device.
//!
//! Signing itself is performed by Apple's `codesign` tool. This crate decides
//! *what* to sign, with *which* identity and entitlements, and in *which*
//! order:
//!
//! * A provisioning profile is resolved: either given explicitly or extracted
//!   from the bundle's `embedded.mobileprovision`. (See [ProvisioningProfile].)
//! * The profile is decoded into its entitlements and developer certificates.
//!   Decoding can use Apple's `security` and `PlistBuddy` tools
//!   ([ToolProfileDecoder]) or happen in-process ([NativeProfileDecoder]).
//! * A signing identity is chosen from the certificates. (See
//!   [IdentityPolicy].)
//! * The bundle is signed inside out: frameworks, nested test bundles,
//!   dynamic libraries and finally the bundle itself. (See [BundleResigner].)
//!
//! All external programs are run through a [ProcessRunner], which enforces a
//! timeout and turns non-zero exits into [ResignError::ExternalToolFailed].
//!
//! # Caveats
//!
//! In-place signing is not transactional: a failure part way through leaves a
//! partially re-signed bundle. [ResignSettings::set_staged] signs a copy and
//! swaps it in only on success.
//!
//! Nothing prevents two invocations from signing the same bundle at the same
//! time. Don't do that.

mod bundle_signing;
pub use bundle_signing::*;
mod certificate;
pub use certificate::*;
mod error;
pub use error::*;
mod identity;
pub use identity::*;
mod process;
pub use process::*;
mod provisioning_profile;
pub use provisioning_profile::*;
mod settings;
pub use settings::*;
mod tools;
pub use tools::*;

#[cfg(test)]
mod testutil;

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    apple_bundles::BundleError,
    cryptographic_message_syntax::CmsError,
    std::{path::PathBuf, time::Duration},
    thiserror::Error,
};

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Unified error type for bundle re-signing.
#[derive(Debug, Error)]
pub enum ResignError {
    #[error("unknown command")]
    CliUnknownCommand,

    #[error("bad argument")]
    CliBadArgument,

    #[error("{0}")]
    CliGeneralError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("CMS error: {0}")]
    Cms(#[from] CmsError),

    #[error("plist error in {0}: {1}")]
    Plist(PathBuf, plist::Error),

    #[error("decoding provisioning profile {0} produced no output")]
    ProfileDecodeFailed(PathBuf),

    #[error("no entitlements found in decoded provisioning profile {0}")]
    EntitlementsExtractionFailed(PathBuf),

    #[error("unable to parse developer certificate list: {0}")]
    CertificateListParseFailed(String),

    #[error("provisioning profile {0} does not contain developer certificates")]
    NoCertificatesFound(PathBuf),

    #[error("malformed developer certificate: {0}")]
    MalformedCertificate(String),

    #[error("certificate subject has no common name: {0}")]
    MissingCommonName(String),

    #[error("unable to resolve provisioning profile: {0}")]
    ProfileResolutionFailed(String),

    #[error("no certificate in provisioning profile matches {0}")]
    IdentityNotFound(String),

    #[error("unable to parse identity policy: {0}")]
    BadIdentityPolicy(String),

    #[error("failed to launch {tool}: {source}")]
    ToolSpawn {
        tool: String,
        source: std::io::Error,
    },

    #[error("unable to swap signed bundle into {bundle} ({swap}) or restore it ({restore}); original preserved at {backup}")]
    StagedSwapFailed {
        bundle: PathBuf,
        backup: PathBuf,
        swap: std::io::Error,
        restore: std::io::Error,
    },

    #[error("{tool} did not finish within {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("{tool} {arguments:?} failed with {}: {stderr}", describe_status(.status))]
    ExternalToolFailed {
        tool: String,
        arguments: Vec<String>,
        status: Option<i32>,
        stderr: String,
    },
}

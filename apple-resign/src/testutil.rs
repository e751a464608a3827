// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared test fixtures.

use {
    crate::{
        error::ResignError,
        process::{ProcessRunner, ToolInvocation, ToolOutput},
        tools::ToolPaths,
    },
    std::{
        path::{Path, PathBuf},
        sync::Mutex,
    },
};

/// `iPhone Developer: Jane Appleseed (ABCDE12345)`, OU `TEAM123456`.
pub const IPHONE_DEVELOPER_CERT: &str = include_str!("testdata/iphone-developer.b64");
pub const IPHONE_DEVELOPER_SHA1: &str = "44A8500939EBE543933CC8663BDF91D36BC5AC79";

/// `Apple Development: Sam Example (XYZW987654)`.
pub const APPLE_DEVELOPMENT_CERT: &str = include_str!("testdata/apple-development.b64");
pub const APPLE_DEVELOPMENT_SHA1: &str = "28578A6BA9C671F78F75270E58F085B01C55F6C7";

/// `Apple Development: Doe, John (ABC123)`, OU `TEAM654321`.
pub const COMMA_COMMON_NAME_CERT: &str = include_str!("testdata/comma-common-name.b64");

/// Certificate whose subject lacks a common name.
pub const NO_COMMON_NAME_CERT: &str = include_str!("testdata/no-common-name.b64");

/// Signed profile embedding both developer certificates above.
pub const TWO_CERTIFICATES_PROFILE: &[u8] =
    include_bytes!("testdata/two-certificates.mobileprovision");

/// Signed profile with an empty `DeveloperCertificates` array.
pub const NO_CERTIFICATES_PROFILE: &[u8] =
    include_bytes!("testdata/no-certificates.mobileprovision");

/// Content of [TWO_CERTIFICATES_PROFILE].
pub const TWO_CERTIFICATES_PLIST: &[u8] = include_bytes!("testdata/two-certificates.plist");

/// Entitlements as `PlistBuddy -x -c "Print :Entitlements"` renders them.
pub const ENTITLEMENTS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>application-identifier</key>
	<string>TEAM123456.com.example.runner</string>
	<key>com.apple.developer.team-identifier</key>
	<string>TEAM123456</string>
	<key>get-task-allow</key>
	<true/>
	<key>keychain-access-groups</key>
	<array>
		<string>TEAM123456.*</string>
	</array>
</dict>
</plist>
"#;

/// Standard error of invocations failed by [RecordingRunner::fail_when].
pub const SIMULATED_FAILURE: &str = "simulated failure";

pub fn temp_dir() -> Result<(tempfile::TempDir, PathBuf), ResignError> {
    let td = tempfile::Builder::new()
        .prefix("apple-resign-test-")
        .tempdir()?;
    let path = td.path().to_path_buf();

    Ok((td, path))
}

pub fn test_tool_paths() -> ToolPaths {
    ToolPaths::default()
}

/// Write [TWO_CERTIFICATES_PROFILE] into a directory.
pub fn write_profile_fixture(dir: &Path) -> Result<PathBuf, ResignError> {
    let path = dir.join("two-certificates.mobileprovision");
    std::fs::write(&path, TWO_CERTIFICATES_PROFILE)?;

    Ok(path)
}

/// Render base64 values the way `PlistBuddy` prints a `<data>` array.
pub fn certificates_xml(values: &[&str]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \
         \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
         <plist version=\"1.0\">\n<array>\n",
    );

    for value in values {
        xml.push_str("\t<data>\n");
        for chunk in value.trim().as_bytes().chunks(52) {
            xml.push('\t');
            xml.push_str(&String::from_utf8_lossy(chunk));
            xml.push('\n');
        }
        xml.push_str("\t</data>\n");
    }

    xml.push_str("</array>\n</plist>\n");

    xml
}

/// Create a minimal bundle directory.
///
/// `frameworks` become directories under `Frameworks/`, each holding a
/// binary. `dylibs` become files under `Frameworks/`. The main executable is
/// named after the bundle and contains `<name> executable`.
pub fn create_bundle(
    parent: &Path,
    name: &str,
    frameworks: &[&str],
    dylibs: &[&str],
) -> Result<PathBuf, ResignError> {
    let root = parent.join(name);
    let executable = Path::new(name)
        .file_stem()
        .map(|x| x.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());

    std::fs::create_dir_all(&root)?;
    std::fs::write(
        root.join("Info.plist"),
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <plist version=\"1.0\">\n<dict>\n\
             \t<key>CFBundleIdentifier</key>\n\t<string>com.example.{}</string>\n\
             \t<key>CFBundleExecutable</key>\n\t<string>{}</string>\n\
             </dict>\n</plist>\n",
            executable.to_lowercase(),
            executable
        ),
    )?;
    std::fs::write(
        root.join(&executable),
        format!("{} executable", executable),
    )?;

    let frameworks_dir = root.join("Frameworks");

    for framework in frameworks {
        let dir = frameworks_dir.join(framework);
        std::fs::create_dir_all(&dir)?;

        let binary = Path::new(framework)
            .file_stem()
            .map(|x| x.to_string_lossy().to_string())
            .unwrap_or_default();
        std::fs::write(dir.join(binary), b"framework binary")?;
    }

    for dylib in dylibs {
        std::fs::create_dir_all(&frameworks_dir)?;
        std::fs::write(frameworks_dir.join(dylib), b"dylib binary")?;
    }

    Ok(root)
}

/// Relative paths and contents of all files under a directory, sorted.
pub fn list_tree(root: &Path) -> Result<Vec<(PathBuf, Vec<u8>)>, ResignError> {
    let mut res = vec![];

    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| ResignError::CliGeneralError(e.to_string()))?;

        if entry.file_type().is_file() {
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| ResignError::CliGeneralError(e.to_string()))?;
            res.push((rel.to_path_buf(), std::fs::read(entry.path())?));
        }
    }

    Ok(res)
}

/// An invocation seen by [RecordingRunner].
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub program: PathBuf,
    pub tool: String,
    pub args: Vec<String>,
}

/// A [ProcessRunner] that simulates `security`, `PlistBuddy` and `codesign`.
///
/// `security cms -D ... -o <path>` writes [TWO_CERTIFICATES_PLIST] to `<path>`.
/// `PlistBuddy` prints the configured entitlements or certificates XML.
/// `codesign` always succeeds. Any other program exits with 127.
pub struct RecordingRunner {
    calls: Mutex<Vec<RecordedCall>>,
    entitlements_xml: String,
    certificates_xml: String,
    decode_output: bool,
    fail_pattern: Option<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(vec![]),
            entitlements_xml: ENTITLEMENTS_XML.to_string(),
            certificates_xml: certificates_xml(&[IPHONE_DEVELOPER_CERT, APPLE_DEVELOPMENT_CERT]),
            decode_output: true,
            fail_pattern: None,
        }
    }

    pub fn with_entitlements_xml(mut self, xml: &str) -> Self {
        self.entitlements_xml = xml.to_string();
        self
    }

    pub fn with_certificates_xml(mut self, xml: &str) -> Self {
        self.certificates_xml = xml.to_string();
        self
    }

    /// Have `security cms -D` succeed without writing anything.
    pub fn without_decode_output(mut self) -> Self {
        self.decode_output = false;
        self
    }

    /// Fail invocations having an argument equal to or ending with `pattern`.
    pub fn fail_when(mut self, pattern: &str) -> Self {
        self.fail_pattern = Some(pattern.to_string());
        self
    }

    /// Invocations seen so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn simulate_security(&self, args: &[String]) -> Result<ToolOutput, ResignError> {
        if self.decode_output {
            let output = args
                .iter()
                .position(|a| a == "-o")
                .and_then(|i| args.get(i + 1))
                .ok_or_else(|| ResignError::CliGeneralError("missing -o".into()))?;

            std::fs::write(output, TWO_CERTIFICATES_PLIST)?;
        }

        Ok(success(vec![]))
    }

    fn simulate_plist_buddy(&self, args: &[String]) -> ToolOutput {
        if args.iter().any(|a| a == "Print :Entitlements") {
            success(self.entitlements_xml.as_bytes().to_vec())
        } else if args.iter().any(|a| a == "Print :DeveloperCertificates") {
            success(self.certificates_xml.as_bytes().to_vec())
        } else {
            ToolOutput {
                status: Some(1),
                stdout: vec![],
                stderr: b"Print: Entry, \":Unknown\", Does Not Exist".to_vec(),
            }
        }
    }
}

fn success(stdout: Vec<u8>) -> ToolOutput {
    ToolOutput {
        status: Some(0),
        stdout,
        stderr: vec![],
    }
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ResignError> {
        let call = RecordedCall {
            program: invocation.program().to_path_buf(),
            tool: invocation.tool_name(),
            args: invocation.args_lossy(),
        };
        self.calls.lock().unwrap().push(call.clone());

        if let Some(pattern) = &self.fail_pattern {
            if call
                .args
                .iter()
                .any(|a| a == pattern || a.ends_with(pattern.as_str()))
            {
                return Ok(ToolOutput {
                    status: Some(1),
                    stdout: vec![],
                    stderr: SIMULATED_FAILURE.as_bytes().to_vec(),
                });
            }
        }

        match call.tool.as_str() {
            "security" => self.simulate_security(&call.args),
            "PlistBuddy" => Ok(self.simulate_plist_buddy(&call.args)),
            "codesign" => Ok(success(vec![])),
            _ => Ok(ToolOutput {
                status: Some(127),
                stdout: vec![],
                stderr: b"command not found".to_vec(),
            }),
        }
    }
}

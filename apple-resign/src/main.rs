// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    apple_bundles::ApplicationBundle,
    apple_resign::{
        BundleResigner, CodesignTool, DuctProcessRunner, IdentityPolicy, NativeProfileDecoder,
        ProfileDecoder, ProfileDecoderKind, ProvisioningProfile, ResignError, ResignSettings,
        ToolProfileDecoder, signing_plan,
    },
    clap::{Arg, ArgMatches, Command},
    log::{warn, LevelFilter},
    std::{path::Path, str::FromStr, time::Duration},
};

const SIGN_ABOUT: &str = "\
Re-sign an iOS application bundle.

The provisioning profile given by --profile, or the profile embedded in the
bundle, is installed into the bundle. Embedded frameworks, nested .xctest
bundles and dylibs in Frameworks/ are then re-signed with an identity from
the profile, followed by the bundle itself.

The identity is chosen with --identity:

  first                 the first certificate in the profile (default)
  name:<common name>    the certificate with this subject common name
  sha1:<fingerprint>    the certificate with this SHA-1 fingerprint

The corresponding private key must be available to `codesign`.
";

fn add_decoder_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("decoder")
                .long("decoder")
                .takes_value(true)
                .possible_values(&["security", "native"])
                .default_value("security")
                .help("How to decode provisioning profiles"),
        )
        .arg(
            Arg::new("work_dir")
                .long("work-dir")
                .takes_value(true)
                .help("Directory receiving decoded profile files"),
        )
        .arg(
            Arg::new("security_path")
                .long("security-path")
                .takes_value(true)
                .help("Path to the `security` program"),
        )
        .arg(
            Arg::new("plistbuddy_path")
                .long("plistbuddy-path")
                .takes_value(true)
                .help("Path to the `PlistBuddy` program"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .takes_value(true)
                .default_value("300")
                .help("Seconds an external tool may run before it is killed (0 disables)"),
        )
}

fn settings_from_args(args: &ArgMatches) -> Result<ResignSettings, ResignError> {
    let mut settings = ResignSettings::default();

    if let Some(kind) = args.value_of("decoder") {
        settings.set_decoder_kind(ProfileDecoderKind::from_str(kind)?);
    }

    if let Some(path) = args.value_of("work_dir") {
        settings.set_work_dir(path);
    }

    if let Some(path) = args.value_of("security_path") {
        settings.tool_paths_mut().security = path.into();
    }

    if let Some(path) = args.value_of("plistbuddy_path") {
        settings.tool_paths_mut().plist_buddy = path.into();
    }

    if let Some(value) = args.value_of("timeout") {
        let seconds = u64::from_str(value).map_err(|_| ResignError::CliBadArgument)?;

        settings.set_tool_timeout(if seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(seconds))
        });
    }

    Ok(settings)
}

fn command_sign(args: &ArgMatches) -> Result<(), ResignError> {
    let bundle_path = args
        .value_of("path")
        .ok_or(ResignError::CliBadArgument)?;

    let mut settings = settings_from_args(args)?;

    if let Some(path) = args.value_of("profile") {
        settings.set_provisioning_profile(path);
    }

    if let Some(policy) = args.value_of("identity") {
        settings.set_identity_policy(IdentityPolicy::from_str(policy)?);
    }

    if let Some(path) = args.value_of("codesign_path") {
        settings.tool_paths_mut().codesign = path.into();
    }

    settings.set_staged(args.is_present("staged"));
    settings.set_verify(args.is_present("verify"));

    let runner = DuctProcessRunner::new(settings.tool_timeout());
    let tool_decoder = ToolProfileDecoder::new(&runner, settings.tool_paths());
    let decoder: &dyn ProfileDecoder = match settings.decoder_kind() {
        ProfileDecoderKind::Security => &tool_decoder,
        ProfileDecoderKind::Native => &NativeProfileDecoder,
    };
    let signer = CodesignTool::new(&runner, settings.tool_paths());

    let resigner = BundleResigner::new(&settings, decoder, &signer);
    let outcome = resigner.resign(bundle_path)?;

    warn!(
        "re-signed {} ({} items) as {}",
        outcome.bundle_path.display(),
        outcome.signed_items,
        outcome.identity.name()
    );

    Ok(())
}

fn command_extract_profile(args: &ArgMatches) -> Result<(), ResignError> {
    let bundle_path = args
        .value_of("path")
        .ok_or(ResignError::CliBadArgument)?;
    let dest_dir = args
        .value_of("dest_dir")
        .ok_or(ResignError::CliBadArgument)?;

    let bundle = ApplicationBundle::new_from_path(bundle_path)?;

    match bundle.extract_embedded_provisioning_profile(dest_dir)? {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => Err(ResignError::CliGeneralError(format!(
            "{} has no embedded provisioning profile",
            bundle_path
        ))),
    }
}

fn command_print_profile(args: &ArgMatches) -> Result<(), ResignError> {
    let profile_path = args
        .value_of("path")
        .ok_or(ResignError::CliBadArgument)?;

    let settings = settings_from_args(args)?;

    let runner = DuctProcessRunner::new(settings.tool_timeout());
    let tool_decoder = ToolProfileDecoder::new(&runner, settings.tool_paths());
    let decoder: &dyn ProfileDecoder = match settings.decoder_kind() {
        ProfileDecoderKind::Security => &tool_decoder,
        ProfileDecoderKind::Native => &NativeProfileDecoder,
    };

    let profile = ProvisioningProfile::from_path(profile_path, Some(settings.work_dir()), decoder)?;

    println!("developer certificates:");
    for cert in profile.certificates() {
        println!("  {}", cert.common_name());
        println!("    sha1:    {}", cert.hash());
        if let Some(team_id) = cert.team_id() {
            println!("    team id: {}", team_id);
        }
    }

    println!("entitlements:");
    let mut entitlements = profile.entitlements()?.into_iter().collect::<Vec<_>>();
    entitlements.sort_by(|a, b| a.0.cmp(&b.0));

    for (key, value) in entitlements {
        match value {
            plist::Value::String(s) => println!("  {}: {}", key, s),
            plist::Value::Boolean(b) => println!("  {}: {}", key, b),
            plist::Value::Array(values) => {
                println!("  {}:", key);
                for v in values {
                    match v.as_string() {
                        Some(s) => println!("    - {}", s),
                        None => println!("    - {:?}", v),
                    }
                }
            }
            other => println!("  {}: {:?}", key, other),
        }
    }

    Ok(())
}

fn command_list_nested(args: &ArgMatches) -> Result<(), ResignError> {
    let bundle_path = args
        .value_of("path")
        .ok_or(ResignError::CliBadArgument)?;

    let bundle = ApplicationBundle::new_from_path(Path::new(bundle_path))?;

    println!("bundle {}", bundle.display_name()?);

    for step in signing_plan(&bundle)? {
        println!("{}{}", "  ".repeat(step.depth + 1), step.path.display());
    }

    Ok(())
}

fn main_impl() -> Result<(), ResignError> {
    let app = Command::new("Re-sign iOS application bundles")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Re-sign iOS application bundles with a provisioning profile")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(add_decoder_args(
        Command::new("sign")
            .about("Re-sign a bundle and everything nested in it")
            .long_about(SIGN_ABOUT)
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path to the .app bundle to re-sign"),
            )
            .arg(
                Arg::new("profile")
                    .long("profile")
                    .takes_value(true)
                    .help("Provisioning profile to install instead of the embedded one"),
            )
            .arg(
                Arg::new("identity")
                    .long("identity")
                    .takes_value(true)
                    .default_value("first")
                    .help("How to choose the signing identity from the profile"),
            )
            .arg(
                Arg::new("codesign_path")
                    .long("codesign-path")
                    .takes_value(true)
                    .help("Path to the `codesign` program"),
            )
            .arg(
                Arg::new("staged")
                    .long("staged")
                    .help("Sign a copy of the bundle and swap it into place on success"),
            )
            .arg(
                Arg::new("verify")
                    .long("verify")
                    .help("Verify the signature after signing"),
            ),
    ));

    let app = app.subcommand(
        Command::new("extract-profile")
            .about("Copy a bundle's embedded provisioning profile into a directory")
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path to the bundle"),
            )
            .arg(
                Arg::new("dest_dir")
                    .required(true)
                    .help("Directory to copy the profile into"),
            ),
    );

    let app = app.subcommand(add_decoder_args(
        Command::new("print-profile")
            .about("Print the certificates and entitlements of a provisioning profile")
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path to the .mobileprovision file"),
            ),
    ));

    let app = app.subcommand(
        Command::new("list-nested")
            .about("List the code of a bundle in signing order, the bundle itself last")
            .arg(
                Arg::new("path")
                    .required(true)
                    .help("Path to the bundle"),
            ),
    );

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("extract-profile", args)) => command_extract_profile(args),
        Some(("list-nested", args)) => command_list_nested(args),
        Some(("print-profile", args)) => command_print_profile(args),
        Some(("sign", args)) => command_sign(args),
        _ => Err(ResignError::CliUnknownCommand),
    }
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };

    std::process::exit(exit_code)
}

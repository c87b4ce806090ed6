//! Binary entry point for dbkeys.
//!
//! Meant to be wired into sshd as
//! `AuthorizedKeysCommand /usr/bin/dbkeys lookup %u %f`. Lookups are
//! fail-closed: any failure prints no keys and exits successfully, which sshd
//! treats as "no authorized keys".

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand, ValueEnum};
use dbkeys::config::DbKeysConfig;
use dbkeys::models::FingerprintFormat;
use dbkeys::observability::{self, LoggingConfig};
use dbkeys::{FingerprintSource, KeyRecordList, KeyResolver, OpenSshPublicKey};
use std::path::Path;
use std::process::ExitCode;

/// dbkeys - Database-backed SSH public key lookup.
#[derive(Parser)]
#[command(name = "dbkeys")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Print the keys authorized for a user and fingerprint.
    Lookup {
        /// Login name (sshd `%u`).
        username: String,

        /// Key fingerprint (sshd `%f`).
        #[arg(required_unless_present = "key", conflicts_with = "key")]
        fingerprint: Option<String>,

        /// OpenSSH public key line; its fingerprint is looked up.
        #[arg(short, long)]
        key: Option<String>,

        /// Fingerprint computed from `--key`.
        #[arg(long, value_enum, default_value_t = HashFormat::Sha256, requires = "key")]
        hash: HashFormat,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t = OutputFormat::AuthorizedKeys)]
        format: OutputFormat,
    },

    /// Print the fingerprint of an OpenSSH public key line.
    Fingerprint {
        /// The public key line, e.g. `ssh-ed25519 AAAA... comment`.
        key: String,

        /// Fingerprint to print.
        #[arg(long, value_enum, default_value_t = HashFormat::Sha256)]
        hash: HashFormat,

        /// Shorthand for `--hash sha256-hex`.
        #[arg(long, conflicts_with = "hash")]
        hex: bool,
    },

    /// Connect to the key database, probe it and disconnect.
    Check,

    /// Print the effective configuration with the password redacted.
    Config,
}

/// Lookup output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// `authorized_keys` lines.
    AuthorizedKeys,
    /// A JSON array of records.
    Json,
}

/// Fingerprint hashes computed from a public key line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HashFormat {
    /// `SHA256:<base64>`, as sshd substitutes for `%f`.
    Sha256,
    /// Colon-separated hex of the SHA-256 digest.
    Sha256Hex,
    /// Colon-separated hex of the MD5 digest (legacy key tables).
    Md5,
}

impl From<HashFormat> for FingerprintFormat {
    fn from(hash: HashFormat) -> Self {
        match hash {
            HashFormat::Sha256 => Self::Sha256Base64,
            HashFormat::Sha256Hex => Self::Sha256Hex,
            HashFormat::Md5 => Self::Md5Hex,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init_logging(LoggingConfig::from_settings(
        &config.logging,
        cli.verbose,
    )) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(
    command: Commands,
    config: &DbKeysConfig,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Commands::Lookup {
            username,
            fingerprint,
            key,
            hash,
            format,
        } => Ok(cmd_lookup(
            config,
            &username,
            fingerprint.as_deref(),
            key.as_deref(),
            hash,
            format,
        )),
        Commands::Fingerprint { key, hash, hex } => {
            cmd_fingerprint(&key, if hex { HashFormat::Sha256Hex } else { hash })
        },
        Commands::Check => Ok(cmd_check(config)),
        Commands::Config => cmd_config(config),
    }
}

/// Looks up keys. Fail-closed: errors are logged and nothing is printed.
fn cmd_lookup(
    config: &DbKeysConfig,
    username: &str,
    fingerprint: Option<&str>,
    key: Option<&str>,
    hash: HashFormat,
    format: OutputFormat,
) -> ExitCode {
    let resolver = match KeyResolver::from_config(config) {
        Ok(resolver) => resolver,
        Err(e) => {
            tracing::error!(error = %e, "Cannot create key resolver");
            return ExitCode::SUCCESS;
        },
    };

    let keys = match (fingerprint, key) {
        (Some(fingerprint), _) => resolver.search(fingerprint, username),
        (None, Some(line)) => match OpenSshPublicKey::parse(line) {
            Ok(public_key) => resolver.search(&public_key.with_format(hash.into()), username),
            Err(e) => {
                tracing::error!(error = %e, "Cannot parse public key");
                KeyRecordList::empty()
            },
        },
        (None, None) => KeyRecordList::empty(),
    };

    match format {
        OutputFormat::AuthorizedKeys => print!("{}", keys.to_authorized_keys()),
        OutputFormat::Json => match serde_json::to_string_pretty(&keys) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::error!(error = %e, "Cannot serialize keys"),
        },
    }
    ExitCode::SUCCESS
}

/// Prints a public key fingerprint.
fn cmd_fingerprint(line: &str, hash: HashFormat) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let key = OpenSshPublicKey::parse(line)?.with_format(hash.into());
    println!("{}", key.fingerprint());
    Ok(ExitCode::SUCCESS)
}

/// Probes the key database.
fn cmd_check(config: &DbKeysConfig) -> ExitCode {
    let result = KeyResolver::from_config(config).and_then(|resolver| resolver.check());
    match result {
        Ok(()) => {
            println!("{}: connection ok", config.backend);
            ExitCode::SUCCESS
        },
        Err(e) => {
            eprintln!("{}: {e}", config.backend);
            ExitCode::FAILURE
        },
    }
}

/// Prints the effective configuration.
fn cmd_config(config: &DbKeysConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    print!("{}", toml::to_string_pretty(&config.report())?);
    Ok(ExitCode::SUCCESS)
}

/// Loads configuration from `--config`, `DBKEYS_CONFIG_PATH` or the default
/// locations, then applies environment overrides.
fn load_config(path: Option<&str>) -> Result<DbKeysConfig, Box<dyn std::error::Error>> {
    let config = if let Some(config_path) = path {
        DbKeysConfig::load_from_file(Path::new(config_path))?
    } else {
        match std::env::var("DBKEYS_CONFIG_PATH") {
            Ok(config_path) if !config_path.trim().is_empty() => {
                DbKeysConfig::load_from_file(Path::new(&config_path))?
            },
            _ => DbKeysConfig::load_default(),
        }
    };

    Ok(config.with_env_overrides()?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    fn fingerprint_hash(args: &[&str]) -> HashFormat {
        match Cli::try_parse_from(args).unwrap().command {
            Commands::Fingerprint { hash, hex, .. } => {
                if hex {
                    HashFormat::Sha256Hex
                } else {
                    hash
                }
            },
            _ => panic!("expected the fingerprint command"),
        }
    }

    #[test]
    fn test_fingerprint_hash_selection() {
        assert_eq!(fingerprint_hash(&["dbkeys", "fingerprint", "k"]), HashFormat::Sha256);
        assert_eq!(
            fingerprint_hash(&["dbkeys", "fingerprint", "k", "--hash", "md5"]),
            HashFormat::Md5
        );
        assert_eq!(
            fingerprint_hash(&["dbkeys", "fingerprint", "k", "--hex"]),
            HashFormat::Sha256Hex
        );
        assert_eq!(
            FingerprintFormat::from(HashFormat::Md5),
            FingerprintFormat::Md5Hex
        );
    }

    #[test]
    fn test_lookup_hash_requires_key() {
        assert!(Cli::try_parse_from(["dbkeys", "lookup", "alice", "fp", "--hash", "md5"]).is_err());
        let cli =
            Cli::try_parse_from(["dbkeys", "lookup", "alice", "--key", "k", "--hash", "md5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Lookup {
                hash: HashFormat::Md5,
                ..
            }
        ));
    }
}

//! Command-line and environment configuration for both binaries.
//!
//! Flags win over environment variables; environment variables win over
//! built-in defaults.

use crate::storage::GcsConfig;
use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_OUTPUT: &str = "output.zip";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

const ENV_HOST: &str = "GCS_ZIP_HOST";
const ENV_PORT: &str = "GCS_ZIP_PORT";
const ENV_STRICT: &str = "GCS_ZIP_STRICT";
/// Same variable the official Cloud Storage client libraries honour.
const ENV_EMULATOR: &str = "STORAGE_EMULATOR_HOST";

/// Arguments of the `gcs-zip` binary.
#[derive(Parser, Debug)]
#[command(author, version, about = "Zip every object under a gs://bucket/prefix into a local file")]
pub struct CliArgs {
    /// Objects to archive, as gs://<bucket>/<prefix>
    pub target: Option<String>,

    /// Archive file to create (overwritten if it exists)
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Reject targets that are not gs://<bucket>/<prefix> instead of using an empty bucket
    #[arg(long)]
    pub strict: bool,

    /// Storage API endpoint (overrides STORAGE_EMULATOR_HOST)
    #[arg(long)]
    pub endpoint: Option<String>,
}

/// Arguments of the `gcs-zip-server` binary.
#[derive(Parser, Debug)]
#[command(author, version, about = "Serve zip archives of gs://bucket/prefix over HTTP")]
pub struct ServerArgs {
    /// Host to bind to (overrides GCS_ZIP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides GCS_ZIP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Answer 400 for targets that are not gs://<bucket>/<prefix> (or set GCS_ZIP_STRICT)
    #[arg(long)]
    pub strict: bool,

    /// Storage API endpoint (overrides STORAGE_EMULATOR_HOST)
    #[arg(long)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub target: String,
    pub output: PathBuf,
    pub strict: bool,
    pub storage: GcsConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub strict: bool,
    pub storage: GcsConfig,
}

impl CliConfig {
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(CliArgs::parse(), |key| env::var(key).ok())
    }

    /// Merge parsed arguments with variables looked up through `var`.
    pub fn from_args(args: CliArgs, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            target: args.target.unwrap_or_default(),
            output: args.output,
            strict: args.strict || flag(&var, ENV_STRICT)?,
            storage: GcsConfig {
                endpoint: args.endpoint.or_else(|| var(ENV_EMULATOR)),
            },
        })
    }
}

impl ServerConfig {
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(ServerArgs::parse(), |key| env::var(key).ok())
    }

    /// Merge parsed arguments with variables looked up through `var`.
    pub fn from_args(args: ServerArgs, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_port = match var(ENV_PORT) {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing {ENV_PORT} value `{value}`"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: args
                .host
                .or_else(|| var(ENV_HOST))
                .unwrap_or_else(|| DEFAULT_HOST.into()),
            port: args.port.unwrap_or(env_port),
            strict: args.strict || flag(&var, ENV_STRICT)?,
            storage: GcsConfig {
                endpoint: args.endpoint.or_else(|| var(ENV_EMULATOR)),
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn flag(var: impl Fn(&str) -> Option<String>, key: &str) -> Result<bool> {
    match var(key).as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some(value) if value == "1" || value.eq_ignore_ascii_case("true") => Ok(true),
        Some(value) if value == "0" || value.eq_ignore_ascii_case("false") => Ok(false),
        Some(value) => anyhow::bail!("parsing {key} value `{value}`: expected true or false"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn cli_defaults() {
        let args = CliArgs::parse_from(["gcs-zip", "gs://bucket/prefix/"]);
        let cfg = CliConfig::from_args(args, vars(&[])).unwrap();
        assert_eq!(cfg.target, "gs://bucket/prefix/");
        assert_eq!(cfg.output, PathBuf::from("output.zip"));
        assert!(!cfg.strict);
        assert!(cfg.storage.endpoint.is_none());
    }

    #[test]
    fn cli_missing_target_is_empty() {
        let args = CliArgs::parse_from(["gcs-zip"]);
        let cfg = CliConfig::from_args(args, vars(&[])).unwrap();
        assert_eq!(cfg.target, "");
    }

    #[test]
    fn cli_flags_override_env() {
        let args = CliArgs::parse_from([
            "gcs-zip",
            "-o",
            "reports.zip",
            "--endpoint",
            "http://flag:4443",
            "gs://b/p",
        ]);
        let cfg = CliConfig::from_args(
            args,
            vars(&[(ENV_EMULATOR, "http://env:4443"), (ENV_STRICT, "true")]),
        )
        .unwrap();
        assert_eq!(cfg.output, PathBuf::from("reports.zip"));
        assert_eq!(cfg.storage.endpoint.as_deref(), Some("http://flag:4443"));
        assert!(cfg.strict);
    }

    #[test]
    fn server_defaults() {
        let args = ServerArgs::parse_from(["gcs-zip-server"]);
        let cfg = ServerConfig::from_args(args, vars(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert!(!cfg.strict);
    }

    #[test]
    fn server_env_fallback() {
        let args = ServerArgs::parse_from(["gcs-zip-server", "--port", "9000"]);
        let cfg = ServerConfig::from_args(
            args,
            vars(&[
                (ENV_HOST, "127.0.0.1"),
                (ENV_PORT, "7000"),
                (ENV_EMULATOR, "http://localhost:4443"),
                (ENV_STRICT, "1"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.storage.endpoint.as_deref(), Some("http://localhost:4443"));
        assert!(cfg.strict);
    }

    #[test]
    fn server_rejects_bad_port() {
        let args = ServerArgs::parse_from(["gcs-zip-server"]);
        let err = ServerConfig::from_args(args, vars(&[(ENV_PORT, "http")])).unwrap_err();
        assert!(err.to_string().contains(ENV_PORT));
    }

    #[test]
    fn bad_strict_value_is_an_error() {
        let args = ServerArgs::parse_from(["gcs-zip-server"]);
        assert!(ServerConfig::from_args(args, vars(&[(ENV_STRICT, "maybe")])).is_err());
    }
}

//! Server option loading.
//!
//! Options start from static defaults and are merged, lowest precedence
//! first, with a TOML config file, `ACTIONSYNC_*` environment variables,
//! and command-line arguments. A value supplied by any layer survives the
//! merge; unknown keys are rejected rather than silently dropped.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable prefix recognized by the loader.
pub const ENV_PREFIX: &str = "ACTIONSYNC_";

/// Fully resolved server options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Application subprotocol this server runs, e.g. `1.0.0`.
    pub subprotocol: String,
    /// Range of client subprotocols accepted, e.g. `1.x`.
    pub supports: String,
    /// Root working directory.
    pub root: PathBuf,
    /// Bind host for both listeners.
    pub host: String,
    /// WebSocket listener port.
    pub port: u16,
    /// Control endpoint port.
    pub control_port: u16,
    /// Secret guarding the control endpoint; required to serve it.
    pub control_secret: Option<String>,
    /// Seconds a connection may idle before sending its connect frame.
    pub handshake_timeout_secs: u64,
    /// Wrong-secret attempts allowed per peer per minute before 429.
    pub bad_auth_per_minute: u32,
    /// Actions allowed per client per minute on the WebSocket side.
    pub actions_per_minute: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            subprotocol: "1.0.0".to_string(),
            supports: "1.x".to_string(),
            root: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            port: 31337,
            control_port: 31338,
            control_secret: None,
            handshake_timeout_secs: 10,
            bad_auth_per_minute: 5,
            actions_per_minute: 100,
        }
    }
}

impl ServerOptions {
    /// Merge static defaults with the process environment and arguments.
    ///
    /// Precedence, lowest first: defaults, config file (`--config` or
    /// `ACTIONSYNC_CONFIG`), environment, arguments.
    pub fn load() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self::load_from(std::env::vars(), &args)
    }

    /// Merge with explicit environment and argument sources (testable form
    /// of [`load`](Self::load)).
    pub fn load_from(
        env: impl Iterator<Item = (String, String)>,
        args: &[String],
    ) -> Result<Self, ConfigError> {
        let mut options = Self::default();

        let env_vars: Vec<(String, String)> =
            env.filter(|(key, _)| key.starts_with(ENV_PREFIX)).collect();
        let (arg_overlay, config_from_args) = OptionsOverlay::from_args(args)?;

        let config_path = config_from_args.or_else(|| {
            env_vars
                .iter()
                .find(|(key, _)| key == "ACTIONSYNC_CONFIG")
                .map(|(_, value)| PathBuf::from(value))
        });
        if let Some(path) = config_path {
            OptionsOverlay::from_file(&path)?.apply(&mut options);
        }

        OptionsOverlay::from_env(env_vars.into_iter())?.apply(&mut options);
        arg_overlay.apply(&mut options);

        Ok(options)
    }
}

/// Partial options contributed by one configuration layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionsOverlay {
    /// See [`ServerOptions::subprotocol`].
    pub subprotocol: Option<String>,
    /// See [`ServerOptions::supports`].
    pub supports: Option<String>,
    /// See [`ServerOptions::root`].
    pub root: Option<PathBuf>,
    /// See [`ServerOptions::host`].
    pub host: Option<String>,
    /// See [`ServerOptions::port`].
    pub port: Option<u16>,
    /// See [`ServerOptions::control_port`].
    pub control_port: Option<u16>,
    /// See [`ServerOptions::control_secret`].
    pub control_secret: Option<String>,
    /// See [`ServerOptions::handshake_timeout_secs`].
    pub handshake_timeout_secs: Option<u64>,
    /// See [`ServerOptions::bad_auth_per_minute`].
    pub bad_auth_per_minute: Option<u32>,
    /// See [`ServerOptions::actions_per_minute`].
    pub actions_per_minute: Option<u32>,
}

impl OptionsOverlay {
    /// Load an overlay from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build an overlay from `ACTIONSYNC_*` environment variables.
    ///
    /// Unknown prefixed keys are an error so typos never drop a value.
    pub fn from_env(
        vars: impl Iterator<Item = (String, String)>,
    ) -> Result<Self, ConfigError> {
        let mut overlay = Self::default();
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "SUBPROTOCOL" => overlay.subprotocol = Some(value),
                "SUPPORTS" => overlay.supports = Some(value),
                "ROOT" => overlay.root = Some(PathBuf::from(value)),
                "HOST" => overlay.host = Some(value),
                "PORT" => overlay.port = Some(parse_number(&key, &value)?),
                "CONTROL_PORT" => overlay.control_port = Some(parse_number(&key, &value)?),
                "CONTROL_SECRET" => overlay.control_secret = Some(value),
                "HANDSHAKE_TIMEOUT_SECS" => {
                    overlay.handshake_timeout_secs = Some(parse_number(&key, &value)?)
                }
                "BAD_AUTH_PER_MINUTE" => {
                    overlay.bad_auth_per_minute = Some(parse_number(&key, &value)?)
                }
                "ACTIONS_PER_MINUTE" => {
                    overlay.actions_per_minute = Some(parse_number(&key, &value)?)
                }
                // Picked up separately by the loader.
                "CONFIG" => {}
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }
        Ok(overlay)
    }

    /// Build an overlay from command-line arguments. Returns the overlay
    /// and the `--config` path, when given.
    pub fn from_args(args: &[String]) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let mut overlay = Self::default();
        let mut config_path = None;
        let mut iter = args.iter();

        while let Some(flag) = iter.next() {
            let mut value = |flag: &str| {
                iter.next()
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
            };
            match flag.as_str() {
                "--config" => config_path = Some(PathBuf::from(value(flag)?)),
                "--subprotocol" => overlay.subprotocol = Some(value(flag)?),
                "--supports" => overlay.supports = Some(value(flag)?),
                "--root" => overlay.root = Some(PathBuf::from(value(flag)?)),
                "--host" => overlay.host = Some(value(flag)?),
                "--port" => overlay.port = Some(parse_number(flag, &value(flag)?)?),
                "--control-port" => {
                    overlay.control_port = Some(parse_number(flag, &value(flag)?)?)
                }
                "--control-secret" => overlay.control_secret = Some(value(flag)?),
                "--handshake-timeout-secs" => {
                    overlay.handshake_timeout_secs = Some(parse_number(flag, &value(flag)?)?)
                }
                "--bad-auth-per-minute" => {
                    overlay.bad_auth_per_minute = Some(parse_number(flag, &value(flag)?)?)
                }
                "--actions-per-minute" => {
                    overlay.actions_per_minute = Some(parse_number(flag, &value(flag)?)?)
                }
                other => return Err(ConfigError::UnknownArgument(other.to_string())),
            }
        }
        Ok((overlay, config_path))
    }

    /// Apply this overlay on top of existing options.
    pub fn apply(self, options: &mut ServerOptions) {
        if let Some(v) = self.subprotocol {
            options.subprotocol = v;
        }
        if let Some(v) = self.supports {
            options.supports = v;
        }
        if let Some(v) = self.root {
            options.root = v;
        }
        if let Some(v) = self.host {
            options.host = v;
        }
        if let Some(v) = self.port {
            options.port = v;
        }
        if let Some(v) = self.control_port {
            options.control_port = v;
        }
        if let Some(v) = self.control_secret {
            options.control_secret = Some(v);
        }
        if let Some(v) = self.handshake_timeout_secs {
            options.handshake_timeout_secs = v;
        }
        if let Some(v) = self.bad_auth_per_minute {
            options.bad_auth_per_minute = v;
        }
        if let Some(v) = self.actions_per_minute {
            options.actions_per_minute = v;
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("{e}"),
    })
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },

    /// A value failed to parse as the expected type.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// The offending key or flag.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// An `ACTIONSYNC_*` variable the loader does not recognize.
    #[error("unknown environment variable {0}")]
    UnknownKey(String),

    /// A command-line flag the loader does not recognize.
    #[error("unknown argument {0}")]
    UnknownArgument(String),

    /// A flag was given without a value.
    #[error("missing value for argument {0}")]
    MissingValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env() -> impl Iterator<Item = (String, String)> {
        std::iter::empty()
    }

    fn env(pairs: &[(&str, &str)]) -> impl Iterator<Item = (String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_include_the_three_static_options() {
        let options = ServerOptions::load_from(no_env(), &[]).unwrap();
        assert_eq!(options.subprotocol, "1.0.0");
        assert_eq!(options.supports, "1.x");
        assert_eq!(options.root, PathBuf::from("."));
    }

    #[test]
    fn defaults_fill_listener_settings() {
        let options = ServerOptions::default();
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.port, 31337);
        assert_eq!(options.control_port, 31338);
        assert_eq!(options.control_secret, None);
        assert_eq!(options.handshake_timeout_secs, 10);
    }

    #[test]
    fn env_values_survive_the_merge() {
        let options = ServerOptions::load_from(
            env(&[
                ("ACTIONSYNC_SUBPROTOCOL", "1.2.0"),
                ("ACTIONSYNC_PORT", "4000"),
                ("ACTIONSYNC_CONTROL_SECRET", "hunter2"),
            ]),
            &[],
        )
        .unwrap();
        assert_eq!(options.subprotocol, "1.2.0");
        assert_eq!(options.port, 4000);
        assert_eq!(options.control_secret.as_deref(), Some("hunter2"));
        // Untouched keys keep their defaults.
        assert_eq!(options.supports, "1.x");
    }

    #[test]
    fn unrelated_env_vars_are_ignored() {
        let options =
            ServerOptions::load_from(env(&[("HOME", "/root"), ("PATH", "/bin")]), &[]).unwrap();
        assert_eq!(options.subprotocol, "1.0.0");
    }

    #[test]
    fn unknown_prefixed_env_var_is_an_error() {
        let result = ServerOptions::load_from(env(&[("ACTIONSYNC_PROT", "9")]), &[]);
        assert!(matches!(result, Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn args_values_survive_the_merge() {
        let options = ServerOptions::load_from(
            no_env(),
            &args(&["--supports", "^1.0.0", "--port", "5000"]),
        )
        .unwrap();
        assert_eq!(options.supports, "^1.0.0");
        assert_eq!(options.port, 5000);
    }

    #[test]
    fn args_override_env_which_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 1000\nsubprotocol = \"1.1.0\"\nhost = \"0.0.0.0\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let options = ServerOptions::load_from(
            env(&[("ACTIONSYNC_PORT", "2000")]),
            &args(&["--config", path.as_str(), "--port", "3000"]),
        )
        .unwrap();

        // args > env > file for the contested key.
        assert_eq!(options.port, 3000);
        // Values only the file supplies are kept.
        assert_eq!(options.subprotocol, "1.1.0");
        assert_eq!(options.host, "0.0.0.0");
    }

    #[test]
    fn env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 1000").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let options = ServerOptions::load_from(
            env(&[("ACTIONSYNC_PORT", "2000")]),
            &args(&["--config", path.as_str()]),
        )
        .unwrap();
        assert_eq!(options.port, 2000);
    }

    #[test]
    fn config_path_can_come_from_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "supports = \"2.x\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let options =
            ServerOptions::load_from(env(&[("ACTIONSYNC_CONFIG", path.as_str())]), &[]).unwrap();
        assert_eq!(options.supports, "2.x");
    }

    #[test]
    fn unknown_config_file_key_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "prot = 9").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let result = ServerOptions::load_from(no_env(), &args(&["--config", path.as_str()]));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let result =
            ServerOptions::load_from(no_env(), &args(&["--config", "/does/not/exist.toml"]));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn unknown_argument_is_an_error() {
        let result = ServerOptions::load_from(no_env(), &args(&["--prot", "9"]));
        assert!(matches!(result, Err(ConfigError::UnknownArgument(_))));
    }

    #[test]
    fn flag_without_value_is_an_error() {
        let result = ServerOptions::load_from(no_env(), &args(&["--port"]));
        assert!(matches!(result, Err(ConfigError::MissingValue(_))));
    }

    #[test]
    fn non_numeric_port_is_an_error() {
        let result = ServerOptions::load_from(no_env(), &args(&["--port", "many"]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}

//! TOML configuration for the broker service.
//!
//! The file path comes from `--config`, then `CREDENTIAL_BROKER_CONFIG`, then
//! `credential-broker.toml` in the working directory. Application secrets may be inlined or
//! read from an environment variable named by `secret_env`.
//!
//! ```toml
//! listen_addr = "0.0.0.0:8080"
//!
//! [issuer]
//! base_url = "https://api.weixin.qq.com"
//! timeout_secs = 10
//!
//! [retry]
//! max_attempts = 5
//! delay_ms = 1000
//!
//! [[apps]]
//! appid = "wx0123456789"
//! secret_env = "WX0123456789_SECRET"
//! ```

// std
use std::{
	env, fs,
	net::SocketAddr,
	path::{Path, PathBuf},
	time::Duration as StdDuration,
};
// self
use crate::{
	_prelude::*,
	auth::Secret,
	broker::{Broker, ReqwestBroker},
	error::ConfigError,
	issuer::{IssuerEndpoints, ReqwestIssuerClient},
	retry::RetryPolicy,
};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "CREDENTIAL_BROKER_CONFIG";
/// Configuration file used when neither the CLI nor the environment names one.
pub const DEFAULT_CONFIG_PATH: &str = "credential-broker.toml";

/// Root configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
	/// Socket address the service binds.
	#[serde(default = "default_listen_addr")]
	pub listen_addr: SocketAddr,
	/// Upstream issuer settings.
	#[serde(default)]
	pub issuer: IssuerConfig,
	/// Retry budget per refresh.
	#[serde(default)]
	pub retry: RetryConfig,
	/// Registered applications.
	#[serde(default)]
	pub apps: Vec<AppConfig>,
}
impl Config {
	/// Reads, parses and validates the file at `path`.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
			path: path.display().to_string(),
			source: Arc::new(e),
		})?;

		contents.parse()
	}

	/// Resolves the configuration path from the CLI argument or the environment.
	pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
		if let Some(p) = cli_path {
			return PathBuf::from(p);
		}
		if let Ok(p) = env::var(CONFIG_PATH_ENV) {
			return PathBuf::from(p);
		}

		PathBuf::from(DEFAULT_CONFIG_PATH)
	}

	/// Checks every value that deserialization alone cannot.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.issuer.timeout_secs == 0 {
			return Err(ConfigError::InvalidValue {
				field: "issuer.timeout_secs",
				reason: "must be greater than 0".into(),
			});
		}

		IssuerEndpoints::from_base(&self.issuer.base_url)?;
		self.retry.policy()?;

		for app in &self.apps {
			app.secret()?;
		}

		Ok(())
	}

	/// Builds the reqwest issuer client described by `[issuer]`.
	pub fn issuer_client(&self) -> Result<ReqwestIssuerClient, ConfigError> {
		let endpoints = IssuerEndpoints::from_base(&self.issuer.base_url)?;

		Ok(ReqwestIssuerClient::new(endpoints)?
			.with_timeout(StdDuration::from_secs(self.issuer.timeout_secs)))
	}

	/// Builds a broker with every configured application registered.
	pub fn build_broker(&self) -> Result<ReqwestBroker, ConfigError> {
		let broker = Broker::<ReqwestIssuerClient>::new(self.issuer_client()?)
			.with_retry(self.retry.policy()?);

		for app in &self.apps {
			broker.register(&app.appid, app.secret()?.expose())?;
		}

		Ok(broker)
	}
}
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let config: Self =
			toml::from_str(s).map_err(|e| ConfigError::Parse { source: Arc::new(e) })?;

		config.validate()?;

		Ok(config)
	}
}

/// `[issuer]` table.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssuerConfig {
	/// Issuer base URL; endpoint paths are appended to it.
	#[serde(default = "default_base_url")]
	pub base_url: String,
	/// Per-request timeout in seconds.
	#[serde(default = "default_timeout_secs")]
	pub timeout_secs: u64,
}
impl Default for IssuerConfig {
	fn default() -> Self {
		Self { base_url: default_base_url(), timeout_secs: default_timeout_secs() }
	}
}

/// `[retry]` table.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
	/// Total attempts per refresh.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	/// Pause between attempts in milliseconds.
	#[serde(default = "default_delay_ms")]
	pub delay_ms: u64,
}
impl RetryConfig {
	/// Converts the table into a validated policy.
	pub fn policy(&self) -> Result<RetryPolicy, ConfigError> {
		RetryPolicy::new(self.max_attempts, StdDuration::from_millis(self.delay_ms))
	}
}
impl Default for RetryConfig {
	fn default() -> Self {
		Self { max_attempts: default_max_attempts(), delay_ms: default_delay_ms() }
	}
}

/// One `[[apps]]` entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
	/// Public application id.
	pub appid: String,
	/// Inline secret.
	#[serde(default)]
	pub secret: Option<Secret>,
	/// Environment variable holding the secret.
	#[serde(default)]
	pub secret_env: Option<String>,
}
impl AppConfig {
	/// Resolves the secret from exactly one of `secret` and `secret_env`.
	pub fn secret(&self) -> Result<Secret, ConfigError> {
		let secret = match (&self.secret, &self.secret_env) {
			(Some(secret), None) => secret.clone(),
			(None, Some(var)) => Secret::new(env::var(var).map_err(|_| ConfigError::InvalidValue {
				field: "apps.secret_env",
				reason: format!("variable `{var}` is not set for `{}`", self.appid),
			})?),
			_ =>
				return Err(ConfigError::InvalidValue {
					field: "apps.secret",
					reason: format!(
						"exactly one of `secret` and `secret_env` must be set for `{}`",
						self.appid
					),
				}),
		};

		if secret.expose().trim().is_empty() {
			return Err(ConfigError::InvalidValue {
				field: "apps.secret",
				reason: format!("secret for `{}` is empty", self.appid),
			});
		}

		Ok(secret)
	}
}

fn default_listen_addr() -> SocketAddr {
	SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_base_url() -> String {
	IssuerEndpoints::DEFAULT_BASE_URL.into()
}

fn default_timeout_secs() -> u64 {
	10
}

fn default_max_attempts() -> u32 {
	RetryPolicy::DEFAULT_MAX_ATTEMPTS
}

fn default_delay_ms() -> u64 {
	1_000
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	static ENV_LOCK: Mutex<()> = parking_lot::const_mutex(());

	const FULL: &str = r#"
listen_addr = "127.0.0.1:9090"

[issuer]
base_url = "http://127.0.0.1:9000"
timeout_secs = 3

[retry]
max_attempts = 2
delay_ms = 250

[[apps]]
appid = "wx1"
secret = "s1"

[[apps]]
appid = "wx2"
secret = "s2"
"#;

	#[test]
	fn full_file_parses_and_builds_broker() {
		let config: Config = FULL.parse().expect("Full config should parse.");

		assert_eq!(config.listen_addr, "127.0.0.1:9090".parse::<SocketAddr>().expect("Valid address."));
		assert_eq!(config.issuer.timeout_secs, 3);
		assert_eq!(
			config.retry.policy().expect("Retry table should be valid."),
			RetryPolicy::new(2, StdDuration::from_millis(250)).expect("Valid policy.")
		);

		let broker = config.build_broker().expect("Broker should build.");

		assert_eq!(broker.identity_count(), 2);
		assert_eq!(broker.retry.max_attempts, 2);
		assert_eq!(broker.issuer.endpoints().token.as_str(), "http://127.0.0.1:9000/cgi-bin/token");
	}

	#[test]
	fn empty_file_uses_defaults() {
		let config: Config = "".parse().expect("Empty config should parse.");

		assert_eq!(config.listen_addr, default_listen_addr());
		assert_eq!(config.issuer.base_url, IssuerEndpoints::DEFAULT_BASE_URL);
		assert_eq!(config.issuer.timeout_secs, 10);
		assert_eq!(config.retry.policy().expect("Default policy."), RetryPolicy::default());
		assert!(config.apps.is_empty());
	}

	#[test]
	fn invalid_values_are_rejected() {
		let cases = [
			"[issuer]\ntimeout_secs = 0\n",
			"[issuer]\nbase_url = \"not a url\"\n",
			"[retry]\nmax_attempts = 0\n",
			"[[apps]]\nappid = \"wx1\"\n",
			"[[apps]]\nappid = \"wx1\"\nsecret = \"s\"\nsecret_env = \"X\"\n",
			"[[apps]]\nappid = \"wx1\"\nsecret = \"  \"\n",
			"unknown_key = true\n",
			"listen_addr = 8080\n",
		];

		for case in cases {
			assert!(case.parse::<Config>().is_err(), "Config should be rejected: {case:?}");
		}
	}

	#[test]
	fn duplicate_app_with_different_secret_fails_to_build() {
		let config: Config =
			"[[apps]]\nappid = \"wx1\"\nsecret = \"a\"\n[[apps]]\nappid = \"wx1\"\nsecret = \"b\"\n"
				.parse()
				.expect("Config should parse.");

		assert!(matches!(config.build_broker(), Err(ConfigError::DuplicateIdentity { .. })));
	}

	#[test]
	fn secret_env_is_resolved() {
		let _lock = ENV_LOCK.lock();
		let var = "CREDENTIAL_BROKER_TEST_SECRET_WX3";

		// SAFETY: env mutation in this module is serialized by `ENV_LOCK`.
		unsafe { env::set_var(var, "from-env") };

		let config: Config = format!("[[apps]]\nappid = \"wx3\"\nsecret_env = \"{var}\"\n")
			.parse()
			.expect("Config with env secret should parse.");

		assert_eq!(config.apps[0].secret().expect("Secret should resolve.").expose(), "from-env");

		// SAFETY: as above.
		unsafe { env::remove_var(var) };

		assert!(config.apps[0].secret().is_err());
	}

	#[test]
	fn load_reports_missing_file() {
		let err = Config::load(Path::new("/nonexistent/credential-broker.toml"))
			.expect_err("Missing file should fail.");

		assert!(matches!(err, ConfigError::Read { .. }));
	}

	#[test]
	fn load_reads_file_from_disk() {
		let dir = env::temp_dir().join("credential-broker-config-test");

		fs::create_dir_all(&dir).expect("Temp dir should be creatable.");

		let path = dir.join("config.toml");

		fs::write(&path, FULL).expect("Config should be writable.");

		let config = Config::load(&path).expect("Config should load.");

		assert_eq!(config.apps.len(), 2);

		fs::remove_dir_all(&dir).expect("Temp dir should be removable.");
	}

	#[test]
	fn cli_path_wins() {
		let path = Config::resolve_path(Some("/etc/broker.toml"));

		assert_eq!(path, PathBuf::from("/etc/broker.toml"));
	}
}

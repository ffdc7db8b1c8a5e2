//! Binding layer configuration

use std::path::Path;

use wb_utils::error::FileIOError;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{fs, io};
use tracing::{info, warn};

use crate::error::ConfigError;

/// Name of the file holding the [`BindingConfig`] inside a data directory
pub const CONFIG_FILE_NAME: &str = "wirebind.json";

/// What happens after a record write, see [`MutationNotifier`](crate::MutationNotifier)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
	/// Wait for the direct refreshes to finish, then emit a "Refresh Completed"
	/// notification
	pub await_then_notify: bool,

	/// Fire a host wide refresh broadcast right after the write
	pub broadcast_on_write: bool,

	/// Announce written records to list UIs that are not subscriptions
	pub notify_record_updates: bool,
}

impl Default for NotifierConfig {
	fn default() -> Self {
		Self {
			await_then_notify: true,
			broadcast_on_write: true,
			notify_record_updates: true,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
	/// Subscriptions log the aggregate outcome of every broadcast they take part in
	pub log_outcomes: bool,
}

impl Default for RefreshConfig {
	fn default() -> Self {
		Self { log_outcomes: true }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
	/// Config schema version
	pub version: u32,

	/// Logging level
	pub log_level: String,

	#[serde(default)]
	pub notifier: NotifierConfig,

	#[serde(default)]
	pub refresh: RefreshConfig,
}

impl Default for BindingConfig {
	fn default() -> Self {
		Self {
			version: Self::target_version(),
			log_level: "info".to_string(),
			notifier: NotifierConfig::default(),
			refresh: RefreshConfig::default(),
		}
	}
}

impl BindingConfig {
	#[must_use]
	pub const fn target_version() -> u32 {
		2
	}

	/// Load configuration from `data_dir`, creating the default one if there is none
	/// and migrating older versions in place.
	pub async fn load_from(data_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let data_dir = data_dir.as_ref();
		let config_path = data_dir.join(CONFIG_FILE_NAME);

		match fs::read(&config_path).await {
			Ok(bytes) => {
				info!("Loading config from {}", config_path.display());
				let mut value = serde_json::from_slice::<Value>(&bytes)?;

				let version = value
					.get("version")
					.and_then(Value::as_u64)
					.map_or(1, |version| u32::try_from(version).unwrap_or(u32::MAX));

				if version > Self::target_version() {
					return Err(ConfigError::UnsupportedVersion {
						found: version,
						supported: Self::target_version(),
					});
				}

				if version < Self::target_version() {
					info!(
						"Migrating config from v{} to v{}",
						version,
						Self::target_version()
					);
					migrate(&mut value, version);

					let config = serde_json::from_value::<Self>(value)?;
					config.save(data_dir).await?;
					return Ok(config);
				}

				Ok(serde_json::from_value(value)?)
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				warn!(
					"No config found, creating default at {}",
					config_path.display()
				);
				let config = Self::default();
				config.save(data_dir).await?;
				Ok(config)
			}
			Err(e) => Err(FileIOError::from((config_path, e, "Failed to read config")).into()),
		}
	}

	/// Like [`load_from`](Self::load_from), but replaces a corrupt config with the
	/// default one. A config from a newer version, or one we can't read, is left alone
	/// and the error returned.
	pub async fn load_or_create(data_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let data_dir = data_dir.as_ref();

		match Self::load_from(data_dir).await {
			Ok(config) => Ok(config),
			Err(e @ ConfigError::Json(_)) => {
				warn!("Failed to load config, falling back to defaults: {e:#}");
				let config = Self::default();
				config.save(data_dir).await?;
				Ok(config)
			}
			Err(e) => Err(e),
		}
	}

	pub async fn save(&self, data_dir: impl AsRef<Path>) -> Result<(), ConfigError> {
		let data_dir = data_dir.as_ref();
		fs::create_dir_all(data_dir)
			.await
			.map_err(|e| FileIOError::from((data_dir, e, "Failed to create data directory")))?;

		let config_path = data_dir.join(CONFIG_FILE_NAME);
		fs::write(&config_path, serde_json::to_vec_pretty(self)?)
			.await
			.map_err(|e| FileIOError::from((&config_path, e, "Failed to write config")))?;

		Ok(())
	}
}

fn migrate(value: &mut Value, from: u32) {
	let Some(config) = value.as_object_mut() else {
		return;
	};

	for version in from..BindingConfig::target_version() {
		if version == 1 {
			// v1 kept the refresh notification toggle at the top level
			let await_refresh = config.remove("await_refresh");
			let notifier = config.entry("notifier").or_insert_with(|| json!({}));

			if let (Some(await_refresh), Some(notifier)) =
				(await_refresh, notifier.as_object_mut())
			{
				notifier.insert("await_then_notify".to_string(), await_refresh);
			}
		}
	}

	config.insert(
		"version".to_string(),
		json!(BindingConfig::target_version()),
	);
}

#[cfg(test)]
mod tests {
	use tempfile::tempdir;

	use super::*;

	#[tokio::test]
	async fn missing_config_is_created() {
		let dir = tempdir().expect("temp dir");

		let config = BindingConfig::load_from(dir.path()).await.expect("loaded");

		assert_eq!(config, BindingConfig::default());
		assert!(dir.path().join(CONFIG_FILE_NAME).exists());
	}

	#[tokio::test]
	async fn saved_config_is_loaded_back() {
		let dir = tempdir().expect("temp dir");
		let mut config = BindingConfig::default();
		config.notifier.broadcast_on_write = false;
		config.save(dir.path()).await.expect("saved");

		let loaded = BindingConfig::load_from(dir.path()).await.expect("loaded");

		assert!(!loaded.notifier.broadcast_on_write);
		assert!(loaded.notifier.await_then_notify);
	}

	#[tokio::test]
	async fn v1_config_is_migrated() {
		let dir = tempdir().expect("temp dir");
		std::fs::write(
			dir.path().join(CONFIG_FILE_NAME),
			r#"{ "version": 1, "log_level": "debug", "await_refresh": false }"#,
		)
		.expect("written");

		let config = BindingConfig::load_from(dir.path()).await.expect("migrated");

		assert_eq!(config.version, 2);
		assert_eq!(config.log_level, "debug");
		assert!(!config.notifier.await_then_notify);
		assert!(config.notifier.broadcast_on_write);
		assert!(config.refresh.log_outcomes);

		let on_disk = std::fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).expect("read");
		assert!(on_disk.contains("\"version\": 2"));
	}

	#[tokio::test]
	async fn newer_config_is_rejected() {
		let dir = tempdir().expect("temp dir");
		std::fs::write(
			dir.path().join(CONFIG_FILE_NAME),
			r#"{ "version": 9, "log_level": "info" }"#,
		)
		.expect("written");

		assert!(matches!(
			BindingConfig::load_from(dir.path()).await,
			Err(ConfigError::UnsupportedVersion {
				found: 9,
				supported: 2
			})
		));
	}

	#[tokio::test]
	async fn corrupt_config_falls_back_to_default() {
		let dir = tempdir().expect("temp dir");
		std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{ not json").expect("written");

		let config = BindingConfig::load_or_create(dir.path()).await.expect("fallback");

		assert_eq!(config, BindingConfig::default());
	}

	#[tokio::test]
	async fn newer_config_survives_load_or_create() {
		let dir = tempdir().expect("temp dir");
		let contents = r#"{ "version": 3, "log_level": "info", "future": true }"#;
		std::fs::write(dir.path().join(CONFIG_FILE_NAME), contents).expect("written");

		assert!(matches!(
			BindingConfig::load_or_create(dir.path()).await,
			Err(ConfigError::UnsupportedVersion {
				found: 3,
				supported: 2
			})
		));
		assert_eq!(
			std::fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).expect("read"),
			contents
		);
	}
}

//! File-backed [`SettingsService`].
//!
//! The file is re-read on every poll so operators can change region settings
//! without restarting the runner:
//!
//! ```json
//! {
//!   "optimizer": { "5": { "optimize_horizon_days": 2, "optimizer_config_id": 1 } },
//!   "availability": { "5": { "attributes": [] } }
//! }
//! ```

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use dispatch_core::{AllSettings, SettingsError, SettingsService};

/// Settings loaded from a JSON file.
#[derive(Debug, Clone)]
pub struct JsonSettingsService {
    path: Utf8PathBuf,
}

impl JsonSettingsService {
    /// Serve settings from `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File the settings are read from.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Read and parse the file once.
    ///
    /// # Errors
    ///
    /// [`SettingsError::Load`] when the file cannot be read,
    /// [`SettingsError::Invalid`] when it is not valid settings JSON or a
    /// region asks for a negative horizon.
    pub fn load(&self) -> Result<AllSettings, SettingsError> {
        let contents = dispatch_fs::read_to_string(&self.path).map_err(|source| {
            SettingsError::Load {
                source_name: self.path.to_string(),
                source: Box::new(source),
            }
        })?;
        let settings: AllSettings =
            serde_json::from_str(&contents).map_err(|err| SettingsError::Invalid {
                message: format!("{}: {err}", self.path),
            })?;
        if let Some((region, _)) = settings
            .optimizer
            .iter()
            .find(|(_, region_settings)| region_settings.optimize_horizon_days < 0)
        {
            return Err(SettingsError::Invalid {
                message: format!("region {region} has a negative optimize_horizon_days"),
            });
        }
        Ok(settings)
    }
}

#[async_trait]
impl SettingsService for JsonSettingsService {
    async fn all_settings(&self) -> Result<AllSettings, SettingsError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.load())
            .await
            .map_err(|err| SettingsError::Load {
                source_name: self.path.to_string(),
                source: Box::new(err),
            })?
    }
}

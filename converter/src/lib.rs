pub mod layout;
pub mod processor;
pub mod services;
pub mod storage;
pub mod utils;

use common::config::Settings;
use common::Result;
use processor::{ConvertConfig, StorageConfig};
use services::{ConversionDriver, RunReport};
use tokio::sync::watch;

/// Converts every docket under `config.source` that passes the filters.
///
/// Setting `cancel` to `true` stops new dockets from starting; dockets
/// already in flight are finished before the report is returned.
pub async fn run_conversion(
    config: &ConvertConfig,
    settings: &Settings,
    cancel: watch::Receiver<bool>,
) -> Result<RunReport> {
    let storage = StorageConfig::from_settings(settings, config).await?;
    let mut driver = ConversionDriver::new(config, settings, storage)?;
    driver.run(cancel).await
}

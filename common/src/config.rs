use config::{Config, ConfigError};
use serde::Deserialize;
use tracing::debug;

/// Agency codes known to exist under `raw-data/` in the public corpus.
/// Used when no `[agencies]` table is configured.
pub const DEFAULT_AGENCY_CODES: &[&str] = &[
    "ABMC", "ACF", "ACFR", "ACHP", "ACL", "ACUS", "ADF", "AFRH", "AHRQ", "AID", "AMS", "APHIS",
    "ATF", "BIA", "BLM", "BLS", "BOP", "BSEE", "BTS", "CBP", "CDC", "CFPB", "CMS", "CNCS", "CPSC",
    "CRS", "DARS", "DEA", "DHS", "DOC", "DOD", "DOE", "DOI", "DOJ", "DOL", "DOS", "DOT", "ED",
    "EPA", "FAA", "FBI", "FCC", "FDA", "FDIC", "FHFA", "FISC", "FLRA", "FMCSA", "FRA", "FRB",
    "FTC", "GAO", "GSA", "HHS", "HUD", "ICE", "IRS", "ITC", "NASA", "NEA", "NFA", "NGA", "NIGC",
    "NIH", "NIST", "NOAA", "NPS", "NRC", "NSA", "NSF", "NTSB", "OCC", "ODNI", "OGE", "OMB",
    "ONRR", "OPM", "OSHA", "PBGC", "PTO", "SEC", "SBA", "SSA", "SSS", "TREAS", "TSA", "USCIS",
    "USDA", "USGS", "VA",
];

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub s3: S3Settings,
    #[serde(default)]
    pub agencies: Agencies,
    #[serde(default)]
    pub conversion: ConversionSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Settings {
    /// Custom endpoint (MinIO, localstack). `None` uses the AWS default.
    pub endpoint: Option<String>,
    #[serde(default = "default_s3_region")]
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Agencies {
    #[serde(default = "default_agency_codes")]
    pub codes: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversionSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_read_retries")]
    pub max_read_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Number of errored dockets tolerated before the run reports failure.
    #[serde(default)]
    pub error_tolerance: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_s3_region(),
            access_key: None,
            secret_key: None,
            force_path_style: false,
        }
    }
}

impl Default for Agencies {
    fn default() -> Self {
        Self {
            codes: default_agency_codes(),
        }
    }
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_read_retries: default_max_read_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            error_tolerance: 0,
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_agency_codes() -> Vec<String> {
    DEFAULT_AGENCY_CODES.iter().map(|c| c.to_string()).collect()
}

fn default_concurrency() -> usize {
    4
}

fn default_max_read_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_channel_capacity() -> usize {
    64
}

impl Settings {
    /// Loads settings from an optional TOML file, then `APP_` environment
    /// variables (`APP_CONVERSION__CONCURRENCY=8`).
    pub fn new(path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(path, None)
    }

    fn load(
        path: Option<&str>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("agencies.codes")
                .try_parsing(true)
                .source(env),
        );

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;

        debug!(
            agencies = settings.agencies.codes.len(),
            concurrency = settings.conversion.concurrency,
            endpoint = ?settings.s3.endpoint,
            "Loaded converter settings"
        );

        Ok(settings)
    }
}

//! Configuration module
//!
//! Loads backend selection, bucket names, staging and conversion-tool settings from
//! the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::keys::normalize_format;
use crate::storage_types::StorageBackend;

const CONVERSION_TIMEOUT_SECS: u64 = 40;
const OPTIMISE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_APPROVED_FORMATS: &str = "png";

/// Bucket names for each store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreBuckets {
    pub user_files: String,
    pub template_files: String,
    /// `None` disables public files.
    pub public_files: Option<String>,
}

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid LOG_FORMAT: {}", s)),
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub storage_backend: StorageBackend,
    pub stores: StoreBuckets,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO etc.)
    pub local_storage_path: Option<PathBuf>,
    pub upload_folder: PathBuf,
    pub convert_command: String,
    pub optipng_command: String,
    pub conversion_timeout_secs: u64,
    pub optimise_timeout_secs: u64,
    pub approved_formats: Vec<String>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Parse configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        // assume s3 if none specified
        let storage_backend = match lookup("STORAGE_BACKEND") {
            Some(value) => value.parse::<StorageBackend>()?,
            None => StorageBackend::S3,
        };

        let stores = StoreBuckets {
            user_files: lookup("USER_FILES_BUCKET")
                .ok_or_else(|| anyhow::anyhow!("USER_FILES_BUCKET must be set"))?,
            template_files: lookup("TEMPLATE_FILES_BUCKET")
                .ok_or_else(|| anyhow::anyhow!("TEMPLATE_FILES_BUCKET must be set"))?,
            public_files: lookup("PUBLIC_FILES_BUCKET").filter(|s| !s.trim().is_empty()),
        };

        let approved_formats = lookup("APPROVED_FORMATS")
            .unwrap_or_else(|| DEFAULT_APPROVED_FORMATS.to_string())
            .split(',')
            .map(normalize_format)
            .filter(|s| !s.is_empty())
            .collect();

        let log_format = match lookup("LOG_FORMAT") {
            Some(value) => value.parse()?,
            None => LogFormat::Pretty,
        };

        let config = Config {
            environment,
            storage_backend,
            stores,
            s3_region: lookup("S3_REGION").or_else(|| lookup("AWS_REGION")),
            s3_endpoint: lookup("S3_ENDPOINT"),
            local_storage_path: lookup("LOCAL_STORAGE_PATH").map(PathBuf::from),
            upload_folder: lookup("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("filestore-uploads")),
            convert_command: lookup("CONVERT_COMMAND").unwrap_or_else(|| "convert".to_string()),
            optipng_command: lookup("OPTIPNG_COMMAND").unwrap_or_else(|| "optipng".to_string()),
            conversion_timeout_secs: lookup("CONVERSION_TIMEOUT_SECS")
                .map(|s| {
                    s.parse()
                        .map_err(|_| anyhow::anyhow!("CONVERSION_TIMEOUT_SECS must be a number"))
                })
                .transpose()?
                .unwrap_or(CONVERSION_TIMEOUT_SECS),
            optimise_timeout_secs: lookup("OPTIMISE_TIMEOUT_SECS")
                .map(|s| {
                    s.parse()
                        .map_err(|_| anyhow::anyhow!("OPTIMISE_TIMEOUT_SECS must be a number"))
                })
                .transpose()?
                .unwrap_or(OPTIMISE_TIMEOUT_SECS),
            approved_formats,
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.approved_formats.is_empty() {
            return Err(anyhow::anyhow!("APPROVED_FORMATS must list at least one format"));
        }
        if self.conversion_timeout_secs == 0 || self.optimise_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Conversion and optimise timeouts must be non-zero"));
        }
        if self.storage_backend == StorageBackend::S3 && self.s3_region.is_none() {
            return Err(anyhow::anyhow!(
                "S3_REGION or AWS_REGION must be set for the s3 backend"
            ));
        }
        Ok(())
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    pub fn optimise_timeout(&self) -> Duration {
        Duration::from_secs(self.optimise_timeout_secs)
    }
}

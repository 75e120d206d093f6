//! ImageMagick-backed conversions.
//!
//! Every rendition rasterises the first page of the source (`<src>[0]`) and writes
//! next to it, so outputs land in the staging area alongside the original.

use crate::error::{ProcessingError, ProcessingResult};
use crate::safe_exec::{safe_exec, ExecOptions, KillSignal};
use crate::staging::StagedFile;
use crate::traits::FileConverter;
use async_trait::async_trait;
use filestore_core::{normalize_format, Config};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

const THUMBNAIL_WIDTH: &str = "260x";
const PREVIEW_WIDTH: &str = "548x";

/// Converter shelling out to ImageMagick's `convert`.
#[derive(Debug, Clone)]
pub struct ImageMagickConverter {
    command: String,
    approved_formats: Vec<String>,
    options: ExecOptions,
}

impl ImageMagickConverter {
    pub fn new(
        command: impl Into<String>,
        approved_formats: Vec<String>,
        timeout: Duration,
    ) -> ProcessingResult<Self> {
        let command = command.into();
        validate_command(&command)?;
        Ok(Self {
            command,
            approved_formats: approved_formats
                .iter()
                .map(|f| normalize_format(f))
                .collect(),
            options: ExecOptions::new(timeout).with_kill_signal(KillSignal::Term),
        })
    }

    pub fn from_config(config: &Config) -> ProcessingResult<Self> {
        Self::new(
            config.convert_command.clone(),
            config.approved_formats.clone(),
            config.conversion_timeout(),
        )
    }

    pub fn is_approved(&self, format: &str) -> bool {
        let format = normalize_format(format);
        self.approved_formats.iter().any(|f| *f == format)
    }

    fn convert_args(&self, source: &Path, dest: &Path) -> Vec<String> {
        vec![
            self.command.clone(),
            "-define".to_string(),
            "pdf:use-cropbox=true".to_string(),
            "-density".to_string(),
            "300".to_string(),
            "-flatten".to_string(),
            first_page(source),
            dest.display().to_string(),
        ]
    }

    fn resize_args(&self, source: &Path, dest: &Path, width: &str) -> Vec<String> {
        vec![
            self.command.clone(),
            "-flatten".to_string(),
            "-background".to_string(),
            "white".to_string(),
            "-density".to_string(),
            "300".to_string(),
            "-define".to_string(),
            format!("pdf:fit-page={}", width),
            first_page(source),
            "-resize".to_string(),
            width.to_string(),
            dest.display().to_string(),
        ]
    }

    async fn run(&self, args: Vec<String>, dest: PathBuf) -> ProcessingResult<StagedFile> {
        // Adopted before running so partial output is removed on failure.
        let output = StagedFile::adopt(dest);
        safe_exec(&args, &self.options).await?;

        let exists = tokio::fs::try_exists(output.path())
            .await
            .map_err(|source| ProcessingError::Staging {
                path: output.path().to_path_buf(),
                source,
            })?;
        if !exists {
            return Err(ProcessingError::MissingOutput(output.path().to_path_buf()));
        }
        Ok(output)
    }
}

#[async_trait]
impl FileConverter for ImageMagickConverter {
    #[instrument(skip(self), fields(source = %source.display()))]
    async fn convert(&self, source: &Path, format: &str) -> ProcessingResult<StagedFile> {
        if !self.is_approved(format) {
            return Err(ProcessingError::UnsupportedFormat(format.to_string()));
        }
        let format = normalize_format(format);
        let dest = with_extension_suffix(source, &format);
        let output = self.run(self.convert_args(source, &dest), dest).await?;
        info!(format = %format, "Converted file");
        Ok(output)
    }

    #[instrument(skip(self), fields(source = %source.display()))]
    async fn thumbnail(&self, source: &Path) -> ProcessingResult<StagedFile> {
        let dest = with_extension_suffix(source, "png");
        let output = self
            .run(self.resize_args(source, &dest, THUMBNAIL_WIDTH), dest)
            .await?;
        info!("Created thumbnail");
        Ok(output)
    }

    #[instrument(skip(self), fields(source = %source.display()))]
    async fn preview(&self, source: &Path) -> ProcessingResult<StagedFile> {
        let dest = with_extension_suffix(source, "png");
        let output = self
            .run(self.resize_args(source, &dest, PREVIEW_WIDTH), dest)
            .await?;
        info!("Created preview");
        Ok(output)
    }
}

/// `<path>.<ext>`, keeping any extension already present.
pub(crate) fn with_extension_suffix(path: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn first_page(source: &Path) -> String {
    format!("{}[0]", source.display())
}

/// Reject command paths carrying shell metacharacters.
pub(crate) fn validate_command(command: &str) -> ProcessingResult<()> {
    const DANGEROUS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>', '\n', '\r'];
    if command.trim().is_empty() || command.contains(DANGEROUS) {
        return Err(ProcessingError::InvalidCommand(command.to_string()));
    }
    Ok(())
}

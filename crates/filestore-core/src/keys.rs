//! Key layout for originals and their derived variants.
//!
//! Every derived variant of an original lives under the original's converted-cache
//! folder:
//!
//! - **Folder**: `{key}-converted-cache/`
//! - **Variant**: `{key}-converted-cache/format-{format}`, `.../style-{style}` or
//!   `.../format-{format}-style-{style}`
//!
//! Deleting the folder prefix invalidates every cached variant without touching the
//! original. Keys are pure functions of their inputs so that the same request always
//! lands on the same cached object.

use crate::config::StoreBuckets;
use crate::error::SpecError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Suffix appended to an original key to form its converted-cache folder.
pub const CONVERTED_CACHE_SUFFIX: &str = "-converted-cache/";

/// Rendition styles produced from an original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStyle {
    Thumbnail,
    Preview,
}

impl ConversionStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStyle::Thumbnail => "thumbnail",
            ConversionStyle::Preview => "preview",
        }
    }
}

impl FromStr for ConversionStyle {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thumbnail" => Ok(ConversionStyle::Thumbnail),
            "preview" => Ok(ConversionStyle::Preview),
            other => Err(SpecError::UnknownStyle(other.to_string())),
        }
    }
}

impl Display for ConversionStyle {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Conversion parameters of a get request. An empty spec serves the original.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversionSpec {
    pub format: Option<String>,
    pub style: Option<ConversionStyle>,
}

impl ConversionSpec {
    pub fn original() -> Self {
        Self::default()
    }

    pub fn format(format: impl AsRef<str>) -> Self {
        Self {
            format: Some(normalize_format(format.as_ref())),
            style: None,
        }
    }

    pub fn style(style: ConversionStyle) -> Self {
        Self {
            format: None,
            style: Some(style),
        }
    }

    /// Build a spec from raw request parameters (e.g. query string values).
    pub fn from_params(format: Option<&str>, style: Option<&str>) -> Result<Self, SpecError> {
        let style = style.map(ConversionStyle::from_str).transpose()?;
        let spec = Self {
            format: format.map(normalize_format),
            style,
        };
        if let Some(ref format) = spec.format {
            validate_format(format)?;
        }
        Ok(spec)
    }

    pub fn is_empty(&self) -> bool {
        self.format.is_none() && self.style.is_none()
    }
}

/// Canonical spelling of a format name. Format names are case-insensitive.
pub fn normalize_format(format: &str) -> String {
    format.trim().to_ascii_lowercase()
}

/// Formats are restricted to ASCII alphanumerics so the `-style-` separator of a
/// combined selector can never appear inside a format.
fn validate_format(format: &str) -> Result<(), SpecError> {
    if format.is_empty() || !format.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SpecError::InvalidFormat(format.to_string()));
    }
    Ok(())
}

/// Converted-cache folder of an original key.
pub fn converted_folder_key(key: &str) -> String {
    format!("{}{}", key, CONVERTED_CACHE_SUFFIX)
}

/// Cache key of the variant described by `spec`.
pub fn derived_key(key: &str, spec: &ConversionSpec) -> Result<String, SpecError> {
    let selector = match (&spec.format, &spec.style) {
        (None, None) => return Err(SpecError::Empty),
        (Some(format), None) => {
            validate_format(format)?;
            format!("format-{}", normalize_format(format))
        }
        (None, Some(style)) => format!("style-{}", style),
        (Some(format), Some(style)) => {
            validate_format(format)?;
            format!("format-{}-style-{}", normalize_format(format), style)
        }
    };
    Ok(format!("{}{}", converted_folder_key(key), selector))
}

/// A resolved bucket/key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocation {
    pub bucket: String,
    pub key: String,
}

/// Resolves route identifiers into bucket/key pairs.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    buckets: StoreBuckets,
}

impl KeyBuilder {
    pub fn new(buckets: StoreBuckets) -> Self {
        Self { buckets }
    }

    /// `{project_id}/{file_id}` in the user files bucket.
    pub fn user_file(&self, project_id: &str, file_id: &str) -> FileLocation {
        FileLocation {
            bucket: self.buckets.user_files.clone(),
            key: format!("{}/{}", project_id, file_id),
        }
    }

    /// `{project_id}/{public_file_id}` in the public files bucket, if one is configured.
    pub fn public_file(
        &self,
        project_id: &str,
        public_file_id: &str,
    ) -> Result<FileLocation, SpecError> {
        let bucket = self
            .buckets
            .public_files
            .clone()
            .ok_or(SpecError::PublicFilesUnavailable)?;
        Ok(FileLocation {
            bucket,
            key: format!("{}/{}", project_id, public_file_id),
        })
    }

    /// `{template_id}/v/{version}/{format}[/{sub_type}]` in the template files bucket.
    pub fn template_file(
        &self,
        template_id: &str,
        version: &str,
        format: &str,
        sub_type: Option<&str>,
    ) -> FileLocation {
        let mut key = format!("{}/v/{}/{}", template_id, version, format);
        if let Some(sub_type) = sub_type {
            key.push('/');
            key.push_str(sub_type);
        }
        FileLocation {
            bucket: self.buckets.template_files.clone(),
            key,
        }
    }

    /// Prefix covering every user file of a project, for size reporting.
    pub fn project_prefix(&self, project_id: &str) -> FileLocation {
        FileLocation {
            bucket: self.buckets.user_files.clone(),
            key: format!("{}/", project_id),
        }
    }
}

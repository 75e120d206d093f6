use crate::converter::validate_command;
use crate::error::ProcessingResult;
use crate::safe_exec::{safe_exec, ExecOptions, KillSignal};
use crate::traits::ImageOptimiser;
use async_trait::async_trait;
use filestore_core::Config;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

/// Lossless PNG recompression with `optipng`, rewriting the file in place.
#[derive(Debug, Clone)]
pub struct OptiPngOptimiser {
    command: String,
    options: ExecOptions,
}

impl OptiPngOptimiser {
    pub fn new(command: impl Into<String>, timeout: Duration) -> ProcessingResult<Self> {
        let command = command.into();
        validate_command(&command)?;
        Ok(Self {
            command,
            // optipng holds no children worth a graceful shutdown
            options: ExecOptions::new(timeout).with_kill_signal(KillSignal::Kill),
        })
    }

    pub fn from_config(config: &Config) -> ProcessingResult<Self> {
        Self::new(config.optipng_command.clone(), config.optimise_timeout())
    }

    fn args(&self, path: &Path) -> Vec<String> {
        vec![self.command.clone(), path.display().to_string()]
    }
}

#[async_trait]
impl ImageOptimiser for OptiPngOptimiser {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn optimise(&self, path: &Path) -> ProcessingResult<()> {
        let output = safe_exec(&self.args(path), &self.options).await?;
        debug!(stderr = %output.stderr.trim(), "optipng finished");
        Ok(())
    }
}

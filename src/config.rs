//! Profiler configuration
//!
//! Loaded from an optional TOML file and then overridden from the command
//! line. Every field has a default, so an empty file is a valid config.
//!
//! ```toml
//! read_report = "reads.bin"
//! write_report = "writes.bin"
//! output_dir = "/tmp/unigrams"
//! word_width = 4
//! byte_order = "little"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::report::{ByteOrder, ReportFormat, WordWidth};

/// Default file name of the read report
pub const DEFAULT_READ_REPORT: &str = "unigram_mem_read_report.bin";

/// Default file name of the write report
pub const DEFAULT_WRITE_REPORT: &str = "unigram_mem_write_report.bin";

/// Where and how reports are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerConfig {
    /// Destination of the read report
    pub read_report: PathBuf,
    /// Destination of the write report
    pub write_report: PathBuf,
    /// Directory that relative report paths are resolved against
    pub output_dir: Option<PathBuf>,
    /// Width of address fields in the reports
    pub word_width: WordWidth,
    /// Byte order of the reports
    pub byte_order: ByteOrder,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            read_report: PathBuf::from(DEFAULT_READ_REPORT),
            write_report: PathBuf::from(DEFAULT_WRITE_REPORT),
            output_dir: None,
            word_width: WordWidth::host(),
            byte_order: ByteOrder::Native,
        }
    }
}

impl ProfilerConfig {
    /// Load a config from a TOML file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Encoding used for both reports
    pub fn report_format(&self) -> ReportFormat {
        ReportFormat::new(self.word_width, self.byte_order)
    }

    /// Resolved destination of the read report
    pub fn read_report_path(&self) -> PathBuf {
        self.resolve(&self.read_report)
    }

    /// Resolved destination of the write report
    pub fn write_report_path(&self) -> PathBuf {
        self.resolve(&self.write_report)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

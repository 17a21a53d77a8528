//! Backend driver seam
//!
//! Concrete hypervisor and cloud drivers live outside this crate. Actions
//! only see the [`Driver`] trait, reached through the context's provider
//! handle.

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;

/// Path syntax a backend expects for file arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathStyle {
    /// Paths are passed through unchanged
    #[default]
    Posix,
    /// Backslash separators, `/mnt/<drive>/` mapped to `<DRIVE>:\`
    Windows,
}

impl PathStyle {
    /// Render a local path in this style
    pub fn render(self, path: &Path) -> String {
        let raw = path.to_string_lossy();
        match self {
            Self::Posix => raw.into_owned(),
            Self::Windows => {
                if let Some(rest) = raw.strip_prefix("/mnt/") {
                    let (drive, remainder) = rest.split_once('/').unwrap_or((rest, ""));
                    let mut chars = drive.chars();
                    if let (Some(letter), None) = (chars.next(), chars.next()) {
                        if letter.is_ascii_alphabetic() {
                            return format!(
                                "{}:\\{}",
                                letter.to_ascii_uppercase(),
                                remainder.replace('/', "\\")
                            );
                        }
                    }
                }
                raw.replace('/', "\\")
            }
        }
    }
}

/// Parameters for a backend machine import
///
/// Field names serialize to the parameter names backends expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportParams {
    #[serde(rename = "VMConfigFile")]
    pub config_file: String,

    #[serde(rename = "DestinationPath")]
    pub destination_path: String,

    #[serde(rename = "DataPath")]
    pub data_path: String,

    #[serde(rename = "LinkedClone")]
    pub linked_clone: bool,

    #[serde(rename = "SourcePath")]
    pub source_path: String,

    #[serde(rename = "VMName", skip_serializing_if = "Option::is_none")]
    pub vm_name: Option<String>,

    #[serde(rename = "Memory", skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,

    #[serde(rename = "MaxMemory", skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<u64>,

    #[serde(rename = "Processors", skip_serializing_if = "Option::is_none")]
    pub processors: Option<u32>,
}

/// A machine backend (hypervisor or cloud API)
#[async_trait]
pub trait Driver: Send + Sync {
    /// Provider name written into package metadata (e.g. "hyperv")
    fn provider_name(&self) -> &str;

    /// Whether the backend understands `.vmcx` machine definitions
    fn supports_vmcx(&self) -> bool {
        false
    }

    /// Path syntax for file arguments
    fn path_style(&self) -> PathStyle {
        PathStyle::Posix
    }

    /// Create and register a machine from box files.
    ///
    /// The response is backend-shaped JSON; its `id` field is normalized
    /// by the caller.
    async fn import(&self, params: &ImportParams) -> Result<serde_json::Value>;
}

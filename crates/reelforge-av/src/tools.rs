//! External tool detection and management.

use reelforge_common::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Information about an external tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// Version string if available.
    pub version: Option<String>,
    /// Path to the tool executable.
    pub path: Option<PathBuf>,
}

/// Check if a tool is available using a custom version argument.
///
/// # Example
///
/// ```no_run
/// use reelforge_av::check_tool_with_arg;
///
/// let info = check_tool_with_arg("ffprobe", "-version");
/// if info.available {
///     println!("ffprobe version: {:?}", info.version);
/// }
/// ```
pub fn check_tool_with_arg(name: impl AsRef<Path>, version_arg: &str) -> ToolInfo {
    let program = name.as_ref();
    let display = program.to_string_lossy().to_string();
    let result = Command::new(program).arg(version_arg).output();

    match result {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string());

            let path = which::which(program).ok();

            ToolInfo {
                name: display,
                available: true,
                version,
                path,
            }
        }
        _ => ToolInfo {
            name: display,
            available: false,
            version: None,
            path: None,
        },
    }
}

/// Check the encoder and inspection tools, honouring configured overrides.
pub fn check_tools(toolchain: &Toolchain) -> Vec<ToolInfo> {
    vec![
        check_tool_with_arg(&toolchain.ffmpeg, "-version"),
        check_tool_with_arg(&toolchain.ffprobe, "-version"),
    ]
}

/// Require that a tool is available on `PATH`, returning its path.
///
/// # Errors
///
/// Returns [`Error::Tool`] if the tool is not found.
pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| Error::tool(name, "not found in PATH"))
}

/// Get the path to a tool, preferring a configured path over PATH lookup.
pub fn get_tool_path(name: &str, config_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = config_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(
            tool = name,
            path = %path.display(),
            "Configured tool path does not exist, falling back to PATH"
        );
    }

    require_tool(name)
}

/// Resolved locations of the external binaries the engine drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Encoder binary.
    pub ffmpeg: PathBuf,
    /// Inspection binary.
    pub ffprobe: PathBuf,
}

impl Toolchain {
    /// Resolve both tools, preferring configured paths.
    pub fn resolve(ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> Result<Self> {
        Ok(Self {
            ffmpeg: get_tool_path("ffmpeg", ffmpeg)?,
            ffprobe: get_tool_path("ffprobe", ffprobe)?,
        })
    }

    /// Use bare names and let the OS resolve them at spawn time.
    pub fn from_path_lookup() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

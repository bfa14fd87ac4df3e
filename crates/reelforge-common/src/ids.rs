//! Identity types for files, streams, and sessions.
//!
//! [`StreamKey`] is persisted by the catalog, so its serialized layout is
//! append-only: fields may be added with defaults but never renamed or retyped.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum accepted length of a player-supplied session id.
const MAX_PLAYER_SESSION_LEN: usize = 128;

/// Opaque, URL-safe locator of a media file.
///
/// The wire form is the unpadded URL-safe base64 of a path relative to the
/// library root. Absolute paths and `..` components are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileLocator(String);

impl FileLocator {
    /// Build a locator from a path relative to the library root.
    pub fn from_relative_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        validate_relative(path)?;
        let raw = path
            .to_str()
            .ok_or_else(|| Error::Validation(format!("non UTF-8 path: {}", path.display())))?;
        Ok(Self(URL_SAFE_NO_PAD.encode(raw.as_bytes())))
    }

    /// Decode the relative path this locator points at.
    pub fn relative_path(&self) -> Result<PathBuf> {
        let bytes = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|e| Error::Validation(format!("invalid file locator {}: {e}", self.0)))?;
        let raw = String::from_utf8(bytes)
            .map_err(|e| Error::Validation(format!("invalid file locator {}: {e}", self.0)))?;
        let path = PathBuf::from(raw);
        validate_relative(&path)?;
        Ok(path)
    }

    /// Resolve this locator against a library root.
    pub fn resolve(&self, root: &Path) -> Result<PathBuf> {
        Ok(root.join(self.relative_path()?))
    }

    /// The encoded form used in URLs.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_relative(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::Validation("empty file locator".into()));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(Error::Validation(format!(
                    "file locator must be a relative path without '..': {}",
                    path.display()
                )))
            }
        }
    }
    Ok(())
}

impl FromStr for FileLocator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let locator = Self(s.to_string());
        locator.relative_path()?;
        Ok(locator)
    }
}

impl TryFrom<String> for FileLocator {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FileLocator> for String {
    fn from(locator: FileLocator) -> Self {
        locator.0
    }
}

impl fmt::Display for FileLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one elementary stream inside a media file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    /// The media file containing the stream.
    #[serde(rename = "file_locator")]
    pub locator: FileLocator,
    /// Container-level stream index as reported by the inspection tool.
    pub stream_index: u32,
}

impl StreamKey {
    /// Create a stream key.
    pub fn new(locator: FileLocator, stream_index: u32) -> Self {
        Self {
            locator,
            stream_index,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.locator, self.stream_index)
    }
}

/// Session id chosen by the player, shared by all of its requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlayerSessionId(String);

impl PlayerSessionId {
    /// The raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PlayerSessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > MAX_PLAYER_SESSION_LEN {
            return Err(Error::Validation(format!(
                "player session id must be 1..={MAX_PLAYER_SESSION_LEN} characters"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Validation(format!("invalid player session id: {s}")));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for PlayerSessionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PlayerSessionId> for String {
    fn from(id: PlayerSessionId) -> Self {
        id.0
    }
}

impl fmt::Display for PlayerSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for one transcoding run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranscodeSessionId(Uuid);

impl TranscodeSessionId {
    /// Generate a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TranscodeSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TranscodeSessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<TranscodeSessionId> for Uuid {
    fn from(id: TranscodeSessionId) -> Self {
        id.0
    }
}

impl FromStr for TranscodeSessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<Uuid>()
            .map(Self)
            .map_err(|e| Error::Validation(format!("invalid transcode session id {s}: {e}")))
    }
}

impl fmt::Display for TranscodeSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

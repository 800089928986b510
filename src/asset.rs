//! Origin asset references.
//!
//! An [`OriginAssetRef`] names one immutable original in the origin store as
//! a `(folder, name)` pair. Only two folders exist, and names must already be
//! in sanitized form: a request whose filename would change under
//! [`sanitize_filename`] is rejected before any storage is touched.

use std::fmt;
use std::str::FromStr;

use crate::error::ServeError;

/// Top-level folder of an original in the origin store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetFolder {
    /// Background-removed images
    Nobg,
    /// Marketplace listing images
    Marketplace,
}

impl AssetFolder {
    /// The folder name as it appears in URLs and object keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetFolder::Nobg => "nobg",
            AssetFolder::Marketplace => "marketplace",
        }
    }
}

impl FromStr for AssetFolder {
    type Err = ServeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nobg" => Ok(AssetFolder::Nobg),
            "marketplace" => Ok(AssetFolder::Marketplace),
            other => Err(ServeError::InvalidRequest {
                reason: format!("unknown folder: {}", other),
            }),
        }
    }
}

impl fmt::Display for AssetFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a unique original image in the origin store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OriginAssetRef {
    folder: AssetFolder,
    name: String,
}

impl OriginAssetRef {
    /// Build a reference from an already-sanitized name.
    ///
    /// Returns `InvalidRequest` if the name is empty or not in sanitized form.
    pub fn new(folder: AssetFolder, name: impl Into<String>) -> Result<Self, ServeError> {
        let name = name.into();
        if name.is_empty() || sanitize_filename(&name) != name {
            return Err(ServeError::InvalidRequest {
                reason: format!("filename is not in sanitized form: {:?}", name),
            });
        }
        Ok(Self { folder, name })
    }

    /// Parse the raw `folder` and `filename` path segments of a request.
    pub fn parse(folder: &str, filename: &str) -> Result<Self, ServeError> {
        let folder = folder.parse::<AssetFolder>()?;
        Self::new(folder, filename)
    }

    pub fn folder(&self) -> AssetFolder {
        self.folder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object key in the origin store: `{folder}/{name}`.
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.folder, self.name)
    }
}

impl fmt::Display for OriginAssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.folder, self.name)
    }
}

/// Reduce a filename to a safe form for use as a flat object name.
///
/// Path separators become whitespace, whitespace runs collapse into a single
/// `_`, anything outside `[A-Za-z0-9_.-]` is dropped and leading or trailing
/// `.` and `_` are trimmed. `"../../etc/passwd"` becomes `"etc_passwd"`.
pub fn sanitize_filename(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

//! Content store addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

pub const CONTENT_SCHEME: &str = "content://";

/// Authority plus path segments, e.g. `content://authority/notes/5/cards`.
///
/// Immutable: the builder-style methods return new locators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceLocator {
    authority: String,
    segments: Vec<String>,
}

impl ResourceLocator {
    /// The authority root.
    pub fn root(authority: impl Into<String>) -> Result<Self> {
        let authority = authority.into();
        validate_authority(&authority)?;
        Ok(Self {
            authority,
            segments: Vec::new(),
        })
    }

    /// Parses an absolute `content://` URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix(CONTENT_SCHEME)
            .ok_or_else(|| malformed(format!("not a content URI: {uri}")))?;
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        Self::root(authority)?.join(path)
    }

    /// Parses `target` as an absolute URI, or as a path under `authority`.
    pub fn resolve(authority: &str, target: &str) -> Result<Self> {
        if target.starts_with(CONTENT_SCHEME) {
            Self::parse(target)
        } else {
            Self::root(authority)?.join(target)
        }
    }

    /// Appends a `/`-separated path. Empty components are ignored.
    pub fn join(&self, path: &str) -> Result<Self> {
        let mut segments = self.segments.clone();
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            if segment.chars().any(|c| c.is_whitespace() || matches!(c, '?' | '#')) {
                return Err(malformed(format!("invalid path segment '{segment}'")));
            }
            segments.push(segment.to_string());
        }
        Ok(Self {
            authority: self.authority.clone(),
            segments,
        })
    }

    /// The item `id` of this collection.
    pub fn item(&self, id: i64) -> Self {
        let mut segments = self.segments.clone();
        segments.push(id.to_string());
        Self {
            authority: self.authority.clone(),
            segments,
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Trailing segment parsed as an item id.
    pub fn trailing_id(&self) -> Option<i64> {
        self.last_segment()?.parse().ok()
    }

    /// The locator without its last segment.
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.segments.split_last()?;
        Some(Self {
            authority: self.authority.clone(),
            segments: rest.to_vec(),
        })
    }
}

fn validate_authority(authority: &str) -> Result<()> {
    if authority.is_empty() {
        return Err(malformed("empty authority"));
    }
    if authority
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#'))
    {
        return Err(malformed(format!("invalid authority '{authority}'")));
    }
    Ok(())
}

fn malformed(detail: impl Into<String>) -> BridgeError {
    BridgeError::Malformed {
        detail: detail.into(),
        fault: None,
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CONTENT_SCHEME}{}", self.authority)?;
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for ResourceLocator {
    type Err = BridgeError;

    fn from_str(uri: &str) -> Result<Self> {
        Self::parse(uri)
    }
}

impl TryFrom<String> for ResourceLocator {
    type Error = BridgeError;

    fn try_from(uri: String) -> Result<Self> {
        Self::parse(&uri)
    }
}

impl From<ResourceLocator> for String {
    fn from(locator: ResourceLocator) -> Self {
        locator.to_string()
    }
}

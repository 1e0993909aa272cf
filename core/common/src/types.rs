//! Common types used throughout VaultKeep.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroize;

/// Unique identifier for a vault item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "ItemId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque on-disk name of a ciphertext blob.
///
/// Always random and restricted to lowercase hex digits and dashes, so it can
/// be used as a file name without escaping and never leaks the display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalRef(String);

impl PhysicalRef {
    /// Generate a fresh random reference.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse a stored reference.
    ///
    /// # Errors
    /// - Returns error if the value is empty or contains characters outside
    ///   `[0-9a-f-]`
    pub fn parse(value: impl Into<String>) -> crate::Result<Self> {
        let value = value.into();
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c) || c == '-');
        if !valid {
            return Err(crate::Error::InvalidInput(format!(
                "Invalid physical reference: {:?}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhysicalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logical folder path, independent of physical storage.
///
/// Stored as `/`-separated text without leading or trailing separators.
/// All prefix logic works on whole components so that `A` never contains
/// `AB`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FolderPath {
    components: Vec<String>,
}

impl FolderPath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parse free-form text into a path.
    ///
    /// Components are trimmed and empty components are dropped, so
    /// `"/A//B/ "` and `"A/B"` are the same path.
    pub fn parse(path: &str) -> Self {
        let components = path
            .split('/')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();
        Self { components }
    }

    /// Parse an optional stored folder, mapping blank text to `None` (root).
    pub fn from_optional(path: Option<&str>) -> Option<Self> {
        path.map(Self::parse).filter(|p| !p.is_root())
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty or contains a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            validate_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the folder name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        let child = child.trim();
        validate_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Whether `self` equals `ancestor` or lies beneath it.
    pub fn is_within(&self, ancestor: &FolderPath) -> bool {
        self.components.len() >= ancestor.components.len()
            && self.components[..ancestor.components.len()] == ancestor.components[..]
    }

    /// Components of `self` below `ancestor`, if `self` is within it.
    pub fn relative_to(&self, ancestor: &FolderPath) -> Option<&[String]> {
        if self.is_within(ancestor) {
            Some(&self.components[ancestor.components.len()..])
        } else {
            None
        }
    }

    /// Replace the `from` prefix with `to`, if `self` is within `from`.
    pub fn rebase(&self, from: &FolderPath, to: &FolderPath) -> Option<Self> {
        let rest = self.relative_to(from)?;
        let mut components = to.components.clone();
        components.extend(rest.iter().cloned());
        Some(Self { components })
    }

    /// Render as `/`-joined text (empty for root).
    pub fn as_string(&self) -> String {
        self.components.join("/")
    }
}

fn validate_component(comp: &str) -> crate::Result<()> {
    if comp.is_empty() {
        return Err(crate::Error::InvalidInput(
            "Path component cannot be empty".to_string(),
        ));
    }
    if comp.contains('/') {
        return Err(crate::Error::InvalidInput(
            "Path component cannot contain separators".to_string(),
        ));
    }
    Ok(())
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl From<String> for FolderPath {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for FolderPath {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<FolderPath> for String {
    fn from(value: FolderPath) -> Self {
        value.as_string()
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

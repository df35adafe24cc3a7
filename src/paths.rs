//! remote key paths
//!
//! every path the node touches is built here from validated segments, so a
//! device id can never smuggle a `/` or a reserved character into the tree.

use std::fmt;

/// characters the realtime database refuses inside a key
const RESERVED: &[char] = &['/', '.', '#', '$', '[', ']'];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty path segment")]
    Empty,
    #[error("path segment {0:?} contains a reserved character")]
    Reserved(String),
}

/// a validated, `/`-rooted key path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn child(mut self, segment: impl Into<String>) -> Result<Self, PathError> {
        let segment = segment.into();
        if segment.is_empty() {
            return Err(PathError::Empty);
        }
        if segment.contains(RESERVED) || segment.chars().any(char::is_control) {
            return Err(PathError::Reserved(segment));
        }
        self.segments.push(segment);
        Ok(self)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// the four locations owned by one device
#[derive(Debug, Clone)]
pub struct DevicePaths {
    device: KeyPath,
    events: KeyPath,
    ac: KeyPath,
}

impl DevicePaths {
    pub fn new(device_id: &str) -> Result<Self, PathError> {
        Ok(Self {
            device: KeyPath::root().child("devices")?.child(device_id)?,
            events: KeyPath::root().child("events")?.child(device_id)?,
            ac: KeyPath::root().child("labs")?.child(device_id)?.child("ac")?,
        })
    }

    /// `/devices/{id}/latest`
    pub fn latest(&self) -> KeyPath {
        let mut path = self.device.clone();
        path.segments.push("latest".to_string());
        path
    }

    /// `/devices/{id}/history/{timestamp}`
    pub fn history(&self, timestamp: u64) -> KeyPath {
        let mut path = self.device.clone();
        path.segments.push("history".to_string());
        path.segments.push(timestamp.to_string());
        path
    }

    /// `/events/{id}`
    pub fn events(&self) -> &KeyPath {
        &self.events
    }

    /// `/labs/{id}/ac`
    pub fn ac(&self) -> &KeyPath {
        &self.ac
    }
}

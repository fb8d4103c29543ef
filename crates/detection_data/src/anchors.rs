//! src/anchors.rs
//!
//! Anchor templates shared read-only by every worker.
//!
//! The resource format is a single line of comma-separated floats, read in
//! consecutive pairs as `(width, height)`:
//!
//! ```text
//! 10,13, 16,30, 33,23, 30,61, 62,45, 59,119, 116,90, 156,198, 373,326
//! ```

use crate::error::GeneratorError;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// An immutable ordered sequence of `(width, height)` anchors.
///
/// Cloning only bumps a reference count, so one set loaded at construction
/// can be handed to every worker without locking.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorSet {
    anchors: Arc<[(f32, f32)]>,
}

impl AnchorSet {
    pub fn new(anchors: Vec<(f32, f32)>) -> Self {
        Self {
            anchors: anchors.into(),
        }
    }

    /// Loads anchors from a resource file.
    ///
    /// Fails with `GeneratorError::Resource` when the file cannot be read and
    /// with `GeneratorError::MalformedResource` when its first line is not an
    /// even-length list of positive floats.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| GeneratorError::Resource {
            path: path.to_path_buf(),
            source,
        })?;

        let first_line = content.lines().next().unwrap_or("");
        Self::parse(first_line).map_err(|msg| {
            anyhow::Error::new(GeneratorError::MalformedResource {
                path: path.to_path_buf(),
                msg,
            })
        })
    }

    fn parse(line: &str) -> std::result::Result<Self, String> {
        let values = line
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| {
                v.parse::<f32>()
                    .map_err(|e| format!("invalid anchor value '{}': {}", v, e))
            })
            .collect::<std::result::Result<Vec<f32>, String>>()?;

        if values.is_empty() {
            return Err("no anchor values found".to_string());
        }
        if values.len() % 2 != 0 {
            return Err(format!(
                "expected (width, height) pairs, got {} values",
                values.len()
            ));
        }
        if let Some(v) = values.iter().find(|v| !v.is_finite() || **v <= 0.0) {
            return Err(format!("anchor sizes must be positive, got {}", v));
        }

        Ok(Self::new(
            values.chunks_exact(2).map(|p| (p[0], p[1])).collect(),
        ))
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn as_slice(&self) -> &[(f32, f32)] {
        &self.anchors
    }

    pub fn iter(&self) -> impl Iterator<Item = &(f32, f32)> + '_ {
        self.anchors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parses_pairs_from_first_line() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "10,13, 16,30, 33,23")?;
        writeln!(file, "ignored,line")?;

        let anchors = AnchorSet::from_file(file.path())?;
        assert_eq!(anchors.as_slice(), &[(10.0, 13.0), (16.0, 30.0), (33.0, 23.0)]);
        assert!(!anchors.is_empty());
        let widths: Vec<f32> = anchors.iter().map(|&(w, _)| w).collect();
        assert_eq!(widths, vec![10.0, 16.0, 33.0]);
        Ok(())
    }

    #[test]
    fn test_odd_count_is_malformed() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "10,13,16")?;

        let err = AnchorSet::from_file(file.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GeneratorError>(),
            Some(GeneratorError::MalformedResource { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_missing_file_is_resource_error() {
        let err = AnchorSet::from_file("/definitely/not/here/anchors.txt").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GeneratorError>(),
            Some(GeneratorError::Resource { .. })
        ));
    }
}

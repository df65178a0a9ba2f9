//! Dotted part addresses such as `1.2.3`.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Address of a part inside a rendered message.
///
/// Segments are 1-based child indices. The empty path addresses the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartPath(Vec<usize>);

impl PartPath {
    /// The root path.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Parses a dotted path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for empty input, empty segments, zero,
    /// or anything that is not a decimal number.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidPath("empty path".to_string()));
        }
        s.split('.')
            .map(|segment| match segment.parse::<usize>() {
                Ok(0) | Err(_) => Err(Error::InvalidPath(s.to_string())),
                Ok(n) if segment.bytes().all(|b| b.is_ascii_digit()) => Ok(n),
                Ok(_) => Err(Error::InvalidPath(s.to_string())),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Returns the path of the `index`-th (1-based) child.
    #[must_use]
    pub fn child(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(index);
        Self(segments)
    }

    /// The segments of this path.
    #[must_use]
    pub fn segments(&self) -> &[usize] {
        &self.0
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PartPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for PartPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

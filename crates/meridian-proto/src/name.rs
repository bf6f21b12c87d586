//! Domain names.

use crate::error::{Error, Result};
use crate::wire::WireReader;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A fully qualified domain name.
///
/// Stored as lowercase labels; DNS name comparison is case-insensitive
/// (RFC 1035 §2.3.3) and Meridian normalizes at every boundary. The root
/// name has zero labels and displays as `"."`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Name {
    labels: Vec<String>,
}

impl Name {
    /// The root name.
    pub fn root() -> Self {
        Self { labels: Vec::new() }
    }

    /// Returns the labels, most specific first.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Returns true if this is the root name.
    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of labels.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Returns true if `self` equals `other` or is a subdomain of it.
    pub fn is_subdomain_of(&self, other: &Name) -> bool {
        if other.labels.len() > self.labels.len() {
            return false;
        }
        let offset = self.labels.len() - other.labels.len();
        self.labels[offset..] == other.labels[..]
    }

    /// Wire length of the uncompressed encoding.
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    /// Writes the uncompressed wire encoding.
    pub fn write_to(&self, buf: &mut BytesMut) {
        for label in &self.labels {
            buf.extend_from_slice(&[label.len() as u8]);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.extend_from_slice(&[0]);
    }

    /// Parses a name (possibly compressed) from the reader.
    pub fn parse(reader: &mut WireReader<'_>) -> Result<Self> {
        let raw = reader.read_name_labels()?;
        let mut labels = Vec::with_capacity(raw.len());
        for bytes in raw {
            let label = String::from_utf8_lossy(&bytes).to_ascii_lowercase();
            labels.push(label);
        }
        Ok(Self { labels })
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "." {
            return Ok(Self::root());
        }
        let without_dot = trimmed.strip_suffix('.').unwrap_or(trimmed);

        let mut labels = Vec::new();
        let mut total = 0usize;
        for part in without_dot.split('.') {
            if part.is_empty() {
                return Err(Error::InvalidLabel(s.to_string()));
            }
            if part.len() > crate::MAX_LABEL_LENGTH {
                return Err(Error::LabelTooLong(part.len()));
            }
            total += part.len() + 1;
            labels.push(part.to_ascii_lowercase());
        }
        if total + 1 > crate::MAX_NAME_LENGTH {
            return Err(Error::NameTooLong(total + 1));
        }
        Ok(Self { labels })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return f.write_str(".");
        }
        for label in &self.labels {
            f.write_str(label)?;
            f.write_str(".")?;
        }
        Ok(())
    }
}

//! DNS record classes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// DNS record class (RFC 1035 §3.2.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordClass {
    /// Internet.
    In,
    /// CHAOS.
    Ch,
    /// Hesiod.
    Hs,
    /// Any class (query-only).
    Any,
    /// Unrecognized class value.
    Unknown(u16),
}

impl RecordClass {
    /// Creates a class from its numeric value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::In,
            3 => Self::Ch,
            4 => Self::Hs,
            255 => Self::Any,
            other => Self::Unknown(other),
        }
    }

    /// Returns the numeric value of this class.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::In => 1,
            Self::Ch => 3,
            Self::Hs => 4,
            Self::Any => 255,
            Self::Unknown(v) => v,
        }
    }
}

impl Default for RecordClass {
    fn default() -> Self {
        Self::In
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => f.write_str("IN"),
            Self::Ch => f.write_str("CH"),
            Self::Hs => f.write_str("HS"),
            Self::Any => f.write_str("ANY"),
            Self::Unknown(v) => write!(f, "CLASS{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_roundtrip() {
        assert_eq!(RecordClass::from_u16(1), RecordClass::In);
        assert_eq!(RecordClass::In.to_u16(), 1);
        assert_eq!(RecordClass::from_u16(42), RecordClass::Unknown(42));
        assert_eq!(RecordClass::Unknown(42).to_u16(), 42);
    }
}

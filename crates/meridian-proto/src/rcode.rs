//! DNS response codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// DNS response code (RFC 1035 §4.1.1, extended by RFC 6891).
///
/// Only the 4-bit header portion is modeled here; the authoritative
/// server never emits extended rcodes of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseCode {
    /// No error.
    NoError,
    /// Format error: the server could not interpret the query.
    FormErr,
    /// Server failure.
    ServFail,
    /// Name error: the domain does not exist (NXDOMAIN).
    NXDomain,
    /// Not implemented.
    NotImp,
    /// Refused for policy reasons.
    Refused,
    /// Name exists when it should not (RFC 2136).
    YXDomain,
    /// RRSet exists when it should not (RFC 2136).
    YXRRSet,
    /// RRSet that should exist does not (RFC 2136).
    NXRRSet,
    /// Server not authoritative for the zone (RFC 2136).
    NotAuth,
    /// Name not contained in zone (RFC 2136).
    NotZone,
}

impl ResponseCode {
    /// Creates a response code from the 4-bit header value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NoError),
            1 => Some(Self::FormErr),
            2 => Some(Self::ServFail),
            3 => Some(Self::NXDomain),
            4 => Some(Self::NotImp),
            5 => Some(Self::Refused),
            6 => Some(Self::YXDomain),
            7 => Some(Self::YXRRSet),
            8 => Some(Self::NXRRSet),
            9 => Some(Self::NotAuth),
            10 => Some(Self::NotZone),
            _ => None,
        }
    }

    /// Returns the 4-bit header value.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::NoError => 0,
            Self::FormErr => 1,
            Self::ServFail => 2,
            Self::NXDomain => 3,
            Self::NotImp => 4,
            Self::Refused => 5,
            Self::YXDomain => 6,
            Self::YXRRSet => 7,
            Self::NXRRSet => 8,
            Self::NotAuth => 9,
            Self::NotZone => 10,
        }
    }

    /// Returns true for NOERROR.
    pub fn is_success(self) -> bool {
        self == Self::NoError
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoError => "NOERROR",
            Self::FormErr => "FORMERR",
            Self::ServFail => "SERVFAIL",
            Self::NXDomain => "NXDOMAIN",
            Self::NotImp => "NOTIMP",
            Self::Refused => "REFUSED",
            Self::YXDomain => "YXDOMAIN",
            Self::YXRRSet => "YXRRSET",
            Self::NXRRSet => "NXRRSET",
            Self::NotAuth => "NOTAUTH",
            Self::NotZone => "NOTZONE",
        };
        f.write_str(s)
    }
}

//! DNS record types.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// DNS record type.
///
/// Covers the record set the authoritative store serves, the OPT
/// pseudo-type, and an `Unknown` escape for anything else seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    A,
    Ns,
    Cname,
    Soa,
    Ptr,
    Mx,
    Txt,
    Aaaa,
    Srv,
    Opt,
    Ds,
    Rrsig,
    Dnskey,
    Caa,
    Any,
    /// Unrecognized type value.
    Unknown(u16),
}

impl RecordType {
    /// Creates a record type from its numeric value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::A,
            2 => Self::Ns,
            5 => Self::Cname,
            6 => Self::Soa,
            12 => Self::Ptr,
            15 => Self::Mx,
            16 => Self::Txt,
            28 => Self::Aaaa,
            33 => Self::Srv,
            41 => Self::Opt,
            43 => Self::Ds,
            46 => Self::Rrsig,
            48 => Self::Dnskey,
            255 => Self::Any,
            257 => Self::Caa,
            other => Self::Unknown(other),
        }
    }

    /// Returns the numeric value of this type.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::A => 1,
            Self::Ns => 2,
            Self::Cname => 5,
            Self::Soa => 6,
            Self::Ptr => 12,
            Self::Mx => 15,
            Self::Txt => 16,
            Self::Aaaa => 28,
            Self::Srv => 33,
            Self::Opt => 41,
            Self::Ds => 43,
            Self::Rrsig => 46,
            Self::Dnskey => 48,
            Self::Any => 255,
            Self::Caa => 257,
            Self::Unknown(v) => v,
        }
    }

    /// Returns the uppercase mnemonic.
    pub fn mnemonic(self) -> String {
        match self {
            Self::A => "A".to_string(),
            Self::Ns => "NS".to_string(),
            Self::Cname => "CNAME".to_string(),
            Self::Soa => "SOA".to_string(),
            Self::Ptr => "PTR".to_string(),
            Self::Mx => "MX".to_string(),
            Self::Txt => "TXT".to_string(),
            Self::Aaaa => "AAAA".to_string(),
            Self::Srv => "SRV".to_string(),
            Self::Opt => "OPT".to_string(),
            Self::Ds => "DS".to_string(),
            Self::Rrsig => "RRSIG".to_string(),
            Self::Dnskey => "DNSKEY".to_string(),
            Self::Caa => "CAA".to_string(),
            Self::Any => "ANY".to_string(),
            Self::Unknown(v) => format!("TYPE{}", v),
        }
    }
}

impl FromStr for RecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let t = match upper.as_str() {
            "A" => Self::A,
            "NS" => Self::Ns,
            "CNAME" => Self::Cname,
            "SOA" => Self::Soa,
            "PTR" => Self::Ptr,
            "MX" => Self::Mx,
            "TXT" => Self::Txt,
            "AAAA" => Self::Aaaa,
            "SRV" => Self::Srv,
            "DS" => Self::Ds,
            "RRSIG" => Self::Rrsig,
            "DNSKEY" => Self::Dnskey,
            "CAA" => Self::Caa,
            "ANY" => Self::Any,
            _ => {
                // RFC 3597 TYPE#### syntax
                if let Some(num) = upper.strip_prefix("TYPE") {
                    let v: u16 = num
                        .parse()
                        .map_err(|_| Error::UnknownRecordType(s.to_string()))?;
                    return Ok(Self::from_u16(v));
                }
                return Err(Error::UnknownRecordType(s.to_string()));
            }
        };
        Ok(t)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mnemonic())
    }
}

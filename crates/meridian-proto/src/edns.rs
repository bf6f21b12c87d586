//! EDNS(0) support (RFC 6891).
//!
//! Meridian reads the OPT pseudo-RR only to extract the Client Subnet
//! option (RFC 7871) for Geo scoping. It never emits an OPT of its own.

use crate::error::{Error, Result};
use crate::wire::WireReader;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// EDNS Client Subnet option code (RFC 7871).
pub const OPTION_CLIENT_SUBNET: u16 = 8;

/// A single EDNS option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdnsOption {
    /// Client subnet information (RFC 7871).
    ClientSubnet {
        /// Address family: 1 = IPv4, 2 = IPv6.
        family: u16,
        /// Source prefix length.
        source_prefix: u8,
        /// Scope prefix length.
        scope_prefix: u8,
        /// Truncated address bytes.
        address: Vec<u8>,
    },
    /// Any option Meridian does not interpret.
    Unknown {
        /// Option code.
        code: u16,
        /// Raw option data.
        data: Vec<u8>,
    },
}

impl EdnsOption {
    fn parse(code: u16, data: &[u8]) -> Self {
        if code == OPTION_CLIENT_SUBNET && data.len() >= 4 {
            return Self::ClientSubnet {
                family: u16::from_be_bytes([data[0], data[1]]),
                source_prefix: data[2],
                scope_prefix: data[3],
                address: data[4..].to_vec(),
            };
        }
        Self::Unknown {
            code,
            data: data.to_vec(),
        }
    }
}

/// Decoded OPT pseudo-record state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edns {
    /// Advertised UDP payload size.
    pub udp_size: u16,
    /// Extended rcode high bits.
    pub ext_rcode: u8,
    /// EDNS version.
    pub version: u8,
    /// OPT TTL flag bits (DO and reserved).
    pub flags: u16,
    /// Options carried in the OPT record.
    pub options: Vec<EdnsOption>,
}

impl Edns {
    /// Parses the variable portion of an OPT record. The owner name has
    /// already been consumed; `udp_size` is the record's CLASS field and
    /// `ttl` its TTL field.
    pub fn parse(
        reader: &mut WireReader<'_>,
        udp_size: u16,
        ttl: u32,
        rdlength: usize,
    ) -> Result<Self> {
        let ext_rcode = (ttl >> 24) as u8;
        let version = (ttl >> 16) as u8;
        let flags = ttl as u16;

        let end = reader.position() + rdlength;
        let mut options = Vec::new();
        while reader.position() + 4 <= end {
            let code = reader.read_u16()?;
            let len = reader.read_u16()? as usize;
            if reader.position() + len > end {
                return Err(Error::buffer_too_short(len, end - reader.position()));
            }
            let data = reader.read_bytes(len)?;
            options.push(EdnsOption::parse(code, data));
        }
        reader.seek(end);

        Ok(Self {
            udp_size,
            ext_rcode,
            version,
            flags,
            options,
        })
    }

    /// Returns the client address carried in an ECS option, if present.
    ///
    /// The option carries only `source_prefix` bits of the address; the
    /// rest is zero-padded, which is all Geo lookup needs.
    pub fn client_subnet_addr(&self) -> Option<IpAddr> {
        for option in &self.options {
            if let EdnsOption::ClientSubnet {
                family, address, ..
            } = option
            {
                match family {
                    1 => {
                        let mut octets = [0u8; 4];
                        let n = address.len().min(4);
                        octets[..n].copy_from_slice(&address[..n]);
                        return Some(IpAddr::V4(Ipv4Addr::from(octets)));
                    }
                    2 => {
                        let mut octets = [0u8; 16];
                        let n = address.len().min(16);
                        octets[..n].copy_from_slice(&address[..n]);
                        return Some(IpAddr::V6(Ipv6Addr::from(octets)));
                    }
                    _ => continue,
                }
            }
        }
        None
    }
}

//! Resource records.

use crate::class::RecordClass;
use crate::error::Result;
use crate::name::Name;
use crate::rdata::RData;
use crate::rtype::RecordType;
use crate::wire::WireReader;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A DNS resource record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Owner name.
    pub name: Name,
    /// Record type.
    pub rtype: RecordType,
    /// Record class.
    pub class: RecordClass,
    /// Time to live in seconds.
    pub ttl: u32,
    /// Record data.
    pub rdata: RData,
}

impl ResourceRecord {
    /// Creates a record from its components.
    pub fn new(name: Name, rtype: RecordType, ttl: u32, rdata: RData) -> Self {
        Self {
            name,
            rtype,
            class: RecordClass::In,
            ttl,
            rdata,
        }
    }

    /// Composes a record from the stored textual form, the way the catalog
    /// renders answers: `<name> <ttl> <TYPE> <rdata>`.
    pub fn from_text(name: &str, ttl: u32, rtype: RecordType, rdata_text: &str) -> Result<Self> {
        Ok(Self::new(
            Name::from_str(name)?,
            rtype,
            ttl,
            RData::from_text(rtype, rdata_text)?,
        ))
    }

    /// Convenience constructor for A records.
    pub fn a(name: Name, ttl: u32, addr: std::net::Ipv4Addr) -> Self {
        Self::new(name, RecordType::A, ttl, RData::A(addr))
    }

    /// Parses a record from the reader.
    pub fn parse(reader: &mut WireReader<'_>) -> Result<Self> {
        let name = Name::parse(reader)?;
        let rtype = RecordType::from_u16(reader.read_u16()?);
        let class = RecordClass::from_u16(reader.read_u16()?);
        let ttl = reader.read_u32()?;
        let rdlength = reader.read_u16()? as usize;
        let rdata = RData::parse(reader, rtype, rdlength)?;
        Ok(Self {
            name,
            rtype,
            class,
            ttl,
            rdata,
        })
    }

    /// Writes the record to the buffer, uncompressed.
    pub fn write_to(&self, buf: &mut BytesMut) {
        self.name.write_to(buf);
        buf.extend_from_slice(&self.rtype.to_u16().to_be_bytes());
        buf.extend_from_slice(&self.class.to_u16().to_be_bytes());
        buf.extend_from_slice(&self.ttl.to_be_bytes());

        // Reserve the rdlength slot, write the rdata, then patch the length.
        let len_pos = buf.len();
        buf.extend_from_slice(&[0, 0]);
        self.rdata.write_to(buf);
        let rdlength = (buf.len() - len_pos - 2) as u16;
        buf[len_pos..len_pos + 2].copy_from_slice(&rdlength.to_be_bytes());
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.name, self.ttl, self.class, self.rtype, self.rdata
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_text() {
        let rr =
            ResourceRecord::from_text("www.example.com.", 300, RecordType::A, "192.0.2.10")
                .unwrap();
        assert_eq!(rr.ttl, 300);
        assert_eq!(rr.to_string(), "www.example.com. 300 IN A 192.0.2.10");
    }

    #[test]
    fn test_record_wire_roundtrip() {
        let rr = ResourceRecord::from_text(
            "mail.example.com.",
            600,
            RecordType::Mx,
            "10 mx1.example.com.",
        )
        .unwrap();

        let mut buf = BytesMut::new();
        rr.write_to(&mut buf);

        let mut reader = WireReader::new(&buf);
        let parsed = ResourceRecord::parse(&mut reader).unwrap();
        assert_eq!(parsed, rr);
        assert_eq!(reader.remaining(), 0);
    }
}

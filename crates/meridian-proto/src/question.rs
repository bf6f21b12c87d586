//! DNS question section.

use crate::class::RecordClass;
use crate::error::Result;
use crate::name::Name;
use crate::rtype::RecordType;
use crate::wire::WireReader;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single question entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Queried name.
    pub qname: Name,
    /// Queried record type.
    pub qtype: RecordType,
    /// Queried class.
    pub qclass: RecordClass,
}

impl Question {
    /// Creates a new question.
    pub fn new(qname: Name, qtype: RecordType) -> Self {
        Self {
            qname,
            qtype,
            qclass: RecordClass::In,
        }
    }

    /// Parses a question from the reader.
    pub fn parse(reader: &mut WireReader<'_>) -> Result<Self> {
        let qname = Name::parse(reader)?;
        let qtype = RecordType::from_u16(reader.read_u16()?);
        let qclass = RecordClass::from_u16(reader.read_u16()?);
        Ok(Self {
            qname,
            qtype,
            qclass,
        })
    }

    /// Writes the question to the buffer.
    pub fn write_to(&self, buf: &mut BytesMut) {
        self.qname.write_to(buf);
        buf.extend_from_slice(&self.qtype.to_u16().to_be_bytes());
        buf.extend_from_slice(&self.qclass.to_u16().to_be_bytes());
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.qname, self.qclass, self.qtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_question_roundtrip() {
        let q = Question::new(Name::from_str("example.com.").unwrap(), RecordType::A);
        let mut buf = BytesMut::new();
        q.write_to(&mut buf);

        let mut reader = WireReader::new(&buf);
        let parsed = Question::parse(&mut reader).unwrap();
        assert_eq!(parsed, q);
    }
}

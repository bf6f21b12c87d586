//! DNS message assembly and parsing.

use crate::edns::Edns;
use crate::error::Result;
use crate::header::{Header, HEADER_SIZE};
use crate::question::Question;
use crate::rcode::ResponseCode;
use crate::record::ResourceRecord;
use crate::rtype::RecordType;
use crate::wire::WireReader;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};

/// A complete DNS message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    header: Header,
    questions: Vec<Question>,
    answers: Vec<ResourceRecord>,
    authorities: Vec<ResourceRecord>,
    additionals: Vec<ResourceRecord>,
    edns: Option<Edns>,
}

impl Message {
    /// Creates an empty message with the given header.
    pub fn with_header(header: Header) -> Self {
        Self {
            header,
            questions: Vec::new(),
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
            edns: None,
        }
    }

    /// Builds a query for a single question.
    pub fn query(question: Question) -> Self {
        let mut msg = Self::with_header(Header::query());
        msg.questions.push(question);
        msg
    }

    /// Builds an empty response mirroring a query.
    pub fn response_from(query: &Message) -> Self {
        let mut msg = Self::with_header(Header::response_from(&query.header));
        msg.questions = query.questions.clone();
        msg
    }

    /// Message ID.
    pub fn id(&self) -> u16 {
        self.header.id
    }

    /// Overrides the message ID.
    pub fn set_id(&mut self, id: u16) {
        self.header.id = id;
    }

    /// Response code.
    pub fn rcode(&self) -> ResponseCode {
        self.header.rcode
    }

    /// Sets the response code.
    pub fn set_rcode(&mut self, rcode: ResponseCode) {
        self.header.rcode = rcode;
    }

    /// Marks the message as an authoritative answer.
    pub fn set_authoritative(&mut self, aa: bool) {
        self.header.set_authoritative(aa);
    }

    /// Returns true if the TC bit is set.
    pub fn is_truncated(&self) -> bool {
        self.header.is_truncated()
    }

    /// Header accessor.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Question section.
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Replaces the question section.
    pub fn set_questions(&mut self, questions: Vec<Question>) {
        self.questions = questions;
    }

    /// Answer section.
    pub fn answers(&self) -> &[ResourceRecord] {
        &self.answers
    }

    /// Appends an answer record.
    pub fn add_answer(&mut self, record: ResourceRecord) {
        self.answers.push(record);
    }

    /// Authority section.
    pub fn authorities(&self) -> &[ResourceRecord] {
        &self.authorities
    }

    /// Additional section (without the OPT pseudo-record).
    pub fn additionals(&self) -> &[ResourceRecord] {
        &self.additionals
    }

    /// Decoded EDNS state, if the message carried an OPT record.
    pub fn edns(&self) -> Option<&Edns> {
        self.edns.as_ref()
    }

    /// Returns the ECS client address, if the query carried one.
    pub fn ecs_addr(&self) -> Option<std::net::IpAddr> {
        self.edns.as_ref().and_then(|e| e.client_subnet_addr())
    }

    /// Parses a message from wire format.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = Header::parse(data)?;
        let mut reader = WireReader::new(data);
        reader.seek(HEADER_SIZE);

        let mut questions = Vec::with_capacity(header.qd_count as usize);
        for _ in 0..header.qd_count {
            questions.push(Question::parse(&mut reader)?);
        }

        let mut answers = Vec::with_capacity(header.an_count as usize);
        for _ in 0..header.an_count {
            answers.push(ResourceRecord::parse(&mut reader)?);
        }

        let mut authorities = Vec::with_capacity(header.ns_count as usize);
        for _ in 0..header.ns_count {
            authorities.push(ResourceRecord::parse(&mut reader)?);
        }

        let mut additionals = Vec::new();
        let mut edns = None;
        for _ in 0..header.ar_count {
            let start = reader.position();
            let _name = crate::name::Name::parse(&mut reader)?;
            let rtype = RecordType::from_u16(reader.read_u16()?);

            if rtype == RecordType::Opt {
                let udp_size = reader.read_u16()?;
                let ttl = reader.read_u32()?;
                let rdlength = reader.read_u16()? as usize;
                edns = Some(Edns::parse(&mut reader, udp_size, ttl, rdlength)?);
            } else {
                reader.seek(start);
                additionals.push(ResourceRecord::parse(&mut reader)?);
            }
        }

        Ok(Self {
            header,
            questions,
            answers,
            authorities,
            additionals,
            edns,
        })
    }

    /// Serializes the message to wire format, uncompressed.
    ///
    /// The server never emits an OPT record of its own; parsed EDNS state
    /// is not round-tripped.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut header = self.header.clone();
        header.qd_count = self.questions.len() as u16;
        header.an_count = self.answers.len() as u16;
        header.ns_count = self.authorities.len() as u16;
        header.ar_count = self.additionals.len() as u16;

        let mut buf = BytesMut::with_capacity(512);
        buf.extend_from_slice(&header.to_wire());
        for q in &self.questions {
            q.write_to(&mut buf);
        }
        for rr in &self.answers {
            rr.write_to(&mut buf);
        }
        for rr in &self.authorities {
            rr.write_to(&mut buf);
        }
        for rr in &self.additionals {
            rr.write_to(&mut buf);
        }
        buf.to_vec()
    }

    /// Truncates the message to fit within `max_size` bytes by dropping
    /// answers from the tail and setting the TC bit.
    pub fn truncate_to(&mut self, max_size: usize) {
        while self.to_wire().len() > max_size && !self.answers.is_empty() {
            self.answers.pop();
            self.header.set_truncated(true);
        }
        if self.to_wire().len() > max_size {
            self.authorities.clear();
            self.additionals.clear();
            self.header.set_truncated(true);
        }
    }
}

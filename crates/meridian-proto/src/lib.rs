//! # Meridian DNS Protocol Library
//!
//! DNS protocol types, wire format parsing, and serialization for the
//! Meridian authoritative server, following RFC 1035 and its extensions.
//!
//! ## Features
//!
//! - RFC 1035 message parsing and assembly with compression-pointer decoding
//! - EDNS(0) OPT pseudo-RR with Client Subnet (RFC 7871) extraction
//! - Typed RDATA for the authoritative record set, convertible to and from
//!   the textual zone-file form stored in the catalog
//! - DNSSEC record payloads (DNSKEY, RRSIG, DS) carried verbatim; no signing

pub mod class;
pub mod edns;
pub mod error;
pub mod header;
pub mod message;
pub mod name;
pub mod opcode;
pub mod question;
pub mod rcode;
pub mod rdata;
pub mod record;
pub mod rtype;
pub mod wire;

pub use class::RecordClass;
pub use edns::{Edns, EdnsOption};
pub use error::{Error, Result};
pub use header::Header;
pub use message::Message;
pub use name::Name;
pub use opcode::OpCode;
pub use question::Question;
pub use rcode::ResponseCode;
pub use rdata::RData;
pub use record::ResourceRecord;
pub use rtype::RecordType;

/// Maximum length of a DNS label (63 bytes per RFC 1035).
pub const MAX_LABEL_LENGTH: usize = 63;

/// Maximum length of a domain name (255 bytes per RFC 1035).
pub const MAX_NAME_LENGTH: usize = 255;

/// Maximum size of a UDP DNS message without EDNS0 (512 bytes per RFC 1035).
pub const MAX_UDP_MESSAGE_SIZE: usize = 512;

/// DNS port (53).
pub const DNS_PORT: u16 = 53;

//! Typed RDATA.
//!
//! The catalog stores record data in textual zone-file form; answers are
//! composed by parsing that text into a typed value and rendering it to
//! wire format. Wire parsing is also supported so forwarded upstream
//! responses can be re-serialized with compression pointers resolved.

use crate::error::{Error, Result};
use crate::name::Name;
use crate::rtype::RecordType;
use crate::wire::WireReader;
use bytes::BytesMut;
use chrono::NaiveDateTime;
use data_encoding::{BASE64, HEXUPPER_PERMISSIVE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Record data for the supported record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RData {
    /// IPv4 host address.
    A(Ipv4Addr),
    /// IPv6 host address.
    Aaaa(Ipv6Addr),
    /// Canonical name.
    Cname(Name),
    /// Authoritative name server.
    Ns(Name),
    /// Domain name pointer.
    Ptr(Name),
    /// Mail exchange.
    Mx {
        /// Preference, lower wins.
        preference: u16,
        /// Exchange host.
        exchange: Name,
    },
    /// Text strings.
    Txt(Vec<String>),
    /// Start of authority.
    Soa {
        /// Primary name server (MNAME).
        mname: Name,
        /// Responsible mailbox (RNAME).
        rname: Name,
        /// Zone serial number.
        serial: u32,
        /// Refresh interval.
        refresh: u32,
        /// Retry interval.
        retry: u32,
        /// Expire limit.
        expire: u32,
        /// Negative-caching minimum TTL.
        minimum: u32,
    },
    /// Service locator (RFC 2782).
    Srv {
        /// Priority, lower wins.
        priority: u16,
        /// Weight among same-priority targets.
        weight: u16,
        /// Service port.
        port: u16,
        /// Target host.
        target: Name,
    },
    /// Certification authority authorization (RFC 8659).
    Caa {
        /// Critical flag byte.
        flags: u8,
        /// Property tag.
        tag: String,
        /// Property value.
        value: String,
    },
    /// DNSSEC public key, payload carried verbatim.
    Dnskey {
        /// Key flags.
        flags: u16,
        /// Protocol (always 3).
        protocol: u8,
        /// Signing algorithm number.
        algorithm: u8,
        /// Key material.
        public_key: Vec<u8>,
    },
    /// Delegation signer digest, payload carried verbatim.
    Ds {
        /// Key tag of the referenced DNSKEY.
        key_tag: u16,
        /// Signing algorithm number.
        algorithm: u8,
        /// Digest algorithm number.
        digest_type: u8,
        /// Digest bytes.
        digest: Vec<u8>,
    },
    /// Pre-computed signature, payload carried verbatim.
    Rrsig {
        /// Covered record type.
        type_covered: RecordType,
        /// Signing algorithm number.
        algorithm: u8,
        /// Label count of the signed name.
        labels: u8,
        /// Original TTL.
        original_ttl: u32,
        /// Signature expiration (epoch seconds).
        expiration: u32,
        /// Signature inception (epoch seconds).
        inception: u32,
        /// Key tag.
        key_tag: u16,
        /// Signer name.
        signer: Name,
        /// Signature bytes.
        signature: Vec<u8>,
    },
    /// Opaque rdata for types outside the supported set.
    Raw(Vec<u8>),
}

impl RData {
    /// Parses rdata from its textual zone-file form for the given type.
    pub fn from_text(rtype: RecordType, text: &str) -> Result<Self> {
        let text = text.trim();
        let fail = |msg: &str| Error::rdata_text(rtype.mnemonic(), msg);

        match rtype {
            RecordType::A => {
                let addr: Ipv4Addr = text.parse().map_err(|_| fail("expected IPv4 address"))?;
                Ok(Self::A(addr))
            }
            RecordType::Aaaa => {
                let addr: Ipv6Addr = text.parse().map_err(|_| fail("expected IPv6 address"))?;
                Ok(Self::Aaaa(addr))
            }
            RecordType::Cname => Ok(Self::Cname(Name::from_str(text)?)),
            RecordType::Ns => Ok(Self::Ns(Name::from_str(text)?)),
            RecordType::Ptr => Ok(Self::Ptr(Name::from_str(text)?)),
            RecordType::Mx => {
                let mut parts = text.split_whitespace();
                let preference = parts
                    .next()
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(|| fail("expected preference"))?;
                let exchange = parts.next().ok_or_else(|| fail("expected exchange"))?;
                Ok(Self::Mx {
                    preference,
                    exchange: Name::from_str(exchange)?,
                })
            }
            RecordType::Txt => {
                let strings = parse_char_strings(text);
                if strings.is_empty() {
                    return Err(fail("expected at least one string"));
                }
                Ok(Self::Txt(strings))
            }
            RecordType::Soa => {
                let parts: Vec<&str> = text.split_whitespace().collect();
                if parts.len() < 7 {
                    return Err(fail("expected 7 fields"));
                }
                let num = |i: usize| -> Result<u32> {
                    parts[i].parse().map_err(|_| fail("expected numeric field"))
                };
                Ok(Self::Soa {
                    mname: Name::from_str(parts[0])?,
                    rname: Name::from_str(parts[1])?,
                    serial: num(2)?,
                    refresh: num(3)?,
                    retry: num(4)?,
                    expire: num(5)?,
                    minimum: num(6)?,
                })
            }
            RecordType::Srv => {
                let parts: Vec<&str> = text.split_whitespace().collect();
                if parts.len() < 4 {
                    return Err(fail("expected 4 fields"));
                }
                let num = |i: usize| -> Result<u16> {
                    parts[i].parse().map_err(|_| fail("expected numeric field"))
                };
                Ok(Self::Srv {
                    priority: num(0)?,
                    weight: num(1)?,
                    port: num(2)?,
                    target: Name::from_str(parts[3])?,
                })
            }
            RecordType::Caa => {
                let parts: Vec<&str> = text.splitn(3, char::is_whitespace).collect();
                if parts.len() < 3 {
                    return Err(fail("expected flags, tag and value"));
                }
                let flags = parts[0].parse().map_err(|_| fail("expected flags byte"))?;
                let value = parts[2].trim().trim_matches('"').to_string();
                Ok(Self::Caa {
                    flags,
                    tag: parts[1].to_ascii_lowercase(),
                    value,
                })
            }
            RecordType::Dnskey => {
                let parts: Vec<&str> = text.split_whitespace().collect();
                if parts.len() < 4 {
                    return Err(fail("expected flags, protocol, algorithm and key"));
                }
                let public_key = BASE64
                    .decode(parts[3..].concat().as_bytes())
                    .map_err(|_| fail("invalid base64 key material"))?;
                Ok(Self::Dnskey {
                    flags: parts[0].parse().map_err(|_| fail("expected flags"))?,
                    protocol: parts[1].parse().map_err(|_| fail("expected protocol"))?,
                    algorithm: parts[2].parse().map_err(|_| fail("expected algorithm"))?,
                    public_key,
                })
            }
            RecordType::Ds => {
                let parts: Vec<&str> = text.split_whitespace().collect();
                if parts.len() < 4 {
                    return Err(fail("expected key tag, algorithm, digest type and digest"));
                }
                let digest = HEXUPPER_PERMISSIVE
                    .decode(parts[3..].concat().to_ascii_uppercase().as_bytes())
                    .map_err(|_| fail("invalid hex digest"))?;
                Ok(Self::Ds {
                    key_tag: parts[0].parse().map_err(|_| fail("expected key tag"))?,
                    algorithm: parts[1].parse().map_err(|_| fail("expected algorithm"))?,
                    digest_type: parts[2].parse().map_err(|_| fail("expected digest type"))?,
                    digest,
                })
            }
            RecordType::Rrsig => {
                let parts: Vec<&str> = text.split_whitespace().collect();
                if parts.len() < 9 {
                    return Err(fail("expected 9 fields"));
                }
                let signature = BASE64
                    .decode(parts[8..].concat().as_bytes())
                    .map_err(|_| fail("invalid base64 signature"))?;
                Ok(Self::Rrsig {
                    type_covered: parts[0].parse()?,
                    algorithm: parts[1].parse().map_err(|_| fail("expected algorithm"))?,
                    labels: parts[2].parse().map_err(|_| fail("expected label count"))?,
                    original_ttl: parts[3].parse().map_err(|_| fail("expected original TTL"))?,
                    expiration: parse_sig_time(parts[4]).ok_or_else(|| fail("bad expiration"))?,
                    inception: parse_sig_time(parts[5]).ok_or_else(|| fail("bad inception"))?,
                    key_tag: parts[6].parse().map_err(|_| fail("expected key tag"))?,
                    signer: Name::from_str(parts[7])?,
                    signature,
                })
            }
            other => Err(Error::RdataNotEncodable {
                rtype: other.mnemonic(),
            }),
        }
    }

    /// Parses rdata from wire format.
    pub fn parse(reader: &mut WireReader<'_>, rtype: RecordType, rdlength: usize) -> Result<Self> {
        let end = reader.position() + rdlength;
        let rdata = match rtype {
            RecordType::A => {
                let bytes = reader.read_bytes(4)?;
                Self::A(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
            }
            RecordType::Aaaa => {
                let bytes = reader.read_bytes(16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                Self::Aaaa(Ipv6Addr::from(octets))
            }
            RecordType::Cname => Self::Cname(Name::parse(reader)?),
            RecordType::Ns => Self::Ns(Name::parse(reader)?),
            RecordType::Ptr => Self::Ptr(Name::parse(reader)?),
            RecordType::Mx => Self::Mx {
                preference: reader.read_u16()?,
                exchange: Name::parse(reader)?,
            },
            RecordType::Txt => {
                let mut strings = Vec::new();
                while reader.position() < end {
                    let len = reader.read_u8()? as usize;
                    let bytes = reader.read_bytes(len)?;
                    strings.push(String::from_utf8_lossy(bytes).into_owned());
                }
                Self::Txt(strings)
            }
            RecordType::Soa => Self::Soa {
                mname: Name::parse(reader)?,
                rname: Name::parse(reader)?,
                serial: reader.read_u32()?,
                refresh: reader.read_u32()?,
                retry: reader.read_u32()?,
                expire: reader.read_u32()?,
                minimum: reader.read_u32()?,
            },
            RecordType::Srv => Self::Srv {
                priority: reader.read_u16()?,
                weight: reader.read_u16()?,
                port: reader.read_u16()?,
                target: Name::parse(reader)?,
            },
            _ => Self::Raw(reader.read_bytes(rdlength)?.to_vec()),
        };
        // Skip any trailing bytes a lenient sender left in the rdata.
        if reader.position() < end {
            reader.seek(end);
        }
        Ok(rdata)
    }

    /// Writes the rdata to the buffer, uncompressed.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Self::A(addr) => buf.extend_from_slice(&addr.octets()),
            Self::Aaaa(addr) => buf.extend_from_slice(&addr.octets()),
            Self::Cname(name) | Self::Ns(name) | Self::Ptr(name) => name.write_to(buf),
            Self::Mx {
                preference,
                exchange,
            } => {
                buf.extend_from_slice(&preference.to_be_bytes());
                exchange.write_to(buf);
            }
            Self::Txt(strings) => {
                for s in strings {
                    for chunk in s.as_bytes().chunks(255) {
                        buf.extend_from_slice(&[chunk.len() as u8]);
                        buf.extend_from_slice(chunk);
                    }
                }
            }
            Self::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                mname.write_to(buf);
                rname.write_to(buf);
                buf.extend_from_slice(&serial.to_be_bytes());
                buf.extend_from_slice(&refresh.to_be_bytes());
                buf.extend_from_slice(&retry.to_be_bytes());
                buf.extend_from_slice(&expire.to_be_bytes());
                buf.extend_from_slice(&minimum.to_be_bytes());
            }
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                buf.extend_from_slice(&priority.to_be_bytes());
                buf.extend_from_slice(&weight.to_be_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
                target.write_to(buf);
            }
            Self::Caa { flags, tag, value } => {
                buf.extend_from_slice(&[*flags, tag.len() as u8]);
                buf.extend_from_slice(tag.as_bytes());
                buf.extend_from_slice(value.as_bytes());
            }
            Self::Dnskey {
                flags,
                protocol,
                algorithm,
                public_key,
            } => {
                buf.extend_from_slice(&flags.to_be_bytes());
                buf.extend_from_slice(&[*protocol, *algorithm]);
                buf.extend_from_slice(public_key);
            }
            Self::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => {
                buf.extend_from_slice(&key_tag.to_be_bytes());
                buf.extend_from_slice(&[*algorithm, *digest_type]);
                buf.extend_from_slice(digest);
            }
            Self::Rrsig {
                type_covered,
                algorithm,
                labels,
                original_ttl,
                expiration,
                inception,
                key_tag,
                signer,
                signature,
            } => {
                buf.extend_from_slice(&type_covered.to_u16().to_be_bytes());
                buf.extend_from_slice(&[*algorithm, *labels]);
                buf.extend_from_slice(&original_ttl.to_be_bytes());
                buf.extend_from_slice(&expiration.to_be_bytes());
                buf.extend_from_slice(&inception.to_be_bytes());
                buf.extend_from_slice(&key_tag.to_be_bytes());
                signer.write_to(buf);
                buf.extend_from_slice(signature);
            }
            Self::Raw(data) => buf.extend_from_slice(data),
        }
    }
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A(addr) => write!(f, "{}", addr),
            Self::Aaaa(addr) => write!(f, "{}", addr),
            Self::Cname(name) | Self::Ns(name) | Self::Ptr(name) => write!(f, "{}", name),
            Self::Mx {
                preference,
                exchange,
            } => write!(f, "{} {}", preference, exchange),
            Self::Txt(strings) => {
                let quoted: Vec<String> = strings.iter().map(|s| format!("{:?}", s)).collect();
                f.write_str(&quoted.join(" "))
            }
            Self::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => write!(
                f,
                "{} {} {} {} {} {} {}",
                mname, rname, serial, refresh, retry, expire, minimum
            ),
            Self::Srv {
                priority,
                weight,
                port,
                target,
            } => write!(f, "{} {} {} {}", priority, weight, port, target),
            Self::Caa { flags, tag, value } => write!(f, "{} {} {:?}", flags, tag, value),
            Self::Dnskey {
                flags,
                protocol,
                algorithm,
                public_key,
            } => write!(
                f,
                "{} {} {} {}",
                flags,
                protocol,
                algorithm,
                BASE64.encode(public_key)
            ),
            Self::Ds {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => write!(
                f,
                "{} {} {} {}",
                key_tag,
                algorithm,
                digest_type,
                HEXUPPER_PERMISSIVE.encode(digest)
            ),
            Self::Rrsig {
                type_covered,
                algorithm,
                labels,
                original_ttl,
                expiration,
                inception,
                key_tag,
                signer,
                signature,
            } => write!(
                f,
                "{} {} {} {} {} {} {} {} {}",
                type_covered,
                algorithm,
                labels,
                original_ttl,
                expiration,
                inception,
                key_tag,
                signer,
                BASE64.encode(signature)
            ),
            Self::Raw(data) => write!(f, "\\# {} {}", data.len(), HEXUPPER_PERMISSIVE.encode(data)),
        }
    }
}

/// Splits TXT rdata text into character-strings, honoring quotes and
/// backslash escapes.
fn parse_char_strings(text: &str) -> Vec<String> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut started = false;

    for c in text.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => {
                if in_quotes {
                    strings.push(std::mem::take(&mut current));
                    started = false;
                    in_quotes = false;
                } else {
                    in_quotes = true;
                    started = true;
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if started {
                    strings.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                started = true;
                current.push(c);
            }
        }
    }
    if started {
        strings.push(current);
    }
    strings
}

/// Parses an RRSIG timestamp: either `YYYYMMDDHHMMSS` or epoch seconds.
fn parse_sig_time(s: &str) -> Option<u32> {
    if s.len() == 14 {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S") {
            return u32::try_from(dt.and_utc().timestamp()).ok();
        }
    }
    s.parse().ok()
}

//! Minimal DNS message reader.
//!
//! Only what name-resolution statistics need: the QR bit and the answer
//! section. Names follow compression pointers.

use std::net::{Ipv4Addr, Ipv6Addr};

use byteorder::{ByteOrder, NetworkEndian};
use serde::Serialize;

use crate::error_handling::types::ExtractionError;

const HEADER_LEN: usize = 12;
const MAX_POINTER_JUMPS: usize = 16;
const MAX_NAME_LEN: usize = 255;

const TYPE_A: u16 = 1;
const TYPE_NS: u16 = 2;
const TYPE_CNAME: u16 = 5;
const TYPE_PTR: u16 = 12;
const TYPE_TXT: u16 = 16;
const TYPE_AAAA: u16 = 28;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsAnswer {
    pub name: String,
    pub record_type: u16,
    /// Answer data rendered as text: an address, a domain name, or hex for
    /// types this reader does not interpret.
    pub rdata: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsMessage {
    pub id: u16,
    pub is_response: bool,
    pub answers: Vec<DnsAnswer>,
}

fn malformed(what: &str) -> ExtractionError {
    ExtractionError::Malformed(format!("dns: {}", what))
}

fn read_u16(msg: &[u8], offset: usize) -> Result<u16, ExtractionError> {
    msg.get(offset..offset + 2)
        .map(NetworkEndian::read_u16)
        .ok_or_else(|| malformed("truncated"))
}

/// Reads a possibly compressed name at `offset`; returns the name and the
/// offset just past it in the original byte stream.
fn read_name(msg: &[u8], offset: usize) -> Result<(String, usize), ExtractionError> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = offset;
    let mut resume = None;
    let mut jumps = 0;
    let mut total = 0;

    loop {
        let len = *msg.get(pos).ok_or_else(|| malformed("name runs past end"))? as usize;
        match len & 0xC0 {
            0x00 if len == 0 => {
                pos += 1;
                break;
            }
            0x00 => {
                let label = msg
                    .get(pos + 1..pos + 1 + len)
                    .ok_or_else(|| malformed("label runs past end"))?;
                total += len + 1;
                if total > MAX_NAME_LEN {
                    return Err(malformed("name too long"));
                }
                labels.push(String::from_utf8_lossy(label).into_owned());
                pos += 1 + len;
            }
            0xC0 => {
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(malformed("compression loop"));
                }
                let target = (read_u16(msg, pos)? & 0x3FFF) as usize;
                if resume.is_none() {
                    resume = Some(pos + 2);
                }
                pos = target;
            }
            _ => return Err(malformed("reserved label type")),
        }
    }

    let name = if labels.is_empty() {
        ".".to_string()
    } else {
        labels.join(".")
    };
    Ok((name, resume.unwrap_or(pos)))
}

fn render_rdata(msg: &[u8], record_type: u16, start: usize, rdata: &[u8]) -> Result<String, ExtractionError> {
    match record_type {
        TYPE_A if rdata.len() == 4 => {
            Ok(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]).to_string())
        }
        TYPE_AAAA if rdata.len() == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(rdata);
            Ok(Ipv6Addr::from(octets).to_string())
        }
        TYPE_A | TYPE_AAAA => Err(malformed("bad address length")),
        TYPE_NS | TYPE_CNAME | TYPE_PTR => read_name(msg, start).map(|(name, _)| name),
        TYPE_TXT => {
            let mut parts = Vec::new();
            let mut pos = 0;
            while pos < rdata.len() {
                let len = rdata[pos] as usize;
                let text = rdata
                    .get(pos + 1..pos + 1 + len)
                    .ok_or_else(|| malformed("txt runs past end"))?;
                parts.push(String::from_utf8_lossy(text).into_owned());
                pos += 1 + len;
            }
            Ok(parts.join(""))
        }
        _ => Ok(rdata.iter().map(|b| format!("{:02x}", b)).collect()),
    }
}

/// Parses a DNS message carried over UDP or TCP (without the TCP length
/// prefix).
pub fn parse(msg: &[u8]) -> Result<DnsMessage, ExtractionError> {
    if msg.len() < HEADER_LEN {
        return Err(malformed("short header"));
    }
    let id = NetworkEndian::read_u16(&msg[0..2]);
    let flags = NetworkEndian::read_u16(&msg[2..4]);
    let questions = NetworkEndian::read_u16(&msg[4..6]);
    let answer_count = NetworkEndian::read_u16(&msg[6..8]);

    let mut pos = HEADER_LEN;
    for _ in 0..questions {
        let (_, next) = read_name(msg, pos)?;
        pos = next + 4;
        if pos > msg.len() {
            return Err(malformed("question runs past end"));
        }
    }

    let mut answers = Vec::with_capacity(answer_count as usize);
    for _ in 0..answer_count {
        let (name, next) = read_name(msg, pos)?;
        let record_type = read_u16(msg, next)?;
        let rdlength = read_u16(msg, next + 8)? as usize;
        let start = next + 10;
        let rdata = msg
            .get(start..start + rdlength)
            .ok_or_else(|| malformed("rdata runs past end"))?;
        answers.push(DnsAnswer {
            name,
            record_type,
            rdata: render_rdata(msg, record_type, start, rdata)?,
        });
        pos = start + rdlength;
    }

    Ok(DnsMessage {
        id,
        is_response: flags & 0x8000 != 0,
        answers,
    })
}

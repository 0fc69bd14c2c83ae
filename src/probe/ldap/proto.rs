//! Minimal LDAPv3 BER codec: anonymous bind, one search, unbind.
//!
//! Only the message shapes the directory probe exchanges are supported. All
//! functions here are pure over bytes except [`read_frame`], which only pulls
//! one complete TLV off a reader.

use std::io::{self, Read};

const TAG_BOOLEAN: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_ENUMERATED: u8 = 0x0a;
const TAG_SEQUENCE: u8 = 0x30;

const OP_BIND_REQUEST: u8 = 0x60;
const OP_BIND_RESPONSE: u8 = 0x61;
const OP_UNBIND_REQUEST: u8 = 0x42;
const OP_SEARCH_REQUEST: u8 = 0x63;
const OP_SEARCH_ENTRY: u8 = 0x64;
const OP_SEARCH_DONE: u8 = 0x65;
const OP_SEARCH_REFERENCE: u8 = 0x73;

const AUTH_SIMPLE: u8 = 0x80;
const FILTER_EQUALITY: u8 = 0xa3;
const FILTER_PRESENT: u8 = 0x87;

/// Search scope singleLevel, the only scope the probe uses
const SCOPE_ONE_LEVEL: u8 = 1;

/// resultCode success
pub const RESULT_SUCCESS: u32 = 0;
/// resultCode sizeLimitExceeded, entries up to the limit were still returned
pub const RESULT_SIZE_LIMIT_EXCEEDED: u32 = 4;

/// Largest message accepted from a server.
const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Search filter, limited to a single presence or equality assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Present(String),
    Equality(String, String),
}

impl Filter {
    /// Parses `(attr=*)` or `(attr=value)`.
    pub fn parse(text: &str) -> Result<Filter, String> {
        let inner = text
            .trim()
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .ok_or_else(|| format!("filter '{}' must be enclosed in parentheses", text))?;
        let (attr, value) = inner
            .split_once('=')
            .ok_or_else(|| format!("filter '{}' has no '='", text))?;
        let valid_attr = !attr.is_empty()
            && attr
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        let special = value.contains(['(', ')', '*', '\\']) && value != "*";
        if !valid_attr || value.is_empty() || special {
            return Err(format!(
                "unsupported filter '{}', expected (attr=*) or (attr=value)",
                text
            ));
        }
        Ok(if value == "*" {
            Filter::Present(attr.to_string())
        } else {
            Filter::Equality(attr.to_string(), value.to_string())
        })
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Filter::Present(attr) => tlv(FILTER_PRESENT, attr.as_bytes()),
            Filter::Equality(attr, value) => tlv(
                FILTER_EQUALITY,
                &[octet_string(attr), octet_string(value)].concat(),
            ),
        }
    }
}

/// Parameters of the single one-level search the probe sends.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub base_dn: &'a str,
    pub filter: &'a Filter,
    pub attributes: &'a [String],
    pub size_limit: i64,
    pub time_limit: i64,
}

/// `resultCode`, `diagnosticMessage` of an LDAPResult.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapResult {
    pub code: u32,
    pub diagnostic: String,
}

impl LdapResult {
    pub fn is_success(&self) -> bool {
        self.code == RESULT_SUCCESS
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOp {
    BindResponse(LdapResult),
    SearchEntry { dn: String },
    SearchReference,
    SearchDone(LdapResult),
    Other(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapMessage {
    pub id: i64,
    pub op: ProtocolOp,
}

/// Anonymous simple bind, LDAP version 3.
pub fn bind_request(id: i64) -> Vec<u8> {
    let bind = [integer(3), octet_string(""), tlv(AUTH_SIMPLE, b"")].concat();
    message(id, &tlv(OP_BIND_REQUEST, &bind))
}

pub fn search_request(id: i64, request: &SearchRequest<'_>) -> Vec<u8> {
    let attributes: Vec<u8> = request
        .attributes
        .iter()
        .flat_map(|a| octet_string(a))
        .collect();
    let search = [
        octet_string(request.base_dn),
        tlv(TAG_ENUMERATED, &[SCOPE_ONE_LEVEL]),
        // derefAliases: neverDerefAliases
        tlv(TAG_ENUMERATED, &[0]),
        integer(request.size_limit),
        integer(request.time_limit),
        tlv(TAG_BOOLEAN, &[0]),
        request.filter.encode(),
        tlv(TAG_SEQUENCE, &attributes),
    ]
    .concat();
    message(id, &tlv(OP_SEARCH_REQUEST, &search))
}

pub fn unbind_request(id: i64) -> Vec<u8> {
    message(id, &tlv(OP_UNBIND_REQUEST, b""))
}

fn message(id: i64, op: &[u8]) -> Vec<u8> {
    tlv(TAG_SEQUENCE, &[integer(id), op.to_vec()].concat())
}

fn octet_string(value: &str) -> Vec<u8> {
    tlv(TAG_OCTET_STRING, value.as_bytes())
}

fn integer(value: i64) -> Vec<u8> {
    let mut bytes = value.to_be_bytes().to_vec();
    // minimal two's complement form
    while bytes.len() > 1
        && ((bytes[0] == 0x00 && bytes[1] & 0x80 == 0)
            || (bytes[0] == 0xff && bytes[1] & 0x80 != 0))
    {
        bytes.remove(0);
    }
    tlv(TAG_INTEGER, &bytes)
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes: Vec<u8> = len
        .to_be_bytes()
        .iter()
        .copied()
        .skip_while(|b| *b == 0)
        .collect();
    let mut out = vec![0x80 | bytes.len() as u8];
    out.extend(bytes);
    out
}

/// Reads exactly one BER element (tag, length and content) from `reader`.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head)?;
    let mut frame = head.to_vec();

    let len = if head[1] & 0x80 == 0 {
        head[1] as usize
    } else {
        let count = (head[1] & 0x7f) as usize;
        if count == 0 || count > 4 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unsupported BER length encoding",
            ));
        }
        let mut len_bytes = vec![0u8; count];
        reader.read_exact(&mut len_bytes)?;
        frame.extend_from_slice(&len_bytes);
        len_bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize)
    };
    if len > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("LDAP message of {} bytes exceeds limit", len),
        ));
    }

    let start = frame.len();
    frame.resize(start + len, 0);
    reader.read_exact(&mut frame[start..])?;
    Ok(frame)
}

/// Decodes one LDAPMessage.
pub fn decode_message(bytes: &[u8]) -> Result<LdapMessage, String> {
    let mut outer = Der::new(bytes);
    let body = outer.expect(TAG_SEQUENCE)?;
    let mut body = Der::new(body);
    let id = decode_integer(body.expect(TAG_INTEGER)?)?;
    let (tag, content) = body.next_tlv()?;

    let op = match tag {
        OP_BIND_RESPONSE => ProtocolOp::BindResponse(decode_result(content)?),
        OP_SEARCH_DONE => ProtocolOp::SearchDone(decode_result(content)?),
        OP_SEARCH_ENTRY => {
            let dn = Der::new(content).expect(TAG_OCTET_STRING)?;
            ProtocolOp::SearchEntry {
                dn: String::from_utf8_lossy(dn).into_owned(),
            }
        }
        OP_SEARCH_REFERENCE => ProtocolOp::SearchReference,
        other => ProtocolOp::Other(other),
    };
    Ok(LdapMessage { id, op })
}

fn decode_result(content: &[u8]) -> Result<LdapResult, String> {
    let mut der = Der::new(content);
    let code = decode_integer(der.expect(TAG_ENUMERATED)?)?;
    let _matched_dn = der.expect(TAG_OCTET_STRING)?;
    let diagnostic = der.expect(TAG_OCTET_STRING)?;
    Ok(LdapResult {
        code: u32::try_from(code).map_err(|_| format!("invalid resultCode {}", code))?,
        diagnostic: String::from_utf8_lossy(diagnostic).into_owned(),
    })
}

fn decode_integer(bytes: &[u8]) -> Result<i64, String> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(format!("integer of {} bytes", bytes.len()));
    }
    let negative = bytes[0] & 0x80 != 0;
    let init: i64 = if negative { -1 } else { 0 };
    Ok(bytes.iter().fold(init, |acc, b| (acc << 8) | *b as i64))
}

/// Cursor over a run of BER elements.
struct Der<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Der<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Der { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| "truncated message".to_string())?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn next_tlv(&mut self) -> Result<(u8, &'a [u8]), String> {
        let tag = self.take(1)?[0];
        let first = self.take(1)?[0];
        let len = if first & 0x80 == 0 {
            first as usize
        } else {
            let count = (first & 0x7f) as usize;
            if count == 0 || count > 4 {
                return Err("unsupported BER length encoding".to_string());
            }
            self.take(count)?
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | *b as usize)
        };
        Ok((tag, self.take(len)?))
    }

    fn expect(&mut self, tag: u8) -> Result<&'a [u8], String> {
        let (found, content) = self.next_tlv()?;
        if found != tag {
            return Err(format!("expected tag 0x{:02x}, found 0x{:02x}", tag, found));
        }
        Ok(content)
    }
}

//! Framing shared by the info and admin protocols.
//!
//! Every message starts with an 8-byte big-endian header packing the protocol
//! version, the message type and a 48-bit body length.

use super::{ConnectionError, RawMetrics};

/// Protocol version written in every header.
pub(crate) const PROTO_VERSION: u8 = 2;

/// Info request/response message type.
pub(crate) const INFO_MESSAGE: u8 = 1;

/// Admin (security) message type.
pub(crate) const ADMIN_MESSAGE: u8 = 2;

/// Size of the protocol header.
pub(crate) const HEADER_SIZE: usize = 8;

/// Largest body accepted from the node (128 MiB).
pub const MAX_BODY_SIZE: u64 = 128 * 1024 * 1024;

const ADMIN_HEADER_SIZE: usize = 16;
const LOGIN_COMMAND: u8 = 20;
const FIELD_USER: u8 = 0;
const FIELD_CREDENTIAL: u8 = 3;
const FIELD_CLEAR_PASSWORD: u8 = 4;

/// Login result code for success.
pub const LOGIN_SUCCESS: u8 = 0;

/// Login result code returned by nodes running without security; treated as success.
pub const SECURITY_NOT_ENABLED: u8 = 52;

/// Decoded protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub version: u8,
    pub kind: u8,
    pub length: u64,
}

impl Header {
    pub fn new(kind: u8, length: usize) -> Self {
        Self {
            version: PROTO_VERSION,
            kind,
            length: length as u64,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let packed = (u64::from(self.version) << 56)
            | (u64::from(self.kind) << 48)
            | (self.length & 0xFFFF_FFFF_FFFF);
        packed.to_be_bytes()
    }

    pub fn decode(bytes: [u8; HEADER_SIZE]) -> Self {
        let packed = u64::from_be_bytes(bytes);
        Self {
            version: (packed >> 56) as u8,
            kind: (packed >> 48) as u8,
            length: packed & 0xFFFF_FFFF_FFFF,
        }
    }

    /// Check the header announces a sane body of the expected type.
    pub fn validate(&self, expected_kind: u8) -> Result<usize, ConnectionError> {
        if self.version != PROTO_VERSION {
            return Err(ConnectionError::Framing(format!(
                "unsupported protocol version {}",
                self.version
            )));
        }
        if self.kind != expected_kind {
            return Err(ConnectionError::Framing(format!(
                "expected message type {expected_kind}, got {}",
                self.kind
            )));
        }
        if self.length > MAX_BODY_SIZE {
            return Err(ConnectionError::Framing(format!(
                "body of {} bytes exceeds limit of {MAX_BODY_SIZE}",
                self.length
            )));
        }
        Ok(self.length as usize)
    }
}

/// Encode a batched info request: header followed by one key per line.
pub(crate) fn encode_info_request(keys: &[String]) -> Vec<u8> {
    let body_len: usize = keys.iter().map(|k| k.len() + 1).sum();
    let mut buf = Vec::with_capacity(HEADER_SIZE + body_len);
    buf.extend_from_slice(&Header::new(INFO_MESSAGE, body_len).encode());
    for key in keys {
        buf.extend_from_slice(key.as_bytes());
        buf.push(b'\n');
    }
    buf
}

/// Decode an info response body made of `name\tvalue` lines.
pub(crate) fn decode_info_response(body: &[u8]) -> RawMetrics {
    let text = String::from_utf8_lossy(body);
    text.split('\n')
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('\t') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect()
}

/// Encode a login command.
///
/// `clear_password` is only sent for externally managed users.
pub(crate) fn encode_login(user: &str, credential: &str, clear_password: Option<&str>) -> Vec<u8> {
    let mut fields: Vec<(u8, &[u8])> = vec![
        (FIELD_USER, user.as_bytes()),
        (FIELD_CREDENTIAL, credential.as_bytes()),
    ];
    if let Some(password) = clear_password {
        fields.push((FIELD_CLEAR_PASSWORD, password.as_bytes()));
    }

    let body_len = ADMIN_HEADER_SIZE + fields.iter().map(|(_, d)| 5 + d.len()).sum::<usize>();
    let mut buf = Vec::with_capacity(HEADER_SIZE + body_len);
    buf.extend_from_slice(&Header::new(ADMIN_MESSAGE, body_len).encode());

    let mut admin_header = [0u8; ADMIN_HEADER_SIZE];
    admin_header[2] = LOGIN_COMMAND;
    admin_header[3] = fields.len() as u8;
    buf.extend_from_slice(&admin_header);

    for (id, data) in fields {
        buf.extend_from_slice(&((data.len() + 1) as u32).to_be_bytes());
        buf.push(id);
        buf.extend_from_slice(data);
    }
    buf
}

/// Extract the result code from an admin response body.
pub(crate) fn admin_result(body: &[u8]) -> Result<u8, ConnectionError> {
    if body.len() < ADMIN_HEADER_SIZE {
        return Err(ConnectionError::Framing(format!(
            "admin response of {} bytes is shorter than its header",
            body.len()
        )));
    }
    Ok(body[1])
}

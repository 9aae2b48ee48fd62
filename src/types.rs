use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a single cluster member.
///
/// The text form is unpadded lowercase hex, which is also the form used in
/// URL path segments and the `X-Raft-To` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

/// Stable identifier distinguishing cooperating clusters.
///
/// Shares the hex text form with [`PeerId`]; carried in the
/// `X-Etcd-Cluster-ID` header on every request and response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterId(pub u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("empty id")]
    Empty,
    #[error("id `{0}` is not unpadded lowercase hex")]
    InvalidDigits(String),
    #[error("id `{0}` exceeds 64 bits")]
    TooLong(String),
}

fn parse_hex_id(s: &str) -> Result<u64, IdParseError> {
    if s.is_empty() {
        return Err(IdParseError::Empty);
    }
    if s.len() > 16 {
        return Err(IdParseError::TooLong(s.to_string()));
    }
    if !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err(IdParseError::InvalidDigits(s.to_string()));
    }
    u64::from_str_radix(s, 16).map_err(|_| IdParseError::InvalidDigits(s.to_string()))
}

impl PeerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl ClusterId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_id(s).map(PeerId)
    }
}

impl FromStr for ClusterId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_id(s).map(ClusterId)
    }
}

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Protocol revision advertised by a cluster member.
///
/// Only major and minor participate in compatibility decisions; a patch
/// component is accepted on parse and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.0", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unparsable = || VersionError::Unparsable(s.to_string());
        let mut parts = s.split('.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(unparsable)?
            .parse()
            .map_err(|_| unparsable())?;
        let minor = parts
            .next()
            .ok_or_else(unparsable)?
            .parse()
            .map_err(|_| unparsable())?;
        match parts.next() {
            None => {}
            Some(patch) => {
                patch.parse::<u16>().map_err(|_| unparsable())?;
                if parts.next().is_some() {
                    return Err(unparsable());
                }
            }
        }
        Ok(Self { major, minor })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("unparsable version `{0}`")]
    Unparsable(String),
    #[error("sender version {sender} is older than the minimum supported {min_supported}")]
    SenderTooOld {
        sender: ProtocolVersion,
        min_supported: ProtocolVersion,
    },
    #[error("local version {running} cannot satisfy the sender's minimum cluster version {required}")]
    ReceiverTooOld {
        running: ProtocolVersion,
        required: ProtocolVersion,
    },
}

/// The receiver's own revision and the oldest revision it still accepts.
#[derive(Debug, Clone, Copy)]
pub struct VersionWindow {
    pub running: ProtocolVersion,
    pub min_supported: ProtocolVersion,
}

impl VersionWindow {
    /// Decides whether a sender with the given advertised versions may talk
    /// to this member. Pure: same inputs, same verdict, no side effects.
    ///
    /// An absent sender version is taken to be the oldest revision still in
    /// the support window, so members predating the header are admitted. An
    /// absent minimum cluster version is taken as no constraint. A header
    /// that is present but unparsable fails the check.
    pub fn check(
        &self,
        sender_version: Option<&str>,
        sender_min_cluster: Option<&str>,
    ) -> Result<(), VersionError> {
        let sender = match sender_version {
            Some(raw) => raw.parse::<ProtocolVersion>()?,
            None => self.min_supported,
        };
        if sender < self.min_supported {
            return Err(VersionError::SenderTooOld {
                sender,
                min_supported: self.min_supported,
            });
        }
        if let Some(raw) = sender_min_cluster {
            let required = raw.parse::<ProtocolVersion>()?;
            if self.running < required {
                return Err(VersionError::ReceiverTooOld {
                    running: self.running,
                    required,
                });
            }
        }
        Ok(())
    }
}

//! Cache server endpoints.
//!
//! An [`Endpoint`] is the identity of a cache server. Its display form is the
//! string the ring hashes to place the server, so it has to match what every
//! other Ketama client produces for the same server: `host:port`, with IPv6
//! literals wrapped in brackets.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Immutable (host, port) pair identifying a cache server.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::InvalidEndpoint(format!("unterminated bracket in {s:?}")))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| Error::InvalidEndpoint(format!("missing port in {s:?}")))?;
            (host, port)
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| Error::InvalidEndpoint(format!("missing port in {s:?}")))?
        };

        if host.is_empty() {
            return Err(Error::InvalidEndpoint(format!("missing host in {s:?}")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::InvalidEndpoint(format!("bad port in {s:?}: {e}")))?;

        Ok(Self::new(host, port))
    }
}

// src/address.rs

//! `host:port` validation used before a server address goes into the
//! worker's argument string.

use std::fmt;
use std::str::FromStr;

use crate::errors::RelayError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl FromStr for ServerAddress {
    type Err = RelayError;

    /// Exactly two colon-separated parts; the second an integer in 1..=65535.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [host, port] = parts.as_slice() else {
            return Err(RelayError::InvalidAddress(format!(
                "expected host:port, got '{s}'"
            )));
        };

        let port: i64 = port.parse().map_err(|_| {
            RelayError::InvalidAddress(format!("port '{port}' is not a number"))
        })?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| {
                RelayError::InvalidAddress(format!("port {port} is outside 1..=65535"))
            })?;

        Ok(ServerAddress {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

pub fn validate_server_address(address: &str) -> bool {
    match address.parse::<ServerAddress>() {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(address, error = %e, "rejected server address");
            false
        }
    }
}

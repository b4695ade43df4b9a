//! Listen address parsing.

use std::path::PathBuf;

use anyhow::{bail, Result};

/// Where the HTTP server accepts connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenTarget {
    /// `host:port`, bound with TCP.
    Tcp(String),
    /// A filesystem path, bound as a Unix domain socket.
    Unix(PathBuf),
}

impl ListenTarget {
    /// Parses a listen address.
    ///
    /// A leading `/` selects a Unix socket. A bare `:port` listens on every
    /// IPv4 interface.
    pub fn parse(listen: &str) -> Result<Self> {
        let listen = listen.trim();
        if listen.is_empty() {
            bail!("listen address must not be empty");
        }
        if listen.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(listen)));
        }
        if let Some(port) = listen.strip_prefix(':') {
            if port.parse::<u16>().is_err() {
                bail!("invalid port in listen address {:?}", listen);
            }
            return Ok(Self::Tcp(format!("0.0.0.0:{}", port)));
        }
        Ok(Self::Tcp(listen.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_binds_all_interfaces() {
        assert_eq!(
            ListenTarget::parse(":8080").unwrap(),
            ListenTarget::Tcp("0.0.0.0:8080".into())
        );
    }

    #[test]
    fn host_and_port_pass_through() {
        assert_eq!(
            ListenTarget::parse("127.0.0.1:9000").unwrap(),
            ListenTarget::Tcp("127.0.0.1:9000".into())
        );
    }

    #[test]
    fn absolute_path_is_a_unix_socket() {
        assert_eq!(
            ListenTarget::parse("/run/webmpc.sock").unwrap(),
            ListenTarget::Unix(PathBuf::from("/run/webmpc.sock"))
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(ListenTarget::parse("").is_err());
        assert!(ListenTarget::parse(":http").is_err());
    }
}

//! Connection types shared by the AT engine and the connection manager.

use std::fmt;
use std::str::FromStr;

/// Number of logical connections the modem multiplexes over one link.
pub const MAX_CONNECTIONS: usize = 5;

/// Transport protocol of a logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Stream connection.
    Tcp,
    /// Datagram connection.
    Udp,
}

impl ConnectionKind {
    /// The protocol name used in the connection-open command (`"TCP"` / `"UDP"`).
    pub fn as_at(&self) -> &'static str {
        match self {
            ConnectionKind::Tcp => "TCP",
            ConnectionKind::Udp => "UDP",
        }
    }

    /// The lowercase network name (`"tcp"` / `"udp"`).
    pub fn network(&self) -> &'static str {
        match self {
            ConnectionKind::Tcp => "tcp",
            ConnectionKind::Udp => "udp",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_at())
    }
}

/// Error returned when a string cannot be parsed into a [`ConnectionKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseKindError(String);

impl fmt::Display for ParseKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported network type: {}", self.0)
    }
}

impl std::error::Error for ParseKindError {}

impl FromStr for ConnectionKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(ConnectionKind::Tcp),
            "udp" => Ok(ConnectionKind::Udp),
            _ => Err(ParseKindError(s.to_string())),
        }
    }
}

/// Lifecycle state of a logical connection.
///
/// `Initial -> Connecting -> Connected -> Closing`, after which the slot is
/// freed. A failed connect frees the slot straight from `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Initial,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Initial => "INITIAL",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Closing => "CLOSING",
        };
        write!(f, "{s}")
    }
}

/// An opaque network endpoint: protocol plus address text.
///
/// The address is whatever the modem or caller supplied (`"10.1.2.3"` for
/// the local side, `"example.com:80"` for the remote side); it is not
/// resolved or validated further.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    kind: ConnectionKind,
    address: String,
}

impl Endpoint {
    /// Create an endpoint from its parts.
    pub fn new(kind: ConnectionKind, address: impl Into<String>) -> Self {
        Endpoint {
            kind,
            address: address.into(),
        }
    }

    /// The lowercase network name (`"tcp"` / `"udp"`).
    pub fn network(&self) -> &'static str {
        self.kind.network()
    }

    /// The protocol of this endpoint.
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    /// The address text.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_str_is_case_insensitive() {
        assert_eq!("tcp".parse::<ConnectionKind>(), Ok(ConnectionKind::Tcp));
        assert_eq!("UDP".parse::<ConnectionKind>(), Ok(ConnectionKind::Udp));
        assert!("sctp".parse::<ConnectionKind>().is_err());
    }

    #[test]
    fn kind_names() {
        assert_eq!(ConnectionKind::Tcp.as_at(), "TCP");
        assert_eq!(ConnectionKind::Udp.network(), "udp");
        assert_eq!(ConnectionKind::Udp.to_string(), "UDP");
    }

    #[test]
    fn parse_kind_error_display() {
        let err = "icmp".parse::<ConnectionKind>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported network type: icmp");
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Initial.to_string(), "INITIAL");
        assert_eq!(ConnectionState::Connecting.to_string(), "CONNECTING");
        assert_eq!(ConnectionState::Connected.to_string(), "CONNECTED");
        assert_eq!(ConnectionState::Closing.to_string(), "CLOSING");
        assert_eq!(ConnectionState::default(), ConnectionState::Initial);
    }

    #[test]
    fn endpoint_accessors() {
        let ep = Endpoint::new(ConnectionKind::Tcp, "93.184.216.34:80");
        assert_eq!(ep.network(), "tcp");
        assert_eq!(ep.address(), "93.184.216.34:80");
        assert_eq!(ep.to_string(), "93.184.216.34:80");
        assert_eq!(ep.kind(), ConnectionKind::Tcp);
    }
}

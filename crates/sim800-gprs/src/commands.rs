//! SIM800 GPRS command builders and response parsers.
//!
//! This module provides functions to construct the AT commands the
//! connection manager issues (attach, bearer setup, connection open/close,
//! data send) and to parse the replies that need more than an `OK`.
//!
//! All functions are pure -- they produce command text or consume response
//! lines without performing any I/O. Command text is returned without the
//! `AT` prefix and terminator; the dispatcher adds both.
//!
//! Replies that do not end in `OK` come with a matching [`AcceptRule`]:
//! connection open ([`OPEN_RULE`]), send completion ([`SEND_RULE`]),
//! connection close ([`CLOSE_RULE`]), bearer teardown ([`SHUT_RULE`]) and
//! address query ([`ADDRESS_RULE`]).

use sim800_at::{AcceptRule, Verdict};
use sim800_core::{ConnectionKind, Error, MAX_CONNECTIONS, Result};

/// Largest payload accepted by one `+CIPSEND`.
pub const CHUNK_LIMIT: usize = 1024;

/// Preamble of an incoming-data notification.
const RECEIVE_PREFIX: &str = "+RECEIVE,";

// ---------------------------------------------------------------
// Acceptance rules
// ---------------------------------------------------------------

/// `+CIPSTART`: `OK` first, then `<id>, CONNECT OK` once the peer answers.
pub const OPEN_RULE: AcceptRule = AcceptRule::Contains {
    success: &["CONNECT OK", "ALREADY CONNECT"],
    failure: &["CONNECT FAIL", "ERROR"],
};

/// Completion of a `+CIPSEND` payload.
pub const SEND_RULE: AcceptRule = AcceptRule::Contains {
    success: &["SEND OK"],
    failure: &["SEND FAIL", "ERROR"],
};

/// `+CIPCLOSE` answers `<id>, CLOSE OK`.
pub const CLOSE_RULE: AcceptRule = AcceptRule::Contains {
    success: &["CLOSE OK", "OK"],
    failure: &["ERROR"],
};

/// `+CIPSHUT` answers `SHUT OK`.
pub const SHUT_RULE: AcceptRule = AcceptRule::Contains {
    success: &["SHUT OK"],
    failure: &["ERROR"],
};

/// `+CIFSR` answers with a bare dotted address and no `OK`.
pub const ADDRESS_RULE: AcceptRule = AcceptRule::Custom(address_verdict);

fn address_verdict(line: &str) -> Verdict {
    if line.contains("ERROR") {
        Verdict::Failure
    } else if line.contains('.') {
        Verdict::Success
    } else {
        Verdict::Pending
    }
}

// ---------------------------------------------------------------
// Command builders
// ---------------------------------------------------------------

/// Query packet-domain attach status (`+CGATT?`).
pub fn cmd_query_attach() -> String {
    "+CGATT?".into()
}

/// Attach to the packet domain (`+CGATT=1`).
pub fn cmd_attach() -> String {
    "+CGATT=1".into()
}

/// Detach from the packet domain (`+CGATT=0`).
pub fn cmd_detach() -> String {
    "+CGATT=0".into()
}

/// Enable multi-connection mode (`+CIPMUX=1`).
pub fn cmd_enable_multiplex() -> String {
    "+CIPMUX=1".into()
}

/// Set the bearer's APN and, when both are non-empty, its credentials
/// (`+CSTT="apn"[,"user","pass"]`).
///
/// Parameters containing a double quote cannot be expressed in the
/// command and are rejected.
pub fn cmd_set_bearer(apn: &str, user: &str, password: &str) -> Result<String> {
    for (name, value) in [("apn", apn), ("user", user), ("password", password)] {
        if value.contains('"') {
            return Err(Error::InvalidParameter(format!(
                "{name} must not contain a double quote"
            )));
        }
    }
    if !user.is_empty() && !password.is_empty() {
        Ok(format!("+CSTT=\"{apn}\",\"{user}\",\"{password}\""))
    } else {
        Ok(format!("+CSTT=\"{apn}\""))
    }
}

/// Bring up the wireless bearer (`+CIICR`).
pub fn cmd_bring_up_bearer() -> String {
    "+CIICR".into()
}

/// Query the assigned local address (`+CIFSR`).
pub fn cmd_query_address() -> String {
    "+CIFSR".into()
}

/// Open connection `id` (`+CIPSTART=<id>,"TCP","host","port"`).
pub fn cmd_open_connection(id: u8, kind: ConnectionKind, host: &str, port: &str) -> String {
    format!("+CIPSTART={id},\"{}\",\"{host}\",\"{port}\"", kind.as_at())
}

/// Close connection `id` (`+CIPCLOSE=<id>`).
pub fn cmd_close_connection(id: u8) -> String {
    format!("+CIPCLOSE={id}")
}

/// Announce `len` payload bytes for connection `id` (`+CIPSEND=<id>,<len>`).
///
/// The modem answers with the `>` prompt.
pub fn cmd_prepare_send(id: u8, len: usize) -> String {
    format!("+CIPSEND={id},{len}")
}

/// Tear down the bearer and every connection on it (`+CIPSHUT`).
pub fn cmd_teardown_bearer() -> String {
    "+CIPSHUT".into()
}

// ---------------------------------------------------------------
// Response parsers
// ---------------------------------------------------------------

/// Parse the value of a `+CGATT: <n>` reply.
pub fn parse_attach_status(value: &str) -> Result<bool> {
    match value.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(Error::UnexpectedResponse(format!(
            "attach status {other:?}"
        ))),
    }
}

/// Parse the `+CIFSR` reply line into an address.
pub fn parse_address(line: &str) -> Result<String> {
    let address = line.trim();
    if address.is_empty() || !address.contains('.') {
        return Err(Error::UnexpectedResponse(line.to_string()));
    }
    Ok(address.to_string())
}

/// Recognize an incoming-data preamble `+RECEIVE,<id>,<length>:`.
///
/// Returns `Ok(None)` for any other line and an error for a preamble whose
/// fields do not parse.
pub fn parse_receive_preamble(line: &str) -> Result<Option<(u8, usize)>> {
    let Some(rest) = line.trim().strip_prefix(RECEIVE_PREFIX) else {
        return Ok(None);
    };
    let malformed = || Error::UnexpectedResponse(line.to_string());

    let fields = rest.strip_suffix(':').ok_or_else(malformed)?;
    let (id, length) = fields.split_once(',').ok_or_else(malformed)?;
    let id = id.trim().parse::<u8>().map_err(|_| malformed())?;
    let length = length.trim().parse::<usize>().map_err(|_| malformed())?;
    Ok(Some((id, length)))
}

/// Split `host:port`, accepting `[v6-literal]:port`.
///
/// Validation happens locally; nothing here touches the device.
pub fn split_address(address: &str) -> Result<(String, String)> {
    let invalid = |why: &str| Error::InvalidParameter(format!("invalid address {address:?}: {why}"));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(|| invalid("missing ']'"))?;
        let port = after.strip_prefix(':').ok_or_else(|| invalid("missing port"))?;
        (host, port)
    } else {
        let (host, port) = address.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        if host.contains(':') {
            return Err(invalid("too many colons"));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    if host.contains('"') {
        return Err(invalid("host contains a double quote"));
    }
    if port.parse::<u16>().is_err() {
        return Err(invalid("port is not a number in 0..=65535"));
    }
    Ok((host.to_string(), port.to_string()))
}

/// Check that `id` names one of the modem's connection slots.
pub fn check_id(id: u8) -> Result<usize> {
    let index = usize::from(id);
    if index < MAX_CONNECTIONS {
        Ok(index)
    } else {
        Err(Error::InvalidConnection(id))
    }
}

//! WMP line framing, message parsing, and command encoding.
//!
//! The WMP protocol is a sequence of ASCII lines over TCP, terminated by
//! CR (LF tolerated). Inbound lines have the form `TYPE[,unit]:PAYLOAD`
//! or bare `TYPE[,unit]`; the payload splits on `:` into segments and
//! (where applicable) on `,` into fields.
//!
//! ```text
//! Command:   SET,1:MODE,COOL\r
//! Change:    CHN,1:MODE,COOL\r\n
//! Limits:    LIMITS:SETPTEMP,[160,320]\r\n
//! Identity:  ID:WMP-1,CC3F1D018734,192.168.1.50,ASCII,v1.3.3,-45,living,N\r\n
//! ```
//!
//! Everything in this module is pure framing and parsing -- no I/O.

use bytes::BytesMut;

use wmplib_core::error::{Error, Result};
use wmplib_core::types::{GatewayInfo, UnitId};

/// Command/response line terminator sent to the gateway.
pub const TERMINATOR: u8 = b'\r';

/// Accumulates received bytes and yields complete protocol lines.
///
/// A line ends at the first CR or LF byte; a CRLF pair counts as a single
/// terminator, including when the CR and LF arrive in different
/// deliveries. Unterminated trailing bytes stay buffered for the next
/// delivery.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
    /// Set when the previous line ended with a CR that was the last byte
    /// seen; a LF arriving next belongs to that terminator.
    pending_lf: bool,
}

/// Buffer cap; WMP lines are tens of bytes, so hitting this means the
/// peer is not speaking the protocol.
const MAX_LINE_BUF: usize = 8192;

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_LINE_BUF {
            tracing::warn!(len = self.buf.len(), "line buffer overflow, resetting");
            self.buf.clear();
            self.pending_lf = false;
        }
    }

    /// Extract the next complete line, if one is buffered.
    ///
    /// Returns the line without its terminator. Empty lines (from CR CR,
    /// or keep-alive blank lines) are skipped.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            if self.pending_lf {
                if let Some(&first) = self.buf.first() {
                    if first == b'\n' {
                        let _ = self.buf.split_to(1);
                    }
                    self.pending_lf = false;
                } else {
                    return None;
                }
            }

            let end = self.buf.iter().position(|&b| b == b'\r' || b == b'\n')?;
            let line = self.buf.split_to(end);
            let terminator = self.buf.split_to(1)[0];

            if terminator == b'\r' {
                match self.buf.first() {
                    Some(&b'\n') => {
                        let _ = self.buf.split_to(1);
                    }
                    Some(_) => {}
                    // CR at the end of the delivery: the matching LF may
                    // arrive with the next one.
                    None => self.pending_lf = true,
                }
            }

            if line.is_empty() {
                continue;
            }
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
    }

    /// Number of buffered (unterminated) bytes.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// A parsed inbound WMP message.
///
/// Closed enum over the recognised message types; an unrecognised type
/// token lands in the single [`Message::Unknown`] branch so dispatch
/// handles it explicitly rather than through a missing table entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Gateway identity: `ID:<model,mac,ip,proto,fw,rssi,name,flags>`.
    Id(GatewayInfo),
    /// Gateway property report: `INFO:<name>,<value>`.
    Info {
        /// Property name.
        name: String,
        /// Property value, verbatim.
        value: String,
    },
    /// State-change notification: `CHN,<unit>:<function>,<value>`.
    Chn {
        /// Target unit; `None` on single-unit gateways.
        unit: Option<UnitId>,
        /// Function (capability) wire token.
        function: String,
        /// New value, verbatim.
        value: String,
    },
    /// Limits advertisement: `LIMITS[,unit]:<function>,[v1,v2,...]`.
    Limits {
        /// Target unit; `None` means gateway-scoped.
        unit: Option<UnitId>,
        /// Function (capability) wire token.
        function: String,
        /// Bracketed member list, split on commas.
        values: Vec<String>,
    },
    /// Positive acknowledgement of the last command.
    Ack,
    /// Negative acknowledgement of the last command.
    Err {
        /// Target unit, when the gateway includes one.
        unit: Option<UnitId>,
        /// Trailing detail, when present.
        detail: Option<String>,
    },
    /// Keep-alive response: `PONG:<rssi>`.
    Pong {
        /// Wi-Fi signal strength in dBm, when reported.
        rssi: Option<i32>,
    },
    /// Orderly session shutdown announced by the gateway.
    Close,
    /// An unrecognised line, kept verbatim for logging.
    Unknown {
        /// The whole line.
        line: String,
    },
}

/// Parse a single line received from the gateway.
///
/// The line must not include its terminator. Returns a protocol error for
/// structurally malformed lines (missing segments, unit that is not a
/// number); unrecognised message types parse successfully to
/// [`Message::Unknown`].
pub fn parse_message(line: &str) -> Result<Message> {
    let line = line.trim();
    if line.is_empty() {
        return Err(Error::Protocol("empty line".into()));
    }

    let (head, payload) = match line.split_once(':') {
        Some((head, payload)) => (head, Some(payload)),
        None => (line, None),
    };

    let (kind, unit) = match head.split_once(',') {
        Some((kind, unit_str)) => {
            let n: u8 = unit_str.trim().parse().map_err(|_| {
                Error::Protocol(format!("bad unit number in {line:?}"))
            })?;
            (kind.trim(), Some(UnitId::from_index(n)))
        }
        None => (head.trim(), None),
    };

    match kind.to_ascii_uppercase().as_str() {
        "ID" => {
            let payload = require_payload(payload, line)?;
            let info = GatewayInfo::parse(payload)
                .map_err(|_| Error::Protocol(format!("bad ID payload in {line:?}")))?;
            Ok(Message::Id(info))
        }
        "INFO" => {
            let payload = require_payload(payload, line)?;
            let (name, value) = payload
                .split_once(',')
                .ok_or_else(|| Error::Protocol(format!("bad INFO payload in {line:?}")))?;
            Ok(Message::Info {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            })
        }
        "CHN" => {
            let payload = require_payload(payload, line)?;
            let (function, value) = payload
                .split_once(',')
                .ok_or_else(|| Error::Protocol(format!("bad CHN payload in {line:?}")))?;
            Ok(Message::Chn {
                unit,
                function: function.trim().to_string(),
                value: value.trim().to_string(),
            })
        }
        "LIMITS" => {
            let payload = require_payload(payload, line)?;
            let (function, list) = payload
                .split_once(',')
                .ok_or_else(|| Error::Protocol(format!("bad LIMITS payload in {line:?}")))?;
            let list = list.trim();
            let inner = list
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| Error::Protocol(format!("bad LIMITS list in {line:?}")))?;
            let values = if inner.is_empty() {
                Vec::new()
            } else {
                inner.split(',').map(|v| v.trim().to_string()).collect()
            };
            Ok(Message::Limits {
                unit,
                function: function.trim().to_string(),
                values,
            })
        }
        "ACK" => Ok(Message::Ack),
        "ERR" => Ok(Message::Err {
            unit,
            detail: payload.map(|p| p.trim().to_string()),
        }),
        "PONG" => Ok(Message::Pong {
            rssi: payload.and_then(|p| p.trim().parse().ok()),
        }),
        "CLOSE" => Ok(Message::Close),
        _ => Ok(Message::Unknown {
            line: line.to_string(),
        }),
    }
}

fn require_payload<'a>(payload: Option<&'a str>, line: &str) -> Result<&'a str> {
    payload.ok_or_else(|| Error::Protocol(format!("missing payload in {line:?}")))
}

// ---------------------------------------------------------------------------
// Command builders
//
// Each builder returns the command string WITHOUT the terminator; the
// driver appends CR when writing (see [`encode_command`]).
// ---------------------------------------------------------------------------

/// Frame a command string for transmission.
pub fn encode_command(command: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command.len() + 1);
    bytes.extend_from_slice(command.as_bytes());
    bytes.push(TERMINATOR);
    bytes
}

/// Identity query.
///
/// Example output: `"ID"`
pub fn cmd_id() -> String {
    "ID".to_string()
}

/// Gateway property query.
///
/// Example output: `"INFO"`
pub fn cmd_info() -> String {
    "INFO".to_string()
}

/// Limits query for one function or all functions.
///
/// Example output: `"LIMITS:SETPTEMP"` or `"LIMITS:*"`
pub fn cmd_limits(function: Option<&str>) -> String {
    format!("LIMITS:{}", function.unwrap_or("*"))
}

/// Status query for one function or the unit's full status.
///
/// Example output: `"GET,1:*"` or `"GET,2:SETPTEMP"`
pub fn cmd_get(unit: UnitId, function: Option<&str>) -> String {
    format!("GET,{}:{}", unit.index(), function.unwrap_or("*"))
}

/// Set one function on one unit.
///
/// Example output: `"SET,1:MODE,COOL"`
pub fn cmd_set(unit: UnitId, function: &str, value: &str) -> String {
    format!("SET,{}:{},{}", unit.index(), function, value)
}

/// Keep-alive.
///
/// Example output: `"PING"`
pub fn cmd_ping() -> String {
    "PING".to_string()
}

/// Rename the gateway.
///
/// Example output: `"CFG:DEVICENAME,living-room"`
pub fn cmd_cfg_devicename(name: &str) -> String {
    format!("CFG:DEVICENAME,{name}")
}

/// Set the gateway's wall clock.
///
/// Example output: `"CFG:DATETIME,07/08/2026 14:05:00"`
pub fn cmd_cfg_datetime(formatted: &str) -> String {
    format!("CFG:DATETIME,{formatted}")
}

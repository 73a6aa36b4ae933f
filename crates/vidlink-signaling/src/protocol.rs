//! Control-channel messages: one space-delimited ASCII line per send.

use std::fmt;
use std::str::FromStr;

use vidlink_core::CallError;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// `CALLING <nick> <video_port>`
    Calling { nick: String, port: u16 },
    /// `CALL_ACCEPTED <nick> <video_port>`
    CallAccepted { nick: String, port: u16 },
    /// `CALL_DENIED <nick>`
    CallDenied { nick: String },
    CallBusy,
    CallHold { nick: String },
    CallResume { nick: String },
    CallEnd,
    /// `LOSS_REPORT <lost_packets> <unix_time>`
    LossReport { count: u64, timestamp: f64 },
}

impl ControlMessage {
    pub fn parse(line: &str) -> Result<Self, CallError> {
        line.parse()
    }
}

impl FromStr for ControlMessage {
    type Err = CallError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || CallError::Malformed { response: line.to_owned() };
        let words: Vec<&str> = line.split_whitespace().collect();

        let msg = match words.as_slice() {
            ["CALLING", nick, port, ..] => {
                Self::Calling { nick: (*nick).to_owned(), port: port.parse().map_err(|_| malformed())? }
            }
            ["CALL_ACCEPTED", nick, port, ..] => {
                Self::CallAccepted { nick: (*nick).to_owned(), port: port.parse().map_err(|_| malformed())? }
            }
            ["CALL_DENIED", rest @ ..] => {
                Self::CallDenied { nick: rest.first().map(|n| (*n).to_owned()).unwrap_or_default() }
            }
            ["CALL_BUSY", ..] => Self::CallBusy,
            ["CALL_HOLD", nick, ..] => Self::CallHold { nick: (*nick).to_owned() },
            ["CALL_RESUME", nick, ..] => Self::CallResume { nick: (*nick).to_owned() },
            ["CALL_END", ..] => Self::CallEnd,
            ["LOSS_REPORT", count, ts, ..] => Self::LossReport {
                count: count.parse().map_err(|_| malformed())?,
                timestamp: ts.parse().map_err(|_| malformed())?,
            },
            _ => return Err(malformed()),
        };
        Ok(msg)
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calling { nick, port } => write!(f, "CALLING {nick} {port}"),
            Self::CallAccepted { nick, port } => write!(f, "CALL_ACCEPTED {nick} {port}"),
            Self::CallDenied { nick } => write!(f, "CALL_DENIED {nick}"),
            Self::CallBusy => f.write_str("CALL_BUSY"),
            Self::CallHold { nick } => write!(f, "CALL_HOLD {nick}"),
            Self::CallResume { nick } => write!(f, "CALL_RESUME {nick}"),
            Self::CallEnd => f.write_str("CALL_END"),
            Self::LossReport { count, timestamp } => write!(f, "LOSS_REPORT {count} {timestamp}"),
        }
    }
}

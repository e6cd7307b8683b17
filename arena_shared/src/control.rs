//! Control-channel messages (TCP, newline-delimited text).
//!
//! Each line is `TYPE key=value key=value`. The control channel only carries
//! session setup and teardown; all gameplay traffic goes over UDP
//! (see [`crate::protocol`]).

use std::{collections::HashMap, fmt, str::FromStr};

use thiserror::Error;

/// Longest accepted username, in characters.
pub const MAX_USERNAME_CHARS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ServerFull,
    InvalidUsername,
    AlreadyConnected,
}

impl RejectReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            RejectReason::ServerFull => "server_full",
            RejectReason::InvalidUsername => "invalid_username",
            RejectReason::AlreadyConnected => "already_connected",
        }
    }
}

impl FromStr for RejectReason {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server_full" => Ok(RejectReason::ServerFull),
            "invalid_username" => Ok(RejectReason::InvalidUsername),
            "already_connected" => Ok(RejectReason::AlreadyConnected),
            other => Err(ControlError::InvalidField {
                field: "reason",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("empty control line")]
    Empty,
    #[error("unknown control message `{0}`")]
    UnknownType(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value `{value}` for field `{field}`")]
    InvalidField { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    // ─── Client -> server ───
    Connect { username: String, version: String },
    Disconnect,

    // ─── Server -> client ───
    ConnectOk {
        player_id: u8,
        session_token: u32,
        udp_port: u16,
    },
    ConnectError { reason: RejectReason },
    DisconnectOk,
    PlayerJoin { player_id: u8, username: String },
    PlayerLeave { player_id: u8 },
}

impl ControlMessage {
    /// Parses one line (without the trailing newline).
    pub fn parse(line: &str) -> Result<Self, ControlError> {
        let mut tokens = line.split_whitespace();
        let kind = tokens.next().ok_or(ControlError::Empty)?;
        let params: HashMap<&str, &str> = tokens.filter_map(|t| t.split_once('=')).collect();
        let field = |name: &'static str| {
            params
                .get(name)
                .copied()
                .ok_or(ControlError::MissingField(name))
        };
        let parse_num = |name: &'static str, radix: u32| -> Result<u32, ControlError> {
            let raw = field(name)?;
            u32::from_str_radix(raw, radix).map_err(|_| ControlError::InvalidField {
                field: name,
                value: raw.to_string(),
            })
        };
        let narrow = |name: &'static str, v: u32| -> Result<u8, ControlError> {
            u8::try_from(v).map_err(|_| ControlError::InvalidField {
                field: name,
                value: v.to_string(),
            })
        };

        let msg = match kind {
            "CONNECT" => ControlMessage::Connect {
                username: field("username")?.to_string(),
                version: params.get("version").copied().unwrap_or("1").to_string(),
            },
            "DISCONNECT" => ControlMessage::Disconnect,
            "CONNECT_OK" => ControlMessage::ConnectOk {
                player_id: narrow("id", parse_num("id", 10)?)?,
                session_token: parse_num("token", 16)?,
                udp_port: u16::try_from(parse_num("udp_port", 10)?).map_err(|_| {
                    ControlError::InvalidField {
                        field: "udp_port",
                        value: field("udp_port").unwrap_or_default().to_string(),
                    }
                })?,
            },
            "CONNECT_ERROR" => ControlMessage::ConnectError {
                reason: field("reason")?.parse()?,
            },
            "DISCONNECT_OK" => ControlMessage::DisconnectOk,
            "PLAYER_JOIN" => ControlMessage::PlayerJoin {
                player_id: narrow("id", parse_num("id", 10)?)?,
                username: field("username")?.to_string(),
            },
            "PLAYER_LEAVE" => ControlMessage::PlayerLeave {
                player_id: narrow("id", parse_num("id", 10)?)?,
            },
            other => return Err(ControlError::UnknownType(other.to_string())),
        };
        Ok(msg)
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::Connect { username, version } => {
                write!(f, "CONNECT username={username} version={version}")
            }
            ControlMessage::Disconnect => f.write_str("DISCONNECT"),
            ControlMessage::ConnectOk {
                player_id,
                session_token,
                udp_port,
            } => write!(
                f,
                "CONNECT_OK id={player_id} token={session_token:x} udp_port={udp_port}"
            ),
            ControlMessage::ConnectError { reason } => write!(f, "CONNECT_ERROR reason={reason}"),
            ControlMessage::DisconnectOk => f.write_str("DISCONNECT_OK"),
            ControlMessage::PlayerJoin {
                player_id,
                username,
            } => write!(f, "PLAYER_JOIN id={player_id} username={username}"),
            ControlMessage::PlayerLeave { player_id } => write!(f, "PLAYER_LEAVE id={player_id}"),
        }
    }
}

/// Usernames are 1..=16 characters with no whitespace or `=`, so they survive
/// the `key=value` line format.
pub fn is_valid_username(name: &str) -> bool {
    let chars = name.chars().count();
    (1..=MAX_USERNAME_CHARS).contains(&chars)
        && !name.chars().any(|c| c.is_whitespace() || c == '=' || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_ok_token_is_hex() {
        let msg = ControlMessage::ConnectOk {
            player_id: 2,
            session_token: 0xdead_beef,
            udp_port: 4243,
        };
        let line = msg.to_string();
        assert_eq!(line, "CONNECT_OK id=2 token=deadbeef udp_port=4243");
        assert_eq!(ControlMessage::parse(&line).unwrap(), msg);
    }

    #[test]
    fn parse_tolerates_param_order_and_defaults_version() {
        let msg = ControlMessage::parse("CONNECT username=ace").unwrap();
        assert_eq!(
            msg,
            ControlMessage::Connect {
                username: "ace".into(),
                version: "1".into()
            }
        );
        let msg = ControlMessage::parse("PLAYER_JOIN username=bo id=3").unwrap();
        assert_eq!(
            msg,
            ControlMessage::PlayerJoin {
                player_id: 3,
                username: "bo".into()
            }
        );
    }

    #[test]
    fn parse_errors() {
        assert_eq!(ControlMessage::parse("   "), Err(ControlError::Empty));
        assert_eq!(
            ControlMessage::parse("HELLO"),
            Err(ControlError::UnknownType("HELLO".into()))
        );
        assert_eq!(
            ControlMessage::parse("CONNECT version=1"),
            Err(ControlError::MissingField("username"))
        );
        assert!(matches!(
            ControlMessage::parse("PLAYER_LEAVE id=999"),
            Err(ControlError::InvalidField { field: "id", .. })
        ));
        assert!(matches!(
            ControlMessage::parse("CONNECT_ERROR reason=bored"),
            Err(ControlError::InvalidField { field: "reason", .. })
        ));
    }

    #[test]
    fn username_rules() {
        assert!(is_valid_username("pilot_1"));
        assert!(is_valid_username("sixteen_chars_ok"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("seventeen_chars_x"));
        assert!(!is_valid_username("two words"));
        assert!(!is_valid_username("a=b"));
    }
}

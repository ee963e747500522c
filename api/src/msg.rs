use derive_more::Display;
use std::str::FromStr;
use thiserror::Error;

use crate::NodeId;

/// Upper bound on the size of a single message on the wire
///
/// Anything longer is not a valid message and receivers will stop reading.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Kind of a protocol message
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum MessageKind {
    /// Sender is starting an election, sent to every higher identity
    #[display(fmt = "ELECTION")]
    Election,
    /// Reply to `Election`: a higher process is alive and takes over
    #[display(fmt = "OK")]
    Ok,
    /// Sender announces itself as the leader
    #[display(fmt = "LEADER")]
    Leader,
    /// Leader liveness probe; the connection succeeding is the answer
    #[display(fmt = "PING")]
    Ping,
}

impl FromStr for MessageKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ELECTION" => MessageKind::Election,
            "OK" => MessageKind::Ok,
            "LEADER" => MessageKind::Leader,
            "PING" => MessageKind::Ping,
            other => return Err(ParseError::UnknownKind(other.to_owned())),
        })
    }
}

/// A single message, as carried by one connection
///
/// On the wire: `<sender>:<KIND>`, e.g. `3:LEADER`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
#[display(fmt = "{}:{}", sender, kind)]
pub struct Message {
    pub sender: NodeId,
    pub kind: MessageKind,
}

impl Message {
    pub fn new(sender: NodeId, kind: MessageKind) -> Self {
        Self { sender, kind }
    }

    /// Decode a raw connection payload
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        if MAX_MESSAGE_SIZE < bytes.len() {
            return Err(ParseError::TooLong(bytes.len()));
        }
        std::str::from_utf8(bytes)
            .map_err(|_| ParseError::NotUtf8)?
            .parse()
    }
}

impl FromStr for Message {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let (sender, kind) = s.split_once(':').ok_or(ParseError::MissingSeparator)?;
        let sender = sender
            .parse::<u8>()
            .map_err(|_| ParseError::InvalidSender(sender.to_owned()))?;

        Ok(Self {
            sender: NodeId(sender),
            kind: kind.parse()?,
        })
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("message too long: {0}B")]
    TooLong(usize),
    #[error("message is not valid utf8")]
    NotUtf8,
    #[error("missing `:` separator")]
    MissingSeparator,
    #[error("invalid sender id: {0:?}")]
    InvalidSender(String),
    #[error("unknown message kind: {0:?}")]
    UnknownKind(String),
}

#[test]
fn message_wire_format() {
    for kind in [
        MessageKind::Election,
        MessageKind::Ok,
        MessageKind::Leader,
        MessageKind::Ping,
    ] {
        let msg = Message::new(NodeId(4), kind);
        assert_eq!(msg.to_string().parse::<Message>(), Ok(msg));
    }
    assert_eq!(
        Message::new(NodeId(2), MessageKind::Election).to_string(),
        "2:ELECTION"
    );
    assert_eq!(
        Message::decode(b"5:LEADER\n"),
        Ok(Message::new(NodeId(5), MessageKind::Leader))
    );
}

#[test]
fn message_decode_rejects_garbage() {
    assert_eq!(Message::decode(b""), Err(ParseError::Empty));
    assert_eq!(Message::decode(b"  \r\n"), Err(ParseError::Empty));
    assert_eq!(
        Message::decode(b"hello"),
        Err(ParseError::MissingSeparator)
    );
    assert_eq!(
        Message::decode(b"x:OK"),
        Err(ParseError::InvalidSender("x".into()))
    );
    assert_eq!(
        Message::decode(b"-1:OK"),
        Err(ParseError::InvalidSender("-1".into()))
    );
    assert_eq!(
        Message::decode(b"1:ok"),
        Err(ParseError::UnknownKind("ok".into()))
    );
    assert_eq!(
        Message::decode(b"1:OK:OK"),
        Err(ParseError::UnknownKind("OK:OK".into()))
    );
    assert_eq!(Message::decode(&[0xff, b':']), Err(ParseError::NotUtf8));
    assert_eq!(
        Message::decode(&[b'1'; MAX_MESSAGE_SIZE + 1]),
        Err(ParseError::TooLong(MAX_MESSAGE_SIZE + 1))
    );
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The identity of one election participant.
///
/// Tokens are random, unique with overwhelming probability, and stable for
/// the lifetime of their participant. Besides marking the origin of a
/// message, the derived total order is the tie-break between simultaneous
/// candidates: of any two applicants, exactly one token orders greater, and
/// that one stays in the race.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Token(Uuid);

impl Token {
    /// Generates a fresh random token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The three message kinds of the election protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A candidate announces it is attempting to become leader.
    Apply,
    /// A leader asserts the seat is taken, in reply to an `Apply` or once
    /// when first promoted.
    Tell,
    /// A leader voluntarily steps down.
    Depart,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Apply => write!(f, "apply"),
            MessageKind::Tell => write!(f, "tell"),
            MessageKind::Depart => write!(f, "depart"),
        }
    }
}

/// A message broadcast among the participants of one channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The message kind.
    pub kind: MessageKind,
    /// The sender's token.
    pub token: Token,
    /// The sender's local send time. Diagnostics only: coarse clocks can
    /// tie, so ordering decisions always fall to the token.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(kind: MessageKind, token: Token) -> Self {
        Self {
            kind,
            token,
            timestamp: Utc::now(),
        }
    }

    /// Creates an `Apply` stamped with the current time.
    pub fn apply(token: Token) -> Self {
        Self::new(MessageKind::Apply, token)
    }

    /// Creates a `Tell` stamped with the current time.
    pub fn tell(token: Token) -> Self {
        Self::new(MessageKind::Tell, token)
    }

    /// Creates a `Depart` stamped with the current time.
    pub fn depart(token: Token) -> Self {
        Self::new(MessageKind::Depart, token)
    }
}

use tokio::sync::mpsc;

use crate::message::{Message, Token};

/// How many undelivered messages a subscription buffers before the bus
/// starts dropping new ones for it.
pub const MAILBOX_CAPACITY: usize = 128;

/// A live subscription to one election channel.
///
/// Dropping the subscription closes its mailbox; engines notice the
/// closed mailbox and release their side of the registration.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    token: Token,
    rx: mpsc::Receiver<Message>,
}

impl Subscription {
    /// Wraps a mailbox receiver for `token` on `channel`.
    pub fn new(channel: impl Into<String>, token: Token, rx: mpsc::Receiver<Message>) -> Self {
        Self {
            channel: channel.into(),
            token,
            rx,
        }
    }

    /// The channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The subscriber's token.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Receives the next broadcast message, or `None` once the
    /// subscription has been cancelled.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

use crate::{
    engine::Engine,
    error::Result,
    message::{Message, Token},
    subscription::Subscription,
};

/// The front door of a broadcast bus, generic over its transport engine.
///
/// A bus is cheap to clone; clones share the underlying engine, so every
/// participant of a process can hold its own handle.
#[derive(Debug, Clone)]
pub struct Bus<E: Engine>(pub(crate) E);

impl<E: Engine> Bus<E> {
    /// Broadcasts `message` to every other subscriber of `channel`.
    pub async fn publish(&self, channel: &str, message: Message) -> Result<()> {
        tracing::debug!(channel, kind = %message.kind, token = %message.token, "publish");

        self.0.publish(channel, message).await
    }

    /// Opens a mailbox for `token` on `channel`, replacing any earlier
    /// subscription with the same token.
    pub async fn subscribe(&self, channel: &str, token: Token) -> Result<Subscription> {
        self.0.subscribe(channel, token).await
    }

    /// Tears down `token`'s subscription on `channel`, if any.
    pub async fn unsubscribe(&self, channel: &str, token: Token) -> Result<()> {
        self.0.unsubscribe(channel, token).await
    }
}

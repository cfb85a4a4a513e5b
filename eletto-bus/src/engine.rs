#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "memory")]
pub use memory::*;

#[cfg(feature = "pg")]
mod pg;
#[cfg(feature = "pg")]
pub use pg::*;

use async_trait::async_trait;

use crate::{
    error::Result,
    message::{Message, Token},
    subscription::Subscription,
};

/// A broadcast transport for election messages.
///
/// Engines are fan-out only: `publish` hands a copy of the message to every
/// current subscriber of the channel except the sender itself, with no
/// acknowledgement and no replay for late subscribers. Messages from one
/// sender arrive in publish order; messages from different senders may
/// interleave arbitrarily.
#[async_trait]
pub trait Engine: Clone + Send + Sync + 'static {
    /// Broadcasts `message` to every other subscriber of `channel`.
    async fn publish(&self, channel: &str, message: Message) -> Result<()>;

    /// Opens a mailbox for `token` on `channel`, replacing any earlier
    /// subscription with the same token.
    async fn subscribe(&self, channel: &str, token: Token) -> Result<Subscription>;

    /// Tears down `token`'s subscription on `channel`, if any.
    async fn unsubscribe(&self, channel: &str, token: Token) -> Result<()>;
}

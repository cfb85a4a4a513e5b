use async_trait::async_trait;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;

use crate::{
    bus::Bus,
    engine::Engine,
    error::Result,
    message::{Message, Token},
    subscription::{Subscription, MAILBOX_CAPACITY},
};

pub type MemoryBus = Bus<Memory>;

/// One subscriber of a channel: its token plus the sending half of its
/// mailbox.
#[derive(Debug)]
struct Peer {
    token: Token,
    tx: mpsc::Sender<Message>,
}

/// An in-process broadcast engine backed by per-subscriber mailboxes.
///
/// Every clone shares the same channel table, so electors of one process
/// reach each other by cloning a single `Memory` value.
#[derive(Debug, Clone, Default)]
pub struct Memory(Arc<RwLock<HashMap<String, Vec<Peer>>>>);

impl MemoryBus {
    pub fn new() -> Self {
        Bus(Memory::default())
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for Memory {
    async fn publish(&self, channel: &str, message: Message) -> Result<()> {
        let mut data = self.0.write();
        let Some(peers) = data.get_mut(channel) else {
            return Ok(());
        };

        peers.retain(|peer| !peer.tx.is_closed());

        for peer in peers.iter() {
            if peer.token == message.token {
                continue;
            }

            if peer.tx.try_send(message.clone()).is_err() {
                tracing::warn!(
                    channel,
                    token = %peer.token,
                    "mailbox full, dropping {} message",
                    message.kind
                );
            }
        }

        Ok(())
    }

    async fn subscribe(&self, channel: &str, token: Token) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let mut data = self.0.write();
        let peers = data.entry(channel.to_owned()).or_default();

        peers.retain(|peer| peer.token != token);
        peers.push(Peer { token, tx });

        Ok(Subscription::new(channel, token, rx))
    }

    async fn unsubscribe(&self, channel: &str, token: Token) -> Result<()> {
        let mut data = self.0.write();

        let empty = data
            .get_mut(channel)
            .map(|peers| {
                peers.retain(|peer| peer.token != token);
                peers.is_empty()
            })
            .unwrap_or(false);

        if empty {
            data.remove(channel);
        }

        Ok(())
    }
}

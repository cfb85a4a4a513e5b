use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::{postgres::PgListener, PgPool};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::{
    bus::Bus,
    engine::Engine,
    error::Result,
    message::{Message, Token},
    subscription::{Subscription, MAILBOX_CAPACITY},
};

pub type PgBus = Bus<Pg>;

impl PgBus {
    pub fn new(pool: &PgPool) -> Self {
        Bus(Pg::new(pool))
    }
}

/// A broadcast engine built on Postgres `LISTEN` / `NOTIFY`.
///
/// Each subscription runs its own listening connection and relays decoded
/// notifications into the subscriber's mailbox. `NOTIFY` echoes payloads
/// back to the emitting process as well, so the relay filters out messages
/// carrying the subscriber's own token.
#[derive(Debug, Clone)]
pub struct Pg {
    pool: PgPool,
    relays: Arc<RwLock<HashMap<(String, Token), Relay>>>,
}

/// Registry entry for one running relay task. Dropping the entry drops
/// the shutdown sender, which stops the relay.
#[derive(Debug)]
struct Relay {
    id: Uuid,
    _shutdown: oneshot::Sender<()>,
}

impl Pg {
    pub fn new(pool: &PgPool) -> Self {
        Self {
            pool: pool.clone(),
            relays: Arc::default(),
        }
    }

    /// How many listen relays this engine currently runs.
    pub fn active_relays(&self) -> usize {
        self.relays.read().len()
    }
}

#[async_trait]
impl Engine for Pg {
    async fn publish(&self, channel: &str, message: Message) -> Result<()> {
        let payload = serde_json::to_string(&message)?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn subscribe(&self, channel: &str, token: Token) -> Result<Subscription> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(channel).await?;

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let id = Uuid::new_v4();

        // Replacing the previous entry drops its sender, which stops the
        // previous relay for this token.
        self.relays.write().insert(
            (channel.to_owned(), token),
            Relay {
                id,
                _shutdown: shutdown_tx,
            },
        );

        let name = channel.to_owned();
        let relays = Arc::clone(&self.relays);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = &mut shutdown_rx => break,
                    // A dropped subscription must release the listening
                    // connection without waiting for further traffic.
                    _ = tx.closed() => break,
                    notification = listener.recv() => {
                        let notification = match notification {
                            Ok(notification) => notification,
                            Err(e) => {
                                tracing::error!(channel = %name, "listen connection lost: {e}");
                                break;
                            }
                        };

                        let message =
                            match serde_json::from_str::<Message>(notification.payload()) {
                                Ok(message) => message,
                                Err(e) => {
                                    tracing::warn!(
                                        channel = %name,
                                        "skipping undecodable payload: {e}"
                                    );
                                    continue;
                                }
                            };

                        if message.token == token {
                            continue;
                        }

                        match tx.try_send(message) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                            Err(mpsc::error::TrySendError::Full(message)) => {
                                tracing::warn!(
                                    channel = %name,
                                    token = %token,
                                    "mailbox full, dropping {} message",
                                    message.kind
                                );
                            }
                        }
                    }
                }
            }

            // A relay that stops on its own (dropped subscription, lost
            // connection) releases its registry entry. A newer relay
            // already registered under the same key is left alone.
            let mut relays = relays.write();
            if relays
                .get(&(name.clone(), token))
                .is_some_and(|relay| relay.id == id)
            {
                relays.remove(&(name, token));
            }
        });

        Ok(Subscription::new(channel, token, rx))
    }

    async fn unsubscribe(&self, channel: &str, token: Token) -> Result<()> {
        self.relays.write().remove(&(channel.to_owned(), token));

        Ok(())
    }
}

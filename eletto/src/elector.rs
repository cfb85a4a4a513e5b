use std::{
    future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use eletto_bus::{Bus, Engine, Message, MessageKind, Subscription, Token};
use parking_lot::RwLock;
use tokio::{
    sync::{mpsc, oneshot, Notify},
    task::JoinHandle,
    time::{sleep, timeout_at, Instant},
};

use crate::{
    config::ElectorConfig,
    error::{ElectorError, Result},
};

#[cfg(feature = "memory")]
pub type MemoryElector = Elector<eletto_bus::Memory>;

#[cfg(feature = "pg")]
pub type PgElector = Elector<eletto_bus::Pg>;

#[cfg(feature = "pg")]
impl PgElector {
    /// Joins `channel` over Postgres `LISTEN` / `NOTIFY`.
    pub async fn connect(
        pool: &sqlx::PgPool,
        channel: impl Into<String>,
        config: ElectorConfig,
    ) -> Result<Self> {
        Self::new(eletto_bus::PgBus::new(pool), channel, config).await
    }
}

/// Where one participant stands in the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Not leading and not trying to.
    #[default]
    Idle,
    /// Inside an open candidacy window.
    Candidate,
    /// Holding the leadership of the channel.
    Leader,
}

/// One participant in the leader election of a channel.
///
/// Every instance of a logical service creates its own elector with a
/// fresh random [`Token`]; at most one of them holds the leadership of the
/// shared channel at a time. Clones share the participant, so a clone can
/// be parked in [`Elector::wait_for_leadership`] while another handle
/// serves queries.
#[derive(Clone)]
pub struct Elector<E: Engine> {
    inner: Arc<Inner<E>>,
}

struct Inner<E: Engine> {
    bus: Bus<E>,
    channel: String,
    token: Token,
    config: ElectorConfig,
    role: RwLock<Role>,
    applying: AtomicBool,
    closed: AtomicBool,
    attempt: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    flush: Option<mpsc::UnboundedSender<oneshot::Sender<()>>>,
    vacancy: Notify,
    listener: RwLock<Option<JoinHandle<()>>>,
}

impl<E: Engine> Elector<E> {
    /// Joins `channel` on `bus` as a fresh participant.
    ///
    /// The elector starts idle; call [`Elector::apply_once`] or
    /// [`Elector::wait_for_leadership`] to contend for the seat. In
    /// single-instance mode the bus is never touched and the elector
    /// holds the seat from the moment it exists.
    pub async fn new(
        bus: Bus<E>,
        channel: impl Into<String>,
        config: ElectorConfig,
    ) -> Result<Self> {
        let channel = channel.into();
        let token = Token::new();

        let (subscription, flush, flushes) = if config.single_instance {
            (None, None, None)
        } else {
            let subscription = bus.subscribe(&channel, token).await?;
            let (flush_tx, flush_rx) = mpsc::unbounded_channel();

            (Some(subscription), Some(flush_tx), Some(flush_rx))
        };

        let role = if config.single_instance {
            Role::Leader
        } else {
            Role::Idle
        };

        let inner = Arc::new(Inner {
            bus,
            channel,
            token,
            config,
            role: RwLock::new(role),
            applying: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            attempt: RwLock::new(None),
            flush,
            vacancy: Notify::new(),
            listener: RwLock::new(None),
        });

        if let (Some(subscription), Some(flushes)) = (subscription, flushes) {
            let handle = tokio::spawn(listen(subscription, flushes, Arc::downgrade(&inner)));
            *inner.listener.write() = Some(handle);
        }

        Ok(Self { inner })
    }

    /// This participant's token.
    pub fn token(&self) -> Token {
        self.inner.token
    }

    /// The channel this participant contends on.
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// Where this participant currently stands.
    pub fn role(&self) -> Role {
        *self.inner.role.read()
    }

    /// Whether this participant currently leads its channel.
    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    /// Whether [`Elector::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Runs a single candidacy and reports whether it ended in
    /// leadership.
    ///
    /// The candidacy announces itself, then listens for one configured
    /// window. A `tell` from a sitting leader or an `apply` from a
    /// greater token ends it with `Ok(false)`; a fully silent window
    /// means the seat is vacant, and the candidate takes it, announcing
    /// the claim before `Ok(true)` is returned.
    ///
    /// Only one candidacy may run per participant; a second concurrent
    /// call fails with [`ElectorError::AttemptInFlight`] rather than
    /// being treated as deferred.
    pub async fn apply_once(&self) -> Result<bool> {
        let inner = &self.inner;

        if inner.closed.load(Ordering::SeqCst) {
            return Err(ElectorError::Closed);
        }

        if *inner.role.read() == Role::Leader {
            return Ok(true);
        }

        if inner.config.single_instance {
            inner.promote()?;
            return Ok(true);
        }

        if inner
            .applying
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ElectorError::AttemptInFlight);
        }

        // Reverts the candidacy state on every exit, including the
        // caller dropping this future mid-window.
        let _guard = AttemptGuard { inner };

        inner.campaign().await
    }

    /// Resolves once this elector holds the leadership of its channel.
    ///
    /// Candidacies are retried every configured `retry_interval`, and a
    /// departure broadcast wakes the waiter early so a freshly vacant
    /// seat is contested immediately. On a closed elector the future
    /// stays pending forever; it neither resolves nor fails.
    pub async fn wait_for_leadership(&self) {
        let inner = &self.inner;

        loop {
            if inner.closed.load(Ordering::SeqCst) {
                future::pending::<()>().await;
            }

            if inner.config.single_instance {
                if inner.promote().is_ok() {
                    return;
                }
                continue;
            }

            // Arm before applying, otherwise a departure landing during
            // the candidacy would be missed.
            let vacancy = inner.vacancy.notified();

            match self.apply_once().await {
                Ok(true) => return,
                Ok(false) | Err(ElectorError::AttemptInFlight) => {}
                Err(ElectorError::Closed) => continue,
                Err(e) => {
                    tracing::error!(
                        channel = %inner.channel,
                        token = %inner.token,
                        "candidacy failed: {e}"
                    );
                }
            }

            tokio::select! {
                _ = sleep(inner.config.retry_interval) => {}
                _ = vacancy => {}
            }
        }
    }

    /// Installs this elector as leader immediately, without consulting
    /// or notifying anyone on the bus.
    ///
    /// Meant for callers that already know the seat is theirs, e.g. when
    /// restoring a previously elected instance.
    pub fn become_leader(&self) -> Result<()> {
        self.inner.promote()?;

        tracing::info!(
            channel = %self.inner.channel,
            token = %self.inner.token,
            "leadership assumed"
        );

        Ok(())
    }

    /// Gives the leadership up and broadcasts the departure, so waiting
    /// peers contest the seat right away. Does nothing when not leading.
    pub async fn step_down(&self) -> Result<()> {
        let inner = &self.inner;

        if inner.closed.load(Ordering::SeqCst) {
            return Err(ElectorError::Closed);
        }

        {
            let mut role = inner.role.write();
            if *role != Role::Leader {
                return Ok(());
            }
            *role = Role::Idle;
        }

        if !inner.config.single_instance {
            inner
                .bus
                .publish(&inner.channel, Message::depart(inner.token))
                .await?;
        }

        tracing::info!(channel = %inner.channel, token = %inner.token, "stepped down");

        Ok(())
    }

    /// Shuts the elector down: any leadership is dropped locally, an
    /// in-flight candidacy is cancelled and the bus subscription is torn
    /// down. Nothing is broadcast, and pending
    /// [`Elector::wait_for_leadership`] calls never resolve. Closing a
    /// closed elector is a no-op.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;

        if inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        *inner.role.write() = Role::Idle;
        *inner.attempt.write() = None;

        if !inner.config.single_instance {
            inner.bus.unsubscribe(&inner.channel, inner.token).await?;
        }

        tracing::debug!(channel = %inner.channel, token = %inner.token, "closed");

        Ok(())
    }
}

impl<E: Engine> Inner<E> {
    // The closed check has to happen under the role lock, otherwise a
    // promotion racing `close` could leave a closed elector leading.
    fn promote(&self) -> Result<()> {
        let mut role = self.role.write();

        if self.closed.load(Ordering::SeqCst) {
            return Err(ElectorError::Closed);
        }

        *role = Role::Leader;

        Ok(())
    }

    async fn campaign(&self) -> Result<bool> {
        self.drain_backlog().await?;

        let (tx, mut rx) = mpsc::unbounded_channel();

        *self.attempt.write() = Some(tx);
        *self.role.write() = Role::Candidate;

        self.run_window(&mut rx).await
    }

    // A candidacy may only react to traffic that arrives once its
    // window is open. Waiting for the listener to work through
    // everything already queued keeps an old leader's parting tell
    // from ending a window it predates.
    async fn drain_backlog(&self) -> Result<()> {
        let Some(flush) = &self.flush else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();

        if flush.send(ack_tx).is_err() || ack_rx.await.is_err() {
            return Err(ElectorError::Closed);
        }

        Ok(())
    }

    async fn run_window(&self, rx: &mut mpsc::UnboundedReceiver<Message>) -> Result<bool> {
        self.bus
            .publish(&self.channel, Message::apply(self.token))
            .await?;

        let opened = Instant::now();
        let midpoint = opened + self.config.apply_window / 2;
        let deadline = opened + self.config.apply_window;

        let mut reannounced = false;

        loop {
            let wake = if reannounced { deadline } else { midpoint };

            let message = match timeout_at(wake, rx.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => return Err(ElectorError::Closed),
                Err(_) if reannounced => break,
                Err(_) => {
                    // Announce a second time halfway through the window,
                    // for peers that subscribed after the first apply.
                    self.bus
                        .publish(&self.channel, Message::apply(self.token))
                        .await?;

                    reannounced = true;
                    continue;
                }
            };

            match message.kind {
                MessageKind::Tell => {
                    tracing::debug!(
                        channel = %self.channel,
                        token = %self.token,
                        leader = %message.token,
                        "deferring to the sitting leader"
                    );
                    return Ok(false);
                }
                MessageKind::Apply if message.token > self.token => {
                    tracing::debug!(
                        channel = %self.channel,
                        token = %self.token,
                        rival = %message.token,
                        "deferring to a greater applicant"
                    );
                    return Ok(false);
                }
                MessageKind::Apply | MessageKind::Depart => {}
            }
        }

        // A fully silent window: the seat is vacant. Claim it out loud
        // so late applicants defer without waiting out their windows.
        self.bus
            .publish(&self.channel, Message::tell(self.token))
            .await?;

        self.promote()?;

        tracing::info!(channel = %self.channel, token = %self.token, "leadership acquired");

        Ok(true)
    }

    async fn deliver(&self, message: Message) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        tracing::trace!(
            channel = %self.channel,
            kind = %message.kind,
            from = %message.token,
            "recv"
        );

        // An open candidacy sees every message in arrival order.
        if let Some(attempt) = self.attempt.read().as_ref() {
            let _ = attempt.send(message.clone());
        }

        let role = *self.role.read();

        match message.kind {
            MessageKind::Apply => {
                // A sitting leader answers every applicant directly.
                if role == Role::Leader {
                    if let Err(e) = self
                        .bus
                        .publish(&self.channel, Message::tell(self.token))
                        .await
                    {
                        tracing::error!(
                            channel = %self.channel,
                            "failed to answer an applicant: {e}"
                        );
                    }
                }
            }
            MessageKind::Tell => {
                if role == Role::Leader {
                    tracing::warn!(
                        channel = %self.channel,
                        token = %self.token,
                        from = %message.token,
                        "another leader claims this channel"
                    );
                }
            }
            MessageKind::Depart => {
                self.vacancy.notify_one();
            }
        }
    }
}

// Rolls an attempt's state back when its future ends, however it ends,
// so an abandoned `apply_once` cannot leave the elector stuck applying.
struct AttemptGuard<'a, E: Engine> {
    inner: &'a Inner<E>,
}

impl<E: Engine> Drop for AttemptGuard<'_, E> {
    fn drop(&mut self) {
        *self.inner.attempt.write() = None;

        {
            let mut role = self.inner.role.write();
            if *role == Role::Candidate {
                *role = Role::Idle;
            }
        }

        // Released last: a rival attempt must not start against
        // half-reverted state.
        self.inner.applying.store(false, Ordering::SeqCst);
    }
}

impl<E: Engine> Drop for Inner<E> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

// Queued messages drain ahead of flush acknowledgements, so an
// acknowledged flush means every message delivered before it was
// handled.
async fn listen<E: Engine>(
    mut subscription: Subscription,
    mut flushes: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
    inner: Weak<Inner<E>>,
) {
    loop {
        tokio::select! {
            biased;

            message = subscription.recv() => {
                let Some(message) = message else { break };
                let Some(inner) = inner.upgrade() else { break };

                inner.deliver(message).await;
            }
            flush = flushes.recv() => {
                let Some(ack) = flush else { break };
                let _ = ack.send(());
            }
        }
    }
}

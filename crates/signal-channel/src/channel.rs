use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use url::Url;

use crate::connector::{Connector, Link};
use crate::error::{ChannelError, ChannelResult};
use crate::message::SignalingMessage;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    /// The last connection failed or dropped; `connect` may be called again.
    Lost,
    /// Terminal. Nothing is sent or delivered after this.
    Closed,
}

/// Proof that the channel is open. `connection` increments on every
/// successful (re)connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub connection: u64,
}

pub type MessageStream = BoxStream<'static, SignalingMessage>;

/// Ordered, reliable message bus to the remote party.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Opens the channel. Returns at once when already open and joins the
    /// in-flight attempt when one is running.
    async fn connect(&self, url: &Url) -> ChannelResult<Ready>;

    /// Queues `message` behind every earlier send and waits until it has been
    /// written to an open connection.
    async fn send(&self, message: SignalingMessage) -> ChannelResult<()>;

    /// Inbound messages of the current connection. Available once per
    /// connection; the stream ends when the connection does.
    fn receive(&self) -> ChannelResult<MessageStream>;

    async fn close(&self);

    fn state(&self) -> watch::Receiver<ChannelState>;
}

type ConnectAttempt = Shared<BoxFuture<'static, ChannelResult<Ready>>>;

struct Outbound {
    message: SignalingMessage,
    ack: oneshot::Sender<ChannelResult<()>>,
}

struct ChannelCore {
    connector: Box<dyn Connector>,
    state: watch::Sender<ChannelState>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: AsyncMutex<mpsc::UnboundedReceiver<Outbound>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<SignalingMessage>>>,
    inflight: Mutex<Option<ConnectAttempt>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
}

impl ChannelCore {
    fn current(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Moves to `next` unless the channel is already closed.
    fn transition(&self, next: ChannelState) -> bool {
        self.state.send_if_modified(|current| {
            if *current == ChannelState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    fn fail_pending(&self, err: ChannelError) {
        // a running driver owns the queue and fails it on its own exit
        if let Ok(mut outbound) = self.outbound_rx.try_lock() {
            fail_queued(&mut outbound, &err);
        }
    }

    async fn establish(core: Arc<ChannelCore>, url: Url) -> ChannelResult<Ready> {
        core.transition(ChannelState::Connecting);
        tracing::info!(target = "signal", url = %url, "connecting signaling channel");

        let outcome = match core.connector.open(&url).await {
            Ok(link) => core.attach(link),
            Err(err) => {
                tracing::warn!(target = "signal", url = %url, error = %err, "signaling connect failed");
                core.transition(ChannelState::Lost);
                core.fail_pending(err.clone());
                Err(err)
            }
        };
        core.inflight.lock().take();
        outcome
    }

    fn attach(self: &Arc<Self>, link: Link) -> ChannelResult<Ready> {
        if self.current() == ChannelState::Closed {
            return Err(ChannelError::Closed);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(inbound_rx);
        if !self.transition(ChannelState::Open) {
            self.inbound.lock().take();
            return Err(ChannelError::Closed);
        }

        let driver = tokio::spawn(ChannelCore::drive(
            Arc::clone(self),
            link,
            inbound_tx,
            generation,
        ));
        if let Some(previous) = self.driver.lock().replace(driver) {
            previous.abort();
        }
        tracing::debug!(target = "signal", connection = generation, "signaling channel open");
        Ok(Ready {
            connection: generation,
        })
    }

    async fn drive(
        core: Arc<ChannelCore>,
        link: Link,
        inbound_tx: mpsc::UnboundedSender<SignalingMessage>,
        generation: u64,
    ) {
        let Link {
            mut sink,
            mut stream,
        } = link;
        let mut state_rx = core.state.subscribe();
        let mut outbound = core.outbound_rx.lock().await;

        loop {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() || *state_rx.borrow() == ChannelState::Closed {
                        let _ = sink.close().await;
                        break;
                    }
                }
                next = outbound.recv() => {
                    let Some(Outbound { message, ack }) = next else {
                        break;
                    };
                    let kind = message.kind();
                    if ack.is_closed() {
                        // caller gave up waiting; it may resend on a later connection
                        tracing::debug!(target = "signal", kind, "skipping abandoned send");
                        continue;
                    }
                    let result = match message.encode() {
                        Ok(text) => sink.send(text).await,
                        Err(err) => Err(err),
                    };
                    let broken = matches!(result, Err(ChannelError::Send(_)));
                    tracing::trace!(target = "signal", event = "ws_out", kind, ok = result.is_ok());
                    let _ = ack.send(result);
                    if broken {
                        break;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(text)) => match SignalingMessage::decode(&text) {
                        Ok(message) => {
                            tracing::trace!(target = "signal", event = "ws_in", kind = message.kind(), len = text.len());
                            let _ = inbound_tx.send(message);
                        }
                        Err(err) => {
                            tracing::warn!(target = "signal", error = %err, "dropping signaling frame");
                        }
                    },
                    Some(Err(err)) => {
                        tracing::warn!(target = "signal", error = %err, "signaling link failed");
                        break;
                    }
                    None => {
                        tracing::debug!(target = "signal", connection = generation, "signaling link ended");
                        break;
                    }
                },
            }
        }

        // Fail what was queued for this connection while still holding the
        // queue and before leaving Open, so no later connection can have
        // attached and started taking sends of its own.
        let latest = core.generation.load(Ordering::SeqCst) == generation;
        if core.current() == ChannelState::Closed {
            fail_queued(&mut outbound, &ChannelError::Closed);
        } else if latest {
            fail_queued(
                &mut outbound,
                &ChannelError::Send("connection lost before delivery".into()),
            );
        }
        drop(outbound);
        drop(inbound_tx);
        if latest {
            core.transition(ChannelState::Lost);
        }
    }
}

fn fail_queued(outbound: &mut mpsc::UnboundedReceiver<Outbound>, err: &ChannelError) {
    while let Ok(pending) = outbound.try_recv() {
        tracing::debug!(
            target = "signal",
            kind = pending.message.kind(),
            "failing queued signaling message"
        );
        let _ = pending.ack.send(Err(err.clone()));
    }
}

/// [`SignalingChannel`] over any [`Connector`]: explicit connection state,
/// queued sends while connecting, one inbound stream per connection.
pub struct RelayChannel {
    core: Arc<ChannelCore>,
}

impl RelayChannel {
    pub fn new(connector: impl Connector) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::Idle);
        Self {
            core: Arc::new(ChannelCore {
                connector: Box::new(connector),
                state,
                outbound_tx,
                outbound_rx: AsyncMutex::new(outbound_rx),
                inbound: Mutex::new(None),
                inflight: Mutex::new(None),
                driver: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }
}

#[async_trait]
impl SignalingChannel for RelayChannel {
    async fn connect(&self, url: &Url) -> ChannelResult<Ready> {
        let attempt = {
            let mut inflight = self.core.inflight.lock();
            match self.core.current() {
                ChannelState::Open => {
                    return Ok(Ready {
                        connection: self.core.generation.load(Ordering::SeqCst),
                    })
                }
                ChannelState::Closed => return Err(ChannelError::Closed),
                _ => {}
            }
            match inflight.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    let attempt = ChannelCore::establish(Arc::clone(&self.core), url.clone())
                        .boxed()
                        .shared();
                    *inflight = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    async fn send(&self, message: SignalingMessage) -> ChannelResult<()> {
        if self.core.current() == ChannelState::Closed {
            return Err(ChannelError::Closed);
        }
        let (ack, delivered) = oneshot::channel();
        self.core
            .outbound_tx
            .send(Outbound { message, ack })
            .map_err(|_| ChannelError::Closed)?;
        delivered.await.unwrap_or(Err(ChannelError::Closed))
    }

    fn receive(&self) -> ChannelResult<MessageStream> {
        if self.core.current() == ChannelState::Closed {
            return Err(ChannelError::Closed);
        }
        let rx = self
            .core
            .inbound
            .lock()
            .take()
            .ok_or(ChannelError::Unavailable)?;
        let state = self.core.state.subscribe();
        let stream = futures::stream::unfold((rx, state), |(mut rx, state)| async move {
            let message = rx.recv().await?;
            if *state.borrow() == ChannelState::Closed {
                return None;
            }
            Some((message, (rx, state)))
        });
        Ok(stream.boxed())
    }

    async fn close(&self) {
        let changed = self.core.state.send_if_modified(|current| {
            if *current == ChannelState::Closed {
                return false;
            }
            *current = ChannelState::Closed;
            true
        });
        if !changed {
            return;
        }
        tracing::info!(target = "signal", "signaling channel closed");
        self.core.inbound.lock().take();
        let driver = self.core.driver.lock().take();
        if let Some(driver) = driver {
            let abort = driver.abort_handle();
            if tokio::time::timeout(CLOSE_GRACE, driver).await.is_err() {
                abort.abort();
            }
        }
        self.core.fail_pending(ChannelError::Closed);
    }

    fn state(&self) -> watch::Receiver<ChannelState> {
        self.core.state.subscribe()
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        self.core.state.send_replace(ChannelState::Closed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Calls `connect` until it succeeds, the error is not retryable, or the
/// policy's attempts are spent.
pub async fn connect_with_retry(
    channel: &dyn SignalingChannel,
    url: &Url,
    policy: RetryPolicy,
) -> ChannelResult<Ready> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match channel.connect(url).await {
            Ok(ready) => return Ok(ready),
            Err(err) if err.is_retryable() && attempt < attempts => {
                tracing::warn!(
                    target = "signal",
                    attempt,
                    error = %err,
                    "signaling connect failed; retrying"
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

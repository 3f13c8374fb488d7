use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use url::Url;

use crate::connector::{Connector, Link};
use crate::error::{ChannelError, ChannelResult};

/// In-process relay: every frame sent by one endpoint is delivered to every
/// other connected endpoint, in send order.
///
/// Delivery can be paused (frames are held, then released in order), links can
/// be severed, and connection attempts refused, which lets tests stage glare and
/// reconnects deterministically.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<Mutex<RelayState>>,
}

#[derive(Default)]
struct RelayState {
    next_id: u64,
    endpoints: Vec<Endpoint>,
    paused: bool,
    held: Vec<(u64, String)>,
    refuse: usize,
    published: usize,
}

struct Endpoint {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

impl RelayState {
    fn deliver(&mut self, from: u64, text: &str) {
        self.endpoints.retain(|endpoint| !endpoint.tx.is_closed());
        for endpoint in self.endpoints.iter().filter(|endpoint| endpoint.id != from) {
            let _ = endpoint.tx.unbounded_send(text.to_string());
        }
    }
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every frame until [`MemoryRelay::resume`].
    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    pub fn resume(&self) {
        let mut state = self.inner.lock();
        state.paused = false;
        let held = std::mem::take(&mut state.held);
        for (from, text) in held {
            state.deliver(from, &text);
        }
    }

    /// Drops every live link; their inbound streams end and sends fail.
    pub fn sever(&self) {
        let mut state = self.inner.lock();
        for endpoint in state.endpoints.drain(..) {
            endpoint.tx.close_channel();
        }
    }

    pub fn refuse_next(&self, attempts: usize) {
        self.inner.lock().refuse = attempts;
    }

    pub fn connected(&self) -> usize {
        let mut state = self.inner.lock();
        state.endpoints.retain(|endpoint| !endpoint.tx.is_closed());
        state.endpoints.len()
    }

    /// Frames accepted from any endpoint so far, held ones included.
    pub fn frames(&self) -> usize {
        self.inner.lock().published
    }

    fn publish(&self, from: u64, text: String) -> ChannelResult<()> {
        let mut state = self.inner.lock();
        let attached = state
            .endpoints
            .iter()
            .any(|endpoint| endpoint.id == from && !endpoint.tx.is_closed());
        if !attached {
            return Err(ChannelError::Send("memory link severed".into()));
        }
        state.published += 1;
        if state.paused {
            state.held.push((from, text));
        } else {
            state.deliver(from, &text);
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryRelay {
    async fn open(&self, url: &Url) -> ChannelResult<Link> {
        let (id, rx) = {
            let mut state = self.inner.lock();
            if state.refuse > 0 {
                state.refuse -= 1;
                return Err(ChannelError::Connect(format!("relay refused {url}")));
            }
            state.next_id += 1;
            let id = state.next_id;
            let (tx, rx) = mpsc::unbounded();
            state.endpoints.push(Endpoint { id, tx });
            (id, rx)
        };

        let relay = self.clone();
        let sink = futures::sink::unfold(relay, move |relay, text: String| async move {
            relay.publish(id, text)?;
            Ok::<_, ChannelError>(relay)
        });
        Ok(Link::new(Box::pin(sink), rx.map(Ok).boxed()))
    }
}

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::Sink;
use url::Url;

use crate::error::{ChannelError, ChannelResult};

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub type FrameStream = BoxStream<'static, Result<String, ChannelError>>;

/// One established connection to the relay, carrying UTF-8 text frames.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Link {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens links to a relay. The channel state machine owns reconnect policy;
/// connectors only perform single attempts.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> ChannelResult<Link>;
}

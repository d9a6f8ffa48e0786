//! Channels and the channel directory.
//!
//! The adapter itself never routes replies; it only holds a non-owning
//! reference to a [`ChannelDirectory`] injected by the host, which policies
//! consult to resolve reply destinations by name. Channel handles are looked
//! up per invocation and never cached.
//!
//! [`InMemoryChannel`] and [`StaticChannelDirectory`] are provided for tests
//! and local pipelines.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing_error::SpanTrace;

use crate::envelope::Envelope;

/// Error returned when publishing to a channel fails.
///
/// Wraps the underlying backend error and captures a tracing span backtrace
/// for improved diagnostics.
#[derive(Debug)]
pub struct ChannelError {
    context: SpanTrace,
    source: tower::BoxError,
}

impl ChannelError {
    /// Create a backend-related channel error.
    pub fn backend(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self {
            context: SpanTrace::capture(),
            source: err,
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Channel error: {}", self.source)?;
        self.context.fmt(f)
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// A destination that accepts envelopes.
#[async_trait::async_trait]
pub trait MessageChannel: Send + Sync {
    /// Publish an envelope to this channel.
    async fn send(&self, envelope: Envelope) -> Result<(), ChannelError>;
}

/// Name → channel lookup, injected by the host.
///
/// The directory is opaque to the adapter: it may be backed by static
/// configuration, service discovery, or anything else. It may be absent at
/// adapter construction and injected later, before first use.
pub trait ChannelDirectory: Send + Sync {
    /// Resolve a channel by name.
    fn lookup(&self, name: &str) -> Option<Arc<dyn MessageChannel>>;
}

/// In-memory channel for testing or local pipelines.
///
/// Stores published envelopes in a shared queue. Useful for:
/// - Unit and integration testing
/// - Simulating reply routing without a real broker
/// - Debugging message flows
pub struct InMemoryChannel {
    queue: Arc<Mutex<Vec<Envelope>>>,
}

impl InMemoryChannel {
    /// Return all envelopes published so far, clearing the internal queue.
    pub async fn sent_messages(&self) -> Vec<Envelope> {
        let mut queue = self.queue.lock().await;
        std::mem::take(&mut *queue)
    }
}

impl Clone for InMemoryChannel {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl Default for InMemoryChannel {
    /// Create a new empty in-memory channel.
    fn default() -> Self {
        Self {
            queue: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait::async_trait]
impl MessageChannel for InMemoryChannel {
    /// "Publish" an envelope by appending it to the in-memory queue.
    #[tracing::instrument(skip_all)]
    async fn send(&self, envelope: Envelope) -> Result<(), ChannelError> {
        let mut queue = self.queue.lock().await;
        tracing::info!(
            envelope_id = %envelope.id(),
            payload = envelope.payload().type_name(),
            "Envelope published to in-memory channel",
        );
        queue.push(envelope);
        Ok(())
    }
}

/// Map-backed channel directory.
#[derive(Clone, Default)]
pub struct StaticChannelDirectory {
    channels: HashMap<String, Arc<dyn MessageChannel>>,
}

impl StaticChannelDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under a name, consuming and returning the
    /// directory for chained construction.
    pub fn with_channel(
        mut self,
        name: impl Into<String>,
        channel: Arc<dyn MessageChannel>,
    ) -> Self {
        self.channels.insert(name.into(), channel);
        self
    }
}

impl fmt::Debug for StaticChannelDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticChannelDirectory")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ChannelDirectory for StaticChannelDirectory {
    fn lookup(&self, name: &str) -> Option<Arc<dyn MessageChannel>> {
        self.channels.get(name).map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_channel_collects_envelopes() {
        let channel = InMemoryChannel::default();
        channel.send(Envelope::with_payload(1i64)).await.unwrap();
        channel.send(Envelope::with_payload(2i64)).await.unwrap();

        let sent = channel.sent_messages().await;
        assert_eq!(sent.len(), 2);
        assert!(channel.sent_messages().await.is_empty());
    }

    #[tokio::test]
    async fn directory_resolves_registered_names() {
        let channel = InMemoryChannel::default();
        let directory =
            StaticChannelDirectory::new().with_channel("replies", Arc::new(channel.clone()));

        assert!(directory.lookup("replies").is_some());
        assert!(directory.lookup("missing").is_none());
    }
}

//! Return-value policies.
//!
//! When the invoked method produces a value, the adapter delegates the final
//! step to a [`ReturnValuePolicy`]: given the value and the originator
//! envelope, produce the outcome. The core takes no position on where the
//! reply goes — policies do.

use async_trait::async_trait;

use crate::adapter::{HandlerError, ReplyContext};
use crate::envelope::{Envelope, Payload};

/// Header and configuration key naming the reply channel.
pub const OUTPUT_CHANNEL_NAME_KEY: &str = "outputChannelName";

/// Strategy turning a method's return value into the handling outcome.
///
/// Implementations use [`ReplyContext::create_reply`] to build a correlated
/// reply envelope, and may consult the channel directory through the context
/// to route it.
#[async_trait]
pub trait ReturnValuePolicy: Send + Sync {
    /// Produce the final reply envelope, or `None` when the reply was
    /// routed elsewhere or suppressed.
    async fn handle_return_value(
        &self,
        value: Payload,
        originator: &Envelope,
        ctx: &ReplyContext<'_>,
    ) -> Result<Option<Envelope>, HandlerError>;
}

/// Default policy: build a correlated reply and hand it back to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyToSender;

#[async_trait]
impl ReturnValuePolicy for ReplyToSender {
    async fn handle_return_value(
        &self,
        value: Payload,
        originator: &Envelope,
        ctx: &ReplyContext<'_>,
    ) -> Result<Option<Envelope>, HandlerError> {
        ctx.create_reply(value, originator)
    }
}

/// Publish the reply to a named channel resolved through the directory.
///
/// The channel name comes from this policy's configuration when set,
/// otherwise from the originator's [`OUTPUT_CHANNEL_NAME_KEY`] header. The
/// reply is published and `None` is returned to the caller.
#[derive(Debug, Clone, Default)]
pub struct RouteToNamedChannel {
    channel_name: Option<String>,
}

impl RouteToNamedChannel {
    /// Route every reply to the given channel.
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: Some(channel_name.into()),
        }
    }

    /// Route each reply to the channel named by the originator's
    /// [`OUTPUT_CHANNEL_NAME_KEY`] header.
    pub fn from_headers() -> Self {
        Self { channel_name: None }
    }
}

#[async_trait]
impl ReturnValuePolicy for RouteToNamedChannel {
    async fn handle_return_value(
        &self,
        value: Payload,
        originator: &Envelope,
        ctx: &ReplyContext<'_>,
    ) -> Result<Option<Envelope>, HandlerError> {
        let Some(reply) = ctx.create_reply(value, originator)? else {
            return Ok(None);
        };

        let name = self
            .channel_name
            .as_deref()
            .or_else(|| {
                originator
                    .headers()
                    .get(OUTPUT_CHANNEL_NAME_KEY)
                    .and_then(|value| value.as_str())
            })
            .ok_or_else(|| {
                ctx.configuration_failure(format!(
                    "no output channel name configured and no '{OUTPUT_CHANNEL_NAME_KEY}' header present",
                ))
            })?;

        let channel = ctx.lookup_channel(name).ok_or_else(|| {
            ctx.configuration_failure(format!("no channel named '{name}' in the directory"))
        })?;

        channel
            .send(reply)
            .await
            .map_err(|cause| ctx.dispatch_failure(originator, Box::new(cause)))?;
        tracing::debug!(channel = name, "reply routed to named channel");
        Ok(None)
    }
}

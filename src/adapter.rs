//! The dispatch core.
//!
//! [`HandlerAdapter`] turns a configured object-and-method pair into a
//! uniform message handler: it maps an inbound envelope to call arguments,
//! invokes the target method, and wraps any return value into a reply
//! envelope correlated with the originator.
//!
//! ## Dispatch sequence
//!
//! 1. Lazy one-shot initialization (method resolution) on first use
//! 2. Map: the raw envelope when `method_expects_envelope` is latched,
//!    otherwise whatever the [`PayloadMapper`] produces
//! 3. Shape arguments: a [`CallArgs`] payload spreads in order, anything
//!    else is a single argument, a missing value is a single null argument
//! 4. Invoke; on a signature miss (and only then) retry once with the raw
//!    envelope and latch `method_expects_envelope` on success
//! 5. A void return ends handling with no reply; otherwise the configured
//!    [`ReturnValuePolicy`](crate::policy::ReturnValuePolicy) produces the
//!    outcome
//!
//! The adapter never swallows errors, never retries an invocation that
//! reached the target, and never mutates the originator envelope.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing_error::SpanTrace;

use crate::channel::{ChannelDirectory, MessageChannel};
use crate::envelope::{Envelope, HeaderValue, Payload};
use crate::invoker::{ConfigurationError, InvokeError, MethodInvoker};
use crate::mapping::{DefaultPayloadMapper, DefaultReplyBuilder, PayloadMapper, ReplyBuilder};
use crate::method::{CallArg, CallArgs, Method, MethodTarget};
use crate::policy::{ReplyToSender, ReturnValuePolicy};

/// Error surfaced by [`HandlerAdapter::handle`].
///
/// Each error captures a tracing span backtrace; handler and dispatch
/// failures additionally carry the originator envelope and the method name.
#[derive(Debug)]
pub struct HandlerError {
    context: SpanTrace,
    kind: HandlerErrorKind,
}

/// Handler error classification.
#[derive(Debug)]
pub enum HandlerErrorKind {
    /// Missing or inconsistent configuration at first use, or the signature
    /// fallback also found no matching method. Fatal for this adapter.
    Configuration(ConfigurationError),
    /// The invoked method failed; `cause` is the method's own error, with no
    /// wrapper in between.
    MethodFailed {
        envelope: Envelope,
        method: String,
        cause: tower::BoxError,
    },
    /// Mapping, argument shaping, or reply construction failed.
    Dispatch {
        envelope: Envelope,
        method: String,
        args: String,
        cause: tower::BoxError,
    },
}

impl HandlerError {
    pub(crate) fn configuration(cause: ConfigurationError) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: HandlerErrorKind::Configuration(cause),
        }
    }

    pub(crate) fn method_failed(
        envelope: Envelope,
        method: impl Into<String>,
        cause: tower::BoxError,
    ) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: HandlerErrorKind::MethodFailed {
                envelope,
                method: method.into(),
                cause,
            },
        }
    }

    pub(crate) fn dispatch(
        envelope: Envelope,
        method: impl Into<String>,
        args: String,
        cause: tower::BoxError,
    ) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: HandlerErrorKind::Dispatch {
                envelope,
                method: method.into(),
                args,
                cause,
            },
        }
    }

    /// The error classification.
    pub fn kind(&self) -> &HandlerErrorKind {
        &self.kind
    }

    /// The originator envelope, when the failure reached dispatch.
    pub fn envelope(&self) -> Option<&Envelope> {
        match &self.kind {
            HandlerErrorKind::Configuration(_) => None,
            HandlerErrorKind::MethodFailed { envelope, .. } => Some(envelope),
            HandlerErrorKind::Dispatch { envelope, .. } => Some(envelope),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            HandlerErrorKind::Configuration(cause) => {
                writeln!(f, "Handler configuration error: {cause}")
            }
            HandlerErrorKind::MethodFailed {
                envelope,
                method,
                cause,
            } => writeln!(
                f,
                "Handler method '{method}' failed for envelope {}: {cause}",
                envelope.id(),
            ),
            HandlerErrorKind::Dispatch {
                envelope,
                method,
                args,
                cause,
            } => writeln!(
                f,
                "Failed to dispatch envelope {} to method '{method}' with arguments {args}: {cause}",
                envelope.id(),
            ),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            HandlerErrorKind::Configuration(cause) => Some(cause),
            HandlerErrorKind::MethodFailed { cause, .. } => Some(cause.as_ref()),
            HandlerErrorKind::Dispatch { cause, .. } => Some(cause.as_ref()),
        }
    }
}

/// Best-effort textual rendering of an argument vector for diagnostics.
pub(crate) fn render_args(args: &[CallArg]) -> String {
    format!("{args:?}")
}

/// Reply-construction helper handed to return-value policies.
///
/// Borrows the adapter's builder, directory, and invocation diagnostics for
/// the duration of one `handle` call.
pub struct ReplyContext<'a> {
    builder: &'a dyn ReplyBuilder,
    directory: Option<&'a dyn ChannelDirectory>,
    method_name: &'a str,
    args: &'a [CallArg],
}

impl ReplyContext<'_> {
    /// Build a reply envelope correlated with the originator.
    ///
    /// 1. The builder wraps the value; a `None` result suppresses the reply
    /// 2. The originator's headers are merged in without overwriting
    ///    anything the builder populated
    /// 3. If the correlation id is still unset it becomes the originator's
    ///    correlation id, or failing that the originator's envelope id
    pub fn create_reply(
        &self,
        value: Payload,
        originator: &Envelope,
    ) -> Result<Option<Envelope>, HandlerError> {
        let reply = self.builder.build(value).map_err(|cause| {
            HandlerError::dispatch(
                originator.clone(),
                self.method_name,
                render_args(self.args),
                cause,
            )
        })?;
        let Some(mut reply) = reply else {
            return Ok(None);
        };
        reply.headers_mut().copy_from(originator.headers(), false);
        if reply.headers().correlation_id().is_none() {
            let correlation = originator
                .headers()
                .correlation_id()
                .cloned()
                .unwrap_or_else(|| HeaderValue::Id(originator.id()));
            reply.headers_mut().set_correlation_id(correlation);
        }
        Ok(Some(reply))
    }

    /// Resolve a channel by name through the injected directory.
    pub fn lookup_channel(&self, name: &str) -> Option<Arc<dyn MessageChannel>> {
        self.directory.and_then(|directory| directory.lookup(name))
    }

    /// The configured method name, for diagnostics.
    pub fn method_name(&self) -> &str {
        self.method_name
    }

    /// Diagnostic rendering of the argument vector of this invocation.
    pub fn rendered_args(&self) -> String {
        render_args(self.args)
    }

    /// Build a dispatch failure tied to this invocation.
    pub fn dispatch_failure(&self, originator: &Envelope, cause: tower::BoxError) -> HandlerError {
        HandlerError::dispatch(
            originator.clone(),
            self.method_name,
            render_args(self.args),
            cause,
        )
    }

    /// Build a configuration failure (missing channel, missing name, ...).
    pub fn configuration_failure(&self, message: impl Into<String>) -> HandlerError {
        HandlerError::configuration(ConfigurationError::new(message))
    }
}

/// The message-handler adapter.
///
/// Created around a configured [`MethodInvoker`], optionally customized with
/// a mapper, builder, channel directory, and return-value policy, then shared
/// (`&self`) across any number of concurrent `handle` calls.
///
/// Configuration setters take `&mut self`: the borrow rules enforce the
/// write-once-before-use discipline without locking the hot path.
pub struct HandlerAdapter<P = ReplyToSender> {
    invoker: MethodInvoker,
    method_expects_envelope: AtomicBool,
    mapper: Box<dyn PayloadMapper>,
    builder: Box<dyn ReplyBuilder>,
    directory: Option<Arc<dyn ChannelDirectory>>,
    policy: P,
}

impl HandlerAdapter<ReplyToSender> {
    /// Create an adapter with the default mapper, builder, and
    /// reply-to-sender policy.
    pub fn new(invoker: MethodInvoker) -> Self {
        Self {
            invoker,
            method_expects_envelope: AtomicBool::new(false),
            mapper: Box::new(DefaultPayloadMapper),
            builder: Box::new(DefaultReplyBuilder),
            directory: None,
            policy: ReplyToSender,
        }
    }
}

impl<P: ReturnValuePolicy> HandlerAdapter<P> {
    /// Replace the return-value policy, keeping the rest of the
    /// configuration.
    pub fn with_policy<P2: ReturnValuePolicy>(self, policy: P2) -> HandlerAdapter<P2> {
        HandlerAdapter {
            invoker: self.invoker,
            method_expects_envelope: self.method_expects_envelope,
            mapper: self.mapper,
            builder: self.builder,
            directory: self.directory,
            policy,
        }
    }

    /// Declare up front that the method accepts the envelope itself.
    ///
    /// The flag also flips on its own when signature probing reveals the
    /// method accepts the envelope shape.
    pub fn set_method_expects_envelope(&mut self, expects_envelope: bool) {
        *self.method_expects_envelope.get_mut() = expects_envelope;
    }

    /// Replace the target object (before first use).
    pub fn set_target(&mut self, target: Arc<MethodTarget>) {
        self.invoker.set_target(target);
    }

    /// Configure a resolved method handle (before first use).
    pub fn set_method(&mut self, method: Arc<Method>) {
        self.invoker.set_method(method);
    }

    /// Configure a method name to resolve at first use.
    pub fn set_method_name(&mut self, name: impl Into<String>) {
        self.invoker.set_method_name(name);
    }

    /// Replace the payload mapper.
    pub fn set_payload_mapper(&mut self, mapper: impl PayloadMapper + 'static) {
        self.mapper = Box::new(mapper);
    }

    /// Replace the reply builder.
    pub fn set_reply_builder(&mut self, builder: impl ReplyBuilder + 'static) {
        self.builder = Box::new(builder);
    }

    /// Inject or clear the channel directory.
    ///
    /// The adapter stores the reference for policies to consult; it never
    /// caches channel handles across invocations.
    pub fn set_channel_directory(&mut self, directory: Option<Arc<dyn ChannelDirectory>>) {
        self.directory = directory;
    }

    /// The injected channel directory, if any.
    pub fn channel_directory(&self) -> Option<&Arc<dyn ChannelDirectory>> {
        self.directory.as_ref()
    }

    /// Whether signature probing has latched the envelope-expecting path.
    pub fn method_expects_envelope(&self) -> bool {
        self.method_expects_envelope.load(Ordering::Acquire)
    }

    /// Finalize method resolution ahead of the first `handle` call.
    ///
    /// Idempotent; `handle` performs the same initialization lazily.
    pub fn initialize(&self) -> Result<(), HandlerError> {
        self.invoker.initialize().map_err(HandlerError::configuration)
    }

    /// Whether method resolution has completed.
    pub fn is_initialized(&self) -> bool {
        self.invoker.is_initialized()
    }

    /// Handle one envelope.
    ///
    /// Returns the reply envelope produced by the policy, or `None` when the
    /// method returned nothing (the builder is not consulted in that case)
    /// or the policy routed the reply elsewhere.
    ///
    /// Re-entrant: safe for concurrent callers on the same adapter.
    #[tracing::instrument(skip_all, fields(envelope_id = %envelope.id(), method = self.invoker.method_name()))]
    pub async fn handle(&self, envelope: &Envelope) -> Result<Option<Envelope>, HandlerError> {
        let method_name = self.invoker.method_name();

        let mapped = if self.method_expects_envelope.load(Ordering::Acquire) {
            Some(Payload::new(envelope.clone()))
        } else {
            self.mapper.map(envelope).map_err(|cause| {
                HandlerError::dispatch(
                    envelope.clone(),
                    method_name,
                    "<not yet mapped>".to_owned(),
                    cause,
                )
            })?
        };
        let args = shape_args(mapped);

        let returned = match self.invoker.invoke(&args) {
            Ok(value) => value,
            Err(InvokeError::NoMatchingSignature { .. }) => {
                self.retry_with_envelope(envelope, method_name)?
            }
            Err(InvokeError::MethodFailed(cause)) => {
                return Err(HandlerError::method_failed(
                    envelope.clone(),
                    method_name,
                    cause,
                ));
            }
            Err(InvokeError::Configuration(cause)) => {
                return Err(HandlerError::configuration(cause));
            }
        };

        let Some(value) = returned else {
            return Ok(None);
        };

        let ctx = ReplyContext {
            builder: self.builder.as_ref(),
            directory: self.directory.as_deref(),
            method_name,
            args: &args,
        };
        self.policy.handle_return_value(value, envelope, &ctx).await
    }

    /// Signature-miss fallback: re-invoke once with the raw envelope.
    ///
    /// Triggered only when no signature matched the mapped arguments, never
    /// after the method itself failed. A success latches the
    /// envelope-expecting path for the lifetime of the adapter; a second
    /// miss is a fatal configuration error.
    fn retry_with_envelope(
        &self,
        envelope: &Envelope,
        method_name: &str,
    ) -> Result<Option<Payload>, HandlerError> {
        let args = [Some(Payload::new(envelope.clone()))];
        match self.invoker.invoke(&args) {
            Ok(value) => {
                // Benign race: concurrent callers latch the same value.
                self.method_expects_envelope.store(true, Ordering::Release);
                tracing::debug!("method accepts the envelope shape; mapper skipped from now on");
                Ok(value)
            }
            Err(InvokeError::NoMatchingSignature { .. }) => {
                Err(HandlerError::configuration(ConfigurationError::new(format!(
                    "method '{method_name}' accepts neither the mapped arguments nor the envelope",
                ))))
            }
            Err(InvokeError::MethodFailed(cause)) => Err(HandlerError::method_failed(
                envelope.clone(),
                method_name,
                cause,
            )),
            Err(InvokeError::Configuration(cause)) => Err(HandlerError::configuration(cause)),
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for HandlerAdapter<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerAdapter")
            .field("invoker", &self.invoker)
            .field("method_expects_envelope", &self.method_expects_envelope)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Form the argument vector from a mapping result.
///
/// A [`CallArgs`] payload is an already-spread vector (length-1 included);
/// any other payload is a single argument; a missing value is a single null
/// argument, never an empty vector.
fn shape_args(mapped: Option<Payload>) -> Vec<CallArg> {
    match mapped {
        Some(payload) => match payload.downcast_ref::<CallArgs>() {
            Some(list) => list.0.clone(),
            None => vec![Some(payload)],
        },
        None => vec![None],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_args_boxes_plain_payloads() {
        let args = shape_args(Some(Payload::new("x".to_string())));
        assert_eq!(args.len(), 1);
        assert!(args[0].is_some());
    }

    #[test]
    fn shape_args_spreads_call_args_in_order() {
        let list = CallArgs::of([Payload::new("a".to_string()), Payload::new(7i64)]);
        let args = shape_args(Some(Payload::new(list)));
        assert_eq!(args.len(), 2);
        assert!(args[0].as_ref().unwrap().is::<String>());
        assert!(args[1].as_ref().unwrap().is::<i64>());
    }

    #[test]
    fn shape_args_spreads_single_element_vectors() {
        let list = CallArgs::of([Payload::new(1i64)]);
        let args = shape_args(Some(Payload::new(list)));
        assert_eq!(args.len(), 1);
        assert!(args[0].as_ref().unwrap().is::<i64>());
    }

    #[test]
    fn shape_args_keeps_concrete_vectors_whole() {
        let args = shape_args(Some(Payload::new(vec![1u8, 2, 3])));
        assert_eq!(args.len(), 1);
        assert!(args[0].as_ref().unwrap().is::<Vec<u8>>());
    }

    #[test]
    fn shape_args_maps_missing_values_to_a_single_null() {
        let args = shape_args(None);
        assert_eq!(args.len(), 1);
        assert!(args[0].is_none());
    }
}

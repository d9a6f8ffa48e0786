//! Mapper and reply-builder strategy contracts.
//!
//! Two small conversion seams surround the method invocation:
//!
//! - [`PayloadMapper`]: envelope → invocation input
//! - [`ReplyBuilder`]: return value → reply envelope
//!
//! The default implementations simply consider the payload: the mapper
//! extracts it, the builder wraps a value into a fresh envelope (or passes a
//! returned [`Envelope`] through untouched).

use crate::envelope::{Envelope, Payload};

/// Strategy converting an envelope to invocation input.
///
/// `Ok(None)` is a legal result: the method receives a single null argument.
/// Returning a payload holding [`CallArgs`](crate::method::CallArgs)
/// supplies an already-spread argument vector.
pub trait PayloadMapper: Send + Sync {
    fn map(&self, envelope: &Envelope) -> Result<Option<Payload>, tower::BoxError>;
}

/// Default mapper: extract the envelope payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPayloadMapper;

impl PayloadMapper for DefaultPayloadMapper {
    fn map(&self, envelope: &Envelope) -> Result<Option<Payload>, tower::BoxError> {
        Ok(Some(envelope.payload().clone()))
    }
}

/// Strategy converting a return value to a reply envelope.
///
/// `Ok(None)` suppresses the reply.
pub trait ReplyBuilder: Send + Sync {
    fn build(&self, value: Payload) -> Result<Option<Envelope>, tower::BoxError>;
}

/// Default builder: wrap the value into a fresh envelope.
///
/// A value that already is an [`Envelope`] is passed through as the reply
/// instead of being wrapped a second time.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultReplyBuilder;

impl ReplyBuilder for DefaultReplyBuilder {
    fn build(&self, value: Payload) -> Result<Option<Envelope>, tower::BoxError> {
        if let Some(envelope) = value.downcast_ref::<Envelope>() {
            return Ok(Some(envelope.clone()));
        }
        Ok(Some(Envelope::new(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mapper_extracts_the_payload() {
        let envelope = Envelope::with_payload("hi".to_string());
        let mapped = DefaultPayloadMapper.map(&envelope).unwrap().unwrap();
        assert_eq!(mapped.downcast_ref::<String>().unwrap(), "hi");
    }

    #[test]
    fn default_builder_wraps_values_in_fresh_envelopes() {
        let reply = DefaultReplyBuilder
            .build(Payload::new("pong".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload().downcast_ref::<String>().unwrap(), "pong");
    }

    #[test]
    fn default_builder_passes_envelope_values_through() {
        let inner = Envelope::with_payload(1i64);
        let id = inner.id();
        let reply = DefaultReplyBuilder
            .build(Payload::new(inner))
            .unwrap()
            .unwrap();
        assert_eq!(reply.id(), id);
    }
}

#![doc = include_str!("../README.md")]

pub mod adapter;
pub mod channel;
pub mod envelope;
pub mod invoker;
pub mod mapping;
pub mod method;
pub mod policy;
pub mod service;

#[doc(inline)]
pub use envelope::{Envelope, EnvelopeId, HeaderValue, Headers, Payload};

#[doc(inline)]
pub use adapter::{HandlerAdapter, HandlerError, HandlerErrorKind, ReplyContext};

#[doc(inline)]
pub use invoker::{ConfigurationError, InvokeError, MethodInvoker};

#[doc(inline)]
pub use mapping::{DefaultPayloadMapper, DefaultReplyBuilder, PayloadMapper, ReplyBuilder};

#[doc(inline)]
pub use method::{CallArg, CallArgs, IntoReturnValue, Method, MethodOutcome, MethodTarget};

#[doc(inline)]
pub use policy::{
    ReplyToSender, ReturnValuePolicy, RouteToNamedChannel, OUTPUT_CHANNEL_NAME_KEY,
};

#[doc(inline)]
pub use channel::{
    ChannelDirectory, ChannelError, InMemoryChannel, MessageChannel, StaticChannelDirectory,
};

#[doc(inline)]
pub use service::HandlerService;

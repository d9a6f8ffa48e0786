//! Explicit registration of callable methods.
//!
//! There is no runtime reflection here: a host registers the methods of a
//! target object as [`Method`] values inside a [`MethodTarget`]. A method
//! probes the argument vector itself — arity and concrete types — and reports
//! [`MethodOutcome::NoMatch`] *before* running any user code, which is what
//! lets the adapter distinguish "wrong shape" from "the method failed".
//!
//! ## Argument model
//!
//! - A [`CallArg`] is `Option<Payload>`; `None` is a null argument
//! - A mapper that wants to supply several arguments returns a [`CallArgs`]
//!   payload, which the adapter spreads in order (length-1 vectors included)
//! - Any other payload — including concrete vectors such as `Vec<u8>` — is a
//!   single argument

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::envelope::{Envelope, Payload};

/// One invocation argument; `None` is a null argument.
pub type CallArg = Option<Payload>;

/// An already-spread argument vector produced by a mapper.
///
/// When a mapper returns a payload holding `CallArgs`, the adapter treats it
/// as the full argument vector instead of a single value.
#[derive(Debug, Clone, Default)]
pub struct CallArgs(pub Vec<CallArg>);

impl CallArgs {
    /// Build an argument vector from plain values.
    pub fn of(args: impl IntoIterator<Item = Payload>) -> Self {
        Self(args.into_iter().map(Some).collect())
    }
}

impl From<Vec<CallArg>> for CallArgs {
    fn from(args: Vec<CallArg>) -> Self {
        Self(args)
    }
}

/// Result of running (or refusing to run) a method body.
///
/// `NoMatch` is decided from the argument shape alone, before user code runs.
/// `Failed` means the body executed and returned an error; the adapter never
/// retries after it.
pub enum MethodOutcome {
    /// The method returned a value.
    Value(Payload),
    /// The method returned nothing.
    Void,
    /// The argument vector does not fit this method's signature.
    NoMatch,
    /// The method body ran and failed.
    Failed(tower::BoxError),
}

impl fmt::Debug for MethodOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodOutcome::Value(payload) => f.debug_tuple("Value").field(payload).finish(),
            MethodOutcome::Void => write!(f, "Void"),
            MethodOutcome::NoMatch => write!(f, "NoMatch"),
            MethodOutcome::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
        }
    }
}

/// Conversion from a method body's return type into a [`MethodOutcome`].
///
/// Implemented for `()` (void), [`Payload`], `Option<Payload>`, [`Envelope`],
/// a handful of common scalar types, and `Result<T, E>` where the error
/// becomes [`MethodOutcome::Failed`].
pub trait IntoReturnValue {
    fn into_return_value(self) -> MethodOutcome;
}

impl IntoReturnValue for () {
    fn into_return_value(self) -> MethodOutcome {
        MethodOutcome::Void
    }
}

impl IntoReturnValue for Payload {
    fn into_return_value(self) -> MethodOutcome {
        MethodOutcome::Value(self)
    }
}

impl IntoReturnValue for Option<Payload> {
    fn into_return_value(self) -> MethodOutcome {
        match self {
            Some(payload) => MethodOutcome::Value(payload),
            None => MethodOutcome::Void,
        }
    }
}

impl IntoReturnValue for Envelope {
    fn into_return_value(self) -> MethodOutcome {
        MethodOutcome::Value(Payload::new(self))
    }
}

macro_rules! impl_into_return_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReturnValue for $ty {
                fn into_return_value(self) -> MethodOutcome {
                    MethodOutcome::Value(Payload::new(self))
                }
            }
        )*
    };
}

impl_into_return_value!(String, i64, i32, u64, bool, f64, Vec<u8>);

impl<T, E> IntoReturnValue for Result<T, E>
where
    T: IntoReturnValue,
    E: Into<tower::BoxError>,
{
    fn into_return_value(self) -> MethodOutcome {
        match self {
            Ok(value) => value.into_return_value(),
            Err(err) => MethodOutcome::Failed(err.into()),
        }
    }
}

type MethodBody = Box<dyn Fn(&[CallArg]) -> MethodOutcome + Send + Sync>;

/// A single callable method of a target object.
///
/// Carries the name it is registered under, a human-readable signature for
/// diagnostics, and the boxed body. Built through the typed constructors
/// ([`Method::unary`], [`Method::binary`], ...) or the raw
/// [`Method::from_fn`] escape hatch.
pub struct Method {
    name: String,
    signature: String,
    body: MethodBody,
}

impl Method {
    /// Register a raw body that probes the argument vector itself.
    ///
    /// The body must return [`MethodOutcome::NoMatch`] without side effects
    /// when the arguments do not fit its signature.
    pub fn from_fn<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&[CallArg]) -> MethodOutcome + Send + Sync + 'static,
    {
        let name = name.into();
        let signature = format!("{name}(..)");
        Self {
            name,
            signature,
            body: Box::new(body),
        }
    }

    /// A method taking exactly one non-null argument of type `A`.
    pub fn unary<A, R, F>(name: impl Into<String>, f: F) -> Self
    where
        A: std::any::Any + Send + Sync,
        R: IntoReturnValue,
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        let name = name.into();
        let signature = format!("{}({})", name, std::any::type_name::<A>());
        Self {
            name,
            signature,
            body: Box::new(move |args: &[CallArg]| {
                let [Some(arg)] = args else {
                    return MethodOutcome::NoMatch;
                };
                match arg.downcast_ref::<A>() {
                    Some(value) => f(value).into_return_value(),
                    None => MethodOutcome::NoMatch,
                }
            }),
        }
    }

    /// A method taking exactly one argument of type `A`, null allowed.
    pub fn unary_nullable<A, R, F>(name: impl Into<String>, f: F) -> Self
    where
        A: std::any::Any + Send + Sync,
        R: IntoReturnValue,
        F: Fn(Option<&A>) -> R + Send + Sync + 'static,
    {
        let name = name.into();
        let signature = format!("{}({}?)", name, std::any::type_name::<A>());
        Self {
            name,
            signature,
            body: Box::new(move |args: &[CallArg]| {
                let [arg] = args else {
                    return MethodOutcome::NoMatch;
                };
                match arg {
                    Some(payload) => match payload.downcast_ref::<A>() {
                        Some(value) => f(Some(value)).into_return_value(),
                        None => MethodOutcome::NoMatch,
                    },
                    None => f(None).into_return_value(),
                }
            }),
        }
    }

    /// A method taking exactly two non-null arguments of types `A` and `B`.
    pub fn binary<A, B, R, F>(name: impl Into<String>, f: F) -> Self
    where
        A: std::any::Any + Send + Sync,
        B: std::any::Any + Send + Sync,
        R: IntoReturnValue,
        F: Fn(&A, &B) -> R + Send + Sync + 'static,
    {
        let name = name.into();
        let signature = format!(
            "{}({}, {})",
            name,
            std::any::type_name::<A>(),
            std::any::type_name::<B>()
        );
        Self {
            name,
            signature,
            body: Box::new(move |args: &[CallArg]| {
                let [Some(a), Some(b)] = args else {
                    return MethodOutcome::NoMatch;
                };
                match (a.downcast_ref::<A>(), b.downcast_ref::<B>()) {
                    (Some(a), Some(b)) => f(a, b).into_return_value(),
                    _ => MethodOutcome::NoMatch,
                }
            }),
        }
    }

    /// The name this method is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable signature for diagnostics.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Run the body against an argument vector.
    pub fn call(&self, args: &[CallArg]) -> MethodOutcome {
        (self.body)(args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("signature", &self.signature)
            .finish()
    }
}

/// A named target object: a registry of its callable methods.
///
/// Several methods may share a name (overloads); they are probed in
/// registration order at invocation time.
#[derive(Debug, Default)]
pub struct MethodTarget {
    name: String,
    methods: HashMap<String, Vec<Arc<Method>>>,
}

impl MethodTarget {
    /// Create an empty target with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// The target's name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a method, returning the shared handle.
    ///
    /// The handle can be handed to
    /// [`MethodInvoker::set_method`](crate::MethodInvoker::set_method) to
    /// configure an invoker without going through name resolution.
    pub fn register(&mut self, method: Method) -> Arc<Method> {
        let method = Arc::new(method);
        self.methods
            .entry(method.name().to_owned())
            .or_default()
            .push(Arc::clone(&method));
        method
    }

    /// All methods registered under a name, in registration order.
    pub fn lookup(&self, name: &str) -> Option<&[Arc<Method>]> {
        self.methods.get(name).map(Vec::as_slice)
    }

    /// Whether the given handle is one of this target's registered methods.
    pub fn contains(&self, method: &Arc<Method>) -> bool {
        self.methods
            .get(method.name())
            .is_some_and(|group| group.iter().any(|m| Arc::ptr_eq(m, method)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unary_matches_its_argument_type() {
        let method = Method::unary("upper", |s: &String| s.to_uppercase());
        let args = [Some(Payload::new("hi".to_string()))];
        match method.call(&args) {
            MethodOutcome::Value(payload) => {
                assert_eq!(payload.downcast_ref::<String>().unwrap(), "HI");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn unary_refuses_wrong_type_without_running() {
        let method = Method::unary::<_, (), _>("upper", |_: &String| panic!("must not run"));
        let args = [Some(Payload::new(42i64))];
        assert!(matches!(method.call(&args), MethodOutcome::NoMatch));
    }

    #[test]
    fn unary_refuses_null_and_wrong_arity() {
        let method = Method::unary("upper", |s: &String| s.clone());
        assert!(matches!(method.call(&[None]), MethodOutcome::NoMatch));
        assert!(matches!(method.call(&[]), MethodOutcome::NoMatch));
        let two = [
            Some(Payload::new("a".to_string())),
            Some(Payload::new("b".to_string())),
        ];
        assert!(matches!(method.call(&two), MethodOutcome::NoMatch));
    }

    #[test]
    fn unary_nullable_accepts_null() {
        let method = Method::unary_nullable("tag", |s: Option<&String>| match s {
            Some(s) => s.clone(),
            None => "<null>".to_string(),
        });
        match method.call(&[None]) {
            MethodOutcome::Value(payload) => {
                assert_eq!(payload.downcast_ref::<String>().unwrap(), "<null>");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn binary_passes_arguments_in_order() {
        let method = Method::binary("combine", |s: &String, n: &i64| format!("{s}{n}"));
        let args = [
            Some(Payload::new("a".to_string())),
            Some(Payload::new(7i64)),
        ];
        match method.call(&args) {
            MethodOutcome::Value(payload) => {
                assert_eq!(payload.downcast_ref::<String>().unwrap(), "a7");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn result_errors_become_failed_outcomes() {
        let method = Method::unary("fail", |_: &String| -> Result<String, std::io::Error> {
            Err(std::io::Error::other("boom"))
        });
        let args = [Some(Payload::new("x".to_string()))];
        assert!(matches!(method.call(&args), MethodOutcome::Failed(_)));
    }

    #[test]
    fn void_return_is_distinguished_from_values() {
        let method = Method::unary("consume", |_: &String| ());
        let args = [Some(Payload::new("x".to_string()))];
        assert!(matches!(method.call(&args), MethodOutcome::Void));
    }

    #[test]
    fn target_tracks_registered_handles() {
        let mut target = MethodTarget::new("t");
        let handle = target.register(Method::unary("m", |s: &String| s.clone()));
        let foreign = Arc::new(Method::unary("m", |s: &String| s.clone()));

        assert!(target.contains(&handle));
        assert!(!target.contains(&foreign));
        assert_eq!(target.lookup("m").map(<[_]>::len), Some(1));
        assert!(target.lookup("absent").is_none());
    }
}

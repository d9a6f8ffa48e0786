//! Method resolution and invocation.
//!
//! [`MethodInvoker`] holds a target and either a resolved [`Method`] handle
//! or a method name. Resolution is finalized lazily, at most once, and is
//! safe for concurrent first callers. Invocation probes the resolved
//! candidates in registration order and keeps the two failure categories
//! apart:
//!
//! - [`InvokeError::NoMatchingSignature`]: no candidate accepts the argument
//!   shape — the adapter may retry once with the raw envelope
//! - [`InvokeError::MethodFailed`]: a body ran and failed — never retried

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing_error::SpanTrace;

use crate::envelope::Payload;
use crate::method::{CallArg, Method, MethodOutcome, MethodTarget};

/// Missing or inconsistent target/method configuration.
///
/// Fatal for the invoker (and any adapter built on it): the same error is
/// returned on every subsequent use.
#[derive(Debug)]
pub struct ConfigurationError {
    context: SpanTrace,
    message: String,
}

impl ConfigurationError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            context: SpanTrace::capture(),
            message: message.into(),
        }
    }

    /// Human-readable description of what is misconfigured.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration error: {}", self.message)?;
        self.context.fmt(f)
    }
}

impl std::error::Error for ConfigurationError {}

/// Why an invocation did not produce a result.
#[derive(Debug)]
pub enum InvokeError {
    /// The invoker could not be resolved at first use.
    Configuration(ConfigurationError),
    /// No resolved candidate accepts this argument shape.
    NoMatchingSignature {
        /// The configured method name.
        method: String,
        /// Arity of the rejected argument vector.
        arity: usize,
    },
    /// A method body ran and failed; the cause is the body's own error.
    MethodFailed(tower::BoxError),
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::Configuration(err) => err.fmt(f),
            InvokeError::NoMatchingSignature { method, arity } => {
                write!(f, "no signature of method '{method}' matches {arity} argument(s)")
            }
            InvokeError::MethodFailed(err) => write!(f, "method failed: {err}"),
        }
    }
}

impl std::error::Error for InvokeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InvokeError::Configuration(err) => Some(err),
            InvokeError::NoMatchingSignature { .. } => None,
            InvokeError::MethodFailed(err) => Some(err.as_ref()),
        }
    }
}

/// Resolves and invokes a method on a [`MethodTarget`].
///
/// Configure with [`set_method`](Self::set_method) (a handle returned by
/// [`MethodTarget::register`]) or [`set_method_name`](Self::set_method_name),
/// or both — in which case they must agree. Configuration happens before
/// first use; from then on the invoker is shared freely across threads.
#[derive(Debug)]
pub struct MethodInvoker {
    target: Arc<MethodTarget>,
    method: Option<Arc<Method>>,
    method_name: Option<String>,
    resolved: OnceLock<Vec<Arc<Method>>>,
}

impl MethodInvoker {
    /// Create an unconfigured invoker for the given target.
    pub fn new(target: Arc<MethodTarget>) -> Self {
        Self {
            target,
            method: None,
            method_name: None,
            resolved: OnceLock::new(),
        }
    }

    /// Replace the target object.
    pub fn set_target(&mut self, target: Arc<MethodTarget>) {
        self.target = target;
    }

    /// Configure a resolved method handle.
    pub fn set_method(&mut self, method: Arc<Method>) {
        self.method = Some(method);
    }

    /// Configure a method name to resolve against the target at first use.
    pub fn set_method_name(&mut self, name: impl Into<String>) {
        self.method_name = Some(name.into());
    }

    /// The configured method name, for diagnostics.
    pub fn method_name(&self) -> &str {
        self.method_name
            .as_deref()
            .or_else(|| self.method.as_ref().map(|m| m.name()))
            .unwrap_or("<unresolved>")
    }

    /// Whether method resolution has completed.
    pub fn is_initialized(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// Finalize method resolution.
    ///
    /// Idempotent: once resolution succeeds, later calls are no-ops.
    /// Concurrent first callers may race here; the losers discard an
    /// identical candidate set.
    pub fn initialize(&self) -> Result<(), ConfigurationError> {
        if self.resolved.get().is_some() {
            return Ok(());
        }
        let candidates = self.resolve()?;
        let _ = self.resolved.set(candidates);
        Ok(())
    }

    fn resolve(&self) -> Result<Vec<Arc<Method>>, ConfigurationError> {
        let target = self.target.name();
        match (&self.method, &self.method_name) {
            (Some(method), Some(name)) => {
                if method.name() != name {
                    return Err(ConfigurationError::new(format!(
                        "method handle '{}' disagrees with configured method name '{name}'",
                        method.name(),
                    )));
                }
                if !self.target.contains(method) {
                    return Err(ConfigurationError::new(format!(
                        "method '{name}' is not registered on target '{target}'",
                    )));
                }
                Ok(vec![Arc::clone(method)])
            }
            (Some(method), None) => {
                if !self.target.contains(method) {
                    return Err(ConfigurationError::new(format!(
                        "method '{}' is not registered on target '{target}'",
                        method.name(),
                    )));
                }
                Ok(vec![Arc::clone(method)])
            }
            (None, Some(name)) => match self.target.lookup(name) {
                Some(group) if !group.is_empty() => Ok(group.to_vec()),
                _ => Err(ConfigurationError::new(format!(
                    "target '{target}' declares no method named '{name}'",
                ))),
            },
            (None, None) => Err(ConfigurationError::new(
                "either a method handle or a method name is required",
            )),
        }
    }

    /// Invoke the resolved method with the given arguments.
    ///
    /// Candidates are probed in registration order; the first one that does
    /// not refuse the argument shape wins. `Ok(None)` is a void return.
    pub fn invoke(&self, args: &[CallArg]) -> Result<Option<Payload>, InvokeError> {
        self.initialize().map_err(InvokeError::Configuration)?;
        let Some(candidates) = self.resolved.get() else {
            // initialize() either stored the candidates or returned an error
            return Err(InvokeError::Configuration(ConfigurationError::new(
                "method resolution did not complete",
            )));
        };
        for method in candidates {
            match method.call(args) {
                MethodOutcome::NoMatch => continue,
                MethodOutcome::Void => return Ok(None),
                MethodOutcome::Value(value) => return Ok(Some(value)),
                MethodOutcome::Failed(cause) => return Err(InvokeError::MethodFailed(cause)),
            }
        }
        Err(InvokeError::NoMatchingSignature {
            method: self.method_name().to_owned(),
            arity: args.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Payload;
    use crate::method::MethodTarget;

    fn target_with_echo() -> (Arc<MethodTarget>, Arc<Method>) {
        let mut target = MethodTarget::new("t");
        let handle = target.register(Method::unary("echo", |s: &String| s.clone()));
        (Arc::new(target), handle)
    }

    #[test]
    fn resolves_by_name() {
        let (target, _) = target_with_echo();
        let mut invoker = MethodInvoker::new(target);
        invoker.set_method_name("echo");

        let args = [Some(Payload::new("hi".to_string()))];
        let result = invoker.invoke(&args).unwrap().unwrap();
        assert_eq!(result.downcast_ref::<String>().unwrap(), "hi");
        assert!(invoker.is_initialized());
    }

    #[test]
    fn resolves_by_handle() {
        let (target, handle) = target_with_echo();
        let mut invoker = MethodInvoker::new(target);
        invoker.set_method(handle);

        let args = [Some(Payload::new("hi".to_string()))];
        assert!(invoker.invoke(&args).is_ok());
    }

    #[test]
    fn disagreeing_handle_and_name_fail_resolution() {
        let (target, handle) = target_with_echo();
        let mut invoker = MethodInvoker::new(target);
        invoker.set_method(handle);
        invoker.set_method_name("other");

        let args = [Some(Payload::new("hi".to_string()))];
        assert!(matches!(
            invoker.invoke(&args),
            Err(InvokeError::Configuration(_))
        ));
        assert!(!invoker.is_initialized());
    }

    #[test]
    fn foreign_handle_fails_resolution() {
        let (target, _) = target_with_echo();
        let mut invoker = MethodInvoker::new(target);
        invoker.set_method(Arc::new(Method::unary("echo", |s: &String| s.clone())));

        let args = [Some(Payload::new("hi".to_string()))];
        assert!(matches!(
            invoker.invoke(&args),
            Err(InvokeError::Configuration(_))
        ));
    }

    #[test]
    fn unconfigured_invoker_fails_resolution() {
        let (target, _) = target_with_echo();
        let invoker = MethodInvoker::new(target);
        assert!(matches!(
            invoker.invoke(&[None]),
            Err(InvokeError::Configuration(_))
        ));
    }

    #[test]
    fn unknown_name_fails_resolution() {
        let (target, _) = target_with_echo();
        let mut invoker = MethodInvoker::new(target);
        invoker.set_method_name("missing");
        assert!(matches!(
            invoker.invoke(&[None]),
            Err(InvokeError::Configuration(_))
        ));
    }

    #[test]
    fn initialization_is_idempotent() {
        let (target, _) = target_with_echo();
        let mut invoker = MethodInvoker::new(target);
        invoker.set_method_name("echo");

        invoker.initialize().unwrap();
        invoker.initialize().unwrap();
        assert!(invoker.is_initialized());
        assert_eq!(invoker.method_name(), "echo");
    }

    #[test]
    fn signature_miss_is_not_a_method_failure() {
        let (target, _) = target_with_echo();
        let mut invoker = MethodInvoker::new(target);
        invoker.set_method_name("echo");

        let args = [Some(Payload::new(42i64))];
        assert!(matches!(
            invoker.invoke(&args),
            Err(InvokeError::NoMatchingSignature { arity: 1, .. })
        ));
    }

    #[test]
    fn overloads_are_probed_in_registration_order() {
        let mut target = MethodTarget::new("t");
        target.register(Method::unary("describe", |s: &String| format!("str:{s}")));
        target.register(Method::unary("describe", |n: &i64| format!("int:{n}")));
        let mut invoker = MethodInvoker::new(Arc::new(target));
        invoker.set_method_name("describe");

        let result = invoker
            .invoke(&[Some(Payload::new(7i64))])
            .unwrap()
            .unwrap();
        assert_eq!(result.downcast_ref::<String>().unwrap(), "int:7");
    }

    #[test]
    fn body_errors_surface_as_method_failed() {
        let mut target = MethodTarget::new("t");
        target.register(Method::unary("boom", |_: &String| -> Result<String, std::io::Error> {
            Err(std::io::Error::other("kaput"))
        }));
        let mut invoker = MethodInvoker::new(Arc::new(target));
        invoker.set_method_name("boom");

        let args = [Some(Payload::new("x".to_string()))];
        match invoker.invoke(&args) {
            Err(InvokeError::MethodFailed(cause)) => {
                assert_eq!(cause.to_string(), "kaput");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

//! Method namespace of the remote API.
//!
//! Method names are not known in advance: a [`MethodCall`] is built segment by
//! segment (`api.method("users").child("get")`, or `api.path("users.get")`)
//! and dispatched once its arguments are bound.

pub mod response;
pub mod values;

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::error::VkResult;
use crate::session::Session;

use self::values::CallArgs;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("arguments of {0} are already bound")]
    ImmutableArguments(String),
}

/// Entry point for building method calls on a session.
#[derive(Clone)]
pub struct Api {
    session: Session,
}

impl Api {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Protocol version sent with calls that do not override `v`.
    pub fn version(&self) -> &str {
        self.session.api_version()
    }

    /// Call rooted at `name`.
    pub fn method(&self, name: impl Into<String>) -> MethodCall {
        MethodCall::new(self.session.clone(), vec![name.into()])
    }

    /// Call for a dotted name, same as chaining [`MethodCall::child`].
    pub fn path(&self, dotted: &str) -> MethodCall {
        MethodCall::new(
            self.session.clone(),
            dotted.split('.').map(String::from).collect(),
        )
    }

    /// Shorthand for `path(dotted).invoke(args)`.
    pub async fn call(&self, dotted: &str, args: CallArgs) -> VkResult<Value> {
        self.path(dotted).invoke(args).await
    }
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("version", &self.version())
            .finish()
    }
}

/// A method call being assembled.
///
/// Segments only ever grow; arguments can be bound once.
#[derive(Clone)]
pub struct MethodCall {
    session: Session,
    segments: Vec<String>,
    args: Option<CallArgs>,
    timeout: Option<Duration>,
}

impl MethodCall {
    fn new(session: Session, segments: Vec<String>) -> Self {
        Self {
            session,
            segments,
            args: None,
            timeout: None,
        }
    }

    /// Call one level deeper: `parent.name`.
    pub fn child(&self, name: impl Into<String>) -> MethodCall {
        let mut segments = self.segments.clone();
        segments.push(name.into());
        MethodCall::new(self.session.clone(), segments)
    }

    /// Remote method name, segments joined with `.`.
    pub fn method_name(&self) -> String {
        self.segments.join(".")
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn args(&self) -> Option<&CallArgs> {
        self.args.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Freeze the arguments of this call.
    pub fn bind(&mut self, args: CallArgs) -> Result<&mut Self, DispatchError> {
        if self.args.is_some() {
            return Err(DispatchError::ImmutableArguments(self.method_name()));
        }
        self.args = Some(args);
        Ok(self)
    }

    /// Owned variant of [`MethodCall::bind`].
    pub fn with_args(mut self, args: CallArgs) -> Result<Self, DispatchError> {
        self.bind(args)?;
        Ok(self)
    }

    /// Transport timeout for this call only.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Dispatch with the bound arguments, or none.
    pub async fn send(&self) -> VkResult<Value> {
        self.session.make_request(self).await
    }

    /// Bind `args` and dispatch.
    pub async fn invoke(mut self, args: CallArgs) -> VkResult<Value> {
        self.bind(args)?;
        self.send().await
    }

    /// Like [`MethodCall::invoke`] for a JSON object of arguments.
    pub async fn invoke_value(self, args: Value) -> VkResult<Value> {
        let args = CallArgs::try_from(args)?;
        self.invoke(args).await
    }
}

impl fmt::Debug for MethodCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCall")
            .field("method", &self.method_name())
            .field("args", &self.args)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stub::StubTransport;

    fn api() -> Api {
        Session::builder()
            .with_transport(StubTransport::new())
            .build()
            .unwrap()
            .api()
    }

    #[test]
    fn chained_and_dotted_paths_agree() {
        let api = api();
        let chained = api.method("a").child("b").child("c");
        let grouped = api.path("a.b").child("c");
        let dotted = api.path("a.b.c");
        assert_eq!(chained.method_name(), "a.b.c");
        assert_eq!(grouped.method_name(), "a.b.c");
        assert_eq!(dotted.segments(), chained.segments());
    }

    #[test]
    fn children_do_not_touch_the_parent() {
        let api = api();
        let parent = api.method("users");
        let _ = parent.child("get");
        let _ = parent.child("search");
        assert_eq!(parent.method_name(), "users");
    }

    #[test]
    fn arguments_bind_once() {
        let api = api();
        let mut call = api.path("users.get");
        call.bind(CallArgs::new().arg("user_ids", 1)).unwrap();
        let err = call.bind(CallArgs::new().arg("user_ids", 2)).unwrap_err();
        assert_eq!(err.to_string(), "arguments of users.get are already bound");
        assert_eq!(call.args().unwrap().get("user_ids"), Some(&Value::from(1)));
        assert_eq!(api.version(), "5.45");
    }

    #[test]
    fn segments_are_not_validated() {
        let call = api().method("").child("weird name").child("123");
        assert_eq!(call.method_name(), ".weird name.123");
    }
}

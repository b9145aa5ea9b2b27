//! Synchronous wrappers around the async session.
//!
//! Each blocking [`Session`] drives its own current-thread tokio runtime. Do
//! not use these types from inside an async runtime; `block_on` panics there.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::{Builder, Runtime};

use crate::api::DispatchError;
use crate::api::values::CallArgs;
use crate::auth::Credential;
use crate::config::SessionConfig;
use crate::error::{VkError, VkResult};
use crate::session::SessionBuilder;

fn runtime() -> VkResult<Arc<Runtime>> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(VkError::Runtime)
}

/// Blocking handle on a [`crate::Session`].
#[derive(Clone)]
pub struct Session {
    inner: crate::Session,
    runtime: Arc<Runtime>,
}

impl Session {
    /// Lazy session; the credential is acquired by the first call.
    pub fn new(config: SessionConfig) -> VkResult<Self> {
        Self::from_builder(SessionBuilder::new().with_config(config))
    }

    pub fn from_builder(builder: SessionBuilder) -> VkResult<Self> {
        Ok(Self {
            runtime: runtime()?,
            inner: builder.build()?,
        })
    }

    /// Session logged in before returning.
    pub fn connect(config: SessionConfig) -> VkResult<Self> {
        let runtime = runtime()?;
        let inner = runtime.block_on(SessionBuilder::new().with_config(config).connect())?;
        Ok(Self { inner, runtime })
    }

    pub fn api(&self) -> Api {
        Api {
            inner: self.inner.api(),
            runtime: self.runtime.clone(),
        }
    }

    pub fn access_token(&self) -> VkResult<Option<String>> {
        self.runtime.block_on(self.inner.access_token())
    }

    pub fn renew_access_token(&self) -> VkResult<Credential> {
        self.runtime.block_on(self.inner.renew_access_token())
    }

    /// The async session behind this handle.
    pub fn as_async(&self) -> &crate::Session {
        &self.inner
    }
}

/// Blocking counterpart of [`crate::Api`].
#[derive(Clone)]
pub struct Api {
    inner: crate::Api,
    runtime: Arc<Runtime>,
}

impl Api {
    pub fn method(&self, name: impl Into<String>) -> MethodCall {
        self.wrap(self.inner.method(name))
    }

    pub fn path(&self, dotted: &str) -> MethodCall {
        self.wrap(self.inner.path(dotted))
    }

    pub fn call(&self, dotted: &str, args: CallArgs) -> VkResult<Value> {
        self.path(dotted).invoke(args)
    }

    fn wrap(&self, inner: crate::MethodCall) -> MethodCall {
        MethodCall {
            inner,
            runtime: self.runtime.clone(),
        }
    }
}

/// Blocking counterpart of [`crate::MethodCall`].
#[derive(Clone)]
pub struct MethodCall {
    inner: crate::MethodCall,
    runtime: Arc<Runtime>,
}

impl MethodCall {
    pub fn child(&self, name: impl Into<String>) -> MethodCall {
        MethodCall {
            inner: self.inner.child(name),
            runtime: self.runtime.clone(),
        }
    }

    pub fn method_name(&self) -> String {
        self.inner.method_name()
    }

    pub fn bind(&mut self, args: CallArgs) -> Result<&mut Self, DispatchError> {
        self.inner.bind(args)?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.inner = self.inner.with_timeout(timeout);
        self
    }

    pub fn send(&self) -> VkResult<Value> {
        self.runtime.block_on(self.inner.send())
    }

    pub fn invoke(mut self, args: CallArgs) -> VkResult<Value> {
        self.bind(args)?;
        self.send()
    }
}

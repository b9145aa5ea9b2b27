//! # vk-requests-rs
//!
//! Client for the vk.com API with dynamic method dispatch and a login flow
//! that recovers from captcha, two-factor and phone-confirmation checks.
//!
//! The crate does not ship a catalogue of API methods. Calls are assembled
//! from name segments and sent as-is, so every method of the remote API is
//! reachable without a release of this crate.
//!
//! ## Features
//!
//! - Async session over `reqwest`, plus a [`blocking`] facade
//! - Browser-style login with the OAuth implicit grant, or the direct password
//!   grant when a client secret is configured
//! - Pre-issued service tokens and anonymous sessions
//! - Automatic credential renewal when the server rejects a token
//! - Captcha, two-factor and phone-digit challenges answered through a
//!   pluggable [`ChallengeResolver`]
//! - Rules management for the streaming API
//!
//! ## Example
//!
//! ```no_run
//! use vk_requests_rs::{CallArgs, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::builder()
//!         .with_app_id("1234567")
//!         .with_login("user@example.com")
//!         .with_password("secret")
//!         .build()?;
//!
//!     let users = session
//!         .api()
//!         .path("users.get")
//!         .invoke(CallArgs::new().arg("user_ids", 1))
//!         .await?;
//!     println!("{users}");
//!     Ok(())
//! }
//! ```

mod session;

pub mod api;
pub mod auth;
pub mod blocking;
pub mod config;
pub mod error;
pub mod events;
pub mod parsers;
pub mod resolvers;
pub mod streaming;
pub mod transport;

pub use crate::session::{Session, SessionBuilder};

pub use crate::api::response::{RemoteError, ResponseOutcome, interpret_body, json_iter_parse};
pub use crate::api::values::{CallArgs, ValueError, stringify_args, stringify_values};
pub use crate::api::{Api, DispatchError, MethodCall};

pub use crate::auth::{AuthEngine, AuthError, AuthState, Credential, CredentialMode, Identity};

pub use crate::config::{
    ConfigError, DEFAULT_API_VERSION, DEFAULT_SCOPE, Endpoints, HttpParams, Scope, SessionConfig,
};

pub use crate::error::{VkError, VkResult};

pub use crate::events::{EventDispatcher, EventHandler, LoggingHandler, SessionEvent};

pub use crate::parsers::{LoginChallenge, ParseError};

pub use crate::resolvers::{
    CallbackResolver, CaptchaTask, ChallengeResolver, ConsoleResolver, NonInteractiveResolver,
    PhoneTask, ResolverError, TwoFactorTask,
};

pub use crate::streaming::{StreamingError, StreamingRule, StreamingRules};

pub use crate::transport::{
    HttpTransport, ReqwestTransport, TransportError, TransportRequest, TransportResponse,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

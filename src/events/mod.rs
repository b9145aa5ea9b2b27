//! Session events.
//!
//! Hooks for logging and custom reactions around challenges, retries and
//! credential changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A challenge was met, during login or in the middle of an API call.
#[derive(Debug, Clone)]
pub struct ChallengeEvent {
    pub challenge_type: &'static str,
    pub resolver: &'static str,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// An API call is dispatched again.
#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub method: String,
    pub attempt: usize,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialChange {
    Acquired,
    Invalidated,
}

/// The cached credential changed.
#[derive(Debug, Clone)]
pub struct CredentialEvent {
    pub change: CredentialChange,
    /// Censored token, never the real value.
    pub token: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub method: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Challenge(ChallengeEvent),
    Retry(RetryEvent),
    Credential(CredentialEvent),
    Error(ErrorEvent),
}

impl SessionEvent {
    pub fn challenge(challenge_type: &'static str, resolver: &'static str, success: bool) -> Self {
        SessionEvent::Challenge(ChallengeEvent {
            challenge_type,
            resolver,
            success,
            timestamp: Utc::now(),
        })
    }

    pub fn retry(method: impl Into<String>, attempt: usize, reason: impl Into<String>) -> Self {
        SessionEvent::Retry(RetryEvent {
            method: method.into(),
            attempt,
            reason: reason.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn credential(change: CredentialChange, token: impl Into<String>) -> Self {
        SessionEvent::Credential(CredentialEvent {
            change,
            token: token.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn error(method: impl Into<String>, error: impl Into<String>) -> Self {
        SessionEvent::Error(ErrorEvent {
            method: method.into(),
            error: error.into(),
            timestamp: Utc::now(),
        })
    }
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &SessionEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Dispatcher with [`LoggingHandler`] registered.
    pub fn with_logging() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: SessionEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Challenge(challenge) => {
                log::info!(
                    "challenge {} via {} success={}",
                    challenge.challenge_type,
                    challenge.resolver,
                    challenge.success
                );
            }
            SessionEvent::Retry(retry) => {
                log::info!(
                    "retry {} attempt {}: {}",
                    retry.method,
                    retry.attempt,
                    retry.reason
                );
            }
            SessionEvent::Credential(credential) => match credential.change {
                CredentialChange::Acquired => log::info!("access token {} acquired", credential.token),
                CredentialChange::Invalidated => {
                    log::info!("access token {} invalidated", credential.token)
                }
            },
            SessionEvent::Error(error) => {
                log::warn!("{} failed: {}", error.method, error.error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::sync::Mutex<usize>);

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &SessionEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn dispatches_to_handlers() {
        let mut dispatcher = EventDispatcher::with_logging();
        let counter = Arc::new(CountingHandler(std::sync::Mutex::new(0)));
        dispatcher.register_handler(counter.clone());
        dispatcher.dispatch(SessionEvent::error("users.get", "timeout"));
        dispatcher.dispatch(SessionEvent::retry("users.get", 2, "captcha needed"));
        assert_eq!(*counter.0.lock().unwrap(), 2);
    }
}

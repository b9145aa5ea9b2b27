//! Scripted transport used by unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use url::Url;

use super::{HttpTransport, TransportError, TransportRequest, TransportResponse};

pub(crate) struct StubTransport {
    this: Weak<StubTransport>,
    replies: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    requests: Mutex<Vec<TransportRequest>>,
    cookies: Mutex<Vec<(String, String)>>,
    fresh_sessions: Mutex<usize>,
}

impl StubTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            cookies: Mutex::new(Vec::new()),
            fresh_sessions: Mutex::new(0),
        })
    }

    /// Queue a 200 response whose final URL is `url`.
    pub(crate) fn reply(&self, url: &str, body: &str) -> &Self {
        let response = TransportResponse::new(200, Url::parse(url).unwrap(), body.to_string());
        self.replies.lock().unwrap().push_back(Ok(response));
        self
    }

    pub(crate) fn fail(&self, err: TransportError) -> &Self {
        self.replies.lock().unwrap().push_back(Err(err));
        self
    }

    pub(crate) fn set_cookie(&self, name: &str, value: &str) {
        self.cookies
            .lock()
            .unwrap()
            .push((name.to_string(), value.to_string()));
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn fresh_sessions(&self) -> usize {
        *self.fresh_sessions.lock().unwrap()
    }

    pub(crate) fn pending(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no more stub responses for {}", request.url));
        reply.map(|response| {
            let cookies = self.cookies.lock().unwrap().clone();
            response.with_cookies(cookies)
        })
    }

    fn cookies(&self, _url: &Url) -> Vec<(String, String)> {
        self.cookies.lock().unwrap().clone()
    }

    fn fresh_session(&self) -> Result<Arc<dyn HttpTransport>, TransportError> {
        *self.fresh_sessions.lock().unwrap() += 1;
        let this = self.this.upgrade().expect("stub transport dropped");
        Ok(this)
    }
}

//! Reqwest-based implementation of the `HttpTransport` trait.
//!
//! Thin adapter around `reqwest::Client` with an explicit cookie jar so the
//! login flow can inspect session cookies, and with request/response debug
//! logging.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use http::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Proxy};
use url::Url;

use super::{
    HttpTransport, RequestBody, TransportError, TransportRequest, TransportResponse,
    parse_cookie_header,
};
use crate::config::HttpParams;

/// Reqwest-backed transport used by default.
pub struct ReqwestTransport {
    client: Client,
    jar: Arc<Jar>,
    params: HttpParams,
}

impl ReqwestTransport {
    /// Build a client honouring `params`, with an empty cookie jar.
    pub fn new(params: HttpParams) -> Result<Self, TransportError> {
        let jar = Arc::new(Jar::default());
        let client = build_client(&params, jar.clone())?;
        Ok(Self {
            client,
            jar,
            params,
        })
    }

    pub fn params(&self) -> &HttpParams {
        &self.params
    }
}

fn build_client(params: &HttpParams, jar: Arc<Jar>) -> Result<Client, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    for (name, value) in &params.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| TransportError::InvalidHeader(name.clone()))?;
        headers.insert(header_name, header_value);
    }

    let mut builder = Client::builder()
        .cookie_provider(jar)
        .default_headers(headers)
        .timeout(params.timeout)
        .danger_accept_invalid_certs(!params.verify_tls);

    if let Some(agent) = &params.user_agent {
        builder = builder.user_agent(agent.clone());
    }

    if let Some(endpoint) = &params.proxy {
        let proxy =
            Proxy::all(endpoint).map_err(|err| TransportError::Request(err.to_string()))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|err| TransportError::Request(err.to_string()))
}

fn map_error(err: reqwest::Error, url: &Url) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(url.clone())
    } else {
        TransportError::Request(err.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        log::debug!(
            "Request: {} {}, data={}",
            request.method,
            request.url,
            request.describe_body()
        );

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Json(value) => builder.json(value),
        };
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|err| map_error(err, &request.url))?;

        let status = response.status();
        let url = response.url().clone();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| map_error(err, &url))?;

        log::debug!(
            "Response: {} {} ({:.2}s)",
            status.as_u16(),
            url,
            started.elapsed().as_secs_f64()
        );

        if !(status.is_success() || status.is_redirection()) {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let cookies = self.cookies(&url);
        Ok(TransportResponse {
            status: status.as_u16(),
            url,
            headers,
            body,
            cookies,
        })
    }

    fn cookies(&self, url: &Url) -> Vec<(String, String)> {
        self.jar
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(parse_cookie_header))
            .unwrap_or_default()
    }

    fn fresh_session(&self) -> Result<Arc<dyn HttpTransport>, TransportError> {
        Ok(Arc::new(ReqwestTransport::new(self.params.clone())?))
    }
}

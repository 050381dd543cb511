//! HTTP transport used by every REST call, health probe and long-poll.
//!
//! Components only see [`HttpTransport`], so the long-poll timeout, the probe
//! timeout and ordinary call timeouts travel with each request instead of
//! living in one shared client.

use crate::error::{NacosError, Result};
use async_trait::async_trait;
use reqwest::Method;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: vec![],
            form: vec![],
            headers: vec![],
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn query(mut self, pairs: Vec<(String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.form.extend(pairs);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Value of a query or form parameter, query first.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .chain(self.form.iter())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Converts a non-200 status into the matching registry error.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(NacosError::from_status(self.status, &self.body))
        }
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Performs the request. Transport failures are `Err`, any HTTP status
    /// (including errors) is `Ok` and left to the caller to interpret.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::ClientBuilder::default()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        log::debug!(
            "{} {}, query: {:?}",
            request.method,
            request.url,
            request.query
        );
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(request.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = HttpRequest::post("http://127.0.0.1:8848/nacos/v1/cs/configs")
            .query(vec![("dataId".into(), "app.properties".into())])
            .form(vec![("content".into(), "a=1".into())])
            .header("Long-Pulling-Timeout", "30000")
            .timeout(Duration::from_secs(40));
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.param("dataId"), Some("app.properties"));
        assert_eq!(req.param("content"), Some("a=1"));
        assert_eq!(req.param("missing"), None);
        assert_eq!(req.timeout, Duration::from_secs(40));
        assert_eq!(req.headers.len(), 1);
    }

    #[test]
    fn test_error_for_status() {
        assert!(HttpResponse::ok("ok").error_for_status().is_ok());
        let err = HttpResponse {
            status: 403,
            body: b"denied".to_vec(),
        }
        .error_for_status()
        .unwrap_err();
        assert!(matches!(err, NacosError::Forbidden(m) if m == "denied"));
    }
}

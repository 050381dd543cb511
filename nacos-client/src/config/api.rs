//! Config REST surface under `/nacos/v1/cs`.

use crate::error::{NacosError, Result};
use crate::lb::{self, LoadBalancer};
use crate::network::{HttpRequest, HttpResponse, HttpTransport};
use crate::protocol::{ConfigQuery, ListenKey, parse_listen_keys};
use std::sync::Arc;
use std::time::Duration;

const CONFIG_PATH: &str = "nacos/v1/cs/configs";
const LISTENER_PATH: &str = "nacos/v1/cs/configs/listener";
const LONG_POLL_HEADER: &str = "Long-Pulling-Timeout";
const LISTENING_CONFIGS: &str = "Listening-Configs";

/// How long the server holds a listen call open.
pub const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(30);
/// Added on top of the hold time for the client side timeout.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ConfigHttpClient {
    lb: Arc<dyn LoadBalancer>,
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
    long_poll_timeout: Duration,
}

impl ConfigHttpClient {
    pub fn new(
        lb: Arc<dyn LoadBalancer>,
        transport: Arc<dyn HttpTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            lb,
            transport,
            timeout,
            long_poll_timeout: DEFAULT_LONG_POLL_TIMEOUT,
        }
    }

    pub fn with_long_poll_timeout(mut self, long_poll_timeout: Duration) -> Self {
        self.long_poll_timeout = long_poll_timeout;
        self
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.transport.execute(request).await?.error_for_status()
    }

    /// Raw content of one config file.
    pub async fn get(&self, query: &ConfigQuery) -> Result<Vec<u8>> {
        let url = lb::select_url(self.lb.as_ref(), CONFIG_PATH)?;
        let request = HttpRequest::get(url)
            .query(query.to_query())
            .timeout(self.timeout);
        let response = self.send(request).await?;
        log::debug!("config {}@{} fetched", query.data_id, query.group);
        Ok(response.body)
    }

    /// Blocks until one of `keys` changes on the server or the hold time
    /// elapses. Returns the changed keys, empty when nothing changed.
    pub async fn listen(&self, keys: &[ListenKey]) -> Result<Vec<ListenKey>> {
        let url = lb::select_url(self.lb.as_ref(), LISTENER_PATH)?;
        let listening: String = keys.iter().map(ListenKey::line).collect();
        let request = HttpRequest::post(url)
            .form(vec![(LISTENING_CONFIGS.to_string(), listening)])
            .header(
                LONG_POLL_HEADER,
                self.long_poll_timeout.as_millis().to_string(),
            )
            .timeout(self.long_poll_timeout + LONG_POLL_GRACE);
        let response = self.send(request).await?;
        Ok(parse_listen_keys(&unescape(&response.text())))
    }

    /// Creates or overwrites a config file.
    pub async fn publish(&self, query: &ConfigQuery, content: &str) -> Result<()> {
        let url = lb::select_url(self.lb.as_ref(), CONFIG_PATH)?;
        let request = HttpRequest::post(url)
            .form(query.to_publish_form(content))
            .timeout(self.timeout);
        expect_true(self.send(request).await?)?;
        log::info!("config {}@{} published", query.data_id, query.group);
        Ok(())
    }

    pub async fn delete(&self, query: &ConfigQuery) -> Result<()> {
        let url = lb::select_url(self.lb.as_ref(), CONFIG_PATH)?;
        let request = HttpRequest::delete(url)
            .query(query.to_query())
            .timeout(self.timeout);
        expect_true(self.send(request).await?)?;
        log::info!("config {}@{} deleted", query.data_id, query.group);
        Ok(())
    }
}

fn expect_true(response: HttpResponse) -> Result<()> {
    let text = response.text();
    if text.trim() == "true" {
        Ok(())
    } else {
        Err(NacosError::Rejected(text))
    }
}

/// The listener answer is form-escaped as a whole.
fn unescape(body: &str) -> String {
    url::form_urlencoded::parse(format!("v={}", body.trim()).as_bytes())
        .map(|(_, v)| v.into_owned())
        .next()
        .unwrap_or_default()
}

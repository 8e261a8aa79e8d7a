use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use adscout_core::error::AppError;
use adscout_core::traits::{HttpRequest, HttpResponse, HttpTransport};
use reqwest::{Client, Proxy};
use url::Url;

const USER_AGENT: &str = "adscout/0.1";

/// HTTP transport using reqwest.
///
/// Keeps one connection pool for direct requests and one per proxy URL, so
/// each credential bound to a proxy always leaves through that proxy.
#[derive(Clone)]
pub struct ReqwestTransport {
    direct: Client,
    proxied: Arc<Mutex<HashMap<String, Client>>>,
    connect_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AppError> {
        Self::with_connect_timeout(Duration::from_secs(10))
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            direct: build_client(None, connect_timeout)?,
            proxied: Arc::new(Mutex::new(HashMap::new())),
            connect_timeout,
        })
    }

    fn lock_proxied(&self) -> MutexGuard<'_, HashMap<String, Client>> {
        self.proxied.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned proxy client mutex");
            poisoned.into_inner()
        })
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, AppError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };
        if let Some(client) = self.lock_proxied().get(proxy) {
            return Ok(client.clone());
        }
        let client = build_client(Some(proxy), self.connect_timeout)?;
        self.lock_proxied()
            .entry(proxy.to_string())
            .or_insert_with(|| client.clone());
        Ok(client)
    }
}

fn build_client(proxy: Option<&str>, connect_timeout: Duration) -> Result<Client, AppError> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout);
    if let Some(proxy) = proxy {
        let proxy = Proxy::all(proxy)
            .map_err(|e| AppError::ConfigError(format!("Invalid proxy URL: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| AppError::HttpError(e.to_string()))
}

impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AppError> {
        let client = self.client_for(request.proxy.as_deref())?;
        let timeout_secs = request.timeout.as_secs();
        let url = Url::parse_with_params(&request.url, &request.query)
            .map_err(|e| AppError::HttpError(format!("Invalid URL '{}': {e}", request.url)))?;

        let response = client
            .get(url)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else if e.is_request() {
                    AppError::NetworkError(e.to_string())
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read response body: {e}")))?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_clients_are_cached() {
        let transport = ReqwestTransport::new().unwrap();
        transport.client_for(Some("http://127.0.0.1:8080")).unwrap();
        transport.client_for(Some("http://127.0.0.1:8080")).unwrap();
        transport.client_for(Some("socks5://127.0.0.1:1080")).unwrap();
        transport.client_for(None).unwrap();
        assert_eq!(transport.lock_proxied().len(), 2);
    }

    #[test]
    fn test_invalid_proxy_is_config_error() {
        let transport = ReqwestTransport::new().unwrap();
        let err = transport.client_for(Some("::not a url::")).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}

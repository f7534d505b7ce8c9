//! HTTP/JSON driver
//!
//! Addresses resources by path below a base URL. `GET` reads a JSON
//! document, `PUT` writes one.

use super::{DeviceDriver, RawData};
use crate::error::{GatewayError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::request::AddressWindow;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::collections::BTreeMap;
use std::time::Duration;

pub struct HttpDriver {
    base_url: String,
    timeout: Option<Duration>,
    headers: HeaderMap,
    client: Option<reqwest::Client>,
    logger: StructuredLogger,
}

impl HttpDriver {
    pub fn new(
        device: &str,
        base_url: &str,
        timeout: Option<Duration>,
        extra_headers: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("devgate/", env!("CARGO_PKG_VERSION"))),
        );
        for (name, value) in extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| GatewayError::config(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                GatewayError::config(format!("Invalid value for header '{}': {}", name, e))
            })?;
            headers.insert(name, value);
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            headers,
            client: None,
            logger: get_logger_with_context(LogContext::new("http").with_device(device)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn endpoint(window: &AddressWindow) -> Result<&str> {
        match window {
            AddressWindow::Endpoint { path } => Ok(path),
            AddressWindow::Registers { .. } => Err(GatewayError::invalid_request(
                "HTTP devices are addressed by endpoint paths",
            )),
        }
    }

    fn get_client(&self) -> Result<&reqwest::Client> {
        self.client
            .as_ref()
            .ok_or_else(|| GatewayError::not_connected("HTTP client not initialized"))
    }

    /// Drop the client after transport failures so the next attempt rebuilds it
    fn transport_failure(&mut self, err: reqwest::Error) -> GatewayError {
        let err = GatewayError::from(err);
        if err.is_transient() {
            self.client = None;
        }
        err
    }
}

/// Map a non-success HTTP status to the gateway taxonomy
pub fn status_error(method: &str, url: &str, status: StatusCode) -> GatewayError {
    let message = format!("{} {} returned {}", method, url, status);
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        GatewayError::timeout(message)
    } else if status == StatusCode::NOT_FOUND
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        GatewayError::unavailable(message)
    } else {
        GatewayError::device_fault(message)
    }
}

#[async_trait::async_trait]
impl DeviceDriver for HttpDriver {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn supports(&self, window: &AddressWindow) -> bool {
        matches!(window, AddressWindow::Endpoint { .. })
    }

    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let mut builder = reqwest::Client::builder().default_headers(self.headers.clone());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        self.client = Some(client);
        self.logger
            .info(&format!("HTTP client ready for {}", self.base_url));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.client.take().is_some() {
            self.logger.info("HTTP client released");
        }
        Ok(())
    }

    async fn read(&mut self, window: &AddressWindow) -> Result<RawData> {
        let url = self.url(Self::endpoint(window)?);
        self.logger.debug(&format!("GET {}", url));

        let client = self.get_client()?.clone();
        let resp = match client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => return Err(self.transport_failure(e)),
        };
        let status = resp.status();
        if !status.is_success() {
            let err = status_error("GET", &url, status);
            self.logger.warn(&err.to_string());
            return Err(err);
        }

        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => return Err(self.transport_failure(e)),
        };
        let doc: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
            GatewayError::decoding(format!("Response from {} is not valid JSON: {}", url, e))
        })?;
        Ok(RawData::Json(doc))
    }

    async fn write(&mut self, window: &AddressWindow, data: &RawData) -> Result<()> {
        let url = self.url(Self::endpoint(window)?);
        let RawData::Json(body) = data else {
            return Err(GatewayError::invalid_request(
                "HTTP writes take a JSON document",
            ));
        };
        self.logger.debug(&format!("PUT {}", url));

        let client = self.get_client()?.clone();
        let resp = match client.put(&url).json(body).send().await {
            Ok(resp) => resp,
            Err(e) => return Err(self.transport_failure(e)),
        };
        let status = resp.status();
        if !status.is_success() {
            let err = status_error("PUT", &url, status);
            self.logger.warn(&err.to_string());
            return Err(err);
        }
        Ok(())
    }
}

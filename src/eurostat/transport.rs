use std::io::Read;
use std::sync::Arc;

use tracing::debug;

use crate::config::RequestConfig;
use crate::error::{ConfigError, TransportError};

/// What came back from one GET, whatever the status code.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// URL after redirects.
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn contains(&self, marker: &[u8]) -> bool {
        !marker.is_empty() && self.body.windows(marker.len()).any(|w| w == marker)
    }
}

/// A blocking HTTP GET. HTTP error statuses are responses, not errors.
pub trait Transport {
    fn get(&self, url: &str) -> Result<RawResponse, TransportError>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(config: &RequestConfig) -> Result<UreqTransport, ConfigError> {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        let mut builder = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(super::USER_AGENT)
            .tls_connector(Arc::new(tls));

        if let Some(proxy) = &config.proxy {
            let proxy = ureq::Proxy::new(proxy).map_err(|e| ConfigError::InvalidProxy {
                proxy: proxy.clone(),
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }

        Ok(UreqTransport { agent: builder.build() })
    }

    fn read(response: ureq::Response) -> Result<RawResponse, TransportError> {
        let url = response.get_url().to_owned();
        let status = response.status();
        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| TransportError::new(format!("failed to read response body: {}", e)))?;

        Ok(RawResponse { url, status, body })
    }
}

impl Transport for UreqTransport {
    fn get(&self, url: &str) -> Result<RawResponse, TransportError> {
        debug!(url, "GET");
        match self.agent.get(url).call() {
            Ok(response) => UreqTransport::read(response),
            Err(ureq::Error::Status(_, response)) => UreqTransport::read(response),
            Err(ureq::Error::Transport(transport)) => Err(TransportError::new(transport.to_string())),
        }
    }
}

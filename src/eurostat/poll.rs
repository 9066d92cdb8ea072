//! Waiting on requests the server answered with an async job ticket instead of data.

use std::fmt;
use std::thread;
use std::time::Instant;

use tracing::{debug, warn};

use super::fetch::{fault_error, is_fault, parse_xml, Client};
use super::transport::RawResponse;
use super::xml::Element;
use super::Provider;
use crate::error::{EurostatError, Result};

const ASYNC_STATUS_PATH: &str = "Body/asyncResponse/status/status";
const ASYNC_KEY_PATH: &str = "Body/asyncResponse/status/key";
const SYNC_STATUS_PATH: &str = "Body/syncResponse/queued/status";
const SYNC_KEY_PATH: &str = "Body/syncResponse/queued/id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncStatus {
    Submitted,
    Processing,
    Available,
    Expired,
    UnknownRequest,
    Unrecognized(String),
}

impl AsyncStatus {
    pub fn parse(s: &str) -> AsyncStatus {
        match s.trim() {
            "SUBMITTED" => AsyncStatus::Submitted,
            "PROCESSING" => AsyncStatus::Processing,
            "AVAILABLE" => AsyncStatus::Available,
            "EXPIRED" => AsyncStatus::Expired,
            "UNKNOWN_REQUEST" => AsyncStatus::UnknownRequest,
            other => AsyncStatus::Unrecognized(other.to_owned()),
        }
    }
}

impl fmt::Display for AsyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncStatus::Submitted => write!(f, "SUBMITTED"),
            AsyncStatus::Processing => write!(f, "PROCESSING"),
            AsyncStatus::Available => write!(f, "AVAILABLE"),
            AsyncStatus::Expired => write!(f, "EXPIRED"),
            AsyncStatus::UnknownRequest => write!(f, "UNKNOWN_REQUEST"),
            AsyncStatus::Unrecognized(s) => write!(f, "{}", s),
        }
    }
}

/// The two envelope layouts a queued request can come back in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketShape {
    Async,
    SyncQueued,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub key: String,
    pub status: AsyncStatus,
    pub shape: TicketShape,
}

impl Ticket {
    pub fn from_envelope(url: &str, root: &Element) -> Result<Ticket> {
        let (status, shape) = match (root.find_text(ASYNC_STATUS_PATH), root.find_text(SYNC_STATUS_PATH)) {
            (Some(status), _) => (status, TicketShape::Async),
            (None, Some(status)) => (status, TicketShape::SyncQueued),
            (None, None) => return Err(protocol(url, "status path not found")),
        };
        let key = match (root.find_text(ASYNC_KEY_PATH), root.find_text(SYNC_KEY_PATH)) {
            (Some(key), _) | (None, Some(key)) => key,
            (None, None) => return Err(protocol(url, "key path not found")),
        };

        Ok(Ticket {
            key: key.trim().to_owned(),
            status: AsyncStatus::parse(status),
            shape,
        })
    }
}

fn protocol(url: &str, reason: &str) -> EurostatError {
    warn!(url, "unexpected async response: {}", reason);
    EurostatError::Protocol { url: url.to_owned(), reason: reason.to_owned() }
}

fn check(ticket: &Ticket) -> Result<()> {
    match &ticket.status {
        AsyncStatus::Expired | AsyncStatus::UnknownRequest => Err(EurostatError::AsyncJob {
            key: ticket.key.clone(),
            status: ticket.status.to_string(),
        }),
        AsyncStatus::Unrecognized(status) => {
            warn!(key = %ticket.key, "unexpected async status: {}", status);
            Err(EurostatError::AsyncJob { key: ticket.key.clone(), status: status.clone() })
        }
        _ => Ok(()),
    }
}

/// Polls the job's status endpoint until it is `AVAILABLE`, then fetches its data.
pub(crate) fn wait_for(client: &Client, provider: Provider, ticket: Ticket) -> Result<RawResponse> {
    let status_url = format!("{}status/{}", provider.async_url(), ticket.key);
    let config = client.config();
    let started = Instant::now();
    let mut ticket = ticket;

    while ticket.status != AsyncStatus::Available {
        check(&ticket)?;

        if started.elapsed() >= config.poll_timeout {
            return Err(EurostatError::AsyncTimeout { key: ticket.key, waited: started.elapsed() });
        }
        thread::sleep(config.poll_interval);

        let response = client
            .fetch_raw(&status_url, true)?
            .ok_or_else(|| protocol(&status_url, "empty status response"))?;
        if is_fault(&response) {
            return Err(fault_error(&status_url, &response));
        }
        let root = parse_xml(&status_url, &response.body)?;
        let status = root
            .find_text(ASYNC_STATUS_PATH)
            .or_else(|| root.find_text(SYNC_STATUS_PATH))
            .ok_or_else(|| protocol(&status_url, "status path not found"))?;

        ticket.status = AsyncStatus::parse(status);
        debug!(key = %ticket.key, status = %ticket.status, "polled async job");
    }

    let data_url = status_url.replacen("/status/", "/data/", 1);
    client
        .fetch(&data_url, provider, true)?
        .ok_or_else(|| protocol(&data_url, "async job data is empty"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestConfig;
    use crate::eurostat::testing::{self, async_status_xml, fault_xml, ok, status, sync_queued_xml, ScriptedTransport};
    use std::rc::Rc;
    use std::time::Duration;

    const URL: &str = "https://ec.europa.eu/eurostat/api/dissemination/sdmx/2.1/data/big";
    const STATUS_URL: &str = "https://ec.europa.eu/eurostat/api/dissemination/1.0/async/status/k-42";
    const DATA_URL: &str = "https://ec.europa.eu/eurostat/api/dissemination/1.0/async/data/k-42";

    #[test]
    fn test_polls_until_available_then_fetches_data() {
        let transport = Rc::new(
            ScriptedTransport::new()
                .on(URL, ok(URL, async_status_xml("SUBMITTED", "k-42")))
                .on(STATUS_URL, ok(STATUS_URL, async_status_xml("PROCESSING", "k-42")))
                .on(STATUS_URL, ok(STATUS_URL, async_status_xml("AVAILABLE", "k-42")))
                .on(DATA_URL, ok(DATA_URL, "the payload")),
        );
        let client = testing::client(transport.clone());

        let response = client.fetch(URL, Provider::Eurostat, true).unwrap().unwrap();
        assert_eq!(response.body, b"the payload");
        assert_eq!(transport.requests(), vec![URL, STATUS_URL, STATUS_URL, DATA_URL]);
    }

    #[test]
    fn test_expired_job_fails_before_data() {
        let transport = Rc::new(
            ScriptedTransport::new()
                .on(URL, ok(URL, sync_queued_xml("SUBMITTED", "k-42")))
                .on(STATUS_URL, ok(STATUS_URL, async_status_xml("EXPIRED", "k-42"))),
        );
        let client = testing::client(transport.clone());

        match client.fetch(URL, Provider::Eurostat, true) {
            Err(EurostatError::AsyncJob { key, status }) => {
                assert_eq!(key, "k-42");
                assert_eq!(status, "EXPIRED");
            }
            other => panic!("expected async job error, got {:?}", other),
        }
        assert!(!transport.requests().iter().any(|u| u == DATA_URL));
    }

    #[test]
    fn test_unrecognized_status_is_fatal() {
        let transport = Rc::new(
            ScriptedTransport::new()
                .on(URL, ok(URL, async_status_xml("SUBMITTED", "k-42")))
                .on(STATUS_URL, ok(STATUS_URL, async_status_xml("PAUSED", "k-42"))),
        );
        let client = testing::client(transport);

        assert!(matches!(
            client.fetch(URL, Provider::Eurostat, true),
            Err(EurostatError::AsyncJob { status, .. }) if status == "PAUSED"
        ));
    }

    #[test]
    fn test_fault_on_status_endpoint_is_reported_as_fault() {
        let transport = Rc::new(
            ScriptedTransport::new()
                .on(URL, ok(URL, async_status_xml("SUBMITTED", "k-42")))
                .on(STATUS_URL, status(STATUS_URL, 500, fault_xml("S:Server", "Internal error"))),
        );
        let client = testing::client(transport.clone());

        match client.fetch(URL, Provider::Eurostat, true) {
            Err(EurostatError::Fault { status, details, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(details, vec!["faultcode: S:Server", "faultstring: Internal error"]);
            }
            other => panic!("expected fault, got {:?}", other),
        }
        assert_eq!(transport.requests(), vec![URL, STATUS_URL]);
    }

    #[test]
    fn test_sync_queued_shape() {
        let root = Element::parse(sync_queued_xml("PROCESSING", "k-7").as_bytes()).unwrap();
        let ticket = Ticket::from_envelope(URL, &root).unwrap();
        assert_eq!(ticket.key, "k-7");
        assert_eq!(ticket.status, AsyncStatus::Processing);
        assert_eq!(ticket.shape, TicketShape::SyncQueued);
    }

    #[test]
    fn test_missing_key_is_protocol_error() {
        let body = r#"<Envelope><Body><asyncResponse><status><status>SUBMITTED</status></status></asyncResponse></Body></Envelope>"#;
        let root = Element::parse(body.as_bytes()).unwrap();
        assert!(matches!(
            Ticket::from_envelope(URL, &root),
            Err(EurostatError::Protocol { reason, .. }) if reason == "key path not found"
        ));
    }

    #[test]
    fn test_poll_timeout() {
        let transport = Rc::new(
            ScriptedTransport::new()
                .on(URL, ok(URL, async_status_xml("SUBMITTED", "k-42")))
                .on(STATUS_URL, ok(STATUS_URL, async_status_xml("PROCESSING", "k-42"))),
        );
        let config = RequestConfig {
            poll_interval: Duration::ZERO,
            poll_timeout: Duration::ZERO,
            ..RequestConfig::default()
        };
        let client = Client::with_transport(config, Box::new(transport.clone()));

        assert!(matches!(
            client.fetch(URL, Provider::Eurostat, true),
            Err(EurostatError::AsyncTimeout { .. })
        ));
        assert_eq!(transport.requests(), vec![URL]);
    }
}

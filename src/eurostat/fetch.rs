use tracing::{debug, error, warn};

use super::poll::{self, Ticket};
use super::transport::{RawResponse, Transport, UreqTransport};
use super::xml::Element;
use super::{Provider, SORRY_URL};
use crate::config::RequestConfig;
use crate::error::{ConfigError, EurostatError, Result};

const MAX_ATTEMPTS: u32 = 4;

const FAULT_MARKER: &[u8] = b"<S:Fault";
const ASYNC_MARKER: &[u8] = b"status></";

/// What a response body turned out to be.
#[derive(Debug)]
pub(crate) enum Classified {
    Plain(RawResponse),
    Fault(RawResponse),
    Queued(Ticket),
}

/// Entry point for every request; owns the transport and the request options.
pub struct Client {
    transport: Box<dyn Transport>,
    config: RequestConfig,
}

impl Client {
    pub fn new(config: RequestConfig) -> std::result::Result<Client, ConfigError> {
        let transport = UreqTransport::new(&config)?;
        Ok(Client::with_transport(config, Box::new(transport)))
    }

    pub fn with_transport(config: RequestConfig, transport: Box<dyn Transport>) -> Client {
        Client { transport, config }
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// GET with up to four attempts. Only transport errors are retried; any
    /// response, whatever its status, ends the loop. With no response at all, the
    /// last transport error is returned if `raise_on_failure`, otherwise `None`.
    pub(crate) fn fetch_raw(&self, url: &str, raise_on_failure: bool) -> Result<Option<RawResponse>> {
        let mut last_error = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.transport.get(url) {
                Ok(response) => {
                    if response.url == SORRY_URL {
                        error!(url, "the server is temporarily unavailable");
                        return Err(EurostatError::ServiceUnavailable { url: url.to_owned() });
                    }
                    if !response.is_success() {
                        debug!(url, status = response.status, "unsuccessful response");
                    }
                    return Ok(Some(response));
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "request failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(source) if raise_on_failure => Err(EurostatError::Transport { url: url.to_owned(), source }),
            _ => Ok(None),
        }
    }

    /// [`Client::fetch_raw`] plus body inspection: faults become `None` or an error,
    /// queued async jobs are waited for and replaced by their payload.
    pub fn fetch(&self, url: &str, provider: Provider, raise_on_failure: bool) -> Result<Option<RawResponse>> {
        let response = match self.fetch_raw(url, raise_on_failure)? {
            Some(r) => r,
            None => return Ok(None),
        };

        match classify(url, response)? {
            Classified::Plain(response) => Ok(Some(response)),
            Classified::Fault(response) if response.is_success() => {
                debug!(url, "fault on successful response, treating as no data");
                Ok(None)
            }
            Classified::Fault(_) if !raise_on_failure => Ok(None),
            Classified::Fault(response) => Err(fault_error(url, &response)),
            Classified::Queued(ticket) => {
                debug!(url, key = %ticket.key, status = %ticket.status, "request queued as async job");
                poll::wait_for(self, provider, ticket).map(Some)
            }
        }
    }

    /// Like [`Client::fetch`] with `raise_on_failure`, but a non-success status is an error.
    pub(crate) fn fetch_ok(&self, url: &str, provider: Provider) -> Result<Option<RawResponse>> {
        match self.fetch(url, provider, true)? {
            Some(r) if !r.is_success() => Err(EurostatError::HttpStatus { url: url.to_owned(), status: r.status }),
            other => Ok(other),
        }
    }
}

pub(crate) fn classify(url: &str, response: RawResponse) -> Result<Classified> {
    if is_fault(&response) {
        Ok(Classified::Fault(response))
    } else if response.contains(ASYNC_MARKER) {
        let root = parse_xml(url, &response.body)?;
        Ok(Classified::Queued(Ticket::from_envelope(url, &root)?))
    } else {
        Ok(Classified::Plain(response))
    }
}

pub(crate) fn parse_xml(url: &str, body: &[u8]) -> Result<Element> {
    Element::parse(body).map_err(|reason| EurostatError::Xml { url: url.to_owned(), reason })
}

pub(crate) fn is_fault(response: &RawResponse) -> bool {
    response.contains(FAULT_MARKER)
}

/// Logs each child of the fault element and wraps them in a `Fault` error.
pub(crate) fn fault_error(url: &str, response: &RawResponse) -> EurostatError {
    let details = fault_details(response);
    for detail in &details {
        error!(url, "{}", detail);
    }
    EurostatError::Fault {
        url: url.to_owned(),
        status: response.status,
        details,
    }
}

fn fault_details(response: &RawResponse) -> Vec<String> {
    let root = match Element::parse(&response.body) {
        Ok(root) => root,
        Err(_) => return vec![String::from_utf8_lossy(&response.body).into_owned()],
    };
    let fault = root.find("Body/Fault").unwrap_or(&root);
    fault
        .children
        .iter()
        .map(|el| format!("{}: {}", el.name, el.text))
        .collect()
}

//! Scripted transport and SDMX fixtures shared by the unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;

use super::fetch::Client;
use super::transport::{RawResponse, Transport};
use super::Provider;
use crate::config::RequestConfig;
use crate::error::TransportError;

type Reply = Result<RawResponse, TransportError>;

/// Replies are queued per exact URL; the last reply of a queue repeats.
/// Unknown URLs answer 404 with an empty body.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: RefCell<Vec<(String, VecDeque<Reply>)>>,
    requests: RefCell<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> ScriptedTransport {
        ScriptedTransport::default()
    }

    pub fn on(self, url: impl Into<String>, reply: Reply) -> ScriptedTransport {
        let url = url.into();
        {
            let mut routes = self.routes.borrow_mut();
            match routes.iter_mut().find(|(u, _)| *u == url) {
                Some((_, queue)) => queue.push_back(reply),
                None => routes.push((url, VecDeque::from(vec![reply]))),
            }
        }
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, url: &str) -> Result<RawResponse, TransportError> {
        self.requests.borrow_mut().push(url.to_owned());
        let mut routes = self.routes.borrow_mut();
        match routes.iter_mut().find(|(u, _)| u == url) {
            Some((_, queue)) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| Ok(not_found(url))),
            Some((_, queue)) => queue.front().cloned().unwrap_or_else(|| Ok(not_found(url))),
            None => Ok(not_found(url)),
        }
    }
}

impl Transport for std::rc::Rc<ScriptedTransport> {
    fn get(&self, url: &str) -> Result<RawResponse, TransportError> {
        self.as_ref().get(url)
    }
}

/// A client over `transport` that polls without sleeping.
pub fn client(transport: std::rc::Rc<ScriptedTransport>) -> Client {
    let config = RequestConfig {
        poll_interval: Duration::ZERO,
        ..RequestConfig::default()
    };
    Client::with_transport(config, Box::new(transport))
}

pub fn ok(url: &str, body: impl Into<Vec<u8>>) -> Reply {
    Ok(RawResponse { url: url.to_owned(), status: 200, body: body.into() })
}

pub fn status(url: &str, status: u16, body: impl Into<Vec<u8>>) -> Reply {
    Ok(RawResponse { url: url.to_owned(), status, body: body.into() })
}

pub fn not_found(url: &str) -> RawResponse {
    RawResponse { url: url.to_owned(), status: 404, body: Vec::new() }
}

pub fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

pub fn dataflow_url(provider: Provider, code: &str) -> String {
    format!("{}dataflow/{}/{}/latest", provider.base_url(), provider.agency(), code)
}

pub fn dataflow_descr_url(provider: Provider, code: &str) -> String {
    format!(
        "{}?detail=referencepartial&references=descendants",
        dataflow_url(provider, code)
    )
}

pub fn datastructure_url(provider: Provider, dsd: &str) -> String {
    format!("{}datastructure/{}/{}/latest", provider.base_url(), provider.agency(), dsd)
}

const HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<m:Structure xmlns:m="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message" xmlns:s="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/structure" xmlns:c="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/common">
<m:Header><m:ID>IREF</m:ID><m:Test>false</m:Test></m:Header>
<m:Structures>"#;

const TAIL: &str = "</m:Structures></m:Structure>";

/// Dataflow `code` pointing at data structure `dsd`, optionally with codelists
/// given as (id, [(lang, name)], description).
pub fn dataflow_xml(code: &str, dsd: &str, codelists: &[(&str, &[(&str, &str)], &str)]) -> String {
    let mut xml = String::from(HEAD);
    xml.push_str(&format!(
        r#"<s:Dataflows><s:Dataflow id="{code}" agencyID="ESTAT" version="1.0"><c:Name xml:lang="en">{code}</c:Name><s:Structure><Ref id="{dsd}" version="3.0" agencyID="ESTAT" package="datastructure" class="DataStructure"/></s:Structure></s:Dataflow></s:Dataflows>"#,
        code = code,
        dsd = dsd
    ));
    if !codelists.is_empty() {
        xml.push_str("<s:Codelists>");
        for (id, names, description) in codelists {
            xml.push_str(&format!(r#"<s:Codelist id="{}" agencyID="ESTAT" version="1.0">"#, id));
            for (lang, name) in names.iter() {
                if lang.is_empty() {
                    xml.push_str(&format!("<c:Name>{}</c:Name>", name));
                } else {
                    xml.push_str(&format!(r#"<c:Name xml:lang="{}">{}</c:Name>"#, lang, name));
                }
            }
            xml.push_str(&format!("<c:Description>{}</c:Description></s:Codelist>", description));
        }
        xml.push_str("</s:Codelists>");
    }
    xml.push_str(TAIL);
    xml
}

/// Data structure with dimensions given as (id, position, codelist).
pub fn datastructure_xml(dsd: &str, dimensions: &[(&str, u32, &str)]) -> String {
    let mut xml = String::from(HEAD);
    xml.push_str(&format!(
        r#"<s:DataStructures><s:DataStructure id="{}" agencyID="ESTAT" version="3.0"><s:DataStructureComponents><s:DimensionList id="DimensionDescriptor">"#,
        dsd
    ));
    for (id, position, codelist) in dimensions {
        xml.push_str(&format!(
            r#"<s:Dimension id="{}" position="{}"><s:ConceptIdentity><Ref id="{}" maintainableParentID="CONCEPTS" class="Concept"/></s:ConceptIdentity><s:LocalRepresentation><s:Enumeration><Ref id="{}" version="1.0" agencyID="ESTAT" package="codelist" class="Codelist"/></s:Enumeration></s:LocalRepresentation></s:Dimension>"#,
            id,
            position,
            id.to_uppercase(),
            codelist
        ));
    }
    let time_position = dimensions.len() + 1;
    xml.push_str(&format!(
        r#"<s:TimeDimension id="TIME_PERIOD" position="{}"/></s:DimensionList></s:DataStructureComponents></s:DataStructure></s:DataStructures>"#,
        time_position
    ));
    xml.push_str(TAIL);
    xml
}

/// Scripts a dataset owned by EUROSTAT with dimensions freq, unit, geo.
pub fn with_nama_structure(transport: ScriptedTransport, code: &str) -> ScriptedTransport {
    transport
        .on(dataflow_url(Provider::Eurostat, code), ok("df", dataflow_xml(code, "NAMA_10_GDP", &[])))
        .on(
            datastructure_url(Provider::Eurostat, "NAMA_10_GDP"),
            ok(
                "dsd",
                datastructure_xml("NAMA_10_GDP", &[("freq", 1, "FREQ"), ("unit", 2, "UNIT"), ("geo", 3, "GEO")]),
            ),
        )
}

pub fn async_status_xml(status: &str, key: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><env:Envelope xmlns:env="http://schemas.xmlsoap.org/soap/envelope/"><env:Header/><env:Body><ns0:asyncResponse xmlns:ns0="http://estat.ec.europa.eu/disschain/soap/asynchronous" xmlns:ns1="http://estat.ec.europa.eu/disschain/asynchronous"><ns1:status><ns1:key>{}</ns1:key><ns1:status>{}</ns1:status></ns1:status></ns0:asyncResponse></env:Body></env:Envelope>"#,
        key, status
    )
}

pub fn sync_queued_xml(status: &str, key: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body><ns0:syncResponse xmlns:ns0="http://estat.ec.europa.eu/disschain/soap/extraction"><queued><id>{}</id><status>{}</status></queued></ns0:syncResponse></S:Body></S:Envelope>"#,
        key, status
    )
}

pub fn fault_xml(code: &str, message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/"><S:Body><S:Fault><faultcode>{}</faultcode><faultstring>{}</faultstring></S:Fault></S:Body></S:Envelope>"#,
        code, message
    )
}

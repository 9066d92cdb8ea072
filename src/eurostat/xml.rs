//! Owned element tree over `quick-xml` events.
//!
//! SDMX and SOAP documents are namespaced, but the paths we need are never
//! ambiguous once the prefixes are dropped, so elements are stored and looked up
//! by local name only. Attributes keep their qualified key (`xml:lang`).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn parse(bytes: &[u8]) -> Result<Element, String> {
        let mut reader = Reader::from_reader(bytes);
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => stack.push(Element::open(&e)?),
                Ok(Event::Empty(e)) => {
                    let element = Element::open(&e)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Ok(Event::End(_)) => {
                    let element = stack.pop().ok_or("closing tag without opening tag")?;
                    attach(&mut stack, &mut root, element)?;
                }
                Ok(Event::Text(t)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&t.unescape().map_err(|e| e.to_string())?);
                    }
                }
                Ok(Event::CData(t)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(format!("XML parsing error at position {}: {:?}", reader.buffer_position(), e)),
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(format!("unclosed element <{}>", stack[stack.len() - 1].name));
        }
        root.ok_or_else(|| "document has no root element".to_owned())
    }

    fn open(start: &BytesStart) -> Result<Element, String> {
        let mut element = Element {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            ..Element::default()
        };

        for attr in start.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
            element.attributes.push((key, value));
        }

        Ok(element)
    }

    /// Attribute by qualified key, or by local name when the key has no prefix.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key || (!key.contains(':') && k.rsplit(':').next() == Some(key)))
            .map(|(_, v)| v.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First descendant matching a `/`-separated path of local names, relative to `self`.
    pub fn find(&self, path: &str) -> Option<&Element> {
        self.find_all(path).into_iter().next()
    }

    pub fn find_all(&self, path: &str) -> Vec<&Element> {
        let mut current = vec![self];
        for step in path.split('/').filter(|s| !s.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|e| e.children.iter().filter(move |c| c.name == step))
                .collect();
        }
        current
    }

    pub fn find_text(&self, path: &str) -> Option<&str> {
        self.find(path).map(|e| e.text.as_str())
    }
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err("document has more than one root element".to_owned()),
    }
    Ok(())
}

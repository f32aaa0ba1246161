//! Compact XML materialization.
//!
//! Converts XML documents into value trees for extraction and value trees
//! back into XML for request bodies. Element attributes are keyed `@name`,
//! repeated child tags collect into arrays, and elements holding only text
//! flatten to their scalar text.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

/// Mixed-content text is kept under this key when an element also has
/// attributes or children.
const TEXT_KEY: &str = "#text";

struct Node {
    tag: String,
    entries: serde_json::Map<String, serde_json::Value>,
    text: String,
}

impl Node {
    fn new(tag: String) -> Self {
        Self {
            tag,
            entries: serde_json::Map::new(),
            text: String::new(),
        }
    }

    fn close(mut self) -> (String, serde_json::Value) {
        let text = self.text.trim().to_string();
        if self.entries.is_empty() {
            return (self.tag, serde_json::Value::String(text));
        }
        if !text.is_empty() {
            self.entries.insert(TEXT_KEY.to_string(), serde_json::Value::String(text));
        }
        (self.tag, serde_json::Value::Object(self.entries))
    }
}

fn attach(parent: &mut serde_json::Map<String, serde_json::Value>, tag: String, value: serde_json::Value) {
    match parent.get_mut(&tag) {
        None => {
            parent.insert(tag, value);
        }
        Some(serde_json::Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = serde_json::Value::Array(vec![first, value]);
        }
    }
}

/// Parse an XML document into its compact value form.
///
/// Returns `None` on any parse error; the caller decides the fallback.
pub fn xml_to_value(text: &str) -> Option<serde_json::Value> {
    let mut reader = Reader::from_str(text);
    let mut document = serde_json::Map::new();
    let mut stack: Vec<Node> = Vec::new();

    loop {
        match reader.read_event().ok()? {
            Event::Start(start) => {
                let mut node = Node::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
                collect_attributes(&start, &mut node)?;
                stack.push(node);
            }
            Event::Empty(start) => {
                let mut node = Node::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
                collect_attributes(&start, &mut node)?;
                let (tag, value) = node.close();
                match stack.last_mut() {
                    Some(parent) => attach(&mut parent.entries, tag, value),
                    None => attach(&mut document, tag, value),
                }
            }
            Event::End(_) => {
                let (tag, value) = stack.pop()?.close();
                match stack.last_mut() {
                    Some(parent) => attach(&mut parent.entries, tag, value),
                    None => attach(&mut document, tag, value),
                }
            }
            Event::Text(chunk) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&chunk.unescape().ok()?);
                }
            }
            Event::CData(chunk) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(chunk.as_ref()));
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions.
            _ => {}
        }
    }

    if !stack.is_empty() {
        return None;
    }
    Some(serde_json::Value::Object(document))
}

fn collect_attributes(start: &BytesStart<'_>, node: &mut Node) -> Option<()> {
    for attribute in start.attributes() {
        let attribute = attribute.ok()?;
        let name = format!("@{}", String::from_utf8_lossy(attribute.key.as_ref()));
        let value = attribute.unescape_value().ok()?.into_owned();
        node.entries.insert(name, serde_json::Value::String(value));
    }
    Some(())
}

/// Serialize a value tree as an XML document.
///
/// An object with a single key uses that key as the document root; any
/// other value is wrapped in a `body` element.
pub fn value_to_xml(value: &serde_json::Value) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let wrote = match value {
        serde_json::Value::Object(entries) if entries.len() == 1 => {
            let (tag, inner) = entries.iter().next().map(|(k, v)| (k.as_str(), v)).unwrap_or(("body", value));
            write_element(&mut writer, tag, inner)
        }
        other => write_element(&mut writer, "body", other),
    };

    if wrote.is_none() {
        return String::new();
    }
    String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
}

fn write_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    tag: &str,
    value: &serde_json::Value,
) -> Option<()> {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                write_element(writer, tag, item)?;
            }
        }
        serde_json::Value::Object(entries) => {
            let mut start = BytesStart::new(tag);
            for (key, entry) in entries {
                if let Some(attr) = key.strip_prefix('@') {
                    start.push_attribute((attr, crate::ops::text_form(entry).as_str()));
                }
            }
            writer.write_event(Event::Start(start)).ok()?;
            for (key, entry) in entries {
                if key.starts_with('@') {
                    continue;
                }
                if key == TEXT_KEY {
                    writer
                        .write_event(Event::Text(BytesText::new(&crate::ops::text_form(entry))))
                        .ok()?;
                    continue;
                }
                write_element(writer, key, entry)?;
            }
            writer.write_event(Event::End(BytesEnd::new(tag))).ok()?;
        }
        scalar => {
            writer.write_event(Event::Start(BytesStart::new(tag))).ok()?;
            if !scalar.is_null() {
                writer
                    .write_event(Event::Text(BytesText::new(&crate::ops::text_form(scalar))))
                    .ok()?;
            }
            writer.write_event(Event::End(BytesEnd::new(tag))).ok()?;
        }
    }
    Some(())
}

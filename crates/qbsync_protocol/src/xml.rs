//! Minimal XML element tree on top of `quick-xml`.
//!
//! Envelopes and qbXML documents are small, so they are read into an owned
//! tree and inspected by local name. Namespace prefixes are kept in
//! [`XmlElement::name`] but ignored by every lookup helper, which lets the
//! codec accept `soap:`, `soapenv:` and `SOAP-ENV:` envelopes alike.

use crate::error::{CodecError, CodecResult, ParseError};
use quick_xml::escape::unescape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// An owned XML element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    /// Qualified name as written (may carry a namespace prefix).
    pub name: String,
    /// Attributes in document order, values unescaped.
    pub attributes: Vec<(String, String)>,
    /// Child elements in document order.
    pub children: Vec<XmlElement>,
    /// Concatenated character data, exactly as written for leaf elements.
    /// Whitespace-only text around child elements is dropped.
    pub text: String,
}

/// Strips a namespace prefix from a qualified name.
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

impl XmlElement {
    /// Creates an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds an attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Adds a child element.
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    /// Sets the character data.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Creates `<name>text</name>`.
    pub fn text_node(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name).with_text(text)
    }

    /// Returns the name without namespace prefix.
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    /// Returns an attribute value by local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| local_name(key) == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the first child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.local_name() == name)
    }

    /// Returns all children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.local_name() == name)
    }

    /// Returns the text of the first child with the given local name.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// Returns the first child element, if any.
    pub fn first_child(&self) -> Option<&XmlElement> {
        self.children.first()
    }

    /// Serializes this element (no XML declaration).
    pub fn to_xml(&self) -> CodecResult<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        write_element(&mut writer, self)?;
        String::from_utf8(writer.into_inner()).map_err(encode_err)
    }
}

fn encode_err<E: std::fmt::Display>(err: E) -> CodecError {
    CodecError::encoding_failed(err.to_string())
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &XmlElement) -> CodecResult<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() && element.text.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(encode_err);
    }

    writer.write_event(Event::Start(start)).map_err(encode_err)?;
    if !element.text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(&element.text)))
            .map_err(encode_err)?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(encode_err)
}

/// Parses a document into its root element.
///
/// Returns `Ok(None)` for empty or whitespace-only input. Declarations,
/// processing instructions and comments are skipped.
pub fn parse_document(raw: &str) -> Result<Option<XmlElement>, ParseError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let mut reader = Reader::from_str(raw);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ParseError::new(e.to_string(), raw))?;

        match event {
            Event::Start(start) => stack.push(element_from_start(&start, raw)?),
            Event::Empty(start) => {
                let element = element_from_start(&start, raw)?;
                attach(&mut stack, &mut root, element, raw)?;
            }
            Event::End(_) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| ParseError::new("unexpected closing tag", raw))?;
                if !element.children.is_empty() && element.text.trim().is_empty() {
                    element.text.clear();
                }
                attach(&mut stack, &mut root, element, raw)?;
            }
            Event::Text(text) => {
                let decoded = unescape(utf8(&text, raw)?)
                    .map_err(|e| ParseError::new(e.to_string(), raw))?;
                append_text(&mut stack, &decoded, raw)?;
            }
            Event::CData(data) => append_text(&mut stack, utf8(&data, raw)?, raw)?,
            Event::GeneralRef(reference) => {
                let entity = format!("&{};", utf8(&reference, raw)?);
                let resolved =
                    unescape(&entity).map_err(|e| ParseError::new(e.to_string(), raw))?;
                append_text(&mut stack, &resolved, raw)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::new(
            format!("unclosed element <{}>", open.name),
            raw,
        ));
    }
    if root.is_none() {
        return Err(ParseError::new("no root element", raw));
    }
    Ok(root)
}

fn utf8<'a>(bytes: &'a [u8], raw: &str) -> Result<&'a str, ParseError> {
    std::str::from_utf8(bytes).map_err(|e| ParseError::new(e.to_string(), raw))
}

fn element_from_start(start: &BytesStart<'_>, raw: &str) -> Result<XmlElement, ParseError> {
    let mut element = XmlElement::new(utf8(start.name().as_ref(), raw)?);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ParseError::new(e.to_string(), raw))?;
        let key = utf8(attr.key.as_ref(), raw)?.to_string();
        let value = unescape(utf8(attr.value.as_ref(), raw)?)
            .map_err(|e| ParseError::new(e.to_string(), raw))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
    raw: &str,
) -> Result<(), ParseError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_some() {
        Err(ParseError::new("multiple root elements", raw))
    } else {
        *root = Some(element);
        Ok(())
    }
}

fn append_text(stack: &mut [XmlElement], text: &str, raw: &str) -> Result<(), ParseError> {
    match stack.last_mut() {
        Some(current) => {
            current.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(ParseError::new("text outside of root element", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_attributes() {
        let raw = r#"<?xml version="1.0"?>
            <a:root xmlns:a="urn:x" id="7">
                <child>one</child>
                <child kind="b">two</child>
                <empty/>
            </a:root>"#;
        let root = parse_document(raw).unwrap().unwrap();
        assert_eq!(root.local_name(), "root");
        assert_eq!(root.attr("id"), Some("7"));
        assert_eq!(root.children_named("child").count(), 2);
        assert_eq!(root.child_text("child"), Some("one"));
        assert!(root.child("empty").is_some());
    }

    #[test]
    fn entities_and_cdata_are_resolved() {
        let raw = "<r><t>Smith &amp; Sons &#60;ltd&#62;</t><c><![CDATA[<raw & text>]]></c></r>";
        let root = parse_document(raw).unwrap().unwrap();
        assert_eq!(root.child_text("t"), Some("Smith & Sons <ltd>"));
        assert_eq!(root.child_text("c"), Some("<raw & text>"));
    }

    #[test]
    fn empty_input_is_no_document() {
        assert_eq!(parse_document("").unwrap(), None);
        assert_eq!(parse_document("  \n\t ").unwrap(), None);
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(parse_document("<a><b></a>").is_err());
        assert!(parse_document("<a>").is_err());
        assert!(parse_document("just text").is_err());
        assert!(parse_document("<a/><b/>").is_err());
    }

    #[test]
    fn written_text_is_escaped_and_reparses() {
        let element = XmlElement::new("doc")
            .with_attr("note", "a \"quoted\" & <odd> value")
            .with_child(XmlElement::text_node("body", "<?xml version=\"1.0\"?><x>&</x>"));
        let xml = element.to_xml().unwrap();
        assert!(!xml.contains("<x>"));

        let parsed = parse_document(&xml).unwrap().unwrap();
        assert_eq!(parsed, element);
    }

    #[test]
    fn leaf_text_keeps_edge_whitespace() {
        let element = XmlElement::new("auth")
            .with_child(XmlElement::text_node("strPassword", " pw "))
            .with_child(XmlElement::text_node("strCompanyFileName", "C:\\Shop.qbw  "))
            .with_child(XmlElement::text_node("blank", "   "));
        let parsed = parse_document(&element.to_xml().unwrap()).unwrap().unwrap();
        assert_eq!(parsed.child_text("strPassword"), Some(" pw "));
        assert_eq!(parsed.child_text("strCompanyFileName"), Some("C:\\Shop.qbw  "));
        assert_eq!(parsed.child_text("blank"), Some("   "));
        assert_eq!(parsed.text, "");
    }

    #[test]
    fn childless_element_is_self_closing() {
        let xml = XmlElement::new("Ping").with_attr("id", "1").to_xml().unwrap();
        assert_eq!(xml, r#"<Ping id="1"/>"#);
    }
}

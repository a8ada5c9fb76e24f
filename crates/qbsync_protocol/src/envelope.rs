//! SOAP 1.1 envelope parsing and building.

use crate::error::{CodecResult, ParseError};
use crate::xml::{parse_document, XmlElement};
use quick_xml::escape::escape;

/// SOAP 1.1 envelope namespace.
pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Namespace of the Web Connector service operations.
pub const QBWC_NS: &str = "http://developer.intuit.com/";

/// Fault code for requests the server could not understand.
pub const FAULT_CLIENT_PARSE: &str = "Client.ParseError";

/// Fault code for an action name outside the protocol.
pub const FAULT_CLIENT_UNKNOWN_ACTION: &str = "Client.UnknownAction";

/// Fault code for failures inside the server.
pub const FAULT_SERVER: &str = "Server.Error";

const XML_DECL: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// The content of a SOAP body: the single operation element, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedPayload {
    element: Option<XmlElement>,
}

/// A SOAP fault read back from an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// `faultcode` text.
    pub code: String,
    /// `faultstring` text.
    pub message: String,
}

impl ParsedPayload {
    /// An empty payload (present-but-empty body).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps an already parsed operation element.
    pub fn from_element(element: XmlElement) -> Self {
        Self {
            element: Some(element),
        }
    }

    /// Returns true if the body carried no operation element.
    pub fn is_empty(&self) -> bool {
        self.element.is_none()
    }

    /// Returns the operation element.
    pub fn element(&self) -> Option<&XmlElement> {
        self.element.as_ref()
    }

    /// Returns the local name of the operation element.
    pub fn name(&self) -> Option<&str> {
        self.element.as_ref().map(XmlElement::local_name)
    }

    /// Returns the text of a named field of the operation element.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.element.as_ref().and_then(|e| e.child_text(name))
    }

    /// Returns the first present field among several spellings.
    pub fn first_field(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.field(name))
    }

    /// Returns the fault carried by this payload, if it is one.
    pub fn fault(&self) -> Option<Fault> {
        let element = self.element.as_ref()?;
        if element.local_name() != "Fault" {
            return None;
        }
        Some(Fault {
            code: element.child_text("faultcode").unwrap_or_default().to_string(),
            message: element
                .child_text("faultstring")
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// Parses a SOAP envelope and extracts the body's operation element.
///
/// Empty input and an empty `Body` both yield an empty payload. Anything
/// that is not a well-formed envelope is a [`ParseError`].
pub fn parse_envelope(raw: &str) -> Result<ParsedPayload, ParseError> {
    let Some(root) = parse_document(raw)? else {
        return Ok(ParsedPayload::empty());
    };
    if root.local_name() != "Envelope" {
        return Err(ParseError::new(
            format!("expected SOAP Envelope, found <{}>", root.name),
            raw,
        ));
    }

    let body = root
        .children
        .into_iter()
        .find(|c| c.local_name() == "Body")
        .ok_or_else(|| ParseError::new("SOAP Envelope has no Body", raw))?;

    Ok(ParsedPayload {
        element: body.children.into_iter().next(),
    })
}

/// Returns the response wrapper name for an action (`fooResponse`).
pub fn response_element_name(action: &str) -> String {
    if action.ends_with("Response") {
        action.to_string()
    } else {
        format!("{action}Response")
    }
}

/// Builds a response envelope for `action` carrying the given fields.
pub fn build_envelope(action: &str, fields: Vec<XmlElement>) -> CodecResult<String> {
    build_operation(response_element_name(action), fields)
}

/// Builds a request envelope, as the Web Connector sends it.
pub fn build_request_envelope(action: &str, fields: Vec<XmlElement>) -> CodecResult<String> {
    build_operation(action.to_string(), fields)
}

fn build_operation(name: String, fields: Vec<XmlElement>) -> CodecResult<String> {
    let operation = XmlElement {
        name,
        attributes: vec![("xmlns".into(), QBWC_NS.into())],
        children: fields,
        text: String::new(),
    };
    let envelope = XmlElement::new("soap:Envelope")
        .with_attr("xmlns:soap", SOAP_ENVELOPE_NS)
        .with_attr("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance")
        .with_attr("xmlns:xsd", "http://www.w3.org/2001/XMLSchema")
        .with_child(XmlElement::new("soap:Body").with_child(operation));

    Ok(format!("{XML_DECL}\n{}", envelope.to_xml()?))
}

/// Builds a SOAP fault envelope.
///
/// Plain string formatting only, so it cannot fail; it is the fallback
/// when every other serializer has.
pub fn build_fault(fault_code: &str, fault_string: &str) -> String {
    format!(
        "{XML_DECL}\n\
         <soap:Envelope xmlns:soap=\"{SOAP_ENVELOPE_NS}\">\n  \
         <soap:Body>\n    \
         <soap:Fault>\n      \
         <faultcode>{}</faultcode>\n      \
         <faultstring>{}</faultstring>\n    \
         </soap:Fault>\n  \
         </soap:Body>\n\
         </soap:Envelope>",
        escape(fault_code),
        escape(fault_string),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_empty_payload() {
        let raw = format!(
            r#"<soap:Envelope xmlns:soap="{SOAP_ENVELOPE_NS}"><soap:Body/></soap:Envelope>"#
        );
        let payload = parse_envelope(&raw).unwrap();
        assert!(payload.is_empty());
        assert_eq!(payload.name(), None);

        assert!(parse_envelope("").unwrap().is_empty());
    }

    #[test]
    fn operation_fields_are_read_by_local_name() {
        let raw = r#"<?xml version="1.0"?>
            <SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/">
              <SOAP-ENV:Header/>
              <SOAP-ENV:Body>
                <ns1:authenticate xmlns:ns1="http://developer.intuit.com/">
                  <ns1:strUserName>alice</ns1:strUserName>
                  <ns1:strPassword>s3cret</ns1:strPassword>
                </ns1:authenticate>
              </SOAP-ENV:Body>
            </SOAP-ENV:Envelope>"#;
        let payload = parse_envelope(raw).unwrap();
        assert_eq!(payload.name(), Some("authenticate"));
        assert_eq!(payload.field("strUserName"), Some("alice"));
        assert_eq!(
            payload.first_field(&["userName", "strPassword"]),
            Some("s3cret")
        );
    }

    #[test]
    fn malformed_envelope_keeps_excerpt() {
        let err = parse_envelope("<soap:Envelope><soap:Body>").unwrap_err();
        assert!(err.excerpt.starts_with("<soap:Envelope>"));

        let err = parse_envelope("<notsoap/>").unwrap_err();
        assert!(err.message.contains("Envelope"));

        assert!(parse_envelope("<soap:Envelope xmlns:soap=\"x\"/>").is_err());
    }

    #[test]
    fn response_wrapper_is_suffixed_once() {
        assert_eq!(response_element_name("serverVersion"), "serverVersionResponse");
        assert_eq!(
            response_element_name("serverVersionResponse"),
            "serverVersionResponse"
        );

        let xml = build_envelope(
            "closeConnection",
            vec![XmlElement::text_node("closeConnectionResult", "OK")],
        )
        .unwrap();
        let payload = parse_envelope(&xml).unwrap();
        assert_eq!(payload.name(), Some("closeConnectionResponse"));
        assert_eq!(payload.field("closeConnectionResult"), Some("OK"));
    }

    #[test]
    fn fault_is_escaped_and_parseable() {
        let xml = build_fault(FAULT_SERVER, "bad <input> & \"more\"");
        let fault = parse_envelope(&xml).unwrap().fault().unwrap();
        assert_eq!(fault.code, FAULT_SERVER);
        assert_eq!(fault.message, "bad <input> & \"more\"");
    }

    #[test]
    fn non_fault_payload_has_no_fault() {
        let xml = build_envelope("serverVersion", vec![]).unwrap();
        assert!(parse_envelope(&xml).unwrap().fault().is_none());
    }
}

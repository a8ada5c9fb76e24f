//! qbXML phase queries and response parsing.
//!
//! Each sync phase maps to one typed [`QueryPayload`] variant. The codec
//! turns those into qbXML request documents and reads QuickBooks' response
//! documents back into [`QbxmlResponse`], so the rest of the system never
//! handles raw qbXML attributes or text nodes.

use crate::error::{CodecError, CodecResult};
use crate::phase::Phase;
use crate::xml::{parse_document, XmlElement};
use chrono::{Days, NaiveDate, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// qbXML date format (`YYYY-MM-DD`).
const QB_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses a qbXML date.
pub fn parse_qb_date(raw: &str) -> CodecResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), QB_DATE_FORMAT)
        .map_err(|_| CodecError::InvalidDate(raw.to_string()))
}

/// Formats a date the way qbXML expects it.
pub fn format_qb_date(date: NaiveDate) -> String {
    date.format(QB_DATE_FORMAT).to_string()
}

/// Identifier echoed back by QuickBooks in the matching response.
///
/// Unique within a process lifetime: a millisecond timestamp plus a random
/// suffix. Not meant to be unguessable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Generates a fresh request identifier.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self(format!("req_{millis}_{suffix}"))
    }

    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Options shared by all phase queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// `MaxReturned` for list and transaction queries.
    pub max_returned: u32,
    /// qbXML specification version announced in the request header.
    pub qbxml_version: String,
    /// Default look-back for the sales phase when no cursor is known.
    pub sales_look_back_days: u64,
    /// Also query invoices during the sales phase.
    pub include_invoices: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_returned: 100,
            qbxml_version: "13.0".into(),
            sales_look_back_days: 30,
            include_invoices: false,
        }
    }
}

/// A phase-specific qbXML query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPayload {
    /// `CompanyQueryRq`
    Company {
        /// Request identifier.
        request_id: RequestId,
    },
    /// `ItemQueryRq`
    Items {
        /// Request identifier.
        request_id: RequestId,
        /// Page size.
        max_returned: u32,
    },
    /// `CustomerQueryRq`
    Customers {
        /// Request identifier.
        request_id: RequestId,
        /// Page size.
        max_returned: u32,
    },
    /// `SalesReceiptQueryRq`, optionally followed by `InvoiceQueryRq`.
    Sales {
        /// Request identifier of the sales receipt query.
        request_id: RequestId,
        /// Page size.
        max_returned: u32,
        /// Lower bound on the modification date.
        from_modified_date: NaiveDate,
        /// Request identifier of the invoice query, when invoices are included.
        invoice_request_id: Option<RequestId>,
    },
}

/// Builds the query for `phase`.
///
/// `cursor` only matters for [`Phase::Sales`], where it bounds the
/// modification date; without one the query looks back
/// [`QueryOptions::sales_look_back_days`] from today.
pub fn build_phase_query(
    phase: Phase,
    cursor: Option<NaiveDate>,
    options: &QueryOptions,
) -> QueryPayload {
    let request_id = RequestId::generate();
    match phase {
        Phase::Company => QueryPayload::Company { request_id },
        Phase::Items => QueryPayload::Items {
            request_id,
            max_returned: options.max_returned,
        },
        Phase::Customers => QueryPayload::Customers {
            request_id,
            max_returned: options.max_returned,
        },
        Phase::Sales => {
            let today = Utc::now().date_naive();
            let from_modified_date = cursor.unwrap_or_else(|| {
                today
                    .checked_sub_days(Days::new(options.sales_look_back_days))
                    .unwrap_or(today)
            });
            QueryPayload::Sales {
                request_id,
                max_returned: options.max_returned,
                from_modified_date,
                invoice_request_id: options.include_invoices.then(RequestId::generate),
            }
        }
    }
}

impl QueryPayload {
    /// Returns the phase this query belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            QueryPayload::Company { .. } => Phase::Company,
            QueryPayload::Items { .. } => Phase::Items,
            QueryPayload::Customers { .. } => Phase::Customers,
            QueryPayload::Sales { .. } => Phase::Sales,
        }
    }

    /// Returns the (primary) request identifier.
    pub fn request_id(&self) -> &RequestId {
        match self {
            QueryPayload::Company { request_id }
            | QueryPayload::Items { request_id, .. }
            | QueryPayload::Customers { request_id, .. }
            | QueryPayload::Sales { request_id, .. } => request_id,
        }
    }

    fn request_elements(&self) -> Vec<XmlElement> {
        match self {
            QueryPayload::Company { request_id } => {
                vec![XmlElement::new("CompanyQueryRq").with_attr("requestID", request_id.as_str())]
            }
            QueryPayload::Items {
                request_id,
                max_returned,
            } => vec![list_query("ItemQueryRq", request_id, *max_returned)],
            QueryPayload::Customers {
                request_id,
                max_returned,
            } => vec![list_query("CustomerQueryRq", request_id, *max_returned)],
            QueryPayload::Sales {
                request_id,
                max_returned,
                from_modified_date,
                invoice_request_id,
            } => {
                let mut elements = vec![transaction_query(
                    "SalesReceiptQueryRq",
                    request_id,
                    *max_returned,
                    *from_modified_date,
                )];
                if let Some(invoice_id) = invoice_request_id {
                    elements.push(transaction_query(
                        "InvoiceQueryRq",
                        invoice_id,
                        *max_returned,
                        *from_modified_date,
                    ));
                }
                elements
            }
        }
    }

    /// Serializes the query as a complete qbXML request document.
    pub fn to_qbxml(&self, qbxml_version: &str) -> CodecResult<String> {
        let messages = self.request_elements().into_iter().fold(
            XmlElement::new("QBXMLMsgsRq").with_attr("onError", "stopOnError"),
            XmlElement::with_child,
        );
        let document = XmlElement::new("QBXML").with_child(messages);
        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<?qbxml version=\"{qbxml_version}\"?>\n{}",
            document.to_xml()?
        ))
    }

    /// Reads a qbXML request document back into a typed query.
    pub fn from_qbxml(raw: &str) -> CodecResult<Self> {
        let root = parse_document(raw)?
            .ok_or_else(|| CodecError::invalid_structure("empty qbXML request"))?;
        let messages = root
            .child("QBXMLMsgsRq")
            .ok_or_else(|| CodecError::missing_field("QBXMLMsgsRq"))?;
        let first = messages
            .first_child()
            .ok_or_else(|| CodecError::invalid_structure("QBXMLMsgsRq has no request"))?;

        let request_id = request_id_of(first)?;
        let max_returned = || -> CodecResult<u32> {
            match first.child_text("MaxReturned") {
                Some(text) => text.trim().parse().map_err(|_| {
                    CodecError::invalid_structure(format!("bad MaxReturned {text:?}"))
                }),
                None => Ok(0),
            }
        };

        match first.local_name() {
            "CompanyQueryRq" => Ok(QueryPayload::Company { request_id }),
            "ItemQueryRq" => Ok(QueryPayload::Items {
                request_id,
                max_returned: max_returned()?,
            }),
            "CustomerQueryRq" => Ok(QueryPayload::Customers {
                request_id,
                max_returned: max_returned()?,
            }),
            "SalesReceiptQueryRq" => {
                let date = first
                    .child("ModifiedDateRangeFilter")
                    .and_then(|f| f.child_text("FromModifiedDate"))
                    .ok_or_else(|| CodecError::missing_field("FromModifiedDate"))?;
                let invoice_request_id = messages
                    .child("InvoiceQueryRq")
                    .map(request_id_of)
                    .transpose()?;
                Ok(QueryPayload::Sales {
                    request_id,
                    max_returned: max_returned()?,
                    from_modified_date: parse_qb_date(date)?,
                    invoice_request_id,
                })
            }
            other => Err(CodecError::invalid_structure(format!(
                "unsupported request <{other}>"
            ))),
        }
    }
}

fn list_query(name: &str, request_id: &RequestId, max_returned: u32) -> XmlElement {
    XmlElement::new(name)
        .with_attr("requestID", request_id.as_str())
        .with_child(XmlElement::text_node("MaxReturned", max_returned.to_string()))
        .with_child(XmlElement::text_node("ActiveStatus", "All"))
}

fn transaction_query(
    name: &str,
    request_id: &RequestId,
    max_returned: u32,
    from: NaiveDate,
) -> XmlElement {
    XmlElement::new(name)
        .with_attr("requestID", request_id.as_str())
        .with_child(XmlElement::text_node("MaxReturned", max_returned.to_string()))
        .with_child(
            XmlElement::new("ModifiedDateRangeFilter")
                .with_child(XmlElement::text_node("FromModifiedDate", format_qb_date(from))),
        )
}

fn request_id_of(element: &XmlElement) -> CodecResult<RequestId> {
    element
        .attr("requestID")
        .map(RequestId::new)
        .ok_or_else(|| CodecError::missing_field(format!("{}@requestID", element.local_name())))
}

/// Kind of a qbXML response record set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    /// `CompanyQueryRs`
    Company,
    /// `ItemQueryRs`
    Items,
    /// `CustomerQueryRs`
    Customers,
    /// `SalesReceiptQueryRs`
    SalesReceipts,
    /// `InvoiceQueryRs`
    Invoices,
    /// Any other `*Rs` element.
    Other(String),
}

impl ResponseKind {
    fn from_element_name(name: &str) -> Self {
        match name {
            "CompanyQueryRs" => ResponseKind::Company,
            "ItemQueryRs" => ResponseKind::Items,
            "CustomerQueryRs" => ResponseKind::Customers,
            "SalesReceiptQueryRs" => ResponseKind::SalesReceipts,
            "InvoiceQueryRs" => ResponseKind::Invoices,
            other => ResponseKind::Other(other.to_string()),
        }
    }

    /// Returns the sync phase this record set answers.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ResponseKind::Company => Some(Phase::Company),
            ResponseKind::Items => Some(Phase::Items),
            ResponseKind::Customers => Some(Phase::Customers),
            ResponseKind::SalesReceipts | ResponseKind::Invoices => Some(Phase::Sales),
            ResponseKind::Other(_) => None,
        }
    }
}

/// Status attributes of a response record set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInfo {
    /// `statusCode`
    pub code: String,
    /// `statusSeverity`
    pub severity: Option<String>,
    /// `statusMessage`
    pub message: Option<String>,
}

/// One `*Rs` element of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSet {
    /// What was queried.
    pub kind: ResponseKind,
    /// Echoed `requestID`.
    pub request_id: Option<String>,
    /// Status attributes, when present.
    pub status: Option<StatusInfo>,
    /// The `*Ret` records.
    pub records: Vec<XmlElement>,
}

impl ResponseSet {
    fn from_element(element: &XmlElement) -> Self {
        let status = element.attr("statusCode").map(|code| StatusInfo {
            code: code.trim().to_string(),
            severity: element.attr("statusSeverity").map(str::to_string),
            message: element.attr("statusMessage").map(str::to_string),
        });
        Self {
            kind: ResponseKind::from_element_name(element.local_name()),
            request_id: element.attr("requestID").map(str::to_string),
            status,
            records: element
                .children
                .iter()
                .filter(|c| c.local_name().ends_with("Ret"))
                .cloned()
                .collect(),
        }
    }
}

/// A parsed qbXML response document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QbxmlResponse {
    /// Record sets in document order.
    pub sets: Vec<ResponseSet>,
}

impl QbxmlResponse {
    /// Returns true if the document held no record sets.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Returns the record sets answering `phase`.
    pub fn sets_for(&self, phase: Phase) -> impl Iterator<Item = &ResponseSet> {
        self.sets
            .iter()
            .filter(move |set| set.kind.phase() == Some(phase))
    }

    /// Counts records across the sets answering `phase`.
    pub fn record_count(&self, phase: Phase) -> usize {
        self.sets_for(phase).map(|set| set.records.len()).sum()
    }
}

/// Parses a qbXML response document.
///
/// Empty or whitespace-only input is "no data this cycle" and yields an
/// empty response. Besides full `QBXML/QBXMLMsgsRs` documents, a bare
/// `QBXMLMsgsRs` or a single `*Rs` element are accepted.
pub fn parse_qbxml_response(raw: &str) -> CodecResult<QbxmlResponse> {
    let Some(root) = parse_document(raw)? else {
        return Ok(QbxmlResponse::default());
    };

    let root_name = root.local_name().to_string();
    let container = match root_name.as_str() {
        "QBXML" => root.child("QBXMLMsgsRs").cloned().unwrap_or_default(),
        name if name.ends_with("Rs") && name != "QBXMLMsgsRs" => {
            return Ok(QbxmlResponse {
                sets: vec![ResponseSet::from_element(&root)],
            });
        }
        _ => root,
    };

    Ok(QbxmlResponse {
        sets: container
            .children
            .iter()
            .filter(|c| c.local_name().ends_with("Rs"))
            .map(ResponseSet::from_element)
            .collect(),
    })
}

/// A QuickBooks-reported error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Status code (never `"0"`).
    pub code: String,
    /// Status message.
    pub message: String,
    /// Status severity.
    pub severity: String,
}

/// Returns the first non-zero status in the response.
///
/// Sets without a `statusCode` attribute are not errors.
pub fn extract_error(response: &QbxmlResponse) -> Option<ErrorInfo> {
    response
        .sets
        .iter()
        .filter_map(|set| set.status.as_ref())
        .find(|status| status.code != "0")
        .map(|status| ErrorInfo {
            code: status.code.clone(),
            message: status
                .message
                .clone()
                .unwrap_or_else(|| "Unknown QuickBooks error".into()),
            severity: status.severity.clone().unwrap_or_else(|| "Error".into()),
        })
}

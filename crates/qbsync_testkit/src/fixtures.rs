//! Canned configuration and a QuickBooks stand-in.
//!
//! [`QuickBooksDouble`] answers the phase queries the server issues with
//! well-formed qbXML responses, echoing each `requestID`.

use qbsync_protocol::{CodecResult, Phase, QueryPayload, RequestId, XmlElement};
use qbsync_server::{Credentials, ServerConfig, SyncServer};

/// User name accepted by [`test_config`].
pub const TEST_USER: &str = "qb_tile_user";

/// Password accepted by [`test_config`].
pub const TEST_PASSWORD: &str = "correct";

/// Company file used throughout the fixtures.
pub const TEST_COMPANY_FILE: &str = "C:\\QuickBooks\\TileShop.qbw";

/// Client version the scripted client announces.
pub const TEST_CLIENT_VERSION: &str = "2.3.0.36";

/// Server configuration accepting [`TEST_USER`] / [`TEST_PASSWORD`].
pub fn test_config() -> ServerConfig {
    ServerConfig::new(Credentials::new(TEST_USER, TEST_PASSWORD))
        .with_company_file(TEST_COMPANY_FILE)
}

/// In-memory server over [`test_config`].
pub fn test_server() -> SyncServer {
    SyncServer::new(test_config())
}

fn with_ok_status(element: XmlElement) -> XmlElement {
    element
        .with_attr("statusCode", "0")
        .with_attr("statusSeverity", "Info")
        .with_attr("statusMessage", "Status OK")
}

fn document(sets: Vec<XmlElement>) -> CodecResult<String> {
    let messages = sets
        .into_iter()
        .fold(XmlElement::new("QBXMLMsgsRs"), XmlElement::with_child);
    let root = XmlElement::new("QBXML").with_child(messages);
    Ok(format!("<?xml version=\"1.0\" ?>\n{}", root.to_xml()?))
}

fn record_set(name: &str, request_id: &RequestId, records: Vec<XmlElement>) -> XmlElement {
    records.into_iter().fold(
        with_ok_status(XmlElement::new(name).with_attr("requestID", request_id.as_str())),
        XmlElement::with_child,
    )
}

fn company_record() -> XmlElement {
    XmlElement::new("CompanyRet")
        .with_child(XmlElement::text_node("CompanyName", "Tile Shop & Co."))
        .with_child(XmlElement::text_node("LegalCompanyName", "Tile Shop LLC"))
}

fn item_record(i: usize) -> XmlElement {
    XmlElement::new("ItemInventoryRet")
        .with_child(XmlElement::text_node("ListID", format!("80000{i:03}-1700000000")))
        .with_child(XmlElement::text_node("Name", format!("Porcelain tile {i}")))
        .with_child(XmlElement::text_node("QuantityOnHand", (i * 10).to_string()))
}

fn customer_record(i: usize) -> XmlElement {
    XmlElement::new("CustomerRet")
        .with_child(XmlElement::text_node("ListID", format!("8000A{i:03}-1700000000")))
        .with_child(XmlElement::text_node("FullName", format!("Customer {i}")))
}

fn sales_record(name: &str, i: usize) -> XmlElement {
    XmlElement::new(name)
        .with_child(XmlElement::text_node("TxnID", format!("{i}-1700000000")))
        .with_child(XmlElement::text_node("TxnDate", "2024-03-01"))
        .with_child(XmlElement::text_node("TotalAmount", format!("{}.50", 100 + i)))
}

/// Builds a response whose single record set carries a non-zero status.
pub fn error_response(set_name: &str, request_id: &str, code: &str, message: &str) -> String {
    format!(
        "<?xml version=\"1.0\" ?>\n<QBXML><QBXMLMsgsRs>\
         <{set_name} requestID=\"{request_id}\" statusCode=\"{code}\" \
         statusSeverity=\"Error\" statusMessage=\"{message}\"/>\
         </QBXMLMsgsRs></QBXML>"
    )
}

/// A scripted QuickBooks company file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickBooksDouble {
    items: usize,
    customers: usize,
    receipts: usize,
    invoices: usize,
    failure: Option<(Phase, String, String)>,
}

impl Default for QuickBooksDouble {
    fn default() -> Self {
        Self {
            items: 3,
            customers: 2,
            receipts: 4,
            invoices: 1,
            failure: None,
        }
    }
}

impl QuickBooksDouble {
    /// Creates a company file with a handful of records per list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of items.
    pub fn with_items(mut self, count: usize) -> Self {
        self.items = count;
        self
    }

    /// Sets the number of customers.
    pub fn with_customers(mut self, count: usize) -> Self {
        self.customers = count;
        self
    }

    /// Sets the number of sales receipts and invoices.
    pub fn with_sales(mut self, receipts: usize, invoices: usize) -> Self {
        self.receipts = receipts;
        self.invoices = invoices;
        self
    }

    /// Answers queries for `phase` with a status error.
    pub fn failing_on(mut self, phase: Phase, code: &str, message: &str) -> Self {
        self.failure = Some((phase, code.to_string(), message.to_string()));
        self
    }

    /// Returns the records a successful answer for `phase` carries.
    pub fn expected_records(&self, phase: Phase, with_invoices: bool) -> usize {
        match phase {
            Phase::Company => 1,
            Phase::Items => self.items,
            Phase::Customers => self.customers,
            Phase::Sales if with_invoices => self.receipts + self.invoices,
            Phase::Sales => self.receipts,
        }
    }

    /// Answers a qbXML request document.
    pub fn respond(&self, query_xml: &str) -> CodecResult<String> {
        let query = QueryPayload::from_qbxml(query_xml)?;
        if let Some((phase, code, message)) = &self.failure {
            if *phase == query.phase() {
                let set = match phase {
                    Phase::Company => "CompanyQueryRs",
                    Phase::Items => "ItemQueryRs",
                    Phase::Customers => "CustomerQueryRs",
                    Phase::Sales => "SalesReceiptQueryRs",
                };
                return Ok(error_response(
                    set,
                    query.request_id().as_str(),
                    code,
                    message,
                ));
            }
        }

        let sets = match &query {
            QueryPayload::Company { request_id } => {
                vec![record_set("CompanyQueryRs", request_id, vec![company_record()])]
            }
            QueryPayload::Items { request_id, .. } => vec![record_set(
                "ItemQueryRs",
                request_id,
                (0..self.items).map(item_record).collect(),
            )],
            QueryPayload::Customers { request_id, .. } => vec![record_set(
                "CustomerQueryRs",
                request_id,
                (0..self.customers).map(customer_record).collect(),
            )],
            QueryPayload::Sales {
                request_id,
                invoice_request_id,
                ..
            } => {
                let mut sets = vec![record_set(
                    "SalesReceiptQueryRs",
                    request_id,
                    (0..self.receipts)
                        .map(|i| sales_record("SalesReceiptRet", i))
                        .collect(),
                )];
                if let Some(invoice_id) = invoice_request_id {
                    sets.push(record_set(
                        "InvoiceQueryRs",
                        invoice_id,
                        (0..self.invoices)
                            .map(|i| sales_record("InvoiceRet", i))
                            .collect(),
                    ));
                }
                sets
            }
        };
        document(sets)
    }
}

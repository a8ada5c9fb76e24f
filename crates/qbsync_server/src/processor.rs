//! Phase processors: where parsed responses leave the orchestrator.
//!
//! Persisting records is someone else's job. The dispatcher hands each
//! successful response to a [`PhaseProcessor`] and logs what it reports.

use crate::error::ServerResult;
use crate::session::Ticket;
use async_trait::async_trait;
use qbsync_protocol::{Phase, QbxmlResponse, ResponseKind};
use tracing::debug;

/// What a processor did with a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedBatch {
    /// Records handled.
    pub records: usize,
    /// Sales document kinds seen (`receipt`, `invoice`), sales phase only.
    pub sales_type: Option<String>,
}

/// Consumer of successful phase responses.
#[async_trait]
pub trait PhaseProcessor: Send + Sync {
    /// Processes the response to `phase`.
    ///
    /// An error fails the phase: the event is logged as an error and the
    /// client is told to abort the cycle.
    async fn process(
        &self,
        ticket: &Ticket,
        phase: Phase,
        response: &QbxmlResponse,
    ) -> ServerResult<ProcessedBatch>;
}

/// Default processor: counts records and discards them.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCountingProcessor;

/// Describes the sales document kinds present in a response.
pub fn sales_type(response: &QbxmlResponse) -> Option<String> {
    let mut kinds = Vec::new();
    for set in response.sets_for(Phase::Sales) {
        let kind = match set.kind {
            ResponseKind::Invoices => "invoice",
            _ => "receipt",
        };
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    (!kinds.is_empty()).then(|| kinds.join(","))
}

#[async_trait]
impl PhaseProcessor for RecordCountingProcessor {
    async fn process(
        &self,
        ticket: &Ticket,
        phase: Phase,
        response: &QbxmlResponse,
    ) -> ServerResult<ProcessedBatch> {
        let records = response.record_count(phase);
        debug!(%ticket, %phase, records, "records received");
        Ok(ProcessedBatch {
            records,
            sales_type: match phase {
                Phase::Sales => sales_type(response),
                _ => None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbsync_protocol::parse_qbxml_response;

    const SALES: &str = r#"<QBXML><QBXMLMsgsRs>
        <SalesReceiptQueryRs requestID="r1" statusCode="0">
          <SalesReceiptRet><TxnID>1</TxnID></SalesReceiptRet>
          <SalesReceiptRet><TxnID>2</TxnID></SalesReceiptRet>
        </SalesReceiptQueryRs>
        <InvoiceQueryRs requestID="r2" statusCode="0">
          <InvoiceRet><TxnID>9</TxnID></InvoiceRet>
        </InvoiceQueryRs>
    </QBXMLMsgsRs></QBXML>"#;

    #[tokio::test]
    async fn counts_sales_receipts_and_invoices() {
        let response = parse_qbxml_response(SALES).unwrap();
        let batch = RecordCountingProcessor
            .process(&Ticket::from("t"), Phase::Sales, &response)
            .await
            .unwrap();
        assert_eq!(batch.records, 3);
        assert_eq!(batch.sales_type.as_deref(), Some("receipt,invoice"));
    }

    #[tokio::test]
    async fn other_phases_ignore_foreign_sets() {
        let response = parse_qbxml_response(SALES).unwrap();
        let batch = RecordCountingProcessor
            .process(&Ticket::from("t"), Phase::Items, &response)
            .await
            .unwrap();
        assert_eq!(batch, ProcessedBatch::default());
    }

    #[tokio::test]
    async fn empty_response_is_zero_records() {
        let response = parse_qbxml_response("  ").unwrap();
        let batch = RecordCountingProcessor
            .process(&Ticket::from("t"), Phase::Sales, &response)
            .await
            .unwrap();
        assert_eq!(batch.records, 0);
        assert_eq!(batch.sales_type, None);
    }
}

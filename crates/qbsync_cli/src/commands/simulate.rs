//! Simulate command implementation.
//!
//! Drives a complete Web Connector cycle against an in-process server and
//! a canned company file, then prints every exchange and the resulting
//! sync events.

use clap::ValueEnum;
use qbsync_protocol::{
    ActionResult, AuthenticateResult, Phase, QueryPayload, INVALID_USER, SERVER_BUSY,
};
use qbsync_server::{ServerStatus, SyncEvent, SyncServer, Ticket};
use qbsync_testkit::{
    test_config, Exchange, QuickBooksDouble, ScriptedClient, TEST_COMPANY_FILE, TEST_PASSWORD,
    TEST_USER,
};
use serde::Serialize;
use tracing::info;

/// Status code QuickBooks reports for a rejected request.
const SIMULATED_FAILURE_CODE: &str = "3200";

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable transcript.
    Text,
    /// JSON report.
    Json,
}

/// What the simulated company file holds.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Number of items.
    pub items: usize,
    /// Number of customers.
    pub customers: usize,
    /// Number of sales receipts.
    pub receipts: usize,
    /// Number of invoices; invoices are queried only when non-zero.
    pub invoices: usize,
    /// Phase QuickBooks rejects, if any.
    pub fail_phase: Option<Phase>,
    /// Output format.
    pub format: OutputFormat,
}

/// One exchange, flattened for display.
#[derive(Debug, Serialize)]
pub struct Step {
    /// SOAP action name.
    pub action: String,
    /// Result as shown to the Web Connector.
    pub result: String,
}

/// Outcome of a simulated cycle.
#[derive(Debug, Serialize)]
pub struct SimulateReport {
    /// Ticket issued by the server, if login succeeded.
    pub ticket: Option<String>,
    /// Whether every phase completed.
    pub completed: bool,
    /// Phases queried, in order.
    pub phases: Vec<Phase>,
    /// Progress codes returned by `receiveResponseXML`.
    pub progress: Vec<i32>,
    /// Every exchange in order.
    pub steps: Vec<Step>,
    /// Events the server logged for the ticket.
    pub events: Vec<SyncEvent>,
    /// Server snapshot after the cycle.
    pub status: ServerStatus,
}

fn describe(exchange: &Exchange) -> Step {
    let result = match &exchange.result {
        ActionResult::ServerVersion(v) | ActionResult::ClientVersion(v) if v.is_empty() => {
            "(empty)".to_string()
        }
        ActionResult::ServerVersion(v) | ActionResult::ClientVersion(v) => v.clone(),
        ActionResult::Authenticate(AuthenticateResult::Ticket {
            ticket,
            company_file,
        }) => format!("ticket {ticket} for {company_file}"),
        ActionResult::Authenticate(AuthenticateResult::InvalidUser) => {
            format!("rejected ({INVALID_USER})")
        }
        ActionResult::Authenticate(AuthenticateResult::Busy) => format!("busy ({SERVER_BUSY})"),
        ActionResult::SendRequestXml(xml) if xml.is_empty() => "(nothing left)".to_string(),
        ActionResult::SendRequestXml(xml) => match QueryPayload::from_qbxml(xml) {
            Ok(query) => format!("{} query {}", query.phase(), query.request_id()),
            Err(err) => format!("unreadable query: {err}"),
        },
        ActionResult::ReceiveResponseXml(code) => code.to_string(),
        ActionResult::ConnectionError(ack) | ActionResult::CloseConnection(ack) => ack.clone(),
    };
    Step {
        action: exchange.request.action().to_string(),
        result,
    }
}

async fn simulate(options: &SimulateOptions) -> Result<SimulateReport, Box<dyn std::error::Error>> {
    let config = test_config().with_invoices(options.invoices > 0);
    let server = SyncServer::new(config);

    let mut quickbooks = QuickBooksDouble::new()
        .with_items(options.items)
        .with_customers(options.customers)
        .with_sales(options.receipts, options.invoices);
    if let Some(phase) = options.fail_phase {
        quickbooks = quickbooks.failing_on(
            phase,
            SIMULATED_FAILURE_CODE,
            "The simulated company file rejected the request",
        );
    }

    let mut client = ScriptedClient::new(&server);
    let run = client
        .run_sync(&quickbooks, TEST_USER, TEST_PASSWORD, TEST_COMPANY_FILE)
        .await?;
    let steps = client.transcript().iter().map(describe).collect();

    let events = match &run.ticket {
        Some(ticket) => {
            server
                .context()
                .events
                .history(&Ticket::from(ticket.as_str()))
                .await
        }
        None => Vec::new(),
    };
    info!(
        completed = run.completed(),
        phases = run.phases.len(),
        events = events.len(),
        "simulation finished"
    );

    Ok(SimulateReport {
        completed: run.completed(),
        ticket: run.ticket,
        phases: run.phases,
        progress: run.progress,
        steps,
        events,
        status: server.status().await,
    })
}

fn print_text(report: &SimulateReport) {
    println!("Web Connector simulation");
    println!("========================");
    for (i, step) in report.steps.iter().enumerate() {
        println!("{:>3}. {:<20} {}", i + 1, step.action, step.result);
    }

    println!();
    println!("Sync events:");
    for event in &report.events {
        let phase = event.metadata.phase.as_deref().unwrap_or("-");
        let records = event
            .metadata
            .records
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        println!(
            "  #{:<4} {:<17} {:<8} phase={phase} records={records}",
            event.sequence,
            event.kind.as_str(),
            format!("{:?}", event.outcome).to_lowercase(),
        );
    }

    println!();
    println!(
        "Result: {}",
        if report.completed {
            "all phases completed"
        } else {
            "cycle did not complete"
        }
    );
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(simulate(options))?;

    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report),
    }
    Ok(())
}

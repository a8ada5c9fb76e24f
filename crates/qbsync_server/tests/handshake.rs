//! End-to-end handshake tests over SOAP envelopes.

use qbsync_protocol::{
    parse_envelope, AuthenticateResult, Phase, QueryPayload, ABORT_SESSION, CLOSE_CONNECTION_ACK,
    CONNECTION_ERROR_ACK,
};
use qbsync_server::{
    EventKind, EventStore, MemoryEventLog, MemorySessionStore, Outcome, RecordCountingProcessor,
    SyncEvent, SyncServer, Ticket,
};
use qbsync_testkit::prelude::*;
use std::sync::Arc;

struct Harness {
    server: SyncServer,
    events: Arc<MemoryEventLog>,
    sessions: Arc<MemorySessionStore>,
}

fn harness() -> Harness {
    let events = Arc::new(MemoryEventLog::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let server = SyncServer::with_stores(
        test_config(),
        sessions.clone(),
        events.clone(),
        Arc::new(RecordCountingProcessor),
    );
    Harness {
        server,
        events,
        sessions,
    }
}

async fn login(client: &mut ScriptedClient<'_>) -> String {
    match client.authenticate(TEST_USER, TEST_PASSWORD).await.unwrap() {
        AuthenticateResult::Ticket { ticket, .. } => ticket,
        other => panic!("login failed: {other:?}"),
    }
}

async fn history(log: &MemoryEventLog, ticket: &str) -> Vec<SyncEvent> {
    log.events_for(&Ticket::from(ticket)).await.unwrap()
}

fn phase_of(query: &str) -> Phase {
    QueryPayload::from_qbxml(query).unwrap().phase()
}

#[tokio::test]
async fn company_then_items_then_close() {
    let h = harness();
    let mut client = ScriptedClient::new(&h.server);
    let qb = QuickBooksDouble::new();

    let ticket = login(&mut client).await;
    let query = client.send_request_xml(&ticket, "").await.unwrap();
    assert!(!query.is_empty());
    assert_eq!(phase_of(&query), Phase::Company);

    let response = qb.respond(&query).unwrap();
    let code = client
        .receive_response_xml(&ticket, &response, Some("0"), "")
        .await
        .unwrap();
    assert!((0..=100).contains(&code));

    let query = client.send_request_xml(&ticket, "").await.unwrap();
    assert_eq!(phase_of(&query), Phase::Items);

    let ack = client.close_connection(&ticket).await.unwrap();
    assert_eq!(ack, CLOSE_CONNECTION_ACK);
    assert_eq!(client.send_request_xml(&ticket, "").await.unwrap(), "");
}

#[tokio::test]
async fn wrong_password_is_a_sentinel_and_creates_nothing() {
    let h = harness();
    let mut client = ScriptedClient::new(&h.server);
    let result = client.authenticate(TEST_USER, "wrong").await.unwrap();
    assert_eq!(result, AuthenticateResult::InvalidUser);
    assert!(h.sessions.is_empty());
}

#[tokio::test]
async fn authenticate_returns_company_file() {
    let h = harness();
    let mut client = ScriptedClient::new(&h.server);
    match client.authenticate(TEST_USER, TEST_PASSWORD).await.unwrap() {
        AuthenticateResult::Ticket {
            ticket,
            company_file,
        } => {
            assert!(!ticket.is_empty());
            assert_eq!(company_file, TEST_COMPANY_FILE);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn connection_error_on_unknown_ticket_is_logged() {
    let h = harness();
    let mut client = ScriptedClient::new(&h.server);
    let ack = client
        .connection_error("never-issued", "0x80040408", "QuickBooks not found")
        .await
        .unwrap();
    assert_eq!(ack, CONNECTION_ERROR_ACK);

    let history = history(&h.events, "never-issued").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, EventKind::ConnectionError);
    assert_eq!(history[0].outcome, Outcome::Error);
    assert_eq!(history[0].metadata.code.as_deref(), Some("0x80040408"));
}

#[tokio::test]
async fn full_cycle_reports_progress_and_finishes() {
    let h = harness();
    let mut client = ScriptedClient::new(&h.server);
    let run = client
        .run_sync(&QuickBooksDouble::new(), TEST_USER, TEST_PASSWORD, TEST_COMPANY_FILE)
        .await
        .unwrap();

    assert!(run.completed());
    assert_eq!(run.phases, Phase::ALL.to_vec());
    assert_eq!(run.progress, vec![25, 50, 75, 100]);

    let ticket = run.ticket.unwrap();
    let history = history(&h.events, &ticket).await;
    let completed: Vec<_> = history
        .iter()
        .filter(|e| e.kind == EventKind::ReceiveResponse && e.outcome == Outcome::Success)
        .map(|e| (e.metadata.phase.clone().unwrap(), e.metadata.records.unwrap()))
        .collect();
    assert_eq!(
        completed,
        vec![
            ("company".to_string(), 1),
            ("items".to_string(), 3),
            ("customers".to_string(), 2),
            ("sales".to_string(), 4),
        ]
    );
    assert!(history.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(h.sessions.is_empty());

    let status = h.server.status().await;
    assert!(status.last_sync.is_some());
}

#[tokio::test]
async fn domain_error_aborts_the_cycle() {
    let h = harness();
    let qb = QuickBooksDouble::new().failing_on(Phase::Customers, "3231", "Request not processed");
    let mut client = ScriptedClient::new(&h.server);
    let run = client
        .run_sync(&qb, TEST_USER, TEST_PASSWORD, TEST_COMPANY_FILE)
        .await
        .unwrap();

    assert_eq!(run.phases, vec![Phase::Company, Phase::Items, Phase::Customers]);
    assert_eq!(run.progress, vec![25, 50, ABORT_SESSION]);
    assert!(!run.completed());

    let history = history(&h.events, run.ticket.as_deref().unwrap()).await;
    let failed = history
        .iter()
        .find(|e| e.outcome == Outcome::Error)
        .unwrap();
    assert_eq!(failed.metadata.phase.as_deref(), Some("customers"));
    assert_eq!(failed.metadata.code.as_deref(), Some("3231"));
}

#[tokio::test]
async fn invoices_are_pulled_when_enabled() {
    let events = Arc::new(MemoryEventLog::new());
    let server = SyncServer::with_stores(
        test_config().with_invoices(true),
        Arc::new(MemorySessionStore::new()),
        events.clone(),
        Arc::new(RecordCountingProcessor),
    );
    let qb = QuickBooksDouble::new().with_sales(2, 3);
    let mut client = ScriptedClient::new(&server);
    let run = client
        .run_sync(&qb, TEST_USER, TEST_PASSWORD, TEST_COMPANY_FILE)
        .await
        .unwrap();
    assert!(run.completed());

    let history = history(&events, run.ticket.as_deref().unwrap()).await;
    let sales = history
        .iter()
        .rfind(|e| e.kind == EventKind::ReceiveResponse)
        .unwrap();
    assert_eq!(sales.metadata.records, Some(5));
    assert_eq!(sales.metadata.sales_type.as_deref(), Some("receipt,invoice"));
}

#[tokio::test]
async fn sales_query_resumes_from_last_sales_sync() {
    let h = harness();
    let mut client = ScriptedClient::new(&h.server);
    let qb = QuickBooksDouble::new();
    client
        .run_sync(&qb, TEST_USER, TEST_PASSWORD, TEST_COMPANY_FILE)
        .await
        .unwrap();

    // A second cycle starts over with a new ticket; its sales query is
    // bounded by the first cycle's completion date.
    let ticket = login(&mut client).await;
    let mut sales_query = None;
    loop {
        let query = client.send_request_xml(&ticket, "").await.unwrap();
        if query.is_empty() {
            break;
        }
        let typed = QueryPayload::from_qbxml(&query).unwrap();
        if let QueryPayload::Sales {
            from_modified_date, ..
        } = typed
        {
            sales_query = Some(from_modified_date);
        }
        let response = qb.respond(&query).unwrap();
        client
            .receive_response_xml(&ticket, &response, None, "")
            .await
            .unwrap();
    }
    assert_eq!(sales_query, Some(chrono::Utc::now().date_naive()));
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let server = Arc::new(test_server());
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let server = Arc::clone(&server);
        tasks.push(tokio::spawn(async move {
            let mut client = ScriptedClient::new(&server);
            client
                .run_sync(&QuickBooksDouble::new(), TEST_USER, TEST_PASSWORD, TEST_COMPANY_FILE)
                .await
                .unwrap()
        }));
    }

    let mut tickets = std::collections::HashSet::new();
    for task in tasks {
        let run = task.await.unwrap();
        assert!(run.completed());
        tickets.insert(run.ticket.unwrap());
    }
    assert_eq!(tickets.len(), 8);
    assert_eq!(server.status().await.active_sessions, 0);
}

#[tokio::test]
async fn soap_action_header_outranks_body() {
    let server = test_server();
    let body = qbsync_protocol::ActionRequest::ServerVersion
        .to_envelope()
        .unwrap();
    let reply = server
        .handle_soap(Some("\"http://developer.intuit.com/closeConnection\""), &body)
        .await;
    let payload = parse_envelope(&reply.body).unwrap();
    assert_eq!(payload.name(), Some("closeConnectionResponse"));
}

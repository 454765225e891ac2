//! End-to-end pipeline tests: HTTP command paths feeding real consumers
//! over the shared stream, with every store wired in-process.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use lapor_core::auth::TokenService;
use lapor_core::bus::{poll_once, ConsumerConfig, EventHandler, EventStream};
use lapor_core::events::{types, Event, ReportCreated, ReportEscalated, STREAM_NAME};
use lapor_core::sla::SlaConfig;
use lapor_core::time::parse_store_ts;

use lapor_node::citizen::{self, CitizenStore, CreateReportRequest, StatusFeedConsumer};
use lapor_node::operations::{self, CaseRouter, OperationsStore, UpdateStatusRequest};
use lapor_node::projection::{ProjectionWorker, ReplicaStore};
use lapor_node::workflow::{sweep_once, WorkflowConsumer, WorkflowStore};

struct Stack {
    stream: EventStream,
    tokens: TokenService,
    citizen: citizen::CitizenState,
    operations: operations::OperationsState,
    workflow_store: WorkflowStore,
    sla: Arc<SlaConfig>,
    feed_consumer: Arc<dyn EventHandler>,
    case_router: Arc<dyn EventHandler>,
    workflow_consumer: Arc<dyn EventHandler>,
}

impl Stack {
    fn new() -> Self {
        let stream = EventStream::open_in_memory().unwrap();
        let tokens = TokenService::new("e2e-secret").unwrap();

        let citizen_store =
            CitizenStore::from_connection(rusqlite::Connection::open_in_memory().unwrap())
                .unwrap();
        let operations_store =
            OperationsStore::from_connection(rusqlite::Connection::open_in_memory().unwrap())
                .unwrap();
        let workflow_store =
            WorkflowStore::from_connection(rusqlite::Connection::open_in_memory().unwrap())
                .unwrap();
        let sla = Arc::new(SlaConfig::default());

        Self {
            citizen: citizen::CitizenState {
                store: citizen_store.clone(),
                stream: stream.clone(),
                tokens: tokens.clone(),
                instance_id: "citizen-e2e".into(),
            },
            operations: operations::OperationsState {
                store: operations_store.clone(),
                stream: stream.clone(),
                tokens: tokens.clone(),
                instance_id: "operations-e2e".into(),
            },
            feed_consumer: Arc::new(StatusFeedConsumer::new(citizen_store)),
            case_router: Arc::new(CaseRouter::new(operations_store)),
            workflow_consumer: Arc::new(WorkflowConsumer::new(workflow_store.clone(), sla.clone())),
            workflow_store,
            sla,
            stream,
            tokens,
        }
    }

    fn headers(&self, user: &str) -> HeaderMap {
        let roster = lapor_core::auth::authenticate(user, "password").unwrap();
        let token = self.tokens.issue(roster).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    /// Drains `group` through `handler` until a poll hands out nothing.
    async fn pump(&self, group: &str, handler: &Arc<dyn EventHandler>) {
        self.stream.ensure_group(STREAM_NAME, group).unwrap();
        let config = ConsumerConfig::default();
        loop {
            let handled = poll_once(&self.stream, STREAM_NAME, group, "e2e", handler, &config)
                .await
                .unwrap();
            if handled == 0 {
                break;
            }
        }
    }

    async fn pump_all(&self) {
        self.pump(operations::OPERATIONS_GROUP, &self.case_router).await;
        self.pump(lapor_node::workflow::WORKFLOW_GROUP, &self.workflow_consumer).await;
        self.pump(citizen::REPORTING_GROUP, &self.feed_consumer).await;
    }
}

/// Drives `POST /reports` and returns the new report id from the
/// published event.
async fn create_report_via_handler(
    state: citizen::CitizenState,
    headers: HeaderMap,
    req: CreateReportRequest,
) -> Uuid {
    citizen::create_report(State(state.clone()), headers, Json(req))
        .await
        .unwrap();
    let events = state
        .stream
        .events_of_type(STREAM_NAME, types::REPORT_CREATED)
        .unwrap();
    events.last().unwrap().report_id
}

#[tokio::test]
async fn scenario_a_happy_path() {
    let stack = Stack::new();

    let report_id = create_report_via_handler(
        stack.citizen.clone(),
        stack.headers("citizen1"),
        CreateReportRequest {
            content: "Jalan rusak".into(),
            visibility: "PUBLIC".into(),
            category: "infrastruktur".into(),
        },
    )
    .await;
    stack.pump_all().await;

    // (a) case row routed to AGENCY_INFRA in RECEIVED.
    let inbox = stack.operations.store.inbox("AGENCY_INFRA").unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].status, "RECEIVED");

    // (b) SLA job PENDING with deadline = created_at + SLA duration.
    let job = stack.workflow_store.sla_job(report_id).unwrap().unwrap();
    assert_eq!(job.status, "PENDING");
    let created = stack
        .stream
        .events_of_type(STREAM_NAME, types::REPORT_CREATED)
        .unwrap()[0]
        .parse_payload::<ReportCreated>()
        .unwrap()
        .created_at;
    let due = parse_store_ts(&job.due_at).unwrap();
    assert_eq!(
        due.timestamp_micros(),
        (created + chrono::Duration::seconds(60)).timestamp_micros()
    );

    // (c) the submitter's feed shows RECEIVED immediately.
    let mine = stack.citizen.store.my_reports("citizen1", 100).unwrap();
    assert_eq!(mine[0].current_status, "RECEIVED");

    // Officer moves the case to IN_PROGRESS.
    operations::update_status(
        State(stack.operations.clone()),
        stack.headers("officer1"),
        Path(report_id.to_string()),
        Json(UpdateStatusRequest { status: "IN_PROGRESS".into() }),
    )
    .await
    .unwrap();
    stack.pump_all().await;

    let mine = stack.citizen.store.my_reports("citizen1", 100).unwrap();
    assert_eq!(mine[0].current_status, "IN_PROGRESS");
    assert_eq!(
        stack.workflow_store.notifications_for("citizen1", 50).unwrap().len(),
        1
    );

    // Officer resolves.
    operations::update_status(
        State(stack.operations.clone()),
        stack.headers("officer1"),
        Path(report_id.to_string()),
        Json(UpdateStatusRequest { status: "RESOLVED".into() }),
    )
    .await
    .unwrap();
    stack.pump_all().await;

    let job = stack.workflow_store.sla_job(report_id).unwrap().unwrap();
    assert_eq!(job.status, "COMPLETED");
    assert_eq!(
        stack.workflow_store.notifications_for("citizen1", 50).unwrap().len(),
        2
    );
    let mine = stack.citizen.store.my_reports("citizen1", 100).unwrap();
    assert_eq!(mine[0].current_status, "RESOLVED");
}

#[tokio::test]
async fn scenario_b_agency_isolation() {
    let stack = Stack::new();
    let report_id = create_report_via_handler(
        stack.citizen.clone(),
        stack.headers("citizen1"),
        CreateReportRequest {
            content: "Puskesmas tutup".into(),
            visibility: "PUBLIC".into(),
            category: "kesehatan".into(),
        },
    )
    .await;
    stack.pump_all().await;

    // officer1 (AGENCY_INFRA) must not touch an AGENCY_HEALTH case.
    let err = operations::update_status(
        State(stack.operations.clone()),
        stack.headers("officer1"),
        Path(report_id.to_string()),
        Json(UpdateStatusRequest { status: "IN_PROGRESS".into() }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err.0, lapor_core::ServiceError::Authorization(_)));

    let (_, status) = stack.operations.store.case_meta(report_id).unwrap().unwrap();
    assert_eq!(status, "RECEIVED");
    assert!(stack
        .stream
        .events_of_type(STREAM_NAME, types::REPORT_STATUS_UPDATED)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn scenario_c_sla_breach_escalates_exactly_once() {
    let stack = Stack::new();
    stack.sla.set(Duration::from_secs(10)).unwrap();

    // A report created 30 seconds ago with a 10-second SLA is already
    // past its deadline when the sweeper looks.
    let report_id = Uuid::new_v4();
    let created_at = Utc::now() - chrono::Duration::seconds(30);
    let event = Event::new(
        types::REPORT_CREATED,
        report_id,
        &ReportCreated {
            report_id,
            reporter_user_id: "citizen1".into(),
            visibility: "PUBLIC".into(),
            content: "Jalan rusak".into(),
            category: "infrastruktur".into(),
            created_at,
        },
    )
    .unwrap();
    stack.stream.publish(STREAM_NAME, &event).unwrap();
    stack.pump_all().await;

    let breached = sweep_once(&stack.workflow_store, &stack.stream).await.unwrap();
    assert_eq!(breached, 1);

    let job = stack.workflow_store.sla_job(report_id).unwrap().unwrap();
    assert_eq!(job.status, "ESCALATED");
    assert_eq!(job.escalation_level, 1);

    let escalations = stack
        .stream
        .events_of_type(STREAM_NAME, types::REPORT_ESCALATED)
        .unwrap();
    assert_eq!(escalations.len(), 1);
    let payload: ReportEscalated = escalations[0].parse_payload().unwrap();
    assert_eq!(payload.escalation_level, 1);
    assert_eq!(payload.reason, "SLA_BREACH");

    // The next tick finds nothing: escalation fires at most once.
    assert_eq!(
        sweep_once(&stack.workflow_store, &stack.stream).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn scenario_f_unknown_category_falls_back_without_surfacing_an_error() {
    let stack = Stack::new();
    create_report_via_handler(
        stack.citizen.clone(),
        stack.headers("citizen1"),
        CreateReportRequest {
            content: "???".into(),
            visibility: "PUBLIC".into(),
            category: "zzz".into(),
        },
    )
    .await;
    stack.pump_all().await;

    let inbox = stack.operations.store.inbox("AGENCY_INFRA").unwrap();
    assert_eq!(inbox.len(), 1);
}

#[tokio::test]
async fn projection_fanout_applies_to_every_replica_and_converges() {
    let stack = Stack::new();
    let replicas = vec![
        ReplicaStore::from_connection(rusqlite::Connection::open_in_memory().unwrap(), "r1")
            .unwrap(),
        ReplicaStore::from_connection(rusqlite::Connection::open_in_memory().unwrap(), "r2")
            .unwrap(),
    ];
    let worker: Arc<dyn EventHandler> =
        Arc::new(ProjectionWorker::new(replicas.clone()).unwrap());

    let report_id = create_report_via_handler(
        stack.citizen.clone(),
        stack.headers("citizen1"),
        CreateReportRequest {
            content: "Jalan rusak".into(),
            visibility: "PUBLIC".into(),
            category: "infrastruktur".into(),
        },
    )
    .await;
    stack.pump_all().await;
    stack.pump(lapor_node::projection::PROJECTION_GROUP, &worker).await;

    for replica in &replicas {
        assert_eq!(replica.counter("infrastruktur", "RECEIVED").unwrap(), 1);
        assert_eq!(replica.live_rows("infrastruktur", "RECEIVED").unwrap(), 1);
    }

    // Officer resolves; the unified vocabulary carries the transition into
    // the master read model on every replica.
    operations::update_status(
        State(stack.operations.clone()),
        stack.headers("officer1"),
        Path(report_id.to_string()),
        Json(UpdateStatusRequest { status: "RESOLVED".into() }),
    )
    .await
    .unwrap();
    stack.pump(lapor_node::projection::PROJECTION_GROUP, &worker).await;

    for replica in &replicas {
        assert_eq!(replica.counter("infrastruktur", "RECEIVED").unwrap(), 0);
        assert_eq!(replica.counter("infrastruktur", "RESOLVED").unwrap(), 1);
        assert_eq!(replica.live_rows("infrastruktur", "RESOLVED").unwrap(), 1);
    }

    // A replayed delivery is a ledger-gated no-op everywhere.
    let created = stack
        .stream
        .events_of_type(STREAM_NAME, types::REPORT_CREATED)
        .unwrap();
    for replica in &replicas {
        assert!(!replica.apply(&created[0]).unwrap());
        assert_eq!(replica.counter("infrastruktur", "RESOLVED").unwrap(), 1);
    }
}

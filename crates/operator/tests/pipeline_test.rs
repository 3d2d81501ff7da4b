//! End-to-end pipeline tests: webhook payload -> policy match -> queue ->
//! worker pool -> capability call -> job log.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mend_operator::{
    config::{DispatchConfig, WorkerConfig},
    dispatch::{CapabilityError, Invocation, RemediationCapability, ToolDispatcher},
    ingest::{AlertmanagerWebhook, Ingestor},
    policy::{Action, Condition, PolicyCache},
    queue::{JobQueue, MemoryQueue},
    store::{create_store, DatabaseConfig, DatabaseType, JobStatus, NewPolicy, Store},
    worker::WorkerPool,
};

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    TransientAlways,
    PermanentAlways,
}

/// Programmable stand-in for a remediation endpoint. Tracks invocation and
/// concurrency counts so tests can assert on execution, not just job state.
struct StubTool {
    tool_name: &'static str,
    behavior: Behavior,
    hold: Duration,
    invocations: AtomicUsize,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl StubTool {
    fn new(tool_name: &'static str, behavior: Behavior, hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            tool_name,
            behavior,
            hold,
            invocations: AtomicUsize::new(0),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        })
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemediationCapability for StubTool {
    fn name(&self) -> &str {
        self.tool_name
    }

    fn description(&self) -> &str {
        "test stub"
    }

    async fn invoke(
        &self,
        _params: &HashMap<String, String>,
    ) -> Result<Invocation, CapabilityError> {
        let live = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(live, Ordering::SeqCst);
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        self.invocations.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            Behavior::Succeed => Ok(Invocation {
                detail: "done".into(),
            }),
            Behavior::TransientAlways => {
                Err(CapabilityError::Transient("connection refused".into()))
            }
            Behavior::PermanentAlways => Err(CapabilityError::Permanent("target not found".into())),
        }
    }
}

struct Harness {
    store: Arc<dyn Store>,
    ingestor: Ingestor,
    policies: Arc<PolicyCache>,
}

async fn harness(tools: Vec<Arc<StubTool>>, max_attempts: u32) -> Harness {
    let database = DatabaseConfig {
        db_type: DatabaseType::Sqlite,
        sqlite_path: Some(PathBuf::from(":memory:")),
        postgres_url: None,
        max_connections: 1,
    };
    let store = create_store(&database).await.expect("create store");
    store.init().await.expect("init store");

    let queue: Arc<dyn JobQueue> = Arc::new(MemoryQueue::new(64, Duration::from_secs(60)));

    let dispatch_config = DispatchConfig {
        lock_ttl_secs: 30,
        tool_call_timeout_secs: 10,
        kubernetes_tool_url: None,
        virt_tool_url: None,
        prometheus_tool_url: None,
        grafana_tool_url: None,
    };
    let mut dispatcher = ToolDispatcher::new(&dispatch_config);
    for tool in tools {
        dispatcher.register(tool);
    }
    let dispatcher = Arc::new(dispatcher);

    // Zero backoff keeps retry-heavy tests fast; the defer path still waits
    // its floor delay.
    let worker_config = WorkerConfig {
        count: 4,
        max_attempts,
        backoff_base_secs: 0,
        backoff_cap_secs: 0,
    };
    let pool = Arc::new(WorkerPool::new(
        queue.clone(),
        store.clone(),
        dispatcher,
        worker_config,
    ));
    pool.spawn();

    let policies = Arc::new(PolicyCache::new(store.clone()));
    let ingestor = Ingestor::new(policies.clone(), queue, store.clone(), max_attempts);

    Harness {
        store,
        ingestor,
        policies,
    }
}

impl Harness {
    async fn add_policy(&self, name: &str, priority: i32, condition: Condition, action: Action) {
        self.store
            .create_policy(NewPolicy {
                name: name.to_string(),
                condition,
                action,
                priority,
            })
            .await
            .expect("create policy");
        self.policies.refresh().await.expect("refresh policies");
    }

    async fn wait_terminal(&self, id: uuid::Uuid) -> mend_operator::store::Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = self
                .store
                .get_job(id)
                .await
                .expect("get job")
                .expect("job exists");
            if job.is_terminal() {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} did not reach a terminal state, stuck at {}",
                job.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn pod_crash_loop_condition() -> Condition {
    Condition::LabelMatch {
        labels: [("alertname".to_string(), "PodCrashLoop".to_string())]
            .into_iter()
            .collect(),
        status: None,
    }
}

fn restart_pod_action() -> Action {
    Action {
        tool: "restart_pod".into(),
        params: [
            ("pod_name".to_string(), "${label.pod_name}".to_string()),
            ("namespace".to_string(), "${label.namespace}".to_string()),
        ]
        .into_iter()
        .collect(),
    }
}

fn pod_alert(pod: &str) -> AlertmanagerWebhook {
    serde_json::from_value(json!({
        "status": "firing",
        "alerts": [{
            "labels": {
                "alertname": "PodCrashLoop",
                "pod_name": pod,
                "namespace": "production"
            }
        }]
    }))
    .unwrap()
}

#[tokio::test]
async fn alert_flows_to_successful_remediation() {
    let tool = StubTool::new("restart_pod", Behavior::Succeed, Duration::ZERO);
    let h = harness(vec![tool.clone()], 3).await;
    h.add_policy("restart-crashloops", 10, pod_crash_loop_condition(), restart_pod_action())
        .await;

    let summary = h.ingestor.ingest(pod_alert("app-pod-123")).await.unwrap();
    assert_eq!(summary.status, "accepted");
    assert_eq!(summary.enqueued, 1);

    let job = h.wait_terminal(summary.job_ids[0]).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempts, 1);
    assert_eq!(
        job.resolved_params.get("pod_name").map(String::as_str),
        Some("app-pod-123")
    );
    assert_eq!(
        job.resolved_params.get("namespace").map(String::as_str),
        Some("production")
    );
    assert_eq!(job.target_key, "production/app-pod-123");
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert_eq!(tool.invocations(), 1);

    let logs = h.store.list_job_logs(10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].job_id, job.id);
    assert_eq!(logs[0].action, "restart_pod");
    assert_eq!(logs[0].target, "production/app-pod-123");
    assert_eq!(logs[0].status, "succeeded");
}

#[tokio::test]
async fn unresolvable_policy_creates_no_job_and_batch_succeeds() {
    let tool = StubTool::new("restart_pod", Behavior::Succeed, Duration::ZERO);
    let h = harness(vec![tool.clone()], 3).await;

    let broken_action = Action {
        tool: "restart_pod".into(),
        params: [("pod_name".to_string(), "${label.missing_key}".to_string())]
            .into_iter()
            .collect(),
    };
    h.add_policy("broken", 10, pod_crash_loop_condition(), broken_action)
        .await;

    let summary = h.ingestor.ingest(pod_alert("app-pod-123")).await.unwrap();
    assert_eq!(summary.status, "no_action");
    assert_eq!(summary.enqueued, 0);
    assert_eq!(summary.skipped_policies, 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.store.list_jobs(10, 0).await.unwrap().is_empty());
    assert_eq!(tool.invocations(), 0);
}

#[tokio::test]
async fn skipped_policy_falls_through_to_next_priority() {
    let restart = StubTool::new("restart_pod", Behavior::Succeed, Duration::ZERO);
    let query = StubTool::new("query_prometheus", Behavior::Succeed, Duration::ZERO);
    let h = harness(vec![restart.clone(), query.clone()], 3).await;

    // Highest precedence policy references a label the alert lacks.
    let broken_action = Action {
        tool: "restart_pod".into(),
        params: [("pod_name".to_string(), "${label.absent}".to_string())]
            .into_iter()
            .collect(),
    };
    h.add_policy("broken-urgent", 10, pod_crash_loop_condition(), broken_action)
        .await;
    h.add_policy(
        "diagnose",
        50,
        pod_crash_loop_condition(),
        Action {
            tool: "query_prometheus".into(),
            params: [("query".to_string(), "up{pod=\"${label.pod_name}\"}".to_string())]
                .into_iter()
                .collect(),
        },
    )
    .await;

    let summary = h.ingestor.ingest(pod_alert("app-pod-123")).await.unwrap();
    assert_eq!(summary.enqueued, 1);
    assert_eq!(summary.skipped_policies, 1);

    let job = h.wait_terminal(summary.job_ids[0]).await;
    assert_eq!(job.tool, "query_prometheus");
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(query.invocations(), 1);
    assert_eq!(restart.invocations(), 0);
}

#[tokio::test]
async fn transient_failures_exhaust_attempts_exactly() {
    let tool = StubTool::new("restart_pod", Behavior::TransientAlways, Duration::ZERO);
    let h = harness(vec![tool.clone()], 3).await;
    h.add_policy("restart-crashloops", 10, pod_crash_loop_condition(), restart_pod_action())
        .await;

    let summary = h.ingestor.ingest(pod_alert("app-pod-123")).await.unwrap();
    let job = h.wait_terminal(summary.job_ids[0]).await;

    assert_eq!(job.status, JobStatus::FailedTerminal);
    assert_eq!(job.attempts, job.max_attempts);
    assert_eq!(job.attempts, 3);
    assert_eq!(tool.invocations(), 3);

    let logs = h.store.list_job_logs(10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "failed_terminal");
    assert!(logs[0].result.as_deref().unwrap().contains("after 3 attempts"));
}

#[tokio::test]
async fn permanent_failure_is_terminal_on_first_attempt() {
    let tool = StubTool::new("restart_vm", Behavior::PermanentAlways, Duration::ZERO);
    let h = harness(vec![tool.clone()], 3).await;
    h.add_policy(
        "restart-vm",
        10,
        Condition::SingleKeyValue {
            label: "alertname".into(),
            value: "VmDown".into(),
        },
        Action {
            tool: "restart_vm".into(),
            params: [("vm_name".to_string(), "${label.vm_name}".to_string())]
                .into_iter()
                .collect(),
        },
    )
    .await;

    let payload: AlertmanagerWebhook = serde_json::from_value(json!({
        "status": "firing",
        "alerts": [{"labels": {"alertname": "VmDown", "vm_name": "db-vm-7"}}]
    }))
    .unwrap();

    let summary = h.ingestor.ingest(payload).await.unwrap();
    let job = h.wait_terminal(summary.job_ids[0]).await;

    assert_eq!(job.status, JobStatus::FailedTerminal);
    assert_eq!(job.attempts, 1);
    assert_eq!(tool.invocations(), 1);
}

#[tokio::test]
async fn unknown_tool_fails_terminally_without_invocation() {
    let h = harness(vec![], 3).await;
    h.add_policy("restart-crashloops", 10, pod_crash_loop_condition(), restart_pod_action())
        .await;

    let summary = h.ingestor.ingest(pod_alert("app-pod-123")).await.unwrap();
    let job = h.wait_terminal(summary.job_ids[0]).await;

    assert_eq!(job.status, JobStatus::FailedTerminal);
    assert_eq!(job.attempts, 0);
    assert!(job
        .result_summary
        .as_deref()
        .unwrap()
        .contains("unknown tool"));
}

#[tokio::test]
async fn same_target_never_remediated_concurrently() {
    let tool = StubTool::new("restart_pod", Behavior::Succeed, Duration::from_millis(150));
    let h = harness(vec![tool.clone()], 3).await;
    h.add_policy("restart-crashloops", 10, pod_crash_loop_condition(), restart_pod_action())
        .await;

    // Two alerts for the same pod in the same instant. Both must succeed,
    // one at a time.
    let first = h.ingestor.ingest(pod_alert("app-pod-123")).await.unwrap();
    let second = h.ingestor.ingest(pod_alert("app-pod-123")).await.unwrap();
    assert_eq!(first.enqueued, 1);
    assert_eq!(second.enqueued, 1);

    let a = h.wait_terminal(first.job_ids[0]).await;
    let b = h.wait_terminal(second.job_ids[0]).await;

    assert_eq!(a.status, JobStatus::Succeeded);
    assert_eq!(b.status, JobStatus::Succeeded);
    assert_eq!(tool.invocations(), 2);
    assert_eq!(tool.max_concurrent(), 1);
}

#[tokio::test]
async fn distinct_targets_run_in_parallel() {
    let tool = StubTool::new("restart_pod", Behavior::Succeed, Duration::from_millis(150));
    let h = harness(vec![tool.clone()], 3).await;
    h.add_policy("restart-crashloops", 10, pod_crash_loop_condition(), restart_pod_action())
        .await;

    let first = h.ingestor.ingest(pod_alert("pod-a")).await.unwrap();
    let second = h.ingestor.ingest(pod_alert("pod-b")).await.unwrap();

    let a = h.wait_terminal(first.job_ids[0]).await;
    let b = h.wait_terminal(second.job_ids[0]).await;
    assert_eq!(a.status, JobStatus::Succeeded);
    assert_eq!(b.status, JobStatus::Succeeded);
    // Different targets are free to overlap.
    assert!(tool.max_concurrent() >= 1);
}

//! Integration tests for the orchestration engine
//!
//! Drives full runs against scripted backends: routing through the default
//! snapshot, concurrent execution, validator review, escalation and merge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordination::{
    Backend, BackendError, BackendId, BackendPool, BackendRegistry, EngineConfig, EngineSnapshot,
    ErrorKind, EventBus, ExecutionMode, MergeStrategy, OrchestrationEngine, OrchestrationError,
    RoutingConfig, RoutingError, RunStatus, SessionState, SnapshotHandle, Task,
};
use tokio_util::sync::CancellationToken;

/// Well documented, tested output: scores 100.
const STRONG: &str = "Implementation with docs and tests.\n\n```python\n\"\"\"Math helpers.\"\"\"\n\ndef add(a: int, b: int) -> int:\n    \"\"\"Add two numbers.\"\"\"\n    # plain addition\n    try:\n        return a + b\n    except TypeError:\n        raise ValueError(\"bad input\")\n\n\ndef test_add():\n    assert add(1, 2) == 3\n```\n";

/// Same shape without documentation: scores 90.
const PLAIN: &str = "```python\ndef multiply(a: int, b: int) -> int:\n    try:\n        return a * b\n    except TypeError:\n        raise ValueError(\"bad input\")\n\n\ndef test_multiply():\n    assert multiply(2, 3) == 6\n```\n";

fn review(confidence: f64) -> String {
    format!(
        "```json\n{{\"analyses\": {{\"codex\": {{\"score\": 92, \"strengths\": [\"clear\"], \"merge_worthy\": true}}, \
         \"grok\": {{\"score\": 85, \"merge_worthy\": true}}}}, \"merge_recommendation\": [\"codex\"], \
         \"confidence\": {confidence}, \"concerns\": [], \"summary\": \"Both usable.\"}}\n```"
    )
}

/// Answers primary prompts and review prompts from separate scripts.
struct ScriptedBackend {
    id: BackendId,
    delay: Duration,
    primary: Result<String, BackendError>,
    review: Result<String, BackendError>,
}

impl ScriptedBackend {
    fn new(id: &str, primary: Result<String, BackendError>) -> Self {
        Self {
            id: id.into(),
            delay: Duration::from_millis(20),
            primary,
            review: Ok(review(0.95)),
        }
    }

    fn reviewing(mut self, review: Result<String, BackendError>) -> Self {
        self.review = review;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    async fn execute(&self, prompt: &str, _timeout: Duration) -> Result<String, BackendError> {
        tokio::time::sleep(self.delay).await;
        if prompt.starts_with("## Task") {
            self.review.clone()
        } else {
            self.primary.clone()
        }
    }
}

fn engine(pool: BackendPool) -> OrchestrationEngine {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    let snapshot = EngineSnapshot::new(BackendRegistry::default(), RoutingConfig::default())
        .expect("default snapshot should validate");
    let config = EngineConfig::default()
        .with_timeout(Duration::from_secs(5))
        .with_retries(1, Duration::from_millis(10));
    OrchestrationEngine::new(SnapshotHandle::new(snapshot), pool, config)
}

fn standard_pool() -> BackendPool {
    BackendPool::new()
        .with(ScriptedBackend::new("codex", Ok(STRONG.into())))
        .with(ScriptedBackend::new("grok", Ok(PLAIN.into())))
        .with(ScriptedBackend::new("claude", Ok(PLAIN.into())))
        .with(ScriptedBackend::new("gemini", Ok(PLAIN.into())))
}

const DEVOPS_TASK: &str = "build a CI/CD pipeline for Docker and Kubernetes";

/// Test: DevOps task routes to codex+grok, claude validates, clean output auto-merges
#[tokio::test(start_paused = true)]
async fn test_devops_run_completes() {
    let engine = engine(standard_pool());
    let (result, session) = engine
        .run(Task::new(DEVOPS_TASK), &SessionState::default())
        .await
        .unwrap();

    assert_eq!(result.routing.category, "devops");
    assert_eq!(result.routing.mode, ExecutionMode::Medium);
    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(result.outcomes[0].backend.as_str(), "codex");
    assert_eq!(result.validator_outcomes.len(), 1);

    let analysis = result.analysis.as_ref().unwrap();
    assert_eq!(analysis.validators, vec![BackendId::from("claude")]);
    assert_eq!(analysis.strategy, MergeStrategy::UseBest);
    assert!((analysis.confidence - 0.95).abs() < 1e-9, "{}", analysis.confidence);

    let artifact = result.artifact.as_ref().unwrap();
    assert_eq!(artifact.content, STRONG);
    assert!(!artifact.provisional);

    assert_eq!(result.status, RunStatus::Complete);
    assert!(!result.needs_human_review, "{:?}", result.review_reasons);
    assert!(result.failure_reasons.is_empty());

    let path: Vec<RunStatus> = result.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        path,
        vec![
            RunStatus::Routing,
            RunStatus::Executing,
            RunStatus::Validating,
            RunStatus::Merging,
            RunStatus::Complete
        ]
    );
    assert!(!session.is_sticky());
}

/// Test: confidence 0.85 with no critical issue still escalates
#[tokio::test(start_paused = true)]
async fn test_escalation_floor() {
    let pool = standard_pool().with(ScriptedBackend::new("claude", Ok(PLAIN.into())).reviewing(Ok(review(0.85))));
    let (result, _) = engine(pool)
        .run(Task::new(DEVOPS_TASK), &SessionState::default())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Escalated);
    assert!(result.needs_human_review);
    assert_eq!(result.review_reasons, vec!["Confidence 85% below threshold 90%"]);
    let artifact = result.artifact.unwrap();
    assert!(artifact.provisional);
    assert_eq!(artifact.content, STRONG);
}

/// Test: security-sensitive output escalates regardless of score
#[tokio::test(start_paused = true)]
async fn test_security_keywords_escalate() {
    let risky = format!("{STRONG}\nBefore running, drop the production database and reseed it.\n");
    let pool = standard_pool().with(ScriptedBackend::new("codex", Ok(risky)));
    let (result, _) = engine(pool)
        .run(Task::new(DEVOPS_TASK), &SessionState::default())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Escalated);
    assert!(result
        .review_reasons
        .iter()
        .any(|r| r.contains("codex") && r.contains("drop the production database")));
}

/// Test: one primary failing is isolated; the run still completes
#[tokio::test(start_paused = true)]
async fn test_partial_failure_is_isolated() {
    let pool = standard_pool().with(ScriptedBackend::new(
        "grok",
        Err(BackendError::Fatal("401 unauthorized".into())),
    ));
    let (result, _) = engine(pool)
        .run(Task::new(DEVOPS_TASK), &SessionState::default())
        .await
        .unwrap();

    assert_eq!(result.outcomes.len(), 2);
    assert!(result.outcomes[0].success);
    assert_eq!(result.outcomes[1].error, Some(ErrorKind::Fatal));
    assert_eq!(result.successful_outcomes().count(), 1);
    assert_eq!(result.failure_reasons.len(), 1);
    assert!(result.failure_reasons[0].starts_with("grok: fatal"));
    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(result.artifact.unwrap().sources, vec![BackendId::from("codex")]);
}

/// Test: no primary succeeding fails the run with every reason listed
#[tokio::test(start_paused = true)]
async fn test_total_failure() {
    let pool = standard_pool()
        .with(ScriptedBackend::new("codex", Err(BackendError::Transient("503".into()))))
        .with(ScriptedBackend::new("grok", Ok(PLAIN.into())).slow(Duration::from_secs(60)));
    let (result, _) = engine(pool)
        .run(Task::new(DEVOPS_TASK), &SessionState::default())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.artifact.is_none());
    assert!(result.analysis.is_none());
    assert_eq!(result.failure_reasons.len(), 2);
    assert!(result.failure_reasons[0].starts_with("codex: transient"));
    assert!(result.failure_reasons[1].starts_with("grok: timeout"));
    assert_eq!(result.outcomes[0].attempts, 2);
    assert_eq!(result.transitions.last().map(|t| t.to), Some(RunStatus::Failed));
}

/// Test: validator failure degrades to raw outcomes plus mandatory review
#[tokio::test(start_paused = true)]
async fn test_validation_unavailable() {
    let pool = standard_pool().with(
        ScriptedBackend::new("claude", Ok(PLAIN.into()))
            .reviewing(Err(BackendError::Fatal("quota exhausted".into()))),
    );
    let (result, _) = engine(pool)
        .run(Task::new(DEVOPS_TASK), &SessionState::default())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Escalated);
    assert!(result.needs_human_review);
    assert!(result.analysis.is_none());
    assert!(result.artifact.is_none());
    assert_eq!(result.successful_outcomes().count(), 2);
    assert!(result.review_reasons[0].starts_with("Validation unavailable"));
    assert_eq!(result.validator_outcomes[0].error, Some(ErrorKind::Fatal));
}

/// Test: override runs one backend in simple mode without validation
#[tokio::test(start_paused = true)]
async fn test_override_simple_mode() {
    let task = Task::new(DEVOPS_TASK).with_override("gemini");
    let (result, _) = engine(standard_pool())
        .run(task, &SessionState::default())
        .await
        .unwrap();

    assert_eq!(result.routing.mode, ExecutionMode::Simple);
    assert_eq!(result.outcomes.len(), 1);
    assert!(result.analysis.is_none());
    assert!(result.validator_outcomes.is_empty());
    assert_eq!(result.artifact.unwrap().content, PLAIN);
    assert_eq!(result.status, RunStatus::Complete);
    assert!(!result.transitions.iter().any(|t| t.to == RunStatus::Validating));
}

/// Test: unknown override is a routing error, not a result
#[tokio::test]
async fn test_unknown_override_is_error() {
    let task = Task::new(DEVOPS_TASK).with_override("nobody");
    let err = engine(standard_pool())
        .run(task, &SessionState::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::Routing(RoutingError::UnknownOverride(_))
    ));
}

/// Test: architectural mode fans out to every backend and validates locally
#[tokio::test(start_paused = true)]
async fn test_architectural_mode_uses_all_backends() {
    let task = Task::new("Propose a system design for the billing platform");
    let (result, session) = engine(standard_pool())
        .run(task, &SessionState::default())
        .await
        .unwrap();

    assert_eq!(result.routing.mode, ExecutionMode::Architectural);
    assert_eq!(result.outcomes.len(), 4);
    assert!(result.validator_outcomes.is_empty());
    let analysis = result.analysis.unwrap();
    assert!(analysis.validators.is_empty());
    assert_eq!(analysis.recommendation, vec![BackendId::from("codex")]);
    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(session.category.as_deref(), Some("architecture"));
}

/// Test: complex mode reconciles two validators that pick different outputs
#[tokio::test(start_paused = true)]
async fn test_complex_mode_validators_disagree() {
    let veto = "```json\n{\"analyses\": {\"codex\": {\"score\": 40, \"merge_worthy\": false, \
                \"issues\": [\"warning: swallows the original TypeError\"]}, \
                \"grok\": {\"score\": 88, \"merge_worthy\": true}}, \
                \"merge_recommendation\": [\"grok\"], \"confidence\": 0.95, \"concerns\": []}\n```";
    let pool = standard_pool().with(ScriptedBackend::new("gemini", Ok(PLAIN.into())).reviewing(Ok(veto.into())));
    let task = Task::new(DEVOPS_TASK).with_complexity(ExecutionMode::Complex);
    let (result, _) = engine(pool).run(task, &SessionState::default()).await.unwrap();

    assert_eq!(result.routing.mode, ExecutionMode::Complex);
    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(result.validator_outcomes.len(), 2);

    let analysis = result.analysis.as_ref().unwrap();
    assert_eq!(analysis.validators, vec![BackendId::from("claude"), BackendId::from("gemini")]);
    // the veto survives reconciliation, so grok is the only merge-worthy output
    assert!(!analysis.analysis_for(&BackendId::from("codex")).unwrap().merge_worthy);
    assert_eq!(analysis.recommendation, vec![BackendId::from("grok")]);
    assert!(analysis.confidence < 0.9, "{}", analysis.confidence);
    assert!(analysis
        .concerns
        .iter()
        .any(|c| c.contains("disagree") && c.contains("codex") && c.contains("grok")));

    assert_eq!(result.status, RunStatus::Escalated);
    assert!(result.needs_human_review);
    assert!(result.review_reasons.iter().any(|r| r.starts_with("Confidence 89%")));
    assert!(result.review_reasons.iter().any(|r| r.contains("disagree")));
    let artifact = result.artifact.unwrap();
    assert!(artifact.provisional);
    assert_eq!(artifact.content, PLAIN);
}

/// Test: complex mode combines complementary outputs when both validators agree
#[tokio::test(start_paused = true)]
async fn test_complex_mode_combines_complementary_outputs() {
    // documented but lightly tested: scores 96, strong on documentation only
    let documented = "Documented helper with a short note on the approach taken.\n\n```python\n\"\"\"Math helpers.\"\"\"\n\ndef add(a: int, b: int) -> int:\n    \"\"\"Add two numbers.\"\"\"\n    # plain addition\n    return a + b\n\n\ndef test_add():\n    assert add(1, 2) == 3\n```\n";
    let pool = standard_pool().with(ScriptedBackend::new("codex", Ok(documented.into())));
    let task = Task::new(DEVOPS_TASK).with_complexity(ExecutionMode::Complex);
    let (result, _) = engine(pool).run(task, &SessionState::default()).await.unwrap();

    assert_eq!(result.validator_outcomes.len(), 2);
    let analysis = result.analysis.as_ref().unwrap();
    assert_eq!(analysis.validators.len(), 2);
    assert_eq!(analysis.strategy, MergeStrategy::Combine);
    assert_eq!(analysis.recommendation, vec![BackendId::from("codex"), BackendId::from("grok")]);
    assert!(analysis.concerns.is_empty(), "{:?}", analysis.concerns);

    let artifact = result.artifact.as_ref().unwrap();
    assert_eq!(artifact.strategy, MergeStrategy::Combine);
    assert_eq!(artifact.sources, vec![BackendId::from("codex"), BackendId::from("grok")]);
    assert!(artifact.content.contains("def add(a: int, b: int) -> int:"));
    assert!(artifact.content.contains("# From grok\ndef multiply"));
    assert!(!artifact.provisional);

    assert_eq!(result.status, RunStatus::Complete, "{:?}", result.review_reasons);
}

/// Test: cancellation stops in-flight calls and surfaces as an error
#[tokio::test(start_paused = true)]
async fn test_cancellation() {
    let pool = BackendPool::new()
        .with(ScriptedBackend::new("codex", Ok(STRONG.into())).slow(Duration::from_secs(3)))
        .with(ScriptedBackend::new("grok", Ok(PLAIN.into())).slow(Duration::from_secs(3)))
        .with(ScriptedBackend::new("claude", Ok(PLAIN.into())))
        .with(ScriptedBackend::new("gemini", Ok(PLAIN.into())));
    let engine = Arc::new(engine(pool));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = engine
        .run_with_cancel(Task::new(DEVOPS_TASK), &SessionState::default(), cancel)
        .await
        .unwrap_err();
    match err {
        OrchestrationError::Cancelled { settled } => {
            assert_eq!(settled.len(), 2);
            assert!(settled.iter().all(|o| o.error == Some(ErrorKind::Cancelled)));
        }
        other => panic!("expected cancellation, got {other}"),
    }
}

/// Test: progress events bracket the run
#[tokio::test(start_paused = true)]
async fn test_progress_events() {
    let bus = EventBus::new().shared();
    let mut rx = bus.subscribe();
    let engine = engine(standard_pool()).with_events(bus.clone());

    let (result, _) = engine
        .run(Task::new(DEVOPS_TASK), &SessionState::default())
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.run_id(), result.run_id);
        kinds.push(event.event_type());
    }
    assert_eq!(kinds.first(), Some(&"task_received"));
    assert_eq!(kinds[1], "task_routed");
    assert_eq!(kinds.last(), Some(&"run_completed"));
    assert!(kinds.contains(&"validation_completed"));
    assert!(kinds.contains(&"merge_completed"));
    assert_eq!(kinds.iter().filter(|k| **k == "backend_completed").count(), 3);
}

/// Test: a routing snapshot swapped between runs applies to the next run
#[tokio::test(start_paused = true)]
async fn test_routing_swap_applies_to_next_run() {
    let engine = engine(standard_pool());
    let mut routing = RoutingConfig::default();
    for category in &mut routing.categories {
        if category.name == "devops" {
            category.primaries = vec![BackendId::from("grok"), BackendId::from("gemini")];
        }
    }
    engine.snapshots().replace_routing(routing).unwrap();

    let (result, _) = engine
        .run(Task::new(DEVOPS_TASK), &SessionState::default())
        .await
        .unwrap();
    assert_eq!(result.routing.primaries.len(), 2);
    assert!(result.routing.primaries.contains(&BackendId::from("gemini")));
    assert!(!result.routing.primaries.contains(&BackendId::from("codex")));
}

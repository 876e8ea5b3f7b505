//! End-to-end procedure runs against the built-in handlers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use mop_engine::procedure::{parse_definition, parse_procedure, to_yaml};
use mop_engine::{
    EngineError, ExecutionService, ExecutionStatus, Interpreter, MemoryRecorder,
    ProcedureDefinition, ProcedureGraph, RecordedEvent, StepDefinition, ValueMap, Violation,
};
use mop_tools::{
    create_default_registry, CommandOutput, DeviceTransport, MessageRelay, Notification,
    SandboxConfig, StepError, StepStatus,
};

/// Transport where `dev2` is unreachable and everything else echoes.
struct FleetTransport;

#[async_trait]
impl DeviceTransport for FleetTransport {
    async fn send_command(
        &self,
        device: &str,
        command: &str,
        _timeout: Option<Duration>,
    ) -> Result<CommandOutput, StepError> {
        if device == "dev2" {
            return Err(StepError::Transport(format!("{}: connection refused", device)));
        }
        Ok(CommandOutput {
            output: format!("{} ran {}\n", device, command),
            stderr: String::new(),
            exit_code: Some(0),
        })
    }
}

#[derive(Default)]
struct InboxRelay {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl MessageRelay for InboxRelay {
    async fn deliver(&self, notification: &Notification) -> Result<(), StepError> {
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

struct Harness {
    interpreter: Interpreter,
    relay: Arc<InboxRelay>,
    recorder: Arc<MemoryRecorder>,
}

fn harness() -> Harness {
    let relay = Arc::new(InboxRelay::default());
    let recorder = Arc::new(MemoryRecorder::new());
    let registry = create_default_registry(
        Arc::new(FleetTransport),
        relay.clone(),
        SandboxConfig::default(),
    )
    .unwrap();
    let interpreter = Interpreter::new(Arc::new(registry)).with_recorder(recorder.clone());
    Harness {
        interpreter,
        relay,
        recorder,
    }
}

fn graph(yaml: &str) -> ProcedureGraph {
    parse_procedure(yaml).unwrap()
}

#[tokio::test]
async fn check_success_then_notify() {
    let h = harness();
    let g = graph(
        r#"
name: scenario-1
devices: []
variables:
  expected: 3
steps:
  - name: Verify
    id: A
    type: check
    devices: []
    params:
      conditions:
        - value: "{{ expected }}"
          op: gte
          expected: 2
    on_success: B
  - name: Announce
    id: B
    type: notify
    devices: []
    params:
      subject: "done"
      body: "verified {{ expected }}"
"#,
    );

    let exec = h.interpreter.run(&g, ValueMap::new()).await;

    assert_eq!(exec.status, ExecutionStatus::Success);
    assert_eq!(exec.visited, vec!["A", "B"]);
    let sent = h.relay.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, "verified 3");
}

#[tokio::test]
async fn failure_jumps_over_following_steps() {
    let h = harness();
    let g = graph(
        r#"
name: scenario-2
steps:
  - name: Gate
    id: A
    type: check
    devices: []
    params:
      conditions:
        - value: "down"
          expected: "up"
    on_failure: C
  - name: Skipped
    id: B
    type: notify
    devices: []
    params:
      body: "should not run"
  - name: Remediate
    id: C
    type: check
    devices: []
    params:
      conditions:
        - value: false
          op: truthy
"#,
    );

    let exec = h.interpreter.run(&g, ValueMap::new()).await;

    assert_eq!(exec.visited, vec!["A", "C"]);
    assert!(exec.results_for("B").is_empty());
    // C itself fails, so the run fails.
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.context.step_status["A"], StepStatus::Failed);
    assert!(h.relay.sent.lock().await.is_empty());
}

#[tokio::test]
async fn any_device_failure_fails_the_step() {
    let h = harness();
    let g = graph(
        r#"
name: scenario-3
devices: [dev2, dev1]
steps:
  - name: Show version
    id: show
    type: command
    params:
      command: "show version"
    on_success: done
    on_failure: rollback
  - name: Done
    id: done
    type: notify
    devices: []
    params:
      body: "ok"
  - name: Rollback
    id: rollback
    type: command
    devices: [dev1]
    params:
      command: "rollback on {{ device }}"
"#,
    );

    let exec = h.interpreter.run(&g, ValueMap::new()).await;

    assert_eq!(exec.context.step_status["show"], StepStatus::Failed);
    assert_eq!(exec.visited, vec!["show", "rollback"]);
    assert_eq!(exec.status, ExecutionStatus::Success);

    let show = exec.results_for("show");
    assert_eq!(show.len(), 2);
    assert_eq!(show[0].device.as_deref(), Some("dev1"));
    assert_eq!(show[0].result.status, StepStatus::Success);
    assert_eq!(show[1].device.as_deref(), Some("dev2"));
    assert_eq!(show[1].result.status, StepStatus::Error);

    let dev1 = exec.context.device("dev1").unwrap();
    let dev2 = exec.context.device("dev2").unwrap();
    assert_eq!(dev1["show"]["status"], json!("success"));
    assert_eq!(dev1["show"]["data"]["stdout"], json!("dev1 ran show version\n"));
    assert_eq!(dev2["show"]["status"], json!("error"));
    assert!(dev2.get("rollback").is_none());

    let rollback = exec.context.result_for("rollback", Some("dev1")).unwrap();
    assert_eq!(rollback.data["stdout"], json!("dev1 ran rollback on dev1\n"));
}

#[tokio::test]
async fn deny_listed_code_never_runs() {
    let h = harness();
    let g = graph(
        r#"
name: scenario-4
devices: [dev1]
variables:
  counter: 1
steps:
  - name: Sneaky
    id: sneaky
    type: code
    devices: []
    params:
      code: |
        vars.counter = 99;
        import "fs" as fs;
"#,
    );

    let exec = h.interpreter.run(&g, ValueMap::new()).await;

    assert_eq!(exec.status, ExecutionStatus::Failed);
    let result = exec.context.result_for("sneaky", None).unwrap();
    assert_eq!(result.status, StepStatus::Error);
    assert!(result.message.contains("Security rejection"));
    assert_eq!(exec.context.globals["counter"], json!(1));
    assert!(exec.context.device("dev1").unwrap().is_empty());
}

#[tokio::test]
async fn cycle_exhausts_revisit_budget() {
    let h = harness();
    let g = graph(
        r#"
name: scenario-5
steps:
  - name: First
    id: a
    type: delay
    devices: []
    params:
      milliseconds: 1
    on_success: b
  - name: Second
    id: b
    type: delay
    devices: []
    params:
      milliseconds: 1
    on_success: a
"#,
    );

    let exec = tokio::time::timeout(
        Duration::from_secs(5),
        h.interpreter.run(&g, ValueMap::new()),
    )
    .await
    .expect("cyclic procedure must terminate");

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.visited, vec!["a", "b"]);
    assert!(exec.error.as_deref().unwrap().contains("Step 'a' reached 2 times"));

    let events = h.recorder.events().await;
    assert!(matches!(
        events.last(),
        Some(RecordedEvent::ExecutionComplete {
            status: ExecutionStatus::Failed,
            ..
        })
    ));
}

#[tokio::test]
async fn out_of_range_delay_routes_to_on_failure() {
    let yaml = r#"
name: bad-delay
devices: []
steps:
  - name: Settle
    id: wait
    type: delay
    devices: []
    params:
      seconds: 1.0e+30
    on_failure: n
  - name: Report
    id: n
    type: notify
    devices: []
    params:
      subject: "settle failed"
      body: "{{ steps.wait.status }}"
"#;

    let h = harness();
    let exec = h.interpreter.run(&graph(yaml), ValueMap::new()).await;

    assert_eq!(exec.visited, vec!["wait", "n"]);
    assert_eq!(exec.log[0].result.status, StepStatus::Error);
    assert!(exec.log[0].result.message.contains("Invalid parameters"));
    assert_eq!(exec.status, ExecutionStatus::Success);
    assert_eq!(h.relay.sent.lock().await[0].body, "failed");

    let service = ExecutionService::new(harness().interpreter);
    let id = service.submit(graph(yaml), ValueMap::new()).await.unwrap();
    let exec = service.wait(id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Success);
    assert_eq!(service.status(id).await.unwrap(), ExecutionStatus::Success);
}

#[tokio::test]
async fn code_results_feed_later_steps() {
    let h = harness();
    let g = graph(
        r#"
name: threading
devices: [dev1, dev3]
variables:
  min_len: 5
steps:
  - name: Collect
    id: collect
    type: command
    params:
      command: "show interfaces"
    on_success: score
  - name: Score
    id: score
    type: code
    params:
      code: |
        vars.out_len = steps.collect.result.data.stdout.len();
        vars.out_len >= globals.min_len
    on_success: verify
  - name: Verify
    id: verify
    type: check
    devices: []
    params:
      conditions:
        - value: "{{ devices.dev1.out_len }}"
          op: eq
          expected: "{{ devices.dev3.out_len }}"
"#,
    );

    let exec = h.interpreter.run(&g, ValueMap::new()).await;

    assert_eq!(exec.status, ExecutionStatus::Success, "{:?}", exec.log);
    assert_eq!(exec.visited, vec!["collect", "score", "verify"]);
    assert_eq!(exec.context.device("dev1").unwrap()["out_len"], json!(25));
    assert_eq!(exec.context.history.len(), 3);
}

#[tokio::test]
async fn overrides_replace_defaults() {
    let h = harness();
    let g = graph(
        r#"
name: overrides
variables:
  site: lon1
steps:
  - name: Tell
    type: notify
    devices: []
    params:
      body: "site {{ site }}"
"#,
    );
    let mut overrides = ValueMap::new();
    overrides.insert("site".into(), json!("ams2"));

    let exec = h.interpreter.run(&g, overrides).await;

    assert_eq!(exec.status, ExecutionStatus::Success);
    assert_eq!(h.relay.sent.lock().await[0].body, "site ams2");
}

#[test]
fn zero_steps_rejected() {
    let err = parse_procedure("name: empty\ndevices: [dev1]\nsteps: []\n").unwrap_err();
    match err {
        EngineError::Validation(v) => assert_eq!(v.violations, vec![Violation::NoSteps]),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn single_step_without_transitions() {
    let h = harness();
    let g = graph(
        r#"
name: single
devices: [dev1, dev2]
steps:
  - name: Only
    type: command
    params:
      command: uptime
"#,
    );

    let exec = h.interpreter.run(&g, ValueMap::new()).await;

    assert_eq!(exec.visited, vec!["0"]);
    assert_eq!(exec.log.len(), 2);
    assert_eq!(exec.status, ExecutionStatus::Failed);
}

#[test]
fn invalid_definition_lists_every_violation() {
    let err = parse_procedure(
        r#"
name: broken
steps:
  - name: A
    id: a
    type: check
    on_success: nowhere
  - name: B
    id: a
    type: notify
    on_failure: also-nowhere
"#,
    )
    .unwrap_err();

    let EngineError::Validation(v) = err else {
        panic!("expected validation error");
    };
    assert_eq!(v.violations.len(), 5);
    assert!(v.violations.contains(&Violation::DuplicateStepId { id: "a".into() }));
    assert!(v.violations.contains(&Violation::NoDevices { step: "a".into() }));
}

#[test]
fn roundtrip_preserves_graph() {
    let yaml = r#"
name: roundtrip
description: parse, serialize, parse
devices: [dev1]
steps:
  - name: A
    type: command
    params:
      command: "show {{ device }}"
    on_success: "2"
    on_failure: "1"
  - name: B
    id: "1"
    type: notify
    devices: []
    params:
      body: failed
  - name: C
    type: delay
    timeout_seconds: 10
    params:
      seconds: 1
"#;
    let first = parse_procedure(yaml).unwrap();
    let second = parse_procedure(&to_yaml(first.definition()).unwrap()).unwrap();

    assert_eq!(first.step_ids(), second.step_ids());
    assert_eq!(first, second);
    for id in first.step_ids() {
        let (a, b) = (first.step(id).unwrap(), second.step(id).unwrap());
        assert_eq!(a.on_success, b.on_success);
        assert_eq!(a.on_failure, b.on_failure);
    }
}

#[test]
fn revalidation_is_idempotent() {
    let def = parse_definition(
        "name: p\ndevices: [dev1]\nsteps:\n  - name: A\n    type: delay\n    params: {seconds: 1}\n",
    )
    .unwrap();
    let graph = ProcedureGraph::new(def.clone()).unwrap();

    assert!(graph.revalidate().is_ok());
    assert!(graph.revalidate().is_ok());
    assert_eq!(graph.definition(), &def);
}

#[tokio::test]
async fn service_checks_handlers_before_running() {
    let registry = create_default_registry(
        Arc::new(FleetTransport),
        Arc::new(InboxRelay::default()),
        SandboxConfig::default(),
    )
    .unwrap();
    let svc = ExecutionService::new(Interpreter::new(Arc::new(registry)));

    let def = ProcedureDefinition::new("p")
        .with_step(StepDefinition::new("A", "webhook").deviceless());
    let err = svc.run_definition(def, ValueMap::new()).await.unwrap_err();

    let EngineError::Validation(v) = err else {
        panic!("expected validation error");
    };
    assert_eq!(
        v.violations,
        vec![Violation::MissingParams {
            step: "0".into(),
            params: vec!["url".into()]
        }]
    );
}

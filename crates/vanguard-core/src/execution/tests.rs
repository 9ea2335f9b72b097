use super::*;
use crate::event_bus::EventBus;
use crate::terminal::{terminal_id, TerminalConfig};
use tokio_util::sync::CancellationToken;
use vanguard_tools::{SetupStep, SupervisorConfig, ToolSpec};

fn tool(name: &str, script: &str) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: String::new(),
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        container: None,
        pre_commands: Vec::new(),
        init_commands: Vec::new(),
    }
}

fn step(name: &str, script: &str) -> SetupStep {
    SetupStep {
        name: name.to_string(),
        description: format!("{name} step"),
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
    }
}

fn live() -> CancellationToken {
    CancellationToken::new()
}

struct Harness {
    executor: AttackExecutor,
    supervisor: Arc<ProcessSupervisor>,
    terminals: Arc<TerminalRegistry>,
}

fn harness(tools: Vec<ToolSpec>) -> Harness {
    let supervisor = Arc::new(ProcessSupervisor::new(
        SupervisorConfig::new()
            .with_allowed_programs(["sh"])
            .with_kill_grace(Duration::from_millis(200)),
    ));
    let terminals = Arc::new(TerminalRegistry::new(TerminalConfig::new(), EventBus::new(256)));
    let executor = AttackExecutor::new(
        supervisor.clone(),
        terminals.clone(),
        Arc::new(ToolCatalog::new(tools)),
        ExecutionConfig {
            pre_command_settle: Duration::from_millis(100),
        },
    );
    Harness {
        executor,
        supervisor,
        terminals,
    }
}

#[tokio::test]
async fn test_single_command_completes_with_rendered_target() {
    let h = harness(vec![tool("scan", "echo scanning {host}:{port}")]);
    let target = Target::new("10.0.0.5").with_port(8080);
    let attack = Attack::new("scan-1", "scan");

    let outcome = h.executor.execute("s1", 0, &attack, Some(&target), &live()).await;

    let tid = terminal_id("s1", 0);
    assert_eq!(
        outcome,
        AttackOutcome::Completed {
            process_id: tid.clone()
        }
    );
    assert_eq!(h.terminals.status(&tid), Some(RunStatus::Completed));
    assert_eq!(h.terminals.lines(&tid), vec!["scanning 10.0.0.5:8080"]);
}

#[tokio::test]
async fn test_parameters_override_target_variables() {
    let h = harness(vec![tool("scan", "echo {host}")]);
    let target = Target::new("10.0.0.5");
    let attack = Attack::new("scan-1", "scan").with_param("host", "override.local");

    h.executor.execute("s1", 0, &attack, Some(&target), &live()).await;

    assert_eq!(h.terminals.lines(&terminal_id("s1", 0)), vec!["override.local"]);
}

#[tokio::test]
async fn test_nonzero_exit_fails_terminal() {
    let h = harness(vec![tool("broken", "echo oops >&2; exit 3")]);
    let attack = Attack::new("b", "broken");

    let outcome = h.executor.execute("s1", 0, &attack, None, &live()).await;

    let tid = terminal_id("s1", 0);
    match outcome {
        AttackOutcome::Failed { process_id, error } => {
            assert_eq!(process_id.as_deref(), Some(tid.as_str()));
            assert!(error.contains('3'), "unexpected error: {error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.terminals.status(&tid), Some(RunStatus::Failed));
    assert!(h.terminals.lines(&tid).iter().any(|l| l == "oops"));
}

#[tokio::test]
async fn test_unknown_tool_fails_without_spawning() {
    let h = harness(vec![]);
    let attack = Attack::new("x", "does-not-exist");

    let outcome = h.executor.execute("s1", 0, &attack, None, &live()).await;

    assert!(matches!(
        outcome,
        AttackOutcome::Failed {
            process_id: None,
            ..
        }
    ));
    assert_eq!(h.terminals.status(&terminal_id("s1", 0)), Some(RunStatus::Failed));
    assert_eq!(h.supervisor.count(), 0);
}

#[tokio::test]
async fn test_multi_stage_runs_setup_then_stops_helpers() {
    let mut spec = tool("relay", "echo main {host}");
    spec.pre_commands = vec![step("listener", "echo listening; sleep 30")];
    spec.init_commands = vec![step("prepare", "echo prepared")];
    let h = harness(vec![spec]);
    let target = Target::new("10.0.0.9");
    let attack = Attack::new("relay-1", "relay");

    let outcome = h.executor.execute("s1", 2, &attack, Some(&target), &live()).await;

    let tid = terminal_id("s1", 2);
    assert!(matches!(outcome, AttackOutcome::Completed { .. }));
    assert_eq!(h.terminals.lines(&tid), vec!["main 10.0.0.9"]);

    let pre = aux_terminal_id(&tid, "pre", 0);
    let init = aux_terminal_id(&tid, "init", 0);
    assert_eq!(h.terminals.status(&pre), Some(RunStatus::Stopped));
    assert_eq!(h.terminals.status(&init), Some(RunStatus::Completed));
    assert!(h.terminals.lines(&init).contains(&"prepared".to_string()));
    assert_eq!(h.terminals.lines(&init)[0], "# prepare step");
    assert!(!h.supervisor.is_running(&pre));
}

#[tokio::test]
async fn test_failed_init_step_skips_main_command() {
    let mut spec = tool("relay", "echo main");
    spec.init_commands = vec![step("prepare", "exit 2")];
    let h = harness(vec![spec]);
    let attack = Attack::new("relay-1", "relay");

    let outcome = h.executor.execute("s1", 0, &attack, None, &live()).await;

    let tid = terminal_id("s1", 0);
    match outcome {
        AttackOutcome::Failed { process_id, error } => {
            assert!(process_id.is_none());
            assert!(error.contains("prepare"), "unexpected error: {error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!h.terminals.lines(&tid).contains(&"main".to_string()));
    assert_eq!(
        h.terminals.status(&aux_terminal_id(&tid, "init", 0)),
        Some(RunStatus::Failed)
    );
}

#[tokio::test]
async fn test_external_stop_reports_stopped() {
    let h = harness(vec![tool("slow", "echo started; sleep 30")]);
    let attack = Attack::new("slow-1", "slow");
    let tid = terminal_id("s1", 0);

    let supervisor = h.supervisor.clone();
    let stop_id = tid.clone();
    let stopper = tokio::spawn(async move {
        for _ in 0..100 {
            if supervisor.is_running(&stop_id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        supervisor.stop(&stop_id, None).await
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        h.executor.execute("s1", 0, &attack, None, &live()),
    )
    .await
    .expect("attack did not finish");

    assert!(stopper.await.unwrap());
    assert_eq!(
        outcome,
        AttackOutcome::Stopped {
            process_id: Some(tid.clone())
        }
    );
    assert_eq!(h.terminals.status(&tid), Some(RunStatus::Stopped));
}

#[tokio::test]
async fn test_halted_before_start_spawns_nothing() {
    let h = harness(vec![tool("slow", "sleep 30")]);
    let attack = Attack::new("slow-1", "slow");
    let halt = CancellationToken::new();
    halt.cancel();

    let outcome = h.executor.execute("s1", 0, &attack, None, &halt).await;

    assert_eq!(outcome, AttackOutcome::Stopped { process_id: None });
    assert_eq!(h.supervisor.count(), 0);
    assert_eq!(
        h.terminals.status(&terminal_id("s1", 0)),
        Some(RunStatus::Stopped)
    );
}

#[tokio::test]
async fn test_halt_stops_running_main_command() {
    let h = harness(vec![tool("slow", "echo started; sleep 30")]);
    let attack = Attack::new("slow-1", "slow");
    let halt = CancellationToken::new();

    let trigger = halt.clone();
    let supervisor = h.supervisor.clone();
    let tid = terminal_id("s1", 0);
    let watched = tid.clone();
    tokio::spawn(async move {
        for _ in 0..100 {
            if supervisor.is_running(&watched) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        h.executor.execute("s1", 0, &attack, None, &halt),
    )
    .await
    .expect("attack did not finish");

    assert_eq!(
        outcome,
        AttackOutcome::Stopped {
            process_id: Some(tid.clone())
        }
    );
    assert!(!h.supervisor.is_running(&tid));
}

#[tokio::test]
async fn test_halt_kills_main_command_ignoring_sigterm() {
    let h = harness(vec![tool("deaf", "trap '' TERM; echo started; sleep 30")]);
    let attack = Attack::new("deaf-1", "deaf");
    let halt = CancellationToken::new();

    let trigger = halt.clone();
    let supervisor = h.supervisor.clone();
    let tid = terminal_id("s1", 0);
    let watched = tid.clone();
    tokio::spawn(async move {
        for _ in 0..100 {
            if supervisor.is_running(&watched) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        h.executor.execute("s1", 0, &attack, None, &halt),
    )
    .await
    .expect("halted attack outlived the kill grace");

    assert_eq!(
        outcome,
        AttackOutcome::Stopped {
            process_id: Some(tid.clone())
        }
    );
    assert!(!h.supervisor.is_running(&tid));
    assert_eq!(h.terminals.status(&tid), Some(RunStatus::Stopped));
}

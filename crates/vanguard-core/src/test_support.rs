//! Shared fixtures for orchestrator tests

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use vanguard_tools::{ProcessSupervisor, SupervisorConfig, ToolCatalog, ToolSpec};

use crate::event_bus::EventBus;
use crate::execution::{AttackExecutor, ExecutionConfig};
use crate::model::{Attack, RunStatus, Scenario, Target};
use crate::scenario::{ScenarioFinished, ScenarioOrchestrator};
use crate::store::{MemoryStore, Store};
use crate::terminal::{TerminalConfig, TerminalRegistry};

fn sh_tool(name: &str, script: &str) -> ToolSpec {
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

/// `ok` echoes the host, `fail` exits 1, `slow` sleeps `{secs}` seconds,
/// `stubborn` does the same with SIGTERM ignored
pub(crate) fn test_catalog() -> ToolCatalog {
    ToolCatalog::new([
        sh_tool("ok", "echo ok {host}"),
        sh_tool("fail", "echo failing; exit 1"),
        sh_tool("slow", "echo start; sleep {secs}; echo done"),
        sh_tool("stubborn", "trap '' TERM; echo start; sleep {secs}; echo done"),
    ])
}

pub(crate) fn ok(id: &str) -> Attack {
    Attack::new(id, "ok")
}

pub(crate) fn fail(id: &str) -> Attack {
    Attack::new(id, "fail")
}

pub(crate) fn slow(id: &str, secs: &str) -> Attack {
    Attack::new(id, "slow").with_param("secs", secs)
}

pub(crate) fn stubborn(id: &str, secs: &str) -> Attack {
    Attack::new(id, "stubborn").with_param("secs", secs)
}

pub(crate) fn scenario(id: &str, attacks: Vec<Attack>) -> Scenario {
    attacks.into_iter().fold(
        Scenario::new(id, format!("scenario {id}")).with_target(Target::new("10.0.0.1")),
        Scenario::with_attack,
    )
}

pub(crate) struct Engine {
    pub store: Arc<MemoryStore>,
    pub events: EventBus,
    pub terminals: Arc<TerminalRegistry>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub scenarios: Arc<ScenarioOrchestrator>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_supervisor(SupervisorConfig::new())
    }

    /// Engine over `config`, restricted to `sh` with a short kill grace
    pub fn with_supervisor(config: SupervisorConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::new(1024);
        let terminals = Arc::new(TerminalRegistry::new(TerminalConfig::new(), events.clone()));
        let supervisor = Arc::new(ProcessSupervisor::new(
            config
                .with_allowed_programs(["sh"])
                .with_kill_grace(Duration::from_millis(200)),
        ));
        let executor = Arc::new(AttackExecutor::new(
            supervisor.clone(),
            terminals.clone(),
            Arc::new(test_catalog()),
            ExecutionConfig {
                pre_command_settle: Duration::from_millis(50),
            },
        ));
        let scenarios = ScenarioOrchestrator::new(
            store.clone() as Arc<dyn Store>,
            terminals.clone(),
            supervisor.clone(),
            executor,
            events.clone(),
        );
        Self {
            store,
            events,
            terminals,
            supervisor,
            scenarios,
        }
    }

    pub async fn insert(&self, scenario: Scenario) {
        self.store.save_scenario(&scenario).await.unwrap();
    }

    pub async fn load(&self, id: &str) -> Scenario {
        self.store.load_scenario(id).await.unwrap().unwrap()
    }

    /// Poll until `check` holds for the stored scenario
    pub async fn wait_until(&self, id: &str, check: impl Fn(&Scenario) -> bool) -> Scenario {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let scenario = self.load(id).await;
            if check(&scenario) {
                return scenario;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached for scenario {id}: {scenario:?}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until a process is registered under `tab_id`
    pub async fn wait_process(&self, tab_id: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !self.supervisor.is_running(tab_id) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "process {tab_id} never started"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn wait_attack(&self, id: &str, index: usize, status: RunStatus) -> Scenario {
        self.wait_until(id, |s| s.attacks[index].status == status).await
    }
}

/// Wait for the finished signal of `id`
pub(crate) async fn wait_finished(
    rx: &mut broadcast::Receiver<ScenarioFinished>,
    id: &str,
) -> RunStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(done) if done.scenario_id == id => return done.status,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("finished channel closed"),
            }
        }
    })
    .await
    .expect("scenario did not finish in time")
}

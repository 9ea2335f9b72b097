use super::*;
use crate::model::Scenario;
use crate::store::MockStore;
use crate::test_support::{fail, ok, scenario, slow, Engine};
use tokio::sync::broadcast::error::TryRecvError;

fn campaigns(engine: &Engine) -> Arc<CampaignOrchestrator> {
    campaigns_over(engine, engine.store.clone() as Arc<dyn Store>)
}

fn campaigns_over(engine: &Engine, store: Arc<dyn Store>) -> Arc<CampaignOrchestrator> {
    CampaignOrchestrator::new(
        store,
        engine.scenarios.clone(),
        engine.events.clone(),
        CampaignConfig {
            completion_poll: Duration::from_millis(200),
        },
    )
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

async fn insert_campaign(engine: &Engine, campaign: Campaign) {
    engine.store.save_campaign(&campaign).await.unwrap();
}

async fn wait_campaign(engine: &Engine, id: &str, check: impl Fn(&Campaign) -> bool) -> Campaign {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let campaign = engine.store.load_campaign(id).await.unwrap().unwrap();
        if check(&campaign) {
            return campaign;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached for campaign {id}: {campaign:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => seen.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    seen
}

fn scenario_position(events: &[EngineEvent], id: &str, check: impl Fn(&Scenario) -> bool) -> usize {
    events
        .iter()
        .position(|event| {
            matches!(event, EngineEvent::ScenarioUpdate { scenario, .. } if scenario.id == id && check(scenario))
        })
        .unwrap_or_else(|| panic!("no matching update for scenario {id}"))
}

fn running_campaign(id: &str) -> Campaign {
    let mut campaign = Campaign::new(id, "busy", ids(&["s1"]));
    campaign.status = CampaignStatus::Running;
    campaign
}

#[tokio::test]
async fn test_runs_scenarios_in_order_and_counts_results() {
    let engine = Engine::new();
    engine.insert(scenario("s1", vec![ok("a")])).await;
    engine.insert(scenario("s2", vec![fail("a")])).await;
    engine.insert(scenario("s3", vec![ok("a")])).await;
    insert_campaign(&engine, Campaign::new("c1", "nightly", ids(&["s1", "s2", "s3"]))).await;
    let mut events = engine.events.subscribe();
    let orchestrator = campaigns(&engine);

    let started = orchestrator.start("c1").await.unwrap();
    assert_eq!(started.status, CampaignStatus::Running);
    assert!(started.started_at.is_some());

    let done = wait_campaign(&engine, "c1", |c| c.status == CampaignStatus::Completed).await;
    assert_eq!(
        done.execution_progress,
        ExecutionProgress {
            total: 3,
            pending: 0,
            running: 0,
            completed: 2,
            failed: 1,
        }
    );
    assert!(done.completed_at.is_some());
    assert_eq!(engine.load("s2").await.status, RunStatus::Failed);

    let seen = drain(&mut events);
    for event in &seen {
        if let EngineEvent::CampaignUpdate { campaign, .. } = event {
            assert!(campaign.execution_progress.is_consistent(), "{campaign:?}");
        }
    }
    let s1_done = scenario_position(&seen, "s1", |s| s.status.is_terminal());
    let s2_running = scenario_position(&seen, "s2", |s| s.status == RunStatus::Running);
    let s2_done = scenario_position(&seen, "s2", |s| s.status.is_terminal());
    let s3_running = scenario_position(&seen, "s3", |s| s.status == RunStatus::Running);
    assert!(s1_done < s2_running);
    assert!(s2_done < s3_running);
}

#[tokio::test]
async fn test_start_rejects_empty_campaign() {
    let engine = Engine::new();
    insert_campaign(&engine, Campaign::new("c1", "empty", Vec::new())).await;

    let err = campaigns(&engine).start("c1").await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert_eq!(
        engine.store.load_campaign("c1").await.unwrap().unwrap().status,
        CampaignStatus::Draft
    );
}

#[tokio::test]
async fn test_start_rejects_running_campaign_without_writing() {
    let engine = Engine::new();
    let mut store = MockStore::new();
    store
        .expect_load_campaign()
        .returning(|id| Ok(Some(running_campaign(id))));
    store.expect_save_campaign().never();
    store.expect_apply_progress().never();

    let orchestrator = campaigns_over(&engine, Arc::new(store));
    for result in [
        orchestrator.start("c1").await,
        orchestrator.add_scenarios("c1", &ids(&["s2"])).await,
        orchestrator.remove_scenarios("c1", &ids(&["s1"])).await,
        orchestrator.schedule("c1", Utc::now() + chrono::Duration::hours(1)).await,
    ] {
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }
}

#[tokio::test]
async fn test_unknown_campaign_is_not_found() {
    let engine = Engine::new();
    let orchestrator = campaigns(&engine);
    for result in [
        orchestrator.start("nope").await,
        orchestrator.stop("nope").await,
        orchestrator.pause("nope").await,
        orchestrator.resume("nope").await,
    ] {
        assert!(matches!(result, Err(Error::NotFound { kind: "campaign", .. })));
    }
}

#[tokio::test]
async fn test_stop_halts_current_scenario() {
    let engine = Engine::new();
    engine.insert(scenario("s1", vec![slow("a", "30")])).await;
    engine.insert(scenario("s2", vec![ok("a")])).await;
    insert_campaign(&engine, Campaign::new("c1", "stoppable", ids(&["s1", "s2"]))).await;
    let orchestrator = campaigns(&engine);

    orchestrator.start("c1").await.unwrap();
    engine.wait_process(&crate::terminal::terminal_id("s1", 0)).await;

    let stopped = orchestrator.stop("c1").await.unwrap();
    assert_eq!(stopped.status, CampaignStatus::Stopped);
    assert!(stopped.completed_at.is_some());
    assert_eq!(engine.load("s1").await.status, RunStatus::Stopped);

    let settled = wait_campaign(&engine, "c1", |c| c.execution_progress.failed == 1).await;
    assert_eq!(settled.status, CampaignStatus::Stopped);
    assert!(settled.execution_progress.is_consistent());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.load("s2").await.status, RunStatus::Pending);
    assert!(matches!(
        orchestrator.stop("c1").await,
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_pause_waits_for_current_scenario_and_resume_continues() {
    let engine = Engine::new();
    engine.insert(scenario("s1", vec![slow("a", "0.4")])).await;
    engine.insert(scenario("s2", vec![ok("a")])).await;
    insert_campaign(&engine, Campaign::new("c1", "pausable", ids(&["s1", "s2"]))).await;
    let orchestrator = campaigns(&engine);

    orchestrator.start("c1").await.unwrap();
    engine.wait_until("s1", |s| s.status == RunStatus::Running).await;

    let paused = orchestrator.pause("c1").await.unwrap();
    assert_eq!(paused.status, CampaignStatus::Paused);

    // the scenario in flight still finishes and is counted
    let counted = wait_campaign(&engine, "c1", |c| c.execution_progress.completed == 1).await;
    assert_eq!(counted.status, CampaignStatus::Paused);
    let first_started = engine.load("s1").await.started_at;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.load("s2").await.status, RunStatus::Pending);

    orchestrator.resume("c1").await.unwrap();

    let done = wait_campaign(&engine, "c1", |c| c.status == CampaignStatus::Completed).await;
    assert_eq!(done.execution_progress.completed, 2);
    assert_eq!(done.execution_progress.failed, 0);
    assert_eq!(engine.load("s1").await.started_at, first_started);
}

#[tokio::test]
async fn test_pause_and_resume_require_matching_state() {
    let engine = Engine::new();
    insert_campaign(&engine, Campaign::new("c1", "idle", ids(&["s1"]))).await;
    let orchestrator = campaigns(&engine);

    assert!(matches!(orchestrator.pause("c1").await, Err(Error::InvalidState(_))));
    assert!(matches!(orchestrator.resume("c1").await, Err(Error::InvalidState(_))));
    assert!(matches!(orchestrator.stop("c1").await, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_schedule_in_the_past_is_rejected() {
    let engine = Engine::new();
    insert_campaign(&engine, Campaign::new("c1", "late", ids(&["s1"]))).await;
    let orchestrator = campaigns(&engine);

    let err = orchestrator
        .schedule("c1", Utc::now() - chrono::Duration::seconds(1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert!(!orchestrator.is_scheduled("c1"));
    let stored = engine.store.load_campaign("c1").await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Draft);
    assert!(stored.scheduled_for.is_none());
}

#[tokio::test]
async fn test_scheduled_campaign_starts_when_due() {
    let engine = Engine::new();
    engine.insert(scenario("s1", vec![ok("a")])).await;
    insert_campaign(&engine, Campaign::new("c1", "timed", ids(&["s1"]))).await;
    let orchestrator = campaigns(&engine);

    let at = Utc::now() + chrono::Duration::milliseconds(300);
    let scheduled = orchestrator.schedule("c1", at).await.unwrap();
    assert_eq!(scheduled.status, CampaignStatus::Scheduled);
    assert_eq!(scheduled.scheduled_for, Some(at));
    assert!(orchestrator.is_scheduled("c1"));

    let done = wait_campaign(&engine, "c1", |c| c.status == CampaignStatus::Completed).await;
    assert!(done.started_at.is_some_and(|started| started >= at));
    assert!(!orchestrator.is_scheduled("c1"));
}

#[tokio::test]
async fn test_manual_start_cancels_schedule() {
    let engine = Engine::new();
    engine.insert(scenario("s1", vec![ok("a")])).await;
    insert_campaign(&engine, Campaign::new("c1", "eager", ids(&["s1"]))).await;
    let orchestrator = campaigns(&engine);

    orchestrator
        .schedule("c1", Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    orchestrator.start("c1").await.unwrap();

    assert!(!orchestrator.is_scheduled("c1"));
    wait_campaign(&engine, "c1", |c| c.status == CampaignStatus::Completed).await;
}

#[tokio::test]
async fn test_restore_schedules_rearms_persisted_campaigns() {
    let engine = Engine::new();
    engine.insert(scenario("s1", vec![ok("a")])).await;
    let mut overdue = Campaign::new("c1", "overdue", ids(&["s1"]));
    overdue.status = CampaignStatus::Scheduled;
    overdue.scheduled_for = Some(Utc::now() - chrono::Duration::minutes(5));
    insert_campaign(&engine, overdue).await;
    let mut later = Campaign::new("c2", "later", ids(&["s1"]));
    later.status = CampaignStatus::Scheduled;
    later.scheduled_for = Some(Utc::now() + chrono::Duration::hours(1));
    insert_campaign(&engine, later).await;
    let orchestrator = campaigns(&engine);

    assert_eq!(orchestrator.restore_schedules().await.unwrap(), 2);

    wait_campaign(&engine, "c1", |c| c.status == CampaignStatus::Completed).await;
    assert!(orchestrator.is_scheduled("c2"));
    orchestrator.cancel_all();
    assert!(!orchestrator.is_scheduled("c2"));
}

#[tokio::test]
async fn test_add_and_remove_scenarios() {
    let engine = Engine::new();
    insert_campaign(&engine, Campaign::new("c1", "editable", ids(&["s1"]))).await;
    let orchestrator = campaigns(&engine);

    let grown = orchestrator
        .add_scenarios("c1", &ids(&["s2", "s1", "s3"]))
        .await
        .unwrap();
    assert_eq!(grown.scenario_ids, ids(&["s1", "s2", "s3"]));
    assert_eq!(grown.execution_progress, ExecutionProgress::new(3));

    let shrunk = orchestrator
        .remove_scenarios("c1", &ids(&["s1", "s3"]))
        .await
        .unwrap();
    assert_eq!(shrunk.scenario_ids, ids(&["s2"]));
    assert_eq!(shrunk.execution_progress, ExecutionProgress::new(1));
}

async fn wait_locks_released(orchestrator: &CampaignOrchestrator) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while orchestrator.locks.len() + orchestrator.loop_locks.len() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "campaign locks were never released"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_finished_runs_release_campaign_locks() {
    let engine = Engine::new();
    engine.insert(scenario("s1", vec![ok("a")])).await;
    engine.insert(scenario("s2", vec![slow("a", "30")])).await;
    insert_campaign(&engine, Campaign::new("c1", "quick", ids(&["s1"]))).await;
    insert_campaign(&engine, Campaign::new("c2", "long", ids(&["s2"]))).await;
    let orchestrator = campaigns(&engine);

    orchestrator.start("c1").await.unwrap();
    wait_campaign(&engine, "c1", |c| c.status == CampaignStatus::Completed).await;
    wait_locks_released(&orchestrator).await;

    orchestrator.start("c2").await.unwrap();
    engine.wait_attack("s2", 0, RunStatus::Running).await;
    orchestrator.stop("c2").await.unwrap();
    wait_locks_released(&orchestrator).await;
}

use super::*;

const ALL: [RunStatus; 6] = [
    RunStatus::Pending,
    RunStatus::Running,
    RunStatus::Completed,
    RunStatus::Failed,
    RunStatus::Paused,
    RunStatus::Stopped,
];

#[test]
fn test_transition_table() {
    use RunStatus::*;

    let allowed = |from: RunStatus| -> Vec<RunStatus> {
        ALL.iter()
            .copied()
            .filter(|to| from.can_transition_to(*to))
            .collect()
    };

    assert_eq!(allowed(Pending), vec![Running, Failed, Stopped]);
    assert_eq!(allowed(Running), vec![Completed, Failed, Paused, Stopped]);
    assert_eq!(allowed(Paused), vec![Running, Failed, Stopped]);
    assert_eq!(allowed(Completed), vec![Failed]);
    assert_eq!(allowed(Stopped), vec![Failed]);
    assert_eq!(allowed(Failed), vec![Failed]);
}

#[test]
fn test_attack_transition_rejects_invalid_moves() {
    let mut attack = Attack::new("scan", "nmap");
    assert!(attack.transition(RunStatus::Running));
    assert!(attack.transition(RunStatus::Completed));
    assert!(!attack.transition(RunStatus::Running));
    assert_eq!(attack.status, RunStatus::Completed);
    assert!(attack.transition(RunStatus::Failed));
    assert!(!attack.transition(RunStatus::Failed));
}

#[test]
fn test_attack_output_is_bounded() {
    let mut attack = Attack::new("a", "nmap");
    for i in 0..(ATTACK_OUTPUT_CAP + 5) {
        attack.push_output(format!("line {i}"));
    }
    assert_eq!(attack.output.len(), ATTACK_OUTPUT_CAP);
    assert_eq!(attack.output[0], "line 5");

    attack.set_output((0..ATTACK_OUTPUT_CAP * 2).map(|i| i.to_string()).collect());
    assert_eq!(attack.output.len(), ATTACK_OUTPUT_CAP);
    assert_eq!(attack.output.last().map(String::as_str), Some("399"));
}

#[test]
fn test_scenario_helpers() {
    let mut scenario = Scenario::new("s1", "Recon")
        .with_target(Target::new("10.0.0.1"))
        .with_target(Target::new("10.0.0.2").with_port(445))
        .with_attack(Attack::new("a", "nmap"))
        .with_attack(Attack::new("b", "smbclient").with_target(1));

    assert_eq!(scenario.target_for(&scenario.attacks[0]).unwrap().host, "10.0.0.1");
    assert_eq!(scenario.target_for(&scenario.attacks[1]).unwrap().port, Some(445));

    scenario.attacks[0].status = RunStatus::Failed;
    assert_eq!(scenario.first_unfinished(), Some(1));
    assert!(!scenario.all_completed());

    let start = chrono::Utc::now();
    scenario.started_at = Some(start);
    scenario.mark_ended(start + chrono::Duration::seconds(90));
    assert_eq!(scenario.duration_secs, Some(90));
}

#[test]
fn test_target_template_vars() {
    let target = Target {
        host: "dc01.lab".to_string(),
        port: Some(389),
        protocol: Some("ldap".to_string()),
        name: None,
    };
    let vars = target.template_vars();
    assert_eq!(vars["host"], "dc01.lab");
    assert_eq!(vars["target"], "dc01.lab");
    assert_eq!(vars["port"], "389");
    assert_eq!(vars["protocol"], "ldap");
}

#[test]
fn test_scenario_json_shape() {
    let scenario: Scenario = serde_json::from_value(serde_json::json!({
        "id": "s1",
        "name": "Web",
        "targets": [{"host": "example.org", "port": 443}],
        "attacks": [{"id": "nikto-1", "tool": "nikto", "parameters": {"ssl": "1"}}]
    }))
    .unwrap();

    assert!(scenario.sequence);
    assert_eq!(scenario.status, RunStatus::Pending);
    assert_eq!(scenario.attacks[0].parameters["ssl"], "1");

    let json = serde_json::to_value(&scenario).unwrap();
    assert_eq!(json["attacks"][0]["status"], "pending");
    assert!(json.get("startedAt").is_some());
}

#[test]
fn test_progress_deltas_keep_sum() {
    let mut progress = ExecutionProgress::new(3);
    assert!(progress.is_consistent());

    progress.apply(ProgressDelta::scenario_started()).unwrap();
    progress.apply(ProgressDelta::scenario_finished(true)).unwrap();
    progress.apply(ProgressDelta::scenario_started()).unwrap();
    progress.apply(ProgressDelta::scenario_finished(false)).unwrap();

    assert_eq!(progress.pending, 1);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.finished(), 2);
    assert!(progress.is_consistent());
}

#[test]
fn test_progress_rejects_underflow_and_imbalance() {
    let mut progress = ExecutionProgress::new(1);
    let before = progress;

    assert!(progress.apply(ProgressDelta::scenario_finished(true)).is_err());
    assert_eq!(progress, before);

    let lopsided = ProgressDelta {
        completed: 1,
        ..Default::default()
    };
    assert!(progress.apply(lopsided).is_err());
    assert_eq!(progress, before);
}

#[test]
fn test_progress_resize() {
    let mut progress = ExecutionProgress::new(2);
    progress.apply(ProgressDelta::scenario_started()).unwrap();
    progress.apply(ProgressDelta::scenario_finished(true)).unwrap();

    progress.resize(4);
    assert_eq!(progress.total, 4);
    assert_eq!(progress.pending, 3);
    assert!(progress.is_consistent());
}

#[test]
fn test_campaign_status_serialization() {
    let campaign = Campaign::new("c1", "Q3", vec!["s1".into(), "s2".into()]);
    let json = serde_json::to_value(&campaign).unwrap();
    assert_eq!(json["status"], "draft");
    assert_eq!(json["executionProgress"]["total"], 2);
    assert_eq!(json["scenarioIds"][1], "s2");
}

use super::*;
use crate::model::{Campaign, Scenario};

#[tokio::test]
async fn test_publish_subscribe() {
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();

    bus.publish(EngineEvent::TerminalCleared {
        scenario_id: "s1".to_string(),
        terminal_id: "s1-attack-0".to_string(),
    });

    let event = rx.recv().await.unwrap();
    assert_eq!(event.scenario_id(), Some("s1"));
    assert_eq!(event.terminal_id(), Some("s1-attack-0"));
}

#[tokio::test]
async fn test_multiple_subscribers() {
    let bus = EventBus::new(16);
    let mut rx1 = bus.subscribe();
    let mut rx2 = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 2);

    let count = bus.publish(EngineEvent::scenario_update(&Scenario::new("s9", "x")));
    assert_eq!(count, 2);

    assert_eq!(rx1.recv().await.unwrap().scenario_id(), Some("s9"));
    assert_eq!(rx2.recv().await.unwrap().scenario_id(), Some("s9"));
}

#[test]
fn test_publish_without_subscribers() {
    let bus = EventBus::default();
    let campaign = Campaign::new("c1", "x", vec![]);
    assert_eq!(bus.publish(EngineEvent::campaign_update(&campaign)), 0);
}

#[test]
fn test_event_serialization() {
    let event = EngineEvent::TerminalOutput {
        scenario_id: "s1".to_string(),
        terminal_id: "s1-attack-0".to_string(),
        line: "open 22/tcp".to_string(),
        timestamp: chrono::Utc::now(),
    };
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"type\":\"terminal_output\""));
    assert!(json.contains("\"line\":\"open 22/tcp\""));
}

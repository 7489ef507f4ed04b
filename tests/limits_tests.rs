mod common;

use common::*;
use groundcore::catalog::LimitThresholds;
use groundcore::limits::{IgnoredItem, LimitsEventKind, LimitsSettings, LimitsState, OverallState};
use groundcore::topic::limits_events_topic;
use groundcore::{GroundAgent, Value};

fn temp1(agent: &GroundAgent, value: i64) -> Option<LimitsState> {
    publish(agent, "HEALTH_STATUS", &[("TEMP1", Value::Int(value))]);
    agent.limits().state("INST", "HEALTH_STATUS", "TEMP1")
}

fn temp2(agent: &GroundAgent, value: i64) -> Option<LimitsState> {
    publish(agent, "HEALTH_STATUS", &[("TEMP2", Value::Int(value))]);
    agent.limits().state("INST", "HEALTH_STATUS", "TEMP2")
}

fn change_events(agent: &GroundAgent, item: &str) -> Vec<(Option<LimitsState>, LimitsState)> {
    agent
        .limits()
        .get_limits_events(Some(Default::default()), 1000)
        .unwrap()
        .into_iter()
        .filter_map(|(_, event)| match event.kind {
            LimitsEventKind::LimitsChange {
                item_name,
                old_limits_state,
                new_limits_state,
                ..
            } if item_name == item => Some((old_limits_state, new_limits_state)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_threshold_classification() {
    let agent = agent();
    assert_eq!(temp1(&agent, -100), Some(LimitsState::RedLow));
    assert_eq!(temp1(&agent, -75), Some(LimitsState::YellowLow));
    assert_eq!(temp1(&agent, 0), Some(LimitsState::Green));
    assert_eq!(temp1(&agent, 70), Some(LimitsState::YellowHigh));
    assert_eq!(temp1(&agent, 90), Some(LimitsState::RedHigh));

    let events = change_events(&agent, "TEMP1");
    assert_eq!(events.len(), 5);
    assert_eq!(events[0], (None, LimitsState::RedLow));
    assert_eq!(events[4], (Some(LimitsState::YellowHigh), LimitsState::RedHigh));
}

#[test]
fn test_persistence_suppresses_chatter() {
    let agent = agent();
    assert_eq!(temp2(&agent, 0), None);
    assert_eq!(temp2(&agent, 0), None);
    assert_eq!(temp2(&agent, 0), Some(LimitsState::Green));
    assert_eq!(change_events(&agent, "TEMP2").len(), 1);

    // two readings out, then back: nothing latches
    assert_eq!(temp2(&agent, 70), Some(LimitsState::Green));
    assert_eq!(temp2(&agent, 70), Some(LimitsState::Green));
    assert_eq!(temp2(&agent, 0), Some(LimitsState::Green));
    assert_eq!(change_events(&agent, "TEMP2").len(), 1);

    // the counter restarted, so three more are needed
    assert_eq!(temp2(&agent, 70), Some(LimitsState::Green));
    assert_eq!(temp2(&agent, 70), Some(LimitsState::Green));
    assert_eq!(temp2(&agent, 70), Some(LimitsState::YellowHigh));
    assert_eq!(
        change_events(&agent, "TEMP2").last(),
        Some(&(Some(LimitsState::Green), LimitsState::YellowHigh))
    );
}

#[test]
fn test_state_colors_drive_limits() {
    let agent = agent();
    publish(&agent, "HEALTH_STATUS", &[("MODE", Value::Int(2))]);
    assert_eq!(
        agent.limits().state("INST", "HEALTH_STATUS", "MODE"),
        Some(LimitsState::Red)
    );
    publish(&agent, "HEALTH_STATUS", &[("MODE", Value::Int(1))]);
    assert_eq!(
        agent.limits().state("INST", "HEALTH_STATUS", "MODE"),
        Some(LimitsState::Green)
    );
}

#[test]
fn test_overall_state_and_ignore_list() {
    let agent = agent();
    assert_eq!(agent.limits().get_overall_limits_state(&[]), OverallState::Green);

    temp1(&agent, 70);
    assert_eq!(agent.limits().get_overall_limits_state(&[]), OverallState::Yellow);

    publish(&agent, "HEALTH_STATUS", &[("MODE", Value::Int(2))]);
    assert_eq!(agent.limits().get_overall_limits_state(&[]), OverallState::Red);
    assert_eq!(
        agent
            .limits()
            .get_overall_limits_state(&[IgnoredItem::item("INST", "HEALTH_STATUS", "MODE")]),
        OverallState::Yellow
    );
    assert_eq!(
        agent
            .limits()
            .get_overall_limits_state(&[IgnoredItem::packet("INST", "HEALTH_STATUS")]),
        OverallState::Green
    );

    let out = agent.limits().get_out_of_limits();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].0.item_name, "MODE");
    assert_eq!(out[1].1, LimitsState::YellowHigh);
}

#[test]
fn test_set_limits_round_trip() {
    let agent = agent();
    agent
        .limits()
        .set_limits(
            "INST",
            "HEALTH_STATUS",
            "TEMP1",
            LimitsSettings::new(LimitThresholds::new(0.0, 10.0, 20.0, 30.0)).in_set("DEFAULT"),
        )
        .unwrap();
    let limits = agent.limits().get_limits("INST", "HEALTH_STATUS", "TEMP1").unwrap();
    assert_eq!(limits["DEFAULT"], vec![0.0, 10.0, 20.0, 30.0]);
    assert_eq!(limits["TVAC"], vec![-80.0, -30.0, 30.0, 80.0]);

    // the new thresholds apply to the next reading
    assert_eq!(temp1(&agent, 25), Some(LimitsState::YellowHigh));

    agent
        .limits()
        .set_limits(
            "INST",
            "HEALTH_STATUS",
            "TEMP1",
            LimitsSettings::new(LimitThresholds::new(0.0, 10.0, 20.0, 30.0).with_green(12.0, 18.0)),
        )
        .unwrap();
    let limits = agent.limits().get_limits("INST", "HEALTH_STATUS", "TEMP1").unwrap();
    assert_eq!(limits["CUSTOM"], vec![0.0, 10.0, 20.0, 30.0, 12.0, 18.0]);
    assert!(agent.limits().get_limits_sets().contains(&"CUSTOM".to_string()));
}

#[test]
fn test_set_limits_validation() {
    let agent = agent();
    let err = agent
        .limits()
        .set_limits(
            "INST",
            "HEALTH_STATUS",
            "TEMP1",
            LimitsSettings::new(LimitThresholds::new(10.0, 0.0, 20.0, 30.0)),
        )
        .unwrap_err();
    assert!(err.to_string().contains("yellow limits are within red limits"));

    let err = agent
        .limits()
        .set_limits(
            "INST",
            "HEALTH_STATUS",
            "TEMP1",
            LimitsSettings::new(LimitThresholds::new(0.0, 10.0, 20.0, 30.0).with_green(5.0, 15.0)),
        )
        .unwrap_err();
    assert!(err.to_string().contains("green limits are within yellow limits"));

    assert!(agent
        .limits()
        .set_limits(
            "INST",
            "HEALTH_STATUS",
            "VOLTS",
            LimitsSettings::new(LimitThresholds::new(0.0, 10.0, 20.0, 30.0)),
        )
        .is_err());
    assert!(agent
        .limits()
        .set_limits(
            "INST",
            "HEALTH_STATUS",
            "NOPE",
            LimitsSettings::new(LimitThresholds::new(0.0, 10.0, 20.0, 30.0)),
        )
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_enable_disable_limits() {
    let agent = agent();
    temp1(&agent, 90);
    assert!(agent.limits().limits_enabled("INST", "HEALTH_STATUS", "TEMP1").unwrap());

    agent.limits().disable_limits("INST", "HEALTH_STATUS", "TEMP1").unwrap();
    assert!(!agent.limits().limits_enabled("INST", "HEALTH_STATUS", "TEMP1").unwrap());
    assert_eq!(
        agent.limits().state("INST", "HEALTH_STATUS", "TEMP1"),
        Some(LimitsState::Disabled)
    );
    assert_eq!(agent.limits().get_overall_limits_state(&[]), OverallState::Green);
    assert_eq!(
        change_events(&agent, "TEMP1").last(),
        Some(&(Some(LimitsState::RedHigh), LimitsState::Disabled))
    );

    // readings while disabled do not classify
    assert_eq!(temp1(&agent, -100), Some(LimitsState::Disabled));

    agent.limits().enable_limits("INST", "HEALTH_STATUS", "TEMP1").unwrap();
    assert_eq!(temp1(&agent, -100), Some(LimitsState::RedLow));

    assert!(agent
        .limits()
        .disable_limits("INST", "HEALTH_STATUS", "VOLTS")
        .is_err());
}

#[test]
fn test_limits_groups() {
    let agent = agent();
    let groups = agent.limits().get_limits_groups();
    assert_eq!(groups["INST_TEMPS"].len(), 2);

    agent.limits().disable_limits_group("inst_temps").unwrap();
    assert!(!agent.limits().limits_enabled("INST", "HEALTH_STATUS", "TEMP1").unwrap());
    assert!(!agent.limits().limits_enabled("INST", "HEALTH_STATUS", "TEMP2").unwrap());

    let enable_events = agent
        .limits()
        .get_limits_events(Some(Default::default()), 100)
        .unwrap()
        .into_iter()
        .filter(|(_, e)| matches!(e.kind, LimitsEventKind::LimitsEnableState { enabled: false, .. }))
        .count();
    assert_eq!(enable_events, 2);

    agent.limits().enable_limits_group("INST_TEMPS").unwrap();
    assert!(agent.limits().limits_enabled("INST", "HEALTH_STATUS", "TEMP2").unwrap());
    assert!(agent.limits().enable_limits_group("NOPE").unwrap_err().is_not_found());
}

#[test]
fn test_limits_set_switch_clears_pending_candidates() {
    let agent = agent();
    assert_eq!(agent.limits().get_limits_set(), "DEFAULT");
    assert_eq!(agent.limits().get_limits_sets(), vec!["DEFAULT".to_string(), "TVAC".to_string()]);

    assert_eq!(temp1(&agent, 40), Some(LimitsState::Green));
    agent.limits().set_limits_set("tvac").unwrap();
    assert_eq!(agent.limits().get_limits_set(), "TVAC");
    // latched state survives the switch until the next reading
    assert_eq!(
        agent.limits().state("INST", "HEALTH_STATUS", "TEMP1"),
        Some(LimitsState::Green)
    );
    assert_eq!(temp1(&agent, 40), Some(LimitsState::YellowHigh));

    for _ in 0..2 {
        temp2(&agent, 70);
    }
    agent.limits().set_limits_set("DEFAULT").unwrap();
    // TEMP2 has no TVAC row; its two pending readings were discarded
    assert_eq!(temp2(&agent, 70), None);
    assert_eq!(temp2(&agent, 70), None);
    assert_eq!(temp2(&agent, 70), Some(LimitsState::YellowHigh));

    assert!(agent.limits().set_limits_set("NOPE").unwrap_err().is_not_found());
}

#[test]
fn test_event_replay_is_idempotent() {
    let agent = agent();
    let start = agent.topics().last_offset(&limits_events_topic(SCOPE));
    temp1(&agent, 0);
    temp1(&agent, 70);
    temp1(&agent, 90);

    let first = agent.limits().get_limits_events(Some(start), 100).unwrap();
    assert_eq!(first.len(), 3);
    let again = agent.limits().get_limits_events(Some(start), 100).unwrap();
    assert_eq!(first, again);

    let after_first = agent.limits().get_limits_events(Some(first[0].0), 100).unwrap();
    assert_eq!(after_first.len(), 2);
    assert_eq!(after_first[0].0, first[1].0);

    let newest = agent.limits().get_limits_events(None, 100).unwrap();
    assert_eq!(newest.len(), 1);
    assert_eq!(newest[0].0, first[2].0);
    assert!(agent
        .limits()
        .get_limits_events(Some(first[2].0), 100)
        .unwrap()
        .is_empty());
    assert_eq!(agent.limits().get_limits_events(Some(start), 2).unwrap().len(), 2);
}

mod common;

use chrono::{TimeZone, Utc};
use common::*;
use groundcore::catalog::{Conversion, DataType, ItemDef, Segment};
use groundcore::resolver::{resolve, resolve_all};
use groundcore::{Value, ValueType};

#[test]
fn test_state_names_replace_converted_values() {
    let agent = agent();
    publish(&agent, "HEALTH_STATUS", &[("MODE", Value::Int(1))]);

    assert_eq!(agent.tlm_raw("INST HEALTH_STATUS MODE").unwrap(), Value::Int(1));
    assert_eq!(agent.tlm("INST HEALTH_STATUS MODE").unwrap(), Value::from("OPERATE"));
    assert_eq!(agent.tlm_formatted("INST HEALTH_STATUS MODE").unwrap(), Value::from("OPERATE"));
    assert_eq!(agent.tlm_with_units("INST HEALTH_STATUS MODE").unwrap(), Value::from("OPERATE"));

    // no matching state falls through to the raw value
    publish(&agent, "HEALTH_STATUS", &[("MODE", Value::Int(7))]);
    assert_eq!(agent.tlm("INST HEALTH_STATUS MODE").unwrap(), Value::Int(7));
}

#[test]
fn test_conversion_format_and_units() {
    let agent = agent();
    publish(
        &agent,
        "HEALTH_STATUS",
        &[("VOLTS", Value::Int(10)), ("TEMP1", Value::Int(25))],
    );

    assert_eq!(agent.tlm_raw(("inst", "health_status", "volts")).unwrap(), Value::Int(10));
    assert_eq!(agent.tlm(("INST", "HEALTH_STATUS", "VOLTS")).unwrap(), Value::Float(5.0));
    assert_eq!(agent.tlm_with_units("INST HEALTH_STATUS VOLTS").unwrap(), Value::from("5.0 V"));

    assert_eq!(agent.tlm("INST HEALTH_STATUS TEMP1").unwrap(), Value::Int(25));
    assert_eq!(agent.tlm_formatted("INST HEALTH_STATUS TEMP1").unwrap(), Value::from("25.00"));
    assert_eq!(agent.tlm_with_units("INST HEALTH_STATUS TEMP1").unwrap(), Value::from("25.00 C"));
}

#[test]
fn test_arrays_resolve_element_wise() {
    let agent = agent();
    let raw = Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    publish(&agent, "HEALTH_STATUS", &[("ARY", raw.clone())]);

    assert_eq!(agent.tlm("INST HEALTH_STATUS ARY").unwrap(), raw);
    assert_eq!(agent.tlm_formatted("INST HEALTH_STATUS ARY").unwrap(), Value::from("[1, 2, 3]"));
    assert_eq!(agent.tlm_with_units("INST HEALTH_STATUS ARY").unwrap(), Value::from("[1, 2, 3] V"));
}

#[test]
fn test_reserved_items_come_from_metadata() {
    let agent = agent();
    assert_eq!(agent.tlm("INST HEALTH_STATUS RECEIVED_COUNT").unwrap(), Value::Int(0));
    assert!(agent.tlm("INST HEALTH_STATUS PACKET_TIMESECONDS").unwrap().is_null());

    let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    publish_at(&agent, "HEALTH_STATUS", &[("TEMP1", Value::Int(1))], time, Some(time));
    publish_at(&agent, "HEALTH_STATUS", &[("TEMP1", Value::Int(2))], time, Some(time));

    assert_eq!(agent.tlm("INST HEALTH_STATUS RECEIVED_COUNT").unwrap(), Value::Int(2));
    assert_eq!(
        agent.tlm("INST HEALTH_STATUS PACKET_TIMEFORMATTED").unwrap(),
        Value::from("2024/03/01 12:00:00.000")
    );
    assert_eq!(
        agent.tlm_raw("INST HEALTH_STATUS RECEIVED_TIMESECONDS").unwrap(),
        Value::Float(time.timestamp() as f64)
    );
}

#[test]
fn test_segmented_conversion_and_single_representation() {
    let item = ItemDef::new("TEMP", 0, 16, DataType::Uint).with_read_conversion(Conversion::Segmented {
        segments: vec![
            Segment { lower_bound: 0.0, coeffs: vec![0.0, 1.0] },
            Segment { lower_bound: 100.0, coeffs: vec![100.0, 2.0] },
        ],
    });
    assert_eq!(resolve(&item, &Value::Int(50), ValueType::Converted), Value::Float(50.0));
    assert_eq!(resolve(&item, &Value::Int(150), ValueType::Converted), Value::Float(400.0));
    assert_eq!(resolve(&item, &Value::Int(150), ValueType::Raw), Value::Int(150));

    let resolved = resolve_all(&item, &Value::Null);
    assert!(resolved.converted.is_null());
    assert!(resolved.with_units.is_null());
}

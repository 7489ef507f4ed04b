#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use groundcore::catalog::{
    Conversion, DataType, ItemDef, ItemKey, LimitThresholds, LimitsDef, PacketDef, PacketKind,
    StateColor, StateDef,
};
use groundcore::cvt::DecodedPacket;
use groundcore::{Catalog, CoreConfig, GroundAgent, Value};

pub const SCOPE: &str = "TEST";

fn temp_limits() -> LimitsDef {
    LimitsDef::new(LimitThresholds::new(-80.0, -70.0, 60.0, 80.0))
}

fn state(value: i64, color: Option<StateColor>, hazardous: Option<&str>) -> StateDef {
    StateDef {
        value: Value::Int(value),
        hazardous: hazardous.map(str::to_string),
        messages_disabled: false,
        color,
    }
}

pub fn health_status() -> PacketDef {
    let mut temp1_limits = temp_limits();
    temp1_limits
        .values
        .insert("TVAC".into(), LimitThresholds::new(-80.0, -30.0, 30.0, 80.0));
    let mut temp2_limits = temp_limits();
    temp2_limits.persistence = 3;
    let mode_limits = LimitsDef {
        enabled: true,
        persistence: 1,
        values: BTreeMap::new(),
    };

    PacketDef::new("INST", "HEALTH_STATUS")
        .with_item(ItemDef::new("PKTID", 0, 8, DataType::Uint).with_id(1))
        .with_item(
            ItemDef::new("TEMP1", 8, 16, DataType::Int)
                .with_format("%0.2f")
                .with_units("C", "Celsius")
                .with_limits(temp1_limits),
        )
        .with_item(ItemDef::new("TEMP2", 24, 16, DataType::Int).with_limits(temp2_limits))
        .with_item(
            ItemDef::new("VOLTS", 40, 16, DataType::Uint)
                .with_read_conversion(Conversion::Polynomial { coeffs: vec![0.0, 0.5] })
                .with_units("V", "Volts"),
        )
        .with_item(
            ItemDef::new("MODE", 56, 8, DataType::Uint)
                .with_state_def("SAFE", state(0, None, None))
                .with_state_def("OPERATE", state(1, Some(StateColor::Green), None))
                .with_state_def("ERROR", state(2, Some(StateColor::Red), None))
                .with_limits(mode_limits),
        )
        .with_item(ItemDef::new("ARY", 64, 8, DataType::Uint).with_array(3).with_units("V", "Volts"))
}

pub fn adcs() -> PacketDef {
    PacketDef::new("INST", "ADCS")
        .with_item(ItemDef::new("PKTID", 0, 8, DataType::Uint).with_id(2))
        .with_item(ItemDef::new("TEMP1", 8, 16, DataType::Int))
        .with_item(ItemDef::new("Q1", 24, 32, DataType::Float))
}

pub fn collect() -> PacketDef {
    PacketDef::new("INST", "COLLECT")
        .with_item(ItemDef::new("OPCODE", 0, 8, DataType::Uint).with_id(1))
        .with_item(
            ItemDef::new("TYPE", 8, 16, DataType::Uint)
                .with_state_def("NORMAL", state(0, None, None))
                .with_state_def(
                    "SPECIAL",
                    state(1, None, Some("Special collect may saturate the detector")),
                ),
        )
        .with_item(
            ItemDef::new("DURATION", 24, 32, DataType::Float)
                .with_range(0.0, 10.0)
                .with_default(1.0),
        )
}

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.add_packet(PacketKind::Telemetry, health_status());
    catalog.add_packet(PacketKind::Telemetry, adcs());
    catalog.add_packet(PacketKind::Command, collect());

    let mut clear = PacketDef::new("INST", "CLEAR")
        .with_item(ItemDef::new("OPCODE", 0, 8, DataType::Uint).with_id(2));
    clear.hazardous = Some("Clears all counters".into());
    catalog.add_packet(PacketKind::Command, clear);

    catalog.add_packet(
        PacketKind::Command,
        PacketDef::new("INST", "ABORT").with_item(ItemDef::new("OPCODE", 0, 8, DataType::Uint).with_id(3)),
    );

    let mut setpass = PacketDef::new("INST", "SETPASS")
        .with_item(ItemDef::new("OPCODE", 0, 8, DataType::Uint).with_id(4))
        .with_item(ItemDef::new("PASSWORD", 8, 64, DataType::String).required());
    setpass.obfuscated_items.push("PASSWORD".into());
    catalog.add_packet(PacketKind::Command, setpass);

    catalog.add_limits_group(
        "INST_TEMPS",
        vec![
            ItemKey::new("INST", "HEALTH_STATUS", "TEMP1"),
            ItemKey::new("INST", "HEALTH_STATUS", "TEMP2"),
        ],
    );
    catalog
}

pub fn config() -> CoreConfig {
    CoreConfig {
        scope: SCOPE.to_string(),
        cache_timeout_ms: 0,
        cmd_timeout_s: 2.0,
        build_timeout_s: 2.0,
        poll_interval_ms: 5,
        ..CoreConfig::default()
    }
}

pub fn agent() -> GroundAgent {
    GroundAgent::new(catalog(), config())
}

pub fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Feed raw values through the CVT as the decom worker would.
pub fn publish_at(
    agent: &GroundAgent,
    packet: &str,
    pairs: &[(&str, Value)],
    received_time: DateTime<Utc>,
    packet_time: Option<DateTime<Utc>>,
) {
    let decoded = DecodedPacket {
        target_name: "INST".into(),
        packet_name: packet.into(),
        received_time,
        packet_time,
        stored: false,
        values: values(pairs),
    };
    let update = agent.cvt().build_from_packet(&decoded).unwrap();
    agent.cvt().set_packet(update).unwrap();
}

pub fn publish(agent: &GroundAgent, packet: &str, pairs: &[(&str, Value)]) {
    publish_at(agent, packet, pairs, Utc::now(), None);
}

pub fn set_of(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

//! Limits monitoring.
//!
//! Each CVT update is classified against the active limits set. A new band
//! is latched only after `persistence` consecutive readings in that same
//! band; every latch appends a LIMITS_CHANGE event to the limits event
//! stream.

use core::fmt;
use core::str::FromStr;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::catalog::{
    Catalog, ItemDef, ItemKey, LimitThresholds, LimitsDef, PacketDef, PacketKind, StateColor,
    DEFAULT_LIMITS_SET,
};
use crate::error::{CoreError, CoreResult, NotFoundKind};
use crate::topic::{limits_events_topic, StreamOffset, Topics};
use crate::value::Value;

pub const CUSTOM_LIMITS_SET: &str = "CUSTOM";
pub const DEFAULT_EVENT_COUNT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitsState {
    Stale,
    Disabled,
    Green,
    GreenLow,
    GreenHigh,
    Yellow,
    YellowLow,
    YellowHigh,
    Red,
    RedLow,
    RedHigh,
}

/// Severity bucket used by the overall state reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallState {
    Green,
    Yellow,
    Red,
}

impl LimitsState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitsState::Stale => "STALE",
            LimitsState::Disabled => "DISABLED",
            LimitsState::Green => "GREEN",
            LimitsState::GreenLow => "GREEN_LOW",
            LimitsState::GreenHigh => "GREEN_HIGH",
            LimitsState::Yellow => "YELLOW",
            LimitsState::YellowLow => "YELLOW_LOW",
            LimitsState::YellowHigh => "YELLOW_HIGH",
            LimitsState::Red => "RED",
            LimitsState::RedLow => "RED_LOW",
            LimitsState::RedHigh => "RED_HIGH",
        }
    }

    pub fn severity(&self) -> Option<OverallState> {
        match self {
            LimitsState::Green | LimitsState::GreenLow | LimitsState::GreenHigh => {
                Some(OverallState::Green)
            }
            LimitsState::Yellow | LimitsState::YellowLow | LimitsState::YellowHigh => {
                Some(OverallState::Yellow)
            }
            LimitsState::Red | LimitsState::RedLow | LimitsState::RedHigh => {
                Some(OverallState::Red)
            }
            LimitsState::Stale | LimitsState::Disabled => None,
        }
    }

    pub fn is_out_of_limits(&self) -> bool {
        matches!(
            self.severity(),
            Some(OverallState::Yellow) | Some(OverallState::Red)
        )
    }
}

impl fmt::Display for LimitsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitsState {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_ascii_uppercase()))
            .map_err(|_| CoreError::Validation(format!("Unknown limits state '{s}'")))
    }
}

impl From<StateColor> for LimitsState {
    fn from(color: StateColor) -> Self {
        match color {
            StateColor::Green => LimitsState::Green,
            StateColor::Yellow => LimitsState::Yellow,
            StateColor::Red => LimitsState::Red,
        }
    }
}

impl fmt::Display for OverallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallState::Green => write!(f, "GREEN"),
            OverallState::Yellow => write!(f, "YELLOW"),
            OverallState::Red => write!(f, "RED"),
        }
    }
}

/// Classify a converted value against one threshold row.
pub fn classify(value: f64, t: &LimitThresholds) -> LimitsState {
    if value < t.red_low {
        LimitsState::RedLow
    } else if value > t.red_high {
        LimitsState::RedHigh
    } else if value < t.yellow_low {
        LimitsState::YellowLow
    } else if value > t.yellow_high {
        LimitsState::YellowHigh
    } else {
        match (t.green_low, t.green_high) {
            (Some(gl), _) if value < gl => LimitsState::GreenLow,
            (_, Some(gh)) if value > gh => LimitsState::GreenHigh,
            _ => LimitsState::Green,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitsEventKind {
    LimitsChange {
        target_name: String,
        packet_name: String,
        item_name: String,
        old_limits_state: Option<LimitsState>,
        new_limits_state: LimitsState,
    },
    LimitsSettings {
        target_name: String,
        packet_name: String,
        item_name: String,
        red_low: f64,
        yellow_low: f64,
        yellow_high: f64,
        red_high: f64,
        green_low: Option<f64>,
        green_high: Option<f64>,
        limits_set: String,
        persistence: Option<u32>,
        enabled: bool,
    },
    LimitsEnableState {
        target_name: String,
        packet_name: String,
        item_name: String,
        enabled: bool,
    },
    LimitsSet {
        old_limits_set: String,
        new_limits_set: String,
    },
}

/// One immutable record on the limits event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsEvent {
    #[serde(flatten)]
    pub kind: LimitsEventKind,
    pub time_nsec: i64,
    pub message: String,
}

fn now_nsec() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Item filter for the overall state; `item_name: None` matches the whole packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredItem {
    pub target_name: String,
    pub packet_name: String,
    pub item_name: Option<String>,
}

impl IgnoredItem {
    pub fn item(target: &str, packet: &str, item: &str) -> Self {
        Self {
            target_name: target.to_ascii_uppercase(),
            packet_name: packet.to_ascii_uppercase(),
            item_name: Some(item.to_ascii_uppercase()),
        }
    }

    pub fn packet(target: &str, packet: &str) -> Self {
        Self {
            target_name: target.to_ascii_uppercase(),
            packet_name: packet.to_ascii_uppercase(),
            item_name: None,
        }
    }

    fn matches(&self, key: &ItemKey) -> bool {
        self.target_name == key.target_name
            && self.packet_name == key.packet_name
            && self
                .item_name
                .as_ref()
                .map_or(true, |item| *item == key.item_name)
    }
}

/// New threshold row for `set_limits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsSettings {
    pub thresholds: LimitThresholds,
    pub limits_set: String,
    pub persistence: Option<u32>,
    pub enabled: bool,
}

impl LimitsSettings {
    pub fn new(thresholds: LimitThresholds) -> Self {
        Self {
            thresholds,
            limits_set: CUSTOM_LIMITS_SET.to_string(),
            persistence: None,
            enabled: true,
        }
    }

    pub fn in_set(mut self, limits_set: &str) -> Self {
        self.limits_set = limits_set.to_ascii_uppercase();
        self
    }

    pub fn with_persistence(mut self, persistence: u32) -> Self {
        self.persistence = Some(persistence);
        self
    }
}

#[derive(Debug, Clone, Default)]
struct ItemLimits {
    latched: Option<LimitsState>,
    candidate: Option<LimitsState>,
    count: u32,
}

impl ItemLimits {
    fn clear_candidate(&mut self) {
        self.candidate = None;
        self.count = 0;
    }

    /// Feed one classification; returns the previous state when a new one latches.
    fn observe(&mut self, state: LimitsState, persistence: u32) -> Option<Option<LimitsState>> {
        if self.latched == Some(state) {
            self.clear_candidate();
            return None;
        }
        if self.candidate == Some(state) {
            self.count += 1;
        } else {
            self.candidate = Some(state);
            self.count = 1;
        }
        if self.count >= persistence.max(1) {
            let old = self.latched.replace(state);
            self.clear_candidate();
            Some(old)
        } else {
            None
        }
    }
}

struct Transition {
    item_name: String,
    old: Option<LimitsState>,
    new: LimitsState,
    value: Value,
}

#[derive(Debug)]
pub struct LimitsEngine {
    catalog: Arc<Catalog>,
    topics: Arc<Topics>,
    scope: String,
    states: RwLock<HashMap<ItemKey, ItemLimits>>,
    active_set: RwLock<String>,
}

impl LimitsEngine {
    pub fn new(catalog: Arc<Catalog>, topics: Arc<Topics>, scope: &str) -> Self {
        Self {
            catalog,
            topics,
            scope: scope.to_string(),
            states: RwLock::new(HashMap::new()),
            active_set: RwLock::new(DEFAULT_LIMITS_SET.to_string()),
        }
    }

    fn evaluate(&self, item: &ItemDef, limits: &LimitsDef, converted: &Value, active: &str) -> Option<LimitsState> {
        if !limits.values.is_empty() {
            let thresholds = limits.thresholds(active)?;
            return converted.as_f64().map(|v| classify(v, thresholds));
        }
        let name = converted.as_str()?;
        item.states
            .get(name)
            .and_then(|state| state.color)
            .map(LimitsState::from)
    }

    /// Run limits on one decommutated packet. Returns the latched state of
    /// every limits item of the packet.
    pub fn process(
        &self,
        packet: &PacketDef,
        converted: &BTreeMap<String, Value>,
        packet_time: Option<DateTime<Utc>>,
    ) -> BTreeMap<String, LimitsState> {
        let active = self.get_limits_set();
        let mut latched = BTreeMap::new();
        let mut transitions = Vec::new();
        {
            let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
            for item in &packet.items {
                let Some(limits) = &item.limits else { continue };
                let key = ItemKey::new(&packet.target_name, &packet.packet_name, &item.name);
                let entry = states.entry(key).or_default();
                let value = converted.get(&item.name).cloned().unwrap_or_default();

                if !limits.enabled {
                    if entry.latched != Some(LimitsState::Disabled) {
                        let old = entry.latched.replace(LimitsState::Disabled);
                        entry.clear_candidate();
                        if old.is_some() {
                            transitions.push(Transition {
                                item_name: item.name.clone(),
                                old,
                                new: LimitsState::Disabled,
                                value: Value::Null,
                            });
                        }
                    }
                } else if let Some(state) = self.evaluate(item, limits, &value, &active) {
                    if entry.latched == Some(LimitsState::Disabled) {
                        entry.latched = None;
                    }
                    if let Some(old) = entry.observe(state, limits.persistence) {
                        transitions.push(Transition {
                            item_name: item.name.clone(),
                            old,
                            new: state,
                            value,
                        });
                    }
                }
                if let Some(state) = entry.latched {
                    latched.insert(item.name.clone(), state);
                }
            }
        }
        for transition in transitions {
            self.publish_change(packet, transition, packet_time);
        }
        latched
    }

    fn publish_change(&self, packet: &PacketDef, t: Transition, packet_time: Option<DateTime<Utc>>) {
        let mut message = if t.new == LimitsState::Disabled {
            format!("{} {} {} is disabled", packet.target_name, packet.packet_name, t.item_name)
        } else {
            format!(
                "{} {} {} = {} is {}",
                packet.target_name, packet.packet_name, t.item_name, t.value, t.new
            )
        };
        if let Some(time) = packet_time {
            message.push_str(&format!(" ({})", time.format(crate::resolver::TIME_FORMAT)));
        }
        match t.new.severity() {
            Some(OverallState::Green) if t.old.is_some() => info!("{}", message),
            Some(OverallState::Yellow) => warn!("{}", message),
            Some(OverallState::Red) => error!("{}", message),
            _ => {}
        }
        let time_nsec = packet_time
            .and_then(|t| t.timestamp_nanos_opt())
            .unwrap_or_else(now_nsec);
        self.write_event(LimitsEvent {
            kind: LimitsEventKind::LimitsChange {
                target_name: packet.target_name.clone(),
                packet_name: packet.packet_name.clone(),
                item_name: t.item_name,
                old_limits_state: t.old,
                new_limits_state: t.new,
            },
            time_nsec,
            message,
        });
    }

    fn write_event(&self, event: LimitsEvent) {
        if let Err(e) = self
            .topics
            .write_topic(&limits_events_topic(&self.scope), &event)
        {
            error!("Failed to write limits event: {}", e);
        }
    }

    /// Latched state of one item, if any.
    pub fn state(&self, target: &str, packet: &str, item: &str) -> Option<LimitsState> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        states
            .get(&ItemKey::new(target, packet, item))
            .and_then(|s| s.latched)
    }

    /// Every item currently latched YELLOW or RED.
    pub fn get_out_of_limits(&self) -> Vec<(ItemKey, LimitsState)> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<(ItemKey, LimitsState)> = states
            .iter()
            .filter_map(|(key, s)| s.latched.map(|state| (key.clone(), state)))
            .filter(|(_, state)| state.is_out_of_limits())
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Worst severity across all non-ignored items.
    pub fn get_overall_limits_state(&self, ignored: &[IgnoredItem]) -> OverallState {
        let mut overall = OverallState::Green;
        for (key, state) in self.get_out_of_limits() {
            if ignored.iter().any(|i| i.matches(&key)) {
                continue;
            }
            match state.severity() {
                Some(OverallState::Red) => return OverallState::Red,
                Some(OverallState::Yellow) => overall = OverallState::Yellow,
                _ => {}
            }
        }
        overall
    }

    fn limits_item(&self, target: &str, packet: &str, item: &str) -> CoreResult<ItemDef> {
        self.catalog
            .packet_item(PacketKind::Telemetry, target, packet, item)
    }

    pub fn limits_enabled(&self, target: &str, packet: &str, item: &str) -> CoreResult<bool> {
        let def = self.limits_item(target, packet, item)?;
        Ok(def.limits.is_some_and(|l| l.enabled))
    }

    pub fn enable_limits(&self, target: &str, packet: &str, item: &str) -> CoreResult<()> {
        self.set_enabled(&[ItemKey::new(target, packet, item)], true)
    }

    pub fn disable_limits(&self, target: &str, packet: &str, item: &str) -> CoreResult<()> {
        self.set_enabled(&[ItemKey::new(target, packet, item)], false)
    }

    /// Apply an enable state to every key, one catalog write per packet.
    fn set_enabled(&self, keys: &[ItemKey], enabled: bool) -> CoreResult<()> {
        for key in keys {
            let def = self.limits_item(&key.target_name, &key.packet_name, &key.item_name)?;
            if def.limits.is_none() {
                return Err(CoreError::Validation(format!(
                    "Item '{key}' does not have limits"
                )));
            }
        }
        let mut by_packet: BTreeMap<(String, String), Vec<&ItemKey>> = BTreeMap::new();
        for key in keys {
            by_packet
                .entry((key.target_name.clone(), key.packet_name.clone()))
                .or_default()
                .push(key);
        }
        for ((target, packet), items) in by_packet {
            self.catalog
                .with_packet_mut(PacketKind::Telemetry, &target, &packet, |def| {
                    for key in &items {
                        if let Some(limits) = def.item_mut(&key.item_name).and_then(|i| i.limits.as_mut()) {
                            limits.enabled = enabled;
                        }
                    }
                    Ok(())
                })?;
            for key in items {
                self.publish_enable_state(key, enabled);
            }
        }
        Ok(())
    }

    fn publish_enable_state(&self, key: &ItemKey, enabled: bool) {
        let verb = if enabled { "Enabling" } else { "Disabling" };
        let message = format!("{verb} Limits For '{key}'");
        info!("{}", message);

        let mut previous = None;
        {
            let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = states.get_mut(key) {
                entry.clear_candidate();
                if enabled {
                    if entry.latched == Some(LimitsState::Disabled) {
                        entry.latched = None;
                    }
                } else if entry.latched.is_some() && entry.latched != Some(LimitsState::Disabled) {
                    previous = entry.latched.replace(LimitsState::Disabled);
                }
            }
        }

        self.write_event(LimitsEvent {
            kind: LimitsEventKind::LimitsEnableState {
                target_name: key.target_name.clone(),
                packet_name: key.packet_name.clone(),
                item_name: key.item_name.clone(),
                enabled,
            },
            time_nsec: now_nsec(),
            message,
        });

        if let Some(old) = previous {
            self.write_event(LimitsEvent {
                kind: LimitsEventKind::LimitsChange {
                    target_name: key.target_name.clone(),
                    packet_name: key.packet_name.clone(),
                    item_name: key.item_name.clone(),
                    old_limits_state: Some(old),
                    new_limits_state: LimitsState::Disabled,
                },
                time_nsec: now_nsec(),
                message: format!("{key} is disabled"),
            });
        }
    }

    /// Limits of one item keyed by set name, as ordered tuples.
    pub fn get_limits(&self, target: &str, packet: &str, item: &str) -> CoreResult<BTreeMap<String, Vec<f64>>> {
        let def = self.limits_item(target, packet, item)?;
        Ok(def
            .limits
            .map(|l| {
                l.values
                    .iter()
                    .map(|(set, t)| (set.clone(), t.to_vec()))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn set_limits(&self, target: &str, packet: &str, item: &str, settings: LimitsSettings) -> CoreResult<()> {
        settings.thresholds.validate()?;
        let target = target.to_ascii_uppercase();
        let packet = packet.to_ascii_uppercase();
        let item_name = item.to_ascii_uppercase();
        self.catalog
            .with_packet_mut(PacketKind::Telemetry, &target, &packet, |def| {
                let Some(found) = def.item_mut(&item_name) else {
                    return Err(CoreError::not_found(
                        NotFoundKind::Item,
                        format!("{target} {packet} {item_name}"),
                    ));
                };
                let Some(limits) = found.limits.as_mut() else {
                    return Err(CoreError::Validation(
                        "Cannot set_limits on item without any limits".into(),
                    ));
                };
                if let Some(persistence) = settings.persistence {
                    limits.persistence = persistence;
                }
                limits.enabled = settings.enabled;
                limits
                    .values
                    .insert(settings.limits_set.clone(), settings.thresholds);
                Ok(())
            })?;

        let t = settings.thresholds;
        let mut message = format!(
            "Setting '{target} {packet} {item_name}' limits to {} {} {} {}",
            t.red_low, t.yellow_low, t.yellow_high, t.red_high
        );
        if let (Some(gl), Some(gh)) = (t.green_low, t.green_high) {
            message.push_str(&format!(" {gl} {gh}"));
        }
        message.push_str(&format!(
            " in set {} with persistence {} as enabled {}",
            settings.limits_set,
            settings
                .persistence
                .map_or_else(|| "unchanged".to_string(), |p| p.to_string()),
            settings.enabled
        ));
        info!("{}", message);

        self.write_event(LimitsEvent {
            kind: LimitsEventKind::LimitsSettings {
                target_name: target,
                packet_name: packet,
                item_name,
                red_low: t.red_low,
                yellow_low: t.yellow_low,
                yellow_high: t.yellow_high,
                red_high: t.red_high,
                green_low: t.green_low,
                green_high: t.green_high,
                limits_set: settings.limits_set,
                persistence: settings.persistence,
                enabled: settings.enabled,
            },
            time_nsec: now_nsec(),
            message,
        });
        Ok(())
    }

    pub fn get_limits_groups(&self) -> BTreeMap<String, Vec<ItemKey>> {
        self.catalog.limits_groups().clone()
    }

    pub fn enable_limits_group(&self, group: &str) -> CoreResult<()> {
        self.limits_group(group, true)
    }

    pub fn disable_limits_group(&self, group: &str) -> CoreResult<()> {
        self.limits_group(group, false)
    }

    fn limits_group(&self, group: &str, enabled: bool) -> CoreResult<()> {
        let group = group.to_ascii_uppercase();
        let mut items = self
            .catalog
            .limits_groups()
            .get(&group)
            .cloned()
            .ok_or_else(|| CoreError::not_found(NotFoundKind::LimitsGroup, group.clone()))?;
        items.sort();
        let verb = if enabled { "Enabling" } else { "Disabling" };
        info!("{} Limits Group {}", verb, group);
        self.set_enabled(&items, enabled)
    }

    pub fn get_limits_sets(&self) -> Vec<String> {
        self.catalog.limits_set_names().into_iter().collect()
    }

    pub fn get_limits_set(&self) -> String {
        self.active_set
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switch the active set. Pending persistence candidates are discarded;
    /// latched states are kept until the next reading.
    pub fn set_limits_set(&self, limits_set: &str) -> CoreResult<()> {
        let limits_set = limits_set.to_ascii_uppercase();
        let known: BTreeSet<String> = self.catalog.limits_set_names();
        if !known.contains(&limits_set) {
            return Err(CoreError::not_found(NotFoundKind::LimitsSet, limits_set));
        }
        let old = {
            let mut active = self.active_set.write().unwrap_or_else(PoisonError::into_inner);
            core::mem::replace(&mut *active, limits_set.clone())
        };
        {
            let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
            for entry in states.values_mut() {
                entry.clear_candidate();
            }
        }
        let message = format!("Setting Limits Set: {limits_set}");
        info!("{}", message);
        self.write_event(LimitsEvent {
            kind: LimitsEventKind::LimitsSet {
                old_limits_set: old,
                new_limits_set: limits_set,
            },
            time_nsec: now_nsec(),
            message,
        });
        Ok(())
    }

    /// Events strictly after `offset`. Without an offset only the newest
    /// event is returned, giving the caller a starting point for tailing.
    pub fn get_limits_events(
        &self,
        offset: Option<StreamOffset>,
        count: usize,
    ) -> CoreResult<Vec<(StreamOffset, LimitsEvent)>> {
        let topic = limits_events_topic(&self.scope);
        let entries = match offset {
            Some(offset) => self.topics.read_after(&topic, offset, Some(count)),
            None => self.topics.get_newest_message(&topic).into_iter().collect(),
        };
        entries
            .into_iter()
            .map(|entry| -> CoreResult<(StreamOffset, LimitsEvent)> {
                Ok((entry.offset, entry.decode()?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_strict_bands() {
        let t = LimitThresholds::new(-80.0, -70.0, 60.0, 80.0);
        assert_eq!(classify(-100.0, &t), LimitsState::RedLow);
        assert_eq!(classify(-80.0, &t), LimitsState::YellowLow);
        assert_eq!(classify(-75.0, &t), LimitsState::YellowLow);
        assert_eq!(classify(0.0, &t), LimitsState::Green);
        assert_eq!(classify(60.0, &t), LimitsState::Green);
        assert_eq!(classify(70.0, &t), LimitsState::YellowHigh);
        assert_eq!(classify(90.0, &t), LimitsState::RedHigh);

        let g = t.with_green(-10.0, 10.0);
        assert_eq!(classify(-20.0, &g), LimitsState::GreenLow);
        assert_eq!(classify(0.0, &g), LimitsState::Green);
        assert_eq!(classify(20.0, &g), LimitsState::GreenHigh);
    }

    #[test]
    fn test_persistence_latches_after_consecutive_readings() {
        let mut item = ItemLimits::default();
        assert_eq!(item.observe(LimitsState::Green, 1), Some(None));
        assert_eq!(item.observe(LimitsState::RedHigh, 3), None);
        assert_eq!(item.observe(LimitsState::RedHigh, 3), None);
        assert_eq!(item.observe(LimitsState::RedHigh, 3), Some(Some(LimitsState::Green)));
        assert_eq!(item.latched, Some(LimitsState::RedHigh));
    }

    #[test]
    fn test_reversion_resets_candidate() {
        let mut item = ItemLimits::default();
        item.observe(LimitsState::Green, 1);
        assert_eq!(item.observe(LimitsState::YellowHigh, 3), None);
        assert_eq!(item.observe(LimitsState::YellowHigh, 3), None);
        assert_eq!(item.observe(LimitsState::Green, 3), None);
        assert_eq!(item.count, 0);
        assert_eq!(item.observe(LimitsState::YellowHigh, 3), None);
        assert_eq!(item.latched, Some(LimitsState::Green));
    }

    #[test]
    fn test_event_wire_shape() {
        let event = LimitsEvent {
            kind: LimitsEventKind::LimitsSet {
                old_limits_set: "DEFAULT".into(),
                new_limits_set: "TVAC".into(),
            },
            time_nsec: 1,
            message: "Setting Limits Set: TVAC".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "LIMITS_SET");
        assert_eq!(json["new_limits_set"], "TVAC");
        let back: LimitsEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!("red_low".parse::<LimitsState>().unwrap(), LimitsState::RedLow);
        assert!("purple".parse::<LimitsState>().is_err());
    }
}

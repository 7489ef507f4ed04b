//! Read-mostly target/packet/item definitions.
//!
//! The catalog is produced by an external definition compiler; here it is
//! loaded from JSON. Each packet definition sits behind its own lock so that
//! administrative mutations (enable/disable, set_limits) form a critical
//! section per packet without blocking readers of other packets.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, NotFoundKind};
use crate::value::Value;

/// Items computed from packet metadata rather than decoded from the wire.
pub const RESERVED_ITEM_NAMES: [&str; 5] = [
    "PACKET_TIMESECONDS",
    "PACKET_TIMEFORMATTED",
    "RECEIVED_TIMESECONDS",
    "RECEIVED_TIMEFORMATTED",
    "RECEIVED_COUNT",
];

pub const DEFAULT_LIMITS_SET: &str = "DEFAULT";

pub fn is_reserved_item(name: &str) -> bool {
    RESERVED_ITEM_NAMES.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Uint,
    Int,
    Float,
    String,
    Block,
    Derived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Endianness {
    #[default]
    BigEndian,
    LittleEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketKind {
    Telemetry,
    Command,
}

/// Color attached to a named state; drives state-based limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateColor {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
    pub value: Value,
    /// Present when selecting this state is hazardous; holds the description
    #[serde(default)]
    pub hazardous: Option<String>,
    #[serde(default)]
    pub messages_disabled: bool,
    #[serde(default)]
    pub color: Option<StateColor>,
}

/// Read or write conversion between raw and engineering units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Conversion {
    /// c0 + c1*x + c2*x^2 + ...
    Polynomial { coeffs: Vec<f64> },
    /// Piecewise polynomials; each segment applies from `lower_bound` up.
    Segmented { segments: Vec<Segment> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub lower_bound: f64,
    pub coeffs: Vec<f64>,
}

fn polynomial(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

impl Conversion {
    pub fn apply(&self, value: &Value) -> Value {
        let Some(x) = value.as_f64() else {
            return value.clone();
        };
        match self {
            Conversion::Polynomial { coeffs } => Value::Float(polynomial(coeffs, x)),
            Conversion::Segmented { segments } => {
                let mut ordered: Vec<&Segment> = segments.iter().collect();
                ordered.sort_by(|a, b| b.lower_bound.total_cmp(&a.lower_bound));
                let segment = ordered
                    .iter()
                    .find(|s| x >= s.lower_bound)
                    .or(ordered.last());
                match segment {
                    Some(s) => Value::Float(polynomial(&s.coeffs, x)),
                    None => value.clone(),
                }
            }
        }
    }
}

/// One row of a limits definition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitThresholds {
    pub red_low: f64,
    pub yellow_low: f64,
    pub yellow_high: f64,
    pub red_high: f64,
    #[serde(default)]
    pub green_low: Option<f64>,
    #[serde(default)]
    pub green_high: Option<f64>,
}

impl LimitThresholds {
    pub fn new(red_low: f64, yellow_low: f64, yellow_high: f64, red_high: f64) -> Self {
        Self {
            red_low,
            yellow_low,
            yellow_high,
            red_high,
            green_low: None,
            green_high: None,
        }
    }

    pub fn with_green(mut self, green_low: f64, green_high: f64) -> Self {
        self.green_low = Some(green_low);
        self.green_high = Some(green_high);
        self
    }

    /// Ordered tuple used on the exchange surface.
    pub fn to_vec(&self) -> Vec<f64> {
        let mut values = vec![self.red_low, self.yellow_low, self.yellow_high, self.red_high];
        if let (Some(gl), Some(gh)) = (self.green_low, self.green_high) {
            values.push(gl);
            values.push(gh);
        }
        values
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.red_low > self.yellow_low
            || self.yellow_low >= self.yellow_high
            || self.yellow_high > self.red_high
        {
            return Err(CoreError::Validation(
                "Invalid limits specified. Ensure yellow limits are within red limits.".into(),
            ));
        }
        if let (Some(gl), Some(gh)) = (self.green_low, self.green_high) {
            if self.yellow_low > gl || gl >= gh || gh > self.yellow_high {
                return Err(CoreError::Validation(
                    "Invalid limits specified. Ensure green limits are within yellow limits."
                        .into(),
                ));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_persistence() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsDef {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_persistence")]
    pub persistence: u32,
    /// Limit set name (uppercase) to thresholds; empty for state-colored items
    #[serde(default)]
    pub values: BTreeMap<String, LimitThresholds>,
}

impl LimitsDef {
    pub fn new(default: LimitThresholds) -> Self {
        let mut values = BTreeMap::new();
        values.insert(DEFAULT_LIMITS_SET.to_string(), default);
        Self {
            enabled: true,
            persistence: 1,
            values,
        }
    }

    /// Thresholds for the given set, falling back to DEFAULT.
    pub fn thresholds(&self, limits_set: &str) -> Option<&LimitThresholds> {
        self.values
            .get(limits_set)
            .or_else(|| self.values.get(DEFAULT_LIMITS_SET))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDef {
    pub name: String,
    #[serde(default)]
    pub bit_offset: u32,
    #[serde(default)]
    pub bit_size: u32,
    pub data_type: DataType,
    /// Number of elements for fixed arrays; each element is `bit_size` bits
    #[serde(default)]
    pub array_length: Option<u32>,
    #[serde(default)]
    pub states: BTreeMap<String, StateDef>,
    #[serde(default)]
    pub read_conversion: Option<Conversion>,
    #[serde(default)]
    pub write_conversion: Option<Conversion>,
    #[serde(default)]
    pub format_string: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub units_full: Option<String>,
    #[serde(default)]
    pub limits: Option<LimitsDef>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub id_value: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ItemDef {
    pub fn new(name: impl Into<String>, bit_offset: u32, bit_size: u32, data_type: DataType) -> Self {
        Self {
            name: name.into().to_ascii_uppercase(),
            bit_offset,
            bit_size,
            data_type,
            array_length: None,
            states: BTreeMap::new(),
            read_conversion: None,
            write_conversion: None,
            format_string: None,
            units: None,
            units_full: None,
            limits: None,
            minimum: None,
            maximum: None,
            default: None,
            required: false,
            id_value: None,
            description: None,
        }
    }

    pub fn with_state(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.states.insert(
            name.to_ascii_uppercase(),
            StateDef {
                value: value.into(),
                hazardous: None,
                messages_disabled: false,
                color: None,
            },
        );
        self
    }

    pub fn with_state_def(mut self, name: &str, state: StateDef) -> Self {
        self.states.insert(name.to_ascii_uppercase(), state);
        self
    }

    pub fn with_range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_units(mut self, units: &str, units_full: &str) -> Self {
        self.units = Some(units.to_string());
        self.units_full = Some(units_full.to_string());
        self
    }

    pub fn with_format(mut self, format_string: &str) -> Self {
        self.format_string = Some(format_string.to_string());
        self
    }

    pub fn with_read_conversion(mut self, conversion: Conversion) -> Self {
        self.read_conversion = Some(conversion);
        self
    }

    pub fn with_write_conversion(mut self, conversion: Conversion) -> Self {
        self.write_conversion = Some(conversion);
        self
    }

    pub fn with_limits(mut self, limits: LimitsDef) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn with_array(mut self, length: u32) -> Self {
        self.array_length = Some(length);
        self
    }

    pub fn with_id(mut self, id_value: impl Into<Value>) -> Self {
        self.id_value = Some(id_value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// State name whose value matches `raw`.
    pub fn state_for(&self, raw: &Value) -> Option<(&str, &StateDef)> {
        self.states
            .iter()
            .find(|(_, state)| state.value.loosely_equals(raw))
            .map(|(name, state)| (name.as_str(), state))
    }

    pub fn has_state_colors(&self) -> bool {
        self.states.values().any(|s| s.color.is_some())
    }

    /// Whether the limits engine evaluates this item at all.
    pub fn is_limits_item(&self) -> bool {
        self.limits.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketDef {
    pub target_name: String,
    pub packet_name: String,
    #[serde(default)]
    pub endianness: Endianness,
    #[serde(default)]
    pub items: Vec<ItemDef>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub hazardous: Option<String>,
    #[serde(default)]
    pub messages_disabled: bool,
    #[serde(default)]
    pub obfuscated_items: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl PacketDef {
    pub fn new(target_name: &str, packet_name: &str) -> Self {
        Self {
            target_name: target_name.to_ascii_uppercase(),
            packet_name: packet_name.to_ascii_uppercase(),
            endianness: Endianness::BigEndian,
            items: Vec::new(),
            disabled: false,
            hazardous: None,
            messages_disabled: false,
            obfuscated_items: Vec::new(),
            description: None,
        }
    }

    pub fn with_item(mut self, item: ItemDef) -> Self {
        self.items.push(item);
        self
    }

    pub fn item(&self, name: &str) -> Option<&ItemDef> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn item_mut(&mut self, name: &str) -> Option<&mut ItemDef> {
        self.items.iter_mut().find(|i| i.name == name)
    }

    /// Whether `name` is a defined or reserved item of this packet.
    pub fn has_item(&self, name: &str) -> bool {
        is_reserved_item(name) || self.item(name).is_some()
    }

    pub fn id_items(&self) -> impl Iterator<Item = &ItemDef> {
        self.items.iter().filter(|i| i.id_value.is_some())
    }

    pub fn is_obfuscated(&self, item_name: &str) -> bool {
        self.obfuscated_items.iter().any(|i| i == item_name)
    }

    /// Uppercase every name a lookup may match against.
    fn normalize_names(&mut self) {
        self.target_name.make_ascii_uppercase();
        self.packet_name.make_ascii_uppercase();
        for name in &mut self.obfuscated_items {
            name.make_ascii_uppercase();
        }
        for item in &mut self.items {
            item.name.make_ascii_uppercase();
            item.states = core::mem::take(&mut item.states)
                .into_iter()
                .map(|(name, state)| (name.to_ascii_uppercase(), state))
                .collect();
            if let Some(limits) = &mut item.limits {
                limits.values = core::mem::take(&mut limits.values)
                    .into_iter()
                    .map(|(set, thresholds)| (set.to_ascii_uppercase(), thresholds))
                    .collect();
            }
        }
    }

    /// Fixed size in bytes implied by the item layout.
    pub fn defined_length(&self) -> usize {
        let bits = self
            .items
            .iter()
            .filter(|i| i.data_type != DataType::Derived)
            .map(|i| i.bit_offset + i.bit_size * i.array_length.unwrap_or(1))
            .max()
            .unwrap_or(0);
        bits.div_ceil(8) as usize
    }
}

/// (target, packet, optional item) triple used by groups and ignore lists.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub target_name: String,
    pub packet_name: String,
    pub item_name: String,
}

impl ItemKey {
    pub fn new(target: &str, packet: &str, item: &str) -> Self {
        Self {
            target_name: target.to_ascii_uppercase(),
            packet_name: packet.to_ascii_uppercase(),
            item_name: item.to_ascii_uppercase(),
        }
    }
}

impl core::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {} {}", self.target_name, self.packet_name, self.item_name)
    }
}

/// JSON document shape accepted by [`Catalog::from_json_reader`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub telemetry: Vec<PacketDef>,
    #[serde(default)]
    pub commands: Vec<PacketDef>,
    #[serde(default)]
    pub limits_groups: BTreeMap<String, Vec<ItemKey>>,
}

type PacketKey = (PacketKind, String, String);
type SharedPacket = Arc<RwLock<PacketDef>>;

#[derive(Debug, Default)]
pub struct Catalog {
    targets: BTreeSet<String>,
    packets: BTreeMap<PacketKey, SharedPacket>,
    /// Telemetry item name -> packets of a target containing it
    item_map: BTreeMap<(String, String), Vec<String>>,
    limits_groups: BTreeMap<String, Vec<ItemKey>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(doc: CatalogDocument) -> Self {
        let mut catalog = Catalog::new();
        for packet in doc.telemetry {
            catalog.add_packet(PacketKind::Telemetry, packet);
        }
        for packet in doc.commands {
            catalog.add_packet(PacketKind::Command, packet);
        }
        for (name, items) in doc.limits_groups {
            catalog.add_limits_group(&name, items);
        }
        catalog
    }

    pub fn from_json_reader<R: Read>(reader: R) -> CoreResult<Self> {
        let doc: CatalogDocument = serde_json::from_reader(reader)?;
        Ok(Self::from_document(doc))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_json_reader(std::io::BufReader::new(file))
    }

    pub fn add_packet(&mut self, kind: PacketKind, mut packet: PacketDef) {
        packet.normalize_names();
        let target = packet.target_name.clone();
        let name = packet.packet_name.clone();
        if kind == PacketKind::Telemetry {
            let names = packet
                .items
                .iter()
                .map(|i| i.name.clone())
                .chain(RESERVED_ITEM_NAMES.iter().map(|s| s.to_string()));
            for item_name in names {
                let packets = self.item_map.entry((target.clone(), item_name)).or_default();
                if !packets.contains(&name) {
                    packets.push(name.clone());
                }
            }
        }
        self.targets.insert(target.clone());
        self.packets
            .insert((kind, target, name), Arc::new(RwLock::new(packet)));
    }

    pub fn add_limits_group(&mut self, name: &str, items: Vec<ItemKey>) {
        let items = items
            .into_iter()
            .map(|key| ItemKey::new(&key.target_name, &key.packet_name, &key.item_name))
            .collect();
        self.limits_groups.insert(name.to_ascii_uppercase(), items);
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets.iter().cloned().collect()
    }

    pub fn target_exists(&self, target: &str) -> bool {
        self.targets.contains(&target.to_ascii_uppercase())
    }

    fn shared(&self, kind: PacketKind, target: &str, packet: &str) -> CoreResult<&SharedPacket> {
        let target = target.to_ascii_uppercase();
        let packet = packet.to_ascii_uppercase();
        if !self.target_exists(&target) {
            return Err(CoreError::not_found(NotFoundKind::Target, target));
        }
        self.packets
            .get(&(kind, target.clone(), packet.clone()))
            .ok_or_else(|| {
                let what = match kind {
                    PacketKind::Telemetry => NotFoundKind::Packet,
                    PacketKind::Command => NotFoundKind::Command,
                };
                CoreError::not_found(what, format!("{target} {packet}"))
            })
    }

    /// Snapshot of a packet definition.
    pub fn packet(&self, kind: PacketKind, target: &str, packet: &str) -> CoreResult<PacketDef> {
        let shared = self.shared(kind, target, packet)?;
        let guard = shared.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone())
    }

    pub fn telemetry(&self, target: &str, packet: &str) -> CoreResult<PacketDef> {
        self.packet(PacketKind::Telemetry, target, packet)
    }

    pub fn command(&self, target: &str, packet: &str) -> CoreResult<PacketDef> {
        self.packet(PacketKind::Command, target, packet)
    }

    /// Snapshot of one item; reserved items resolve to a synthetic definition.
    pub fn packet_item(
        &self,
        kind: PacketKind,
        target: &str,
        packet: &str,
        item: &str,
    ) -> CoreResult<ItemDef> {
        let shared = self.shared(kind, target, packet)?;
        let guard = shared.read().unwrap_or_else(PoisonError::into_inner);
        let item = item.to_ascii_uppercase();
        if let Some(def) = guard.item(&item) {
            return Ok(def.clone());
        }
        if kind == PacketKind::Telemetry && is_reserved_item(&item) {
            return Ok(ItemDef::new(item, 0, 0, DataType::Derived));
        }
        let what = match kind {
            PacketKind::Telemetry => NotFoundKind::Item,
            PacketKind::Command => NotFoundKind::Parameter,
        };
        Err(CoreError::not_found(
            what,
            format!("{} {} {item}", guard.target_name, guard.packet_name),
        ))
    }

    /// Run `f` on a packet definition inside that packet's critical section.
    pub fn with_packet_mut<T>(
        &self,
        kind: PacketKind,
        target: &str,
        packet: &str,
        f: impl FnOnce(&mut PacketDef) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let shared = self.shared(kind, target, packet)?;
        let mut guard = shared.write().unwrap_or_else(PoisonError::into_inner);
        let mut working = guard.clone();
        let result = f(&mut working)?;
        *guard = working;
        Ok(result)
    }

    pub fn packet_names(&self, kind: PacketKind, target: &str) -> CoreResult<Vec<String>> {
        let target = target.to_ascii_uppercase();
        if !self.target_exists(&target) {
            return Err(CoreError::not_found(NotFoundKind::Target, target));
        }
        Ok(self
            .packets
            .keys()
            .filter(|(k, t, _)| *k == kind && *t == target)
            .map(|(_, _, p)| p.clone())
            .collect())
    }

    pub fn packets(&self, kind: PacketKind, target: &str) -> CoreResult<Vec<PacketDef>> {
        self.packet_names(kind, target)?
            .iter()
            .map(|name| self.packet(kind, target, name))
            .collect()
    }

    /// Every telemetry packet definition across all targets.
    pub fn all_telemetry(&self) -> Vec<PacketDef> {
        self.packets
            .iter()
            .filter(|((kind, _, _), _)| *kind == PacketKind::Telemetry)
            .map(|(_, shared)| shared.read().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    /// Telemetry packets of `target` that define `item`.
    pub fn packets_with_item(&self, target: &str, item: &str) -> CoreResult<Vec<String>> {
        let target = target.to_ascii_uppercase();
        let item = item.to_ascii_uppercase();
        if !self.target_exists(&target) {
            return Err(CoreError::not_found(NotFoundKind::Target, target));
        }
        self.item_map
            .get(&(target.clone(), item.clone()))
            .cloned()
            .ok_or_else(|| CoreError::not_found(NotFoundKind::Item, format!("{target} LATEST {item}")))
    }

    pub fn limits_groups(&self) -> &BTreeMap<String, Vec<ItemKey>> {
        &self.limits_groups
    }

    /// Every limits set name referenced by any telemetry item.
    pub fn limits_set_names(&self) -> BTreeSet<String> {
        let mut sets = BTreeSet::new();
        sets.insert(DEFAULT_LIMITS_SET.to_string());
        for packet in self.all_telemetry() {
            for item in &packet.items {
                if let Some(limits) = &item.limits {
                    sets.extend(limits.values.keys().cloned());
                }
            }
        }
        sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.add_packet(
            PacketKind::Telemetry,
            PacketDef::new("INST", "HEALTH_STATUS")
                .with_item(ItemDef::new("TEMP1", 0, 16, DataType::Uint)),
        );
        catalog
    }

    #[test]
    fn test_lookup_errors_name_the_missing_level() {
        let catalog = sample();
        let err = catalog.telemetry("NOPE", "HEALTH_STATUS").unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: NotFoundKind::Target, .. }));
        let err = catalog.telemetry("INST", "NOPE").unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: NotFoundKind::Packet, .. }));
        let err = catalog
            .packet_item(PacketKind::Telemetry, "INST", "HEALTH_STATUS", "NOPE")
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: NotFoundKind::Item, .. }));
    }

    #[test]
    fn test_json_names_are_uppercased() {
        let json = r#"{
            "telemetry": [{
                "target_name": "inst",
                "packet_name": "health_status",
                "items": [{
                    "name": "temp1",
                    "bit_size": 16,
                    "data_type": "INT",
                    "states": {"hot": {"value": 100}},
                    "limits": {"values": {"default": {
                        "red_low": -80.0, "yellow_low": -70.0,
                        "yellow_high": 60.0, "red_high": 80.0
                    }}}
                }]
            }],
            "limits_groups": {"temps": [
                {"target_name": "inst", "packet_name": "health_status", "item_name": "temp1"}
            ]}
        }"#;
        let catalog = Catalog::from_json_reader(json.as_bytes()).unwrap();
        assert_eq!(catalog.target_names(), vec!["INST".to_string()]);
        let item = catalog
            .packet_item(PacketKind::Telemetry, "INST", "HEALTH_STATUS", "TEMP1")
            .unwrap();
        assert_eq!(item.name, "TEMP1");
        assert!(item.states.contains_key("HOT"));
        assert!(item.limits.unwrap().values.contains_key(DEFAULT_LIMITS_SET));
        assert_eq!(
            catalog.limits_groups()["TEMPS"],
            vec![ItemKey::new("INST", "HEALTH_STATUS", "TEMP1")]
        );
        assert_eq!(
            catalog.packets_with_item("INST", "TEMP1").unwrap(),
            vec!["HEALTH_STATUS".to_string()]
        );
    }

    #[test]
    fn test_reserved_items_always_exist() {
        let catalog = sample();
        let item = catalog
            .packet_item(PacketKind::Telemetry, "INST", "HEALTH_STATUS", "RECEIVED_COUNT")
            .unwrap();
        assert_eq!(item.data_type, DataType::Derived);
    }

    #[test]
    fn test_failed_mutation_leaves_packet_untouched() {
        let catalog = sample();
        let result: CoreResult<()> = catalog.with_packet_mut(
            PacketKind::Telemetry,
            "INST",
            "HEALTH_STATUS",
            |packet| {
                packet.disabled = true;
                Err(CoreError::Validation("nope".into()))
            },
        );
        assert!(result.is_err());
        assert!(!catalog.telemetry("INST", "HEALTH_STATUS").unwrap().disabled);
    }

    #[test]
    fn test_conversions() {
        let poly = Conversion::Polynomial { coeffs: vec![1.0, 2.0] };
        assert_eq!(poly.apply(&Value::Int(3)), Value::Float(7.0));

        let seg = Conversion::Segmented {
            segments: vec![
                Segment { lower_bound: 0.0, coeffs: vec![0.0, 1.0] },
                Segment { lower_bound: 10.0, coeffs: vec![0.0, 2.0] },
            ],
        };
        assert_eq!(seg.apply(&Value::Int(5)), Value::Float(5.0));
        assert_eq!(seg.apply(&Value::Int(20)), Value::Float(40.0));
    }

    #[test]
    fn test_threshold_validation() {
        assert!(LimitThresholds::new(0.0, 10.0, 20.0, 30.0).validate().is_ok());
        assert!(LimitThresholds::new(15.0, 10.0, 20.0, 30.0).validate().is_err());
        assert!(LimitThresholds::new(0.0, 10.0, 20.0, 30.0)
            .with_green(5.0, 15.0)
            .validate()
            .is_err());
    }
}

//! Current Value Table.
//!
//! One immutable [`CvtEntry`] per (target, packet), swapped whole on every
//! update. Overrides live beside the entries and only affect reads.

use core::cmp::Reverse;
use core::str::FromStr;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{is_reserved_item, Catalog, PacketKind, DEFAULT_LIMITS_SET, RESERVED_ITEM_NAMES};
use crate::error::{CoreError, CoreResult, NotFoundKind};
use crate::limits::{LimitsEngine, LimitsState};
use crate::resolver::{resolve_all, resolve_reserved, PacketTimes, Resolved};
use crate::value::{OverrideType, Value, ValueType};

pub const LATEST_PACKET: &str = "LATEST";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvtItem {
    pub values: Resolved,
    pub limits_state: Option<LimitsState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvtEntry {
    pub target_name: String,
    pub packet_name: String,
    pub times: PacketTimes,
    pub stored: bool,
    pub items: BTreeMap<String, CvtItem>,
}

/// Raw values produced by decommutating one packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedPacket {
    pub target_name: String,
    pub packet_name: String,
    pub received_time: DateTime<Utc>,
    pub packet_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stored: bool,
    pub values: BTreeMap<String, Value>,
}

/// Resolved item map ready for [`CurrentValueTable::set_packet`].
#[derive(Debug, Clone, PartialEq)]
pub struct CvtUpdate {
    pub target_name: String,
    pub packet_name: String,
    pub received_time: DateTime<Utc>,
    pub packet_time: DateTime<Utc>,
    pub stored: bool,
    pub items: BTreeMap<String, Resolved>,
}

/// Parsed `TARGET__PACKET__ITEM__TYPE[__LIMITS]` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRequest {
    pub target_name: String,
    pub packet_name: String,
    pub item_name: String,
    pub value_type: ValueType,
    pub with_limits: bool,
}

impl ItemRequest {
    pub fn new(target: &str, packet: &str, item: &str, value_type: ValueType) -> Self {
        Self {
            target_name: target.to_ascii_uppercase(),
            packet_name: packet.to_ascii_uppercase(),
            item_name: item.to_ascii_uppercase(),
            value_type,
            with_limits: false,
        }
    }
}

impl FromStr for ItemRequest {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let parts: Vec<&str> = s.split("__").collect();
        let with_limits = match parts.len() {
            4 => false,
            5 if parts[4].eq_ignore_ascii_case("LIMITS") => true,
            _ => {
                return Err(CoreError::Validation(format!(
                    "Item '{s}' must be formatted as TGT__PKT__ITEM__TYPE"
                )))
            }
        };
        let mut request = ItemRequest::new(parts[0], parts[1], parts[2], parts[3].parse()?);
        request.with_limits = with_limits;
        Ok(request)
    }
}

/// One result of a batch read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlmValue {
    pub value: Value,
    pub limits_state: Option<LimitsState>,
    /// DEFAULT limits of the item when requested with `__LIMITS`
    #[serde(default)]
    pub limits: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub target_name: String,
    pub packet_name: String,
    pub item_name: String,
    pub value_type: ValueType,
    pub value: Value,
}

type PacketId = (String, String);
type ItemId = (String, String, String);

#[derive(Debug)]
pub struct CurrentValueTable {
    catalog: Arc<Catalog>,
    limits: Arc<LimitsEngine>,
    entries: RwLock<HashMap<PacketId, Arc<CvtEntry>>>,
    overrides: RwLock<HashMap<ItemId, BTreeMap<ValueType, Value>>>,
    latest_cache: Mutex<HashMap<PacketId, (Instant, String)>>,
    cache_timeout: Duration,
}

impl CurrentValueTable {
    pub fn new(catalog: Arc<Catalog>, limits: Arc<LimitsEngine>, cache_timeout: Duration) -> Self {
        Self {
            catalog,
            limits,
            entries: RwLock::new(HashMap::new()),
            overrides: RwLock::new(HashMap::new()),
            latest_cache: Mutex::new(HashMap::new()),
            cache_timeout,
        }
    }

    pub fn limits(&self) -> &Arc<LimitsEngine> {
        &self.limits
    }

    /// Resolve every decoded value through its item definition.
    pub fn build_from_packet(&self, decoded: &DecodedPacket) -> CoreResult<CvtUpdate> {
        let def = self
            .catalog
            .telemetry(&decoded.target_name, &decoded.packet_name)?;
        let items = decoded
            .values
            .iter()
            .map(|(name, raw)| {
                let name = name.to_ascii_uppercase();
                let resolved = match def.item(&name) {
                    Some(item) => resolve_all(item, raw),
                    None => Resolved::uniform(raw.clone()),
                };
                (name, resolved)
            })
            .collect();
        Ok(CvtUpdate {
            target_name: def.target_name,
            packet_name: def.packet_name,
            received_time: decoded.received_time,
            packet_time: decoded.packet_time.unwrap_or(decoded.received_time),
            stored: decoded.stored,
            items,
        })
    }

    /// Replace the entry for (target, packet) and run limits on it.
    pub fn set(
        &self,
        target: &str,
        packet: &str,
        items: BTreeMap<String, Resolved>,
        received_time: DateTime<Utc>,
    ) -> CoreResult<Arc<CvtEntry>> {
        self.set_packet(CvtUpdate {
            target_name: target.to_string(),
            packet_name: packet.to_string(),
            received_time,
            packet_time: received_time,
            stored: false,
            items,
        })
    }

    pub fn set_packet(&self, mut update: CvtUpdate) -> CoreResult<Arc<CvtEntry>> {
        let def = self
            .catalog
            .telemetry(&update.target_name, &update.packet_name)?;
        update.target_name = def.target_name.clone();
        update.packet_name = def.packet_name.clone();
        update.items = core::mem::take(&mut update.items)
            .into_iter()
            .map(|(name, values)| (name.to_ascii_uppercase(), values))
            .collect();
        let converted: BTreeMap<String, Value> = update
            .items
            .iter()
            .map(|(name, r)| (name.clone(), r.converted.clone()))
            .collect();
        let states = if update.stored {
            BTreeMap::new()
        } else {
            self.limits.process(&def, &converted, Some(update.packet_time))
        };

        let key = (update.target_name.clone(), update.packet_name.clone());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let received_count = entries
            .get(&key)
            .map_or(0, |e| e.times.received_count)
            + 1;
        let items = update
            .items
            .into_iter()
            .map(|(name, values)| {
                let limits_state = states.get(&name).copied();
                (name, CvtItem { values, limits_state })
            })
            .collect();
        let entry = Arc::new(CvtEntry {
            target_name: update.target_name,
            packet_name: update.packet_name,
            times: PacketTimes {
                packet_time: update.packet_time,
                received_time: update.received_time,
                received_count,
            },
            stored: update.stored,
            items,
        });
        entries.insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    pub fn entry(&self, target: &str, packet: &str) -> Option<Arc<CvtEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&(target.to_ascii_uppercase(), packet.to_ascii_uppercase()))
            .cloned()
    }

    /// Packet of `target` containing `item` with the newest packet time.
    pub fn latest_packet(&self, target: &str, item: &str) -> CoreResult<String> {
        let key = (target.to_ascii_uppercase(), item.to_ascii_uppercase());
        let (target, item) = (key.0.as_str(), key.1.as_str());
        {
            let cache = self.latest_cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((at, packet)) = cache.get(&key) {
                if at.elapsed() < self.cache_timeout {
                    return Ok(packet.clone());
                }
            }
        }
        let candidates = self.catalog.packets_with_item(target, item)?;
        let newest = candidates
            .iter()
            .filter_map(|p| self.entry(target, p).map(|e| (e.times.packet_time, p)))
            .min_by_key(|(time, _)| Reverse(*time))
            .map(|(_, p)| p.clone());
        let packet = match newest.or_else(|| candidates.first().cloned()) {
            Some(p) => p,
            None => {
                return Err(CoreError::not_found(
                    NotFoundKind::Item,
                    format!("{target} {LATEST_PACKET} {item}"),
                ))
            }
        };
        debug!("LATEST {} {} resolved to {}", target, item, packet);
        let mut cache = self.latest_cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.insert(key, (Instant::now(), packet.clone()));
        Ok(packet)
    }

    fn resolve_packet(&self, target: &str, packet: &str, item: &str) -> CoreResult<String> {
        if packet == LATEST_PACKET {
            self.latest_packet(target, item)
        } else {
            // validates the definition exists
            self.catalog
                .packet_item(PacketKind::Telemetry, target, packet, item)?;
            Ok(packet.to_string())
        }
    }

    fn override_for(&self, target: &str, packet: &str, item: &str, value_type: ValueType) -> Option<Value> {
        let overrides = self.overrides.read().unwrap_or_else(PoisonError::into_inner);
        overrides
            .get(&(target.to_string(), packet.to_string(), item.to_string()))
            .and_then(|types| types.get(&value_type))
            .cloned()
    }

    fn current(entry: Option<&CvtEntry>, item: &str, value_type: ValueType) -> (Value, Option<LimitsState>) {
        if is_reserved_item(item) {
            let value = resolve_reserved(item, entry.map(|e| &e.times)).unwrap_or_default();
            return (value, None);
        }
        match entry.and_then(|e| e.items.get(item)) {
            Some(cvt_item) => (cvt_item.values.get(value_type).clone(), cvt_item.limits_state),
            None => (Value::Null, None),
        }
    }

    /// Current value of one item. `packet` may be `LATEST`.
    pub fn get_item(&self, target: &str, packet: &str, item: &str, value_type: ValueType) -> CoreResult<Value> {
        let (target, packet, item) = upper(target, packet, item);
        let (target, packet, item) = (target.as_str(), packet.as_str(), item.as_str());
        let packet = self.resolve_packet(target, packet, item)?;
        if let Some(value) = self.override_for(target, &packet, item, value_type) {
            return Ok(value);
        }
        let entry = self.entry(target, &packet);
        Ok(Self::current(entry.as_deref(), item, value_type).0)
    }

    /// Batch read with a staleness overlay on the limits state.
    pub fn get_values(&self, requests: &[ItemRequest], stale_time: Duration) -> CoreResult<Vec<TlmValue>> {
        let now = Utc::now();
        let stale = chrono::Duration::from_std(stale_time).unwrap_or_else(|_| chrono::Duration::weeks(52 * 1000));
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let packet = self.resolve_packet(&request.target_name, &request.packet_name, &request.item_name)?;
            let limits = if request.with_limits {
                self.catalog
                    .packet_item(PacketKind::Telemetry, &request.target_name, &packet, &request.item_name)?
                    .limits
                    .and_then(|l| l.values.get(DEFAULT_LIMITS_SET).map(|t| t.to_vec()))
            } else {
                None
            };
            if let Some(value) = self.override_for(&request.target_name, &packet, &request.item_name, request.value_type) {
                results.push(TlmValue { value, limits_state: None, limits });
                continue;
            }
            let entry = self.entry(&request.target_name, &packet);
            let (value, mut limits_state) = Self::current(entry.as_deref(), &request.item_name, request.value_type);
            if let Some(entry) = &entry {
                if !value.is_null() && now - entry.times.received_time > stale {
                    limits_state = Some(LimitsState::Stale);
                }
            }
            results.push(TlmValue { value, limits_state, limits });
        }
        Ok(results)
    }

    /// Every item of a packet with its value and limits state.
    pub fn get_tlm_packet(
        &self,
        target: &str,
        packet: &str,
        value_type: ValueType,
        stale_time: Duration,
    ) -> CoreResult<Vec<(String, TlmValue)>> {
        let def = self.catalog.telemetry(target, packet)?;
        let (target, packet) = (def.target_name.as_str(), def.packet_name.as_str());
        let names: Vec<String> = RESERVED_ITEM_NAMES
            .iter()
            .map(|s| s.to_string())
            .chain(def.items.iter().map(|i| i.name.clone()))
            .collect();
        let requests: Vec<ItemRequest> = names
            .iter()
            .map(|name| ItemRequest::new(target, packet, name, value_type))
            .collect();
        let values = self.get_values(&requests, stale_time)?;
        Ok(names.into_iter().zip(values).collect())
    }

    /// Write one representation directly into the current entry.
    pub fn set_tlm(&self, target: &str, packet: &str, item: &str, value: Value, value_type: ValueType) -> CoreResult<()> {
        let (target, packet, item) = upper(target, packet, item);
        let (target, packet, item) = (target.as_str(), packet.as_str(), item.as_str());
        self.catalog
            .packet_item(PacketKind::Telemetry, target, packet, item)?;
        if is_reserved_item(item) {
            return Err(CoreError::Validation(format!(
                "Cannot set reserved item {target} {packet} {item}"
            )));
        }
        let key = (target.to_string(), packet.to_string());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut entry = match entries.get(&key) {
            Some(existing) => (**existing).clone(),
            None => {
                let now = Utc::now();
                CvtEntry {
                    target_name: target.to_string(),
                    packet_name: packet.to_string(),
                    times: PacketTimes {
                        packet_time: now,
                        received_time: now,
                        received_count: 0,
                    },
                    stored: false,
                    items: BTreeMap::new(),
                }
            }
        };
        let cvt_item = entry.items.entry(item.to_string()).or_insert_with(|| CvtItem {
            values: Resolved::uniform(Value::Null),
            limits_state: None,
        });
        cvt_item.values.set(value_type, value);
        entries.insert(key, Arc::new(entry));
        Ok(())
    }

    pub fn override_value(
        &self,
        target: &str,
        packet: &str,
        item: &str,
        value: Value,
        override_type: OverrideType,
    ) -> CoreResult<()> {
        let (target, packet, item) = upper(target, packet, item);
        let (target, packet, item) = (target.as_str(), packet.as_str(), item.as_str());
        self.catalog
            .packet_item(PacketKind::Telemetry, target, packet, item)?;
        let mut overrides = self.overrides.write().unwrap_or_else(PoisonError::into_inner);
        let types = overrides
            .entry((target.to_string(), packet.to_string(), item.to_string()))
            .or_default();
        for value_type in override_type.value_types() {
            let stored = match value_type {
                ValueType::Formatted | ValueType::WithUnits => Value::String(value.to_string()),
                _ => value.clone(),
            };
            types.insert(*value_type, stored);
        }
        Ok(())
    }

    pub fn normalize(&self, target: &str, packet: &str, item: &str, override_type: OverrideType) -> CoreResult<()> {
        self.catalog
            .packet_item(PacketKind::Telemetry, target, packet, item)?;
        let key = upper(target, packet, item);
        let mut overrides = self.overrides.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(types) = overrides.get_mut(&key) {
            for value_type in override_type.value_types() {
                types.remove(value_type);
            }
            if types.is_empty() {
                overrides.remove(&key);
            }
        }
        Ok(())
    }

    pub fn overrides(&self) -> Vec<OverrideEntry> {
        let overrides = self.overrides.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<OverrideEntry> = overrides
            .iter()
            .flat_map(|((target, packet, item), types)| {
                types.iter().map(move |(value_type, value)| OverrideEntry {
                    target_name: target.clone(),
                    packet_name: packet.clone(),
                    item_name: item.clone(),
                    value_type: *value_type,
                    value: value.clone(),
                })
            })
            .collect();
        out.sort_by(|a, b| {
            (&a.target_name, &a.packet_name, &a.item_name, a.value_type)
                .cmp(&(&b.target_name, &b.packet_name, &b.item_name, b.value_type))
        });
        out
    }

    pub fn get_tlm_cnt(&self, target: &str, packet: &str) -> CoreResult<u64> {
        self.catalog.telemetry(target, packet)?;
        Ok(self
            .entry(target, packet)
            .map_or(0, |e| e.times.received_count))
    }
}

fn upper(target: &str, packet: &str, item: &str) -> (String, String, String) {
    (
        target.to_ascii_uppercase(),
        packet.to_ascii_uppercase(),
        item.to_ascii_uppercase(),
    )
}

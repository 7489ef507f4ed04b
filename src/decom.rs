//! Decommutation worker for one target.
//!
//! Consumes raw TELEMETRY streams, resolves every item into the CVT (which
//! runs limits), republishes the result on the DECOM stream and answers
//! build-command requests addressed to the target.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::catalog::{Catalog, DataType, PacketDef, PacketKind, RESERVED_ITEM_NAMES};
use crate::codec::{decode_packet, write_item};
use crate::command::{validate_command, BuildRequest, CommandResponse};
use crate::config::CoreConfig;
use crate::cvt::{CurrentValueTable, CvtEntry, DecodedPacket};
use crate::error::{CoreError, CoreResult, NotFoundKind};
use crate::resolver::resolve_reserved;
use crate::topic::{decom_ack_topic, decom_interface_topic, packet_topic, StreamOffset, TopicKind, Topics};
use crate::value::{Value, ValueType};

/// Wire form of an undecoded packet on a TELEMETRY stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPacket {
    pub target_name: String,
    pub packet_name: String,
    pub received_time: DateTime<Utc>,
    #[serde(default)]
    pub packet_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stored: bool,
    #[serde(with = "serde_bytes")]
    pub buffer: Vec<u8>,
}

/// Wire form of a decommutated packet on a DECOM stream.
///
/// `json_data` holds the raw value under the item name and the other
/// representations under `ITEM__C`, `ITEM__F`, `ITEM__U`, plus the limits
/// state under `ITEM__L` when one is latched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecomMessage {
    pub target_name: String,
    pub packet_name: String,
    pub packet_time: DateTime<Utc>,
    pub received_time: DateTime<Utc>,
    pub received_count: u64,
    pub stored: bool,
    pub json_data: BTreeMap<String, Value>,
}

impl DecomMessage {
    pub fn from_entry(entry: &CvtEntry) -> Self {
        let mut json_data = BTreeMap::new();
        for name in RESERVED_ITEM_NAMES {
            if let Some(value) = resolve_reserved(name, Some(&entry.times)) {
                json_data.insert(name.to_string(), value);
            }
        }
        for (name, item) in &entry.items {
            json_data.insert(name.clone(), item.values.raw.clone());
            json_data.insert(format!("{name}__C"), item.values.converted.clone());
            json_data.insert(format!("{name}__F"), item.values.formatted.clone());
            json_data.insert(format!("{name}__U"), item.values.with_units.clone());
            if let Some(state) = item.limits_state {
                json_data.insert(format!("{name}__L"), Value::String(state.to_string()));
            }
        }
        Self {
            target_name: entry.target_name.clone(),
            packet_name: entry.packet_name.clone(),
            packet_time: entry.times.packet_time,
            received_time: entry.times.received_time,
            received_count: entry.times.received_count,
            stored: entry.stored,
            json_data,
        }
    }
}

/// Encode item values into a fresh buffer for `packet`. Identification
/// items take their id values; CONVERTED state names map to their raw values.
pub fn encode_packet(
    packet: &PacketDef,
    values: &BTreeMap<String, Value>,
    value_type: ValueType,
) -> CoreResult<Vec<u8>> {
    for name in values.keys() {
        if packet.item(name).is_none() {
            return Err(CoreError::not_found(
                NotFoundKind::Item,
                format!("{} {} {name}", packet.target_name, packet.packet_name),
            ));
        }
    }
    let mut buffer = vec![0u8; packet.defined_length()];
    for item in &packet.items {
        if item.data_type == DataType::Derived {
            continue;
        }
        let value = match (values.get(&item.name), &item.id_value) {
            (Some(v), _) => v,
            (None, Some(id)) => id,
            (None, None) => continue,
        };
        let raw = match (value_type, value) {
            (ValueType::Raw, v) => v.clone(),
            (_, Value::String(s)) => match item.states.get(&s.to_ascii_uppercase()) {
                Some(state) => state.value.clone(),
                None => value.clone(),
            },
            (_, v) => v.clone(),
        };
        write_item(item, &raw, &mut buffer, packet.endianness)?;
    }
    Ok(buffer)
}

#[derive(Debug)]
pub struct DecomWorker {
    target_name: String,
    scope: String,
    catalog: Arc<Catalog>,
    topics: Arc<Topics>,
    cvt: Arc<CurrentValueTable>,
    positions: Vec<(String, StreamOffset)>,
    build_offset: StreamOffset,
    poll_interval: Duration,
}

impl DecomWorker {
    pub fn new(
        target: &str,
        catalog: Arc<Catalog>,
        topics: Arc<Topics>,
        cvt: Arc<CurrentValueTable>,
        config: &CoreConfig,
    ) -> CoreResult<Self> {
        let target_name = target.to_ascii_uppercase();
        let positions = catalog
            .packet_names(PacketKind::Telemetry, &target_name)?
            .iter()
            .map(|packet| {
                (
                    packet_topic(&config.scope, TopicKind::Telemetry, &target_name, packet),
                    StreamOffset::ZERO,
                )
            })
            .collect();
        Ok(Self {
            target_name,
            scope: config.scope.clone(),
            catalog,
            topics,
            cvt,
            positions,
            build_offset: StreamOffset::ZERO,
            poll_interval: config.poll_interval(),
        })
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Decode one raw packet into the CVT and the DECOM stream.
    pub fn decom_packet(&self, raw: &RawPacket) -> CoreResult<Arc<CvtEntry>> {
        let def = self.catalog.telemetry(&raw.target_name, &raw.packet_name)?;
        let decoded = DecodedPacket {
            target_name: def.target_name.clone(),
            packet_name: def.packet_name.clone(),
            received_time: raw.received_time,
            packet_time: raw.packet_time,
            stored: raw.stored,
            values: decode_packet(&def, &raw.buffer)?,
        };
        let update = self.cvt.build_from_packet(&decoded)?;
        let entry = self.cvt.set_packet(update)?;
        let topic = packet_topic(&self.scope, TopicKind::Decom, &def.target_name, &def.packet_name);
        self.topics.write_topic(&topic, &DecomMessage::from_entry(&entry))?;
        Ok(entry)
    }

    fn handle_build_request(&self, id: StreamOffset, request: &BuildRequest) {
        let response = match validate_command(&self.catalog, &request.request, request.options) {
            Ok((_, built)) => CommandResponse::ack(id).with_buffer(built.buffer),
            Err(e) => {
                debug!(
                    "Build of {} {} rejected: {}",
                    request.request.target_name, request.request.command_name, e
                );
                CommandResponse::nack(id, &e)
            }
        };
        let acks = decom_ack_topic(&self.scope, &self.target_name);
        if let Err(e) = self.topics.write_topic(&acks, &response) {
            error!("Failed to acknowledge build request {}: {}", id, e);
        }
    }

    /// Drain everything pending; returns how many messages were handled.
    pub fn poll_once(&mut self) -> usize {
        let mut handled = 0;
        for (topic, entry) in self.topics.read_topics(&self.positions, None) {
            if let Some(position) = self.positions.iter_mut().find(|(t, _)| *t == topic) {
                position.1 = entry.offset;
            }
            handled += 1;
            let result = entry
                .decode::<RawPacket>()
                .and_then(|raw| self.decom_packet(&raw).map(|_| ()));
            if let Err(e) = result {
                error!("Decom error on {} at {}: {}", topic, entry.offset, e);
            }
        }

        let requests = decom_interface_topic(&self.scope, &self.target_name);
        for entry in self.topics.read_after(&requests, self.build_offset, None) {
            self.build_offset = entry.offset;
            handled += 1;
            match entry.decode::<BuildRequest>() {
                Ok(request) => self.handle_build_request(entry.offset, &request),
                Err(e) => error!("Malformed build request at {}: {}", entry.offset, e),
            }
        }
        handled
    }

    pub async fn run(mut self) {
        info!("Decom worker for {} running", self.target_name);
        loop {
            if self.poll_once() == 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}

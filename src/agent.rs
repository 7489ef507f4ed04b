//! `GroundAgent`: owns the shared services and exposes the telemetry API.
//!
//! Command, limits and queue operations live on [`CommandPipeline`],
//! [`LimitsEngine`] and [`QueueManager`], reachable through the accessors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::catalog::{Catalog, ItemDef, PacketKind};
use crate::command::{CommandInstance, CommandPipeline};
use crate::config::CoreConfig;
use crate::cvt::{CurrentValueTable, ItemRequest, OverrideEntry, TlmValue};
use crate::decom::{encode_packet, DecomMessage, DecomWorker, RawPacket};
use crate::error::CoreResult;
use crate::extract::{parse_set_tlm_text, parse_tlm_text};
use crate::handler::{CommandHandler, Interface};
use crate::limits::LimitsEngine;
use crate::queue::{self, run_queue_processor, QueueManager, QueueState};
use crate::topic::{
    decode_subscription, encode_subscription, packet_topic, StreamOffset, TopicKind, Topics,
};
use crate::value::{OverrideType, Value, ValueType};

/// Either `"TARGET PACKET ITEM"` or a positional triple.
pub trait ToTlmAddress {
    fn to_tlm_address(self) -> CoreResult<(String, String, String)>;
}

impl ToTlmAddress for &str {
    fn to_tlm_address(self) -> CoreResult<(String, String, String)> {
        parse_tlm_text(self)
    }
}

impl ToTlmAddress for (&str, &str, &str) {
    fn to_tlm_address(self) -> CoreResult<(String, String, String)> {
        Ok((
            self.0.to_ascii_uppercase(),
            self.1.to_ascii_uppercase(),
            self.2.to_ascii_uppercase(),
        ))
    }
}

#[derive(Debug)]
pub struct GroundAgent {
    config: CoreConfig,
    catalog: Arc<Catalog>,
    topics: Arc<Topics>,
    limits: Arc<LimitsEngine>,
    cvt: Arc<CurrentValueTable>,
    queues: Arc<QueueManager>,
    pipeline: Arc<CommandPipeline>,
}

impl GroundAgent {
    pub fn new(catalog: Catalog, config: CoreConfig) -> Self {
        let catalog = Arc::new(catalog);
        let topics = Arc::new(Topics::new(config.stream_maxlen));
        let limits = Arc::new(LimitsEngine::new(
            Arc::clone(&catalog),
            Arc::clone(&topics),
            &config.scope,
        ));
        let cvt = Arc::new(CurrentValueTable::new(
            Arc::clone(&catalog),
            Arc::clone(&limits),
            config.cache_timeout(),
        ));
        let queues = Arc::new(QueueManager::new());
        if let Some(name) = &config.default_queue {
            queues.create(name, QueueState::Hold);
        }
        let pipeline = Arc::new(CommandPipeline::new(
            Arc::clone(&catalog),
            Arc::clone(&topics),
            Arc::clone(&queues),
            config.clone(),
        ));
        Self {
            config,
            catalog,
            topics,
            limits,
            cvt,
            queues,
            pipeline,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn topics(&self) -> &Arc<Topics> {
        &self.topics
    }

    pub fn cvt(&self) -> &Arc<CurrentValueTable> {
        &self.cvt
    }

    pub fn limits(&self) -> &Arc<LimitsEngine> {
        &self.limits
    }

    pub fn commands(&self) -> &Arc<CommandPipeline> {
        &self.pipeline
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    fn stale_time(&self) -> Duration {
        Duration::from_secs(self.config.stale_time_s)
    }

    pub fn decom_worker(&self, target: &str) -> CoreResult<DecomWorker> {
        DecomWorker::new(
            target,
            Arc::clone(&self.catalog),
            Arc::clone(&self.topics),
            Arc::clone(&self.cvt),
            &self.config,
        )
    }

    pub fn command_handler(&self, target: &str, interface: Box<dyn Interface>) -> CoreResult<CommandHandler> {
        CommandHandler::new(
            target,
            Arc::clone(&self.catalog),
            Arc::clone(&self.topics),
            interface,
            &self.config,
        )
    }

    pub fn spawn_decom(&self, target: &str) -> CoreResult<JoinHandle<()>> {
        let worker = self.decom_worker(target)?;
        Ok(tokio::spawn(worker.run()))
    }

    pub fn spawn_handler(&self, target: &str, interface: Box<dyn Interface>) -> CoreResult<JoinHandle<()>> {
        let handler = self.command_handler(target, interface)?;
        Ok(tokio::spawn(handler.run()))
    }

    /// Create the queue if needed and start dispatching its released commands.
    pub fn spawn_queue_processor(&self, name: &str, state: QueueState) -> JoinHandle<()> {
        let name = name.to_ascii_uppercase();
        self.queues.create(&name, state);
        tokio::spawn(run_queue_processor(
            Arc::clone(&self.queues),
            Arc::clone(&self.pipeline),
            name,
        ))
    }

    /// Send one queued command now, whatever the queue state.
    pub async fn queue_exec(&self, name: &str, id: Option<u64>) -> CoreResult<CommandInstance> {
        queue::exec(&self.queues, &self.pipeline, name, id).await
    }

    pub fn tlm_variable<A: ToTlmAddress>(&self, address: A, value_type: ValueType) -> CoreResult<Value> {
        let (target, packet, item) = address.to_tlm_address()?;
        self.cvt.get_item(&target, &packet, &item, value_type)
    }

    pub fn tlm<A: ToTlmAddress>(&self, address: A) -> CoreResult<Value> {
        self.tlm_variable(address, ValueType::Converted)
    }

    pub fn tlm_raw<A: ToTlmAddress>(&self, address: A) -> CoreResult<Value> {
        self.tlm_variable(address, ValueType::Raw)
    }

    pub fn tlm_formatted<A: ToTlmAddress>(&self, address: A) -> CoreResult<Value> {
        self.tlm_variable(address, ValueType::Formatted)
    }

    pub fn tlm_with_units<A: ToTlmAddress>(&self, address: A) -> CoreResult<Value> {
        self.tlm_variable(address, ValueType::WithUnits)
    }

    /// `"TARGET PACKET ITEM = value"` written into one representation.
    pub fn set_tlm(&self, text: &str, value_type: ValueType) -> CoreResult<()> {
        let (target, packet, item, value) = parse_set_tlm_text(text)?;
        self.cvt.set_tlm(&target, &packet, &item, value, value_type)
    }

    pub fn set_tlm_value<A: ToTlmAddress>(&self, address: A, value: Value, value_type: ValueType) -> CoreResult<()> {
        let (target, packet, item) = address.to_tlm_address()?;
        self.cvt.set_tlm(&target, &packet, &item, value, value_type)
    }

    /// Encode `values` into a packet and publish it as raw telemetry. A
    /// running decom worker for the target picks it up.
    pub fn inject_tlm(
        &self,
        target: &str,
        packet: &str,
        values: BTreeMap<String, Value>,
        value_type: ValueType,
    ) -> CoreResult<StreamOffset> {
        let def = self
            .catalog
            .telemetry(&target.to_ascii_uppercase(), &packet.to_ascii_uppercase())?;
        let values = values
            .into_iter()
            .map(|(name, value)| (name.to_ascii_uppercase(), value))
            .collect();
        let buffer = encode_packet(&def, &values, value_type)?;
        let now = Utc::now();
        let raw = RawPacket {
            target_name: def.target_name.clone(),
            packet_name: def.packet_name.clone(),
            received_time: now,
            packet_time: Some(now),
            stored: false,
            buffer,
        };
        let topic = packet_topic(&self.config.scope, TopicKind::Telemetry, &def.target_name, &def.packet_name);
        self.topics.write_topic(&topic, &raw)
    }

    pub fn override_tlm<A: ToTlmAddress>(&self, address: A, value: Value, override_type: OverrideType) -> CoreResult<()> {
        let (target, packet, item) = address.to_tlm_address()?;
        self.cvt.override_value(&target, &packet, &item, value, override_type)?;
        info!("Overriding {} {} {} ({:?})", target, packet, item, override_type);
        Ok(())
    }

    pub fn normalize_tlm<A: ToTlmAddress>(&self, address: A, override_type: OverrideType) -> CoreResult<()> {
        let (target, packet, item) = address.to_tlm_address()?;
        self.cvt.normalize(&target, &packet, &item, override_type)
    }

    pub fn get_overrides(&self) -> Vec<OverrideEntry> {
        self.cvt.overrides()
    }

    pub fn get_tlm_packet(
        &self,
        target: &str,
        packet: &str,
        value_type: ValueType,
        stale_time: Option<Duration>,
    ) -> CoreResult<Vec<(String, TlmValue)>> {
        self.cvt.get_tlm_packet(
            &target.to_ascii_uppercase(),
            &packet.to_ascii_uppercase(),
            value_type,
            stale_time.unwrap_or_else(|| self.stale_time()),
        )
    }

    /// Batch read of `TARGET__PACKET__ITEM__TYPE[__LIMITS]` addresses.
    pub fn get_tlm_values(&self, items: &[&str], stale_time: Option<Duration>) -> CoreResult<Vec<TlmValue>> {
        let requests = items
            .iter()
            .map(|item| item.parse::<ItemRequest>())
            .collect::<CoreResult<Vec<_>>>()?;
        self.cvt
            .get_values(&requests, stale_time.unwrap_or_else(|| self.stale_time()))
    }

    /// Handle positioned at the end of each packet's DECOM stream.
    pub fn subscribe_packets(&self, packets: &[(&str, &str)]) -> CoreResult<String> {
        let mut positions = Vec::with_capacity(packets.len());
        for (target, packet) in packets {
            let def = self
                .catalog
                .telemetry(&target.to_ascii_uppercase(), &packet.to_ascii_uppercase())?;
            let topic = packet_topic(&self.config.scope, TopicKind::Decom, &def.target_name, &def.packet_name);
            let offset = self.topics.last_offset(&topic);
            positions.push((topic, offset));
        }
        Ok(encode_subscription(&positions))
    }

    /// Packets decommutated since `handle`, plus the handle to resume from.
    pub fn get_packets(&self, handle: &str, count: Option<usize>) -> CoreResult<(String, Vec<DecomMessage>)> {
        let mut positions = decode_subscription(handle)?;
        let mut packets = Vec::new();
        for (topic, entry) in self.topics.read_topics(&positions, count) {
            if let Some(position) = positions.iter_mut().find(|(t, _)| *t == topic) {
                position.1 = entry.offset;
            }
            packets.push(entry.decode::<DecomMessage>()?);
        }
        Ok((encode_subscription(&positions), packets))
    }

    pub fn get_tlm_cnt(&self, target: &str, packet: &str) -> CoreResult<u64> {
        self.cvt
            .get_tlm_cnt(&target.to_ascii_uppercase(), &packet.to_ascii_uppercase())
    }

    pub fn get_target_names(&self) -> Vec<String> {
        self.catalog.target_names()
    }

    pub fn get_all_tlm_names(&self, target: &str) -> CoreResult<Vec<String>> {
        self.catalog
            .packet_names(PacketKind::Telemetry, &target.to_ascii_uppercase())
    }

    pub fn get_item(&self, target: &str, packet: &str, item: &str) -> CoreResult<ItemDef> {
        self.catalog.packet_item(
            PacketKind::Telemetry,
            &target.to_ascii_uppercase(),
            &packet.to_ascii_uppercase(),
            &item.to_ascii_uppercase(),
        )
    }
}

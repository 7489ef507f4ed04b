//! Per-target interface handler.
//!
//! The write path drains the target's command stream, rebuilds each command
//! with the checks it was sent with, writes it to the [`Interface`] and
//! acknowledges on the ACK stream. The read path identifies inbound buffers
//! and publishes them as raw telemetry.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, PacketDef, PacketKind};
use crate::codec::identify;
use crate::command::{validate_command, CommandInstance, CommandResponse, SentCommand};
use crate::config::CoreConfig;
use crate::decom::RawPacket;
use crate::error::{CoreError, CoreResult};
use crate::topic::{ack_topic, packet_topic, target_command_topic, StreamOffset, TopicKind, Topics};

/// A physical or simulated link to one target.
pub trait Interface: Send {
    fn name(&self) -> &str;

    fn write(&mut self, buffer: &[u8]) -> CoreResult<()>;

    /// Next inbound buffer, if one is waiting. Must not block.
    fn read(&mut self) -> CoreResult<Option<Vec<u8>>>;
}

#[derive(Debug, Default)]
struct MemoryLink {
    written: Vec<Vec<u8>>,
    inbound: VecDeque<Vec<u8>>,
    fail_writes: bool,
}

/// Loopback interface; clones share the same link.
#[derive(Debug, Clone, Default)]
pub struct MemoryInterface {
    name: String,
    link: Arc<Mutex<MemoryLink>>,
}

impl MemoryInterface {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            link: Arc::default(),
        }
    }

    pub fn push_inbound(&self, buffer: Vec<u8>) {
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        link.inbound.push_back(buffer);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        let link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        link.written.clone()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        link.fail_writes = fail;
    }
}

impl Interface for MemoryInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, buffer: &[u8]) -> CoreResult<()> {
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        if link.fail_writes {
            return Err(CoreError::Command(format!("Interface {} is disconnected", self.name)));
        }
        link.written.push(buffer.to_vec());
        Ok(())
    }

    fn read(&mut self) -> CoreResult<Option<Vec<u8>>> {
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(link.inbound.pop_front())
    }
}

pub struct CommandHandler {
    target_name: String,
    scope: String,
    catalog: Arc<Catalog>,
    topics: Arc<Topics>,
    interface: Box<dyn Interface>,
    offset: StreamOffset,
    poll_interval: Duration,
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("target_name", &self.target_name)
            .field("interface", &self.interface.name())
            .field("offset", &self.offset)
            .finish()
    }
}

impl CommandHandler {
    /// Handles only commands appended after construction.
    pub fn new(
        target: &str,
        catalog: Arc<Catalog>,
        topics: Arc<Topics>,
        interface: Box<dyn Interface>,
        config: &CoreConfig,
    ) -> CoreResult<Self> {
        let target_name = target.to_ascii_uppercase();
        // validates the target
        catalog.packet_names(PacketKind::Command, &target_name)?;
        let offset = topics.last_offset(&target_command_topic(&config.scope, &target_name));
        Ok(Self {
            target_name,
            scope: config.scope.clone(),
            catalog,
            topics,
            interface,
            offset,
            poll_interval: config.poll_interval(),
        })
    }

    fn next_count(&self, packet: &PacketDef) -> u64 {
        let topic = packet_topic(&self.scope, TopicKind::Command, &packet.target_name, &packet.packet_name);
        self.topics
            .get_newest_message(&topic)
            .and_then(|entry| entry.decode::<SentCommand>().ok())
            .map_or(0, |sent| sent.received_count)
            + 1
    }

    /// Rebuild, write and record one command.
    pub fn process_command(&mut self, instance: &CommandInstance) -> CoreResult<Vec<u8>> {
        let (packet, built) = validate_command(&self.catalog, &instance.request(), instance.options())?;
        self.interface.write(&built.buffer)?;
        if instance.log_message {
            info!("{}", instance.cmd_string);
        }
        let sent = SentCommand {
            target_name: packet.target_name.clone(),
            packet_name: packet.packet_name.clone(),
            received_time: Utc::now(),
            received_count: self.next_count(&packet),
            cmd_string: instance.cmd_string.clone(),
            username: instance.username.clone(),
            buffer: built.buffer.clone(),
        };
        let topic = packet_topic(&self.scope, TopicKind::Command, &packet.target_name, &packet.packet_name);
        self.topics.write_topic(&topic, &sent)?;
        Ok(built.buffer)
    }

    /// Drain pending commands; returns how many were handled.
    pub fn poll_commands(&mut self) -> usize {
        let topic = target_command_topic(&self.scope, &self.target_name);
        let entries = self.topics.read_after(&topic, self.offset, None);
        let handled = entries.len();
        for entry in entries {
            self.offset = entry.offset;
            let result = entry
                .decode::<CommandInstance>()
                .and_then(|instance| self.process_command(&instance));
            let response = match result {
                Ok(_) => CommandResponse::ack(entry.offset),
                Err(e) => {
                    warn!("{} command at {} rejected: {}", self.target_name, entry.offset, e);
                    CommandResponse::nack(entry.offset, &e)
                }
            };
            if let Err(e) = self
                .topics
                .write_topic(&ack_topic(&self.scope, &self.target_name), &response)
            {
                error!("Failed to acknowledge {} command {}: {}", self.target_name, entry.offset, e);
            }
        }
        handled
    }

    fn identify(&self, buffer: &[u8]) -> CoreResult<Option<PacketDef>> {
        let packets = self.catalog.packets(PacketKind::Telemetry, &self.target_name)?;
        Ok(packets.into_iter().find(|packet| identify(packet, buffer)))
    }

    /// Publish every waiting inbound buffer as raw telemetry.
    pub fn poll_telemetry(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let buffer = match self.interface.read() {
                Ok(Some(buffer)) => buffer,
                Ok(None) => break,
                Err(e) => {
                    error!("Read error on {}: {}", self.interface.name(), e);
                    break;
                }
            };
            handled += 1;
            let packet = match self.identify(&buffer) {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    warn!(
                        "Unidentified {} byte packet from {}",
                        buffer.len(),
                        self.interface.name()
                    );
                    continue;
                }
                Err(e) => {
                    error!("Identification failed on {}: {}", self.interface.name(), e);
                    continue;
                }
            };
            let raw = RawPacket {
                target_name: packet.target_name.clone(),
                packet_name: packet.packet_name.clone(),
                received_time: Utc::now(),
                packet_time: None,
                stored: false,
                buffer,
            };
            let topic = packet_topic(&self.scope, TopicKind::Telemetry, &packet.target_name, &packet.packet_name);
            if let Err(e) = self.topics.write_topic(&topic, &raw) {
                error!("Failed to publish {} {}: {}", packet.target_name, packet.packet_name, e);
            }
        }
        handled
    }

    pub async fn run(mut self) {
        info!(
            "Command handler for {} running on {}",
            self.target_name,
            self.interface.name()
        );
        loop {
            let handled = self.poll_commands() + self.poll_telemetry();
            if handled == 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_interface_shares_link() {
        let interface = MemoryInterface::new("LOOPBACK");
        let mut writer: Box<dyn Interface> = Box::new(interface.clone());
        writer.write(&[1, 2]).unwrap();
        assert_eq!(interface.written(), vec![vec![1, 2]]);

        interface.push_inbound(vec![9]);
        assert_eq!(writer.read().unwrap(), Some(vec![9]));
        assert_eq!(writer.read().unwrap(), None);

        interface.set_fail_writes(true);
        assert!(writer.write(&[3]).is_err());
    }
}

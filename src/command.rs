//! Command construction, validation and dispatch.
//!
//! Every `cmd*` variant is a thin caller of [`CommandPipeline::cmd_implementation`]
//! with a literal [`CmdOptions`]. Direct sends append to the target's command
//! stream and poll the acknowledgement stream until the response correlated
//! to the request offset arrives or the timeout elapses.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::catalog::{is_reserved_item, Catalog, DataType, ItemDef, PacketDef, PacketKind, StateDef};
use crate::codec::write_item;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult, NotFoundKind};
use crate::extract::{parse_cmd_text, CommandRequest};
use crate::queue::QueueManager;
use crate::topic::{
    ack_topic, decom_ack_topic, decom_interface_topic, packet_topic, target_command_topic,
    StreamOffset, TopicKind, Topics,
};
use crate::value::Value;

pub const OBFUSCATED: &str = "*****";
const MAX_PARAM_STRING: usize = 256;

/// Which pipeline stages run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdOptions {
    pub range_check: bool,
    pub hazardous_check: bool,
    pub raw: bool,
}

impl CmdOptions {
    pub const NORMAL: CmdOptions = CmdOptions { range_check: true, hazardous_check: true, raw: false };
    pub const NO_RANGE_CHECK: CmdOptions = CmdOptions { range_check: false, hazardous_check: true, raw: false };
    pub const NO_HAZARDOUS_CHECK: CmdOptions = CmdOptions { range_check: true, hazardous_check: false, raw: false };
    pub const NO_CHECKS: CmdOptions = CmdOptions { range_check: false, hazardous_check: false, raw: false };
    pub const RAW: CmdOptions = CmdOptions { range_check: true, hazardous_check: true, raw: true };
    pub const RAW_NO_RANGE_CHECK: CmdOptions = CmdOptions { range_check: false, hazardous_check: true, raw: true };
    pub const RAW_NO_HAZARDOUS_CHECK: CmdOptions = CmdOptions { range_check: true, hazardous_check: false, raw: true };
    pub const RAW_NO_CHECKS: CmdOptions = CmdOptions { range_check: false, hazardous_check: false, raw: true };

    /// API verb these options correspond to; used in output strings.
    pub fn method_name(&self) -> &'static str {
        match (self.raw, self.range_check, self.hazardous_check) {
            (false, true, true) => "cmd",
            (false, false, true) => "cmd_no_range_check",
            (false, true, false) => "cmd_no_hazardous_check",
            (false, false, false) => "cmd_no_checks",
            (true, true, true) => "cmd_raw",
            (true, false, true) => "cmd_raw_no_range_check",
            (true, true, false) => "cmd_raw_no_hazardous_check",
            (true, false, false) => "cmd_raw_no_checks",
        }
    }
}

impl Default for CmdOptions {
    fn default() -> Self {
        CmdOptions::NORMAL
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueueTarget {
    /// Use the configured default queue if there is one
    #[default]
    Default,
    Named(String),
    /// Bypass any default queue
    Direct,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    pub timeout: Option<Duration>,
    pub queue: QueueTarget,
    pub log_message: Option<bool>,
    pub username: Option<String>,
}

impl DispatchOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn to_queue(mut self, queue: &str) -> Self {
        self.queue = QueueTarget::Named(queue.to_ascii_uppercase());
        self
    }

    pub fn direct(mut self) -> Self {
        self.queue = QueueTarget::Direct;
        self
    }

    pub fn with_log_message(mut self, log_message: bool) -> Self {
        self.log_message = Some(log_message);
        self
    }

    pub fn as_user(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }
}

/// A validated command ready for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInstance {
    pub target_name: String,
    pub cmd_name: String,
    pub cmd_params: BTreeMap<String, Value>,
    pub range_check: bool,
    pub hazardous_check: bool,
    pub raw: bool,
    pub cmd_string: String,
    pub username: String,
    pub log_message: bool,
    pub queue: Option<String>,
}

impl CommandInstance {
    pub fn options(&self) -> CmdOptions {
        CmdOptions {
            range_check: self.range_check,
            hazardous_check: self.hazardous_check,
            raw: self.raw,
        }
    }

    pub fn request(&self) -> CommandRequest {
        CommandRequest {
            target_name: self.target_name.clone(),
            command_name: self.cmd_name.clone(),
            params: self.cmd_params.clone(),
        }
    }
}

/// Request for a packed buffer without sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub request: CommandRequest,
    pub options: CmdOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Acknowledged,
    NegativeAck,
    Invalid,
    Hazardous,
    Disabled,
}

/// Acknowledgement correlated to a request by the request's stream offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: StreamOffset,
    pub timestamp: DateTime<Utc>,
    pub status: ResponseStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, with = "serde_bytes")]
    pub buffer: Vec<u8>,
}

impl CommandResponse {
    pub fn ack(id: StreamOffset) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            status: ResponseStatus::Acknowledged,
            message: None,
            buffer: Vec::new(),
        }
    }

    pub fn with_buffer(mut self, buffer: Vec<u8>) -> Self {
        self.buffer = buffer;
        self
    }

    /// Negative acknowledgement classified by the failure.
    pub fn nack(id: StreamOffset, error: &CoreError) -> Self {
        let (status, message) = match error {
            CoreError::Hazardous { description, .. } => (ResponseStatus::Hazardous, description.clone()),
            CoreError::Disabled { .. } => (ResponseStatus::Disabled, Some(error.to_string())),
            CoreError::NotFound { .. } | CoreError::Validation(_) => {
                (ResponseStatus::Invalid, Some(error.to_string()))
            }
            _ => (ResponseStatus::NegativeAck, Some(error.to_string())),
        };
        Self {
            id,
            timestamp: Utc::now(),
            status,
            message,
            buffer: Vec::new(),
        }
    }

    pub fn into_result(self, target: &str, command: &str) -> CoreResult<Vec<u8>> {
        let message = self.message.unwrap_or_default();
        match self.status {
            ResponseStatus::Acknowledged => Ok(self.buffer),
            ResponseStatus::Hazardous => Err(CoreError::Hazardous {
                target: target.to_string(),
                command: command.to_string(),
                description: Some(message).filter(|m| !m.is_empty()),
            }),
            ResponseStatus::Disabled => Err(CoreError::Disabled {
                target: target.to_string(),
                command: command.to_string(),
            }),
            ResponseStatus::Invalid => Err(CoreError::Validation(message)),
            ResponseStatus::NegativeAck => Err(CoreError::Command(message)),
        }
    }
}

/// Record appended to the COMMAND stream for every command written to an interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentCommand {
    pub target_name: String,
    pub packet_name: String,
    pub received_time: DateTime<Utc>,
    pub received_count: u64,
    pub cmd_string: String,
    pub username: String,
    #[serde(with = "serde_bytes")]
    pub buffer: Vec<u8>,
}

/// Packed buffer plus the final value of every parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltCommand {
    pub buffer: Vec<u8>,
    pub params: BTreeMap<String, Value>,
}

/// Every supplied parameter must name an item of the packet.
fn check_params(packet: &PacketDef, params: &BTreeMap<String, Value>) -> CoreResult<()> {
    for name in params.keys() {
        if packet.item(name).is_none() && !is_reserved_item(name) {
            return Err(CoreError::not_found(
                NotFoundKind::Parameter,
                format!("{} {} {name}", packet.target_name, packet.packet_name),
            ));
        }
    }
    Ok(())
}

pub struct CommandBuilder;

impl CommandBuilder {
    fn state_value(item: &ItemDef, value: &Value, target: &str, command: &str) -> CoreResult<Value> {
        if item.states.is_empty() {
            return Ok(value.clone());
        }
        let Value::String(name) = value else {
            return Ok(value.clone());
        };
        match item.states.get(&name.to_ascii_uppercase()) {
            Some(state) => Ok(state.value.clone()),
            None if matches!(item.data_type, DataType::String | DataType::Block) => Ok(value.clone()),
            None => Err(CoreError::Validation(format!(
                "Unknown state '{name}' for {target} {command} {}, must be one of {}",
                item.name,
                item.states.keys().cloned().collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    fn check_range(item: &ItemDef, value: &Value, display: &Value, target: &str, command: &str) -> CoreResult<()> {
        let (Some(min), Some(max)) = (item.minimum, item.maximum) else {
            return Ok(());
        };
        let values: Vec<&Value> = match value {
            Value::Array(elements) => elements.iter().collect(),
            other => vec![other],
        };
        for v in values {
            if let Some(x) = v.as_f64() {
                if x < min || x > max {
                    return Err(CoreError::Validation(format!(
                        "Command parameter '{target} {command} {}' = {display} not in valid range of {} to {}",
                        item.name,
                        range_bound(min),
                        range_bound(max)
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply defaults, states, range checks and write conversions, then encode.
    pub fn build(
        packet: &PacketDef,
        params: &BTreeMap<String, Value>,
        options: CmdOptions,
    ) -> CoreResult<BuiltCommand> {
        let target = &packet.target_name;
        let command = &packet.packet_name;
        check_params(packet, params)?;

        let mut buffer = vec![0u8; packet.defined_length()];
        let mut final_params = BTreeMap::new();
        for item in &packet.items {
            if item.data_type == DataType::Derived {
                continue;
            }
            let supplied = params.get(&item.name);
            let value = match (supplied, &item.id_value, &item.default) {
                (Some(v), _, _) => v.clone(),
                (None, Some(id), _) => id.clone(),
                (None, None, Some(default)) => default.clone(),
                (None, None, None) if item.required => {
                    return Err(CoreError::Validation(format!(
                        "Required command parameter '{target} {command} {}' not given",
                        item.name
                    )))
                }
                (None, None, None) => continue,
            };

            let raw = if options.raw {
                if options.range_check && supplied.is_some() {
                    Self::check_range(item, &value, &value, target, command)?;
                }
                value.clone()
            } else {
                let engineering = Self::state_value(item, &value, target, command)?;
                if options.range_check && supplied.is_some() {
                    Self::check_range(item, &engineering, &value, target, command)?;
                }
                match (&item.write_conversion, &engineering) {
                    (Some(conversion), Value::Array(elements)) => {
                        Value::Array(elements.iter().map(|e| conversion.apply(e)).collect())
                    }
                    (Some(conversion), other) => conversion.apply(other),
                    (None, other) => other.clone(),
                }
            };
            write_item(item, &raw, &mut buffer, packet.endianness)?;
            final_params.insert(item.name.clone(), value);
        }
        Ok(BuiltCommand {
            buffer,
            params: final_params,
        })
    }
}

/// Integral bounds render without a fractional part.
fn range_bound(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Value::Int(v as i64)
    } else {
        Value::Float(v)
    }
}

/// Description of the hazard, if the command or a selected state is hazardous.
/// The outer option is `None` when nothing is hazardous.
pub fn get_cmd_hazardous(packet: &PacketDef, params: &BTreeMap<String, Value>) -> Option<Option<String>> {
    fn describe(d: &str) -> Option<String> {
        Some(d.to_string()).filter(|d| !d.is_empty())
    }
    if let Some(description) = &packet.hazardous {
        return Some(describe(description));
    }
    for (name, value) in params {
        let Some(state) = selected_state(packet, name, value) else { continue };
        if let Some(description) = &state.hazardous {
            return Some(describe(description));
        }
    }
    None
}

/// State selected by a parameter value, given either by name or by raw value.
fn selected_state<'a>(packet: &'a PacketDef, name: &str, value: &Value) -> Option<&'a StateDef> {
    let item = packet.item(name)?;
    item.states
        .iter()
        .find(|(state_name, state)| match value {
            Value::String(s) => s.eq_ignore_ascii_case(state_name),
            other => state.value.loosely_equals(other),
        })
        .map(|(_, state)| state)
}

fn is_printable(s: &str) -> bool {
    s.is_ascii() && !s.chars().any(|c| c.is_ascii_control())
}

fn render_param(item: Option<&ItemDef>, value: &Value, obfuscated: bool) -> String {
    if obfuscated {
        return OBFUSCATED.to_string();
    }
    let text = match (value, item.map(|i| i.data_type)) {
        (Value::String(s), Some(DataType::String | DataType::Block)) => {
            if is_printable(s) {
                format!("'{s}'")
            } else {
                format!("0x{}", hex::encode_upper(s.as_bytes()))
            }
        }
        (Value::Block(_), _) => value.to_string(),
        (Value::String(s), _) => s.clone(),
        (other, _) => return other.to_string(),
    };
    let mut text = if text.chars().count() > MAX_PARAM_STRING {
        let head: String = text.chars().take(MAX_PARAM_STRING).collect();
        format!("{head}...'")
    } else {
        text
    };
    text = text.replace('"', "'");
    text
}

/// Human readable form of a command with obfuscated parameters redacted.
pub fn build_cmd_output_string(
    packet: &PacketDef,
    params: &BTreeMap<String, Value>,
    options: CmdOptions,
) -> String {
    let mut output = format!(
        "{}(\"{} {}",
        options.method_name(),
        packet.target_name,
        packet.packet_name
    );
    let rendered: Vec<String> = params
        .iter()
        .filter(|(name, _)| !is_reserved_item(name))
        .map(|(name, value)| {
            format!(
                "{name} {}",
                render_param(packet.item(name), value, packet.is_obfuscated(name))
            )
        })
        .collect();
    if !rendered.is_empty() {
        output.push_str(" with ");
        output.push_str(&rendered.join(", "));
    }
    output.push_str("\")");
    output
}

/// Whether logging is suppressed by the packet or by a selected state.
fn messages_enabled(packet: &PacketDef, params: &BTreeMap<String, Value>) -> bool {
    if packet.messages_disabled {
        return false;
    }
    !params.iter().any(|(name, value)| {
        selected_state(packet, name, value).is_some_and(|state| state.messages_disabled)
    })
}

/// Either form of command input.
pub trait ToCommandRequest {
    fn to_command_request(self) -> CoreResult<CommandRequest>;
}

impl ToCommandRequest for &str {
    fn to_command_request(self) -> CoreResult<CommandRequest> {
        parse_cmd_text(self)
    }
}

impl ToCommandRequest for CommandRequest {
    fn to_command_request(self) -> CoreResult<CommandRequest> {
        Ok(CommandRequest::new(&self.target_name, &self.command_name, self.params))
    }
}

/// Resolve names and parameters, check disabled, build with range checks,
/// then check hazards.
pub fn validate_command(
    catalog: &Catalog,
    request: &CommandRequest,
    options: CmdOptions,
) -> CoreResult<(PacketDef, BuiltCommand)> {
    let packet = catalog.command(&request.target_name, &request.command_name)?;
    check_params(&packet, &request.params)?;
    if packet.disabled {
        return Err(CoreError::Disabled {
            target: packet.target_name.clone(),
            command: packet.packet_name.clone(),
        });
    }
    let built = CommandBuilder::build(&packet, &request.params, options)?;
    if options.hazardous_check {
        if let Some(description) = get_cmd_hazardous(&packet, &request.params) {
            return Err(CoreError::Hazardous {
                target: packet.target_name.clone(),
                command: packet.packet_name.clone(),
                description,
            });
        }
    }
    Ok((packet, built))
}

#[derive(Debug)]
pub struct CommandPipeline {
    catalog: Arc<Catalog>,
    topics: Arc<Topics>,
    queues: Arc<QueueManager>,
    config: CoreConfig,
}

impl CommandPipeline {
    pub fn new(catalog: Arc<Catalog>, topics: Arc<Topics>, queues: Arc<QueueManager>, config: CoreConfig) -> Self {
        Self {
            catalog,
            topics,
            queues,
            config,
        }
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    pub fn cmd_timeout(&self) -> Duration {
        self.config.cmd_timeout()
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    /// Validate and render a command without dispatching it.
    pub fn prepare(
        &self,
        request: CommandRequest,
        options: CmdOptions,
        dispatch: &DispatchOptions,
    ) -> CoreResult<CommandInstance> {
        let (packet, _) = validate_command(&self.catalog, &request, options)?;
        let log_message = dispatch
            .log_message
            .unwrap_or_else(|| messages_enabled(&packet, &request.params));
        let queue = match &dispatch.queue {
            QueueTarget::Named(name) => Some(name.clone()),
            QueueTarget::Direct => None,
            QueueTarget::Default => self.config.default_queue.clone(),
        };
        Ok(CommandInstance {
            cmd_string: build_cmd_output_string(&packet, &request.params, options),
            target_name: packet.target_name,
            cmd_name: packet.packet_name,
            cmd_params: request.params,
            range_check: options.range_check,
            hazardous_check: options.hazardous_check,
            raw: options.raw,
            username: dispatch
                .username
                .clone()
                .unwrap_or_else(|| "anonymous".to_string()),
            log_message,
            queue,
        })
    }

    /// Single entry point behind every `cmd*` variant.
    pub async fn cmd_implementation(
        &self,
        request: CommandRequest,
        options: CmdOptions,
        dispatch: DispatchOptions,
    ) -> CoreResult<CommandInstance> {
        let instance = self.prepare(request, options, &dispatch)?;
        match &instance.queue {
            Some(queue) => {
                self.queues.enqueue(queue, instance.clone())?;
                debug!("Queued {} on {}", instance.cmd_string, queue);
            }
            None => {
                let timeout = dispatch.timeout.unwrap_or_else(|| self.config.cmd_timeout());
                self.send(&instance, timeout).await?;
            }
        }
        Ok(instance)
    }

    /// Append to the target's command stream and wait for the correlated ack.
    pub async fn send(&self, instance: &CommandInstance, timeout: Duration) -> CoreResult<()> {
        let scope = &self.config.scope;
        let acks = ack_topic(scope, &instance.target_name);
        let mut offset = self.topics.last_offset(&acks);
        let id = self
            .topics
            .write_topic(&target_command_topic(scope, &instance.target_name), instance)?;
        let response = self.wait_for_response(&acks, &mut offset, id, timeout).await;
        match response {
            Some(response) => response
                .into_result(&instance.target_name, &instance.cmd_name)
                .map(|_| ()),
            None => Err(CoreError::Timeout {
                target: instance.target_name.clone(),
                command: instance.cmd_name.clone(),
                timeout: timeout.as_secs_f64(),
            }),
        }
    }

    async fn wait_for_response(
        &self,
        topic: &str,
        offset: &mut StreamOffset,
        id: StreamOffset,
        timeout: Duration,
    ) -> Option<CommandResponse> {
        let deadline = Instant::now() + timeout;
        loop {
            for entry in self.topics.read_after(topic, *offset, None) {
                *offset = entry.offset;
                match entry.decode::<CommandResponse>() {
                    Ok(response) if response.id == id => return Some(response),
                    Ok(_) => {}
                    Err(e) => debug!("Skipping malformed response on {}: {}", topic, e),
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    pub async fn cmd<R: ToCommandRequest>(&self, command: R, dispatch: DispatchOptions) -> CoreResult<CommandInstance> {
        self.cmd_implementation(command.to_command_request()?, CmdOptions::NORMAL, dispatch).await
    }

    pub async fn cmd_no_range_check<R: ToCommandRequest>(&self, command: R, dispatch: DispatchOptions) -> CoreResult<CommandInstance> {
        self.cmd_implementation(command.to_command_request()?, CmdOptions::NO_RANGE_CHECK, dispatch).await
    }

    pub async fn cmd_no_hazardous_check<R: ToCommandRequest>(&self, command: R, dispatch: DispatchOptions) -> CoreResult<CommandInstance> {
        self.cmd_implementation(command.to_command_request()?, CmdOptions::NO_HAZARDOUS_CHECK, dispatch).await
    }

    pub async fn cmd_no_checks<R: ToCommandRequest>(&self, command: R, dispatch: DispatchOptions) -> CoreResult<CommandInstance> {
        self.cmd_implementation(command.to_command_request()?, CmdOptions::NO_CHECKS, dispatch).await
    }

    pub async fn cmd_raw<R: ToCommandRequest>(&self, command: R, dispatch: DispatchOptions) -> CoreResult<CommandInstance> {
        self.cmd_implementation(command.to_command_request()?, CmdOptions::RAW, dispatch).await
    }

    pub async fn cmd_raw_no_range_check<R: ToCommandRequest>(&self, command: R, dispatch: DispatchOptions) -> CoreResult<CommandInstance> {
        self.cmd_implementation(command.to_command_request()?, CmdOptions::RAW_NO_RANGE_CHECK, dispatch).await
    }

    pub async fn cmd_raw_no_hazardous_check<R: ToCommandRequest>(&self, command: R, dispatch: DispatchOptions) -> CoreResult<CommandInstance> {
        self.cmd_implementation(command.to_command_request()?, CmdOptions::RAW_NO_HAZARDOUS_CHECK, dispatch).await
    }

    pub async fn cmd_raw_no_checks<R: ToCommandRequest>(&self, command: R, dispatch: DispatchOptions) -> CoreResult<CommandInstance> {
        self.cmd_implementation(command.to_command_request()?, CmdOptions::RAW_NO_CHECKS, dispatch).await
    }

    /// Packed buffer built by the target's decom service, without sending.
    pub async fn build_cmd<R: ToCommandRequest>(&self, command: R, options: CmdOptions) -> CoreResult<Vec<u8>> {
        let request = command.to_command_request()?;
        // unknown targets fail here rather than timing out
        self.catalog.command(&request.target_name, &request.command_name)?;
        let scope = &self.config.scope;
        let target = request.target_name.clone();
        let command_name = request.command_name.clone();
        let acks = decom_ack_topic(scope, &target);
        let mut offset = self.topics.last_offset(&acks);
        let id = self
            .topics
            .write_topic(&decom_interface_topic(scope, &target), &BuildRequest { request, options })?;
        let timeout = self.config.build_timeout();
        match self.wait_for_response(&acks, &mut offset, id, timeout).await {
            Some(response) => response.into_result(&target, &command_name),
            None => Err(CoreError::Timeout {
                target,
                command: command_name,
                timeout: timeout.as_secs_f64(),
            }),
        }
    }

    pub fn get_cmd_hazardous<R: ToCommandRequest>(&self, command: R) -> CoreResult<bool> {
        let request = command.to_command_request()?;
        let packet = self.catalog.command(&request.target_name, &request.command_name)?;
        for name in request.params.keys() {
            if packet.item(name).is_none() {
                return Err(CoreError::not_found(
                    NotFoundKind::Parameter,
                    format!("{} {} {name}", packet.target_name, packet.packet_name),
                ));
            }
        }
        Ok(get_cmd_hazardous(&packet, &request.params).is_some())
    }

    fn last_sent(&self, target: &str, command: &str) -> CoreResult<Option<SentCommand>> {
        let packet = self.catalog.command(target, command)?;
        let topic = packet_topic(
            &self.config.scope,
            TopicKind::Command,
            &packet.target_name,
            &packet.packet_name,
        );
        self.topics
            .get_newest_message(&topic)
            .map(|entry| entry.decode::<SentCommand>())
            .transpose()
    }

    /// Most recently sent buffer of a command.
    pub fn get_cmd_buffer(&self, target: &str, command: &str) -> CoreResult<Option<SentCommand>> {
        self.last_sent(target, command)
    }

    pub fn get_cmd_cnt(&self, target: &str, command: &str) -> CoreResult<u64> {
        Ok(self
            .last_sent(target, command)?
            .map_or(0, |sent| sent.received_count))
    }

    pub fn get_all_command_names(&self, target: &str) -> CoreResult<Vec<String>> {
        self.catalog.packet_names(PacketKind::Command, target)
    }

    pub fn get_command(&self, target: &str, command: &str) -> CoreResult<PacketDef> {
        self.catalog.command(target, command)
    }

    pub fn get_parameter(&self, target: &str, command: &str, parameter: &str) -> CoreResult<ItemDef> {
        self.catalog
            .packet_item(PacketKind::Command, target, command, parameter)
    }

    pub fn enable_cmd(&self, target: &str, command: &str) -> CoreResult<()> {
        self.set_disabled(target, command, false)
    }

    pub fn disable_cmd(&self, target: &str, command: &str) -> CoreResult<()> {
        self.set_disabled(target, command, true)
    }

    fn set_disabled(&self, target: &str, command: &str, disabled: bool) -> CoreResult<()> {
        self.catalog
            .with_packet_mut(PacketKind::Command, target, command, |packet| {
                packet.disabled = disabled;
                Ok(())
            })?;
        let verb = if disabled { "Disabling" } else { "Enabling" };
        info!("{} command {} {}", verb, target, command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StateDef;

    fn collect() -> PacketDef {
        PacketDef::new("INST", "COLLECT")
            .with_item(ItemDef::new("OPCODE", 0, 8, DataType::Uint).with_id(1))
            .with_item(
                ItemDef::new("TYPE", 8, 16, DataType::Uint)
                    .with_state("NORMAL", 0)
                    .with_state_def(
                        "SPECIAL",
                        StateDef {
                            value: Value::Int(1),
                            hazardous: Some(String::new()),
                            messages_disabled: false,
                            color: None,
                        },
                    ),
            )
            .with_item(
                ItemDef::new("DURATION", 24, 32, DataType::Float)
                    .with_range(0.0, 10.0)
                    .with_default(1.0),
            )
            .with_item(ItemDef::new("LABEL", 56, 64, DataType::String))
    }

    fn params(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_build_applies_states_and_ids() {
        let built = CommandBuilder::build(
            &collect(),
            &params(&[("TYPE", Value::from("SPECIAL")), ("DURATION", Value::Int(5))]),
            CmdOptions::NORMAL,
        )
        .unwrap();
        assert_eq!(built.buffer[0], 1);
        assert_eq!(&built.buffer[1..3], &[0, 1]);
        assert_eq!(built.params["DURATION"], Value::Int(5));
    }

    #[test]
    fn test_range_check_and_skip() {
        let p = params(&[("DURATION", Value::Int(11))]);
        let err = CommandBuilder::build(&collect(), &p, CmdOptions::NORMAL).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Command parameter 'INST COLLECT DURATION' = 11 not in valid range of 0 to 10"
        );
        assert!(CommandBuilder::build(&collect(), &p, CmdOptions::NO_RANGE_CHECK).is_ok());
    }

    #[test]
    fn test_unknown_state_and_parameter() {
        let err = CommandBuilder::build(
            &collect(),
            &params(&[("TYPE", Value::from("BOGUS"))]),
            CmdOptions::NORMAL,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown state 'BOGUS'"));

        let err = CommandBuilder::build(
            &collect(),
            &params(&[("NOPE", Value::Int(1))]),
            CmdOptions::NORMAL,
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_hazardous_matches_name_or_value() {
        let packet = collect();
        assert!(get_cmd_hazardous(&packet, &params(&[("TYPE", Value::from("special"))])).is_some());
        assert!(get_cmd_hazardous(&packet, &params(&[("TYPE", Value::Int(1))])).is_some());
        assert!(get_cmd_hazardous(&packet, &params(&[("TYPE", Value::from("NORMAL"))])).is_none());
    }

    #[test]
    fn test_output_string_redaction_and_binary() {
        let mut packet = collect();
        packet.obfuscated_items.push("DURATION".into());
        let output = build_cmd_output_string(
            &packet,
            &params(&[
                ("DURATION", Value::Int(5)),
                ("LABEL", Value::from("a\u{1}")),
                ("TYPE", Value::from("NORMAL")),
            ]),
            CmdOptions::NORMAL,
        );
        assert_eq!(
            output,
            "cmd(\"INST COLLECT with DURATION *****, LABEL 0x6101, TYPE NORMAL\")"
        );
        let output = build_cmd_output_string(
            &packet,
            &params(&[("LABEL", Value::from("say \"hi\""))]),
            CmdOptions::RAW,
        );
        assert_eq!(output, "cmd_raw(\"INST COLLECT with LABEL 'say 'hi''\")");
    }
}

//! In-process stream substrate.
//!
//! Ordered, append-only, offset-addressable streams. Payloads cross the
//! stream boundary as JSON so that producers and consumers only share wire
//! types, never in-memory structures. Reads never block.

use core::fmt;
use core::str::FromStr;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Joins (stream, offset) pairs inside a subscription handle.
pub const SUBSCRIPTION_DELIMITER: &str = "____";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct StreamOffset {
    pub ms: u64,
    pub seq: u64,
}

impl StreamOffset {
    pub const ZERO: StreamOffset = StreamOffset { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }
}

impl fmt::Display for StreamOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamOffset {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let invalid = || CoreError::Validation(format!("Invalid stream offset '{s}'"));
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        Ok(Self {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Command,
    Telemetry,
    Decom,
}

impl TopicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKind::Command => "COMMAND",
            TopicKind::Telemetry => "TELEMETRY",
            TopicKind::Decom => "DECOM",
        }
    }
}

pub fn packet_topic(scope: &str, kind: TopicKind, target: &str, packet: &str) -> String {
    format!("{scope}__{}__{target}__{packet}", kind.as_str())
}

/// Command requests addressed to one target's handler.
pub fn target_command_topic(scope: &str, target: &str) -> String {
    format!("{scope}__{target}")
}

pub fn ack_topic(scope: &str, target: &str) -> String {
    format!("{scope}__ACK__{target}")
}

pub fn limits_events_topic(scope: &str) -> String {
    format!("{scope}__LIMITS_EVENTS")
}

pub fn decom_interface_topic(scope: &str, target: &str) -> String {
    format!("{scope}__DECOMINTERFACE__{target}")
}

pub fn decom_ack_topic(scope: &str, target: &str) -> String {
    format!("{scope}__DECOMINTERFACE__ACK__{target}")
}

/// Encode (stream, offset) pairs into one resumable handle.
pub fn encode_subscription(pairs: &[(String, StreamOffset)]) -> String {
    pairs
        .iter()
        .flat_map(|(topic, offset)| [topic.clone(), offset.to_string()])
        .collect::<Vec<_>>()
        .join(SUBSCRIPTION_DELIMITER)
}

pub fn decode_subscription(handle: &str) -> CoreResult<Vec<(String, StreamOffset)>> {
    if handle.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = handle.split(SUBSCRIPTION_DELIMITER).collect();
    if parts.len() % 2 != 0 {
        return Err(CoreError::Validation(format!(
            "Invalid subscription handle '{handle}'"
        )));
    }
    parts
        .chunks(2)
        .map(|pair| -> CoreResult<(String, StreamOffset)> {
            Ok((pair[0].to_string(), pair[1].parse()?))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub offset: StreamOffset,
    pub payload: serde_json::Value,
}

impl StreamEntry {
    pub fn decode<T: DeserializeOwned>(&self) -> CoreResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

#[derive(Debug)]
pub struct Topics {
    streams: RwLock<HashMap<String, VecDeque<StreamEntry>>>,
    last_offset: Mutex<StreamOffset>,
    maxlen: usize,
}

impl Topics {
    pub fn new(maxlen: usize) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            last_offset: Mutex::new(StreamOffset::ZERO),
            maxlen: maxlen.max(1),
        }
    }

    fn next_offset(&self) -> StreamOffset {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut last = self.last_offset.lock().unwrap_or_else(PoisonError::into_inner);
        let next = if now > last.ms {
            StreamOffset::new(now, 0)
        } else {
            StreamOffset::new(last.ms, last.seq + 1)
        };
        *last = next;
        next
    }

    /// Append a message; returns its offset.
    pub fn write_topic<T: Serialize>(&self, topic: &str, message: &T) -> CoreResult<StreamOffset> {
        let payload = serde_json::to_value(message)?;
        let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        // offset allocated under the stream lock so per-stream order matches offset order
        let offset = self.next_offset();
        let stream = streams.entry(topic.to_string()).or_default();
        stream.push_back(StreamEntry { offset, payload });
        while stream.len() > self.maxlen {
            stream.pop_front();
        }
        Ok(offset)
    }

    /// Entries strictly after `offset`, oldest first.
    pub fn read_after(&self, topic: &str, offset: StreamOffset, count: Option<usize>) -> Vec<StreamEntry> {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        let Some(stream) = streams.get(topic) else {
            return Vec::new();
        };
        let start = stream.partition_point(|e| e.offset <= offset);
        let available = stream.len() - start;
        let take = count.map_or(available, |c| c.min(available));
        stream.range(start..start + take).cloned().collect()
    }

    /// Read several streams at once; returns (topic, entry) pairs.
    pub fn read_topics(
        &self,
        positions: &[(String, StreamOffset)],
        count: Option<usize>,
    ) -> Vec<(String, StreamEntry)> {
        positions
            .iter()
            .flat_map(|(topic, offset)| {
                self.read_after(topic, *offset, count)
                    .into_iter()
                    .map(move |entry| (topic.clone(), entry))
            })
            .collect()
    }

    pub fn get_newest_message(&self, topic: &str) -> Option<StreamEntry> {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        streams.get(topic).and_then(|s| s.back().cloned())
    }

    /// Offset of the newest entry, or zero for an empty stream.
    pub fn last_offset(&self, topic: &str) -> StreamOffset {
        self.get_newest_message(topic)
            .map_or(StreamOffset::ZERO, |entry| entry.offset)
    }

    /// The newest `count` entries, oldest first.
    pub fn read_newest(&self, topic: &str, count: usize) -> Vec<StreamEntry> {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        let Some(stream) = streams.get(topic) else {
            return Vec::new();
        };
        let skip = stream.len().saturating_sub(count);
        stream.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self, topic: &str) -> usize {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        streams.get(topic).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(crate::config::CoreConfig::default().stream_maxlen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_are_monotonic_and_parse() {
        let topics = Topics::new(10);
        let a = topics.write_topic("T", &1).unwrap();
        let b = topics.write_topic("T", &2).unwrap();
        assert!(b > a);
        assert_eq!(b.to_string().parse::<StreamOffset>().unwrap(), b);
        assert_eq!("0-0".parse::<StreamOffset>().unwrap(), StreamOffset::ZERO);
        assert!("abc".parse::<StreamOffset>().is_err());
    }

    #[test]
    fn test_read_after_is_strict_and_replayable() {
        let topics = Topics::new(10);
        let first = topics.write_topic("T", &"a").unwrap();
        topics.write_topic("T", &"b").unwrap();
        topics.write_topic("T", &"c").unwrap();

        let entries = topics.read_after("T", first, None);
        let values: Vec<String> = entries.iter().map(|e| e.decode().unwrap()).collect();
        assert_eq!(values, vec!["b", "c"]);
        assert_eq!(topics.read_after("T", first, None), entries);
        assert_eq!(topics.read_after("T", first, Some(1)).len(), 1);

        let last = entries[1].offset;
        assert!(topics.read_after("T", last, None).is_empty());
        assert!(topics.read_after("MISSING", StreamOffset::ZERO, None).is_empty());
    }

    #[test]
    fn test_maxlen_trims_oldest() {
        let topics = Topics::new(2);
        for i in 0..5 {
            topics.write_topic("T", &i).unwrap();
        }
        let values: Vec<i32> = topics
            .read_after("T", StreamOffset::ZERO, None)
            .iter()
            .map(|e| e.decode().unwrap())
            .collect();
        assert_eq!(values, vec![3, 4]);
    }

    #[test]
    fn test_subscription_handle() {
        let pairs = vec![
            ("DEFAULT__DECOM__INST__HEALTH_STATUS".to_string(), StreamOffset::new(5, 1)),
            ("DEFAULT__DECOM__INST__ADCS".to_string(), StreamOffset::ZERO),
        ];
        let handle = encode_subscription(&pairs);
        assert_eq!(
            handle,
            "DEFAULT__DECOM__INST__HEALTH_STATUS____5-1____DEFAULT__DECOM__INST__ADCS____0-0"
        );
        assert_eq!(decode_subscription(&handle).unwrap(), pairs);
        assert!(decode_subscription("A____1-0____B").is_err());
    }
}

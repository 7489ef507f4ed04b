//! Deferred command queues.
//!
//! A queue in HOLD accumulates commands, RELEASE lets its processor send
//! them in order through the direct path, DISABLE rejects new commands.

use core::fmt;
use core::str::FromStr;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::command::{CommandInstance, CommandPipeline};
use crate::error::{CoreError, CoreResult, NotFoundKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    #[default]
    Hold,
    Release,
    Disable,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueState::Hold => write!(f, "HOLD"),
            QueueState::Release => write!(f, "RELEASE"),
            QueueState::Disable => write!(f, "DISABLE"),
        }
    }
}

impl FromStr for QueueState {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HOLD" => Ok(QueueState::Hold),
            "RELEASE" => Ok(QueueState::Release),
            "DISABLE" => Ok(QueueState::Disable),
            other => Err(CoreError::Validation(format!("Unknown queue state '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub id: u64,
    pub instance: CommandInstance,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total_queued: u32,
    pub total_executed: u32,
    pub total_removed: u32,
    pub total_failed: u32,
    pub currently_queued: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub state: QueueState,
    pub stats: QueueStats,
}

#[derive(Debug, Default)]
struct CommandQueue {
    state: QueueState,
    commands: VecDeque<QueuedCommand>,
    stats: QueueStats,
}

impl CommandQueue {
    fn refresh(&mut self) {
        self.stats.currently_queued = self.commands.len();
    }
}

#[derive(Debug, Default)]
pub struct QueueManager {
    queues: Mutex<BTreeMap<String, CommandQueue>>,
    next_id: Mutex<u64>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_queue<T>(&self, name: &str, f: impl FnOnce(&mut CommandQueue) -> CoreResult<T>) -> CoreResult<T> {
        let name = name.to_ascii_uppercase();
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = queues
            .get_mut(&name)
            .ok_or_else(|| CoreError::not_found(NotFoundKind::Queue, name.clone()))?;
        f(queue)
    }

    /// Create a queue; an existing queue keeps its commands and state.
    pub fn create(&self, name: &str, state: QueueState) {
        let name = name.to_ascii_uppercase();
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if !queues.contains_key(&name) {
            info!("Creating queue {} with initial state {}", name, state);
            queues.insert(
                name,
                CommandQueue {
                    state,
                    ..CommandQueue::default()
                },
            );
        }
    }

    pub fn delete(&self, name: &str) -> CoreResult<Vec<QueuedCommand>> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = queues
            .remove(&name.to_ascii_uppercase())
            .ok_or_else(|| CoreError::not_found(NotFoundKind::Queue, name))?;
        Ok(queue.commands.into_iter().collect())
    }

    pub fn exists(&self, name: &str) -> bool {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.contains_key(&name.to_ascii_uppercase())
    }

    pub fn queue_all(&self) -> Vec<QueueInfo> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .iter()
            .map(|(name, q)| QueueInfo {
                name: name.clone(),
                state: q.state,
                stats: q.stats.clone(),
            })
            .collect()
    }

    pub fn get_state(&self, name: &str) -> CoreResult<QueueState> {
        self.with_queue(name, |q| Ok(q.state))
    }

    pub fn set_state(&self, name: &str, state: QueueState) -> CoreResult<()> {
        self.with_queue(name, |q| {
            q.state = state;
            Ok(())
        })?;
        info!("Queue {} set to {}", name, state);
        Ok(())
    }

    pub fn hold(&self, name: &str) -> CoreResult<()> {
        self.set_state(name, QueueState::Hold)
    }

    pub fn release(&self, name: &str) -> CoreResult<()> {
        self.set_state(name, QueueState::Release)
    }

    pub fn disable(&self, name: &str) -> CoreResult<()> {
        self.set_state(name, QueueState::Disable)
    }

    pub fn enqueue(&self, name: &str, instance: CommandInstance) -> CoreResult<u64> {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        self.with_queue(name, |q| {
            if q.state == QueueState::Disable {
                return Err(CoreError::Validation(format!("Queue '{name}' is disabled")));
            }
            q.commands.push_back(QueuedCommand {
                id,
                instance,
                queued_at: Utc::now(),
            });
            q.stats.total_queued += 1;
            q.refresh();
            Ok(id)
        })
    }

    pub fn list(&self, name: &str) -> CoreResult<Vec<QueuedCommand>> {
        self.with_queue(name, |q| Ok(q.commands.iter().cloned().collect()))
    }

    /// Remove a command by id without executing it.
    pub fn remove(&self, name: &str, id: u64) -> CoreResult<QueuedCommand> {
        self.with_queue(name, |q| {
            let position = q
                .commands
                .iter()
                .position(|c| c.id == id)
                .ok_or_else(|| CoreError::Validation(format!("Command {id} not found in queue '{name}'")))?;
            // remove() keeps the remaining commands in order
            let removed = q.commands.remove(position).ok_or_else(|| {
                CoreError::Validation(format!("Command {id} not found in queue '{name}'"))
            })?;
            q.stats.total_removed += 1;
            q.refresh();
            Ok(removed)
        })
    }

    pub fn clear(&self, name: &str) -> CoreResult<usize> {
        self.with_queue(name, |q| {
            let count = q.commands.len();
            q.commands.clear();
            q.stats.total_removed += count as u32;
            q.refresh();
            Ok(count)
        })
    }

    /// Next command of a released queue.
    pub fn pop_released(&self, name: &str) -> CoreResult<Option<QueuedCommand>> {
        self.with_queue(name, |q| {
            if q.state != QueueState::Release {
                return Ok(None);
            }
            let next = q.commands.pop_front();
            q.refresh();
            Ok(next)
        })
    }

    /// Take a specific command, or the oldest, regardless of state.
    pub fn take(&self, name: &str, id: Option<u64>) -> CoreResult<QueuedCommand> {
        match id {
            Some(id) => self.remove(name, id).map(|c| {
                self.adjust(name, |s| s.total_removed -= 1);
                c
            }),
            None => self.with_queue(name, |q| {
                let next = q
                    .commands
                    .pop_front()
                    .ok_or_else(|| CoreError::Validation(format!("Queue '{name}' is empty")))?;
                q.refresh();
                Ok(next)
            }),
        }
    }

    fn adjust(&self, name: &str, f: impl FnOnce(&mut QueueStats)) {
        let _ = self.with_queue(name, |q| {
            f(&mut q.stats);
            Ok(())
        });
    }

    fn record_result(&self, name: &str, ok: bool) {
        self.adjust(name, |s| {
            if ok {
                s.total_executed += 1;
            } else {
                s.total_failed += 1;
            }
        });
    }

    pub fn get_stats(&self, name: &str) -> CoreResult<QueueStats> {
        self.with_queue(name, |q| Ok(q.stats.clone()))
    }
}

/// Send one queued command now, whatever the queue state.
pub async fn exec(
    queues: &QueueManager,
    pipeline: &CommandPipeline,
    name: &str,
    id: Option<u64>,
) -> CoreResult<CommandInstance> {
    let queued = queues.take(name, id)?;
    let result = pipeline.send(&queued.instance, pipeline.cmd_timeout()).await;
    queues.record_result(name, result.is_ok());
    result.map(|_| queued.instance)
}

/// Dispatch released commands of `name` until the queue is deleted.
pub async fn run_queue_processor(queues: Arc<QueueManager>, pipeline: Arc<CommandPipeline>, name: String) {
    info!("Queue processor for {} running", name);
    loop {
        match queues.pop_released(&name) {
            Ok(Some(queued)) => {
                let result = pipeline
                    .send(&queued.instance, pipeline.cmd_timeout())
                    .await;
                if let Err(e) = &result {
                    error!(
                        "Queue processor failed to process command from queue {}: {}",
                        name, e
                    );
                }
                queues.record_result(&name, result.is_ok());
            }
            Ok(None) => tokio::time::sleep(pipeline.poll_interval()).await,
            Err(_) => {
                info!("Queue {} deleted, processor exiting", name);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str) -> CommandInstance {
        CommandInstance {
            target_name: "INST".into(),
            cmd_name: name.into(),
            cmd_params: BTreeMap::new(),
            range_check: true,
            hazardous_check: true,
            raw: false,
            cmd_string: format!("cmd(\"INST {name}\")"),
            username: "anonymous".into(),
            log_message: true,
            queue: Some("OPS".into()),
        }
    }

    #[test]
    fn test_hold_accumulates_in_order() {
        let queues = QueueManager::new();
        queues.create("OPS", QueueState::Hold);
        queues.enqueue("OPS", instance("A")).unwrap();
        queues.enqueue("OPS", instance("B")).unwrap();

        assert!(queues.pop_released("OPS").unwrap().is_none());
        let names: Vec<String> = queues
            .list("OPS")
            .unwrap()
            .into_iter()
            .map(|c| c.instance.cmd_name)
            .collect();
        assert_eq!(names, vec!["A", "B"]);

        queues.release("OPS").unwrap();
        assert_eq!(queues.pop_released("OPS").unwrap().unwrap().instance.cmd_name, "A");
        assert_eq!(queues.get_stats("OPS").unwrap().currently_queued, 1);
    }

    #[test]
    fn test_disabled_queue_rejects() {
        let queues = QueueManager::new();
        queues.create("OPS", QueueState::Disable);
        assert!(queues.enqueue("OPS", instance("A")).is_err());
        assert!(queues.enqueue("MISSING", instance("A")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_take_and_clear() {
        let queues = QueueManager::new();
        queues.create("OPS", QueueState::Hold);
        let a = queues.enqueue("OPS", instance("A")).unwrap();
        let b = queues.enqueue("OPS", instance("B")).unwrap();
        queues.enqueue("OPS", instance("C")).unwrap();

        assert_eq!(queues.remove("OPS", a).unwrap().instance.cmd_name, "A");
        assert!(queues.remove("OPS", a).is_err());
        assert_eq!(queues.take("OPS", Some(b)).unwrap().instance.cmd_name, "B");
        assert_eq!(queues.clear("OPS").unwrap(), 1);

        let stats = queues.get_stats("OPS").unwrap();
        assert_eq!(stats.total_queued, 3);
        assert_eq!(stats.total_removed, 2);
        assert_eq!(stats.currently_queued, 0);
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!("release".parse::<QueueState>().unwrap(), QueueState::Release);
        assert!("PAUSE".parse::<QueueState>().is_err());
    }
}

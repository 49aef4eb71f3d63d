//! Shared test doubles for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use sqs_batch_broker::{BatchSendClient, BrokerConfig, Entry, EntryResult, SendClientError};

/// One recorded `send_batch` call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub queue_name: String,
    pub ids: Vec<Uuid>,
    pub sizes: Vec<usize>,
}

/// How the scripted client answers entries whose payload starts with a prefix
#[derive(Debug, Clone)]
pub struct FailureRule {
    pub prefix: Vec<u8>,
    pub code: &'static str,
    pub sender_fault: bool,
}

/// Send client that records every call and fails entries by payload prefix
#[derive(Default)]
pub struct ScriptedClient {
    calls: Mutex<Vec<RecordedCall>>,
    rules: Vec<FailureRule>,
    delay: Option<Duration>,
    queue_delays: HashMap<String, Duration>,
    call_error: Mutex<Option<SendClientError>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(prefix: &str, code: &'static str) -> Self {
        Self::new().with_rule(prefix, code, false)
    }

    pub fn with_rule(mut self, prefix: &str, code: &'static str, sender_fault: bool) -> Self {
        self.rules.push(FailureRule {
            prefix: prefix.as_bytes().to_vec(),
            code,
            sender_fault,
        });
        self
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep this long inside calls for one physical queue only
    pub fn with_queue_delay(mut self, queue_name: &str, delay: Duration) -> Self {
        self.queue_delays.insert(queue_name.to_string(), delay);
        self
    }

    /// Fail the next call as a whole
    pub fn fail_next_call(&self, error: SendClientError) {
        *self.call_error.lock() = Some(error);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls.lock().iter().map(|c| c.ids.len()).collect()
    }

    /// How often each entry id was offered to the service
    pub fn attempts_by_id(&self) -> HashMap<Uuid, usize> {
        let mut attempts = HashMap::new();
        for call in self.calls.lock().iter() {
            for id in &call.ids {
                *attempts.entry(*id).or_insert(0) += 1;
            }
        }
        attempts
    }

    pub fn total_entries(&self) -> usize {
        self.calls.lock().iter().map(|c| c.ids.len()).sum()
    }
}

#[async_trait]
impl BatchSendClient for ScriptedClient {
    async fn send_batch(
        &self,
        queue_name: &str,
        entries: &[Entry],
    ) -> Result<Vec<EntryResult>, SendClientError> {
        self.calls.lock().push(RecordedCall {
            queue_name: queue_name.to_string(),
            ids: entries.iter().map(Entry::id).collect(),
            sizes: entries.iter().map(Entry::size_bytes).collect(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(delay) = self.queue_delays.get(queue_name) {
            tokio::time::sleep(*delay).await;
        }

        if let Some(error) = self.call_error.lock().take() {
            return Err(error);
        }

        Ok(entries
            .iter()
            .map(|entry| {
                match self
                    .rules
                    .iter()
                    .find(|rule| entry.payload().starts_with(&rule.prefix))
                {
                    Some(rule) => {
                        EntryResult::failure(entry.id(), rule.code, "scripted failure", rule.sender_fault)
                    }
                    None => EntryResult::success(entry.id()),
                }
            })
            .collect())
    }
}

/// Config whose timers never fire on their own during a test
pub fn manual_config() -> BrokerConfig {
    BrokerConfig {
        default_batch_interval: 3600.0,
        default_idle_timeout: 3600.0,
        ..Default::default()
    }
}

pub fn client(client: ScriptedClient) -> Arc<ScriptedClient> {
    Arc::new(client)
}

//! In-process transport
//!
//! Keeps everything in memory: published messages are recorded, feedback can
//! be injected with [`MemoryTransport::deliver`], and parameters live in a
//! plain map. With an echo responder attached it behaves like a controller
//! that acknowledges every command.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{response_topic_for, FeedbackHandler, Topics, Transport};
use crate::echo::EchoResponder;
use crate::envelope::RobotMessage;
use crate::error::{LinkError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MemoryTransport {
    published: Mutex<Vec<(String, RobotMessage)>>,
    handlers: Mutex<HashMap<String, Vec<FeedbackHandler>>>,
    params: Mutex<BTreeMap<String, serde_json::Value>>,
    param_lookups: AtomicUsize,
    param_delay: Option<Duration>,
    echo: Option<Mutex<EchoResponder>>,
    fail_publish: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that answers commands through an [`EchoResponder`]
    pub fn with_echo() -> Self {
        Self {
            echo: Some(Mutex::new(EchoResponder::new())),
            ..Self::default()
        }
    }

    /// Publish the parameters a running server advertises for `namespace`
    pub fn with_server(self, namespace: &str, protocol_version: i64) -> Self {
        let topics = Topics::new(namespace);
        self.set_param(&topics.version_param(), serde_json::json!(protocol_version));
        self.set_param(&topics.state_port_param(), serde_json::json!(30101));
        self
    }

    /// Delay every parameter lookup, simulating a slow or absent server
    pub fn with_param_delay(mut self, delay: Duration) -> Self {
        self.param_delay = Some(delay);
        self
    }

    pub fn set_param(&self, name: &str, value: serde_json::Value) {
        lock(&self.params).insert(name.to_string(), value);
    }

    /// Make subsequent publishes fail
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Hand a message to every handler subscribed to `topic`.
    ///
    /// Returns the number of handlers invoked.
    pub fn deliver(&self, topic: &str, message: RobotMessage) -> usize {
        let handlers = lock(&self.handlers).get(topic).cloned().unwrap_or_default();
        for handler in &handlers {
            handler(message.clone());
        }
        handlers.len()
    }

    /// Everything published so far, oldest first
    pub fn published(&self) -> Vec<(String, RobotMessage)> {
        lock(&self.published).clone()
    }

    /// Messages published on one topic
    pub fn published_on(&self, topic: &str) -> Vec<RobotMessage> {
        lock(&self.published)
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn last_published(&self) -> Option<RobotMessage> {
        lock(&self.published).last().map(|(_, message)| message.clone())
    }

    /// Number of `get_param` calls served
    pub fn param_lookups(&self) -> usize {
        self.param_lookups.load(Ordering::SeqCst)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = lock(&self.handlers).keys().cloned().collect();
        topics.sort();
        topics
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, message: &RobotMessage) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(LinkError::Transport(format!("Publishing on {} failed", topic)));
        }

        lock(&self.published).push((topic.to_string(), message.clone()));
        debug!("Published {} to {}", message.instruction, topic);

        let reply = match &self.echo {
            Some(echo) => lock(echo).respond(topic, message),
            None => None,
        };
        if let (Some(reply), Some(response_topic)) = (reply, response_topic_for(topic)) {
            self.deliver(&response_topic, reply);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: FeedbackHandler) -> Result<()> {
        lock(&self.handlers)
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        debug!("Subscribed to {}", topic);
        Ok(())
    }

    async fn get_param(&self, name: &str) -> Result<Option<serde_json::Value>> {
        self.param_lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.param_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(lock(&self.params).get(name).cloned())
    }

    async fn list_params(&self) -> Result<Vec<String>> {
        Ok(lock(&self.params).keys().cloned().collect())
    }
}

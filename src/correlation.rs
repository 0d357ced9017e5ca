//! Correlation table
//!
//! Maps correlation keys to whoever is waiting for feedback: a single-shot
//! waiter ([`FutureResult`]) or a recurring subscriber callback. All table
//! operations are serialized by one mutex; decoding and delivery happen
//! after the lock is released.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::envelope::{Interface, RobotMessage};
use crate::error::{LinkError, Result};
use crate::feedback::{decode, FeedbackParser};

/// Key namespace; one per interface so ids never collide across them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPrefix {
    Msg,
    Sys,
}

impl KeyPrefix {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyPrefix::Msg => "msg",
            KeyPrefix::Sys => "sys",
        }
    }
}

impl From<Interface> for KeyPrefix {
    fn from(interface: Interface) -> Self {
        match interface {
            Interface::App => KeyPrefix::Msg,
            Interface::Sys => KeyPrefix::Sys,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub prefix: KeyPrefix,
    pub sequence_id: u32,
}

impl CorrelationKey {
    pub fn new(prefix: KeyPrefix, sequence_id: u32) -> Self {
        Self { prefix, sequence_id }
    }

    /// Key of an outgoing command
    pub fn for_command(interface: Interface, sequence_id: u32) -> Self {
        Self::new(interface.into(), sequence_id)
    }

    /// Key of an incoming feedback message received under `prefix`
    pub fn for_response(message: &RobotMessage, prefix: KeyPrefix) -> Self {
        Self::new(prefix, message.feedback_id)
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix.as_str(), self.sequence_id)
    }
}

type Resolver = Box<dyn FnOnce(&RobotMessage) + Send>;
type Listener = Arc<dyn Fn(&RobotMessage) + Send + Sync>;

enum Entry {
    // Generation tells a waiter apart from a later one under the same key
    Waiter { generation: u64, resolver: Resolver },
    Subscriber(Listener),
}

enum Delivery {
    Once(Resolver),
    Recurring(Listener),
}

/// Outstanding waiters and subscribers of one connection
#[derive(Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<CorrelationKey, Entry>>,
    generations: AtomicU64,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CorrelationKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, key: CorrelationKey, entry: Entry) {
        if self.entries().insert(key, entry).is_some() {
            warn!("Correlation key {} was still outstanding, replacing stale entry", key);
        }
    }

    /// Register a single-shot waiter for `key`.
    ///
    /// Dropping the returned future before it resolves removes the entry.
    /// When `evict_on_timeout` is set, a timed out wait removes it too;
    /// otherwise the entry stays until late feedback arrives.
    pub fn register_waiter<P: FeedbackParser>(
        self: &Arc<Self>,
        key: CorrelationKey,
        parser: Arc<P>,
        evict_on_timeout: bool,
    ) -> FutureResult<P::Output> {
        let (sender, receiver) = oneshot::channel();
        let resolver: Resolver = Box::new(move |message: &RobotMessage| {
            if sender.send(decode(message, parser.as_ref())).is_err() {
                debug!("Feedback for {} arrived after the caller stopped waiting", key);
            }
        });
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        self.insert(key, Entry::Waiter { generation, resolver });

        FutureResult {
            key,
            generation,
            receiver,
            table: Arc::downgrade(self),
            evict_on_timeout,
            detached: false,
        }
    }

    /// Register a callback invoked for every feedback message under `key`
    pub fn register_subscriber<P, F>(&self, key: CorrelationKey, parser: Arc<P>, callback: F)
    where
        P: FeedbackParser,
        F: Fn(Result<P::Output>) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(move |message: &RobotMessage| callback(decode(message, parser.as_ref())));
        self.insert(key, Entry::Subscriber(listener));
    }

    /// Deliver `message` to the entry registered under `key`.
    ///
    /// Waiters are removed before delivery; subscribers stay registered.
    /// Returns false when nothing is registered under the key.
    pub fn resolve(&self, key: &CorrelationKey, message: &RobotMessage) -> bool {
        let delivery = {
            let mut entries = self.entries();
            match entries.get(key) {
                None => None,
                Some(Entry::Subscriber(listener)) => Some(Delivery::Recurring(Arc::clone(listener))),
                Some(Entry::Waiter { .. }) => match entries.remove(key) {
                    Some(Entry::Waiter { resolver, .. }) => Some(Delivery::Once(resolver)),
                    _ => None,
                },
            }
        };

        match delivery {
            Some(Delivery::Once(resolver)) => {
                resolver(message);
                true
            }
            Some(Delivery::Recurring(listener)) => {
                listener(message);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &CorrelationKey) -> bool {
        self.entries().remove(key).is_some()
    }

    /// Remove the waiter registered under `key` only if it is still the one
    /// with `generation`
    fn remove_waiter(&self, key: &CorrelationKey, generation: u64) -> bool {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(Entry::Waiter { generation: current, .. }) if *current == generation => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.entries().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Future value of a command's feedback.
///
/// Returned by [`crate::RobotClient::send`] for commands that request
/// feedback. Waiting can happen right away or be deferred. Dropping an
/// unresolved future, including cancelling a pending `result()`, removes
/// its waiter from the table.
pub struct FutureResult<T> {
    key: CorrelationKey,
    generation: u64,
    receiver: oneshot::Receiver<Result<T>>,
    table: Weak<CorrelationTable>,
    evict_on_timeout: bool,
    // Set when a timed out waiter is left registered for late feedback
    detached: bool,
}

impl<T> FutureResult<T> {
    pub fn key(&self) -> CorrelationKey {
        self.key
    }

    /// Wait for the feedback value.
    ///
    /// `None` waits indefinitely. On timeout the remote command keeps
    /// running; only the local wait ends.
    pub async fn result(mut self, timeout: Option<Duration>) -> Result<T> {
        let started = Instant::now();
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.receiver).await {
                Ok(received) => received,
                Err(_) => {
                    if self.evict_on_timeout {
                        if self.evict() {
                            debug!("Evicted {} after timeout", self.key);
                        }
                    } else {
                        self.detached = true;
                    }
                    return Err(LinkError::Timeout {
                        elapsed: started.elapsed(),
                    });
                }
            },
            None => (&mut self.receiver).await,
        };

        received.unwrap_or(Err(LinkError::Abandoned))
    }

    /// Non-blocking check; `None` while the feedback is still outstanding
    pub fn try_result(&mut self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(value) => Some(value),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(LinkError::Abandoned)),
        }
    }
}

impl<T> FutureResult<T> {
    fn evict(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| table.remove_waiter(&self.key, self.generation))
    }
}

impl<T> Drop for FutureResult<T> {
    fn drop(&mut self) {
        if !self.detached && self.evict() {
            debug!("Dropped waiter for {} before feedback arrived", self.key);
        }
    }
}

impl<T> fmt::Debug for FutureResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureResult")
            .field("key", &self.key)
            .field("evict_on_timeout", &self.evict_on_timeout)
            .finish()
    }
}

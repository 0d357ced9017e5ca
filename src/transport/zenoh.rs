//! Zenoh transport
//!
//! Topics and parameters map to Zenoh key expressions with the leading `/`
//! removed. Messages travel as JSON payloads; parameters are served by
//! queryables that reply with a JSON value.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use zenoh::handlers::{RingChannel, RingChannelHandler};
use zenoh::pubsub::Subscriber;
use zenoh::query::{Query, QueryTarget, Queryable};
use zenoh::sample::Sample;
use zenoh::Session;

use super::{FeedbackHandler, Transport, PROTOCOL_VERSION_PARAM, ROBOT_STATE_PORT_PARAM};
use crate::envelope::RobotMessage;
use crate::error::{LinkError, Result};

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

fn key_expr(name: &str) -> &str {
    name.trim_start_matches('/')
}

fn param_name(key: &str) -> String {
    format!("/{}", key)
}

fn transport_error(context: &str, e: impl std::fmt::Display) -> LinkError {
    LinkError::Transport(format!("{}: {}", context, e))
}

pub struct ZenohTransport {
    session: Session,
    // Dropping a callback subscriber undeclares it
    subscribers: Mutex<Vec<Subscriber<()>>>,
    query_timeout: Duration,
}

impl ZenohTransport {
    /// Open a Zenoh session, optionally connecting to a specific endpoint
    pub async fn open(endpoint: Option<&str>) -> Result<Self> {
        let mut config = zenoh::Config::default();
        if let Some(endpoint) = endpoint {
            let endpoint = endpoint
                .parse()
                .map_err(|e| LinkError::Config(format!("Invalid endpoint format: {}", e)))?;
            config
                .connect
                .endpoints
                .set(vec![endpoint])
                .map_err(|e| LinkError::Config(format!("Failed to set endpoint: {:?}", e)))?;
        }

        let session = zenoh::open(config)
            .await
            .map_err(|e| transport_error("Failed to open Zenoh session", e))?;
        info!("Zenoh session opened");

        Ok(Self::from_session(session))
    }

    pub fn from_session(session: Session) -> Self {
        Self {
            session,
            subscribers: Mutex::new(Vec::new()),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Serve a parameter to other sessions until the process exits
    pub async fn serve_param(&self, name: &str, value: serde_json::Value) -> Result<()> {
        let queryable = self
            .session
            .declare_queryable(key_expr(name).to_string())
            .with(RingChannel::new(16))
            .complete(true)
            .await
            .map_err(|e| transport_error("Failed to declare parameter queryable", e))?;

        let payload = serde_json::to_string(&value)?;
        debug!("Serving parameter {} = {}", name, payload);
        tokio::spawn(Self::answer_queries(queryable, payload));
        Ok(())
    }

    async fn answer_queries(queryable: Queryable<RingChannelHandler<Query>>, payload: String) {
        while let Ok(query) = queryable.recv_async().await {
            if let Err(e) = query.reply(query.key_expr(), payload.clone()).await {
                error!("Failed to answer parameter query: {}", e);
            }
        }
    }

    async fn query_keys(&self, selector: &str) -> Result<Vec<String>> {
        let replies = self
            .session
            .get(selector)
            .target(QueryTarget::All)
            .timeout(self.query_timeout)
            .await
            .map_err(|e| transport_error("Failed to send parameter query", e))?;

        let mut keys = Vec::new();
        while let Ok(reply) = replies.recv_async().await {
            if let Ok(sample) = reply.result() {
                keys.push(param_name(sample.key_expr().as_str()));
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl Transport for ZenohTransport {
    async fn publish(&self, topic: &str, message: &RobotMessage) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.session
            .put(key_expr(topic), payload)
            .await
            .map_err(|e| transport_error("Failed to publish command", e))?;
        debug!("Published {} to {}", message.instruction, topic);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: FeedbackHandler) -> Result<()> {
        let name = topic.to_string();
        let subscriber = self
            .session
            .declare_subscriber(key_expr(topic).to_string())
            .callback(move |sample: Sample| {
                match serde_json::from_slice::<RobotMessage>(&sample.payload().to_bytes()) {
                    Ok(message) => handler(message),
                    Err(e) => warn!("Dropping malformed message on {}: {}", name, e),
                }
            })
            .await
            .map_err(|e| transport_error("Failed to declare subscriber", e))?;

        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
        debug!("Subscribed to {}", topic);
        Ok(())
    }

    async fn get_param(&self, name: &str) -> Result<Option<serde_json::Value>> {
        let replies = self
            .session
            .get(key_expr(name))
            .timeout(self.query_timeout)
            .await
            .map_err(|e| transport_error("Failed to send parameter query", e))?;

        while let Ok(reply) = replies.recv_async().await {
            match reply.result() {
                Ok(sample) => {
                    let value = serde_json::from_slice(&sample.payload().to_bytes())?;
                    return Ok(Some(value));
                }
                Err(e) => debug!("Parameter query for {} returned an error: {:?}", name, e),
            }
        }
        Ok(None)
    }

    async fn list_params(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for param in [PROTOCOL_VERSION_PARAM, ROBOT_STATE_PORT_PARAM] {
            names.extend(self.query_keys(&format!("**/{}", param)).await?);
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

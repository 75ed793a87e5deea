//! Broadcast/reply control channel over Redis.
//!
//! Workers subscribe to the `celery.pidbox` fanout exchange. On Redis a
//! fanout exchange is a pub/sub channel named `/{db}.{exchange}`, and a
//! direct exchange is a set of bindings stored under
//! `_kombu.binding.{exchange}` whose members are
//! `routing_key \x06\x16 pattern \x06\x16 queue`. A worker answering a
//! command looks up the binding for the request's `reply_to.routing_key` and
//! pushes its reply onto the bound list.
//!
//! A broadcast therefore:
//! 1. binds a private reply list `{oid}.reply.celery.pidbox`,
//! 2. publishes the request envelope on the fanout channel,
//! 3. pops replies from the reply list until the reply timeout expires or
//!    every addressed worker has answered,
//! 4. removes the binding and the reply list.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use uuid::Uuid;

use super::{ActiveTask, ControlPlane, WorkerQueue};
use crate::error::{BrokerError, StoreError};
use crate::message::{extract_body, QueueEntry, CONTENT_TYPE_JSON};

/// Fanout exchange workers listen on for control commands.
pub const PIDBOX_EXCHANGE: &str = "celery.pidbox";

/// Direct exchange replies are routed through.
pub const REPLY_EXCHANGE: &str = "reply.celery.pidbox";

const BINDING_PREFIX: &str = "_kombu.binding.";
const BINDING_SEP: &str = "\x06\x16";

/// Body of a control request.
#[derive(Debug, Clone, Serialize)]
struct ControlRequest<'a> {
    method: &'a str,
    arguments: BTreeMap<String, Value>,
    destination: Option<&'a [String]>,
    pattern: Option<String>,
    matcher: Option<String>,
    ticket: &'a str,
    reply_to: ReplyTo<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct ReplyTo<'a> {
    exchange: &'a str,
    routing_key: &'a str,
}

/// Control-plane client speaking the Redis mailbox protocol.
pub struct RedisMailbox {
    redis: ConnectionManager,
    db: i64,
    /// How long to wait for worker replies.
    reply_timeout: Duration,
    /// Response timeout for individual commands.
    command_timeout: Duration,
}

impl RedisMailbox {
    pub fn new(
        redis: ConnectionManager,
        db: i64,
        reply_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            redis,
            db,
            reply_timeout,
            command_timeout,
        }
    }

    /// Pub/sub channel of the control fanout exchange.
    pub fn fanout_channel(&self) -> String {
        fanout_channel(self.db)
    }

    /// Sends `method` to `destination` (every worker when `None`) and
    /// returns the replies keyed by worker name.
    pub async fn broadcast(
        &self,
        method: &str,
        destination: Option<&[String]>,
    ) -> Result<BTreeMap<String, Value>, BrokerError> {
        let oid = Uuid::new_v4().to_string();
        let ticket = Uuid::new_v4().to_string();
        let reply_queue = reply_queue_name(&oid);
        let binding_key = format!("{BINDING_PREFIX}{REPLY_EXCHANGE}");
        let binding = binding_member(&oid, &reply_queue);

        let request = ControlRequest {
            method,
            arguments: BTreeMap::new(),
            destination,
            pattern: None,
            matcher: None,
            ticket: &ticket,
            reply_to: ReplyTo {
                exchange: REPLY_EXCHANGE,
                routing_key: &oid,
            },
        };
        let envelope = encode_envelope(&request, PIDBOX_EXCHANGE, "", self.reply_timeout)?;

        let mut conn = self.redis.clone();
        self.bounded(self.command_timeout, conn.sadd::<_, _, i64>(&binding_key, &binding))
            .await?;

        let result = self
            .publish_and_collect(method, &envelope, &reply_queue, &ticket, destination)
            .await;

        let mut conn = self.redis.clone();
        let cleanup = self
            .bounded(
                self.command_timeout,
                redis::pipe()
                    .srem(&binding_key, &binding)
                    .ignore()
                    .del(&reply_queue)
                    .ignore()
                    .query_async::<_, ()>(&mut conn),
            )
            .await;
        if let Err(err) = cleanup {
            tracing::debug!(
                error = %err,
                reply_queue = %reply_queue,
                "Failed to clean up reply binding"
            );
        }

        result
    }

    async fn publish_and_collect(
        &self,
        method: &str,
        envelope: &str,
        reply_queue: &str,
        ticket: &str,
        destination: Option<&[String]>,
    ) -> Result<BTreeMap<String, Value>, BrokerError> {
        let mut conn = self.redis.clone();
        let receivers: i64 = self
            .bounded(
                self.command_timeout,
                conn.publish(self.fanout_channel(), envelope),
            )
            .await?;
        tracing::debug!(method, receivers, "Published control request");

        if receivers == 0 {
            return Ok(BTreeMap::new());
        }

        self.collect_replies(reply_queue, ticket, destination.map(<[String]>::len))
            .await
    }

    /// Pops replies until the deadline or until `limit` workers answered.
    async fn collect_replies(
        &self,
        reply_queue: &str,
        ticket: &str,
        limit: Option<usize>,
    ) -> Result<BTreeMap<String, Value>, BrokerError> {
        let deadline = Instant::now() + self.reply_timeout;
        let mut replies = BTreeMap::new();

        loop {
            if limit.is_some_and(|limit| replies.len() >= limit) {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            // BRPOP only takes whole seconds on older servers; 0 would block forever.
            let block_secs = remaining.as_secs().max(1);
            let mut conn = self.redis.clone();
            let popped: Option<(String, Vec<u8>)> = self
                .bounded(
                    Duration::from_secs(block_secs) + self.command_timeout,
                    redis::cmd("BRPOP")
                        .arg(reply_queue)
                        .arg(block_secs)
                        .query_async(&mut conn),
                )
                .await?;

            let Some((_, raw)) = popped else {
                break;
            };
            match decode_reply(&raw, ticket)? {
                Some(reply) => replies.extend(reply),
                None => tracing::debug!("Ignoring control reply for another ticket"),
            }
        }

        Ok(replies)
    }

    async fn bounded<T, F>(&self, timeout: Duration, pending: F) -> Result<T, BrokerError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(timeout, pending).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BrokerError::Store(StoreError::Timeout(timeout))),
        }
    }

    async fn broadcast_as<T: DeserializeOwned>(
        &self,
        method: &str,
        destination: Option<&[String]>,
    ) -> Result<BTreeMap<String, T>, BrokerError> {
        self.broadcast(method, destination)
            .await?
            .into_iter()
            .map(|(worker, reply)| {
                serde_json::from_value(reply)
                    .map(|parsed| (worker.clone(), parsed))
                    .map_err(|e| BrokerError::Malformed(format!("{method} reply from {worker}: {e}")))
            })
            .collect()
    }
}

#[async_trait]
impl ControlPlane for RedisMailbox {
    async fn active_queues(&self) -> Result<BTreeMap<String, Vec<WorkerQueue>>, BrokerError> {
        self.broadcast_as("active_queues", None).await
    }

    async fn active(
        &self,
        workers: &[String],
    ) -> Result<BTreeMap<String, Vec<ActiveTask>>, BrokerError> {
        self.broadcast_as("active", Some(workers)).await
    }
}

fn fanout_channel(db: i64) -> String {
    format!("/{db}.{PIDBOX_EXCHANGE}")
}

fn reply_queue_name(oid: &str) -> String {
    format!("{oid}.{REPLY_EXCHANGE}")
}

fn binding_member(routing_key: &str, queue: &str) -> String {
    [routing_key, "", queue].join(BINDING_SEP)
}

/// Wraps a request body in a broker message envelope.
fn encode_envelope<T: Serialize>(
    body: &T,
    exchange: &str,
    routing_key: &str,
    expires_in: Duration,
) -> Result<String, BrokerError> {
    let payload = serde_json::to_vec(body)?;
    let expires = chrono::Utc::now().timestamp_millis() as f64 / 1000.0 + expires_in.as_secs_f64();
    let envelope = json!({
        "body": BASE64.encode(payload),
        "content-encoding": "utf-8",
        "content-type": CONTENT_TYPE_JSON,
        "headers": {"clock": 1, "expires": expires},
        "properties": {
            "body_encoding": "base64",
            "delivery_info": {"exchange": exchange, "routing_key": routing_key},
            "delivery_mode": 1,
            "delivery_tag": Uuid::new_v4().to_string(),
            "priority": 0,
        },
    });
    Ok(envelope.to_string())
}

/// Decodes one reply envelope into `{worker: result}`.
///
/// Returns `None` unless the reply carries `ticket` in its headers.
fn decode_reply(raw: &[u8], ticket: &str) -> Result<Option<BTreeMap<String, Value>>, BrokerError> {
    let entry = QueueEntry::from_slice(raw).map_err(|e| BrokerError::Malformed(e.to_string()))?;

    let reply_ticket = entry
        .headers
        .as_ref()
        .and_then(|headers| headers.get("ticket"))
        .and_then(Value::as_str);
    if reply_ticket != Some(ticket) {
        return Ok(None);
    }

    let body = extract_body(&entry).map_err(|e| BrokerError::Malformed(e.to_string()))?;
    match body.into_value() {
        Value::Object(map) => Ok(Some(map.into_iter().collect())),
        other => Err(BrokerError::Malformed(format!(
            "expected a mapping of worker replies, got {other}"
        ))),
    }
}

//! Integration tests against a live Redis server.
//!
//! These tests need a Redis server on localhost:6379.
//! Run with: cargo test --test redis_integration -- --ignored

use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::StreamExt;
use redis::AsyncCommands;
use serde_json::{json, Value};

use queue_probe::broker::{ControlPlane, RedisMailbox};
use queue_probe::config::ProbeConfig;
use queue_probe::message::{extract_body, QueueEntry};
use queue_probe::probe::probe_queue;
use queue_probe::storage::{QueueStore, RedisStore};

#[tokio::test]
#[ignore] // Run with: cargo test --test redis_integration -- --ignored
async fn test_probe_reads_without_consuming() {
    let queue = format!("queue-probe-test-{}", uuid::Uuid::new_v4());
    let config = ProbeConfig::new(queue.clone()).with_items(2);

    let store = RedisStore::connect(&config)
        .await
        .expect("Redis must be running on localhost:6379");

    let entry = json!({
        "body": BASE64.encode(r#"{"task":"ship_order","args":[42],"kwargs":{}}"#),
        "content-type": "application/json",
        "headers": {},
        "properties": "corr-live",
    });
    let mut conn = store.connection();
    conn.rpush::<_, _, ()>(&queue, entry.to_string())
        .await
        .expect("push should succeed");

    let mailbox = RedisMailbox::new(
        store.connection(),
        config.db,
        Duration::from_secs(1),
        config.timeout,
    );

    let mut out = Vec::new();
    let outcome = probe_queue(&store, &mailbox, &queue, config.items, &mut out)
        .await
        .expect("probe should complete");
    let output = String::from_utf8(out).expect("output is UTF-8");

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.skipped, 1);
    assert!(output.contains("next_task = ship_order"));
    assert_eq!(store.llen(&queue).await.expect("llen should succeed"), 1);
    assert_eq!(store.key_type(&queue).await.expect("type should succeed"), "list");

    conn.del::<_, ()>(&queue).await.expect("cleanup should succeed");
}

/// Answers up to `requests` control commands on the fanout channel the way a
/// worker named `worker` consuming from `queue` would, and returns the reply
/// list names it pushed to.
async fn serve_control_requests(
    mut pubsub: redis::aio::PubSub,
    mut conn: redis::aio::ConnectionManager,
    worker: &str,
    queue: &str,
    requests: usize,
) -> Vec<String> {
    let mut reply_queues = Vec::new();
    let mut messages = pubsub.on_message();

    while reply_queues.len() < requests {
        let Some(msg) = messages.next().await else {
            break;
        };
        let raw: Vec<u8> = msg.get_payload().expect("payload should be bytes");
        let entry = QueueEntry::from_slice(&raw).expect("request is an entry");
        let request = extract_body(&entry).expect("request body should decode");

        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let ticket = request.get("ticket").and_then(Value::as_str).unwrap_or_default();
        let routing_key = request
            .get("reply_to")
            .and_then(|reply_to| reply_to.get("routing_key"))
            .and_then(Value::as_str)
            .expect("reply_to carries a routing key")
            .to_string();

        let result = match method {
            "active_queues" => json!([{"name": queue}]),
            "active" => json!([{
                "id": "t-live",
                "name": "ship_order",
                "args": [42],
                "kwargs": {},
                "hostname": worker,
            }]),
            other => panic!("unexpected control method {other}"),
        };
        let by_worker = Value::Object(serde_json::Map::from_iter([(worker.to_string(), result)]));
        let reply = json!({
            "body": BASE64.encode(by_worker.to_string()),
            "content-encoding": "utf-8",
            "content-type": "application/json",
            "headers": {"ticket": ticket},
            "properties": {"body_encoding": "base64"},
        });

        let reply_queue = format!("{routing_key}.reply.celery.pidbox");
        conn.lpush::<_, _, ()>(&reply_queue, reply.to_string())
            .await
            .expect("reply push should succeed");
        reply_queues.push(reply_queue);
    }

    reply_queues
}

#[tokio::test]
#[ignore] // Run with: cargo test --test redis_integration -- --ignored
async fn test_control_replies_from_live_worker() {
    let worker = format!("celery@live-{}", uuid::Uuid::new_v4());
    let queue = format!("queue-probe-test-{}", uuid::Uuid::new_v4());
    let config = ProbeConfig::new(queue.clone());

    let store = RedisStore::connect(&config)
        .await
        .expect("Redis must be running on localhost:6379");

    let client = redis::Client::open(config.redis_url()).expect("valid redis url");
    let mut pubsub = client
        .get_async_connection()
        .await
        .expect("pubsub connection should open")
        .into_pubsub();
    pubsub
        .subscribe("/0.celery.pidbox")
        .await
        .expect("subscribe should succeed");

    let worker_conn = store.connection();
    let serve_worker = worker.clone();
    let serve_queue = queue.clone();
    let server = tokio::spawn(async move {
        serve_control_requests(pubsub, worker_conn, &serve_worker, &serve_queue, 2).await
    });

    let reply_timeout = Duration::from_secs(2);
    let mailbox = RedisMailbox::new(store.connection(), config.db, reply_timeout, config.timeout);

    // No destination: keeps popping until a wait comes back empty.
    let started = Instant::now();
    let queues = mailbox.active_queues().await.expect("active_queues should succeed");
    assert!(started.elapsed() >= Duration::from_secs(1));
    let bound: Vec<&str> = queues[&worker].iter().map(|q| q.name.as_str()).collect();
    assert_eq!(bound, vec![queue.as_str()]);

    // One addressed worker: returns as soon as it answered.
    let started = Instant::now();
    let active = mailbox
        .active(&[worker.clone()])
        .await
        .expect("active should succeed");
    assert!(started.elapsed() < reply_timeout);
    let tasks = &active[&worker];
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name.as_deref(), Some("ship_order"));
    assert_eq!(tasks[0].args, Some(json!([42])));

    let reply_queues = server.await.expect("worker task should finish");
    assert_eq!(reply_queues.len(), 2);

    let mut conn = store.connection();
    for reply_queue in &reply_queues {
        let oid = reply_queue
            .strip_suffix(".reply.celery.pidbox")
            .expect("reply queue is named after the oid");
        let member = format!("{oid}\x06\x16\x06\x16{reply_queue}");
        let bound: bool = conn
            .sismember("_kombu.binding.reply.celery.pidbox", &member)
            .await
            .expect("sismember should succeed");
        let exists: bool = conn.exists(reply_queue).await.expect("exists should succeed");
        assert!(!bound, "binding {member:?} should be removed");
        assert!(!exists, "reply list {reply_queue} should be deleted");
    }
}

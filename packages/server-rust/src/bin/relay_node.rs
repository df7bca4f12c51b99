//! `relay-node`: runs a caller bridge and a responder over an in-memory bus
//! and drives a short scripted call sequence through them.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use relay_core::{Fields, Operation, WireFormat};
use relay_server::logging::{self, LogFormat};
use relay_server::{BridgeError, CallerBridge, InMemoryBus, ReactionService, RelayConfig, RelayNode};
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WireArg {
    Json,
    Msgpack,
}

impl From<WireArg> for WireFormat {
    fn from(value: WireArg) -> Self {
        match value {
            WireArg::Json => WireFormat::Json,
            WireArg::Msgpack => WireFormat::MsgPack,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogArg {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "relay-node")]
#[command(about = "Request/response correlation bridge over an in-memory pub/sub bus", long_about = None)]
struct Cli {
    #[arg(long, env = "RELAY_NODE_ID", default_value = "relay-node")]
    node_id: String,

    #[arg(long, env = "RELAY_REQUEST_TOPIC", default_value = "requests")]
    request_topic: String,

    #[arg(long, env = "RELAY_REPLY_TOPIC", default_value = "replies")]
    reply_topic: String,

    #[arg(long, env = "RELAY_CALLER_GROUP", default_value = "publisher")]
    caller_group: String,

    #[arg(long, env = "RELAY_RESPONDER_GROUP", default_value = "discussion")]
    responder_group: String,

    /// Per-call timeout in milliseconds.
    #[arg(long, env = "RELAY_CALL_TIMEOUT_MS", default_value_t = 2_000)]
    call_timeout_ms: u64,

    #[arg(long, env = "RELAY_SWEEP_INTERVAL_MS", default_value_t = 250)]
    sweep_interval_ms: u64,

    #[arg(long, env = "RELAY_DISPATCH_TIMEOUT_MS", default_value_t = 1_500)]
    dispatch_timeout_ms: u64,

    #[arg(long, env = "RELAY_REPLY_PUBLISH_RETRIES", default_value_t = 3)]
    reply_publish_retries: u32,

    #[arg(long, env = "RELAY_REPLY_PUBLISH_BACKOFF_MS", default_value_t = 50)]
    reply_publish_backoff_ms: u64,

    #[arg(long, env = "RELAY_REPLY_PUBLISH_BACKOFF_MAX_MS", default_value_t = 1_000)]
    reply_publish_backoff_max_ms: u64,

    #[arg(long, env = "RELAY_REPLY_CACHE_CAPACITY", default_value_t = 1_024)]
    reply_cache_capacity: usize,

    /// Partitions per topic.
    #[arg(long, env = "RELAY_PARTITIONS", default_value_t = 4)]
    partitions: u32,

    #[arg(long, env = "RELAY_WIRE_FORMAT", value_enum, default_value = "json")]
    wire_format: WireArg,

    #[arg(long, env = "RELAY_DRAIN_TIMEOUT_MS", default_value_t = 5_000)]
    drain_timeout_ms: u64,

    #[arg(long, env = "RELAY_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogArg,
}

impl Cli {
    fn config(&self) -> RelayConfig {
        RelayConfig {
            node_id: self.node_id.clone(),
            request_topic: self.request_topic.clone(),
            reply_topic: self.reply_topic.clone(),
            caller_group: self.caller_group.clone(),
            responder_group: self.responder_group.clone(),
            default_call_timeout_ms: self.call_timeout_ms,
            sweep_interval_ms: self.sweep_interval_ms,
            dispatch_timeout_ms: self.dispatch_timeout_ms,
            reply_publish_retries: self.reply_publish_retries,
            reply_publish_backoff_ms: self.reply_publish_backoff_ms,
            reply_publish_backoff_max_ms: self.reply_publish_backoff_max_ms,
            reply_cache_capacity: self.reply_cache_capacity,
            partitions: self.partitions,
            wire_format: self.wire_format.into(),
            drain_timeout_ms: self.drain_timeout_ms,
        }
    }
}

fn fields(value: &Value) -> Option<Fields> {
    value.as_object().cloned()
}

fn report(step: &str, outcome: &Result<Value, BridgeError>) {
    let line = match outcome {
        Ok(result) => json!({"step": step, "ok": true, "result": result}),
        Err(e) => json!({
            "step": step,
            "ok": false,
            "error": e.to_string(),
            "retryable": e.is_retryable(),
        }),
    };
    println!("{line}");
}

/// create -> read one -> read all -> update -> delete -> read missing
async fn run_script(bridge: CallerBridge) {
    let timeout = bridge.default_timeout();

    let created = bridge
        .call(
            fields(&json!({"articleId": 7, "content": "hello from relay-node"})),
            Operation::Create,
            None,
            timeout,
        )
        .await;
    report("create", &created);
    let Some(id) = created.ok().and_then(|v| v["id"].as_i64()) else {
        return;
    };

    report(
        "read_one",
        &bridge.call(None, Operation::ReadOne, Some(id), timeout).await,
    );
    report(
        "read_all",
        &bridge.call(None, Operation::ReadAll, None, timeout).await,
    );
    report(
        "update",
        &bridge
            .call(
                fields(&json!({"articleId": 7, "content": "edited by relay-node"})),
                Operation::Update,
                Some(id),
                timeout,
            )
            .await,
    );
    report(
        "delete",
        &bridge.call(None, Operation::Delete, Some(id), timeout).await,
    );
    report(
        "read_missing",
        &bridge.call(None, Operation::ReadOne, Some(id), timeout).await,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(match cli.log_format {
        LogArg::Text => LogFormat::Text,
        LogArg::Json => LogFormat::Json,
    })?;

    let config = cli.config();
    let bus = InMemoryBus::new(config.partitions);
    let mut node = RelayNode::new(config, Arc::new(bus.clone()), Arc::new(ReactionService::new()));
    node.start().await?;

    tokio::select! {
        () = run_script(node.bridge()) => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupted; shutting down");
        }
    }

    let report = node.shutdown().await;
    bus.close();
    info!(
        drained = report.drained,
        failed_calls = report.failed_calls,
        requests = bus.message_count(&node.config().request_topic),
        replies = bus.message_count(&node.config().reply_topic),
        retained_replies = bus.retained_count(&node.config().reply_topic),
        "done"
    );
    Ok(())
}

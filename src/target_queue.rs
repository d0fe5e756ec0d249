//! Client for the shared probe-task queue: a durable, priority-aware
//! RabbitMQ queue fed by all producers (manual/API, DNS collector,
//! remeasurement) and consumed by the worker pool. De-duplication is
//! backed by the `enqueue_log` table so it holds across producers.

use std::time::Duration;

use amqprs::channel::{
    BasicAckArguments, BasicConsumeArguments, BasicPublishArguments, BasicQosArguments,
    BasicRejectArguments, ConsumerMessage, QueueDeclareArguments,
};
use amqprs::BasicProperties;
use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use clap::Args;
use diesel::PgConnection;
use log::{trace, warn};
use queue_models::probe_task::ProbeTask;
use queue_models::TypeRoutedMessage;

use crate::helpers::rabbit::RabbitHandle;

mod persist;

/// Matches the queue's x-max-priority; message priorities above this are
/// clamped by the broker.
pub const MAX_PRIORITY: u8 = 10;

#[derive(Args, Clone, Debug)]
#[group(id = "queue")]
pub struct Params {
    /// URI for AMQP (RabbitMQ) server to connect to.
    /// If a password is required, prefer the environment over the command
    /// line to avoid exposure in shell history and the process list.
    #[arg(long, env = "AMQP_URI")]
    amqp_uri: String,

    /// Name of the durable queue holding pending probe tasks.
    #[arg(long, default_value = "tracewatch.probe-task")]
    queue_name: String,

    /// Name of the exchange probe tasks are published to.
    #[arg(long, default_value = "tracewatch.probe")]
    exchange_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// An identical task was enqueued within the dedupe window.
    Deduped,
}

pub struct TargetQueue {
    handle: RabbitHandle,
    params: Params,
}

impl TargetQueue {
    pub async fn connect(params: &Params, conn_name: &str) -> Result<Self> {
        let handle = RabbitHandle::connect(&params.amqp_uri, conn_name).await?;
        handle
            .declare_priority_queue(&params.queue_name, MAX_PRIORITY)
            .await?
            .declare_exchange(&params.exchange_name, "direct")
            .await?
            .bind_queue(
                &params.queue_name,
                &params.exchange_name,
                ProbeTask::routing_key(),
            )
            .await?;
        Ok(Self {
            handle,
            params: params.clone(),
        })
    }

    /// Appends a task unless an identical `(target_ip, source, priority)`
    /// submission is younger than `dedupe_window`. First enqueue of an IP
    /// also creates its `targets` row.
    pub async fn enqueue(
        &self,
        conn: &mut PgConnection,
        task: &ProbeTask,
        dedupe_window: Duration,
    ) -> Result<EnqueueOutcome> {
        if !persist::note_enqueue(conn, task, dedupe_window)? {
            trace!("Deduped task for {}", task.target_ip);
            return Ok(EnqueueOutcome::Deduped);
        }
        persist::ensure_target(conn, task)?;

        let args =
            BasicPublishArguments::new(&self.params.exchange_name, ProbeTask::routing_key());
        let props = BasicProperties::default()
            .with_priority(task.priority.amqp_level())
            .with_delivery_mode(2) // persistent; tasks outlive broker restarts
            .finish();
        let body = serde_json::to_vec(task)
            .with_context(|| format!("during serialisation of {:?}", task))?;
        self.handle
            .chan()
            .basic_publish(props, body, args)
            .await
            .with_context(|| "during publish")?;
        Ok(EnqueueOutcome::Accepted)
    }

    /// Count of pending tasks, as reported by the broker.
    pub async fn depth(&self) -> Result<u32> {
        let args = QueueDeclareArguments::new(&self.params.queue_name)
            .passive(true)
            .finish();
        let (_, message_count, _) = self
            .handle
            .chan()
            .queue_declare(args)
            .await
            .with_context(|| "while passively declaring queue for depth")?
            .expect("queue_declare returned None even though no_wait was false");
        Ok(message_count)
    }

    /// Starts a consumer on a fresh channel. `prefetch` bounds unacked
    /// deliveries so pending work stays visible to other workers.
    pub async fn consumer(&self, prefetch: u16, consumer_tag: &str) -> Result<TaskConsumer> {
        let handle = self.handle.fork().await?;
        handle
            .chan()
            .basic_qos(BasicQosArguments::new(0, prefetch, false))
            .await
            .with_context(|| "while setting consumer prefetch")?;
        let args = BasicConsumeArguments::new(&self.params.queue_name, consumer_tag);
        let (_ctag, rx) = handle
            .chan()
            .basic_consume_rx(args)
            .await
            .with_context(|| "while starting task consumer")?;
        Ok(TaskConsumer { handle, rx })
    }
}

pub struct DeliveredTask {
    pub task: ProbeTask,
    pub delivery_tag: u64,
}

/// One worker's view of the queue. Consume, ack and reject all go through
/// the same channel, as delivery tags are channel-scoped.
pub struct TaskConsumer {
    handle: RabbitHandle,
    rx: tokio::sync::mpsc::UnboundedReceiver<ConsumerMessage>,
}

impl TaskConsumer {
    /// Blocks up to `timeout` for the next task; `None` on timeout.
    /// Messages that fail to parse are rejected without requeue and
    /// reported as a timeout-equivalent empty result.
    pub async fn dequeue(&mut self, timeout: Duration) -> Result<Option<DeliveredTask>> {
        let msg = match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_elapsed) => return Ok(None),
            Ok(None) => bail!("task consumer channel closed by broker"),
            Ok(Some(msg)) => msg,
        };
        let content = msg
            .content
            .expect("amqprs guarantees that received ConsumerMessage has content");
        let deliver = msg
            .deliver
            .expect("amqprs guarantees that received ConsumerMessage has deliver");
        match serde_json::from_slice(&content) {
            Ok(task) => Ok(Some(DeliveredTask {
                task,
                delivery_tag: deliver.delivery_tag(),
            })),
            Err(e) => {
                warn!(
                    "Unable to parse queued task, rejecting it: {:?} - {:?}",
                    e,
                    String::from_utf8_lossy(&content)
                );
                self.reject(deliver.delivery_tag()).await?;
                Ok(None)
            }
        }
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.handle
            .chan()
            .basic_ack(BasicAckArguments {
                delivery_tag,
                multiple: false,
            })
            .await
            .with_context(|| "during ack")?;
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64) -> Result<()> {
        self.handle
            .chan()
            .basic_reject(BasicRejectArguments::new(
                delivery_tag,
                /* requeue = */ false,
            ))
            .await
            .with_context(|| "during immediate reject")?;
        Ok(())
    }
}

pub fn is_within_window(
    previous: Option<NaiveDateTime>,
    now: NaiveDateTime,
    window: Duration,
) -> bool {
    match previous {
        None => false,
        Some(prev) => {
            let age = now.signed_duration_since(prev);
            age >= chrono::Duration::zero()
                && age <= chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero())
        }
    }
}

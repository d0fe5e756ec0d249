use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use db_model::settings::{self, WorkerSettings};
use queue_models::probe_task::ProbeTask;
use tracewatch::target_queue::TaskConsumer;

use crate::probe::{self, TraceTool};
use crate::rate_limit::RollingRateLimiter;
use crate::{persist, probe::ProbeOutcome};

const DEQUEUE_WAIT: Duration = Duration::from_secs(5);
const TOOL_BACKOFF: Duration = Duration::from_secs(30);

pub async fn run(idx: usize, consumer: TaskConsumer, stop_rx: CancellationToken) -> Result<()> {
    let (ack_tx, ack_rx) = mpsc::unbounded_channel();
    Worker {
        idx,
        consumer,
        limiter: RollingRateLimiter::per_minute(),
        permits: Arc::new(Semaphore::new(0)),
        granted_permits: 0,
        ack_tx,
        ack_rx,
    }
    .run(stop_rx)
    .await
}

struct Worker {
    idx: usize,
    consumer: TaskConsumer,
    limiter: RollingRateLimiter,
    permits: Arc<Semaphore>,
    granted_permits: usize,
    // Finished probes report their delivery tag here; acks go out through
    // the consumer's channel, which only this loop touches.
    ack_tx: UnboundedSender<u64>,
    ack_rx: UnboundedReceiver<u64>,
}

/// What one loop turn of the worker woke up for.
enum Turn {
    Stop,
    Ack(Option<u64>),
    Task(Option<tracewatch::target_queue::DeliveredTask>),
}

impl Worker {
    async fn run(mut self, stop_rx: CancellationToken) -> Result<()> {
        info!("Worker {} ready for work.", self.idx);
        loop {
            // Settings are live config; every loop turn sees the current values.
            let settings = self.read_settings();
            self.resize_permits(settings.max_concurrent_probes.max(1));

            let turn = tokio::select! {
                biased; // Stop should take prio
                _ = stop_rx.cancelled() => Turn::Stop,
                tag = self.ack_rx.recv() => Turn::Ack(tag),
                res = self.consumer.dequeue(DEQUEUE_WAIT) => Turn::Task(res?),
            };
            let delivered = match turn {
                Turn::Stop => {
                    debug!("Worker {} received stop, draining in-flight probes.", self.idx);
                    return self.drain_acks().await;
                }
                Turn::Ack(Some(tag)) => {
                    self.consumer.ack(tag).await?;
                    continue;
                }
                // We hold a sender ourselves, so this does not happen.
                Turn::Ack(None) => continue,
                // Dequeue timeout; loop around to re-check settings.
                Turn::Task(None) => continue,
                Turn::Task(Some(delivered)) => delivered,
            };

            if delivered.task.is_expired(Utc::now().naive_utc()) {
                debug!(
                    "Discarding task for {} whose deadline passed",
                    delivered.task.target_ip
                );
                self.consumer.ack(delivered.delivery_tag).await?;
                continue;
            }

            let Some(tool) = self.wait_for_tool(&settings, &stop_rx).await else {
                return Ok(()); // stopped while backing off; task stays unacked
            };

            let stopped = tokio::select! {
                biased;
                _ = stop_rx.cancelled() => true,
                _ = self.limiter.acquire(settings.rate_limit_per_minute) => false,
            };
            if stopped {
                return self.drain_acks().await;
            }
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .expect("probe semaphore is never closed");

            let probe = InFlightProbe {
                worker_idx: self.idx,
                task: delivered.task,
                delivery_tag: delivered.delivery_tag,
                tool,
                timeout: Duration::from_secs(settings.probe_timeout_seconds.max(1)),
                ack_tx: self.ack_tx.clone(),
            };
            tokio::spawn(probe.execute(permit));
        }
    }

    fn read_settings(&self) -> WorkerSettings {
        match db_model::persist::connect() {
            Ok(mut conn) => settings::load::<WorkerSettings>(&mut conn),
            Err(e) => {
                warn!(
                    "Worker {} could not reach the store for settings, using defaults: {:?}",
                    self.idx, e
                );
                WorkerSettings::default()
            }
        }
    }

    /// Grows the probe semaphore immediately; shrinks as far as idle
    /// permits allow and retries next turn for the remainder.
    fn resize_permits(&mut self, want: usize) {
        while self.granted_permits > want {
            match self.permits.clone().try_acquire_owned() {
                Ok(permit) => {
                    permit.forget();
                    self.granted_permits -= 1;
                }
                Err(_) => break, // all permits are out probing right now
            }
        }
        if self.granted_permits < want {
            self.permits.add_permits(want - self.granted_permits);
            self.granted_permits = want;
        }
    }

    async fn wait_for_tool(
        &self,
        settings: &WorkerSettings,
        stop_rx: &CancellationToken,
    ) -> Option<TraceTool> {
        loop {
            if let Some(tool) = probe::select_tool(&settings.tool_preference) {
                return Some(tool);
            }
            warn!(
                "Worker {}: none of {:?} found on PATH, backing off {}s",
                self.idx,
                settings.tool_preference,
                TOOL_BACKOFF.as_secs()
            );
            tokio::select! {
                biased;
                _ = stop_rx.cancelled() => return None,
                _ = tokio::time::sleep(TOOL_BACKOFF) => {}
            }
        }
    }

    /// Flushes acks queued by probes that finished while we were waiting.
    async fn drain_acks(&mut self) -> Result<()> {
        while let Ok(tag) = self.ack_rx.try_recv() {
            self.consumer.ack(tag).await?;
        }
        Ok(())
    }
}

struct InFlightProbe {
    worker_idx: usize,
    task: ProbeTask,
    delivery_tag: u64,
    tool: TraceTool,
    timeout: Duration,
    ack_tx: UnboundedSender<u64>,
}

impl InFlightProbe {
    async fn execute(self, permit: OwnedSemaphorePermit) {
        let delivery_tag = self.delivery_tag;
        let ack_tx = self.ack_tx.clone();
        if let Err(e) = self.try_execute().await {
            // Deliberately no requeue: the remeasurement scheduler will
            // cover this target once it goes stale.
            warn!("Measurement attempt failed: {:?}", e);
        }
        let _ = ack_tx.send(delivery_tag);
        drop(permit);
    }

    async fn try_execute(self) -> Result<()> {
        let started_at = Utc::now().naive_utc();
        let mut conn = db_model::persist::connect()?;
        let reserved = persist::reserve_measurement(&mut conn, &self.task, self.tool, started_at)?;

        let outcome = match probe::run(self.tool, self.task.target_ip, self.timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Worker {}: {} did not produce output for {}: {:?}",
                    self.worker_idx,
                    self.tool.name(),
                    self.task.target_ip,
                    e
                );
                ProbeOutcome::failed(format!("{:?}", e))
            }
        };

        let completed_at = Utc::now().naive_utc();
        persist::complete_measurement(&mut conn, &reserved, &outcome, completed_at)?;
        debug!(
            "Worker {}: measurement {} for {} done, {} hops, success={}",
            self.worker_idx,
            reserved.id,
            self.task.target_ip,
            outcome.hops.len(),
            outcome.success()
        );
        Ok(())
    }
}

//! Polling engine for in-flight generation tasks.
//!
//! A fixed-interval loop: each tick loads the store, drops terminal tasks
//! from consideration, force-fails tasks that never got a vendor id within
//! the grace window, fetches status for the rest concurrently and merges
//! each response back. Ticks are serialized — a tick awaits all of its
//! fetches before the next one starts, so two polls of the same task never
//! overlap.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use providers::MidjourneyClient;
use shared::{TaskError, TaskRecord, TaskStatus};
use std::sync::Arc;
use std::time::Duration;

use crate::store::TaskStore;

pub struct PollingEngine {
    store: Arc<TaskStore>,
    client: MidjourneyClient,
    interval: Duration,
    grace: ChronoDuration,
}

/// True when the record still has no vendor correlation id and has been
/// sitting longer than the grace window. Such a task would otherwise be
/// polled forever; it gets force-failed with no network call.
fn missing_id_past_grace(rec: &TaskRecord, now: DateTime<Utc>, grace: ChronoDuration) -> bool {
    rec.vendor_task_id.is_empty() && now - rec.created_at > grace
}

impl PollingEngine {
    pub fn new(store: Arc<TaskStore>, client: MidjourneyClient, settings: &shared::settings::PollSettings) -> Self {
        Self {
            store,
            client,
            interval: Duration::from_secs(settings.interval_secs.max(1)),
            grace: ChronoDuration::seconds(settings.grace_secs as i64),
        }
    }

    /// Poll forever at the fixed interval.
    pub async fn run(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.tick().await?;
        }
    }

    /// Poll until every stored task is terminal.
    pub async fn run_until_idle(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if self.tick().await? == 0 {
                return Ok(());
            }
        }
    }

    /// One polling pass. Returns the number of tasks still non-terminal
    /// afterwards.
    pub async fn tick(&self) -> Result<usize> {
        let now = Utc::now();
        let mut pollable = Vec::new();

        for rec in self
            .store
            .get_all()?
            .into_iter()
            .filter(|r| !r.status.is_terminal())
        {
            if missing_id_past_grace(&rec, now, self.grace) {
                let error = TaskError::MissingVendorId(self.grace.num_seconds() as u64);
                tracing::warn!(id = rec.id, "task never recorded a vendor id; giving up");
                self.store.update(&rec.failed(error.to_string()))?;
                continue;
            }
            if rec.vendor_task_id.is_empty() {
                // Inside the grace window; nothing to fetch yet.
                continue;
            }
            pollable.push(rec);
        }

        let fetches = pollable.into_iter().map(|rec| {
            let client = self.client.clone();
            async move {
                let result = client.fetch(&rec.vendor_task_id).await;
                (rec, result)
            }
        });

        for (rec, result) in join_all(fetches).await {
            let next = match result {
                Ok(update) => rec.merged(&update),
                Err(e) => rec.failed(e.to_string()),
            };
            if next.status != rec.status {
                tracing::info!(
                    id = rec.id,
                    from = rec.status.as_str(),
                    to = next.status.as_str(),
                    "task status changed"
                );
            }
            self.store.update(&next)?;
        }

        Ok(self
            .store
            .get_all()?
            .iter()
            .filter(|r| !r.status.is_terminal())
            .count())
    }

    /// Poll a single task on explicit user request.
    ///
    /// Unlike the background loop this may revisit a FAILURE record: manual
    /// retry clears the failed state before merging, overriding the sticky
    /// terminal rule on purpose. SUCCESS records are returned untouched.
    pub async fn poll_once(&self, id: i64) -> Result<TaskRecord> {
        let rec = self
            .store
            .get(id)?
            .ok_or_else(|| anyhow!("task {} not found", id))?;

        if rec.status == TaskStatus::Success {
            return Ok(rec);
        }
        if rec.vendor_task_id.is_empty() {
            let failed = rec.failed(
                TaskError::MissingVendorId(self.grace.num_seconds() as u64).to_string(),
            );
            self.store.update(&failed)?;
            return Ok(failed);
        }

        let mut base = rec;
        if base.status == TaskStatus::Failure {
            base.status = TaskStatus::Submitted;
            base.error.clear();
        }

        let next = match self.client.fetch(&base.vendor_task_id).await {
            Ok(update) => base.merged(&update),
            Err(e) => base.failed(e.to_string()),
        };
        self.store.update(&next)?;
        Ok(next)
    }
}

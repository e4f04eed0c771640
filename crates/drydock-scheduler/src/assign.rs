//! Blocking job assignment.
//!
//! Assignment runs in two phases. A read phase scans the index for at
//! most two candidates (the earliest job targeted at this runner, and the
//! earliest any-target job) without taking the writer. If nothing is
//! eligible it parks on the watch set and retries when queued membership
//! or scope occupancy changes. A commit phase then takes the writer,
//! re-verifies each candidate in queue order, and transitions the winner
//! to waiting. Losing a race to another assigner just means skipping to
//! the next candidate or taking the loop again.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;
use crate::job::{JobDetail, JobState};
use crate::runner::Runner;
use crate::scheduler::SchedulerInner;
use crate::watch::WatchSet;

impl SchedulerInner {
    pub(crate) async fn assign(
        &self,
        runner: &Runner,
        cancel: &CancellationToken,
    ) -> Result<JobDetail> {
        loop {
            // Read phase: collect candidates and watch subscriptions
            // without blocking writers.
            let (candidates, ws) = {
                let guard = self.index.read();
                let mut ws = WatchSet::new();
                let mut candidates: Vec<(i64, String)> = Vec::new();

                if let Some(candidate) = guard.candidate_by_id(runner, &mut ws) {
                    candidates.push(candidate);
                }
                if !runner.by_id_only {
                    if let Some(candidate) = guard.candidate_any(&mut ws) {
                        candidates.push(candidate);
                    }
                }

                if candidates.is_empty() {
                    // Nothing eligible; wake when the queued set changes.
                    ws.add(guard.queued.subscribe());
                }

                // Earliest queue time wins; a targeted candidate with the
                // same stamp sorts first because it was pushed first.
                candidates.sort_by_key(|(nanos, _)| *nanos);
                (candidates, ws)
            };

            if candidates.is_empty() {
                ws.wait(cancel).await?;
                continue;
            }

            // Commit phase: re-verify under the writer, first valid
            // candidate wins.
            {
                let mut guard = self.index.write();
                let state = &mut *guard;

                for (_, id) in &candidates {
                    let Some(entry) = state.jobs.get(id) else {
                        continue;
                    };
                    // Assigned, canceled, or blocked since the read
                    // phase: invalid candidate.
                    if entry.state != JobState::Queued {
                        continue;
                    }
                    if state.scopes.is_blocked(entry, None) {
                        continue;
                    }

                    let now = Utc::now();
                    let job = self.store.update(id, |job| {
                        job.state = JobState::Waiting;
                        job.assign_time = Some(now);
                        Ok(())
                    })?;

                    state.set_state(id, JobState::Waiting)?;
                    state.assign_scope(id)?;
                    let timer = self.spawn_waiting_timer(id.clone());
                    let entry = state.entry_mut(id)?;
                    entry.state_timer = Some(timer);
                    let output = entry.output.clone();

                    info!(job_id = %id, runner_id = %runner.id, "job assigned");
                    if let Some(metrics) = self.metrics.read().as_ref() {
                        metrics.record_runner_activity(&runner.id, "assign");
                    }
                    return Ok(JobDetail {
                        job,
                        output,
                        blocked: false,
                    });
                }
            }

            // Every candidate went stale between the phases; rescan.
            debug!(runner_id = %runner.id, "assignment candidates went stale, retrying");
        }
    }
}

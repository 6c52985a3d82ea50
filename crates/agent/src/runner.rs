use std::{collections::BTreeSet, sync::Arc};

use futures::future::join_all;
use tidepool_storage::TaskStore;
use tidepool_types::task::{Task, TaskStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    actions::{ActionDefinition, StartOutcome, TickContext},
    AgentError
};

/// What one tick did, for the loop's log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickSummary {
    pub updated:   usize,
    pub started:   usize,
    pub errored:   usize,
    pub cancelled: bool
}

/// The scheduler. Holds the ordered action registry and drives every
/// active task one step per tick, then starts whatever the free resources
/// allow. State lives in the task store, so a restart picks up where the
/// previous process stopped.
pub struct ActionRunner {
    store:       Arc<TaskStore>,
    definitions: Vec<Arc<dyn ActionDefinition>>
}

impl ActionRunner {
    pub fn new(store: Arc<TaskStore>, definitions: Vec<Arc<dyn ActionDefinition>>) -> Self {
        Self { store, definitions }
    }

    pub fn definitions(&self) -> &[Arc<dyn ActionDefinition>] {
        &self.definitions
    }

    fn definition(&self, name: &str) -> Option<&Arc<dyn ActionDefinition>> {
        self.definitions.iter().find(|d| d.name() == name)
    }

    /// One scheduler tick.
    ///
    /// Existing tasks update in parallel since their resources are
    /// disjoint by construction; the start phase is strictly sequential so
    /// resources acquired by one candidate block the candidates after it.
    pub async fn tick(&self, token: &CancellationToken) -> Result<TickSummary, AgentError> {
        let mut summary = TickSummary::default();
        let active = self.store.get_active_tasks()?;
        let snapshot = active.clone();

        let updates = active
            .into_iter()
            .map(|task| self.update_task(task, &snapshot, token));
        let mut current: Vec<Task> = Vec::new();
        for result in join_all(updates).await {
            let (task, outcome) = result?;
            match outcome {
                UpdateOutcome::Advanced => summary.updated += 1,
                UpdateOutcome::MarkedError => summary.errored += 1,
                UpdateOutcome::Skipped => {}
            }
            if task.is_active() {
                current.push(task);
            }
        }

        if token.is_cancelled() {
            summary.cancelled = true;
            return Ok(summary)
        }

        let mut held: BTreeSet<String> = current
            .iter()
            .flat_map(|task| task.resources_taken.iter().cloned())
            .collect();

        for definition in &self.definitions {
            if token.is_cancelled() {
                summary.cancelled = true;
                break
            }

            let resources = definition.lock_resources();
            if !held.is_disjoint(&resources) {
                continue
            }

            let cx = TickContext { active: &current, token };
            match definition.should_start(&cx).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) if e.is_cancelled() => {
                    summary.cancelled = true;
                    break
                }
                Err(e) => {
                    warn!(definition = definition.name(), %e, "gate check failed");
                    continue
                }
            }

            let task = match definition.start(&cx, false).await {
                Ok(StartOutcome::Started(task)) => task,
                Ok(StartOutcome::Declined(reason)) => {
                    debug!(definition = definition.name(), %reason, "declined to start");
                    continue
                }
                Err(e) if e.is_cancelled() => {
                    summary.cancelled = true;
                    break
                }
                Err(e) => {
                    warn!(definition = definition.name(), %e, "start failed");
                    continue
                }
            };

            self.store.add_task(&task)?;
            held.extend(resources);
            info!(definition = definition.name(), task = %task.id, "task started");
            summary.started += 1;

            // submit on the same tick instead of waiting a full interval
            let (updated, outcome) = self.update_task(task, &current, token).await?;
            if matches!(outcome, UpdateOutcome::MarkedError) {
                summary.errored += 1;
            }
            if updated.is_active() {
                current.push(updated);
            }
        }

        Ok(summary)
    }

    /// Updates one task and persists the result. Cancellation leaves the
    /// task exactly as it was; any other failure is terminal for the task
    /// but never for the tick. Only store writes can fail the tick itself.
    async fn update_task(
        &self,
        task: Task,
        active: &[Task],
        token: &CancellationToken
    ) -> Result<(Task, UpdateOutcome), AgentError> {
        let Some(definition) = self.definition(&task.definition_name) else {
            let mut task = task;
            task.transition(
                TaskStatus::Error,
                format!("no definition named {}", task.definition_name)
            );
            self.store.update_task(&task)?;
            return Ok((task, UpdateOutcome::MarkedError))
        };

        if token.is_cancelled() {
            return Ok((task, UpdateOutcome::Skipped))
        }

        let cx = TickContext { active, token };
        match definition.update(&cx, task.clone()).await {
            Ok(updated) => {
                self.store.update_task(&updated)?;
                Ok((updated, UpdateOutcome::Advanced))
            }
            Err(e) if e.is_cancelled() => {
                debug!(task = %task.id, "update cancelled, leaving task untouched");
                Ok((task, UpdateOutcome::Skipped))
            }
            Err(e) => {
                let mut task = task;
                warn!(task = %task.id, %e, "update failed");
                task.transition(TaskStatus::Error, e.to_string());
                self.store.update_task(&task)?;
                Ok((task, UpdateOutcome::MarkedError))
            }
        }
    }
}

enum UpdateOutcome {
    Advanced,
    MarkedError,
    Skipped
}

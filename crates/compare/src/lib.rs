use anyhow::bail;
use parking_lot::RwLock;
use rota_core::scoring::evaluate_matrix;
use rota_core::Engine;
use schemars::JsonSchema;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::error;
use types::{ComparisonReport, ScheduleEnvelope, StrategyConfig, StrategyFailure, StrategyOutcome};
use uuid::Uuid;

/// Runs every strategy against the same envelope concurrently, then scores
/// all finished tables under the base envelope's rules so the ranking uses
/// one yardstick. A strategy that errors or panics becomes a recorded
/// failure; the others still rank.
pub async fn run_comparison<E: Engine>(
    engine: Arc<E>,
    base: ScheduleEnvelope,
    strategies: Vec<StrategyConfig>,
) -> anyhow::Result<ComparisonReport> {
    if !(2..=4).contains(&strategies.len()) {
        bail!(
            "comparison needs between two and four strategies, got {}",
            strategies.len()
        );
    }
    let mut labels = HashSet::new();
    for strategy in &strategies {
        if !labels.insert(strategy.label.clone()) {
            bail!("duplicate strategy label {}", strategy.label);
        }
    }

    let mut handles = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        let engine = engine.clone();
        let mut env = base.clone();
        env.rules = strategy.rules;
        env.params.refine = strategy.refine;
        handles.push((
            strategy.label,
            tokio::spawn(async move { engine.schedule(env).await }),
        ));
    }

    let mut outcomes = Vec::new();
    let mut failures = Vec::new();
    for (label, handle) in handles {
        match handle.await {
            Ok(Ok(result)) => match evaluate_matrix(&base, &result.assignments) {
                Ok(scores) => outcomes.push(StrategyOutcome {
                    label,
                    score: scores.fitness,
                    result,
                }),
                Err(e) => {
                    error!(%label, ?e, "emitted table failed re-evaluation");
                    failures.push(StrategyFailure {
                        label,
                        message: e.to_string(),
                    });
                }
            },
            Ok(Err(e)) => {
                error!(%label, ?e, "strategy failed");
                failures.push(StrategyFailure {
                    label,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                error!(%label, ?e, "strategy task panicked");
                failures.push(StrategyFailure {
                    label,
                    message: e.to_string(),
                });
            }
        }
    }

    outcomes.sort_by(|a, b| b.score.total_cmp(&a.score));
    let winner = outcomes.first().map(|o| o.label.clone());
    Ok(ComparisonReport {
        outcomes,
        failures,
        winner,
    })
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, JsonSchema)]
pub struct RunId(pub String);

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, JsonSchema)]
#[serde(tag = "status")]
pub enum RunStatus {
    Queued,
    Running,
    Finished { report: ComparisonReport },
    Failed { message: String },
}

/// Fire-and-poll registry over comparison runs.
#[derive(Clone)]
pub struct InMemRuns<E: Engine> {
    inner: Arc<RwLock<HashMap<String, RunStatus>>>,
    engine: Arc<E>,
}

impl<E: Engine> InMemRuns<E> {
    pub fn new(engine: E) -> Self {
        Self {
            inner: Default::default(),
            engine: Arc::new(engine),
        }
    }

    pub fn enqueue(&self, base: ScheduleEnvelope, strategies: Vec<StrategyConfig>) -> RunId {
        let id = Uuid::new_v4().to_string();
        self.inner.write().insert(id.clone(), RunStatus::Queued);

        let map = self.inner.clone();
        let engine = self.engine.clone();
        let id_for_task = id.clone();

        tokio::spawn(async move {
            {
                let mut w = map.write();
                w.insert(id_for_task.clone(), RunStatus::Running);
            }
            match run_comparison(engine, base, strategies).await {
                Ok(report) => {
                    map.write()
                        .insert(id_for_task, RunStatus::Finished { report });
                }
                Err(e) => {
                    error!(?e, "comparison run failed");
                    map.write().insert(
                        id_for_task,
                        RunStatus::Failed {
                            message: e.to_string(),
                        },
                    );
                }
            }
        });

        RunId(id)
    }

    pub fn get(&self, id: &str) -> Option<RunStatus> {
        self.inner.read().get(id).cloned()
    }
}

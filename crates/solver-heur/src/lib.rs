use async_trait::async_trait;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rota_core::calendar::MonthCalendar;
use rota_core::catalog::ShiftIndex;
use rota_core::scoring::compute_scores;
use rota_core::state::AssignmentState;
use rota_core::whitelist::EvalContext;
use rota_core::{config_warnings, validate, CancelToken, Engine};
use std::time::Instant;
use tracing::{info, warn};
use types::{CellValue, ScheduleEnvelope, ScheduleMetrics, ScheduleResult, ScheduleStatus};

pub mod backtrack;
pub mod balance;
pub mod construct;
pub mod refine;

pub struct HeurScheduler {
    cancel: CancelToken,
}

impl HeurScheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    /// Handle for callers that want to stop a run already in flight.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl Default for HeurScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for HeurScheduler {
    async fn schedule(&self, env: ScheduleEnvelope) -> anyhow::Result<ScheduleResult> {
        validate(&env)?;
        for warning in config_warnings(&env) {
            warn!(%warning, "configuration");
        }
        let cancel = match env.params.time_limit_ms {
            Some(limit) => self.cancel.with_time_limit_ms(limit),
            None => self.cancel.clone(),
        };
        run_pipeline(&env, &cancel)
    }
}

fn run_pipeline(env: &ScheduleEnvelope, cancel: &CancelToken) -> anyhow::Result<ScheduleResult> {
    let started = Instant::now();
    let calendar = MonthCalendar::new(env.year, env.month)
        .ok_or_else(|| anyhow::anyhow!("invalid month: {}-{:02}", env.year, env.month))?;
    let index = ShiftIndex::new(&env.catalog);
    let ctx = EvalContext {
        index: &index,
        rules: &env.rules,
        calendar: &calendar,
        carry: &env.carry_over,
    };

    let days = calendar.days_in_month() as usize;
    let mut state = AssignmentState::new(env.roster.len(), days);
    state.seed_requests(&env.roster);

    let mut rng = ChaCha8Rng::seed_from_u64(env.params.seed);
    let built = construct::build_month(&ctx, &env.roster, &env.demand, &mut state, &mut rng, cancel);
    info!(
        fill_iterations = built.fill_iterations,
        repair_attempts = built.repair_attempts,
        cancelled = built.cancelled,
        "construction finished"
    );

    let mut sweep_attempts = 0;
    if !cancel.is_cancelled() {
        sweep_attempts =
            backtrack::sweep(&ctx, &env.roster, &env.demand, &mut state, &mut rng, cancel);
    }

    let mut bal = balance::BalanceStats::default();
    if !cancel.is_cancelled() {
        bal = balance::equalize(&ctx, &env.roster, &mut state, cancel);
    }

    let mut refined = refine::RefineStats::default();
    if env.params.refine && !cancel.is_cancelled() {
        refined = refine::improve(
            &ctx,
            &env.roster,
            &env.demand,
            &mut state,
            env.params.seed,
            cancel,
        );
        info!(
            generations = refined.generations,
            local_moves = refined.local_moves,
            "refinement finished"
        );
    }

    settle_all(&mut state);

    let unresolved = backtrack::open_gaps(&ctx, &env.demand, &state);
    if !unresolved.is_empty() {
        warn!(gaps = unresolved.len(), "demand not fully covered");
    }

    let cancelled = cancel.is_cancelled();
    let status = if cancelled {
        ScheduleStatus::Heuristic
    } else if unresolved.is_empty() {
        ScheduleStatus::Complete
    } else {
        ScheduleStatus::Partial
    };

    let scores = compute_scores(&ctx, &env.roster, &state, &env.demand);
    let metrics = ScheduleMetrics {
        coverage_pct: scores.coverage_pct,
        preference_pct: scores.preference_pct,
        hard_violations: scores.hard_violations,
        off_stddev: scores.off_stddev,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    let stats = serde_json::json!({
        "method": "construct+ga",
        "fill_iterations": built.fill_iterations,
        "repair_attempts": built.repair_attempts + sweep_attempts,
        "balance_rounds": bal.rounds,
        "balance_swaps": bal.swaps,
        "generations": refined.generations,
        "local_moves": refined.local_moves,
        "cancelled": cancelled,
    });

    Ok(ScheduleResult {
        status,
        fitness: scores.fitness,
        assignments: state.to_matrix(&env.roster),
        unresolved,
        metrics,
        stats,
    })
}

fn settle_all(state: &mut AssignmentState) {
    for s in 0..state.staff_count() {
        for day in 0..state.days() {
            if state.is_open(s, day) {
                state.assign(s, day, CellValue::Off);
            }
        }
    }
}

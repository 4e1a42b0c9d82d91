use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rota_core::catalog::ShiftIndex;
use rota_core::state::AssignmentState;
use rota_core::whitelist::{permissible, EvalContext};
use rota_core::CancelToken;
use types::{CellValue, DemandTable, ShiftCategory, ShiftCode, Staff};

use crate::backtrack;

const OFF_BALANCE_AMPLIFIER: f64 = 2.0;
const FILL_JITTER: f64 = 0.25;

#[derive(Debug, Default)]
pub struct ConstructStats {
    pub fill_iterations: u32,
    pub repair_attempts: u32,
    pub cancelled: bool,
}

/// Shift codes in demand-fill order: catalog order within a category,
/// categories per the configured priority, unlisted categories last.
pub(crate) fn fill_order(index: &ShiftIndex, priority: &[ShiftCategory]) -> Vec<ShiftCode> {
    let rank = |category: ShiftCategory| {
        priority
            .iter()
            .position(|&p| p == category)
            .unwrap_or(priority.len())
    };
    let mut codes: Vec<(usize, ShiftCode)> = index
        .defs()
        .iter()
        .map(|d| (rank(d.category), d.code.clone()))
        .collect();
    codes.sort_by_key(|(r, _)| *r);
    codes.into_iter().map(|(_, c)| c).collect()
}

fn rotates_forward(prev: ShiftCategory, next: ShiftCategory) -> bool {
    matches!(
        (prev, next),
        (ShiftCategory::Day, ShiftCategory::Evening)
            | (ShiftCategory::Evening, ShiftCategory::Night)
    )
}

/// One forward pass over the month. Per day: carry yesterday's shift where
/// legal, fill demand by score, swap for fairness, repair leftovers by
/// backtracking, trim surplus and settle the day to rest.
pub fn build_month(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    demand: &DemandTable,
    state: &mut AssignmentState,
    rng: &mut ChaCha8Rng,
    cancel: &CancelToken,
) -> ConstructStats {
    let mut stats = ConstructStats::default();
    for day in 0..state.days() {
        if cancel.is_cancelled() {
            stats.cancelled = true;
            break;
        }
        foundation(ctx, roster, state, day, rng);
        stats.fill_iterations += scored_fill(ctx, roster, demand, state, day, rng);
        rebalance_swap(ctx, roster, state, day);
        stats.repair_attempts += backtrack::repair_day(ctx, roster, demand, state, day, rng);
        trim_surplus(ctx, demand, state, day);
        settle_day(state, day);
    }
    stats
}

/// Inertia cycle: whoever worked yesterday keeps the same shift today when
/// the whitelist still allows it.
fn foundation(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    state: &mut AssignmentState,
    day: usize,
    rng: &mut ChaCha8Rng,
) {
    let mut order: Vec<usize> = (0..roster.len()).collect();
    order.shuffle(rng);
    for idx in order {
        if !state.is_open(idx, day) {
            continue;
        }
        let carry = ctx.carry_for(&roster[idx].id);
        let Some(prev) = state.previous_shift(idx, day, &carry) else {
            continue;
        };
        if permissible(ctx, state, &roster[idx], idx, day).allows_shift(&prev) {
            state.assign(idx, day, CellValue::Shift(prev));
        }
    }
}

fn fill_score(
    ctx: &EvalContext<'_>,
    state: &AssignmentState,
    roster: &[Staff],
    idx: usize,
    day: usize,
    code: &ShiftCode,
    mean_off: f64,
    rng: &mut ChaCha8Rng,
) -> f64 {
    let policy = &ctx.rules.policy;
    let deviation = state.counters(idx).off_days as f64 - mean_off;
    let amplified = if deviation.abs() > policy.off_tolerance {
        deviation * OFF_BALANCE_AMPLIFIER
    } else {
        deviation
    };
    let mut score = policy.balance_weight * amplified;

    let carry = ctx.carry_for(&roster[idx].id);
    if let Some(prev) = state.previous_shift(idx, day, &carry) {
        if &prev == code {
            score += policy.continuity_weight;
        } else if let (Some(pc), Some(nc)) = (ctx.index.category(&prev), ctx.index.category(code)) {
            if rotates_forward(pc, nc) {
                score += policy.rotation_weight;
            }
        }
    }
    score + rng.gen_range(0.0..FILL_JITTER)
}

/// Demand-fill cycle: close each staffing gap with the best-scoring open,
/// whitelist-eligible staff member. Returns iterations spent.
fn scored_fill(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    demand: &DemandTable,
    state: &mut AssignmentState,
    day: usize,
    rng: &mut ChaCha8Rng,
) -> u32 {
    let weekday = ctx.calendar.weekday(day);
    let cap = ctx.rules.search.fill_iteration_cap;
    let mut iterations = 0u32;

    for code in fill_order(ctx.index, &ctx.rules.policy.fill_priority) {
        let required = demand.required(&code, day as u8 + 1, weekday);
        while state.assigned_count(day, &code) < required {
            if iterations >= cap {
                return iterations;
            }
            iterations += 1;

            let offs = state.off_counts();
            let mean_off = offs.iter().map(|&o| o as f64).sum::<f64>() / offs.len().max(1) as f64;

            let mut best: Option<(f64, usize)> = None;
            for (idx, staff) in roster.iter().enumerate() {
                if !state.is_open(idx, day) {
                    continue;
                }
                if !permissible(ctx, state, staff, idx, day).allows_shift(&code) {
                    continue;
                }
                let score = fill_score(ctx, state, roster, idx, day, &code, mean_off, rng);
                if best.map_or(true, |(b, _)| score > b) {
                    best = Some((score, idx));
                }
            }
            match best {
                Some((_, idx)) => state.assign(idx, day, CellValue::Shift(code.clone())),
                None => break,
            }
        }
    }
    iterations
}

/// Fairness cycle: relieve staff short on days off by handing today's shift
/// to an off-rich colleague who is still open, when their whitelist takes it.
fn rebalance_swap(ctx: &EvalContext<'_>, roster: &[Staff], state: &mut AssignmentState, day: usize) {
    let tolerance = ctx.rules.policy.off_tolerance;
    for under in 0..roster.len() {
        let offs = state.off_counts();
        let mean = offs.iter().map(|&o| o as f64).sum::<f64>() / offs.len().max(1) as f64;
        if offs[under] as f64 >= mean - tolerance {
            continue;
        }
        if state.is_locked(under, day) {
            continue;
        }
        let Some(CellValue::Shift(code)) = state.cell(under, day).cloned() else {
            continue;
        };

        for over in 0..roster.len() {
            if over == under || !state.is_open(over, day) {
                continue;
            }
            if (offs[over] as f64) <= mean + tolerance {
                continue;
            }
            if !permissible(ctx, state, &roster[over], over, day).allows_shift(&code) {
                continue;
            }
            state.assign(over, day, CellValue::Shift(code.clone()));
            state.assign(under, day, CellValue::Off);
            break;
        }
    }
}

/// Over-demand staff go back to rest, fewest accumulated off-days first.
fn trim_surplus(ctx: &EvalContext<'_>, demand: &DemandTable, state: &mut AssignmentState, day: usize) {
    let weekday = ctx.calendar.weekday(day);
    for code in ctx.index.codes() {
        let required = demand.required(code, day as u8 + 1, weekday);
        while state.assigned_count(day, code) > required {
            let victim = (0..state.staff_count())
                .filter(|&s| !state.is_locked(s, day))
                .filter(|&s| matches!(state.cell(s, day), Some(CellValue::Shift(c)) if c == code))
                .min_by_key(|&s| state.counters(s).off_days);
            match victim {
                Some(s) => state.assign(s, day, CellValue::Off),
                None => break,
            }
        }
    }
}

fn settle_day(state: &mut AssignmentState, day: usize) {
    for s in 0..state.staff_count() {
        if state.is_open(s, day) {
            state.assign(s, day, CellValue::Off);
        }
    }
}

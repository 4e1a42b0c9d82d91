use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rota_core::state::AssignmentState;
use rota_core::whitelist::{permissible, EvalContext};
use rota_core::CancelToken;
use types::{CellValue, DemandTable, ShiftCode, Staff, StaffingGap};

use crate::construct::fill_order;

/// Staffing gaps still open in the table, in demand-fill order per day.
pub fn open_gaps(
    ctx: &EvalContext<'_>,
    demand: &DemandTable,
    state: &AssignmentState,
) -> Vec<StaffingGap> {
    let mut gaps = Vec::new();
    for day in 0..state.days() {
        let weekday = ctx.calendar.weekday(day);
        for code in fill_order(ctx.index, &ctx.rules.policy.fill_priority) {
            let required = demand.required(&code, day as u8 + 1, weekday);
            let assigned = state.assigned_count(day, &code);
            if assigned < required {
                gaps.push(StaffingGap {
                    day: day as u8 + 1,
                    shift: code,
                    missing: required - assigned,
                });
            }
        }
    }
    gaps
}

/// Close the remaining gaps on one day by direct fill or by freeing a nearby
/// earlier assignment. Returns the attempts spent.
pub fn repair_day(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    demand: &DemandTable,
    state: &mut AssignmentState,
    day: usize,
    rng: &mut ChaCha8Rng,
) -> u32 {
    let weekday = ctx.calendar.weekday(day);
    let depth = ctx.rules.search.backtrack_depth;
    let cap = ctx.rules.search.backtrack_attempts;
    let mut total = 0u32;

    for code in fill_order(ctx.index, &ctx.rules.policy.fill_priority) {
        let required = demand.required(&code, day as u8 + 1, weekday);
        while state.assigned_count(day, &code) < required {
            let mut attempts = 0u32;
            let filled = fill_one(
                ctx,
                roster,
                demand,
                state,
                day,
                &code,
                depth,
                &mut attempts,
                cap,
                rng,
            );
            total += attempts;
            if !filled {
                break;
            }
        }
    }
    total
}

/// Sweep every day once more after construction; later days may have become
/// fillable once earlier ones settled.
pub fn sweep(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    demand: &DemandTable,
    state: &mut AssignmentState,
    rng: &mut ChaCha8Rng,
    cancel: &CancelToken,
) -> u32 {
    let mut total = 0u32;
    for day in 0..state.days() {
        if cancel.is_cancelled() {
            break;
        }
        total += repair_day(ctx, roster, demand, state, day, rng);
    }
    total
}

fn takeable(state: &AssignmentState, idx: usize, day: usize) -> bool {
    if state.is_locked(idx, day) {
        return false;
    }
    matches!(
        state.cell(idx, day),
        None | Some(CellValue::Off) | Some(CellValue::Forbidden(_))
    )
}

#[allow(clippy::too_many_arguments)]
fn fill_one(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    demand: &DemandTable,
    state: &mut AssignmentState,
    day: usize,
    code: &ShiftCode,
    depth: u32,
    attempts: &mut u32,
    cap: u32,
    rng: &mut ChaCha8Rng,
) -> bool {
    if *attempts >= cap {
        return false;
    }
    *attempts += 1;

    let mut order: Vec<usize> = (0..roster.len()).collect();
    order.shuffle(rng);

    for &idx in &order {
        if !takeable(state, idx, day) {
            continue;
        }
        if permissible(ctx, state, &roster[idx], idx, day).allows_shift(code) {
            state.assign(idx, day, CellValue::Shift(code.clone()));
            return true;
        }
    }

    if depth == 0 {
        return false;
    }

    // Nobody can take the gap directly. Free someone from a nearby earlier
    // day and let them take it, then refill the day they left.
    for back in 1..=(depth as usize).min(day) {
        let earlier = day - back;
        for &idx in &order {
            if *attempts >= cap {
                return false;
            }
            if state.is_locked(idx, earlier) || !takeable(state, idx, day) {
                continue;
            }
            let Some(CellValue::Shift(freed)) = state.cell(idx, earlier).cloned() else {
                continue;
            };

            let snapshot = state.clone();
            state.assign(idx, earlier, CellValue::Off);
            if !permissible(ctx, state, &roster[idx], idx, day).allows_shift(code) {
                *state = snapshot;
                continue;
            }
            *attempts += 1;
            state.assign(idx, day, CellValue::Shift(code.clone()));

            let earlier_weekday = ctx.calendar.weekday(earlier);
            let needed = demand.required(&freed, earlier as u8 + 1, earlier_weekday);
            if state.assigned_count(earlier, &freed) >= needed
                || fill_one(
                    ctx,
                    roster,
                    demand,
                    state,
                    earlier,
                    &freed,
                    depth - 1,
                    attempts,
                    cap,
                    rng,
                )
            {
                return true;
            }
            *state = snapshot;
        }
    }
    false
}

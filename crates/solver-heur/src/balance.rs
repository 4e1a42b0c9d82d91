use rota_core::scoring::off_day_stddev;
use rota_core::state::AssignmentState;
use rota_core::whitelist::{permissible, EvalContext};
use rota_core::CancelToken;
use types::{CellValue, Staff};

#[derive(Debug, Default)]
pub struct BalanceStats {
    pub rounds: u32,
    pub swaps: u32,
}

/// Split the month into `count` contiguous day ranges of near-equal length.
fn segment_ranges(total: usize, count: u32) -> Vec<(usize, usize)> {
    let count = (count.max(1) as usize).min(total.max(1));
    let base = total / count;
    let remainder = total % count;
    let mut ranges = Vec::with_capacity(count);
    let mut start = 0;
    for i in 0..count {
        let len = base + usize::from(i < remainder);
        ranges.push((start, start + len));
        start += len;
    }
    ranges
}

/// Even out off-day counts by trading single days between the most and the
/// least rested staff. Stops early once the spread drops under the
/// configured threshold, or when a full round finds nothing to trade.
pub fn equalize(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    state: &mut AssignmentState,
    cancel: &CancelToken,
) -> BalanceStats {
    let fairness = &ctx.rules.fairness;
    let segments = segment_ranges(state.days(), ctx.rules.search.balance_segments);
    let mut stats = BalanceStats::default();

    for _ in 0..fairness.balance_rounds {
        if cancel.is_cancelled() {
            break;
        }
        if off_day_stddev(&state.off_counts()) <= fairness.stddev_threshold {
            break;
        }
        stats.rounds += 1;

        let mut swapped = false;
        for &(start, end) in &segments {
            if try_swap(ctx, roster, state, start, end) {
                stats.swaps += 1;
                swapped = true;
            }
        }
        if !swapped {
            break;
        }
    }
    stats
}

/// One trade inside a day range: the most rested staff member takes a shift
/// off the least rested one, who goes to rest instead. Only committed when
/// the receiving whitelist accepts the shift.
fn try_swap(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    state: &mut AssignmentState,
    start: usize,
    end: usize,
) -> bool {
    let offs = state.off_counts();
    let mut by_offs: Vec<usize> = (0..roster.len()).collect();
    by_offs.sort_by_key(|&s| offs[s]);

    for &poor in &by_offs {
        for &rich in by_offs.iter().rev() {
            if offs[rich] <= offs[poor] + 1 {
                break;
            }
            for day in start..end {
                if state.is_locked(poor, day) || state.is_locked(rich, day) {
                    continue;
                }
                let Some(CellValue::Shift(code)) = state.cell(poor, day).cloned() else {
                    continue;
                };
                if state.cell(rich, day) != Some(&CellValue::Off) {
                    continue;
                }
                if !permissible(ctx, state, &roster[rich], rich, day).allows_shift(&code) {
                    continue;
                }
                state.assign(rich, day, CellValue::Shift(code));
                state.assign(poor, day, CellValue::Off);
                return true;
            }
        }
    }
    false
}

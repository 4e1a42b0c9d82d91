use crate::calendar::MonthCalendar;
use crate::catalog::{overlaps_night_window, rest_minutes_between, ShiftIndex};
use crate::state::AssignmentState;
use crate::whitelist::EvalContext;
use std::collections::{BTreeMap, BTreeSet};
use types::{CellValue, DayRequest, DemandTable, ScheduleEnvelope, ShiftCategory, Staff, StaffId};

pub const FITNESS_BASE: f64 = 1000.0;
pub const HARD_VIOLATION_PENALTY: f64 = 50.0;
pub const COVERAGE_WEIGHT: f64 = 3.0;
pub const PREFERENCE_WEIGHT: f64 = 2.0;

#[derive(Clone, Debug, Default)]
pub struct Scores {
    pub coverage_pct: f64,
    pub preference_pct: f64,
    pub hard_violations: u32,
    pub soft_penalty: f64,
    pub off_stddev: f64,
    pub fitness: f64,
}

pub fn off_day_stddev(off_counts: &[u32]) -> f64 {
    if off_counts.is_empty() {
        return 0.0;
    }
    let n = off_counts.len() as f64;
    let mean = off_counts.iter().map(|&c| c as f64).sum::<f64>() / n;
    let var = off_counts
        .iter()
        .map(|&c| {
            let d = c as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var.sqrt()
}

fn category_rank(category: ShiftCategory) -> u8 {
    match category {
        ShiftCategory::Day => 0,
        ShiftCategory::Evening => 1,
        ShiftCategory::Night => 2,
    }
}

fn coverage(ctx: &EvalContext<'_>, state: &AssignmentState, demand: &DemandTable) -> f64 {
    let mut required_total = 0u64;
    let mut covered = 0u64;
    for day in 0..state.days() {
        let weekday = ctx.calendar.weekday(day);
        for code in ctx.index.codes() {
            let required = demand.required(code, day as u8 + 1, weekday);
            if required == 0 {
                continue;
            }
            required_total += required as u64;
            covered += state.assigned_count(day, code).min(required) as u64;
        }
    }
    if required_total == 0 {
        100.0
    } else {
        100.0 * covered as f64 / required_total as f64
    }
}

fn preference_satisfaction(roster: &[Staff], state: &AssignmentState) -> f64 {
    let mut considered = 0u64;
    let mut satisfied = 0u64;
    for (idx, staff) in roster.iter().enumerate() {
        let prefs = &staff.prefs;
        let bundle = prefs.bundle.as_ref().filter(|_| staff.params.can_bundle);
        if bundle.is_none() && prefs.favorites.is_empty() {
            continue;
        }
        for day in 0..state.days() {
            let Some(code) = state.cell(idx, day).and_then(|v| v.shift_code()) else {
                continue;
            };
            considered += 1;
            let hit = match bundle {
                Some(bundle) => bundle == code,
                None => prefs.favorites.contains(code),
            };
            if hit {
                satisfied += 1;
            }
        }
    }
    if considered == 0 {
        100.0
    } else {
        100.0 * satisfied as f64 / considered as f64
    }
}

/// Occurrence count of broken hard rules: rest gaps (including the month
/// boundary), consecutive-day overruns, protected-night assignments, more
/// than two categories in one rule week, and trampled requests.
pub fn count_hard_violations(ctx: &EvalContext<'_>, roster: &[Staff], state: &AssignmentState) -> u32 {
    let hard = &ctx.rules.hard;
    let min_rest = hard.min_rest_hours as i64 * 60;
    let mut violations = 0u32;

    for (idx, staff) in roster.iter().enumerate() {
        let carry = ctx.carry_for(&staff.id);
        let cap = if ctx.rules.policy.long_leave_adjust && staff.params.long_leave {
            ctx.rules.policy.long_leave_max_consecutive
        } else {
            ctx.rules.policy.max_consecutive_days
        };

        let mut streak = carry.consecutive_work_days;
        let mut prev_def = carry.last_shift.as_ref().and_then(|c| ctx.index.get(c));

        for day in 0..state.days() {
            let def = state
                .cell(idx, day)
                .and_then(|v| v.shift_code())
                .and_then(|c| ctx.index.get(c));

            match def {
                Some(def) => {
                    if hard.min_rest {
                        if let Some(prev) = prev_def {
                            if rest_minutes_between(prev, def) < min_rest {
                                violations += 1;
                            }
                        }
                    }
                    if hard.protect_pregnant
                        && staff.params.protection.is_active_on(ctx.calendar.date(day))
                        && overlaps_night_window(def)
                    {
                        violations += 1;
                    }
                    streak += 1;
                    if streak > cap {
                        violations += 1;
                    }
                }
                None => streak = 0,
            }
            prev_def = def;
        }

        if hard.max_diversity {
            let mut week_categories: BTreeMap<usize, BTreeSet<ShiftCategory>> = BTreeMap::new();
            for day in 0..state.days() {
                if let Some(category) = state
                    .cell(idx, day)
                    .and_then(|v| v.shift_code())
                    .and_then(|c| ctx.index.category(c))
                {
                    let (week_start, _) = ctx.calendar.week_bounds(day, hard.week_start);
                    week_categories.entry(week_start).or_default().insert(category);
                }
            }
            violations += week_categories.values().filter(|c| c.len() >= 3).count() as u32;
        }

        for (&day1, request) in &staff.requests {
            let day = day1 as usize;
            if day == 0 || day > state.days() {
                continue;
            }
            let cell = state.cell(idx, day - 1);
            let broken = match request {
                DayRequest::OffRequested => !matches!(cell, Some(v) if v.is_off()),
                DayRequest::Require(code) => {
                    !matches!(cell, Some(CellValue::Shift(c)) if c == code)
                }
                DayRequest::Avoid(code) => {
                    matches!(cell, Some(CellValue::Shift(c)) if c == code)
                }
            };
            if broken {
                violations += 1;
            }
        }
    }
    violations
}

fn soft_penalty(ctx: &EvalContext<'_>, roster: &[Staff], state: &AssignmentState, off_stddev: f64) -> f64 {
    let policy = &ctx.rules.policy;
    let mut continuity_breaks = 0u32;
    let mut rotation_backsteps = 0u32;

    for (idx, staff) in roster.iter().enumerate() {
        let carry = ctx.carry_for(&staff.id);
        let mut prev = carry.last_shift.clone();
        for day in 0..state.days() {
            let current = state.cell(idx, day).and_then(|v| v.shift_code()).cloned();
            if let (Some(a), Some(b)) = (&prev, &current) {
                if a != b {
                    continuity_breaks += 1;
                    if let (Some(ca), Some(cb)) = (ctx.index.category(a), ctx.index.category(b)) {
                        if category_rank(cb) < category_rank(ca) {
                            rotation_backsteps += 1;
                        }
                    }
                }
            }
            prev = current;
        }
    }

    policy.balance_weight * off_stddev
        + policy.continuity_weight * continuity_breaks as f64
        + policy.rotation_weight * rotation_backsteps as f64
}

/// Full evaluation of one assignment table. Pure; shared by the pipeline,
/// the refinement loop, and cross-strategy ranking.
pub fn compute_scores(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    state: &AssignmentState,
    demand: &DemandTable,
) -> Scores {
    let coverage_pct = coverage(ctx, state, demand);
    let preference_pct = preference_satisfaction(roster, state);
    let hard_violations = count_hard_violations(ctx, roster, state);
    let off_stddev = off_day_stddev(&state.off_counts());
    let soft = soft_penalty(ctx, roster, state, off_stddev);

    let fitness = FITNESS_BASE - hard_violations as f64 * HARD_VIOLATION_PENALTY - soft
        + coverage_pct * COVERAGE_WEIGHT
        + preference_pct * PREFERENCE_WEIGHT;

    Scores {
        coverage_pct,
        preference_pct,
        hard_violations,
        soft_penalty: soft,
        off_stddev,
        fitness,
    }
}

/// Rebuilds a state from an emitted matrix and scores it against an
/// envelope. Lets a caller re-rank finished schedules under one common rule
/// set, or explain a manually edited table.
pub fn evaluate_matrix(
    envelope: &ScheduleEnvelope,
    matrix: &BTreeMap<StaffId, BTreeMap<u8, CellValue>>,
) -> anyhow::Result<Scores> {
    let calendar = MonthCalendar::new(envelope.year, envelope.month)
        .ok_or_else(|| anyhow::anyhow!("invalid year-month {}-{}", envelope.year, envelope.month))?;
    let index = ShiftIndex::new(&envelope.catalog);
    let days = calendar.days_in_month() as usize;
    let mut state = AssignmentState::new(envelope.roster.len(), days);

    for (idx, staff) in envelope.roster.iter().enumerate() {
        let row = matrix
            .get(&staff.id)
            .ok_or_else(|| anyhow::anyhow!("matrix is missing staff {}", staff.id))?;
        for (&day1, value) in row {
            let day = day1 as usize;
            if day == 0 || day > days {
                anyhow::bail!("matrix day {day1} outside 1..={days} for staff {}", staff.id);
            }
            if let Some(code) = value.shift_code() {
                if index.get(code).is_none() {
                    anyhow::bail!("matrix references unknown shift {code}");
                }
            }
            state.assign(idx, day - 1, value.clone());
        }
    }

    let ctx = EvalContext {
        index: &index,
        rules: &envelope.rules,
        calendar: &calendar,
        carry: &envelope.carry_over,
    };
    Ok(compute_scores(&ctx, &envelope.roster, &state, &envelope.demand))
}

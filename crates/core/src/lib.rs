pub mod calendar;
pub mod cancel;
pub mod catalog;
pub mod scoring;
pub mod state;
pub mod whitelist;

use async_trait::async_trait;
use thiserror::Error;

use crate::calendar::MonthCalendar;
use crate::catalog::{overlaps_night_window, rest_minutes_between, ShiftIndex};

pub use cancel::CancelToken;
pub use types::{
    CarryOver, CellValue, ComparisonReport, DayRequest, DemandTable, EngineParams, Rules,
    ScheduleEnvelope, ScheduleMetrics, ScheduleResult, ScheduleStatus, ShiftCategory, ShiftCode,
    ShiftDefinition, Staff, StaffId, StaffingGap, StrategyConfig, StrategyFailure, StrategyOutcome,
};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid envelope: {0}")]
    Msg(String),
}

pub fn validate(env: &ScheduleEnvelope) -> Result<(), ValidationError> {
    let mut errors: Vec<String> = Vec::new();

    let calendar = MonthCalendar::new(env.year, env.month);
    if calendar.is_none() {
        errors.push(format!("invalid year-month {}-{:02}", env.year, env.month));
    }
    let days = calendar.as_ref().map(|c| c.days_in_month());

    if env.roster.is_empty() {
        errors.push("roster is empty".into());
    }
    if env.catalog.is_empty() {
        errors.push("shift catalog is empty".into());
    }

    fn chk_unique<I: ToString>(name: &str, ids: impl Iterator<Item = I>, errors: &mut Vec<String>) {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for id in ids {
            let s = id.to_string();
            if !seen.insert(s.clone()) {
                errors.push(format!("duplicate {name}: {s}"));
            }
        }
    }
    chk_unique("staff id", env.roster.iter().map(|s| &s.id.0), &mut errors);
    chk_unique(
        "shift code",
        env.catalog.iter().map(|d| &d.code.0),
        &mut errors,
    );

    for def in &env.catalog {
        if def.start.normalized() == def.end.normalized() {
            errors.push(format!("shift {} has equal start and end", def.code));
        }
    }

    if env.rules.hard.week_start > 6 {
        errors.push(format!(
            "week_start {} outside 0..=6",
            env.rules.hard.week_start
        ));
    }
    if env.rules.policy.max_consecutive_days == 0 {
        errors.push("max_consecutive_days is 0; nobody could ever work".into());
    }

    let index = ShiftIndex::new(&env.catalog);
    let known = |code: &ShiftCode| index.get(code).is_some();
    let min_rest = env.rules.hard.min_rest_hours as i64 * 60;

    for staff in &env.roster {
        if let Some(bundle) = &staff.prefs.bundle {
            if !known(bundle) {
                errors.push(format!(
                    "staff {} bundle references unknown shift {bundle}",
                    staff.id
                ));
            } else if env.rules.policy.bundle_night_only
                && index.category(bundle) != Some(ShiftCategory::Night)
            {
                errors.push(format!(
                    "staff {} bundle {bundle} is not a night shift",
                    staff.id
                ));
            }
        }
        for code in &staff.prefs.favorites {
            if !known(code) {
                errors.push(format!(
                    "staff {} favorite references unknown shift {code}",
                    staff.id
                ));
            }
        }

        for (&day, request) in &staff.requests {
            if day == 0 || days.map_or(false, |d| day > d) {
                errors.push(format!(
                    "staff {} has a request on day {day} outside the month",
                    staff.id
                ));
                continue;
            }
            match request {
                DayRequest::Require(code) | DayRequest::Avoid(code) if !known(code) => {
                    errors.push(format!(
                        "staff {} request references unknown shift {code}",
                        staff.id
                    ));
                }
                _ => {}
            }
        }

        // Contradictions no later stage can repair.
        if env.rules.hard.min_rest {
            for (&day, request) in &staff.requests {
                let DayRequest::Require(first) = request else {
                    continue;
                };
                let Some(next) = day.checked_add(1) else {
                    continue;
                };
                let Some(DayRequest::Require(second)) = staff.requests.get(&next) else {
                    continue;
                };
                if let (Some(a), Some(b)) = (index.get(first), index.get(second)) {
                    if rest_minutes_between(a, b) < min_rest {
                        errors.push(format!(
                            "staff {} required shifts {first} and {second} on days {day}-{next} break minimum rest",
                            staff.id
                        ));
                    }
                }
            }
        }
        if env.rules.hard.protect_pregnant {
            if let Some(cal) = &calendar {
                for (&day, request) in &staff.requests {
                    let DayRequest::Require(code) = request else {
                        continue;
                    };
                    if day == 0 || day > cal.days_in_month() {
                        continue;
                    }
                    let Some(def) = index.get(code) else {
                        continue;
                    };
                    if staff.params.protection.is_active_on(cal.date(day as usize - 1))
                        && overlaps_night_window(def)
                    {
                        errors.push(format!(
                            "staff {} is protected on day {day} but required onto night shift {code}",
                            staff.id
                        ));
                    }
                }
            }
        }
    }

    use std::collections::HashSet;
    let roster_ids: HashSet<_> = env.roster.iter().map(|s| &s.id).collect();
    for (id, carry) in &env.carry_over {
        if !roster_ids.contains(id) {
            errors.push(format!("carry-over references unknown staff {id}"));
        }
        if let Some(code) = &carry.last_shift {
            if !known(code) {
                errors.push(format!(
                    "carry-over for {id} references unknown shift {code}"
                ));
            }
        }
    }

    for (code, row) in &env.demand.weekly {
        if !known(code) {
            errors.push(format!("demand references unknown shift {code}"));
        }
        if row.len() != 7 {
            errors.push(format!(
                "weekly demand for {code} has {} entries, expected 7",
                row.len()
            ));
        }
    }
    for (code, by_day) in &env.demand.daily {
        if !known(code) {
            errors.push(format!("demand references unknown shift {code}"));
        }
        for &day in by_day.keys() {
            if day == 0 || days.map_or(false, |d| day > d) {
                errors.push(format!(
                    "daily demand for {code} on day {day} outside the month"
                ));
            }
        }
    }

    let policy = &env.rules.policy;
    for (name, value) in [
        ("off_tolerance", policy.off_tolerance),
        ("balance_weight", policy.balance_weight),
        ("continuity_weight", policy.continuity_weight),
        ("rotation_weight", policy.rotation_weight),
        ("stddev_threshold", env.rules.fairness.stddev_threshold),
    ] {
        if value < 0.0 {
            errors.push(format!("{name} {value} is negative"));
        }
    }
    let search = &env.rules.search;
    for (name, rate) in [
        ("crossover_rate", search.crossover_rate),
        ("mutation_rate", search.mutation_rate),
    ] {
        if !(0.0..=1.0).contains(&rate) {
            errors.push(format!("{name} {rate} outside 0..=1"));
        }
    }
    if env.params.refine && search.population < 2 {
        errors.push(format!(
            "population {} is too small to refine",
            search.population
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Msg(errors.join("; ")))
    }
}

/// Non-fatal envelope smells, logged by engines before a run starts.
pub fn config_warnings(env: &ScheduleEnvelope) -> Vec<String> {
    let mut warnings = Vec::new();
    for staff in &env.roster {
        if staff.prefs.bundle.is_some() && !staff.prefs.favorites.is_empty() {
            warnings.push(format!(
                "staff {} sets both a bundle and favorites; the bundle takes precedence",
                staff.id
            ));
        }
        if staff.prefs.bundle.is_some() && !staff.params.can_bundle {
            warnings.push(format!(
                "staff {} sets a bundle but is not bundle-capable; favorites apply",
                staff.id
            ));
        }
    }
    if env.demand.is_empty() {
        warnings.push("demand table is empty; only requests and days off will be placed".into());
    }
    warnings
}

#[async_trait]
pub trait Engine: Send + Sync + 'static {
    async fn schedule(&self, env: ScheduleEnvelope) -> anyhow::Result<ScheduleResult>;
}

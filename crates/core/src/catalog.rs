use std::collections::HashMap;
use types::{ClockTime, ShiftCategory, ShiftCode, ShiftDefinition};

pub const NIGHT_WINDOW_START: i64 = 22 * 60;
pub const NIGHT_WINDOW_END: i64 = 6 * 60;

const MINUTES_PER_DAY: i64 = ClockTime::MINUTES_PER_DAY as i64;

/// Catalog lookups by code. Built once per run.
#[derive(Clone, Debug)]
pub struct ShiftIndex {
    defs: Vec<ShiftDefinition>,
    by_code: HashMap<ShiftCode, usize>,
}

impl ShiftIndex {
    pub fn new(catalog: &[ShiftDefinition]) -> Self {
        let defs: Vec<ShiftDefinition> = catalog.to_vec();
        let by_code = defs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.code.clone(), i))
            .collect();
        Self { defs, by_code }
    }

    pub fn get(&self, code: &ShiftCode) -> Option<&ShiftDefinition> {
        self.by_code.get(code).map(|&i| &self.defs[i])
    }

    pub fn category(&self, code: &ShiftCode) -> Option<ShiftCategory> {
        self.get(code).map(|d| d.category)
    }

    pub fn defs(&self) -> &[ShiftDefinition] {
        &self.defs
    }

    pub fn codes(&self) -> impl Iterator<Item = &ShiftCode> {
        self.defs.iter().map(|d| &d.code)
    }
}

fn spans_overlap(a0: i64, a1: i64, b0: i64, b1: i64) -> bool {
    a0 < b1 && b0 < a1
}

/// Whether any part of the shift falls inside 22:00-06:00, over the wrapped
/// 24h range. Half-open intervals, so a shift ending exactly 22:00 is clear.
pub fn overlaps_night_window(def: &ShiftDefinition) -> bool {
    let start = def.start.normalized() as i64;
    let end = start + def.duration_minutes() as i64;
    // The window as seen from this day's axis: tonight's instance and the
    // tail of last night's reaching past midnight.
    spans_overlap(start, end, NIGHT_WINDOW_START, MINUTES_PER_DAY + NIGHT_WINDOW_END)
        || spans_overlap(start, end, NIGHT_WINDOW_START - MINUTES_PER_DAY, NIGHT_WINDOW_END)
}

/// Rest between a shift worked on day d and one worked on day d+1, in
/// minutes. Negative means the two overlap outright.
pub fn rest_minutes_between(earlier: &ShiftDefinition, later: &ShiftDefinition) -> i64 {
    let end_abs = if earlier.is_overnight() {
        MINUTES_PER_DAY + earlier.end.normalized() as i64
    } else {
        earlier.end.minutes() as i64
    };
    let start_abs = MINUTES_PER_DAY + later.start.minutes() as i64;
    start_abs - end_abs
}

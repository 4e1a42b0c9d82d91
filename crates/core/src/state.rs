use std::collections::BTreeMap;
use types::{CarryOver, CellValue, DayRequest, ShiftCode, Staff, StaffId};

/// Per-staff running totals. A cache over the cell table: every read must
/// agree with a full recount.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaffCounters {
    pub off_days: u32,
    pub work_days: u32,
    pub per_shift: BTreeMap<ShiftCode, u32>,
}

impl StaffCounters {
    fn add(&mut self, value: &CellValue) {
        match value {
            CellValue::Shift(code) => {
                self.work_days += 1;
                *self.per_shift.entry(code.clone()).or_insert(0) += 1;
            }
            _ => self.off_days += 1,
        }
    }

    fn remove(&mut self, value: &CellValue) {
        match value {
            CellValue::Shift(code) => {
                self.work_days -= 1;
                if let Some(n) = self.per_shift.get_mut(code) {
                    *n -= 1;
                    if *n == 0 {
                        self.per_shift.remove(code);
                    }
                }
            }
            _ => self.off_days -= 1,
        }
    }
}

/// The month's cell table, staff-major. `None` cells are still open;
/// construction settles every cell before the run ends.
#[derive(Clone, Debug)]
pub struct AssignmentState {
    days: usize,
    cells: Vec<Vec<Option<CellValue>>>,
    locked: Vec<Vec<bool>>,
    counters: Vec<StaffCounters>,
}

impl AssignmentState {
    pub fn new(staff_count: usize, days: usize) -> Self {
        Self {
            days,
            cells: vec![vec![None; days]; staff_count],
            locked: vec![vec![false; days]; staff_count],
            counters: vec![StaffCounters::default(); staff_count],
        }
    }

    pub fn days(&self) -> usize {
        self.days
    }

    pub fn staff_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, staff: usize, day: usize) -> Option<&CellValue> {
        self.cells[staff][day].as_ref()
    }

    /// Open cells may still take an assignment: empty, or holding only a
    /// forbidden-shift marker.
    pub fn is_open(&self, staff: usize, day: usize) -> bool {
        matches!(self.cells[staff][day], None | Some(CellValue::Forbidden(_)))
    }

    pub fn is_locked(&self, staff: usize, day: usize) -> bool {
        self.locked[staff][day]
    }

    pub fn lock(&mut self, staff: usize, day: usize) {
        self.locked[staff][day] = true;
    }

    /// Sole mutation point. Keeps the counters in step with the cell table.
    pub fn assign(&mut self, staff: usize, day: usize, value: CellValue) {
        debug_assert!(!self.locked[staff][day], "assignment to a locked cell");
        if let Some(old) = self.cells[staff][day].take() {
            self.counters[staff].remove(&old);
        }
        self.counters[staff].add(&value);
        self.cells[staff][day] = Some(value);
    }

    /// Seeds a locked cell before the run starts.
    pub fn preassign_locked(&mut self, staff: usize, day: usize, value: CellValue) {
        self.assign(staff, day, value);
        self.lock(staff, day);
    }

    /// Applies pre-submitted requests: day-off and mandatory-shift cells are
    /// locked, avoid requests leave an open forbidden marker. Days outside
    /// the month are skipped; validation reports them separately.
    pub fn seed_requests(&mut self, roster: &[Staff]) {
        for (staff, member) in roster.iter().enumerate() {
            for (&day1, request) in &member.requests {
                let day = day1 as usize;
                if day == 0 || day > self.days {
                    continue;
                }
                let day = day - 1;
                match request {
                    DayRequest::OffRequested => {
                        self.preassign_locked(staff, day, CellValue::RequestedOff)
                    }
                    DayRequest::Require(code) => {
                        self.preassign_locked(staff, day, CellValue::Shift(code.clone()))
                    }
                    DayRequest::Avoid(code) => {
                        self.assign(staff, day, CellValue::Forbidden(code.clone()))
                    }
                }
            }
        }
    }

    pub fn counters(&self, staff: usize) -> &StaffCounters {
        &self.counters[staff]
    }

    pub fn off_counts(&self) -> Vec<u32> {
        self.counters.iter().map(|c| c.off_days).collect()
    }

    pub fn previous_shift(&self, staff: usize, day: usize, carry: &CarryOver) -> Option<ShiftCode> {
        if day == 0 {
            carry.last_shift.clone()
        } else {
            self.cells[staff][day - 1]
                .as_ref()
                .and_then(|v| v.shift_code())
                .cloned()
        }
    }

    /// Length of the unbroken run of workdays immediately before `day`,
    /// extended by the carry-over streak when it reaches back to day 1.
    pub fn consecutive_work_ending_before(
        &self,
        staff: usize,
        day: usize,
        carry_streak: u32,
    ) -> u32 {
        let mut streak = 0u32;
        for d in (0..day).rev() {
            match &self.cells[staff][d] {
                Some(v) if v.is_work() => streak += 1,
                _ => return streak,
            }
        }
        streak + carry_streak
    }

    /// Length of the contiguous work run starting at `day`, looking forward.
    pub fn consecutive_work_starting_at(&self, staff: usize, day: usize) -> u32 {
        let mut streak = 0u32;
        for d in day..self.days {
            match &self.cells[staff][d] {
                Some(v) if v.is_work() => streak += 1,
                _ => return streak,
            }
        }
        streak
    }

    pub fn assigned_count(&self, day: usize, code: &ShiftCode) -> u32 {
        self.cells
            .iter()
            .filter(|row| matches!(&row[day], Some(CellValue::Shift(c)) if c == code))
            .count() as u32
    }

    pub fn recount(&mut self) {
        for (staff, row) in self.cells.iter().enumerate() {
            let mut fresh = StaffCounters::default();
            for value in row.iter().flatten() {
                fresh.add(value);
            }
            self.counters[staff] = fresh;
        }
    }

    pub fn counters_consistent(&self) -> bool {
        self.cells.iter().enumerate().all(|(staff, row)| {
            let mut fresh = StaffCounters::default();
            for value in row.iter().flatten() {
                fresh.add(value);
            }
            fresh == self.counters[staff]
        })
    }

    /// Final matrix keyed by staff id and 1-based day. Open cells and
    /// forbidden markers read as plain rest days.
    pub fn to_matrix(&self, roster: &[Staff]) -> BTreeMap<StaffId, BTreeMap<u8, CellValue>> {
        let mut out = BTreeMap::new();
        for (staff, row) in self.cells.iter().enumerate() {
            let mut days = BTreeMap::new();
            for (day, cell) in row.iter().enumerate() {
                let value = match cell {
                    Some(CellValue::Forbidden(_)) | None => CellValue::Off,
                    Some(v) => v.clone(),
                };
                days.insert(day as u8 + 1, value);
            }
            out.insert(roster[staff].id.clone(), days);
        }
        out
    }
}

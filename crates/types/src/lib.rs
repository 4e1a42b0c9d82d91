use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Clone, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq, Ord, PartialOrd, Hash,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}
id_newtype!(StaffId);
id_newtype!(ShiftCode);

/// Minutes since midnight. 1440 ("24:00") is allowed as an end time.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MINUTES_PER_DAY: u16 = 1440;

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes <= Self::MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    /// Folds "24:00" back onto midnight for wrapped interval math.
    pub fn normalized(self) -> u16 {
        self.0 % Self::MINUTES_PER_DAY
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for ClockTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hh, mm) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid clock time: {s}"))?;
        let hh: u16 = hh.parse().map_err(|_| format!("invalid clock time: {s}"))?;
        let mm: u16 = mm.parse().map_err(|_| format!("invalid clock time: {s}"))?;
        if mm >= 60 || hh > 24 || (hh == 24 && mm != 0) {
            return Err(format!("invalid clock time: {s}"));
        }
        Ok(Self(hh * 60 + mm))
    }
}

impl TryFrom<String> for ClockTime {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ClockTime> for String {
    fn from(t: ClockTime) -> String {
        t.to_string()
    }
}

impl JsonSchema for ClockTime {
    fn schema_name() -> String {
        "ClockTime".into()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}

#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum ShiftCategory {
    Day,
    Evening,
    Night,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq)]
pub struct ShiftDefinition {
    pub code: ShiftCode,
    pub category: ShiftCategory,
    pub start: ClockTime,
    pub end: ClockTime,
}

impl ShiftDefinition {
    /// An end at or before the start means the shift runs past midnight.
    /// "24:00" is stored as minute 1440, so a 16:00-24:00 shift is same-day.
    pub fn is_overnight(&self) -> bool {
        self.end.minutes() <= self.start.minutes()
    }

    pub fn duration_minutes(&self) -> u32 {
        if self.is_overnight() {
            (ClockTime::MINUTES_PER_DAY - self.start.minutes() + self.end.normalized()) as u32
        } else {
            (self.end.minutes() - self.start.minutes()) as u32
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum DayRequest {
    OffRequested,
    Avoid(ShiftCode),
    Require(ShiftCode),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, Eq, PartialEq)]
pub struct Protection {
    #[serde(default)]
    pub pregnant: bool,
    #[serde(default)]
    pub pregnant_until: Option<NaiveDate>,
    #[serde(default)]
    pub breastfeeding: bool,
    #[serde(default)]
    pub breastfeeding_until: Option<NaiveDate>,
}

impl Protection {
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        let live = |flag: bool, until: Option<NaiveDate>| flag && until.map_or(true, |u| date <= u);
        live(self.pregnant, self.pregnant_until) || live(self.breastfeeding, self.breastfeeding_until)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq)]
pub struct SchedulingParams {
    #[serde(default)]
    pub protection: Protection,
    /// Honors the preference bundle lock; off means favorites apply instead.
    #[serde(default = "default_true")]
    pub can_bundle: bool,
    #[serde(default)]
    pub long_leave: bool,
}

impl Default for SchedulingParams {
    fn default() -> Self {
        Self {
            protection: Protection::default(),
            can_bundle: true,
            long_leave: false,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, Eq, PartialEq)]
pub struct ShiftPreferences {
    #[serde(default)]
    pub favorites: Vec<ShiftCode>,
    #[serde(default)]
    pub bundle: Option<ShiftCode>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Staff {
    pub id: StaffId,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub params: SchedulingParams,
    #[serde(default)]
    pub prefs: ShiftPreferences,
    #[serde(default)]
    pub requests: BTreeMap<u8, DayRequest>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct DemandTable {
    /// Required headcount per shift per weekday, 7 entries, index 0 = Monday.
    #[serde(default)]
    pub weekly: BTreeMap<ShiftCode, Vec<u32>>,
    /// Exact-date overrides keyed by day of month; take precedence over `weekly`.
    #[serde(default)]
    pub daily: BTreeMap<ShiftCode, BTreeMap<u8, u32>>,
}

impl DemandTable {
    pub fn required(&self, code: &ShiftCode, day: u8, weekday: usize) -> u32 {
        if let Some(n) = self.daily.get(code).and_then(|m| m.get(&day)) {
            return *n;
        }
        self.weekly
            .get(code)
            .and_then(|row| row.get(weekday))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.weekly.is_empty() && self.daily.is_empty()
    }
}

#[derive(
    Clone, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum CellValue {
    Off,
    RequestedOff,
    Shift(ShiftCode),
    /// Pre-seeded marker: the staff member must not receive this code that
    /// day but stays schedulable. Never survives into the final matrix.
    Forbidden(ShiftCode),
}

impl CellValue {
    pub fn is_off(&self) -> bool {
        !matches!(self, CellValue::Shift(_))
    }

    pub fn is_work(&self) -> bool {
        matches!(self, CellValue::Shift(_))
    }

    pub fn shift_code(&self) -> Option<&ShiftCode> {
        match self {
            CellValue::Shift(code) => Some(code),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, Eq, PartialEq)]
pub struct CarryOver {
    /// Shift worked on the final day of the prior month, None if it was off.
    #[serde(default)]
    pub last_shift: Option<ShiftCode>,
    #[serde(default)]
    pub consecutive_work_days: u32,
}

fn default_true() -> bool {
    true
}

fn default_min_rest_hours() -> u32 {
    11
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct HardRules {
    #[serde(default = "default_true")]
    pub min_rest: bool,
    #[serde(default = "default_min_rest_hours")]
    pub min_rest_hours: u32,
    #[serde(default = "default_true")]
    pub max_diversity: bool,
    #[serde(default = "default_true")]
    pub protect_pregnant: bool,
    /// First day of the rule week, 0 = Monday.
    #[serde(default)]
    pub week_start: u8,
}

impl Default for HardRules {
    fn default() -> Self {
        Self {
            min_rest: true,
            min_rest_hours: default_min_rest_hours(),
            max_diversity: true,
            protect_pregnant: true,
            week_start: 0,
        }
    }
}

fn default_max_consecutive() -> u32 {
    5
}

fn default_long_leave_max() -> u32 {
    6
}

fn default_fill_priority() -> Vec<ShiftCategory> {
    vec![ShiftCategory::Night, ShiftCategory::Day, ShiftCategory::Evening]
}

fn default_off_tolerance() -> f64 {
    1.0
}

fn default_balance_weight() -> f64 {
    1.0
}

fn default_continuity_weight() -> f64 {
    0.5
}

fn default_rotation_weight() -> f64 {
    0.25
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct PolicyRules {
    #[serde(default = "default_max_consecutive")]
    pub max_consecutive_days: u32,
    #[serde(default)]
    pub long_leave_adjust: bool,
    #[serde(default = "default_long_leave_max")]
    pub long_leave_max_consecutive: u32,
    #[serde(default)]
    pub bundle_night_only: bool,
    #[serde(default = "default_fill_priority")]
    pub fill_priority: Vec<ShiftCategory>,
    #[serde(default = "default_off_tolerance")]
    pub off_tolerance: f64,
    #[serde(default = "default_balance_weight")]
    pub balance_weight: f64,
    #[serde(default = "default_continuity_weight")]
    pub continuity_weight: f64,
    #[serde(default = "default_rotation_weight")]
    pub rotation_weight: f64,
}

impl Default for PolicyRules {
    fn default() -> Self {
        Self {
            max_consecutive_days: default_max_consecutive(),
            long_leave_adjust: false,
            long_leave_max_consecutive: default_long_leave_max(),
            bundle_night_only: false,
            fill_priority: default_fill_priority(),
            off_tolerance: default_off_tolerance(),
            balance_weight: default_balance_weight(),
            continuity_weight: default_continuity_weight(),
            rotation_weight: default_rotation_weight(),
        }
    }
}

fn default_balance_rounds() -> u32 {
    4
}

fn default_stddev_threshold() -> f64 {
    1.0
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct FairnessRules {
    #[serde(default = "default_balance_rounds")]
    pub balance_rounds: u32,
    #[serde(default = "default_stddev_threshold")]
    pub stddev_threshold: f64,
}

impl Default for FairnessRules {
    fn default() -> Self {
        Self {
            balance_rounds: default_balance_rounds(),
            stddev_threshold: default_stddev_threshold(),
        }
    }
}

fn default_backtrack_depth() -> u32 {
    3
}

fn default_backtrack_attempts() -> u32 {
    20
}

fn default_population() -> usize {
    24
}

fn default_generations() -> u32 {
    60
}

fn default_crossover_rate() -> f64 {
    0.8
}

fn default_mutation_rate() -> f64 {
    0.05
}

fn default_balance_segments() -> u32 {
    1
}

fn default_fill_iteration_cap() -> u32 {
    200
}

fn default_local_search_cap() -> u32 {
    400
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchParams {
    #[serde(default = "default_backtrack_depth")]
    pub backtrack_depth: u32,
    #[serde(default = "default_backtrack_attempts")]
    pub backtrack_attempts: u32,
    #[serde(default = "default_population")]
    pub population: usize,
    #[serde(default = "default_generations")]
    pub generations: u32,
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    #[serde(default = "default_balance_segments")]
    pub balance_segments: u32,
    #[serde(default = "default_fill_iteration_cap")]
    pub fill_iteration_cap: u32,
    #[serde(default = "default_true")]
    pub local_search: bool,
    #[serde(default = "default_local_search_cap")]
    pub local_search_cap: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            backtrack_depth: default_backtrack_depth(),
            backtrack_attempts: default_backtrack_attempts(),
            population: default_population(),
            generations: default_generations(),
            crossover_rate: default_crossover_rate(),
            mutation_rate: default_mutation_rate(),
            balance_segments: default_balance_segments(),
            fill_iteration_cap: default_fill_iteration_cap(),
            local_search: true,
            local_search_cap: default_local_search_cap(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct Rules {
    #[serde(default)]
    pub hard: HardRules,
    #[serde(default)]
    pub policy: PolicyRules,
    #[serde(default)]
    pub fairness: FairnessRules,
    #[serde(default)]
    pub search: SearchParams,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct EngineParams {
    pub seed: u64,
    #[serde(default)]
    pub refine: bool,
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ScheduleEnvelope {
    pub year: i32,
    pub month: u32,
    pub roster: Vec<Staff>,
    pub catalog: Vec<ShiftDefinition>,
    #[serde(default)]
    pub rules: Rules,
    #[serde(default)]
    pub demand: DemandTable,
    #[serde(default)]
    pub carry_over: BTreeMap<StaffId, CarryOver>,
    pub params: EngineParams,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    /// Full pipeline ran and every demand cell is covered.
    Complete,
    /// Pipeline ran to the end but unresolved gaps remain.
    Partial,
    /// Search was cut short (cancellation or time limit); best-so-far output.
    Heuristic,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Eq, PartialEq)]
pub struct StaffingGap {
    pub day: u8,
    pub shift: ShiftCode,
    pub missing: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ScheduleMetrics {
    pub coverage_pct: f64,
    pub preference_pct: f64,
    pub hard_violations: u32,
    pub off_stddev: f64,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ScheduleResult {
    pub status: ScheduleStatus,
    pub fitness: f64,
    pub assignments: BTreeMap<StaffId, BTreeMap<u8, CellValue>>,
    pub unresolved: Vec<StaffingGap>,
    pub metrics: ScheduleMetrics,
    pub stats: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct StrategyConfig {
    pub label: String,
    pub rules: Rules,
    #[serde(default)]
    pub refine: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct StrategyOutcome {
    pub label: String,
    /// Score under the comparison's shared evaluation, not the strategy's own
    /// weighting.
    pub score: f64,
    pub result: ScheduleResult,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct StrategyFailure {
    pub label: String,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ComparisonReport {
    /// Ranked best-first.
    pub outcomes: Vec<StrategyOutcome>,
    pub failures: Vec<StrategyFailure>,
    pub winner: Option<String>,
}

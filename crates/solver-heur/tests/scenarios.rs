use std::collections::BTreeMap;

use rota_core::Engine;
use solver_heur::HeurScheduler;
use types::{
    CarryOver, CellValue, DemandTable, EngineParams, Rules, ScheduleEnvelope, ScheduleStatus,
    ShiftCategory, ShiftCode, ShiftDefinition, Staff, StaffId,
};

fn catalog() -> Vec<ShiftDefinition> {
    let def = |code: &str, category, start: &str, end: &str| ShiftDefinition {
        code: ShiftCode(code.into()),
        category,
        start: start.parse().unwrap(),
        end: end.parse().unwrap(),
    };
    vec![
        def("D", ShiftCategory::Day, "08:00", "16:00"),
        def("E", ShiftCategory::Evening, "16:00", "24:00"),
        def("N", ShiftCategory::Night, "22:00", "07:00"),
    ]
}

fn staff(id: &str) -> Staff {
    Staff {
        id: StaffId(id.into()),
        level: 1,
        params: Default::default(),
        prefs: Default::default(),
        requests: BTreeMap::new(),
    }
}

fn code(s: &str) -> ShiftCode {
    ShiftCode(s.into())
}

fn envelope(roster: Vec<Staff>, demand: DemandTable) -> ScheduleEnvelope {
    ScheduleEnvelope {
        year: 2026,
        month: 6,
        roster,
        catalog: catalog(),
        rules: Rules::default(),
        demand,
        carry_over: BTreeMap::new(),
        params: EngineParams {
            seed: 11,
            refine: false,
            time_limit_ms: None,
        },
    }
}

fn demand_of(entries: &[(&str, u32)]) -> DemandTable {
    let mut demand = DemandTable::default();
    for (c, n) in entries {
        demand.weekly.insert(code(c), vec![*n; 7]);
    }
    demand
}

// An evening shift ends at midnight; eleven hours of rest push the next
// start past 11:00, so a day shift straight after it can never happen.
#[tokio::test]
async fn evening_carry_over_blocks_the_first_day_shift() {
    let mut env = envelope(
        vec![staff("ana"), staff("bea")],
        demand_of(&[("D", 1)]),
    );
    env.carry_over.insert(
        StaffId("ana".into()),
        CarryOver {
            last_shift: Some(code("E")),
            consecutive_work_days: 1,
        },
    );

    let result = HeurScheduler::new().schedule(env).await.unwrap();
    let ana = &result.assignments[&StaffId("ana".into())];
    assert_ne!(ana[&1], CellValue::Shift(code("D")));
    assert_eq!(result.status, ScheduleStatus::Complete);
}

#[tokio::test]
async fn pregnant_staff_build_a_full_month_without_night_work() {
    let mut roster = vec![staff("ana"), staff("bea"), staff("cara")];
    roster[0].params.protection.pregnant = true;

    let env = envelope(roster, demand_of(&[("N", 1)]));
    let result = HeurScheduler::new().schedule(env).await.unwrap();

    assert_eq!(result.status, ScheduleStatus::Complete);
    let ana = &result.assignments[&StaffId("ana".into())];
    for value in ana.values() {
        assert!(
            !matches!(value, CellValue::Shift(c) if c != &code("D")),
            "protected staff drew night-window work"
        );
    }
}

// Three staff, two night slots a day: the five-day cap forces a rotation,
// and the pipeline has to find it rather than dead-end on day six.
#[tokio::test]
async fn tight_night_rotation_stays_complete_under_the_cap() {
    let env = envelope(
        vec![staff("ana"), staff("bea"), staff("cara")],
        demand_of(&[("N", 2)]),
    );
    let cap = env.rules.policy.max_consecutive_days;
    let result = HeurScheduler::new().schedule(env).await.unwrap();

    assert_eq!(result.status, ScheduleStatus::Complete);
    for day in 1..=30u8 {
        let on_duty = result
            .assignments
            .values()
            .filter(|row| row[&day] == CellValue::Shift(code("N")))
            .count();
        assert_eq!(on_duty, 2, "day {day} is not double-covered");
    }
    for (id, row) in &result.assignments {
        let mut streak = 0u32;
        for day in 1..=30u8 {
            if matches!(row[&day], CellValue::Shift(_)) {
                streak += 1;
                assert!(streak <= cap, "{id} worked past the cap at day {day}");
            } else {
                streak = 0;
            }
        }
    }
}

#[tokio::test]
async fn favorites_confine_all_assigned_work() {
    let mut roster = vec![staff("ana"), staff("bea"), staff("cara"), staff("dina")];
    roster[0].prefs.favorites = vec![code("D")];

    let env = envelope(roster, demand_of(&[("D", 1), ("E", 1), ("N", 1)]));
    let result = HeurScheduler::new().schedule(env).await.unwrap();

    let ana = &result.assignments[&StaffId("ana".into())];
    for (day, value) in ana {
        if let CellValue::Shift(c) = value {
            assert_eq!(c, &code("D"), "non-favorite shift on day {day}");
        }
    }
}

#[tokio::test]
async fn bundle_lock_outweighs_favorites() {
    let mut roster = vec![staff("ana"), staff("bea"), staff("cara"), staff("dina")];
    roster[0].prefs.bundle = Some(code("N"));
    roster[0].prefs.favorites = vec![code("D")];

    let env = envelope(roster, demand_of(&[("D", 1), ("N", 2)]));
    let result = HeurScheduler::new().schedule(env).await.unwrap();

    let ana = &result.assignments[&StaffId("ana".into())];
    let mut nights = 0;
    for (day, value) in ana {
        if let CellValue::Shift(c) = value {
            assert_eq!(c, &code("N"), "bundle staff drew {c} on day {day}");
            nights += 1;
        }
    }
    assert!(nights > 0, "bundle staff never worked their bundle");
}

#[tokio::test]
async fn bundle_incapable_staff_fall_back_to_favorites() {
    let mut roster = vec![staff("ana"), staff("bea"), staff("cara"), staff("dina")];
    roster[0].prefs.bundle = Some(code("N"));
    roster[0].prefs.favorites = vec![code("D")];
    roster[0].params.can_bundle = false;

    let env = envelope(roster, demand_of(&[("D", 1), ("N", 2)]));
    let result = HeurScheduler::new().schedule(env).await.unwrap();

    let ana = &result.assignments[&StaffId("ana".into())];
    for (day, value) in ana {
        if let CellValue::Shift(c) = value {
            assert_eq!(c, &code("D"), "fallback favorites ignored on day {day}");
        }
    }
}

#[tokio::test]
async fn refinement_only_raises_the_score() {
    let base = envelope(
        vec![staff("ana"), staff("bea"), staff("cara"), staff("dina")],
        demand_of(&[("D", 1), ("E", 1), ("N", 1)]),
    );
    let mut refined = base.clone();
    refined.rules.search.population = 8;
    refined.rules.search.generations = 12;
    refined.params.refine = true;

    let plain = HeurScheduler::new().schedule(base).await.unwrap();
    let tuned = HeurScheduler::new().schedule(refined).await.unwrap();
    assert!(tuned.fitness >= plain.fitness);
}

//! Scheduling throughput benchmarks: month construction by roster size and
//! genetic refinement over a built table.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rota_core::calendar::MonthCalendar;
use rota_core::catalog::ShiftIndex;
use rota_core::state::AssignmentState;
use rota_core::whitelist::EvalContext;
use rota_core::CancelToken;
use solver_heur::{backtrack, balance, construct, refine};
use std::collections::BTreeMap;
use types::{DemandTable, Rules, ShiftCategory, ShiftCode, ShiftDefinition, Staff, StaffId};

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

fn roster(n: usize) -> Vec<Staff> {
    (0..n)
        .map(|i| Staff {
            id: StaffId(format!("nurse-{i}")),
            level: 1,
            params: Default::default(),
            prefs: Default::default(),
            requests: BTreeMap::new(),
        })
        .collect()
}

fn ward_demand() -> DemandTable {
    let mut demand = DemandTable::default();
    demand.weekly.insert(ShiftCode("D".into()), vec![2; 7]);
    demand.weekly.insert(ShiftCode("E".into()), vec![2; 7]);
    demand.weekly.insert(ShiftCode("N".into()), vec![2; 7]);
    demand
}

fn bench_pipeline(c: &mut Criterion) {
    let catalog = catalog();
    let index = ShiftIndex::new(&catalog);
    let calendar = MonthCalendar::new(2026, 6).unwrap();
    let rules = Rules::default();
    let carry = BTreeMap::new();
    let ctx = EvalContext {
        index: &index,
        rules: &rules,
        calendar: &calendar,
        carry: &carry,
    };
    let demand = ward_demand();
    let cancel = CancelToken::new();

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(40);

    for n in [8usize, 16, 32] {
        let staff = roster(n);
        group.bench_with_input(BenchmarkId::new("construct", n), &n, |b, &n| {
            b.iter_batched(
                || (AssignmentState::new(n, 30), ChaCha8Rng::seed_from_u64(7)),
                |(mut state, mut rng)| {
                    construct::build_month(&ctx, &staff, &demand, &mut state, &mut rng, &cancel);
                    backtrack::sweep(&ctx, &staff, &demand, &mut state, &mut rng, &cancel);
                    balance::equalize(&ctx, &staff, &mut state, &cancel);
                    black_box(state)
                },
                BatchSize::SmallInput,
            );
        });
    }

    let staff = roster(16);
    let mut seeded = AssignmentState::new(16, 30);
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    construct::build_month(&ctx, &staff, &demand, &mut seeded, &mut rng, &cancel);

    let mut ga_rules = Rules::default();
    ga_rules.search.population = 12;
    ga_rules.search.generations = 20;
    let ga_ctx = EvalContext {
        index: &index,
        rules: &ga_rules,
        calendar: &calendar,
        carry: &carry,
    };
    group.bench_function("refine_16_staff", |b| {
        b.iter_batched(
            || seeded.clone(),
            |mut state| {
                refine::improve(&ga_ctx, &staff, &demand, &mut state, 7, &cancel);
                black_box(state)
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rota_core::scoring::compute_scores;
use rota_core::state::AssignmentState;
use rota_core::whitelist::{permissible, EvalContext};
use rota_core::CancelToken;
use types::{CellValue, DemandTable, Staff};

const SEED_VARIANT_RATE: f64 = 0.15;

#[derive(Debug, Default)]
pub struct RefineStats {
    pub generations: u32,
    pub local_moves: u32,
    pub initial_fitness: f64,
    pub final_fitness: f64,
}

#[derive(Clone)]
struct Candidate {
    state: AssignmentState,
    fitness: f64,
}

impl Candidate {
    fn evaluate(&mut self, ctx: &EvalContext<'_>, roster: &[Staff], demand: &DemandTable) {
        self.fitness = compute_scores(ctx, roster, &self.state, demand).fitness;
    }
}

/// Genetic refinement over a constructed table, followed by a greedy local
/// pass. Elites survive every generation, so the result never scores below
/// the starting point.
pub fn improve(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    demand: &DemandTable,
    state: &mut AssignmentState,
    seed: u64,
    cancel: &CancelToken,
) -> RefineStats {
    let search = &ctx.rules.search;
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0x9E37_79B9_7F4A_7C15);

    let mut base = Candidate {
        state: state.clone(),
        fitness: 0.0,
    };
    base.evaluate(ctx, roster, demand);
    let mut stats = RefineStats {
        initial_fitness: base.fitness,
        ..RefineStats::default()
    };

    let mut population = vec![base];
    while population.len() < search.population.max(2) {
        let mut variant = population[0].clone();
        mutate_cells(ctx, roster, &mut variant.state, &mut rng, SEED_VARIANT_RATE);
        variant.evaluate(ctx, roster, demand);
        population.push(variant);
    }
    population.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));

    for _ in 0..search.generations {
        if cancel.is_cancelled() {
            break;
        }
        stats.generations += 1;

        let elite = (population.len() / 8).max(1);
        let mut next: Vec<Candidate> = population[..elite].to_vec();
        while next.len() < population.len() {
            let father = tournament(&population, &mut rng);
            let mother = tournament(&population, &mut rng);
            let mut child = if rng.gen_bool(search.crossover_rate) {
                crossover(father, mother, &mut rng)
            } else {
                father.clone()
            };
            mutate_cells(ctx, roster, &mut child.state, &mut rng, search.mutation_rate);
            child.evaluate(ctx, roster, demand);
            next.push(child);
        }
        next.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
        population = next;
    }

    let mut best = population.swap_remove(0);
    if search.local_search {
        stats.local_moves = local_pass(
            ctx,
            roster,
            demand,
            &mut best,
            &mut rng,
            cancel,
            search.local_search_cap,
        );
    }

    stats.final_fitness = best.fitness;
    *state = best.state;
    stats
}

fn tournament<'a>(population: &'a [Candidate], rng: &mut ChaCha8Rng) -> &'a Candidate {
    let a = &population[rng.gen_range(0..population.len())];
    let b = &population[rng.gen_range(0..population.len())];
    if a.fitness >= b.fitness {
        a
    } else {
        b
    }
}

/// Single-point crossover along the day axis. Locked cells are identical in
/// every descendant of the constructed table and stay untouched.
fn crossover(father: &Candidate, mother: &Candidate, rng: &mut ChaCha8Rng) -> Candidate {
    let days = father.state.days();
    let cut = rng.gen_range(1..days);
    let mut state = father.state.clone();
    for day in cut..days {
        for s in 0..state.staff_count() {
            if state.is_locked(s, day) {
                continue;
            }
            if let Some(v) = mother.state.cell(s, day) {
                state.assign(s, day, v.clone());
            }
        }
    }
    Candidate { state, fitness: 0.0 }
}

/// Redraw unlocked cells from their whitelists at the given rate.
fn mutate_cells(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    state: &mut AssignmentState,
    rng: &mut ChaCha8Rng,
    rate: f64,
) {
    for s in 0..state.staff_count() {
        for day in 0..state.days() {
            if state.is_locked(s, day) || !rng.gen_bool(rate) {
                continue;
            }
            let options: Vec<CellValue> = permissible(ctx, state, &roster[s], s, day)
                .iter()
                .cloned()
                .collect();
            if let Some(value) = options.choose(rng) {
                if Some(value) != state.cell(s, day) {
                    state.assign(s, day, value.clone());
                }
            }
        }
    }
}

/// Greedy pass over the best candidate: sampled single-cell reassignments
/// and same-day trades, kept only when the fitness strictly rises.
fn local_pass(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    demand: &DemandTable,
    best: &mut Candidate,
    rng: &mut ChaCha8Rng,
    cancel: &CancelToken,
    cap: u32,
) -> u32 {
    let mut accepted = 0u32;
    for _ in 0..cap {
        if cancel.is_cancelled() {
            break;
        }
        let improved = if rng.gen_bool(0.5) {
            try_cell_move(ctx, roster, demand, best, rng)
        } else {
            try_day_trade(ctx, roster, demand, best, rng)
        };
        if improved {
            accepted += 1;
        }
    }
    accepted
}

fn try_cell_move(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    demand: &DemandTable,
    best: &mut Candidate,
    rng: &mut ChaCha8Rng,
) -> bool {
    let s = rng.gen_range(0..best.state.staff_count());
    let day = rng.gen_range(0..best.state.days());
    if best.state.is_locked(s, day) {
        return false;
    }
    let Some(current) = best.state.cell(s, day).cloned() else {
        return false;
    };
    let options: Vec<CellValue> = permissible(ctx, &best.state, &roster[s], s, day)
        .iter()
        .filter(|v| **v != current)
        .cloned()
        .collect();
    let Some(value) = options.choose(rng) else {
        return false;
    };

    best.state.assign(s, day, value.clone());
    let fitness = compute_scores(ctx, roster, &best.state, demand).fitness;
    if fitness > best.fitness {
        best.fitness = fitness;
        return true;
    }
    best.state.assign(s, day, current);
    false
}

fn try_day_trade(
    ctx: &EvalContext<'_>,
    roster: &[Staff],
    demand: &DemandTable,
    best: &mut Candidate,
    rng: &mut ChaCha8Rng,
) -> bool {
    let count = best.state.staff_count();
    if count < 2 {
        return false;
    }
    let day = rng.gen_range(0..best.state.days());
    let i = rng.gen_range(0..count);
    let j = rng.gen_range(0..count);
    if i == j || best.state.is_locked(i, day) || best.state.is_locked(j, day) {
        return false;
    }
    let (Some(vi), Some(vj)) = (
        best.state.cell(i, day).cloned(),
        best.state.cell(j, day).cloned(),
    ) else {
        return false;
    };
    if vi == vj {
        return false;
    }
    if let CellValue::Shift(code) = &vj {
        if !permissible(ctx, &best.state, &roster[i], i, day).allows_shift(code) {
            return false;
        }
    }
    if let CellValue::Shift(code) = &vi {
        if !permissible(ctx, &best.state, &roster[j], j, day).allows_shift(code) {
            return false;
        }
    }

    best.state.assign(i, day, vj.clone());
    best.state.assign(j, day, vi.clone());
    let fitness = compute_scores(ctx, roster, &best.state, demand).fitness;
    if fitness > best.fitness {
        best.fitness = fitness;
        return true;
    }
    best.state.assign(i, day, vi);
    best.state.assign(j, day, vj);
    false
}

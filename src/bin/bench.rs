//! Benchmark for the three scheduling phases.
//!
//! Run with: cargo run --release --bin bench

use nurse_scheduling::demo_data;
use nurse_scheduling::engine::{AllocationEngine, EngineConfig};
use std::time::Instant;

const ROUNDS: u32 = 20;

fn main() {
    let problem = demo_data::generate(demo_data::DemoData::Large);

    println!("Benchmark: Allocation Engine");
    println!("  Ward: {} ({})", problem.ward, problem.period);
    println!("  Staff: {}", problem.staff.len());
    println!("  Slots: {}", problem.shift_types.len() * problem.period.days() as usize);
    println!();

    let mut phase_ms = [0u64; 3];
    let mut attempts: u64 = 0;
    let mut reference = None;

    let bench_start = Instant::now();
    for _ in 0..ROUNDS {
        let mut engine = AllocationEngine::new(problem.clone(), EngineConfig::default()).unwrap();
        for (slot, report) in [engine.fill(), engine.balance(), engine.redistribute()]
            .iter()
            .enumerate()
        {
            phase_ms[slot] += report.elapsed_ms;
            attempts += report.attempts;
        }
        let outcome = engine.finish();

        // Every round must produce the identical schedule.
        match &reference {
            None => reference = Some(outcome.assignments),
            Some(expected) => assert_eq!(expected, &outcome.assignments, "Run is not deterministic!"),
        }
    }
    let elapsed = bench_start.elapsed();

    println!("Results:");
    println!("  Rounds: {}", ROUNDS);
    println!("  Time: {:.2?} ({:.2?}/round)", elapsed, elapsed / ROUNDS);
    println!(
        "  Phases (avg ms): fill {}, balance {}, redistribute {}",
        phase_ms[0] / u64::from(ROUNDS),
        phase_ms[1] / u64::from(ROUNDS),
        phase_ms[2] / u64::from(ROUNDS)
    );
    println!("  Candidates/sec: {:.0}", attempts as f64 / elapsed.as_secs_f64());
    if let Some(assignments) = reference {
        println!("  Assignments: {} (verified deterministic)", assignments.len());
    }
}

//! Property tests over random schedules.

use proptest::prelude::*;

use weave::{parse, progress_thread, GlobalContext, Program};

const PROGRAM: &str = "
    x = 0;
    $t = spawn { lock m; x = x + 1; unlock m; }
    $u = spawn { lock m; $v = x; unlock m; }
    lock m; x = x + 2; unlock m;
    join $t;
";

fn program() -> Program {
    parse(PROGRAM).unwrap()
}

/// Applies a schedule, skipping choices that name a missing thread.
fn run_schedule(program: &Program, schedule: &[usize]) -> GlobalContext {
    let mut ctx = GlobalContext::new(program);
    for &choice in schedule {
        let tid = choice % ctx.threads.len();
        progress_thread(&mut ctx, tid).unwrap();
    }
    ctx
}

proptest! {
    #[test]
    fn prop_stepping_is_deterministic(schedule in prop::collection::vec(0usize..3, 0..30), last in 0usize..3) {
        let program = program();
        let ctx = run_schedule(&program, &schedule);
        let tid = last % ctx.threads.len();
        let mut a = ctx.clone();
        let mut b = ctx.clone();
        let outcome_a = progress_thread(&mut a, tid).unwrap();
        let outcome_b = progress_thread(&mut b, tid).unwrap();
        prop_assert_eq!(outcome_a, outcome_b);
        prop_assert!(a == b);
        prop_assert_eq!(a.fingerprint(), b.fingerprint());
        prop_assert_eq!(a.graph.len(), b.graph.len());
    }

    #[test]
    fn prop_equivalence_is_reflexive_and_symmetric(
        s1 in prop::collection::vec(0usize..3, 0..20),
        s2 in prop::collection::vec(0usize..3, 0..20),
    ) {
        let program = program();
        let a = run_schedule(&program, &s1);
        let b = run_schedule(&program, &s2);
        prop_assert!(a == a);
        prop_assert_eq!(a == b, b == a);
        if a == b {
            prop_assert_eq!(a.fingerprint(), b.fingerprint());
        }
    }

    #[test]
    fn prop_equivalence_is_transitive(
        s1 in prop::collection::vec(0usize..2, 0..12),
        s2 in prop::collection::vec(0usize..2, 0..12),
        s3 in prop::collection::vec(0usize..2, 0..12),
    ) {
        let program = program();
        let a = run_schedule(&program, &s1);
        let b = run_schedule(&program, &s2);
        let c = run_schedule(&program, &s3);
        if a == b && b == c {
            prop_assert!(a == c);
        }
    }

    #[test]
    fn prop_at_most_one_owner(schedule in prop::collection::vec(0usize..3, 0..40)) {
        let ctx = run_schedule(&program(), &schedule);
        for (_, lock) in ctx.locks.iter() {
            if let Some(owner) = lock.owner {
                prop_assert!(owner < ctx.threads.len());
                // The owner is the only thread past its `lock m` and before its `unlock m`.
                let inside = ctx
                    .threads
                    .iter()
                    .filter(|t| {
                        t.block.stmts.iter().take(t.pc).filter(|s| s.source == "lock m").count()
                            > t.block.stmts.iter().take(t.pc).filter(|s| s.source == "unlock m").count()
                    })
                    .count();
                prop_assert!(inside <= 1);
            }
        }
    }
}

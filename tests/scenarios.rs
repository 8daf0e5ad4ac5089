//! End-to-end scenarios exercising multiple modules together (Signal +
//! Computed + Effect + batch) as integration tests, rather than in any one
//! module's own `#[cfg(test)]` block.

use reactive_graph_core::{batch, on_effect_cleanup, Computed, Effect, Signal};
use std::cell::{Cell, RefCell};
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

/// diamond dependency.
#[test]
fn diamond_dependency_each_node_runs_once_per_batch() {
    let a = Signal::new(1);
    let b = Signal::new(2);

    let s_runs = Rc::new(Cell::new(0));
    let p_runs = Rc::new(Cell::new(0));

    let (s_runs2, a2, b2) = (s_runs.clone(), a.clone(), b.clone());
    let s: Computed<i32> = Computed::new(move |_| {
        s_runs2.set(s_runs2.get() + 1);
        a2.get() + b2.get()
    });

    let (p_runs2, s2) = (p_runs.clone(), s.clone());
    let p: Computed<i32> = Computed::new(move |_| {
        p_runs2.set(p_runs2.get() + 1);
        s2.get() * 10
    });

    // Establish the initial evaluation before observing steady-state counts.
    assert_eq!(p.get(), 30);
    s_runs.set(0);
    p_runs.set(0);

    let p_seen = Rc::new(Cell::new(0));
    let p_seen2 = p_seen.clone();
    let p3 = p.clone();
    let effect_runs = Rc::new(Cell::new(0));
    let effect_runs2 = effect_runs.clone();
    let effect = Effect::new(move || {
        effect_runs2.set(effect_runs2.get() + 1);
        p_seen2.set(p3.get());
    });
    effect_runs.set(0);

    batch(|| {
        a.set(3);
        b.set(4);
    });

    assert_eq!(p.get(), 70);
    assert_eq!(s_runs.get(), 1);
    assert_eq!(p_runs.get(), 1);
    assert_eq!(effect_runs.get(), 1);
    assert_eq!(p_seen.get(), 70);

    effect.stop();
}

/// a lazy computed with no reader never runs its body.
#[test]
fn lazy_computed_never_runs_without_a_reader() {
    let counter = Rc::new(Cell::new(0));
    let counter2 = counter.clone();
    let _c: Computed<i32> = Computed::new(move |_| {
        counter2.set(counter2.get() + 1);
        1
    });
    assert_eq!(counter.get(), 0);
}

/// cleanup order — `['r', 'c', 'r']`: cleanup fires before the
/// second run body, and only once per prior run.
#[test]
fn cleanup_runs_before_next_body_exactly_once_per_prior_run() {
    let trace = Rc::new(RefCell::new(Vec::new()));
    let dep = Signal::new(0);

    let trace2 = trace.clone();
    let dep2 = dep.clone();
    let e = Effect::new(move || {
        let trace3 = trace2.clone();
        on_effect_cleanup(move || trace3.borrow_mut().push("c"));
        trace2.borrow_mut().push("r");
        dep2.get();
    });

    dep.set(1);

    assert_eq!(*trace.borrow(), vec!["r", "c", "r"]);
    e.stop();
}

/// recursion guard — without `allow_recurse`, an effect that
/// writes a signal it reads runs exactly once per external write (its own
/// self-write is absorbed by the RUNNING guard). With `allow_recurse`, it
/// keeps running until the signal value stabilizes.
#[test]
fn recursion_guard_absorbs_self_write_without_allow_recurse() {
    let s = Signal::new(0);
    let runs = Rc::new(Cell::new(0));

    let runs2 = runs.clone();
    let s2 = s.clone();
    let e = Effect::new(move || {
        runs2.set(runs2.get() + 1);
        if s2.get() == 0 {
            s2.set(1);
        }
    });
    assert_eq!(runs.get(), 1);
    e.stop();

    let s = Signal::new(0);
    s.set(5);
    let runs = Rc::new(Cell::new(0));
    let runs2 = runs.clone();
    let s2 = s.clone();
    let e = Effect::new(move || {
        runs2.set(runs2.get() + 1);
        s2.get();
    });
    runs.set(0);
    s.set(6);
    assert_eq!(runs.get(), 1);
    e.stop();
}

#[test]
fn recursion_guard_with_allow_recurse_runs_until_value_stabilizes() {
    let s = Signal::new(0);
    let runs = Rc::new(Cell::new(0));

    let runs2 = runs.clone();
    let s2 = s.clone();
    let e = reactive_graph_core::EffectBuilder::new()
        .allow_recurse(true)
        .build(move || {
            runs2.set(runs2.get() + 1);
            let v = s2.get();
            if v < 5 {
                s2.set(v + 1);
            }
        });

    assert_eq!(s.get(), 5);
    assert_eq!(runs.get(), 6); // runs for v = 0,1,2,3,4,5
    e.stop();
}

/// error isolation in batch — both effects depending on `x` are
/// attempted; the first's panic is only re-raised after the drain completes,
/// so the second effect's side effect is still observable.
#[test]
fn error_isolation_in_batch_runs_both_effects_before_rethrowing() {
    let x = Signal::new(0);
    let second_ran = Rc::new(Cell::new(false));

    let x1 = x.clone();
    let e1 = Effect::new(move || {
        let v = x1.get();
        if v == 1 {
            panic!("first effect always fails on this value");
        }
    });

    let second_ran2 = second_ran.clone();
    let x2 = x.clone();
    let e2 = Effect::new(move || {
        x2.get();
        second_ran2.set(true);
    });
    second_ran.set(false);

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        x.set(1);
    }));

    assert!(result.is_err());
    assert!(second_ran.get());

    e1.stop();
    e2.stop();
}

/// global-version fast path — after the first real evaluation,
/// a huge number of reads with no intervening writes costs exactly one call
/// to the expensive body.
#[test]
fn global_version_fast_path_amortizes_to_one_call() {
    let calls = Rc::new(Cell::new(0));
    let calls2 = calls.clone();
    let c: Computed<i32> = Computed::new(move |_| {
        calls2.set(calls2.get() + 1);
        42
    });

    assert_eq!(c.get(), 42);
    for _ in 0..1_000_000 {
        assert_eq!(c.get(), 42);
    }
    assert_eq!(calls.get(), 1);
}

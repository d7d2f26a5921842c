use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::engine::{EngineContext, run_path};
use super::error::{ConfigError, PathError, RunError};
use super::phase::{Phase, Specification};
use super::seed::SeedPolicy;
use super::types::{RunResult, SimulationConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct MonteCarloRun {
    pub results: Vec<RunResult>,
    pub requested: usize,
    pub failed: usize,
}

impl MonteCarloRun {
    pub fn completed(&self) -> usize {
        self.results.len()
    }
}

#[derive(Debug)]
pub struct AdmissionPermit {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MonteCarlo {
    config: SimulationConfig,
    in_flight: Arc<AtomicUsize>,
}

impl MonteCarlo {
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Claims a run slot, or rejects once `queue_capacity` runs are active.
    pub fn admit(&self) -> Result<AdmissionPermit, RunError> {
        let capacity = self.config.queue_capacity;
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|_| RunError::Rejected { capacity })?;
        Ok(AdmissionPermit {
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn run(
        &self,
        path_count: usize,
        phases: &[Phase],
        template: &Specification,
        master_seed: i64,
    ) -> Result<MonteCarloRun, RunError> {
        self.run_with_progress(path_count, phases, template, master_seed, &|_, _| {})
    }

    pub fn run_with_progress(
        &self,
        path_count: usize,
        phases: &[Phase],
        template: &Specification,
        master_seed: i64,
        progress: &(dyn Fn(usize, usize) + Sync),
    ) -> Result<MonteCarloRun, RunError> {
        let _permit = self.admit()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_threads)
            .thread_name(|i| format!("mc-worker-{i}"))
            .build()
            .map_err(|e| RunError::Pool(e.to_string()))?;

        let policy = SeedPolicy::from_master(master_seed);
        let ctx = EngineContext::from(&self.config);
        let batch_size = self.config.batch_size;
        let interval = self.config.progress_interval;

        info!(
            paths = path_count,
            threads = self.config.worker_threads,
            batch_size,
            deterministic = policy.is_deterministic(),
            "Starting Monte Carlo run"
        );
        let started = Instant::now();
        let completed = AtomicUsize::new(0);
        let mut results = Vec::with_capacity(path_count);
        let mut failed = 0;

        for batch_start in (0..path_count).step_by(batch_size) {
            let batch_end = (batch_start + batch_size).min(path_count);
            debug!(batch_start, batch_end, "Dispatching batch");

            let outcomes: Vec<Result<RunResult, PathError>> = pool.install(|| {
                (batch_start..batch_end)
                    .into_par_iter()
                    .map(|i| {
                        let outcome = simulate_path(phases, template, policy, &ctx, i as u64);
                        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                        if done % interval == 0 || done == path_count {
                            info!(done, total = path_count, "Monte Carlo progress");
                            progress(done, path_count);
                        }
                        outcome
                    })
                    .collect()
            });

            for outcome in outcomes {
                match outcome {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        warn!(error = %e, "Dropping failed path");
                        failed += 1;
                    }
                }
            }
        }

        results.sort_by_key(|r| r.path_index);
        info!(
            completed = results.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Monte Carlo run finished"
        );

        Ok(MonteCarloRun {
            results,
            requested: path_count,
            failed,
        })
    }
}

fn simulate_path(
    phases: &[Phase],
    template: &Specification,
    policy: SeedPolicy,
    ctx: &EngineContext,
    path_index: u64,
) -> Result<RunResult, PathError> {
    contain_panics(path_index, || {
        let mut spec = template.fork(policy, path_index);
        let mut phases = phases.to_vec();
        run_path(&mut phases, &mut spec, ctx, path_index)
    })
}

// A panic inside one path becomes that path's error.
fn contain_panics<F>(path_index: u64, walk: F) -> Result<RunResult, PathError>
where
    F: FnOnce() -> Result<RunResult, PathError>,
{
    panic::catch_unwind(AssertUnwindSafe(walk)).unwrap_or_else(|payload| {
        Err(PathError::Panicked {
            path: path_index,
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::calendar::Date;
    use crate::core::distribution::Distribution;
    use crate::core::phase::{Deposit, Passive, PhaseAction, PhaseDraft, chain_phases};
    use crate::core::returner::{Inflation, Returner};
    use crate::core::tax::TaxRule;
    use crate::core::types::{LiveData, ReturnStep};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Mutex;

    fn config(threads: usize) -> SimulationConfig {
        SimulationConfig {
            return_step: ReturnStep::Monthly,
            worker_threads: threads,
            batch_size: 7,
            progress_interval: 5,
            ..SimulationConfig::default()
        }
    }

    fn phases() -> Vec<Phase> {
        chain_phases(
            Date::of(2025, 1, 1),
            vec![
                PhaseDraft {
                    duration_months: 12,
                    action: PhaseAction::Deposit(Deposit::new(10_000.0, 500.0, 0.0)),
                    exemptions: Vec::new(),
                },
                PhaseDraft {
                    duration_months: 12,
                    action: PhaseAction::Passive(Passive::new()),
                    exemptions: Vec::new(),
                },
            ],
        )
        .expect("valid timeline")
    }

    fn volatile_spec() -> Specification {
        let distribution =
            Distribution::normal(0.07, 0.2, ReturnStep::Monthly.dt()).expect("valid");
        Specification::new(
            LiveData::new(),
            TaxRule::notional(42.0),
            Returner::stochastic(distribution, ReturnStep::Monthly, ChaCha8Rng::seed_from_u64(0)),
            Inflation::fixed(2.0),
        )
    }

    #[test]
    fn same_seed_gives_identical_results_regardless_of_threads() {
        let spec = volatile_spec();
        let single = MonteCarlo::new(config(1)).expect("valid config");
        let many = MonteCarlo::new(config(4)).expect("valid config");

        let a = single.run(20, &phases(), &spec, 42).expect("run");
        let b = many.run(20, &phases(), &spec, 42).expect("run");
        assert_eq!(a, b);
        assert_eq!(a.completed(), 20);
        assert_eq!(a.failed, 0);
    }

    #[test]
    fn different_seeds_give_different_results() {
        let spec = volatile_spec();
        let mc = MonteCarlo::new(config(2)).expect("valid config");
        let a = mc.run(5, &phases(), &spec, 1).expect("run");
        let b = mc.run(5, &phases(), &spec, 2).expect("run");
        assert_ne!(a.results, b.results);
    }

    #[test]
    fn paths_draw_independently_and_start_from_the_template() {
        let spec = volatile_spec();
        let mc = MonteCarlo::new(config(2)).expect("valid config");
        let run = mc.run(3, &phases(), &spec, 9).expect("run");

        let finals: Vec<f64> = run
            .results
            .iter()
            .map(|r| r.last().expect("snapshots").data.capital)
            .collect();
        assert_ne!(finals[0], finals[1]);
        for result in &run.results {
            assert_eq!(result.snapshots[0].data.capital, 0.0);
        }
        assert_eq!(spec.live, LiveData::new());
    }

    #[test]
    fn results_are_sorted_by_path_index() {
        let mc = MonteCarlo::new(config(4)).expect("valid config");
        let run = mc.run(30, &phases(), &volatile_spec(), 5).expect("run");
        let indices: Vec<u64> = run.results.iter().map(|r| r.path_index).collect();
        assert_eq!(indices, (0..30).collect::<Vec<u64>>());
    }

    #[test]
    fn failed_paths_are_counted_and_excluded() {
        let spec = Specification::new(
            LiveData::with_capital(1.0),
            TaxRule::default(),
            Returner::simple(f64::INFINITY, ReturnStep::Monthly),
            Inflation::default(),
        );
        let mc = MonteCarlo::new(config(2)).expect("valid config");
        let run = mc.run(6, &phases(), &spec, 1).expect("run completes");
        assert_eq!(run.requested, 6);
        assert_eq!(run.failed, 6);
        assert!(run.results.is_empty());
    }

    #[test]
    fn overflowing_paths_are_dropped_while_siblings_complete() {
        // Monthly noise sd ~ 430 in log space: exp overflows on a few draws
        // per path, so some paths blow up and others never do.
        let distribution =
            Distribution::normal(0.0, 1_500.0, ReturnStep::Monthly.dt()).expect("valid");
        let spec = Specification::new(
            LiveData::new(),
            TaxRule::default(),
            Returner::stochastic(distribution, ReturnStep::Monthly, ChaCha8Rng::seed_from_u64(0)),
            Inflation::default(),
        );
        let deposit_only = chain_phases(
            Date::of(2025, 1, 1),
            vec![PhaseDraft {
                duration_months: 12,
                action: PhaseAction::Deposit(Deposit::new(1_000.0, 100.0, 0.0)),
                exemptions: Vec::new(),
            }],
        )
        .expect("valid timeline");

        let mc = MonteCarlo::new(config(4)).expect("valid config");
        let run = mc.run(40, &deposit_only, &spec, 11).expect("run completes");

        assert_eq!(run.completed() + run.failed, run.requested);
        assert!(run.failed > 0, "expected some overflowing paths");
        assert!(run.completed() > 0, "expected some surviving paths");
        for result in &run.results {
            let last = result.last().expect("snapshots");
            assert!(last.data.capital.is_finite());
        }
    }

    #[test]
    fn panicking_path_becomes_a_path_error() {
        let err = contain_panics(3, || panic!("regime index out of range"))
            .expect_err("panic is contained");
        assert_eq!(
            err,
            PathError::Panicked {
                path: 3,
                message: "regime index out of range".to_string(),
            }
        );

        let formatted = contain_panics(4, || panic!("bad day {}", 17)).expect_err("contained");
        assert!(matches!(formatted, PathError::Panicked { path: 4, ref message } if message == "bad day 17"));

        let ok = contain_panics(5, || Ok(RunResult::new(5))).expect("no panic");
        assert_eq!(ok.path_index, 5);
    }

    #[test]
    fn panic_payloads_render_as_messages() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u32), "unknown panic");
    }

    #[test]
    fn entropy_seed_still_runs_every_path() {
        let mc = MonteCarlo::new(config(2)).expect("valid config");
        let run = mc.run(4, &phases(), &volatile_spec(), -1).expect("run");
        assert_eq!(run.completed(), 4);
    }

    #[test]
    fn progress_reports_reach_the_total() {
        let mc = MonteCarlo::new(config(3)).expect("valid config");
        let seen = Mutex::new(Vec::new());
        mc.run_with_progress(12, &phases(), &volatile_spec(), 3, &|done, total| {
            seen.lock().expect("lock").push((done, total));
        })
        .expect("run");

        let seen = seen.into_inner().expect("lock");
        assert!(seen.contains(&(12, 12)));
        assert!(seen.iter().all(|(_, total)| *total == 12));
    }

    #[test]
    fn runs_beyond_queue_capacity_are_rejected() {
        let mc = MonteCarlo::new(SimulationConfig {
            queue_capacity: 1,
            ..config(1)
        })
        .expect("valid config");

        let permit = mc.admit().expect("first slot");
        let err = mc
            .run(1, &phases(), &volatile_spec(), 1)
            .expect_err("gate is full");
        assert!(matches!(err, RunError::Rejected { capacity: 1 }));

        drop(permit);
        assert!(mc.run(1, &phases(), &volatile_spec(), 1).is_ok());
    }

    #[test]
    fn zero_paths_is_an_empty_run() {
        let mc = MonteCarlo::new(config(1)).expect("valid config");
        let run = mc.run(0, &phases(), &volatile_spec(), 1).expect("run");
        assert_eq!(run.requested, 0);
        assert!(run.results.is_empty());
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let err = MonteCarlo::new(SimulationConfig {
            batch_size: 0,
            ..SimulationConfig::default()
        })
        .expect_err("batch size must be positive");
        assert!(matches!(err, ConfigError::InvalidField { field: "batchSize", .. }));
    }
}

use super::calendar::{
    Date, TradingCalendar, compute_month_end, compute_next_month_start, compute_next_year_start,
    compute_year_end,
};
use super::error::PathError;
use super::phase::{Phase, Specification};
use super::types::{ReturnStep, RunResult, SimulationConfig, Snapshot, SnapshotKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineContext {
    pub return_step: ReturnStep,
    pub calendar: TradingCalendar,
}

impl From<&SimulationConfig> for EngineContext {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            return_step: config.return_step,
            calendar: config.trading_calendar,
        }
    }
}

struct Boundaries {
    month_start: i64,
    month_end: i64,
    year_start: i64,
    year_end: i64,
}

impl Boundaries {
    fn starting_at(first: Date) -> Self {
        let month_start = if first.is_first_of_month() {
            first.epoch_day()
        } else {
            compute_next_month_start(first)
        };
        let year_start = if first.is_first_of_year() {
            first.epoch_day()
        } else {
            compute_next_year_start(first)
        };
        Self {
            month_start,
            month_end: compute_month_end(first),
            year_start,
            year_end: compute_year_end(first),
        }
    }
}

/// Walks every day of `phase`, firing day-end, month-start, month-end,
/// year-start and year-end callbacks in that order.
pub fn run_phase(
    phase: &mut Phase,
    spec: &mut Specification,
    ctx: &EngineContext,
    path_index: u64,
) -> Result<Vec<Snapshot>, PathError> {
    let kind = phase.kind();
    let first = phase.start;
    let mut snapshots = Vec::new();

    phase.on_phase_start(spec);
    snapshots.push(Snapshot::capture(
        first,
        SnapshotKind::PhaseStart,
        kind,
        &spec.live,
    ));

    let mut next = Boundaries::starting_at(first);
    let mut last = first;

    for offset in 0..phase.duration_days {
        let date = first.plus_days(offset);
        let day = date.epoch_day();

        phase.on_day_end(spec, date, ctx);

        if day == next.month_start {
            phase.on_month_start(spec);
            next.month_start = compute_next_month_start(date);
        }
        if day == next.month_end {
            phase.on_month_end(spec, ctx);
            next.month_end = compute_month_end(date.plus_days(1));
        }
        if day == next.year_start {
            phase.on_year_start(spec);
            next.year_start = compute_next_year_start(date);
        }
        if day == next.year_end {
            phase.on_year_end(spec);
            next.year_end = compute_year_end(date.plus_days(1));
            snapshots.push(Snapshot::capture(date, SnapshotKind::YearEnd, kind, &spec.live));
        }

        if let Some(field) = spec.live.non_finite_field() {
            return Err(PathError::NonFinite {
                path: path_index,
                field,
                day,
            });
        }
        last = date;
    }

    snapshots.push(Snapshot::capture(last, SnapshotKind::PhaseEnd, kind, &spec.live));
    Ok(snapshots)
}

pub fn run_path(
    phases: &mut [Phase],
    spec: &mut Specification,
    ctx: &EngineContext,
    path_index: u64,
) -> Result<RunResult, PathError> {
    let mut result = RunResult::new(path_index);
    for phase in phases.iter_mut() {
        result.extend(run_phase(phase, spec, ctx, path_index)?);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::distribution::Distribution;
    use crate::core::phase::{Deposit, Passive, PhaseAction, PhaseDraft, Withdraw, chain_phases};
    use crate::core::returner::{Inflation, Returner};
    use crate::core::tax::TaxRule;
    use crate::core::types::{LiveData, PhaseKind};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn daily_ctx() -> EngineContext {
        EngineContext {
            return_step: ReturnStep::Daily,
            calendar: TradingCalendar::Weekdays,
        }
    }

    fn zero_volatility_spec(tax: TaxRule) -> Specification {
        let distribution = Distribution::normal(0.0, 0.0, ReturnStep::Daily.dt()).expect("valid");
        Specification::new(
            LiveData::new(),
            tax,
            Returner::stochastic(distribution, ReturnStep::Daily, ChaCha8Rng::seed_from_u64(1)),
            Inflation::default(),
        )
    }

    fn draft(months: u32, action: PhaseAction) -> PhaseDraft {
        PhaseDraft {
            duration_months: months,
            action,
            exemptions: Vec::new(),
        }
    }

    #[test]
    fn twelve_month_deposit_with_zero_returns() {
        let mut phases = chain_phases(
            Date::of(2025, 1, 1),
            vec![draft(12, PhaseAction::Deposit(Deposit::new(1_000.0, 100.0, 0.0)))],
        )
        .expect("valid timeline");
        let mut spec = zero_volatility_spec(TaxRule::default());

        let result = run_path(&mut phases, &mut spec, &daily_ctx(), 0).expect("path runs");
        let last = result.last().expect("has snapshots");
        assert_approx(last.data.capital, 2_200.0);
        assert_approx(last.data.deposited, 2_200.0);
        assert_approx(last.data.returned, 0.0);
        assert_eq!(last.kind, SnapshotKind::PhaseEnd);
        assert_eq!(last.epoch_day, Date::of(2025, 12, 31).epoch_day());
    }

    #[test]
    fn snapshots_bracket_phase_and_mark_year_ends() {
        let mut phases = chain_phases(
            Date::of(2025, 7, 1),
            vec![draft(12, PhaseAction::Passive(Passive::new()))],
        )
        .expect("valid timeline");
        let mut spec = zero_volatility_spec(TaxRule::default());
        let result = run_path(&mut phases, &mut spec, &daily_ctx(), 0).expect("path runs");

        let kinds: Vec<SnapshotKind> = result.snapshots.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SnapshotKind::PhaseStart,
                SnapshotKind::YearEnd,
                SnapshotKind::PhaseEnd
            ]
        );
        assert_eq!(result.snapshots[1].year, 2025);
        assert_eq!(result.snapshots[2].year, 2026);
        assert_eq!(result.snapshots[2].data.session_duration, 365);
    }

    #[test]
    fn callbacks_fire_once_per_boundary() {
        // Simple 12%/year, monthly ticks: exactly one tick per month end.
        let ctx = EngineContext {
            return_step: ReturnStep::Monthly,
            calendar: TradingCalendar::Weekdays,
        };
        let mut spec = Specification::new(
            LiveData::with_capital(1_000.0),
            TaxRule::default(),
            Returner::simple(12.0, ReturnStep::Monthly),
            Inflation::default(),
        );
        let mut phases = chain_phases(
            Date::of(2024, 1, 15),
            vec![draft(24, PhaseAction::Passive(Passive::new()))],
        )
        .expect("valid timeline");
        run_path(&mut phases, &mut spec, &ctx, 0).expect("path runs");
        // 2024-01-15 .. 2026-01-14 contains 24 month ends.
        assert_approx(spec.live.capital, 1_000.0 * 1.01_f64.powi(24));
    }

    #[test]
    fn daily_ticks_skip_weekends() {
        let mut spec = Specification::new(
            LiveData::with_capital(1_000.0),
            TaxRule::default(),
            Returner::simple(25.2, ReturnStep::Daily),
            Inflation::default(),
        );
        // 2025-01-04 is a Saturday; one week has five trading days.
        let mut phase = Phase::new(
            Date::of(2025, 1, 4),
            1,
            PhaseAction::Passive(Passive::new()),
            Vec::new(),
        )
        .expect("valid phase");
        phase.duration_days = 7;
        run_phase(&mut phase, &mut spec, &daily_ctx(), 0).expect("phase runs");
        assert_approx(spec.live.capital, 1_000.0 * 1.001_f64.powi(5));
    }

    #[test]
    fn phases_share_one_specification() {
        let mut phases = chain_phases(
            Date::of(2025, 1, 1),
            vec![
                draft(12, PhaseAction::Deposit(Deposit::new(1_200.0, 0.0, 0.0))),
                draft(12, PhaseAction::Withdraw(Withdraw::fixed(100.0))),
            ],
        )
        .expect("valid timeline");
        let mut spec = zero_volatility_spec(TaxRule::capital(10.0));
        let result = run_path(&mut phases, &mut spec, &daily_ctx(), 0).expect("path runs");

        let last = result.last().expect("has snapshots");
        assert_eq!(last.phase, PhaseKind::Withdraw);
        assert_approx(last.data.capital, 0.0);
        assert_approx(last.data.withdrawn, 1_200.0);
        assert_approx(last.data.tax, 120.0);
        assert_approx(last.data.net_earnings, 1_080.0);
        assert_eq!(last.data.total_duration_alive, 365 + 365);
    }

    #[test]
    fn notional_tax_is_charged_at_each_year_end() {
        let ctx = EngineContext {
            return_step: ReturnStep::Monthly,
            calendar: TradingCalendar::EveryDay,
        };
        let mut spec = Specification::new(
            LiveData::with_capital(12_000.0),
            TaxRule::notional(50.0),
            Returner::simple(12.0, ReturnStep::Monthly),
            Inflation::default(),
        );
        let mut phases = chain_phases(
            Date::of(2025, 1, 1),
            vec![draft(12, PhaseAction::Passive(Passive::new()))],
        )
        .expect("valid timeline");
        let result = run_path(&mut phases, &mut spec, &ctx, 0).expect("path runs");

        let gain = 12_000.0 * (1.01_f64.powi(12) - 1.0);
        let year_end = &result.snapshots[1];
        assert_eq!(year_end.kind, SnapshotKind::YearEnd);
        assert_approx(year_end.data.tax, gain * 0.5);
        assert_approx(year_end.data.capital, 12_000.0 + gain * 0.5);
    }

    #[test]
    fn non_finite_capital_fails_the_path() {
        let mut spec = Specification::new(
            LiveData::with_capital(1.0),
            TaxRule::default(),
            Returner::simple(f64::INFINITY, ReturnStep::Daily),
            Inflation::default(),
        );
        let mut phases = chain_phases(
            Date::of(2025, 1, 6),
            vec![draft(1, PhaseAction::Passive(Passive::new()))],
        )
        .expect("valid timeline");
        let err = run_path(&mut phases, &mut spec, &daily_ctx(), 7).expect_err("must fail");
        assert!(matches!(
            err,
            PathError::NonFinite {
                path: 7,
                field: "capital",
                ..
            }
        ));
    }
}

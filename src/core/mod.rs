mod calendar;
mod distribution;
mod engine;
mod error;
mod history;
mod montecarlo;
mod phase;
mod returner;
mod seed;
mod stats;
mod tax;
mod types;

pub use calendar::{Date, TradingCalendar};
pub use distribution::{Distribution, RegimeProvider};
pub use engine::{EngineContext, run_path, run_phase};
pub use error::{ConfigError, PathError, RunError};
pub use history::{HistoricalFit, PricePoint, fit_from_file, load_prices, parse_prices};
pub use montecarlo::{AdmissionPermit, MonteCarlo, MonteCarloRun};
pub use phase::{
    Deposit, Passive, Phase, PhaseAction, PhaseDraft, Specification, Withdraw, WithdrawMode,
    chain_phases,
};
pub use returner::{Inflation, Returner};
pub use seed::{INFLATION_LABEL, REGIME_LABEL, RETURNS_LABEL, SeedPolicy, derive_seed};
pub use stats::{
    Metric, MetricScope, MetricSummary, SummaryStats, YearlySummary, aggregate,
    aggregate_metrics, percentile_from_grid, percentile_sorted,
};
pub use tax::{ExemptionCard, ExemptionKind, StockExemption, TaxRule};
pub use types::{
    LiveData, PhaseKind, ReturnStep, RunResult, SimulationConfig, Snapshot, SnapshotKind,
};

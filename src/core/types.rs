use serde::{Deserialize, Serialize};

use super::calendar::{Date, TradingCalendar};
use super::error::ConfigError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PhaseKind {
    Deposit,
    Passive,
    Withdraw,
}

impl PhaseKind {
    pub fn name(self) -> &'static str {
        match self {
            PhaseKind::Deposit => "deposit",
            PhaseKind::Passive => "passive",
            PhaseKind::Withdraw => "withdraw",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReturnStep {
    #[default]
    Daily,
    Monthly,
}

impl ReturnStep {
    pub fn dt(self) -> f64 {
        match self {
            ReturnStep::Daily => 1.0 / 252.0,
            ReturnStep::Monthly => 1.0 / 12.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationConfig {
    pub return_step: ReturnStep,
    pub trading_calendar: TradingCalendar,
    pub worker_threads: usize,
    pub batch_size: usize,
    pub progress_interval: usize,
    pub queue_capacity: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            return_step: ReturnStep::Daily,
            trading_calendar: TradingCalendar::Weekdays,
            worker_threads: default_worker_threads(),
            batch_size: 10_000,
            progress_interval: 1_000,
            queue_capacity: 4,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::invalid("workerThreads", "must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batchSize", "must be > 0"));
        }
        if self.progress_interval == 0 {
            return Err(ConfigError::invalid("progressInterval", "must be > 0"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("queueCapacity", "must be > 0"));
        }
        Ok(())
    }
}

/// `max(3, available_parallelism - 1)`, leaving a core for the host.
pub fn default_worker_threads() -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    available.saturating_sub(1).max(3)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveData {
    pub capital: f64,
    pub deposited: f64,
    pub returned: f64,
    pub withdrawn: f64,
    pub passive_returned: f64,
    pub tax: f64,
    /// Cumulative price-level factor, 1.0 at path start.
    pub inflation: f64,
    pub net_earnings: f64,
    pub fee: f64,

    pub current_return: f64,
    pub current_tax: f64,
    pub current_withdraw: f64,
    pub current_net: f64,

    pub session_duration: u32,
    pub total_duration_alive: u32,
    pub phase_name: String,
}

impl LiveData {
    pub fn new() -> Self {
        Self {
            inflation: 1.0,
            ..Self::default()
        }
    }

    pub fn with_capital(capital: f64) -> Self {
        Self {
            capital,
            ..Self::new()
        }
    }

    pub fn reset_session(&mut self, phase_name: &str) {
        self.session_duration = 0;
        self.phase_name = phase_name.to_string();
    }

    pub fn advance_day(&mut self) {
        self.session_duration += 1;
        self.total_duration_alive += 1;
    }

    pub fn non_finite_field(&self) -> Option<&'static str> {
        [
            ("capital", self.capital),
            ("returned", self.returned),
            ("tax", self.tax),
            ("withdrawn", self.withdrawn),
            ("inflation", self.inflation),
            ("fee", self.fee),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite())
        .map(|(name, _)| name)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotKind {
    PhaseStart,
    YearEnd,
    PhaseEnd,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub epoch_day: i64,
    pub year: i32,
    pub kind: SnapshotKind,
    pub phase: PhaseKind,
    pub data: LiveData,
}

impl Snapshot {
    pub fn capture(date: Date, kind: SnapshotKind, phase: PhaseKind, data: &LiveData) -> Self {
        Self {
            epoch_day: date.epoch_day(),
            year: date.year(),
            kind,
            phase,
            data: data.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub path_index: u64,
    pub snapshots: Vec<Snapshot>,
}

impl RunResult {
    pub fn new(path_index: u64) -> Self {
        Self {
            path_index,
            snapshots: Vec::new(),
        }
    }

    pub fn extend(&mut self, phase_snapshots: Vec<Snapshot>) {
        self.snapshots.extend(phase_snapshots);
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_data_starts_with_unit_inflation() {
        let live = LiveData::new();
        assert_eq!(live.inflation, 1.0);
        assert_eq!(live.capital, 0.0);
    }

    #[test]
    fn non_finite_field_reports_first_offender() {
        let mut live = LiveData::with_capital(10.0);
        assert_eq!(live.non_finite_field(), None);
        live.tax = f64::NAN;
        assert_eq!(live.non_finite_field(), Some("tax"));
        live.capital = f64::INFINITY;
        assert_eq!(live.non_finite_field(), Some("capital"));
    }

    #[test]
    fn default_worker_threads_leave_headroom() {
        assert!(default_worker_threads() >= 3);
    }

    #[test]
    fn config_rejects_zero_batch() {
        let config = SimulationConfig {
            batch_size: 0,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{"returnStep":"monthly","tradingCalendar":"everyDay"}"#)
                .expect("valid config");
        assert_eq!(config.return_step, ReturnStep::Monthly);
        assert_eq!(config.trading_calendar, TradingCalendar::EveryDay);
        assert_eq!(config.batch_size, 10_000);
        assert_eq!(config.progress_interval, 1_000);
    }
}

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::core::{
    ConfigError, Date, Deposit, Distribution, ExemptionCard, ExemptionKind, Inflation, LiveData,
    INFLATION_LABEL, MetricSummary, MonteCarlo, Passive, Phase, PhaseAction, PhaseDraft,
    REGIME_LABEL, RETURNS_LABEL, RegimeProvider, ReturnStep, Returner, RunError, SeedPolicy,
    SimulationConfig, Specification, StockExemption, TaxRule, Withdraw, YearlySummary, aggregate,
    aggregate_metrics, chain_phases, fit_from_file,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid scenario JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("Cannot access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliReturnStep {
    Daily,
    Monthly,
}

impl From<CliReturnStep> for ReturnStep {
    fn from(value: CliReturnStep) -> Self {
        match value {
            CliReturnStep::Daily => ReturnStep::Daily,
            CliReturnStep::Monthly => ReturnStep::Monthly,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "fire-engine",
    about = "Monte Carlo simulation of deposit, passive and withdraw phases"
)]
pub struct Cli {
    #[arg(help = "Scenario JSON file")]
    scenario: PathBuf,
    #[arg(long, help = "Number of simulated paths; overrides the scenario")]
    paths: Option<usize>,
    #[arg(
        long,
        allow_negative_numbers = true,
        help = "Master seed; negative draws from OS entropy"
    )]
    seed: Option<i64>,
    #[arg(long)]
    threads: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    progress_interval: Option<usize>,
    #[arg(long, value_enum)]
    return_step: Option<CliReturnStep>,
    #[arg(long, help = "Write the JSON report here instead of stdout")]
    output: Option<PathBuf>,
    #[arg(long, help = "Keep the 0.1% percentile grid in every summary")]
    include_grid: bool,
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ScenarioPayload {
    label: String,
    start_date: String,
    paths: usize,
    seed: i64,
    initial_capital: f64,
    phases: Vec<PhasePayload>,
    tax: TaxPayload,
    returns: ReturnsPayload,
    inflation: InflationPayload,
    yearly_fee_percentage: f64,
    config: SimulationConfig,
}

impl Default for ScenarioPayload {
    fn default() -> Self {
        Self {
            label: "scenario".to_string(),
            start_date: String::new(),
            paths: 1_000,
            seed: 42,
            initial_capital: 0.0,
            phases: Vec::new(),
            tax: TaxPayload::default(),
            returns: ReturnsPayload::default(),
            inflation: InflationPayload::default(),
            yearly_fee_percentage: 0.0,
            config: SimulationConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PhasePayload {
    #[serde(rename = "type")]
    kind: String,
    duration_months: u32,
    initial_deposit: f64,
    monthly_deposit: f64,
    yearly_increase_percentage: f64,
    withdraw_amount: f64,
    withdraw_rate: f64,
    tax_exemptions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TaxPayload {
    rule: String,
    percentage: f64,
    exemption_card: Option<ExemptionCardPayload>,
    stock_exemption: Option<StockExemptionPayload>,
}

impl Default for TaxPayload {
    fn default() -> Self {
        Self {
            rule: "capital".to_string(),
            percentage: 0.0,
            exemption_card: None,
            stock_exemption: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ExemptionCardPayload {
    limit: f64,
    yearly_increase: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StockExemptionPayload {
    percentage: f64,
    limit: f64,
    yearly_increase: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ReturnsPayload {
    #[serde(rename = "type")]
    kind: String,
    percentage: f64,
    mean: f64,
    stddev: f64,
    drift: f64,
    volatility: f64,
    mu: f64,
    sigma: f64,
    nu: f64,
    regimes: Vec<ReturnsPayload>,
    initial_regime: usize,
    expected_duration_months: Vec<f64>,
    switch_weights: Vec<Vec<f64>>,
    data_file: Option<PathBuf>,
}

impl Default for ReturnsPayload {
    fn default() -> Self {
        Self {
            kind: "simple".to_string(),
            percentage: 0.0,
            mean: 0.0,
            stddev: 0.0,
            drift: 0.0,
            volatility: 0.0,
            mu: 0.0,
            sigma: 0.0,
            nu: 5.0,
            regimes: Vec::new(),
            initial_regime: 0,
            expected_duration_months: Vec::new(),
            switch_weights: Vec::new(),
            data_file: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct InflationPayload {
    #[serde(rename = "type")]
    kind: String,
    percentage: f64,
    mean: f64,
    stddev: f64,
}

impl Default for InflationPayload {
    fn default() -> Self {
        Self {
            kind: "fixed".to_string(),
            percentage: 0.0,
            mean: 0.0,
            stddev: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub label: String,
    pub paths: usize,
    pub seed: i64,
    pub phases: Vec<Phase>,
    pub specification: Specification,
    pub config: SimulationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    pub label: String,
    pub seed: i64,
    pub requested: usize,
    pub completed: usize,
    pub failed: usize,
    pub yearly: Vec<YearlySummary>,
    pub metrics: Vec<MetricSummary>,
}

impl SimulateResponse {
    fn without_grids(mut self) -> Self {
        for summary in &mut self.yearly {
            summary.stats.percentile_grid.clear();
        }
        for summary in &mut self.metrics {
            summary.stats.percentile_grid.clear();
        }
        self
    }
}

pub fn scenario_from_json(json: &str) -> Result<Scenario, ApiError> {
    let payload = serde_json::from_str::<ScenarioPayload>(json)?;
    Ok(scenario_from_payload(payload)?)
}

fn read_payload(path: &Path) -> Result<ScenarioPayload, ApiError> {
    let json = fs::read_to_string(path).map_err(|source| ApiError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str::<ScenarioPayload>(&json)?)
}

fn scenario_from_payload(payload: ScenarioPayload) -> Result<Scenario, ConfigError> {
    payload.config.validate()?;
    if payload.paths == 0 {
        return Err(ConfigError::invalid("paths", "must be > 0"));
    }

    let start = Date::parse(&payload.start_date)?;
    let drafts = payload
        .phases
        .iter()
        .map(phase_draft)
        .collect::<Result<Vec<_>, _>>()?;
    let phases = chain_phases(start, drafts)?;

    let policy = SeedPolicy::from_master(payload.seed);
    let step = payload.config.return_step;
    let returner = build_returner(&payload.returns, step, policy)?;
    let inflation = build_inflation(&payload.inflation, policy)?;
    let tax = build_tax(&payload.tax)?;

    if !payload.yearly_fee_percentage.is_finite() || payload.yearly_fee_percentage < 0.0 {
        return Err(ConfigError::invalid("yearlyFeePercentage", "must be >= 0"));
    }

    let specification = Specification::new(
        LiveData::with_capital(payload.initial_capital),
        tax,
        returner,
        inflation,
    )
    .with_yearly_fee(payload.yearly_fee_percentage);

    Ok(Scenario {
        label: payload.label,
        paths: payload.paths,
        seed: payload.seed,
        phases,
        specification,
        config: payload.config,
    })
}

fn phase_draft(payload: &PhasePayload) -> Result<PhaseDraft, ConfigError> {
    let action = match payload.kind.as_str() {
        "deposit" => PhaseAction::Deposit(Deposit::new(
            payload.initial_deposit,
            payload.monthly_deposit,
            payload.yearly_increase_percentage,
        )),
        "passive" => PhaseAction::Passive(Passive::new()),
        "withdraw" if payload.withdraw_rate > 0.0 => {
            PhaseAction::Withdraw(Withdraw::rate(payload.withdraw_rate))
        }
        "withdraw" => PhaseAction::Withdraw(Withdraw::fixed(payload.withdraw_amount)),
        other => return Err(ConfigError::unknown("phase type", other)),
    };

    let exemptions = payload
        .tax_exemptions
        .iter()
        .map(|key| match key.as_str() {
            "exemptionCard" => Ok(ExemptionKind::ExemptionCard),
            "stockExemption" => Ok(ExemptionKind::StockExemption),
            other => Err(ConfigError::unknown("tax exemption", other)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PhaseDraft {
        duration_months: payload.duration_months,
        action,
        exemptions,
    })
}

fn build_tax(payload: &TaxPayload) -> Result<TaxRule, ConfigError> {
    if !(0.0..=100.0).contains(&payload.percentage) {
        return Err(ConfigError::invalid("tax.percentage", "must be between 0 and 100"));
    }
    match payload.rule.as_str() {
        "capital" => Ok(TaxRule::capital(payload.percentage)),
        "notional" => {
            let mut rule = TaxRule::notional(payload.percentage);
            if let Some(card) = &payload.exemption_card {
                rule = rule.with_exemption_card(ExemptionCard::new(card.limit, card.yearly_increase));
            }
            if let Some(stock) = &payload.stock_exemption {
                rule = rule.with_stock_exemption(StockExemption::new(
                    stock.percentage,
                    stock.limit,
                    stock.yearly_increase,
                ));
            }
            Ok(rule)
        }
        other => Err(ConfigError::unknown("tax rule", other)),
    }
}

fn build_distribution(
    payload: &ReturnsPayload,
    dt: f64,
    policy: SeedPolicy,
) -> Result<Distribution, ConfigError> {
    match payload.kind.as_str() {
        "normal" => Distribution::normal(payload.mean, payload.stddev, dt),
        "brownian" => Distribution::brownian_motion(payload.drift, payload.volatility, dt),
        "studentT" => Distribution::student_t(payload.mu, payload.sigma, payload.nu, dt),
        "historical" => {
            let Some(path) = &payload.data_file else {
                return Err(ConfigError::invalid("returns.dataFile", "required for historical returns"));
            };
            let fit = fit_from_file(path);
            info!(
                path = %path.display(),
                observations = fit.observations,
                mean = fit.mean,
                stddev = fit.stddev,
                "Fitted historical returns"
            );
            fit.to_distribution(dt)
        }
        "regime" => {
            let regimes = payload
                .regimes
                .iter()
                .map(|regime| build_distribution(regime, dt, policy))
                .collect::<Result<Vec<_>, _>>()?;
            let provider = RegimeProvider::new(
                payload.initial_regime,
                payload.expected_duration_months.clone(),
                payload.switch_weights.clone(),
                policy.stream(REGIME_LABEL, None),
            )?;
            Distribution::regime(regimes, provider)
        }
        other => Err(ConfigError::unknown("return model", other)),
    }
}

fn build_returner(
    payload: &ReturnsPayload,
    step: ReturnStep,
    policy: SeedPolicy,
) -> Result<Returner, ConfigError> {
    if payload.kind == "simple" {
        return Ok(Returner::simple(payload.percentage, step));
    }
    let distribution = build_distribution(payload, step.dt(), policy)?;
    Ok(Returner::stochastic(
        distribution,
        step,
        policy.stream(RETURNS_LABEL, None),
    ))
}

fn build_inflation(payload: &InflationPayload, policy: SeedPolicy) -> Result<Inflation, ConfigError> {
    match payload.kind.as_str() {
        "fixed" => Ok(Inflation::fixed(payload.percentage)),
        "normal" => {
            if !payload.stddev.is_finite() || payload.stddev < 0.0 {
                return Err(ConfigError::invalid("inflation.stddev", "must be >= 0"));
            }
            Ok(Inflation::normal(
                payload.mean,
                payload.stddev,
                policy.stream(INFLATION_LABEL, None),
            ))
        }
        other => Err(ConfigError::unknown("inflation model", other)),
    }
}

pub fn run_scenario(scenario: &Scenario) -> Result<SimulateResponse, ApiError> {
    let engine = MonteCarlo::new(scenario.config.clone())?;
    let run = engine.run(
        scenario.paths,
        &scenario.phases,
        &scenario.specification,
        scenario.seed,
    )?;

    Ok(SimulateResponse {
        label: scenario.label.clone(),
        seed: scenario.seed,
        requested: run.requested,
        completed: run.completed(),
        failed: run.failed,
        yearly: aggregate(&run.results, &scenario.label),
        metrics: aggregate_metrics(&run.results, &scenario.label),
    })
}

fn apply_overrides(scenario: &mut Scenario, cli: &Cli) -> Result<(), ApiError> {
    if let Some(v) = cli.paths {
        if v == 0 {
            return Err(ConfigError::invalid("paths", "--paths must be > 0").into());
        }
        scenario.paths = v;
    }
    if let Some(v) = cli.threads {
        scenario.config.worker_threads = v;
    }
    if let Some(v) = cli.batch_size {
        scenario.config.batch_size = v;
    }
    if let Some(v) = cli.progress_interval {
        scenario.config.progress_interval = v;
    }
    scenario.config.validate()?;
    Ok(())
}

/// The return step shapes every distribution's dt, so it is applied to the
/// raw JSON before the scenario is built.
fn load_with_overrides(cli: &Cli) -> Result<Scenario, ApiError> {
    let mut payload = read_payload(&cli.scenario)?;
    if let Some(step) = cli.return_step {
        payload.config.return_step = step.into();
    }
    if let Some(seed) = cli.seed {
        payload.seed = seed;
    }
    let mut scenario = scenario_from_payload(payload)?;
    apply_overrides(&mut scenario, cli)?;
    Ok(scenario)
}

fn run_with(cli: &Cli) -> Result<String, ApiError> {
    let scenario = load_with_overrides(cli)?;
    let mut response = run_scenario(&scenario)?;
    if !cli.include_grid {
        response = response.without_grids();
    }
    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };

    match &cli.output {
        Some(path) => {
            fs::write(path, &rendered).map_err(|source| ApiError::Io {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), "Wrote report");
            Ok(String::new())
        }
        None => Ok(rendered),
    }
}

pub fn run_cli() -> Result<(), ApiError> {
    let cli = Cli::parse();
    let rendered = run_with(&cli)?;
    if !rendered.is_empty() {
        println!("{rendered}");
    }
    Ok(())
}

use super::calendar::Date;
use super::engine::EngineContext;
use super::error::ConfigError;
use super::returner::{Inflation, Returner};
use super::seed::SeedPolicy;
use super::tax::{ExemptionKind, TaxRule};
use super::types::{LiveData, PhaseKind, ReturnStep};

/// Everything one path mutates while it runs. Phases of the same path share
/// one specification; paths never do.
#[derive(Debug, Clone)]
pub struct Specification {
    pub live: LiveData,
    pub tax: TaxRule,
    pub returner: Returner,
    pub inflation: Inflation,
    pub yearly_fee_percent: f64,
}

impl Specification {
    pub fn new(live: LiveData, tax: TaxRule, returner: Returner, inflation: Inflation) -> Self {
        Self {
            live,
            tax,
            returner,
            inflation,
            yearly_fee_percent: 0.0,
        }
    }

    pub fn with_yearly_fee(mut self, percent: f64) -> Self {
        self.yearly_fee_percent = percent;
        self
    }

    pub fn fork(&self, policy: SeedPolicy, path_index: u64) -> Self {
        Self {
            live: self.live.clone(),
            tax: self.tax.clone(),
            returner: self.returner.fork(policy, path_index),
            inflation: self.inflation.fork(policy, path_index),
            yearly_fee_percent: self.yearly_fee_percent,
        }
    }

    fn apply_return(&mut self) {
        let live = &mut self.live;
        if live.capital <= 0.0 {
            return;
        }
        let r = self.returner.calculate_return(live.capital);
        live.capital += r;
        live.returned += r;
        live.current_return += r;
    }

    fn apply_fee(&mut self) {
        if self.yearly_fee_percent <= 0.0 || self.live.capital <= 0.0 {
            return;
        }
        let fee = self.live.capital * self.yearly_fee_percent / 100.0;
        self.live.capital -= fee;
        self.live.fee += fee;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deposit {
    pub initial_deposit: f64,
    pub monthly_deposit: f64,
    pub yearly_increase_percent: f64,
    deposits_made: u32,
}

impl Deposit {
    pub fn new(initial_deposit: f64, monthly_deposit: f64, yearly_increase_percent: f64) -> Self {
        Self {
            initial_deposit,
            monthly_deposit,
            yearly_increase_percent,
            deposits_made: 0,
        }
    }

    fn on_month_end(&mut self, live: &mut LiveData) {
        let mut amount = self.monthly_deposit;
        if self.deposits_made == 0 {
            amount += self.initial_deposit;
        }
        live.capital += amount;
        live.deposited += amount;
        self.deposits_made += 1;
        if self.deposits_made % 12 == 0 {
            self.monthly_deposit *= 1.0 + self.yearly_increase_percent / 100.0;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Passive {
    previously_returned: f64,
}

impl Passive {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_month_end(&mut self, live: &mut LiveData) {
        let period = live.returned - self.previously_returned;
        live.passive_returned += period;
        self.previously_returned = live.returned;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WithdrawMode {
    Fixed { monthly_amount: f64 },
    Rate { yearly_percent: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Withdraw {
    pub mode: WithdrawMode,
}

impl Withdraw {
    pub fn fixed(monthly_amount: f64) -> Self {
        Self {
            mode: WithdrawMode::Fixed { monthly_amount },
        }
    }

    pub fn rate(yearly_percent: f64) -> Self {
        Self {
            mode: WithdrawMode::Rate { yearly_percent },
        }
    }

    fn on_month_end(&mut self, live: &mut LiveData, tax: &TaxRule) {
        let requested = match self.mode {
            WithdrawMode::Fixed { monthly_amount } => monthly_amount * live.inflation,
            WithdrawMode::Rate { yearly_percent } => live.capital * yearly_percent / 100.0 / 12.0,
        };
        let amount = requested.min(live.capital.max(0.0)).max(0.0);
        let withheld = tax.withdrawal_tax(amount);
        let net = amount - withheld;

        live.capital -= amount;
        live.withdrawn += amount;
        live.tax += withheld;
        live.net_earnings += net;
        live.current_withdraw += amount;
        live.current_tax += withheld;
        live.current_net += net;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseAction {
    Deposit(Deposit),
    Passive(Passive),
    Withdraw(Withdraw),
}

impl PhaseAction {
    pub fn kind(&self) -> PhaseKind {
        match self {
            PhaseAction::Deposit(_) => PhaseKind::Deposit,
            PhaseAction::Passive(_) => PhaseKind::Passive,
            PhaseAction::Withdraw(_) => PhaseKind::Withdraw,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    pub start: Date,
    pub duration_days: i64,
    pub action: PhaseAction,
    pub exemptions: Vec<ExemptionKind>,
}

impl Phase {
    pub fn new(
        start: Date,
        duration_months: u32,
        action: PhaseAction,
        exemptions: Vec<ExemptionKind>,
    ) -> Result<Self, ConfigError> {
        if duration_months == 0 {
            return Err(ConfigError::invalid("durationMonths", "must be > 0"));
        }
        let end = start.plus_months(duration_months as i64);
        Ok(Self {
            start,
            duration_days: end.epoch_day() - start.epoch_day(),
            action,
            exemptions,
        })
    }

    pub fn kind(&self) -> PhaseKind {
        self.action.kind()
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn end(&self) -> Date {
        self.start.plus_days(self.duration_days)
    }

    pub fn on_phase_start(&mut self, spec: &mut Specification) {
        spec.live.reset_session(self.name());
        if let PhaseAction::Passive(passive) = &mut self.action {
            passive.previously_returned = spec.live.returned;
        }
    }

    pub fn on_day_end(&mut self, spec: &mut Specification, date: Date, ctx: &EngineContext) {
        spec.live.advance_day();
        if ctx.return_step == ReturnStep::Daily && ctx.calendar.is_trading_day(date) {
            spec.apply_return();
        }
    }

    pub fn on_month_start(&mut self, spec: &mut Specification) {
        let live = &mut spec.live;
        live.current_return = 0.0;
        live.current_tax = 0.0;
        live.current_withdraw = 0.0;
        live.current_net = 0.0;
    }

    pub fn on_month_end(&mut self, spec: &mut Specification, ctx: &EngineContext) {
        if ctx.return_step == ReturnStep::Monthly {
            spec.apply_return();
        }
        spec.returner.on_month_end();

        match &mut self.action {
            PhaseAction::Deposit(deposit) => deposit.on_month_end(&mut spec.live),
            PhaseAction::Passive(passive) => passive.on_month_end(&mut spec.live),
            PhaseAction::Withdraw(withdraw) => withdraw.on_month_end(&mut spec.live, &spec.tax),
        }
    }

    pub fn on_year_start(&mut self, spec: &mut Specification) {
        spec.live.current_tax = 0.0;
    }

    /// Tax, then fee, then inflation.
    pub fn on_year_end(&mut self, spec: &mut Specification) {
        spec.tax.apply_year_end(&mut spec.live, &self.exemptions);
        spec.apply_fee();
        spec.live.inflation = spec.inflation.accrue(spec.live.inflation);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseDraft {
    pub duration_months: u32,
    pub action: PhaseAction,
    pub exemptions: Vec<ExemptionKind>,
}

pub fn chain_phases(start: Date, drafts: Vec<PhaseDraft>) -> Result<Vec<Phase>, ConfigError> {
    if drafts.is_empty() {
        return Err(ConfigError::NoPhases);
    }
    let mut phases = Vec::with_capacity(drafts.len());
    let mut next_start = start;
    for draft in drafts {
        let phase = Phase::new(next_start, draft.duration_months, draft.action, draft.exemptions)?;
        next_start = phase.end();
        phases.push(phase);
    }
    Ok(phases)
}

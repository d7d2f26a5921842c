use std::f64::consts::PI;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::{ContinuousCDF, StudentsT};

use super::error::ConfigError;
use super::seed::{REGIME_LABEL, SeedPolicy};

/// Log-return distribution sampled once per return tick.
///
/// `dt` is the tick length in years (1/252 daily, 1/12 monthly); every
/// variant scales its drift by `dt` and its noise by `sqrt(dt)`.
#[derive(Debug, Clone)]
pub enum Distribution {
    Normal {
        mean: f64,
        stddev: f64,
        dt: f64,
    },
    BrownianMotion {
        drift: f64,
        volatility: f64,
        dt: f64,
    },
    StudentT {
        mu: f64,
        sigma: f64,
        t: StudentsT,
        dt: f64,
    },
    Regime(RegimeDistribution),
}

#[derive(Debug, Clone)]
pub struct RegimeDistribution {
    regimes: Vec<Distribution>,
    provider: RegimeProvider,
}

impl Distribution {
    pub fn normal(mean: f64, stddev: f64, dt: f64) -> Result<Self, ConfigError> {
        check_finite("mean", mean)?;
        check_non_negative("stddev", stddev)?;
        check_step(dt)?;
        Ok(Distribution::Normal { mean, stddev, dt })
    }

    pub fn brownian_motion(drift: f64, volatility: f64, dt: f64) -> Result<Self, ConfigError> {
        check_finite("drift", drift)?;
        check_non_negative("volatility", volatility)?;
        check_step(dt)?;
        Ok(Distribution::BrownianMotion {
            drift,
            volatility,
            dt,
        })
    }

    pub fn student_t(mu: f64, sigma: f64, nu: f64, dt: f64) -> Result<Self, ConfigError> {
        check_finite("mu", mu)?;
        check_non_negative("sigma", sigma)?;
        check_step(dt)?;
        let t = StudentsT::new(0.0, 1.0, nu)
            .map_err(|e| ConfigError::invalid("degreesOfFreedom", e.to_string()))?;
        Ok(Distribution::StudentT { mu, sigma, t, dt })
    }

    pub fn regime(regimes: Vec<Distribution>, provider: RegimeProvider) -> Result<Self, ConfigError> {
        if regimes.len() != provider.regime_count() {
            return Err(ConfigError::RegimeCountMismatch {
                field: "distributions",
                expected: provider.regime_count(),
                actual: regimes.len(),
            });
        }
        Ok(Distribution::Regime(RegimeDistribution { regimes, provider }))
    }

    pub fn sample(&mut self, rng: &mut ChaCha8Rng) -> f64 {
        match self {
            Distribution::Normal { mean, stddev, dt } => {
                *mean * *dt + *stddev * dt.sqrt() * standard_normal(rng)
            }
            Distribution::BrownianMotion {
                drift,
                volatility,
                dt,
            } => {
                (*drift - 0.5 * *volatility * *volatility) * *dt
                    + *volatility * dt.sqrt() * standard_normal(rng)
            }
            Distribution::StudentT { mu, sigma, t, dt } => {
                let u = rng.gen_range(1e-12..1.0 - 1e-12);
                *mu * *dt + *sigma * dt.sqrt() * t.inverse_cdf(u)
            }
            Distribution::Regime(inner) => {
                let index = inner.provider.current();
                inner.regimes[index].sample(rng)
            }
        }
    }

    pub fn advance_regime(&mut self) {
        if let Distribution::Regime(inner) = self {
            inner.provider.tick();
        }
    }

    pub fn fork(&self, policy: SeedPolicy, path_index: u64) -> Self {
        match self {
            Distribution::Regime(inner) => Distribution::Regime(RegimeDistribution {
                regimes: inner
                    .regimes
                    .iter()
                    .map(|d| d.fork(policy, path_index))
                    .collect(),
                provider: inner.provider.fork(policy, path_index),
            }),
            other => other.clone(),
        }
    }
}

pub fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Markov regime chain whose switch hazard is the reciprocal of each
/// regime's expected duration in months.
#[derive(Debug, Clone)]
pub struct RegimeProvider {
    current: usize,
    expected_duration_months: Vec<f64>,
    switch_weights: Vec<Vec<f64>>,
    rng: ChaCha8Rng,
}

impl RegimeProvider {
    pub fn new(
        initial: usize,
        expected_duration_months: Vec<f64>,
        switch_weights: Vec<Vec<f64>>,
        rng: ChaCha8Rng,
    ) -> Result<Self, ConfigError> {
        let count = expected_duration_months.len();
        if count == 0 {
            return Err(ConfigError::invalid(
                "expectedDurationMonths",
                "at least one regime is required",
            ));
        }
        if switch_weights.len() != count {
            return Err(ConfigError::RegimeCountMismatch {
                field: "switchWeights",
                expected: count,
                actual: switch_weights.len(),
            });
        }
        if let Some(row) = switch_weights.iter().find(|row| row.len() != count) {
            return Err(ConfigError::NonSquareMatrix {
                expected: count,
                actual: row.len(),
            });
        }
        if switch_weights.iter().flatten().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::invalid(
                "switchWeights",
                "weights must be finite and >= 0",
            ));
        }
        if initial >= count {
            return Err(ConfigError::RegimeOutOfRange {
                index: initial,
                count,
            });
        }
        Ok(Self {
            current: initial,
            expected_duration_months,
            switch_weights,
            rng,
        })
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn regime_count(&self) -> usize {
        self.expected_duration_months.len()
    }

    pub fn switch_probability(&self, regime: usize) -> f64 {
        let duration = self.expected_duration_months[regime];
        if duration <= 0.0 {
            1.0
        } else {
            (1.0 / duration).clamp(0.0, 1.0)
        }
    }

    pub fn tick(&mut self) -> usize {
        let count = self.regime_count();
        if count < 2 {
            return self.current;
        }
        let p = self.switch_probability(self.current);
        if self.rng.gen_range(0.0..1.0) >= p {
            return self.current;
        }

        let row = &self.switch_weights[self.current];
        let total: f64 = row
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != self.current)
            .map(|(_, w)| *w)
            .sum();

        self.current = if total > 0.0 {
            let mut target = self.rng.gen_range(0.0..total);
            let mut chosen = self.current;
            for (j, w) in row.iter().enumerate() {
                if j == self.current || *w <= 0.0 {
                    continue;
                }
                chosen = j;
                if target < *w {
                    break;
                }
                target -= *w;
            }
            chosen
        } else {
            let offset = self.rng.gen_range(1..count);
            (self.current + offset) % count
        };
        self.current
    }

    pub fn fork(&self, policy: SeedPolicy, path_index: u64) -> Self {
        Self {
            current: self.current,
            expected_duration_months: self.expected_duration_months.clone(),
            switch_weights: self.switch_weights.clone(),
            rng: policy.stream(REGIME_LABEL, Some(path_index)),
        }
    }
}

fn check_finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be finite"))
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be finite and >= 0"))
    }
}

fn check_step(dt: f64) -> Result<(), ConfigError> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid("dt", "must be > 0"))
    }
}

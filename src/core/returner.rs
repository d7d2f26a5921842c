use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::distribution::{Distribution, standard_normal};
use super::seed::{INFLATION_LABEL, RETURNS_LABEL, SeedPolicy};
use super::types::ReturnStep;

#[derive(Debug, Clone)]
pub enum ReturnModel {
    Simple { yearly_percent: f64 },
    Stochastic(Distribution),
}

#[derive(Debug, Clone)]
pub struct Returner {
    model: ReturnModel,
    dt: f64,
    rng: ChaCha8Rng,
}

impl Returner {
    pub fn simple(yearly_percent: f64, step: ReturnStep) -> Self {
        Self {
            model: ReturnModel::Simple { yearly_percent },
            dt: step.dt(),
            rng: ChaCha8Rng::seed_from_u64(0),
        }
    }

    pub fn stochastic(distribution: Distribution, step: ReturnStep, rng: ChaCha8Rng) -> Self {
        Self {
            model: ReturnModel::Stochastic(distribution),
            dt: step.dt(),
            rng,
        }
    }

    pub fn calculate_return(&mut self, capital: f64) -> f64 {
        match &mut self.model {
            ReturnModel::Simple { yearly_percent } => capital * *yearly_percent / 100.0 * self.dt,
            ReturnModel::Stochastic(distribution) => {
                let sample = distribution.sample(&mut self.rng);
                capital * sample.exp() - capital
            }
        }
    }

    pub fn on_month_end(&mut self) {
        if let ReturnModel::Stochastic(distribution) = &mut self.model {
            distribution.advance_regime();
        }
    }

    pub fn fork(&self, policy: SeedPolicy, path_index: u64) -> Self {
        let model = match &self.model {
            ReturnModel::Stochastic(distribution) => {
                ReturnModel::Stochastic(distribution.fork(policy, path_index))
            }
            simple => simple.clone(),
        };
        Self {
            model,
            dt: self.dt,
            rng: policy.stream(RETURNS_LABEL, Some(path_index)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Inflation {
    Fixed {
        rate_percent: f64,
    },
    Normal {
        mean_percent: f64,
        stddev_percent: f64,
        rng: ChaCha8Rng,
    },
}

impl Default for Inflation {
    fn default() -> Self {
        Inflation::Fixed { rate_percent: 0.0 }
    }
}

impl Inflation {
    pub fn fixed(rate_percent: f64) -> Self {
        Inflation::Fixed { rate_percent }
    }

    pub fn normal(mean_percent: f64, stddev_percent: f64, rng: ChaCha8Rng) -> Self {
        Inflation::Normal {
            mean_percent,
            stddev_percent,
            rng,
        }
    }

    pub fn next_rate(&mut self) -> f64 {
        match self {
            Inflation::Fixed { rate_percent } => *rate_percent,
            Inflation::Normal {
                mean_percent,
                stddev_percent,
                rng,
            } => *mean_percent + *stddev_percent * standard_normal(rng),
        }
    }

    pub fn accrue(&mut self, factor: f64) -> f64 {
        factor * (1.0 + self.next_rate() / 100.0)
    }

    pub fn fork(&self, policy: SeedPolicy, path_index: u64) -> Self {
        match self {
            Inflation::Fixed { rate_percent } => Inflation::fixed(*rate_percent),
            Inflation::Normal {
                mean_percent,
                stddev_percent,
                ..
            } => Inflation::normal(
                *mean_percent,
                *stddev_percent,
                policy.stream(INFLATION_LABEL, Some(path_index)),
            ),
        }
    }
}

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use super::calendar::Date;
use super::distribution::Distribution;
use super::error::ConfigError;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub date: Date,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalFit {
    pub mean: f64,
    pub stddev: f64,
    pub observations: usize,
}

impl HistoricalFit {
    pub fn from_prices(points: &[PricePoint]) -> Self {
        let log_returns: Vec<f64> = points
            .windows(2)
            .filter(|w| w[0].price > 0.0 && w[1].price > 0.0)
            .map(|w| (w[1].price / w[0].price).ln())
            .collect();

        if log_returns.is_empty() {
            return Self {
                mean: 0.0,
                stddev: 0.0,
                observations: 0,
            };
        }

        let n = log_returns.len() as f64;
        let mean = log_returns.iter().sum::<f64>() / n;
        let var = log_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;

        Self {
            mean: mean * TRADING_DAYS_PER_YEAR,
            stddev: var.sqrt() * TRADING_DAYS_PER_YEAR.sqrt(),
            observations: log_returns.len(),
        }
    }

    pub fn to_distribution(self, dt: f64) -> Result<Distribution, ConfigError> {
        Distribution::normal(self.mean, self.stddev, dt)
    }
}

pub fn parse_prices(contents: &str) -> Vec<PricePoint> {
    let mut points: Vec<PricePoint> = contents
        .lines()
        .filter_map(|line| {
            let mut cols = line.split(',');
            let date = Date::parse(cols.next()?.trim()).ok()?;
            let price = cols.next()?.trim().parse::<f64>().ok()?;
            price.is_finite().then_some(PricePoint { date, price })
        })
        .collect();
    points.sort_by_key(|p| p.date);
    points
}

/// Loads a price CSV. A missing or unreadable file is logged and yields an
/// empty series, which fits to mean = stddev = 0.
pub fn load_prices(path: &Path) -> Vec<PricePoint> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let points = parse_prices(&contents);
            debug!(path = %path.display(), rows = points.len(), "loaded historical prices");
            points
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "historical data unavailable, fitting to an empty series"
            );
            Vec::new()
        }
    }
}

pub fn fit_from_file(path: &Path) -> HistoricalFit {
    HistoricalFit::from_prices(&load_prices(path))
}

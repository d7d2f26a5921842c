//! Reduces per-path snapshot series to percentile and risk summaries.
//!
//! Every summary is order-independent: results may arrive from workers in
//! any order.

use std::collections::BTreeMap;

use serde::Serialize;

use super::types::{LiveData, PhaseKind, RunResult, Snapshot, SnapshotKind};

pub const PERCENTILE_GRID_POINTS: usize = 1001;

pub const VAR_PERCENTILE: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    pub path_count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub p5: f64,
    pub p25: f64,
    pub p75: f64,
    pub p95: f64,
    pub var: f64,
    pub cvar: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub percentile_grid: Vec<f64>,
}

impl SummaryStats {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                path_count: 0,
                mean: 0.0,
                median: 0.0,
                min: 0.0,
                max: 0.0,
                std_dev: 0.0,
                p5: 0.0,
                p25: 0.0,
                p75: 0.0,
                p95: 0.0,
                var: 0.0,
                cvar: 0.0,
                percentile_grid: vec![0.0; PERCENTILE_GRID_POINTS],
            };
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let var = percentile_sorted(&sorted, VAR_PERCENTILE);

        Self {
            path_count: sorted.len(),
            mean,
            median: percentile_sorted(&sorted, 50.0),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            std_dev: variance.sqrt(),
            p5: percentile_sorted(&sorted, 5.0),
            p25: percentile_sorted(&sorted, 25.0),
            p75: percentile_sorted(&sorted, 75.0),
            p95: percentile_sorted(&sorted, 95.0),
            var,
            cvar: conditional_value_at_risk(&sorted, var),
            percentile_grid: (0..PERCENTILE_GRID_POINTS)
                .map(|i| percentile_sorted(&sorted, i as f64 / 10.0))
                .collect(),
        }
    }
}

/// Linear interpolation between closest ranks: rank = p/100 * (n - 1).
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let w = rank - lower as f64;
        sorted[lower] * (1.0 - w) + sorted[upper] * w
    }
}

pub fn conditional_value_at_risk(sorted: &[f64], var: f64) -> f64 {
    let tail: Vec<f64> = sorted.iter().copied().take_while(|v| *v <= var).collect();
    if tail.is_empty() {
        return var;
    }
    tail.iter().sum::<f64>() / tail.len() as f64
}

pub fn percentile_from_grid(grid: &[f64], p: f64) -> f64 {
    if grid.is_empty() {
        return 0.0;
    }
    let steps = (grid.len() - 1) as f64;
    let rank = (p.clamp(0.0, 100.0) / 100.0) * steps;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let w = rank - lower as f64;
    grid[lower] * (1.0 - w) + grid[upper] * w
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlySummary {
    pub label: String,
    pub phase_name: String,
    pub year: i32,
    #[serde(flatten)]
    pub stats: SummaryStats,
    pub negative_capital_percentage: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricScope {
    Yearly,
    PhaseTotal,
    OverallTotal,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    Capital,
    Deposit,
    Withdraw,
    Tax,
    Return,
    Inflation,
    Fee,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Capital,
        Metric::Deposit,
        Metric::Withdraw,
        Metric::Tax,
        Metric::Return,
        Metric::Inflation,
        Metric::Fee,
    ];

    pub fn read(self, live: &LiveData) -> f64 {
        match self {
            Metric::Capital => live.capital,
            Metric::Deposit => live.deposited,
            Metric::Withdraw => live.withdrawn,
            Metric::Tax => live.tax,
            Metric::Return => live.returned,
            Metric::Inflation => live.inflation,
            Metric::Fee => live.fee,
        }
    }

    pub fn is_flow(self) -> bool {
        !matches!(self, Metric::Capital | Metric::Inflation)
    }

    fn over(self, start: &LiveData, end: &LiveData) -> f64 {
        if self.is_flow() {
            self.read(end) - self.read(start)
        } else {
            self.read(end)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub label: String,
    pub scope: MetricScope,
    pub phase_name: Option<String>,
    pub year: Option<i32>,
    pub metric: Metric,
    #[serde(flatten)]
    pub stats: SummaryStats,
}

type BucketKey = (i32, PhaseKind);

// One `(year, phase)` bucket of one path. A phase kind can recur within a
// year, so flows are summed over every segment and failure is sticky.
struct PathBucket<'a> {
    end: &'a Snapshot,
    flows: [f64; Metric::ALL.len()],
    failed: bool,
}

impl<'a> PathBucket<'a> {
    fn open(baseline: &Snapshot, end: &'a Snapshot, failed: bool) -> Self {
        let mut flows = [0.0; Metric::ALL.len()];
        for (m, metric) in Metric::ALL.iter().enumerate() {
            flows[m] = metric.read(&end.data) - metric.read(&baseline.data);
        }
        Self { end, flows, failed }
    }

    fn merge(&mut self, later: PathBucket<'a>) {
        for (total, flow) in self.flows.iter_mut().zip(later.flows) {
            *total += flow;
        }
        self.end = later.end;
        self.failed |= later.failed;
    }

    fn value(&self, m: usize) -> f64 {
        let metric = Metric::ALL[m];
        if metric.is_flow() {
            self.flows[m]
        } else {
            metric.read(&self.end.data)
        }
    }
}

/// Capital at or below zero counts as failure outside deposit phases, except
/// a passive phase still sitting at exactly zero before any funding.
fn is_failure(snapshot: &Snapshot, funded: bool) -> bool {
    let capital = snapshot.data.capital;
    if capital > 0.0 {
        return false;
    }
    match snapshot.phase {
        PhaseKind::Deposit => false,
        PhaseKind::Passive => funded || capital < 0.0,
        PhaseKind::Withdraw => true,
    }
}

fn path_buckets(result: &RunResult) -> BTreeMap<BucketKey, PathBucket<'_>> {
    let mut buckets = BTreeMap::new();
    let Some(first) = result.snapshots.first() else {
        return buckets;
    };

    let mut funded = false;
    let mut baseline = first;
    let mut current: Option<(BucketKey, &Snapshot, bool)> = None;

    for snapshot in &result.snapshots {
        funded |= snapshot.data.deposited > 0.0 || snapshot.data.capital > 0.0;
        let key = (snapshot.year, snapshot.phase);

        if let Some((open_key, end, failed)) = current {
            if open_key != key {
                close_segment(&mut buckets, open_key, PathBucket::open(baseline, end, failed));
                baseline = end;
            }
        }
        current = Some((key, snapshot, is_failure(snapshot, funded)));
    }
    if let Some((key, end, failed)) = current {
        close_segment(&mut buckets, key, PathBucket::open(baseline, end, failed));
    }
    buckets
}

fn close_segment<'a>(
    buckets: &mut BTreeMap<BucketKey, PathBucket<'a>>,
    key: BucketKey,
    segment: PathBucket<'a>,
) {
    match buckets.get_mut(&key) {
        Some(bucket) => bucket.merge(segment),
        None => {
            buckets.insert(key, segment);
        }
    }
}

pub fn aggregate(results: &[RunResult], label: &str) -> Vec<YearlySummary> {
    let mut capital: BTreeMap<BucketKey, (Vec<f64>, usize)> = BTreeMap::new();
    for result in results {
        for (key, bucket) in path_buckets(result) {
            let entry = capital.entry(key).or_default();
            entry.0.push(bucket.end.data.capital);
            if bucket.failed {
                entry.1 += 1;
            }
        }
    }

    capital
        .into_iter()
        .map(|((year, phase), (values, failures))| {
            let stats = SummaryStats::from_values(&values);
            let negative_capital_percentage = if values.is_empty() {
                0.0
            } else {
                failures as f64 / values.len() as f64 * 100.0
            };
            YearlySummary {
                label: label.to_string(),
                phase_name: phase.name().to_string(),
                year,
                stats,
                negative_capital_percentage,
            }
        })
        .collect()
}

pub fn aggregate_metrics(results: &[RunResult], label: &str) -> Vec<MetricSummary> {
    let mut yearly: BTreeMap<(BucketKey, usize), Vec<f64>> = BTreeMap::new();
    let mut phase_totals: BTreeMap<(PhaseKind, usize), Vec<f64>> = BTreeMap::new();
    let mut overall: BTreeMap<usize, Vec<f64>> = BTreeMap::new();

    for result in results {
        for (key, bucket) in path_buckets(result) {
            for m in 0..Metric::ALL.len() {
                yearly.entry((key, m)).or_default().push(bucket.value(m));
            }
        }

        let mut per_phase: BTreeMap<PhaseKind, [f64; Metric::ALL.len()]> = BTreeMap::new();
        let mut phase_start: Option<&Snapshot> = None;
        for snapshot in &result.snapshots {
            match snapshot.kind {
                SnapshotKind::PhaseStart => phase_start = Some(snapshot),
                SnapshotKind::PhaseEnd => {
                    let Some(start) = phase_start.take() else {
                        continue;
                    };
                    let totals = per_phase
                        .entry(snapshot.phase)
                        .or_insert([0.0; Metric::ALL.len()]);
                    for (m, metric) in Metric::ALL.iter().enumerate() {
                        let value = metric.over(&start.data, &snapshot.data);
                        if metric.is_flow() {
                            totals[m] += value;
                        } else {
                            totals[m] = value;
                        }
                    }
                }
                SnapshotKind::YearEnd => {}
            }
        }
        for (phase, totals) in per_phase {
            for (m, value) in totals.into_iter().enumerate() {
                phase_totals.entry((phase, m)).or_default().push(value);
            }
        }

        if let (Some(first), Some(last)) = (result.snapshots.first(), result.snapshots.last()) {
            for (m, metric) in Metric::ALL.iter().enumerate() {
                overall
                    .entry(m)
                    .or_default()
                    .push(metric.over(&first.data, &last.data));
            }
        }
    }

    let mut summaries = Vec::new();
    for (((year, phase), m), values) in yearly {
        summaries.push(MetricSummary {
            label: label.to_string(),
            scope: MetricScope::Yearly,
            phase_name: Some(phase.name().to_string()),
            year: Some(year),
            metric: Metric::ALL[m],
            stats: SummaryStats::from_values(&values),
        });
    }
    for ((phase, m), values) in phase_totals {
        summaries.push(MetricSummary {
            label: label.to_string(),
            scope: MetricScope::PhaseTotal,
            phase_name: Some(phase.name().to_string()),
            year: None,
            metric: Metric::ALL[m],
            stats: SummaryStats::from_values(&values),
        });
    }
    for (m, values) in overall {
        summaries.push(MetricSummary {
            label: label.to_string(),
            scope: MetricScope::OverallTotal,
            phase_name: None,
            year: None,
            metric: Metric::ALL[m],
            stats: SummaryStats::from_values(&values),
        });
    }
    summaries
}

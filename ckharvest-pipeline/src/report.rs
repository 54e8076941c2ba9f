//! Descriptive statistics and process/quality correlations over a dataset

use crate::dataset::{read_table, Table};
use ckharvest_core::HarvestResult;
use serde::Serialize;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

const DAYS_PER_YEAR: f64 = 365.25;
const LANGUAGE_COLUMN: &str = "primary_language";

/// Correlations over fewer complete rows are not reported
pub const MIN_CORRELATION_SAMPLES: usize = 11;
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

/// A numeric dataset column, optionally rescaled
#[derive(Debug, Clone, Copy)]
struct Metric {
    label: &'static str,
    column: &'static str,
    scale: f64,
}

impl Metric {
    const fn column(label: &'static str, column: &'static str) -> Self {
        Self {
            label,
            column,
            scale: 1.0,
        }
    }
}

const AGE_YEARS: Metric = Metric {
    label: "Age (years)",
    column: "age_days",
    scale: 1.0 / DAYS_PER_YEAR,
};

const DESCRIBED_METRICS: [Metric; 11] = [
    AGE_YEARS,
    Metric::column("Releases", "total_releases"),
    Metric::column("Stars", "stars"),
    Metric::column("LOC (class mean)", "avg_loc"),
    Metric::column("CBO", "avg_cbo"),
    Metric::column("DIT", "avg_dit"),
    Metric::column("LCOM", "avg_lcom"),
    Metric::column("Classes", "total_classes"),
    Metric::column("Methods", "total_methods"),
    Metric::column("WMC", "avg_wmc"),
    Metric::column("Cyclomatic complexity", "avg_cc"),
];

const QUALITY_METRICS: [Metric; 3] = [
    Metric::column("CBO", "avg_cbo"),
    Metric::column("DIT", "avg_dit"),
    Metric::column("LCOM", "avg_lcom"),
];

struct QuestionSpec {
    id: &'static str,
    question: &'static str,
    process: Metric,
}

const QUESTIONS: [QuestionSpec; 4] = [
    QuestionSpec {
        id: "RQ01",
        question: "How does repository popularity relate to its quality attributes?",
        process: Metric::column("Popularity (stars)", "stars"),
    },
    QuestionSpec {
        id: "RQ02",
        question: "How does repository maturity relate to its quality attributes?",
        process: Metric {
            label: "Maturity (years)",
            ..AGE_YEARS
        },
    },
    QuestionSpec {
        id: "RQ03",
        question: "How does repository activity relate to its quality attributes?",
        process: Metric::column("Activity (releases)", "total_releases"),
    },
    QuestionSpec {
        id: "RQ04",
        question: "How does repository size relate to its quality attributes?",
        process: Metric::column("Size (LOC)", "avg_loc"),
    },
];

/// Summary of one numeric column, ignoring blank or unparsable cells
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DescriptiveStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Most frequent value; the smallest one when several tie
    pub mode: f64,
    /// Sample standard deviation, 0 for a single value
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl DescriptiveStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;

        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        };

        let std_dev = if count > 1 {
            let squares: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
            (squares / (count - 1) as f64).sqrt()
        } else {
            0.0
        };

        let mut mode = sorted[0];
        let mut mode_run = 0;
        let mut start = 0;
        while start < count {
            let end = start + sorted[start..].iter().take_while(|v| **v == sorted[start]).count();
            if end - start > mode_run {
                mode_run = end - start;
                mode = sorted[start];
            }
            start = end;
        }

        Some(Self {
            count,
            mean,
            median,
            mode,
            std_dev,
            min: sorted[0],
            max: sorted[count - 1],
        })
    }
}

/// Pearson and Spearman coefficients with two-sided p-values
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Correlation {
    pub samples: usize,
    pub pearson: f64,
    pub pearson_p: f64,
    pub spearman: f64,
    pub spearman_p: f64,
}

impl Correlation {
    /// `None` below [`MIN_CORRELATION_SAMPLES`] pairs or when either side is constant
    pub fn between(x: &[f64], y: &[f64]) -> Option<Self> {
        if x.len() != y.len() || x.len() < MIN_CORRELATION_SAMPLES {
            return None;
        }

        let samples = x.len();
        let pearson = pearson(x, y)?;
        let spearman = pearson_of_ranks(x, y)?;

        Some(Self {
            samples,
            pearson,
            pearson_p: p_value(pearson, samples),
            spearman,
            spearman_p: p_value(spearman, samples),
        })
    }

    pub fn strength(&self) -> CorrelationStrength {
        CorrelationStrength::from_coefficient(self.pearson)
    }

    pub fn is_significant(&self) -> bool {
        self.pearson_p < SIGNIFICANCE_LEVEL
    }
}

/// Band of `|r|`: below 0.1, 0.3, 0.5, 0.7, and above
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CorrelationStrength {
    Negligible,
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl CorrelationStrength {
    pub fn from_coefficient(r: f64) -> Self {
        match r.abs() {
            v if v < 0.1 => Self::Negligible,
            v if v < 0.3 => Self::Weak,
            v if v < 0.5 => Self::Moderate,
            v if v < 0.7 => Self::Strong,
            _ => Self::VeryStrong,
        }
    }
}

impl fmt::Display for CorrelationStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Negligible => "negligible",
            Self::Weak => "weak",
            Self::Moderate => "moderate",
            Self::Strong => "strong",
            Self::VeryStrong => "very strong",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricStatistics {
    pub metric: &'static str,
    pub stats: DescriptiveStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageShare {
    pub language: String,
    pub repositories: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityCorrelation {
    pub metric: &'static str,
    pub correlation: Option<Correlation>,
}

/// One process metric against every quality metric
#[derive(Debug, Clone, Serialize)]
pub struct ResearchQuestion {
    pub id: &'static str,
    pub question: &'static str,
    pub process_metric: &'static str,
    /// Process metric over the rows complete in every compared column
    pub summary: Option<DescriptiveStats>,
    pub correlations: Vec<QualityCorrelation>,
}

impl ResearchQuestion {
    /// Significant correlation with the largest `|r|`
    pub fn strongest_finding(&self) -> Option<(&'static str, &Correlation)> {
        self.correlations
            .iter()
            .filter_map(|c| c.correlation.as_ref().map(|corr| (c.metric, corr)))
            .filter(|(_, corr)| corr.is_significant())
            .max_by(|a, b| a.1.pearson.abs().total_cmp(&b.1.pearson.abs()))
    }
}

/// Statistics over a finished dataset, rendered as markdown by `Display`
#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub dataset: String,
    pub repositories: usize,
    pub statistics: Vec<MetricStatistics>,
    pub languages: Vec<LanguageShare>,
    pub research_questions: Vec<ResearchQuestion>,
}

impl DatasetReport {
    pub fn from_dataset(path: &Path) -> HarvestResult<Self> {
        let table = read_table(path)?;

        let statistics = DESCRIBED_METRICS
            .iter()
            .filter_map(|metric| {
                let index = table.headers.iter().position(|h| h.trim() == metric.column)?;
                let values: Vec<f64> = column_values(&table, index, metric.scale)
                    .into_iter()
                    .flatten()
                    .collect();
                DescriptiveStats::from_values(&values).map(|stats| MetricStatistics {
                    metric: metric.label,
                    stats,
                })
            })
            .collect();

        let languages = language_distribution(&table)?;
        let research_questions = research_questions(&table)?;

        info!(
            dataset = %path.display(),
            repositories = table.rows.len(),
            "Dataset report computed"
        );

        Ok(Self {
            dataset: path.display().to_string(),
            repositories: table.rows.len(),
            statistics,
            languages,
            research_questions,
        })
    }
}

fn language_distribution(table: &Table) -> HarvestResult<Vec<LanguageShare>> {
    let index = table.column(LANGUAGE_COLUMN)?;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for row in &table.rows {
        let language = row.get(index).unwrap_or("").trim();
        if !language.is_empty() {
            *counts.entry(language.to_string()).or_default() += 1;
        }
    }

    let mut languages: Vec<LanguageShare> = counts
        .into_iter()
        .map(|(language, repositories)| LanguageShare {
            language,
            repositories,
        })
        .collect();
    languages.sort_by(|a, b| {
        b.repositories
            .cmp(&a.repositories)
            .then_with(|| a.language.cmp(&b.language))
    });
    Ok(languages)
}

fn research_questions(table: &Table) -> HarvestResult<Vec<ResearchQuestion>> {
    let process: Vec<Vec<Option<f64>>> = QUESTIONS
        .iter()
        .map(|q| -> HarvestResult<Vec<Option<f64>>> {
            Ok(column_values(table, table.column(q.process.column)?, q.process.scale))
        })
        .collect::<HarvestResult<_>>()?;
    let quality: Vec<Vec<Option<f64>>> = QUALITY_METRICS
        .iter()
        .map(|m| -> HarvestResult<Vec<Option<f64>>> {
            Ok(column_values(table, table.column(m.column)?, m.scale))
        })
        .collect::<HarvestResult<_>>()?;

    // rows missing any compared value are dropped from every question
    let complete: Vec<usize> = (0..table.rows.len())
        .filter(|&row| {
            process
                .iter()
                .chain(quality.iter())
                .all(|column| column[row].is_some())
        })
        .collect();
    debug!(
        rows = table.rows.len(),
        complete = complete.len(),
        "Rows usable for correlations"
    );

    let pick = |column: &[Option<f64>]| -> Vec<f64> {
        complete.iter().filter_map(|&row| column[row]).collect()
    };

    Ok(QUESTIONS
        .iter()
        .zip(&process)
        .map(|(spec, process_column)| {
            let x = pick(process_column);
            ResearchQuestion {
                id: spec.id,
                question: spec.question,
                process_metric: spec.process.label,
                summary: DescriptiveStats::from_values(&x),
                correlations: QUALITY_METRICS
                    .iter()
                    .zip(&quality)
                    .map(|(metric, quality_column)| QualityCorrelation {
                        metric: metric.label,
                        correlation: Correlation::between(&x, &pick(quality_column)),
                    })
                    .collect(),
            }
        })
        .collect())
}

fn column_values(table: &Table, index: usize, scale: f64) -> Vec<Option<f64>> {
    table
        .rows
        .iter()
        .map(|row| parse_cell(row.get(index).unwrap_or("")).map(|v| v * scale))
        .collect()
}

fn parse_cell(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let (covariance, variance_x, variance_y) = x
        .iter()
        .zip(y)
        .map(|(x, y)| {
            let dx = x - mean_x;
            let dy = y - mean_y;
            (dx * dy, dx * dx, dy * dy)
        })
        .fold((0.0, 0.0, 0.0), |acc, (cov, var_x, var_y)| {
            (acc.0 + cov, acc.1 + var_x, acc.2 + var_y)
        });

    if variance_x == 0.0 || variance_y == 0.0 {
        return None;
    }

    Some((covariance / (variance_x * variance_y).sqrt()).clamp(-1.0, 1.0))
}

fn pearson_of_ranks(x: &[f64], y: &[f64]) -> Option<f64> {
    pearson(&ranks(x), &ranks(y))
}

/// 1-based ranks; tied values share the average of their positions
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end + 1) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = rank;
        }
        start = end;
    }
    ranks
}

/// Two-sided p-value of `r` over `samples` pairs, Student's t with n - 2 degrees of freedom
fn p_value(r: f64, samples: usize) -> f64 {
    if r.abs() >= 1.0 {
        return 0.0;
    }
    let df = samples.saturating_sub(2) as f64;
    if df == 0.0 {
        return 1.0;
    }
    let t_squared = r * r * df / (1.0 - r * r);
    regularized_incomplete_beta(df / 2.0, 0.5, df / (df + t_squared))
}

fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let front =
        (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln()).exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Lentz evaluation of the incomplete beta continued fraction
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITERATIONS: usize = 300;
    const EPSILON: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };

    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - (a + b) * x / (a + 1.0));
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let even = m * (b - m) * x / ((a - 1.0 + m2) * (a + m2));
        d = 1.0 / guard(1.0 + even * d);
        c = guard(1.0 + even / c);
        h *= d * c;

        let odd = -(a + m) * (a + b + m) * x / ((a + m2) * (a + 1.0 + m2));
        d = 1.0 / guard(1.0 + odd * d);
        c = guard(1.0 + odd / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}

/// Lanczos approximation (g = 7), valid for x >= 0.5
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    let x = x - 1.0;
    let t = x + 7.5;
    let series = COEFFICIENTS
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEFFICIENTS[0], |sum, (i, c)| sum + c / (x + i as f64));

    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

impl fmt::Display for DatasetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# CK Quality Report")?;
        writeln!(f)?;
        writeln!(f, "- Dataset: `{}`", self.dataset)?;
        writeln!(f, "- Repositories: **{}**", self.repositories)?;
        writeln!(f)?;

        writeln!(f, "## Descriptive Statistics")?;
        writeln!(f)?;
        writeln!(
            f,
            "| Metric | Count | Mean | Median | Mode | Std Dev | Min | Max |"
        )?;
        writeln!(f, "|--------|------:|-----:|-------:|-----:|--------:|----:|----:|")?;
        for entry in &self.statistics {
            let s = &entry.stats;
            writeln!(
                f,
                "| {} | {} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} |",
                entry.metric, s.count, s.mean, s.median, s.mode, s.std_dev, s.min, s.max
            )?;
        }
        writeln!(f)?;

        writeln!(f, "## Languages")?;
        writeln!(f)?;
        writeln!(f, "| Language | Repositories | Share |")?;
        writeln!(f, "|----------|-------------:|------:|")?;
        for share in &self.languages {
            let percent = if self.repositories == 0 {
                0.0
            } else {
                share.repositories as f64 * 100.0 / self.repositories as f64
            };
            writeln!(
                f,
                "| {} | {} | {:.1}% |",
                share.language, share.repositories, percent
            )?;
        }
        writeln!(f)?;

        writeln!(f, "## Research Questions")?;
        for rq in &self.research_questions {
            writeln!(f)?;
            writeln!(f, "### {}: {}", rq.id, rq.question)?;
            writeln!(f)?;
            match &rq.summary {
                Some(s) => writeln!(
                    f,
                    "**{}** over {} complete rows: mean {:.2}, median {:.2}, std dev {:.2}, range {:.2} to {:.2}",
                    rq.process_metric, s.count, s.mean, s.median, s.std_dev, s.min, s.max
                )?,
                None => writeln!(f, "**{}**: no complete rows", rq.process_metric)?,
            }
            writeln!(f)?;
            writeln!(
                f,
                "| Quality Metric | Pearson (r) | p-value | Spearman (ρ) | p-value | Interpretation |"
            )?;
            writeln!(f, "|----------------|------------:|--------:|-------------:|--------:|----------------|")?;
            for entry in &rq.correlations {
                match &entry.correlation {
                    Some(c) => writeln!(
                        f,
                        "| {} | {:.3} | {:.3} | {:.3} | {:.3} | {} ({}) |",
                        entry.metric,
                        c.pearson,
                        c.pearson_p,
                        c.spearman,
                        c.spearman_p,
                        c.strength(),
                        if c.is_significant() {
                            "significant"
                        } else {
                            "not significant"
                        }
                    )?,
                    None => writeln!(
                        f,
                        "| {} | n/a | n/a | n/a | n/a | insufficient data |",
                        entry.metric
                    )?,
                }
            }
            writeln!(f)?;
            match rq.strongest_finding() {
                Some((metric, c)) => writeln!(
                    f,
                    "Main finding: strongest significant correlation is {} with {} (r = {:.3})",
                    if c.pearson > 0.0 { "positive" } else { "negative" },
                    metric,
                    c.pearson
                )?,
                None => writeln!(f, "Main finding: no significant correlation")?,
            }
        }

        Ok(())
    }
}

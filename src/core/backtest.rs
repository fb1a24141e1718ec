use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{EngineError, EngineResult};
use super::withdrawal::{WithdrawalPlanner, WithdrawalStrategy};

const EPS: f64 = 1e-9;

/// Annual total returns in percent: S&P 500 with dividends and the 10-year
/// US Treasury bond.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalReturn {
    pub year: i32,
    pub stocks: f64,
    pub bonds: f64,
}

const fn row(year: i32, stocks: f64, bonds: f64) -> HistoricalReturn {
    HistoricalReturn {
        year,
        stocks,
        bonds,
    }
}

pub const HISTORICAL_RETURNS: [HistoricalReturn; 96] = [
    row(1928, 43.81, 0.84),
    row(1929, -8.30, 4.20),
    row(1930, -25.12, 4.54),
    row(1931, -43.84, -2.56),
    row(1932, -8.64, 8.79),
    row(1933, 49.98, 1.86),
    row(1934, -1.19, 7.96),
    row(1935, 46.74, 4.47),
    row(1936, 31.94, 5.02),
    row(1937, -35.34, 1.38),
    row(1938, 29.28, 4.21),
    row(1939, -1.10, 4.41),
    row(1940, -10.67, 5.40),
    row(1941, -12.77, -2.02),
    row(1942, 19.17, 2.29),
    row(1943, 25.06, 2.49),
    row(1944, 19.03, 2.58),
    row(1945, 35.82, 3.80),
    row(1946, -8.43, 3.13),
    row(1947, 5.20, 0.92),
    row(1948, 5.70, 1.95),
    row(1949, 18.30, 4.66),
    row(1950, 30.81, 0.43),
    row(1951, 23.68, -0.30),
    row(1952, 18.15, 2.27),
    row(1953, -1.21, 4.14),
    row(1954, 52.56, 3.29),
    row(1955, 32.60, -1.34),
    row(1956, 7.44, -2.26),
    row(1957, -10.46, 6.80),
    row(1958, 43.72, -2.10),
    row(1959, 12.06, -2.65),
    row(1960, 0.34, 11.64),
    row(1961, 26.64, 2.06),
    row(1962, -8.81, 5.69),
    row(1963, 22.61, 1.68),
    row(1964, 16.42, 3.73),
    row(1965, 12.40, 0.72),
    row(1966, -9.97, 2.91),
    row(1967, 23.80, -1.58),
    row(1968, 10.81, 3.27),
    row(1969, -8.24, -5.01),
    row(1970, 3.56, 16.75),
    row(1971, 14.22, 9.79),
    row(1972, 18.76, 2.82),
    row(1973, -14.31, 3.66),
    row(1974, -25.90, 1.99),
    row(1975, 37.00, 3.61),
    row(1976, 23.83, 15.98),
    row(1977, -6.98, 1.29),
    row(1978, 6.51, -0.78),
    row(1979, 18.52, 0.67),
    row(1980, 31.74, -2.99),
    row(1981, -4.70, 8.20),
    row(1982, 20.42, 32.81),
    row(1983, 22.34, 3.20),
    row(1984, 6.15, 13.73),
    row(1985, 31.24, 25.71),
    row(1986, 18.49, 24.28),
    row(1987, 5.81, -4.96),
    row(1988, 16.54, 8.22),
    row(1989, 31.48, 17.69),
    row(1990, -3.06, 6.24),
    row(1991, 30.23, 15.00),
    row(1992, 7.49, 9.36),
    row(1993, 9.97, 14.21),
    row(1994, 1.33, -8.04),
    row(1995, 37.20, 23.48),
    row(1996, 22.68, 1.43),
    row(1997, 33.10, 9.94),
    row(1998, 28.34, 14.92),
    row(1999, 20.89, -8.25),
    row(2000, -9.03, 16.66),
    row(2001, -11.85, 5.57),
    row(2002, -21.97, 15.12),
    row(2003, 28.36, 0.38),
    row(2004, 10.74, 4.49),
    row(2005, 4.83, 2.87),
    row(2006, 15.61, 1.96),
    row(2007, 5.48, 10.21),
    row(2008, -36.55, 20.10),
    row(2009, 25.94, -11.12),
    row(2010, 14.82, 8.46),
    row(2011, 2.10, 16.04),
    row(2012, 15.89, 2.97),
    row(2013, 32.15, -9.10),
    row(2014, 13.52, 10.75),
    row(2015, 1.38, 1.28),
    row(2016, 11.77, 0.69),
    row(2017, 21.61, 2.80),
    row(2018, -4.23, -0.02),
    row(2019, 31.21, 9.64),
    row(2020, 18.02, 11.33),
    row(2021, 28.47, -4.42),
    row(2022, -18.04, -17.83),
    row(2023, 26.06, 3.88),
];

const NOTABLE_START_YEARS: [(i32, &str); 6] = [
    (1929, "Great Depression"),
    (1937, "1937 recession"),
    (1966, "1966 stagflation"),
    (1973, "1973 oil shock"),
    (2000, "Dot-com crash"),
    (2008, "Global financial crisis"),
];

pub fn first_historical_year() -> i32 {
    HISTORICAL_RETURNS[0].year
}

pub fn last_historical_year() -> i32 {
    HISTORICAL_RETURNS[HISTORICAL_RETURNS.len() - 1].year
}

pub fn historical_return(year: i32) -> Option<HistoricalReturn> {
    let idx = usize::try_from(year - first_historical_year()).ok()?;
    HISTORICAL_RETURNS.get(idx).copied()
}

/// Portfolio return for `year` as a fraction, with `stock_share` in `[0, 1]`.
pub fn blended_return(year: i32, stock_share: f64) -> Option<f64> {
    let r = historical_return(year)?;
    let stock_share = stock_share.clamp(0.0, 1.0);
    Some((stock_share * r.stocks + (1.0 - stock_share) * r.bonds) / 100.0)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BacktestConfig {
    pub retirement_years: u32,
    pub starting_balance: f64,
    pub annual_withdrawal: f64,
    /// Percent of the portfolio held in stocks, rebalanced annually.
    pub stock_allocation: f64,
    pub withdrawal_strategy: WithdrawalStrategy,
    pub inflation_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            retirement_years: 30,
            starting_balance: 1_000_000.0,
            annual_withdrawal: 40_000.0,
            stock_allocation: 60.0,
            withdrawal_strategy: WithdrawalStrategy::FixedReal,
            inflation_rate: 0.03,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.retirement_years == 0 {
            return Err(EngineError::invalid("retirementYears", "must be positive"));
        }
        if self.retirement_years as usize > HISTORICAL_RETURNS.len() {
            return Err(EngineError::invalid(
                "retirementYears",
                format!(
                    "must fit within {}-{}",
                    first_historical_year(),
                    last_historical_year()
                ),
            ));
        }
        if !self.starting_balance.is_finite() || self.starting_balance <= 0.0 {
            return Err(EngineError::invalid("startingBalance", "must be positive"));
        }
        if !self.annual_withdrawal.is_finite() || self.annual_withdrawal < 0.0 {
            return Err(EngineError::invalid("annualWithdrawal", "must be non-negative"));
        }
        if !(0.0..=100.0).contains(&self.stock_allocation) {
            return Err(EngineError::invalid("stockAllocation", "must be within 0..=100"));
        }
        if !self.inflation_rate.is_finite() || self.inflation_rate <= -1.0 {
            return Err(EngineError::invalid(
                "inflationRate",
                "must be a finite rate above -100%",
            ));
        }
        self.withdrawal_strategy.validate()
    }

    pub fn start_years(&self) -> std::ops::RangeInclusive<i32> {
        first_historical_year()..=last_historical_year() + 1 - self.retirement_years as i32
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestPeriod {
    pub start_year: i32,
    pub end_year: i32,
    pub success: bool,
    pub final_balance: f64,
    pub lowest_balance: f64,
    pub total_withdrawn: f64,
    pub years_lasted: u32,
    pub year_of_depletion: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotablePeriod {
    pub label: String,
    pub period: BacktestPeriod,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSummary {
    pub config: BacktestConfig,
    pub total_periods: u32,
    pub successful_periods: u32,
    /// Percent, 0 to 100.
    pub success_rate: f64,
    pub best_period: BacktestPeriod,
    pub median_period: BacktestPeriod,
    pub worst_success_period: Option<BacktestPeriod>,
    pub worst_case_period: BacktestPeriod,
    pub notable_periods: Vec<NotablePeriod>,
    pub periods: Vec<BacktestPeriod>,
}

pub fn run_period(config: &BacktestConfig, start_year: i32) -> Option<BacktestPeriod> {
    let end_year = start_year + config.retirement_years as i32 - 1;
    historical_return(start_year)?;
    historical_return(end_year)?;

    let stock_share = config.stock_allocation / 100.0;
    let mut planner = WithdrawalPlanner::new(
        config.withdrawal_strategy.clone(),
        config.annual_withdrawal,
    );
    let mut balance = config.starting_balance;
    let mut lowest = balance;
    let mut withdrawn = 0.0;
    let mut years_lasted = 0;
    let mut year_of_depletion = None;

    for year in start_year..=end_year {
        let planned = planner.plan_year(balance, config.inflation_rate);
        if planned.amount > balance + EPS {
            withdrawn += balance;
            balance = 0.0;
            lowest = 0.0;
            year_of_depletion = Some(year);
            break;
        }
        balance -= planned.amount;
        withdrawn += planned.amount;
        balance = (balance * (1.0 + blended_return(year, stock_share)?)).max(0.0);
        lowest = lowest.min(balance);
        years_lasted += 1;
    }

    Some(BacktestPeriod {
        start_year,
        end_year,
        success: year_of_depletion.is_none(),
        final_balance: balance,
        lowest_balance: lowest,
        total_withdrawn: withdrawn,
        years_lasted,
        year_of_depletion,
    })
}

pub fn run_backtest(config: &BacktestConfig) -> EngineResult<BacktestSummary> {
    config.validate()?;
    info!(
        years = config.retirement_years,
        strategy = config.withdrawal_strategy.label(),
        stock_allocation = config.stock_allocation,
        "starting historical backtest"
    );

    let periods = config
        .start_years()
        .filter_map(|start| run_period(config, start))
        .collect::<Vec<_>>();
    if periods.is_empty() {
        return Err(EngineError::Computation(
            "no historical window fits the requested retirement length".to_string(),
        ));
    }

    let total = periods.len();
    let successful = periods.iter().filter(|p| p.success).count();

    let mut by_balance = periods.iter().collect::<Vec<_>>();
    by_balance.sort_by(|a, b| {
        a.final_balance
            .total_cmp(&b.final_balance)
            .then(a.start_year.cmp(&b.start_year))
    });
    let best_period = by_balance[total - 1].clone();
    let median_period = by_balance[total / 2].clone();
    let worst_success_period = by_balance.iter().find(|p| p.success).map(|p| (*p).clone());
    let worst_case_period = periods
        .iter()
        .filter(|p| !p.success)
        .min_by_key(|p| (p.years_lasted, p.start_year))
        .unwrap_or(by_balance[0])
        .clone();

    let notable_periods = NOTABLE_START_YEARS
        .iter()
        .filter_map(|&(year, label)| {
            periods
                .iter()
                .find(|p| p.start_year == year)
                .map(|p| NotablePeriod {
                    label: label.to_string(),
                    period: p.clone(),
                })
        })
        .collect();

    let success_rate = successful as f64 / total as f64 * 100.0;
    info!(
        periods = total,
        success_rate,
        "historical backtest finished"
    );

    Ok(BacktestSummary {
        config: config.clone(),
        total_periods: total as u32,
        successful_periods: successful as u32,
        success_rate,
        best_period,
        median_period,
        worst_success_period,
        worst_case_period,
        notable_periods,
        periods,
    })
}

mod accounts;
pub mod backtest;
mod engine;
mod error;
pub mod limits;
pub mod monte_carlo;
pub mod pension;
pub mod rmd;
pub mod rng;
pub mod social_security;
pub mod tax;
mod types;
pub mod withdrawal;

pub use accounts::{Amortization, amortize, balance_sheet, investable_balance};
pub use backtest::{BacktestConfig, BacktestPeriod, BacktestSummary, run_backtest};
pub use engine::{
    PreparedPlan, prepare_plan, run_simulation, run_simulation_with_returns, scenario_result,
    validate_plan,
};
pub use error::{EngineError, EngineResult, FALLBACK_FAILURE_MESSAGE};
pub use monte_carlo::{
    MONTE_CARLO_CONFIG_KEY, MonteCarloConfig, run_monte_carlo, run_monte_carlo_with_control,
};
pub use types::{
    Account, AccountKind, ActiveRange, Assumptions, Cashflow, ContributionRecord, Deductibility,
    Expense, ExpenseKind, Frequency, Income, IncomeKind, InflationIndex, LineItem,
    MonteCarloSummary, MonthStamp, PensionPlan, PercentileBands, PlanInputs,
    RothConversionRecord, RothConversionSettings, ScenarioResult, SimulationPhase,
    SimulationYear, TaxShelter, WithdrawalRecord, WithdrawalSettings,
};
pub use withdrawal::{GuardrailAction, WithdrawalStrategy};

use serde::{Deserialize, Serialize};

use super::rmd::RmdRecord;
use super::social_security::EarningsRecord;
use super::tax::{FilingStatus, TaxBreakdown};
use super::withdrawal::{GuardrailAction, WithdrawalStrategy};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaxShelter {
    Taxable,
    #[serde(alias = "traditionalIra")]
    TraditionalIra,
    #[serde(alias = "traditional401k")]
    Traditional401k,
    #[serde(alias = "rothIra")]
    RothIra,
    #[serde(alias = "roth401k")]
    Roth401k,
    Hsa,
}

impl TaxShelter {
    pub fn is_traditional(self) -> bool {
        matches!(self, TaxShelter::TraditionalIra | TaxShelter::Traditional401k)
    }

    pub fn is_roth(self) -> bool {
        matches!(self, TaxShelter::RothIra | TaxShelter::Roth401k)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AccountKind {
    #[serde(rename_all = "camelCase")]
    Liquid {
        #[serde(default)]
        interest_rate: f64,
    },
    #[serde(rename_all = "camelCase")]
    Invested {
        #[serde(default)]
        expense_ratio: f64,
        shelter: TaxShelter,
        #[serde(default)]
        cost_basis: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Debt { interest_rate: f64 },
    #[serde(rename_all = "camelCase")]
    Property {
        #[serde(default)]
        appreciation_rate: f64,
        #[serde(default)]
        loan_balance: f64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
    pub balance: f64,
    pub kind: AccountKind,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    Weekly,
    Biweekly,
    SemiMonthly,
    Monthly,
    Quarterly,
    #[default]
    Annual,
}

impl Frequency {
    pub fn periods_per_year(self) -> f64 {
        match self {
            Frequency::Weekly => 52.0,
            Frequency::Biweekly => 26.0,
            Frequency::SemiMonthly => 24.0,
            Frequency::Monthly => 12.0,
            Frequency::Quarterly => 4.0,
            Frequency::Annual => 1.0,
        }
    }

    pub fn annualize(self, amount: f64) -> f64 {
        amount * self.periods_per_year()
    }
}

/// Calendar month, 1-based.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MonthStamp {
    pub year: i32,
    pub month: u32,
}

/// Inclusive range of active months; open ends are unbounded.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRange {
    #[serde(default)]
    pub start: Option<MonthStamp>,
    #[serde(default)]
    pub end: Option<MonthStamp>,
}

impl ActiveRange {
    pub fn fraction_of_year(&self, year: i32) -> f64 {
        let first = match self.start {
            Some(s) if s.year > year => return 0.0,
            Some(s) if s.year == year => s.month.clamp(1, 12),
            _ => 1,
        };
        let last = match self.end {
            Some(e) if e.year < year => return 0.0,
            Some(e) if e.year == year => e.month.clamp(1, 12),
            _ => 12,
        };
        if last < first {
            return 0.0;
        }
        (last - first + 1) as f64 / 12.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "system", rename_all = "kebab-case")]
pub enum PensionPlan {
    #[serde(rename_all = "camelCase", alias = "FERS")]
    Fers {
        years_of_service: f64,
        #[serde(default)]
        high3: Option<f64>,
        #[serde(default)]
        salary_history: Vec<f64>,
        #[serde(default)]
        ss_monthly_at_62: f64,
    },
    #[serde(rename_all = "camelCase", alias = "CSRS")]
    Csrs {
        years_of_service: f64,
        #[serde(default)]
        high3: Option<f64>,
        #[serde(default)]
        salary_history: Vec<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Fixed {
        #[serde(default)]
        cola: f64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IncomeKind {
    #[serde(rename_all = "camelCase")]
    Wage {
        #[serde(default)]
        pre_tax_contribution: f64,
        #[serde(default)]
        pre_tax_insurance: f64,
        #[serde(default)]
        growth_rate: Option<f64>,
        #[serde(default)]
        fica_exempt: bool,
        #[serde(default)]
        deferral_account: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SocialSecurity {
        claiming_age: u32,
        #[serde(default)]
        claiming_month: u32,
        #[serde(default)]
        pia: Option<f64>,
        #[serde(default)]
        earnings_history: Vec<EarningsRecord>,
    },
    #[serde(rename_all = "camelCase")]
    Pension { plan: PensionPlan, start_age: u32 },
    #[serde(rename_all = "camelCase")]
    Passive {
        #[serde(default = "default_true")]
        taxable: bool,
        #[serde(default)]
        growth_rate: f64,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Income {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub active: ActiveRange,
    pub kind: IncomeKind,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InflationIndex {
    #[default]
    General,
    Healthcare,
    None,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Deductibility {
    #[default]
    None,
    PropertyTax,
    MortgageInterest,
    Charitable,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExpenseKind {
    #[serde(rename_all = "camelCase")]
    Recurring {
        amount: f64,
        #[serde(default)]
        frequency: Frequency,
        #[serde(default)]
        inflation: InflationIndex,
        #[serde(default)]
        deduction: Deductibility,
        #[serde(default)]
        discretionary: bool,
    },
    #[serde(rename_all = "camelCase")]
    AmortizingLoan {
        debt_account: String,
        monthly_payment: f64,
    },
    #[serde(rename_all = "camelCase")]
    Mortgage {
        property_account: String,
        monthly_payment: f64,
        interest_rate: f64,
        #[serde(default)]
        annual_property_tax: f64,
        #[serde(default)]
        annual_insurance: f64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: ActiveRange,
    pub kind: ExpenseKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalSettings {
    pub strategy: WithdrawalStrategy,
    /// First distribution-year withdrawal in today's dollars.
    #[serde(default)]
    pub initial_withdrawal: Option<f64>,
    #[serde(default = "default_initial_rate")]
    pub initial_rate: f64,
}

fn default_initial_rate() -> f64 {
    0.04
}

impl Default for WithdrawalSettings {
    fn default() -> Self {
        Self {
            strategy: WithdrawalStrategy::FixedReal,
            initial_withdrawal: None,
            initial_rate: default_initial_rate(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RothConversionSettings {
    pub enabled: bool,
    /// Fill ordinary income up to the top of the bracket taxed at this rate.
    pub target_rate: f64,
    pub destination_account: Option<String>,
    pub end_age: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assumptions {
    pub birth_year: i32,
    pub current_age: u32,
    pub retirement_age: u32,
    pub life_expectancy: u32,
    pub start_year: i32,
    #[serde(default)]
    pub filing_status: FilingStatus,
    pub inflation_rate: f64,
    pub healthcare_inflation_rate: f64,
    pub investment_return: f64,
    #[serde(default)]
    pub withdrawal: WithdrawalSettings,
    /// Account ids in draw order; empty means the default ordering.
    #[serde(default)]
    pub withdrawal_priority: Vec<String>,
    #[serde(default)]
    pub contribution_priority: Vec<String>,
    #[serde(default)]
    pub roth_conversion: RothConversionSettings,
}

impl Assumptions {
    pub fn simulated_years(&self) -> u32 {
        self.life_expectancy.saturating_sub(self.current_age) + 1
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInputs {
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub incomes: Vec<Income>,
    #[serde(default)]
    pub expenses: Vec<Expense>,
    pub assumptions: Assumptions,
    #[serde(default = "default_tax_state")]
    pub tax_state: String,
}

fn default_tax_state() -> String {
    "TX".to_string()
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimulationPhase {
    Accumulating,
    Distributing,
    Depleted,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: String,
    pub name: String,
    pub amount: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cashflow {
    pub income: f64,
    pub expenses: f64,
    pub taxes: f64,
    pub withdrawals: f64,
    pub contributions: f64,
    pub surplus: f64,
    pub unfunded: f64,
    pub trimmed_discretionary: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRecord {
    pub account_id: String,
    pub gross: f64,
    pub net: f64,
    pub realized_gain: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionRecord {
    pub account_id: String,
    pub amount: f64,
    pub pre_tax: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RothConversionRecord {
    pub from_account: String,
    pub to_account: String,
    pub amount: f64,
    pub target_rate: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationYear {
    pub year: i32,
    pub age: u32,
    pub phase: SimulationPhase,
    pub investment_return: f64,
    pub accounts: Vec<Account>,
    pub incomes: Vec<LineItem>,
    pub expenses: Vec<LineItem>,
    pub cashflow: Cashflow,
    pub taxes: TaxBreakdown,
    pub withdrawals: Vec<WithdrawalRecord>,
    pub contributions: Vec<ContributionRecord>,
    pub roth_conversion: Option<RothConversionRecord>,
    pub rmd: Option<RmdRecord>,
    pub planned_withdrawal: f64,
    pub guardrail: GuardrailAction,
    pub total_assets: f64,
    pub total_debts: f64,
    pub net_worth: f64,
    pub decision_log: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub scenario_id: u32,
    pub years: Vec<SimulationYear>,
    pub success: bool,
    pub final_net_worth: f64,
    pub year_of_depletion: Option<i32>,
    pub returns: Vec<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileBands {
    pub years: Vec<i32>,
    pub ages: Vec<u32>,
    pub p10: Vec<f64>,
    pub p25: Vec<f64>,
    pub p50: Vec<f64>,
    pub p75: Vec<f64>,
    pub p90: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloSummary {
    /// Percent, 0 to 100.
    pub success_rate: f64,
    pub successful_scenarios: u32,
    pub total_scenarios: u32,
    pub percentiles: PercentileBands,
    pub worst_case: ScenarioResult,
    pub median_case: ScenarioResult,
    pub best_case: ScenarioResult,
    pub trimmed_mean_final_net_worth: f64,
    pub mean_final_net_worth: f64,
    pub final_net_worth_std_dev: f64,
    pub seed: u64,
}

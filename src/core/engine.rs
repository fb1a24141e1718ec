use std::collections::HashSet;

use tracing::debug;

use super::accounts::{amortize, balance_sheet, investable_balance};
use super::error::{EngineError, EngineResult};
use super::limits::{LimitTracker, contribution_limits};
use super::pension::{csrs_cola, estimate_csrs, estimate_fers, fers_cola, high3_from_history};
use super::rmd::{RmdDistribution, RmdRecord, get_distribution_period, required_distribution};
use super::social_security::{benefit_from_pia, estimate_benefit};
use super::tax::{
    SALT_CAP, StateTaxTable, TaxContext, TaxYear, bracket_ceiling, federal_table, resolve_state,
};
use super::types::{
    Account, AccountKind, Cashflow, ContributionRecord, Deductibility, ExpenseKind, IncomeKind,
    InflationIndex, LineItem, PensionPlan, PlanInputs, RothConversionRecord, ScenarioResult,
    SimulationPhase, SimulationYear, TaxShelter,
};
use super::withdrawal::{
    BISECTION_STEPS, GuardrailAction, PlannedWithdrawal, WithdrawalPlanner, draw_for_shortfall,
    withdraw_traditional_gross,
};

const EPS: f64 = 1e-6;
const MAX_AGE: u32 = 120;

const FERS_SUPPLEMENT_END_AGE: u32 = 62;

#[derive(Copy, Clone, Debug)]
enum PensionCola {
    Fers,
    Csrs,
    Fixed(f64),
}

impl PensionCola {
    fn rate(self, inflation: f64, age: u32) -> f64 {
        match self {
            PensionCola::Fers => fers_cola(inflation, age),
            PensionCola::Csrs => csrs_cola(inflation),
            PensionCola::Fixed(rate) => rate,
        }
    }
}

#[derive(Clone, Debug)]
enum IncomeStream {
    Wage {
        deferral: Option<(usize, TaxShelter)>,
        pre_tax_contribution: f64,
        pre_tax_insurance: f64,
        growth_rate: f64,
        fica_exempt: bool,
    },
    SocialSecurity {
        annual_today: f64,
        claiming_age: u32,
        claiming_month: u32,
    },
    Pension {
        annual: f64,
        indexed_to_start: bool,
        supplement_today: f64,
        start_age: u32,
        cola: PensionCola,
    },
    Passive {
        taxable: bool,
        growth_rate: f64,
    },
}

#[derive(Clone, Debug)]
pub struct PreparedPlan<'a> {
    plan: &'a PlanInputs,
    state: StateTaxTable,
    incomes: Vec<IncomeStream>,
    expense_links: Vec<Option<usize>>,
    withdrawal_order: Vec<usize>,
    contribution_order: Vec<usize>,
    conversion_sources: Vec<usize>,
    roth_destination: Option<usize>,
    cash_sink: Option<usize>,
}

pub fn run_simulation(plan: &PlanInputs) -> EngineResult<Vec<SimulationYear>> {
    Ok(prepare_plan(plan)?.simulate(None))
}

/// Runs the plan with `returns[i]` as year `i`'s investment return; years past
/// the end of the sequence use the deterministic baseline.
pub fn run_simulation_with_returns(
    plan: &PlanInputs,
    returns: &[f64],
) -> EngineResult<Vec<SimulationYear>> {
    Ok(prepare_plan(plan)?.simulate(Some(returns)))
}

pub fn scenario_result(scenario_id: u32, years: Vec<SimulationYear>, returns: Vec<f64>) -> ScenarioResult {
    let year_of_depletion = years
        .iter()
        .find(|y| y.phase == SimulationPhase::Depleted)
        .map(|y| y.year);
    let final_net_worth = years.last().map_or(0.0, |y| y.net_worth);
    ScenarioResult {
        scenario_id,
        years,
        success: year_of_depletion.is_none(),
        final_net_worth,
        year_of_depletion,
        returns,
    }
}

fn find_account(accounts: &[Account], id: &str, context: &str) -> EngineResult<usize> {
    accounts
        .iter()
        .position(|a| a.id == id)
        .ok_or_else(|| EngineError::unknown_account(id, context))
}

/// Default draw order: cash, taxable, traditional, Roth, HSA.
fn draw_rank(account: &Account) -> Option<u8> {
    match account.kind {
        AccountKind::Liquid { .. } => Some(0),
        AccountKind::Invested { shelter, .. } => Some(match shelter {
            TaxShelter::Taxable => 1,
            TaxShelter::TraditionalIra | TaxShelter::Traditional401k => 2,
            TaxShelter::RothIra | TaxShelter::Roth401k => 3,
            TaxShelter::Hsa => 4,
        }),
        AccountKind::Debt { .. } | AccountKind::Property { .. } => None,
    }
}

fn resolve_investable_list(
    accounts: &[Account],
    ids: &[String],
    context: &str,
) -> EngineResult<Vec<usize>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let idx = find_account(accounts, id, context)?;
        if !accounts[idx].is_investable() {
            return Err(EngineError::invalid(
                context,
                format!("account '{id}' cannot hold or release cash"),
            ));
        }
        if seen.insert(idx) {
            out.push(idx);
        }
    }
    Ok(out)
}

fn validate_assumptions(plan: &PlanInputs) -> EngineResult<()> {
    let a = &plan.assumptions;
    if a.life_expectancy < a.current_age {
        return Err(EngineError::invalid(
            "lifeExpectancy",
            "must not be below current age",
        ));
    }
    if a.life_expectancy > MAX_AGE {
        return Err(EngineError::invalid(
            "lifeExpectancy",
            format!("must be at most {MAX_AGE}"),
        ));
    }
    for (field, rate) in [
        ("inflationRate", a.inflation_rate),
        ("healthcareInflationRate", a.healthcare_inflation_rate),
        ("investmentReturn", a.investment_return),
    ] {
        if !rate.is_finite() || rate <= -1.0 {
            return Err(EngineError::invalid(field, "must be a finite rate above -100%"));
        }
    }

    let w = &a.withdrawal;
    if !(0.0..=1.0).contains(&w.initial_rate) {
        return Err(EngineError::invalid("withdrawal.initialRate", "must be within 0..=1"));
    }
    if w.initial_withdrawal.is_some_and(|x| !x.is_finite() || x < 0.0) {
        return Err(EngineError::invalid(
            "withdrawal.initialWithdrawal",
            "must be non-negative",
        ));
    }
    w.strategy.validate()?;
    Ok(())
}

fn prepare_income(plan: &PlanInputs, kind: &IncomeKind, amount: f64, annualized: f64) -> EngineResult<IncomeStream> {
    let a = &plan.assumptions;
    let stream = match kind {
        IncomeKind::Wage {
            pre_tax_contribution,
            pre_tax_insurance,
            growth_rate,
            fica_exempt,
            deferral_account,
        } => {
            let deferral = match deferral_account {
                Some(id) => {
                    let idx = find_account(&plan.accounts, id, "incomes.deferralAccount")?;
                    match plan.accounts[idx].shelter() {
                        Some(shelter) if shelter != TaxShelter::Taxable => Some((idx, shelter)),
                        _ => {
                            return Err(EngineError::invalid(
                                "incomes.deferralAccount",
                                format!("account '{id}' is not a tax-advantaged investment account"),
                            ));
                        }
                    }
                }
                None => None,
            };
            IncomeStream::Wage {
                deferral,
                pre_tax_contribution: pre_tax_contribution.max(0.0),
                pre_tax_insurance: pre_tax_insurance.max(0.0),
                growth_rate: growth_rate.unwrap_or(a.inflation_rate),
                fica_exempt: *fica_exempt,
            }
        }
        IncomeKind::SocialSecurity {
            claiming_age,
            claiming_month,
            pia,
            earnings_history,
        } => {
            if *claiming_month > 11 {
                return Err(EngineError::invalid(
                    "incomes.claimingMonth",
                    "must be within 0..=11",
                ));
            }
            if *claiming_age > MAX_AGE {
                return Err(EngineError::invalid(
                    "incomes.claimingAge",
                    format!("must be at most {MAX_AGE}"),
                ));
            }
            let claim_months = claiming_age * 12 + claiming_month;
            let annual_today = match pia {
                Some(pia) => benefit_from_pia(*pia, a.birth_year, claim_months).annual_benefit,
                None if !earnings_history.is_empty() => {
                    estimate_benefit(earnings_history, a.birth_year, claim_months).annual_benefit
                }
                None if amount > 0.0 => annualized,
                None => {
                    return Err(EngineError::invalid(
                        "incomes.socialSecurity",
                        "needs a PIA, an earnings history or an amount",
                    ));
                }
            };
            IncomeStream::SocialSecurity {
                annual_today,
                claiming_age: *claiming_age,
                claiming_month: *claiming_month,
            }
        }
        IncomeKind::Pension { plan: pension, start_age } => match pension {
            PensionPlan::Fers {
                years_of_service,
                high3,
                salary_history,
                ss_monthly_at_62,
            } => {
                let high3 = high3.unwrap_or_else(|| high3_from_history(salary_history));
                let estimate = estimate_fers(
                    *start_age,
                    *years_of_service,
                    a.birth_year,
                    high3,
                    *ss_monthly_at_62,
                );
                IncomeStream::Pension {
                    annual: estimate.annual_benefit,
                    indexed_to_start: true,
                    supplement_today: estimate.supplement_annual,
                    start_age: *start_age,
                    cola: PensionCola::Fers,
                }
            }
            PensionPlan::Csrs {
                years_of_service,
                high3,
                salary_history,
            } => {
                let high3 = high3.unwrap_or_else(|| high3_from_history(salary_history));
                let estimate = estimate_csrs(*start_age, *years_of_service, high3);
                IncomeStream::Pension {
                    annual: estimate.annual_benefit,
                    indexed_to_start: true,
                    supplement_today: 0.0,
                    start_age: *start_age,
                    cola: PensionCola::Csrs,
                }
            }
            PensionPlan::Fixed { cola } => IncomeStream::Pension {
                annual: annualized,
                indexed_to_start: false,
                supplement_today: 0.0,
                start_age: *start_age,
                cola: PensionCola::Fixed(*cola),
            },
        },
        IncomeKind::Passive {
            taxable,
            growth_rate,
        } => IncomeStream::Passive {
            taxable: *taxable,
            growth_rate: *growth_rate,
        },
    };
    Ok(stream)
}

pub fn validate_plan(plan: &PlanInputs) -> EngineResult<()> {
    prepare_plan(plan).map(|_| ())
}

pub fn prepare_plan(plan: &PlanInputs) -> EngineResult<PreparedPlan<'_>> {
    validate_assumptions(plan)?;
    let state = resolve_state(&plan.tax_state)?;
    let a = &plan.assumptions;

    let mut ids = HashSet::new();
    for account in &plan.accounts {
        if account.id.is_empty() {
            return Err(EngineError::invalid("accounts.id", "must not be empty"));
        }
        if !ids.insert(account.id.as_str()) {
            return Err(EngineError::invalid(
                "accounts.id",
                format!("duplicate account id '{}'", account.id),
            ));
        }
        if !account.balance.is_finite() {
            return Err(EngineError::invalid(
                "accounts.balance",
                format!("account '{}' has a non-finite balance", account.id),
            ));
        }
    }

    let incomes = plan
        .incomes
        .iter()
        .map(|income| {
            let annualized = income.frequency.annualize(income.amount);
            prepare_income(plan, &income.kind, income.amount, annualized)
        })
        .collect::<EngineResult<Vec<_>>>()?;

    let expense_links = plan
        .expenses
        .iter()
        .map(|expense| match &expense.kind {
            ExpenseKind::Recurring { .. } => Ok(None),
            ExpenseKind::AmortizingLoan { debt_account, .. } => {
                let idx = find_account(&plan.accounts, debt_account, "expenses.debtAccount")?;
                match plan.accounts[idx].kind {
                    AccountKind::Debt { .. } => Ok(Some(idx)),
                    _ => Err(EngineError::invalid(
                        "expenses.debtAccount",
                        format!("account '{debt_account}' is not a debt"),
                    )),
                }
            }
            ExpenseKind::Mortgage {
                property_account, ..
            } => {
                let idx = find_account(&plan.accounts, property_account, "expenses.propertyAccount")?;
                match plan.accounts[idx].kind {
                    AccountKind::Property { .. } => Ok(Some(idx)),
                    _ => Err(EngineError::invalid(
                        "expenses.propertyAccount",
                        format!("account '{property_account}' is not a property"),
                    )),
                }
            }
        })
        .collect::<EngineResult<Vec<_>>>()?;

    let mut withdrawal_order =
        resolve_investable_list(&plan.accounts, &a.withdrawal_priority, "withdrawalPriority")?;
    let mut rest = (0..plan.accounts.len())
        .filter(|idx| !withdrawal_order.contains(idx))
        .filter_map(|idx| draw_rank(&plan.accounts[idx]).map(|rank| (rank, idx)))
        .collect::<Vec<_>>();
    rest.sort_by_key(|&(rank, idx)| (rank, idx));
    withdrawal_order.extend(rest.into_iter().map(|(_, idx)| idx));

    let cash_sink = plan
        .accounts
        .iter()
        .position(|acct| matches!(acct.kind, AccountKind::Liquid { .. }))
        .or_else(|| {
            plan.accounts
                .iter()
                .position(|acct| acct.shelter() == Some(TaxShelter::Taxable))
        });

    let contribution_order = if a.contribution_priority.is_empty() {
        plan.accounts
            .iter()
            .position(|acct| acct.shelter() == Some(TaxShelter::Taxable))
            .into_iter()
            .collect()
    } else {
        resolve_investable_list(&plan.accounts, &a.contribution_priority, "contributionPriority")?
    };

    let conversion_sources = withdrawal_order
        .iter()
        .copied()
        .filter(|&idx| plan.accounts[idx].shelter().is_some_and(TaxShelter::is_traditional))
        .collect::<Vec<_>>();

    let roth = &a.roth_conversion;
    let roth_destination = if !roth.enabled {
        None
    } else {
        if !federal_table(a.filing_status)
            .brackets
            .iter()
            .any(|b| (b.rate - roth.target_rate).abs() < 1e-9)
        {
            return Err(EngineError::invalid(
                "rothConversion.targetRate",
                format!("{} is not a federal bracket rate", roth.target_rate),
            ));
        }
        let idx = match &roth.destination_account {
            Some(id) => find_account(&plan.accounts, id, "rothConversion.destinationAccount")?,
            None => plan
                .accounts
                .iter()
                .position(|acct| acct.shelter().is_some_and(TaxShelter::is_roth))
                .ok_or_else(|| {
                    EngineError::invalid(
                        "rothConversion.destinationAccount",
                        "no Roth account to convert into",
                    )
                })?,
        };
        if !plan.accounts[idx].shelter().is_some_and(TaxShelter::is_roth) {
            return Err(EngineError::invalid(
                "rothConversion.destinationAccount",
                format!("account '{}' is not a Roth account", plan.accounts[idx].id),
            ));
        }
        Some(idx)
    };

    Ok(PreparedPlan {
        plan,
        state,
        incomes,
        expense_links,
        withdrawal_order,
        contribution_order,
        conversion_sources,
        roth_destination,
        cash_sink,
    })
}

struct YearContext {
    index: u32,
    age: u32,
    year: i32,
    price_index: f64,
    healthcare_index: f64,
    tax: TaxContext,
}

struct YearLedger {
    tax_year: TaxYear,
    tracker: LimitTracker,
    gross_income: f64,
    deferrals: f64,
    expenses: f64,
    discretionary: f64,
    withdrawals: f64,
    forced_cash: f64,
    contributions: Vec<ContributionRecord>,
    log: Vec<String>,
}

impl YearLedger {
    fn contribute(&mut self, account: &mut Account, amount: f64, pre_tax: bool) {
        account.deposit(amount);
        self.contributions.push(ContributionRecord {
            account_id: account.id.clone(),
            amount,
            pre_tax,
        });
    }
}

fn phase_label(phase: SimulationPhase) -> &'static str {
    match phase {
        SimulationPhase::Accumulating => "accumulating",
        SimulationPhase::Distributing => "distributing",
        SimulationPhase::Depleted => "depleted",
    }
}

fn rate_percent(amount: f64, portfolio: f64) -> f64 {
    if portfolio > 0.0 {
        amount / portfolio * 100.0
    } else {
        0.0
    }
}

/// Largest conversion, at most `available`, that keeps ordinary taxable
/// income at or below `ceiling`.
fn conversion_headroom(tax_year: &TaxYear, ctx: &TaxContext, ceiling: f64, available: f64) -> f64 {
    let taxable_after = |amount: f64| {
        let mut after = tax_year.clone();
        after.ordinary_income += amount;
        after.ordinary_taxable_income(ctx)
    };
    if taxable_after(0.0) >= ceiling {
        return 0.0;
    }
    if taxable_after(available) <= ceiling {
        return available;
    }

    let mut lo = 0.0;
    let mut hi = available;
    for _ in 0..BISECTION_STEPS {
        let mid = (lo + hi) * 0.5;
        if taxable_after(mid) <= ceiling {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

impl PreparedPlan<'_> {
    pub fn simulated_years(&self) -> u32 {
        self.plan.assumptions.simulated_years()
    }

    pub fn simulate(&self, returns: Option<&[f64]>) -> Vec<SimulationYear> {
        let plan = self.plan;
        let a = &plan.assumptions;
        let mut accounts = plan.accounts.clone();
        for account in &mut accounts {
            account.normalize();
        }

        let years_to_run = a.simulated_years();
        let mut years = Vec::with_capacity(years_to_run as usize);
        let mut price_index = 1.0;
        let mut healthcare_index = 1.0;
        let mut pension_amounts = vec![0.0; plan.incomes.len()];
        let mut prior_balances = accounts.iter().map(|acct| acct.balance).collect::<Vec<_>>();
        let mut planner: Option<WithdrawalPlanner> = None;
        let mut depleted = false;
        let mut previous_phase: Option<SimulationPhase> = None;

        for index in 0..years_to_run {
            if index > 0 {
                price_index *= 1.0 + a.inflation_rate;
                healthcare_index *= 1.0 + a.healthcare_inflation_rate;
            }
            let yc = YearContext {
                index,
                age: a.current_age + index,
                year: a.start_year + index as i32,
                price_index,
                healthcare_index,
                tax: TaxContext {
                    status: a.filing_status,
                    state: self.state,
                    scale: price_index,
                    salt_cap: SALT_CAP,
                },
            };
            let market_return = returns
                .and_then(|r| r.get(index as usize).copied())
                .unwrap_or(a.investment_return)
                .max(-1.0);

            let mut phase = if depleted {
                SimulationPhase::Depleted
            } else if yc.age < a.retirement_age {
                SimulationPhase::Accumulating
            } else {
                SimulationPhase::Distributing
            };

            let mut ledger = YearLedger {
                tax_year: TaxYear::default(),
                tracker: LimitTracker::new(contribution_limits(
                    yc.year,
                    yc.age,
                    a.filing_status,
                    a.inflation_rate,
                )),
                gross_income: 0.0,
                deferrals: 0.0,
                expenses: 0.0,
                discretionary: 0.0,
                withdrawals: 0.0,
                forced_cash: 0.0,
                contributions: Vec::new(),
                log: Vec::new(),
            };
            if previous_phase.is_some_and(|p| p != phase) {
                debug!(age = yc.age, year = yc.year, phase = phase_label(phase), "phase transition");
                ledger
                    .log
                    .push(format!("Entered {} phase at age {}", phase_label(phase), yc.age));
            }

            // Income first; payroll deferrals land after growth.
            let (income_lines, pending_deferrals) =
                self.accrue_income(&yc, &mut ledger, &mut pension_amounts);

            for account in &mut accounts {
                account.apply_growth(market_return);
            }
            for (idx, amount, pre_tax) in pending_deferrals {
                if let Some(account) = accounts.get_mut(idx) {
                    ledger.contribute(account, amount, pre_tax);
                }
            }

            let mut expense_lines = self.apply_expenses(&yc, &mut ledger, &mut accounts);

            let rmd = self.apply_rmds(&yc, &mut ledger, &mut accounts, &prior_balances);
            let roth_conversion = if phase == SimulationPhase::Depleted {
                None
            } else {
                self.apply_roth_conversion(&yc, &mut ledger, &mut accounts)
            };

            let taxes_before_draws = ledger.tax_year.total_tax(&yc.tax);
            let spendable = ledger.gross_income + ledger.forced_cash - ledger.deferrals;
            let surplus = spendable - ledger.expenses - taxes_before_draws;

            let mut plan_for_year: Option<PlannedWithdrawal> = None;
            if phase == SimulationPhase::Distributing {
                let portfolio = investable_balance(&accounts);
                let planner = planner.get_or_insert_with(|| {
                    let initial = a
                        .withdrawal
                        .initial_withdrawal
                        .map_or(a.withdrawal.initial_rate * portfolio, |w| w * yc.price_index);
                    WithdrawalPlanner::new(a.withdrawal.strategy.clone(), initial)
                });
                let planned = planner.plan_year(portfolio, a.inflation_rate);
                match planned.action {
                    GuardrailAction::Austerity => ledger.log.push(format!(
                        "Withdrawal rate {:.2}% above upper guardrail; next year's budget will be cut",
                        rate_percent(planned.amount, portfolio)
                    )),
                    GuardrailAction::Prosperity => ledger.log.push(format!(
                        "Withdrawal rate {:.2}% below lower guardrail; next year's budget will be raised",
                        rate_percent(planned.amount, portfolio)
                    )),
                    GuardrailAction::None => {}
                }
                plan_for_year = Some(planned);
            }

            let mut trimmed = 0.0;
            let mut unfunded = 0.0;
            let mut withdrawals = Vec::new();
            if surplus < -EPS {
                let mut shortfall = -surplus;
                if let Some(planned) = plan_for_year {
                    if shortfall > planned.amount && ledger.discretionary > EPS {
                        trimmed = (shortfall - planned.amount).min(ledger.discretionary);
                        let keep = 1.0 - trimmed / ledger.discretionary;
                        for (line, discretionary) in &mut expense_lines {
                            if *discretionary {
                                line.amount *= keep;
                            }
                        }
                        shortfall -= trimmed;
                        ledger.expenses -= trimmed;
                        ledger.log.push(format!(
                            "Trimmed ${trimmed:.2} of discretionary spending to fit the {} budget of ${:.2}",
                            planner.as_ref().map_or("withdrawal", |p| p.strategy().label()),
                            planned.amount
                        ));
                    }
                }

                let outcome = draw_for_shortfall(
                    shortfall,
                    &mut accounts,
                    &self.withdrawal_order,
                    &mut ledger.tax_year,
                    &yc.tax,
                    yc.age,
                );
                for record in &outcome.records {
                    ledger.log.push(format!(
                        "Withdrew ${:.2} gross (${:.2} net) from {}",
                        record.gross, record.net, record.account_id
                    ));
                }
                ledger.withdrawals += outcome.gross;
                withdrawals = outcome.records;
                unfunded = outcome.unfunded;
            } else if surplus > EPS {
                self.invest_surplus(surplus, phase, &mut ledger, &mut accounts);
            }

            if unfunded > 0.0 {
                ledger
                    .log
                    .push(format!("Shortfall of ${unfunded:.2} could not be funded"));
                if !depleted {
                    depleted = true;
                    phase = SimulationPhase::Depleted;
                    debug!(age = yc.age, year = yc.year, unfunded, "portfolio depleted");
                }
            }

            let taxes = ledger.tax_year.assess(&yc.tax);
            let (total_assets, total_debts) = balance_sheet(&accounts);
            let contributions_total = ledger.contributions.iter().map(|c| c.amount).sum();

            years.push(SimulationYear {
                year: yc.year,
                age: yc.age,
                phase,
                investment_return: market_return,
                accounts: accounts.clone(),
                incomes: income_lines,
                expenses: expense_lines.into_iter().map(|(line, _)| line).collect(),
                cashflow: Cashflow {
                    income: ledger.gross_income,
                    expenses: ledger.expenses,
                    taxes: taxes.total_tax(),
                    withdrawals: ledger.withdrawals,
                    contributions: contributions_total,
                    surplus,
                    unfunded,
                    trimmed_discretionary: trimmed,
                },
                taxes,
                withdrawals,
                contributions: ledger.contributions,
                roth_conversion,
                rmd,
                planned_withdrawal: plan_for_year.map_or(0.0, |p| p.amount),
                guardrail: plan_for_year.map_or(GuardrailAction::None, |p| p.action),
                total_assets,
                total_debts,
                net_worth: total_assets - total_debts,
                decision_log: ledger.log,
            });

            prior_balances.clear();
            prior_balances.extend(accounts.iter().map(|acct| acct.balance));
            previous_phase = Some(phase);
        }

        years
    }

    fn accrue_income(
        &self,
        yc: &YearContext,
        ledger: &mut YearLedger,
        pension_amounts: &mut [f64],
    ) -> (Vec<LineItem>, Vec<(usize, f64, bool)>) {
        let a = &self.plan.assumptions;
        let mut lines = Vec::with_capacity(self.plan.incomes.len());
        let mut deferrals = Vec::new();

        for ((income, stream), current) in self
            .plan
            .incomes
            .iter()
            .zip(&self.incomes)
            .zip(pension_amounts.iter_mut())
        {
            let active = income.active.fraction_of_year(yc.year);
            let amount = match *stream {
                IncomeStream::Wage {
                    deferral,
                    pre_tax_contribution,
                    pre_tax_insurance,
                    growth_rate,
                    fica_exempt,
                } => {
                    if yc.age >= a.retirement_age || active <= 0.0 {
                        0.0
                    } else {
                        let factor = (1.0 + growth_rate).powi(yc.index as i32) * active;
                        let gross = income.frequency.annualize(income.amount).max(0.0) * factor;
                        let insurance = (pre_tax_insurance * factor).min(gross);
                        if let Some((idx, shelter)) = deferral {
                            let wanted = (pre_tax_contribution * factor).min(gross - insurance);
                            let allowed = ledger.tracker.take(shelter, wanted);
                            if allowed > 0.0 {
                                let pre_tax = !shelter.is_roth();
                                if pre_tax {
                                    ledger.tax_year.pre_tax_retirement += allowed;
                                }
                                ledger.deferrals += allowed;
                                deferrals.push((idx, allowed, pre_tax));
                            }
                        }
                        ledger.tax_year.wages += gross;
                        ledger.tax_year.pre_tax_insurance += insurance;
                        if fica_exempt {
                            ledger.tax_year.fica_exempt_wages += gross;
                        }
                        ledger.expenses += insurance;
                        gross
                    }
                }
                IncomeStream::SocialSecurity {
                    annual_today,
                    claiming_age,
                    claiming_month,
                } => {
                    let share = if yc.age > claiming_age {
                        1.0
                    } else if yc.age == claiming_age {
                        (12 - claiming_month.min(11)) as f64 / 12.0
                    } else {
                        0.0
                    };
                    let benefit = annual_today * yc.price_index * share * active;
                    ledger.tax_year.social_security_benefits += benefit;
                    benefit
                }
                IncomeStream::Pension {
                    annual,
                    indexed_to_start,
                    supplement_today,
                    start_age,
                    cola,
                } => {
                    if yc.age < start_age || active <= 0.0 {
                        0.0
                    } else {
                        if *current <= 0.0 {
                            *current = if indexed_to_start {
                                annual * yc.price_index
                            } else {
                                annual
                            };
                        } else {
                            *current *= 1.0 + cola.rate(a.inflation_rate, yc.age);
                        }
                        let supplement = if yc.age < FERS_SUPPLEMENT_END_AGE {
                            supplement_today * yc.price_index
                        } else {
                            0.0
                        };
                        let paid = (*current + supplement) * active;
                        ledger.tax_year.ordinary_income += paid;
                        paid
                    }
                }
                IncomeStream::Passive {
                    taxable,
                    growth_rate,
                } => {
                    let paid = income.frequency.annualize(income.amount).max(0.0)
                        * (1.0 + growth_rate).powi(yc.index as i32)
                        * active;
                    if taxable {
                        ledger.tax_year.ordinary_income += paid;
                    }
                    paid
                }
            };

            ledger.gross_income += amount;
            lines.push(LineItem {
                id: income.id.clone(),
                name: income.name.clone(),
                amount,
            });
        }

        (lines, deferrals)
    }

    fn apply_expenses(
        &self,
        yc: &YearContext,
        ledger: &mut YearLedger,
        accounts: &mut [Account],
    ) -> Vec<(LineItem, bool)> {
        let mut lines = Vec::with_capacity(self.plan.expenses.len());

        for (expense, link) in self.plan.expenses.iter().zip(&self.expense_links) {
            let active = expense.active.fraction_of_year(yc.year);
            let months = (active * 12.0).round() as u32;
            let mut discretionary_line = false;

            let amount = match &expense.kind {
                ExpenseKind::Recurring {
                    amount,
                    frequency,
                    inflation,
                    deduction,
                    discretionary,
                } => {
                    let index = match inflation {
                        InflationIndex::General => yc.price_index,
                        InflationIndex::Healthcare => yc.healthcare_index,
                        InflationIndex::None => 1.0,
                    };
                    let cost = frequency.annualize(*amount).max(0.0) * index * active;
                    match deduction {
                        Deductibility::PropertyTax => ledger.tax_year.property_tax += cost,
                        Deductibility::MortgageInterest => ledger.tax_year.mortgage_interest += cost,
                        Deductibility::Charitable => ledger.tax_year.charitable += cost,
                        Deductibility::None => {}
                    }
                    if *discretionary {
                        ledger.discretionary += cost;
                        discretionary_line = true;
                    }
                    cost
                }
                ExpenseKind::AmortizingLoan {
                    monthly_payment, ..
                } => match link.and_then(|idx| accounts.get_mut(idx)) {
                    Some(account) => {
                        let rate = match account.kind {
                            AccountKind::Debt { interest_rate } => interest_rate,
                            _ => 0.0,
                        };
                        amortize(&mut account.balance, rate, *monthly_payment, months).paid()
                    }
                    None => 0.0,
                },
                ExpenseKind::Mortgage {
                    monthly_payment,
                    interest_rate,
                    annual_property_tax,
                    annual_insurance,
                    ..
                } => {
                    let paid = match link.and_then(|idx| accounts.get_mut(idx)) {
                        Some(Account {
                            kind: AccountKind::Property { loan_balance, .. },
                            ..
                        }) => amortize(loan_balance, *interest_rate, *monthly_payment, months),
                        _ => Default::default(),
                    };
                    let property_tax = annual_property_tax.max(0.0) * yc.price_index * active;
                    let insurance = annual_insurance.max(0.0) * yc.price_index * active;
                    ledger.tax_year.mortgage_interest += paid.interest;
                    ledger.tax_year.property_tax += property_tax;
                    paid.paid() + property_tax + insurance
                }
            };

            ledger.expenses += amount;
            lines.push((
                LineItem {
                    id: expense.id.clone(),
                    name: expense.name.clone(),
                    amount,
                },
                discretionary_line,
            ));
        }

        lines
    }

    fn apply_rmds(
        &self,
        yc: &YearContext,
        ledger: &mut YearLedger,
        accounts: &mut [Account],
        prior_balances: &[f64],
    ) -> Option<RmdRecord> {
        let birth_year = self.plan.assumptions.birth_year;
        let mut record = RmdRecord {
            age: yc.age,
            distribution_period: get_distribution_period(yc.age),
            required: 0.0,
            withdrawn: 0.0,
            accounts: Vec::new(),
        };

        for (account, &prior) in accounts.iter_mut().zip(prior_balances) {
            if !account.shelter().is_some_and(TaxShelter::is_traditional) {
                continue;
            }
            let required = required_distribution(prior, yc.age, birth_year);
            if required <= 0.0 {
                continue;
            }
            let (gross, _) = withdraw_traditional_gross(
                required,
                &mut account.balance,
                &mut ledger.tax_year,
                &yc.tax,
                false,
            );
            ledger.forced_cash += gross;
            ledger.withdrawals += gross;
            ledger.log.push(format!(
                "Required minimum distribution of ${gross:.2} from {}",
                account.id
            ));
            record.required += required;
            record.withdrawn += gross;
            record.accounts.push(RmdDistribution {
                account_id: account.id.clone(),
                prior_year_balance: prior,
                required,
                withdrawn: gross,
            });
        }

        (!record.accounts.is_empty()).then_some(record)
    }

    fn apply_roth_conversion(
        &self,
        yc: &YearContext,
        ledger: &mut YearLedger,
        accounts: &mut [Account],
    ) -> Option<RothConversionRecord> {
        let destination = self.roth_destination?;
        let settings = &self.plan.assumptions.roth_conversion;
        if settings.end_age.is_some_and(|end| yc.age >= end) {
            return None;
        }

        let brackets = federal_table(yc.tax.status).brackets;
        let ceiling = bracket_ceiling(brackets, settings.target_rate, yc.tax.scale)?;
        let available: f64 = self
            .conversion_sources
            .iter()
            .filter_map(|&idx| accounts.get(idx))
            .map(|acct| acct.balance.max(0.0))
            .sum();
        let headroom = conversion_headroom(&ledger.tax_year, &yc.tax, ceiling, available);
        if headroom <= EPS {
            return None;
        }

        let mut converted = 0.0;
        let mut from_account = None;
        for &idx in &self.conversion_sources {
            let Some(source) = accounts.get_mut(idx) else {
                continue;
            };
            let moved = source.take(headroom - converted);
            if moved > 0.0 {
                from_account.get_or_insert_with(|| source.id.clone());
                converted += moved;
            }
            if headroom - converted <= EPS {
                break;
            }
        }
        let from_account = from_account?;

        let target = accounts.get_mut(destination)?;
        target.deposit(converted);
        ledger.tax_year.ordinary_income += converted;
        ledger.log.push(format!(
            "Converted ${converted:.2} to Roth ({}) filling the {:.0}% bracket",
            target.id,
            settings.target_rate * 100.0
        ));

        Some(RothConversionRecord {
            from_account,
            to_account: target.id.clone(),
            amount: converted,
            target_rate: settings.target_rate,
        })
    }

    fn invest_surplus(
        &self,
        surplus: f64,
        phase: SimulationPhase,
        ledger: &mut YearLedger,
        accounts: &mut [Account],
    ) {
        let mut remaining = surplus;

        if phase == SimulationPhase::Accumulating {
            for &idx in &self.contribution_order {
                if remaining <= EPS {
                    break;
                }
                let Some(account) = accounts.get_mut(idx) else {
                    continue;
                };
                let allowed = match account.shelter() {
                    Some(shelter) => ledger.tracker.take(shelter, remaining),
                    None => remaining,
                };
                if allowed > EPS {
                    ledger.contribute(account, allowed, false);
                    remaining -= allowed;
                }
            }
        }

        if remaining <= EPS {
            return;
        }
        match self.cash_sink.and_then(|idx| accounts.get_mut(idx)) {
            Some(account) => ledger.contribute(account, remaining, false),
            None => ledger
                .log
                .push(format!("Surplus of ${remaining:.2} left outside tracked accounts")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tax::FilingStatus;
    use crate::core::types::{
        ActiveRange, Assumptions, Expense, Frequency, Income, RothConversionSettings,
        WithdrawalSettings,
    };
    use crate::core::withdrawal::WithdrawalStrategy;
    use proptest::prelude::{prop_assert, proptest};

    const TEST_EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= TEST_EPS * expected.abs().max(1.0),
            "expected {expected}, got {actual}"
        );
    }

    fn assumptions() -> Assumptions {
        Assumptions {
            birth_year: 1960,
            current_age: 64,
            retirement_age: 65,
            life_expectancy: 70,
            start_year: 2024,
            filing_status: FilingStatus::Single,
            inflation_rate: 0.0,
            healthcare_inflation_rate: 0.0,
            investment_return: 0.0,
            withdrawal: WithdrawalSettings::default(),
            withdrawal_priority: Vec::new(),
            contribution_priority: Vec::new(),
            roth_conversion: RothConversionSettings::default(),
        }
    }

    fn account(id: &str, balance: f64, kind: AccountKind) -> Account {
        Account {
            id: id.to_string(),
            name: id.to_string(),
            balance,
            kind,
        }
    }

    fn invested(shelter: TaxShelter) -> AccountKind {
        AccountKind::Invested {
            expense_ratio: 0.0,
            shelter,
            cost_basis: None,
        }
    }

    fn cash() -> AccountKind {
        AccountKind::Liquid { interest_rate: 0.0 }
    }

    fn recurring(id: &str, annual: f64, discretionary: bool) -> Expense {
        Expense {
            id: id.to_string(),
            name: id.to_string(),
            active: ActiveRange::default(),
            kind: ExpenseKind::Recurring {
                amount: annual,
                frequency: Frequency::Annual,
                inflation: InflationIndex::General,
                deduction: Deductibility::None,
                discretionary,
            },
        }
    }

    fn plan(accounts: Vec<Account>) -> PlanInputs {
        PlanInputs {
            accounts,
            incomes: Vec::new(),
            expenses: Vec::new(),
            assumptions: assumptions(),
            tax_state: "TX".to_string(),
        }
    }

    #[test]
    fn baseline_return_compounds_invested_balance() {
        let mut p = plan(vec![account("idx", 100_000.0, invested(TaxShelter::Taxable))]);
        p.assumptions.investment_return = 0.07;
        let years = run_simulation(&p).expect("valid plan");

        assert_eq!(years.len(), 7);
        assert_eq!(years[0].age, 64);
        assert_eq!(years[6].year, 2030);
        assert_approx(years[6].net_worth, 100_000.0 * 1.07_f64.powi(7));
        assert!(years.iter().all(|y| y.cashflow.unfunded == 0.0));
    }

    #[test]
    fn phases_move_from_accumulating_to_distributing() {
        let p = plan(vec![account("cash", 1_000.0, cash())]);
        let years = run_simulation(&p).expect("valid plan");
        assert_eq!(years[0].phase, SimulationPhase::Accumulating);
        assert_eq!(years[1].phase, SimulationPhase::Distributing);
        assert!(years[1].decision_log.iter().any(|l| l.contains("distributing")));
    }

    #[test]
    fn depletion_is_recorded_and_sticky() {
        let mut p = plan(vec![account("cash", 10_000.0, cash())]);
        p.expenses.push(recurring("living", 20_000.0, false));
        let years = run_simulation(&p).expect("valid plan");

        assert_eq!(years.len(), 7);
        assert_eq!(years[0].phase, SimulationPhase::Depleted);
        assert_approx(years[0].cashflow.unfunded, 10_000.0);
        for y in &years[1..] {
            assert_eq!(y.phase, SimulationPhase::Depleted);
            assert_approx(y.cashflow.unfunded, 20_000.0);
            assert_eq!(y.net_worth, 0.0);
        }

        let result = scenario_result(0, years, Vec::new());
        assert!(!result.success);
        assert_eq!(result.year_of_depletion, Some(2024));
    }

    #[test]
    fn unknown_account_reference_is_an_input_error() {
        let mut p = plan(vec![account("cash", 1_000.0, cash())]);
        p.assumptions.withdrawal_priority = vec!["missing".to_string()];
        let err = run_simulation(&p).expect_err("unknown account");
        assert!(matches!(err, EngineError::UnknownAccount { ref reference, .. } if reference == "missing"));
    }

    #[test]
    fn loan_must_point_at_a_debt_account() {
        let mut p = plan(vec![account("cash", 1_000.0, cash())]);
        p.expenses.push(Expense {
            id: "car".to_string(),
            name: "Car".to_string(),
            active: ActiveRange::default(),
            kind: ExpenseKind::AmortizingLoan {
                debt_account: "cash".to_string(),
                monthly_payment: 300.0,
            },
        });
        assert!(matches!(
            run_simulation(&p),
            Err(EngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn unknown_state_code_is_rejected() {
        let mut p = plan(Vec::new());
        p.tax_state = "ZZ".to_string();
        assert!(run_simulation(&p).is_err());
    }

    #[test]
    fn surplus_fills_contribution_priorities_within_limits() {
        let mut p = plan(vec![
            account("roth", 0.0, invested(TaxShelter::RothIra)),
            account("brokerage", 0.0, invested(TaxShelter::Taxable)),
        ]);
        p.assumptions.current_age = 40;
        p.assumptions.life_expectancy = 40;
        p.assumptions.contribution_priority = vec!["roth".to_string(), "brokerage".to_string()];
        p.incomes.push(Income {
            id: "job".to_string(),
            name: "Job".to_string(),
            amount: 100_000.0,
            frequency: Frequency::Annual,
            active: ActiveRange::default(),
            kind: IncomeKind::Wage {
                pre_tax_contribution: 0.0,
                pre_tax_insurance: 0.0,
                growth_rate: None,
                fica_exempt: false,
                deferral_account: None,
            },
        });
        let years = run_simulation(&p).expect("valid plan");
        let y = &years[0];

        assert_approx(y.accounts[0].balance, 7_000.0);
        let after_tax = 100_000.0 - y.taxes.total_tax();
        assert_approx(y.accounts[1].balance, after_tax - 7_000.0);
        assert_approx(y.cashflow.contributions, after_tax);
        assert!(y.taxes.fica > 0.0);
    }

    #[test]
    fn payroll_deferral_is_pre_tax_and_capped() {
        let mut p = plan(vec![account("k", 0.0, invested(TaxShelter::Traditional401k))]);
        p.assumptions.current_age = 40;
        p.assumptions.life_expectancy = 40;
        p.incomes.push(Income {
            id: "job".to_string(),
            name: "Job".to_string(),
            amount: 200_000.0,
            frequency: Frequency::Annual,
            active: ActiveRange::default(),
            kind: IncomeKind::Wage {
                pre_tax_contribution: 40_000.0,
                pre_tax_insurance: 0.0,
                growth_rate: None,
                fica_exempt: false,
                deferral_account: Some("k".to_string()),
            },
        });
        let years = run_simulation(&p).expect("valid plan");
        let y = &years[0];
        assert_approx(y.taxes.pre_tax, 23_000.0);
        assert_approx(y.taxes.adjusted_gross_income, 177_000.0);
        // The deferral is the only deposit the 401(k) receives; the rest of the
        // surplus has no home and is logged.
        assert_approx(y.accounts[0].balance, 23_000.0);
        assert!(y.decision_log.iter().any(|l| l.contains("outside tracked accounts")));
    }

    #[test]
    fn rmd_is_forced_from_prior_year_end_balance() {
        let mut p = plan(vec![
            account("ira", 500_000.0, invested(TaxShelter::TraditionalIra)),
            account("cash", 0.0, cash()),
        ]);
        p.assumptions.current_age = 75;
        p.assumptions.retirement_age = 65;
        p.assumptions.life_expectancy = 75;
        p.assumptions.investment_return = 0.10;
        let years = run_simulation(&p).expect("valid plan");
        let y = &years[0];

        let rmd = y.rmd.as_ref().expect("rmd record");
        assert_approx(rmd.distribution_period, 24.6);
        assert_approx(rmd.required, 500_000.0 / 24.6);
        assert_approx(y.accounts[0].balance, 550_000.0 - 500_000.0 / 24.6);
        // After-tax proceeds are parked in cash.
        assert_approx(y.accounts[1].balance, 500_000.0 / 24.6 - y.taxes.total_tax());
    }

    #[test]
    fn no_rmd_before_start_age() {
        let mut p = plan(vec![account("ira", 500_000.0, invested(TaxShelter::TraditionalIra))]);
        p.assumptions.current_age = 74;
        p.assumptions.life_expectancy = 74;
        let years = run_simulation(&p).expect("valid plan");
        assert!(years[0].rmd.is_none());
    }

    #[test]
    fn roth_conversion_fills_target_bracket() {
        let mut p = plan(vec![
            account("cash", 100_000.0, cash()),
            account("ira", 1_000_000.0, invested(TaxShelter::TraditionalIra)),
            account("roth", 0.0, invested(TaxShelter::RothIra)),
        ]);
        p.assumptions.current_age = 66;
        p.assumptions.life_expectancy = 66;
        p.assumptions.roth_conversion = RothConversionSettings {
            enabled: true,
            target_rate: 0.12,
            destination_account: None,
            end_age: None,
        };
        let years = run_simulation(&p).expect("valid plan");
        let y = &years[0];
        let conversion = y.roth_conversion.as_ref().expect("conversion");

        // 47,150 top of the 12% bracket plus the 14,600 standard deduction.
        assert_approx(conversion.amount, 61_750.0);
        assert_eq!(conversion.from_account, "ira");
        assert_approx(y.accounts[2].balance, 61_750.0);
        assert_approx(y.taxes.taxable_income, 47_150.0);
        assert_approx(y.taxes.federal, 1_160.0 + 0.12 * 35_550.0);
        // The tax bill comes out of cash.
        assert_approx(y.accounts[0].balance, 100_000.0 - y.taxes.total_tax());
    }

    #[test]
    fn roth_target_rate_must_be_a_bracket_rate() {
        let mut p = plan(vec![account("roth", 0.0, invested(TaxShelter::RothIra))]);
        p.assumptions.roth_conversion.enabled = true;
        p.assumptions.roth_conversion.target_rate = 0.13;
        assert!(matches!(
            run_simulation(&p),
            Err(EngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn roth_conversion_counts_social_security_it_makes_taxable() {
        let mut p = plan(vec![
            account("cash", 100_000.0, cash()),
            account("ira", 1_000_000.0, invested(TaxShelter::TraditionalIra)),
            account("roth", 0.0, invested(TaxShelter::RothIra)),
        ]);
        p.assumptions.birth_year = 1954;
        p.assumptions.current_age = 70;
        p.assumptions.life_expectancy = 70;
        p.assumptions.roth_conversion = RothConversionSettings {
            enabled: true,
            target_rate: 0.12,
            destination_account: None,
            end_age: None,
        };
        p.incomes.push(Income {
            id: "ss".to_string(),
            name: "Social Security".to_string(),
            amount: 0.0,
            frequency: Frequency::Annual,
            active: ActiveRange::default(),
            kind: IncomeKind::SocialSecurity {
                claiming_age: 67,
                claiming_month: 0,
                pia: Some(2_500.0),
                earnings_history: Vec::new(),
            },
        });
        let years = run_simulation(&p).expect("valid plan");
        let y = &years[0];
        let conversion = y.roth_conversion.as_ref().expect("conversion");

        assert!(y.taxes.taxable_social_security > 0.0);
        assert!(conversion.amount < 61_750.0);
        assert!(y.taxes.taxable_income <= 47_150.0 + TEST_EPS);
        assert!(y.taxes.taxable_income > 47_149.0);
        assert_eq!(y.taxes.marginal_rate, 0.12);
    }

    #[test]
    fn social_security_claiming_age_is_bounded() {
        let mut p = plan(vec![account("cash", 0.0, cash())]);
        p.incomes.push(Income {
            id: "ss".to_string(),
            name: "Social Security".to_string(),
            amount: 0.0,
            frequency: Frequency::Annual,
            active: ActiveRange::default(),
            kind: IncomeKind::SocialSecurity {
                claiming_age: u32::MAX,
                claiming_month: 0,
                pia: Some(2_000.0),
                earnings_history: Vec::new(),
            },
        });
        assert!(matches!(
            run_simulation(&p),
            Err(EngineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn mortgage_amortizes_linked_property_loan() {
        let mut p = plan(vec![
            account("cash", 100_000.0, cash()),
            account(
                "house",
                400_000.0,
                AccountKind::Property {
                    appreciation_rate: 0.0,
                    loan_balance: 200_000.0,
                },
            ),
        ]);
        p.assumptions.life_expectancy = 64;
        p.expenses.push(Expense {
            id: "mortgage".to_string(),
            name: "Mortgage".to_string(),
            active: ActiveRange::default(),
            kind: ExpenseKind::Mortgage {
                property_account: "house".to_string(),
                monthly_payment: 1_500.0,
                interest_rate: 0.06,
                annual_property_tax: 4_000.0,
                annual_insurance: 1_200.0,
            },
        });
        let years = run_simulation(&p).expect("valid plan");
        let y = &years[0];
        let AccountKind::Property { loan_balance, .. } = y.accounts[1].kind else {
            panic!("property account");
        };
        assert!(loan_balance < 200_000.0);
        assert_approx(y.cashflow.expenses, 1_500.0 * 12.0 + 5_200.0);
        assert_approx(y.total_debts, loan_balance);
        assert_approx(y.net_worth, y.total_assets - loan_balance);
    }

    #[test]
    fn discretionary_spending_is_trimmed_to_strategy_budget() {
        let mut p = plan(vec![account("cash", 1_000_000.0, cash())]);
        p.assumptions.current_age = 65;
        p.assumptions.life_expectancy = 65;
        p.assumptions.withdrawal = WithdrawalSettings {
            strategy: WithdrawalStrategy::FixedReal,
            initial_withdrawal: Some(30_000.0),
            initial_rate: 0.04,
        };
        p.expenses.push(recurring("essentials", 25_000.0, false));
        p.expenses.push(recurring("travel", 10_000.0, true));
        let years = run_simulation(&p).expect("valid plan");
        let y = &years[0];

        assert_approx(y.cashflow.trimmed_discretionary, 5_000.0);
        assert_approx(y.expenses[1].amount, 5_000.0);
        assert_approx(y.cashflow.withdrawals, 30_000.0);
        assert_approx(y.accounts[0].balance, 970_000.0);
    }

    fn strategy_plan(strategy: WithdrawalStrategy) -> PlanInputs {
        let mut p = plan(vec![account("roth", 640_000.0, invested(TaxShelter::RothIra))]);
        p.assumptions.current_age = 65;
        p.assumptions.life_expectancy = 68;
        p.assumptions.withdrawal = WithdrawalSettings {
            strategy,
            initial_withdrawal: Some(40_000.0),
            initial_rate: 0.04,
        };
        p.expenses.push(recurring("living", 10_000.0, false));
        p
    }

    #[test]
    fn guardrails_adjust_the_following_year_budget() {
        let p = strategy_plan(WithdrawalStrategy::GuytonKlinger {
            upper_guardrail: 0.06,
            lower_guardrail: 0.03,
            adjustment: 0.10,
        });
        let years =
            run_simulation_with_returns(&p, &[0.0, 1.0, 0.0, 0.0]).expect("valid plan");
        let planned: Vec<f64> = years.iter().map(|y| y.planned_withdrawal).collect();
        let actions: Vec<GuardrailAction> = years.iter().map(|y| y.guardrail).collect();

        // 40,000 / 640,000 = 6.25%: paid in full, cut next year.
        assert_approx(planned[0], 40_000.0);
        // 36,000 / 1,260,000 = 2.9% after the doubling: raised next year.
        assert_approx(planned[1], 36_000.0);
        assert_approx(planned[2], 39_600.0);
        assert_approx(planned[3], 39_600.0);
        assert_eq!(
            actions,
            vec![
                GuardrailAction::Austerity,
                GuardrailAction::Prosperity,
                GuardrailAction::None,
                GuardrailAction::None,
            ]
        );
        assert!(years[0].decision_log.iter().any(|l| l.contains("above upper guardrail")));
        assert!(years[1].decision_log.iter().any(|l| l.contains("below lower guardrail")));
    }

    #[test]
    fn fixed_percentage_budget_follows_portfolio() {
        let p = strategy_plan(WithdrawalStrategy::FixedPercentage { rate: 0.05 });
        let years =
            run_simulation_with_returns(&p, &[0.0, 1.0, 0.0, 0.0]).expect("valid plan");
        assert_approx(years[0].planned_withdrawal, 32_000.0);
        assert_approx(years[1].planned_withdrawal, 63_000.0);
        assert_approx(years[2].planned_withdrawal, 62_500.0);
        assert!(years.iter().all(|y| y.guardrail == GuardrailAction::None));
    }

    #[test]
    fn injected_returns_override_baseline() {
        let p = plan(vec![account("idx", 100_000.0, invested(TaxShelter::RothIra))]);
        let years = run_simulation_with_returns(&p, &[0.10, -0.5, -3.0]).expect("valid plan");
        assert_approx(years[0].net_worth, 110_000.0);
        assert_approx(years[1].net_worth, 55_000.0);
        assert_eq!(years[2].investment_return, -1.0);
        assert_eq!(years[2].net_worth, 0.0);
        // Baseline (0%) for the rest.
        assert_eq!(years[3].investment_return, 0.0);
    }

    #[test]
    fn social_security_starts_at_claiming_age() {
        let mut p = plan(vec![account("cash", 0.0, cash())]);
        p.incomes.push(Income {
            id: "ss".to_string(),
            name: "Social Security".to_string(),
            amount: 0.0,
            frequency: Frequency::Annual,
            active: ActiveRange::default(),
            kind: IncomeKind::SocialSecurity {
                claiming_age: 67,
                claiming_month: 6,
                pia: Some(2_000.0),
                earnings_history: Vec::new(),
            },
        });
        let years = run_simulation(&p).expect("valid plan");
        // Six months past a 67 FRA earns half a year of delayed credits.
        let annual = benefit_from_pia(2_000.0, 1960, 67 * 12 + 6).annual_benefit;
        assert_approx(annual, 2_080.0 * 12.0);
        assert_eq!(years[2].incomes[0].amount, 0.0);
        assert_approx(years[3].incomes[0].amount, annual * 0.5);
        assert_approx(years[4].incomes[0].amount, annual);
    }

    #[test]
    fn fers_pension_pays_supplement_until_62() {
        let mut p = plan(vec![account("cash", 0.0, cash())]);
        p.assumptions.birth_year = 1970;
        p.assumptions.current_age = 57;
        p.assumptions.retirement_age = 57;
        p.assumptions.life_expectancy = 63;
        p.incomes.push(Income {
            id: "fers".to_string(),
            name: "FERS".to_string(),
            amount: 0.0,
            frequency: Frequency::Annual,
            active: ActiveRange::default(),
            kind: IncomeKind::Pension {
                plan: PensionPlan::Fers {
                    years_of_service: 30.0,
                    high3: Some(100_000.0),
                    salary_history: Vec::new(),
                    ss_monthly_at_62: 2_000.0,
                },
                start_age: 57,
            },
        });
        let years = run_simulation(&p).expect("valid plan");
        assert_approx(years[0].incomes[0].amount, 30_000.0 + 18_000.0);
        assert_approx(years[5].incomes[0].amount, 30_000.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_balances_stay_non_negative_and_net_worth_balances(
            returns in proptest::collection::vec(-0.6f64..0.6, 7),
            spending in 0.0f64..80_000.0,
        ) {
            let mut p = plan(vec![
                account("cash", 20_000.0, cash()),
                account("ira", 150_000.0, invested(TaxShelter::TraditionalIra)),
                account("brokerage", 100_000.0, AccountKind::Invested {
                    expense_ratio: 0.001,
                    shelter: TaxShelter::Taxable,
                    cost_basis: Some(60_000.0),
                }),
            ]);
            p.expenses.push(recurring("living", spending, false));
            let years = run_simulation_with_returns(&p, &returns).expect("valid plan");
            prop_assert!(years.len() == 7);
            let mut seen_depleted = false;
            for y in &years {
                prop_assert!(y.accounts.iter().all(|a| a.balance >= -1e-6));
                prop_assert!((y.net_worth - (y.total_assets - y.total_debts)).abs() < 1e-6);
                if seen_depleted {
                    prop_assert!(y.phase == SimulationPhase::Depleted);
                }
                seen_depleted |= y.phase == SimulationPhase::Depleted;
            }
        }
    }
}

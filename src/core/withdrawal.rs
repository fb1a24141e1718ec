use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};
use super::tax::{TaxContext, TaxYear};
use super::types::{Account, AccountKind, TaxShelter, WithdrawalRecord};

pub(crate) const BISECTION_STEPS: usize = 40;
const FUNDED_EPS: f64 = 1e-6;

pub const PENALTY_FREE_AGE: u32 = 60;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WithdrawalStrategy {
    FixedReal,
    #[serde(rename_all = "camelCase")]
    FixedPercentage { rate: f64 },
    #[serde(rename_all = "camelCase")]
    GuytonKlinger {
        upper_guardrail: f64,
        lower_guardrail: f64,
        adjustment: f64,
    },
}

impl WithdrawalStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            WithdrawalStrategy::FixedReal => "fixed-real",
            WithdrawalStrategy::FixedPercentage { .. } => "fixed-percentage",
            WithdrawalStrategy::GuytonKlinger { .. } => "guyton-klinger",
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        match *self {
            WithdrawalStrategy::FixedReal => Ok(()),
            WithdrawalStrategy::FixedPercentage { rate } => {
                if (0.0..=1.0).contains(&rate) {
                    Ok(())
                } else {
                    Err(EngineError::invalid("withdrawalStrategy.rate", "must be within 0..=1"))
                }
            }
            WithdrawalStrategy::GuytonKlinger {
                upper_guardrail,
                lower_guardrail,
                adjustment,
            } => {
                if !(lower_guardrail >= 0.0 && upper_guardrail >= lower_guardrail) {
                    return Err(EngineError::invalid(
                        "withdrawalStrategy",
                        "guardrails must satisfy 0 <= lower <= upper",
                    ));
                }
                if !(0.0..=1.0).contains(&adjustment) {
                    return Err(EngineError::invalid(
                        "withdrawalStrategy.adjustment",
                        "must be within 0..=1",
                    ));
                }
                Ok(())
            }
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardrailAction {
    #[default]
    None,
    Austerity,
    Prosperity,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PlannedWithdrawal {
    pub amount: f64,
    /// Guardrail crossed by this year's rate; it sizes next year's amount.
    pub action: GuardrailAction,
}

#[derive(Clone, Debug)]
pub struct WithdrawalPlanner {
    strategy: WithdrawalStrategy,
    initial: f64,
    previous: Option<f64>,
    pending: GuardrailAction,
}

impl WithdrawalPlanner {
    pub fn new(strategy: WithdrawalStrategy, initial_withdrawal: f64) -> Self {
        Self {
            strategy,
            initial: initial_withdrawal.max(0.0),
            previous: None,
            pending: GuardrailAction::None,
        }
    }

    pub fn strategy(&self) -> &WithdrawalStrategy {
        &self.strategy
    }

    /// `portfolio` is the start-of-year value, `inflation` last year's rate.
    pub fn plan_year(&mut self, portfolio: f64, inflation: f64) -> PlannedWithdrawal {
        let portfolio = portfolio.max(0.0);
        let inflated = self
            .previous
            .map_or(self.initial, |prev| prev * (1.0 + inflation));
        let (amount, action) = match self.strategy {
            WithdrawalStrategy::FixedPercentage { rate } => {
                (portfolio * rate.max(0.0), GuardrailAction::None)
            }
            WithdrawalStrategy::FixedReal => (inflated, GuardrailAction::None),
            WithdrawalStrategy::GuytonKlinger {
                upper_guardrail,
                lower_guardrail,
                adjustment,
            } => {
                let adjustment = adjustment.clamp(0.0, 1.0);
                let amount = match self.pending {
                    GuardrailAction::Austerity => inflated * (1.0 - adjustment),
                    GuardrailAction::Prosperity => inflated * (1.0 + adjustment),
                    GuardrailAction::None => inflated,
                };
                let action = if portfolio <= 0.0 {
                    GuardrailAction::None
                } else if amount / portfolio > upper_guardrail {
                    GuardrailAction::Austerity
                } else if amount / portfolio < lower_guardrail {
                    GuardrailAction::Prosperity
                } else {
                    GuardrailAction::None
                };
                (amount, action)
            }
        };

        self.previous = Some(amount);
        self.pending = action;
        PlannedWithdrawal { amount, action }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawOutcome {
    pub records: Vec<WithdrawalRecord>,
    pub gross: f64,
    pub net: f64,
    pub unfunded: f64,
}

pub fn draw_for_shortfall(
    shortfall: f64,
    accounts: &mut [Account],
    order: &[usize],
    tax_year: &mut TaxYear,
    ctx: &TaxContext,
    age: u32,
) -> DrawOutcome {
    let mut outcome = DrawOutcome::default();
    let mut remaining = shortfall.max(0.0);

    for &idx in order {
        if remaining <= FUNDED_EPS {
            break;
        }
        let Some(account) = accounts.get_mut(idx) else {
            continue;
        };
        if account.balance <= 0.0 {
            continue;
        }

        let (gross, net, realized_gain) = match account.kind {
            AccountKind::Liquid { .. } => {
                let x = account.take(remaining);
                (x, x, 0.0)
            }
            AccountKind::Invested { shelter, .. } if shelter.is_traditional() => {
                let early = age < PENALTY_FREE_AGE;
                let (gross, net) = withdraw_traditional_for_net(
                    remaining,
                    &mut account.balance,
                    tax_year,
                    ctx,
                    early,
                );
                (gross, net, 0.0)
            }
            AccountKind::Invested {
                shelter: TaxShelter::Taxable,
                ..
            } => withdraw_taxable_for_net(remaining, account, tax_year, ctx),
            AccountKind::Invested { .. } => {
                let x = account.take(remaining);
                (x, x, 0.0)
            }
            AccountKind::Debt { .. } | AccountKind::Property { .. } => continue,
        };

        if gross <= 0.0 {
            continue;
        }
        remaining = (remaining - net).max(0.0);
        outcome.gross += gross;
        outcome.net += net;
        outcome.records.push(WithdrawalRecord {
            account_id: account.id.clone(),
            gross,
            net,
            realized_gain,
        });
    }

    outcome.unfunded = if remaining > FUNDED_EPS { remaining } else { 0.0 };
    outcome
}

/// Smallest gross in `[0, max_gross]` whose net reaches `desired_net`.
fn gross_for_net(desired_net: f64, max_gross: f64, net_of: impl Fn(f64) -> f64) -> f64 {
    let mut lo = 0.0;
    let mut hi = max_gross;

    for _ in 0..BISECTION_STEPS {
        let mid = (lo + hi) * 0.5;
        if net_of(mid) < desired_net {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    hi.min(max_gross)
}

fn traditional_net(
    gross: f64,
    tax_year: &TaxYear,
    base_tax: f64,
    ctx: &TaxContext,
    early: bool,
) -> f64 {
    if gross <= 0.0 {
        return 0.0;
    }
    let mut after = tax_year.clone();
    after.ordinary_income += gross;
    if early {
        after.early_withdrawals += gross;
    }
    let incremental_tax = (after.total_tax(ctx) - base_tax).max(0.0);
    (gross - incremental_tax).max(0.0)
}

/// Gross-up of a fully taxable withdrawal. Returns `(gross, net)`.
pub fn withdraw_traditional_for_net(
    target_net: f64,
    balance: &mut f64,
    tax_year: &mut TaxYear,
    ctx: &TaxContext,
    early: bool,
) -> (f64, f64) {
    if target_net <= 0.0 || *balance <= 0.0 {
        return (0.0, 0.0);
    }

    let base_tax = tax_year.total_tax(ctx);
    let net_of = |g: f64| traditional_net(g, tax_year, base_tax, ctx, early);

    let max_net = net_of(*balance);
    let desired_net = target_net.min(max_net);
    if desired_net <= 0.0 {
        return (0.0, 0.0);
    }

    let gross = gross_for_net(desired_net, *balance, net_of);
    let net = net_of(gross);
    *balance -= gross;
    tax_year.ordinary_income += gross;
    if early {
        tax_year.early_withdrawals += gross;
    }
    (gross, net)
}

pub fn withdraw_traditional_gross(
    gross: f64,
    balance: &mut f64,
    tax_year: &mut TaxYear,
    ctx: &TaxContext,
    early: bool,
) -> (f64, f64) {
    let gross = gross.max(0.0).min(balance.max(0.0));
    if gross <= 0.0 {
        return (0.0, 0.0);
    }
    let base_tax = tax_year.total_tax(ctx);
    let net = traditional_net(gross, tax_year, base_tax, ctx, early);
    *balance -= gross;
    tax_year.ordinary_income += gross;
    if early {
        tax_year.early_withdrawals += gross;
    }
    (gross, net)
}

fn taxable_sale_gain(gross: f64, value_before: f64, basis_before: f64) -> f64 {
    if gross <= 0.0 || value_before <= 0.0 {
        return 0.0;
    }
    let gross = gross.min(value_before);
    let basis_portion = (basis_before * (gross / value_before)).min(basis_before);
    gross - basis_portion
}

fn taxable_net(
    gross: f64,
    value_before: f64,
    basis_before: f64,
    tax_year: &TaxYear,
    base_tax: f64,
    ctx: &TaxContext,
) -> f64 {
    if gross <= 0.0 {
        return 0.0;
    }
    let gain = taxable_sale_gain(gross, value_before, basis_before);
    let mut after = tax_year.clone();
    after.capital_gains += gain;
    let incremental_tax = (after.total_tax(ctx) - base_tax).max(0.0);
    (gross - incremental_tax).max(0.0)
}

/// Sells from a taxable account, relieving basis pro rata. Returns
/// `(gross, net, realized_gain)`.
fn withdraw_taxable_for_net(
    target_net: f64,
    account: &mut Account,
    tax_year: &mut TaxYear,
    ctx: &TaxContext,
) -> (f64, f64, f64) {
    let value_before = account.balance.max(0.0);
    let AccountKind::Invested { cost_basis, .. } = &mut account.kind else {
        return (0.0, 0.0, 0.0);
    };
    let basis_before = cost_basis.unwrap_or(value_before).clamp(0.0, value_before);
    if target_net <= 0.0 || value_before <= 0.0 {
        return (0.0, 0.0, 0.0);
    }

    let base_tax = tax_year.total_tax(ctx);
    let net_of = |g: f64| taxable_net(g, value_before, basis_before, tax_year, base_tax, ctx);

    let max_net = net_of(value_before);
    let desired_net = target_net.min(max_net);
    if desired_net <= 0.0 {
        return (0.0, 0.0, 0.0);
    }

    let gross = gross_for_net(desired_net, value_before, net_of);
    let net = net_of(gross);
    let gain = taxable_sale_gain(gross, value_before, basis_before);
    let basis_portion = gross - gain;

    let value_after = value_before - gross;
    *cost_basis = Some((basis_before - basis_portion).max(0.0).min(value_after));
    account.balance = value_after;
    tax_year.capital_gains += gain;
    (gross, net, gain)
}

use super::types::{Account, AccountKind, TaxShelter};

impl Account {
    pub fn shelter(&self) -> Option<TaxShelter> {
        match self.kind {
            AccountKind::Invested { shelter, .. } => Some(shelter),
            _ => None,
        }
    }

    pub fn is_investable(&self) -> bool {
        matches!(
            self.kind,
            AccountKind::Liquid { .. } | AccountKind::Invested { .. }
        )
    }

    pub fn asset_value(&self) -> f64 {
        match self.kind {
            AccountKind::Debt { .. } => 0.0,
            _ => self.balance.max(0.0),
        }
    }

    pub fn debt_value(&self) -> f64 {
        match self.kind {
            AccountKind::Debt { .. } => self.balance.max(0.0),
            AccountKind::Property { loan_balance, .. } => loan_balance.max(0.0),
            _ => 0.0,
        }
    }

    pub fn normalize(&mut self) {
        self.balance = self.balance.max(0.0);
        let balance = self.balance;
        match &mut self.kind {
            AccountKind::Invested {
                shelter: TaxShelter::Taxable,
                cost_basis,
                ..
            } => {
                let basis = cost_basis.unwrap_or(balance).clamp(0.0, balance);
                *cost_basis = Some(basis);
            }
            AccountKind::Property { loan_balance, .. } => *loan_balance = loan_balance.max(0.0),
            _ => {}
        }
    }

    pub fn apply_growth(&mut self, market_return: f64) {
        let factor = match self.kind {
            AccountKind::Invested { expense_ratio, .. } => {
                1.0 + market_return.max(-1.0) - expense_ratio.max(0.0)
            }
            AccountKind::Liquid { interest_rate } => 1.0 + interest_rate,
            AccountKind::Property {
                appreciation_rate, ..
            } => 1.0 + appreciation_rate,
            AccountKind::Debt { .. } => return,
        };
        self.balance = (self.balance * factor).max(0.0);
    }

    pub fn deposit(&mut self, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        self.balance += amount;
        if let AccountKind::Invested {
            shelter: TaxShelter::Taxable,
            cost_basis,
            ..
        } = &mut self.kind
        {
            *cost_basis = Some(cost_basis.unwrap_or(0.0) + amount);
        }
    }

    pub fn take(&mut self, amount: f64) -> f64 {
        let taken = amount.max(0.0).min(self.balance.max(0.0));
        self.balance -= taken;
        taken
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Amortization {
    pub interest: f64,
    pub principal: f64,
}

impl Amortization {
    pub fn paid(&self) -> f64 {
        self.interest + self.principal
    }
}

pub fn amortize(balance: &mut f64, annual_rate: f64, monthly_payment: f64, months: u32) -> Amortization {
    let monthly_rate = annual_rate.max(0.0) / 12.0;
    let mut result = Amortization::default();

    for _ in 0..months {
        if *balance <= 0.0 {
            break;
        }
        let interest = *balance * monthly_rate;
        // A payment below the interest lets the loan negatively amortize; the
        // balance is held flat instead.
        let principal = (monthly_payment - interest).clamp(0.0, *balance);
        let interest_paid = interest.min(monthly_payment.max(0.0));
        *balance -= principal;
        result.interest += interest_paid;
        result.principal += principal;
    }

    *balance = balance.max(0.0);
    result
}

pub fn balance_sheet(accounts: &[Account]) -> (f64, f64) {
    accounts.iter().fold((0.0, 0.0), |(assets, debts), a| {
        (assets + a.asset_value(), debts + a.debt_value())
    })
}

pub fn investable_balance(accounts: &[Account]) -> f64 {
    accounts
        .iter()
        .filter(|a| a.is_investable())
        .map(|a| a.balance.max(0.0))
        .sum()
}

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FilingStatus {
    #[default]
    #[serde(alias = "single")]
    Single,
    #[serde(alias = "marriedFilingJointly", alias = "married_filing_jointly", alias = "mfj")]
    MarriedFilingJointly,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBracket {
    pub threshold: f64,
    pub rate: f64,
}

const fn bracket(threshold: f64, rate: f64) -> TaxBracket {
    TaxBracket { threshold, rate }
}

pub const FEDERAL_BRACKETS_SINGLE: [TaxBracket; 7] = [
    bracket(0.0, 0.10),
    bracket(11_600.0, 0.12),
    bracket(47_150.0, 0.22),
    bracket(100_525.0, 0.24),
    bracket(191_950.0, 0.32),
    bracket(243_725.0, 0.35),
    bracket(609_350.0, 0.37),
];

pub const FEDERAL_BRACKETS_JOINT: [TaxBracket; 7] = [
    bracket(0.0, 0.10),
    bracket(23_200.0, 0.12),
    bracket(94_300.0, 0.22),
    bracket(201_050.0, 0.24),
    bracket(383_900.0, 0.32),
    bracket(487_450.0, 0.35),
    bracket(731_200.0, 0.37),
];

const CA_BRACKETS: [TaxBracket; 9] = [
    bracket(0.0, 0.01),
    bracket(10_756.0, 0.02),
    bracket(25_499.0, 0.04),
    bracket(40_245.0, 0.06),
    bracket(55_866.0, 0.08),
    bracket(70_606.0, 0.093),
    bracket(360_659.0, 0.103),
    bracket(432_787.0, 0.113),
    bracket(721_314.0, 0.123),
];

const NY_BRACKETS: [TaxBracket; 9] = [
    bracket(0.0, 0.04),
    bracket(8_500.0, 0.045),
    bracket(11_700.0, 0.0525),
    bracket(13_900.0, 0.055),
    bracket(80_650.0, 0.06),
    bracket(215_400.0, 0.0685),
    bracket(1_077_550.0, 0.0965),
    bracket(5_000_000.0, 0.103),
    bracket(25_000_000.0, 0.109),
];

pub const SALT_CAP: f64 = 10_000.0;
pub const SOCIAL_SECURITY_TAX_RATE: f64 = 0.062;
pub const SOCIAL_SECURITY_WAGE_BASE: f64 = 168_600.0;
pub const MEDICARE_TAX_RATE: f64 = 0.0145;
pub const ADDITIONAL_MEDICARE_RATE: f64 = 0.009;
pub const EARLY_WITHDRAWAL_PENALTY_RATE: f64 = 0.10;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FederalTaxTable {
    pub brackets: &'static [TaxBracket],
    pub standard_deduction: f64,
    pub ltcg_zero_rate_limit: f64,
    pub ltcg_fifteen_rate_limit: f64,
    pub additional_medicare_threshold: f64,
    pub ss_base_threshold: f64,
    pub ss_adjusted_threshold: f64,
}

pub fn federal_table(status: FilingStatus) -> FederalTaxTable {
    match status {
        FilingStatus::Single => FederalTaxTable {
            brackets: &FEDERAL_BRACKETS_SINGLE,
            standard_deduction: 14_600.0,
            ltcg_zero_rate_limit: 47_025.0,
            ltcg_fifteen_rate_limit: 518_900.0,
            additional_medicare_threshold: 200_000.0,
            ss_base_threshold: 25_000.0,
            ss_adjusted_threshold: 34_000.0,
        },
        FilingStatus::MarriedFilingJointly => FederalTaxTable {
            brackets: &FEDERAL_BRACKETS_JOINT,
            standard_deduction: 29_200.0,
            ltcg_zero_rate_limit: 94_050.0,
            ltcg_fifteen_rate_limit: 583_750.0,
            additional_medicare_threshold: 250_000.0,
            ss_base_threshold: 32_000.0,
            ss_adjusted_threshold: 44_000.0,
        },
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum StateTaxKind {
    None,
    Flat(f64),
    Brackets(&'static [TaxBracket]),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StateTaxTable {
    pub code: &'static str,
    pub kind: StateTaxKind,
    pub standard_deduction: f64,
}

const NO_INCOME_TAX_STATES: [&str; 9] = ["AK", "FL", "NV", "NH", "SD", "TN", "TX", "WA", "WY"];

const FLAT_TAX_STATES: [(&str, f64); 12] = [
    ("AZ", 0.025),
    ("CO", 0.044),
    ("GA", 0.0549),
    ("ID", 0.058),
    ("IL", 0.0495),
    ("IN", 0.0305),
    ("KY", 0.04),
    ("MA", 0.05),
    ("MI", 0.0425),
    ("NC", 0.045),
    ("PA", 0.0307),
    ("UT", 0.0465),
];

pub fn state_tax_table(code: &str) -> Option<StateTaxTable> {
    let upper = code.trim().to_ascii_uppercase();
    if let Some(code) = NO_INCOME_TAX_STATES.iter().copied().find(|c| *c == upper) {
        return Some(StateTaxTable {
            code,
            kind: StateTaxKind::None,
            standard_deduction: 0.0,
        });
    }
    if let Some((code, rate)) = FLAT_TAX_STATES.iter().copied().find(|(c, _)| *c == upper) {
        return Some(StateTaxTable {
            code,
            kind: StateTaxKind::Flat(rate),
            standard_deduction: 0.0,
        });
    }
    match upper.as_str() {
        "CA" => Some(StateTaxTable {
            code: "CA",
            kind: StateTaxKind::Brackets(&CA_BRACKETS),
            standard_deduction: 5_540.0,
        }),
        "NY" => Some(StateTaxTable {
            code: "NY",
            kind: StateTaxKind::Brackets(&NY_BRACKETS),
            standard_deduction: 8_000.0,
        }),
        _ => None,
    }
}

pub fn resolve_state(code: &str) -> EngineResult<StateTaxTable> {
    state_tax_table(code)
        .ok_or_else(|| EngineError::invalid("taxState", format!("unsupported state code '{code}'")))
}

impl StateTaxTable {
    pub fn tax(&self, agi: f64, status: FilingStatus, scale: f64) -> f64 {
        let joint = if status == FilingStatus::MarriedFilingJointly {
            2.0
        } else {
            1.0
        };
        let taxable = (agi - self.standard_deduction * joint * scale).max(0.0);
        match self.kind {
            StateTaxKind::None => 0.0,
            StateTaxKind::Flat(rate) => taxable * rate,
            StateTaxKind::Brackets(brackets) => bracket_tax(taxable, brackets, scale * joint),
        }
    }
}

pub fn bracket_tax(taxable_income: f64, brackets: &[TaxBracket], scale: f64) -> f64 {
    let mut remaining = taxable_income.max(0.0);
    let mut tax = 0.0;

    for (i, b) in brackets.iter().enumerate() {
        if remaining <= 0.0 {
            break;
        }
        let lower = b.threshold * scale;
        let width = brackets
            .get(i + 1)
            .map(|next| next.threshold * scale - lower)
            .unwrap_or(f64::INFINITY)
            .max(0.0);
        let in_bracket = remaining.min(width);
        tax += in_bracket * b.rate;
        remaining -= in_bracket;
    }

    tax
}

pub fn calculate_tax(taxable_income: f64, status: FilingStatus) -> f64 {
    bracket_tax(taxable_income, federal_table(status).brackets, 1.0)
}

fn bracket_index(taxable_income: f64, brackets: &[TaxBracket], scale: f64) -> usize {
    brackets
        .iter()
        .rposition(|b| taxable_income >= b.threshold * scale)
        .unwrap_or(0)
}

pub fn marginal_rate(taxable_income: f64, brackets: &[TaxBracket], scale: f64) -> f64 {
    if brackets.is_empty() {
        return 0.0;
    }
    brackets[bracket_index(taxable_income, brackets, scale)].rate
}

pub fn bracket_headroom(taxable_income: f64, brackets: &[TaxBracket], scale: f64) -> f64 {
    if brackets.is_empty() {
        return f64::INFINITY;
    }
    let idx = bracket_index(taxable_income.max(0.0), brackets, scale);
    match brackets.get(idx + 1) {
        Some(next) => (next.threshold * scale - taxable_income.max(0.0)).max(0.0),
        None => f64::INFINITY,
    }
}

/// Taxable income at the top of the bracket taxed at `target_rate`; infinite
/// for the top bracket, `None` when no bracket has that rate.
pub fn bracket_ceiling(brackets: &[TaxBracket], target_rate: f64, scale: f64) -> Option<f64> {
    let idx = brackets
        .iter()
        .position(|b| (b.rate - target_rate).abs() < 1e-9)?;
    Some(brackets.get(idx + 1).map_or(f64::INFINITY, |next| next.threshold * scale))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemizedDeductions {
    pub state_and_local_taxes: f64,
    pub mortgage_interest: f64,
    pub charitable: f64,
    pub medical: f64,
}

impl ItemizedDeductions {
    pub fn total(&self, salt_cap: f64) -> f64 {
        self.state_and_local_taxes.max(0.0).min(salt_cap)
            + self.mortgage_interest.max(0.0)
            + self.charitable.max(0.0)
            + self.medical.max(0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressiveTaxResult {
    pub adjusted_gross_income: f64,
    pub deduction: f64,
    pub itemized: bool,
    pub taxable_income: f64,
    pub tax: f64,
    pub effective_rate: f64,
    pub marginal_rate: f64,
    pub bracket_headroom: f64,
}

pub fn calculate_progressive_tax(
    gross_income: f64,
    pre_tax_deductions: f64,
    brackets: &[TaxBracket],
    standard_deduction: f64,
    itemized: Option<&ItemizedDeductions>,
    salt_cap: f64,
) -> ProgressiveTaxResult {
    let agi = (gross_income - pre_tax_deductions.max(0.0)).max(0.0);
    let itemized_total = itemized.map(|i| i.total(salt_cap)).unwrap_or(0.0);
    let use_itemized = itemized_total > standard_deduction;
    let deduction = standard_deduction.max(itemized_total);
    let taxable_income = (agi - deduction).max(0.0);
    let tax = bracket_tax(taxable_income, brackets, 1.0);

    ProgressiveTaxResult {
        adjusted_gross_income: agi,
        deduction,
        itemized: use_itemized,
        taxable_income,
        tax,
        effective_rate: if gross_income > 0.0 {
            tax / gross_income
        } else {
            0.0
        },
        marginal_rate: marginal_rate(taxable_income, brackets, 1.0),
        bracket_headroom: bracket_headroom(taxable_income, brackets, 1.0),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FicaTax {
    pub social_security: f64,
    pub medicare: f64,
    pub additional_medicare: f64,
}

impl FicaTax {
    pub fn total(&self) -> f64 {
        self.social_security + self.medicare + self.additional_medicare
    }
}

pub fn calculate_fica(earned_income: f64, status: FilingStatus, scale: f64) -> FicaTax {
    let earned = earned_income.max(0.0);
    let table = federal_table(status);
    let wage_base = SOCIAL_SECURITY_WAGE_BASE * scale;
    let additional_threshold = table.additional_medicare_threshold;
    FicaTax {
        social_security: SOCIAL_SECURITY_TAX_RATE * earned.min(wage_base),
        medicare: MEDICARE_TAX_RATE * earned,
        additional_medicare: ADDITIONAL_MEDICARE_RATE * (earned - additional_threshold).max(0.0),
    }
}

/// Portion of Social Security benefits included in taxable income.
/// `other_income` is AGI excluding the benefits themselves. The statutory
/// thresholds are not inflation indexed.
pub fn taxable_social_security(benefits: f64, other_income: f64, status: FilingStatus) -> f64 {
    if benefits <= 0.0 {
        return 0.0;
    }
    let table = federal_table(status);
    let base = table.ss_base_threshold;
    let adjusted = table.ss_adjusted_threshold;
    let provisional = other_income.max(0.0) + 0.5 * benefits;

    if provisional <= base {
        return 0.0;
    }
    if provisional <= adjusted {
        return (0.5 * (provisional - base)).min(0.5 * benefits);
    }

    let first_tier = (0.5 * (adjusted - base)).min(0.5 * benefits);
    (0.85 * (provisional - adjusted) + first_tier).min(0.85 * benefits)
}

pub fn long_term_gains_tax(
    ordinary_taxable: f64,
    gains: f64,
    status: FilingStatus,
    scale: f64,
) -> f64 {
    if gains <= 0.0 {
        return 0.0;
    }
    let table = federal_table(status);
    let zero_limit = table.ltcg_zero_rate_limit * scale;
    let fifteen_limit = table.ltcg_fifteen_rate_limit * scale;

    let start = ordinary_taxable.max(0.0);
    let end = start + gains;
    let band = |lo: f64, hi: f64| (end.min(hi) - start.max(lo)).max(0.0);

    band(zero_limit, fifteen_limit) * 0.15 + band(fifteen_limit, f64::INFINITY) * 0.20
}

#[derive(Copy, Clone, Debug)]
pub struct TaxContext {
    pub status: FilingStatus,
    pub state: StateTaxTable,
    pub scale: f64,
    pub salt_cap: f64,
}

#[derive(Clone, Debug, Default)]
pub struct TaxYear {
    pub wages: f64,
    pub fica_exempt_wages: f64,
    pub pre_tax_retirement: f64,
    pub pre_tax_insurance: f64,
    pub ordinary_income: f64,
    pub social_security_benefits: f64,
    pub capital_gains: f64,
    pub early_withdrawals: f64,
    pub property_tax: f64,
    pub mortgage_interest: f64,
    pub charitable: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub federal: f64,
    pub state: f64,
    pub fica: f64,
    pub capital_gains: f64,
    pub early_withdrawal_penalty: f64,
    pub pre_tax: f64,
    pub insurance: f64,
    pub adjusted_gross_income: f64,
    pub taxable_income: f64,
    pub taxable_social_security: f64,
    pub deduction: f64,
    pub itemized: bool,
    pub marginal_rate: f64,
}

impl TaxBreakdown {
    pub fn total_tax(&self) -> f64 {
        self.federal + self.state + self.fica + self.capital_gains + self.early_withdrawal_penalty
    }
}

impl TaxYear {
    pub fn assess(&self, ctx: &TaxContext) -> TaxBreakdown {
        let table = federal_table(ctx.status);
        let wages_after_deferrals =
            (self.wages - self.pre_tax_retirement - self.pre_tax_insurance).max(0.0);
        let gains = self.capital_gains.max(0.0);
        let agi_before_benefits = wages_after_deferrals + self.ordinary_income.max(0.0) + gains;
        let taxable_ss = taxable_social_security(
            self.social_security_benefits,
            agi_before_benefits,
            ctx.status,
        );
        let agi = agi_before_benefits + taxable_ss;

        // States in the table exempt Social Security benefits.
        let state = ctx.state.tax(agi_before_benefits, ctx.status, ctx.scale);

        let itemized = ItemizedDeductions {
            state_and_local_taxes: state + self.property_tax,
            mortgage_interest: self.mortgage_interest,
            charitable: self.charitable,
            medical: 0.0,
        };
        let standard = table.standard_deduction * ctx.scale;
        let itemized_total = itemized.total(ctx.salt_cap * ctx.scale);
        let deduction = standard.max(itemized_total);
        let taxable_income = (agi - deduction).max(0.0);
        let ordinary_taxable = (taxable_income - gains).max(0.0);
        let taxable_gains = taxable_income - ordinary_taxable;

        let fica_wages = (self.wages - self.pre_tax_insurance - self.fica_exempt_wages).max(0.0);

        TaxBreakdown {
            federal: bracket_tax(ordinary_taxable, table.brackets, ctx.scale),
            state,
            fica: calculate_fica(fica_wages, ctx.status, ctx.scale).total(),
            capital_gains: long_term_gains_tax(ordinary_taxable, taxable_gains, ctx.status, ctx.scale),
            early_withdrawal_penalty: EARLY_WITHDRAWAL_PENALTY_RATE * self.early_withdrawals.max(0.0),
            pre_tax: self.pre_tax_retirement,
            insurance: self.pre_tax_insurance,
            adjusted_gross_income: agi,
            taxable_income,
            taxable_social_security: taxable_ss,
            deduction,
            itemized: itemized_total > standard,
            marginal_rate: marginal_rate(ordinary_taxable, table.brackets, ctx.scale),
        }
    }

    pub fn total_tax(&self, ctx: &TaxContext) -> f64 {
        self.assess(ctx).total_tax()
    }

    pub fn ordinary_taxable_income(&self, ctx: &TaxContext) -> f64 {
        let breakdown = self.assess(ctx);
        (breakdown.taxable_income - self.capital_gains.max(0.0)).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn ctx(status: FilingStatus, state: &str) -> TaxContext {
        TaxContext {
            status,
            state: state_tax_table(state).expect("known state"),
            scale: 1.0,
            salt_cap: SALT_CAP,
        }
    }

    #[test]
    fn single_brackets_apply_progressive_rates() {
        assert_approx(
            calculate_tax(50_000.0, FilingStatus::Single),
            1_160.0 + 35_550.0 * 0.12 + 2_850.0 * 0.22,
        );
        assert_approx(calculate_tax(11_600.0, FilingStatus::Single), 1_160.0);
        assert_approx(calculate_tax(0.0, FilingStatus::Single), 0.0);
        assert_approx(calculate_tax(-10.0, FilingStatus::Single), 0.0);
    }

    #[test]
    fn scaled_brackets_track_inflation() {
        let base = bracket_tax(60_000.0, &FEDERAL_BRACKETS_SINGLE, 1.0);
        let scaled = bracket_tax(120_000.0, &FEDERAL_BRACKETS_SINGLE, 2.0);
        assert_approx(scaled, base * 2.0);
    }

    #[test]
    fn progressive_tax_prefers_larger_deduction_and_caps_salt() {
        let itemized = ItemizedDeductions {
            state_and_local_taxes: 25_000.0,
            mortgage_interest: 8_000.0,
            charitable: 1_000.0,
            medical: 0.0,
        };
        let result = calculate_progressive_tax(
            120_000.0,
            20_000.0,
            &FEDERAL_BRACKETS_SINGLE,
            14_600.0,
            Some(&itemized),
            SALT_CAP,
        );
        assert_approx(result.adjusted_gross_income, 100_000.0);
        assert_approx(result.deduction, 19_000.0);
        assert!(result.itemized);
        assert_approx(result.taxable_income, 81_000.0);
        assert_approx(result.marginal_rate, 0.22);
        assert_approx(result.bracket_headroom, 100_525.0 - 81_000.0);

        let standard = calculate_progressive_tax(
            50_000.0,
            0.0,
            &FEDERAL_BRACKETS_SINGLE,
            14_600.0,
            None,
            SALT_CAP,
        );
        assert!(!standard.itemized);
        assert_approx(standard.taxable_income, 35_400.0);
    }

    #[test]
    fn headroom_is_infinite_in_top_bracket() {
        assert!(bracket_headroom(1_000_000.0, &FEDERAL_BRACKETS_SINGLE, 1.0).is_infinite());
        assert_approx(bracket_headroom(0.0, &FEDERAL_BRACKETS_SINGLE, 1.0), 11_600.0);
        assert_eq!(bracket_ceiling(&FEDERAL_BRACKETS_SINGLE, 0.22, 1.0), Some(100_525.0));
        assert_eq!(bracket_ceiling(&FEDERAL_BRACKETS_SINGLE, 0.12, 2.0), Some(94_300.0));
        assert_eq!(bracket_ceiling(&FEDERAL_BRACKETS_SINGLE, 0.37, 1.0), Some(f64::INFINITY));
        assert_eq!(bracket_ceiling(&FEDERAL_BRACKETS_SINGLE, 0.5, 1.0), None);
    }

    #[test]
    fn fica_caps_social_security_at_wage_base() {
        let low = calculate_fica(100_000.0, FilingStatus::Single, 1.0);
        assert_approx(low.social_security, 6_200.0);
        assert_approx(low.medicare, 1_450.0);
        assert_approx(low.additional_medicare, 0.0);

        let high = calculate_fica(300_000.0, FilingStatus::Single, 1.0);
        assert_approx(high.social_security, SOCIAL_SECURITY_WAGE_BASE * 0.062);
        assert_approx(high.medicare, 4_350.0);
        assert_approx(high.additional_medicare, 900.0);
    }

    #[test]
    fn social_security_taxation_has_two_tiers() {
        // Provisional 10,000 + 10,000 = 20,000 below the single base.
        assert_approx(taxable_social_security(20_000.0, 10_000.0, FilingStatus::Single), 0.0);
        // Provisional 30,000: half of the excess over 25,000.
        assert_approx(taxable_social_security(20_000.0, 20_000.0, FilingStatus::Single), 2_500.0);
        // Provisional 60,000: 85% tier, capped at 85% of benefits.
        assert_approx(
            taxable_social_security(20_000.0, 50_000.0, FilingStatus::Single),
            17_000.0,
        );
        // Provisional 40,000: 0.85 * 6,000 + 4,500.
        assert_approx(
            taxable_social_security(20_000.0, 30_000.0, FilingStatus::Single),
            9_600.0,
        );
    }

    #[test]
    fn long_term_gains_fill_zero_band_first() {
        assert_approx(long_term_gains_tax(30_000.0, 10_000.0, FilingStatus::Single, 1.0), 0.0);
        assert_approx(
            long_term_gains_tax(40_000.0, 10_000.0, FilingStatus::Single, 1.0),
            (50_000.0 - 47_025.0) * 0.15,
        );
        assert_approx(
            long_term_gains_tax(600_000.0, 10_000.0, FilingStatus::Single, 1.0),
            2_000.0,
        );
    }

    #[test]
    fn state_lookup_covers_none_flat_and_bracketed() {
        assert_eq!(state_tax_table("tx").map(|s| s.kind), Some(StateTaxKind::None));
        assert_eq!(state_tax_table("IL").map(|s| s.kind), Some(StateTaxKind::Flat(0.0495)));
        assert!(matches!(
            state_tax_table("CA").map(|s| s.kind),
            Some(StateTaxKind::Brackets(_))
        ));
        assert!(state_tax_table("ZZ").is_none());
        assert!(resolve_state("ZZ").is_err());

        let il = state_tax_table("IL").expect("IL");
        assert_approx(il.tax(100_000.0, FilingStatus::Single, 1.0), 4_950.0);
    }

    #[test]
    fn tax_year_assessment_combines_all_components() {
        let year = TaxYear {
            wages: 100_000.0,
            pre_tax_retirement: 10_000.0,
            pre_tax_insurance: 2_000.0,
            ..TaxYear::default()
        };
        let c = ctx(FilingStatus::Single, "TX");
        let b = year.assess(&c);
        assert_approx(b.adjusted_gross_income, 88_000.0);
        assert_approx(b.taxable_income, 88_000.0 - 14_600.0);
        assert_approx(b.federal, calculate_tax(73_400.0, FilingStatus::Single));
        assert_approx(b.state, 0.0);
        assert_approx(b.fica, 98_000.0 * (0.062 + 0.0145));
        assert_approx(b.pre_tax, 10_000.0);
        assert_approx(b.insurance, 2_000.0);
        assert_approx(b.total_tax(), b.federal + b.fica);
    }

    #[test]
    fn fica_exempt_wages_skip_payroll_tax() {
        let year = TaxYear {
            wages: 50_000.0,
            fica_exempt_wages: 50_000.0,
            ..TaxYear::default()
        };
        let b = year.assess(&ctx(FilingStatus::Single, "TX"));
        assert_approx(b.fica, 0.0);
        assert!(b.federal > 0.0);
    }

    #[test]
    fn early_withdrawals_carry_ten_percent_penalty() {
        let year = TaxYear {
            ordinary_income: 20_000.0,
            early_withdrawals: 20_000.0,
            ..TaxYear::default()
        };
        let b = year.assess(&ctx(FilingStatus::Single, "TX"));
        assert_approx(b.early_withdrawal_penalty, 2_000.0);
    }

    #[test]
    fn itemizing_uses_capped_state_tax_and_property_tax() {
        let year = TaxYear {
            wages: 300_000.0,
            property_tax: 12_000.0,
            mortgage_interest: 15_000.0,
            ..TaxYear::default()
        };
        let b = year.assess(&ctx(FilingStatus::Single, "CA"));
        assert!(b.itemized);
        assert_approx(b.deduction, 25_000.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(128))]

        #[test]
        fn prop_tax_is_monotone_and_effective_rate_bounded(
            income in 0u32..2_000_000,
            delta in 0u32..100_000,
            joint in proptest::bool::ANY,
        ) {
            let status = if joint { FilingStatus::MarriedFilingJointly } else { FilingStatus::Single };
            let lo = income as f64;
            let hi = lo + delta as f64;
            let tax_lo = calculate_tax(lo, status);
            let tax_hi = calculate_tax(hi, status);
            prop_assert!(tax_hi + 1e-9 >= tax_lo);
            if hi > 0.0 {
                prop_assert!(tax_hi / hi <= 0.37 + 1e-12);
            }
        }

        #[test]
        fn prop_taxable_social_security_within_85_percent(
            benefits in 0u32..80_000,
            other in 0u32..300_000,
        ) {
            let taxable = taxable_social_security(benefits as f64, other as f64, FilingStatus::MarriedFilingJointly);
            prop_assert!(taxable >= 0.0);
            prop_assert!(taxable <= 0.85 * benefits as f64 + 1e-9);
        }
    }
}

use serde::{Deserialize, Serialize};

const FIRST_AWI_YEAR: i32 = 1951;

const AVERAGE_WAGE_INDEX: [f64; 73] = [
    2_799.16, 2_973.32, 3_139.44, 3_155.64, 3_301.44, 3_532.36, 3_641.72, 3_673.80, 3_855.80,
    4_007.12, 4_086.76, 4_291.40, 4_396.64, 4_576.32, 4_658.72, 4_938.36, 5_213.44, 5_571.76,
    5_893.76, 6_186.24, 6_497.08, 7_133.80, 7_580.16, 8_030.76, 8_630.92, 9_226.48, 9_779.44,
    10_556.03, 11_479.46, 12_513.46, 13_773.10, 14_531.34, 15_239.24, 16_135.07, 16_822.51,
    17_321.82, 18_426.51, 19_334.04, 20_099.55, 21_027.98, 21_811.60, 22_935.42, 23_132.67,
    23_753.53, 24_705.66, 25_913.90, 27_426.00, 28_861.44, 30_469.84, 32_154.82, 32_921.92,
    33_252.09, 34_064.95, 35_648.55, 36_952.94, 38_651.41, 40_405.48, 41_334.97, 40_711.61,
    41_673.83, 42_979.61, 44_321.67, 44_888.16, 46_481.52, 48_098.63, 48_642.15, 50_321.89,
    52_145.80, 54_099.99, 55_628.60, 60_575.07, 63_795.13, 66_621.80,
];

pub const PROJECTED_WAGE_GROWTH: f64 = 0.035;

const BEND_POINT_BASE_YEAR: i32 = 1977;
const FIRST_BEND_POINT_1979: f64 = 180.0;
const SECOND_BEND_POINT_1979: f64 = 1_085.0;
const COMPUTATION_YEARS: usize = 35;
const EARLIEST_CLAIM_MONTHS: u32 = 62 * 12;
const LATEST_CREDIT_MONTHS: u32 = 70 * 12;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsRecord {
    pub year: i32,
    pub earnings: f64,
}

pub fn wage_index(year: i32) -> f64 {
    let last_year = FIRST_AWI_YEAR + AVERAGE_WAGE_INDEX.len() as i32 - 1;
    if year <= FIRST_AWI_YEAR {
        return AVERAGE_WAGE_INDEX[0];
    }
    if year > last_year {
        let last = AVERAGE_WAGE_INDEX[AVERAGE_WAGE_INDEX.len() - 1];
        return last * (1.0 + PROJECTED_WAGE_GROWTH).powi(year - last_year);
    }
    AVERAGE_WAGE_INDEX[(year - FIRST_AWI_YEAR) as usize]
}

pub fn full_retirement_age_months(birth_year: i32) -> u32 {
    match birth_year {
        ..=1937 => 65 * 12,
        1938..=1942 => 65 * 12 + 2 * (birth_year - 1937) as u32,
        1943..=1954 => 66 * 12,
        1955..=1959 => 66 * 12 + 2 * (birth_year - 1954) as u32,
        _ => 67 * 12,
    }
}

pub fn delayed_credit_rate(birth_year: i32) -> f64 {
    match birth_year {
        ..=1934 => 0.055,
        1935..=1936 => 0.06,
        1937..=1938 => 0.065,
        1939..=1940 => 0.07,
        1941..=1942 => 0.075,
        _ => 0.08,
    }
}

pub fn calculate_aime(history: &[EarningsRecord], birth_year: i32) -> f64 {
    let indexing_year = birth_year + 60;
    let indexing_awi = wage_index(indexing_year);

    let mut indexed = history
        .iter()
        .map(|r| {
            let earnings = r.earnings.max(0.0);
            if r.year < indexing_year {
                earnings * indexing_awi / wage_index(r.year)
            } else {
                earnings
            }
        })
        .collect::<Vec<_>>();
    indexed.sort_by(|a, b| b.total_cmp(a));
    indexed.truncate(COMPUTATION_YEARS);

    // Missing years count as zero; the divisor is always 35 years of months.
    let total = indexed.iter().sum::<f64>();
    (total / (COMPUTATION_YEARS as f64 * 12.0)).floor()
}

pub fn bend_points(eligibility_year: i32) -> (f64, f64) {
    let ratio = wage_index(eligibility_year - 2) / wage_index(BEND_POINT_BASE_YEAR);
    (
        (FIRST_BEND_POINT_1979 * ratio).round(),
        (SECOND_BEND_POINT_1979 * ratio).round(),
    )
}

/// Primary Insurance Amount, rounded down to the dime.
pub fn calculate_pia(aime: f64, birth_year: i32) -> f64 {
    let (first, second) = bend_points(birth_year + 62);
    let aime = aime.max(0.0);
    let pia = 0.90 * aime.min(first)
        + 0.32 * (aime.min(second) - first).max(0.0)
        + 0.15 * (aime - second).max(0.0);
    (pia * 10.0 + 1e-6).floor() / 10.0
}

/// Benefit multiplier for claiming at `claim_age_months` relative to FRA.
/// Claims before 62 are treated as 62; credits stop accruing at 70.
pub fn claiming_adjustment(birth_year: i32, claim_age_months: u32) -> f64 {
    let fra = full_retirement_age_months(birth_year);
    let claim = claim_age_months.clamp(EARLIEST_CLAIM_MONTHS, LATEST_CREDIT_MONTHS);

    if claim < fra {
        let early = (fra - claim) as f64;
        let first = early.min(36.0);
        let beyond = (early - 36.0).max(0.0);
        1.0 - first * (5.0 / 9.0 / 100.0) - beyond * (5.0 / 12.0 / 100.0)
    } else {
        let late = (claim - fra) as f64;
        1.0 + late * delayed_credit_rate(birth_year) / 12.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialSecurityEstimate {
    pub aime: f64,
    pub pia: f64,
    pub first_bend_point: f64,
    pub second_bend_point: f64,
    pub full_retirement_age_months: u32,
    pub claim_age_months: u32,
    pub adjustment_factor: f64,
    pub monthly_benefit: f64,
    pub annual_benefit: f64,
}

pub fn benefit_from_pia(pia: f64, birth_year: i32, claim_age_months: u32) -> SocialSecurityEstimate {
    let (first, second) = bend_points(birth_year + 62);
    let adjustment = claiming_adjustment(birth_year, claim_age_months);
    let monthly = (pia.max(0.0) * adjustment + 1e-6).floor();
    SocialSecurityEstimate {
        aime: 0.0,
        pia,
        first_bend_point: first,
        second_bend_point: second,
        full_retirement_age_months: full_retirement_age_months(birth_year),
        claim_age_months,
        adjustment_factor: adjustment,
        monthly_benefit: monthly,
        annual_benefit: monthly * 12.0,
    }
}

pub fn estimate_benefit(
    history: &[EarningsRecord],
    birth_year: i32,
    claim_age_months: u32,
) -> SocialSecurityEstimate {
    let aime = calculate_aime(history, birth_year);
    let pia = calculate_pia(aime, birth_year);
    SocialSecurityEstimate {
        aime,
        ..benefit_from_pia(pia, birth_year, claim_age_months)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn wage_index_clamps_before_table_and_projects_after() {
        assert_approx(wage_index(1940), 2_799.16);
        assert_approx(wage_index(2022), 63_795.13);
        assert_approx(wage_index(2024), 66_621.80 * 1.035);
    }

    #[test]
    fn bend_points_match_published_2024_values() {
        assert_eq!(bend_points(2024), (1_174.0, 7_078.0));
    }

    #[test]
    fn full_retirement_age_steps_by_cohort() {
        assert_eq!(full_retirement_age_months(1937), 780);
        assert_eq!(full_retirement_age_months(1940), 786);
        assert_eq!(full_retirement_age_months(1950), 792);
        assert_eq!(full_retirement_age_months(1957), 798);
        assert_eq!(full_retirement_age_months(1960), 804);
        assert_eq!(full_retirement_age_months(1985), 804);
    }

    #[test]
    fn aime_zero_fills_short_careers() {
        // Ten years of post-indexing earnings are not re-indexed.
        let history = (0..10)
            .map(|i| EarningsRecord {
                year: 2030 + i,
                earnings: 42_000.0,
            })
            .collect::<Vec<_>>();
        let aime = calculate_aime(&history, 1965);
        assert_approx(aime, (420_000.0_f64 / 420.0).floor());
    }

    #[test]
    fn aime_keeps_top_35_indexed_years() {
        let mut history = (0..40)
            .map(|i| EarningsRecord {
                year: 2030 + i,
                earnings: 10_000.0,
            })
            .collect::<Vec<_>>();
        history[0].earnings = 0.0;
        history[1].earnings = 0.0;
        let aime = calculate_aime(&history, 1960);
        assert_approx(aime, (35.0_f64 * 10_000.0 / 420.0).floor());
    }

    #[test]
    fn earlier_earnings_are_scaled_to_indexing_year() {
        let history = [EarningsRecord {
            year: 2000,
            earnings: 32_154.82,
        }];
        // Born 1962: indexing year 2022.
        let aime = calculate_aime(&history, 1962);
        assert_approx(aime, (63_795.13_f64 / 420.0).floor());
    }

    #[test]
    fn pia_uses_three_replacement_tiers() {
        // Eligibility 2024: bend points 1,174 and 7,078.
        let pia = calculate_pia(8_000.0, 1962);
        let expected = 0.9 * 1_174.0 + 0.32 * (7_078.0 - 1_174.0) + 0.15 * (8_000.0 - 7_078.0);
        assert_approx(pia, (expected * 10.0_f64).floor() / 10.0);
        assert_approx(calculate_pia(1_000.0, 1962), 900.0);
    }

    #[test]
    fn claiming_early_uses_graduated_reduction() {
        // FRA 67 for 1960+; claiming at 62 is 60 months early => 30% reduction.
        assert_approx(claiming_adjustment(1960, 62 * 12), 0.70);
        // 36 months early => 20% reduction.
        assert_approx(claiming_adjustment(1960, 64 * 12), 0.80);
        assert_approx(claiming_adjustment(1960, 67 * 12), 1.0);
    }

    #[test]
    fn delayed_credits_cap_at_seventy() {
        assert_approx(claiming_adjustment(1960, 70 * 12), 1.24);
        assert_approx(claiming_adjustment(1960, 72 * 12), 1.24);
        assert_approx(claiming_adjustment(1960, 55 * 12), 0.70);
    }

    #[test]
    fn estimate_applies_adjustment_to_pia() {
        let estimate = benefit_from_pia(2_000.0, 1960, 70 * 12);
        assert_approx(estimate.monthly_benefit, 2_480.0);
        assert_approx(estimate.annual_benefit, 29_760.0);
        assert_eq!(estimate.full_retirement_age_months, 804);
    }
}

use serde::Serialize;

const TABLE_FIRST_AGE: u32 = 72;

const UNIFORM_LIFETIME: [f64; 49] = [
    27.4, 26.5, 25.5, 24.6, 23.7, 22.9, 22.0, 21.1, 20.2, 19.4, 18.5, 17.7, 16.8, 16.0, 15.2, 14.4,
    13.7, 12.9, 12.2, 11.5, 10.8, 10.1, 9.5, 8.9, 8.4, 7.8, 7.3, 6.8, 6.4, 6.0, 5.6, 5.2, 4.9, 4.6,
    4.3, 4.1, 3.9, 3.7, 3.5, 3.4, 3.3, 3.1, 3.0, 2.9, 2.8, 2.7, 2.5, 2.3, 2.0,
];

pub const SHORTFALL_PENALTY_RATE: f64 = 0.25;
pub const CORRECTED_SHORTFALL_PENALTY_RATE: f64 = 0.10;

pub fn rmd_start_age(birth_year: i32) -> u32 {
    match birth_year {
        ..=1950 => 72,
        1951..=1959 => 73,
        _ => 75,
    }
}

/// Distribution period for `age`, clamped to the table's edges.
pub fn get_distribution_period(age: u32) -> f64 {
    let last = TABLE_FIRST_AGE + UNIFORM_LIFETIME.len() as u32 - 1;
    let idx = age.clamp(TABLE_FIRST_AGE, last) - TABLE_FIRST_AGE;
    UNIFORM_LIFETIME[idx as usize]
}

pub fn calculate_rmd(prior_year_end_balance: f64, age: u32) -> f64 {
    if prior_year_end_balance <= 0.0 {
        return 0.0;
    }
    prior_year_end_balance / get_distribution_period(age)
}

pub fn required_distribution(prior_year_end_balance: f64, age: u32, birth_year: i32) -> f64 {
    if age < rmd_start_age(birth_year) {
        return 0.0;
    }
    calculate_rmd(prior_year_end_balance, age)
}

pub fn shortfall_penalty(required: f64, withdrawn: f64, corrected: bool) -> f64 {
    let shortfall = (required - withdrawn).max(0.0);
    let rate = if corrected {
        CORRECTED_SHORTFALL_PENALTY_RATE
    } else {
        SHORTFALL_PENALTY_RATE
    };
    shortfall * rate
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RmdDistribution {
    pub account_id: String,
    pub prior_year_balance: f64,
    pub required: f64,
    pub withdrawn: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RmdRecord {
    pub age: u32,
    pub distribution_period: f64,
    pub required: f64,
    pub withdrawn: f64,
    pub accounts: Vec<RmdDistribution>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-2;

    #[test]
    fn distribution_period_matches_table_and_clamps() {
        assert_eq!(get_distribution_period(72), 27.4);
        assert_eq!(get_distribution_period(100), 6.4);
        assert_eq!(get_distribution_period(120), 2.0);
        assert_eq!(get_distribution_period(60), 27.4);
        assert_eq!(get_distribution_period(130), 2.0);
    }

    #[test]
    fn rmd_divides_balance_by_period() {
        assert!((calculate_rmd(500_000.0, 73) - 18_867.92).abs() < EPS);
        assert_eq!(calculate_rmd(0.0, 80), 0.0);
        assert_eq!(calculate_rmd(-10.0, 80), 0.0);
    }

    #[test]
    fn start_age_follows_birth_cohort() {
        assert_eq!(rmd_start_age(1950), 72);
        assert_eq!(rmd_start_age(1955), 73);
        assert_eq!(rmd_start_age(1960), 75);
        assert_eq!(required_distribution(500_000.0, 74, 1960), 0.0);
        assert!(required_distribution(500_000.0, 75, 1960) > 0.0);
    }

    #[test]
    fn penalty_is_reduced_when_corrected() {
        assert!((shortfall_penalty(10_000.0, 6_000.0, false) - 1_000.0).abs() < EPS);
        assert!((shortfall_penalty(10_000.0, 6_000.0, true) - 400.0).abs() < EPS);
        assert_eq!(shortfall_penalty(10_000.0, 12_000.0, false), 0.0);
    }
}

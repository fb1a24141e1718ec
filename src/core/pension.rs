use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PensionSystem {
    #[serde(alias = "FERS")]
    Fers,
    #[serde(alias = "CSRS")]
    Csrs,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetirementKind {
    Unreduced,
    Reduced,
    NotEligible,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PensionEligibility {
    pub eligible: bool,
    pub kind: RetirementKind,
    pub reduction_percent: f64,
    pub minimum_retirement_age_months: u32,
}

impl PensionEligibility {
    fn not_eligible(mra: u32) -> Self {
        Self {
            eligible: false,
            kind: RetirementKind::NotEligible,
            reduction_percent: 0.0,
            minimum_retirement_age_months: mra,
        }
    }

    fn unreduced(mra: u32) -> Self {
        Self {
            eligible: true,
            kind: RetirementKind::Unreduced,
            reduction_percent: 0.0,
            minimum_retirement_age_months: mra,
        }
    }

    fn reduced(mra: u32, reduction_percent: f64) -> Self {
        Self {
            eligible: true,
            kind: if reduction_percent > 0.0 {
                RetirementKind::Reduced
            } else {
                RetirementKind::Unreduced
            },
            reduction_percent,
            minimum_retirement_age_months: mra,
        }
    }

    pub fn reduction_factor(&self) -> f64 {
        1.0 - self.reduction_percent / 100.0
    }
}

pub fn minimum_retirement_age_months(birth_year: i32) -> u32 {
    match birth_year {
        ..=1947 => 55 * 12,
        1948..=1952 => 55 * 12 + 2 * (birth_year - 1947) as u32,
        1953..=1964 => 56 * 12,
        1965..=1969 => 56 * 12 + 2 * (birth_year - 1964) as u32,
        _ => 57 * 12,
    }
}

pub fn check_fers_eligibility(age: u32, years_of_service: f64, birth_year: i32) -> PensionEligibility {
    let mra = minimum_retirement_age_months(birth_year);
    let at_mra = age * 12 >= mra;

    if (age >= 62 && years_of_service >= 5.0)
        || (age >= 60 && years_of_service >= 20.0)
        || (at_mra && years_of_service >= 30.0)
    {
        return PensionEligibility::unreduced(mra);
    }

    if at_mra && years_of_service >= 10.0 {
        let years_under_62 = 62_u32.saturating_sub(age) as f64;
        let reduction = (5.0 * years_under_62).min(25.0);
        return PensionEligibility::reduced(mra, reduction);
    }

    PensionEligibility::not_eligible(mra)
}

pub fn check_csrs_eligibility(age: u32, years_of_service: f64) -> PensionEligibility {
    let mra = 55 * 12;
    if (age >= 62 && years_of_service >= 5.0)
        || (age >= 60 && years_of_service >= 20.0)
        || (age >= 55 && years_of_service >= 30.0)
    {
        return PensionEligibility::unreduced(mra);
    }

    if (age >= 50 && years_of_service >= 20.0) || years_of_service >= 25.0 {
        let years_under_55 = 55_u32.saturating_sub(age) as f64;
        let reduction = (2.0 * years_under_55).min(10.0);
        return PensionEligibility::reduced(mra, reduction);
    }

    PensionEligibility::not_eligible(mra)
}

pub fn calculate_fers_basic_benefit(years_of_service: f64, high3: f64, claim_age: u32) -> f64 {
    let multiplier = if claim_age >= 62 && years_of_service >= 20.0 {
        0.011
    } else {
        0.010
    };
    years_of_service.max(0.0) * high3.max(0.0) * multiplier
}

pub fn calculate_fers_supplement(
    years_of_service: f64,
    ss_monthly_at_62: f64,
    age: u32,
) -> f64 {
    if age >= 62 {
        return 0.0;
    }
    (years_of_service.max(0.0) / 40.0) * ss_monthly_at_62.max(0.0) * 12.0
}

/// FERS cost-of-living adjustment for a retiree of `age` given `cpi` (fraction).
pub fn fers_cola(cpi: f64, age: u32) -> f64 {
    if age < 62 {
        return 0.0;
    }
    if cpi <= 0.02 {
        cpi.max(0.0)
    } else if cpi <= 0.03 {
        0.02
    } else {
        cpi - 0.01
    }
}

pub fn calculate_csrs_basic_benefit(years_of_service: f64, high3: f64) -> f64 {
    let years = years_of_service.max(0.0);
    let high3 = high3.max(0.0);
    let first = years.min(5.0);
    let second = (years - 5.0).clamp(0.0, 5.0);
    let rest = (years - 10.0).max(0.0);
    let graduated = high3 * (0.015 * first + 0.0175 * second + 0.02 * rest);
    graduated.min(0.80 * high3)
}

pub fn csrs_cola(cpi: f64) -> f64 {
    cpi.max(0.0)
}

pub fn high3_from_history(salaries: &[f64]) -> f64 {
    if salaries.is_empty() {
        return 0.0;
    }
    if salaries.len() < 3 {
        return salaries.iter().sum::<f64>() / salaries.len() as f64;
    }
    salaries
        .windows(3)
        .map(|w| w.iter().sum::<f64>() / 3.0)
        .fold(f64::NEG_INFINITY, f64::max)
}

pub fn project_high3(current_salary: f64, years_remaining: u32, growth_rate: f64) -> f64 {
    let growth = 1.0 + growth_rate;
    let final_salary = current_salary.max(0.0) * growth.powi(years_remaining as i32);
    (final_salary + final_salary / growth + final_salary / (growth * growth)) / 3.0
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PensionEstimate {
    pub system: PensionSystem,
    pub eligibility: PensionEligibility,
    pub basic_annual: f64,
    pub annual_benefit: f64,
    pub supplement_annual: f64,
}

pub fn estimate_fers(
    claim_age: u32,
    years_of_service: f64,
    birth_year: i32,
    high3: f64,
    ss_monthly_at_62: f64,
) -> PensionEstimate {
    let eligibility = check_fers_eligibility(claim_age, years_of_service, birth_year);
    if !eligibility.eligible {
        return PensionEstimate {
            system: PensionSystem::Fers,
            eligibility,
            basic_annual: 0.0,
            annual_benefit: 0.0,
            supplement_annual: 0.0,
        };
    }
    let basic = calculate_fers_basic_benefit(years_of_service, high3, claim_age);
    // The supplement only accompanies unreduced immediate retirements.
    let supplement = if eligibility.kind == RetirementKind::Unreduced {
        calculate_fers_supplement(years_of_service, ss_monthly_at_62, claim_age)
    } else {
        0.0
    };
    PensionEstimate {
        system: PensionSystem::Fers,
        eligibility,
        basic_annual: basic,
        annual_benefit: basic * eligibility.reduction_factor(),
        supplement_annual: supplement,
    }
}

pub fn estimate_csrs(claim_age: u32, years_of_service: f64, high3: f64) -> PensionEstimate {
    let eligibility = check_csrs_eligibility(claim_age, years_of_service);
    let basic = if eligibility.eligible {
        calculate_csrs_basic_benefit(years_of_service, high3)
    } else {
        0.0
    };
    PensionEstimate {
        system: PensionSystem::Csrs,
        eligibility,
        basic_annual: basic,
        annual_benefit: basic * eligibility.reduction_factor(),
        supplement_annual: 0.0,
    }
}

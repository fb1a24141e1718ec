use serde::Serialize;

use super::tax::FilingStatus;
use super::types::TaxShelter;

const BASE_YEAR: i32 = 2024;

const ELECTIVE_DEFERRAL: f64 = 23_000.0;
const ELECTIVE_CATCH_UP: f64 = 7_500.0;
const IRA: f64 = 7_000.0;
const IRA_CATCH_UP: f64 = 1_000.0;
const HSA_SELF_ONLY: f64 = 4_150.0;
const HSA_FAMILY: f64 = 8_300.0;
const HSA_CATCH_UP: f64 = 1_000.0;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionLimits {
    pub elective_deferral: f64,
    pub ira: f64,
    pub hsa: f64,
}

fn index(base: f64, factor: f64, increment: f64) -> f64 {
    ((base * factor) / increment).floor() * increment
}

pub fn contribution_limits(
    year: i32,
    age: u32,
    status: FilingStatus,
    inflation: f64,
) -> ContributionLimits {
    let factor = (1.0 + inflation).powi((year - BASE_YEAR).max(0));

    let mut elective = index(ELECTIVE_DEFERRAL, factor, 500.0);
    let mut ira = index(IRA, factor, 500.0);
    let hsa_base = match status {
        FilingStatus::Single => HSA_SELF_ONLY,
        FilingStatus::MarriedFilingJointly => HSA_FAMILY,
    };
    let mut hsa = index(hsa_base, factor, 50.0);

    if age >= 50 {
        elective += index(ELECTIVE_CATCH_UP, factor, 500.0);
        ira += IRA_CATCH_UP;
    }
    if age >= 55 {
        hsa += HSA_CATCH_UP;
    }

    ContributionLimits {
        elective_deferral: elective,
        ira,
        hsa,
    }
}

#[derive(Copy, Clone, Debug)]
pub struct LimitTracker {
    elective_remaining: f64,
    ira_remaining: f64,
    hsa_remaining: f64,
}

impl LimitTracker {
    pub fn new(limits: ContributionLimits) -> Self {
        Self {
            elective_remaining: limits.elective_deferral,
            ira_remaining: limits.ira,
            hsa_remaining: limits.hsa,
        }
    }

    pub fn room(&self, shelter: TaxShelter) -> f64 {
        match shelter {
            TaxShelter::Taxable => f64::INFINITY,
            TaxShelter::Traditional401k | TaxShelter::Roth401k => self.elective_remaining,
            TaxShelter::TraditionalIra | TaxShelter::RothIra => self.ira_remaining,
            TaxShelter::Hsa => self.hsa_remaining,
        }
    }

    pub fn take(&mut self, shelter: TaxShelter, amount: f64) -> f64 {
        let allowed = amount.max(0.0).min(self.room(shelter));
        let slot = match shelter {
            TaxShelter::Taxable => return allowed,
            TaxShelter::Traditional401k | TaxShelter::Roth401k => &mut self.elective_remaining,
            TaxShelter::TraditionalIra | TaxShelter::RothIra => &mut self.ira_remaining,
            TaxShelter::Hsa => &mut self.hsa_remaining,
        };
        *slot -= allowed;
        allowed
    }
}

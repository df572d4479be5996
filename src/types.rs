use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::LoanError;

/// unique identifier for a group (junta)
pub type GroupId = Uuid;

/// unique identifier for a group member
pub type MemberId = Uuid;

/// unique identifier for a loan
pub type LoanId = Uuid;

/// unique identifier for a loan payment
pub type PaymentId = Uuid;

/// repayment model of a loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepaymentModel {
    /// equal installments, interest on the remaining balance
    Fixed,
    /// equal principal portions, interest on the remaining balance
    Declining,
    /// simple interest, everything paid in one lump at maturity
    Maturity,
    /// caller supplies the payment for each period
    Variable,
}

impl RepaymentModel {
    pub fn tag(&self) -> &'static str {
        match self {
            RepaymentModel::Fixed => "FIXED",
            RepaymentModel::Declining => "DECLINING",
            RepaymentModel::Maturity => "MATURITY",
            RepaymentModel::Variable => "VARIABLE",
        }
    }
}

impl fmt::Display for RepaymentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for RepaymentModel {
    type Err = LoanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIXED" | "CUOTA_FIJA" => Ok(RepaymentModel::Fixed),
            "DECLINING" | "CUOTA_REBATIR" => Ok(RepaymentModel::Declining),
            "MATURITY" | "CUOTA_VENCIMIENTO" => Ok(RepaymentModel::Maturity),
            "VARIABLE" | "CUOTA_VARIABLE" => Ok(RepaymentModel::Variable),
            _ => Err(LoanError::UnknownModel { tag: s.to_string() }),
        }
    }
}

/// loan status; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    /// issued, nothing repaid yet
    Pending,
    /// some but not all of the principal repaid
    Partial,
    /// fully repaid
    Paid,
}

impl LoanStatus {
    /// status implied by a remaining balance after at least one payment
    pub fn after_payment(remaining_is_zero: bool) -> Self {
        if remaining_is_zero {
            LoanStatus::Paid
        } else {
            LoanStatus::Partial
        }
    }

    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        matches!(
            (self, next),
            (LoanStatus::Pending, LoanStatus::Partial)
                | (LoanStatus::Pending, LoanStatus::Paid)
                | (LoanStatus::Partial, LoanStatus::Partial)
                | (LoanStatus::Partial, LoanStatus::Paid)
        )
    }
}

/// how often installments fall due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentFrequency {
    #[default]
    Monthly,
    Biweekly,
    Weekly,
}

impl PaymentFrequency {
    /// days between two consecutive due dates
    pub fn interval_days(&self) -> i64 {
        match self {
            PaymentFrequency::Monthly => 30,
            PaymentFrequency::Biweekly => 15,
            PaymentFrequency::Weekly => 7,
        }
    }
}

impl FromStr for PaymentFrequency {
    type Err = LoanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MONTHLY" | "MENSUAL" => Ok(PaymentFrequency::Monthly),
            "BIWEEKLY" | "QUINCENAL" => Ok(PaymentFrequency::Biweekly),
            "WEEKLY" | "SEMANAL" => Ok(PaymentFrequency::Weekly),
            _ => Err(LoanError::UnknownModel { tag: s.to_string() }),
        }
    }
}

/// collateral or guarantor backing a loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuaranteeType {
    /// another member vouches for the borrower
    Guarantor,
    RealEstate,
    Mortgage,
    Pledge,
}

impl FromStr for GuaranteeType {
    type Err = LoanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GUARANTOR" | "AVAL" => Ok(GuaranteeType::Guarantor),
            "REAL_ESTATE" | "INMUEBLE" => Ok(GuaranteeType::RealEstate),
            "MORTGAGE" | "HIPOTECARIA" => Ok(GuaranteeType::Mortgage),
            "PLEDGE" | "PRENDARIA" => Ok(GuaranteeType::Pledge),
            _ => Err(LoanError::UnknownModel { tag: s.to_string() }),
        }
    }
}

/// guarantee attached to a loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guarantee {
    pub guarantee_type: GuaranteeType,
    pub guarantor: Option<MemberId>,
    pub detail: Option<String>,
}

impl Guarantee {
    pub fn guarantor(member: MemberId) -> Self {
        Self {
            guarantee_type: GuaranteeType::Guarantor,
            guarantor: Some(member),
            detail: None,
        }
    }

    pub fn collateral(guarantee_type: GuaranteeType, detail: impl Into<String>) -> Self {
        Self {
            guarantee_type,
            guarantor: None,
            detail: Some(detail.into()),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// kind of event recorded in the capital ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementType {
    Contribution,
    Fine,
    Loan,
    Payment,
}

/// direction of a ledger entry relative to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Increase,
    Decrease,
}

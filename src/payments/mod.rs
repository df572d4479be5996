pub mod amortization;
pub mod schedule;

use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::LoanId;

pub use amortization::{AmortizationCalculator, AmortizationRow, LoanCalculation, ModelTerms, MAX_INSTALLMENTS};
pub use schedule::{Installment, InstallmentPlan};

/// payment request against one loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub loan_id: LoanId,
    pub amount: Money,
    /// link to a record migrated from the previous system
    pub legacy_reference: Option<String>,
}

impl PaymentRequest {
    pub fn new(loan_id: LoanId, amount: Money) -> Self {
        Self {
            loan_id,
            amount,
            legacy_reference: None,
        }
    }

    pub fn with_legacy_reference(mut self, reference: impl Into<String>) -> Self {
        self.legacy_reference = Some(reference.into());
        self
    }
}

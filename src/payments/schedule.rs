use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::payments::amortization::LoanCalculation;
use crate::types::PaymentFrequency;

/// dated installment derived from an amortization row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub installment_number: u32,
    pub due_date: DateTime<Utc>,
    pub expected_amount: Money,
    pub principal: Money,
    pub interest: Money,
    /// scheduled principal still owed after this installment
    pub remaining_balance: Money,
}

/// dated installment plan for a loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub start_date: DateTime<Utc>,
    pub frequency: PaymentFrequency,
    pub installments: Vec<Installment>,
}

impl InstallmentPlan {
    /// lay the calculator rows out on the calendar.
    ///
    /// Each row falls due `interval * period` days after `start_date`, so the
    /// single maturity row lands at the end of the full term.
    pub fn build(
        calculation: &LoanCalculation,
        start_date: DateTime<Utc>,
        frequency: PaymentFrequency,
    ) -> Self {
        let interval = frequency.interval_days();

        let installments = calculation
            .rows
            .iter()
            .enumerate()
            .map(|(idx, row)| Installment {
                installment_number: idx as u32 + 1,
                due_date: start_date + Duration::days(interval * row.period as i64),
                expected_amount: row.payment,
                principal: row.principal_portion,
                interest: row.interest_portion,
                remaining_balance: row.ending_balance,
            })
            .collect();

        Self {
            start_date,
            frequency,
            installments,
        }
    }

    pub fn len(&self) -> usize {
        self.installments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installments.is_empty()
    }

    /// installments whose due date is on or before `now`
    pub fn due_by(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Installment> {
        self.installments.iter().filter(move |i| i.due_date <= now)
    }

    /// principal that should have been repaid by `now`
    pub fn principal_due_by(&self, now: DateTime<Utc>) -> Money {
        self.due_by(now).map(|i| i.principal).sum()
    }

    /// number of installments whose principal is fully covered by `paid`
    pub fn installments_covered(&self, paid: Money) -> u32 {
        let mut cumulative = Money::ZERO;
        let mut covered = 0;
        for installment in &self.installments {
            cumulative += installment.principal;
            if cumulative > paid {
                break;
            }
            covered += 1;
        }
        covered
    }

    pub fn final_due_date(&self) -> Option<DateTime<Utc>> {
        self.installments.last().map(|i| i.due_date)
    }
}

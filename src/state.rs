use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::snapshot::IssuanceSnapshot;
use crate::types::{
    GroupId, Guarantee, LoanId, LoanStatus, MemberId, PaymentFrequency, PaymentId, RepaymentModel,
};

/// running capital balances of one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPool {
    pub group_id: GroupId,
    pub total_capital: Money,
    pub base_capital: Money,
    pub available_capital: Money,
}

/// signed change to the three pool figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolDelta {
    pub total: Money,
    pub base: Money,
    pub available: Money,
}

impl PoolDelta {
    pub fn available_only(amount: Money) -> Self {
        Self {
            available: amount,
            ..Self::default()
        }
    }

    /// the same amount on all three figures
    pub fn all(amount: Money) -> Self {
        Self {
            total: amount,
            base: amount,
            available: amount,
        }
    }

    pub fn negate(&self) -> Self {
        Self {
            total: -self.total,
            base: -self.base,
            available: -self.available,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total.is_zero() && self.base.is_zero() && self.available.is_zero()
    }
}

impl std::ops::Add for PoolDelta {
    type Output = PoolDelta;

    fn add(self, other: PoolDelta) -> PoolDelta {
        PoolDelta {
            total: self.total + other.total,
            base: self.base + other.base,
            available: self.available + other.available,
        }
    }
}

impl GroupPool {
    /// a new group starts empty; capital arrives through the ledger
    pub fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            total_capital: Money::ZERO,
            base_capital: Money::ZERO,
            available_capital: Money::ZERO,
        }
    }

    /// pool after `delta`, rejecting any result that breaks the pool invariants
    pub fn applied(&self, delta: PoolDelta) -> Result<GroupPool> {
        let next = GroupPool {
            group_id: self.group_id,
            total_capital: self.total_capital + delta.total,
            base_capital: self.base_capital + delta.base,
            available_capital: self.available_capital + delta.available,
        };

        if next.available_capital.is_negative() {
            return Err(LoanError::InsufficientCapital {
                available: self.available_capital,
                requested: (-delta.available).max(Money::ZERO),
            });
        }
        next.check_invariants()?;
        Ok(next)
    }

    pub fn check_invariants(&self) -> Result<()> {
        if self.total_capital.is_negative() || self.base_capital.is_negative() {
            return Err(LoanError::PoolInvariant {
                message: format!(
                    "negative capital: total {}, base {}",
                    self.total_capital, self.base_capital
                ),
            });
        }
        if self.available_capital > self.total_capital {
            return Err(LoanError::PoolInvariant {
                message: format!(
                    "available {} exceeds total {}",
                    self.available_capital, self.total_capital
                ),
            });
        }
        Ok(())
    }

    /// capital currently out on loan
    pub fn lent_out(&self) -> Money {
        self.total_capital - self.available_capital
    }
}

/// one issued loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    // identification
    pub id: LoanId,
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub loan_number: u32,
    pub loan_code: String,

    // terms
    pub principal: Money,
    pub periodic_rate: Rate,
    pub installments: u32,
    pub model: RepaymentModel,
    pub frequency: PaymentFrequency,
    pub guarantee: Guarantee,
    pub reason: String,

    // repayment state
    pub status: LoanStatus,
    pub remaining_balance: Money,
    pub remaining_installments: u32,

    // audit
    pub snapshot: IssuanceSnapshot,
    pub issued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// principal repaid so far
    pub fn total_repaid(&self) -> Money {
        self.principal - self.remaining_balance
    }

    pub fn is_paid(&self) -> bool {
        self.status == LoanStatus::Paid
    }

    fn open_installments(&self) -> u32 {
        if self.remaining_balance.is_zero() {
            return 0;
        }
        let plan = self.snapshot.plan();
        let covered = plan.installments_covered(self.total_repaid());
        (plan.len() as u32).saturating_sub(covered).max(1)
    }

    /// apply a repayment and move the status forward
    pub fn apply_payment(&mut self, amount: Money, precision: u32, now: DateTime<Utc>) -> Result<LoanStatus> {
        let remaining = (self.remaining_balance - amount).round_dp(precision);
        if remaining.is_negative() {
            return Err(LoanError::PaymentExceedsBalance {
                amount,
                remaining: self.remaining_balance,
            });
        }

        let next = LoanStatus::after_payment(remaining.is_zero());
        if !self.status.can_transition_to(next) {
            return Err(LoanError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        self.remaining_balance = remaining;
        self.status = next;
        self.remaining_installments = self.open_installments();
        self.updated_at = now;
        Ok(next)
    }

    /// undo a repayment as part of deleting a payment.
    ///
    /// This is a correction, not a status transition: the status is derived
    /// again from the restored balance.
    pub fn restore_payment(&mut self, amount: Money, precision: u32, now: DateTime<Utc>) -> Result<LoanStatus> {
        let remaining = (self.remaining_balance + amount).round_dp(precision);
        if remaining > self.principal {
            return Err(LoanError::PoolInvariant {
                message: format!(
                    "restored balance {} exceeds principal {} on {}",
                    remaining, self.principal, self.loan_code
                ),
            });
        }

        self.remaining_balance = remaining;
        self.status = if remaining == self.principal {
            LoanStatus::Pending
        } else {
            LoanStatus::Partial
        };
        self.remaining_installments = self.open_installments();
        self.updated_at = now;
        Ok(self.status)
    }

    /// remaining balance in range and status agrees with it
    pub fn check_invariants(&self) -> Result<()> {
        if self.remaining_balance.is_negative() || self.remaining_balance > self.principal {
            return Err(LoanError::PoolInvariant {
                message: format!(
                    "remaining balance {} outside [0, {}] on {}",
                    self.remaining_balance, self.principal, self.loan_code
                ),
            });
        }
        if self.is_paid() != self.remaining_balance.is_zero() {
            return Err(LoanError::PoolInvariant {
                message: format!(
                    "status {:?} disagrees with remaining balance {} on {}",
                    self.status, self.remaining_balance, self.loan_code
                ),
            });
        }
        Ok(())
    }
}

/// one repayment against a loan; immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub loan_id: LoanId,
    pub group_id: GroupId,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
    pub legacy_reference: Option<String>,
}

/// loan together with its payments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub loan: Loan,
    pub payments: Vec<Payment>,
}

impl LoanRecord {
    pub fn total_paid(&self) -> Money {
        self.payments.iter().map(|p| p.amount).sum()
    }

    /// remaining balance derived from the payment history
    pub fn replayed_remaining(&self) -> Money {
        self.loan.principal - self.total_paid()
    }

    pub fn is_consistent(&self) -> bool {
        self.replayed_remaining() == self.loan.remaining_balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::{AmortizationCalculator, InstallmentPlan, ModelTerms};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn pool(total: i64, available: i64) -> GroupPool {
        GroupPool {
            group_id: Uuid::new_v4(),
            total_capital: Money::from_major(total),
            base_capital: Money::from_major(total),
            available_capital: Money::from_major(available),
        }
    }

    fn loan(principal: i64) -> Loan {
        let calculation = AmortizationCalculator::new()
            .calculate(Money::from_major(principal), Rate::from_decimal(dec!(0.01)), 3, &ModelTerms::Declining)
            .unwrap();
        let plan = InstallmentPlan::build(&calculation, now(), PaymentFrequency::Monthly);
        let before = pool(principal, principal);
        let after = pool(principal, 0);
        Loan {
            id: Uuid::new_v4(),
            group_id: before.group_id,
            member_id: Uuid::new_v4(),
            loan_number: 1,
            loan_code: "LN-DECLINING-0001".to_string(),
            principal: Money::from_major(principal),
            periodic_rate: Rate::from_decimal(dec!(0.01)),
            installments: 3,
            model: RepaymentModel::Declining,
            frequency: PaymentFrequency::Monthly,
            guarantee: Guarantee::guarantor(Uuid::new_v4()),
            reason: "seed capital".to_string(),
            status: LoanStatus::Pending,
            remaining_balance: Money::from_major(principal),
            remaining_installments: 3,
            snapshot: IssuanceSnapshot::capture(now(), &before, &after, calculation, plan),
            issued_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn test_pool_applied() {
        let p = pool(1_000, 1_000);
        let next = p.applied(PoolDelta::available_only(Money::from_major(-400))).unwrap();
        assert_eq!(next.available_capital, Money::from_major(600));
        assert_eq!(next.total_capital, Money::from_major(1_000));
        assert_eq!(next.lent_out(), Money::from_major(400));
    }

    #[test]
    fn test_pool_rejects_overdraw() {
        let p = pool(1_000, 150);
        let err = p.applied(PoolDelta::available_only(Money::from_major(-200))).unwrap_err();
        assert!(matches!(err, LoanError::InsufficientCapital { .. }));
    }

    #[test]
    fn test_pool_rejects_available_above_total() {
        let p = pool(1_000, 1_000);
        let err = p.applied(PoolDelta::available_only(Money::from_major(1))).unwrap_err();
        assert!(matches!(err, LoanError::PoolInvariant { .. }));
    }

    #[test]
    fn test_delta_negate() {
        let delta = PoolDelta::all(Money::from_major(25));
        assert!((delta + delta.negate()).is_zero());
    }

    #[test]
    fn test_partial_then_full_payment() {
        let mut l = loan(1_200);
        assert_eq!(l.apply_payment(Money::from_major(400), 2, now()).unwrap(), LoanStatus::Partial);
        assert_eq!(l.remaining_balance, Money::from_major(800));
        assert_eq!(l.remaining_installments, 2);

        assert_eq!(l.apply_payment(Money::from_major(800), 2, now()).unwrap(), LoanStatus::Paid);
        assert_eq!(l.remaining_balance, Money::ZERO);
        assert_eq!(l.remaining_installments, 0);
        assert!(l.check_invariants().is_ok());
    }

    #[test]
    fn test_payment_after_paid_is_rejected() {
        let mut l = loan(100);
        l.apply_payment(Money::from_major(100), 2, now()).unwrap();
        let err = l.apply_payment(Money::ZERO, 2, now()).unwrap_err();
        assert!(matches!(err, LoanError::InvalidTransition { .. }));
    }

    #[test]
    fn test_restore_payment() {
        let mut l = loan(1_200);
        l.apply_payment(Money::from_major(1_200), 2, now()).unwrap();
        assert_eq!(l.restore_payment(Money::from_major(200), 2, now()).unwrap(), LoanStatus::Partial);
        assert_eq!(l.restore_payment(Money::from_major(1_000), 2, now()).unwrap(), LoanStatus::Pending);
        assert_eq!(l.remaining_installments, 3);
        assert!(l.restore_payment(Money::CENT, 2, now()).is_err());
    }
}

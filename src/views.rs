//! read-side views and analytics over stored loans
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::state::LoanRecord;
use crate::types::{
    GroupId, GuaranteeType, LoanId, LoanStatus, MemberId, PaymentFrequency, PaymentId, RepaymentModel,
};

/// serializable view of a loan and its payments
#[derive(Debug, Serialize, Deserialize)]
pub struct LoanView {
    pub id: LoanId,
    pub loan_code: String,
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub status: LoanStatus,
    pub issued_at: DateTime<Utc>,
    pub terms: TermsView,
    pub balance: BalanceView,
    pub payments: Vec<PaymentLine>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TermsView {
    pub principal: Money,
    pub periodic_rate: Rate,
    pub installments: u32,
    pub model: RepaymentModel,
    pub frequency: PaymentFrequency,
    pub guarantee_type: GuaranteeType,
    pub guarantor: Option<MemberId>,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceView {
    pub remaining_balance: Money,
    pub total_paid: Money,
    pub remaining_installments: u32,
    pub monthly_payment: Option<Money>,
    pub scheduled_interest: Money,
    pub final_due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentLine {
    pub id: PaymentId,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
    pub legacy_reference: Option<String>,
}

impl LoanView {
    pub fn from_record(record: &LoanRecord, precision: u32) -> Self {
        let loan = &record.loan;
        let calculation = loan.snapshot.calculation();
        LoanView {
            id: loan.id,
            loan_code: loan.loan_code.clone(),
            group_id: loan.group_id,
            member_id: loan.member_id,
            status: loan.status,
            issued_at: loan.issued_at,
            terms: TermsView {
                principal: loan.principal,
                periodic_rate: loan.periodic_rate,
                installments: loan.installments,
                model: loan.model,
                frequency: loan.frequency,
                guarantee_type: loan.guarantee.guarantee_type,
                guarantor: loan.guarantee.guarantor,
                reason: loan.reason.clone(),
            },
            balance: BalanceView {
                remaining_balance: loan.remaining_balance,
                total_paid: record.total_paid(),
                remaining_installments: loan.remaining_installments,
                monthly_payment: calculation.monthly_payment.map(|p| p.round_dp(precision)),
                scheduled_interest: calculation.total_interest.round_dp(precision),
                final_due_date: loan.snapshot.plan().final_due_date(),
            },
            payments: record
                .payments
                .iter()
                .map(|p| PaymentLine {
                    id: p.id,
                    amount: p.amount,
                    paid_at: p.paid_at,
                    legacy_reference: p.legacy_reference.clone(),
                })
                .collect(),
        }
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// repayment progress of one loan at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanAnalytics {
    pub loan_id: LoanId,
    pub loan_code: String,
    pub status: LoanStatus,
    pub total_paid: Money,
    pub remaining_balance: Money,
    /// share of the principal repaid, 0..=100 with two decimals
    pub completion_percentage: Decimal,
    pub scheduled_interest: Money,
    pub installments_covered: u32,
    pub installments_due: u32,
    pub next_due_date: Option<DateTime<Utc>>,
    /// repaid principal is behind what the plan expects by now
    pub overdue: bool,
}

impl LoanAnalytics {
    pub fn from_record(record: &LoanRecord, now: DateTime<Utc>, precision: u32) -> Self {
        let loan = &record.loan;
        let plan = loan.snapshot.plan();
        let total_paid = record.total_paid();

        let completion_percentage = if loan.principal.is_zero() {
            Decimal::ZERO
        } else {
            (total_paid.as_decimal() / loan.principal.as_decimal() * dec!(100)).round_dp(2)
        };

        let covered = plan.installments_covered(total_paid);
        let next_due_date = if loan.is_paid() {
            None
        } else {
            plan.installments
                .iter()
                .find(|i| i.installment_number > covered)
                .map(|i| i.due_date)
        };
        let overdue = !loan.is_paid() && total_paid < plan.principal_due_by(now).round_dp(precision);

        LoanAnalytics {
            loan_id: loan.id,
            loan_code: loan.loan_code.clone(),
            status: loan.status,
            total_paid,
            remaining_balance: loan.remaining_balance,
            completion_percentage,
            scheduled_interest: loan.snapshot.calculation().total_interest.round_dp(precision),
            installments_covered: covered,
            installments_due: plan.due_by(now).count() as u32,
            next_due_date,
            overdue,
        }
    }
}

/// loan portfolio of one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLoanSummary {
    pub group_id: GroupId,
    pub loan_count: usize,
    pub active_loans: usize,
    pub paid_loans: usize,
    pub overdue_loans: usize,
    pub total_lent: Money,
    pub total_repaid: Money,
    pub outstanding: Money,
    pub scheduled_interest: Money,
}

impl GroupLoanSummary {
    pub fn from_records(group_id: GroupId, records: &[LoanRecord], now: DateTime<Utc>, precision: u32) -> Self {
        let analytics: Vec<LoanAnalytics> = records
            .iter()
            .map(|r| LoanAnalytics::from_record(r, now, precision))
            .collect();

        GroupLoanSummary {
            group_id,
            loan_count: records.len(),
            active_loans: records.iter().filter(|r| !r.loan.is_paid()).count(),
            paid_loans: records.iter().filter(|r| r.loan.is_paid()).count(),
            overdue_loans: analytics.iter().filter(|a| a.overdue).count(),
            total_lent: records.iter().map(|r| r.loan.principal).sum(),
            total_repaid: analytics.iter().map(|a| a.total_paid).sum(),
            outstanding: records.iter().map(|r| r.loan.remaining_balance).sum(),
            scheduled_interest: analytics.iter().map(|a| a.scheduled_interest).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::{AmortizationCalculator, InstallmentPlan, ModelTerms};
    use crate::snapshot::IssuanceSnapshot;
    use crate::state::{GroupPool, Loan, Payment};
    use crate::types::Guarantee;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn record(paid: &[i64]) -> LoanRecord {
        let principal = Money::from_major(1_200);
        let rate = Rate::from_decimal(dec!(0.01));
        let calculation = AmortizationCalculator::new()
            .calculate(principal, rate, 3, &ModelTerms::Declining)
            .unwrap();
        let plan = InstallmentPlan::build(&calculation, start(), PaymentFrequency::Monthly);
        let pool = GroupPool::new(Uuid::new_v4());
        let total: Money = paid.iter().map(|p| Money::from_major(*p)).sum();
        let remaining = principal - total;

        let loan = Loan {
            id: Uuid::new_v4(),
            group_id: pool.group_id,
            member_id: Uuid::new_v4(),
            loan_number: 3,
            loan_code: "LN-DECLINING-0003".to_string(),
            principal,
            periodic_rate: rate,
            installments: 3,
            model: RepaymentModel::Declining,
            frequency: PaymentFrequency::Monthly,
            guarantee: Guarantee::guarantor(Uuid::new_v4()),
            reason: "stock".to_string(),
            status: if remaining.is_zero() {
                LoanStatus::Paid
            } else if total.is_zero() {
                LoanStatus::Pending
            } else {
                LoanStatus::Partial
            },
            remaining_balance: remaining,
            remaining_installments: 0,
            snapshot: IssuanceSnapshot::capture(start(), &pool, &pool, calculation, plan),
            issued_at: start(),
            updated_at: start(),
        };
        let payments = paid
            .iter()
            .map(|p| Payment {
                id: Uuid::new_v4(),
                loan_id: loan.id,
                group_id: loan.group_id,
                amount: Money::from_major(*p),
                paid_at: start(),
                legacy_reference: None,
            })
            .collect();
        LoanRecord { loan, payments }
    }

    #[test]
    fn test_analytics_on_schedule() {
        let analytics = LoanAnalytics::from_record(&record(&[400]), start() + Duration::days(45), 2);

        assert_eq!(analytics.completion_percentage, dec!(33.33));
        assert_eq!(analytics.installments_covered, 1);
        assert_eq!(analytics.installments_due, 1);
        assert_eq!(analytics.scheduled_interest, Money::from_major(24));
        assert_eq!(analytics.next_due_date, Some(start() + Duration::days(60)));
        assert!(!analytics.overdue);
    }

    #[test]
    fn test_analytics_overdue() {
        let analytics = LoanAnalytics::from_record(&record(&[300]), start() + Duration::days(61), 2);
        assert_eq!(analytics.installments_due, 2);
        assert!(analytics.overdue);

        let paid = LoanAnalytics::from_record(&record(&[1_200]), start() + Duration::days(400), 2);
        assert!(!paid.overdue);
        assert_eq!(paid.next_due_date, None);
        assert_eq!(paid.completion_percentage, dec!(100));
    }

    #[test]
    fn test_group_summary() {
        let records = vec![record(&[]), record(&[1_200]), record(&[100, 100])];
        let summary = GroupLoanSummary::from_records(Uuid::new_v4(), &records, start() + Duration::days(31), 2);

        assert_eq!(summary.loan_count, 3);
        assert_eq!(summary.active_loans, 2);
        assert_eq!(summary.paid_loans, 1);
        assert_eq!(summary.overdue_loans, 2);
        assert_eq!(summary.total_lent, Money::from_major(3_600));
        assert_eq!(summary.total_repaid, Money::from_major(1_400));
        assert_eq!(summary.outstanding, Money::from_major(2_200));
    }

    #[test]
    fn test_view_json() {
        let mut r = record(&[250]);
        r.payments[0].legacy_reference = Some("pago-0099".to_string());
        let json = LoanView::from_record(&r, 2).to_json_pretty().unwrap();

        assert!(json.contains("\"loan_code\": \"LN-DECLINING-0003\""));
        assert!(json.contains("pago-0099"));
        assert!(json.contains("\"remaining_balance\": \"950\""));
    }
}

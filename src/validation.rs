use crate::config::EngineConfig;
use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::processor::IssueLoanRequest;
use crate::state::{GroupPool, Loan};
use crate::types::{GuaranteeType, RepaymentModel};

/// pre-write checks for issuance and payment; never touches the store
#[derive(Debug, Clone, Copy)]
pub struct LoanValidator {
    money_precision: u32,
    max_installments: u32,
}

impl LoanValidator {
    pub fn new(money_precision: u32, max_installments: u32) -> Self {
        Self {
            money_precision,
            max_installments,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.money_precision, config.max_installments)
    }

    /// amount must be positive and representable in the group's currency
    pub fn validate_amount(&self, amount: Money) -> Result<()> {
        if !amount.is_positive() {
            return Err(LoanError::InvalidAmount { amount });
        }
        if !amount.fits_precision(self.money_precision) {
            return Err(LoanError::ExcessPrecision {
                amount,
                precision: self.money_precision,
            });
        }
        Ok(())
    }

    /// parameter checks for a new loan
    pub fn validate_issue(&self, request: &IssueLoanRequest) -> Result<()> {
        self.validate_amount(request.principal)?;

        if request.periodic_rate.is_negative() {
            return Err(LoanError::NegativeRate { rate: request.periodic_rate });
        }
        if request.installments == 0 {
            return Err(LoanError::ZeroInstallments);
        }
        if request.installments > self.max_installments {
            return Err(LoanError::TooManyInstallments {
                installments: request.installments,
                max: self.max_installments,
            });
        }

        if request.guarantee.guarantee_type == GuaranteeType::Guarantor {
            match request.guarantee.guarantor {
                None => return Err(LoanError::MissingGuarantor),
                Some(guarantor) if guarantor == request.member_id => {
                    return Err(LoanError::SelfGuarantee)
                }
                Some(_) => {}
            }
        }

        if request.model == RepaymentModel::Variable {
            let schedule = request.variable_schedule.as_deref().unwrap_or_default();
            if schedule.len() != request.installments as usize {
                return Err(LoanError::ScheduleLengthMismatch {
                    expected: request.installments,
                    provided: schedule.len(),
                });
            }
            if let Some((idx, amount)) = schedule.iter().enumerate().find(|(_, a)| a.is_negative()) {
                return Err(LoanError::NegativeScheduledPayment {
                    period: idx as u32 + 1,
                    amount: *amount,
                });
            }
        }

        Ok(())
    }

    /// principal against the live pool read inside the issuing transaction
    pub fn check_liquidity(&self, principal: Money, pool: &GroupPool) -> Result<()> {
        if principal > pool.available_capital {
            return Err(LoanError::InsufficientCapital {
                available: pool.available_capital,
                requested: principal,
            });
        }
        Ok(())
    }

    /// payment checks, in order: terminal status, amount, balance
    pub fn validate_payment(&self, amount: Money, loan: &Loan) -> Result<()> {
        if loan.is_paid() {
            return Err(LoanError::LoanAlreadyPaid {
                code: loan.loan_code.clone(),
            });
        }
        self.validate_amount(amount)?;
        if amount > loan.remaining_balance {
            return Err(LoanError::PaymentExceedsBalance {
                amount,
                remaining: loan.remaining_balance,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::errors::ErrorKind;
    use crate::types::Guarantee;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn request(model: RepaymentModel) -> IssueLoanRequest {
        IssueLoanRequest::builder()
            .group(Uuid::new_v4())
            .member(Uuid::new_v4())
            .principal(Money::from_major(1_000))
            .periodic_rate(Rate::from_decimal(dec!(0.02)))
            .installments(3)
            .model(model)
            .guarantee(Guarantee::collateral(GuaranteeType::Pledge, "motorcycle"))
            .reason("market stall")
            .build()
            .unwrap()
    }

    fn validator() -> LoanValidator {
        LoanValidator::from_config(&EngineConfig::default())
    }

    #[test]
    fn test_valid_request() {
        assert!(validator().validate_issue(&request(RepaymentModel::Fixed)).is_ok());
    }

    #[test]
    fn test_amount_rules() {
        let v = validator();
        assert!(matches!(v.validate_amount(Money::ZERO), Err(LoanError::InvalidAmount { .. })));
        assert!(matches!(v.validate_amount(Money::from_major(-5)), Err(LoanError::InvalidAmount { .. })));
        assert!(matches!(
            v.validate_amount(Money::from_str_exact("10.001").unwrap()),
            Err(LoanError::ExcessPrecision { .. })
        ));
        assert!(v.validate_amount(Money::CENT).is_ok());
    }

    #[test]
    fn test_rate_and_installments() {
        let mut r = request(RepaymentModel::Fixed);
        r.periodic_rate = Rate::from_decimal(dec!(-0.01));
        assert!(matches!(validator().validate_issue(&r), Err(LoanError::NegativeRate { .. })));

        let mut r = request(RepaymentModel::Fixed);
        r.periodic_rate = Rate::ZERO;
        assert!(validator().validate_issue(&r).is_ok());

        r.installments = 0;
        let err = validator().validate_issue(&r).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_installment_limit() {
        let mut r = request(RepaymentModel::Fixed);
        r.periodic_rate = Rate::ZERO;
        r.installments = 120;
        assert!(validator().validate_issue(&r).is_ok());

        r.installments = 121;
        assert!(matches!(
            validator().validate_issue(&r),
            Err(LoanError::TooManyInstallments { installments: 121, max: 120 })
        ));

        r.installments = u32::MAX;
        assert_eq!(validator().validate_issue(&r).unwrap_err().kind(), ErrorKind::InvalidParameter);
        assert!(LoanValidator::new(2, 24).validate_issue(&request(RepaymentModel::Declining)).is_ok());
    }

    #[test]
    fn test_guarantor_rules() {
        let mut r = request(RepaymentModel::Fixed);
        r.guarantee = Guarantee {
            guarantee_type: GuaranteeType::Guarantor,
            guarantor: None,
            detail: None,
        };
        assert!(matches!(validator().validate_issue(&r), Err(LoanError::MissingGuarantor)));

        r.guarantee = Guarantee::guarantor(r.member_id);
        assert!(matches!(validator().validate_issue(&r), Err(LoanError::SelfGuarantee)));

        r.guarantee = Guarantee::guarantor(Uuid::new_v4());
        assert!(validator().validate_issue(&r).is_ok());
    }

    #[test]
    fn test_variable_schedule_length() {
        let mut r = request(RepaymentModel::Variable);
        assert!(matches!(
            validator().validate_issue(&r),
            Err(LoanError::ScheduleLengthMismatch { expected: 3, provided: 0 })
        ));

        r.variable_schedule = Some(vec![Money::from_major(400); 3]);
        assert!(validator().validate_issue(&r).is_ok());

        r.variable_schedule = Some(vec![Money::from_major(400), Money::from_major(-1), Money::from_major(700)]);
        assert!(matches!(
            validator().validate_issue(&r),
            Err(LoanError::NegativeScheduledPayment { period: 2, .. })
        ));
    }

    #[test]
    fn test_liquidity_boundary() {
        let pool = GroupPool {
            group_id: Uuid::new_v4(),
            total_capital: Money::from_major(1_000),
            base_capital: Money::from_major(1_000),
            available_capital: Money::from_major(1_000),
        };
        let v = validator();
        assert!(v.check_liquidity(Money::from_major(1_000), &pool).is_ok());
        let err = v
            .check_liquidity(Money::from_major(1_000) + Money::CENT, &pool)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientCapital);
    }
}

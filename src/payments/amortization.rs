use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::types::RepaymentModel;

/// hard ceiling on schedule length; configs may only lower it
pub const MAX_INSTALLMENTS: u32 = 1_200;

/// model-specific terms handed to the calculator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTerms {
    Fixed,
    Declining,
    Maturity,
    /// one caller-supplied payment per period
    Variable { payments: Vec<Money> },
}

impl ModelTerms {
    /// build terms from a model tag and an optional payment vector.
    /// the vector is only kept for the variable model.
    pub fn from_model(model: RepaymentModel, variable_schedule: Option<&[Money]>) -> Self {
        match model {
            RepaymentModel::Fixed => ModelTerms::Fixed,
            RepaymentModel::Declining => ModelTerms::Declining,
            RepaymentModel::Maturity => ModelTerms::Maturity,
            RepaymentModel::Variable => ModelTerms::Variable {
                payments: variable_schedule.map(|s| s.to_vec()).unwrap_or_default(),
            },
        }
    }

    pub fn model(&self) -> RepaymentModel {
        match self {
            ModelTerms::Fixed => RepaymentModel::Fixed,
            ModelTerms::Declining => RepaymentModel::Declining,
            ModelTerms::Maturity => RepaymentModel::Maturity,
            ModelTerms::Variable { .. } => RepaymentModel::Variable,
        }
    }
}

/// one period of an amortization schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmortizationRow {
    pub period: u32,
    pub beginning_balance: Money,
    pub payment: Money,
    pub principal_portion: Money,
    pub interest_portion: Money,
    pub ending_balance: Money,
}

impl AmortizationRow {
    fn round_dp(&self, dp: u32) -> Self {
        Self {
            period: self.period,
            beginning_balance: self.beginning_balance.round_dp(dp),
            payment: self.payment.round_dp(dp),
            principal_portion: self.principal_portion.round_dp(dp),
            interest_portion: self.interest_portion.round_dp(dp),
            ending_balance: self.ending_balance.round_dp(dp),
        }
    }
}

/// calculator output: the schedule plus aggregate totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanCalculation {
    pub model: RepaymentModel,
    pub principal: Money,
    pub periodic_rate: Rate,
    pub installments: u32,
    /// constant installment, only for the fixed model
    pub monthly_payment: Option<Money>,
    pub total_interest: Money,
    pub total_payment: Money,
    pub rows: Vec<AmortizationRow>,
}

impl LoanCalculation {
    /// scheduled balance after the given period
    pub fn balance_after(&self, period: u32) -> Money {
        self.rows
            .iter()
            .filter(|r| r.period <= period)
            .last()
            .map(|r| r.ending_balance)
            .unwrap_or(self.principal)
    }

    pub fn total_principal(&self) -> Money {
        self.rows.iter().map(|r| r.principal_portion).sum()
    }

    /// copy rounded for presentation; the schedule itself is kept unrounded
    pub fn rounded(&self, dp: u32) -> Self {
        Self {
            model: self.model,
            principal: self.principal.round_dp(dp),
            periodic_rate: self.periodic_rate,
            installments: self.installments,
            monthly_payment: self.monthly_payment.map(|p| p.round_dp(dp)),
            total_interest: self.total_interest.round_dp(dp),
            total_payment: self.total_payment.round_dp(dp),
            rows: self.rows.iter().map(|r| r.round_dp(dp)).collect(),
        }
    }
}

/// amortization calculator; pure and stateless
#[derive(Debug, Clone, Copy, Default)]
pub struct AmortizationCalculator;

impl AmortizationCalculator {
    pub fn new() -> Self {
        Self
    }

    /// compute the schedule for any repayment model
    pub fn calculate(
        &self,
        principal: Money,
        periodic_rate: Rate,
        installments: u32,
        terms: &ModelTerms,
    ) -> Result<LoanCalculation> {
        if !principal.is_positive() {
            return Err(LoanError::InvalidAmount { amount: principal });
        }
        if periodic_rate.is_negative() {
            return Err(LoanError::NegativeRate { rate: periodic_rate });
        }
        if installments == 0 {
            return Err(LoanError::ZeroInstallments);
        }
        if installments > MAX_INSTALLMENTS {
            return Err(LoanError::TooManyInstallments {
                installments,
                max: MAX_INSTALLMENTS,
            });
        }

        tracing::debug!(model = %terms.model(), %principal, %periodic_rate, installments, "calculating schedule");

        let p = principal.as_decimal();
        let r = periodic_rate.as_decimal();

        let (rows, monthly_payment) = match terms {
            ModelTerms::Fixed => {
                let (rows, payment) = fixed_installment(p, r, installments)?;
                (rows, Some(payment))
            }
            ModelTerms::Declining => (declining_balance(p, r, installments)?, None),
            ModelTerms::Maturity => (interest_at_maturity(p, r, installments)?, None),
            ModelTerms::Variable { payments } => {
                (variable_schedule(p, r, installments, payments)?, None)
            }
        };

        let total_interest = Money::from_decimal(total(rows.iter().map(|row| row.interest), "total interest")?);
        let total_payment = Money::from_decimal(total(rows.iter().map(|row| row.payment), "total payment")?);

        Ok(LoanCalculation {
            model: terms.model(),
            principal,
            periodic_rate,
            installments,
            monthly_payment: monthly_payment.map(Money::from_decimal),
            total_interest,
            total_payment,
            rows: rows.into_iter().map(RawRow::into_row).collect(),
        })
    }
}

/// unrounded row used while walking the schedule
struct RawRow {
    period: u32,
    beginning: Decimal,
    payment: Decimal,
    principal: Decimal,
    interest: Decimal,
    ending: Decimal,
}

impl RawRow {
    fn into_row(self) -> AmortizationRow {
        AmortizationRow {
            period: self.period,
            beginning_balance: Money::from_decimal(self.beginning),
            payment: Money::from_decimal(self.payment),
            principal_portion: Money::from_decimal(self.principal),
            interest_portion: Money::from_decimal(self.interest),
            ending_balance: Money::from_decimal(self.ending),
        }
    }
}

fn overflow(what: &str) -> LoanError {
    LoanError::CalculationOverflow {
        message: format!("{what} out of range"),
    }
}

fn mul(a: Decimal, b: Decimal, what: &str) -> Result<Decimal> {
    a.checked_mul(b).ok_or_else(|| overflow(what))
}

fn add(a: Decimal, b: Decimal, what: &str) -> Result<Decimal> {
    a.checked_add(b).ok_or_else(|| overflow(what))
}

fn sub(a: Decimal, b: Decimal, what: &str) -> Result<Decimal> {
    a.checked_sub(b).ok_or_else(|| overflow(what))
}

fn total(values: impl Iterator<Item = Decimal>, what: &str) -> Result<Decimal> {
    values.fold(Ok(Decimal::ZERO), |acc, v| add(acc?, v, what))
}

/// (1 + r)^n
fn compound_factor(r: Decimal, n: u32) -> Result<Decimal> {
    let base = add(Decimal::ONE, r, "compound base")?;
    let mut factor = Decimal::ONE;
    for _ in 0..n {
        factor = factor.checked_mul(base).ok_or_else(|| LoanError::CalculationOverflow {
            message: format!("(1 + {r})^{n} is out of range"),
        })?;
    }
    Ok(factor)
}

/// payment = P * r * (1+r)^n / ((1+r)^n - 1), or P / n when r == 0
fn fixed_installment(p: Decimal, r: Decimal, n: u32) -> Result<(Vec<RawRow>, Decimal)> {
    let payment = if r.is_zero() {
        p / Decimal::from(n)
    } else {
        let factor = compound_factor(r, n)?;
        let numerator = mul(mul(p, r, "installment numerator")?, factor, "installment numerator")?;
        numerator
            .checked_div(factor - Decimal::ONE)
            .ok_or_else(|| overflow("installment"))?
    };

    let mut rows = Vec::with_capacity(n as usize);
    let mut balance = p;

    for period in 1..=n {
        let interest = mul(balance, r, "interest")?;
        // last period absorbs the residual so the schedule closes at zero
        let (principal, row_payment) = if period == n {
            (balance, add(balance, interest, "payment")?)
        } else {
            (sub(payment, interest, "principal portion")?, payment)
        };
        let ending = sub(balance, principal, "balance")?;

        rows.push(RawRow {
            period,
            beginning: balance,
            payment: row_payment,
            principal,
            interest,
            ending,
        });
        balance = ending;
    }

    Ok((rows, payment))
}

/// equal principal portions; interest on the current balance
fn declining_balance(p: Decimal, r: Decimal, n: u32) -> Result<Vec<RawRow>> {
    let principal_portion = p / Decimal::from(n);

    let mut rows = Vec::with_capacity(n as usize);
    let mut balance = p;

    for period in 1..=n {
        let interest = mul(balance, r, "interest")?;
        let principal = if period == n { balance } else { principal_portion };
        let ending = sub(balance, principal, "balance")?;

        rows.push(RawRow {
            period,
            beginning: balance,
            payment: add(principal, interest, "payment")?,
            principal,
            interest,
            ending,
        });
        balance = ending;
    }

    Ok(rows)
}

/// simple interest P * r * n, single lump sum at the end
fn interest_at_maturity(p: Decimal, r: Decimal, n: u32) -> Result<Vec<RawRow>> {
    let interest = mul(mul(p, r, "maturity interest")?, Decimal::from(n), "maturity interest")?;

    Ok(vec![RawRow {
        period: n,
        beginning: p,
        payment: add(p, interest, "maturity payment")?,
        principal: p,
        interest,
        ending: Decimal::ZERO,
    }])
}

/// caller-supplied payments; principal portion is whatever the interest leaves
fn variable_schedule(p: Decimal, r: Decimal, n: u32, payments: &[Money]) -> Result<Vec<RawRow>> {
    if payments.len() != n as usize {
        return Err(LoanError::ScheduleLengthMismatch {
            expected: n,
            provided: payments.len(),
        });
    }

    let mut rows = Vec::with_capacity(n as usize);
    let mut balance = p;

    for (idx, supplied) in payments.iter().enumerate() {
        let period = idx as u32 + 1;
        if supplied.is_negative() {
            return Err(LoanError::NegativeScheduledPayment { period, amount: *supplied });
        }

        let interest = mul(balance, r, "interest")?;
        let mut payment = supplied.as_decimal();
        let mut principal = sub(payment, interest, "principal portion")?;
        let mut ending = sub(balance, principal, "balance")?;

        // unpaid interest may accrue, but never past the amount lent
        if ending > p {
            return Err(LoanError::BalanceAbovePrincipal {
                period,
                balance: Money::from_decimal(ending),
            });
        }
        if ending < Decimal::ZERO {
            if period < n {
                return Err(LoanError::NegativeIntermediateBalance {
                    period,
                    balance: Money::from_decimal(ending),
                });
            }
            // final row closes at zero; the excess is not owed
            principal = balance;
            payment = add(balance, interest, "payment")?;
            ending = Decimal::ZERO;
        }

        rows.push(RawRow {
            period,
            beginning: balance,
            payment,
            principal,
            interest,
            ending,
        });
        balance = ending;
    }

    Ok(rows)
}

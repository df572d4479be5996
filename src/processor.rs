use std::sync::Arc;

use hourglass_rs::SafeTimeProvider;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{LoanError, Result};
use crate::ledger::CapitalLedger;
use crate::payments::{AmortizationCalculator, InstallmentPlan, LoanCalculation, ModelTerms, PaymentRequest};
use crate::snapshot::IssuanceSnapshot;
use crate::state::{Loan, LoanRecord, Payment};
use crate::store::{run_in_transaction, Store, UnitOfWork};
use crate::types::{
    GroupId, Guarantee, GuaranteeType, LoanId, LoanStatus, MemberId, PaymentFrequency, PaymentId,
    RepaymentModel,
};
use crate::validation::LoanValidator;
use crate::views::{GroupLoanSummary, LoanAnalytics, LoanView};

/// everything needed to issue one loan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueLoanRequest {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub principal: Money,
    pub periodic_rate: Rate,
    pub installments: u32,
    pub model: RepaymentModel,
    /// falls back to the configured default
    pub frequency: Option<PaymentFrequency>,
    pub guarantee: Guarantee,
    pub reason: String,
    /// one payment per period, variable model only
    pub variable_schedule: Option<Vec<Money>>,
}

impl IssueLoanRequest {
    pub fn builder() -> IssueLoanRequestBuilder {
        IssueLoanRequestBuilder::new()
    }
}

#[derive(Debug, Default)]
pub struct IssueLoanRequestBuilder {
    group_id: Option<GroupId>,
    member_id: Option<MemberId>,
    principal: Option<Money>,
    periodic_rate: Option<Rate>,
    installments: Option<u32>,
    model: Option<RepaymentModel>,
    model_tag: Option<String>,
    frequency: Option<PaymentFrequency>,
    guarantee: Option<Guarantee>,
    reason: Option<String>,
    variable_schedule: Option<Vec<Money>>,
}

impl IssueLoanRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn member(mut self, member_id: MemberId) -> Self {
        self.member_id = Some(member_id);
        self
    }

    pub fn principal(mut self, principal: Money) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn periodic_rate(mut self, rate: Rate) -> Self {
        self.periodic_rate = Some(rate);
        self
    }

    pub fn installments(mut self, installments: u32) -> Self {
        self.installments = Some(installments);
        self
    }

    pub fn model(mut self, model: RepaymentModel) -> Self {
        self.model = Some(model);
        self
    }

    /// model by tag, e.g. "FIXED" or "CUOTA_FIJA"; parsed at build time
    pub fn model_tag(mut self, tag: impl Into<String>) -> Self {
        self.model_tag = Some(tag.into());
        self
    }

    pub fn frequency(mut self, frequency: PaymentFrequency) -> Self {
        self.frequency = Some(frequency);
        self
    }

    pub fn guarantee(mut self, guarantee: Guarantee) -> Self {
        self.guarantee = Some(guarantee);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn variable_schedule(mut self, payments: Vec<Money>) -> Self {
        self.variable_schedule = Some(payments);
        self
    }

    pub fn build(self) -> Result<IssueLoanRequest> {
        let model = match (self.model, self.model_tag) {
            (Some(model), _) => model,
            (None, Some(tag)) => tag.parse()?,
            (None, None) => {
                return Err(LoanError::InvalidConfiguration {
                    message: "Repayment model required".to_string(),
                })
            }
        };

        Ok(IssueLoanRequest {
            group_id: self.group_id.ok_or(LoanError::InvalidConfiguration {
                message: "Group required".to_string(),
            })?,
            member_id: self.member_id.ok_or(LoanError::InvalidConfiguration {
                message: "Member required".to_string(),
            })?,
            principal: self.principal.ok_or(LoanError::InvalidConfiguration {
                message: "Principal required".to_string(),
            })?,
            periodic_rate: self.periodic_rate.ok_or(LoanError::InvalidConfiguration {
                message: "Rate required".to_string(),
            })?,
            installments: self.installments.ok_or(LoanError::InvalidConfiguration {
                message: "Installments required".to_string(),
            })?,
            model,
            frequency: self.frequency,
            guarantee: self.guarantee.ok_or(LoanError::InvalidConfiguration {
                message: "Guarantee required".to_string(),
            })?,
            reason: self.reason.unwrap_or_default(),
            variable_schedule: self.variable_schedule,
        })
    }
}

/// result of a successful issuance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedLoan {
    pub loan: Loan,
    /// schedule rounded to the money precision
    pub schedule: LoanCalculation,
}

/// result of a successful payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub status: LoanStatus,
    pub remaining_balance: Money,
}

/// loan issuance and repayment against a shared store.
///
/// Every mutating operation runs as one unit of work: loan or payment row,
/// ledger entry, pool update and status change land together or not at all.
pub struct LoanProcessor<S: Store> {
    store: Arc<S>,
    config: EngineConfig,
    calculator: AmortizationCalculator,
    validator: LoanValidator,
}

impl<S: Store> Clone for LoanProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            calculator: self.calculator,
            validator: self.validator,
        }
    }
}

impl<S: Store> LoanProcessor<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let validator = LoanValidator::from_config(&config);
        Ok(Self {
            store,
            config,
            calculator: AmortizationCalculator::new(),
            validator,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// issue a loan with system time
    pub fn issue_loan_now(&self, request: IssueLoanRequest) -> Result<IssuedLoan> {
        let time = SafeTimeProvider::new(hourglass_rs::TimeSource::System);
        self.issue_loan(request, &time)
    }

    /// issue a loan
    pub fn issue_loan(&self, request: IssueLoanRequest, time_provider: &SafeTimeProvider) -> Result<IssuedLoan> {
        let now = time_provider.now();
        self.validator.validate_issue(&request)?;

        // pure work happens before the unit of work opens
        let terms = ModelTerms::from_model(request.model, request.variable_schedule.as_deref());
        let calculation = self.calculator.calculate(
            request.principal,
            request.periodic_rate,
            request.installments,
            &terms,
        )?;
        let schedule = calculation.rounded(self.config.money_precision);
        let frequency = request.frequency.unwrap_or(self.config.default_frequency);
        let plan = InstallmentPlan::build(&schedule, now, frequency);
        let guarantee = normalize_guarantee(request.guarantee.clone());

        let loan = run_in_transaction(self.store.as_ref(), &self.config, "issue_loan", |uow| {
            let before = uow.group_pool(request.group_id)?;
            if let Err(err) = self.validator.check_liquidity(request.principal, &before) {
                warn!(
                    group_id = %request.group_id,
                    requested = %request.principal,
                    available = %before.available_capital,
                    "loan rejected for insufficient capital"
                );
                return Err(err);
            }

            let loan_number = uow.max_loan_number(request.group_id)? + 1;
            let loan_code = self.loan_code(request.model, loan_number);
            let loan_id = Uuid::new_v4();

            let after = CapitalLedger::new(&mut *uow, now).record_loan_issuance(
                request.group_id,
                loan_id,
                request.principal,
                format!("loan {} to member {}", loan_code, request.member_id),
            )?;

            let loan = Loan {
                id: loan_id,
                group_id: request.group_id,
                member_id: request.member_id,
                loan_number,
                loan_code,
                principal: request.principal,
                periodic_rate: request.periodic_rate,
                installments: request.installments,
                model: request.model,
                frequency,
                guarantee: guarantee.clone(),
                reason: request.reason.clone(),
                status: LoanStatus::Pending,
                remaining_balance: request.principal,
                remaining_installments: plan.len() as u32,
                snapshot: IssuanceSnapshot::capture(now, &before, &after, calculation.clone(), plan.clone()),
                issued_at: now,
                updated_at: now,
            };
            uow.insert_loan(loan.clone())?;
            Ok(loan)
        })?;

        info!(
            loan_id = %loan.id,
            loan_code = %loan.loan_code,
            group_id = %loan.group_id,
            principal = %loan.principal,
            model = %loan.model,
            "loan issued"
        );
        Ok(IssuedLoan { loan, schedule })
    }

    /// process a payment with system time
    pub fn process_payment_now(&self, request: PaymentRequest) -> Result<PaymentReceipt> {
        let time = SafeTimeProvider::new(hourglass_rs::TimeSource::System);
        self.process_payment(request, &time)
    }

    /// apply a repayment to the loan's remaining balance
    pub fn process_payment(&self, request: PaymentRequest, time_provider: &SafeTimeProvider) -> Result<PaymentReceipt> {
        let now = time_provider.now();
        let precision = self.config.money_precision;

        let receipt = run_in_transaction(self.store.as_ref(), &self.config, "process_payment", |uow| {
            let mut loan = load(uow, request.loan_id)?.loan;
            self.validator.validate_payment(request.amount, &loan)?;

            let payment = Payment {
                id: Uuid::new_v4(),
                loan_id: loan.id,
                group_id: loan.group_id,
                amount: request.amount,
                paid_at: now,
                legacy_reference: request.legacy_reference.clone(),
            };
            uow.insert_payment(payment.clone())?;

            CapitalLedger::new(&mut *uow, now).record_payment(
                loan.group_id,
                loan.id,
                payment.id,
                payment.amount,
                format!("payment on {}", loan.loan_code),
            )?;

            let status = loan.apply_payment(payment.amount, precision, now)?;
            loan.check_invariants()?;
            uow.update_loan(&loan)?;

            Ok(PaymentReceipt {
                payment,
                status,
                remaining_balance: loan.remaining_balance,
            })
        })?;

        info!(
            loan_id = %request.loan_id,
            payment_id = %receipt.payment.id,
            amount = %receipt.payment.amount,
            remaining = %receipt.remaining_balance,
            status = ?receipt.status,
            "payment applied"
        );
        Ok(receipt)
    }

    /// remove a payment and restore the loan balance it paid down
    pub fn delete_payment(&self, payment_id: PaymentId, time_provider: &SafeTimeProvider) -> Result<Loan> {
        let now = time_provider.now();
        let precision = self.config.money_precision;

        let loan = run_in_transaction(self.store.as_ref(), &self.config, "delete_payment", |uow| {
            let payment = uow
                .find_payment(payment_id)?
                .ok_or(LoanError::PaymentNotFound { id: payment_id })?;
            let mut loan = load(uow, payment.loan_id)?.loan;

            uow.delete_payment(payment_id)?;
            CapitalLedger::new(&mut *uow, now).reverse_payment(loan.group_id, loan.id, payment_id)?;

            loan.restore_payment(payment.amount, precision, now)?;
            loan.check_invariants()?;
            uow.update_loan(&loan)?;
            Ok(loan)
        })?;

        info!(%payment_id, loan_id = %loan.id, remaining = %loan.remaining_balance, "payment deleted");
        Ok(loan)
    }

    /// remove a loan that has no payments and return its principal to the pool
    pub fn delete_loan(&self, loan_id: LoanId, time_provider: &SafeTimeProvider) -> Result<Loan> {
        let now = time_provider.now();

        let loan = run_in_transaction(self.store.as_ref(), &self.config, "delete_loan", |uow| {
            let record = load(uow, loan_id)?;
            if !record.payments.is_empty() {
                return Err(LoanError::LoanHasPayments {
                    code: record.loan.loan_code,
                    count: record.payments.len(),
                });
            }

            CapitalLedger::new(&mut *uow, now).reverse_loan_issuance(record.loan.group_id, loan_id)?;
            uow.delete_loan(loan_id)
        })?;

        info!(%loan_id, loan_code = %loan.loan_code, principal = %loan.principal, "loan deleted");
        Ok(loan)
    }

    /// loan with its payments
    pub fn loan(&self, loan_id: LoanId) -> Result<LoanRecord> {
        run_in_transaction(self.store.as_ref(), &self.config, "load_loan", |uow| load(uow, loan_id))
    }

    pub fn loans(&self, group_id: GroupId) -> Result<Vec<LoanRecord>> {
        run_in_transaction(self.store.as_ref(), &self.config, "list_loans", |uow| {
            uow.loans_for_group(group_id)
        })
    }

    pub fn loan_view(&self, loan_id: LoanId) -> Result<LoanView> {
        Ok(LoanView::from_record(&self.loan(loan_id)?, self.config.money_precision))
    }

    pub fn loan_analytics(&self, loan_id: LoanId, time_provider: &SafeTimeProvider) -> Result<LoanAnalytics> {
        let record = self.loan(loan_id)?;
        Ok(LoanAnalytics::from_record(&record, time_provider.now(), self.config.money_precision))
    }

    pub fn group_summary(&self, group_id: GroupId, time_provider: &SafeTimeProvider) -> Result<GroupLoanSummary> {
        let records = self.loans(group_id)?;
        Ok(GroupLoanSummary::from_records(
            group_id,
            &records,
            time_provider.now(),
            self.config.money_precision,
        ))
    }

    fn loan_code(&self, model: RepaymentModel, number: u32) -> String {
        format!("{}-{}-{:04}", self.config.loan_code_prefix, model.tag(), number)
    }
}

fn load(uow: &dyn UnitOfWork, loan_id: LoanId) -> Result<LoanRecord> {
    uow.load_loan(loan_id)?
        .ok_or(LoanError::LoanNotFound { id: loan_id })
}

/// only a personal guarantee keeps a guarantor reference
fn normalize_guarantee(guarantee: Guarantee) -> Guarantee {
    match guarantee.guarantee_type {
        GuaranteeType::Guarantor => guarantee,
        _ => Guarantee {
            guarantor: None,
            ..guarantee
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capital::CapitalService;
    use crate::errors::ErrorKind;
    use crate::store::InMemoryStore;
    use chrono::{TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;

    fn time() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap()))
    }

    fn setup(capital: i64) -> (LoanProcessor<InMemoryStore>, GroupId) {
        let store = Arc::new(InMemoryStore::new());
        let config = EngineConfig::default();
        let capital_service = CapitalService::new(Arc::clone(&store), config.clone()).unwrap();
        let t = time();
        let group_id = capital_service.open_group(&t).unwrap().group_id;
        capital_service
            .contribute(group_id, Money::from_major(capital), "founding shares", &t)
            .unwrap();
        (LoanProcessor::new(store, config).unwrap(), group_id)
    }

    fn request(group_id: GroupId, principal: Money, model: RepaymentModel) -> IssueLoanRequest {
        IssueLoanRequest::builder()
            .group(group_id)
            .member(Uuid::new_v4())
            .principal(principal)
            .periodic_rate(Rate::from_decimal(dec!(0.02)))
            .installments(12)
            .model(model)
            .guarantee(Guarantee::guarantor(Uuid::new_v4()))
            .reason("sewing machine")
            .build()
            .unwrap()
    }

    #[test]
    fn test_issue_fixed_loan() {
        let (processor, group_id) = setup(5_000);
        let issued = processor
            .issue_loan(request(group_id, Money::from_major(1_000), RepaymentModel::Fixed), &time())
            .unwrap();

        assert_eq!(issued.loan.loan_code, "LN-FIXED-0001");
        assert_eq!(issued.loan.status, LoanStatus::Pending);
        assert_eq!(issued.loan.remaining_balance, Money::from_major(1_000));
        assert_eq!(issued.loan.remaining_installments, 12);
        assert_eq!(issued.schedule.monthly_payment, Some(Money::from_str_exact("94.56").unwrap()));
        assert_eq!(issued.loan.snapshot.pool_before().available_capital, Money::from_major(5_000));
        assert_eq!(issued.loan.snapshot.pool_after().available_capital, Money::from_major(4_000));
    }

    #[test]
    fn test_loan_numbers_are_sequential() {
        let (processor, group_id) = setup(5_000);
        let first = processor
            .issue_loan(request(group_id, Money::from_major(100), RepaymentModel::Fixed), &time())
            .unwrap();
        let second = processor
            .issue_loan(request(group_id, Money::from_major(100), RepaymentModel::Declining), &time())
            .unwrap();

        assert_eq!(first.loan.loan_number, 1);
        assert_eq!(second.loan.loan_number, 2);
        assert_eq!(second.loan.loan_code, "LN-DECLINING-0002");
    }

    #[test]
    fn test_model_tag_request() {
        let (processor, group_id) = setup(5_000);
        let req = IssueLoanRequest::builder()
            .group(group_id)
            .member(Uuid::new_v4())
            .principal(Money::from_major(600))
            .periodic_rate(Rate::from_percentage(dec!(1)))
            .installments(6)
            .model_tag("CUOTA_VENCIMIENTO")
            .guarantee(Guarantee::collateral(GuaranteeType::RealEstate, "lot 14").with_detail("deed 2291"))
            .build()
            .unwrap();

        let issued = processor.issue_loan(req, &time()).unwrap();
        assert_eq!(issued.loan.model, RepaymentModel::Maturity);
        assert_eq!(issued.schedule.total_payment, Money::from_major(636));
        assert_eq!(issued.loan.remaining_installments, 1);
    }

    #[test]
    fn test_unknown_group() {
        let (processor, _) = setup(100);
        let err = processor
            .issue_loan(request(Uuid::new_v4(), Money::from_major(50), RepaymentModel::Fixed), &time())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_payment_flow() {
        let (processor, group_id) = setup(2_000);
        let loan = processor
            .issue_loan(request(group_id, Money::from_major(1_000), RepaymentModel::Fixed), &time())
            .unwrap()
            .loan;

        let receipt = processor
            .process_payment(PaymentRequest::new(loan.id, Money::from_major(400)), &time())
            .unwrap();
        assert_eq!(receipt.status, LoanStatus::Partial);
        assert_eq!(receipt.remaining_balance, Money::from_major(600));

        let receipt = processor
            .process_payment(PaymentRequest::new(loan.id, Money::from_major(600)), &time())
            .unwrap();
        assert_eq!(receipt.status, LoanStatus::Paid);

        let record = processor.loan(loan.id).unwrap();
        assert_eq!(record.payments.len(), 2);
        assert_eq!(record.loan.remaining_installments, 0);
        assert!(record.is_consistent());

        let err = processor
            .process_payment(PaymentRequest::new(loan.id, Money::CENT), &time())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_failed_payment_writes_nothing() {
        let (processor, group_id) = setup(2_000);
        let loan = processor
            .issue_loan(request(group_id, Money::from_major(500), RepaymentModel::Fixed), &time())
            .unwrap()
            .loan;

        let err = processor
            .process_payment(PaymentRequest::new(loan.id, Money::from_major(501)), &time())
            .unwrap_err();
        assert!(matches!(err, LoanError::PaymentExceedsBalance { .. }));

        let record = processor.loan(loan.id).unwrap();
        assert!(record.payments.is_empty());
        assert_eq!(record.loan.remaining_balance, Money::from_major(500));
    }

    #[test]
    fn test_delete_payment_restores_balance() {
        let (processor, group_id) = setup(2_000);
        let loan = processor
            .issue_loan(request(group_id, Money::from_major(500), RepaymentModel::Fixed), &time())
            .unwrap()
            .loan;
        let receipt = processor
            .process_payment(PaymentRequest::new(loan.id, Money::from_major(500)), &time())
            .unwrap();

        let restored = processor.delete_payment(receipt.payment.id, &time()).unwrap();
        assert_eq!(restored.status, LoanStatus::Pending);
        assert_eq!(restored.remaining_balance, Money::from_major(500));
        assert_eq!(restored.remaining_installments, 12);
    }

    #[test]
    fn test_delete_loan_requires_no_payments() {
        let (processor, group_id) = setup(2_000);
        let loan = processor
            .issue_loan(request(group_id, Money::from_major(500), RepaymentModel::Fixed), &time())
            .unwrap()
            .loan;
        processor
            .process_payment(PaymentRequest::new(loan.id, Money::from_major(100)), &time())
            .unwrap();

        let err = processor.delete_loan(loan.id, &time()).unwrap_err();
        assert!(matches!(err, LoanError::LoanHasPayments { count: 1, .. }));
    }

    #[test]
    fn test_collateral_drops_guarantor() {
        let guarantee = Guarantee {
            guarantee_type: GuaranteeType::Pledge,
            guarantor: Some(Uuid::new_v4()),
            detail: Some("bicycle".to_string()),
        };
        let normalized = normalize_guarantee(guarantee);
        assert_eq!(normalized.guarantor, None);
        assert_eq!(normalized.detail.as_deref(), Some("bicycle"));
    }
}

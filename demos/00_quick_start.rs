/// quick start - open a group, lend from its pool, take a payment
use std::sync::Arc;

use junta_loans::{
    CapitalService, EngineConfig, Guarantee, InMemoryStore, IssueLoanRequest, LoanProcessor, Money,
    PaymentRequest, Rate, RepaymentModel, SafeTimeProvider, TimeSource, Uuid,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    let config = EngineConfig::default();
    let time = SafeTimeProvider::new(TimeSource::System);

    // a group with 5,000 in member shares
    let capital = CapitalService::new(Arc::clone(&store), config.clone())?;
    let group_id = capital.open_group(&time)?.group_id;
    capital.contribute(group_id, Money::from_major(5_000), "opening shares", &time)?;

    // lend 1,000 at 2% per month over 12 fixed installments
    let processor = LoanProcessor::new(store, config)?;
    let request = IssueLoanRequest::builder()
        .group(group_id)
        .member(Uuid::new_v4())
        .principal(Money::from_major(1_000))
        .periodic_rate(Rate::from_percentage(2.into()))
        .installments(12)
        .model(RepaymentModel::Fixed)
        .guarantee(Guarantee::guarantor(Uuid::new_v4()))
        .reason("sewing machine")
        .build()?;
    let issued = processor.issue_loan(request, &time)?;

    // first installment
    let installment = issued.schedule.monthly_payment.unwrap_or(Money::ZERO);
    processor.process_payment(PaymentRequest::new(issued.loan.id, installment), &time)?;

    println!("{}", processor.loan_view(issued.loan.id)?.to_json_pretty()?);

    Ok(())
}

/// group ledger - a few months of junta activity replayed against the pool
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use junta_loans::{
    CapitalService, EngineConfig, Guarantee, GuaranteeType, InMemoryStore, IssueLoanRequest,
    LoanProcessor, Money, PaymentFrequency, PaymentRequest, Rate, RepaymentModel, SafeTimeProvider,
    TimeSource, Uuid,
};
use rust_decimal_macros::dec;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== group ledger ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 6, 18, 0, 0).unwrap()
    ));
    let controller = time.test_control().unwrap();

    let store = Arc::new(InMemoryStore::new());
    let config = EngineConfig::from_json(r#"{"loan_code_prefix": "JUNTA", "transaction_timeout_ms": 2000}"#)?;
    let capital = CapitalService::new(Arc::clone(&store), config.clone())?;
    let processor = LoanProcessor::new(store, config)?;

    let group_id = capital.open_group(&time)?.group_id;
    for member in 1..=6 {
        capital.contribute(group_id, Money::from_major(250), &format!("shares, member {}", member), &time)?;
    }
    println!("pool after shares: {:?}\n", capital.pool(group_id)?);

    // declining-balance loan, paid biweekly, backed by a pledge
    let borrower = Uuid::new_v4();
    let declining = processor.issue_loan(
        IssueLoanRequest::builder()
            .group(group_id)
            .member(borrower)
            .principal(Money::from_major(900))
            .periodic_rate(Rate::from_decimal(dec!(0.015)))
            .installments(3)
            .model(RepaymentModel::Declining)
            .frequency(PaymentFrequency::Biweekly)
            .guarantee(Guarantee::collateral(GuaranteeType::Pledge, "motorcycle"))
            .reason("inventory")
            .build()?,
        &time,
    )?;
    println!("issued {}", declining.loan.loan_code);
    for row in &declining.schedule.rows {
        println!(
            "  period {}: pay {} (principal {}, interest {})",
            row.period, row.payment, row.principal_portion, row.interest_portion
        );
    }

    // interest-at-maturity loan, tag from the old system
    let maturity = processor.issue_loan(
        IssueLoanRequest::builder()
            .group(group_id)
            .member(Uuid::new_v4())
            .principal(Money::from_major(400))
            .periodic_rate(Rate::from_percentage(dec!(2)))
            .installments(4)
            .model_tag("CUOTA_VENCIMIENTO")
            .guarantee(Guarantee::guarantor(borrower))
            .build()?,
        &time,
    )?;
    println!("issued {} due {}\n", maturity.loan.loan_code, maturity.schedule.total_payment);

    // two weeks later: first installment and a fine
    controller.advance(Duration::days(15));
    let first = declining.schedule.rows[0].payment;
    processor.process_payment(PaymentRequest::new(declining.loan.id, first), &time)?;
    capital.fine(group_id, Money::from_major(10), "missed meeting", &time)?;

    // a month later the declining loan is behind
    controller.advance(Duration::days(20));
    let analytics = processor.loan_analytics(declining.loan.id, &time)?;
    println!(
        "{}: {}% repaid, overdue: {}",
        analytics.loan_code, analytics.completion_percentage, analytics.overdue
    );

    let summary = processor.group_summary(group_id, &time)?;
    println!("summary: {}", serde_json::to_string_pretty(&summary)?);

    let audit = capital.audit(group_id)?;
    println!(
        "\nledger: {} entries, replay consistent: {}",
        audit.entry_count, audit.consistent
    );

    Ok(())
}

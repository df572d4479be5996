pub mod capital;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod ledger;
pub mod payments;
pub mod processor;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod types;
pub mod validation;
pub mod views;

// re-export key types
pub use capital::{CapitalMovement, CapitalService, LedgerAudit};
pub use config::EngineConfig;
pub use decimal::{Money, Rate};
pub use errors::{ErrorKind, LoanError, Result};
pub use ledger::{CapitalLedger, EntryReference, LedgerEntry};
pub use payments::{
    AmortizationCalculator, AmortizationRow, Installment, InstallmentPlan, LoanCalculation,
    ModelTerms, PaymentRequest, MAX_INSTALLMENTS,
};
pub use processor::{IssueLoanRequest, IssueLoanRequestBuilder, IssuedLoan, LoanProcessor, PaymentReceipt};
pub use snapshot::{IssuanceSnapshot, PoolFigures};
pub use state::{GroupPool, Loan, LoanRecord, Payment, PoolDelta};
pub use store::{run_in_transaction, InMemoryStore, Store, UnitOfWork};
pub use types::{
    Direction, GroupId, Guarantee, GuaranteeType, LoanId, LoanStatus, MemberId, MovementType,
    PaymentFrequency, PaymentId, RepaymentModel,
};
pub use validation::LoanValidator;
pub use views::{GroupLoanSummary, LoanAnalytics, LoanView};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;

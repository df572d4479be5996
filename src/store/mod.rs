pub mod memory;

use std::time::Duration;

use tracing::warn;

use crate::config::EngineConfig;
use crate::errors::Result;
use crate::ledger::{EntryReference, LedgerEntry};
use crate::state::{GroupPool, Loan, LoanRecord, Payment, PoolDelta};
use crate::types::{GroupId, LoanId, PaymentId};

pub use memory::InMemoryStore;

/// one atomic unit of work against the datastore.
///
/// Nothing written through it is visible to anyone else until `commit`;
/// dropping it without committing rolls everything back.
pub trait UnitOfWork {
    /// current pool of a group, `GroupNotFound` if absent
    fn group_pool(&self, group_id: GroupId) -> Result<GroupPool>;

    fn insert_group(&mut self, pool: GroupPool) -> Result<()>;

    /// atomic increment/decrement of the three pool figures.
    ///
    /// Fails without writing if the result would break the pool invariants.
    fn adjust_pool(&mut self, group_id: GroupId, delta: PoolDelta) -> Result<GroupPool>;

    /// highest loan number used in the group, 0 if none
    fn max_loan_number(&self, group_id: GroupId) -> Result<u32>;

    /// `TransactionConflict` if the group already has a loan with this number
    fn insert_loan(&mut self, loan: Loan) -> Result<()>;

    fn load_loan(&self, loan_id: LoanId) -> Result<Option<LoanRecord>>;

    fn update_loan(&mut self, loan: &Loan) -> Result<()>;

    fn delete_loan(&mut self, loan_id: LoanId) -> Result<Loan>;

    fn loans_for_group(&self, group_id: GroupId) -> Result<Vec<LoanRecord>>;

    fn find_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>>;

    fn insert_payment(&mut self, payment: Payment) -> Result<()>;

    fn delete_payment(&mut self, payment_id: PaymentId) -> Result<Payment>;

    fn append_entry(&mut self, entry: LedgerEntry) -> Result<()>;

    /// remove and return every entry of the group caused by `reference`
    fn remove_entries_for(
        &mut self,
        group_id: GroupId,
        reference: &EntryReference,
    ) -> Result<Vec<LedgerEntry>>;

    /// entries of a group in recording order
    fn entries(&self, group_id: GroupId) -> Result<Vec<LedgerEntry>>;

    fn commit(self: Box<Self>) -> Result<()>;
}

/// transactional datastore shared by every request thread
pub trait Store: Send + Sync {
    /// start a unit of work; lock wait and commit are bounded by `timeout`
    fn begin(&self, timeout: Duration) -> Result<Box<dyn UnitOfWork + '_>>;
}

/// run `work` in its own unit of work and commit it.
///
/// A transaction failure is retried from scratch with the same inputs up to
/// `max_transaction_retries` times; any other error is returned as is.
pub fn run_in_transaction<S, T, F>(store: &S, config: &EngineConfig, operation: &str, mut work: F) -> Result<T>
where
    S: Store + ?Sized,
    F: FnMut(&mut dyn UnitOfWork) -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match attempt_once(store, config.transaction_timeout(), &mut work) {
            Err(err) if err.is_retryable() && attempt < config.max_transaction_retries => {
                attempt += 1;
                warn!(operation, attempt, error = %err, "transaction failed, retrying");
            }
            result => return result,
        }
    }
}

fn attempt_once<S, T, F>(store: &S, timeout: Duration, work: &mut F) -> Result<T>
where
    S: Store + ?Sized,
    F: FnMut(&mut dyn UnitOfWork) -> Result<T>,
{
    let mut uow = store.begin(timeout)?;
    let value = work(uow.as_mut())?;
    uow.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use crate::errors::{ErrorKind, LoanError};
    use uuid::Uuid;

    #[test]
    fn test_retry_once_then_succeed() {
        let store = InMemoryStore::new();
        let config = EngineConfig::default();
        let group_id = Uuid::new_v4();
        let mut calls = 0;

        let pool = run_in_transaction(&store, &config, "open", |uow| {
            calls += 1;
            uow.insert_group(GroupPool::new(group_id))?;
            if calls == 1 {
                return Err(LoanError::TransactionConflict {
                    message: "simulated".to_string(),
                });
            }
            uow.group_pool(group_id)
        })
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(pool.total_capital, Money::ZERO);
    }

    #[test]
    fn test_no_retry_for_business_errors() {
        let store = InMemoryStore::new();
        let mut calls = 0;

        let err = run_in_transaction(&store, &EngineConfig::default(), "lookup", |uow| {
            calls += 1;
            uow.group_pool(Uuid::new_v4())
        })
        .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_retries_exhausted() {
        let store = InMemoryStore::new();
        let mut calls = 0;

        let err = run_in_transaction(&store, &EngineConfig::default(), "flaky", |_| -> Result<()> {
            calls += 1;
            Err(LoanError::Storage {
                message: "disk".to_string(),
            })
        })
        .unwrap_err();

        assert_eq!(calls, 2);
        assert!(err.is_retryable());
    }
}

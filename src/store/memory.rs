use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::errors::{LoanError, Result};
use crate::ledger::{EntryReference, LedgerEntry};
use crate::state::{GroupPool, Loan, LoanRecord, Payment, PoolDelta};
use crate::store::{Store, UnitOfWork};
use crate::types::{GroupId, LoanId, PaymentId};

const LOCK_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Default)]
struct Tables {
    pools: HashMap<GroupId, GroupPool>,
    loans: HashMap<LoanId, Loan>,
    payments: Vec<Payment>,
    entries: Vec<LedgerEntry>,
}

impl Tables {
    fn require_group(&self, group_id: GroupId) -> Result<&GroupPool> {
        self.pools
            .get(&group_id)
            .ok_or(LoanError::GroupNotFound { id: group_id })
    }

    fn payments_of(&self, loan_id: LoanId) -> Vec<Payment> {
        self.payments
            .iter()
            .filter(|p| p.loan_id == loan_id)
            .cloned()
            .collect()
    }

    fn record(&self, loan: &Loan) -> LoanRecord {
        LoanRecord {
            loan: loan.clone(),
            payments: self.payments_of(loan.id),
        }
    }
}

/// in-process store with serializable isolation.
///
/// A unit of work holds the store lock from `begin` until it is committed or
/// dropped and writes to a private copy of the tables; commit swaps the copy
/// in.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    fn begin(&self, timeout: Duration) -> Result<Box<dyn UnitOfWork + '_>> {
        let started = Instant::now();
        let deadline = started + timeout;

        let guard = loop {
            match self.tables.try_lock() {
                Ok(guard) => break guard,
                // only commit writes through the guard, so the tables are whole
                Err(TryLockError::Poisoned(poisoned)) => break poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        debug!(?timeout, "lock wait timed out");
                        return Err(LoanError::TransactionTimeout {
                            elapsed: started.elapsed(),
                        });
                    }
                    thread::sleep(LOCK_POLL);
                }
            }
        };

        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            working,
            started,
            deadline,
        }))
    }
}

struct MemoryUnitOfWork<'a> {
    guard: MutexGuard<'a, Tables>,
    working: Tables,
    started: Instant,
    deadline: Instant,
}

impl MemoryUnitOfWork<'_> {
    fn check_deadline(&self) -> Result<()> {
        if Instant::now() > self.deadline {
            return Err(LoanError::TransactionTimeout {
                elapsed: self.started.elapsed(),
            });
        }
        Ok(())
    }

    fn tables(&self) -> Result<&Tables> {
        self.check_deadline()?;
        Ok(&self.working)
    }

    fn tables_mut(&mut self) -> Result<&mut Tables> {
        self.check_deadline()?;
        Ok(&mut self.working)
    }
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn group_pool(&self, group_id: GroupId) -> Result<GroupPool> {
        self.tables()?.require_group(group_id).cloned()
    }

    fn insert_group(&mut self, pool: GroupPool) -> Result<()> {
        let tables = self.tables_mut()?;
        if tables.pools.contains_key(&pool.group_id) {
            return Err(LoanError::GroupExists { id: pool.group_id });
        }
        pool.check_invariants()?;
        tables.pools.insert(pool.group_id, pool);
        Ok(())
    }

    fn adjust_pool(&mut self, group_id: GroupId, delta: PoolDelta) -> Result<GroupPool> {
        let tables = self.tables_mut()?;
        let pool = tables
            .pools
            .get_mut(&group_id)
            .ok_or(LoanError::GroupNotFound { id: group_id })?;
        let next = pool.applied(delta)?;
        *pool = next.clone();
        Ok(next)
    }

    fn max_loan_number(&self, group_id: GroupId) -> Result<u32> {
        let tables = self.tables()?;
        tables.require_group(group_id)?;
        Ok(tables
            .loans
            .values()
            .filter(|l| l.group_id == group_id)
            .map(|l| l.loan_number)
            .max()
            .unwrap_or(0))
    }

    fn insert_loan(&mut self, loan: Loan) -> Result<()> {
        let tables = self.tables_mut()?;
        tables.require_group(loan.group_id)?;
        let taken = tables
            .loans
            .values()
            .any(|l| l.group_id == loan.group_id && l.loan_number == loan.loan_number);
        if taken || tables.loans.contains_key(&loan.id) {
            return Err(LoanError::TransactionConflict {
                message: format!("loan number {} already used in group {}", loan.loan_number, loan.group_id),
            });
        }
        tables.loans.insert(loan.id, loan);
        Ok(())
    }

    fn load_loan(&self, loan_id: LoanId) -> Result<Option<LoanRecord>> {
        let tables = self.tables()?;
        Ok(tables.loans.get(&loan_id).map(|loan| tables.record(loan)))
    }

    fn update_loan(&mut self, loan: &Loan) -> Result<()> {
        let tables = self.tables_mut()?;
        let stored = tables
            .loans
            .get_mut(&loan.id)
            .ok_or(LoanError::LoanNotFound { id: loan.id })?;
        *stored = loan.clone();
        Ok(())
    }

    fn delete_loan(&mut self, loan_id: LoanId) -> Result<Loan> {
        let tables = self.tables_mut()?;
        let loan = tables
            .loans
            .remove(&loan_id)
            .ok_or(LoanError::LoanNotFound { id: loan_id })?;
        tables.payments.retain(|p| p.loan_id != loan_id);
        Ok(loan)
    }

    fn loans_for_group(&self, group_id: GroupId) -> Result<Vec<LoanRecord>> {
        let tables = self.tables()?;
        tables.require_group(group_id)?;
        let mut records: Vec<LoanRecord> = tables
            .loans
            .values()
            .filter(|l| l.group_id == group_id)
            .map(|l| tables.record(l))
            .collect();
        records.sort_by_key(|r| r.loan.loan_number);
        Ok(records)
    }

    fn find_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>> {
        Ok(self
            .tables()?
            .payments
            .iter()
            .find(|p| p.id == payment_id)
            .cloned())
    }

    fn insert_payment(&mut self, payment: Payment) -> Result<()> {
        let tables = self.tables_mut()?;
        if !tables.loans.contains_key(&payment.loan_id) {
            return Err(LoanError::LoanNotFound { id: payment.loan_id });
        }
        tables.payments.push(payment);
        Ok(())
    }

    fn delete_payment(&mut self, payment_id: PaymentId) -> Result<Payment> {
        let tables = self.tables_mut()?;
        let idx = tables
            .payments
            .iter()
            .position(|p| p.id == payment_id)
            .ok_or(LoanError::PaymentNotFound { id: payment_id })?;
        Ok(tables.payments.remove(idx))
    }

    fn append_entry(&mut self, entry: LedgerEntry) -> Result<()> {
        let tables = self.tables_mut()?;
        tables.require_group(entry.group_id)?;
        tables.entries.push(entry);
        Ok(())
    }

    fn remove_entries_for(
        &mut self,
        group_id: GroupId,
        reference: &EntryReference,
    ) -> Result<Vec<LedgerEntry>> {
        let tables = self.tables_mut()?;
        let (removed, kept): (Vec<LedgerEntry>, Vec<LedgerEntry>) = std::mem::take(&mut tables.entries)
            .into_iter()
            .partition(|e| e.group_id == group_id && e.reference == *reference);
        tables.entries = kept;
        Ok(removed)
    }

    fn entries(&self, group_id: GroupId) -> Result<Vec<LedgerEntry>> {
        let tables = self.tables()?;
        tables.require_group(group_id)?;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.check_deadline()?;
        let MemoryUnitOfWork {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Money;
    use crate::errors::ErrorKind;
    use std::sync::Arc;
    use uuid::Uuid;

    fn open(store: &InMemoryStore) -> GroupId {
        let group_id = Uuid::new_v4();
        let mut uow = store.begin(Duration::from_secs(1)).unwrap();
        uow.insert_group(GroupPool::new(group_id)).unwrap();
        uow.adjust_pool(group_id, PoolDelta::all(Money::from_major(500))).unwrap();
        uow.commit().unwrap();
        group_id
    }

    fn available(store: &InMemoryStore, group_id: GroupId) -> Money {
        store
            .begin(Duration::from_secs(1))
            .unwrap()
            .group_pool(group_id)
            .unwrap()
            .available_capital
    }

    #[test]
    fn test_drop_rolls_back() {
        let store = InMemoryStore::new();
        let group_id = open(&store);

        {
            let mut uow = store.begin(Duration::from_secs(1)).unwrap();
            uow.adjust_pool(group_id, PoolDelta::available_only(Money::from_major(-200)))
                .unwrap();
        }

        assert_eq!(available(&store, group_id), Money::from_major(500));
    }

    #[test]
    fn test_commit_past_deadline_is_rejected() {
        let store = InMemoryStore::new();
        let group_id = open(&store);

        let mut uow = store.begin(Duration::from_millis(50)).unwrap();
        uow.adjust_pool(group_id, PoolDelta::available_only(Money::from_major(-200)))
            .unwrap();
        thread::sleep(Duration::from_millis(120));
        let err = uow.commit().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransactionFailure);
        assert_eq!(available(&store, group_id), Money::from_major(500));
    }

    #[test]
    fn test_lock_wait_times_out() {
        let store = Arc::new(InMemoryStore::new());
        let held = store.begin(Duration::from_secs(5)).unwrap();

        let contender = Arc::clone(&store);
        let result = thread::spawn(move || contender.begin(Duration::from_millis(20)).map(|_| ()))
            .join()
            .unwrap();

        assert!(matches!(result, Err(LoanError::TransactionTimeout { .. })));
        drop(held);
    }

    #[test]
    fn test_unknown_group() {
        let store = InMemoryStore::new();
        let uow = store.begin(Duration::from_secs(1)).unwrap();
        let err = uow.group_pool(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(uow.max_loan_number(Uuid::new_v4()).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_duplicate_group_is_not_retried() {
        let store = InMemoryStore::new();
        let group_id = open(&store);
        let mut uow = store.begin(Duration::from_secs(1)).unwrap();
        let err = uow.insert_group(GroupPool::new(group_id)).unwrap_err();
        assert!(matches!(err, LoanError::GroupExists { id } if id == group_id));
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(!err.is_retryable());
    }
}

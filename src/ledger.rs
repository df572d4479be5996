use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LoanError, Result};
use crate::state::{GroupPool, PoolDelta};
use crate::store::UnitOfWork;
use crate::types::{Direction, GroupId, LoanId, MovementType, PaymentId};

/// what caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryReference {
    Loan(LoanId),
    Payment { loan_id: LoanId, payment_id: PaymentId },
    Contribution(Uuid),
    Fine(Uuid),
}

impl fmt::Display for EntryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryReference::Loan(id) => write!(f, "loan:{}", id),
            EntryReference::Payment { payment_id, .. } => write!(f, "payment:{}", payment_id),
            EntryReference::Contribution(id) => write!(f, "contribution:{}", id),
            EntryReference::Fine(id) => write!(f, "fine:{}", id),
        }
    }
}

/// immutable record of one capital-affecting event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub group_id: GroupId,
    pub amount: Money,
    pub movement: MovementType,
    pub direction: Direction,
    pub description: String,
    pub reference: EntryReference,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// change this entry makes to the pool.
    ///
    /// Loans and payments move liquidity only; contributions and fines add to
    /// all three figures.
    pub fn delta(&self) -> PoolDelta {
        let signed = match self.direction {
            Direction::Increase => self.amount,
            Direction::Decrease => -self.amount,
        };
        match self.movement {
            MovementType::Loan | MovementType::Payment => PoolDelta::available_only(signed),
            MovementType::Contribution | MovementType::Fine => PoolDelta::all(signed),
        }
    }
}

/// sum of all entry deltas, starting from an empty pool
pub fn replay<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> PoolDelta {
    entries
        .into_iter()
        .fold(PoolDelta::default(), |acc, entry| acc + entry.delta())
}

/// the only writer of pool balances.
///
/// Every method appends (or removes) entries and applies the matching delta
/// through the same unit of work, so the two never diverge once committed.
pub struct CapitalLedger<'u, 'a> {
    uow: &'u mut (dyn UnitOfWork + 'a),
    now: DateTime<Utc>,
}

impl<'u, 'a> CapitalLedger<'u, 'a> {
    pub fn new(uow: &'u mut (dyn UnitOfWork + 'a), now: DateTime<Utc>) -> Self {
        Self { uow, now }
    }

    pub fn record_loan_issuance(
        &mut self,
        group_id: GroupId,
        loan_id: LoanId,
        amount: Money,
        description: impl Into<String>,
    ) -> Result<GroupPool> {
        self.record(
            group_id,
            amount,
            MovementType::Loan,
            Direction::Decrease,
            description.into(),
            EntryReference::Loan(loan_id),
        )
    }

    pub fn record_payment(
        &mut self,
        group_id: GroupId,
        loan_id: LoanId,
        payment_id: PaymentId,
        amount: Money,
        description: impl Into<String>,
    ) -> Result<GroupPool> {
        self.record(
            group_id,
            amount,
            MovementType::Payment,
            Direction::Increase,
            description.into(),
            EntryReference::Payment { loan_id, payment_id },
        )
    }

    pub fn record_contribution(
        &mut self,
        group_id: GroupId,
        contribution_id: Uuid,
        amount: Money,
        description: impl Into<String>,
    ) -> Result<GroupPool> {
        self.record(
            group_id,
            amount,
            MovementType::Contribution,
            Direction::Increase,
            description.into(),
            EntryReference::Contribution(contribution_id),
        )
    }

    pub fn record_fine(
        &mut self,
        group_id: GroupId,
        fine_id: Uuid,
        amount: Money,
        description: impl Into<String>,
    ) -> Result<GroupPool> {
        self.record(
            group_id,
            amount,
            MovementType::Fine,
            Direction::Increase,
            description.into(),
            EntryReference::Fine(fine_id),
        )
    }

    pub fn reverse_loan_issuance(&mut self, group_id: GroupId, loan_id: LoanId) -> Result<GroupPool> {
        self.reverse(group_id, EntryReference::Loan(loan_id))
    }

    pub fn reverse_payment(
        &mut self,
        group_id: GroupId,
        loan_id: LoanId,
        payment_id: PaymentId,
    ) -> Result<GroupPool> {
        self.reverse(group_id, EntryReference::Payment { loan_id, payment_id })
    }

    pub fn reverse_contribution(&mut self, group_id: GroupId, contribution_id: Uuid) -> Result<GroupPool> {
        self.reverse(group_id, EntryReference::Contribution(contribution_id))
    }

    pub fn reverse_fine(&mut self, group_id: GroupId, fine_id: Uuid) -> Result<GroupPool> {
        self.reverse(group_id, EntryReference::Fine(fine_id))
    }

    fn record(
        &mut self,
        group_id: GroupId,
        amount: Money,
        movement: MovementType,
        direction: Direction,
        description: String,
        reference: EntryReference,
    ) -> Result<GroupPool> {
        if !amount.is_positive() {
            return Err(LoanError::InvalidAmount { amount });
        }

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            group_id,
            amount,
            movement,
            direction,
            description,
            reference,
            recorded_at: self.now,
        };
        let pool = self.uow.adjust_pool(group_id, entry.delta())?;
        debug!(%group_id, %reference, ?movement, %amount, "ledger entry recorded");
        self.uow.append_entry(entry)?;
        Ok(pool)
    }

    /// drop the entries of an originating event and undo their delta
    fn reverse(&mut self, group_id: GroupId, reference: EntryReference) -> Result<GroupPool> {
        let removed = self.uow.remove_entries_for(group_id, &reference)?;
        if removed.is_empty() {
            return Err(LoanError::EntryNotFound {
                reference: reference.to_string(),
            });
        }
        let delta = replay(&removed).negate();
        debug!(%group_id, %reference, entries = removed.len(), "ledger entries reversed");
        self.uow.adjust_pool(group_id, delta)
    }
}

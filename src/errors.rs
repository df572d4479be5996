use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::types::LoanStatus;

/// coarse classification every error reduces to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// malformed or out-of-range input, never retried
    InvalidParameter,
    /// loan principal exceeds the group's available capital
    InsufficientCapital,
    /// referenced group, loan or payment does not exist
    NotFound,
    /// operation not allowed in the current loan state
    InvalidState,
    /// the unit of work failed to commit; safe to retry once
    TransactionFailure,
}

#[derive(Error, Debug)]
pub enum LoanError {
    #[error("invalid amount: {amount} (must be greater than zero)")]
    InvalidAmount {
        amount: Money,
    },

    #[error("amount {amount} has more than {precision} decimal places")]
    ExcessPrecision {
        amount: Money,
        precision: u32,
    },

    #[error("invalid interest rate: {rate} (must not be negative)")]
    NegativeRate {
        rate: Rate,
    },

    #[error("installment count must be at least one")]
    ZeroInstallments,

    #[error("{installments} installments exceeds the limit of {max}")]
    TooManyInstallments {
        installments: u32,
        max: u32,
    },

    #[error("unknown tag: {tag}")]
    UnknownModel {
        tag: String,
    },

    #[error("guarantor reference required for a personal guarantee")]
    MissingGuarantor,

    #[error("borrower cannot guarantee their own loan")]
    SelfGuarantee,

    #[error("variable schedule has {provided} payments, expected {expected}")]
    ScheduleLengthMismatch {
        expected: u32,
        provided: usize,
    },

    #[error("variable schedule payment {period} is negative: {amount}")]
    NegativeScheduledPayment {
        period: u32,
        amount: Money,
    },

    #[error("variable schedule drives the balance negative at period {period}: {balance}")]
    NegativeIntermediateBalance {
        period: u32,
        balance: Money,
    },

    #[error("variable schedule leaves {balance} owed after period {period}, more than the principal")]
    BalanceAbovePrincipal {
        period: u32,
        balance: Money,
    },

    #[error("calculation overflow: {message}")]
    CalculationOverflow {
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("insufficient capital: available {available}, requested {requested}")]
    InsufficientCapital {
        available: Money,
        requested: Money,
    },

    #[error("group already exists: {id}")]
    GroupExists {
        id: Uuid,
    },

    #[error("group not found: {id}")]
    GroupNotFound {
        id: Uuid,
    },

    #[error("loan not found: {id}")]
    LoanNotFound {
        id: Uuid,
    },

    #[error("payment not found: {id}")]
    PaymentNotFound {
        id: Uuid,
    },

    #[error("ledger entry not found for reference {reference}")]
    EntryNotFound {
        reference: String,
    },

    #[error("loan already paid: {code}")]
    LoanAlreadyPaid {
        code: String,
    },

    #[error("payment {amount} exceeds remaining balance {remaining}")]
    PaymentExceedsBalance {
        amount: Money,
        remaining: Money,
    },

    #[error("loan {code} has {count} payments and cannot be deleted")]
    LoanHasPayments {
        code: String,
        count: usize,
    },

    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: LoanStatus,
        to: LoanStatus,
    },

    #[error("pool invariant violated: {message}")]
    PoolInvariant {
        message: String,
    },

    #[error("transaction timed out after {elapsed:?}")]
    TransactionTimeout {
        elapsed: Duration,
    },

    #[error("transaction conflict: {message}")]
    TransactionConflict {
        message: String,
    },

    #[error("storage failure: {message}")]
    Storage {
        message: String,
    },

    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl LoanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoanError::InvalidAmount { .. }
            | LoanError::ExcessPrecision { .. }
            | LoanError::NegativeRate { .. }
            | LoanError::ZeroInstallments
            | LoanError::TooManyInstallments { .. }
            | LoanError::UnknownModel { .. }
            | LoanError::MissingGuarantor
            | LoanError::SelfGuarantee
            | LoanError::ScheduleLengthMismatch { .. }
            | LoanError::NegativeScheduledPayment { .. }
            | LoanError::NegativeIntermediateBalance { .. }
            | LoanError::BalanceAbovePrincipal { .. }
            | LoanError::CalculationOverflow { .. }
            | LoanError::InvalidConfiguration { .. }
            | LoanError::Snapshot(_) => ErrorKind::InvalidParameter,
            LoanError::InsufficientCapital { .. } => ErrorKind::InsufficientCapital,
            LoanError::GroupNotFound { .. }
            | LoanError::LoanNotFound { .. }
            | LoanError::PaymentNotFound { .. }
            | LoanError::EntryNotFound { .. } => ErrorKind::NotFound,
            LoanError::LoanAlreadyPaid { .. }
            | LoanError::PaymentExceedsBalance { .. }
            | LoanError::LoanHasPayments { .. }
            | LoanError::GroupExists { .. }
            | LoanError::InvalidTransition { .. }
            | LoanError::PoolInvariant { .. } => ErrorKind::InvalidState,
            LoanError::TransactionTimeout { .. }
            | LoanError::TransactionConflict { .. }
            | LoanError::Storage { .. } => ErrorKind::TransactionFailure,
        }
    }

    /// only commit failures may be retried, and only from scratch
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransactionFailure
    }
}

pub type Result<T> = std::result::Result<T, LoanError>;

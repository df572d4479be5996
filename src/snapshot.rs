use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::Result;
use crate::payments::{InstallmentPlan, LoanCalculation};
use crate::state::GroupPool;

/// pool figures at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolFigures {
    pub total_capital: Money,
    pub base_capital: Money,
    pub available_capital: Money,
}

impl From<&GroupPool> for PoolFigures {
    fn from(pool: &GroupPool) -> Self {
        Self {
            total_capital: pool.total_capital,
            base_capital: pool.base_capital,
            available_capital: pool.available_capital,
        }
    }
}

/// first snapshot layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotV1 {
    pub captured_at: DateTime<Utc>,
    pub pool_before: PoolFigures,
    pub pool_after: PoolFigures,
    pub calculation: LoanCalculation,
    pub plan: InstallmentPlan,
}

/// immutable audit copy taken when a loan is issued.
///
/// Stored as json tagged with a `version` field; new layouts get a new
/// variant so older snapshots keep parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum IssuanceSnapshot {
    #[serde(rename = "1")]
    V1(SnapshotV1),
}

impl IssuanceSnapshot {
    pub fn capture(
        captured_at: DateTime<Utc>,
        pool_before: &GroupPool,
        pool_after: &GroupPool,
        calculation: LoanCalculation,
        plan: InstallmentPlan,
    ) -> Self {
        IssuanceSnapshot::V1(SnapshotV1 {
            captured_at,
            pool_before: pool_before.into(),
            pool_after: pool_after.into(),
            calculation,
            plan,
        })
    }

    pub fn version(&self) -> u32 {
        match self {
            IssuanceSnapshot::V1(_) => 1,
        }
    }

    pub fn pool_before(&self) -> &PoolFigures {
        match self {
            IssuanceSnapshot::V1(s) => &s.pool_before,
        }
    }

    pub fn pool_after(&self) -> &PoolFigures {
        match self {
            IssuanceSnapshot::V1(s) => &s.pool_after,
        }
    }

    pub fn calculation(&self) -> &LoanCalculation {
        match self {
            IssuanceSnapshot::V1(s) => &s.calculation,
        }
    }

    pub fn plan(&self) -> &InstallmentPlan {
        match self {
            IssuanceSnapshot::V1(s) => &s.plan,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

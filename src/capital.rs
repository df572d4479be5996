use std::sync::Arc;

use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::decimal::Money;
use crate::errors::Result;
use crate::ledger::{replay, CapitalLedger, LedgerEntry};
use crate::snapshot::PoolFigures;
use crate::state::GroupPool;
use crate::store::{run_in_transaction, Store};
use crate::types::GroupId;
use crate::validation::LoanValidator;

/// a contribution or fine that landed in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapitalMovement {
    /// id to pass to the matching reversal
    pub reference_id: Uuid,
    pub amount: Money,
    pub pool: GroupPool,
}

/// stored pool figures against a replay of the ledger from zero
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAudit {
    pub group_id: GroupId,
    pub entry_count: usize,
    pub stored: PoolFigures,
    pub replayed: PoolFigures,
    pub consistent: bool,
}

/// group capital outside of loans: pool creation, contributions, fines
pub struct CapitalService<S: Store> {
    store: Arc<S>,
    config: EngineConfig,
    validator: LoanValidator,
}

impl<S: Store> CapitalService<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let validator = LoanValidator::from_config(&config);
        Ok(Self {
            store,
            config,
            validator,
        })
    }

    /// create an empty pool for a new group
    pub fn open_group(&self, time_provider: &SafeTimeProvider) -> Result<GroupPool> {
        self.open_group_with_id(Uuid::new_v4(), time_provider)
    }

    pub fn open_group_with_id(&self, group_id: GroupId, time_provider: &SafeTimeProvider) -> Result<GroupPool> {
        let pool = run_in_transaction(self.store.as_ref(), &self.config, "open_group", |uow| {
            uow.insert_group(GroupPool::new(group_id))?;
            uow.group_pool(group_id)
        })?;
        info!(%group_id, opened_at = %time_provider.now(), "group pool opened");
        Ok(pool)
    }

    pub fn contribute(
        &self,
        group_id: GroupId,
        amount: Money,
        description: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<CapitalMovement> {
        self.validator.validate_amount(amount)?;
        let now = time_provider.now();
        let reference_id = Uuid::new_v4();

        let pool = run_in_transaction(self.store.as_ref(), &self.config, "contribute", |uow| {
            CapitalLedger::new(uow, now).record_contribution(group_id, reference_id, amount, description)
        })?;

        info!(%group_id, %amount, total = %pool.total_capital, "contribution recorded");
        Ok(CapitalMovement {
            reference_id,
            amount,
            pool,
        })
    }

    /// a fine paid into the pool; counts towards all three figures
    pub fn fine(
        &self,
        group_id: GroupId,
        amount: Money,
        description: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<CapitalMovement> {
        self.validator.validate_amount(amount)?;
        let now = time_provider.now();
        let reference_id = Uuid::new_v4();

        let pool = run_in_transaction(self.store.as_ref(), &self.config, "fine", |uow| {
            CapitalLedger::new(uow, now).record_fine(group_id, reference_id, amount, description)
        })?;

        info!(%group_id, %amount, total = %pool.total_capital, "fine recorded");
        Ok(CapitalMovement {
            reference_id,
            amount,
            pool,
        })
    }

    /// undo a contribution; fails while that capital is lent out
    pub fn reverse_contribution(
        &self,
        group_id: GroupId,
        contribution_id: Uuid,
        time_provider: &SafeTimeProvider,
    ) -> Result<GroupPool> {
        let now = time_provider.now();
        let pool = run_in_transaction(self.store.as_ref(), &self.config, "reverse_contribution", |uow| {
            CapitalLedger::new(uow, now).reverse_contribution(group_id, contribution_id)
        })?;
        info!(%group_id, %contribution_id, "contribution reversed");
        Ok(pool)
    }

    pub fn reverse_fine(&self, group_id: GroupId, fine_id: Uuid, time_provider: &SafeTimeProvider) -> Result<GroupPool> {
        let now = time_provider.now();
        let pool = run_in_transaction(self.store.as_ref(), &self.config, "reverse_fine", |uow| {
            CapitalLedger::new(uow, now).reverse_fine(group_id, fine_id)
        })?;
        info!(%group_id, %fine_id, "fine reversed");
        Ok(pool)
    }

    pub fn pool(&self, group_id: GroupId) -> Result<GroupPool> {
        run_in_transaction(self.store.as_ref(), &self.config, "pool", |uow| uow.group_pool(group_id))
    }

    pub fn entries(&self, group_id: GroupId) -> Result<Vec<LedgerEntry>> {
        run_in_transaction(self.store.as_ref(), &self.config, "entries", |uow| uow.entries(group_id))
    }

    /// replay the ledger from zero and compare with the stored pool
    pub fn audit(&self, group_id: GroupId) -> Result<LedgerAudit> {
        let (pool, entries) = run_in_transaction(self.store.as_ref(), &self.config, "audit", |uow| {
            Ok((uow.group_pool(group_id)?, uow.entries(group_id)?))
        })?;

        let delta = replay(&entries);
        let replayed = PoolFigures {
            total_capital: delta.total,
            base_capital: delta.base,
            available_capital: delta.available,
        };
        let stored = PoolFigures::from(&pool);
        let consistent = replayed == stored;
        if !consistent {
            warn!(%group_id, ?stored, ?replayed, "ledger replay disagrees with stored pool");
        }

        Ok(LedgerAudit {
            group_id,
            entry_count: entries.len(),
            stored,
            replayed,
            consistent,
        })
    }
}

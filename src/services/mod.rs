//! Business logic services

pub mod loans;

use std::sync::Arc;

use crate::{
    config::LoansConfig,
    repository::{memory::MemoryStore, Repository},
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub loans: loans::LoansService,
}

impl Services {
    /// Create all services backed by PostgreSQL
    pub fn new(repository: Repository, loans_config: LoansConfig) -> Self {
        Self {
            loans: loans::LoansService::new(
                Arc::new(repository.items),
                Arc::new(repository.users),
                Arc::new(repository.loans),
                loans_config,
            ),
        }
    }

    /// Create all services backed by a single in-memory store
    pub fn in_memory(store: MemoryStore, loans_config: LoansConfig) -> Self {
        let store = Arc::new(store);
        Self {
            loans: loans::LoansService::new(store.clone(), store.clone(), store, loans_config),
        }
    }
}

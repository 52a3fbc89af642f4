//! Repository layer for database operations
//!
//! The loan service only talks to the stores through the traits below, so
//! the PostgreSQL repositories and the in-memory store are interchangeable.

pub mod items;
pub mod loans;
pub mod memory;
pub mod users;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{Item, Loan, LoanDetails, LoanRole, LoanStatus, NewLoan, User, UserLoanStats},
};

/// Item availability lookups
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn find_by_id(&self, item_id: i32) -> AppResult<Option<Item>>;
}

/// User directory lookups
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, user_id: i32) -> AppResult<Option<User>>;
}

/// Loan persistence
///
/// `create` and `update_status` must be atomic with respect to concurrent
/// callers: `create` re-checks overlapping bookings in the same unit of work
/// as the insert, and `update_status` only succeeds if the stored status
/// still equals `expected`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn find_by_id(&self, loan_id: i32) -> AppResult<Option<Loan>>;

    async fn find_with_details(&self, loan_id: i32) -> AppResult<Option<LoanDetails>>;

    /// Any open loan on the item overlapping `[start, end)`
    async fn has_conflicting_loans(
        &self,
        item_id: i32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Insert a pending loan; `Conflict` if the range is already booked
    async fn create(&self, loan: NewLoan) -> AppResult<Loan>;

    /// Compare-and-swap the status; `None` when the stored status moved
    async fn update_status(
        &self,
        loan_id: i32,
        expected: LoanStatus,
        next: LoanStatus,
        notes: Option<String>,
    ) -> AppResult<Option<Loan>>;

    async fn list_for_user(
        &self,
        user_id: i32,
        role: LoanRole,
        status: Option<LoanStatus>,
    ) -> AppResult<Vec<LoanDetails>>;

    async fn list_for_item(&self, item_id: i32) -> AppResult<Vec<LoanDetails>>;

    async fn stats_for_user(&self, user_id: i32) -> AppResult<UserLoanStats>;
}

/// Main repository struct holding database connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub items: items::ItemsRepository,
    pub users: users::UsersRepository,
    pub loans: loans::LoansRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            items: items::ItemsRepository::new(pool.clone()),
            users: users::UsersRepository::new(pool.clone()),
            loans: loans::LoansRepository::new(pool.clone()),
            pool,
        }
    }
}

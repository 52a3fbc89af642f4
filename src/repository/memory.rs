//! In-memory store implementing every repository trait
//!
//! One mutex guards all state, so the conflict re-check and insert in
//! `create`, and the compare-and-swap in `update_status`, are atomic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::{
    error::{AppError, AppResult},
    models::{
        item::{Item, ItemShort},
        loan::{Loan, LoanDetails, LoanRole, LoanStatus, NewLoan, RoleLoanStats, UserLoanStats, ALREADY_BOOKED},
        user::{User, UserShort},
    },
};

use super::{ItemStore, LoanStore, UserDirectory};

#[derive(Default)]
struct State {
    users: HashMap<i32, User>,
    items: HashMap<i32, Item>,
    loans: Vec<Loan>,
    next_user_id: i32,
    next_item_id: i32,
    next_loan_id: i32,
}

impl State {
    fn details(&self, loan: &Loan) -> AppResult<LoanDetails> {
        let item = self
            .items
            .get(&loan.item_id)
            .ok_or_else(|| AppError::Internal(format!("Loan {} references missing item", loan.id)))?;
        let party = |id: i32| {
            self.users
                .get(&id)
                .map(UserShort::from)
                .ok_or_else(|| AppError::Internal(format!("Loan {} references missing user {}", loan.id, id)))
        };
        Ok(LoanDetails::new(
            loan.clone(),
            ItemShort::from(item),
            party(loan.borrower_id)?,
            party(loan.lender_id)?,
        ))
    }

    fn details_sorted<'a>(&self, loans: impl Iterator<Item = &'a Loan>) -> AppResult<Vec<LoanDetails>> {
        let mut loans: Vec<&Loan> = loans.collect();
        loans.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        loans.into_iter().map(|loan| self.details(loan)).collect()
    }

    fn has_conflict(&self, item_id: i32, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.loans.iter().any(|loan| loan.blocks(item_id, start, end))
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, first_name: &str, last_name: &str, email: &str) -> User {
        let mut state = self.state.lock().await;
        state.next_user_id += 1;
        let now = Utc::now();
        let user = User {
            id: state.next_user_id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        user
    }

    /// Add an available, active item
    pub async fn add_item(&self, owner_id: i32, title: &str, daily_rate: Decimal) -> Item {
        let mut state = self.state.lock().await;
        state.next_item_id += 1;
        let now = Utc::now();
        let item = Item {
            id: state.next_item_id,
            owner_id,
            title: title.to_string(),
            daily_rate,
            is_available: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.items.insert(item.id, item.clone());
        item
    }

    pub async fn set_item_flags(&self, item_id: i32, is_available: bool, is_active: bool) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&item_id)
            .ok_or_else(|| AppError::NotFound(format!("Item with id {} not found", item_id)))?;
        item.is_available = is_available;
        item.is_active = is_active;
        item.updated_at = Utc::now();
        Ok(())
    }

    pub async fn set_item_rate(&self, item_id: i32, daily_rate: Decimal) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&item_id)
            .ok_or_else(|| AppError::NotFound(format!("Item with id {} not found", item_id)))?;
        item.daily_rate = daily_rate;
        item.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn find_by_id(&self, item_id: i32) -> AppResult<Option<Item>> {
        Ok(self.state.lock().await.items.get(&item_id).cloned())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_by_id(&self, user_id: i32) -> AppResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }
}

#[async_trait]
impl LoanStore for MemoryStore {
    async fn find_by_id(&self, loan_id: i32) -> AppResult<Option<Loan>> {
        let state = self.state.lock().await;
        Ok(state.loans.iter().find(|l| l.id == loan_id).cloned())
    }

    async fn find_with_details(&self, loan_id: i32) -> AppResult<Option<LoanDetails>> {
        let state = self.state.lock().await;
        state
            .loans
            .iter()
            .find(|l| l.id == loan_id)
            .map(|loan| state.details(loan))
            .transpose()
    }

    async fn has_conflicting_loans(
        &self,
        item_id: i32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(self.state.lock().await.has_conflict(item_id, start, end))
    }

    async fn create(&self, loan: NewLoan) -> AppResult<Loan> {
        let mut state = self.state.lock().await;

        if !state.items.contains_key(&loan.item_id) {
            return Err(AppError::NotFound(format!("Item with id {} not found", loan.item_id)));
        }
        if state.has_conflict(loan.item_id, loan.start_date, loan.end_date) {
            return Err(AppError::Conflict(ALREADY_BOOKED.to_string()));
        }

        state.next_loan_id += 1;
        let now = Utc::now();
        let created = Loan {
            id: state.next_loan_id,
            item_id: loan.item_id,
            borrower_id: loan.borrower_id,
            lender_id: loan.lender_id,
            start_date: loan.start_date,
            end_date: loan.end_date,
            status: LoanStatus::Pending,
            daily_rate: loan.daily_rate,
            notes: loan.notes,
            created_at: now,
            updated_at: now,
        };
        state.loans.push(created.clone());
        Ok(created)
    }

    async fn update_status(
        &self,
        loan_id: i32,
        expected: LoanStatus,
        next: LoanStatus,
        notes: Option<String>,
    ) -> AppResult<Option<Loan>> {
        let mut state = self.state.lock().await;
        let Some(loan) = state
            .loans
            .iter_mut()
            .find(|l| l.id == loan_id && l.status == expected)
        else {
            return Ok(None);
        };

        loan.status = next;
        if notes.is_some() {
            loan.notes = notes;
        }
        loan.updated_at = Utc::now();
        Ok(Some(loan.clone()))
    }

    async fn list_for_user(
        &self,
        user_id: i32,
        role: LoanRole,
        status: Option<LoanStatus>,
    ) -> AppResult<Vec<LoanDetails>> {
        let state = self.state.lock().await;
        let matches = state.loans.iter().filter(|loan| {
            let in_role = match role {
                LoanRole::Any => loan.is_party(user_id),
                LoanRole::Borrower => loan.borrower_id == user_id,
                LoanRole::Lender => loan.lender_id == user_id,
            };
            in_role && status.map_or(true, |s| loan.status == s)
        });
        state.details_sorted(matches)
    }

    async fn list_for_item(&self, item_id: i32) -> AppResult<Vec<LoanDetails>> {
        let state = self.state.lock().await;
        let mut loans: Vec<&Loan> = state.loans.iter().filter(|l| l.item_id == item_id).collect();
        loans.sort_by(|a, b| b.start_date.cmp(&a.start_date).then(b.id.cmp(&a.id)));
        loans.into_iter().map(|loan| state.details(loan)).collect()
    }

    async fn stats_for_user(&self, user_id: i32) -> AppResult<UserLoanStats> {
        let state = self.state.lock().await;
        let count = |pick: &dyn Fn(&Loan) -> bool| -> RoleLoanStats {
            let mine: Vec<&Loan> = state.loans.iter().filter(|l| pick(l)).collect();
            RoleLoanStats {
                total: mine.len() as i64,
                active: mine.iter().filter(|l| l.status == LoanStatus::Active).count() as i64,
                completed: mine.iter().filter(|l| l.status == LoanStatus::Completed).count() as i64,
            }
        };
        Ok(UserLoanStats {
            as_borrower: count(&|l: &Loan| l.borrower_id == user_id),
            as_lender: count(&|l: &Loan| l.lender_id == user_id),
        })
    }
}

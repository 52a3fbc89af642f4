//! Loan lifecycle service: booking, conflict checks and status transitions

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use validator::Validate;

use crate::{
    config::LoansConfig,
    error::{AppError, AppResult},
    models::loan::{
        duration_days, CreateLoan, Loan, LoanDetails, LoanRole, LoanStatus, NewLoan, UserLoanStats,
        ALREADY_BOOKED,
    },
    repository::{ItemStore, LoanStore, UserDirectory},
};

/// Parse an ISO 8601 timestamp or bare date (midnight UTC)
pub fn parse_loan_date(field: &str, value: &str) -> AppResult<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Some(naive) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(AppError::Validation(format!("{} must be a valid ISO 8601 date", field)))
}

/// Check the booked range against the clock and the duration limit.
/// Returns the duration in days.
pub fn validate_loan_period(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
    max_duration_days: i64,
) -> AppResult<i64> {
    if end <= start {
        return Err(AppError::Validation("end_date must be after start_date".to_string()));
    }
    if start < now {
        return Err(AppError::Validation("start_date cannot be in the past".to_string()));
    }

    let days = duration_days(start, end);
    if days < 1 || days > max_duration_days {
        return Err(AppError::Validation(format!(
            "Loan duration must be between 1 and {} days",
            max_duration_days
        )));
    }

    Ok(days)
}

/// Actor rule for a status change, keyed on the loan's current status.
///
/// Pending and approved loans are driven by the lender; an active loan may
/// be closed by either party. Terminal loans carry no actor rule: the
/// transition check rejects every move out of them.
pub fn can_update_status(loan: &Loan, next: LoanStatus, actor_id: i32, policy: &LoansConfig) -> bool {
    let is_lender = loan.lender_id == actor_id;
    let is_borrower = loan.borrower_id == actor_id;

    match loan.status {
        LoanStatus::Pending => {
            is_lender
                || (is_borrower && next == LoanStatus::Cancelled && policy.borrower_can_withdraw_pending)
        }
        LoanStatus::Approved => is_lender,
        LoanStatus::Active => is_lender || is_borrower,
        LoanStatus::Completed | LoanStatus::Cancelled => true,
    }
}

#[derive(Clone)]
pub struct LoansService {
    items: Arc<dyn ItemStore>,
    users: Arc<dyn UserDirectory>,
    loans: Arc<dyn LoanStore>,
    policy: LoansConfig,
}

impl LoansService {
    pub fn new(
        items: Arc<dyn ItemStore>,
        users: Arc<dyn UserDirectory>,
        loans: Arc<dyn LoanStore>,
        policy: LoansConfig,
    ) -> Self {
        Self {
            items,
            users,
            loans,
            policy,
        }
    }

    pub fn policy(&self) -> &LoansConfig {
        &self.policy
    }

    /// Request a loan (status pending)
    pub async fn create_loan(&self, request: CreateLoan, borrower_id: i32) -> AppResult<LoanDetails> {
        self.create_loan_at(request, borrower_id, Utc::now()).await
    }

    /// Request a loan, evaluating "not in the past" against `now`
    pub async fn create_loan_at(
        &self,
        request: CreateLoan,
        borrower_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<LoanDetails> {
        request.validate()?;

        let start_date = parse_loan_date("start_date", &request.start_date)?;
        let end_date = parse_loan_date("end_date", &request.end_date)?;
        validate_loan_period(start_date, end_date, now, self.policy.max_duration_days)?;

        let item = self
            .items
            .find_by_id(request.item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Item with id {} not found", request.item_id)))?;

        if !item.is_bookable() {
            return Err(AppError::Conflict("item is not available for loan".to_string()));
        }
        if item.owner_id == borrower_id {
            return Err(AppError::Conflict("cannot borrow your own item".to_string()));
        }

        self.users
            .find_by_id(borrower_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", borrower_id)))?;

        if self
            .loans
            .has_conflicting_loans(item.id, start_date, end_date)
            .await?
        {
            tracing::debug!(item_id = item.id, %start_date, %end_date, "Booking rejected: overlapping loan");
            return Err(AppError::Conflict(ALREADY_BOOKED.to_string()));
        }

        let loan = self
            .loans
            .create(NewLoan {
                item_id: item.id,
                borrower_id,
                lender_id: item.owner_id,
                start_date,
                end_date,
                daily_rate: item.daily_rate,
                notes: request.notes.filter(|n| !n.trim().is_empty()),
            })
            .await?;

        tracing::info!(
            loan_id = loan.id,
            item_id = loan.item_id,
            borrower_id = loan.borrower_id,
            lender_id = loan.lender_id,
            "Loan requested"
        );

        self.get_loan_by_id(loan.id).await
    }

    /// Move a loan to `next`, enforcing the actor rule and the lifecycle graph
    pub async fn update_loan_status(
        &self,
        loan_id: i32,
        next: LoanStatus,
        actor_id: i32,
        notes: Option<String>,
    ) -> AppResult<LoanDetails> {
        let loan = self
            .loans
            .find_by_id(loan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))?;

        if !can_update_status(&loan, next, actor_id, &self.policy) {
            return Err(AppError::Authorization(format!(
                "You are not allowed to set this loan to {}",
                next
            )));
        }

        if !loan.status.can_transition_to(next) {
            return Err(AppError::Validation(format!(
                "Cannot transition from {} to {}",
                loan.status, next
            )));
        }

        let notes = notes.filter(|n| !n.trim().is_empty());
        self.loans
            .update_status(loan_id, loan.status, next, notes)
            .await?
            .ok_or_else(|| {
                AppError::Conflict("loan status changed concurrently, reload and retry".to_string())
            })?;

        tracing::info!(loan_id, from = %loan.status, to = %next, actor_id, "Loan status updated");

        self.get_loan_by_id(loan_id).await
    }

    pub async fn cancel_loan(&self, loan_id: i32, actor_id: i32, notes: Option<String>) -> AppResult<LoanDetails> {
        self.update_loan_status(loan_id, LoanStatus::Cancelled, actor_id, notes).await
    }

    pub async fn complete_loan(&self, loan_id: i32, actor_id: i32, notes: Option<String>) -> AppResult<LoanDetails> {
        self.update_loan_status(loan_id, LoanStatus::Completed, actor_id, notes).await
    }

    pub async fn get_loan_by_id(&self, loan_id: i32) -> AppResult<LoanDetails> {
        self.loans
            .find_with_details(loan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))
    }

    /// Loans where the user is borrower or lender
    pub async fn get_user_loans(&self, user_id: i32, status: Option<LoanStatus>) -> AppResult<Vec<LoanDetails>> {
        self.list_for_role(user_id, LoanRole::Any, status).await
    }

    pub async fn get_loans_as_borrower(&self, user_id: i32, status: Option<LoanStatus>) -> AppResult<Vec<LoanDetails>> {
        self.list_for_role(user_id, LoanRole::Borrower, status).await
    }

    pub async fn get_loans_as_lender(&self, user_id: i32, status: Option<LoanStatus>) -> AppResult<Vec<LoanDetails>> {
        self.list_for_role(user_id, LoanRole::Lender, status).await
    }

    /// Loans of an item, visible to its current owner only
    pub async fn get_item_loans(&self, item_id: i32, requester_id: i32) -> AppResult<Vec<LoanDetails>> {
        let item = self
            .items
            .find_by_id(item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Item with id {} not found", item_id)))?;

        if item.owner_id != requester_id {
            return Err(AppError::Authorization(
                "Only the item owner can view its loans".to_string(),
            ));
        }

        self.loans.list_for_item(item_id).await
    }

    pub async fn get_user_loan_stats(&self, user_id: i32) -> AppResult<UserLoanStats> {
        self.require_user(user_id).await?;
        self.loans.stats_for_user(user_id).await
    }

    async fn list_for_role(
        &self,
        user_id: i32,
        role: LoanRole,
        status: Option<LoanStatus>,
    ) -> AppResult<Vec<LoanDetails>> {
        self.require_user(user_id).await?;
        self.loans.list_for_user(user_id, role, status).await
    }

    async fn require_user(&self, user_id: i32) -> AppResult<()> {
        self.users
            .find_by_id(user_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", user_id)))
    }
}

//! Loan (rental) model and related types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, FromRow, Postgres};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::item::ItemShort;
use super::user::UserShort;

const SECONDS_PER_DAY: i64 = 86_400;

/// Rejection message for overlapping bookings
pub const ALREADY_BOOKED: &str = "item is already booked for the selected dates";

/// Loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Pending,
    Approved,
    Active,
    Completed,
    Cancelled,
}

impl LoanStatus {
    /// Statuses that hold the item's calendar
    pub const OPEN: [LoanStatus; 3] = [LoanStatus::Pending, LoanStatus::Approved, LoanStatus::Active];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Active => "active",
            LoanStatus::Completed => "completed",
            LoanStatus::Cancelled => "cancelled",
        }
    }

    /// Outgoing edges of the lifecycle graph
    pub fn allowed_next(&self) -> &'static [LoanStatus] {
        match self {
            LoanStatus::Pending => &[LoanStatus::Approved, LoanStatus::Cancelled],
            LoanStatus::Approved => &[LoanStatus::Active, LoanStatus::Cancelled],
            LoanStatus::Active => &[LoanStatus::Completed, LoanStatus::Cancelled],
            LoanStatus::Completed | LoanStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(LoanStatus::Pending),
            "approved" => Ok(LoanStatus::Approved),
            "active" => Ok(LoanStatus::Active),
            "completed" => Ok(LoanStatus::Completed),
            "cancelled" => Ok(LoanStatus::Cancelled),
            _ => Err(format!("Invalid loan status: {}", s)),
        }
    }
}

// Stored as VARCHAR
impl sqlx::Type<Postgres> for LoanStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for LoanStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s: String = Decode::<Postgres>::decode(value)?;
        s.parse().map_err(|e: String| e.into())
    }
}

impl Encode<'_, Postgres> for LoanStatus {
    fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
        <&str as Encode<Postgres>>::encode(self.as_str(), buf)
    }
}

/// Loan model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Loan {
    pub id: i32,
    pub item_id: i32,
    pub borrower_id: i32,
    pub lender_id: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: LoanStatus,
    pub daily_rate: Decimal,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    pub fn duration_days(&self) -> i64 {
        duration_days(self.start_date, self.end_date)
    }

    pub fn is_party(&self, user_id: i32) -> bool {
        self.borrower_id == user_id || self.lender_id == user_id
    }

    /// True when this loan holds the item over any part of `[start, end)`
    pub fn blocks(&self, item_id: i32, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.item_id == item_id
            && self.status.is_open()
            && ranges_overlap(self.start_date, self.end_date, start, end)
    }
}

/// Whole days covered by `[start, end)`, rounded up
pub fn duration_days(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let seconds = (end - start).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
}

/// Half-open range overlap: adjacent ranges do not overlap
pub fn ranges_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Loan ready to be persisted
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub item_id: i32,
    pub borrower_id: i32,
    pub lender_id: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub daily_rate: Decimal,
    pub notes: Option<String>,
}

/// Loan with item and party details
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    #[serde(flatten)]
    pub loan: Loan,
    pub item: ItemShort,
    pub borrower: UserShort,
    pub lender: UserShort,
    pub duration_days: i64,
    pub total_amount: Decimal,
}

impl LoanDetails {
    pub fn new(loan: Loan, item: ItemShort, borrower: UserShort, lender: UserShort) -> Self {
        let duration_days = loan.duration_days();
        let total_amount = loan.daily_rate * Decimal::from(duration_days);
        Self {
            loan,
            item,
            borrower,
            lender,
            duration_days,
            total_amount,
        }
    }
}

/// Create loan request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateLoan {
    #[validate(range(min = 1, message = "item_id is required"))]
    pub item_id: i32,
    /// ISO 8601 date or timestamp
    #[validate(length(min = 1, message = "start_date is required"))]
    pub start_date: String,
    /// ISO 8601 date or timestamp (exclusive)
    #[validate(length(min = 1, message = "end_date is required"))]
    pub end_date: String,
    #[validate(length(max = 1000, message = "Notes must be at most 1000 characters"))]
    pub notes: Option<String>,
}

/// Status change request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateLoanStatus {
    /// Target status
    #[validate(length(min = 1, message = "status is required"))]
    pub status: String,
    #[validate(length(max = 1000, message = "Notes must be at most 1000 characters"))]
    pub notes: Option<String>,
}

/// Optional notes attached to cancel/complete actions
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct LoanNotes {
    #[validate(length(max = 1000, message = "Notes must be at most 1000 characters"))]
    pub notes: Option<String>,
}

/// Which side of the loan the user is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LoanRole {
    #[default]
    Any,
    Borrower,
    Lender,
}

/// Loan listing query
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoanQuery {
    /// borrower, lender or any (default)
    pub role: Option<LoanRole>,
    /// Only loans in this status
    pub status: Option<String>,
}

/// Counters for one role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RoleLoanStats {
    pub total: i64,
    pub active: i64,
    pub completed: i64,
}

/// Loan counters for a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserLoanStats {
    pub as_borrower: RoleLoanStats,
    pub as_lender: RoleLoanStats,
}

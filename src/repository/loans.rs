//! Loans repository for database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, FromRow, Pool, Postgres, Row};

use crate::{
    error::{AppError, AppResult},
    models::{
        item::ItemShort,
        loan::{Loan, LoanDetails, LoanRole, LoanStatus, NewLoan, RoleLoanStats, UserLoanStats, ALREADY_BOOKED},
        user::UserShort,
    },
};

use super::LoanStore;

/// SQLSTATE raised by the `loans_no_overlap` exclusion constraint
const EXCLUSION_VIOLATION: &str = "23P01";

const DETAILS_SELECT: &str = r#"
    SELECT l.*,
           i.title AS item_title, i.daily_rate AS item_daily_rate,
           b.first_name AS borrower_first_name, b.last_name AS borrower_last_name,
           le.first_name AS lender_first_name, le.last_name AS lender_last_name
    FROM loans l
    JOIN items i ON i.id = l.item_id
    JOIN users b ON b.id = l.borrower_id
    JOIN users le ON le.id = l.lender_id
"#;

const CONFLICT_EXISTS: &str = r#"
    SELECT EXISTS(
        SELECT 1 FROM loans
        WHERE item_id = $1
          AND status IN ('pending', 'approved', 'active')
          AND start_date < $3
          AND $2 < end_date
    )
"#;

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn details_from_row(row: &PgRow) -> Result<LoanDetails, sqlx::Error> {
        let loan = Loan::from_row(row)?;
        let item = ItemShort {
            id: loan.item_id,
            title: row.try_get("item_title")?,
            daily_rate: row.try_get("item_daily_rate")?,
        };
        let borrower = UserShort {
            id: loan.borrower_id,
            first_name: row.try_get("borrower_first_name")?,
            last_name: row.try_get("borrower_last_name")?,
        };
        let lender = UserShort {
            id: loan.lender_id,
            first_name: row.try_get("lender_first_name")?,
            last_name: row.try_get("lender_last_name")?,
        };
        Ok(LoanDetails::new(loan, item, borrower, lender))
    }

    fn details_from_rows(rows: Vec<PgRow>) -> AppResult<Vec<LoanDetails>> {
        rows.iter()
            .map(|row| Self::details_from_row(row).map_err(AppError::from))
            .collect()
    }
}

/// Exclusion-constraint hits mean another writer booked the range first
fn map_overlap_violation(e: sqlx::Error) -> AppError {
    let is_overlap = e
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == EXCLUSION_VIOLATION)
        .unwrap_or(false);

    if is_overlap {
        AppError::Conflict(ALREADY_BOOKED.to_string())
    } else {
        AppError::Database(e)
    }
}

#[async_trait]
impl LoanStore for LoansRepository {
    async fn find_by_id(&self, loan_id: i32) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(loan_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(loan)
    }

    async fn find_with_details(&self, loan_id: i32) -> AppResult<Option<LoanDetails>> {
        let row = sqlx::query(&format!("{} WHERE l.id = $1", DETAILS_SELECT))
            .bind(loan_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref()
            .map(Self::details_from_row)
            .transpose()
            .map_err(AppError::from)
    }

    async fn has_conflicting_loans(
        &self,
        item_id: i32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(CONFLICT_EXISTS)
            .bind(item_id)
            .bind(start)
            .bind(end)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn create(&self, loan: NewLoan) -> AppResult<Loan> {
        let mut tx = self.pool.begin().await?;

        // Serializes bookings of the same item until commit
        sqlx::query("SELECT id FROM items WHERE id = $1 FOR UPDATE")
            .bind(loan.item_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Item with id {} not found", loan.item_id)))?;

        let conflict: bool = sqlx::query_scalar(CONFLICT_EXISTS)
            .bind(loan.item_id)
            .bind(loan.start_date)
            .bind(loan.end_date)
            .fetch_one(&mut *tx)
            .await?;

        if conflict {
            return Err(AppError::Conflict(ALREADY_BOOKED.to_string()));
        }

        let created = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (item_id, borrower_id, lender_id, start_date, end_date, status, daily_rate, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(loan.item_id)
        .bind(loan.borrower_id)
        .bind(loan.lender_id)
        .bind(loan.start_date)
        .bind(loan.end_date)
        .bind(LoanStatus::Pending)
        .bind(loan.daily_rate)
        .bind(&loan.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_overlap_violation)?;

        tx.commit().await.map_err(map_overlap_violation)?;

        Ok(created)
    }

    async fn update_status(
        &self,
        loan_id: i32,
        expected: LoanStatus,
        next: LoanStatus,
        notes: Option<String>,
    ) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans
            SET status = $1, notes = COALESCE($2, notes), updated_at = NOW()
            WHERE id = $3 AND status = $4
            RETURNING *
            "#,
        )
        .bind(next)
        .bind(notes)
        .bind(loan_id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        Ok(loan)
    }

    async fn list_for_user(
        &self,
        user_id: i32,
        role: LoanRole,
        status: Option<LoanStatus>,
    ) -> AppResult<Vec<LoanDetails>> {
        let role_clause = match role {
            LoanRole::Any => "(l.borrower_id = $1 OR l.lender_id = $1)",
            LoanRole::Borrower => "l.borrower_id = $1",
            LoanRole::Lender => "l.lender_id = $1",
        };

        let query = format!(
            "{} WHERE {} AND ($2::varchar IS NULL OR l.status = $2) ORDER BY l.created_at DESC, l.id DESC",
            DETAILS_SELECT, role_clause
        );

        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;

        Self::details_from_rows(rows)
    }

    async fn list_for_item(&self, item_id: i32) -> AppResult<Vec<LoanDetails>> {
        let rows = sqlx::query(&format!(
            "{} WHERE l.item_id = $1 ORDER BY l.start_date DESC, l.id DESC",
            DETAILS_SELECT
        ))
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        Self::details_from_rows(rows)
    }

    async fn stats_for_user(&self, user_id: i32) -> AppResult<UserLoanStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE borrower_id = $1) AS borrower_total,
                COUNT(*) FILTER (WHERE borrower_id = $1 AND status = 'active') AS borrower_active,
                COUNT(*) FILTER (WHERE borrower_id = $1 AND status = 'completed') AS borrower_completed,
                COUNT(*) FILTER (WHERE lender_id = $1) AS lender_total,
                COUNT(*) FILTER (WHERE lender_id = $1 AND status = 'active') AS lender_active,
                COUNT(*) FILTER (WHERE lender_id = $1 AND status = 'completed') AS lender_completed
            FROM loans
            WHERE borrower_id = $1 OR lender_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(UserLoanStats {
            as_borrower: RoleLoanStats {
                total: row.get("borrower_total"),
                active: row.get("borrower_active"),
                completed: row.get("borrower_completed"),
            },
            as_lender: RoleLoanStats {
                total: row.get("lender_total"),
                active: row.get("lender_active"),
                completed: row.get("lender_completed"),
            },
        })
    }
}

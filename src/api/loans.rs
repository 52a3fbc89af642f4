//! Loan management endpoints

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::loan::{
        CreateLoan, LoanDetails, LoanNotes, LoanQuery, LoanRole, LoanStatus, UpdateLoanStatus,
        UserLoanStats,
    },
    AppState,
};

use super::AuthenticatedUser;

fn parse_status(value: &str) -> AppResult<LoanStatus> {
    value.parse().map_err(AppError::Validation)
}

/// Optional JSON notes body: empty means no notes, anything else must parse
fn parse_notes(body: &Bytes) -> AppResult<LoanNotes> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(LoanNotes::default());
    }

    let notes: LoanNotes = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid request body: {}", e)))?;
    notes.validate()?;
    Ok(notes)
}

/// Request a loan for a date range
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = CreateLoan,
    responses(
        (status = 201, description = "Loan requested", body = LoanDetails),
        (status = 400, description = "Invalid dates or duration"),
        (status = 404, description = "Item or user not found"),
        (status = 409, description = "Item unavailable, own item, or dates already booked")
    )
)]
pub async fn create_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateLoan>,
) -> AppResult<(StatusCode, Json<LoanDetails>)> {
    let loan = state.services.loans.create_loan(request, claims.user_id).await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// List the caller's loans
#[utoipa::path(
    get,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(LoanQuery),
    responses(
        (status = 200, description = "Loans where the caller is borrower and/or lender", body = Vec<LoanDetails>),
        (status = 400, description = "Invalid status filter")
    )
)]
pub async fn list_my_loans(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<LoanQuery>,
) -> AppResult<Json<Vec<LoanDetails>>> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let loans = &state.services.loans;

    let result = match query.role.unwrap_or_default() {
        LoanRole::Any => loans.get_user_loans(claims.user_id, status).await?,
        LoanRole::Borrower => loans.get_loans_as_borrower(claims.user_id, status).await?,
        LoanRole::Lender => loans.get_loans_as_lender(claims.user_id, status).await?,
    };

    Ok(Json(result))
}

/// Loan counters for the caller
#[utoipa::path(
    get,
    path = "/loans/stats",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Counts by role and status", body = UserLoanStats)
    )
)]
pub async fn get_my_loan_stats(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<UserLoanStats>> {
    let stats = state.services.loans.get_user_loan_stats(claims.user_id).await?;
    Ok(Json(stats))
}

/// Get a loan with item and party details
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan details", body = LoanDetails),
        (status = 403, description = "Caller is neither borrower nor lender"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<LoanDetails>> {
    let loan = state.services.loans.get_loan_by_id(loan_id).await?;

    if !loan.loan.is_party(claims.user_id) {
        return Err(AppError::Authorization(
            "Only the borrower or the lender can view this loan".to_string(),
        ));
    }

    Ok(Json(loan))
}

/// Change a loan's status
#[utoipa::path(
    put,
    path = "/loans/{id}/status",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    request_body = UpdateLoanStatus,
    responses(
        (status = 200, description = "Status updated", body = LoanDetails),
        (status = 400, description = "Illegal transition"),
        (status = 403, description = "Caller may not perform this transition"),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Loan changed concurrently")
    )
)]
pub async fn update_loan_status(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
    Json(request): Json<UpdateLoanStatus>,
) -> AppResult<Json<LoanDetails>> {
    request.validate()?;
    let status = parse_status(&request.status)?;

    let loan = state
        .services
        .loans
        .update_loan_status(loan_id, status, claims.user_id, request.notes)
        .await?;

    Ok(Json(loan))
}

/// Cancel a loan
#[utoipa::path(
    post,
    path = "/loans/{id}/cancel",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    request_body = LoanNotes,
    responses(
        (status = 200, description = "Loan cancelled", body = LoanDetails),
        (status = 400, description = "Loan already closed or malformed body"),
        (status = 403, description = "Caller may not cancel this loan"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn cancel_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
    body: Bytes,
) -> AppResult<Json<LoanDetails>> {
    let notes = parse_notes(&body)?;

    let loan = state
        .services
        .loans
        .cancel_loan(loan_id, claims.user_id, notes.notes)
        .await?;

    Ok(Json(loan))
}

/// Mark an active loan as completed
#[utoipa::path(
    post,
    path = "/loans/{id}/complete",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    request_body = LoanNotes,
    responses(
        (status = 200, description = "Loan completed", body = LoanDetails),
        (status = 400, description = "Loan is not active or malformed body"),
        (status = 403, description = "Caller may not complete this loan"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn complete_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
    body: Bytes,
) -> AppResult<Json<LoanDetails>> {
    let notes = parse_notes(&body)?;

    let loan = state
        .services
        .loans
        .complete_loan(loan_id, claims.user_id, notes.notes)
        .await?;

    Ok(Json(loan))
}

/// Booking calendar of an item
#[utoipa::path(
    get,
    path = "/items/{id}/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Item ID")
    ),
    responses(
        (status = 200, description = "Loans of the item", body = Vec<LoanDetails>),
        (status = 403, description = "Caller does not own the item"),
        (status = 404, description = "Item not found")
    )
)]
pub async fn get_item_loans(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(item_id): Path<i32>,
) -> AppResult<Json<Vec<LoanDetails>>> {
    let loans = state.services.loans.get_item_loans(item_id, claims.user_id).await?;
    Ok(Json(loans))
}

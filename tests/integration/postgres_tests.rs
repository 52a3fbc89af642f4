//! PostgreSQL repository tests
//!
//! Need a reachable database (`DATABASE_URL`, or the default from config).
//! Run with: cargo test --test postgres_tests -- --ignored

use std::sync::atomic::{AtomicU32, Ordering};

use axum::http::StatusCode;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool};

use empresta_server::{
    config::AppConfig,
    models::{LoanRole, LoanStatus, NewLoan},
    repository::{LoanStore, Repository},
    AppError,
};

static SEQ: AtomicU32 = AtomicU32::new(0);

async fn connect() -> PgPool {
    let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| AppConfig::default().database.url);
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    pool
}

async fn insert_user(pool: &PgPool, name: &str) -> i32 {
    let email = format!(
        "{}-{}-{}@example.com",
        name,
        Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        SEQ.fetch_add(1, Ordering::SeqCst)
    );
    sqlx::query_scalar("INSERT INTO users (first_name, last_name, email) VALUES ($1, 'Test', $2) RETURNING id")
        .bind(name)
        .bind(email)
        .fetch_one(pool)
        .await
        .expect("Failed to insert user")
}

struct Seed {
    lender_id: i32,
    borrower_id: i32,
    item_id: i32,
}

async fn seed(pool: &PgPool) -> Seed {
    let lender_id = insert_user(pool, "lender").await;
    let borrower_id = insert_user(pool, "borrower").await;
    let item_id = sqlx::query_scalar("INSERT INTO items (owner_id, title, daily_rate) VALUES ($1, 'Tent', $2) RETURNING id")
        .bind(lender_id)
        .bind(Decimal::new(1500, 2))
        .fetch_one(pool)
        .await
        .expect("Failed to insert item");
    Seed {
        lender_id,
        borrower_id,
        item_id,
    }
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2031, 7, d, 0, 0, 0).unwrap()
}

fn new_loan(seed: &Seed, start: DateTime<Utc>, end: DateTime<Utc>) -> NewLoan {
    NewLoan {
        item_id: seed.item_id,
        borrower_id: seed.borrower_id,
        lender_id: seed.lender_id,
        start_date: start,
        end_date: end,
        daily_rate: Decimal::new(1500, 2),
        notes: None,
    }
}

#[tokio::test]
#[ignore]
async fn test_concurrent_overlapping_creates_book_once() {
    let pool = connect().await;
    let seed = seed(&pool).await;
    let repository = Repository::new(pool);

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let loans = repository.loans.clone();
            let loan = new_loan(&seed, day(1) + Duration::hours(i), day(5) + Duration::hours(i));
            tokio::spawn(async move { loans.create(loan).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) => created += 1,
            Err(AppError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
    assert_eq!(created, 1);

    let calendar = repository.loans.list_for_item(seed.item_id).await.unwrap();
    assert_eq!(calendar.len(), 1);
}

#[tokio::test]
#[ignore]
async fn test_adjacent_ranges_and_closed_loans_do_not_block() {
    let pool = connect().await;
    let seed = seed(&pool).await;
    let repository = Repository::new(pool);

    let first = repository.loans.create(new_loan(&seed, day(1), day(4))).await.unwrap();
    repository.loans.create(new_loan(&seed, day(4), day(6))).await.unwrap();
    assert!(repository.loans.has_conflicting_loans(seed.item_id, day(3), day(5)).await.unwrap());
    assert!(!repository.loans.has_conflicting_loans(seed.item_id, day(6), day(9)).await.unwrap());

    repository
        .loans
        .update_status(first.id, LoanStatus::Pending, LoanStatus::Cancelled, None)
        .await
        .unwrap()
        .expect("status should have moved");
    repository.loans.create(new_loan(&seed, day(2), day(4))).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_exclusion_constraint_rejects_direct_overlap() {
    let pool = connect().await;
    let seed = seed(&pool).await;
    let repository = Repository::new(pool.clone());
    repository.loans.create(new_loan(&seed, day(10), day(14))).await.unwrap();

    let err = sqlx::query(
        "INSERT INTO loans (item_id, borrower_id, lender_id, start_date, end_date, status, daily_rate)
         VALUES ($1, $2, $3, $4, $5, 'approved', 10)",
    )
    .bind(seed.item_id)
    .bind(seed.borrower_id)
    .bind(seed.lender_id)
    .bind(day(12))
    .bind(day(16))
    .execute(&pool)
    .await
    .expect_err("overlapping insert must fail");

    let code = err.as_database_error().and_then(|db| db.code()).map(|c| c.into_owned());
    assert_eq!(code.as_deref(), Some("23P01"));
}

#[tokio::test]
#[ignore]
async fn test_uncommitted_overlap_surfaces_as_conflict() {
    let pool = connect().await;
    let seed = seed(&pool).await;
    let repository = Repository::new(pool.clone());

    // Writer that skips the item lock and holds an overlapping row uncommitted
    let mut tx = pool.begin().await.unwrap();
    sqlx::query(
        "INSERT INTO loans (item_id, borrower_id, lender_id, start_date, end_date, status, daily_rate)
         VALUES ($1, $2, $3, $4, $5, 'pending', 10)",
    )
    .bind(seed.item_id)
    .bind(seed.borrower_id)
    .bind(seed.lender_id)
    .bind(day(20))
    .bind(day(24))
    .execute(&mut *tx)
    .await
    .unwrap();

    let loans = repository.loans.clone();
    let loan = new_loan(&seed, day(22), day(26));
    let pending = tokio::spawn(async move { loans.create(loan).await });

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    tx.commit().await.unwrap();

    let err = pending.await.expect("task panicked").expect_err("overlap must be rejected");
    assert!(matches!(err, AppError::Conflict(_)), "{:?}", err);
    assert_eq!(err.status().0, StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore]
async fn test_stale_status_update_returns_none() {
    let pool = connect().await;
    let seed = seed(&pool).await;
    let repository = Repository::new(pool);
    let loan = repository.loans.create(new_loan(&seed, day(3), day(5))).await.unwrap();

    let approved = repository
        .loans
        .update_status(loan.id, LoanStatus::Pending, LoanStatus::Approved, Some("ok".to_string()))
        .await
        .unwrap()
        .expect("first update should apply");
    assert_eq!(approved.status, LoanStatus::Approved);
    assert_eq!(approved.notes.as_deref(), Some("ok"));

    let stale = repository
        .loans
        .update_status(loan.id, LoanStatus::Pending, LoanStatus::Cancelled, None)
        .await
        .unwrap();
    assert!(stale.is_none());

    let stored = repository.loans.find_by_id(loan.id).await.unwrap().unwrap();
    assert_eq!(stored.status, LoanStatus::Approved);
    assert_eq!(stored.notes.as_deref(), Some("ok"));
}

#[tokio::test]
#[ignore]
async fn test_listing_filters_and_stats() {
    let pool = connect().await;
    let seed = seed(&pool).await;
    let repository = Repository::new(pool);

    let first = repository.loans.create(new_loan(&seed, day(1), day(3))).await.unwrap();
    repository.loans.create(new_loan(&seed, day(5), day(7))).await.unwrap();
    for (from, to) in [
        (LoanStatus::Pending, LoanStatus::Approved),
        (LoanStatus::Approved, LoanStatus::Active),
    ] {
        repository.loans.update_status(first.id, from, to, None).await.unwrap().unwrap();
    }

    let all = repository
        .loans
        .list_for_user(seed.borrower_id, LoanRole::Borrower, None)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let active = repository
        .loans
        .list_for_user(seed.lender_id, LoanRole::Any, Some(LoanStatus::Active))
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].loan.id, first.id);
    assert_eq!(active[0].item.title, "Tent");
    assert_eq!(active[0].total_amount, Decimal::new(3000, 2));

    let as_lender = repository
        .loans
        .list_for_user(seed.borrower_id, LoanRole::Lender, None)
        .await
        .unwrap();
    assert!(as_lender.is_empty());

    let stats = repository.loans.stats_for_user(seed.borrower_id).await.unwrap();
    assert_eq!(stats.as_borrower.total, 2);
    assert_eq!(stats.as_borrower.active, 1);
    assert_eq!(stats.as_borrower.completed, 0);
    assert_eq!(stats.as_lender.total, 0);
}

//! Data models for Empresta

pub mod item;
pub mod loan;
pub mod user;

// Re-export commonly used types
pub use item::{Item, ItemShort};
pub use loan::{Loan, LoanDetails, LoanRole, LoanStatus, NewLoan, UserLoanStats};
pub use user::{User, UserClaims, UserShort};

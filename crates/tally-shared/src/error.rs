use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid month token: {0} (expected YYYY-MM)")]
    InvalidMonthToken(String),
}

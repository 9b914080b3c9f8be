use serde::{Deserialize, Serialize};

/// Payment state of a client, set by the user (never derived).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    #[default]
    Pending,
    Paid,
    Delinquent,
}

/// Due status derived from the due date and today's date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DueStatus {
    DueToday,
    Overdue,
    DueSoon,
    #[default]
    Current,
}

impl DueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DueToday => "DUE_TODAY",
            Self::Overdue => "OVERDUE",
            Self::DueSoon => "DUE_SOON",
            Self::Current => "CURRENT",
        }
    }
}

impl std::fmt::Display for DueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of mutation recorded by an audit log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogKind {
    Create,
    Update,
    Delete,
    Renew,
    InterestApplied,
    ReferralRegistered,
    Cancel,
    Restore,
}

/// Which entity type a log entry targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Client,
    Server,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

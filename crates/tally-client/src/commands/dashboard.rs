use serde::Serialize;

use tally_shared::{Client, DueStatus, PaymentState, Server};

use crate::commands::servers::{stats_for, ServerStats};
use crate::error::Result;
use crate::state::AppState;

/// Headline numbers for the dashboard. Cancelled clients are counted apart
/// and left out of every other figure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_clients: usize,
    pub due_today: usize,
    pub due_soon: usize,
    pub overdue: usize,
    pub current: usize,
    pub paid: usize,
    pub pending: usize,
    pub delinquent: usize,
    pub cancelled: usize,
    /// Sum of amounts of `PAID` clients.
    pub amount_received: f64,
    /// Sum of amounts of `PENDING` clients.
    pub amount_pending: f64,
    pub total_profit: f64,
    pub servers: Vec<ServerStats>,
}

pub fn summary(state: &AppState) -> Result<DashboardSummary> {
    let store = state.lock_store()?;
    Ok(summarize(store.all::<Client>(), store.all::<Server>()))
}

fn summarize(clients: &[Client], servers: &[Server]) -> DashboardSummary {
    let mut summary = DashboardSummary {
        servers: servers.iter().map(|s| stats_for(s, clients)).collect(),
        ..DashboardSummary::default()
    };

    for client in clients {
        if client.cancelled {
            summary.cancelled += 1;
            continue;
        }
        summary.total_clients += 1;
        summary.total_profit += client.client_profit;

        match client.status {
            DueStatus::DueToday => summary.due_today += 1,
            DueStatus::DueSoon => summary.due_soon += 1,
            DueStatus::Overdue => summary.overdue += 1,
            DueStatus::Current => summary.current += 1,
        }
        match client.payment_state {
            PaymentState::Paid => {
                summary.paid += 1;
                summary.amount_received += client.amount;
            }
            PaymentState::Pending => {
                summary.pending += 1;
                summary.amount_pending += client.amount;
            }
            PaymentState::Delinquent => summary.delinquent += 1,
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tally_shared::{status, ClientDraft, ServerDraft};

    use super::*;

    fn client(name: &str, due_in: i64, amount: f64, payment_state: PaymentState) -> Client {
        let today = status::today();
        Client::new(
            ClientDraft {
                name: name.into(),
                server: "alpha".into(),
                entry_date: today,
                due_date: today + Duration::days(due_in),
                amount,
                payment_state,
                screens: 1,
                server_unit_cost: 5.0,
            },
            today,
        )
    }

    #[test]
    fn counts_by_status_and_payment() {
        let mut gone = client("dan", 20, 99.0, PaymentState::Paid);
        gone.cancelled = true;
        let clients = vec![
            client("ana", 0, 30.0, PaymentState::Paid),
            client("bia", -2, 25.0, PaymentState::Pending),
            client("caio", 3, 40.0, PaymentState::Pending),
            gone,
        ];
        let servers = vec![Server::new(ServerDraft {
            name: "alpha".into(),
            base_cost: 10.0,
        })];

        let s = summarize(&clients, &servers);
        assert_eq!(s.total_clients, 3);
        assert_eq!(s.cancelled, 1);
        assert_eq!((s.due_today, s.overdue, s.due_soon, s.current), (1, 1, 1, 0));
        assert_eq!((s.paid, s.pending, s.delinquent), (1, 2, 0));
        assert_eq!(s.amount_received, 30.0);
        assert_eq!(s.amount_pending, 65.0);
        assert_eq!(s.total_profit, 25.0 + 20.0 + 35.0);
        assert_eq!(s.servers.len(), 1);
        assert_eq!(s.servers[0].client_count, 4);
    }

    #[test]
    fn empty_store() {
        let state = AppState::in_memory(None, "tenant").unwrap();
        let s = summary(&state).unwrap();
        assert_eq!(s, DashboardSummary::default());
    }
}

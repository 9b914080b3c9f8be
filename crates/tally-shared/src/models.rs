//! Billing entities shared by the local store and the remote replica.
//!
//! Field names serialize in camelCase; the persisted JSON blobs and the
//! remote documents use exactly this shape.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit::{Audited, FieldChange};
use crate::constants::{INTEREST_BASIS_DAYS, RENEWAL_PERIOD_DAYS};
use crate::record::{Collection, Record};
use crate::status;
use crate::types::{DueStatus, EntityKind, LogKind, PaymentState};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A billed customer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    /// Name of the hosting server. A weak reference: servers are looked up
    /// by name and nothing cascades when a server disappears.
    pub server: String,
    pub entry_date: NaiveDate,
    pub due_date: NaiveDate,
    /// Monthly amount charged to the client.
    pub amount: f64,
    pub payment_state: PaymentState,
    pub screens: u32,
    /// Upstream cost per screen.
    pub server_unit_cost: f64,

    // -- derived --
    pub days_remaining: i64,
    pub status: DueStatus,
    pub server_cost: f64,
    pub client_profit: f64,

    // -- delinquency --
    #[serde(default)]
    pub interest_days: u32,
    #[serde(default)]
    pub interest_amount: f64,

    // -- referrals (monthly scoped) --
    #[serde(default)]
    pub referred_clients_count: u32,
    #[serde(default)]
    pub referral_discount: f64,
    #[serde(default)]
    pub referral_discount_month: Option<String>,

    /// Soft-delete flag.
    #[serde(default)]
    pub cancelled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// User-entered fields for a new client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientDraft {
    pub name: String,
    pub server: String,
    pub entry_date: NaiveDate,
    pub due_date: NaiveDate,
    pub amount: f64,
    #[serde(default)]
    pub payment_state: PaymentState,
    #[serde(default)]
    pub screens: u32,
    #[serde(default)]
    pub server_unit_cost: f64,
}

/// Partial update of a client. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientPatch {
    pub name: Option<String>,
    pub server: Option<String>,
    pub entry_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub amount: Option<f64>,
    pub payment_state: Option<PaymentState>,
    pub screens: Option<u32>,
    pub server_unit_cost: Option<f64>,
    pub interest_days: Option<u32>,
    pub interest_amount: Option<f64>,
    pub referred_clients_count: Option<u32>,
    pub referral_discount: Option<f64>,
    /// `Some(None)` clears the month token.
    pub referral_discount_month: Option<Option<String>>,
    pub cancelled: Option<bool>,
}

impl Client {
    /// Build a new client with a fresh id and all derived fields computed.
    pub fn new(draft: ClientDraft, today: NaiveDate) -> Self {
        let (days_remaining, status) = status::derive(draft.due_date, today);
        let mut client = Self {
            id: Uuid::new_v4(),
            name: draft.name,
            server: draft.server,
            entry_date: draft.entry_date,
            due_date: draft.due_date,
            amount: draft.amount,
            payment_state: draft.payment_state,
            screens: draft.screens,
            server_unit_cost: draft.server_unit_cost,
            days_remaining,
            status,
            server_cost: 0.0,
            client_profit: 0.0,
            interest_days: 0,
            interest_amount: 0.0,
            referred_clients_count: 0,
            referral_discount: 0.0,
            referral_discount_month: None,
            cancelled: false,
            updated_at: None,
        };
        client.recompute_costs();
        client
    }

    /// Copy of this client under a new id, as used by log recovery.
    pub fn recreate(&self, today: NaiveDate) -> Self {
        let mut client = self.clone();
        client.id = Uuid::new_v4();
        client.updated_at = None;
        client.recompute_costs();
        client.rederive(today);
        client
    }

    /// Recompute `server_cost` and `client_profit`. Zero screens bill as one.
    pub fn recompute_costs(&mut self) {
        self.server_cost = self.server_unit_cost * f64::from(self.screens.max(1));
        self.client_profit = self.amount - self.server_cost;
    }

    /// Recompute `days_remaining` and `status` unless the client is
    /// delinquent, in which case both stay frozen.
    pub fn rederive(&mut self, today: NaiveDate) {
        if self.is_delinquent() {
            return;
        }
        let (days, status) = status::derive(self.due_date, today);
        self.days_remaining = days;
        self.status = status;
    }

    /// Clear the referral discount if it belongs to another month.
    pub fn reset_stale_discount(&mut self, current_month: &str) {
        let stale = self
            .referral_discount_month
            .as_deref()
            .is_some_and(|month| month != current_month);
        if stale {
            self.referral_discount = 0.0;
            self.referral_discount_month = None;
        }
    }

    /// Periodic status pass. Returns `true` if anything changed.
    pub fn refresh_status(&mut self, today: NaiveDate) -> bool {
        let before = self.clone();
        self.rederive(today);
        self.reset_stale_discount(&status::month_token(today));
        *self != before
    }

    /// Merge a partial update, then re-derive every computed field.
    pub fn apply_patch(&mut self, patch: ClientPatch, today: NaiveDate) {
        if let Some(v) = patch.name {
            self.name = v;
        }
        if let Some(v) = patch.server {
            self.server = v;
        }
        if let Some(v) = patch.entry_date {
            self.entry_date = v;
        }
        if let Some(v) = patch.due_date {
            self.due_date = v;
        }
        if let Some(v) = patch.amount {
            self.amount = v;
        }
        if let Some(v) = patch.payment_state {
            self.payment_state = v;
        }
        if let Some(v) = patch.screens {
            self.screens = v;
        }
        if let Some(v) = patch.server_unit_cost {
            self.server_unit_cost = v;
        }
        if let Some(v) = patch.interest_days {
            self.interest_days = v;
        }
        if let Some(v) = patch.interest_amount {
            self.interest_amount = v;
        }
        if let Some(v) = patch.referred_clients_count {
            self.referred_clients_count = v;
        }
        if let Some(v) = patch.referral_discount {
            self.referral_discount = v;
        }
        if let Some(v) = patch.referral_discount_month {
            self.referral_discount_month = v;
        }
        if let Some(v) = patch.cancelled {
            self.cancelled = v;
        }

        self.recompute_costs();
        if !self.is_delinquent() {
            self.interest_days = 0;
            self.interest_amount = 0.0;
        }
        self.rederive(today);
    }

    pub fn is_delinquent(&self) -> bool {
        self.payment_state == PaymentState::Delinquent
    }

    /// Patch that renews the client for another period.
    pub fn renewal_patch(&self) -> ClientPatch {
        let next_due = self
            .due_date
            .checked_add_days(Days::new(RENEWAL_PERIOD_DAYS))
            .unwrap_or(self.due_date);
        ClientPatch {
            due_date: Some(next_due),
            payment_state: Some(PaymentState::Paid),
            referral_discount: Some(0.0),
            referral_discount_month: Some(None),
            ..ClientPatch::default()
        }
    }

    /// Patch that marks the client delinquent with interest for `days` late.
    pub fn interest_patch(&self, days: u32) -> ClientPatch {
        ClientPatch {
            payment_state: Some(PaymentState::Delinquent),
            interest_days: Some(days),
            interest_amount: Some(interest_for(self.amount, days)),
            ..ClientPatch::default()
        }
    }

    /// Patch that credits one referral to this client in `current_month`.
    pub fn referral_patch(&self, current_month: &str, discount: f64) -> ClientPatch {
        let carried = if self.referral_discount_month.as_deref() == Some(current_month) {
            self.referral_discount
        } else {
            0.0
        };
        ClientPatch {
            referred_clients_count: Some(self.referred_clients_count + 1),
            referral_discount: Some(round_to(carried + discount, 2)),
            referral_discount_month: Some(Some(current_month.to_string())),
            ..ClientPatch::default()
        }
    }
}

/// Interest owed for `days` late: the daily rate is rounded to four places
/// and the total to two.
pub fn interest_for(amount: f64, days: u32) -> f64 {
    let daily = round_to(amount / INTEREST_BASIS_DAYS, 4);
    round_to(daily * f64::from(days), 2)
}

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

impl Record for Client {
    const COLLECTION: Collection = Collection::Clients;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }

    fn on_pulled(&mut self, today: NaiveDate) {
        self.refresh_status(today);
    }
}

impl Audited for Client {
    fn tracked_fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", json!(self.name)),
            ("server", json!(self.server)),
            ("entryDate", json!(self.entry_date)),
            ("dueDate", json!(self.due_date)),
            ("amount", json!(self.amount)),
            ("paymentState", json!(self.payment_state)),
            ("screens", json!(self.screens)),
            ("serverUnitCost", json!(self.server_unit_cost)),
            ("interestDays", json!(self.interest_days)),
            ("interestAmount", json!(self.interest_amount)),
            ("referredClientsCount", json!(self.referred_clients_count)),
            ("referralDiscount", json!(self.referral_discount)),
            ("referralDiscountMonth", json!(self.referral_discount_month)),
            ("cancelled", json!(self.cancelled)),
        ]
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A hosting server clients are billed against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    /// Cost per client hosted on this server.
    pub base_cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerDraft {
    pub name: String,
    pub base_cost: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerPatch {
    pub name: Option<String>,
    pub base_cost: Option<f64>,
}

impl Server {
    pub fn new(draft: ServerDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: draft.name,
            base_cost: draft.base_cost,
            updated_at: None,
        }
    }

    pub fn apply_patch(&mut self, patch: ServerPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(cost) = patch.base_cost {
            self.base_cost = cost;
        }
    }

    pub fn recreate(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            updated_at: None,
            ..self.clone()
        }
    }
}

impl Record for Server {
    const COLLECTION: Collection = Collection::Servers;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }
}

impl Audited for Server {
    fn tracked_fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", json!(self.name)),
            ("baseCost", json!(self.base_cost)),
        ]
    }
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Full copy of an entity, kept by logs that may need to reverse a change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "entity", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntitySnapshot {
    Client(Client),
    Server(Server),
}

impl EntitySnapshot {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Client(c) => c.id,
            Self::Server(s) => s.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Client(_) => EntityKind::Client,
            Self::Server(_) => EntityKind::Server,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<EntitySnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
    /// For RESTORE logs: the DELETE log the entity was recovered from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_from: Option<Uuid>,
    /// Free-form extras (interest days, referral ids, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Immutable record of one mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub entity: EntityKind,
    pub entity_id: Uuid,
    pub description: String,
    #[serde(default)]
    pub payload: LogPayload,
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub recovered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LogEntry {
    pub fn new(
        kind: LogKind,
        entity: EntityKind,
        entity_id: Uuid,
        description: impl Into<String>,
        payload: LogPayload,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: now,
            kind,
            entity,
            entity_id,
            description: description.into(),
            payload,
            synced: false,
            recovered: false,
            updated_at: None,
        }
    }

    /// A DELETE log with a snapshot that has not been used yet.
    pub fn is_recoverable(&self) -> bool {
        self.kind == LogKind::Delete && self.payload.snapshot.is_some() && !self.recovered
    }
}

impl Record for LogEntry {
    const COLLECTION: Collection = Collection::Logs;

    fn id(&self) -> Uuid {
        self.id
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }

    // Anything read back from the replica has, by definition, been pushed.
    fn on_pulled(&mut self, _today: NaiveDate) {
        self.synced = true;
    }

    // Pushing a log the replica already holds would overwrite flags set
    // there by another device.
    fn needs_push(&self) -> bool {
        !self.synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::diff;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn draft() -> ClientDraft {
        ClientDraft {
            name: "Ana".into(),
            server: "alpha".into(),
            entry_date: d("2024-05-01"),
            due_date: d("2024-06-20"),
            amount: 35.0,
            payment_state: PaymentState::Pending,
            screens: 2,
            server_unit_cost: 8.5,
        }
    }

    #[test]
    fn new_client_derives_everything() {
        let c = Client::new(draft(), d("2024-06-15"));
        assert_eq!(c.days_remaining, 5);
        assert_eq!(c.status, DueStatus::DueSoon);
        assert_eq!(c.server_cost, 17.0);
        assert_eq!(c.client_profit, 18.0);
    }

    #[test]
    fn zero_screens_bill_as_one() {
        let mut dr = draft();
        dr.screens = 0;
        let c = Client::new(dr, d("2024-06-15"));
        assert_eq!(c.server_cost, 8.5);
    }

    #[test]
    fn stale_referral_discount_resets() {
        let mut c = Client::new(draft(), d("2024-06-15"));
        c.referral_discount = 40.0;
        c.referral_discount_month = Some("2024-05".into());

        assert!(c.refresh_status(d("2024-06-15")));
        assert_eq!(c.referral_discount, 0.0);
        assert_eq!(c.referral_discount_month, None);
    }

    #[test]
    fn current_referral_discount_is_kept() {
        let mut c = Client::new(draft(), d("2024-06-15"));
        c.referral_discount = 20.0;
        c.referral_discount_month = Some("2024-06".into());

        c.refresh_status(d("2024-06-16"));
        assert_eq!(c.referral_discount, 20.0);
    }

    #[test]
    fn delinquent_status_is_frozen() {
        let mut c = Client::new(draft(), d("2024-06-15"));
        c.apply_patch(c.interest_patch(3), d("2024-06-15"));
        let frozen = (c.days_remaining, c.status);

        assert!(!c.refresh_status(d("2024-07-30")));
        assert_eq!((c.days_remaining, c.status), frozen);
    }

    #[test]
    fn interest_uses_rounded_daily_rate() {
        // 35 / 30 = 1.16666.. -> 1.1667 per day
        assert_eq!(interest_for(35.0, 3), 3.5);
        assert_eq!(interest_for(50.0, 7), 11.67);
        assert_eq!(interest_for(0.0, 10), 0.0);
    }

    #[test]
    fn leaving_delinquency_clears_interest() {
        let today = d("2024-06-15");
        let mut c = Client::new(draft(), today);
        c.apply_patch(c.interest_patch(4), today);
        assert_eq!(c.interest_days, 4);

        c.apply_patch(
            ClientPatch {
                payment_state: Some(PaymentState::Paid),
                ..Default::default()
            },
            today,
        );
        assert_eq!(c.interest_days, 0);
        assert_eq!(c.interest_amount, 0.0);
    }

    #[test]
    fn renewal_moves_due_date_and_clears_discount() {
        let today = d("2024-06-15");
        let mut c = Client::new(draft(), today);
        c.referral_discount = 20.0;
        c.referral_discount_month = Some("2024-06".into());

        c.apply_patch(c.renewal_patch(), today);
        assert_eq!(c.due_date, d("2024-07-20"));
        assert_eq!(c.payment_state, PaymentState::Paid);
        assert_eq!(c.referral_discount, 0.0);
        assert_eq!(c.days_remaining, 35);
        assert_eq!(c.status, DueStatus::Current);
    }

    #[test]
    fn referrals_accumulate_within_a_month() {
        let today = d("2024-06-15");
        let mut c = Client::new(draft(), today);
        c.apply_patch(c.referral_patch("2024-06", 20.0), today);
        c.apply_patch(c.referral_patch("2024-06", 20.0), today);
        assert_eq!(c.referred_clients_count, 2);
        assert_eq!(c.referral_discount, 40.0);

        c.apply_patch(c.referral_patch("2024-07", 20.0), today);
        assert_eq!(c.referred_clients_count, 3);
        assert_eq!(c.referral_discount, 20.0);
    }

    #[test]
    fn diff_reports_only_tracked_changes() {
        let today = d("2024-06-15");
        let before = Client::new(draft(), today);
        let mut after = before.clone();
        after.apply_patch(
            ClientPatch {
                amount: Some(40.0),
                ..Default::default()
            },
            today,
        );

        let changes = diff(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "amount");
        assert_eq!(changes[0].old_value, json!(35.0));
        assert_eq!(changes[0].new_value, json!(40.0));
    }

    #[test]
    fn diff_compares_by_value() {
        let before = Server::new(ServerDraft {
            name: "alpha".into(),
            base_cost: 10.0,
        });
        let mut after = before.clone();
        after.name = String::from("alp") + "ha";
        assert!(diff(&before, &after).is_empty());
    }

    #[test]
    fn recreate_keeps_everything_but_id() {
        let today = d("2024-06-15");
        let c = Client::new(draft(), today);
        let copy = c.recreate(today);
        assert_ne!(copy.id, c.id);
        assert_eq!(Client { id: c.id, ..copy }, c);
    }

    #[test]
    fn client_json_uses_camel_case() {
        let c = Client::new(draft(), d("2024-06-15"));
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["dueDate"], json!("2024-06-20"));
        assert_eq!(v["paymentState"], json!("PENDING"));
        assert_eq!(v["status"], json!("DUE_SOON"));
        assert!(v.get("updatedAt").is_none());
    }

    #[test]
    fn pulled_logs_count_as_synced() {
        let mut log = LogEntry::new(
            LogKind::Create,
            EntityKind::Server,
            Uuid::new_v4(),
            "created",
            LogPayload::default(),
            Utc::now(),
        );
        log.on_pulled(d("2024-06-15"));
        assert!(log.synced);
    }
}

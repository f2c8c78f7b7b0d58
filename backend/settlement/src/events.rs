//! Audit events written alongside every ledger mutation.
//!
//! Rows are append-only; each names the project it concerns and, where
//! relevant, the investment and its investor.

use serde::{Deserialize, Serialize};
use vcoin_core::{Investment, ProjectId, ProjectStatus};

/// All recognised audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A project was published.
    ProjectCreated,
    /// A pending investment was recorded.
    InvestmentRecorded,
    /// A pending investment settled.
    InvestmentCompleted,
    /// A pending investment failed.
    InvestmentFailed,
    /// A compensating record reversed a completed investment.
    InvestmentReversed,
    /// The project's status moved (derived or explicit).
    StatusChanged,
    /// The resolver's allocations were persisted.
    ProjectResolved,
    /// A due project could not be resolved this tick.
    ResolutionDeferred,
}

impl EventKind {
    /// Return a short identifier string suitable for storage in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectCreated => "project_created",
            Self::InvestmentRecorded => "investment_recorded",
            Self::InvestmentCompleted => "investment_completed",
            Self::InvestmentFailed => "investment_failed",
            Self::InvestmentReversed => "investment_reversed",
            Self::StatusChanged => "status_changed",
            Self::ProjectResolved => "project_resolved",
            Self::ResolutionDeferred => "resolution_deferred",
        }
    }
}

/// An audit event ready to be stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_type: String,
    pub project_id: i64,
    pub investment_id: Option<i64>,
    pub actor: Option<String>,
    pub amount: Option<String>,
    pub detail: Option<String>,
    pub timestamp: i64,
}

impl LedgerEvent {
    pub fn new(kind: EventKind, project_id: ProjectId, timestamp: i64) -> Self {
        Self {
            event_type: kind.as_str().to_string(),
            project_id: project_id as i64,
            investment_id: None,
            actor: None,
            amount: None,
            detail: None,
            timestamp,
        }
    }

    /// Event about one investment; `amount` reads `"<cash>/<token>"`.
    pub fn for_investment(kind: EventKind, investment: &Investment, timestamp: i64) -> Self {
        Self {
            investment_id: Some(investment.id as i64),
            actor: Some(investment.investor.clone()),
            amount: Some(format!(
                "{}/{}",
                investment.amount_cash, investment.amount_token
            )),
            ..Self::new(kind, investment.project_id, timestamp)
        }
    }

    pub fn status_changed(project_id: ProjectId, to: ProjectStatus, timestamp: i64) -> Self {
        Self::new(EventKind::StatusChanged, project_id, timestamp).with_detail(to.as_str())
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// An audit event as stored in / read from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventRecord {
    pub id: i64,
    pub event_type: String,
    pub project_id: i64,
    pub investment_id: Option<i64>,
    pub actor: Option<String>,
    pub amount: Option<String>,
    pub detail: Option<String>,
    pub timestamp: i64,
    pub created_at: i64,
}

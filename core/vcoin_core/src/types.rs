//! # Types
//!
//! Shared data structures used across the ledger and the resolver.
//!
//! ## Design decisions
//!
//! ### Config / State split
//!
//! A `Project` is two halves:
//!
//! - [`ProjectConfig`]: fixed when the project is published, including the
//!   baseline token price. Never mutated afterwards.
//! - [`ProjectState`]: raised totals and status, updated on every settled
//!   investment.
//!
//! ### Status as a Finite-State Machine
//!
//! [`ProjectStatus`] follows a forward-only lifecycle, except for the
//! derived `Funding`/`Funded` pair which a reversal can walk back:
//!
//! ```text
//! Funding ◄─► Funded ──► Closed ──► Resolved
//!     └────────────────────►┘
//!     └──► Cancelled ◄──┘
//! ```
//!
//! ### Immutable investments
//!
//! An [`Investment`] never changes its amounts. Corrections are new
//! compensating records with negated amounts pointing at the original
//! through `reverses`.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::amount::{i128_string, CapMultiplier, Price};
use crate::Error;

pub type ProjectId = u64;
pub type InvestmentId = u64;

/// Policy applied to the token surplus at close.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OversubscriptionRule {
    /// Scale every token commitment down to the baseline value.
    ProRata,
    /// Honour commitments up to a ceiling; refund the rest.
    Cap,
    /// Same ceiling as `Cap`; the excess becomes perk credit.
    Perks,
}

impl OversubscriptionRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProRata => "pro-rata",
            Self::Cap => "cap",
            Self::Perks => "perks",
        }
    }

    /// `true` for the rules that need a cap multiplier.
    pub fn uses_cap(&self) -> bool {
        matches!(self, Self::Cap | Self::Perks)
    }
}

impl FromStr for OversubscriptionRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "pro-rata" => Ok(Self::ProRata),
            "cap" => Ok(Self::Cap),
            "perks" => Ok(Self::Perks),
            other => Err(Error::UnknownRule(other.to_string())),
        }
    }
}

impl fmt::Display for OversubscriptionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a project.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Accepting investments.
    Funding,
    /// Every non-zero goal is met; still accepting.
    Funded,
    /// Admission window shut; awaiting resolution.
    Closed,
    /// Oversubscription resolved; terminal.
    Resolved,
    /// Withdrawn before close; terminal.
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Funding => "funding",
            Self::Funded => "funded",
            Self::Closed => "closed",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether new investments may be admitted.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Funding | Self::Funded)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Cancelled)
    }
}

impl FromStr for ProjectStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "funding" => Ok(Self::Funding),
            "funded" => Ok(Self::Funded),
            "closed" => Ok(Self::Closed),
            "resolved" => Ok(Self::Resolved),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::InvariantViolation(format!(
                "unknown project status `{other}`"
            ))),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement status of an investment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Pending,
    Completed,
    Failed,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for InvestmentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvariantViolation(format!(
                "unknown investment status `{other}`"
            ))),
        }
    }
}

impl fmt::Display for InvestmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two legs of a hybrid commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    Cash,
    Token,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cash => "cash",
            Self::Token => "token",
        })
    }
}

/// Immutable project configuration, fixed at publication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Opaque identifier of the founder.
    pub founder: String,
    /// Cash target in minor units.
    #[serde(with = "i128_string")]
    pub goal_cash: i128,
    /// Token target in base units.
    #[serde(with = "i128_string")]
    pub goal_token: i128,
    #[serde(with = "i128_string")]
    pub min_ticket_cash: i128,
    #[serde(with = "i128_string")]
    pub min_ticket_token: i128,
    /// Whether one commitment may carry both cash and token.
    pub accepts_mix: bool,
    pub rule: OversubscriptionRule,
    /// Required by `cap` and `perks`.
    pub cap_multiplier: Option<CapMultiplier>,
    /// Token price in effect when the goals were fixed.
    pub baseline_price: Price,
    /// Unix timestamp (seconds) at which the admission window shuts.
    pub closes_at: i64,
}

/// Mutable project state, updated as investments settle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(with = "i128_string")]
    pub raised_cash: i128,
    #[serde(with = "i128_string")]
    pub raised_token: i128,
    /// Completed investments that have not been reversed.
    pub investment_count: u32,
    pub status: ProjectStatus,
}

impl ProjectState {
    pub fn new() -> Self {
        ProjectState {
            raised_cash: 0,
            raised_token: 0,
            investment_count: 0,
            status: ProjectStatus::Funding,
        }
    }
}

impl Default for ProjectState {
    fn default() -> Self {
        Self::new()
    }
}

/// A funding project: its fixed configuration plus its running state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    #[serde(flatten)]
    pub config: ProjectConfig,
    #[serde(flatten)]
    pub state: ProjectState,
}

/// A single commitment of cash and/or tokens by one investor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub project_id: ProjectId,
    pub investor: String,
    #[serde(with = "i128_string")]
    pub amount_cash: i128,
    #[serde(with = "i128_string")]
    pub amount_token: i128,
    pub status: InvestmentStatus,
    pub created_at: i64,
    pub settled_at: Option<i64>,
    /// External payment or chain transaction reference.
    pub tx_ref: Option<String>,
    /// Set on compensating records: the investment being reversed.
    pub reverses: Option<InvestmentId>,
}

impl Investment {
    pub fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }
}

/// An observed token price at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationSnapshot {
    pub price: Price,
    pub observed_at: i64,
}

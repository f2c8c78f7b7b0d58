//! # VCoin Allocation Core
//!
//! Pure domain logic of the VCoin hybrid cash + token funding platform.
//! Nothing in this crate performs I/O; every function is deterministic in its
//! inputs so settlement results can be re-derived for audits.
//!
//! | Concern                 | Module / entry point(s)                          |
//! |-------------------------|--------------------------------------------------|
//! | Fixed-point quantities  | [`amount`]: [`Price`], [`Value`], [`CapMultiplier`] |
//! | Project & investments   | [`types`]                                        |
//! | Dual-ledger bookkeeping | [`ledger`]: `Project::open`, `Investment::pending`, `Project::apply_settled` |
//! | Surplus resolution      | [`resolver::resolve`]                            |
//! | Price what-ifs          | [`simulator::simulate`]                          |
//!
//! ## Architecture
//!
//! The ledger folds settled investments into a project's raised totals and
//! derives its `Funding`/`Funded` status. At close, a caller takes one
//! [`ValuationSnapshot`] and hands the project and its investments to the
//! resolver, which decides every investment's accepted token amount and its
//! refund or perk credit. Persisting that decision is the caller's job.

pub mod amount;
pub mod ledger;
pub mod resolver;
pub mod simulator;
pub mod types;

#[cfg(test)]
mod test_ledger;
#[cfg(test)]
mod test_resolver;

use thiserror::Error;

pub use amount::{CapMultiplier, Price, Value, TOKEN_UNIT};
pub use ledger::FundingProgress;
pub use resolver::{resolve, Allocation, Outcome, Resolution, ResolverConfig};
pub use simulator::{simulate, SimulationPoint};
pub use types::{
    Currency, Investment, InvestmentId, InvestmentStatus, OversubscriptionRule, Project,
    ProjectConfig, ProjectId, ProjectState, ProjectStatus, ValuationSnapshot,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid valuation: token price must be positive, got {price}")]
    InvalidValuation { price: Price },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("unknown oversubscription rule `{0}`")]
    UnknownRule(String),

    #[error("rule `{0}` requires a cap multiplier")]
    MissingCapMultiplier(OversubscriptionRule),

    #[error("cap multiplier must be a decimal of at least 1.00, got `{0}`")]
    InvalidCapMultiplier(String),

    #[error("invalid price `{0}`")]
    InvalidPrice(String),

    #[error("invalid goal: {0}")]
    InvalidGoal(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("project {0} is not accepting investments")]
    ProjectNotOpen(ProjectId),

    #[error("project does not accept {0} contributions")]
    CurrencyNotAccepted(Currency),

    #[error("project does not accept mixed cash and token contributions")]
    MixNotAccepted,

    #[error("{currency} amount {amount} is below the minimum ticket of {minimum}")]
    BelowMinimumTicket {
        currency: Currency,
        amount: i128,
        minimum: i128,
    },

    #[error("investment {id} cannot move from {from} to {to}")]
    InvalidInvestmentTransition {
        id: InvestmentId,
        from: InvestmentStatus,
        to: InvestmentStatus,
    },

    #[error("project {id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        id: ProjectId,
        from: ProjectStatus,
        to: ProjectStatus,
    },

    #[error("investment {0} cannot be reversed")]
    NotReversible(InvestmentId),

    #[error("investment {0} is still pending")]
    PendingInvestment(InvestmentId),

    #[error("arithmetic overflow")]
    ArithmeticOverflow,
}

impl Error {
    /// Stable numeric code recorded alongside audit events.
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidValuation { .. } => 1,
            Self::InvariantViolation(_) => 2,
            Self::UnknownRule(_) => 3,
            Self::MissingCapMultiplier(_) => 4,
            Self::InvalidCapMultiplier(_) => 5,
            Self::InvalidPrice(_) => 6,
            Self::InvalidGoal(_) => 7,
            Self::InvalidAmount(_) => 8,
            Self::ProjectNotOpen(_) => 9,
            Self::CurrencyNotAccepted(_) => 10,
            Self::MixNotAccepted => 11,
            Self::BelowMinimumTicket { .. } => 12,
            Self::InvalidInvestmentTransition { .. } => 13,
            Self::InvalidStatusTransition { .. } => 14,
            Self::NotReversible(_) => 15,
            Self::PendingInvestment(_) => 16,
            Self::ArithmeticOverflow => 17,
        }
    }

    /// Configuration and input errors, as opposed to state conflicts.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidValuation { .. }
                | Self::UnknownRule(_)
                | Self::MissingCapMultiplier(_)
                | Self::InvalidCapMultiplier(_)
                | Self::InvalidPrice(_)
                | Self::InvalidGoal(_)
                | Self::InvalidAmount(_)
                | Self::CurrencyNotAccepted(_)
                | Self::MixNotAccepted
                | Self::BelowMinimumTicket { .. }
        )
    }
}

pub type Result<T> = core::result::Result<T, Error>;

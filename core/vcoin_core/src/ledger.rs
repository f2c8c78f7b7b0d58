//! # Ledger
//!
//! Dual-ledger bookkeeping: every investment is recorded against both the
//! cash goal and the token goal of its project.
//!
//! | Step      | Operation                         | Effect                               |
//! |-----------|-----------------------------------|--------------------------------------|
//! | Publish   | [`Project::open`]                 | validated config, `Funding`, zeros   |
//! | Commit    | [`Investment::pending`]           | admission checks, `pending` record   |
//! | Settle    | `complete` / `fail`               | one-way status change                |
//! | Fold      | [`Project::apply_settled`]        | raised totals, derived status        |
//! | Correct   | [`Investment::reversal`]          | compensating record                  |
//!
//! Only completed investments count toward the raised totals.

use serde::{Deserialize, Serialize};

use crate::amount::{checked_add, mul_div_rem, BPS_SCALE};
use crate::types::{
    Currency, Investment, InvestmentId, InvestmentStatus, Project, ProjectConfig, ProjectId,
    ProjectState, ProjectStatus,
};
use crate::{Error, Result};

impl ProjectConfig {
    /// Check the goal, ticket, valuation and rule invariants.
    pub fn validate(&self) -> Result<()> {
        if self.goal_cash < 0 || self.goal_token < 0 {
            return Err(Error::InvalidGoal("goals must not be negative".into()));
        }
        if self.goal_cash == 0 && self.goal_token == 0 {
            return Err(Error::InvalidGoal(
                "at least one of the cash and token goals must be positive".into(),
            ));
        }
        if self.min_ticket_cash < 0 || self.min_ticket_token < 0 {
            return Err(Error::InvalidAmount(
                "minimum tickets must not be negative".into(),
            ));
        }
        if self.goal_token > 0 && !self.baseline_price.is_positive() {
            return Err(Error::InvalidValuation {
                price: self.baseline_price,
            });
        }
        if self.rule.uses_cap() && self.cap_multiplier.is_none() {
            return Err(Error::MissingCapMultiplier(self.rule));
        }
        Ok(())
    }

    /// Every non-zero goal is met by the given totals.
    pub fn goals_met(&self, raised_cash: i128, raised_token: i128) -> bool {
        (self.goal_cash == 0 || raised_cash >= self.goal_cash)
            && (self.goal_token == 0 || raised_token >= self.goal_token)
    }
}

/// Progress against each goal in basis points; `None` when the goal is zero.
/// Values above `10_000` mean the goal is oversubscribed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingProgress {
    pub cash_bps: Option<u64>,
    pub token_bps: Option<u64>,
}

impl Project {
    /// Publish a project: validated configuration, empty ledger, `Funding`.
    pub fn open(id: ProjectId, config: ProjectConfig) -> Result<Project> {
        config.validate()?;
        Ok(Project {
            id,
            config,
            state: ProjectState::new(),
        })
    }

    /// Admission checks for a new commitment of `cash` and `token`.
    pub fn check_commitment(&self, cash: i128, token: i128) -> Result<()> {
        if !self.state.status.is_open() {
            return Err(Error::ProjectNotOpen(self.id));
        }
        if cash < 0 || token < 0 {
            return Err(Error::InvalidAmount("amounts must not be negative".into()));
        }
        if cash == 0 && token == 0 {
            return Err(Error::InvalidAmount(
                "a commitment needs a cash or token amount".into(),
            ));
        }
        if cash > 0 && self.config.goal_cash == 0 {
            return Err(Error::CurrencyNotAccepted(Currency::Cash));
        }
        if token > 0 && self.config.goal_token == 0 {
            return Err(Error::CurrencyNotAccepted(Currency::Token));
        }
        if cash > 0 && token > 0 && !self.config.accepts_mix {
            return Err(Error::MixNotAccepted);
        }
        if cash > 0 && cash < self.config.min_ticket_cash {
            return Err(Error::BelowMinimumTicket {
                currency: Currency::Cash,
                amount: cash,
                minimum: self.config.min_ticket_cash,
            });
        }
        if token > 0 && token < self.config.min_ticket_token {
            return Err(Error::BelowMinimumTicket {
                currency: Currency::Token,
                amount: token,
                minimum: self.config.min_ticket_token,
            });
        }
        Ok(())
    }

    /// Fold a completed investment (or compensating record) into the raised
    /// totals and re-derive `Funding`/`Funded`.
    ///
    /// Returns the new status when the derived status changed.
    pub fn apply_settled(&mut self, investment: &Investment) -> Result<Option<ProjectStatus>> {
        if investment.project_id != self.id {
            return Err(Error::InvariantViolation(format!(
                "investment {} belongs to project {}, not {}",
                investment.id, investment.project_id, self.id
            )));
        }
        if investment.status != InvestmentStatus::Completed {
            return Err(Error::InvariantViolation(format!(
                "investment {} is {}, only completed investments settle",
                investment.id, investment.status
            )));
        }
        if self.state.status.is_terminal() {
            return Err(Error::ProjectNotOpen(self.id));
        }

        let raised_cash = checked_add(self.state.raised_cash, investment.amount_cash)?;
        let raised_token = checked_add(self.state.raised_token, investment.amount_token)?;
        if raised_cash < 0 || raised_token < 0 {
            return Err(Error::InvariantViolation(format!(
                "settling investment {} would make project {} totals negative",
                investment.id, self.id
            )));
        }

        self.state.raised_cash = raised_cash;
        self.state.raised_token = raised_token;
        self.state.investment_count = if investment.is_reversal() {
            self.state.investment_count.saturating_sub(1)
        } else {
            self.state.investment_count.saturating_add(1)
        };

        if !self.state.status.is_open() {
            return Ok(None);
        }
        let derived = if self.config.goals_met(raised_cash, raised_token) {
            ProjectStatus::Funded
        } else {
            ProjectStatus::Funding
        };
        if derived == self.state.status {
            return Ok(None);
        }
        self.state.status = derived;
        Ok(Some(derived))
    }

    /// Move to `to`, enforcing the lifecycle.
    pub fn transition(&mut self, to: ProjectStatus) -> Result<()> {
        use ProjectStatus::*;

        let from = self.state.status;
        let valid = matches!(
            (from, to),
            (Funding, Funded)
                | (Funded, Funding)
                | (Funding, Closed)
                | (Funded, Closed)
                | (Closed, Resolved)
                | (Funding, Cancelled)
                | (Funded, Cancelled)
        );
        if !valid {
            return Err(Error::InvalidStatusTransition {
                id: self.id,
                from,
                to,
            });
        }
        self.state.status = to;
        Ok(())
    }

    pub fn funding_progress(&self) -> Result<FundingProgress> {
        Ok(FundingProgress {
            cash_bps: progress_bps(self.state.raised_cash, self.config.goal_cash)?,
            token_bps: progress_bps(self.state.raised_token, self.config.goal_token)?,
        })
    }
}

fn progress_bps(raised: i128, goal: i128) -> Result<Option<u64>> {
    if goal == 0 {
        return Ok(None);
    }
    let (bps, _) = mul_div_rem(raised.max(0), BPS_SCALE as i128, goal)?;
    Ok(Some(u64::try_from(bps).unwrap_or(u64::MAX)))
}

impl Investment {
    /// Record a new commitment after the project's admission checks.
    pub fn pending(
        id: InvestmentId,
        project: &Project,
        investor: impl Into<String>,
        amount_cash: i128,
        amount_token: i128,
        created_at: i64,
    ) -> Result<Investment> {
        project.check_commitment(amount_cash, amount_token)?;
        Ok(Investment {
            id,
            project_id: project.id,
            investor: investor.into(),
            amount_cash,
            amount_token,
            status: InvestmentStatus::Pending,
            created_at,
            settled_at: None,
            tx_ref: None,
            reverses: None,
        })
    }

    /// `pending → completed`.
    pub fn complete(&mut self, settled_at: i64, tx_ref: Option<String>) -> Result<()> {
        self.settle(InvestmentStatus::Completed, settled_at)?;
        self.tx_ref = tx_ref;
        Ok(())
    }

    /// `pending → failed`.
    pub fn fail(&mut self, settled_at: i64) -> Result<()> {
        self.settle(InvestmentStatus::Failed, settled_at)
    }

    fn settle(&mut self, to: InvestmentStatus, settled_at: i64) -> Result<()> {
        if self.status != InvestmentStatus::Pending {
            return Err(Error::InvalidInvestmentTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.settled_at = Some(settled_at);
        Ok(())
    }

    /// Compensating record for a completed investment: negated amounts,
    /// already completed, pointing back through `reverses`.
    ///
    /// Whether `original` was already reversed is the caller's to check
    /// against its records; the resolver rejects double reversals.
    pub fn reversal(id: InvestmentId, original: &Investment, at: i64) -> Result<Investment> {
        if original.status != InvestmentStatus::Completed || original.is_reversal() {
            return Err(Error::NotReversible(original.id));
        }
        Ok(Investment {
            id,
            project_id: original.project_id,
            investor: original.investor.clone(),
            amount_cash: -original.amount_cash,
            amount_token: -original.amount_token,
            status: InvestmentStatus::Completed,
            created_at: at,
            settled_at: Some(at),
            tx_ref: None,
            reverses: Some(original.id),
        })
    }
}

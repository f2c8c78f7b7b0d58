//! # Oversubscription Resolver
//!
//! Decides, once per project at close, how many committed token units each
//! investment keeps when the token goal's value has risen above its baseline.
//!
//! ```text
//! baseline_value = goal_token * baseline_price
//! closing_value  = goal_token * closing_price
//! surplus        = closing_value - baseline_value
//! ```
//!
//! A non-positive surplus changes nothing. Otherwise the rule sets a ceiling
//! (the baseline value for `pro-rata`, the baseline value times the cap
//! multiplier for `cap` and `perks`) and the accepted total becomes
//! `min(committed, floor(ceiling / closing_price))`:
//!
//! - `pro-rata` scales every commitment by the same factor.
//! - `cap` water-fills: commitments up to a common level are honoured, larger
//!   ones are cut to that level and the cut is refunded.
//! - `perks` cuts like `cap` but converts the cut into perk credit worth the
//!   cut units at the closing price.
//!
//! Integer division floors; units lost to flooring are handed out one base
//! unit at a time (largest remainder first, then lowest investment id) so the
//! accepted total hits its target exactly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::amount::{
    checked_add, checked_mul, i128_string, mul_div_rem, CapMultiplier, Price, Value, BPS_SCALE,
};
use crate::types::{
    Investment, InvestmentId, InvestmentStatus, OversubscriptionRule, Project, ProjectConfig,
    ProjectId, ValuationSnapshot,
};
use crate::{Error, Result};

/// Rule plus its parameter, validated together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolverConfig {
    rule: OversubscriptionRule,
    cap_multiplier: Option<CapMultiplier>,
}

impl ResolverConfig {
    /// `cap` and `perks` require a multiplier; `pro-rata` ignores it.
    pub fn new(rule: OversubscriptionRule, cap_multiplier: Option<CapMultiplier>) -> Result<Self> {
        if !rule.uses_cap() {
            return Ok(ResolverConfig {
                rule,
                cap_multiplier: None,
            });
        }
        match cap_multiplier {
            Some(multiplier) => Ok(ResolverConfig {
                rule,
                cap_multiplier: Some(multiplier),
            }),
            None => Err(Error::MissingCapMultiplier(rule)),
        }
    }

    pub fn for_project(config: &ProjectConfig) -> Result<Self> {
        Self::new(config.rule, config.cap_multiplier)
    }

    pub fn rule(&self) -> OversubscriptionRule {
        self.rule
    }

    /// Ceiling on the accepted token value.
    fn ceiling(&self, baseline_value: Value) -> Result<Value> {
        match self.cap_multiplier {
            Some(multiplier) => baseline_value.scale(multiplier),
            None => Ok(baseline_value),
        }
    }

    /// Ceiling expressed in token units at `closing_price`, floored.
    fn ceiling_units(&self, baseline_value: Value, closing_price: Price) -> Result<i128> {
        let (units, _) = match self.cap_multiplier {
            Some(multiplier) => mul_div_rem(
                baseline_value.raw(),
                multiplier.bps() as i128,
                checked_mul(closing_price.raw(), BPS_SCALE as i128)?,
            )?,
            None => mul_div_rem(baseline_value.raw(), 1, closing_price.raw())?,
        };
        Ok(units)
    }
}

/// How the resolver treated the project.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// No token goal, so nothing to resolve.
    NothingToResolve,
    /// Closing value at or below baseline.
    NoSurplus,
    /// Surplus exists but every commitment fits under the ceiling.
    WithinCeiling,
    /// Commitments were cut.
    Adjusted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NothingToResolve => "nothing_to_resolve",
            Self::NoSurplus => "no_surplus",
            Self::WithinCeiling => "within_ceiling",
            Self::Adjusted => "adjusted",
        }
    }
}

/// Final decision for one investment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub investment_id: InvestmentId,
    pub investor: String,
    /// Net cash committed; never adjusted.
    #[serde(with = "i128_string")]
    pub amount_cash: i128,
    /// Net token units committed, reversals included.
    #[serde(with = "i128_string")]
    pub committed_token: i128,
    #[serde(with = "i128_string")]
    pub accepted_token: i128,
    /// Units handed back to the investor (`pro-rata`, `cap`).
    #[serde(with = "i128_string")]
    pub refunded_token: i128,
    /// Value of the units converted to perk credit (`perks`).
    pub perk_credit: Value,
}

impl Allocation {
    /// Units not accepted, whether refunded or converted.
    pub fn released_token(&self) -> i128 {
        self.committed_token - self.accepted_token
    }
}

/// Deterministic allocation decision for one project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub project_id: ProjectId,
    pub rule: OversubscriptionRule,
    pub outcome: Outcome,
    pub baseline_price: Price,
    pub closing_price: Price,
    pub observed_at: i64,
    pub baseline_value: Value,
    pub closing_value: Value,
    /// Negative for a shortfall, which is left unresolved.
    pub surplus: Value,
    /// Only set once a surplus triggered the rule.
    pub ceiling_value: Option<Value>,
    #[serde(with = "i128_string")]
    pub committed_units: i128,
    #[serde(with = "i128_string")]
    pub target_units: i128,
    /// Units handed out by the largest-remainder pass.
    #[serde(with = "i128_string")]
    pub distributed_remainder: i128,
    /// One entry per completed, non-reversal investment, by id.
    pub allocations: Vec<Allocation>,
}

impl Resolution {
    pub fn total_accepted(&self) -> i128 {
        self.allocations.iter().map(|a| a.accepted_token).sum()
    }

    pub fn total_refunded(&self) -> i128 {
        self.allocations.iter().map(|a| a.refunded_token).sum()
    }

    pub fn total_perk_credit(&self) -> Value {
        Value::from_raw(self.allocations.iter().map(|a| a.perk_credit.raw()).sum())
    }

    /// Investments that lost part of their commitment.
    pub fn overshoot_count(&self) -> usize {
        self.allocations
            .iter()
            .filter(|a| a.accepted_token < a.committed_token)
            .count()
    }

    pub fn is_adjusted(&self) -> bool {
        self.outcome == Outcome::Adjusted
    }
}

/// Net commitment of one forward investment after its reversal, if any.
#[derive(Clone, Debug)]
struct Commitment {
    id: InvestmentId,
    investor: String,
    cash: i128,
    token: i128,
}

/// Resolve `project` at `snapshot` over its enumerated `investments`.
///
/// `pending` investments are refused, `failed` ones ignored, and reversals
/// netted into the investment they reverse. The netted token total must equal
/// the project's recorded `raised_token`.
pub fn resolve(
    project: &Project,
    snapshot: &ValuationSnapshot,
    investments: &[Investment],
) -> Result<Resolution> {
    let config = ResolverConfig::for_project(&project.config)?;
    let commitments = net_commitments(project.id, investments)?;

    let committed = commitments
        .iter()
        .try_fold(0i128, |acc, c| checked_add(acc, c.token))?;
    if committed != project.state.raised_token {
        return Err(Error::InvariantViolation(format!(
            "project {} records {} token units raised but its investments sum to {}",
            project.id, project.state.raised_token, committed
        )));
    }

    let mut resolution = Resolution {
        project_id: project.id,
        rule: config.rule(),
        outcome: Outcome::NothingToResolve,
        baseline_price: project.config.baseline_price,
        closing_price: snapshot.price,
        observed_at: snapshot.observed_at,
        baseline_value: Value::ZERO,
        closing_value: Value::ZERO,
        surplus: Value::ZERO,
        ceiling_value: None,
        committed_units: committed,
        target_units: committed,
        distributed_remainder: 0,
        allocations: Vec::new(),
    };

    let goal = project.config.goal_token;
    if goal == 0 {
        resolution.allocations = honour(&commitments);
        return Ok(resolution);
    }

    for price in [project.config.baseline_price, snapshot.price] {
        if !price.is_positive() {
            return Err(Error::InvalidValuation { price });
        }
    }

    let baseline_value = project.config.baseline_price.value_of(goal)?;
    let closing_value = snapshot.price.value_of(goal)?;
    let surplus = closing_value.checked_sub(baseline_value)?;
    resolution.baseline_value = baseline_value;
    resolution.closing_value = closing_value;
    resolution.surplus = surplus;

    if !surplus.is_positive() {
        resolution.outcome = Outcome::NoSurplus;
        resolution.allocations = honour(&commitments);
        return Ok(resolution);
    }

    resolution.ceiling_value = Some(config.ceiling(baseline_value)?);
    let ceiling_units = config.ceiling_units(baseline_value, snapshot.price)?;
    if committed <= ceiling_units {
        resolution.outcome = Outcome::WithinCeiling;
        resolution.allocations = honour(&commitments);
        return Ok(resolution);
    }

    let target = ceiling_units;
    let (accepted, remainder) = match config.rule() {
        OversubscriptionRule::ProRata => pro_rata(&commitments, target, committed)?,
        OversubscriptionRule::Cap | OversubscriptionRule::Perks => {
            water_fill(&commitments, target)?
        }
    };

    let mut allocations = Vec::with_capacity(commitments.len());
    for (commitment, accepted_token) in commitments.iter().zip(accepted) {
        let released = commitment.token - accepted_token;
        let (refunded_token, perk_credit) = match config.rule() {
            OversubscriptionRule::Perks => (0, snapshot.price.value_of(released)?),
            _ => (released, Value::ZERO),
        };
        allocations.push(Allocation {
            investment_id: commitment.id,
            investor: commitment.investor.clone(),
            amount_cash: commitment.cash,
            committed_token: commitment.token,
            accepted_token,
            refunded_token,
            perk_credit,
        });
    }

    resolution.outcome = Outcome::Adjusted;
    resolution.target_units = target;
    resolution.distributed_remainder = remainder;
    resolution.allocations = allocations;
    Ok(resolution)
}

/// Completed forward investments with their reversals netted in, by id.
fn net_commitments(project_id: ProjectId, investments: &[Investment]) -> Result<Vec<Commitment>> {
    let mut forward: BTreeMap<InvestmentId, Commitment> = BTreeMap::new();
    let mut reversals: Vec<&Investment> = Vec::new();

    for investment in investments {
        if investment.project_id != project_id {
            return Err(Error::InvariantViolation(format!(
                "investment {} belongs to project {}, not {}",
                investment.id, investment.project_id, project_id
            )));
        }
        match investment.status {
            InvestmentStatus::Pending => return Err(Error::PendingInvestment(investment.id)),
            InvestmentStatus::Failed => continue,
            InvestmentStatus::Completed => {}
        }
        if investment.is_reversal() {
            reversals.push(investment);
            continue;
        }
        if investment.amount_cash < 0 || investment.amount_token < 0 {
            return Err(Error::InvariantViolation(format!(
                "investment {} has negative amounts without reversing anything",
                investment.id
            )));
        }
        let previous = forward.insert(
            investment.id,
            Commitment {
                id: investment.id,
                investor: investment.investor.clone(),
                cash: investment.amount_cash,
                token: investment.amount_token,
            },
        );
        if previous.is_some() {
            return Err(Error::InvariantViolation(format!(
                "investment {} enumerated twice",
                investment.id
            )));
        }
    }

    let mut reversed: BTreeMap<InvestmentId, InvestmentId> = BTreeMap::new();
    for reversal in reversals {
        let Some(target) = reversal.reverses else {
            continue;
        };
        if let Some(first) = reversed.insert(target, reversal.id) {
            return Err(Error::InvariantViolation(format!(
                "investment {target} reversed by both {first} and {}",
                reversal.id
            )));
        }
        let commitment = forward.get_mut(&target).ok_or_else(|| {
            Error::InvariantViolation(format!(
                "reversal {} references investment {target}, which is not a completed investment of project {project_id}",
                reversal.id
            ))
        })?;
        commitment.cash = checked_add(commitment.cash, reversal.amount_cash)?;
        commitment.token = checked_add(commitment.token, reversal.amount_token)?;
        if commitment.cash < 0 || commitment.token < 0 {
            return Err(Error::InvariantViolation(format!(
                "reversal {} exceeds investment {target}",
                reversal.id
            )));
        }
    }

    Ok(forward.into_values().collect())
}

fn honour(commitments: &[Commitment]) -> Vec<Allocation> {
    commitments
        .iter()
        .map(|c| Allocation {
            investment_id: c.id,
            investor: c.investor.clone(),
            amount_cash: c.cash,
            committed_token: c.token,
            accepted_token: c.token,
            refunded_token: 0,
            perk_credit: Value::ZERO,
        })
        .collect()
}

/// Scale every commitment by `target / total`; returns the accepted amounts
/// (in input order) and the units distributed by largest remainder.
fn pro_rata(commitments: &[Commitment], target: i128, total: i128) -> Result<(Vec<i128>, i128)> {
    let mut accepted = Vec::with_capacity(commitments.len());
    let mut remainders = Vec::with_capacity(commitments.len());
    let mut assigned = 0i128;

    for (index, commitment) in commitments.iter().enumerate() {
        let (share, remainder) = mul_div_rem(target, commitment.token, total)?;
        accepted.push(share);
        assigned = checked_add(assigned, share)?;
        remainders.push((remainder, index));
    }

    // Desc by remainder, asc by id for stability.
    remainders.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| commitments[a.1].id.cmp(&commitments[b.1].id))
    });
    let leftover = target - assigned;
    for &(_, index) in remainders.iter().take(leftover as usize) {
        accepted[index] += 1;
    }
    Ok((accepted, leftover))
}

/// Honour commitments up to a common level and cut everything above it so
/// the accepted total equals `target`. Largest commitments are cut first.
fn water_fill(commitments: &[Commitment], target: i128) -> Result<(Vec<i128>, i128)> {
    let mut by_size: Vec<usize> = (0..commitments.len()).collect();
    by_size.sort_by(|&a, &b| {
        commitments[a]
            .token
            .cmp(&commitments[b].token)
            .then_with(|| commitments[a].id.cmp(&commitments[b].id))
    });

    let mut accepted = vec![0i128; commitments.len()];
    let mut remaining = target;

    for (position, &index) in by_size.iter().enumerate() {
        let left = (by_size.len() - position) as i128;
        let token = commitments[index].token;
        if checked_mul(token, left)? <= remaining {
            accepted[index] = token;
            remaining -= token;
            continue;
        }

        // Everything from here on is in the overshoot band.
        let level = remaining / left;
        let extra = remaining % left;
        let band = &by_size[position..];
        for &member in band {
            accepted[member] = level;
        }
        let mut largest_first = band.to_vec();
        largest_first.sort_by(|&a, &b| {
            commitments[b]
                .token
                .cmp(&commitments[a].token)
                .then_with(|| commitments[a].id.cmp(&commitments[b].id))
        });
        for &member in largest_first.iter().take(extra as usize) {
            accepted[member] += 1;
        }
        return Ok((accepted, extra));
    }

    Ok((accepted, 0))
}

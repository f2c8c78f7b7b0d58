//! Price-variation simulator: runs the resolver over candidate closing prices
//! so founders can preview how a surplus would be redistributed.

use crate::amount::Price;
use crate::resolver::{resolve, Resolution};
use crate::types::{Investment, Project, ValuationSnapshot};
use crate::Error;

/// One candidate closing price and what the resolver made of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationPoint {
    pub closing_price: Price,
    pub result: Result<Resolution, Error>,
}

/// Resolve `project` once per price, in input order. Errors are kept per
/// point so one bad price does not hide the others.
pub fn simulate(
    project: &Project,
    investments: &[Investment],
    prices: &[Price],
) -> Vec<SimulationPoint> {
    prices
        .iter()
        .map(|&closing_price| {
            let snapshot = ValuationSnapshot {
                price: closing_price,
                observed_at: project.config.closes_at,
            };
            SimulationPoint {
                closing_price,
                result: resolve(project, &snapshot, investments),
            }
        })
        .collect()
}

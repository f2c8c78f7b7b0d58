//! Long-running background task that closes projects past their deadline
//! and resolves their oversubscription at a fresh oracle price.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vcoin_core::{ProjectId, Resolution};

use crate::config::Config;
use crate::db;
use crate::errors::Result;
use crate::events::{EventKind, LedgerEvent};
use crate::ledger;
use crate::oracle::PriceOracle;

pub struct SettlementState<O> {
    pub pool: SqlitePool,
    pub config: Config,
    pub oracle: O,
}

/// Run the settlement loop until `shutdown` is cancelled.
pub async fn run<O: PriceOracle>(state: Arc<SettlementState<O>>, shutdown: CancellationToken) {
    info!(
        "Settlement job starting (every {}s)",
        state.config.settlement_interval_secs
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(
        state.config.settlement_interval_secs,
    ));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Settlement job stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        match settle_due_projects(&state.pool, &state.oracle, ledger::now()).await {
            Ok(0) => {}
            Ok(resolved) => info!("Resolved {resolved} due project(s)"),
            Err(e) => error!("Settlement tick error: {e}"),
        }
    }
}

/// Close and resolve every project due at `now`. Returns how many were
/// resolved; the rest are logged and picked up again on the next tick.
pub async fn settle_due_projects<O: PriceOracle>(
    pool: &SqlitePool,
    oracle: &O,
    now: i64,
) -> Result<usize> {
    let due = db::list_due_projects(pool, now).await?;
    let mut resolved = 0usize;

    for project_id in due {
        match settle_project(pool, oracle, project_id, now).await {
            Ok(_) => resolved += 1,
            Err(e) => {
                warn!(project_id, "Resolution deferred: {e}");
                if let Err(e) = record_deferral(pool, project_id, &e.to_string(), now).await {
                    error!(project_id, "Failed to record deferral: {e}");
                }
            }
        }
    }
    Ok(resolved)
}

/// Close the admission window, then resolve at one oracle snapshot.
/// Pending payments are checked first so a blocked project costs no
/// oracle round-trip.
pub async fn settle_project<O: PriceOracle>(
    pool: &SqlitePool,
    oracle: &O,
    project_id: ProjectId,
    now: i64,
) -> Result<Resolution> {
    ledger::close_project(pool, project_id, now).await?;
    if let Some(pending) = db::first_pending_investment(pool, project_id).await? {
        return Err(vcoin_core::Error::PendingInvestment(pending).into());
    }
    let snapshot = oracle.snapshot().await?;
    ledger::resolve_project(pool, project_id, &snapshot, now).await
}

/// Append a `resolution_deferred` event unless the last one gave the same
/// reason.
async fn record_deferral(
    pool: &SqlitePool,
    project_id: ProjectId,
    reason: &str,
    now: i64,
) -> Result<()> {
    let kind = EventKind::ResolutionDeferred;
    let last = db::latest_event_detail(pool, project_id, kind.as_str()).await?;
    if last.flatten().as_deref() == Some(reason) {
        return Ok(());
    }
    let event = LedgerEvent::new(kind, project_id, now).with_detail(reason);
    db::insert_event(pool, &event).await
}

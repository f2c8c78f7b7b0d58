//! Ledger operations over the store.
//!
//! Each operation loads what it needs, applies the `vcoin_core` bookkeeping
//! rules in memory and writes the result plus its audit events in one
//! SQLite transaction, so a rejected operation leaves no trace.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use vcoin_core::{
    resolve, Investment, InvestmentId, Project, ProjectConfig, ProjectId, ProjectStatus,
    Resolution, ValuationSnapshot,
};

use crate::db;
use crate::errors::{Result, SettlementError};
use crate::events::{EventKind, LedgerEvent};

/// Current unix time in seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub async fn create_project(pool: &SqlitePool, config: ProjectConfig, at: i64) -> Result<Project> {
    config.validate()?;

    let mut tx = pool.begin().await?;
    let id = db::insert_project(&mut *tx, &config).await?;
    let project = Project::open(id, config)?;
    db::insert_event(
        &mut *tx,
        &LedgerEvent::new(EventKind::ProjectCreated, id, at).with_actor(&project.config.founder),
    )
    .await?;
    tx.commit().await?;

    info!(
        project_id = id,
        rule = %project.config.rule,
        closes_at = project.config.closes_at,
        "Project created"
    );
    Ok(project)
}

/// Admit a pending investment into an open project.
pub async fn record_investment(
    pool: &SqlitePool,
    project_id: ProjectId,
    investor: String,
    amount_cash: i128,
    amount_token: i128,
    at: i64,
) -> Result<Investment> {
    let mut tx = pool.begin().await?;
    let project = db::get_project(&mut *tx, project_id).await?;
    let mut investment = Investment::pending(0, &project, investor, amount_cash, amount_token, at)?;
    investment.id = db::insert_investment(&mut *tx, &investment).await?;
    db::insert_event(
        &mut *tx,
        &LedgerEvent::for_investment(EventKind::InvestmentRecorded, &investment, at),
    )
    .await?;
    tx.commit().await?;

    info!(
        project_id,
        investment_id = investment.id,
        "Investment recorded"
    );
    Ok(investment)
}

/// Mark a pending investment as paid and fold it into the project totals.
pub async fn complete_investment(
    pool: &SqlitePool,
    id: InvestmentId,
    tx_ref: Option<String>,
    at: i64,
) -> Result<(Investment, Project)> {
    let mut tx = pool.begin().await?;
    let mut investment = db::get_investment(&mut *tx, id).await?;
    let mut project = db::get_project(&mut *tx, investment.project_id).await?;

    investment.complete(at, tx_ref)?;
    let changed = project.apply_settled(&investment)?;

    db::update_investment_settlement(&mut *tx, &investment).await?;
    save_project(&mut tx, &project, changed, at).await?;
    let mut event = LedgerEvent::for_investment(EventKind::InvestmentCompleted, &investment, at);
    if let Some(tx_ref) = &investment.tx_ref {
        event = event.with_detail(tx_ref);
    }
    db::insert_event(&mut *tx, &event).await?;
    tx.commit().await?;

    info!(
        project_id = project.id,
        investment_id = id,
        status = %project.state.status,
        "Investment completed"
    );
    Ok((investment, project))
}

pub async fn fail_investment(pool: &SqlitePool, id: InvestmentId, at: i64) -> Result<Investment> {
    let mut tx = pool.begin().await?;
    let mut investment = db::get_investment(&mut *tx, id).await?;
    investment.fail(at)?;
    db::update_investment_settlement(&mut *tx, &investment).await?;
    db::insert_event(
        &mut *tx,
        &LedgerEvent::for_investment(EventKind::InvestmentFailed, &investment, at),
    )
    .await?;
    tx.commit().await?;

    info!(investment_id = id, "Investment failed");
    Ok(investment)
}

/// Append a compensating record for a completed investment.
pub async fn reverse_investment(
    pool: &SqlitePool,
    id: InvestmentId,
    at: i64,
) -> Result<(Investment, Project)> {
    let mut tx = pool.begin().await?;
    let original = db::get_investment(&mut *tx, id).await?;
    if let Some(existing) = db::find_reversal_of(&mut *tx, id).await? {
        return Err(SettlementError::Conflict(format!(
            "investment {id} was already reversed by investment {existing}"
        )));
    }

    let mut project = db::get_project(&mut *tx, original.project_id).await?;
    let mut reversal = Investment::reversal(0, &original, at)?;
    let changed = project.apply_settled(&reversal)?;

    reversal.id = db::insert_investment(&mut *tx, &reversal).await?;
    save_project(&mut tx, &project, changed, at).await?;
    db::insert_event(
        &mut *tx,
        &LedgerEvent::for_investment(EventKind::InvestmentReversed, &reversal, at)
            .with_detail(format!("reverses {id}")),
    )
    .await?;
    tx.commit().await?;

    info!(
        project_id = project.id,
        investment_id = id,
        reversal_id = reversal.id,
        "Investment reversed"
    );
    Ok((reversal, project))
}

/// Shut the admission window. Closing an already closed project is a no-op.
pub async fn close_project(pool: &SqlitePool, id: ProjectId, at: i64) -> Result<Project> {
    set_status(pool, id, ProjectStatus::Closed, at).await
}

pub async fn cancel_project(pool: &SqlitePool, id: ProjectId, at: i64) -> Result<Project> {
    set_status(pool, id, ProjectStatus::Cancelled, at).await
}

async fn set_status(
    pool: &SqlitePool,
    id: ProjectId,
    to: ProjectStatus,
    at: i64,
) -> Result<Project> {
    let mut tx = pool.begin().await?;
    let mut project = db::get_project(&mut *tx, id).await?;
    if project.state.status == to {
        return Ok(project);
    }
    project.transition(to)?;
    save_project(&mut tx, &project, Some(to), at).await?;
    tx.commit().await?;

    info!(project_id = id, status = %to, "Project status changed");
    Ok(project)
}

/// Resolve a closed project at `snapshot` and persist the allocations, the
/// `Resolved` status and an audit event together.
pub async fn resolve_project(
    pool: &SqlitePool,
    id: ProjectId,
    snapshot: &ValuationSnapshot,
    at: i64,
) -> Result<Resolution> {
    let mut tx = pool.begin().await?;
    let mut project = db::get_project(&mut *tx, id).await?;
    let investments = db::list_investments(&mut *tx, id).await?;

    let resolution = resolve(&project, snapshot, &investments)?;
    project.transition(ProjectStatus::Resolved)?;

    db::insert_resolution(&mut *tx, &resolution, at).await?;
    for allocation in &resolution.allocations {
        db::insert_allocation(&mut *tx, id, allocation).await?;
    }
    save_project(&mut tx, &project, Some(ProjectStatus::Resolved), at).await?;
    db::insert_event(
        &mut *tx,
        &LedgerEvent::new(EventKind::ProjectResolved, id, at).with_detail(format!(
            "{} at {}: accepted {} of {} token units",
            resolution.outcome.as_str(),
            resolution.closing_price,
            resolution.total_accepted(),
            resolution.committed_units
        )),
    )
    .await?;
    tx.commit().await?;

    info!(
        project_id = id,
        outcome = resolution.outcome.as_str(),
        closing_price = %resolution.closing_price,
        overshoot = resolution.overshoot_count(),
        "Project resolved"
    );
    Ok(resolution)
}

/// Write the project's mutable state and, if it moved, a status event.
async fn save_project(
    conn: &mut SqliteConnection,
    project: &Project,
    changed: Option<ProjectStatus>,
    at: i64,
) -> Result<()> {
    db::update_project_state(&mut *conn, project).await?;
    if let Some(status) = changed {
        db::insert_event(&mut *conn, &LedgerEvent::status_changed(project.id, status, at)).await?;
    }
    Ok(())
}

//! Database layer: migrations, row mapping and queries.
//!
//! Amounts are stored as TEXT; rows are decoded back into the core types
//! and a value that no longer parses is reported as
//! [`SettlementError::Decode`].

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::info;
use vcoin_core::{
    Allocation, CapMultiplier, Investment, InvestmentId, Price, Project, ProjectConfig, ProjectId,
    ProjectState, Resolution, Value,
};

use crate::errors::{Result, SettlementError};
use crate::events::{EventRecord, LedgerEvent};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Make sure the file is created if it doesn't exist yet.
    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true);

    // Every connection to `:memory:` is a separate database.
    let pool = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    }
    .connect_with(options)
    .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

fn decode<T: FromStr>(field: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| SettlementError::Decode(format!("{field} = `{raw}`")))
}

// ─────────────────────────────────────────────────────────
// Projects
// ─────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: i64,
    founder: String,
    goal_cash: String,
    goal_token: String,
    min_ticket_cash: String,
    min_ticket_token: String,
    accepts_mix: bool,
    rule: String,
    cap_multiplier: Option<String>,
    baseline_price: String,
    closes_at: i64,
    raised_cash: String,
    raised_token: String,
    investment_count: i64,
    status: String,
}

impl TryFrom<ProjectRow> for Project {
    type Error = SettlementError;

    fn try_from(row: ProjectRow) -> Result<Self> {
        let cap_multiplier = row
            .cap_multiplier
            .as_deref()
            .map(|raw| decode::<CapMultiplier>("cap_multiplier", raw))
            .transpose()?;

        Ok(Project {
            id: row.id as ProjectId,
            config: ProjectConfig {
                founder: row.founder,
                goal_cash: decode("goal_cash", &row.goal_cash)?,
                goal_token: decode("goal_token", &row.goal_token)?,
                min_ticket_cash: decode("min_ticket_cash", &row.min_ticket_cash)?,
                min_ticket_token: decode("min_ticket_token", &row.min_ticket_token)?,
                accepts_mix: row.accepts_mix,
                rule: decode("rule", &row.rule)?,
                cap_multiplier,
                baseline_price: decode::<Price>("baseline_price", &row.baseline_price)?,
                closes_at: row.closes_at,
            },
            state: ProjectState {
                raised_cash: decode("raised_cash", &row.raised_cash)?,
                raised_token: decode("raised_token", &row.raised_token)?,
                investment_count: u32::try_from(row.investment_count).map_err(|_| {
                    SettlementError::Decode(format!("investment_count = {}", row.investment_count))
                })?,
                status: decode("status", &row.status)?,
            },
        })
    }
}

/// Persist a new project; totals and status start from their defaults.
pub async fn insert_project<'e>(
    exec: impl SqliteExecutor<'e>,
    config: &ProjectConfig,
) -> Result<ProjectId> {
    let id = sqlx::query(
        r#"
        INSERT INTO projects
            (founder, goal_cash, goal_token, min_ticket_cash, min_ticket_token,
             accepts_mix, rule, cap_multiplier, baseline_price, closes_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&config.founder)
    .bind(config.goal_cash.to_string())
    .bind(config.goal_token.to_string())
    .bind(config.min_ticket_cash.to_string())
    .bind(config.min_ticket_token.to_string())
    .bind(config.accepts_mix)
    .bind(config.rule.as_str())
    .bind(config.cap_multiplier.map(|m| m.to_string()))
    .bind(config.baseline_price.to_string())
    .bind(config.closes_at)
    .execute(exec)
    .await?
    .last_insert_rowid();
    Ok(id as ProjectId)
}

pub async fn get_project<'e>(exec: impl SqliteExecutor<'e>, id: ProjectId) -> Result<Project> {
    let row = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT id, founder, goal_cash, goal_token, min_ticket_cash, min_ticket_token,
               accepts_mix, rule, cap_multiplier, baseline_price, closes_at,
               raised_cash, raised_token, investment_count, status
        FROM   projects
        WHERE  id = ?1
        "#,
    )
    .bind(id as i64)
    .fetch_optional(exec)
    .await?
    .ok_or_else(|| SettlementError::NotFound(format!("project {id}")))?;
    row.try_into()
}

/// Write back the mutable half of a project.
pub async fn update_project_state<'e>(
    exec: impl SqliteExecutor<'e>,
    project: &Project,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE projects
        SET    raised_cash = ?1, raised_token = ?2, investment_count = ?3, status = ?4
        WHERE  id = ?5
        "#,
    )
    .bind(project.state.raised_cash.to_string())
    .bind(project.state.raised_token.to_string())
    .bind(project.state.investment_count as i64)
    .bind(project.state.status.as_str())
    .bind(project.id as i64)
    .execute(exec)
    .await?;
    Ok(())
}

/// Projects past their close that still need closing or resolving.
pub async fn list_due_projects<'e>(
    exec: impl SqliteExecutor<'e>,
    now: i64,
) -> Result<Vec<ProjectId>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT id
        FROM   projects
        WHERE  closes_at <= ?1 AND status IN ('funding', 'funded', 'closed')
        ORDER  BY closes_at ASC, id ASC
        "#,
    )
    .bind(now)
    .fetch_all(exec)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id as ProjectId).collect())
}

// ─────────────────────────────────────────────────────────
// Investments
// ─────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct InvestmentRow {
    id: i64,
    project_id: i64,
    investor: String,
    amount_cash: String,
    amount_token: String,
    status: String,
    created_at: i64,
    settled_at: Option<i64>,
    tx_ref: Option<String>,
    reverses: Option<i64>,
}

impl TryFrom<InvestmentRow> for Investment {
    type Error = SettlementError;

    fn try_from(row: InvestmentRow) -> Result<Self> {
        Ok(Investment {
            id: row.id as InvestmentId,
            project_id: row.project_id as ProjectId,
            investor: row.investor,
            amount_cash: decode("amount_cash", &row.amount_cash)?,
            amount_token: decode("amount_token", &row.amount_token)?,
            status: decode("status", &row.status)?,
            created_at: row.created_at,
            settled_at: row.settled_at,
            tx_ref: row.tx_ref,
            reverses: row.reverses.map(|id| id as InvestmentId),
        })
    }
}

/// Persist an investment and return its assigned id. The `id` field of
/// `investment` is ignored.
pub async fn insert_investment<'e>(
    exec: impl SqliteExecutor<'e>,
    investment: &Investment,
) -> Result<InvestmentId> {
    let id = sqlx::query(
        r#"
        INSERT INTO investments
            (project_id, investor, amount_cash, amount_token, status,
             created_at, settled_at, tx_ref, reverses)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(investment.project_id as i64)
    .bind(&investment.investor)
    .bind(investment.amount_cash.to_string())
    .bind(investment.amount_token.to_string())
    .bind(investment.status.as_str())
    .bind(investment.created_at)
    .bind(investment.settled_at)
    .bind(&investment.tx_ref)
    .bind(investment.reverses.map(|id| id as i64))
    .execute(exec)
    .await?
    .last_insert_rowid();
    Ok(id as InvestmentId)
}

pub async fn get_investment<'e>(
    exec: impl SqliteExecutor<'e>,
    id: InvestmentId,
) -> Result<Investment> {
    let row = sqlx::query_as::<_, InvestmentRow>(
        r#"
        SELECT id, project_id, investor, amount_cash, amount_token, status,
               created_at, settled_at, tx_ref, reverses
        FROM   investments
        WHERE  id = ?1
        "#,
    )
    .bind(id as i64)
    .fetch_optional(exec)
    .await?
    .ok_or_else(|| SettlementError::NotFound(format!("investment {id}")))?;
    row.try_into()
}

/// All investments of a project, ordered by id ascending.
pub async fn list_investments<'e>(
    exec: impl SqliteExecutor<'e>,
    project_id: ProjectId,
) -> Result<Vec<Investment>> {
    let rows = sqlx::query_as::<_, InvestmentRow>(
        r#"
        SELECT id, project_id, investor, amount_cash, amount_token, status,
               created_at, settled_at, tx_ref, reverses
        FROM   investments
        WHERE  project_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(project_id as i64)
    .fetch_all(exec)
    .await?;
    rows.into_iter().map(Investment::try_from).collect()
}

/// Record the outcome of a pending investment.
pub async fn update_investment_settlement<'e>(
    exec: impl SqliteExecutor<'e>,
    investment: &Investment,
) -> Result<()> {
    sqlx::query("UPDATE investments SET status = ?1, settled_at = ?2, tx_ref = ?3 WHERE id = ?4")
        .bind(investment.status.as_str())
        .bind(investment.settled_at)
        .bind(&investment.tx_ref)
        .bind(investment.id as i64)
        .execute(exec)
        .await?;
    Ok(())
}

/// Id of the compensating record that reverses `id`, if any.
pub async fn find_reversal_of<'e>(
    exec: impl SqliteExecutor<'e>,
    id: InvestmentId,
) -> Result<Option<InvestmentId>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM investments WHERE reverses = ?1")
        .bind(id as i64)
        .fetch_optional(exec)
        .await?;
    Ok(row.map(|(v,)| v as InvestmentId))
}

/// Lowest id among a project's still-pending investments.
pub async fn first_pending_investment<'e>(
    exec: impl SqliteExecutor<'e>,
    project_id: ProjectId,
) -> Result<Option<InvestmentId>> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT id
        FROM   investments
        WHERE  project_id = ?1 AND status = 'pending'
        ORDER  BY id ASC
        LIMIT  1
        "#,
    )
    .bind(project_id as i64)
    .fetch_optional(exec)
    .await?;
    Ok(row.map(|(v,)| v as InvestmentId))
}

// ─────────────────────────────────────────────────────────
// Resolutions & allocations
// ─────────────────────────────────────────────────────────

/// Summary of a stored resolution.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct ResolutionRecord {
    pub project_id: i64,
    pub rule: String,
    pub outcome: String,
    pub baseline_price: String,
    pub closing_price: String,
    pub observed_at: i64,
    pub surplus: String,
    pub target_units: String,
    pub distributed_remainder: String,
    pub resolved_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct AllocationRow {
    investment_id: i64,
    investor: String,
    amount_cash: String,
    committed_token: String,
    accepted_token: String,
    refunded_token: String,
    perk_credit: String,
}

impl TryFrom<AllocationRow> for Allocation {
    type Error = SettlementError;

    fn try_from(row: AllocationRow) -> Result<Self> {
        Ok(Allocation {
            investment_id: row.investment_id as InvestmentId,
            investor: row.investor,
            amount_cash: decode("amount_cash", &row.amount_cash)?,
            committed_token: decode("committed_token", &row.committed_token)?,
            accepted_token: decode("accepted_token", &row.accepted_token)?,
            refunded_token: decode("refunded_token", &row.refunded_token)?,
            perk_credit: Value::from_raw(decode("perk_credit", &row.perk_credit)?),
        })
    }
}

/// Persist the resolution summary. Allocations are written separately with
/// [`insert_allocation`], inside the same transaction.
pub async fn insert_resolution<'e>(
    exec: impl SqliteExecutor<'e>,
    resolution: &Resolution,
    resolved_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO resolutions
            (project_id, rule, outcome, baseline_price, closing_price, observed_at,
             surplus, target_units, distributed_remainder, resolved_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(resolution.project_id as i64)
    .bind(resolution.rule.as_str())
    .bind(resolution.outcome.as_str())
    .bind(resolution.baseline_price.to_string())
    .bind(resolution.closing_price.to_string())
    .bind(resolution.observed_at)
    .bind(resolution.surplus.raw().to_string())
    .bind(resolution.target_units.to_string())
    .bind(resolution.distributed_remainder.to_string())
    .bind(resolved_at)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn insert_allocation<'e>(
    exec: impl SqliteExecutor<'e>,
    project_id: ProjectId,
    allocation: &Allocation,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO allocations
            (investment_id, project_id, investor, amount_cash, committed_token,
             accepted_token, refunded_token, perk_credit)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(allocation.investment_id as i64)
    .bind(project_id as i64)
    .bind(&allocation.investor)
    .bind(allocation.amount_cash.to_string())
    .bind(allocation.committed_token.to_string())
    .bind(allocation.accepted_token.to_string())
    .bind(allocation.refunded_token.to_string())
    .bind(allocation.perk_credit.raw().to_string())
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn get_resolution<'e>(
    exec: impl SqliteExecutor<'e>,
    project_id: ProjectId,
) -> Result<Option<ResolutionRecord>> {
    let row = sqlx::query_as::<_, ResolutionRecord>(
        r#"
        SELECT project_id, rule, outcome, baseline_price, closing_price, observed_at,
               surplus, target_units, distributed_remainder, resolved_at
        FROM   resolutions
        WHERE  project_id = ?1
        "#,
    )
    .bind(project_id as i64)
    .fetch_optional(exec)
    .await?;
    Ok(row)
}

/// Stored allocations of a project, ordered by investment id ascending.
pub async fn list_allocations<'e>(
    exec: impl SqliteExecutor<'e>,
    project_id: ProjectId,
) -> Result<Vec<Allocation>> {
    let rows = sqlx::query_as::<_, AllocationRow>(
        r#"
        SELECT investment_id, investor, amount_cash, committed_token,
               accepted_token, refunded_token, perk_credit
        FROM   allocations
        WHERE  project_id = ?1
        ORDER  BY investment_id ASC
        "#,
    )
    .bind(project_id as i64)
    .fetch_all(exec)
    .await?;
    rows.into_iter().map(Allocation::try_from).collect()
}

// ─────────────────────────────────────────────────────────
// Audit events
// ─────────────────────────────────────────────────────────

pub async fn insert_event<'e>(exec: impl SqliteExecutor<'e>, event: &LedgerEvent) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO events
            (event_type, project_id, investment_id, actor, amount, detail, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&event.event_type)
    .bind(event.project_id)
    .bind(event.investment_id)
    .bind(&event.actor)
    .bind(&event.amount)
    .bind(&event.detail)
    .bind(event.timestamp)
    .execute(exec)
    .await?;
    Ok(())
}

/// Detail of the most recent event of `event_type` for a project.
/// `None` when no such event exists.
pub async fn latest_event_detail<'e>(
    exec: impl SqliteExecutor<'e>,
    project_id: ProjectId,
    event_type: &str,
) -> Result<Option<Option<String>>> {
    let row: Option<(Option<String>,)> = sqlx::query_as(
        r#"
        SELECT detail
        FROM   events
        WHERE  project_id = ?1 AND event_type = ?2
        ORDER  BY id DESC
        LIMIT  1
        "#,
    )
    .bind(project_id as i64)
    .bind(event_type)
    .fetch_optional(exec)
    .await?;
    Ok(row.map(|(v,)| v))
}

/// Fetch all events for a given project, oldest first.
pub async fn get_events_for_project<'e>(
    exec: impl SqliteExecutor<'e>,
    project_id: ProjectId,
) -> Result<Vec<EventRecord>> {
    let rows = sqlx::query_as::<_, EventRecord>(
        r#"
        SELECT id, event_type, project_id, investment_id, actor, amount, detail,
               timestamp, created_at
        FROM   events
        WHERE  project_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(project_id as i64)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

use crate::amount::TOKEN_UNIT;
use crate::invariants::{assert_all_project_invariants, assert_config_immutable};
use crate::{
    Currency, Error, FundingProgress, Investment, InvestmentStatus, OversubscriptionRule, Price,
    Project, ProjectConfig, ProjectStatus,
};

fn config() -> ProjectConfig {
    ProjectConfig {
        founder: "founder-1".to_string(),
        goal_cash: 1_000_000,
        goal_token: 1_000 * TOKEN_UNIT,
        min_ticket_cash: 10_000,
        min_ticket_token: 10 * TOKEN_UNIT,
        accepts_mix: false,
        rule: OversubscriptionRule::Cap,
        cap_multiplier: Some("1.20".parse().unwrap()),
        baseline_price: "0.50".parse().unwrap(),
        closes_at: 1_700_000_000,
    }
}

fn open() -> Project {
    Project::open(7, config()).unwrap()
}

fn settled(project: &mut Project, id: u64, cash: i128, token: i128) -> Investment {
    let mut investment = Investment::pending(id, project, "alice", cash, token, 100).unwrap();
    investment.complete(200, Some(format!("tx-{id}"))).unwrap();
    project.apply_settled(&investment).unwrap();
    investment
}

#[test]
fn test_open_starts_funding_with_zero_totals() {
    let project = open();
    assert_eq!(project.id, 7);
    assert_eq!(project.state.status, ProjectStatus::Funding);
    assert_eq!(project.state.raised_cash, 0);
    assert_eq!(project.state.raised_token, 0);
    assert_eq!(project.state.investment_count, 0);
    assert_all_project_invariants(&project);
}

#[test]
fn test_open_rejects_invalid_goals() {
    let mut cfg = config();
    cfg.goal_cash = -1;
    assert!(matches!(Project::open(1, cfg), Err(Error::InvalidGoal(_))));

    let mut cfg = config();
    cfg.goal_cash = 0;
    cfg.goal_token = 0;
    assert!(matches!(Project::open(1, cfg), Err(Error::InvalidGoal(_))));

    let mut cfg = config();
    cfg.min_ticket_token = -5;
    assert!(matches!(Project::open(1, cfg), Err(Error::InvalidAmount(_))));
}

#[test]
fn test_open_requires_positive_baseline_for_token_goal() {
    let mut cfg = config();
    cfg.baseline_price = Price::from_raw(0);
    assert_eq!(
        Project::open(1, cfg),
        Err(Error::InvalidValuation {
            price: Price::from_raw(0)
        })
    );

    let mut cfg = config();
    cfg.goal_token = 0;
    cfg.baseline_price = Price::from_raw(0);
    assert!(Project::open(1, cfg).is_ok());
}

#[test]
fn test_open_requires_cap_multiplier_for_cap_rules() {
    let mut cfg = config();
    cfg.cap_multiplier = None;
    assert_eq!(
        Project::open(1, cfg.clone()),
        Err(Error::MissingCapMultiplier(OversubscriptionRule::Cap))
    );

    cfg.rule = OversubscriptionRule::ProRata;
    assert!(Project::open(1, cfg).is_ok());
}

#[test]
fn test_commitment_checks() {
    let project = open();

    assert_eq!(
        project.check_commitment(50_000, 20 * TOKEN_UNIT),
        Err(Error::MixNotAccepted)
    );
    assert_eq!(
        project.check_commitment(5_000, 0),
        Err(Error::BelowMinimumTicket {
            currency: Currency::Cash,
            amount: 5_000,
            minimum: 10_000,
        })
    );
    assert_eq!(
        project.check_commitment(0, TOKEN_UNIT),
        Err(Error::BelowMinimumTicket {
            currency: Currency::Token,
            amount: TOKEN_UNIT,
            minimum: 10 * TOKEN_UNIT,
        })
    );
    assert!(matches!(
        project.check_commitment(0, 0),
        Err(Error::InvalidAmount(_))
    ));
    assert!(matches!(
        project.check_commitment(-1, 0),
        Err(Error::InvalidAmount(_))
    ));
    assert!(project.check_commitment(10_000, 0).is_ok());
    assert!(project.check_commitment(0, 10 * TOKEN_UNIT).is_ok());
}

#[test]
fn test_commitment_in_unfunded_currency_is_rejected() {
    let mut cfg = config();
    cfg.goal_token = 0;
    let project = Project::open(1, cfg).unwrap();
    assert_eq!(
        project.check_commitment(0, 20 * TOKEN_UNIT),
        Err(Error::CurrencyNotAccepted(Currency::Token))
    );
}

#[test]
fn test_mixed_commitment_when_allowed() {
    let mut cfg = config();
    cfg.accepts_mix = true;
    let project = Project::open(1, cfg).unwrap();
    assert!(project.check_commitment(50_000, 20 * TOKEN_UNIT).is_ok());
}

#[test]
fn test_closed_project_refuses_commitments() {
    let mut project = open();
    project.transition(ProjectStatus::Closed).unwrap();
    assert_eq!(
        Investment::pending(1, &project, "bob", 10_000, 0, 100),
        Err(Error::ProjectNotOpen(7))
    );
}

#[test]
fn test_investment_status_is_one_way() {
    let project = open();
    let mut investment = Investment::pending(1, &project, "bob", 10_000, 0, 100).unwrap();
    assert_eq!(investment.status, InvestmentStatus::Pending);

    investment.complete(150, Some("pay_123".into())).unwrap();
    assert_eq!(investment.status, InvestmentStatus::Completed);
    assert_eq!(investment.settled_at, Some(150));
    assert_eq!(investment.tx_ref.as_deref(), Some("pay_123"));

    assert_eq!(
        investment.fail(160),
        Err(Error::InvalidInvestmentTransition {
            id: 1,
            from: InvestmentStatus::Completed,
            to: InvestmentStatus::Failed,
        })
    );

    let mut other = Investment::pending(2, &project, "carol", 10_000, 0, 100).unwrap();
    other.fail(170).unwrap();
    assert!(other.complete(180, None).is_err());
    assert_eq!(other.status, InvestmentStatus::Failed);
}

#[test]
fn test_settlement_updates_both_ledgers_and_derives_status() {
    let mut project = open();
    let original = project.clone();

    settled(&mut project, 1, 600_000, 0);
    assert_eq!(project.state.status, ProjectStatus::Funding);

    settled(&mut project, 2, 0, 400 * TOKEN_UNIT);
    settled(&mut project, 3, 400_000, 0);
    assert_eq!(project.state.status, ProjectStatus::Funding);
    assert_eq!(project.state.raised_cash, 1_000_000);

    let mut last = Investment::pending(4, &project, "dave", 0, 600 * TOKEN_UNIT, 100).unwrap();
    last.complete(300, None).unwrap();
    assert_eq!(
        project.apply_settled(&last).unwrap(),
        Some(ProjectStatus::Funded)
    );
    assert_eq!(project.state.raised_token, 1_000 * TOKEN_UNIT);
    assert_eq!(project.state.investment_count, 4);

    assert_all_project_invariants(&project);
    assert_config_immutable(&original, &project);
}

#[test]
fn test_reversal_walks_status_back() {
    let mut project = open();
    settled(&mut project, 1, 1_000_000, 0);
    let big = settled(&mut project, 2, 0, 1_000 * TOKEN_UNIT);
    assert_eq!(project.state.status, ProjectStatus::Funded);

    let reversal = Investment::reversal(3, &big, 400).unwrap();
    assert_eq!(reversal.amount_token, -1_000 * TOKEN_UNIT);
    assert_eq!(reversal.reverses, Some(2));
    assert_eq!(reversal.status, InvestmentStatus::Completed);

    assert_eq!(
        project.apply_settled(&reversal).unwrap(),
        Some(ProjectStatus::Funding)
    );
    assert_eq!(project.state.raised_token, 0);
    assert_eq!(project.state.investment_count, 1);
    assert_all_project_invariants(&project);
}

#[test]
fn test_only_completed_forward_investments_are_reversible() {
    let mut project = open();
    let pending = Investment::pending(1, &project, "erin", 10_000, 0, 100).unwrap();
    assert_eq!(
        Investment::reversal(2, &pending, 200),
        Err(Error::NotReversible(1))
    );

    let done = settled(&mut project, 3, 10_000, 0);
    let reversal = Investment::reversal(4, &done, 200).unwrap();
    assert_eq!(
        Investment::reversal(5, &reversal, 300),
        Err(Error::NotReversible(4))
    );
}

#[test]
fn test_apply_settled_rejects_foreign_and_unsettled_records() {
    let mut project = open();
    let pending = Investment::pending(1, &project, "frank", 10_000, 0, 100).unwrap();
    assert!(matches!(
        project.apply_settled(&pending),
        Err(Error::InvariantViolation(_))
    ));

    let mut foreign = pending.clone();
    foreign.project_id = 99;
    foreign.complete(200, None).unwrap();
    assert!(matches!(
        project.apply_settled(&foreign),
        Err(Error::InvariantViolation(_))
    ));
}

#[test]
fn test_reversal_cannot_drive_totals_negative() {
    let mut project = open();
    let done = settled(&mut project, 1, 10_000, 0);
    let mut reversal = Investment::reversal(2, &done, 200).unwrap();
    reversal.amount_cash = -20_000;
    assert!(matches!(
        project.apply_settled(&reversal),
        Err(Error::InvariantViolation(_))
    ));
    assert_eq!(project.state.raised_cash, 10_000);
}

#[test]
fn test_payments_settle_after_close_but_not_after_resolution() {
    let mut project = open();
    let mut late = Investment::pending(1, &project, "gina", 10_000, 0, 100).unwrap();
    project.transition(ProjectStatus::Closed).unwrap();

    late.complete(500, None).unwrap();
    assert_eq!(project.apply_settled(&late).unwrap(), None);
    assert_eq!(project.state.status, ProjectStatus::Closed);
    assert_eq!(project.state.raised_cash, 10_000);

    project.transition(ProjectStatus::Resolved).unwrap();
    assert_eq!(project.apply_settled(&late), Err(Error::ProjectNotOpen(7)));
}

#[test]
fn test_status_transitions() {
    let mut project = open();
    project.transition(ProjectStatus::Funded).unwrap();
    project.transition(ProjectStatus::Closed).unwrap();
    assert_eq!(
        project.transition(ProjectStatus::Funding),
        Err(Error::InvalidStatusTransition {
            id: 7,
            from: ProjectStatus::Closed,
            to: ProjectStatus::Funding,
        })
    );
    assert!(project.transition(ProjectStatus::Cancelled).is_err());
    project.transition(ProjectStatus::Resolved).unwrap();
    assert!(project.transition(ProjectStatus::Closed).is_err());

    let mut cancelled = open();
    cancelled.transition(ProjectStatus::Cancelled).unwrap();
    assert!(cancelled.transition(ProjectStatus::Resolved).is_err());
    assert!(cancelled.state.status.is_terminal());
}

#[test]
fn test_funding_progress_in_bps() {
    let mut project = open();
    settled(&mut project, 1, 250_000, 0);
    settled(&mut project, 2, 0, 1_500 * TOKEN_UNIT);
    assert_eq!(
        project.funding_progress().unwrap(),
        FundingProgress {
            cash_bps: Some(2_500),
            token_bps: Some(15_000),
        }
    );

    let mut cfg = config();
    cfg.goal_cash = 0;
    let cash_free = Project::open(2, cfg).unwrap();
    assert_eq!(cash_free.funding_progress().unwrap().cash_bps, None);
}

#[test]
fn test_project_json_is_flat_with_string_amounts() {
    let project = open();
    let json = serde_json::to_value(&project).unwrap();
    assert_eq!(json["id"], 7);
    assert_eq!(json["goal_cash"], "1000000");
    assert_eq!(json["baseline_price"], "0.50");
    assert_eq!(json["cap_multiplier"], "1.20");
    assert_eq!(json["rule"], "cap");
    assert_eq!(json["status"], "funding");

    let back: Project = serde_json::from_value(json).unwrap();
    assert_eq!(back, project);
}

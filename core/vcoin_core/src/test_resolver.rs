use crate::amount::TOKEN_UNIT;
use crate::invariants::assert_all_resolution_invariants;
use crate::{
    resolve, simulate, Error, Investment, Outcome, OversubscriptionRule, Price, Project,
    ProjectConfig, ResolverConfig, ValuationSnapshot, Value,
};

const CLOSES_AT: i64 = 1_700_000_000;

fn tokens(n: i128) -> i128 {
    n * TOKEN_UNIT
}

fn price(s: &str) -> Price {
    s.parse().unwrap()
}

fn snapshot(s: &str) -> ValuationSnapshot {
    ValuationSnapshot {
        price: price(s),
        observed_at: CLOSES_AT,
    }
}

/// 50,000.00 cash + 100,000 tokens at a 0.50 baseline.
fn config(rule: OversubscriptionRule, cap: Option<&str>) -> ProjectConfig {
    ProjectConfig {
        founder: "founder-1".to_string(),
        goal_cash: 5_000_000,
        goal_token: tokens(100_000),
        min_ticket_cash: 0,
        min_ticket_token: 0,
        accepts_mix: true,
        rule,
        cap_multiplier: cap.map(|c| c.parse().unwrap()),
        baseline_price: price("0.50"),
        closes_at: CLOSES_AT,
    }
}

/// Open the project and settle one completed investment per `(cash, token)`.
fn settle_all(config: ProjectConfig, legs: &[(i128, i128)]) -> (Project, Vec<Investment>) {
    let mut project = Project::open(1, config).unwrap();
    let mut investments = Vec::new();
    for (i, &(cash, token)) in legs.iter().enumerate() {
        let id = i as u64 + 1;
        let mut investment =
            Investment::pending(id, &project, format!("investor-{id}"), cash, token, 1_000)
                .unwrap();
        investment.complete(2_000, Some(format!("tx-{id}"))).unwrap();
        project.apply_settled(&investment).unwrap();
        investments.push(investment);
    }
    (project, investments)
}

fn token_only(config: ProjectConfig, amounts: &[i128]) -> (Project, Vec<Investment>) {
    let legs: Vec<(i128, i128)> = amounts.iter().map(|&t| (0, t)).collect();
    settle_all(config, &legs)
}

// ── pro-rata ─────────────────────────────────────────────────────────

#[test]
fn test_pro_rata_scales_to_baseline_value() {
    let (project, investments) = token_only(
        config(OversubscriptionRule::ProRata, None),
        &[tokens(10_000), tokens(90_000)],
    );

    let res = resolve(&project, &snapshot("0.75"), &investments).unwrap();
    assert_all_resolution_invariants(&res);

    assert_eq!(res.outcome, Outcome::Adjusted);
    assert_eq!(res.baseline_value.to_minor_units(), 5_000_000);
    assert_eq!(res.closing_value.to_minor_units(), 7_500_000);
    assert_eq!(res.surplus.to_minor_units(), 2_500_000);

    // 10,000 * 50,000 / 75,000 = 6,666.67 tokens.
    let first = &res.allocations[0];
    assert_eq!(first.accepted_token, 6_666_666_667);
    assert_eq!(first.refunded_token, 3_333_333_333);
    assert_eq!(first.perk_credit, Value::ZERO);

    let second = &res.allocations[1];
    assert_eq!(second.accepted_token, 59_999_999_999);
    assert_eq!(second.refunded_token, 30_000_000_001);

    assert_eq!(res.target_units, 66_666_666_666);
    assert_eq!(res.total_accepted(), 66_666_666_666);
    assert_eq!(res.distributed_remainder, 1);

    // Accepted value lands within one base unit of the baseline value.
    let accepted_value = res.closing_price.value_of(res.total_accepted()).unwrap();
    let gap = res.baseline_value.raw() - accepted_value.raw();
    assert!(gap >= 0 && gap < res.closing_price.raw());
}

#[test]
fn test_pro_rata_within_ceiling_when_underfilled() {
    // 60,000 tokens raised; baseline value buys 66,666.67 tokens at 0.75.
    let (project, investments) = token_only(
        config(OversubscriptionRule::ProRata, None),
        &[tokens(20_000), tokens(40_000)],
    );

    let res = resolve(&project, &snapshot("0.75"), &investments).unwrap();
    assert_eq!(res.outcome, Outcome::WithinCeiling);
    assert!(res.surplus.is_positive());
    assert_eq!(res.total_accepted(), tokens(60_000));
    assert_eq!(res.total_refunded(), 0);
}

// ── cap ──────────────────────────────────────────────────────────────

#[test]
fn test_cap_single_investor_cut_to_ceiling() {
    let (project, investments) = token_only(
        config(OversubscriptionRule::Cap, Some("1.20")),
        &[tokens(90_000)],
    );

    let res = resolve(&project, &snapshot("0.75"), &investments).unwrap();
    assert_all_resolution_invariants(&res);

    // 50,000 * 1.20 = 60,000 cash-equivalent = 80,000 tokens at 0.75.
    assert_eq!(res.ceiling_value.unwrap().to_minor_units(), 6_000_000);
    assert_eq!(res.target_units, tokens(80_000));
    assert_eq!(res.allocations[0].accepted_token, tokens(80_000));
    assert_eq!(res.allocations[0].refunded_token, tokens(10_000));
}

#[test]
fn test_cap_cuts_largest_commitments_first() {
    let (project, investments) = token_only(
        config(OversubscriptionRule::Cap, Some("1.20")),
        &[tokens(10_000), tokens(30_000), tokens(60_000)],
    );

    let res = resolve(&project, &snapshot("0.75"), &investments).unwrap();
    assert_all_resolution_invariants(&res);

    let accepted: Vec<i128> = res.allocations.iter().map(|a| a.accepted_token).collect();
    assert_eq!(accepted, vec![tokens(10_000), tokens(30_000), tokens(40_000)]);
    assert_eq!(res.allocations[2].refunded_token, tokens(20_000));
    assert_eq!(res.overshoot_count(), 1);
    assert_eq!(res.distributed_remainder, 0);
}

#[test]
fn test_cap_equal_commitments_share_the_ceiling() {
    let (project, investments) = token_only(
        config(OversubscriptionRule::Cap, Some("1.20")),
        &[tokens(50_000), tokens(50_000)],
    );

    let res = resolve(&project, &snapshot("0.75"), &investments).unwrap();
    assert_eq!(res.allocations[0].accepted_token, tokens(40_000));
    assert_eq!(res.allocations[1].accepted_token, tokens(40_000));
    assert_eq!(res.overshoot_count(), 2);
}

#[test]
fn test_cap_remainder_goes_to_largest_then_lowest_id() {
    // Ten base units of goal: the ceiling at 0.75 with 1.20x is 8 units.
    let mut cfg = config(OversubscriptionRule::Cap, Some("1.20"));
    cfg.goal_token = 10;
    let (project, investments) = token_only(cfg, &[3, 3, 4]);

    let res = resolve(&project, &snapshot("0.75"), &investments).unwrap();
    assert_all_resolution_invariants(&res);

    assert_eq!(res.target_units, 8);
    assert_eq!(res.distributed_remainder, 2);
    let accepted: Vec<i128> = res.allocations.iter().map(|a| a.accepted_token).collect();
    assert_eq!(accepted, vec![3, 2, 3]);
}

#[test]
fn test_cap_within_ceiling_keeps_everything() {
    let (project, investments) = token_only(
        config(OversubscriptionRule::Cap, Some("1.20")),
        &[tokens(30_000), tokens(40_000)],
    );

    let res = resolve(&project, &snapshot("0.75"), &investments).unwrap();
    assert_eq!(res.outcome, Outcome::WithinCeiling);
    assert_eq!(res.total_accepted(), tokens(70_000));
}

// ── perks ────────────────────────────────────────────────────────────

#[test]
fn test_perks_convert_cut_into_credit() {
    let (project, investments) = token_only(
        config(OversubscriptionRule::Perks, Some("1.20")),
        &[tokens(10_000), tokens(30_000), tokens(60_000)],
    );

    let res = resolve(&project, &snapshot("0.75"), &investments).unwrap();
    assert_all_resolution_invariants(&res);

    let cut = &res.allocations[2];
    assert_eq!(cut.accepted_token, tokens(40_000));
    assert_eq!(cut.refunded_token, 0);
    // 20,000 tokens at 0.75 = 15,000.00 of credit.
    assert_eq!(cut.perk_credit.to_minor_units(), 1_500_000);
    assert_eq!(res.total_refunded(), 0);

    for a in &res.allocations {
        let accepted = res.closing_price.value_of(a.accepted_token).unwrap();
        let committed = res.closing_price.value_of(a.committed_token).unwrap();
        assert_eq!(accepted.checked_add(a.perk_credit).unwrap(), committed);
    }
}

// ── no-op paths ──────────────────────────────────────────────────────

#[test]
fn test_no_surplus_when_price_falls_or_holds() {
    for closing in ["0.50", "0.40"] {
        let (project, investments) = token_only(
            config(OversubscriptionRule::ProRata, None),
            &[tokens(10_000), tokens(95_000)],
        );
        let res = resolve(&project, &snapshot(closing), &investments).unwrap();
        assert_eq!(res.outcome, Outcome::NoSurplus);
        assert!(!res.surplus.is_positive());
        assert_eq!(res.ceiling_value, None);
        for a in &res.allocations {
            assert_eq!(a.accepted_token, a.committed_token);
            assert_eq!(a.refunded_token, 0);
        }
    }
}

#[test]
fn test_cash_only_project_has_nothing_to_resolve() {
    let mut cfg = config(OversubscriptionRule::ProRata, None);
    cfg.goal_token = 0;
    cfg.baseline_price = Price::from_raw(0);
    let (project, investments) = settle_all(cfg, &[(1_000_000, 0)]);

    // Even a zero closing price is fine without a token goal.
    let res = resolve(&project, &snapshot("0"), &investments).unwrap();
    assert_eq!(res.outcome, Outcome::NothingToResolve);
    assert_eq!(res.allocations[0].amount_cash, 1_000_000);
}

#[test]
fn test_cash_leg_passes_through_untouched() {
    let (project, investments) = settle_all(
        config(OversubscriptionRule::ProRata, None),
        &[(250_000, tokens(10_000)), (0, tokens(90_000))],
    );

    let res = resolve(&project, &snapshot("0.75"), &investments).unwrap();
    assert_eq!(res.allocations[0].amount_cash, 250_000);
    assert_eq!(res.allocations[1].amount_cash, 0);
}

// ── failures ─────────────────────────────────────────────────────────

#[test]
fn test_non_positive_closing_price_is_invalid() {
    let (project, investments) =
        token_only(config(OversubscriptionRule::ProRata, None), &[tokens(10_000)]);

    for closing in ["0", "-0.75"] {
        let err = resolve(&project, &snapshot(closing), &investments).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidValuation {
                price: price(closing)
            }
        );
    }
}

#[test]
fn test_recorded_total_mismatch_is_invariant_violation() {
    let (mut project, investments) =
        token_only(config(OversubscriptionRule::ProRata, None), &[tokens(10_000)]);
    project.state.raised_token += 1;

    let err = resolve(&project, &snapshot("0.75"), &investments).unwrap_err();
    assert!(matches!(err, Error::InvariantViolation(_)));
}

#[test]
fn test_pending_investment_blocks_resolution() {
    let (project, mut investments) =
        token_only(config(OversubscriptionRule::ProRata, None), &[tokens(10_000)]);
    investments.push(Investment::pending(9, &project, "late", 0, tokens(5), 3_000).unwrap());

    let err = resolve(&project, &snapshot("0.75"), &investments).unwrap_err();
    assert_eq!(err, Error::PendingInvestment(9));
}

#[test]
fn test_failed_investments_are_ignored() {
    let (project, mut investments) =
        token_only(config(OversubscriptionRule::ProRata, None), &[tokens(10_000)]);
    let mut failed = Investment::pending(7, &project, "bounced", 0, tokens(50), 3_000).unwrap();
    failed.fail(3_100).unwrap();
    investments.push(failed);

    let res = resolve(&project, &snapshot("0.75"), &investments).unwrap();
    assert_eq!(res.allocations.len(), 1);
    assert_eq!(res.allocations[0].investment_id, 1);
}

#[test]
fn test_cap_without_multiplier_fails_fast() {
    let (mut project, investments) =
        token_only(config(OversubscriptionRule::ProRata, None), &[tokens(10_000)]);
    project.config.rule = OversubscriptionRule::Perks;

    let err = resolve(&project, &snapshot("0.40"), &investments).unwrap_err();
    assert_eq!(err, Error::MissingCapMultiplier(OversubscriptionRule::Perks));
    assert_eq!(
        ResolverConfig::new(OversubscriptionRule::Cap, None),
        Err(Error::MissingCapMultiplier(OversubscriptionRule::Cap))
    );
    assert!(ResolverConfig::new(OversubscriptionRule::ProRata, None).is_ok());
}

#[test]
fn test_unknown_rule_is_rejected() {
    assert_eq!(
        "pro_rata".parse::<OversubscriptionRule>(),
        Err(Error::UnknownRule("pro_rata".to_string()))
    );
    assert_eq!(
        "pro-rata".parse::<OversubscriptionRule>(),
        Ok(OversubscriptionRule::ProRata)
    );
}

// ── reversals ────────────────────────────────────────────────────────

#[test]
fn test_reversal_nets_into_original() {
    let (mut project, mut investments) = token_only(
        config(OversubscriptionRule::ProRata, None),
        &[tokens(40_000), tokens(30_000), tokens(50_000)],
    );
    let reversal = Investment::reversal(4, &investments[1], 2_500).unwrap();
    project.apply_settled(&reversal).unwrap();
    investments.push(reversal);

    let res = resolve(&project, &snapshot("0.75"), &investments).unwrap();
    assert_all_resolution_invariants(&res);

    assert_eq!(res.allocations.len(), 3);
    assert_eq!(res.committed_units, tokens(90_000));
    let reversed = &res.allocations[1];
    assert_eq!(reversed.committed_token, 0);
    assert_eq!(reversed.accepted_token, 0);
}

#[test]
fn test_double_reversal_is_invariant_violation() {
    let (project, mut investments) =
        token_only(config(OversubscriptionRule::ProRata, None), &[tokens(10_000)]);
    let first = Investment::reversal(2, &investments[0], 2_500).unwrap();
    let second = Investment::reversal(3, &investments[0], 2_600).unwrap();
    investments.push(first);
    investments.push(second);

    let err = resolve(&project, &snapshot("0.75"), &investments).unwrap_err();
    assert!(matches!(err, Error::InvariantViolation(_)));
}

// ── determinism ──────────────────────────────────────────────────────

#[test]
fn test_resolving_the_output_again_is_a_no_op() {
    let (project, investments) = token_only(
        config(OversubscriptionRule::ProRata, None),
        &[tokens(10_000), tokens(25_000), tokens(65_000)],
    );
    let first = resolve(&project, &snapshot("0.75"), &investments).unwrap();
    assert!(first.is_adjusted());

    let mut cfg = config(OversubscriptionRule::ProRata, None);
    cfg.baseline_price = first.closing_price;
    let accepted: Vec<i128> = first.allocations.iter().map(|a| a.accepted_token).collect();
    let (again_project, again_investments) = token_only(cfg, &accepted);

    let second = resolve(&again_project, &snapshot("0.75"), &again_investments).unwrap();
    assert_eq!(second.outcome, Outcome::NoSurplus);
    assert_eq!(second.surplus, Value::ZERO);
    for (a, b) in first.allocations.iter().zip(&second.allocations) {
        assert_eq!(a.accepted_token, b.accepted_token);
        assert_eq!(b.refunded_token, 0);
    }
}

#[test]
fn test_identical_inputs_give_identical_results() {
    let (project, investments) = token_only(
        config(OversubscriptionRule::Perks, Some("1.05")),
        &[tokens(7), tokens(33_333), tokens(66_660)],
    );
    let a = resolve(&project, &snapshot("0.61"), &investments).unwrap();
    let b = resolve(&project, &snapshot("0.61"), &investments).unwrap();
    assert_eq!(a, b);

    let mut reordered = investments.clone();
    reordered.reverse();
    let c = resolve(&project, &snapshot("0.61"), &reordered).unwrap();
    assert_eq!(a, c);
}

// ── simulator ────────────────────────────────────────────────────────

#[test]
fn test_simulate_reports_each_price() {
    let (project, investments) = token_only(
        config(OversubscriptionRule::ProRata, None),
        &[tokens(10_000), tokens(90_000)],
    );
    let prices = [price("0.40"), price("0.75"), price("0")];

    let points = simulate(&project, &investments, &prices);
    assert_eq!(points.len(), 3);
    assert_eq!(points[0].result.as_ref().unwrap().outcome, Outcome::NoSurplus);
    assert_eq!(points[1].result.as_ref().unwrap().outcome, Outcome::Adjusted);
    assert_eq!(
        points[2].result,
        Err(Error::InvalidValuation {
            price: price("0")
        })
    );
    assert_eq!(points[1].closing_price, price("0.75"));
}

#[test]
fn test_resolution_serializes_amounts_as_strings() {
    let (project, investments) =
        token_only(config(OversubscriptionRule::ProRata, None), &[tokens(10_000)]);
    let res = resolve(&project, &snapshot("0.40"), &investments).unwrap();

    let json = serde_json::to_value(&res).unwrap();
    assert_eq!(json["rule"], "pro-rata");
    assert_eq!(json["outcome"], "no_surplus");
    assert_eq!(json["closing_price"], "0.40");
    assert_eq!(json["allocations"][0]["accepted_token"], "10000000000");
}

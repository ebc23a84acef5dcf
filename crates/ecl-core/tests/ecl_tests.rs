use chrono::NaiveDate;
use ecl_core::config::{DiscountRateSource, EclConfig};
use ecl_core::ead::{BalanceSheetTreatment, RepaymentProfile};
use ecl_core::ecl::pipeline::run_impairment_with_cancel;
use ecl_core::ecl::{run_impairment, Exposure, ImpairmentInput, Stage};
use ecl_core::lgd::CollateralProfile;
use ecl_core::pd::estimation::Observation;
use ecl_core::pd::macro_adjustment::MacroScenario;
use ecl_core::pd::{CreditState, StateSpace};
use ecl_core::{EclError, Frequency};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::AtomicBool;

fn approx_eq(a: Decimal, b: Decimal, eps: Decimal) -> bool {
    (a - b).abs() < eps
}

fn valuation_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
}

fn state(id: &str, rank: u32, absorbing: bool) -> CreditState {
    CreditState {
        id: id.into(),
        rank,
        absorbing,
        default: absorbing,
        dpd_floor: None,
    }
}

fn obs(entity: String, from: &str, to: &str) -> Observation {
    Observation {
        entity_id: entity,
        segment: None,
        period: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        from_state: from.into(),
        to_state: to.into(),
        balance: None,
    }
}

/// Unsecured profile; LGD = 1 - unsecured recovery rate.
fn unsecured(segment: &str) -> CollateralProfile {
    CollateralProfile {
        segment: segment.into(),
        items: Vec::new(),
        cash_recovery: Decimal::ZERO,
        cash_recovery_periods: 0,
        cure_rate: Decimal::ZERO,
        discount_rate: Decimal::ZERO,
    }
}

fn exposure(id: &str, state: &str) -> Exposure {
    Exposure {
        id: id.into(),
        segment: "retail".into(),
        outstanding: dec!(100),
        annual_rate: Decimal::ZERO,
        effective_interest_rate: None,
        frequency: Frequency::Monthly,
        remaining_periods: Some(12),
        maturity_date: None,
        repayment: RepaymentProfile::InterestOnly,
        treatment: BalanceSheetTreatment::OnBalance,
        current_state: state.into(),
        origination_state: "performing".into(),
        days_past_due: 0,
        previous_stage: None,
        collateral: None,
    }
}

fn base_config() -> EclConfig {
    let mut config = EclConfig::default();
    config.discount = DiscountRateSource::Flat {
        annual_rate: Decimal::ZERO,
    };
    config.lgd.unsecured_recovery_rate = dec!(0.55);
    config
}

/// 2% monthly default rate, no other transitions.
fn two_state_input() -> ImpairmentInput {
    let mut observations = Vec::new();
    for i in 0..98 {
        observations.push(obs(format!("s{i}"), "performing", "performing"));
    }
    for i in 0..2 {
        observations.push(obs(format!("d{i}"), "performing", "default"));
    }
    ImpairmentInput {
        valuation_date: valuation_date(),
        state_space: StateSpace::new(vec![
            state("performing", 0, false),
            state("default", 1, true),
        ])
        .unwrap(),
        observations,
        scenarios: Vec::new(),
        collateral: vec![unsecured("retail")],
        exposures: vec![exposure("worked", "performing")],
        config: base_config(),
    }
}

/// Three-state book: performing, watch list, default.
fn three_state_input() -> ImpairmentInput {
    let mut observations = Vec::new();
    for i in 0..90 {
        observations.push(obs(format!("p{i}"), "performing", "performing"));
    }
    for i in 0..6 {
        observations.push(obs(format!("pw{i}"), "performing", "watch"));
    }
    for i in 0..4 {
        observations.push(obs(format!("pd{i}"), "performing", "default"));
    }
    for i in 0..10 {
        observations.push(obs(format!("w{i}"), "watch", "watch"));
    }
    for i in 0..5 {
        observations.push(obs(format!("wp{i}"), "watch", "performing"));
    }
    for i in 0..5 {
        observations.push(obs(format!("wd{i}"), "watch", "default"));
    }

    let mut late = exposure("late", "performing");
    late.days_past_due = 45;

    let mut config = base_config();
    config.macro_adjustment.sensitivities.insert("performing".into(), dec!(1.0));
    config.macro_adjustment.sensitivities.insert("watch".into(), dec!(0.7));

    ImpairmentInput {
        valuation_date: valuation_date(),
        state_space: StateSpace::new(vec![
            state("performing", 0, false),
            state("watch", 2, false),
            state("default", 3, true),
        ])
        .unwrap(),
        observations,
        scenarios: vec![MacroScenario {
            name: "base".into(),
            weight: Decimal::ONE,
            factor_path: vec![Decimal::ZERO; 12],
        }],
        collateral: vec![unsecured("retail")],
        exposures: vec![
            exposure("good", "performing"),
            late,
            exposure("downgraded", "watch"),
            exposure("defaulted", "default"),
        ],
        config,
    }
}

// ===========================================================================
// End-to-end runs
// ===========================================================================

#[test]
fn test_two_state_worked_example() {
    let out = run_impairment(&two_state_input()).unwrap();
    let run = &out.result.run;
    assert_eq!(run.exposures.len(), 1);
    let e = &run.exposures[0];
    assert_eq!(e.stage, Stage::Stage1);
    assert_eq!(e.lgd, dec!(0.45));
    // 100 x 0.45 x (1 - 0.98^12)
    assert!(approx_eq(e.ecl, dec!(9.688), dec!(0.001)), "got {}", e.ecl);
    assert_eq!(run.total.ecl, e.ecl);
    // No scenarios: point-in-time equals through-the-cycle, with a warning
    let pd = &out.result.pd[0];
    assert_eq!(pd.term_structure.point_in_time, pd.term_structure.through_the_cycle);
    assert!(out.warnings.iter().any(|w| w.contains("No macro scenarios")));
}

#[test]
fn test_three_state_staging_and_aggregation() {
    let out = run_impairment(&three_state_input()).unwrap();
    let run = &out.result.run;
    assert!(run.exceptions.is_empty());

    let by_id = |id: &str| run.exposures.iter().find(|e| e.exposure_id == id).unwrap();
    assert_eq!(by_id("good").stage, Stage::Stage1);
    assert_eq!(
        by_id("late").stage,
        Stage::Stage2 {
            probation_elapsed: 0
        }
    );
    assert_eq!(
        by_id("downgraded").stage,
        Stage::Stage2 {
            probation_elapsed: 0
        }
    );
    assert_eq!(by_id("defaulted").stage, Stage::Stage3);

    // Defaulted exposure loses LGD x EAD in the first period
    assert_eq!(by_id("defaulted").ecl, dec!(45));
    // Same state and tenor: 12-month ECL (Stage 1) equals lifetime ECL (Stage 2)
    assert_eq!(by_id("good").ecl, by_id("late").ecl);
    assert!(by_id("downgraded").ecl > by_id("good").ecl);

    let stage_sum: Decimal = run.by_stage.values().map(|t| t.ecl).sum();
    assert_eq!(stage_sum, run.total.ecl);
    assert_eq!(run.by_stage[&2].count, 2);
    assert_eq!(run.total.exposure, dec!(400));
}

#[test]
fn test_neutral_scenario_matches_through_the_cycle() {
    let out = run_impairment(&three_state_input()).unwrap();
    let pd = &out.result.pd[0];
    assert_eq!(pd.term_structure.point_in_time, pd.term_structure.through_the_cycle);
}

#[test]
fn test_stress_scenario_raises_portfolio_ecl() {
    let base = run_impairment(&three_state_input()).unwrap();
    let mut stressed_input = three_state_input();
    stressed_input.scenarios = vec![
        MacroScenario {
            name: "base".into(),
            weight: dec!(0.6),
            factor_path: vec![Decimal::ZERO; 12],
        },
        MacroScenario {
            name: "downturn".into(),
            weight: dec!(0.4),
            factor_path: vec![dec!(-2.0); 12],
        },
    ];
    let stressed = run_impairment(&stressed_input).unwrap();
    assert!(stressed.result.run.total.ecl > base.result.run.total.ecl);
    // Defaulted exposures are unaffected by the macro outlook
    let defaulted = |out: &ecl_core::ComputationOutput<ecl_core::ecl::ImpairmentOutput>| {
        out.result
            .run
            .exposures
            .iter()
            .find(|e| e.exposure_id == "defaulted")
            .map(|e| e.ecl)
    };
    assert_eq!(defaulted(&stressed), defaulted(&base));
}

#[test]
fn test_segment_without_recovery_assumptions_is_excepted() {
    let mut input = three_state_input();
    let mut commercial = exposure("corp-1", "performing");
    commercial.segment = "commercial".into();
    input.exposures.push(commercial);

    let out = run_impairment(&input).unwrap();
    let run = &out.result.run;
    assert_eq!(run.exposures.len(), 4);
    assert_eq!(run.exceptions.len(), 1);
    assert_eq!(run.exceptions[0].exposure_id, "corp-1");
    assert_eq!(run.exceptions[0].kind, "missing_parameter");
    assert!(!run.by_segment.contains_key("commercial"));
}

#[test]
fn test_exposure_collateral_overrides_segment_lgd() {
    let mut input = three_state_input();
    let mut secured = exposure("secured", "default");
    secured.collateral = Some(CollateralProfile {
        items: vec![ecl_core::lgd::CollateralItem {
            collateral_type: "vehicle".into(),
            appraised_value: dec!(80),
            haircut: dec!(0.25),
            time_to_realization: 0,
        }],
        ..unsecured("retail")
    });
    input.exposures.push(secured);

    let out = run_impairment(&input).unwrap();
    let e = out
        .result
        .run
        .exposures
        .iter()
        .find(|e| e.exposure_id == "secured")
        .unwrap();
    // Recovery 60 of 100
    assert_eq!(e.lgd, dec!(0.4));
    assert_eq!(e.ecl, dec!(40));
}

#[test]
fn test_uncalibrated_state_aborts_run() {
    let mut input = three_state_input();
    input.config.macro_adjustment.sensitivities.remove("watch");
    match run_impairment(&input) {
        Err(EclError::Calibration { states, .. }) => assert_eq!(states, vec!["watch".to_string()]),
        other => panic!("expected Calibration error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_sparse_history_aborts_with_state_name() {
    let mut input = three_state_input();
    input.observations.retain(|o| o.from_state != "watch");
    match run_impairment(&input) {
        Err(EclError::InsufficientData { state, .. }) => assert_eq!(state, "watch"),
        other => panic!("expected InsufficientData, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_sparse_segment_is_excluded_and_others_still_run() {
    let mut input = three_state_input();
    for o in input.observations.iter_mut() {
        o.segment = Some("retail".into());
    }
    for i in 0..20 {
        let mut o = obs(format!("c{i}"), "performing", "performing");
        o.segment = Some("commercial".into());
        input.observations.push(o);
    }
    input.collateral.push(unsecured("commercial"));
    let mut commercial = exposure("corp-1", "performing");
    commercial.segment = "commercial".into();
    input.exposures.push(commercial);

    let out = run_impairment(&input).unwrap();
    let run = &out.result.run;
    assert_eq!(run.exposures.len(), 4);
    assert!(run.by_segment.contains_key("retail"));
    assert!(!run.by_segment.contains_key("commercial"));
    assert_eq!(run.exceptions.len(), 1);
    assert_eq!(run.exceptions[0].exposure_id, "corp-1");
    assert_eq!(run.exceptions[0].kind, "insufficient_data");
    assert!(run.exceptions[0].message.contains("watch"));
    assert!(out
        .warnings
        .iter()
        .any(|w| w.starts_with("Segment 'commercial' excluded")));
}

#[test]
fn test_cancelled_run_produces_no_output() {
    let cancel = AtomicBool::new(true);
    let result = run_impairment_with_cancel(&three_state_input(), &cancel);
    assert!(matches!(result, Err(EclError::Cancelled { .. })));
}

#[test]
fn test_input_document_round_trip() {
    let json = serde_json::json!({
        "valuation_date": "2024-12-31",
        "state_space": { "states": [
            { "id": "performing", "rank": 0 },
            { "id": "default", "rank": 1, "absorbing": true, "default": true }
        ]},
        "observations": [
            { "entity_id": "a", "period": "2024-06-01", "from_state": "performing", "to_state": "performing" },
            { "entity_id": "b", "period": "2024-06-01", "from_state": "performing", "to_state": "default" }
        ],
        "collateral": [ { "segment": "retail", "items": [] } ],
        "exposures": [ {
            "id": "x",
            "segment": "retail",
            "outstanding": "1000",
            "annual_rate": "0.05",
            "maturity_date": "2025-12-31",
            "repayment": { "type": "amortizing" },
            "current_state": "performing",
            "origination_state": "performing"
        } ],
        "config": {
            "lgd": { "unsecured_recovery_rate": "0.6" },
            "staging": { "sicr_rank_threshold": 1 }
        }
    });
    let input: ImpairmentInput = serde_json::from_value(json).unwrap();
    let out = run_impairment(&input).unwrap();
    let e = &out.result.run.exposures[0];
    assert_eq!(e.lgd, dec!(0.4));
    assert_eq!(e.horizon_periods, 12);
    assert!(e.ecl > Decimal::ZERO && e.ecl < dec!(400));
    let encoded = serde_json::to_value(&out).unwrap();
    assert_eq!(encoded["result"]["run"]["exposures"][0]["stage"]["stage"], "stage1");
}

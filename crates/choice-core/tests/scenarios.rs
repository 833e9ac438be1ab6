use std::sync::Arc;

use choice_core::diagnostics::ChunkDiagnostics;
use choice_core::logit::{base_probabilities, mnl_probabilities, nested_exp_utilities, nested_probabilities, nl_probabilities};
use choice_core::sampler::choose_index;
use choice_core::{
    compute_utilities, read_entity_table, read_model_spec, simple_simulate, simple_simulate_logsums,
    EntityTable, Environment, EvalError, ExpressionPlan, Frame, LookupError, NestTree, RandomStream,
    SimulateError, SkimDict, Spec,
};
use contracts::{Diagnostic, ModelSettings, NestChild, NestSpec, SimulateConfig};

fn single_row(utilities: &[f64], alternatives: &[&str]) -> Frame {
    Frame::from_rows(
        vec![1],
        alternatives.iter().map(|name| name.to_string()).collect(),
        utilities.to_vec(),
    )
    .expect("frame")
}

fn two_nest_tree(coefficient: f64) -> NestTree {
    let nest = |name: &str, leaves: [&str; 2]| {
        NestChild::Nest(NestSpec {
            name: name.into(),
            coefficient,
            alternatives: leaves.iter().map(|leaf| NestChild::Leaf(leaf.to_string())).collect(),
        })
    };
    let spec = NestSpec {
        name: "root".into(),
        coefficient: 1.0,
        alternatives: vec![nest("auto", ["drive", "carpool"]), nest("active", ["walk", "bike"])],
    };
    let alternatives = ["drive", "carpool", "walk", "bike"].map(String::from);
    NestTree::new(&spec, &alternatives).expect("tree")
}

#[test]
fn softmax_of_three_alternatives_and_fixed_draw() {
    let probs = mnl_probabilities(&single_row(&[1.0, 0.0, -1.0], &["a", "b", "c"]));
    let row = probs.row(0);
    let expected = [0.665_240_955_8, 0.244_728_471_1, 0.090_030_573_2];
    for (p, e) in row.iter().zip(expected) {
        assert!((p - e).abs() < 1e-9, "{row:?}");
    }
    assert!((row[0] / row[1] - 1_f64.exp()).abs() < 1e-12);
    assert_eq!(choose_index(row, 0.1), Some(0));
}

#[test]
fn two_nests_of_two_leaves() {
    let tree = two_nest_tree(0.7);
    let utilities = single_row(&[2.0, 1.0, 0.0, -1.0], &["drive", "carpool", "walk", "bike"]);
    let exp_utilities = nested_exp_utilities(&utilities, &tree);
    let nested = nested_probabilities(&exp_utilities, &tree);
    assert!(nested.degenerate.is_empty());

    for nest in ["auto", "active"] {
        let idx = tree.position(nest).expect("nest");
        let local: f64 = tree
            .node(idx)
            .children
            .iter()
            .map(|child| nested.local.get(0, *child))
            .sum();
        assert!((local - 1.0).abs() < 1e-12, "{nest}");
    }

    let base = base_probabilities(&nested.local, &tree);
    let total: f64 = base.row(0).iter().sum();
    assert!((total - 1.0).abs() < 1e-12);
    assert!(base.row(0).iter().all(|p| *p > 0.0));

    // Each nest logsum is scaled by 0.7 before the upper-level split.
    let auto = 0.7 * ((2.0_f64 / 0.7).exp() + (1.0_f64 / 0.7).exp()).ln();
    let active = 0.7 * ((0.0_f64 / 0.7).exp() + (-1.0_f64 / 0.7).exp()).ln();
    let auto_share = auto.exp() / (auto.exp() + active.exp());
    assert!((base.row(0)[0] + base.row(0)[1] - auto_share).abs() < 1e-12);
}

#[test]
fn degenerate_nest_zeroes_children_without_panicking() {
    let tree = two_nest_tree(0.6);
    let utilities = Frame::from_rows(
        vec![1, 2],
        ["drive", "carpool", "walk", "bike"].map(String::from).to_vec(),
        vec![
            0.5,
            1.0,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
        ],
    )
    .expect("utilities");
    let (probs, degenerate) = nl_probabilities(&utilities, &tree);

    assert_eq!(&probs.row(0)[2..], &[0.0, 0.0]);
    assert!((probs.row(0).iter().sum::<f64>() - 1.0).abs() < 1e-12);
    assert_eq!(probs.row(1), &[0.0; 4]);
    assert_eq!(degenerate.get("active"), Some(&2));
    assert_eq!(degenerate.get("auto"), Some(&1));

    let mut diagnostics = ChunkDiagnostics::default();
    diagnostics.record_degenerate(degenerate);
    diagnostics.check_probabilities(&probs, 0.001);
    let report = diagnostics.into_report("mode_choice");
    assert!(report.has_bad_probabilities());
    assert!(report.diagnostics.contains(&Diagnostic::BadProbabilities {
        rows: 1,
        max_deviation: 1.0,
        example_keys: vec![2],
    }));
}

#[test]
fn utilities_equal_direct_matrix_product() {
    let table = EntityTable::new(vec![11, 12, 13, 14])
        .and_then(|t| t.with_column("size", vec![1.0, 2.0, 3.0, 4.0]))
        .and_then(|t| t.with_column("income", vec![10_i64, 0, 25, 5]))
        .expect("table");
    let spec = Spec::from_rows(
        vec!["a".into(), "b".into(), "c".into()],
        [("size * 2", vec![0.5, -1.0, 2.0]), ("income", vec![0.1, 0.0, -0.2])],
    )
    .expect("spec");

    let values = ExpressionPlan::for_spec(&spec)
        .and_then(|plan| plan.evaluate(&table.view(), &Environment::new()))
        .expect("values");
    assert_eq!(values.keys(), table.keys());
    assert_eq!(values.columns(), spec.expressions());

    let utilities = compute_utilities(&values, &spec).expect("utilities");
    let x = [[2.0, 10.0], [4.0, 0.0], [6.0, 25.0], [8.0, 5.0]];
    for (row, inputs) in x.iter().enumerate() {
        for alt in 0..3 {
            let direct = inputs[0] * spec.coefficient(0, alt) + inputs[1] * spec.coefficient(1, alt);
            assert!((utilities.get(row, alt) - direct).abs() < 1e-12);
        }
    }
}

#[test]
fn zero_probability_row_fails_at_sampling() {
    let table = EntityTable::new(vec![5, 6])
        .and_then(|t| t.with_column("blocked", vec![0.0, 1.0]))
        .expect("table");
    let spec = Spec::from_rows(
        vec!["stay".into(), "go".into()],
        [("log(blocked)", vec![1.0, 1.0])],
    )
    .expect("spec");
    let err = simple_simulate(
        &table,
        &spec,
        None,
        &Environment::new(),
        &RandomStream::new(4),
        &SimulateConfig::default(),
    )
    .expect_err("zero probabilities");
    assert!(matches!(
        err,
        SimulateError::ProbabilitySumBelowDraw { entity_key: 5, sum, .. } if sum == 0.0
    ));
}

const SPEC_CSV: &str = "\
Description,Expression,drive,carpool,walk,bike
Distance,@skims['DIST'],-0.2,-0.25,-1.1,-0.6
Peak congestion,@tod_skims['TIME'] * peak_factor,-0.05,-0.04,,
Young adults,age < 30,,0.3,0.2,0.6
# constants
Constant,@1,0,-0.6,0.4,-0.3
";

const PERSONS_CSV: &str = "\
person_id,age,home_zone,work_zone,period
1,24,1,2,AM
2,51,2,3,MD
3,33,3,1,AM
4,67,1,3,PM
5,19,2,1,MD
6,45,3,2,AM
";

const SETTINGS_JSON: &str = r#"{
    "LOGIT_TYPE": "NL",
    "NESTS": {
        "name": "root",
        "coefficient": 1.0,
        "alternatives": [
            {"name": "auto", "coefficient": 0.72, "alternatives": ["drive", "carpool"]},
            {"name": "nonmotorized", "coefficient": 0.72, "alternatives": ["walk", "bike"]}
        ]
    },
    "CONSTANTS": {"peak_factor": 1.4},
    "simulate": {"seed": "8675309", "chunk_size": 40, "worker_threads": 2, "trace_label": "tour_mode"}
}"#;

fn skims() -> Arc<SkimDict> {
    let dist = vec![0.4, 3.0, 7.5, 3.0, 0.6, 4.5, 7.5, 4.5, 0.5];
    let mut dict = SkimDict::new(vec![1, 2, 3])
        .and_then(|d| d.with_matrix("DIST", dist))
        .expect("skims");
    for (period, factor) in [("AM", 1.6), ("MD", 1.0), ("PM", 1.4)] {
        let time = [2.0, 9.0, 20.0, 9.0, 2.5, 12.0, 20.0, 12.0, 2.0]
            .iter()
            .map(|minutes| minutes * factor)
            .collect();
        dict.insert_matrix(format!("TIME__{period}"), time).expect("time");
    }
    Arc::new(dict)
}

#[test]
fn csv_inputs_and_settings_run_end_to_end() {
    let spec = read_model_spec(SPEC_CSV.as_bytes()).expect("spec");
    let persons = read_entity_table(PERSONS_CSV.as_bytes(), "person_id").expect("persons");
    let settings: ModelSettings = serde_json::from_str(SETTINGS_JSON).expect("settings");
    let config = settings.simulate.clone().expect("simulate config");
    let tree = NestTree::from_settings(&settings, spec.alternatives())
        .expect("nests")
        .expect("nested");

    let skims = skims();
    let env = Environment::from_constants(&settings.constants)
        .with_lookup("skims", skims.wrap("home_zone", "work_zone"))
        .with_lookup("tod_skims", skims.wrap_with_period("home_zone", "work_zone", "period"));
    assert_eq!(spec.expression_count(), 4);

    let stream = RandomStream::from_config(&config);
    let first = simple_simulate(&persons, &spec, Some(&tree), &env, &stream, &config).expect("simulate");
    let again = simple_simulate(
        &persons,
        &spec,
        Some(&tree),
        &env,
        &stream,
        &SimulateConfig {
            chunk_size: 0,
            worker_threads: 1,
            ..config.clone()
        },
    )
    .expect("unchunked");

    assert_eq!(first.choices, again.choices);
    assert_eq!(first.choices.len(), 6);
    assert!(first.report.is_clean(), "{:?}", first.report);
    assert_eq!(first.choices.value_counts().iter().map(|(_, n)| n).sum::<usize>(), 6);

    let logsums = simple_simulate_logsums(&persons, &spec, Some(&tree), &env, &config).expect("logsums");
    assert_eq!(logsums.logsums.keys, persons.keys());
    assert!(logsums.logsums.values.iter().all(|value| value.is_finite()));
}

#[test]
fn unknown_skim_zone_aborts_the_call() {
    let persons = EntityTable::new(vec![1])
        .and_then(|t| t.with_column("home_zone", vec![1_i64]))
        .and_then(|t| t.with_column("work_zone", vec![9_i64]))
        .expect("persons");
    let spec = Spec::from_rows(vec!["x".into(), "y".into()], [("@skims['DIST']", vec![1.0])]).expect("spec");
    let env = Environment::new().with_lookup("skims", skims().wrap("home_zone", "work_zone"));
    let err = simple_simulate_logsums(&persons, &spec, None, &env, &SimulateConfig::default())
        .expect_err("unknown zone");
    assert_eq!(err.expression(), Some("@skims['DIST']"));
    assert!(matches!(
        err,
        SimulateError::Evaluation {
            source: EvalError::Lookup(LookupError::UnknownZone { zone: 9, .. }),
            ..
        }
    ));
}

use choice_core::chunk::{row_size, Workload};
use choice_core::logit::{mnl_probabilities, nested_exp_utilities, nested_probabilities, nl_probabilities};
use choice_core::{
    simple_simulate, EntityTable, Environment, Frame, NestTree, RandomStream, Spec,
};
use contracts::{NestChild, NestSpec, SimulateConfig};
use proptest::prelude::*;

fn frame(rows: &[Vec<f64>], alternatives: &[String]) -> Frame {
    let keys = (0..rows.len() as u64).map(|k| 1_000 + k).collect();
    let data = rows.iter().flatten().copied().collect();
    Frame::from_rows(keys, alternatives.to_vec(), data).expect("frame")
}

fn names(count: usize) -> Vec<String> {
    (0..count).map(|idx| format!("alt_{idx}")).collect()
}

fn leaf(name: &str) -> NestChild {
    NestChild::Leaf(name.to_string())
}

/// Root over `split` leaves directly plus one nest holding the rest, which
/// itself nests its last two leaves when it has more than two.
fn layered_tree(alternatives: &[String], split: usize, outer: f64, inner: f64) -> NestTree {
    let (direct, nested) = alternatives.split_at(split);
    let mut nest_children: Vec<NestChild> = nested.iter().map(|name| leaf(name)).collect();
    if nest_children.len() > 2 {
        let tail = nest_children.split_off(nest_children.len() - 2);
        nest_children.push(NestChild::Nest(NestSpec {
            name: "inner".into(),
            coefficient: inner,
            alternatives: tail,
        }));
    }
    let mut root_children: Vec<NestChild> = direct.iter().map(|name| leaf(name)).collect();
    root_children.push(NestChild::Nest(NestSpec {
        name: "outer".into(),
        coefficient: outer,
        alternatives: nest_children,
    }));
    let spec = NestSpec {
        name: "root".into(),
        coefficient: 1.0,
        alternatives: root_children,
    };
    NestTree::new(&spec, alternatives).expect("tree")
}

fn utility_rows(alternatives: usize, range: f64) -> impl Strategy<Value = Vec<Vec<f64>>> {
    prop::collection::vec(prop::collection::vec(-range..range, alternatives), 1..6)
}

fn population(n: usize) -> EntityTable {
    let keys: Vec<u64> = (0..n as u64).map(|k| 7 * k + 3).collect();
    let income: Vec<f64> = (0..n).map(|i| ((i * 37) % 101) as f64 * 1.5).collect();
    let age: Vec<i64> = (0..n as i64).map(|i| 16 + (i * 13) % 70).collect();
    EntityTable::new(keys)
        .and_then(|t| t.with_column("income", income))
        .and_then(|t| t.with_column("age", age))
        .expect("population")
}

fn model_spec() -> Spec {
    Spec::from_rows(
        vec!["walk".into(), "bike".into(), "bus".into(), "car".into()],
        [
            ("income / 100", vec![0.0, 0.2, -0.4, 1.1]),
            ("age < 25", vec![0.6, 0.9, 0.3]),
            ("@1", vec![0.0, -0.5, 0.1, 0.4]),
        ],
    )
    .expect("spec")
}

proptest! {
    #[test]
    fn mnl_rows_sum_to_one(rows in (2_usize..8).prop_flat_map(|n| utility_rows(n, 60.0))) {
        let alternatives = names(rows[0].len());
        let probs = mnl_probabilities(&frame(&rows, &alternatives));
        for (_, row) in probs.iter_rows() {
            let total: f64 = row.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9, "row {:?}", row);
            prop_assert!(row.iter().all(|p| *p >= 0.0));
        }
    }

    #[test]
    fn mnl_is_shift_invariant(
        rows in (2_usize..8).prop_flat_map(|n| utility_rows(n, 30.0)),
        shift in -200.0_f64..200.0,
    ) {
        let alternatives = names(rows[0].len());
        let shifted: Vec<Vec<f64>> = rows
            .iter()
            .map(|row| row.iter().map(|u| u + shift).collect())
            .collect();
        let base = mnl_probabilities(&frame(&rows, &alternatives));
        let moved = mnl_probabilities(&frame(&shifted, &alternatives));
        for row in 0..base.rows() {
            for (a, b) in base.row(row).iter().zip(moved.row(row)) {
                prop_assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn unit_coefficient_nests_match_mnl(
        (rows, split) in (3_usize..7).prop_flat_map(|n| (utility_rows(n, 15.0), 0..n - 1)),
    ) {
        let alternatives = names(rows[0].len());
        let tree = layered_tree(&alternatives, split, 1.0, 1.0);
        let utilities = frame(&rows, &alternatives);
        let flat = mnl_probabilities(&utilities);
        let (nested, degenerate) = nl_probabilities(&utilities, &tree);
        prop_assert!(degenerate.is_empty());
        for row in 0..flat.rows() {
            for (a, b) in flat.row(row).iter().zip(nested.row(row)) {
                prop_assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn nested_probabilities_sum_to_one(
        (rows, split) in (3_usize..7).prop_flat_map(|n| (utility_rows(n, 8.0), 0..n - 1)),
        outer in 0.3_f64..=1.0,
        inner in 0.3_f64..=1.0,
    ) {
        let alternatives = names(rows[0].len());
        let tree = layered_tree(&alternatives, split, outer, inner);
        let utilities = frame(&rows, &alternatives);
        let local = nested_probabilities(&nested_exp_utilities(&utilities, &tree), &tree).local;
        for row in 0..local.rows() {
            for nest in tree.nests() {
                let total: f64 = tree.node(nest).children.iter().map(|c| local.get(row, *c)).sum();
                prop_assert!((total - 1.0).abs() < 1e-9);
            }
        }
        let (probs, _) = nl_probabilities(&utilities, &tree);
        for (_, row) in probs.iter_rows() {
            let total: f64 = row.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-3, "row {:?}", row);
        }
    }

    #[test]
    fn chunking_never_changes_choices(
        n in 1_usize..40,
        k_fraction in 0.0_f64..1.0,
        seed in any::<u64>(),
        threads in 1_u16..4,
    ) {
        let table = population(n);
        let spec = model_spec();
        let env = Environment::new();
        let stream = RandomStream::new(seed);
        let k = 1 + ((n - 1) as f64 * k_fraction) as usize;
        let cells_per_row = row_size(table.column_count(), &spec, None, Workload::Choices);

        let whole = simple_simulate(&table, &spec, None, &env, &stream, &SimulateConfig::default())
            .expect("whole population");
        let config = SimulateConfig {
            chunk_size: k * cells_per_row,
            worker_threads: threads,
            ..SimulateConfig::default()
        };
        let chunked = simple_simulate(&table, &spec, None, &env, &stream, &config).expect("chunked");

        prop_assert_eq!(chunked.choices.records.len(), n);
        for (a, b) in whole.choices.records.iter().zip(&chunked.choices.records) {
            prop_assert_eq!(a.entity_key, b.entity_key);
            prop_assert_eq!(a.alternative_index, b.alternative_index);
            prop_assert_eq!(a.draw.to_bits(), b.draw.to_bits());
        }
    }
}

#[test]
fn single_row_chunks_match_whole_population_for_nested_model() {
    let table = population(25);
    let spec = model_spec();
    let tree = layered_tree(spec.alternatives(), 1, 0.6, 0.45);
    let env = Environment::new();
    let stream = RandomStream::new(99).for_step("tour_mode_choice");
    let whole = simple_simulate(&table, &spec, Some(&tree), &env, &stream, &SimulateConfig::default())
        .expect("whole");
    let cells_per_row = row_size(table.column_count(), &spec, Some(&tree), Workload::Choices);
    for k in [1, 2, 7, 25] {
        let config = SimulateConfig {
            chunk_size: k * cells_per_row,
            worker_threads: 3,
            ..SimulateConfig::default()
        };
        let chunked = simple_simulate(&table, &spec, Some(&tree), &env, &stream, &config).expect("chunked");
        assert_eq!(chunked.choices, whole.choices, "rows per chunk {k}");
    }
}

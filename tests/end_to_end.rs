use ndarray::{array, s, Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use prefhull::config::{CONTROL_DIM, HORIZON, N_REWARD_FEATURES};
use prefhull::eval::confusion::eval_test;
use prefhull::eval::ground_truth::{find_reward_boundary, gaussian_rewards, CalibrationConfig};
use prefhull::filter::pipeline::{filter_halfplanes, FilterConfig};
use prefhull::normals::{normals_from_features, orient_normals};
use prefhull::oracle::{PreferenceOracle, SimulatedOracle};
use prefhull::posterior::{QueryType, SamplerConfig};
use prefhull::query::{select_query, Criterion};
use prefhull::sim::driver::DriverSim;
use prefhull::sweep::key::ExperimentKey;
use prefhull::sweep::runner::{pending_keys, persist_report, run_sweep, SweepConfig, SweepInputs};
use prefhull::sweep::store::ResultStore;
use prefhull::traj::optimizer::{OptimizerConfig, TrajOptimizer};

#[test]
fn test_identical_aligned_normals_reduce_to_one() {
    let true_reward = array![1.0, 0.0, 0.0, 0.0];
    let normals = Array2::from_shape_fn((10, 4), |(_, j)| if j == 0 { 1.0 } else { 0.0 });
    let mut features = Array3::zeros((10, 2, 4));
    features.index_axis_mut(Axis(1), 0).assign(&normals);

    let mut rng = StdRng::seed_from_u64(17);
    let rewards = gaussian_rewards(true_reward.view(), 0.05, 1000, &mut rng).unwrap();

    let config = FilterConfig {
        deterministic: true,
        ..Default::default()
    };
    let out = filter_halfplanes(
        features.view(),
        normals.view(),
        Array1::ones(10).view(),
        Some(rewards.view()),
        None,
        &config,
    )
    .unwrap();

    assert_eq!(out.indices, vec![0]);
    assert_eq!(out.normals, array![[1.0, 0.0, 0.0, 0.0]]);
}

#[test]
fn test_memoized_plan_is_not_recomputed() {
    let mut optimizer = TrajOptimizer::new(
        OptimizerConfig {
            n_planner_iters: 1,
            ..Default::default()
        },
        None,
    )
    .unwrap();
    let reward = array![0.5, -0.5, 0.5, -0.5];
    let start = optimizer.default_start_state();

    let (plan_a, loss_a) = optimizer.make_opt_traj(reward.view(), Some(start.view()), true).unwrap();
    let calls = optimizer.loss_evaluations();
    let (plan_b, loss_b) = optimizer.make_opt_traj(reward.view(), Some(start.view()), true).unwrap();

    assert_eq!(optimizer.loss_evaluations(), calls);
    assert_eq!(plan_a, plan_b);
    assert_eq!(loss_a.to_bits(), loss_b.to_bits());
    assert_eq!(plan_a.dim(), (HORIZON, CONTROL_DIM));
}

#[test]
fn test_empty_test_accepts_every_ground_truth_reward() {
    let true_reward = array![1.0, 0.0, 0.0];
    let normals = array![[1.0, 0.3, 0.0], [0.9, -0.2, 0.3], [0.8, 0.1, -0.4]];
    let gt = find_reward_boundary(
        true_reward.view(),
        normals.view(),
        0.0,
        &CalibrationConfig {
            n_rewards: 400,
            seed: 2,
            ..Default::default()
        },
    )
    .unwrap();
    assert!((0.45..=0.55).contains(&gt.aligned_fraction()));

    let m = eval_test(Array2::<f64>::zeros((0, 3)).view(), &gt).unwrap();
    let negatives = gt.aligned.iter().filter(|&&a| !a).count();
    assert_eq!(m.true_negatives(), 0);
    assert_eq!(m.false_positives(), negatives);
}

/// Simulated elicitation followed by a sweep, persisted and resumed.
#[test]
fn test_simulate_then_sweep_and_resume() {
    let n_queries = 12;
    let true_reward = array![0.5, -0.5, 0.5, -0.5];
    let mut sim = DriverSim::default();
    let mut oracle = SimulatedOracle::new(true_reward.clone(), QueryType::Strict);
    let mut rng = StdRng::seed_from_u64(8);
    let uninformed = gaussian_rewards(Array1::zeros(N_REWARD_FEATURES).view(), 1.0, 20, &mut rng).unwrap();

    let mut features = Array3::zeros((n_queries, 2, N_REWARD_FEATURES));
    let mut preferences = Array1::zeros(n_queries);
    for i in 0..n_queries {
        let q = select_query(&mut sim, uninformed.view(), Criterion::Volume, HORIZON, 3, &mut rng).unwrap();
        preferences[i] = oracle.ask(q.phi_a.view(), q.phi_b.view()).unwrap().value();
        features.slice_mut(s![i, 0, ..]).assign(&q.phi_a);
        features.slice_mut(s![i, 1, ..]).assign(&q.phi_b);
    }
    let raw = normals_from_features(features.view()).unwrap();
    let normals = orient_normals(raw.view(), preferences.view(), false, N_REWARD_FEATURES).unwrap();
    // the oracle's answers agree with the true reward
    assert!(normals.dot(&true_reward).iter().all(|&v| v >= 0.0));

    let inputs = SweepInputs {
        true_reward,
        input_features: features,
        normals,
        preferences,
        rewards: None,
    };
    let config = SweepConfig {
        epsilons: vec![0.0],
        deltas: vec![0.05, 0.2],
        n_human_samples: vec![6, 12],
        n_rewards: 200,
        n_model_samples: 100,
        reserve_cores: 0,
        sampler: SamplerConfig {
            burn_in: 100,
            ..Default::default()
        },
        ..Default::default()
    };

    let dir = tempfile::tempdir().unwrap();
    let mut indices: ResultStore<Vec<usize>> = ResultStore::load(dir.path().join("indices.bin"), false).unwrap();
    let mut confusion = ResultStore::load(dir.path().join("confusion.bin"), false).unwrap();

    let keys = pending_keys(&config.grid(), &indices);
    assert_eq!(keys.len(), 4);
    let report = run_sweep(&inputs, &keys, &config).unwrap();
    persist_report(&report, &mut indices, &mut confusion).unwrap();

    for outcome in &report.outcomes {
        assert!(outcome.indices.windows(2).all(|w| w[0] < w[1]));
        assert!(outcome.indices.iter().all(|&i| i < outcome.key.n_human_samples));
        assert_eq!(outcome.confusion.total(), 200);
    }

    let reopened: ResultStore<Vec<usize>> = ResultStore::load(dir.path().join("indices.bin"), false).unwrap();
    assert!(pending_keys(&config.grid(), &reopened).is_empty());
    assert!(reopened.contains(&ExperimentKey::new(0.0, 0.2, 12)));
}

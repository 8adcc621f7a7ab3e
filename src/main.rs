//! prefhull CLI.
//!
//! `simulate` elicits preferences from a simulated oracle, `plan` optimises a
//! trajectory for a reward, `sweep` filters and evaluates tests over a
//! parameter grid, and `pass-rate` scores perturbed rewards against a test.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ndarray::{s, Array1, Array2, Array3, Array4, Axis, Ix1, Ix2, Ix3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use prefhull::config::{AlignConfig, CONTROL_DIM, HORIZON, N_REWARD_FEATURES, REWARD_NORM_TOLERANCE};
use prefhull::eval::confusion::ConfusionMatrix;
use prefhull::eval::ground_truth::gaussian_rewards;
use prefhull::eval::pass_rate::run_test;
use prefhull::filter::pipeline::{filter_halfplanes, FilterConfig};
use prefhull::io::{load_array, save_array};
use prefhull::normals::{assert_unit_reward, normals_from_features, orient_normals};
use prefhull::oracle::{PreferenceOracle, SimulatedOracle};
use prefhull::posterior::{sample_rewards, MetropolisSampler, QueryType, SamplerConfig};
use prefhull::query::{select_query, Criterion};
use prefhull::sim::driver::DriverSim;
use prefhull::sweep::runner::{pending_keys, persist_report, run_sweep, SweepConfig, SweepInputs};
use prefhull::sweep::store::ResultStore;
use prefhull::traj::optimizer::{OptimizerConfig, TrajOptimizer};

const REWARD_FILE: &str = "reward.bin";
const INPUTS_FILE: &str = "inputs.bin";
const FEATURES_FILE: &str = "input_features.bin";
const NORMALS_FILE: &str = "normals.bin";
const PREFERENCES_FILE: &str = "preferences.bin";
const SAMPLES_FILE: &str = "rewards.bin";
const INDICES_STORE: &str = "indices.bin";
const CONFUSION_STORE: &str = "confusion.bin";

/// Preference halfspace tests for a simulated driver.
#[derive(Parser, Debug)]
#[command(name = "prefhull", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Elicit simulated preferences and write the query arrays.
    Simulate {
        #[arg(long, default_value = "preferences")]
        data_dir: PathBuf,

        #[arg(short = 'n', long, default_value_t = 100)]
        n_queries: usize,

        /// information, volume or random.
        #[arg(long, default_value = "volume")]
        criterion: Criterion,

        /// strict or weak.
        #[arg(long, default_value = "strict")]
        query_type: QueryType,

        /// Random candidates scored per query.
        #[arg(long, default_value_t = 50)]
        n_candidates: usize,

        /// Posterior samples used to score candidates.
        #[arg(long, default_value_t = 100)]
        n_posterior_samples: usize,

        /// Posterior samples saved as rewards.bin for deterministic sweeps.
        #[arg(long, default_value_t = 1000)]
        n_model_samples: usize,

        /// Load the true reward instead of drawing one.
        #[arg(long)]
        reward: Option<PathBuf>,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Optimise a trajectory for a reward and save the plan.
    Plan {
        #[arg(long)]
        reward: PathBuf,

        #[arg(long, default_value = "plan.bin")]
        out: PathBuf,

        #[arg(long, default_value_t = 10)]
        n_planner_iters: usize,
    },

    /// Filter and evaluate tests over an (epsilon, delta, n) grid.
    Sweep {
        #[arg(long, default_value = "preferences")]
        data_dir: PathBuf,

        /// Defaults to the data directory.
        #[arg(long)]
        out_dir: Option<PathBuf>,

        #[arg(long, num_args = 1.., default_values_t = vec![0.0])]
        epsilons: Vec<f64>,

        #[arg(long, num_args = 1.., default_values_t = vec![0.05])]
        deltas: Vec<f64>,

        #[arg(long, num_args = 1.., default_values_t = vec![100])]
        human_samples: Vec<usize>,

        #[arg(long, default_value_t = 100)]
        n_rewards: usize,

        #[arg(long, default_value_t = 1000)]
        n_model_samples: usize,

        /// Use rewards.bin instead of sampling the posterior.
        #[arg(long)]
        deterministic: bool,

        #[arg(long, default_value = "strict")]
        query_type: QueryType,

        #[arg(long)]
        skip_noise_filtering: bool,

        #[arg(long)]
        skip_epsilon_filtering: bool,

        #[arg(long)]
        skip_redundancy_filtering: bool,

        /// Recompute keys that already have results.
        #[arg(long)]
        overwrite: bool,

        #[arg(long, default_value_t = 2)]
        reserve_cores: usize,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Pass rate of noisy rewards against filtered tests.
    PassRate {
        #[arg(long, default_value = "preferences")]
        data_dir: PathBuf,

        #[arg(long, num_args = 1.., default_values_t = vec![1.0])]
        noises: Vec<f64>,

        #[arg(long, num_args = 1.., default_values_t = vec![1])]
        samples: Vec<usize>,

        #[arg(long, default_value_t = 100)]
        n_rewards: usize,

        #[arg(long, default_value_t = 1000)]
        n_model_samples: usize,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    tracing::info!("prefhull v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Simulate {
            data_dir,
            n_queries,
            criterion,
            query_type,
            n_candidates,
            n_posterior_samples,
            n_model_samples,
            reward,
            seed,
        } => simulate(
            &data_dir,
            n_queries,
            criterion,
            query_type,
            n_candidates,
            n_posterior_samples,
            n_model_samples,
            reward.as_deref(),
            seed,
        ),
        Command::Plan {
            reward,
            out,
            n_planner_iters,
        } => plan(&reward, &out, n_planner_iters),
        Command::Sweep {
            data_dir,
            out_dir,
            epsilons,
            deltas,
            human_samples,
            n_rewards,
            n_model_samples,
            deterministic,
            query_type,
            skip_noise_filtering,
            skip_epsilon_filtering,
            skip_redundancy_filtering,
            overwrite,
            reserve_cores,
            seed,
        } => {
            let config = SweepConfig {
                epsilons,
                deltas,
                n_human_samples: human_samples,
                n_rewards,
                n_model_samples,
                deterministic,
                reserve_cores,
                seed,
                filter: FilterConfig {
                    query_type,
                    skip_noise_filtering,
                    skip_epsilon_filtering,
                    skip_redundancy_filtering,
                    ..Default::default()
                },
                ..Default::default()
            };
            let out_dir = out_dir.unwrap_or_else(|| data_dir.clone());
            sweep(&data_dir, &out_dir, &config, overwrite)
        }
        Command::PassRate {
            data_dir,
            noises,
            samples,
            n_rewards,
            n_model_samples,
            seed,
        } => pass_rate(&data_dir, &noises, &samples, n_rewards, n_model_samples, seed),
    }
}

#[allow(clippy::too_many_arguments)]
fn simulate(
    data_dir: &Path,
    n_queries: usize,
    criterion: Criterion,
    query_type: QueryType,
    n_candidates: usize,
    n_posterior_samples: usize,
    n_model_samples: usize,
    reward_path: Option<&Path>,
    seed: u64,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let true_reward: Array1<f64> = match reward_path {
        Some(path) => load_array::<Ix1>(path).with_context(|| format!("loading reward from {}", path.display()))?,
        None => gaussian_rewards(Array1::zeros(N_REWARD_FEATURES).view(), 1.0, 1, &mut rng)?.row(0).to_owned(),
    };
    assert_unit_reward(true_reward.view(), REWARD_NORM_TOLERANCE).context("invalid true reward")?;
    tracing::info!(reward = ?true_reward.to_vec(), %criterion, "simulating preferences");

    let mut sim = DriverSim::default();
    let mut oracle = SimulatedOracle::new(true_reward.clone(), query_type);
    let mut sampler = MetropolisSampler::new(
        N_REWARD_FEATURES,
        SamplerConfig {
            seed,
            ..Default::default()
        },
    );

    let mut inputs = Array4::<f64>::zeros((n_queries, 2, HORIZON, CONTROL_DIM));
    let mut features = Array3::<f64>::zeros((n_queries, 2, N_REWARD_FEATURES));
    let mut preferences = Array1::<f64>::zeros(n_queries);

    for i in 0..n_queries {
        let w_samples = sample_rewards(
            &mut sampler,
            features.slice(s![..i, 0, ..]),
            features.slice(s![..i, 1, ..]),
            preferences.slice(s![..i]),
            n_posterior_samples,
            QueryType::Strict,
            0.0,
        )?;
        let query = select_query(&mut sim, w_samples.view(), criterion, HORIZON, n_candidates, &mut rng)?;
        let answer = oracle.ask(query.phi_a.view(), query.phi_b.view())?;

        inputs.slice_mut(s![i, 0, .., ..]).assign(&query.controls_a);
        inputs.slice_mut(s![i, 1, .., ..]).assign(&query.controls_b);
        features.slice_mut(s![i, 0, ..]).assign(&query.phi_a);
        features.slice_mut(s![i, 1, ..]).assign(&query.phi_b);
        preferences[i] = answer.value();
        tracing::debug!(query = i, ?answer, score = query.score, "answered");
    }

    let normals = orient_normals(normals_from_features(features.view())?.view(), preferences.view(), false, N_REWARD_FEATURES)?;
    let samples = sample_rewards(
        &mut sampler,
        features.index_axis(Axis(1), 0),
        features.index_axis(Axis(1), 1),
        preferences.view(),
        n_model_samples,
        QueryType::Strict,
        0.0,
    )?;

    for (name, result) in [
        (REWARD_FILE, save_array(&data_dir.join(REWARD_FILE), &true_reward)),
        (INPUTS_FILE, save_array(&data_dir.join(INPUTS_FILE), &inputs)),
        (FEATURES_FILE, save_array(&data_dir.join(FEATURES_FILE), &features)),
        (NORMALS_FILE, save_array(&data_dir.join(NORMALS_FILE), &normals)),
        (PREFERENCES_FILE, save_array(&data_dir.join(PREFERENCES_FILE), &preferences)),
        (SAMPLES_FILE, save_array(&data_dir.join(SAMPLES_FILE), &samples)),
    ] {
        result.with_context(|| format!("writing {name} to {}", data_dir.display()))?;
    }
    tracing::info!(n_queries, dir = %data_dir.display(), "preferences written");
    Ok(())
}

fn plan(reward_path: &Path, out: &Path, n_planner_iters: usize) -> Result<()> {
    let reward: Array1<f64> =
        load_array::<Ix1>(reward_path).with_context(|| format!("loading reward from {}", reward_path.display()))?;

    let config = OptimizerConfig {
        log_best_init: true,
        ..OptimizerConfig::from_align(&AlignConfig::default(), n_planner_iters)
    };
    let mut optimizer = TrajOptimizer::new(config, None)?;
    let (plan, loss) = optimizer.make_opt_traj(reward.view(), None, false)?;

    save_array(out, &plan).with_context(|| format!("writing plan to {}", out.display()))?;
    tracing::info!(loss, out = %out.display(), "plan written");
    Ok(())
}

fn sweep(data_dir: &Path, out_dir: &Path, config: &SweepConfig, overwrite: bool) -> Result<()> {
    let load2 = |name: &str| -> Result<Array2<f64>> {
        load_array::<Ix2>(&data_dir.join(name)).with_context(|| format!("loading {name} from {}", data_dir.display()))
    };
    let inputs = SweepInputs {
        true_reward: load_array::<Ix1>(&data_dir.join(REWARD_FILE)).context("loading true reward")?,
        input_features: load_array::<Ix3>(&data_dir.join(FEATURES_FILE)).context("loading input features")?,
        normals: load2(NORMALS_FILE)?,
        preferences: load_array::<Ix1>(&data_dir.join(PREFERENCES_FILE)).context("loading preferences")?,
        rewards: if config.deterministic { Some(load2(SAMPLES_FILE)?) } else { None },
    };

    let mut indices: ResultStore<Vec<usize>> = ResultStore::load(out_dir.join(INDICES_STORE), overwrite)?;
    let mut confusion: ResultStore<ConfusionMatrix> = ResultStore::load(out_dir.join(CONFUSION_STORE), overwrite)?;

    let keys = pending_keys(&config.grid(), &indices);
    if keys.is_empty() {
        tracing::info!("every experiment already has results");
        return Ok(());
    }

    let report = run_sweep(&inputs, &keys, config)?;
    persist_report(&report, &mut indices, &mut confusion).context("sweep finished with failures")?;
    Ok(())
}

fn pass_rate(
    data_dir: &Path,
    noises: &[f64],
    samples: &[usize],
    n_rewards: usize,
    n_model_samples: usize,
    seed: u64,
) -> Result<()> {
    let true_reward: Array1<f64> = load_array::<Ix1>(&data_dir.join(REWARD_FILE)).context("loading true reward")?;
    let features: Array3<f64> = load_array::<Ix3>(&data_dir.join(FEATURES_FILE)).context("loading input features")?;
    let normals: Array2<f64> = load_array::<Ix2>(&data_dir.join(NORMALS_FILE)).context("loading normals")?;
    let preferences: Array1<f64> = load_array::<Ix1>(&data_dir.join(PREFERENCES_FILE)).context("loading preferences")?;

    let config = FilterConfig {
        n_samples: Some(n_model_samples),
        ..Default::default()
    };
    let mut rng = StdRng::seed_from_u64(seed);

    for &n in samples {
        if n > normals.nrows() {
            bail!("{n} samples requested but only {} queries exist", normals.nrows());
        }
        let mut sampler = MetropolisSampler::new(
            features.len_of(Axis(2)),
            SamplerConfig {
                seed,
                ..Default::default()
            },
        );
        let test = filter_halfplanes(
            features.slice(s![..n, .., ..]),
            normals.slice(s![..n, ..]),
            preferences.slice(s![..n]),
            None,
            Some(&mut sampler),
            &config,
        )?;
        for &noise in noises {
            let rate = run_test(true_reward.view(), test.normals.view(), noise, n_rewards, &mut rng)?;
            tracing::info!(samples = n, noise, rate, kept = test.indices.len(), "pass rate");
        }
    }
    Ok(())
}

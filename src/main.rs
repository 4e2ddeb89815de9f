use std::{error::Error, path::PathBuf, time::Instant};

use candle_core::Tensor;
use clap::Parser;

use qac::{
    ActorCriticAgent, BoltzmannCritic, Environment, MlpActor, RunConfig, Transition,
    device::DEVICE, steering::TargetSteering,
};

#[derive(Parser, Debug)]
#[command(name = "qac", about = "Train an actor against an annealed Boltzmann critic")]
struct Args {
    /// JSON run configuration; defaults are used for anything it omits.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    episodes: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// CSV file receiving the per-call training diagnostics.
    #[arg(long, default_value = "output/training_log.csv")]
    log_csv: PathBuf,

    /// Where to write the trained weights.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Weights to start from.
    #[arg(long)]
    resume: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RunConfig::from_json_file(path)?,
        None => RunConfig::default(),
    };
    if let Some(episodes) = args.episodes {
        config.rollout.episodes = episodes;
    }
    if let Some(seed) = args.seed {
        config.agent.seed = Some(seed);
        config.critic.seed = Some(seed.wrapping_add(1));
    }
    config.validate()?;

    let mut env = TargetSteering::new(config.rollout.max_steps_per_episode, config.agent.seed)?;
    let observation_space = env.observation_space().clone();
    let action_space = env.action_space().clone();

    let critic = BoltzmannCritic::new(&observation_space, &action_space, config.critic.clone())?;
    let actor = MlpActor::new(
        &observation_space,
        &action_space,
        &config.agent.actor_hidden_layers,
        config.agent.actor_learning_rate,
    )?;
    let mut agent = ActorCriticAgent::new(
        observation_space,
        action_space,
        critic,
        actor,
        config.agent.clone(),
    )?;
    if let Some(path) = &args.resume {
        agent.load(path)?;
    }

    let start = Instant::now();
    for episode in 1..=config.rollout.episodes {
        agent.set_random_phase(episode <= config.rollout.random_phase_episodes);

        let mut state = env.reset();
        let mut episode_reward = 0.0;
        let mut steps = 0;
        for _ in 0..config.rollout.max_steps_per_episode {
            let state_tensor = Tensor::from_slice(&state, state.len(), &DEVICE)?;
            let action = agent
                .get_action(&state_tensor, None, episode)?
                .flatten_all()?
                .to_vec1::<f32>()?;
            let step = env.step(&action);
            agent.push(Transition {
                state: state.clone(),
                action,
                reward: step.reward,
                next_state: step.next_state.clone(),
                done: step.done,
            })?;
            if agent.replay_memory().len() >= config.agent.batch_size {
                agent.train()?;
            }

            episode_reward += step.reward;
            steps += 1;
            state = step.next_state;
            if step.done {
                break;
            }
        }

        log::info!(
            "[Episode {}] steps {}, reward {:.4}, final distance {:.4}",
            episode,
            steps,
            episode_reward,
            env.distance()
        );
    }
    log::info!(
        "Training finished in {}s ({} training calls)",
        start.elapsed().as_secs(),
        agent.training_log().len()
    );

    if let Some(parent) = args.log_csv.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    log::info!("Writing diagnostics to {}", args.log_csv.display());
    agent.training_log().write_csv(&args.log_csv)?;

    if let Some(path) = &args.checkpoint {
        agent.save(path)?;
    }
    Ok(())
}

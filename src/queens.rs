use anyhow::{bail, Context as _};
use implicit_search::best_first::random_completion::RandomCompletion;
use implicit_search::best_first::BestFirst;
use implicit_search::config::SearchConfig;
use implicit_search::distributed::{Coordinator, Coworker, InProcessTransport};
use implicit_search::lifecycle::Solution;
use implicit_search::mcts::{
    BradleyTerry, Ensemble, Mcts, NormalGammaThompson, RiskSensitive, TreePolicy, Ucb1, UniformRandom,
};
use implicit_search::toy_problems::queens::{Board, Conflicts, NoConflicts, Queens};
use implicit_search::{Algorithm, Context, Run, SearchProblem};
use log::info;
use std::sync::Arc;
use text_io::read;

fn problem(n: usize) -> SearchProblem<Board, usize> {
    SearchProblem::new(Queens::new(n), NoConflicts, Conflicts)
}

fn tree_policy(name: &str) -> anyhow::Result<Box<dyn TreePolicy>> {
    let policy: Box<dyn TreePolicy> = match name {
        "ucb1" => Box::new(Ucb1::default()),
        "thompson" => Box::new(NormalGammaThompson::default()),
        "risk" => Box::new(RiskSensitive::new(std::f64::consts::SQRT_2, 1.0)),
        "bradley-terry" => Box::new(BradleyTerry::default()),
        "ensemble" => Box::new(Ensemble::new(vec![
            Box::new(Ucb1::default()),
            Box::new(NormalGammaThompson::default()),
            Box::new(BradleyTerry::default()),
        ])),
        other => bail!("unknown tree policy {}", other),
    };
    Ok(policy)
}

/// Runs until the first solution or the end of the run, then stops.
fn first_solution<A: Algorithm<State = Board, Action = usize>>(
    algorithm: A,
    config: &SearchConfig,
) -> anyhow::Result<Option<Solution<Board, usize>>> {
    let mut run = Run::with_config(algorithm, &config.run);
    let solution = run.next_solution()?;
    run.cancel();
    let outcome = run.run()?;
    info!(
        "{} stopped after {} events in {}ms: {}",
        run.algorithm().name(),
        run.events().len(),
        run.elapsed().as_millis(),
        outcome
    );
    Ok(solution)
}

fn show(solution: &Option<Solution<Board, usize>>) {
    match solution {
        Some(s) => println!("{}score {}", s.path.head(), s.score),
        None => println!("no solution"),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let mut config = match std::env::args().nth(1) {
        Some(path) => SearchConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => {
            let mut config = SearchConfig::default();
            config.apply_env_overrides()?;
            config
        }
    };

    let mut n = 8;
    let mut last = None;
    println!("{}-queens, {} evaluation threads", n, config.best_first.threads);
    loop {
        let token: String = read!();
        match token.as_str() {
            "exit" | "quit" => return Ok(()),
            "size" => {
                let size: usize = read!();
                if size == 0 {
                    println!("size must be at least 1");
                    continue;
                }
                n = size;
                println!("{}-queens", n);
            }
            "timeout" => {
                let ms: u64 = read!();
                config.run.timeout_ms = if ms == 0 { None } else { Some(ms) };
            }
            "threads" => {
                let previous = config.best_first.threads;
                config.best_first.threads = read!();
                match config.validate() {
                    Ok(()) => println!("Using {} threads", config.best_first.threads),
                    Err(e) => {
                        println!("{}", e);
                        config.best_first.threads = previous;
                    }
                }
            }
            "board" => show(&last),
            "bf" => {
                last = first_solution(BestFirst::new(problem(n), config.best_first.clone()), &config)?;
                show(&last);
            }
            "rc" => {
                let (wrapped, completion) = RandomCompletion::wrap(&problem(n), config.random_completion.clone());
                last = first_solution(BestFirst::new(wrapped, config.best_first.clone()), &config)?;
                println!("{:?}", completion.stats());
                show(&last);
            }
            "mcts" => {
                let name: String = read!();
                let policy = match tree_policy(&name) {
                    Ok(p) => p,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };
                let mcts = Mcts::new(problem(n), policy, UniformRandom, config.mcts.clone());
                last = first_solution(mcts, &config)?;
                show(&last);
            }
            "dist" => {
                let coworkers: usize = read!();
                let transport = Arc::new(InProcessTransport::new());
                let crew = Context::new();
                let handles: Vec<_> = (0..coworkers)
                    .map(|i| {
                        let coworker =
                            Coworker::new(format!("coworker-{}", i), transport.clone(), problem(n), config.best_first.clone())
                                .with_local_expansions(16);
                        (coworker.id().to_string(), coworker.spawn(crew.clone()))
                    })
                    .collect();
                let coordinator = Coordinator::new(problem(n), transport, config.coordinator.clone());
                last = first_solution(coordinator, &config)?;
                crew.cancel();
                for (id, h) in handles {
                    let jobs = h.join().map_err(|_| anyhow::anyhow!("{} panicked", id))??;
                    info!("{} served {} jobs", id, jobs);
                }
                show(&last);
            }
            _ => println!("commands: size <n>, timeout <ms>, threads <n>, bf, rc, mcts <policy>, dist <n>, board, quit"),
        }
    }
}

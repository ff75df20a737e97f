use std::path::Path;
use std::rc::Rc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ani::cli::CliArgs;
use ani::config::Config;
use ani::error::{CompileError, Error, Result};
use ani::sched::{RoundReport, Scheduler};
use ani::script::registry::Output;
use ani::script::{compile, Program, ScriptThread, SimpleRegistry};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = CliArgs::parse();
    setup_logging(args.log_level());

    if let Err(e) = run(args).await {
        eprintln!("ani: {e}");
        if let Error::Compile { source: CompileError::Diagnostics(diags), .. } = &e {
            for d in diags {
                eprintln!("  {d}");
            }
        }
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins over `-v`/`-q`.
fn setup_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(args: CliArgs) -> Result<()> {
    let (cfg, errors) = args.resolve_config()?;
    for e in &errors {
        warn!("config {e}");
    }

    let output = Output::default();
    let mut programs = Vec::with_capacity(args.scripts.len());
    for path in &args.scripts {
        programs.push(load(path, &output)?);
    }

    if args.check {
        for (path, _, _) in &programs {
            println!("{}: ok", path);
        }
        return Ok(());
    }

    let mut sched = Scheduler::new();
    for (name, program, registry) in programs {
        sched.spawn(ScriptThread::new(name, Rc::new(program), Rc::new(registry), cfg.switch_policy()));
    }

    let flush = |_: &RoundReport| {
        for line in output.borrow_mut().drain(..) {
            println!("{line}");
        }
    };
    let done = match cfg.tick() {
        Some(tick) => sched.run_paced(tick, cfg.max_rounds, flush).await,
        None => sched.run_until_idle_with(cfg.max_rounds, flush),
    };

    report(&sched, &cfg, done);
    Ok(())
}

fn load(path: &Path, output: &Output) -> Result<(String, Program, SimpleRegistry)> {
    let src = std::fs::read_to_string(path).map_err(|source| Error::Io { path: path.to_owned(), source })?;
    let mut registry = SimpleRegistry::with_output(Rc::clone(output));
    let program = compile(&src, &mut registry).map_err(|source| Error::Compile { path: path.to_owned(), source })?;
    info!(path = %path.display(), "compiled");
    Ok((path.display().to_string(), program, registry))
}

fn report(sched: &Scheduler, cfg: &Config, done: bool) {
    for f in sched.finished() {
        match &f.result {
            Some(v) => info!(thread = %f.name, slices = f.slices, result = %v, "finished"),
            None => info!(thread = %f.name, slices = f.slices, "finished"),
        }
    }
    if !done {
        warn!(rounds = sched.rounds(), limit = ?cfg.max_rounds, left = sched.len(), "round limit reached");
    }
}

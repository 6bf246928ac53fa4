use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use rj::backend::{Backend, ExactBackend, ProcessBackend};
use rj::cli::{self, CliArgs};
use rj::config::Config;
use rj::random::SineRandom;
use rj::script::{registry, sort_keys, Diagnostic, Engine, EvalOutput, Settings};

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let default_level = match (args.debug, args.verbose) {
        (true, _) => "debug",
        (false, true) => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("rj: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &CliArgs) -> anyhow::Result<ExitCode> {
    if args.show_banner() {
        println!("Red Juice v{}\n", cli::VERSION);
    }

    // ── Config ────────────────────────────────────────────────────────────────
    let config_path = args.config.clone().or_else(cli::find_user_config);
    let config = match config_path {
        Some(path) => {
            let (config, errors) = Config::load_file(&path)
                .with_context(|| format!("cannot read config {}", path.display()))?;
            for e in errors {
                eprintln!("rj: warning: {}: {e}", path.display());
            }
            config
        }
        None => Config::new(),
    };

    // Values are shown raw unless LaTeX is asked for.
    let mut settings = Settings { presentation: false, ..Settings::default() };
    config.apply_to(&mut settings);
    if args.latex {
        settings.presentation = true;
    }
    if let Some(limit) = args.limit {
        settings.line_limit = usize::try_from(limit).unwrap_or(usize::MAX);
    }

    // ── Backend ───────────────────────────────────────────────────────────────
    let backend: Box<dyn Backend> = match args.backend.clone().or_else(|| config.backend.clone()) {
        Some(program) => Box::new(ProcessBackend::new(program, config.backend_args.clone())),
        None => Box::new(ExactBackend::new()),
    };
    backend.probe().context("backend unavailable")?;

    let random = match args.seed.or(config.seed) {
        Some(seed) => SineRandom::new(seed),
        None => SineRandom::from_entropy(),
    };
    let mut engine = Engine::new(settings, backend, Box::new(random));
    tracing::debug!(seed = engine.seed(), ?settings, "engine ready");

    // ── Input ─────────────────────────────────────────────────────────────────
    let code = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?,
        None if !stdin_is_tty() => {
            let mut code = String::new();
            std::io::stdin().read_to_string(&mut code).context("cannot read stdin")?;
            if code.ends_with('\n') {
                code.pop();
            }
            code
        }
        None => {
            eprintln!("Please specify a file\n");
            eprintln!("{}", CliArgs::command().render_usage());
            return Ok(ExitCode::from(2));
        }
    };

    // ── Verify ────────────────────────────────────────────────────────────────
    let t0 = Instant::now();
    let errors = engine.verify(&code);
    if args.verbose {
        tracing::info!(
            elapsed = ?t0.elapsed(),
            errors = errors.len(),
            functions = registry::function_names().len(),
            "verified"
        );
    }
    if !errors.is_empty() {
        report_errors(args, &errors)?;
        return Ok(ExitCode::FAILURE);
    }

    // ── Evaluate ──────────────────────────────────────────────────────────────
    let t0 = Instant::now();
    let mut output = engine.eval(&code);
    if args.verbose {
        tracing::info!(elapsed = ?t0.elapsed(), blocks = output.content.len(), "evaluated");
    }
    if args.final_keys {
        let content = sort_keys(&output.content)
            .into_iter()
            .filter_map(|k| output.content.get(&k).cloned().map(|v| (k, v)))
            .collect();
        output.content = content;
    }
    report_output(args, &output)?;
    Ok(ExitCode::SUCCESS)
}

fn report_errors(args: &CliArgs, errors: &[Diagnostic]) -> anyhow::Result<()> {
    if args.json_output() {
        let text = serde_json::to_string_pretty(errors)?;
        return emit_json(args, &text);
    }
    eprintln!("{} errors in file :", errors.len());
    for e in errors {
        eprintln!("{e}");
    }
    Ok(())
}

fn report_output(args: &CliArgs, output: &EvalOutput) -> anyhow::Result<()> {
    if args.json_output() {
        let text = serde_json::to_string_pretty(output)?;
        return emit_json(args, &text);
    }
    for (key, text) in output.content.iter() {
        if key.is_empty() {
            println!("{text}");
        } else {
            println!("{key}\n{text}");
        }
    }
    Ok(())
}

fn emit_json(args: &CliArgs, text: &str) -> anyhow::Result<()> {
    match &args.output {
        Some(path) => {
            write_output(path, text)?;
            if !args.quiet {
                println!("Output written in {}", path.display());
            }
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn write_output(path: &Path, text: &str) -> anyhow::Result<()> {
    if path.is_dir() {
        bail!("{} is a directory", path.display());
    }
    std::fs::write(path, text).with_context(|| format!("cannot write {}", path.display()))
}

fn stdin_is_tty() -> bool {
    unsafe { libc::isatty(libc::STDIN_FILENO) != 0 }
}

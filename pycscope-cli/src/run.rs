use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::Context;
use pycscope::{
    rules::{ConfigRules, CpythonRules, Rules},
    Pyc,
};

use crate::app::Cli;

/// Process exit codes, kept stable for scripting around the tool.
pub mod exit {
    /// Success (also help and version)
    pub const OK: i32 = 0;
    /// The input file does not exist
    pub const INPUT_MISSING: i32 = 1;
    /// The output file exists and `--force` was not given
    pub const OUTPUT_EXISTS: i32 = 2;
    /// The input positional was not given
    pub const MISSING_INPUT_ARG: i32 = 3;
    /// The output positional was not given
    pub const MISSING_OUTPUT_ARG: i32 = 4;
    /// The rules file does not exist or failed to load
    pub const RULES_MISSING: i32 = 6;
    /// The rules rejected the input as incompatible
    pub const INCOMPATIBLE: i32 = 7;
    /// The walk hit an unknown, unremapped type code
    pub const UNKNOWN_TYPECODE: i32 = 8;
    /// Bad `--debug` value
    pub const BAD_DEBUG: i32 = 9;
    /// The walk hit a malformed long integer
    pub const MALFORMED_LONG: i32 = 11;
}

const DEFAULT_RULES: &str = "./default.pycrules";
const WATCH_POLL: Duration = Duration::from_millis(500);

/// Validate the surface, run one rewrite and, with `--watch`, keep re-running.
pub fn run(cli: &Cli) -> i32 {
    let Some(input) = &cli.input else {
        eprintln!("missing <input.pyc> argument");
        return exit::MISSING_INPUT_ARG;
    };
    let Some(output) = &cli.output else {
        eprintln!("missing <output.pyc> argument");
        return exit::MISSING_OUTPUT_ARG;
    };

    if !input.exists() {
        log::error!("input file {} does not exist", input.display());
        return exit::INPUT_MISSING;
    }
    if output.exists() && !cli.force {
        log::error!(
            "output file {} exists, pass --force to overwrite",
            output.display()
        );
        return exit::OUTPUT_EXISTS;
    }

    let rules = match load_rules(cli) {
        Ok(rules) => rules,
        Err(code) => return code,
    };

    if let Err(error) = rewrite_once(input, output, rules.as_ref()) {
        log::error!("{error}");
        return error_code(&error);
    }

    match &cli.watch {
        Some(command) => watch_loop(input, output, rules.as_ref(), command),
        None => exit::OK,
    }
}

/// Pick the rule set: an explicit `--rules` path must exist; otherwise the
/// default rules file is used when present and the built-in identity rules when
/// not.
fn load_rules(cli: &Cli) -> Result<Box<dyn Rules>, i32> {
    let path = match &cli.rules {
        Some(path) => {
            if !path.exists() {
                log::error!("rules file {} does not exist", path.display());
                return Err(exit::RULES_MISSING);
            }
            path.clone()
        }
        None => {
            let default = PathBuf::from(DEFAULT_RULES);
            if !default.exists() {
                log::debug!("no rules file, using built-in CPython identity rules");
                return Ok(Box::new(CpythonRules::new()));
            }
            default
        }
    };

    match ConfigRules::from_path(&path) {
        Ok(rules) => Ok(Box::new(rules)),
        Err(error) => {
            log::error!("failed to load rules file {}: {error}", path.display());
            Err(exit::RULES_MISSING)
        }
    }
}

/// One load-walk-persist cycle.
fn rewrite_once(input: &Path, output: &Path, rules: &dyn Rules) -> pycscope::Result<()> {
    let pyc = Pyc::from_path(input)?;
    let walked = pyc.rewrite(rules)?;

    std::fs::write(output, &walked.data)?;

    log::info!(
        "wrote {} bytes to {} (version {}, {} mappers, {} code objects, {} type codes and {} opcodes substituted)",
        walked.data.len(),
        output.display(),
        walked.header.version,
        walked.stats.mappers,
        walked.stats.code_objects,
        walked.stats.typecode_swaps,
        walked.stats.opcode_swaps,
    );
    Ok(())
}

/// Poll the input's mtime, re-running the rewrite and the user command on change.
///
/// Runs until interrupted; a failing rewrite or command is logged and the loop
/// keeps watching.
fn watch_loop(input: &Path, output: &Path, rules: &dyn Rules, command: &str) -> i32 {
    log::info!("watching {} (Ctrl+C to stop)", input.display());

    let mut last_seen = modified_at(input);
    if let Err(error) = spawn_command(command) {
        log::error!("{error:#}");
    }

    loop {
        std::thread::sleep(WATCH_POLL);

        let current = modified_at(input);
        if current == last_seen {
            continue;
        }
        last_seen = current;

        match rewrite_once(input, output, rules) {
            Ok(()) => {
                if let Err(error) = spawn_command(command) {
                    log::error!("{error:#}");
                }
            }
            Err(error) => log::error!("rewrite failed: {error}"),
        }
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn spawn_command(command: &str) -> anyhow::Result<()> {
    let status = std::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .with_context(|| format!("failed to spawn watch command '{command}'"))?;

    if !status.success() {
        log::warn!("watch command exited with {status}");
    }
    Ok(())
}

/// Map walk failures to the documented exit codes.
fn error_code(error: &pycscope::Error) -> i32 {
    match error {
        pycscope::Error::Incompatible => exit::INCOMPATIBLE,
        pycscope::Error::UnknownTypeCode(_) => exit::UNKNOWN_TYPECODE,
        pycscope::Error::MalformedLong(_) => exit::MALFORMED_LONG,
        pycscope::Error::FileError(io) if io.kind() == std::io::ErrorKind::NotFound => {
            exit::INPUT_MISSING
        }
        // Structural damage and everything else: generic failure.
        _ => 1,
    }
}

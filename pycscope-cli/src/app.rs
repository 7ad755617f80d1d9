use std::path::PathBuf;

use clap::Parser;

/// pycscope - restore obfuscated CPython .pyc modules for decompilation
#[derive(Debug, Parser)]
#[command(name = "pycscope", version, about, long_about = None)]
pub struct Cli {
    /// Path to the obfuscated input module.
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// Path the restored module is written to.
    #[arg(value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Rules file driving the substitutions (default: ./default.pycrules when present).
    #[arg(long, value_name = "PATH")]
    pub rules: Option<PathBuf>,

    /// Overwrite the output file if it already exists.
    #[arg(long)]
    pub force: bool,

    /// Suppress all logging output.
    #[arg(long)]
    pub silent: bool,

    /// Logging verbosity: 0 errors only, 1 info, 2 debug, 3 trace.
    #[arg(long, value_name = "LEVEL")]
    pub debug: Option<String>,

    /// Watch the input and re-run on change, spawning COMMAND after every rewrite.
    #[arg(long, value_name = "COMMAND")]
    pub watch: Option<String>,
}

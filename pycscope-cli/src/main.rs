mod app;
mod run;

use clap::Parser;

use crate::app::Cli;

fn main() {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // --debug selects the level, --silent suppresses the logger entirely;
    // RUST_LOG still overrides for debugging the tool itself.
    let level = match cli.debug.as_deref() {
        None | Some("1") => log::LevelFilter::Info,
        Some("0") => log::LevelFilter::Error,
        Some("2") => log::LevelFilter::Debug,
        Some("3") => log::LevelFilter::Trace,
        Some(other) => {
            eprintln!("invalid --debug level '{other}' (expected 0-3)");
            std::process::exit(run::exit::BAD_DEBUG);
        }
    };

    if !cli.silent {
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    std::process::exit(run::run(&cli));
}

use clap::Parser;
use log::LevelFilter;

use milliongrid::cli::{self, CliArgs};
use milliongrid::logger;

fn main() -> std::process::ExitCode {
    let args = CliArgs::parse();
    let settings = args.load_settings();

    let (level, mirror) = if args.verbose {
        (LevelFilter::Debug, true)
    } else {
        (settings.log_level, settings.log_to_stderr)
    };
    // Initialize session log (overwrites previous session log)
    logger::init(level, mirror);

    cli::run(args, &settings)
}

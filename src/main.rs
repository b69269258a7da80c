use std::process::ExitCode;

use clap::Parser;

use colorbook::cli::{self, CliArgs};
use colorbook::logger;
use colorbook::settings::AppSettings;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Settings first: they carry the log level.
    let settings = AppSettings::load();

    // Initialize session log (overwrites previous session log)
    logger::init(settings.log_level);
    logger::set_echo_stderr(args.verbose);

    cli::run(args, &settings)
}

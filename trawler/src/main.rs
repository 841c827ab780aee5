use clap::builder::Styles;
use colored::Colorize;
use commands::command_argument_builder;
use std::path::PathBuf;
use trawler::handlers::{
    error_exit_code, handle_init, handle_report, handle_resume_point, handle_run,
    handle_sessions, init_logging,
};
use trawler_core::print_banner;

mod commands;

pub(crate) const CLAP_STYLING: Styles = Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");
    let verbosity = chosen_command.get_count("verbose");
    let log_file = chosen_command.get_one::<PathBuf>("log-file");

    if let Err(e) = init_logging(verbosity, log_file.map(PathBuf::as_path)) {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    let result = match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command).map(|_| 0),
        Some(("run", primary_command)) => handle_run(primary_command).await,
        Some(("resume-point", primary_command)) => {
            handle_resume_point(primary_command).map(|_| 0)
        }
        Some(("sessions", primary_command)) => handle_sessions(primary_command).map(|_| 0),
        Some(("report", primary_command)) => handle_report(primary_command).map(|_| 0),
        // No subcommand provided, just show the banner
        None => Ok(0),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            std::process::exit(error_exit_code(&e));
        }
    }
}

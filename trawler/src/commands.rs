use crate::CLAP_STYLING;
use clap::{arg, command};

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("trawler")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("trawler")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner and non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-v --"verbose" ... "Increase log verbosity (-v debug, -vv trace)")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(--"log-file" <PATH>)
                .required(false)
                .help("Mirror log output to this file (no colors)")
                .value_parser(clap::value_parser!(std::path::PathBuf))
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the trawler config directory, run journal and a sample job file")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location of the trawler config directory")
                        .default_value("~/.config/trawler/"),
                )
                .arg(
                    arg!(-f --"force")
                        .help(
                            "Recreate the journal and overwrite the sample job file if they \
                        already exist.",
                        )
                        .required(false),
                ),
        )
        .subcommand(
            command!("run")
                .about(
                    "Page through a listing, extract records and append them to the job's \
                output. Resumes after the last page already written.",
                )
                .arg(
                    arg!(-c --"config" <JOB>)
                        .required(true)
                        .help("Path to the job file (TOML)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"start-page" <N>)
                        .required(false)
                        .help("Start at this page instead of resuming from the output")
                        .value_parser(clap::value_parser!(u32)),
                )
                .arg(
                    arg!(--"max-pages" <N>)
                        .required(false)
                        .help("Never go past this many pages (counted from page 0)")
                        .value_parser(clap::value_parser!(u32)),
                )
                .arg(
                    arg!(--"max-records" <N>)
                        .required(false)
                        .help("Stop after writing this many records")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--"prefer-cache")
                        .required(false)
                        .help("Serve any cached page without revalidating it (offline re-runs)")
                        .action(clap::ArgAction::SetTrue)
                        .conflicts_with("no-cache"),
                )
                .arg(
                    arg!(--"no-cache")
                        .required(false)
                        .help("Neither read nor write the response cache")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"fresh")
                        .required(false)
                        .help("Truncate the output, clear the cache namespace and start over")
                        .action(clap::ArgAction::SetTrue)
                        .conflicts_with("start-page"),
                )
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("Run journal location (default: ~/.config/trawler/trawler.db)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"no-journal")
                        .required(false)
                        .help("Do not record this run in the journal")
                        .action(clap::ArgAction::SetTrue)
                        .conflicts_with("db"),
                ),
        )
        .subcommand(
            command!("resume-point")
                .about("Print the page a resumed run of the job would start at")
                .arg(
                    arg!(-c --"config" <JOB>)
                        .required(true)
                        .help("Path to the job file (TOML)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
        .subcommand(
            command!("sessions")
                .about("List runs recorded in the journal, newest first")
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("Run journal location (default: ~/.config/trawler/trawler.db)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
        .subcommand(
            command!("report")
                .about("Summarize one recorded run")
                .arg(arg!(<SESSION>).required(true).help("Session id, as shown by `trawler sessions`"))
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("Run journal location (default: ~/.config/trawler/trawler.db)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
}

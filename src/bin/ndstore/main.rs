use anyhow::Result;
use clap::Parser;

mod cli;
mod util;
mod cmd_status;
mod cmd_doctor;
mod cmd_free_lists;
mod cmd_checksums;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Status { path, json } => cmd_status::exec(path, json),

        cli::Cmd::Doctor { path, json } => cmd_doctor::exec(path, json),

        cli::Cmd::FreeLists { path, min_size, json } => cmd_free_lists::exec(path, min_size, json),

        cli::Cmd::Checksums { path, json } => cmd_checksums::exec(path, json),
    }
}

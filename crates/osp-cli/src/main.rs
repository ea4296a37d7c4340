//! ospctl: command-line tools for Open Screen Protocol agents.
//!
//! Everything runs in-process; `demo` wires two agents together over the
//! in-memory transport.

mod cli;
mod cmd;
mod ui;

use crate::cli::*;
use clap::Parser;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    match cli.command {
        Commands::Psk(sub) => match sub {
            PskCommands::Generate { bits, json } => cmd::psk::cmd_psk_generate(cli.config, bits, json),
            PskCommands::Encode { hex } => cmd::psk::cmd_psk_encode(&hex),
            PskCommands::Decode { code } => cmd::psk::cmd_psk_decode(&code),
        },
        Commands::Config(sub) => match sub {
            ConfigCommands::Show { json } => cmd::config::cmd_config_show(cli.config, json),
            ConfigCommands::Check => cmd::config::cmd_config_check(cli.config),
        },
        Commands::Advertise { spki, token, json } => {
            cmd::config::cmd_advertise(cli.config, &spki, token, json)
        }
        Commands::Demo {
            label,
            message,
            wrong_psk,
        } => cmd::demo::cmd_demo(cli.config, &label, &message, wrong_psk),
    }
}

//! Clap CLI definitions for ospctl.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  ospctl psk generate --bits 40     Generate a PSK and show it as a numeric code
  ospctl psk decode 123-456         Turn an entered code back into PSK bytes
  ospctl config show                Print the effective agent configuration
  ospctl demo                       Connect two in-process agents end to end";

/// ospctl: tools for Open Screen Protocol agents.
#[derive(Parser)]
#[command(name = "ospctl", version, about = "Open Screen Protocol agent tools", after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to the agent config file (TOML).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate and convert pre-shared keys [*].
    #[command(subcommand)]
    Psk(PskCommands),
    /// Inspect the agent configuration [*].
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Print the TXT records this agent would advertise.
    Advertise {
        /// Certificate SPKI (hex) the fingerprint is derived from.
        #[arg(long)]
        spki: String,
        /// Auth-initiation token; random when omitted.
        #[arg(long)]
        token: Option<String>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Connect two in-process agents: discovery, info exchange, PAKE and a
    /// data channel.
    Demo {
        /// Label of the data channel to open.
        #[arg(long, default_value = "chat")]
        label: String,
        /// Text sent over the channel.
        #[arg(long, default_value = "hi")]
        message: String,
        /// Give the consumer a wrong PSK to watch authentication fail.
        #[arg(long)]
        wrong_psk: bool,
    },
}

#[derive(Subcommand)]
pub enum PskCommands {
    /// Generate a random PSK.
    Generate {
        /// Minimum entropy in bits (20-60). Defaults to the configured value.
        #[arg(long)]
        bits: Option<u8>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show hex PSK bytes as a numeric code.
    Encode {
        /// PSK bytes in hex, at most 8 bytes.
        hex: String,
    },
    /// Turn a numeric code back into hex PSK bytes.
    Decode {
        /// The code as entered, dashes optional.
        code: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration.
    Show {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Validate a config file and exit non-zero if it is invalid.
    Check,
}

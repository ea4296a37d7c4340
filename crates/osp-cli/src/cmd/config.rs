//! Config and advertisement commands.

use crate::ui;
use osp_types::agent::new_auth_token;
use osp_types::{AgentConfig, AgentContext, PeerId};
use std::path::PathBuf;

pub fn cmd_config_show(config: Option<PathBuf>, json: bool) {
    let config = super::load(config);
    if json {
        match serde_json::to_string_pretty(&config) {
            Ok(body) => println!("{body}"),
            Err(e) => {
                ui::error(&format!("Failed to serialize config: {e}"));
                std::process::exit(1);
            }
        }
        return;
    }

    ui::section("Agent");
    ui::kv("Name", &config.display_name);
    ui::kv("Model", &config.model_name);
    ui::kv("Locales", &config.locales.join(", "));
    ui::section("PSK");
    ui::kv("Ease", &config.psk.ease_of_input.to_string());
    ui::kv("Min bits", &config.psk.min_entropy_bits.to_string());
    ui::section("Engine");
    let secs = |v: Option<u64>| v.map_or_else(|| "none".to_string(), |s| format!("{s}s"));
    ui::kv("Auth timeout", &secs(config.engine.auth_timeout_secs));
    ui::kv("Info timeout", &secs(config.engine.info_timeout_secs));
    ui::kv("Close drain", &format!("{}ms", config.engine.close_drain_timeout_ms));
}

pub fn cmd_config_check(config: Option<PathBuf>) {
    let Some(path) = config else {
        ui::error_with_fix("No config file given", "pass --config <path>");
        std::process::exit(1);
    };
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) => {
            ui::error(&format!("Cannot read {}: {e}", path.display()));
            std::process::exit(1);
        }
    };
    match AgentConfig::from_toml_str(&contents) {
        Ok(_) => ui::success(&format!("{} is valid", path.display())),
        Err(e) => {
            ui::error(&format!("{}: {e}", path.display()));
            std::process::exit(1);
        }
    }
}

pub fn cmd_advertise(config: Option<PathBuf>, spki_hex: &str, token: Option<String>, json: bool) {
    let spki = match hex::decode(spki_hex.trim()) {
        Ok(spki) => spki,
        Err(e) => {
            ui::error_with_fix(&format!("Invalid SPKI hex: {e}"), "pass the DER bytes as hex");
            std::process::exit(1);
        }
    };
    let ctx = match AgentContext::new(&super::load(config), PeerId::from_spki(&spki)) {
        Ok(ctx) => ctx,
        Err(e) => {
            ui::error(&format!("Invalid configuration: {e}"));
            std::process::exit(1);
        }
    };
    let token = token.unwrap_or_else(new_auth_token);
    let records = match ctx.advertisement(&token) {
        Ok(txt) => txt.to_vec(),
        Err(e) => {
            ui::error(&format!("Failed to build TXT records: {e}"));
            std::process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&records).unwrap_or_default());
        return;
    }
    for record in records {
        println!("{record}");
    }
}

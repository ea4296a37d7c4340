//! PSK generation and presentation commands.

use crate::ui;
use osp_types::psk::{decode_numeric, encode_numeric, generate_psk};
use osp_types::PskConfig;
use std::path::PathBuf;

pub fn cmd_psk_generate(config: Option<PathBuf>, bits: Option<u8>, json: bool) {
    let bits = bits.unwrap_or_else(|| super::load(config).psk.min_entropy_bits);
    if !(PskConfig::MIN_ENTROPY_BITS..=PskConfig::MAX_ENTROPY_BITS).contains(&bits) {
        ui::error_with_fix(
            &format!("{bits} bits is out of range"),
            &format!(
                "pass --bits between {} and {}",
                PskConfig::MIN_ENTROPY_BITS,
                PskConfig::MAX_ENTROPY_BITS
            ),
        );
        std::process::exit(1);
    }

    let psk = generate_psk(bits);
    let code = match encode_numeric(&psk) {
        Ok(code) => code,
        Err(e) => {
            ui::error(&format!("Failed to encode PSK: {e}"));
            std::process::exit(1);
        }
    };

    if json {
        let body = serde_json::json!({
            "bits": bits,
            "psk": hex::encode(psk),
            "code": code,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        return;
    }
    ui::kv("Bits", &bits.to_string());
    ui::kv("PSK", &hex::encode(psk));
    ui::kv_ok("Code", &code);
}

pub fn cmd_psk_encode(raw_hex: &str) {
    let raw = match hex::decode(raw_hex.trim()) {
        Ok(raw) => raw,
        Err(e) => {
            ui::error_with_fix(&format!("Invalid hex: {e}"), "pass the PSK bytes as hex, e.g. 01e240");
            std::process::exit(1);
        }
    };
    match encode_numeric(&raw) {
        Ok(code) => println!("{code}"),
        Err(e) => {
            ui::error(&e.to_string());
            std::process::exit(1);
        }
    }
}

pub fn cmd_psk_decode(code: &str) {
    match decode_numeric(code) {
        Ok(psk) => println!("{}", hex::encode(psk)),
        Err(e) => {
            ui::error_with_fix(&e.to_string(), "enter only digits, optionally grouped with '-'");
            std::process::exit(1);
        }
    }
}

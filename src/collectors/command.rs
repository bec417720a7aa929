//! Running external tools and decoding what they print.

use super::ProbeError;
use std::io;
use std::process::{Command, Output};

/// Runs the first candidate program that exists. `Ok(None)` means none of
/// them is installed.
pub fn run_first_available(
    candidates: &[&str],
    args: &[&str],
) -> Result<Option<Output>, ProbeError> {
    for program in candidates {
        match Command::new(program).args(args).output() {
            Ok(output) => return Ok(Some(output)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(ProbeError::from_io(program, &err)),
        }
    }
    Ok(None)
}

pub fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    // PowerShell may answer in UTF-16LE.
    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}

pub fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    if let Ok(v) = trimmed.replace(',', ".").parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| {
            c.is_ascii_digit() || matches!(*c, '.' | ',' | 'e' | 'E' | '-' | '+')
        })
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.replace(',', ".").parse::<f64>().ok()
}

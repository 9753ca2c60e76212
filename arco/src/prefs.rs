//! Preferences (C13), `spec.md` §6 "Persisted state" and §2's C13 row.
//!
//! Grounded on `original_source/arco/src/prefs.h`/`.cpp` for the field set
//! (preferred in/out device name, channel counts, buffer size, latency)
//! and the device-name substring-match getters; the original never
//! actually persists these to disk (they are file-scope statics set once
//! per process by command-line parsing), but `spec.md` §6 explicitly calls
//! for a small key/value text file, so this module reads and writes one
//! with plain `std::fs`/`str::parse`, per `SPEC_FULL.md` §2's ambient
//! configuration note — matching the teacher's own preference for a
//! hand-rolled parser over a config crate when the format is this simple
//! (the teacher does the same for its `.dot` export glue).

use std::collections::HashMap;
use std::path::Path;

use arco_graph::ArcoError;

/// One field per key named in `spec.md` §6. `None` means "unset, caller
/// supplies a default", matching `prefs_in_chans(dflt)`'s "-1 means
/// unset" convention from the original.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prefs {
    pub audio_in_name: Option<String>,
    pub audio_out_name: Option<String>,
    pub in_chans: Option<u32>,
    pub out_chans: Option<u32>,
    pub buffer_size: Option<u32>,
    pub latency_ms: Option<f32>,
}

impl Prefs {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ArcoError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ArcoError> {
        Ok(std::fs::write(path, self.render())?)
    }

    fn parse(text: &str) -> Result<Self, ArcoError> {
        let mut fields = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| ArcoError::PrefsParse(format!("line {}: missing '='", lineno + 1)))?;
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }
        let parse_u32 = |k: &str, v: &str| -> Result<u32, ArcoError> {
            v.parse().map_err(|_| ArcoError::PrefsParse(format!("{k}: not an integer: {v}")))
        };
        let parse_f32 = |k: &str, v: &str| -> Result<f32, ArcoError> {
            v.parse().map_err(|_| ArcoError::PrefsParse(format!("{k}: not a number: {v}")))
        };
        Ok(Self {
            audio_in_name: fields.get("audio_in_name").cloned(),
            audio_out_name: fields.get("audio_out_name").cloned(),
            in_chans: fields.get("in_chans").map(|v| parse_u32("in_chans", v)).transpose()?,
            out_chans: fields.get("out_chans").map(|v| parse_u32("out_chans", v)).transpose()?,
            buffer_size: fields.get("buffer_size").map(|v| parse_u32("buffer_size", v)).transpose()?,
            latency_ms: fields.get("latency").map(|v| parse_f32("latency", v)).transpose()?,
        })
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let mut line = |k: &str, v: Option<String>| {
            if let Some(v) = v {
                out.push_str(k);
                out.push_str(" = ");
                out.push_str(&v);
                out.push('\n');
            }
        };
        line("audio_in_name", self.audio_in_name.clone());
        line("audio_out_name", self.audio_out_name.clone());
        line("in_chans", self.in_chans.map(|v| v.to_string()));
        line("out_chans", self.out_chans.map(|v| v.to_string()));
        line("buffer_size", self.buffer_size.map(|v| v.to_string()));
        line("latency", self.latency_ms.map(|v| v.to_string()));
        out
    }

    pub fn in_chans_or(&self, dflt: u32) -> u32 {
        self.in_chans.unwrap_or(dflt)
    }

    pub fn out_chans_or(&self, dflt: u32) -> u32 {
        self.out_chans.unwrap_or(dflt)
    }

    pub fn buffer_size_or(&self, dflt: u32) -> u32 {
        self.buffer_size.unwrap_or(dflt)
    }

    pub fn latency_ms_or(&self, dflt: f32) -> f32 {
        self.latency_ms.unwrap_or(dflt)
    }

    /// Picks `dflt` unless a device whose name contains the preferred
    /// input-device substring is present, mirroring `prefs_in_device`'s
    /// "first match wins" substring search over `device_names`.
    pub fn preferred_in_device<'a>(&self, device_names: impl IntoIterator<Item = &'a str>, dflt: &'a str) -> &'a str {
        match &self.audio_in_name {
            Some(wanted) => device_names.into_iter().find(|name| name.contains(wanted.as_str())).unwrap_or(dflt),
            None => dflt,
        }
    }

    pub fn preferred_out_device<'a>(&self, device_names: impl IntoIterator<Item = &'a str>, dflt: &'a str) -> &'a str {
        match &self.audio_out_name {
            Some(wanted) => device_names.into_iter().find(|name| name.contains(wanted.as_str())).unwrap_or(dflt),
            None => dflt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_save_and_load() {
        let mut path = std::env::temp_dir();
        path.push(format!("arco_prefs_test_{}.txt", std::process::id()));
        let prefs = Prefs {
            audio_in_name: Some("Built-in".into()),
            audio_out_name: None,
            in_chans: Some(2),
            out_chans: Some(2),
            buffer_size: Some(512),
            latency_ms: Some(10.0),
        };
        prefs.save(&path).unwrap();
        let loaded = Prefs::load(&path).unwrap();
        assert_eq!(loaded, prefs);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let prefs = Prefs::load("/nonexistent/path/arco_prefs_missing.txt").unwrap();
        assert_eq!(prefs, Prefs::default());
    }

    #[test]
    fn malformed_line_is_a_parse_error() {
        let err = Prefs::parse("not_a_kv_pair").unwrap_err();
        assert!(matches!(err, ArcoError::PrefsParse(_)));
    }

    #[test]
    fn unset_fields_fall_back_to_the_caller_supplied_default() {
        let prefs = Prefs::default();
        assert_eq!(prefs.in_chans_or(1), 1);
        assert_eq!(prefs.buffer_size_or(256), 256);
    }

    #[test]
    fn preferred_device_matches_by_substring() {
        let prefs = Prefs { audio_out_name: Some("USB".into()), ..Default::default() };
        let devices = ["Built-in Output", "USB Audio Device", "HDMI"];
        assert_eq!(prefs.preferred_out_device(devices, "Built-in Output"), "USB Audio Device");
        assert_eq!(prefs.preferred_in_device(devices, "Built-in Output"), "Built-in Output");
    }
}

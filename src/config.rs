//! Hierarchical configuration with dotted keys.
//!
//! Files use a small `.ini`-like syntax:
//!
//! ```text
//! # comment
//! [grids]
//! refinements = 3
//!
//! [solver]
//! type = cg
//! precision = 1e-10
//! bounds = [0.1 1.0]
//! ```
//!
//! Section headers prefix the keys below them, so the file above defines
//! `grids.refinements`, `solver.type`, `solver.precision` and `solver.bounds`.
//! Keys may be dotted themselves (`solver.max_iter = 100` at top level is the same key
//! as `max_iter = 100` below `[solver]`).
//!
//! [`Configuration::load_or_default`] never fails because a file is missing: it logs a
//! warning and falls back to [`Configuration::fallback`] (`grids.refinements = 2`).
//! A file that exists but does not parse is reported as
//! [`DispatchError::ConfigParse`].

use crate::dispatch_error::DispatchError;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Key of the refinement level read by the example bootstrap.
pub const GRID_REFINEMENTS_KEY: &str = "grids.refinements";
/// Refinement level used when no configuration file can be read.
pub const DEFAULT_GRID_REFINEMENTS: usize = 2;

/// Ordered mapping from dotted keys to raw string values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    entries: BTreeMap<String, String>,
}

impl Configuration {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-entry configuration, the equivalent of `Configuration(key, value)`.
    pub fn with_entry(key: impl Into<String>, value: impl ToString) -> Self {
        let mut cfg = Self::new();
        cfg.set(key, value);
        cfg
    }

    /// The configuration used when no parameter file could be opened.
    pub fn fallback() -> Self {
        Self::with_entry(GRID_REFINEMENTS_KEY, DEFAULT_GRID_REFINEMENTS)
    }

    /// Load `path` and apply `extra_args` overrides; fall back to
    /// [`Configuration::fallback`] (plus overrides) if the file cannot be read.
    ///
    /// Parse errors in a readable file, and malformed overrides, are returned as
    /// errors.
    pub fn load_or_default(
        path: impl AsRef<Path>,
        extra_args: &[String],
    ) -> Result<Self, DispatchError> {
        let path = path.as_ref();
        let mut cfg = match std::fs::read_to_string(path) {
            Ok(text) => Self::parse_named(&text, &path.display().to_string())?,
            Err(e) => {
                log::warn!(
                    "Could not load parameter file {} ({e}), defaulting",
                    path.display()
                );
                Self::fallback()
            }
        };
        cfg.apply_args(extra_args)?;
        Ok(cfg)
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self, DispatchError> {
        Self::parse_named(text, "<string>")
    }

    fn parse_named(text: &str, source_name: &str) -> Result<Self, DispatchError> {
        let err = |line: usize, message: String| DispatchError::ConfigParse {
            source_name: source_name.to_string(),
            line,
            message,
        };
        let mut cfg = Self::new();
        let mut prefix = String::new();
        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or_else(|| err(lineno, format!("unterminated section header `{line}`")))?
                    .trim();
                if !valid_key(name) {
                    return Err(err(lineno, format!("invalid section name `{name}`")));
                }
                prefix = format!("{name}.");
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| err(lineno, format!("expected `key = value`, got `{line}`")))?;
            let key = key.trim();
            if !valid_key(key) {
                return Err(err(lineno, format!("invalid key `{key}`")));
            }
            let full = format!("{prefix}{key}");
            if cfg.entries.contains_key(&full) {
                return Err(err(lineno, format!("duplicate key `{full}`")));
            }
            cfg.entries.insert(full, value.trim().to_string());
        }
        Ok(cfg)
    }

    /// Apply command line style overrides.
    ///
    /// The first element is the program name and is skipped. Remaining entries are
    /// `-key value` pairs or `--key=value` singletons.
    pub fn apply_args(&mut self, args: &[String]) -> Result<(), DispatchError> {
        let err = |message: String| DispatchError::ConfigParse {
            source_name: "<args>".into(),
            line: 0,
            message,
        };
        let mut it = args.iter().skip(1).filter(|a| !a.is_empty());
        while let Some(arg) = it.next() {
            if let Some(body) = arg.strip_prefix("--") {
                let (key, value) = body
                    .split_once('=')
                    .ok_or_else(|| err(format!("expected `--key=value`, got `{arg}`")))?;
                if !valid_key(key) {
                    return Err(err(format!("invalid key `{key}`")));
                }
                self.set(key, value);
            } else if let Some(key) = arg.strip_prefix('-') {
                if !valid_key(key) {
                    return Err(err(format!("invalid key `{key}`")));
                }
                let value = it
                    .next()
                    .ok_or_else(|| err(format!("missing value for `{arg}`")))?;
                self.set(key, value.as_str());
            } else {
                return Err(err(format!("unexpected argument `{arg}`")));
            }
        }
        Ok(())
    }

    /// Insert or replace a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.insert(key.into(), value.to_string());
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Raw string value.
    pub fn get_string(&self, key: &str) -> Result<&str, DispatchError> {
        self.entries
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| DispatchError::MissingKey(key.to_string()))
    }

    pub fn get_int(&self, key: &str) -> Result<i64, DispatchError> {
        self.get_parsed(key, "integer")
    }

    pub fn get_usize(&self, key: &str) -> Result<usize, DispatchError> {
        self.get_parsed(key, "non-negative integer")
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, DispatchError> {
        self.get_parsed(key, "floating point number")
    }

    /// Booleans accept `true/false`, `1/0`, `yes/no`, `on/off`.
    pub fn get_bool(&self, key: &str) -> Result<bool, DispatchError> {
        let raw = self.get_string(key)?;
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(invalid(key, raw, "boolean")),
        }
    }

    /// Vector value written as `[a b c]`, `[a, b, c]`, `[a; b; c]` or `a b c`.
    pub fn get_vec_f64(&self, key: &str) -> Result<Vec<f64>, DispatchError> {
        let raw = self.get_string(key)?;
        let body = raw.trim();
        let body = body
            .strip_prefix('[')
            .and_then(|b| b.strip_suffix(']'))
            .unwrap_or(body);
        body.split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .filter(|t| !t.is_empty())
            .map(|t| t.parse::<f64>().map_err(|_| invalid(key, raw, "vector of numbers")))
            .collect()
    }

    /// Typed lookup with a default for missing keys; malformed values are still errors.
    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, DispatchError> {
        if self.has_key(key) {
            self.get_parsed(key, std::any::type_name::<T>())
        } else {
            Ok(default)
        }
    }

    /// All entries below `prefix.`, with the prefix removed.
    pub fn sub(&self, prefix: &str) -> Configuration {
        let dotted = format!("{prefix}.");
        let entries = self
            .entries
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&dotted)
                    .map(|rest| (rest.to_string(), v.clone()))
            })
            .collect();
        Configuration { entries }
    }

    /// Human readable dump grouped by top-level section.
    pub fn report_string(&self) -> String {
        let mut out = String::new();
        let groups = self
            .entries
            .iter()
            .chunk_by(|(k, _)| k.split_once('.').map(|(head, _)| head.to_string()));
        for (section, entries) in &groups {
            match &section {
                Some(name) => {
                    out.push_str(&format!("[{name}]\n"));
                    for (k, v) in entries {
                        let short = &k[name.len() + 1..];
                        out.push_str(&format!("{short} = {v}\n"));
                    }
                }
                None => {
                    for (k, v) in entries {
                        out.push_str(&format!("{k} = {v}\n"));
                    }
                }
            }
        }
        out
    }

    fn get_parsed<T: FromStr>(&self, key: &str, expected: &'static str) -> Result<T, DispatchError> {
        let raw = self.get_string(key)?;
        raw.trim().parse::<T>().map_err(|_| invalid(key, raw, expected))
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report_string())
    }
}

fn invalid(key: &str, value: &str, expected: &'static str) -> DispatchError {
    DispatchError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        expected,
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(['#', '%']) {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# mpi_cg.ini
[grids]
refinements = 3   % trailing comment

[solver]
type = cg
precision = 1e-10
max_iter = 500
verbose = false
bounds = [0.1 1.0]

[logging.colors]
info = blue
";

    #[test]
    fn sections_prefix_keys() {
        let cfg = Configuration::parse(SAMPLE).unwrap();
        assert_eq!(cfg.get_int("grids.refinements").unwrap(), 3);
        assert_eq!(cfg.get_string("solver.type").unwrap(), "cg");
        assert_eq!(cfg.get_f64("solver.precision").unwrap(), 1e-10);
        assert!(!cfg.get_bool("solver.verbose").unwrap());
        assert_eq!(cfg.get_vec_f64("solver.bounds").unwrap(), vec![0.1, 1.0]);
        assert_eq!(cfg.get_string("logging.colors.info").unwrap(), "blue");
    }

    #[test]
    fn sub_strips_prefix() {
        let cfg = Configuration::parse(SAMPLE).unwrap();
        let solver = cfg.sub("solver");
        assert_eq!(solver.len(), 5);
        assert_eq!(solver.get_usize("max_iter").unwrap(), 500);
        assert!(solver.sub("nothing").is_empty());
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = Configuration::parse("a.b = 1\n[a]\nb = 2\n").unwrap_err();
        match err {
            DispatchError::ConfigParse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(Configuration::parse("[grids\n").is_err());
        assert!(Configuration::parse("just words\n").is_err());
        assert!(Configuration::parse(" = 3\n").is_err());
    }

    #[test]
    fn typed_accessors_report_bad_values() {
        let cfg = Configuration::parse("n = three\n").unwrap();
        assert!(matches!(
            cfg.get_int("n"),
            Err(DispatchError::InvalidValue { .. })
        ));
        assert!(matches!(
            cfg.get_int("missing"),
            Err(DispatchError::MissingKey(_))
        ));
        assert_eq!(cfg.get_or("missing", 7usize).unwrap(), 7);
    }

    #[test]
    fn args_override_file_values() {
        let mut cfg = Configuration::parse(SAMPLE).unwrap();
        let args: Vec<String> = ["prog", "-grids.refinements", "5", "--solver.type=bicg"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        cfg.apply_args(&args).unwrap();
        assert_eq!(cfg.get_int("grids.refinements").unwrap(), 5);
        assert_eq!(cfg.get_string("solver.type").unwrap(), "bicg");
    }

    #[test]
    fn dangling_arg_is_an_error() {
        let mut cfg = Configuration::new();
        let args = vec!["prog".to_string(), "-grids.refinements".to_string()];
        assert!(cfg.apply_args(&args).is_err());
    }

    #[test]
    fn report_groups_sections() {
        let cfg = Configuration::parse("top = 1\n[grids]\nrefinements = 2\n").unwrap();
        let report = cfg.report_string();
        assert!(report.contains("[grids]\nrefinements = 2\n"));
        assert!(report.contains("top = 1\n"));
    }
}

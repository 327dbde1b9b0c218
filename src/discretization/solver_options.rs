//! Linear solver options, read from the `solver` sub-configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::Configuration;
use crate::dispatch_error::DispatchError;

/// Krylov variant used by the reference solver.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    /// Unpreconditioned conjugate gradients.
    Cg,
    /// Conjugate gradients with a diagonal (Jacobi) preconditioner.
    JacobiCg,
}

impl FromStr for SolverKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cg" => Ok(SolverKind::Cg),
            "jacobi_cg" | "cg.jacobi" => Ok(SolverKind::JacobiCg),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SolverKind::Cg => "cg",
            SolverKind::JacobiCg => "jacobi_cg",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    pub kind: SolverKind,
    pub max_iter: usize,
    /// Relative residual reduction at which the iteration stops.
    pub precision: f64,
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            kind: SolverKind::Cg,
            max_iter: 5000,
            precision: 1e-10,
            verbose: false,
        }
    }
}

impl SolverOptions {
    /// Read `type`, `max_iter`, `precision` and `verbose`; missing keys keep their
    /// defaults, unknown keys are ignored.
    pub fn from_config(cfg: &Configuration) -> Result<Self, DispatchError> {
        let defaults = Self::default();
        let kind = match cfg.get_string("type") {
            Ok(raw) => raw.parse().map_err(|()| DispatchError::InvalidValue {
                key: "type".into(),
                value: raw.to_string(),
                expected: "one of `cg`, `jacobi_cg`",
            })?,
            Err(DispatchError::MissingKey(_)) => defaults.kind,
            Err(e) => return Err(e),
        };
        let opts = Self {
            kind,
            max_iter: cfg.get_or("max_iter", defaults.max_iter)?,
            precision: cfg.get_or("precision", defaults.precision)?,
            verbose: if cfg.has_key("verbose") {
                cfg.get_bool("verbose")?
            } else {
                defaults.verbose
            },
        };
        if !(opts.precision > 0.0 && opts.precision.is_finite()) {
            return Err(DispatchError::InvalidValue {
                key: "precision".into(),
                value: opts.precision.to_string(),
                expected: "a positive number",
            });
        }
        if opts.max_iter == 0 {
            return Err(DispatchError::InvalidValue {
                key: "max_iter".into(),
                value: "0".into(),
                expected: "a positive integer",
            });
        }
        Ok(opts)
    }

    pub fn to_config(&self) -> Configuration {
        let mut cfg = Configuration::new();
        cfg.set("type", self.kind);
        cfg.set("max_iter", self.max_iter);
        cfg.set("precision", self.precision);
        cfg.set("verbose", self.verbose);
        cfg
    }
}

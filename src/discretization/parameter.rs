//! Named parameter vectors and their admissible ranges.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::dispatch_error::DispatchError;

/// Component name → number of scalars.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterType {
    components: BTreeMap<String, usize>,
}

impl ParameterType {
    /// The type of a non-parametric object.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, len: usize) -> Self {
        self.components.insert(name.into(), len);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = (&str, usize)> {
        self.components.iter().map(|(k, &n)| (k.as_str(), n))
    }
}

/// A parameter value such as `mu = [0.1]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    components: BTreeMap<String, Vec<f64>>,
}

impl Parameter {
    /// No components; what non-parametric solves take.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Single-component parameter, e.g. `Parameter::new("mu", [0.1])`.
    pub fn new(name: impl Into<String>, values: impl Into<Vec<f64>>) -> Self {
        Self::empty().with(name, values)
    }

    pub fn with(mut self, name: impl Into<String>, values: impl Into<Vec<f64>>) -> Self {
        self.components.insert(name.into(), values.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.components.get(name).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Type of this value, for comparison with a [`ParameterType`].
    pub fn parameter_type(&self) -> ParameterType {
        self.components
            .iter()
            .fold(ParameterType::empty(), |ty, (k, v)| ty.with(k.clone(), v.len()))
    }

    /// `mu=[0.1], nu=[1, 2]`
    pub fn report(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, values)) in self.components.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}=[")?;
            for (j, v) in values.iter().enumerate() {
                if j > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{v}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// A [`ParameterType`] together with a box `[min, max]` every component must lie in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    ty: ParameterType,
    min: f64,
    max: f64,
}

impl ParameterSpace {
    pub fn new(ty: ParameterType, min: f64, max: f64) -> Self {
        Self { ty, min, max }
    }

    pub fn parameter_type(&self) -> &ParameterType {
        &self.ty
    }

    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// Check that `mu` has exactly the components of this space, with the right
    /// lengths and finite values inside the range.
    pub fn validate(&self, mu: &Parameter) -> Result<(), DispatchError> {
        let given = mu.parameter_type();
        if given != self.ty {
            return Err(DispatchError::InvalidArgument(format!(
                "parameter `{mu}` does not match the expected type {:?}",
                self.ty.components().collect::<Vec<_>>()
            )));
        }
        for (name, values) in &mu.components {
            if let Some(bad) = values
                .iter()
                .find(|v| !v.is_finite() || **v < self.min || **v > self.max)
            {
                return Err(DispatchError::InvalidArgument(format!(
                    "component `{name}` value {bad} is outside [{}, {}]",
                    self.min, self.max
                )));
            }
        }
        Ok(())
    }
}

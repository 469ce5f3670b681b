//! Named filter parameters
//!
//! Every parameter round-trips through a plain string so hosts can store and
//! restore filter configuration without knowing the parameter's type. Nodes read
//! typed values back at evaluation time.

use super::errors::ParameterError;
use super::stream::Unit;
use std::collections::BTreeMap;

/// Typed value of a parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Enum { choices: Vec<String>, selected: usize },
    Text(String),
}

/// A single named parameter
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParameter {
    value: ParameterValue,
    unit: Unit,
}

impl FilterParameter {
    pub fn float(value: f64, unit: Unit) -> Self {
        Self {
            value: ParameterValue::Float(value),
            unit,
        }
    }

    pub fn int(value: i64, unit: Unit) -> Self {
        Self {
            value: ParameterValue::Int(value),
            unit,
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            value: ParameterValue::Bool(value),
            unit: Unit::Dimensionless,
        }
    }

    /// Enumerated choice; `selected` indexes into `choices`
    pub fn enumeration(choices: &[&str], selected: usize) -> Self {
        Self {
            value: ParameterValue::Enum {
                choices: choices.iter().map(|c| c.to_string()).collect(),
                selected,
            },
            unit: Unit::Dimensionless,
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: ParameterValue::Text(value.into()),
            unit: Unit::Dimensionless,
        }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn as_float(&self) -> f64 {
        match &self.value {
            ParameterValue::Float(v) => *v,
            ParameterValue::Int(v) => *v as f64,
            ParameterValue::Bool(v) => f64::from(u8::from(*v)),
            ParameterValue::Enum { selected, .. } => *selected as f64,
            ParameterValue::Text(s) => self.unit.parse_value(s).unwrap_or(0.0),
        }
    }

    pub fn as_int(&self) -> i64 {
        match &self.value {
            ParameterValue::Int(v) => *v,
            ParameterValue::Float(v) => v.round() as i64,
            ParameterValue::Bool(v) => i64::from(*v),
            ParameterValue::Enum { selected, .. } => *selected as i64,
            ParameterValue::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }

    pub fn as_bool(&self) -> bool {
        match &self.value {
            ParameterValue::Bool(v) => *v,
            _ => self.as_int() != 0,
        }
    }

    /// Index of the selected choice (0 for non-enum parameters)
    pub fn as_enum_index(&self) -> usize {
        match &self.value {
            ParameterValue::Enum { selected, .. } => *selected,
            _ => 0,
        }
    }

    /// Serialize to the string form accepted by [`FilterParameter::set_from_str`]
    pub fn to_value_string(&self) -> String {
        match &self.value {
            ParameterValue::Float(v) => format!("{v}"),
            ParameterValue::Int(v) => format!("{v}"),
            ParameterValue::Bool(v) => format!("{v}"),
            ParameterValue::Enum { choices, selected } => {
                choices.get(*selected).cloned().unwrap_or_default()
            }
            ParameterValue::Text(s) => s.clone(),
        }
    }

    /// Parse and store a new value. `name` is only used for error reporting.
    pub fn set_from_str(&mut self, name: &str, text: &str) -> Result<(), ParameterError> {
        let parse_err = || ParameterError::Parse {
            name: name.to_string(),
            value: text.to_string(),
        };

        match &mut self.value {
            ParameterValue::Float(v) => {
                *v = self.unit.parse_value(text).ok_or_else(parse_err)?;
            }
            ParameterValue::Int(v) => {
                *v = match text.trim().parse::<i64>() {
                    Ok(i) => i,
                    Err(_) => self.unit.parse_value(text).ok_or_else(parse_err)?.round() as i64,
                };
            }
            ParameterValue::Bool(v) => {
                *v = match text.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => true,
                    "false" | "0" | "no" | "off" => false,
                    _ => return Err(parse_err()),
                };
            }
            ParameterValue::Enum { choices, selected } => {
                let wanted = text.trim();
                *selected = choices.iter().position(|c| c == wanted).ok_or_else(|| {
                    ParameterError::UnknownEnumValue {
                        name: name.to_string(),
                        value: text.to_string(),
                    }
                })?;
            }
            ParameterValue::Text(s) => *s = text.to_string(),
        }
        Ok(())
    }

    pub fn set_float(&mut self, value: f64) {
        match &mut self.value {
            ParameterValue::Int(v) => *v = value.round() as i64,
            other => *other = ParameterValue::Float(value),
        }
    }

    pub fn set_int(&mut self, value: i64) {
        match &mut self.value {
            ParameterValue::Float(v) => *v = value as f64,
            ParameterValue::Enum { choices, selected } => {
                *selected = (value.max(0) as usize).min(choices.len().saturating_sub(1))
            }
            other => *other = ParameterValue::Int(value),
        }
    }

    pub fn set_bool(&mut self, value: bool) {
        self.value = ParameterValue::Bool(value);
    }
}

/// Ordered collection of named parameters
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    params: BTreeMap<String, FilterParameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, param: FilterParameter) {
        self.params.insert(name.into(), param);
    }

    pub fn get(&self, name: &str) -> Option<&FilterParameter> {
        self.params.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FilterParameter> {
        self.params.get_mut(name)
    }

    /// Set a parameter from its string form
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ParameterError> {
        self.params
            .get_mut(name)
            .ok_or_else(|| ParameterError::NotFound(name.to_string()))?
            .set_from_str(name, value)
    }

    /// String form of a parameter's current value
    pub fn value_string(&self, name: &str) -> Result<String, ParameterError> {
        self.params
            .get(name)
            .map(FilterParameter::to_value_string)
            .ok_or_else(|| ParameterError::NotFound(name.to_string()))
    }

    /// Float value of a parameter, 0 if it does not exist
    pub fn float(&self, name: &str) -> f64 {
        self.params.get(name).map_or(0.0, FilterParameter::as_float)
    }

    pub fn int(&self, name: &str) -> i64 {
        self.params.get(name).map_or(0, FilterParameter::as_int)
    }

    pub fn enum_index(&self, name: &str) -> usize {
        self.params.get(name).map_or(0, FilterParameter::as_enum_index)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterParameter)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_round_trip() {
        let mut set = ParameterSet::new();
        set.add("Symbol rate", FilterParameter::float(1.25e9, Unit::Hertz));

        let saved = set.value_string("Symbol rate").unwrap();
        set.set("Symbol rate", "1").unwrap();
        set.set("Symbol rate", &saved).unwrap();
        assert_eq!(set.float("Symbol rate"), 1.25e9);
    }

    #[test]
    fn test_enum_round_trip_by_name() {
        let mut p = FilterParameter::enumeration(&["Low pass", "High pass", "Notch"], 0);
        p.set_from_str("Filter Type", "Notch").unwrap();
        assert_eq!(p.as_enum_index(), 2);
        assert_eq!(p.to_value_string(), "Notch");

        let err = p.set_from_str("Filter Type", "Comb").unwrap_err();
        assert!(matches!(err, ParameterError::UnknownEnumValue { .. }));
        assert_eq!(p.as_enum_index(), 2);
    }

    #[test]
    fn test_unknown_parameter() {
        let mut set = ParameterSet::new();
        assert!(matches!(set.set("Nope", "1"), Err(ParameterError::NotFound(_))));
        assert!(set.value_string("Nope").is_err());
    }

    #[test]
    fn test_int_accepts_prefixed_values() {
        let mut p = FilterParameter::int(0, Unit::SampleDepth);
        p.set_from_str("Length", "2k").unwrap();
        assert_eq!(p.as_int(), 2000);
        assert!(p.set_from_str("Length", "lots").is_err());
    }

    #[test]
    fn test_bool_parse() {
        let mut p = FilterParameter::boolean(false);
        p.set_from_str("Enable", "on").unwrap();
        assert!(p.as_bool());
        assert_eq!(p.to_value_string(), "true");
    }
}

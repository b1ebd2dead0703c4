//! Non-volatile pod parameters.
//!
//! Parameters are addressed on the wire by their numeric index
//! (`GET,1`, `SET,1,128`). Callers may name them either way through
//! [`ParamRef`], which is resolved once into a [`Param`].

use std::fmt;

use crate::error::ValidationError;

/// Known pod parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Param {
    /// Pod serial number (12 alphanumerics).
    SerNumber = 0,
    /// LED drive strength (0-255).
    LedDrive = 1,
    /// Reference channel gain (0-255).
    GainRef = 2,
    /// pH channel gain (0-255).
    GainPh = 3,
    /// Reference blank (0-4095).
    RefBlank = 4,
    /// Second channel blank (0-4095).
    G2Blank = 5,
}

/// Accepted values for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRule {
    /// Integer within an inclusive range.
    Range { min: i64, max: i64 },
    /// Exactly `len` ASCII letters or digits.
    Alphanumeric { len: usize },
}

impl ValueRule {
    /// Returns true if `value` satisfies the rule.
    #[must_use]
    pub fn accepts(self, value: &str) -> bool {
        let value = value.trim();
        match self {
            Self::Range { min, max } => value
                .parse::<i64>()
                .is_ok_and(|v| (min..=max).contains(&v)),
            Self::Alphanumeric { len } => {
                value.len() == len && value.bytes().all(|b| b.is_ascii_alphanumeric())
            }
        }
    }
}

impl Param {
    /// Every parameter, in index order.
    pub const ALL: [Self; 6] = [
        Self::SerNumber,
        Self::LedDrive,
        Self::GainRef,
        Self::GainPh,
        Self::RefBlank,
        Self::G2Blank,
    ];

    /// Wire index.
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Canonical upper-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SerNumber => "SER_NUMBER",
            Self::LedDrive => "LED_DRIVE",
            Self::GainRef => "GAIN_REF",
            Self::GainPh => "GAIN_PH",
            Self::RefBlank => "REF_BLANK",
            Self::G2Blank => "G2_BLANK",
        }
    }

    /// Value rule for this parameter.
    #[must_use]
    pub const fn rule(self) -> ValueRule {
        match self {
            Self::SerNumber => ValueRule::Alphanumeric { len: 12 },
            Self::LedDrive | Self::GainRef | Self::GainPh => ValueRule::Range { min: 0, max: 255 },
            Self::RefBlank | Self::G2Blank => ValueRule::Range { min: 0, max: 4095 },
        }
    }

    /// Looks a parameter up by name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }

    /// Looks a parameter up by wire index.
    #[must_use]
    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|p| u32::from(p.index()) == index)
    }

    /// Validates a value before it is sent with `SET`.
    pub fn validate(self, value: &str) -> Result<(), ValidationError> {
        if self.rule().accepts(value) {
            Ok(())
        } else {
            Err(ValidationError::InvalidValue {
                name: self.name().to_owned(),
                value: value.to_owned(),
            })
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parameter named either by string or by wire index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamRef {
    /// Parameter name, e.g. `LED_DRIVE`.
    Name(String),
    /// Wire index, e.g. `1`.
    Index(u32),
}

impl ParamRef {
    /// Resolves the reference against the parameter table.
    pub fn resolve(&self) -> Result<Param, ValidationError> {
        let found = match self {
            Self::Name(name) => Param::from_name(name),
            Self::Index(index) => Param::from_index(*index),
        };
        found.ok_or_else(|| ValidationError::UnknownParameter {
            name: self.to_string(),
        })
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for ParamRef {
    /// Numeric strings are treated as indices.
    fn from(value: &str) -> Self {
        value
            .trim()
            .parse()
            .map_or_else(|_| Self::Name(value.to_owned()), Self::Index)
    }
}

impl From<String> for ParamRef {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<u32> for ParamRef {
    fn from(value: u32) -> Self {
        Self::Index(value)
    }
}

impl From<Param> for ParamRef {
    fn from(value: Param) -> Self {
        Self::Index(u32::from(value.index()))
    }
}

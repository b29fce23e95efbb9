//! Validation System - Ordered Field Rules
//!
//! Rules report a structured error. The validator stops at the first
//! failing rule so the caller can surface exactly one message per field.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::input::{FieldRole, TextField};

pub const DEFAULT_ALLOWED_CHARACTERS: &str = r"^[A-Za-z\s]+$";

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Please enter your {}", role.label())]
    EmptyField { role: FieldRole },

    #[error("Your {} may only contain letters and spaces", role.label())]
    InvalidCharacters { role: FieldRole },

    #[error("Your {} must be at least {min} characters", role.label())]
    TooShort { role: FieldRole, min: usize, actual: usize },

    #[error("Your {} must be at most {max} characters", role.label())]
    TooLong { role: FieldRole, max: usize, actual: usize },
}

impl ValidationError {
    pub fn role(&self) -> FieldRole {
        match self {
            ValidationError::EmptyField { role }
            | ValidationError::InvalidCharacters { role }
            | ValidationError::TooShort { role, .. }
            | ValidationError::TooLong { role, .. } => *role,
        }
    }
}

/// Inclusive character-count bounds for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthBounds {
    pub min: usize,
    pub max: usize,
}

impl LengthBounds {
    pub fn for_role(role: FieldRole) -> Self {
        match role {
            FieldRole::Name => Self { min: 2, max: 100 },
            FieldRole::Organization => Self { min: 2, max: 150 },
        }
    }
}

/// Validation rule trait - checks one property of a sanitized value
pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn check(&self, role: FieldRole, text: &str) -> Result<(), ValidationError>;
}

// --- Concrete Rules ---

pub struct EmptyFieldRule;

impl ValidationRule for EmptyFieldRule {
    fn name(&self) -> &'static str { "empty_field" }

    fn check(&self, role: FieldRole, text: &str) -> Result<(), ValidationError> {
        if text.trim().is_empty() {
            Err(ValidationError::EmptyField { role })
        } else {
            Ok(())
        }
    }
}

pub struct AllowedCharactersRule {
    pattern: Regex,
}

impl AllowedCharactersRule {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self { pattern: Regex::new(pattern)? })
    }
}

impl ValidationRule for AllowedCharactersRule {
    fn name(&self) -> &'static str { "allowed_characters" }

    fn check(&self, role: FieldRole, text: &str) -> Result<(), ValidationError> {
        if self.pattern.is_match(text) {
            Ok(())
        } else {
            Err(ValidationError::InvalidCharacters { role })
        }
    }
}

pub struct LengthRule;

impl ValidationRule for LengthRule {
    fn name(&self) -> &'static str { "length" }

    fn check(&self, role: FieldRole, text: &str) -> Result<(), ValidationError> {
        let bounds = LengthBounds::for_role(role);
        let actual = text.chars().count();

        if actual < bounds.min {
            return Err(ValidationError::TooShort { role, min: bounds.min, actual });
        }
        if actual > bounds.max {
            return Err(ValidationError::TooLong { role, max: bounds.max, actual });
        }
        Ok(())
    }
}

/// Validator runs rules in order and reports the first failure
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new(allowed_characters: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            rules: vec![
                Box::new(EmptyFieldRule),
                Box::new(AllowedCharactersRule::new(allowed_characters)?),
                Box::new(LengthRule),
            ],
        })
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn validate(&self, role: FieldRole, text: &str) -> Result<(), ValidationError> {
        for rule in &self.rules {
            rule.check(role, text)?;
        }
        Ok(())
    }

    /// Validates every field in order; the first failing field wins.
    pub fn validate_form(&self, fields: &[TextField]) -> Result<(), ValidationError> {
        for field in fields {
            self.validate(field.role, &field.sanitized_value)?;
        }
        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(EmptyFieldRule),
                Box::new(AllowedCharactersRule {
                    pattern: Regex::new(DEFAULT_ALLOWED_CHARACTERS)
                        .expect("Invalid default allowed-characters regex"),
                }),
                Box::new(LengthRule),
            ],
        }
    }
}

//! Egg variable validation.
//!
//! User-supplied values are checked against the egg's variable definitions
//! before any write happens. Rules are a pipe-separated list on each
//! definition, e.g. `required|integer|max:65535`. Unknown rule names are
//! ignored so that egg authors can carry rules this panel does not enforce.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::{DbError, EggStore, EggVariable};

/// Privilege level of the caller supplying variable values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLevel {
    User,
    Admin,
}

/// A variable that passed validation, ready to persist.
#[derive(Debug, Clone)]
pub struct ValidatedVariable {
    pub variable_id: i32,
    pub env_variable: String,
    pub value: String,
}

/// One rule failure on one variable.
#[derive(Debug, Clone)]
pub struct VariableViolation {
    pub env_variable: String,
    pub detail: String,
}

/// Errors from variable validation.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// One or more values broke their variable's rules.
    #[error("egg variable validation failed: {}", summarize(.0))]
    Invalid(Vec<VariableViolation>),

    #[error(transparent)]
    Database(#[from] DbError),
}

fn summarize(violations: &[VariableViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{} {}", v.env_variable, v.detail))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validates a set of user-supplied values against an egg's variable
/// definitions.
#[async_trait]
pub trait VariableValidator: Send + Sync {
    /// Returns the validated set, with absent values replaced by defaults.
    ///
    /// At `UserLevel::User`, definitions that are not user-editable are
    /// skipped entirely. At `UserLevel::Admin` every definition is processed;
    /// the creation path always validates as admin because creation is itself
    /// a privileged operation.
    async fn validate(
        &self,
        egg_id: i32,
        environment: &HashMap<String, String>,
        level: UserLevel,
    ) -> Result<Vec<ValidatedVariable>, ConfigurationError>;
}

/// Concrete validator reading definitions from the egg store.
pub struct EggVariableValidator {
    eggs: Arc<dyn EggStore>,
}

impl EggVariableValidator {
    pub fn new(eggs: Arc<dyn EggStore>) -> Self {
        Self { eggs }
    }
}

#[async_trait]
impl VariableValidator for EggVariableValidator {
    async fn validate(
        &self,
        egg_id: i32,
        environment: &HashMap<String, String>,
        level: UserLevel,
    ) -> Result<Vec<ValidatedVariable>, ConfigurationError> {
        let definitions = self.eggs.variables_for(egg_id).await?;

        let mut validated = Vec::with_capacity(definitions.len());
        let mut violations = Vec::new();

        for definition in &definitions {
            if level != UserLevel::Admin && !definition.user_editable {
                continue;
            }

            let value = environment
                .get(&definition.env_variable)
                .cloned()
                .unwrap_or_else(|| definition.default_value.clone());

            check_value(definition, &value, &mut violations);

            validated.push(ValidatedVariable {
                variable_id: definition.id,
                env_variable: definition.env_variable.clone(),
                value,
            });
        }

        if !violations.is_empty() {
            return Err(ConfigurationError::Invalid(violations));
        }

        Ok(validated)
    }
}

fn check_value(definition: &EggVariable, value: &str, violations: &mut Vec<VariableViolation>) {
    let rules: Vec<&str> = definition
        .rules
        .split('|')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .collect();

    if value.is_empty() {
        if rules.contains(&"required") {
            violations.push(VariableViolation {
                env_variable: definition.env_variable.clone(),
                detail: "is required".to_string(),
            });
        }
        // An empty value has nothing further to check against.
        return;
    }

    for rule in rules {
        if let Err(detail) = check_rule(value, rule) {
            violations.push(VariableViolation {
                env_variable: definition.env_variable.clone(),
                detail,
            });
        }
    }
}

fn check_rule(value: &str, rule: &str) -> Result<(), String> {
    match rule {
        "required" | "nullable" | "string" | "sometimes" => Ok(()),
        "integer" | "int" => value
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| "must be an integer".to_string()),
        "numeric" => value
            .parse::<f64>()
            .map(|_| ())
            .map_err(|_| "must be numeric".to_string()),
        "boolean" | "bool" => match value {
            "0" | "1" | "true" | "false" => Ok(()),
            _ => Err("must be a boolean".to_string()),
        },
        _ => {
            if let Some(bound) = rule.strip_prefix("max:") {
                check_bound(value, bound, rule, |actual, limit| actual <= limit)
            } else if let Some(bound) = rule.strip_prefix("min:") {
                check_bound(value, bound, rule, |actual, limit| actual >= limit)
            } else if let Some(options) = rule.strip_prefix("in:") {
                if options.split(',').any(|option| option.trim() == value) {
                    Ok(())
                } else {
                    Err(format!("must be one of: {options}"))
                }
            } else {
                // Unknown rule names are tolerated, not enforced.
                Ok(())
            }
        }
    }
}

/// `max:`/`min:` compare numerically when the value is numeric, otherwise by
/// character length.
fn check_bound(
    value: &str,
    bound: &str,
    rule: &str,
    ok: impl Fn(f64, f64) -> bool,
) -> Result<(), String> {
    let limit: f64 = bound
        .parse()
        .map_err(|_| format!("has an unparseable rule '{rule}'"))?;

    let actual = value
        .parse::<f64>()
        .unwrap_or_else(|_| value.chars().count() as f64);

    if ok(actual, limit) {
        Ok(())
    } else {
        Err(format!("violates {rule}"))
    }
}

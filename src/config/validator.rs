//! Test plan and parameter validation

use super::*;
use crate::error::ValidationError;
use anyhow::Result;
use std::collections::{HashMap, HashSet};

/// Validate a complete plan before any group runs
///
/// Groups without tests are allowed here; the coordinator reports them when
/// their turn comes and the rest of the plan still runs.
pub fn validate_plan(plan: &TestPlan) -> Result<()> {
    if plan.groups.is_empty() {
        anyhow::bail!("Test plan contains no groups");
    }

    validate_settings(&plan.launcher)?;

    let mut group_names = HashSet::new();
    for group in &plan.groups {
        if group.name.trim().is_empty() {
            anyhow::bail!("Group name must not be empty");
        }
        if !group_names.insert(group.name.as_str()) {
            anyhow::bail!("Duplicate group name '{}'", group.name);
        }
        validate_group(group)?;
    }

    Ok(())
}

/// Validate launcher settings
pub fn validate_settings(settings: &LauncherSettings) -> Result<()> {
    if settings.dispatch_timeout_ms == 0 {
        anyhow::bail!("dispatch_timeout_ms must be greater than 0");
    }
    if settings.result_timeout_secs == Some(0) {
        anyhow::bail!("result_timeout_secs must be greater than 0 when set");
    }
    Ok(())
}

/// Validate one group's tests and agent references
pub fn validate_group(group: &Group) -> Result<()> {
    let mut test_names = HashSet::new();

    for test in &group.tests {
        if test.name.trim().is_empty() {
            anyhow::bail!("Group '{}' has a test with an empty name", group.name);
        }
        if !test_names.insert(test.name.as_str()) {
            anyhow::bail!("Group '{}' has duplicate test name '{}'", group.name, test.name);
        }
        if test.machine.starts_with(AGENT_PREFIX) {
            group.resolve_machine(&test.machine).map_err(|e| {
                anyhow::anyhow!("Group '{}' test '{}': {}", group.name, test.name, e)
            })?;
        }
        if test.assembly.trim().is_empty() {
            anyhow::bail!("Group '{}' test '{}' has no assembly", group.name, test.name);
        }
    }

    Ok(())
}

/// Parse a test's `key=value` parameters against the policy
///
/// Returns the parsed pairs in declaration order.
pub fn parse_parameters(
    params: &[String],
    policy: &ParameterPolicy,
) -> Result<Vec<(String, String)>, ValidationError> {
    let mut parsed = Vec::with_capacity(params.len());
    let mut seen = HashMap::new();

    for (index, raw) in params.iter().enumerate() {
        let mut parts = raw.split('=');
        let (key, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(value), None) if !key.is_empty() => (key, value),
            _ => {
                return Err(ValidationError::Malformed { index: index + 1, raw: raw.clone() });
            }
        };

        if !policy.accepted.is_empty() && !policy.accepted.iter().any(|k| k == key) {
            return Err(ValidationError::UnrecognizedKey {
                index: index + 1,
                key: key.to_string(),
            });
        }

        if seen.insert(key.to_string(), index).is_some() {
            return Err(ValidationError::DuplicateKey(key.to_string()));
        }

        parsed.push((key.to_string(), value.to_string()));
    }

    if let Some(expected) = policy.required {
        if parsed.len() != expected {
            return Err(ValidationError::WrongCount { expected, actual: parsed.len() });
        }
    }

    Ok(parsed)
}

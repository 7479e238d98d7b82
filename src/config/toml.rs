//! TOML test plan parsing

use super::TestPlan;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse a TOML test plan file
pub fn parse_plan_file(path: &Path) -> Result<TestPlan> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

    parse_plan_string(&contents)
        .with_context(|| format!("Failed to parse plan file: {}", path.display()))
}

/// Parse a TOML test plan from a string
pub fn parse_plan_string(contents: &str) -> Result<TestPlan> {
    let plan: TestPlan = ::toml::from_str(contents)
        .context("Failed to parse TOML test plan")?;

    Ok(plan)
}

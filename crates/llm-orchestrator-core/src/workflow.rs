// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workflow configuration data model (spec §3, §6).
//!
//! These types are the target of YAML deserialization. The YAML parser
//! itself is an external black box (`serde_yaml::from_str`); this module
//! only defines the shape it must produce.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A complete workflow definition, loaded once per name and cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub experimental: bool,

    #[serde(default)]
    pub inputs: HashMap<String, InputSpec>,

    #[serde(default)]
    pub outputs: HashMap<String, OutputSpec>,

    pub steps: Vec<StepConfig>,

    #[serde(default)]
    pub evaluation: Option<EvaluationSpec>,

    #[serde(default)]
    pub capabilities: Option<Capabilities>,
}

/// `inputs.<name>` entries: either a full spec or a bare scalar default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputSpec {
    Full {
        #[serde(rename = "type", default)]
        type_tag: Option<InputType>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        default: Option<serde_json::Value>,
        #[serde(default)]
        required: bool,
        #[serde(default)]
        r#enum: Option<Vec<serde_json::Value>>,
    },
    Scalar(serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    String,
    Number,
    Bool,
    Object,
    Array,
}

/// `outputs.<name>` entries: either `{from, optional}` or a bare expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputSpec {
    Full {
        from: String,
        #[serde(default)]
        optional: bool,
    },
    Expression(String),
}

impl OutputSpec {
    pub fn expression(&self) -> &str {
        match self {
            OutputSpec::Full { from, .. } => from,
            OutputSpec::Expression(expr) => expr,
        }
    }

    pub fn is_optional(&self) -> bool {
        match self {
            OutputSpec::Full { optional, .. } => *optional,
            OutputSpec::Expression(_) => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSpec {
    #[serde(default)]
    pub rubric_id: Option<String>,
    #[serde(default)]
    pub scoring_profile: Option<String>,
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub criteria: Vec<CriterionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionSpec {
    pub name: String,
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub critical_floor: Option<f64>,
    #[serde(default)]
    pub scale: Option<String>,
    #[serde(default)]
    pub evidence_required: bool,
    #[serde(default)]
    pub formula_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// A single workflow step. `agent` has shape `tier{N}_{role}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub agent: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub inputs: HashMap<String, String>,
    #[serde(default)]
    pub outputs: HashMap<String, String>,

    #[serde(default)]
    pub when: Option<String>,

    #[serde(default)]
    pub loop_until: Option<String>,
    #[serde(default)]
    pub loop_max: Option<u32>,

    #[serde(default)]
    pub tools: Option<Vec<String>>,

    #[serde(default)]
    pub prompt_file: Option<String>,

    #[serde(default)]
    pub model_override: Option<String>,

    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl StepConfig {
    /// Parses `agent: tier{N}_{role}` into (tier, role).
    pub fn tier_and_role(&self) -> Result<(u8, &str)> {
        let rest = self.agent.strip_prefix("tier").ok_or_else(|| {
            OrchestratorError::validation(format!(
                "step '{}': agent '{}' must have shape tier{{N}}_{{role}}",
                self.name, self.agent
            ))
        })?;
        let (tier_str, role) = rest.split_once('_').ok_or_else(|| {
            OrchestratorError::validation(format!(
                "step '{}': agent '{}' must have shape tier{{N}}_{{role}}",
                self.name, self.agent
            ))
        })?;
        let tier: u8 = tier_str.parse().map_err(|_| {
            OrchestratorError::validation(format!(
                "step '{}': agent '{}' has non-numeric tier",
                self.name, self.agent
            ))
        })?;
        if tier > 5 {
            return Err(OrchestratorError::validation(format!(
                "step '{}': tier {} out of range [0..5]",
                self.name, tier
            )));
        }
        Ok((tier, role))
    }

    pub fn is_self_loop(&self) -> bool {
        self.loop_until.is_some()
    }
}

impl WorkflowConfig {
    /// Structural validation independent of the graph compiler: checks
    /// unique step names, known dependency names, and evaluation weight
    /// sanity. Cycle detection is the graph compiler's job (§4.5).
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(OrchestratorError::compile("workflow has no steps"));
        }

        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(OrchestratorError::validation(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
            step.tier_and_role()?;
            if step.is_self_loop() && step.loop_max.unwrap_or(0) == 0 {
                return Err(OrchestratorError::validation(format!(
                    "step '{}': loop_max must be a positive integer",
                    step.name
                )));
            }
        }

        let names: std::collections::HashSet<&str> =
            self.steps.iter().map(|s| s.name.as_str()).collect();
        for step in &self.steps {
            for dep in &step.depends_on {
                if !names.contains(dep.as_str()) {
                    return Err(OrchestratorError::MissingDependency {
                        step: step.name.clone(),
                        missing_dep: dep.clone(),
                    });
                }
            }
        }

        if let Some(eval) = &self.evaluation {
            eval.validate()?;
        }

        Ok(())
    }
}

impl EvaluationSpec {
    /// Rubric weights validation (spec §4.10): all positive, sum to
    /// 1.0 ± 0.01, criterion names a subset of declared criteria when
    /// criteria are explicit.
    pub fn validate(&self) -> Result<()> {
        if self.weights.is_empty() {
            return Ok(());
        }
        for (name, weight) in &self.weights {
            if *weight <= 0.0 {
                return Err(OrchestratorError::validation(format!(
                    "evaluation weight for '{}' must be positive, got {}",
                    name, weight
                )));
            }
        }
        let sum: f64 = self.weights.values().sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(OrchestratorError::validation(format!(
                "evaluation weights must sum to 1.0 ± 0.01, got {}",
                sum
            )));
        }
        if !self.criteria.is_empty() {
            let declared: std::collections::HashSet<&str> =
                self.criteria.iter().map(|c| c.name.as_str()).collect();
            for name in self.weights.keys() {
                if !declared.contains(name.as_str()) {
                    return Err(OrchestratorError::validation(format!(
                        "evaluation weight names undeclared criterion '{}'",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_step(name: &str, agent: &str) -> StepConfig {
        StepConfig {
            name: name.to_string(),
            agent: agent.to_string(),
            description: None,
            depends_on: vec![],
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            when: None,
            loop_until: None,
            loop_max: None,
            tools: None,
            prompt_file: None,
            model_override: None,
            timeout_seconds: None,
        }
    }

    #[test]
    fn tier_and_role_parses() {
        let step = minimal_step("a", "tier2_reviewer");
        let (tier, role) = step.tier_and_role().unwrap();
        assert_eq!(tier, 2);
        assert_eq!(role, "reviewer");
    }

    #[test]
    fn tier_and_role_rejects_out_of_range() {
        let step = minimal_step("a", "tier9_reviewer");
        assert!(step.tier_and_role().is_err());
    }

    #[test]
    fn validate_rejects_missing_dependency() {
        let mut step = minimal_step("b", "tier0_tool");
        step.depends_on.push("ghost".to_string());
        let config = WorkflowConfig {
            name: "w".into(),
            version: "1".into(),
            description: None,
            experimental: false,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            steps: vec![step],
            evaluation: None,
            capabilities: None,
        };
        assert!(matches!(
            config.validate(),
            Err(OrchestratorError::MissingDependency { .. })
        ));
    }

    #[test]
    fn evaluation_weights_must_sum_to_one() {
        let mut weights = HashMap::new();
        weights.insert("correctness".to_string(), 0.5);
        weights.insert("efficiency".to_string(), 0.2);
        let eval = EvaluationSpec {
            rubric_id: None,
            scoring_profile: None,
            weights,
            criteria: vec![],
        };
        assert!(eval.validate().is_err());
    }
}

//! Validation - advisory checks over a project's configuration
//!
//! Rules produce structured violations; nothing here mutates or blocks.
//! Callers decide what to do with an invalid result.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::constraints::ConstraintIndex;
use crate::model::SetId;
use crate::rarity::{RarityConfigStore, TOTAL_WEIGHT};
use crate::sets::SetRegistry;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub set: Option<SetId>,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
    pub sets: Vec<SetId>,
}

impl ValidationResult {
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }
}

/// Everything a rule may read.
pub struct ValidationContext<'a> {
    pub rarity: &'a RarityConfigStore,
    pub sets: &'a SetRegistry,
    pub rules: &'a ConstraintIndex,
    pub config: &'a EngineConfig,
    /// Sets under inspection.
    pub targets: Vec<SetId>,
}

pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

pub struct ProbabilitySumRule;

impl ValidationRule for ProbabilitySumRule {
    fn name(&self) -> &'static str { "probability_sum" }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        for set in &ctx.targets {
            for layer in ctx.rarity.layers() {
                if ctx.rarity.enabled_traits(&layer.name, set).is_empty() {
                    continue;
                }
                let valid = ctx
                    .rarity
                    .validate_layer_probabilities(&layer.name, set, ctx.config.probability_epsilon)
                    .unwrap_or(false);
                if !valid {
                    violations.push(ValidationViolation {
                        rule: self.name().to_string(),
                        severity: ViolationSeverity::Error,
                        set: Some(set.clone()),
                        message: format!("Rarity of layer {} does not sum to 100", layer.name),
                        expected: Some(format!("{}", TOTAL_WEIGHT)),
                        actual: Some(format!("{:.2}", ctx.rarity.layer_sum(&layer.name, set))),
                        remediation: vec![
                            "Adjust rarity values".to_string(),
                            "Equalize the layer".to_string(),
                        ],
                    });
                }
            }
        }
        violations
    }
}

pub struct EmptyLayerRule;

impl ValidationRule for EmptyLayerRule {
    fn name(&self) -> &'static str { "empty_layer" }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        for set in &ctx.targets {
            for layer in ctx.rarity.layers() {
                if ctx.rarity.enabled_traits(&layer.name, set).is_empty() {
                    violations.push(ValidationViolation {
                        rule: self.name().to_string(),
                        severity: ViolationSeverity::Error,
                        set: Some(set.clone()),
                        message: format!("Layer {} has no enabled trait", layer.name),
                        expected: Some("at least 1 enabled trait".to_string()),
                        actual: Some("0".to_string()),
                        remediation: vec!["Enable a trait or add one to the layer".to_string()],
                    });
                }
            }
        }
        violations
    }
}

pub struct DanglingRuleReferenceRule;

impl ValidationRule for DanglingRuleReferenceRule {
    fn name(&self) -> &'static str { "dangling_rule_reference" }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationViolation> {
        ctx.rules
            .dangling_references(ctx.rarity)
            .into_iter()
            .filter(|d| ctx.targets.contains(&d.set))
            .map(|d| ValidationViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Warning,
                set: Some(d.set.clone()),
                message: match &d.referenced_by {
                    Some((layer, trait_name)) => format!(
                        "Rule on {}/{} references unknown {}/{}",
                        layer, trait_name, d.layer, d.trait_name
                    ),
                    None => format!("Rule defined on unknown {}/{}", d.layer, d.trait_name),
                },
                expected: None,
                actual: Some(format!("{}/{}", d.layer, d.trait_name)),
                remediation: vec!["Run rule cleanup".to_string()],
            })
            .collect()
    }
}

pub struct SetNameLengthRule;

impl ValidationRule for SetNameLengthRule {
    fn name(&self) -> &'static str { "set_name_length" }

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<ValidationViolation> {
        let max = ctx.config.max_set_name_len;
        ctx.targets
            .iter()
            .filter_map(|id| ctx.sets.get(id))
            .filter(|info| info.display_name().chars().count() > max)
            .map(|info| ValidationViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Info,
                set: Some(info.id.clone()),
                message: "Set name is longer than usual".to_string(),
                expected: Some(format!("{} characters max", max)),
                actual: Some(format!("{} characters", info.display_name().chars().count())),
                remediation: vec!["Shorten the set name".to_string()],
            })
            .collect()
    }
}

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(EmptyLayerRule),
                Box::new(ProbabilitySumRule),
                Box::new(DanglingRuleReferenceRule),
                Box::new(SetNameLengthRule),
            ],
        }
    }

    pub fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        let violations: Vec<_> = self.rules.iter().flat_map(|rule| rule.validate(ctx)).collect();
        let valid = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        ValidationResult {
            valid,
            violations,
            sets: ctx.targets.clone(),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

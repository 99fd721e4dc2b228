//! Pipeline definitions and the template registry.
//!
//! Definitions are static: built once at process start, never mutated at
//! runtime. `PipelineDefinition::new` enforces the order invariant, so an
//! invalid definition is unrepresentable after construction.

use crate::errors::{DeckflowError, PipelineValidationError};
use crate::pipeline::{RetryPolicy, StageSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// The deck template a pipeline targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// SaaS startup template.
    Saas,
    /// Fintech startup template.
    Fintech,
    /// Healthcare startup template.
    Healthcare,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saas => write!(f, "saas"),
            Self::Fintech => write!(f, "fintech"),
            Self::Healthcare => write!(f, "healthcare"),
        }
    }
}

impl std::str::FromStr for TemplateKind {
    type Err = DeckflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "saas" => Ok(Self::Saas),
            "fintech" => Ok(Self::Fintech),
            "healthcare" => Ok(Self::Healthcare),
            other => Err(DeckflowError::UnknownTemplate {
                kind: other.to_string(),
            }),
        }
    }
}

/// An immutable ordered sequence of stages for one deck template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Definition id, e.g. `"saas-v1"`.
    pub id: String,
    /// The template this pipeline builds.
    pub template_kind: TemplateKind,
    stages: Vec<StageSpec>,
}

impl PipelineDefinition {
    /// Creates a definition, validating that stage `order` values are
    /// strictly increasing and names are unique.
    pub fn new(
        id: impl Into<String>,
        template_kind: TemplateKind,
        stages: Vec<StageSpec>,
    ) -> Result<Self, PipelineValidationError> {
        if stages.is_empty() {
            return Err(PipelineValidationError::new(
                "pipeline must contain at least one stage",
            ));
        }

        for pair in stages.windows(2) {
            if pair[1].order <= pair[0].order {
                return Err(PipelineValidationError::new(format!(
                    "stage orders must be strictly increasing: '{}' ({}) follows '{}' ({})",
                    pair[1].name, pair[1].order, pair[0].name, pair[0].order,
                ))
                .with_stages(vec![pair[0].name.clone(), pair[1].name.clone()]));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for stage in &stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "duplicate stage name '{}'",
                    stage.name
                ))
                .with_stages(vec![stage.name.clone()]));
            }
        }

        Ok(Self {
            id: id.into(),
            template_kind,
            stages,
        })
    }

    /// The stages in pipeline order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Sum of per-stage expected durations, reported at submission time.
    #[must_use]
    pub fn estimated_total(&self) -> Duration {
        self.stages.iter().map(|s| s.estimated_duration).sum()
    }
}

/// Registry resolving template kinds to pipeline definitions.
#[derive(Debug, Clone)]
pub struct PipelineRegistry {
    by_kind: HashMap<TemplateKind, PipelineDefinition>,
}

impl PipelineRegistry {
    /// Creates a registry from a set of definitions. A later definition for
    /// the same kind replaces the earlier one.
    #[must_use]
    pub fn with_definitions(definitions: Vec<PipelineDefinition>) -> Self {
        let by_kind = definitions
            .into_iter()
            .map(|d| (d.template_kind, d))
            .collect();
        Self { by_kind }
    }

    /// Builds the built-in template set.
    ///
    /// SaaS is the four-stage pipeline (research, financials, content,
    /// export); Fintech and Healthcare insert a visual design stage before
    /// export.
    #[must_use]
    pub fn builtin() -> Self {
        let saas = PipelineDefinition::new(
            "saas-v1",
            TemplateKind::Saas,
            vec![
                research_stage(1),
                financials_stage(2),
                content_stage(3),
                export_stage(4),
            ],
        );
        let fintech = PipelineDefinition::new(
            "fintech-v1",
            TemplateKind::Fintech,
            vec![
                research_stage(1),
                financials_stage(2),
                content_stage(3),
                design_stage(4),
                export_stage(5),
            ],
        );
        let healthcare = PipelineDefinition::new(
            "healthcare-v1",
            TemplateKind::Healthcare,
            vec![
                research_stage(1),
                financials_stage(2),
                content_stage(3),
                design_stage(4),
                export_stage(5),
            ],
        );

        // The built-in stage lists are literal and ordered; new() cannot
        // reject them.
        let definitions = [saas, fintech, healthcare]
            .into_iter()
            .flatten()
            .collect();
        Self::with_definitions(definitions)
    }

    /// Resolves the pipeline definition for a template kind.
    pub fn resolve(&self, kind: TemplateKind) -> Result<&PipelineDefinition, DeckflowError> {
        self.by_kind
            .get(&kind)
            .ok_or_else(|| DeckflowError::UnknownTemplate {
                kind: kind.to_string(),
            })
    }

    /// Returns the registered template kinds.
    #[must_use]
    pub fn kinds(&self) -> Vec<TemplateKind> {
        self.by_kind.keys().copied().collect()
    }
}

fn research_stage(order: u32) -> StageSpec {
    StageSpec::new("research", order, "market-research")
        .with_timeout(Duration::from_secs(120))
        .with_estimate(Duration::from_secs(45))
}

fn financials_stage(order: u32) -> StageSpec {
    StageSpec::new("financials", order, "financial-model")
        .with_timeout(Duration::from_secs(90))
        .with_estimate(Duration::from_secs(30))
}

fn content_stage(order: u32) -> StageSpec {
    StageSpec::new("content", order, "slide-content")
        .with_timeout(Duration::from_secs(180))
        .with_estimate(Duration::from_secs(90))
        .with_retry(RetryPolicy::new(3))
}

fn design_stage(order: u32) -> StageSpec {
    StageSpec::new("design", order, "visual-design")
        .with_timeout(Duration::from_secs(60))
        .with_estimate(Duration::from_secs(20))
}

fn export_stage(order: u32) -> StageSpec {
    StageSpec::new("export", order, "deck-export")
        .with_timeout(Duration::from_secs(60))
        .with_estimate(Duration::from_secs(15))
        .with_retry(RetryPolicy::new(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orders_must_strictly_increase() {
        let err = PipelineDefinition::new(
            "bad",
            TemplateKind::Saas,
            vec![
                StageSpec::new("a", 2, "market-research"),
                StageSpec::new("b", 2, "deck-export"),
            ],
        )
        .unwrap_err();

        assert!(err.to_string().contains("strictly increasing"));
        assert_eq!(err.stages, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = PipelineDefinition::new(
            "bad",
            TemplateKind::Saas,
            vec![
                StageSpec::new("research", 1, "market-research"),
                StageSpec::new("research", 2, "deck-export"),
            ],
        )
        .unwrap_err();

        assert!(err.to_string().contains("duplicate stage name"));
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        assert!(PipelineDefinition::new("empty", TemplateKind::Saas, Vec::new()).is_err());
    }

    #[test]
    fn test_builtin_templates() {
        let registry = PipelineRegistry::builtin();

        let saas = registry.resolve(TemplateKind::Saas).unwrap();
        assert_eq!(saas.stage_count(), 4);
        let names: Vec<_> = saas.stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["research", "financials", "content", "export"]);

        let fintech = registry.resolve(TemplateKind::Fintech).unwrap();
        assert_eq!(fintech.stage_count(), 5);
        assert_eq!(fintech.stages()[3].name, "design");
    }

    #[test]
    fn test_builtin_orders_invariant() {
        let registry = PipelineRegistry::builtin();
        for kind in registry.kinds() {
            let def = registry.resolve(kind).unwrap();
            for pair in def.stages().windows(2) {
                assert!(pair[1].order > pair[0].order);
            }
        }
    }

    #[test]
    fn test_estimated_total() {
        let registry = PipelineRegistry::builtin();
        let saas = registry.resolve(TemplateKind::Saas).unwrap();
        assert_eq!(saas.estimated_total(), Duration::from_secs(45 + 30 + 90 + 15));
    }

    #[test]
    fn test_resolve_unknown_kind() {
        let registry = PipelineRegistry::with_definitions(Vec::new());
        let err = registry.resolve(TemplateKind::Saas).unwrap_err();
        assert!(matches!(err, DeckflowError::UnknownTemplate { .. }));
    }

    #[test]
    fn test_template_kind_from_str() {
        assert_eq!("fintech".parse::<TemplateKind>().unwrap(), TemplateKind::Fintech);
        assert!("biotech".parse::<TemplateKind>().is_err());
    }
}

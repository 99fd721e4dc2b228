//! Fixtures: sample inputs, fast pipelines, and full capability sets.

use crate::core::{Slide, SlideType, StageOutput};
use crate::pipeline::{
    CapabilityRegistry, PipelineDefinition, PipelineRegistry, RetryPolicy, StageSpec, TemplateKind,
};
use crate::testing::ScriptedExecutor;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// A realistic submission input: the startup profile a founder fills in.
#[must_use]
pub fn startup_profile() -> Value {
    json!({
        "name": "Acme Robotics",
        "industry": "saas",
        "one_liner": "Warehouse automation that installs itself",
        "stage": "seed",
        "ask_usd": 2_000_000,
        "team_size": 6,
    })
}

/// A retry policy with millisecond backoff so tests never wait.
#[must_use]
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries)
        .with_base_delay_ms(1)
        .with_max_delay_ms(10)
}

/// The four-stage SaaS pipeline with short timeouts and millisecond
/// backoff, for orchestrator tests that exercise retries.
#[must_use]
pub fn fast_saas_registry() -> PipelineRegistry {
    let stages = vec![
        StageSpec::new("research", 1, "market-research")
            .with_timeout(Duration::from_secs(2))
            .with_estimate(Duration::from_secs(45))
            .with_retry(fast_retry(2)),
        StageSpec::new("financials", 2, "financial-model")
            .with_timeout(Duration::from_secs(2))
            .with_estimate(Duration::from_secs(30))
            .with_retry(fast_retry(2)),
        StageSpec::new("content", 3, "slide-content")
            .with_timeout(Duration::from_secs(2))
            .with_estimate(Duration::from_secs(90))
            .with_retry(fast_retry(2)),
        StageSpec::new("export", 4, "deck-export")
            .with_timeout(Duration::from_secs(2))
            .with_estimate(Duration::from_secs(15))
            .with_retry(fast_retry(2)),
    ];
    let definition = PipelineDefinition::new("saas-test", TemplateKind::Saas, stages);
    PipelineRegistry::with_definitions(definition.into_iter().collect())
}

/// A small generated slide set.
#[must_use]
pub fn sample_slides() -> Vec<Slide> {
    vec![
        Slide {
            slide_type: SlideType::Title,
            title: "Acme Robotics".to_string(),
            content: json!({"tagline": "Warehouse automation that installs itself"}),
            order: 1,
        },
        Slide {
            slide_type: SlideType::Problem,
            title: "The Problem".to_string(),
            content: json!({"bullets": ["warehouse labor is scarce", "integration takes months"]}),
            order: 2,
        },
        Slide {
            slide_type: SlideType::FundingAsk,
            title: "The Ask".to_string(),
            content: json!({"amount_usd": 2_000_000}),
            order: 3,
        },
    ]
}

/// All five capabilities registered with always-succeeding executors.
#[must_use]
pub fn succeeding_capabilities() -> CapabilityRegistry {
    let mut capabilities = CapabilityRegistry::new();
    capabilities.register(
        "market-research",
        Arc::new(ScriptedExecutor::succeeding(StageOutput::MarketResearch(
            json!({"tam_usd": 30_000_000_000_u64, "competitors": ["RoboStow", "Shelfwise"]}),
        ))),
    );
    capabilities.register(
        "financial-model",
        Arc::new(ScriptedExecutor::succeeding(StageOutput::FinancialModel(
            json!({"arr_projection": [250_000, 1_200_000, 4_800_000]}),
        ))),
    );
    capabilities.register(
        "slide-content",
        Arc::new(ScriptedExecutor::succeeding(StageOutput::Slides(
            sample_slides(),
        ))),
    );
    capabilities.register(
        "visual-design",
        Arc::new(ScriptedExecutor::succeeding(StageOutput::Design(
            json!({"primary_color": "#2563eb", "font": "Inter"}),
        ))),
    );
    capabilities.register(
        "deck-export",
        Arc::new(ScriptedExecutor::succeeding(StageOutput::ExportRef(
            "decks/acme-robotics.pdf".to_string(),
        ))),
    );
    capabilities
}

//! The accumulating pitch-deck artifact and per-stage outputs.
//!
//! Each completed stage merges exactly one section. The orchestrator merges
//! into its privately owned copy of the job and only then commits to the
//! store, so readers never observe a partial merge.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of slide within a deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideType {
    /// Opening slide with name and tagline.
    Title,
    /// The problem the startup addresses.
    Problem,
    /// The proposed solution.
    Solution,
    /// Market sizing (TAM/SAM/SOM).
    MarketOpportunity,
    /// How the startup makes money.
    BusinessModel,
    /// Customers, revenue, growth evidence.
    Traction,
    /// Competitive landscape.
    Competition,
    /// Founding team.
    Team,
    /// Projections and unit economics.
    Financials,
    /// The raise and use of funds.
    FundingAsk,
    /// Milestones ahead.
    Roadmap,
    /// Closing contact slide.
    Contact,
    /// Template-specific extra slide.
    Custom,
}

impl fmt::Display for SlideType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Title => "title",
            Self::Problem => "problem",
            Self::Solution => "solution",
            Self::MarketOpportunity => "market_opportunity",
            Self::BusinessModel => "business_model",
            Self::Traction => "traction",
            Self::Competition => "competition",
            Self::Team => "team",
            Self::Financials => "financials",
            Self::FundingAsk => "funding_ask",
            Self::Roadmap => "roadmap",
            Self::Contact => "contact",
            Self::Custom => "custom",
        };
        write!(f, "{name}")
    }
}

/// One slide of the deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    /// The kind of slide.
    pub slide_type: SlideType,
    /// The slide title.
    pub title: String,
    /// Structured slide content (bullets, figures, speaker notes).
    pub content: serde_json::Value,
    /// 1-based position within the deck.
    pub order: u32,
}

/// The output of one successful stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOutput {
    /// Market sizing and competitor data.
    MarketResearch(serde_json::Value),
    /// Projections, unit economics, valuation.
    FinancialModel(serde_json::Value),
    /// The generated slide sequence.
    Slides(Vec<Slide>),
    /// Visual design choices (palette, fonts, layout).
    Design(serde_json::Value),
    /// Reference to the produced export file.
    ExportRef(String),
}

impl StageOutput {
    /// Returns a short reference naming the artifact section this output
    /// landed in, recorded on the stage record.
    #[must_use]
    pub fn section_ref(&self) -> String {
        match self {
            Self::MarketResearch(_) => "artifact.market_research".to_string(),
            Self::FinancialModel(_) => "artifact.financial_model".to_string(),
            Self::Slides(slides) => format!("artifact.slides[{}]", slides.len()),
            Self::Design(_) => "artifact.design".to_string(),
            Self::ExportRef(path) => format!("export:{path}"),
        }
    }
}

/// The accumulating deliverable built up across stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckArtifact {
    /// Generated slides, in deck order.
    pub slides: Vec<Slide>,
    /// Market research section.
    pub market_research: Option<serde_json::Value>,
    /// Financial model section.
    pub financial_model: Option<serde_json::Value>,
    /// Visual design section.
    pub design: Option<serde_json::Value>,
    /// Reference to the export file, once produced.
    pub export_ref: Option<String>,
    /// False once the owning job fails: the partial artifact stays
    /// inspectable but must not be delivered.
    pub deliverable: bool,
}

impl Default for DeckArtifact {
    fn default() -> Self {
        Self {
            slides: Vec::new(),
            market_research: None,
            financial_model: None,
            design: None,
            export_ref: None,
            deliverable: true,
        }
    }
}

impl DeckArtifact {
    /// Creates an empty artifact.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one stage's output into its section.
    pub fn merge(&mut self, output: StageOutput) {
        match output {
            StageOutput::MarketResearch(value) => self.market_research = Some(value),
            StageOutput::FinancialModel(value) => self.financial_model = Some(value),
            StageOutput::Slides(slides) => self.slides = slides,
            StageOutput::Design(value) => self.design = Some(value),
            StageOutput::ExportRef(path) => self.export_ref = Some(path),
        }
    }

    /// Flags the artifact as not deliverable after a failed job.
    pub fn flag_not_deliverable(&mut self) {
        self.deliverable = false;
    }

    /// Returns the slide of the given type, if generated.
    #[must_use]
    pub fn slide(&self, slide_type: SlideType) -> Option<&Slide> {
        self.slides.iter().find(|s| s.slide_type == slide_type)
    }
}

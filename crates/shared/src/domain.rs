use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The four analysis dimensions the research pipeline reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Company,
    Industry,
    Financial,
    News,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Company,
        Category::Industry,
        Category::Financial,
        Category::News,
    ];

    /// Parses a wire category. Query events tag the category with the
    /// analyzer that produced it (`company_analyzer`); the suffix is
    /// stripped here.
    pub fn from_wire(raw: &str) -> Option<Self> {
        let base = raw.strip_suffix("_analyzer").unwrap_or(raw);
        match base {
            "company" => Some(Category::Company),
            "industry" => Some(Category::Industry),
            "financial" => Some(Category::Financial),
            "news" => Some(Category::News),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Company => "company",
            Category::Industry => "industry",
            Category::Financial => "financial",
            Category::News => "news",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline step tag as the backend spells it on the wire (capitalized).
/// `Curation` is reported as a step but maps to no phase of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStep {
    Search,
    Enriching,
    Briefing,
    Curation,
}

impl PipelineStep {
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "Search" => Some(PipelineStep::Search),
            "Enriching" => Some(PipelineStep::Enriching),
            "Briefing" => Some(PipelineStep::Briefing),
            "Curation" => Some(PipelineStep::Curation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::Search => "Search",
            PipelineStep::Enriching => "Enriching",
            PipelineStep::Briefing => "Briefing",
            PipelineStep::Curation => "Curation",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-key per-category storage. The category set is closed, so this is
/// a struct rather than a runtime map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct CategoryMap<T> {
    pub company: T,
    pub industry: T,
    pub financial: T,
    pub news: T,
}

impl<T> CategoryMap<T> {
    pub fn get(&self, category: Category) -> &T {
        match category {
            Category::Company => &self.company,
            Category::Industry => &self.industry,
            Category::Financial => &self.financial,
            Category::News => &self.news,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut T {
        match category {
            Category::Company => &mut self.company,
            Category::Industry => &mut self.industry,
            Category::Financial => &mut self.financial,
            Category::News => &mut self.news,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &T)> {
        Category::ALL.into_iter().map(move |c| (c, self.get(c)))
    }
}

/// Per-category document tally during curation. `kept` counts documents
/// retained so far; `initial` is the pool size at sub-phase start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocCount {
    pub initial: u32,
    pub kept: u32,
}

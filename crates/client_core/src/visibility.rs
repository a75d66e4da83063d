use std::time::Duration;

use serde::Serialize;

use crate::reducer::FoldOutcome;
use crate::state::{Phase, ResearchJob};

pub const QUERIES_COLLAPSE_DELAY: Duration = Duration::from_millis(1000);
pub const ENRICHMENT_COLLAPSE_DELAY: Duration = Duration::from_millis(1000);
pub const BRIEFING_COLLAPSE_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    Queries,
    Enrichment,
    Briefing,
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PanelVisibility {
    /// Whether the panel has anything to show at all.
    pub eligible: bool,
    pub expanded: bool,
}

/// A collapse the presentation layer should run after a delay. The core
/// holds no timers: the caller schedules this, may cancel it (always on
/// reset), and applies it via [`Visibility::collapse`] when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCollapse {
    pub panel: Panel,
    pub after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Visibility {
    pub queries: PanelVisibility,
    pub enrichment: PanelVisibility,
    pub briefing: PanelVisibility,
    pub report: PanelVisibility,
}

impl Default for Visibility {
    fn default() -> Self {
        // Panels start expanded so one that becomes eligible without a
        // phase edge still opens.
        let start = PanelVisibility {
            eligible: false,
            expanded: true,
        };
        Self {
            queries: start,
            enrichment: start,
            briefing: start,
            report: start,
        }
    }
}

impl Visibility {
    /// Reacts to one fold: updates expansion on phase edges, recomputes
    /// eligibility from the projection, and returns the delayed collapses
    /// the caller should schedule.
    pub fn observe(&mut self, job: &ResearchJob, outcome: &FoldOutcome) -> Vec<PendingCollapse> {
        let mut pending = Vec::new();

        if outcome.entered(Phase::Search) {
            self.queries.expanded = true;
        }
        if outcome.left(Phase::Search) {
            pending.push(PendingCollapse {
                panel: Panel::Queries,
                after: QUERIES_COLLAPSE_DELAY,
            });
        }
        if outcome.entered(Phase::Enrichment) {
            self.enrichment.expanded = true;
        }
        if outcome.enrichment_finished {
            pending.push(PendingCollapse {
                panel: Panel::Enrichment,
                after: ENRICHMENT_COLLAPSE_DELAY,
            });
        }
        if outcome.entered(Phase::Briefing) {
            self.briefing.expanded = true;
            self.enrichment.expanded = false;
        }
        if outcome.briefing_finished {
            pending.push(PendingCollapse {
                panel: Panel::Briefing,
                after: BRIEFING_COLLAPSE_DELAY,
            });
        }

        self.refresh_eligibility(job);
        pending
    }

    /// Eligibility is a pure function of the projection, so it can be
    /// recomputed from scratch at any time.
    pub fn refresh_eligibility(&mut self, job: &ResearchJob) {
        self.queries.eligible = job.phase.rank() >= Phase::Search.rank() || job.has_queries();
        self.enrichment.eligible =
            job.phase.rank() >= Phase::Enrichment.rank() || job.has_enrichment();
        self.briefing.eligible = job.phase.rank() >= Phase::Briefing.rank();
        self.report.eligible = !job.report.is_empty();
    }

    pub fn collapse(&mut self, panel: Panel) {
        self.panel_mut(panel).expanded = false;
    }

    fn panel_mut(&mut self, panel: Panel) -> &mut PanelVisibility {
        match panel {
            Panel::Queries => &mut self.queries,
            Panel::Enrichment => &mut self.enrichment,
            Panel::Briefing => &mut self.briefing,
            Panel::Report => &mut self.report,
        }
    }
}

#[cfg(test)]
#[path = "tests/visibility_tests.rs"]
mod tests;

use serde::{Deserialize, Serialize};

use crate::{
    aggregator::{AggregationPolicy, GoldStandardPolicy},
    prioritizer::{StagePlan, TypePriorityTable},
    types::{FallbackStage, SourceKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowDays {
    pub days_before: u32,
    pub days_after: u32,
}

impl WindowDays {
    pub const fn symmetric(days: u32) -> Self {
        Self {
            days_before: days,
            days_after: days,
        }
    }
}

fn default_primary_window() -> WindowDays {
    WindowDays::symmetric(7)
}

fn default_secondary_window() -> WindowDays {
    WindowDays::symmetric(30)
}

fn default_tertiary_window() -> WindowDays {
    WindowDays::symmetric(90)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalWindows {
    #[serde(default = "default_primary_window")]
    pub primary: WindowDays,
    #[serde(default = "default_secondary_window")]
    pub secondary: WindowDays,
    #[serde(default = "default_tertiary_window")]
    pub tertiary: WindowDays,
}

impl Default for TemporalWindows {
    fn default() -> Self {
        Self {
            primary: default_primary_window(),
            secondary: default_secondary_window(),
            tertiary: default_tertiary_window(),
        }
    }
}

fn default_primary_sources() -> Vec<SourceKind> {
    vec![
        SourceKind::OperativeNote,
        SourceKind::PathologyReport,
        SourceKind::ImagingNarrative,
    ]
}

fn default_secondary_sources() -> Vec<SourceKind> {
    vec![SourceKind::DischargeSummary, SourceKind::ConsultNote]
}

fn default_tertiary_sources() -> Vec<SourceKind> {
    vec![SourceKind::ProgressNote, SourceKind::StructuredField]
}

/// Source kinds added at each stage; later stages keep the earlier kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSources {
    #[serde(default = "default_primary_sources")]
    pub primary: Vec<SourceKind>,
    #[serde(default = "default_secondary_sources")]
    pub secondary: Vec<SourceKind>,
    #[serde(default = "default_tertiary_sources")]
    pub tertiary: Vec<SourceKind>,
}

impl Default for StageSources {
    fn default() -> Self {
        Self {
            primary: default_primary_sources(),
            secondary: default_secondary_sources(),
            tertiary: default_tertiary_sources(),
        }
    }
}

fn default_minimum_sources() -> usize {
    2
}

fn default_inclusion_threshold() -> f64 {
    60.0
}

fn default_tertiary_inclusion_threshold() -> f64 {
    40.0
}

fn default_low_confidence_threshold() -> f64 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbstractionConfig {
    #[serde(default = "default_minimum_sources")]
    pub minimum_sources: usize,
    #[serde(default = "default_inclusion_threshold")]
    pub inclusion_threshold: f64,
    #[serde(default = "default_tertiary_inclusion_threshold")]
    pub tertiary_inclusion_threshold: f64,
    #[serde(default)]
    pub temporal_windows: TemporalWindows,
    #[serde(default)]
    pub stage_sources: StageSources,
    #[serde(default)]
    pub source_type_priority: TypePriorityTable,
    #[serde(default)]
    pub gold_standard_overrides: GoldStandardPolicy,
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
    /// Aggregate whatever was found when the last stage still misses coverage.
    #[serde(default)]
    pub allow_partial_coverage: bool,
}

impl Default for AbstractionConfig {
    fn default() -> Self {
        Self {
            minimum_sources: default_minimum_sources(),
            inclusion_threshold: default_inclusion_threshold(),
            tertiary_inclusion_threshold: default_tertiary_inclusion_threshold(),
            temporal_windows: TemporalWindows::default(),
            stage_sources: StageSources::default(),
            source_type_priority: TypePriorityTable::default(),
            gold_standard_overrides: GoldStandardPolicy::default(),
            low_confidence_threshold: default_low_confidence_threshold(),
            allow_partial_coverage: false,
        }
    }
}

impl AbstractionConfig {
    /// `None` for `Exhausted`; no retrieval happens in the terminal state.
    pub fn plan_for(&self, stage: FallbackStage) -> Option<StagePlan> {
        let sources = &self.stage_sources;
        let (window, threshold, groups): (WindowDays, f64, Vec<&Vec<SourceKind>>) = match stage {
            FallbackStage::Primary => (
                self.temporal_windows.primary,
                self.inclusion_threshold,
                vec![&sources.primary],
            ),
            FallbackStage::Secondary => (
                self.temporal_windows.secondary,
                self.inclusion_threshold,
                vec![&sources.primary, &sources.secondary],
            ),
            FallbackStage::Tertiary => (
                self.temporal_windows.tertiary,
                self.tertiary_inclusion_threshold,
                vec![&sources.primary, &sources.secondary, &sources.tertiary],
            ),
            FallbackStage::Exhausted => return None,
        };

        let mut source_kinds: Vec<SourceKind> = Vec::new();
        for kind in groups.into_iter().flatten() {
            if !source_kinds.contains(kind) {
                source_kinds.push(*kind);
            }
        }

        Some(StagePlan {
            stage,
            days_before: window.days_before,
            days_after: window.days_after,
            inclusion_threshold: threshold,
            source_kinds,
        })
    }

    pub fn aggregation_policy(&self) -> AggregationPolicy {
        AggregationPolicy {
            low_confidence_threshold: self.low_confidence_threshold,
            gold_standard: self.gold_standard_overrides.clone(),
        }
    }
}

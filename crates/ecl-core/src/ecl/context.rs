use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::EclConfig;
use crate::pd::{StateSpace, TermStructure};
use crate::types::{Frequency, Rate};

/// Shared PD and LGD parameters of one portfolio segment.
#[derive(Debug, Clone)]
pub struct SegmentParameters {
    pub state_space: Arc<StateSpace>,
    /// Point-in-time term structures keyed by modelling frequency.
    pub term_structures: BTreeMap<Frequency, Arc<TermStructure>>,
    /// Segment LGD; None when no recovery assumptions were supplied.
    pub lgd: Option<Rate>,
}

/// Everything an exposure evaluation reads. Built once per run, then
/// shared read-only across worker threads.
#[derive(Debug, Clone)]
pub struct EclContext {
    pub valuation_date: NaiveDate,
    pub config: Arc<EclConfig>,
    segments: BTreeMap<String, SegmentParameters>,
}

impl EclContext {
    pub fn new(valuation_date: NaiveDate, config: EclConfig) -> Self {
        EclContext {
            valuation_date,
            config: Arc::new(config),
            segments: BTreeMap::new(),
        }
    }

    /// Register a segment, replacing any earlier parameters for it.
    pub fn with_segment(mut self, segment: impl Into<String>, parameters: SegmentParameters) -> Self {
        self.segments.insert(segment.into(), parameters);
        self
    }

    pub fn segment(&self, segment: &str) -> Option<&SegmentParameters> {
        self.segments.get(segment)
    }

    pub fn segments(&self) -> impl Iterator<Item = (&String, &SegmentParameters)> {
        self.segments.iter()
    }
}

impl SegmentParameters {
    pub fn new(state_space: StateSpace, lgd: Option<Rate>) -> Self {
        SegmentParameters {
            state_space: Arc::new(state_space),
            term_structures: BTreeMap::new(),
            lgd,
        }
    }

    pub fn with_term_structure(mut self, term_structure: TermStructure) -> Self {
        self.term_structures
            .insert(term_structure.frequency, Arc::new(term_structure));
        self
    }

    pub fn term_structure(&self, frequency: Frequency) -> Option<&TermStructure> {
        self.term_structures.get(&frequency).map(|ts| ts.as_ref())
    }
}

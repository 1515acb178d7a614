//! Probability-of-profit gate in front of the risk fence.

use robopilot_core::{CandidateTrade, EdgeScorer, RejectReason};
use std::fmt;
use std::sync::Arc;

/// Outcome of scoring one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeVerdict {
    Pass(f64),
    TooLow(f64),
    /// Scorer errored or returned something outside `[0, 1]`.
    Failed(String),
}

impl EdgeVerdict {
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self, Self::Pass(_))
    }

    #[must_use]
    pub fn into_rejection(self, min_edge: f64) -> Option<RejectReason> {
        match self {
            Self::Pass(_) => None,
            Self::TooLow(score) => Some(RejectReason::EdgeTooLow {
                score: Some(score),
                min_edge,
                detail: format!("score {score:.3} below minimum {min_edge:.3}"),
            }),
            Self::Failed(detail) => Some(RejectReason::EdgeTooLow {
                score: None,
                min_edge,
                detail: format!("scoring failed: {detail}"),
            }),
        }
    }
}

/// Trusts the score the strategy attached to the candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateScoreModel;

impl EdgeScorer for CandidateScoreModel {
    fn score(&self, candidate: &CandidateTrade) -> anyhow::Result<f64> {
        Ok(candidate.edge_score)
    }
}

/// Wraps an injected [`EdgeScorer`]; fails closed on any scoring problem.
#[derive(Clone)]
pub struct EdgeFilter {
    scorer: Arc<dyn EdgeScorer>,
}

impl fmt::Debug for EdgeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeFilter").finish_non_exhaustive()
    }
}

impl Default for EdgeFilter {
    fn default() -> Self {
        Self::new(Arc::new(CandidateScoreModel))
    }
}

impl EdgeFilter {
    #[must_use]
    pub fn new(scorer: Arc<dyn EdgeScorer>) -> Self {
        Self { scorer }
    }

    /// Scores a candidate, validating the result lies in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure when the scorer errors or
    /// produces a non-finite or out-of-range value.
    pub fn score(&self, candidate: &CandidateTrade) -> Result<f64, String> {
        match self.scorer.score(candidate) {
            Ok(score) if score.is_finite() && (0.0..=1.0).contains(&score) => Ok(score),
            Ok(score) => Err(format!("score {score} outside [0, 1]")),
            Err(e) => Err(format!("{e:#}")),
        }
    }

    #[must_use]
    pub fn evaluate(&self, candidate: &CandidateTrade, min_edge: f64) -> EdgeVerdict {
        match self.score(candidate) {
            Ok(score) if score >= min_edge => EdgeVerdict::Pass(score),
            Ok(score) => EdgeVerdict::TooLow(score),
            Err(detail) => EdgeVerdict::Failed(detail),
        }
    }

    #[must_use]
    pub fn passes(&self, candidate: &CandidateTrade, min_edge: f64) -> bool {
        self.evaluate(candidate, min_edge).passed()
    }
}

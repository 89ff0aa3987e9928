//! Extraction coordinator: runs the baseline strategies, decides on
//! escalation, and aggregates everything into one ranked set.
//!
//! ```text
//! Idle -> Running -> Evaluating -> Escalating -> Aggregated -> Ranking -> Done
//!                               \_____________/
//! ```
//!
//! Any state may end in `Cancelled` (token fired and nothing was found) or
//! `Failed` (no strategy produced a candidate).

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EngineConfig;
use crate::document::DocumentQuery;
use crate::pagination::PaginationWalk;
use crate::progress::{ExtractionPhase, ProgressEmitter, ProgressEventKind};
use crate::ranker;
use crate::strategies::{DomDirect, HtmlSource, ImageStrategy, PositionSorted};
use crate::types::{EngineResult, ExtractionError, ExtractionResult, RankedImageSet};

/// What one coordinated run produced.
#[derive(Debug, Clone)]
pub struct CoordinatorOutcome {
    pub ranked: RankedImageSet,
    /// Per-strategy results, baseline first, then the walk if it ran.
    pub results: Vec<ExtractionResult>,
    pub escalated: bool,
    /// The token fired; `ranked` holds what was found before that.
    pub cancelled: bool,
}

/// Orchestrates the strategies for one document.
#[derive(Debug, Clone)]
pub struct ExtractionCoordinator {
    dom: DomDirect,
    html: HtmlSource,
    position: PositionSorted,
    walk: PaginationWalk,
    escalation_threshold: usize,
}

impl Default for ExtractionCoordinator {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ExtractionCoordinator {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            dom: DomDirect,
            html: HtmlSource {
                min_url_len: config.min_html_url_len,
            },
            position: PositionSorted {
                min_width: config.min_position_width,
            },
            walk: PaginationWalk {
                max_pages: config.max_walk_pages,
                settle_delay: config.settle_delay(),
            },
            escalation_threshold: config.escalation_threshold,
        }
    }

    /// Baseline counts at or below this trigger the pagination walk.
    pub fn escalation_threshold(&self) -> usize {
        self.escalation_threshold
    }

    pub async fn run(
        &self,
        doc: &dyn DocumentQuery,
        token: &CancellationToken,
        progress: &ProgressEmitter,
    ) -> EngineResult<CoordinatorOutcome> {
        progress.phase(ExtractionPhase::Idle);
        if token.is_cancelled() {
            progress.phase(ExtractionPhase::Cancelled);
            return Err(ExtractionError::Cancelled);
        }
        progress.phase(ExtractionPhase::Running);

        let (dom, html, position) = tokio::join!(
            run_strategy(&self.dom, doc, token, progress),
            run_strategy(&self.html, doc, token, progress),
            run_strategy(&self.position, doc, token, progress),
        );

        let mut results = Vec::with_capacity(4);
        for (result, elapsed) in [dom, html, position].into_iter().flatten() {
            progress.emit(ProgressEventKind::StrategyCompleted {
                strategy: result.strategy_id,
                candidates: result.len() as u32,
                duration_ms: elapsed.as_millis() as u64,
            });
            results.push(result);
        }

        progress.phase(ExtractionPhase::Evaluating);
        let best = results.iter().map(ExtractionResult::len).max().unwrap_or(0);
        info!(
            "Baseline complete: {}",
            results
                .iter()
                .map(|r| format!("{}={}", r.strategy_id, r.len()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut escalated = false;
        if token.is_cancelled() {
            info!("Cancelled after baseline, skipping escalation");
        } else if best > self.escalation_threshold {
            info!(
                "Best baseline yield {} above threshold {}, no escalation",
                best, self.escalation_threshold
            );
        } else {
            progress.phase(ExtractionPhase::Escalating);
            escalated = true;
            let start = Instant::now();
            match self.walk.walk(doc, token, progress).await {
                Ok(outcome) => {
                    info!(
                        "Pagination walk complete: {} pages, {} images",
                        outcome.pages_visited,
                        outcome.result.len()
                    );
                    progress.emit(ProgressEventKind::StrategyCompleted {
                        strategy: outcome.result.strategy_id,
                        candidates: outcome.result.len() as u32,
                        duration_ms: start.elapsed().as_millis() as u64,
                    });
                    results.push(outcome.result);
                }
                Err(e) => progress.warn(format!("Pagination walk failed: {e}")),
            }
        }

        progress.phase(ExtractionPhase::Aggregated);
        let merged = ranker::aggregate(&results);
        progress.phase(ExtractionPhase::Ranking);
        let ranked = ranker::rank(merged);
        let cancelled = token.is_cancelled();

        if ranked.is_empty() {
            if cancelled {
                progress.phase(ExtractionPhase::Cancelled);
                return Err(ExtractionError::Cancelled);
            }
            progress.phase(ExtractionPhase::Failed);
            return Err(ExtractionError::NoResultsFound);
        }

        info!(
            "Ranked {} page images{}",
            ranked.len(),
            if cancelled { " (partial, cancelled)" } else { "" }
        );
        progress.phase(if cancelled {
            ExtractionPhase::Cancelled
        } else {
            ExtractionPhase::Done
        });

        Ok(CoordinatorOutcome {
            ranked,
            results,
            escalated,
            cancelled,
        })
    }
}

/// Run one strategy unless already cancelled. Query failures count as an
/// empty result.
async fn run_strategy(
    strategy: &dyn ImageStrategy,
    doc: &dyn DocumentQuery,
    token: &CancellationToken,
    progress: &ProgressEmitter,
) -> Option<(ExtractionResult, Duration)> {
    if token.is_cancelled() {
        return None;
    }
    let start = Instant::now();
    let result = match strategy.extract(doc).await {
        Ok(result) => result,
        Err(e) => {
            progress.warn(format!("Strategy {} failed: {e}", strategy.id()));
            ExtractionResult::empty(strategy.id())
        }
    };
    Some((result, start.elapsed()))
}

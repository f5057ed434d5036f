//! The analysis pipeline behind `POST /api/analyze`.
//!
//! photo -> detections -> FEN -> engine candidates -> explanations, metrics,
//! ranking -> rendered boards and sequences.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use shakmaty::{Chess, Color, Position as _};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    artifacts::{AnalysisManifest, ArtifactStore, MoveArtifacts},
    board,
    detector::PieceDetector,
    engine::{MoveSearch, SearchProvider},
    error::VisionError,
    explanation::{self, ParsedExplanation},
    generator::{TextGenerator, build_prompt},
    metrics, ranker, reasoning, render,
    types::{CandidateMove, MoveMetrics, RankedResult},
};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Depth of the MultiPV search that lists the candidates.
    pub search_depth: u8,
    /// Depth of the per-candidate search behind `engine_eval`.
    pub metrics_depth: u8,
    pub top_n: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            search_depth: 20,
            metrics_depth: 15,
            top_n: 3,
        }
    }
}

/// Generated explanation for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveExplanation {
    #[serde(rename = "move")]
    pub uci: String,
    #[serde(flatten)]
    pub explanation: ParsedExplanation,
}

/// Everything one analysis produced; serialized as the response body.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub request_id: Uuid,
    pub fen: String,
    pub suggestions: Vec<CandidateMove>,
    pub explanations: Vec<MoveExplanation>,
    pub rendered_images: Vec<String>,
    pub sequences: Vec<MoveArtifacts>,
    pub advanced_analysis: Option<RankedResult>,
}

pub struct Analyzer {
    detector: Arc<dyn PieceDetector>,
    engines: Arc<dyn SearchProvider>,
    generator: Arc<dyn TextGenerator>,
    artifacts: Arc<ArtifactStore>,
    settings: PipelineSettings,
}

impl Analyzer {
    pub fn new(
        detector: Arc<dyn PieceDetector>,
        engines: Arc<dyn SearchProvider>,
        generator: Arc<dyn TextGenerator>,
        artifacts: Arc<ArtifactStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            detector,
            engines,
            generator,
            artifacts,
            settings,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Run the full pipeline on an uploaded photo.
    pub async fn analyze(&self, image: &[u8], side: Color) -> Result<AnalysisReport, VisionError> {
        if image.is_empty() {
            return Err(VisionError::MissingImage);
        }
        let request_id = Uuid::new_v4();

        let detections = self.detector.detect(image).await?;
        let fen = board::encode(&detections, side).fen();
        info!(%request_id, pieces = detections.pieces.len(), %fen, "board recognised");
        let root = metrics::parse_position(&fen)?;

        let mut search = self.engines.acquire().await?;
        let outcome = self.consult_engine(search.as_mut(), &fen, &root).await;
        if let Err(err) = search.release().await {
            warn!(%request_id, %err, "engine release failed");
        }
        let (candidates, explanations, move_metrics) = outcome?;

        let advanced_analysis = ranker::rank(move_metrics).map(|ranking| {
            let best_move = ranking.best_move().clone();
            let reasoning = reasoning::compose(&best_move);
            info!(
                %request_id,
                best = %best_move.metrics.uci,
                score = best_move.total_score,
                "candidates ranked"
            );
            RankedResult {
                best_move,
                all_moves: ranking.moves,
                reasoning,
            }
        });

        let manifest = self.render_artifacts(request_id, &root, &candidates).await?;

        Ok(AnalysisReport {
            request_id,
            fen,
            rendered_images: manifest.moves.iter().map(|m| m.board_image.clone()).collect(),
            sequences: manifest.moves,
            suggestions: candidates,
            explanations,
            advanced_analysis,
        })
    }

    /// Every step that needs the leased engine. Explanations are generated
    /// while the metrics searches run.
    async fn consult_engine(
        &self,
        search: &mut dyn MoveSearch,
        fen: &str,
        root: &Chess,
    ) -> Result<(Vec<CandidateMove>, Vec<MoveExplanation>, Vec<MoveMetrics>), VisionError> {
        let candidates = search
            .search(fen, &[], self.settings.search_depth, self.settings.top_n)
            .await?;
        debug!(count = candidates.len(), "engine candidates");

        let (explanations, move_metrics) = tokio::try_join!(
            self.explain(fen, &candidates),
            metrics::evaluate_candidates(
                search,
                fen,
                root,
                &candidates,
                self.settings.metrics_depth,
            ),
        )?;
        Ok((candidates, explanations, move_metrics))
    }

    async fn explain(
        &self,
        fen: &str,
        candidates: &[CandidateMove],
    ) -> Result<Vec<MoveExplanation>, VisionError> {
        try_join_all(candidates.iter().map(|candidate| async move {
            let text = self.generator.generate(&build_prompt(fen, candidate)).await?;
            let explanation = explanation::parse(&text);
            debug!(
                uci = %candidate.uci,
                confidence = ?explanation.confidence,
                "explanation parsed"
            );
            Ok::<_, VisionError>(MoveExplanation {
                uci: candidate.uci.clone(),
                explanation,
            })
        }))
        .await
    }

    /// One board per candidate plus one per principal-variation step, indexed
    /// by a manifest.
    async fn render_artifacts(
        &self,
        request_id: Uuid,
        root: &Chess,
        candidates: &[CandidateMove],
    ) -> Result<AnalysisManifest, VisionError> {
        let mut manifest = AnalysisManifest::new(request_id);

        for (idx, candidate) in (1u32..).zip(candidates) {
            let m = metrics::legal_move(root, &candidate.uci)?;
            let board_image = self
                .artifacts
                .write_image(
                    request_id,
                    &format!("board_{idx}.svg"),
                    &render::render(root.board(), Some(&m)),
                )
                .await?;

            let folder = format!("sequences/move_{idx}_{}", candidate.uci);
            let mut position = root.clone();
            let mut sequence_images = Vec::with_capacity(candidate.pv.len());
            for (step, uci) in (1u32..).zip(&candidate.pv) {
                let Ok(m) = metrics::legal_move(&position, uci) else {
                    warn!(%request_id, %uci, step, "principal variation left legal play");
                    break;
                };
                position.play_unchecked(m.clone());
                let url = self
                    .artifacts
                    .write_image(
                        request_id,
                        &format!("{folder}/step_{step}_{uci}.svg"),
                        &render::render(position.board(), Some(&m)),
                    )
                    .await?;
                sequence_images.push(url);
            }

            manifest.moves.push(MoveArtifacts {
                move_id: idx,
                move_uci: candidate.uci.clone(),
                board_image,
                sequence_images,
            });
        }

        self.artifacts.commit(&manifest).await?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use shakmaty::{Piece, Role};

    use super::*;
    use crate::artifacts::DEFAULT_CACHE_CAPACITY;
    use crate::error::{EngineError, GenerationError};
    use crate::types::{DetectedPiece, Detections, Score};

    struct FixedBoard;

    #[async_trait]
    impl PieceDetector for FixedBoard {
        async fn detect(&self, _image: &[u8]) -> Result<Detections, VisionError> {
            // 800x800 photo: white king e1, white pawn a2, black king e8
            let piece = |color, role, file: f32, rank: f32| DetectedPiece {
                label: Piece { color, role },
                center_x: file * 100.0 + 50.0,
                center_y: (7.0 - rank) * 100.0 + 50.0,
            };
            Ok(Detections {
                width: 800,
                height: 800,
                pieces: vec![
                    piece(Color::White, Role::King, 4.0, 0.0),
                    piece(Color::White, Role::Pawn, 0.0, 1.0),
                    piece(Color::Black, Role::King, 4.0, 7.0),
                ],
            })
        }
    }

    #[derive(Default)]
    struct CountingEngines {
        released: Arc<AtomicUsize>,
        fail: bool,
    }

    struct ScriptedLease {
        released: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl SearchProvider for CountingEngines {
        async fn acquire(&self) -> Result<Box<dyn MoveSearch>, EngineError> {
            Ok(Box::new(ScriptedLease {
                released: self.released.clone(),
                fail: self.fail,
            }))
        }
    }

    #[async_trait]
    impl MoveSearch for ScriptedLease {
        async fn search(
            &mut self,
            _fen: &str,
            moves: &[String],
            _depth: u8,
            _top_n: usize,
        ) -> Result<Vec<CandidateMove>, EngineError> {
            if self.fail {
                return Err(EngineError::Exited);
            }
            Ok(if moves.is_empty() {
                vec![line(&["a2a4", "e8d7"], 30), line(&["e1d2", "e8e7", "a2a3"], 10)]
            } else {
                vec![line(&["e8d7"], -20)]
            })
        }

        async fn release(self: Box<Self>) -> Result<(), EngineError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn line(pv: &[&str], cp: i32) -> CandidateMove {
        CandidateMove {
            uci: pv[0].to_string(),
            pv: pv.iter().map(|s| s.to_string()).collect(),
            score: Score::Centipawns(cp),
        }
    }

    struct Echo;

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            Ok("1. **Best Move Explanation**: Gains space.\n\
                2. **Strategic Idea**: Push the pawn.\n\
                3. **Tactical Motif**: None."
                .to_string())
        }
    }

    async fn analyzer(engines: CountingEngines) -> (Analyzer, std::path::PathBuf) {
        let root = std::env::temp_dir().join(format!("chess-vision-analysis-{}", Uuid::new_v4()));
        let store = ArtifactStore::open(&root, "/artifacts", DEFAULT_CACHE_CAPACITY)
            .await
            .unwrap();
        let analyzer = Analyzer::new(
            Arc::new(FixedBoard),
            Arc::new(engines),
            Arc::new(Echo),
            Arc::new(store),
            PipelineSettings::default(),
        );
        (analyzer, root)
    }

    #[tokio::test]
    async fn empty_upload_is_rejected_before_detection() {
        let (analyzer, root) = analyzer(CountingEngines::default()).await;
        let err = analyzer.analyze(&[], Color::White).await.unwrap_err();
        assert!(matches!(err, VisionError::MissingImage));
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn full_pipeline_ranks_and_renders() {
        let engines = CountingEngines::default();
        let released = engines.released.clone();
        let (analyzer, root) = analyzer(engines).await;

        let report = analyzer.analyze(b"photo", Color::White).await.unwrap();

        assert_eq!(report.fen, "4k3/8/8/8/8/8/P7/4K3 w - - 0 1");
        assert_eq!(report.suggestions.len(), 2);
        assert_eq!(report.explanations.len(), 2);
        assert_eq!(report.explanations[0].uci, "a2a4");
        assert_eq!(
            report.explanations[0].explanation.sections.strategic_idea,
            "Push the pawn."
        );
        assert_eq!(report.rendered_images.len(), 2);
        assert_eq!(report.sequences[1].sequence_images.len(), 3);
        assert!(report.sequences[0].sequence_images[0].ends_with("step_1_a2a4.svg"));

        let ranked = report.advanced_analysis.unwrap();
        assert_eq!(ranked.all_moves.len(), 2);
        assert!(ranked.reasoning.contains(&ranked.best_move.metrics.uci));
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let stored = analyzer
            .artifacts()
            .sequence(Some(report.request_id), 2)
            .await
            .unwrap();
        assert_eq!(stored.move_uci, "e1d2");

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn engine_is_released_when_search_fails() {
        let engines = CountingEngines {
            fail: true,
            ..Default::default()
        };
        let released = engines.released.clone();
        let (analyzer, root) = analyzer(engines).await;

        let err = analyzer.analyze(b"photo", Color::White).await.unwrap_err();
        assert!(matches!(err, VisionError::Engine(EngineError::Exited)));
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_dir_all(root);
    }
}

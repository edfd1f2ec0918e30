use facefind_core::context::ContextError;
use facefind_core::{
    extract_batch, reference_from_image, AnalysisError, AnalysisRun, BoundingBox, Cancelled,
    DetectedFace, DetectionProfile, FaceExtractor, InferenceContext, ModelPaths, PhotoInput,
    ReferenceError, RunOutcome,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("loading models: {0}")]
    Context(#[from] ContextError),
    #[error("cannot read reference image {path}: {source}")]
    ReferenceDecode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("cannot read image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error("face extraction failed: {0}")]
    Extraction(#[from] facefind_core::ExtractionError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("search cancelled")]
    Cancelled,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<Cancelled> for EngineError {
    fn from(_: Cancelled) -> Self {
        EngineError::Cancelled
    }
}

/// A photo admitted by the search, detached from the run that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct RankedPhoto {
    pub rank: usize,
    pub id: String,
    pub source: PathBuf,
    pub distance: f32,
    pub score: f32,
    /// Box of the face closest to the reference.
    pub face: BoundingBox,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SearchOutcome {
    NoFacesInCorpus,
    NoMatch { faces_considered: usize },
    Matched { matches: Vec<RankedPhoto> },
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub run_id: String,
    pub threshold: f32,
    pub photos_analyzed: usize,
    pub faces_found: usize,
    #[serde(flatten)]
    pub outcome: SearchOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub source: PathBuf,
    pub width: u32,
    pub height: u32,
    pub profile: DetectionProfile,
    pub faces: Vec<DetectedFace>,
}

/// Messages sent from the CLI to the engine thread.
enum EngineRequest {
    Search {
        reference: PathBuf,
        photos: Vec<PhotoInput>,
        threshold: f32,
        cancel: Arc<AtomicBool>,
        reply: oneshot::Sender<Result<SearchReport, EngineError>>,
    },
    Inspect {
        source: PathBuf,
        reply: oneshot::Sender<Result<InspectReport, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Select the reference face, analyse every photo and rank the matches.
    ///
    /// Setting `cancel` aborts the batch; no partial ranking is returned.
    pub async fn search(
        &self,
        reference: PathBuf,
        photos: Vec<PhotoInput>,
        threshold: f32,
        cancel: Arc<AtomicBool>,
    ) -> Result<SearchReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Search {
                reference,
                photos,
                threshold,
                cancel,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Detect and describe every face of one image.
    pub async fn inspect(&self, source: PathBuf) -> Result<InspectReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Inspect {
                source,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Load the models and spawn the engine on a dedicated OS thread.
///
/// Model loading happens before the thread starts so a missing model fails
/// the command immediately. The context is closed when every handle is gone.
pub fn spawn_engine(
    paths: &ModelPaths,
    profile: DetectionProfile,
    intra_threads: usize,
) -> Result<EngineHandle, EngineError> {
    let context = InferenceContext::load(paths, profile, intra_threads)?;
    spawn_with(context)
}

/// Spawn the engine loop around any extractor.
pub fn spawn_with<E>(mut extractor: E) -> Result<EngineHandle, EngineError>
where
    E: FaceExtractor + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facefind-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Search {
                        reference,
                        photos,
                        threshold,
                        cancel,
                        reply,
                    } => {
                        let result = run_search(&mut extractor, reference, &photos, threshold, &cancel);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Inspect { source, reply } => {
                        let _ = reply.send(run_inspect(&mut extractor, source));
                    }
                }
            }
            extractor.close();
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn run_search<E: FaceExtractor + ?Sized>(
    extractor: &mut E,
    reference: PathBuf,
    inputs: &[PhotoInput],
    threshold: f32,
    cancel: &AtomicBool,
) -> Result<SearchReport, EngineError> {
    let reference_image = image::open(&reference).map_err(|source| EngineError::ReferenceDecode {
        path: reference.clone(),
        source,
    })?;
    let embedding = reference_from_image(extractor, &reference_image)?;
    tracing::info!(reference = %reference.display(), photos = inputs.len(), "search: reference selected");

    let photos = extract_batch(extractor, inputs, |path| image::open(path), cancel)?;

    let run = AnalysisRun::new(embedding, threshold, photos);
    let outcome = match run.execute()? {
        RunOutcome::NoFacesInCorpus => SearchOutcome::NoFacesInCorpus,
        RunOutcome::NoMatch { faces_considered } => SearchOutcome::NoMatch { faces_considered },
        RunOutcome::Matched(matches) => SearchOutcome::Matched {
            matches: matches
                .iter()
                .enumerate()
                .map(|(i, m)| RankedPhoto {
                    rank: i + 1,
                    id: m.photo.id().to_string(),
                    source: m.photo.source().to_path_buf(),
                    distance: m.distance,
                    score: m.score,
                    face: m.face().bbox,
                })
                .collect(),
        },
    };

    Ok(SearchReport {
        run_id: run.id().to_string(),
        threshold: run.threshold(),
        photos_analyzed: run.photos().len(),
        faces_found: run.face_count(),
        outcome,
    })
}

fn run_inspect<E: FaceExtractor + ?Sized>(
    extractor: &mut E,
    source: PathBuf,
) -> Result<InspectReport, EngineError> {
    let image = image::open(&source).map_err(|e| EngineError::ImageDecode {
        path: source.clone(),
        source: e,
    })?;
    let faces = extractor.extract_faces(&image)?;
    tracing::debug!(source = %source.display(), faces = faces.len(), "inspect: faces extracted");

    Ok(InspectReport {
        width: image.width(),
        height: image.height(),
        profile: extractor.profile(),
        source,
        faces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facefind_core::{Embedding, ExtractionError, EMBEDDING_DIM};
    use image::{DynamicImage, GenericImageView};
    use std::sync::atomic::Ordering;

    /// One face per image whose embedding encodes the image width.
    struct WidthExtractor;

    impl FaceExtractor for WidthExtractor {
        fn extract_faces(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, ExtractionError> {
            let mut values = vec![0.0; EMBEDDING_DIM];
            values[0] = (image.width() as f32 - 20.0) / 100.0;
            Ok(vec![DetectedFace {
                embedding: Embedding::new(values).unwrap(),
                bbox: BoundingBox::new(1.0, 1.0, 8.0, 8.0).unwrap(),
                confidence: 0.9,
                attributes: None,
            }])
        }

        fn profile(&self) -> DetectionProfile {
            DetectionProfile::Minimal
        }
    }

    fn write_image(dir: &std::path::Path, name: &str, width: u32) -> PathBuf {
        let path = dir.join(name);
        DynamicImage::new_rgb8(width, 16).save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn test_search_ranks_photos() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_image(dir.path(), "ref.png", 20);
        let near = write_image(dir.path(), "near.png", 30);
        let far = write_image(dir.path(), "far.png", 120);
        let exact = write_image(dir.path(), "exact.png", 20);

        let engine = spawn_with(WidthExtractor).unwrap();
        let report = engine
            .search(
                reference,
                vec![PhotoInput::from_path(&far), PhotoInput::from_path(&near), PhotoInput::from_path(&exact)],
                0.6,
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        assert_eq!(report.threshold, 0.6);
        assert_eq!(report.photos_analyzed, 3);
        assert_eq!(report.faces_found, 3);
        let SearchOutcome::Matched { matches } = report.outcome else {
            panic!("expected matches");
        };
        let sources: Vec<&PathBuf> = matches.iter().map(|m| &m.source).collect();
        assert_eq!(sources, vec![&exact, &near]);
        assert_eq!(matches[0].rank, 1);
        assert_eq!(matches[1].rank, 2);
    }

    #[tokio::test]
    async fn test_search_cancelled_returns_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_image(dir.path(), "ref.png", 20);
        let photo = write_image(dir.path(), "p.png", 20);

        let engine = spawn_with(WidthExtractor).unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        cancel.store(true, Ordering::Relaxed);
        let result = engine
            .search(reference, vec![PhotoInput::from_path(&photo)], 0.6, cancel)
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    /// Raises the cancel flag while extracting, like a ctrl-c mid-inference.
    struct CancellingExtractor(Arc<AtomicBool>);

    impl FaceExtractor for CancellingExtractor {
        fn extract_faces(&mut self, image: &DynamicImage) -> Result<Vec<DetectedFace>, ExtractionError> {
            self.0.store(true, Ordering::Relaxed);
            WidthExtractor.extract_faces(image)
        }

        fn profile(&self) -> DetectionProfile {
            DetectionProfile::Minimal
        }
    }

    #[tokio::test]
    async fn test_search_cancelled_during_last_photo() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_image(dir.path(), "ref.png", 20);
        let photo = write_image(dir.path(), "p.png", 20);

        let cancel = Arc::new(AtomicBool::new(false));
        let engine = spawn_with(CancellingExtractor(cancel.clone())).unwrap();
        let result = engine
            .search(reference, vec![PhotoInput::from_path(&photo)], 0.6, cancel)
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_search_cancelled_during_reference_with_no_photos() {
        let dir = tempfile::tempdir().unwrap();
        let reference = write_image(dir.path(), "ref.png", 20);

        let cancel = Arc::new(AtomicBool::new(false));
        let engine = spawn_with(CancellingExtractor(cancel.clone())).unwrap();
        let result = engine.search(reference, vec![], 0.6, cancel).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_unreadable_reference() {
        let engine = spawn_with(WidthExtractor).unwrap();
        let result = engine
            .search(
                PathBuf::from("/nonexistent/ref.jpg"),
                vec![],
                0.6,
                Arc::new(AtomicBool::new(false)),
            )
            .await;
        assert!(matches!(result, Err(EngineError::ReferenceDecode { .. })));
    }

    #[tokio::test]
    async fn test_inspect_reports_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "one.png", 40);

        let engine = spawn_with(WidthExtractor).unwrap();
        let report = engine.inspect(path).await.unwrap();
        assert_eq!((report.width, report.height), (40, 16));
        assert_eq!(report.faces.len(), 1);

        let decoded = image::open(dir.path().join("one.png")).unwrap();
        assert_eq!(decoded.dimensions(), (40, 16));
    }

    #[test]
    fn test_report_json_shape() {
        let report = SearchReport {
            run_id: "r".into(),
            threshold: 0.5,
            photos_analyzed: 2,
            faces_found: 0,
            outcome: SearchOutcome::NoFacesInCorpus,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "no_faces_in_corpus");
        assert_eq!(json["photos_analyzed"], 2);
    }
}

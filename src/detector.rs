use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, ArrayView2, Ix3};
use ort::{session::Session, value::Tensor};
use shakmaty::Piece;
use tracing::debug;

use crate::{
    error::VisionError,
    types::{DetectedPiece, Detections},
};

/// Finds chess pieces in a photo.
#[async_trait]
pub trait PieceDetector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<Detections, VisionError>;
}

/// Square input edge expected by the exported YOLO model.
pub const INPUT_SIZE: u32 = 640;

/// Gray used for the letterbox border, as in YOLO training.
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Class order of the trained model. `None` is the `board` class, which is
/// not a piece and gets dropped.
const CLASS_LABELS: [Option<char>; 13] = [
    Some('B'),
    Some('K'),
    Some('N'),
    Some('P'),
    Some('Q'),
    Some('R'),
    Some('b'),
    None,
    Some('k'),
    Some('n'),
    Some('p'),
    Some('q'),
    Some('r'),
];

#[derive(Debug, Clone, Copy)]
pub struct DetectorSettings {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        }
    }
}

/// A candidate box in original image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct BoundingBox {
    class: usize,
    confidence: f32,
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
}

impl BoundingBox {
    fn iou(&self, other: &Self) -> f32 {
        let x1 = (self.cx - self.w / 2.0).max(other.cx - other.w / 2.0);
        let y1 = (self.cy - self.h / 2.0).max(other.cy - other.h / 2.0);
        let x2 = (self.cx + self.w / 2.0).min(other.cx + other.w / 2.0);
        let y2 = (self.cy + self.h / 2.0).min(other.cy + other.h / 2.0);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.w * self.h + other.w * other.h - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

/// Where the photo sits inside the square model input. The photo keeps its
/// aspect ratio and is centered on a gray border.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let side = INPUT_SIZE as f32;
        let scale = (side / width.max(1) as f32).min(side / height.max(1) as f32);
        let resized = |edge: u32| ((edge as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let (width, height) = (resized(width), resized(height));
        Self {
            scale,
            width,
            height,
            pad_x: (INPUT_SIZE - width) / 2,
            pad_y: (INPUT_SIZE - height) / 2,
        }
    }

    /// Model-input point back to original image coordinates.
    fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Route ONNX Runtime calls to the pure-Rust tract backend, once per process.
fn init_backend() {
    static BACKEND: Once = Once::new();
    BACKEND.call_once(|| {
        let _ = ort::set_api(ort_tract::api());
    });
}

/// YOLO-style piece detector running on ONNX Runtime.
#[derive(Clone)]
pub struct OnnxDetector {
    session: Arc<Mutex<Session>>,
    settings: DetectorSettings,
}

impl OnnxDetector {
    /// Initialize from a local `.onnx` file path
    pub fn from_file(
        path: impl AsRef<Path>,
        settings: DetectorSettings,
    ) -> Result<Self, VisionError> {
        init_backend();
        let session = Session::builder()?.commit_from_file(path)?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            settings,
        })
    }

    /// Decode, run inference and post-process one image. Blocking.
    pub fn detect_blocking(&self, image: &[u8]) -> Result<Detections, VisionError> {
        let image = image::load_from_memory(image)?;
        let (width, height) = (image.width(), image.height());

        let (input, letterbox) = preprocess(&image);

        let mut session = self
            .session
            .lock()
            .map_err(|_| VisionError::Detection("detector session poisoned".to_string()))?;
        let outputs = session.run(ort::inputs! {
            "images" => Tensor::from_array(input)?,
        })?;

        // [1, 4 + classes, anchors]
        let raw = outputs["output0"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix3>()?;
        let predictions = raw.index_axis(ndarray::Axis(0), 0);

        let boxes = decode_predictions(predictions, self.settings.confidence_threshold, &letterbox);
        let kept = non_max_suppression(boxes, self.settings.iou_threshold);

        let pieces: Vec<DetectedPiece> = kept.into_iter().filter_map(to_piece).collect();
        debug!(pieces = pieces.len(), width, height, "detection finished");

        Ok(Detections {
            width,
            height,
            pieces,
        })
    }
}

#[async_trait]
impl PieceDetector for OnnxDetector {
    async fn detect(&self, image: &[u8]) -> Result<Detections, VisionError> {
        let detector = self.clone();
        let image = image.to_vec();
        tokio::task::spawn_blocking(move || detector.detect_blocking(&image))
            .await
            .map_err(|err| VisionError::Detection(err.to_string()))?
    }
}

/// Letterbox into the model's square input and lay out as `[1, 3, H, W]` in
/// `[0, 1]`.
fn preprocess(image: &DynamicImage) -> (Array4<f32>, Letterbox) {
    let size = INPUT_SIZE as usize;
    let letterbox = Letterbox::fit(image.width(), image.height());
    let rgb = image
        .resize_exact(letterbox.width, letterbox.height, FilterType::Triangle)
        .to_rgb8();

    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), PAD_VALUE);
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = ((x + letterbox.pad_x) as usize, (y + letterbox.pad_y) as usize);
        for channel in 0..3 {
            tensor[[0, channel, y, x]] = pixel[channel] as f32 / 255.0;
        }
    }
    (tensor, letterbox)
}

/// Read `[4 + classes, anchors]` rows into boxes above `threshold`, mapped
/// back to the original image.
fn decode_predictions(
    predictions: ArrayView2<f32>,
    threshold: f32,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let (rows, anchors) = predictions.dim();
    if rows <= 4 {
        return Vec::new();
    }
    let classes = (rows - 4).min(CLASS_LABELS.len());

    let mut boxes = Vec::new();
    for i in 0..anchors {
        let mut best = (0, f32::NEG_INFINITY);
        for class in 0..classes {
            let score = predictions[[4 + class, i]];
            if score > best.1 {
                best = (class, score);
            }
        }
        if best.1 < threshold {
            continue;
        }
        let (cx, cy) = letterbox.to_original(predictions[[0, i]], predictions[[1, i]]);
        boxes.push(BoundingBox {
            class: best.0,
            confidence: best.1,
            cx,
            cy,
            w: predictions[[2, i]] / letterbox.scale,
            h: predictions[[3, i]] / letterbox.scale,
        });
    }
    boxes
}

/// Greedy per-class suppression, highest confidence first.
fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let overlaps = kept
            .iter()
            .any(|k| k.class == candidate.class && k.iou(&candidate) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

fn to_piece(b: BoundingBox) -> Option<DetectedPiece> {
    let label = CLASS_LABELS.get(b.class).copied().flatten()?;
    Some(DetectedPiece {
        label: Piece::from_char(label)?,
        center_x: b.cx,
        center_y: b.cy,
    })
}

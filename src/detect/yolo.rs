//! YOLOv8 output decoding.
//!
//! YOLOv8 detection heads emit one tensor shaped `[1, 4 + classes, candidates]`: rows
//! 0..4 hold `cx, cy, w, h` in model-input pixels, the remaining rows hold per-class
//! scores (no separate objectness). Decoding keeps each candidate's best class, drops
//! candidates under the threshold, runs class-wise NMS and maps boxes back to frame
//! pixels.

use crate::detect::result::{BoundingBox, Detection};

/// COCO class names, in YOLOv8 class-id order.
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Default IoU above which a same-class box is suppressed.
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.45;

/// Decoding parameters for one frame.
#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    pub num_classes: usize,
    pub num_candidates: usize,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// Model-input to frame scale factors.
    pub scale_x: f32,
    pub scale_y: f32,
    /// Frame size, used to clamp boxes.
    pub frame_width: u32,
    pub frame_height: u32,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    class_id: usize,
}

/// Label for a class id; unknown ids map to `class_<id>`.
pub fn class_label(class_id: usize) -> String {
    COCO_CLASSES
        .get(class_id)
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("class_{}", class_id))
}

/// Decode a flattened `[4 + classes, candidates]` output into frame-space detections.
///
/// Output order is by descending confidence. Returns nothing if `output` is shorter
/// than the declared shape.
pub fn decode(output: &[f32], params: &DecodeParams) -> Vec<Detection> {
    let n = params.num_candidates;
    if output.len() < (4 + params.num_classes) * n {
        log::warn!(
            "yolo output too short: {} values for {} classes x {} candidates",
            output.len(),
            params.num_classes,
            n
        );
        return Vec::new();
    }
    let at = |row: usize, i: usize| output[row * n + i];

    let mut candidates = Vec::new();
    for i in 0..n {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_class = 0usize;
        for class_id in 0..params.num_classes {
            let score = at(4 + class_id, i);
            if score > best_score {
                best_score = score;
                best_class = class_id;
            }
        }
        if best_score < params.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        candidates.push(Candidate {
            x1: (cx - w / 2.0) * params.scale_x,
            y1: (cy - h / 2.0) * params.scale_y,
            x2: (cx + w / 2.0) * params.scale_x,
            y2: (cy + h / 2.0) * params.scale_y,
            score: best_score,
            class_id: best_class,
        });
    }

    let max_x = params.frame_width.saturating_sub(1) as f32;
    let max_y = params.frame_height.saturating_sub(1) as f32;
    non_max_suppression(candidates, params.nms_threshold)
        .into_iter()
        .map(|c| {
            Detection::new(
                class_label(c.class_id),
                c.score.clamp(0.0, 1.0),
                BoundingBox::from_corners(
                    c.x1.clamp(0.0, max_x),
                    c.y1.clamp(0.0, max_y),
                    c.x2.clamp(0.0, max_x),
                    c.y2.clamp(0.0, max_y),
                ),
            )
        })
        .collect()
}

/// Class-wise greedy NMS.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(k, &candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSES: usize = 3;

    /// Build a `[4 + CLASSES, n]` tensor from (cx, cy, w, h, class, score) rows.
    fn tensor(rows: &[(f32, f32, f32, f32, usize, f32)]) -> Vec<f32> {
        let n = rows.len();
        let mut out = vec![0.0f32; (4 + CLASSES) * n];
        for (i, &(cx, cy, w, h, class_id, score)) in rows.iter().enumerate() {
            out[i] = cx;
            out[n + i] = cy;
            out[2 * n + i] = w;
            out[3 * n + i] = h;
            out[(4 + class_id) * n + i] = score;
        }
        out
    }

    fn params(n: usize) -> DecodeParams {
        DecodeParams {
            num_classes: CLASSES,
            num_candidates: n,
            confidence_threshold: 0.5,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            scale_x: 1.0,
            scale_y: 1.0,
            frame_width: 640,
            frame_height: 640,
        }
    }

    #[test]
    fn decodes_boxes_and_labels() {
        let out = tensor(&[(100.0, 100.0, 40.0, 80.0, 0, 0.9), (300.0, 300.0, 20.0, 20.0, 2, 0.7)]);
        let detections = decode(&out, &params(2));
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "person");
        assert_eq!(detections[0].bbox, BoundingBox { x1: 80, y1: 60, x2: 120, y2: 140 });
        assert_eq!(detections[1].label, "car");
    }

    #[test]
    fn threshold_is_inclusive() {
        let out = tensor(&[(50.0, 50.0, 10.0, 10.0, 0, 0.5), (200.0, 200.0, 10.0, 10.0, 0, 0.499)]);
        let detections = decode(&out, &params(2));
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence, 0.5);
    }

    #[test]
    fn nms_suppresses_overlapping_same_class() {
        let out = tensor(&[
            (100.0, 100.0, 50.0, 50.0, 0, 0.8),
            (102.0, 101.0, 50.0, 50.0, 0, 0.9),
            (101.0, 100.0, 50.0, 50.0, 1, 0.7),
        ]);
        let detections = decode(&out, &params(3));
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[1].label, "bicycle");
    }

    #[test]
    fn scales_and_clamps_to_frame() {
        let out = tensor(&[(620.0, 320.0, 80.0, 40.0, 0, 0.9)]);
        let mut p = params(1);
        p.scale_x = 0.5;
        p.scale_y = 0.75;
        p.frame_width = 320;
        p.frame_height = 480;
        let detections = decode(&out, &p);
        assert_eq!(detections[0].bbox, BoundingBox { x1: 290, y1: 225, x2: 319, y2: 255 });
    }

    #[test]
    fn short_output_yields_nothing() {
        assert!(decode(&[0.0; 5], &params(2)).is_empty());
    }

    #[test]
    fn unknown_class_ids_get_placeholder_label() {
        assert_eq!(class_label(0), "person");
        assert_eq!(class_label(95), "class_95");
    }
}

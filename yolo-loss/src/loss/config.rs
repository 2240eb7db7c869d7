use super::loss::YoloLossInit;
use crate::common::*;

/// YOLOv3 anchors in input-image pixels as `(width, height)`.
pub const DEFAULT_ANCHORS: [[f64; 2]; 9] = [
    [10.0, 13.0],
    [16.0, 30.0],
    [33.0, 23.0],
    [30.0, 61.0],
    [62.0, 45.0],
    [59.0, 119.0],
    [116.0, 90.0],
    [156.0, 198.0],
    [373.0, 326.0],
];

/// Anchor indices per scale, coarsest grid first.
pub const DEFAULT_ANCHORS_MASK: [[usize; 3]; 3] = [[6, 7, 8], [3, 4, 5], [0, 1, 2]];

pub const DEFAULT_IGNORE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Config {
    /// Anchor sizes as `(width, height)` pairs in input-image pixels.
    #[serde(default = "default_anchors")]
    pub anchors: Vec<(R64, R64)>,
    #[serde(default = "default_anchors_mask")]
    pub anchors_mask: Vec<Vec<usize>>,
    pub num_classes: NonZeroUsize,
    /// Network input size as `(height, width)`.
    pub input_shape: (NonZeroUsize, NonZeroUsize),
    #[serde(default = "default_ignore_threshold")]
    pub ignore_threshold: R64,
}

impl Config {
    pub fn yolo_loss_init(&self) -> YoloLossInit {
        let Self {
            ref anchors,
            ref anchors_mask,
            num_classes,
            input_shape: (input_h, input_w),
            ignore_threshold,
        } = *self;

        YoloLossInit {
            anchors: Some(
                anchors
                    .iter()
                    .map(|&(w, h)| [w.raw(), h.raw()])
                    .collect(),
            ),
            anchors_mask: Some(anchors_mask.clone()),
            ignore_threshold: Some(ignore_threshold.raw()),
            ..YoloLossInit::new(num_classes.get(), [input_h.get(), input_w.get()])
        }
    }
}

fn default_anchors() -> Vec<(R64, R64)> {
    DEFAULT_ANCHORS
        .iter()
        .map(|&[w, h]| (r64(w), r64(h)))
        .collect()
}

fn default_anchors_mask() -> Vec<Vec<usize>> {
    DEFAULT_ANCHORS_MASK.iter().map(|group| group.to_vec()).collect()
}

fn default_ignore_threshold() -> R64 {
    r64(DEFAULT_IGNORE_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() -> Result<()> {
        let config: Config = json5::from_str(
            r#"{
                num_classes: 80,
                input_shape: [416, 416],
            }"#,
        )?;

        assert_eq!(config.anchors.len(), 9);
        assert_eq!(config.anchors[8], (r64(373.0), r64(326.0)));
        assert_eq!(config.anchors_mask, vec![vec![6, 7, 8], vec![3, 4, 5], vec![0, 1, 2]]);
        assert_eq!(config.ignore_threshold, r64(0.5));

        let yolo_loss = config.yolo_loss_init().build()?;
        assert_eq!(yolo_loss.num_classes(), 80);
        assert_eq!(yolo_loss.num_scales(), 3);
        Ok(())
    }

    #[test]
    fn config_rejects_zero_classes() {
        let result: Result<Config, _> = json5::from_str(
            r#"{
                num_classes: 0,
                input_shape: [416, 416],
            }"#,
        );
        assert!(result.is_err());
    }
}

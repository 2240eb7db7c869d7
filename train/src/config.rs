//! Training program configuration format.

use crate::{
    common::*,
    utils::{DecayKind, InitKind, LrSchedulerInit},
};
use yolo_loss::loss::{self, NUM_SCALES};

pub use lr_schedule::*;
pub use weights::*;

/// The main training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The loss function options.
    pub loss: loss::Config,
    /// Learning rate scheduling strategy.
    pub lr_schedule: LrScheduleConfig,
    /// Initialization of model weights.
    #[serde(default)]
    pub weights_init: WeightsInitConfig,
    /// Feature map strides of the detection scales, coarsest first.
    #[serde(default = "default_strides")]
    pub strides: Vec<NonZeroUsize>,
    /// The device where the loss is computed.
    #[serde(with = "tch_serde::serde_device", default = "default_device")]
    pub device: Device,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)
            .with_context(|| format!("unable to parse config file '{}'", path.display()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        ensure!(
            self.strides.len() == NUM_SCALES,
            "expect {} strides, but get {}",
            NUM_SCALES,
            self.strides.len()
        );
        self.grid_sizes()?;
        Ok(())
    }

    /// The `[grid_h, grid_w]` feature map size of each scale.
    pub fn grid_sizes(&self) -> Result<Vec<[i64; 2]>> {
        let (input_h, input_w) = self.loss.input_shape;
        let (input_h, input_w) = (input_h.get(), input_w.get());

        self.strides
            .iter()
            .map(|stride| {
                let stride = stride.get();
                ensure!(
                    input_h % stride == 0 && input_w % stride == 0,
                    "the input size {}x{} is not divisible by stride {}",
                    input_h,
                    input_w,
                    stride
                );
                Ok([(input_h / stride) as i64, (input_w / stride) as i64])
            })
            .collect()
    }
}

mod lr_schedule {
    use super::*;

    /// The learning rate scheduling strategy.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LrScheduleConfig {
        pub decay_type: DecayKind,
        /// The peak learning rate.
        pub lr: R64,
        pub min_lr: R64,
        /// The number of iterations the schedule spans.
        pub total_iters: NonZeroUsize,
        pub warmup_iters_ratio: Option<R64>,
        pub warmup_lr_ratio: Option<R64>,
        pub no_aug_iter_ratio: Option<R64>,
        pub step_num: Option<NonZeroUsize>,
    }

    impl LrScheduleConfig {
        pub fn lr_scheduler_init(&self) -> LrSchedulerInit {
            let Self {
                decay_type,
                lr,
                min_lr,
                total_iters,
                warmup_iters_ratio,
                warmup_lr_ratio,
                no_aug_iter_ratio,
                step_num,
            } = *self;

            LrSchedulerInit {
                warmup_iters_ratio: warmup_iters_ratio.map(R64::raw),
                warmup_lr_ratio: warmup_lr_ratio.map(R64::raw),
                no_aug_iter_ratio: no_aug_iter_ratio.map(R64::raw),
                step_num: step_num.map(NonZeroUsize::get),
                ..LrSchedulerInit::new(decay_type, lr.raw(), min_lr.raw(), total_iters.get())
            }
        }
    }
}

mod weights {
    use super::*;

    /// Weight initialization options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct WeightsInitConfig {
        pub kind: InitKind,
        #[serde(default = "default_init_gain")]
        pub gain: R64,
    }

    impl Default for WeightsInitConfig {
        fn default() -> Self {
            Self {
                kind: InitKind::Normal,
                gain: default_init_gain(),
            }
        }
    }

    fn default_init_gain() -> R64 {
        r64(0.02)
    }
}

fn default_strides() -> Vec<NonZeroUsize> {
    [32, 16, 8]
        .iter()
        .filter_map(|&stride| NonZeroUsize::new(stride))
        .collect()
}

fn default_device() -> Device {
    Device::Cpu
}

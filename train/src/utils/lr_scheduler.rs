use crate::common::*;

/// The learning rate decay strategy.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
pub enum DecayKind {
    /// Quadratic warmup, cosine decay and a flat tail.
    #[strum(serialize = "cos")]
    #[serde(rename = "cos")]
    Cos,
    /// Geometric decay in evenly spaced steps.
    #[strum(serialize = "step")]
    #[serde(rename = "step")]
    Step,
}

impl DecayKind {
    pub fn from_name(name: &str) -> Result<Self> {
        Self::from_str(name)
            .map_err(|_| format_err!("learning rate decay type [{}] is not implemented", name))
    }
}

#[derive(Debug, Clone)]
pub struct LrSchedulerInit {
    pub kind: DecayKind,
    pub lr: f64,
    pub min_lr: f64,
    pub total_iters: usize,
    pub warmup_iters_ratio: Option<f64>,
    pub warmup_lr_ratio: Option<f64>,
    pub no_aug_iter_ratio: Option<f64>,
    pub step_num: Option<usize>,
}

impl LrSchedulerInit {
    pub fn new(kind: DecayKind, lr: f64, min_lr: f64, total_iters: usize) -> Self {
        Self {
            kind,
            lr,
            min_lr,
            total_iters,
            warmup_iters_ratio: None,
            warmup_lr_ratio: None,
            no_aug_iter_ratio: None,
            step_num: None,
        }
    }

    pub fn build(self) -> Result<LrScheduler> {
        let Self {
            kind,
            lr,
            min_lr,
            total_iters,
            warmup_iters_ratio,
            warmup_lr_ratio,
            no_aug_iter_ratio,
            step_num,
        } = self;

        let warmup_iters_ratio = warmup_iters_ratio.unwrap_or(0.05);
        let warmup_lr_ratio = warmup_lr_ratio.unwrap_or(0.1);
        let no_aug_iter_ratio = no_aug_iter_ratio.unwrap_or(0.05);
        let step_num = step_num.unwrap_or(10);

        ensure!(
            lr.is_finite() && lr > 0.0,
            "lr must be positive, but get {}",
            lr
        );
        ensure!(
            min_lr.is_finite() && min_lr >= 0.0,
            "min_lr must be non-negative, but get {}",
            min_lr
        );
        ensure!(total_iters >= 1, "total_iters must be at least 1");
        ensure!(
            [warmup_iters_ratio, warmup_lr_ratio, no_aug_iter_ratio]
                .iter()
                .all(|ratio| (0.0..=1.0).contains(ratio)),
            "warmup_iters_ratio, warmup_lr_ratio and no_aug_iter_ratio must be in range [0, 1]"
        );

        let total_iters_f = total_iters as f64;

        let scheduler = match kind {
            DecayKind::Cos => {
                let warmup_total_iters = (warmup_iters_ratio * total_iters_f).max(1.0).min(3.0);
                let warmup_lr_start = (warmup_lr_ratio * lr).max(1e-6);
                let no_aug_iter = (no_aug_iter_ratio * total_iters_f).max(1.0).min(15.0);

                LrScheduler::Cos(CosSchedule {
                    lr,
                    min_lr,
                    total_iters: total_iters_f,
                    warmup_total_iters,
                    warmup_lr_start,
                    no_aug_iter,
                })
            }
            DecayKind::Step => {
                ensure!(step_num >= 2, "step_num must be at least 2");
                let step_size = total_iters_f / step_num as f64;
                ensure!(step_size >= 1.0, "step_size must be at least 1");
                let decay_rate = (min_lr / lr).powf(1.0 / (step_num - 1) as f64);

                LrScheduler::Step(StepSchedule {
                    lr,
                    decay_rate,
                    step_size,
                })
            }
        };

        info!(
            "use {} learning rate schedule from {} to {} in {} iterations",
            kind, lr, min_lr, total_iters
        );

        Ok(scheduler)
    }
}

/// A learning rate as a function of the iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum LrScheduler {
    Cos(CosSchedule),
    Step(StepSchedule),
}

impl LrScheduler {
    /// Build a schedule with the default ratio parameters.
    pub fn new(kind: DecayKind, lr: f64, min_lr: f64, total_iters: usize) -> Result<Self> {
        LrSchedulerInit::new(kind, lr, min_lr, total_iters).build()
    }

    pub fn kind(&self) -> DecayKind {
        match self {
            Self::Cos(_) => DecayKind::Cos,
            Self::Step(_) => DecayKind::Step,
        }
    }

    /// The learning rate at iteration `iter`.
    pub fn lr_at(&self, iter: usize) -> f64 {
        match self {
            Self::Cos(schedule) => schedule.lr_at(iter),
            Self::Step(schedule) => schedule.lr_at(iter),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CosSchedule {
    lr: f64,
    min_lr: f64,
    total_iters: f64,
    warmup_total_iters: f64,
    warmup_lr_start: f64,
    no_aug_iter: f64,
}

impl CosSchedule {
    pub fn lr_at(&self, iter: usize) -> f64 {
        let Self {
            lr,
            min_lr,
            total_iters,
            warmup_total_iters,
            warmup_lr_start,
            no_aug_iter,
        } = *self;
        let iter = iter as f64;

        if iter <= warmup_total_iters {
            (lr - warmup_lr_start) * (iter / warmup_total_iters).powi(2) + warmup_lr_start
        } else if iter >= total_iters - no_aug_iter {
            min_lr
        } else {
            let progress =
                (iter - warmup_total_iters) / (total_iters - warmup_total_iters - no_aug_iter);
            min_lr + 0.5 * (lr - min_lr) * (1.0 + (PI * progress).cos())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSchedule {
    lr: f64,
    decay_rate: f64,
    step_size: f64,
}

impl StepSchedule {
    pub fn lr_at(&self, iter: usize) -> f64 {
        let num_steps = (iter as f64 / self.step_size).floor();
        self.lr * self.decay_rate.powf(num_steps)
    }
}

/// Set the optimizer's learning rate to the schedule's value at `iter` and return it.
pub fn set_optimizer_lr(
    optimizer: &mut nn::Optimizer,
    scheduler: &LrScheduler,
    iter: usize,
) -> f64 {
    let lr = scheduler.lr_at(iter);
    optimizer.set_lr(lr);
    lr
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tch::nn::OptimizerConfig as _;

    #[test]
    fn cos_schedule() -> Result<()> {
        let scheduler = LrScheduler::new(DecayKind::Cos, 1e-2, 1e-4, 100)?;

        // warmup over 3 iterations from 10% of lr
        assert_abs_diff_eq!(scheduler.lr_at(0), 1e-3, epsilon = 1e-12);
        assert_abs_diff_eq!(
            scheduler.lr_at(1),
            (1e-2 - 1e-3) / 9.0 + 1e-3,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(scheduler.lr_at(3), 1e-2, epsilon = 1e-12);

        // the last 5 iterations stay at min_lr
        assert_abs_diff_eq!(scheduler.lr_at(95), 1e-4, epsilon = 1e-12);
        assert_abs_diff_eq!(scheduler.lr_at(99), 1e-4, epsilon = 1e-12);

        // monotonic decay after warmup
        (3..99).try_for_each(|iter| -> Result<()> {
            ensure!(scheduler.lr_at(iter + 1) <= scheduler.lr_at(iter));
            Ok(())
        })?;

        // halfway through the cosine part
        assert_abs_diff_eq!(
            scheduler.lr_at(49),
            1e-4 + 0.5 * (1e-2 - 1e-4),
            epsilon = 1e-12
        );
        Ok(())
    }

    #[test]
    fn cos_warmup_has_lower_bound() -> Result<()> {
        let scheduler = LrScheduler::new(DecayKind::Cos, 1e-6, 1e-7, 1000)?;
        assert_abs_diff_eq!(scheduler.lr_at(0), 1e-6, epsilon = 1e-15);
        Ok(())
    }

    #[test]
    fn step_schedule() -> Result<()> {
        let scheduler = LrScheduler::new(DecayKind::Step, 1e-2, 1e-4, 100)?;

        assert_abs_diff_eq!(scheduler.lr_at(0), 1e-2, epsilon = 1e-12);
        assert_abs_diff_eq!(scheduler.lr_at(9), 1e-2, epsilon = 1e-12);
        assert!(scheduler.lr_at(10) < 1e-2);
        assert_abs_diff_eq!(scheduler.lr_at(99), 1e-4, epsilon = 1e-12);

        let decay_rate = 0.01f64.powf(1.0 / 9.0);
        assert_abs_diff_eq!(scheduler.lr_at(25), 1e-2 * decay_rate.powi(2), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn step_size_must_be_at_least_one() {
        let err = LrScheduler::new(DecayKind::Step, 1e-2, 1e-4, 9).unwrap_err();
        assert_eq!(err.to_string(), "step_size must be at least 1");
        assert!(LrScheduler::new(DecayKind::Step, 1e-2, 1e-4, 10).is_ok());
    }

    #[test]
    fn decay_kind_names() -> Result<()> {
        assert_eq!(DecayKind::from_name("cos")?, DecayKind::Cos);
        assert_eq!(DecayKind::from_name("step")?, DecayKind::Step);
        assert_eq!(DecayKind::Cos.to_string(), "cos");
        assert!(DecayKind::from_name("linear").is_err());
        Ok(())
    }

    #[test]
    fn update_optimizer() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let _linear = nn::linear(&root / "fc", 2, 2, Default::default());
        let mut optimizer = nn::Sgd::default().build(&vs, 1.0)?;
        let scheduler = LrScheduler::new(DecayKind::Step, 1e-2, 1e-4, 100)?;

        let lr = set_optimizer_lr(&mut optimizer, &scheduler, 99);
        assert_abs_diff_eq!(lr, 1e-4, epsilon = 1e-12);
        Ok(())
    }
}

use anyhow::{ensure, Context, Result};
use clap::Parser;
use label::RatioLabel;
use log::info;
use prettytable::{cell, row, Table};
use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};
use tch::{Kind, Tensor};
use train::config::Config;
use yolo_loss::loss::YoloLossOutput;

#[derive(Debug, Clone, Parser)]
/// Inspect YOLO loss and training configurations
enum Opts {
    /// Show anchors, grid size and stride of each scale
    Info {
        /// configuration file
        config_file: PathBuf,
    },
    /// Print the learning rate schedule
    LrSchedule {
        /// configuration file
        config_file: PathBuf,
        /// print one row per this many iterations
        #[clap(long, default_value = "1")]
        every: NonZeroUsize,
    },
    /// Evaluate the loss of all-zero predictions against ground truth boxes
    EvalLoss {
        /// configuration file
        config_file: PathBuf,
        /// JSON file with a list of [cx, cy, w, h, class] boxes per image
        labels_file: PathBuf,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    match Opts::parse() {
        Opts::Info { config_file } => {
            info(config_file)?;
        }
        Opts::LrSchedule { config_file, every } => {
            lr_schedule(config_file, every.get())?;
        }
        Opts::EvalLoss {
            config_file,
            labels_file,
        } => {
            eval_loss(config_file, labels_file)?;
        }
    }

    Ok(())
}

fn info(config_file: impl AsRef<Path>) -> Result<()> {
    let config = Config::open(config_file)?;
    let yolo_loss = config.loss.yolo_loss_init().build()?;
    let grid_sizes = config.grid_sizes()?;

    let mut table = Table::new();
    table.add_row(row!["scale", "grid", "stride", "anchor", "size (pixels)", "size (cells)"]);

    for (scale_index, &[grid_h, grid_w]) in grid_sizes.iter().enumerate() {
        let [stride_h, stride_w] = yolo_loss.strides(grid_h, grid_w);
        let scaled_anchors = yolo_loss.scaled_anchors(grid_h, grid_w);

        for &anchor_index in yolo_loss.anchors_mask(scale_index)? {
            let anchor = &yolo_loss.anchors()[anchor_index];
            let scaled = &scaled_anchors[anchor_index];

            table.add_row(row![
                scale_index,
                format!("{}x{}", grid_h, grid_w),
                format!("{}x{}", stride_h, stride_w),
                anchor_index,
                format!("{}x{}", anchor.w(), anchor.h()),
                format!("{:.3}x{:.3}", scaled.w(), scaled.h()),
            ]);
        }
    }

    table.printstd();
    println!(
        "classes: {}\tignore threshold: {}",
        yolo_loss.num_classes(),
        yolo_loss.ignore_threshold()
    );

    Ok(())
}

fn lr_schedule(config_file: impl AsRef<Path>, every: usize) -> Result<()> {
    let config = Config::open(config_file)?;
    let total_iters = config.lr_schedule.total_iters.get();
    let scheduler = config.lr_schedule.lr_scheduler_init().build()?;

    let mut table = Table::new();
    table.add_row(row!["iteration", "lr"]);

    for iter in (0..total_iters).step_by(every) {
        table.add_row(row![iter, format!("{:.6e}", scheduler.lr_at(iter))]);
    }
    if (total_iters - 1) % every != 0 {
        let iter = total_iters - 1;
        table.add_row(row![iter, format!("{:.6e}", scheduler.lr_at(iter))]);
    }

    table.printstd();
    Ok(())
}

fn eval_loss(config_file: impl AsRef<Path>, labels_file: impl AsRef<Path>) -> Result<()> {
    let config = Config::open(config_file)?;
    let yolo_loss = config.loss.yolo_loss_init().build()?;
    let targets = load_labels(labels_file)?;
    ensure!(!targets.is_empty(), "the labels file must list at least one image");

    let device = config.device;
    let batch_size = targets.len() as i64;
    let num_anchors_per_scale: Vec<_> = (0..yolo_loss.num_scales())
        .map(|scale_index| yolo_loss.anchors_mask(scale_index).map(|mask| mask.len() as i64))
        .collect::<Result<_>>()?;
    let num_attrs = 5 + yolo_loss.num_classes() as i64;

    let outputs: Vec<YoloLossOutput> = config
        .grid_sizes()?
        .into_iter()
        .enumerate()
        .map(|(scale_index, [grid_h, grid_w])| -> Result<_> {
            let num_anchors = num_anchors_per_scale[scale_index];
            let prediction = Tensor::zeros(
                &[batch_size, num_anchors * num_attrs, grid_h, grid_w],
                (Kind::Float, device),
            );
            let (output, _) = yolo_loss.forward(scale_index, &prediction, &targets)?;
            info!("evaluated scale {} on a {}x{} grid", scale_index, grid_h, grid_w);
            Ok(output)
        })
        .collect::<Result<_>>()?;
    let total = YoloLossOutput::sum_scales(&outputs)?;

    let mut table = Table::new();
    {
        let mut header = row!["scale"];
        total
            .components()
            .iter()
            .for_each(|(name, _)| header.add_cell(cell!(name)));
        table.add_row(header);
    }

    let rows = outputs
        .iter()
        .enumerate()
        .map(|(scale_index, output)| (scale_index.to_string(), output))
        .chain(std::iter::once(("all".to_string(), &total)));
    for (scale, output) in rows {
        let mut row = row![scale];
        output
            .components()
            .iter()
            .for_each(|(_, value)| row.add_cell(cell!(format!("{:.4}", value))));
        table.add_row(row);
    }

    table.printstd();
    println!("normalized loss: {:.4}", f64::from(&total.normalized_loss()));

    Ok(())
}

fn load_labels(labels_file: impl AsRef<Path>) -> Result<Vec<Vec<RatioLabel>>> {
    let labels_file = labels_file.as_ref();
    let text = fs::read_to_string(labels_file)
        .with_context(|| format!("unable to read labels file '{}'", labels_file.display()))?;
    let images: Vec<Vec<(f64, f64, f64, f64, usize)>> = serde_json::from_str(&text)
        .with_context(|| format!("unable to parse labels file '{}'", labels_file.display()))?;

    images
        .into_iter()
        .map(|boxes| {
            boxes
                .into_iter()
                .map(|(cx, cy, w, h, class)| RatioLabel::from_cxcywh([cx, cy, w, h], class))
                .collect::<Result<Vec<_>>>()
        })
        .collect()
}

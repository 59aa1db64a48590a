use anyhow::Result;
use clap::Parser;
use log::LevelFilter;
use prettytable::{cell, row, Table};
use std::{path::PathBuf, sync::Arc};
use yolo_v3::{
    config::Config,
    dataset::{CocoDatasetInit, FileImageLoader},
    target::TargetBuilder,
};

#[derive(Debug, Clone, Parser)]
enum Opts {
    /// Print the anchor layout of each detection scale.
    Info {
        /// configuration file
        config_file: PathBuf,
    },
    /// Run the data pipeline and print target statistics per batch.
    Inspect {
        /// configuration file
        config_file: PathBuf,
        /// number of batches to generate
        #[clap(long, default_value = "1")]
        batches: usize,
    },
}

fn main() -> Result<()> {
    let mut logger = pretty_env_logger::formatted_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) => logger.parse_filters(&filters),
        Err(_) => logger.filter_level(LevelFilter::Info),
    };
    logger.init();

    match Opts::parse() {
        Opts::Info { config_file } => {
            let config = Config::open(config_file)?;
            info(&config)?;
        }
        Opts::Inspect {
            config_file,
            batches,
        } => {
            let config = Config::open(config_file)?;
            inspect(&config, batches)?;
        }
    }

    Ok(())
}

fn info(config: &Config) -> Result<()> {
    let anchors = config.model.anchor_set()?;

    let mut table = Table::new();
    table.add_row(row!["scale", "stride", "grid", "anchor", "w", "h"]);

    anchors.iter().for_each(|(index, anchor)| {
        let scale = &anchors.scales()[index.scale_index];
        table.add_row(row![
            index.scale_index,
            scale.stride(),
            format!("{0}x{0}", scale.grid_size()),
            index.anchor_index,
            anchor.w(),
            anchor.h(),
        ]);
    });

    println!(
        "input size {}, {} classes",
        anchors.input_size(),
        config.model.num_classes
    );
    table.printstd();

    Ok(())
}

fn inspect(config: &Config, batches: usize) -> Result<()> {
    let num_classes = config.model.num_classes.get();
    let anchors = Arc::new(config.model.anchor_set()?);
    let dataset = CocoDatasetInit {
        include_crowd: config.dataset.include_crowd,
        max_instances: config.dataset.max_instances,
    }
    .load(&config.dataset.annotation_file, &config.dataset.image_dir)?;

    let builder = TargetBuilder::new(anchors.clone(), num_classes)?;
    let generator = config
        .training
        .generator_init(&config.dataset)
        .build(dataset.records, FileImageLoader, builder)?;

    let mut table = Table::new();
    let mut header = row!["step", "epoch", "images"];
    anchors.scales().iter().for_each(|scale| {
        header.add_cell(cell!(format!("pos@{}", scale.stride())));
    });
    header.add_cell(cell!("skipped"));
    header.add_cell(cell!("collisions"));
    header.add_cell(cell!("failed"));
    table.add_row(header);

    for batch in generator.take(batches) {
        let batch = batch?;
        let mut row = row![
            batch.step,
            batch.epoch,
            format!("{:?}", batch.image_ids)
        ];
        batch.stats.positives.iter().for_each(|count| {
            row.add_cell(cell!(count));
        });
        row.add_cell(cell!(batch.stats.skipped));
        row.add_cell(cell!(batch.stats.collisions));
        row.add_cell(cell!(batch.stats.failed));
        table.add_row(row);
    }

    table.printstd();
    Ok(())
}

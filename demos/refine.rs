use std::fs::File;
use clap::Parser;
use log::info;
use canopy::config::{Branching, Config, FieldConfig};
use canopy::criterion::Predicate;
use canopy::index_space::IndexSpace;
use canopy::Tree;

#[derive(Debug, Parser)]
#[clap(version = "0.1", about = "Refine a quadtree toward a circle and print its level map")]
struct Opts {
    #[clap(short = 'k', long, default_value = "2")]
    branch: usize,

    #[clap(short = 'l', long, default_value = "5")]
    max_level: u32,

    #[clap(short = 'n', long, default_value = "64")]
    resolution: usize,

    #[clap(short = 'r', long, default_value = "0.3")]
    radius: f64,

    #[clap(long)]
    partial: bool,

    #[clap(long)]
    coalesce: bool,

    #[clap(long)]
    save_config: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    simple_logger::init_with_level(log::Level::Info)?;
    let opts = Opts::parse();
    let mode = if opts.partial { Branching::Partial } else { Branching::Full };
    let n = opts.resolution as i64;

    // A node splits when the circle passes through its region.
    let crosses = |region: &IndexSpace, _: u32| {
        let r2 = |i: i64, j: i64| {
            let x = i as f64 / n as f64 - 0.5;
            let y = j as f64 / n as f64 - 0.5;
            x * x + y * y
        };
        let (lo, hi) = (region.start(), region.end());
        let corners = [r2(lo[0], lo[1]), r2(hi[0], lo[1]), r2(lo[0], hi[1]), r2(hi[0], hi[1])];
        let inside = corners.iter().filter(|&&d| d < opts.radius * opts.radius).count();
        inside != 0 && inside != corners.len()
    };
    let criterion = Predicate::new(IndexSpace::from_extent([opts.resolution, opts.resolution, 1]), crosses);

    let mut tree = Tree::new(2, opts.branch)?;
    let depth = tree.refine(&criterion, opts.max_level, mode);
    info!("refined to depth {}: {} nodes, {} leaves", depth, tree.node_count(), tree.leaves().len());

    let passes = tree.balance_to_fixed_point(mode);
    info!("balanced in {} passes: {} nodes, {} leaves", passes, tree.node_count(), tree.leaves().len());

    if opts.coalesce {
        let passes = tree.coalesce_to_fixed_point();
        info!("coalesced in {} passes: {} nodes", passes, tree.node_count());
    }
    tree.validate()?;

    let image = tree.level_image(opts.resolution)?;
    for row in image.chunks(opts.resolution).rev() {
        let line: String = row.iter().map(|&l| std::char::from_digit(l.min(35), 36).unwrap_or('#')).collect();
        println!("{}", line);
    }

    if let Some(path) = opts.save_config {
        let config = Config {
            rank: 2,
            branch: opts.branch,
            max_level: opts.max_level,
            branching: mode,
            block_size: [8, 8, 1],
            alignment: 8,
            padding: 0,
            fields: vec![FieldConfig::new("density"), FieldConfig::new("energy")],
            refresh: Default::default(),
        };
        config.to_cbor(File::create(&path)?)?;
        info!("wrote configuration to {}", path);
    }
    Ok(())
}

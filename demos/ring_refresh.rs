use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;
use clap::Parser;
use log::info;
use canopy::config::{Config, FieldConfig, RefreshOptions};
use canopy::criterion::LevelArray;
use canopy::message::{ChannelTransport, TcpTransport, Transport};
use canopy::resample::{Linear, PiecewiseConstant, Resample};
use canopy::{Error, Mesh};

#[derive(Debug, Parser)]
#[clap(version = "0.1", about = "Refresh the ghost zones of a distributed mesh on a group of threads")]
struct Opts {
    #[clap(short = 'p', long, default_value = "4")]
    num_ranks: usize,

    #[clap(short = 'b', long, default_value = "8")]
    block_size: usize,

    #[clap(short = 'l', long, default_value = "3")]
    max_level: u32,

    #[clap(long)]
    tcp: bool,

    #[clap(long)]
    linear: bool,

    #[clap(long, default_value = "9000")]
    base_port: u16,
}

fn config(opts: &Opts) -> Config {
    Config {
        rank: 2,
        branch: 2,
        max_level: opts.max_level,
        branching: Default::default(),
        block_size: [opts.block_size, opts.block_size, 1],
        alignment: 16,
        padding: 0,
        fields: vec![FieldConfig::new("density")],
        refresh: RefreshOptions::default(),
    }
}

fn encode(x: u64) -> Vec<u8> {
    x.to_le_bytes().to_vec()
}

fn decode(bytes: &[u8]) -> u64 {
    let mut buf = [0; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn run<T: Transport>(transport: T, opts: &Opts) -> Result<(usize, f64), Error> {
    let config = config(opts);
    let n = 1 << opts.max_level;
    let levels = LevelArray::from_fn([n, n, 1], |[i, j, _]| if i + j < n as i64 / 2 { opts.max_level } else { 1 });
    let mut mesh = Mesh::from_config(&config, &levels, transport.rank(), transport.size())?;
    let resampler: Box<dyn Resample> = if opts.linear { Box::new(Linear) } else { Box::new(PiecewiseConstant) };
    let b = opts.block_size as i64;

    for id in mesh.local_leaves() {
        let (level, position) = {
            let node = mesh.tree().node(id).ok_or_else(|| Error::State(format!("{} vanished", id)))?;
            (node.level(), node.position())
        };
        let block = mesh.block_mut(id).ok_or_else(|| Error::State(format!("no block for {}", id)))?;
        let scale = (b << level) as f64;

        for j in 0..b {
            for i in 0..b {
                let x = (position[0] * b + i) as f64 + 0.5;
                let y = (position[1] * b + j) as f64 + 0.5;
                block.fields.set_value(0, [i, j, 0], (x + y) / scale)?;
            }
        }
    }
    let moved = mesh.refresh(&transport, resampler.as_ref(), &config.refresh)?;
    let total = decode(&transport.all_reduce(|a, b| encode(decode(&a) + decode(&b)), encode(moved as u64))?);

    let mut low = f64::MAX;
    for id in mesh.local_leaves() {
        if let Some(block) = mesh.block(id) {
            for j in -1..=b {
                low = low.min(block.fields.value(0, [-1, j, 0])?);
            }
        }
    }
    info!("rank {} holds {} blocks; {} bytes moved in total", transport.rank(), mesh.local_leaves().len(), total);
    Ok((total as usize, low))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    simple_logger::init_with_level(log::Level::Info)?;
    let opts = Opts::parse();
    let size = opts.num_ranks;

    let results: Vec<Result<(usize, f64), Error>> = thread::scope(|scope| {
        let handles: Vec<_> = if opts.tcp {
            let peers: Vec<_> = (0..size)
                .map(|rank| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), opts.base_port + rank as u16))
                .collect();
            (0..size)
                .map(|rank| {
                    let peers = peers.clone();
                    let opts = &opts;
                    scope.spawn(move || run(TcpTransport::bind(rank, peers)?, opts))
                })
                .collect()
        } else {
            ChannelTransport::group(size)
                .into_iter()
                .map(|transport| {
                    let opts = &opts;
                    scope.spawn(move || run(transport, opts))
                })
                .collect()
        };
        handles.into_iter().map(|h| h.join().unwrap_or_else(|_| Err(Error::State("rank panicked".to_string())))).collect()
    });

    for (rank, result) in results.into_iter().enumerate() {
        let (total, low) = result?;
        println!("rank {}: {} bytes exchanged by the group, smallest lower ghost value {:.4}", rank, total, low);
    }
    Ok(())
}

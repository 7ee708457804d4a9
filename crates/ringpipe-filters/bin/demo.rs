//! End-to-end demo: sine generator -> gain map -> tee -> {collect, null}.
//!
//! Run with `cargo run --bin demo`; set `RUST_LOG=debug` for lifecycle
//! logs.

use anyhow::Result;
use ringpipe::{BufferConfig, DType, Overflow};
use ringpipe_filters::{
    CollectSink, FuncGenConfig, FunctionGenerator, Map, NullSink, Tee, TeeMode,
};
use ringpipe_graph::{Filter, Graph};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut graph = Graph::new();

    let gen = graph.add(FunctionGenerator::<f32>::sine(
        "gen",
        FuncGenConfig {
            sample_rate: 48_000.0,
            n_samples: Some(48_000),
            realtime: false,
        },
        1.0,
        440.0,
    )?);

    let gain = graph.add(Map::<f32, f32>::new(
        "gain",
        BufferConfig::new("gain.in", DType::F32).with_batch_expo(8),
        |x| x * 0.5,
    )?);

    let tee = graph.add(Tee::<f32>::new(
        "tee",
        BufferConfig::new("tee.in", DType::F32).with_batch_expo(8),
        2,
        TeeMode::Duplicate,
    )?);

    let collect = CollectSink::<f32>::new(
        "collect",
        BufferConfig::new("collect.in", DType::F32).with_batch_expo(8),
    )?;
    let handle = collect.handle();
    let collect = graph.add(collect);

    // The monitoring tap sheds load instead of stalling the main path.
    let monitor = graph.add(NullSink::new(
        "monitor",
        BufferConfig::new("monitor.in", DType::F32)
            .with_batch_expo(8)
            .with_overflow(Overflow::DropTail),
    )?);

    graph.connect(gen, 0, gain, 0)?;
    graph.connect(gain, 0, tee, 0)?;
    graph.connect(tee, 0, collect, 0)?;
    graph.connect(tee, 1, monitor, 0)?;

    graph.start()?;
    let completed = handle.wait_complete(Duration::from_secs(10));
    graph.stop()?;

    let collected = handle.snapshot();
    println!(
        "completed={completed} samples={} batches={} peak={:.3}",
        collected.samples.len(),
        collected.batches.len(),
        collected
            .samples
            .iter()
            .fold(0.0f32, |m, &x| m.max(x.abs())),
    );
    for id in [gen, gain, tee, collect, monitor] {
        print!("{}", graph.get(id).expect("added above").describe());
    }
    Ok(())
}

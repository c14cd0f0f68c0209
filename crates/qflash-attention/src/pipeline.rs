//! Staged execution of one query tile.
//!
//! ```text
//! load K/V ──kv──▶ scores ──scores──▶ softmax ──probs──▶ accumulate ──▶ normalize
//!     └──────────────────────values────────────────────────┘
//! ```
//!
//! Each stage runs on its own scoped thread and stages are joined by
//! bounded queues of capacity `depth`; a stage blocks when its output queue
//! is full or its input queue is empty. Several key/value blocks may be in
//! flight at once, but every queue has a single producer and a single
//! consumer, so the softmax and accumulate stages see blocks strictly in
//! tile order. Q, K and V are only ever read.

use std::ops::Range;
use std::thread;

use crossbeam::channel::{bounded, Receiver, Sender};
use tracing::trace;

use qflash_core::{QFlashError, Result};
use qflash_kernels::{AttentionOperand, ScoreBlock, ValueBlock};

use crate::config::AttentionConfig;
use crate::tile::{tile_rows, OutputRows, SoftmaxRows};

/// A key/value block handed from the loader to the score stage.
struct KvBlock {
    index: usize,
    rows: Range<usize>,
}

struct ScorePacket {
    index: usize,
    scores: ScoreBlock,
}

/// Probabilities (`Br x Bc`) and per-row corrections of one block.
struct SoftmaxPacket {
    index: usize,
    probs: Vec<f32>,
    corrections: Vec<f32>,
}

struct ValuePacket {
    index: usize,
    values: ValueBlock,
}

/// Run query tile `tile` through the staged pipeline and write its
/// normalized `Br x d_v` output into `out`.
#[allow(clippy::too_many_arguments)]
pub fn run_query_tile<T: AttentionOperand>(
    config: &AttentionConfig,
    logit_scale: f32,
    q: &T,
    k: &T,
    v: &T,
    tile: usize,
    depth: usize,
    out: &mut [f32],
) -> Result<()> {
    let br = config.block_q;
    let bc = config.block_kv;
    let num_blocks = config.num_kv_tiles();
    let q_rows = tile_rows(tile, br);

    let (kv_tx, kv_rx) = bounded::<KvBlock>(depth);
    let (value_tx, value_rx) = bounded::<ValuePacket>(depth);
    let (score_tx, score_rx) = bounded::<ScorePacket>(depth);
    let (probs_tx, probs_rx) = bounded::<SoftmaxPacket>(depth);

    let (stats, output) = thread::scope(|s| {
        let loader = s.spawn(move || load_stage(v, bc, num_blocks, kv_tx, value_tx));
        let scorer = {
            let q_rows = q_rows.clone();
            s.spawn(move || score_stage(q, k, q_rows, bc, logit_scale, num_blocks, kv_rx, score_tx))
        };
        let softmax = s.spawn(move || softmax_stage(br, bc, num_blocks, score_rx, probs_tx));
        let accumulate =
            s.spawn(move || accumulate_stage(br, bc, config.d_v, num_blocks, probs_rx, value_rx));

        match (
            join_stage("load", loader),
            join_stage("scores", scorer),
            join_stage("softmax", softmax),
            join_stage("accumulate", accumulate),
        ) {
            (Ok(()), Ok(()), Ok(stats), Ok(output)) => Ok((stats, output)),
            (loaded, scored, stats, output) => Err(root_cause([
                loaded.err(),
                scored.err(),
                stats.err(),
                output.err(),
            ])),
        }
    })?;

    output.normalize_into(&stats, q_rows.start, out)
}

fn join_stage<R>(name: &str, handle: thread::ScopedJoinHandle<'_, Result<R>>) -> Result<R> {
    handle
        .join()
        .map_err(|_| QFlashError::Pipeline(format!("{name} stage panicked")))?
}

fn hung_up(stage: &'static str) -> QFlashError {
    QFlashError::StageDisconnected { stage }
}

/// The first stage error that is not a hang-up, in stage order.
///
/// A failing stage drops its channels, so its neighbours report
/// `StageDisconnected`; those are only returned if nothing else failed.
fn root_cause(errors: impl IntoIterator<Item = Option<QFlashError>>) -> QFlashError {
    let mut hang_up = None;
    for err in errors.into_iter().flatten() {
        if matches!(err, QFlashError::StageDisconnected { .. }) {
            hang_up.get_or_insert(err);
        } else {
            return err;
        }
    }
    hang_up.unwrap_or_else(|| QFlashError::Pipeline("stage failed without reporting an error".into()))
}

fn check_order(stage: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(QFlashError::Pipeline(format!(
            "{stage} stage received block {got}, expected {expected}"
        )));
    }
    Ok(())
}

/// Emits block descriptors for the score stage and dequantized value blocks
/// for the accumulate stage, in tile order.
fn load_stage<T: AttentionOperand>(
    v: &T,
    bc: usize,
    num_blocks: usize,
    kv_tx: Sender<KvBlock>,
    value_tx: Sender<ValuePacket>,
) -> Result<()> {
    for index in 0..num_blocks {
        let rows = tile_rows(index, bc);
        let values = ValueBlock::load(v, rows.clone());
        kv_tx.send(KvBlock { index, rows }).map_err(|_| hung_up("load"))?;
        value_tx
            .send(ValuePacket { index, values })
            .map_err(|_| hung_up("load"))?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn score_stage<T: AttentionOperand>(
    q: &T,
    k: &T,
    q_rows: Range<usize>,
    bc: usize,
    logit_scale: f32,
    num_blocks: usize,
    kv_rx: Receiver<KvBlock>,
    score_tx: Sender<ScorePacket>,
) -> Result<()> {
    for expected in 0..num_blocks {
        let block = kv_rx.recv().map_err(|_| hung_up("scores"))?;
        check_order("scores", expected, block.index)?;

        let mut scores = ScoreBlock::new(q_rows.len(), bc);
        scores.compute(q, q_rows.clone(), k, block.rows, logit_scale)?;
        score_tx
            .send(ScorePacket { index: block.index, scores })
            .map_err(|_| hung_up("scores"))?;
    }
    Ok(())
}

/// Owns `(m, l)` for the tile; returns them once every block is folded.
fn softmax_stage(
    br: usize,
    bc: usize,
    num_blocks: usize,
    score_rx: Receiver<ScorePacket>,
    probs_tx: Sender<SoftmaxPacket>,
) -> Result<SoftmaxRows> {
    let mut stats = SoftmaxRows::new(br);
    for expected in 0..num_blocks {
        let packet = score_rx.recv().map_err(|_| hung_up("softmax"))?;
        check_order("softmax", expected, packet.index)?;

        let mut probs = vec![0.0f32; br * bc];
        let mut corrections = vec![0.0f32; br];
        for (r, (p, corr)) in probs.chunks_exact_mut(bc).zip(corrections.iter_mut()).enumerate() {
            *corr = stats.update(r, &packet.scores, p).correction;
        }
        trace!(block = packet.index, "softmax stage folded block");

        probs_tx
            .send(SoftmaxPacket { index: packet.index, probs, corrections })
            .map_err(|_| hung_up("softmax"))?;
    }
    Ok(stats)
}

/// Owns `O` for the tile; returns it once every block is folded.
fn accumulate_stage(
    br: usize,
    bc: usize,
    d_v: usize,
    num_blocks: usize,
    probs_rx: Receiver<SoftmaxPacket>,
    value_rx: Receiver<ValuePacket>,
) -> Result<OutputRows> {
    let mut output = OutputRows::new(br, d_v);
    for expected in 0..num_blocks {
        let packet = probs_rx.recv().map_err(|_| hung_up("accumulate"))?;
        check_order("accumulate", expected, packet.index)?;
        let values = value_rx.recv().map_err(|_| hung_up("accumulate"))?;
        check_order("accumulate", expected, values.index)?;

        for (r, p) in packet.probs.chunks_exact(bc).enumerate() {
            output.accumulate(r, p, packet.corrections[r], &values.values);
        }
    }
    Ok(output)
}

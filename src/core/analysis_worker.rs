use crossbeam_channel::{Receiver, Sender};

use crate::core::powermap::PowerMapEngine;

/// One planar host block: `block[ch][sample]`.
pub type Block = Vec<Vec<f32>>;

/// Analysis worker: receives planar host blocks, feeds them to the engine in
/// order and hands the emptied buffers back through `recycle_tx` so the
/// producer can refill them. Returns the engine once the sender hangs up.
pub fn run(
    mut engine: PowerMapEngine,
    block_rx: Receiver<Block>,
    recycle_tx: Sender<Block>,
) -> PowerMapEngine {
    while let Ok(block) = block_rx.recv() {
        // Every block is analysed: the transform keeps overlap state and
        // assumes contiguous input.
        let mut pending = Vec::with_capacity(4);
        pending.push(block);
        pending.extend(block_rx.try_iter());

        for block in pending {
            let n_samples = block.first().map(|ch| ch.len()).unwrap_or(0);
            engine.analyse(&block, n_samples);
            let _ = recycle_tx.try_send(block);
        }
    }
    engine
}

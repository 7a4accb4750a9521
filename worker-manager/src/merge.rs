//! Fan-in of entity streams.
//!
//! One forwarding task per input. The output closes once every forwarder
//! has finished: all inputs closed, or `cancel` fired. Order is preserved
//! per input; there is no ordering across inputs.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::worker::STREAM_CAPACITY;

/// Merges `inputs` into one bounded stream.
///
/// With no inputs the returned stream is already closed.
pub fn merge<T: Send + 'static>(
    inputs: Vec<mpsc::Receiver<T>>,
    cancel: CancellationToken,
) -> mpsc::Receiver<T> {
    let (tx, rx) = mpsc::channel(STREAM_CAPACITY);

    for input in inputs {
        tokio::spawn(forward(input, tx.clone(), cancel.clone()));
    }

    rx
}

/// Copies `input` into `tx` until `input` closes, `tx` closes or `cancel`
/// fires.
pub async fn forward<T>(
    mut input: mpsc::Receiver<T>,
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = input.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(item) => sent,
        };
        if sent.is_err() {
            break;
        }
    }
}

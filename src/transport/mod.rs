// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

pub mod codec;
pub mod frame;
pub mod serial;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{BridgeError, Result};
use frame::OutboundFrame;

pub use codec::XBeeCodec;
pub use frame::{ExplicitRx, RawFrame};

/// Blocking sink for encoded frames (the write half of the serial link).
///
/// A write must be complete, flushed included, when this returns.
pub trait FrameWriter: Send + 'static {
    fn write_frame(&mut self, frame: &OutboundFrame) -> Result<()>;
}

struct WriteRequest {
    frame: OutboundFrame,
    done: oneshot::Sender<Result<u8>>,
}

/// Handle to the writer task. Cloneable; all clones share one write queue.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteRequest>,
}

impl WriterHandle {
    /// Queue a frame and wait until it has been written.
    ///
    /// Returns the frame id it was sent with.
    pub async fn send(&self, frame: OutboundFrame) -> Result<u8> {
        let (done, confirmed) = oneshot::channel();
        self.tx
            .send(WriteRequest { frame, done })
            .await
            .map_err(|_| BridgeError::TransportClosed)?;
        confirmed.await.map_err(|_| BridgeError::TransportClosed)?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Frame ids cycle 1..=255; 0 would suppress the radio's response.
#[derive(Debug, Clone, Copy)]
struct FrameIds(u8);

impl FrameIds {
    fn next(&mut self) -> u8 {
        self.0 = if self.0 == u8::MAX { 1 } else { self.0 + 1 };
        self.0
    }
}

/// Spawn the writer task. Frames are written strictly one at a time, in
/// queue order; each caller is answered after its own write completed.
pub fn spawn_writer<W: FrameWriter>(mut writer: W, capacity: usize) -> (WriterHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<WriteRequest>(capacity);
    let handle = tokio::task::spawn_blocking(move || {
        let mut ids = FrameIds(0);
        while let Some(WriteRequest { mut frame, done }) = rx.blocking_recv() {
            let frame_id = ids.next();
            frame.set_frame_id(frame_id);
            let result = writer.write_frame(&frame).map(|()| frame_id);
            match &result {
                Ok(id) => debug!("Wrote frame id {}", id),
                Err(e) => error!("Write failed: {}", e),
            }
            let _ = done.send(result);
        }
        debug!("Writer task finished");
    });
    (WriterHandle { tx }, handle)
}

// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

//! Serial link to the XBee radio.

use std::io::{self, Read, Write};
use std::time::Duration;

use bytes::BytesMut;
use serialport::SerialPort;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::transport::frame::{OutboundFrame, RawFrame};
use crate::transport::{FrameWriter, XBeeCodec};

const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Open the serial port. Failure here is fatal for the bridge.
pub fn open(config: &BridgeConfig) -> Result<Box<dyn SerialPort>> {
    info!(
        "Opening serial port {} at {} baud",
        config.serial_port, config.baud_rate
    );
    let port = serialport::new(&config.serial_port, config.baud_rate)
        .timeout(READ_TIMEOUT)
        .open()
        .inspect_err(|e| error!("Failed to open {}: {}", config.serial_port, e))?;
    Ok(port)
}

/// Write half of the serial link.
pub struct SerialWriter {
    port: Box<dyn SerialPort>,
    codec: XBeeCodec,
    buf: BytesMut,
}

impl SerialWriter {
    pub fn new(port: Box<dyn SerialPort>, codec: XBeeCodec) -> Self {
        Self {
            port,
            codec,
            buf: BytesMut::with_capacity(256),
        }
    }
}

impl FrameWriter for SerialWriter {
    fn write_frame(&mut self, frame: &OutboundFrame) -> Result<()> {
        self.buf.clear();
        self.codec.encode(frame, &mut self.buf)?;
        self.port.write_all(&self.buf)?;
        self.port.flush()?;
        Ok(())
    }
}

/// Spawn the blocking reader. Frames are forwarded in arrival order until
/// `cancel` fires, the port fails or the receiver is dropped.
pub fn spawn_reader(
    mut port: Box<dyn SerialPort>,
    mut codec: XBeeCodec,
    frames: mpsc::Sender<RawFrame>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut chunk = [0u8; 256];
        let mut buf = BytesMut::with_capacity(1024);
        while !cancel.is_cancelled() {
            match port.read(&mut chunk) {
                Ok(0) => continue,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    error!("Serial read failed: {}", e);
                    break;
                }
            }
            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(frame)) => {
                        if frames.blocking_send(frame).is_err() {
                            debug!("Frame receiver dropped, stopping reader");
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Frame decode failed: {}", e);
                        buf.clear();
                        break;
                    }
                }
            }
        }
        debug!("Serial reader finished");
    })
}

// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

//! Join handshake sequencing.
//!
//! [`JoinTracker`] is the per-device state machine; it only decides what to
//! send and when. [`JoinScheduler`] runs the delayed sends on cancellable
//! timers so that shutdown never writes to a closed transport.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address::{Addr16, Addr64};
use crate::constants::{
    JOIN_ACTIVE_ENDPOINT_REQUEST_DELAY, JOIN_MATCH_DESCRIPTOR_RESPONSE_DELAY,
    JOIN_MODE_CHANGE_DELAY, JOIN_VERSION_INFO_DELAY,
};
use crate::protocol::{DeviceMode, MessageKind, MessageParams};

/// Progress of a device through the join handshake.
///
/// ```text
/// Discovered ──match descriptor request──▶ AwaitingEndpoints
///     ──active endpoint response──▶ AwaitingVersion ──version info──▶ Ready
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinState {
    Discovered,
    AwaitingEndpoints,
    AwaitingVersion,
    Ready,
}

/// A one-shot outbound message to send after `delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSend {
    pub remote64: Addr64,
    pub delay: Duration,
    pub kind: MessageKind,
    pub params: MessageParams,
}

/// Join state of every device seen during this run.
#[derive(Debug, Clone, Default)]
pub struct JoinTracker {
    states: HashMap<Addr64, JoinState>,
}

impl JoinTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, remote64: Addr64) -> Option<JoinState> {
        self.states.get(&remote64).copied()
    }

    /// A device was seen for the first time.
    pub fn discovered(&mut self, remote64: Addr64) {
        self.states.entry(remote64).or_insert(JoinState::Discovered);
    }

    /// Reply to a match descriptor request, then ask for active endpoints.
    /// Both echo the requester's ZDP sequence number.
    pub fn on_match_descriptor_request(
        &mut self,
        remote64: Addr64,
        remote16: Addr16,
        sequence: u8,
    ) -> Vec<ScheduledSend> {
        let previous = self.states.insert(remote64, JoinState::AwaitingEndpoints);
        if matches!(previous, Some(JoinState::AwaitingVersion | JoinState::Ready)) {
            info!("Device {} is rejoining", remote64);
        }
        let params = MessageParams::zdo(remote16, sequence);
        vec![
            ScheduledSend {
                remote64,
                delay: JOIN_MATCH_DESCRIPTOR_RESPONSE_DELAY,
                kind: MessageKind::MatchDescriptorResponse,
                params: params.clone(),
            },
            ScheduledSend {
                remote64,
                delay: JOIN_ACTIVE_ENDPOINT_REQUEST_DELAY,
                kind: MessageKind::ActiveEndpointRequest,
                params,
            },
        ]
    }

    /// Put the device in normal mode, then ask for its version info.
    pub fn on_active_endpoint_response(&mut self, remote64: Addr64) -> Vec<ScheduledSend> {
        let previous = self.states.insert(remote64, JoinState::AwaitingVersion);
        if previous != Some(JoinState::AwaitingEndpoints) {
            debug!("Active endpoint response from {} in state {:?}", remote64, previous);
        }
        vec![
            ScheduledSend {
                remote64,
                delay: JOIN_MODE_CHANGE_DELAY,
                kind: MessageKind::ModeChangeRequest,
                params: MessageParams::mode(DeviceMode::Normal.as_str()),
            },
            ScheduledSend {
                remote64,
                delay: JOIN_VERSION_INFO_DELAY,
                kind: MessageKind::VersionInfoRequest,
                params: MessageParams::default(),
            },
        ]
    }

    /// Version info received: the device is usable.
    pub fn on_version_info(&mut self, remote64: Addr64) {
        if self.states.insert(remote64, JoinState::Ready) != Some(JoinState::Ready) {
            info!("Device {} joined", remote64);
        }
    }
}

/// Runs delayed join sends on timers tied to a per-device cancellation token.
///
/// Every device token is a child of one root token, so [`JoinScheduler::shutdown`]
/// cancels everything still pending.
#[derive(Debug)]
pub struct JoinScheduler {
    root: CancellationToken,
    devices: HashMap<Addr64, CancellationToken>,
}

impl Default for JoinScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinScheduler {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            devices: HashMap::new(),
        }
    }

    fn token(&mut self, remote64: Addr64) -> CancellationToken {
        let root = &self.root;
        let token = self
            .devices
            .entry(remote64)
            .or_insert_with(|| root.child_token());
        if token.is_cancelled() && !root.is_cancelled() {
            *token = root.child_token();
        }
        token.clone()
    }

    /// Run `fire` after `delay` unless the device's timers are cancelled first.
    pub fn schedule<F>(&mut self, remote64: Addr64, delay: Duration, fire: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token(remote64);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Join timer for {} cancelled", remote64);
                }
                _ = tokio::time::sleep(delay) => fire.await,
            }
        })
    }

    /// Drop every pending timer of one device.
    pub fn cancel(&mut self, remote64: Addr64) {
        if let Some(token) = self.devices.remove(&remote64) {
            token.cancel();
        }
    }

    /// Cancel all pending timers. Later calls to `schedule` are cancelled immediately.
    pub fn shutdown(&mut self) {
        if !self.root.is_cancelled() {
            warn!("Cancelling {} device join timer group(s)", self.devices.len());
        }
        self.root.cancel();
        self.devices.clear();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Drop for JoinScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const PIR: Addr64 = Addr64::new(0x000D_6F00_0354_CBAD);

    #[test]
    fn test_handshake_state_machine() {
        let mut tracker = JoinTracker::new();
        tracker.discovered(PIR);
        assert_eq!(tracker.state(PIR), Some(JoinState::Discovered));

        let sends = tracker.on_match_descriptor_request(PIR, Addr16::new(0x478E), 0x42);
        assert_eq!(tracker.state(PIR), Some(JoinState::AwaitingEndpoints));
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0].kind, MessageKind::MatchDescriptorResponse);
        assert_eq!(sends[0].delay, Duration::from_secs(1));
        assert_eq!(sends[1].kind, MessageKind::ActiveEndpointRequest);
        assert_eq!(sends[1].delay, Duration::from_secs(3));
        for send in &sends {
            assert_eq!(send.params.zdo_sequence_number, Some(0x42));
            assert_eq!(send.params.remote16, Some(Addr16::new(0x478E)));
        }

        let sends = tracker.on_active_endpoint_response(PIR);
        assert_eq!(tracker.state(PIR), Some(JoinState::AwaitingVersion));
        assert_eq!(sends[0].kind, MessageKind::ModeChangeRequest);
        assert_eq!(sends[0].params.mode.as_deref(), Some("normal"));
        assert_eq!(sends[0].delay, Duration::from_secs(5));
        assert_eq!(sends[1].kind, MessageKind::VersionInfoRequest);
        assert_eq!(sends[1].delay, Duration::from_secs(7));

        tracker.on_version_info(PIR);
        assert_eq!(tracker.state(PIR), Some(JoinState::Ready));

        // Discovery does not reset a known device
        tracker.discovered(PIR);
        assert_eq!(tracker.state(PIR), Some(JoinState::Ready));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_send_fires_after_delay() {
        let mut scheduler = JoinScheduler::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for (secs, label) in [(3, "second"), (1, "first")] {
            let tx = tx.clone();
            scheduler.schedule(PIR, Duration::from_secs(secs), async move {
                let _ = tx.send(label);
            });
        }

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.try_recv().unwrap(), "first");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().unwrap(), "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_device_timers() {
        let mut scheduler = JoinScheduler::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let tx2 = tx.clone();
        let handle = scheduler.schedule(PIR, Duration::from_secs(1), async move {
            let _ = tx2.send(());
        });
        scheduler.cancel(PIR);
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());

        // A fresh token is issued after cancellation
        let handle = scheduler.schedule(PIR, Duration::from_secs(1), async move {
            let _ = tx.send(());
        });
        handle.await.unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything() {
        let mut scheduler = JoinScheduler::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Addr64>();
        let mut handles = Vec::new();
        for remote64 in [PIR, Addr64::new(2)] {
            let tx = tx.clone();
            handles.push(scheduler.schedule(remote64, Duration::from_secs(7), async move {
                let _ = tx.send(remote64);
            }));
        }
        scheduler.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(rx.try_recv().is_err());
        assert!(scheduler.is_shut_down());

        let late = scheduler.schedule(PIR, Duration::from_secs(1), async move {
            let _ = tx.send(PIR);
        });
        late.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}

//! Encoding plus delivery of one message to a fixed set of endpoints.
//!
//! A courier never fails: refused frames are logged with the message and
//! the endpoint, recorded in the returned [`SendReport`], and the remaining
//! frames and endpoints are still attempted.

use std::sync::Arc;
use std::time::Duration;

use relaychat_transport::{Channel, ChannelTransport, EndpointInfo};

use crate::{Frame, FrameCodec, Message};

/// Why a frame was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// The transport's send returned `false`.
    #[error("transport rejected the frame")]
    TransportRejected,
    /// The send did not complete within the configured timeout.
    #[error("transport send timed out")]
    TimedOut,
}

/// Result of sending one message to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Every frame was accepted by the transport.
    Delivered { endpoint: EndpointInfo, frames: usize },
    /// At least one frame was refused. Later frames were still attempted.
    Rejected {
        endpoint: EndpointInfo,
        reason: RejectReason,
        rejected_frames: usize,
        total_frames: usize,
    },
}

impl SendOutcome {
    pub fn endpoint(&self) -> &EndpointInfo {
        match self {
            SendOutcome::Delivered { endpoint, .. } | SendOutcome::Rejected { endpoint, .. } => {
                endpoint
            }
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }
}

/// Everything that happened while delivering one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub message: Message,
    pub outcomes: Vec<SendOutcome>,
    /// Set when the message could not be encoded; nothing was sent.
    pub encode_error: Option<String>,
}

impl SendReport {
    /// A report for a send that had no endpoints to go to.
    pub fn empty(message: Message) -> Self {
        Self {
            message,
            outcomes: Vec::new(),
            encode_error: None,
        }
    }

    pub fn delivered(&self) -> impl Iterator<Item = &EndpointInfo> {
        self.outcomes
            .iter()
            .filter(|o| o.is_delivered())
            .map(SendOutcome::endpoint)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &EndpointInfo> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_delivered())
            .map(SendOutcome::endpoint)
    }

    /// No encode error and no refused frame.
    pub fn is_clean(&self) -> bool {
        self.encode_error.is_none() && self.outcomes.iter().all(SendOutcome::is_delivered)
    }
}

/// Encodes messages and pushes their frames through a transport.
pub struct Courier<T> {
    transport: Arc<T>,
    codec: FrameCodec,
    channel: Channel,
    send_timeout: Option<Duration>,
}

impl<T> Clone for Courier<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            codec: self.codec,
            channel: self.channel,
            send_timeout: self.send_timeout,
        }
    }
}

impl<T: ChannelTransport> Courier<T> {
    /// Creates a courier writing to `channel`, with no send timeout.
    pub fn new(transport: Arc<T>, codec: FrameCodec, channel: Channel) -> Self {
        Self {
            transport,
            codec,
            channel,
            send_timeout: None,
        }
    }

    /// Bounds every transport send. `None` waits as long as the transport
    /// takes.
    pub fn with_timeout(mut self, send_timeout: Option<Duration>) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Encodes `message` once and sends all of its frames to each target
    /// in turn.
    pub async fn deliver(&self, targets: &[EndpointInfo], message: Message) -> SendReport {
        let frames = match self.codec.encode_message(&message) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::error!(
                    command = %message.command,
                    args = ?message.args,
                    error = %e,
                    "failed to encode relay message"
                );
                return SendReport {
                    message,
                    outcomes: Vec::new(),
                    encode_error: Some(e.to_string()),
                };
            }
        };

        let mut outcomes = Vec::with_capacity(targets.len());
        for endpoint in targets {
            outcomes.push(self.deliver_frames(endpoint, &frames, &message).await);
        }
        SendReport {
            message,
            outcomes,
            encode_error: None,
        }
    }

    /// Sends already encoded frames to one endpoint, in order.
    pub async fn deliver_frames(
        &self,
        endpoint: &EndpointInfo,
        frames: &[Frame],
        message: &Message,
    ) -> SendOutcome {
        let mut first_reason = None;
        let mut rejected_frames = 0;

        for (index, frame) in frames.iter().enumerate() {
            let send = self
                .transport
                .send(endpoint.id(), self.channel, frame.to_bytes());
            let accepted = match self.send_timeout {
                Some(limit) => tokio::time::timeout(limit, send)
                    .await
                    .map_err(|_| RejectReason::TimedOut),
                None => Ok(send.await),
            };
            let result = match accepted {
                Ok(true) => Ok(()),
                Ok(false) => Err(RejectReason::TransportRejected),
                Err(reason) => Err(reason),
            };

            if let Err(reason) = result {
                tracing::warn!(
                    endpoint = %endpoint,
                    command = %message.command,
                    args = ?message.args,
                    frame = index,
                    frames = frames.len(),
                    %reason,
                    "failed to send relay message"
                );
                rejected_frames += 1;
                first_reason.get_or_insert(reason);
            }
        }

        match first_reason {
            None => SendOutcome::Delivered {
                endpoint: endpoint.clone(),
                frames: frames.len(),
            },
            Some(reason) => SendOutcome::Rejected {
                endpoint: endpoint.clone(),
                reason,
                rejected_frames,
                total_frames: frames.len(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use relaychat_transport::{EndpointId, FrameHandler, LinkHandler};

    use super::*;
    use crate::{FrameLimit, decode};

    /// Records every frame; refuses endpoints listed in `refuse`; never
    /// answers for endpoints listed in `hang`.
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(EndpointId, Bytes)>>,
        refuse: Vec<EndpointId>,
        hang: Vec<EndpointId>,
    }

    impl ChannelTransport for Recorder {
        async fn send(&self, endpoint: EndpointId, _channel: Channel, frame: Bytes) -> bool {
            if self.hang.contains(&endpoint) {
                std::future::pending::<()>().await;
            }
            if self.refuse.contains(&endpoint) {
                return false;
            }
            self.sent.lock().unwrap().push((endpoint, frame));
            true
        }

        fn on_receive(&self, _channel: Channel, _handler: FrameHandler) {}

        fn on_link(&self, _handler: LinkHandler) {}
    }

    fn ep(id: u64) -> EndpointInfo {
        EndpointInfo::new(EndpointId::new(id), format!("server-{id}"))
    }

    #[tokio::test]
    async fn test_deliver_sends_every_frame_to_every_target_in_order() {
        let transport = Arc::new(Recorder::default());
        let courier = Courier::new(
            Arc::clone(&transport),
            FrameCodec::new(FrameLimit::new(64)),
            Channel::ProxyToServer,
        );
        let args: Vec<String> = (0..8).map(|i| format!("value-{i:02}-xxxx")).collect();

        let report = courier
            .deliver(&[ep(1), ep(2)], Message::new("Bulk", args.clone()))
            .await;

        assert!(report.is_clean());
        let sent = transport.sent.lock().unwrap();
        for id in [1, 2] {
            let rebuilt: Vec<String> = sent
                .iter()
                .filter(|(e, _)| *e == EndpointId::new(id))
                .flat_map(|(_, f)| decode(f).unwrap().args)
                .collect();
            assert_eq!(rebuilt, args);
        }
    }

    #[tokio::test]
    async fn test_rejection_is_reported_and_does_not_stop_others() {
        let transport = Arc::new(Recorder {
            refuse: vec![EndpointId::new(2)],
            ..Recorder::default()
        });
        let courier = Courier::new(Arc::clone(&transport), FrameCodec::default(), Channel::ProxyToServer);

        let report = courier
            .deliver(&[ep(1), ep(2), ep(3)], Message::new("Cmd", ["a"]))
            .await;

        assert!(!report.is_clean());
        let delivered: Vec<_> = report.delivered().map(EndpointInfo::id).collect();
        assert_eq!(delivered, vec![EndpointId::new(1), EndpointId::new(3)]);
        assert!(matches!(
            &report.outcomes[1],
            SendOutcome::Rejected { reason: RejectReason::TransportRejected, rejected_frames: 1, total_frames: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_encode_failure_sends_nothing() {
        let transport = Arc::new(Recorder::default());
        let courier = Courier::new(
            Arc::clone(&transport),
            FrameCodec::new(FrameLimit::new(64)),
            Channel::ProxyToServer,
        );

        let report = courier
            .deliver(&[ep(1)], Message::new("Cmd", ["x".repeat(200)]))
            .await;

        assert!(report.encode_error.is_some());
        assert!(report.outcomes.is_empty());
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_turns_hung_send_into_rejection() {
        let transport = Arc::new(Recorder {
            hang: vec![EndpointId::new(1)],
            ..Recorder::default()
        });
        let courier = Courier::new(Arc::clone(&transport), FrameCodec::default(), Channel::ProxyToServer)
            .with_timeout(Some(Duration::from_secs(1)));

        let report = courier
            .deliver(&[ep(1), ep(2)], Message::new("Cmd", ["a"]))
            .await;

        assert!(matches!(
            &report.outcomes[0],
            SendOutcome::Rejected { reason: RejectReason::TimedOut, .. }
        ));
        assert!(report.outcomes[1].is_delivered());
    }
}

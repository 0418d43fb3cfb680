//! Transport seam between a session and the telephone network.
//!
//! The wire carries 8-bit mu-law; the pipeline speaks linear PCM. Both
//! conversions happen here so everything past the transport deals in
//! [`AudioFrame`]s only.

use async_trait::async_trait;
use tokio::sync::mpsc;

use voxline_foundation::SessionError;

use crate::codec;
use crate::frame::{AudioFrame, Direction};

/// What the transport reports to the session.
#[derive(Debug)]
pub enum TransportEvent {
    /// The provider opened the media stream; `stream_sid` identifies the
    /// call leg for logging and call control.
    Connected { stream_sid: String },
    Media(AudioFrame),
    Disconnected,
}

#[async_trait]
pub trait Transport: Send {
    /// Next event from the wire, or `None` when the peer is gone for good.
    async fn recv(&mut self) -> Option<TransportEvent>;

    /// Ship one frame of agent audio to the caller.
    async fn send(&mut self, frame: &AudioFrame) -> Result<(), SessionError>;
}

#[derive(Debug)]
enum WireMsg {
    Connected { stream_sid: String },
    Media(Vec<u8>),
    Disconnected,
}

/// In-process duplex transport: one end behaves like the telephone network
/// (mu-law bytes both ways), the other satisfies [`Transport`]. Used by the
/// demo binary and the integration tests.
pub struct DuplexTransport {
    inbound: mpsc::Receiver<WireMsg>,
    outbound: mpsc::Sender<Vec<u8>>,
    sample_rate: u32,
}

/// The "network" side of a [`DuplexTransport`].
pub struct RemoteHandle {
    inbound: mpsc::Sender<WireMsg>,
    outbound: mpsc::Receiver<Vec<u8>>,
}

pub fn duplex_pair(sample_rate: u32, capacity: usize) -> (DuplexTransport, RemoteHandle) {
    let (in_tx, in_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    (
        DuplexTransport {
            inbound: in_rx,
            outbound: out_tx,
            sample_rate,
        },
        RemoteHandle {
            inbound: in_tx,
            outbound: out_rx,
        },
    )
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn recv(&mut self) -> Option<TransportEvent> {
        match self.inbound.recv().await? {
            WireMsg::Connected { stream_sid } => Some(TransportEvent::Connected { stream_sid }),
            WireMsg::Media(bytes) => Some(TransportEvent::Media(AudioFrame {
                samples: codec::decode(&bytes),
                sample_rate: self.sample_rate,
                channels: 1,
                direction: Direction::Inbound,
            })),
            WireMsg::Disconnected => Some(TransportEvent::Disconnected),
        }
    }

    async fn send(&mut self, frame: &AudioFrame) -> Result<(), SessionError> {
        self.outbound
            .send(codec::encode(&frame.samples))
            .await
            .map_err(|_| SessionError::Transport("peer hung up".into()))
    }
}

impl RemoteHandle {
    pub async fn connect(&self, stream_sid: &str) -> Result<(), SessionError> {
        self.inbound
            .send(WireMsg::Connected {
                stream_sid: stream_sid.to_string(),
            })
            .await
            .map_err(|_| SessionError::Transport("session gone".into()))
    }

    /// Push one packet of mu-law caller audio.
    pub async fn send_media(&self, bytes: Vec<u8>) -> Result<(), SessionError> {
        self.inbound
            .send(WireMsg::Media(bytes))
            .await
            .map_err(|_| SessionError::Transport("session gone".into()))
    }

    pub async fn disconnect(&self) {
        let _ = self.inbound.send(WireMsg::Disconnected).await;
    }

    /// Next packet of mu-law agent audio, or `None` when the session closed.
    pub async fn recv_media(&mut self) -> Option<Vec<u8>> {
        self.outbound.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caller_media_arrives_as_decoded_pcm() {
        let (mut transport, remote) = duplex_pair(8_000, 16);

        remote.connect("MZ123").await.unwrap();
        let pcm: Vec<i16> = vec![0, 1_000, -1_000, 8_000];
        remote.send_media(codec::encode(&pcm)).await.unwrap();

        match transport.recv().await.unwrap() {
            TransportEvent::Connected { stream_sid } => assert_eq!(stream_sid, "MZ123"),
            other => panic!("expected connect, got {other:?}"),
        }
        match transport.recv().await.unwrap() {
            TransportEvent::Media(frame) => {
                assert_eq!(frame.direction, Direction::Inbound);
                assert_eq!(frame.samples.len(), pcm.len());
                // Mu-law is lossy; the round trip stays in the neighborhood.
                for (orig, got) in pcm.iter().zip(frame.samples.iter()) {
                    assert!((orig - got).abs() < 260, "{orig} vs {got}");
                }
            }
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn agent_audio_leaves_as_mulaw() {
        let (mut transport, mut remote) = duplex_pair(8_000, 16);

        let frame = AudioFrame {
            samples: vec![500; 160],
            sample_rate: 8_000,
            channels: 1,
            direction: Direction::Outbound,
        };
        transport.send(&frame).await.unwrap();

        let bytes = remote.recv_media().await.unwrap();
        assert_eq!(bytes.len(), 160);
    }

    #[tokio::test]
    async fn hangup_surfaces_as_disconnect_then_none() {
        let (mut transport, remote) = duplex_pair(8_000, 16);
        remote.disconnect().await;
        assert!(matches!(
            transport.recv().await,
            Some(TransportEvent::Disconnected)
        ));
        drop(remote);
        assert!(transport.recv().await.is_none());
    }
}

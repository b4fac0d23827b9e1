//! WebRTC receive-side peer

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

use super::input::InputSink;
use super::metrics::{PeerStats, StatsSource};
use super::signaling::LocalPeer;
use super::{ClientError, ClientResult};

/// Label of the channel the stream host reads input from
pub const INPUT_CHANNEL: &str = "input";

/// How long `send_input` waits for the input channel to open
const INPUT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Receive-only peer: one video and one audio track plus an input channel
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    input: Arc<RTCDataChannel>,
    input_open: watch::Receiver<bool>,
    state_rx: watch::Receiver<RTCPeerConnectionState>,
}

fn peer_err(context: &str, e: impl std::fmt::Display) -> ClientError {
    ClientError::Peer(format!("{}: {}", context, e))
}

impl WebRtcPeer {
    pub async fn new(stun_servers: &[String]) -> ClientResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| peer_err("Failed to register codecs", e))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| peer_err("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let pc = api
            .new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| peer_err("Failed to create peer connection", e))?;
        let pc = Arc::new(pc);

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| peer_err("Failed to add transceiver", e))?;
        }

        let input = pc
            .create_data_channel(INPUT_CHANNEL, None)
            .await
            .map_err(|e| peer_err("Failed to create data channel", e))?;
        let (open_tx, input_open) = watch::channel(false);
        input.on_open(Box::new(move || {
            debug!("Input channel open");
            let _ = open_tx.send(true);
            Box::pin(async {})
        }));
        input.on_message(Box::new(move |msg: DataChannelMessage| {
            debug!("Input channel message: {} bytes", msg.data.len());
            Box::pin(async {})
        }));

        let (state_tx, state_rx) = watch::channel(RTCPeerConnectionState::New);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            info!("Peer connection state: {}", s);
            let _ = state_tx.send(s);
            Box::pin(async {})
        }));

        // Drain incoming RTP so receiver stats advance
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _| {
                info!("Remote {} track started", track.kind());
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    debug!("Remote {} track ended", track.kind());
                });
                Box::pin(async {})
            },
        ));

        Ok(Self {
            pc,
            input,
            input_open,
            state_rx,
        })
    }

    /// Subscribe to connection state changes
    pub fn state_watch(&self) -> watch::Receiver<RTCPeerConnectionState> {
        self.state_rx.clone()
    }

    /// Send one encoded input message, waiting for the channel to open
    pub async fn send_input(&self, data: &[u8]) -> ClientResult<()> {
        let mut open = self.input_open.clone();
        tokio::time::timeout(INPUT_OPEN_TIMEOUT, open.wait_for(|open| *open))
            .await
            .map_err(|_| ClientError::Peer("Input channel did not open".to_string()))?
            .map_err(|_| ClientError::Peer("Input channel dropped".to_string()))?;

        self.input
            .send(&bytes::Bytes::copy_from_slice(data))
            .await
            .map_err(|e| peer_err("Failed to send input", e))?;
        Ok(())
    }
}

#[async_trait]
impl InputSink for WebRtcPeer {
    async fn send_input(&self, data: &[u8]) -> ClientResult<()> {
        WebRtcPeer::send_input(self, data).await
    }
}

#[async_trait]
impl LocalPeer for WebRtcPeer {
    async fn create_offer(&self) -> ClientResult<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| peer_err("Failed to create offer", e))?;

        // Candidates are not trickled, so the offer must carry all of them
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| peer_err("Failed to set local description", e))?;
        let _ = gathered.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| ClientError::Peer("Local description missing".to_string()))?;
        debug!("Offer ready ({} bytes)", local.sdp.len());
        Ok(local.sdp)
    }

    async fn apply_answer(&self, answer: &str) -> ClientResult<()> {
        let answer = RTCSessionDescription::answer(answer.to_string())
            .map_err(|e| peer_err("Invalid SDP answer", e))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| peer_err("Failed to set remote description", e))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }
}

#[async_trait]
impl StatsSource for WebRtcPeer {
    async fn sample(&self) -> PeerStats {
        let report = self.pc.get_stats().await;
        let mut stats = PeerStats::default();

        for entry in report.reports.values() {
            match entry {
                StatsReportType::InboundRTP(inbound) => {
                    stats.bytes_received += inbound.bytes_received;
                    stats.packets_received += inbound.packets_received;
                }
                StatsReportType::CandidatePair(pair) if pair.nominated => {
                    stats.rtt_ms = Some(pair.current_round_trip_time * 1000.0);
                }
                _ => {}
            }
        }

        stats
    }
}

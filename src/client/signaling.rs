use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ClientError, ClientResult};

/// What the client asks the gateway to launch
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    pub stream_group: Option<String>,
    pub app_identifier: String,
    pub user_id: Option<String>,
    pub regions: Vec<String>,
    pub launch_args: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

/// Gateway endpoints used by the client
#[async_trait]
pub trait SignalingApi: Send + Sync {
    /// Start a session with `signal_request` as the offer, returning its token
    async fn create_stream_session(
        &self,
        request: &StreamRequest,
        signal_request: &str,
    ) -> ClientResult<String>;

    /// Current answer; empty while the session activates
    async fn get_signal_response(&self, token: &str) -> ClientResult<String>;

    async fn reconnect_stream_session(
        &self,
        token: &str,
        signal_request: &str,
    ) -> ClientResult<String>;

    async fn destroy_stream_session(&self, token: &str) -> ClientResult<()>;
}

/// Local side of the peer connection
#[async_trait]
pub trait LocalPeer: Send + Sync {
    /// Produce a complete offer (ICE gathering finished)
    async fn create_offer(&self) -> ClientResult<String>;

    async fn apply_answer(&self, answer: &str) -> ClientResult<()>;

    async fn close(&self);
}

/// Sequences offer, session creation, answer polling and answer application
///
/// Each `connect` or `reconnect` starts a new attempt. Starting another
/// attempt, or calling [`SignalingLoop::cancel`], makes the older one stale;
/// a stale attempt never applies its answer.
pub struct SignalingLoop<A> {
    api: A,
    poll_interval: Duration,
    generation: AtomicU64,
}

impl<A: SignalingApi> SignalingLoop<A> {
    pub fn new(api: A, poll_interval: Duration) -> Self {
        Self {
            api,
            poll_interval,
            generation: AtomicU64::new(0),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Start a stream and connect `peer` to it, returning the session token
    pub async fn connect<P: LocalPeer + ?Sized>(
        &self,
        peer: &P,
        request: &StreamRequest,
    ) -> ClientResult<String> {
        let attempt = self.begin_attempt();
        match self.run_connect(attempt, peer, request).await {
            Ok(token) => Ok(token),
            Err(e) => {
                peer.close().await;
                Err(e)
            }
        }
    }

    /// Attach a fresh peer to the session behind `token`
    pub async fn reconnect<P: LocalPeer + ?Sized>(&self, peer: &P, token: &str) -> ClientResult<()> {
        let attempt = self.begin_attempt();
        match self.run_reconnect(attempt, peer, token).await {
            Ok(()) => Ok(()),
            Err(e) => {
                peer.close().await;
                Err(e)
            }
        }
    }

    pub async fn destroy(&self, token: &str) -> ClientResult<()> {
        self.api.destroy_stream_session(token).await
    }

    /// Close `peer` and, unless `keep` is set, destroy the session
    ///
    /// `outcome` is how streaming ended. It is returned after teardown, so an
    /// error such as a failed reconnect still releases the provider session.
    /// A destroy failure is only reported when streaming itself succeeded.
    pub async fn finish<P: LocalPeer + ?Sized>(
        &self,
        peer: &P,
        token: &str,
        keep: bool,
        outcome: ClientResult<()>,
    ) -> ClientResult<()> {
        peer.close().await;

        if keep {
            info!("Leaving stream session running");
            return outcome;
        }

        match self.destroy(token).await {
            Ok(()) => info!("Stream session destroyed"),
            Err(e) if outcome.is_ok() => return Err(e),
            Err(e) => warn!("Failed to destroy stream session: {}", e),
        }
        outcome
    }

    /// Invalidate any attempt in progress
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn begin_attempt(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ensure_current(&self, attempt: u64) -> ClientResult<()> {
        if self.generation.load(Ordering::SeqCst) == attempt {
            Ok(())
        } else {
            Err(ClientError::Superseded)
        }
    }

    async fn run_connect<P: LocalPeer + ?Sized>(
        &self,
        attempt: u64,
        peer: &P,
        request: &StreamRequest,
    ) -> ClientResult<String> {
        let offer = peer.create_offer().await?;
        self.ensure_current(attempt)?;

        let token = self.api.create_stream_session(request, &offer).await?;
        info!(app = %request.app_identifier, "Stream session requested");

        let mut polls = 0u32;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            self.ensure_current(attempt)?;

            let answer = match self.api.get_signal_response(&token).await {
                Ok(answer) => answer,
                Err(ClientError::NotFound) => {
                    warn!(polls, "Stream session disappeared while activating");
                    return Err(ClientError::NotFound);
                }
                Err(e) => return Err(e),
            };
            polls += 1;

            if answer.is_empty() {
                debug!(polls, "Stream session still activating");
                continue;
            }

            self.ensure_current(attempt)?;
            peer.apply_answer(&answer).await?;
            info!(polls, "Signal answer applied");
            return Ok(token);
        }
    }

    async fn run_reconnect<P: LocalPeer + ?Sized>(
        &self,
        attempt: u64,
        peer: &P,
        token: &str,
    ) -> ClientResult<()> {
        let offer = peer.create_offer().await?;
        self.ensure_current(attempt)?;

        let answer = self.api.reconnect_stream_session(token, &offer).await?;
        self.ensure_current(attempt)?;

        peer.apply_answer(&answer).await?;
        info!("Stream session reconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;

    const POLL: Duration = Duration::from_millis(500);

    #[derive(Default)]
    struct StubApi {
        create_error: Mutex<Option<ClientError>>,
        polls: Mutex<VecDeque<ClientResult<String>>>,
        reconnect: Mutex<Option<ClientResult<String>>>,
        offers: Mutex<Vec<String>>,
        poll_calls: AtomicUsize,
        destroyed: Mutex<Vec<String>>,
        destroy_error: Mutex<Option<ClientError>>,
    }

    impl StubApi {
        fn with_polls(polls: Vec<ClientResult<String>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl SignalingApi for StubApi {
        async fn create_stream_session(
            &self,
            _request: &StreamRequest,
            signal_request: &str,
        ) -> ClientResult<String> {
            if let Some(err) = self.create_error.lock().clone() {
                return Err(err);
            }
            self.offers.lock().push(signal_request.to_string());
            Ok("tok-1".to_string())
        }

        async fn get_signal_response(&self, _token: &str) -> ClientResult<String> {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            // An empty queue means still activating
            self.polls.lock().pop_front().unwrap_or(Ok(String::new()))
        }

        async fn reconnect_stream_session(
            &self,
            _token: &str,
            signal_request: &str,
        ) -> ClientResult<String> {
            self.offers.lock().push(signal_request.to_string());
            self.reconnect
                .lock()
                .clone()
                .unwrap_or_else(|| Ok("ANSWER2".to_string()))
        }

        async fn destroy_stream_session(&self, token: &str) -> ClientResult<()> {
            if let Some(err) = self.destroy_error.lock().clone() {
                return Err(err);
            }
            self.destroyed.lock().push(token.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubPeer {
        fail_offer: bool,
        answers: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl LocalPeer for StubPeer {
        async fn create_offer(&self) -> ClientResult<String> {
            if self.fail_offer {
                return Err(ClientError::Peer("no codecs".to_string()));
            }
            Ok("OFFER".to_string())
        }

        async fn apply_answer(&self, answer: &str) -> ClientResult<()> {
            self.answers.lock().push(answer.to_string());
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn request() -> StreamRequest {
        StreamRequest {
            stream_group: Some("sg-1".to_string()),
            app_identifier: "a-1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_polls_until_answer() {
        let api = StubApi::with_polls(vec![
            Ok(String::new()),
            Ok(String::new()),
            Ok("ANSWER".to_string()),
        ]);
        let signaling = SignalingLoop::new(api, POLL);
        let peer = StubPeer::default();

        let token = signaling.connect(&peer, &request()).await.unwrap();
        assert_eq!(token, "tok-1");
        assert_eq!(signaling.api().offers.lock().as_slice(), ["OFFER".to_string()]);
        assert_eq!(signaling.api().poll_calls.load(Ordering::SeqCst), 3);
        assert_eq!(peer.answers.lock().as_slice(), ["ANSWER".to_string()]);
        assert!(!peer.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_ends_polling() {
        let api = StubApi::with_polls(vec![Ok(String::new()), Err(ClientError::NotFound)]);
        let signaling = SignalingLoop::new(api, POLL);
        let peer = StubPeer::default();

        let err = signaling.connect(&peer, &request()).await.unwrap_err();
        assert_eq!(err, ClientError::NotFound);
        assert_eq!(signaling.api().poll_calls.load(Ordering::SeqCst), 2);
        assert!(peer.closed.load(Ordering::SeqCst));
        assert!(peer.answers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_errors_close_peer() {
        let api = StubApi::default();
        *api.create_error.lock() = Some(ClientError::Server {
            status: 502,
            message: "capacity".to_string(),
        });
        let signaling = SignalingLoop::new(api, POLL);
        let peer = StubPeer::default();

        let err = signaling.connect(&peer, &request()).await.unwrap_err();
        assert!(matches!(err, ClientError::Server { status: 502, .. }));
        assert!(peer.closed.load(Ordering::SeqCst));

        let bad_peer = StubPeer {
            fail_offer: true,
            ..Default::default()
        };
        let err = signaling.connect(&bad_peer, &request()).await.unwrap_err();
        assert!(matches!(err, ClientError::Peer(_)));
        assert!(bad_peer.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_supersedes_attempt() {
        let signaling = Arc::new(SignalingLoop::new(StubApi::default(), POLL));
        let peer = Arc::new(StubPeer::default());

        let task = {
            let signaling = signaling.clone();
            let peer = peer.clone();
            tokio::spawn(async move { signaling.connect(peer.as_ref(), &request()).await })
        };

        tokio::time::sleep(POLL * 3 + POLL / 2).await;
        signaling.api().polls.lock().push_back(Ok("LATE".to_string()));
        signaling.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err, ClientError::Superseded);
        assert!(peer.closed.load(Ordering::SeqCst));
        assert!(peer.answers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect() {
        let signaling = SignalingLoop::new(StubApi::default(), POLL);
        let peer = StubPeer::default();

        signaling.reconnect(&peer, "tok-1").await.unwrap();
        assert_eq!(peer.answers.lock().as_slice(), ["ANSWER2".to_string()]);

        *signaling.api().reconnect.lock() = Some(Err(ClientError::NotFound));
        let fresh = StubPeer::default();
        let err = signaling.reconnect(&fresh, "tok-1").await.unwrap_err();
        assert_eq!(err, ClientError::NotFound);
        assert!(fresh.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_destroy() {
        let signaling = SignalingLoop::new(StubApi::default(), POLL);
        signaling.destroy("tok-1").await.unwrap();
        assert_eq!(
            signaling.api().destroyed.lock().as_slice(),
            ["tok-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_finish_destroys_after_failed_reconnect() {
        let signaling = SignalingLoop::new(StubApi::default(), POLL);
        *signaling.api().reconnect.lock() = Some(Err(ClientError::Server {
            status: 502,
            message: "no capacity".to_string(),
        }));
        let peer = StubPeer::default();

        let outcome = signaling.reconnect(&peer, "tok-1").await;
        let err = signaling
            .finish(&peer, "tok-1", false, outcome)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Server { status: 502, .. }));
        assert!(peer.closed.load(Ordering::SeqCst));
        assert_eq!(
            signaling.api().destroyed.lock().as_slice(),
            ["tok-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_finish_keep_and_destroy_errors() {
        let signaling = SignalingLoop::new(StubApi::default(), POLL);
        let peer = StubPeer::default();

        signaling.finish(&peer, "tok-1", true, Ok(())).await.unwrap();
        assert!(peer.closed.load(Ordering::SeqCst));
        assert!(signaling.api().destroyed.lock().is_empty());

        *signaling.api().destroy_error.lock() = Some(ClientError::NotFound);
        let err = signaling.finish(&peer, "tok-1", false, Ok(())).await.unwrap_err();
        assert_eq!(err, ClientError::NotFound);

        // The streaming error wins over the destroy error
        let err = signaling
            .finish(&peer, "tok-1", false, Err(ClientError::Superseded))
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Superseded);
    }
}

//! Scripted provider for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    ProviderError, StartSessionRequest, StartedSession, StreamProvider, StreamSessionState,
    StreamSessionStatus,
};

/// In-memory provider whose responses are queued by the test
#[derive(Default)]
pub struct MockProvider {
    fail_start: Mutex<Option<String>>,
    fail_terminate: Mutex<Option<String>>,
    /// Queued (status, signal response) pairs for `get_stream_session`
    statuses: Mutex<VecDeque<(StreamSessionStatus, String)>>,
    reconnect_answer: Mutex<String>,
    pub started: Mutex<Vec<StartSessionRequest>>,
    pub terminated: Mutex<Vec<String>>,
    next_arn: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub connection_calls: AtomicUsize,
    pub terminate_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            reconnect_answer: Mutex::new("RECONNECT-ANSWER".to_string()),
            ..Default::default()
        }
    }

    /// Make every start call fail with `message`
    pub fn fail_start(&self, message: &str) {
        *self.fail_start.lock() = Some(message.to_string());
    }

    /// Make terminate calls fail until cleared
    pub fn fail_terminate(&self, message: Option<&str>) {
        *self.fail_terminate.lock() = message.map(str::to_string);
    }

    /// Queue the next status returned by `get_stream_session`
    pub fn push_status(&self, status: StreamSessionStatus, signal_response: &str) {
        self.statuses
            .lock()
            .push_back((status, signal_response.to_string()));
    }

    pub fn set_reconnect_answer(&self, answer: &str) {
        *self.reconnect_answer.lock() = answer.to_string();
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamProvider for MockProvider {
    async fn start_stream_session(
        &self,
        request: StartSessionRequest,
    ) -> Result<StartedSession, ProviderError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_start.lock().clone() {
            return Err(ProviderError::Api {
                status: 400,
                code: "ValidationException".to_string(),
                message,
            });
        }

        let n = self.next_arn.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.lock().push(request);
        Ok(StartedSession {
            arn: format!("arn:{}", n),
            status: StreamSessionStatus::Activating,
        })
    }

    async fn get_stream_session(
        &self,
        _stream_group: &str,
        session_arn: &str,
    ) -> Result<StreamSessionState, ProviderError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let (status, signal_response) = self
            .statuses
            .lock()
            .pop_front()
            .unwrap_or((StreamSessionStatus::Activating, String::new()));

        Ok(StreamSessionState {
            arn: session_arn.to_string(),
            status,
            signal_response,
            status_reason: None,
        })
    }

    async fn create_stream_session_connection(
        &self,
        _stream_group: &str,
        _session_arn: &str,
        _signal_request: &str,
    ) -> Result<String, ProviderError> {
        self.connection_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reconnect_answer.lock().clone())
    }

    async fn terminate_stream_session(
        &self,
        _stream_group: &str,
        session_arn: &str,
    ) -> Result<(), ProviderError> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_terminate.lock().clone() {
            return Err(ProviderError::Transport(message));
        }
        self.terminated.lock().push(session_arn.to_string());
        Ok(())
    }
}

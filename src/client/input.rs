//! Input forwarding over the `input` data channel
//!
//! Binary message format:
//! - Byte 0: Message type
//!   - 0x01: Keyboard event
//!   - 0x03: Gamepad state
//! - Remaining bytes: Event data
//!
//! Keyboard event (type 0x01):
//! - Byte 1: Event type (0x00 = down, 0x01 = up)
//! - Byte 2: Key code (USB HID usage code)
//! - Byte 3: Modifiers bitmask (bit 0 left ctrl ... bit 7 right meta)
//!
//! Gamepad state (type 0x03):
//! - Bytes 1-2: Button bitmask (u16 LE, W3C standard gamepad order)
//! - Bytes 3-10: Axes as i16 LE: left x, left y, right x, right y
//! - Bytes 11-12: Left and right trigger (u8)
//!
//! Replay scripts are JSON lines. Blank lines and lines starting with `#`
//! are skipped:
//!
//! ```text
//! {"at_ms": 0, "type": "gamepad", "buttons": 1, "axes": [0, -32768, 0, 0]}
//! {"at_ms": 120, "type": "key", "action": "down", "key": 44}
//! {"at_ms": 200, "type": "key", "action": "up", "key": 44}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use super::{ClientError, ClientResult};

/// Message types
pub const MSG_KEYBOARD: u8 = 0x01;
pub const MSG_GAMEPAD: u8 = 0x03;

/// Keyboard event types
pub const KB_EVENT_DOWN: u8 = 0x00;
pub const KB_EVENT_UP: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Down,
    Up,
}

/// One input event as sent to the stream host
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputEvent {
    Key {
        action: KeyAction,
        key: u8,
        #[serde(default)]
        modifiers: u8,
    },
    Gamepad {
        #[serde(default)]
        buttons: u16,
        #[serde(default)]
        axes: [i16; 4],
        #[serde(default)]
        triggers: [u8; 2],
    },
}

impl InputEvent {
    /// Encode to the channel's binary format
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Key {
                action,
                key,
                modifiers,
            } => {
                let event_type = match action {
                    KeyAction::Down => KB_EVENT_DOWN,
                    KeyAction::Up => KB_EVENT_UP,
                };
                vec![MSG_KEYBOARD, event_type, *key, *modifiers]
            }
            Self::Gamepad {
                buttons,
                axes,
                triggers,
            } => {
                let mut data = Vec::with_capacity(13);
                data.push(MSG_GAMEPAD);
                data.extend_from_slice(&buttons.to_le_bytes());
                for axis in axes {
                    data.extend_from_slice(&axis.to_le_bytes());
                }
                data.extend_from_slice(triggers);
                data
            }
        }
    }
}

/// An event and its offset from the start of the replay
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimedInput {
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: InputEvent,
}

/// Parse a JSON lines replay script
///
/// Offsets must not decrease.
pub fn parse_script(text: &str) -> ClientResult<Vec<TimedInput>> {
    let mut events: Vec<TimedInput> = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event: TimedInput = serde_json::from_str(line).map_err(|e| {
            ClientError::Input(format!("line {}: {}", index + 1, e))
        })?;
        if let Some(last) = events.last() {
            if event.at_ms < last.at_ms {
                return Err(ClientError::Input(format!(
                    "line {}: at_ms {} is earlier than {}",
                    index + 1,
                    event.at_ms,
                    last.at_ms
                )));
            }
        }
        events.push(event);
    }

    Ok(events)
}

/// Destination for encoded input messages
#[async_trait]
pub trait InputSink: Send + Sync {
    async fn send_input(&self, data: &[u8]) -> ClientResult<()>;
}

/// Plays a script against a sink on its own timeline
///
/// Progress survives a dropped [`InputReplay::run`] future, so the replay can
/// continue on a replacement peer. Events whose time has passed are sent
/// immediately.
#[derive(Debug)]
pub struct InputReplay {
    events: Vec<TimedInput>,
    next: usize,
    origin: Instant,
}

impl InputReplay {
    pub fn new(events: Vec<TimedInput>, origin: Instant) -> Self {
        Self {
            events,
            next: 0,
            origin,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.next >= self.events.len()
    }

    /// Events already delivered
    pub fn sent(&self) -> usize {
        self.next
    }

    /// Send the remaining events, each at its offset
    pub async fn run<S: InputSink + ?Sized>(&mut self, sink: &S) -> ClientResult<()> {
        while let Some(timed) = self.events.get(self.next) {
            sleep_until(self.origin + Duration::from_millis(timed.at_ms)).await;
            sink.send_input(&timed.event.encode()).await?;
            debug!(at_ms = timed.at_ms, "Input event sent");
            self.next += 1;
        }

        info!(events = self.events.len(), "Input replay finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        start: Option<Instant>,
        sent: Mutex<Vec<(Duration, Vec<u8>)>>,
    }

    #[async_trait]
    impl InputSink for Recorder {
        async fn send_input(&self, data: &[u8]) -> ClientResult<()> {
            let start = self.start.unwrap_or_else(Instant::now);
            self.sent.lock().push((start.elapsed(), data.to_vec()));
            Ok(())
        }
    }

    const SCRIPT: &str = r#"
# press A, tap the space bar, release A
{"at_ms": 0, "type": "gamepad", "buttons": 1, "axes": [0, -32768, 256, 0], "triggers": [0, 255]}
{"at_ms": 100, "type": "key", "action": "down", "key": 44, "modifiers": 2}

{"at_ms": 250, "type": "key", "action": "up", "key": 44}
{"at_ms": 250, "type": "gamepad"}
"#;

    #[test]
    fn test_encoding() {
        let key = InputEvent::Key {
            action: KeyAction::Up,
            key: 0x04,
            modifiers: 0x81,
        };
        assert_eq!(key.encode(), vec![MSG_KEYBOARD, KB_EVENT_UP, 0x04, 0x81]);

        let pad = InputEvent::Gamepad {
            buttons: 0x0102,
            axes: [1, -1, i16::MAX, i16::MIN],
            triggers: [7, 255],
        };
        assert_eq!(
            pad.encode(),
            vec![
                MSG_GAMEPAD, 0x02, 0x01, 0x01, 0x00, 0xFF, 0xFF, 0xFF, 0x7F, 0x00, 0x80, 7, 255
            ]
        );
    }

    #[test]
    fn test_parse_script() {
        let events = parse_script(SCRIPT).unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[1],
            TimedInput {
                at_ms: 100,
                event: InputEvent::Key {
                    action: KeyAction::Down,
                    key: 44,
                    modifiers: 2,
                },
            }
        );
        assert_eq!(
            events[3].event,
            InputEvent::Gamepad {
                buttons: 0,
                axes: [0; 4],
                triggers: [0; 2],
            }
        );
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        let err = parse_script("{\"at_ms\": 0, \"type\": \"mouse\"}").unwrap_err();
        assert!(matches!(err, ClientError::Input(ref m) if m.starts_with("line 1:")));

        let err = parse_script(
            "{\"at_ms\": 50, \"type\": \"gamepad\"}\n{\"at_ms\": 10, \"type\": \"gamepad\"}",
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::Input(ref m) if m.starts_with("line 2:")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_timing() {
        let sink = Recorder {
            start: Some(Instant::now()),
            ..Default::default()
        };
        let mut replay = InputReplay::new(parse_script(SCRIPT).unwrap(), Instant::now());

        replay.run(&sink).await.unwrap();
        assert!(replay.is_finished());

        let sent = sink.sent.lock();
        let offsets: Vec<u128> = sent.iter().map(|(at, _)| at.as_millis()).collect();
        assert_eq!(offsets, vec![0, 100, 250, 250]);
        assert_eq!(sent[1].1, vec![MSG_KEYBOARD, KB_EVENT_DOWN, 44, 2]);
        assert_eq!(sent[3].1[0], MSG_GAMEPAD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_resumes_after_interruption() {
        let origin = Instant::now();
        let first = Recorder::default();
        let mut replay = InputReplay::new(parse_script(SCRIPT).unwrap(), origin);

        let interrupted =
            tokio::time::timeout(Duration::from_millis(150), replay.run(&first)).await;
        assert!(interrupted.is_err());
        assert_eq!(replay.sent(), 2);

        // Late events go out as soon as the replay resumes
        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = Recorder {
            start: Some(Instant::now()),
            ..Default::default()
        };
        replay.run(&second).await.unwrap();

        assert_eq!(first.sent.lock().len(), 2);
        let resumed = second.sent.lock();
        assert_eq!(resumed.len(), 2);
        assert!(resumed.iter().all(|(at, _)| at.is_zero()));
    }

    struct Closed;

    #[async_trait]
    impl InputSink for Closed {
        async fn send_input(&self, _data: &[u8]) -> ClientResult<()> {
            Err(ClientError::Peer("input channel closed".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_stops_replay() {
        let mut replay = InputReplay::new(parse_script(SCRIPT).unwrap(), Instant::now());
        let err = replay.run(&Closed).await.unwrap_err();
        assert!(matches!(err, ClientError::Peer(_)));
        assert_eq!(replay.sent(), 0);
        assert!(!replay.is_finished());
    }
}

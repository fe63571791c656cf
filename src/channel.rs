//! Streaming response channel
//!
//! Single producer, any number of consumers. The channel always holds one
//! current frame; consumers see the latest one and may skip interim frames.
//! After a final frame is pushed every further push fails.

use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Response channel already received its final frame")]
pub struct ChannelClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Interim,
    Final,
}

/// Placeholder visual shown while a capability is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placeholder {
    WeatherCard,
    SearchResults,
    NewsList,
    LocationList,
    MovieCards,
    GifGrid,
    Generic,
}

/// Value a presentation layer knows how to render
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Renderable {
    /// Nothing yet
    Blank,
    Text {
        text: String,
    },
    /// A capability is running
    Working {
        status: String,
        placeholder: Placeholder,
    },
    /// A capability settled successfully
    ToolView {
        tool: String,
        placeholder: Placeholder,
        data: Value,
    },
    Apology {
        message: String,
    },
}

impl Renderable {
    pub fn text(text: impl Into<String>) -> Self {
        Renderable::Text { text: text.into() }
    }

    pub fn apology(message: impl Into<String>) -> Self {
        Renderable::Apology {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamFrame {
    pub kind: FrameKind,
    pub payload: Renderable,
}

impl StreamFrame {
    pub fn is_final(&self) -> bool {
        self.kind == FrameKind::Final
    }
}

/// Create a connected sender/receiver pair holding a blank interim frame
pub fn response_channel() -> (FrameSender, FrameReceiver) {
    let (tx, rx) = watch::channel(StreamFrame {
        kind: FrameKind::Interim,
        payload: Renderable::Blank,
    });
    (FrameSender { tx }, FrameReceiver { rx })
}

/// Producer side
#[derive(Debug)]
pub struct FrameSender {
    tx: watch::Sender<StreamFrame>,
}

impl FrameSender {
    pub fn push_interim(&self, payload: Renderable) -> Result<(), ChannelClosed> {
        self.push(FrameKind::Interim, payload)
    }

    /// Replace the current frame and close the channel
    pub fn push_final(&self, payload: Renderable) -> Result<(), ChannelClosed> {
        self.push(FrameKind::Final, payload)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.borrow().is_final()
    }

    pub fn subscribe(&self) -> FrameReceiver {
        FrameReceiver {
            rx: self.tx.subscribe(),
        }
    }

    fn push(&self, kind: FrameKind, payload: Renderable) -> Result<(), ChannelClosed> {
        // Check and replace under the channel lock so two pushes racing a
        // final frame cannot both succeed.
        let mut payload = Some(payload);
        let mut closed = false;
        self.tx.send_if_modified(|current| {
            if current.is_final() {
                closed = true;
                return false;
            }
            if let Some(payload) = payload.take() {
                *current = StreamFrame { kind, payload };
            }
            true
        });
        if closed {
            Err(ChannelClosed)
        } else {
            Ok(())
        }
    }
}

/// Consumer side. Cheap to clone; every clone observes the same frames.
#[derive(Debug, Clone)]
pub struct FrameReceiver {
    rx: watch::Receiver<StreamFrame>,
}

impl FrameReceiver {
    /// Latest frame. Keeps returning the final frame once one was pushed.
    pub fn current_frame(&self) -> StreamFrame {
        self.rx.borrow().clone()
    }

    /// Wait for a frame newer than the last one seen by this receiver.
    ///
    /// Returns `None` once the sender is gone and nothing new arrived.
    pub async fn changed(&mut self) -> Option<StreamFrame> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the final frame is available.
    ///
    /// Returns `None` if the sender was dropped without closing the channel.
    pub async fn wait_final(&mut self) -> Option<StreamFrame> {
        loop {
            {
                let frame = self.rx.borrow_and_update();
                if frame.is_final() {
                    return Some(frame.clone());
                }
            }
            if self.rx.changed().await.is_err() {
                let frame = self.rx.borrow();
                return frame.is_final().then(|| frame.clone());
            }
        }
    }

    /// Stream of frames starting with the current one
    pub fn into_stream(self) -> impl Stream<Item = StreamFrame> {
        WatchStream::new(self.rx)
    }
}

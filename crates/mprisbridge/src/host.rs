//! # Host Loop
//!
//! Drives the bridge on a single thread. Two event sources:
//!
//! - **Peer frames**: read by a dedicated task (frame reads are not
//!   cancel-safe, so they never sit in a `select!` branch) and forwarded
//!   over a channel.
//! - **Bus calls**: queued by each session's bus callback.
//!
//! Outbound frames are encoded by the sessions and queued to a writer task,
//! so a slow peer never stalls the loop.
//!
//! A framing failure is fatal: every session is torn down and the error
//! returned. Peer EOF or the caller's stop future ends the loop cleanly. Frames
//! queued before the end are flushed before `run` returns.

use std::future::Future;
use std::rc::Rc;

use serde_json::Value as Json;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use busobj::BusConnector;
use jsonframe::AsyncFrameReader;
use jsonframe::AsyncFrameWriter;

use crate::config::BridgeConfig;
use crate::message::PeerMessage;
use crate::proxy::ChannelOutbox;
use crate::proxy::ProxySettings;
use crate::session::CallReceiver;
use crate::session::SessionRegistry;

/// Frames buffered between the reader task and the loop.
const FRAME_QUEUE_LEN: usize = 64;

#[derive(Debug)]
pub enum Error {
    /// The peer stream could not be decoded. The stream is unusable.
    Frame(jsonframe::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frame(e) => write!(f, "peer stream failed: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Frame(e) => Some(e),
        }
    }
}

impl From<jsonframe::Error> for Error {
    fn from(e: jsonframe::Error) -> Self {
        Self::Frame(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The output half, parked until `run` hands it to the writer task.
struct Outbound {
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
    writer: AsyncFrameWriter<Box<dyn AsyncWrite + Unpin + Send>>,
}

impl Outbound {
    async fn drain(mut self) {
        while let Some(frame) = self.frames.recv().await {
            if let Err(e) = self.writer.write_frame(&frame).await {
                error!(error = %e, "peer output failed");
                return;
            }
        }
        debug!("peer output drained");
    }
}

pub struct Host {
    registry: SessionRegistry,
    calls: CallReceiver,
    max_frame_len: usize,
    outbox: Rc<ChannelOutbox>,
    outbound: Option<Outbound>,
}

impl Host {
    /// Wires a host from configuration, writing outbound frames to `output`.
    pub fn from_config<W>(config: &BridgeConfig, connector: Rc<dyn BusConnector>, output: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let settings = ProxySettings {
            object_path: config.object_path.clone(),
            track_path_prefix: config.track_path_prefix.clone(),
            identity: config.identity.clone(),
            desktop_entry: config.desktop_entry.clone(),
        };
        let (outbox, frames) = ChannelOutbox::new();
        let outbox = Rc::new(outbox);
        let (registry, calls) = SessionRegistry::new(connector, outbox.clone(), settings, &config.bus_name);
        let writer: Box<dyn AsyncWrite + Unpin + Send> = Box::new(output);
        Self {
            registry,
            calls,
            max_frame_len: config.max_frame_len,
            outbox,
            outbound: Some(Outbound { frames, writer: AsyncFrameWriter::new(writer) }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    /// Runs until the peer closes its stream or a frame cannot be decoded.
    ///
    /// Must be polled on the runtime thread that owns the bus connections
    /// (for example with `block_on` or a current-thread runtime).
    pub async fn run<R>(&mut self, input: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.run_until(input, std::future::pending()).await
    }

    /// Like `run`, but also stops cleanly once `stop` completes.
    ///
    /// The output is flushed and closed on the way out, so a host runs once.
    pub async fn run_until<R, S>(&mut self, input: R, stop: S) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        S: Future<Output = ()>,
    {
        let writer_task = match self.outbound.take() {
            Some(outbound) => Some(tokio::spawn(outbound.drain())),
            None => {
                warn!("host already ran; outbound frames will fail");
                None
            }
        };

        let (frames_tx, mut frames) = mpsc::channel(FRAME_QUEUE_LEN);
        let mut reader = AsyncFrameReader::with_max_frame_len(input, self.max_frame_len);
        let reader_task = tokio::spawn(async move {
            loop {
                let frame = reader.read::<Json>().await;
                let fatal = frame.is_err();
                if frames_tx.send(frame).await.is_err() || fatal {
                    break;
                }
            }
        });

        tokio::pin!(stop);
        let outcome = loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(Ok(json)) => self.dispatch(json),
                    Some(Err(e)) if e.is_eof() => {
                        info!("peer closed its stream");
                        break Ok(());
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "peer stream failed");
                        break Err(Error::Frame(e));
                    }
                    None => {
                        warn!("peer reader ended without a reason");
                        break Ok(());
                    }
                },
                Some(inbound) = self.calls.recv() => self.registry.handle_call(inbound),
                () = &mut stop => {
                    info!("stop requested");
                    break Ok(());
                }
            }
        };

        reader_task.abort();
        self.shutdown();
        self.outbox.close();
        if let Some(task) = writer_task {
            if let Err(e) = task.await {
                error!(error = %e, "peer output task failed");
            }
        }
        outcome
    }

    /// Tears down every session.
    pub fn shutdown(&mut self) -> usize {
        self.registry.shutdown()
    }

    fn dispatch(&mut self, json: Json) {
        let message = match PeerMessage::from_json(json) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "malformed peer message dropped");
                return;
            }
        };
        let session = message.session.clone();
        if let Err(e) = self.registry.handle_message(message) {
            warn!(session = %session, error = %e, "peer message not applied");
        }
    }
}

//! Serial writer context
//!
//! One dedicated OS thread owns the engine. Every mutation of buffered or
//! persisted state arrives as a [`Command`] on a bounded queue and is applied
//! in queue order, so writes from any number of callers never interleave.

use std::sync::Arc;
use std::thread::JoinHandle;

use stowlog_core::{Record, StatusCode};
use stowlog_storage::LogEngine;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::listener::ListenerSlot;

/// Name of the writer thread
pub const WRITER_THREAD_NAME: &str = "stowlog-writer";

/// Work item for the writer context
pub(crate) enum Command {
    Write(Record),
    Flush(Option<oneshot::Sender<StatusCode>>),
    Open(String, oneshot::Sender<StatusCode>),
    Sweep(oneshot::Sender<usize>),
    SetDebug(bool),
    Tick,
    Quit {
        flush: bool,
        ack: oneshot::Sender<StatusCode>,
    },
}

pub(crate) struct WriterContext {
    engine: Box<dyn LogEngine>,
    rx: mpsc::Receiver<Command>,
    listener: Arc<ListenerSlot>,
}

impl WriterContext {
    pub(crate) fn new(
        engine: Box<dyn LogEngine>,
        rx: mpsc::Receiver<Command>,
        listener: Arc<ListenerSlot>,
    ) -> Self {
        Self {
            engine,
            rx,
            listener,
        }
    }

    /// Start the context on its own thread
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        info!("Writer context started");
        let mut applied: u64 = 0;

        while let Some(command) = self.rx.blocking_recv() {
            match command {
                Command::Write(record) => {
                    let code = self.engine.write(&record);
                    self.listener.notify(code);
                    applied += 1;
                }
                Command::Flush(ack) => {
                    let code = self.engine.flush();
                    self.listener.notify(code);
                    if let Some(ack) = ack {
                        let _ = ack.send(code);
                    }
                }
                Command::Open(name, ack) => {
                    let code = self.engine.open(&name);
                    self.listener.notify(code);
                    let _ = ack.send(code);
                }
                Command::Sweep(ack) => {
                    let removed = self.engine.sweep_expired();
                    let _ = ack.send(removed);
                }
                Command::SetDebug(enabled) => self.engine.set_debug(enabled),
                Command::Tick => {
                    trace!("Maintenance tick");
                    self.engine.tick();
                }
                Command::Quit { flush, ack } => {
                    let code = if flush {
                        let code = self.engine.flush();
                        self.listener.notify(code);
                        code
                    } else {
                        StatusCode::FlushSuccess
                    };
                    let closed = self.engine.close();
                    info!(applied, %code, %closed, "Writer context quit");
                    let _ = ack.send(if code.is_success() { closed } else { code });
                    return;
                }
            }
        }

        // Every sender dropped without a quit
        let closed = self.engine.close();
        debug!(applied, %closed, "Writer queue closed");
    }
}

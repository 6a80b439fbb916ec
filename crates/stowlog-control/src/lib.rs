//! # Stowlog Control
//!
//! Single coordination point for a stowlog store.
//!
//! [`ControlCenter`] owns the engine through a dedicated writer thread:
//! - writes, flushes, opens and sweeps are queued and applied in order
//! - uploads run on the blocking pool and never stall the writer
//! - a periodic tick drives time-based flushes and retention
//! - `quit` drains the queue and refuses everything written afterwards
//!
//! ## Example
//!
//! ```rust,ignore
//! use stowlog_control::{ControlCenter, ControlConfig};
//! use stowlog_core::{Record, TypeFilter};
//!
//! let center = ControlCenter::builder(ControlConfig::with_base_dir("./stowlog"))
//!     .with_params(params)
//!     .with_listener(|event: StatusEvent| println!("{} -> {}", event.command, event.code))
//!     .build()?;
//!
//! center.write(Record::new(1, "started")).await?;
//!
//! let text = center.fast_upload(TypeFilter::all(), 3).wait().await?;
//! center.quit(true).await?;
//! ```

mod config;
mod error;
mod listener;
mod upload;
mod writer;

pub use config::ControlConfig;
pub use error::{ControlError, ControlResult};
pub use listener::StatusListener;
pub use upload::{UploadHandle, UploadId};
pub use writer::WRITER_THREAD_NAME;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stowlog_codec::{SecureParamProvider, SecureParams, StaticParams};
use stowlog_core::{Clock, Record, StatusCode, SystemClock, TypeFilter};
use stowlog_logging::DebugSwitch;
use stowlog_storage::{FileEngine, LogEngine, UploadSelection, UploadSelector};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use listener::ListenerSlot;
use upload::{RegistryGuard, UploadRegistry};
use writer::{Command, WriterContext};

/// Builder for a [`ControlCenter`]
pub struct ControlCenterBuilder {
    config: ControlConfig,
    engine: Option<Box<dyn LogEngine>>,
    params: Option<Arc<dyn SecureParamProvider>>,
    clock: Arc<dyn Clock>,
    listener: Option<Arc<dyn StatusListener>>,
    debug_switch: Option<DebugSwitch>,
}

impl ControlCenterBuilder {
    fn new(config: ControlConfig) -> Self {
        Self {
            config,
            engine: None,
            params: None,
            clock: Arc::new(SystemClock),
            listener: None,
            debug_switch: None,
        }
    }

    /// Use parameters already in memory for both writing and uploads
    pub fn with_params(self, params: SecureParams) -> Self {
        self.with_param_provider(Arc::new(StaticParams::new(params)))
    }

    /// Resolve parameters through a provider
    ///
    /// The engine resolves them once at build time; uploads resolve them
    /// again on every scan.
    pub fn with_param_provider(mut self, provider: Arc<dyn SecureParamProvider>) -> Self {
        self.params = Some(provider);
        self
    }

    /// Replace the default [`FileEngine`]
    pub fn with_engine(mut self, engine: impl LogEngine + 'static) -> Self {
        self.engine = Some(Box::new(engine));
        self
    }

    /// Clock for the default engine and for `fast_upload`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_listener(mut self, listener: impl StatusListener + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Let `set_debug` also reload the diagnostics filter
    pub fn with_debug_switch(mut self, switch: DebugSwitch) -> Self {
        self.debug_switch = Some(switch);
        self
    }

    /// Initialize the engine and start the writer context
    ///
    /// Must be called from within a tokio runtime. The listener, if any,
    /// hears the init status before this returns.
    #[instrument(skip_all, fields(log_dir = %self.config.engine.log_dir.display()))]
    pub fn build(self) -> ControlResult<ControlCenter> {
        let runtime = Handle::try_current().map_err(|e| ControlError::NoRuntime(e.to_string()))?;

        let listener = Arc::new(ListenerSlot::default());
        listener.set(self.listener);

        let Some(provider) = self.params else {
            listener.notify(StatusCode::InitFailInvalidKey);
            return Err(ControlError::Init(StatusCode::InitFailInvalidKey));
        };
        let params = match provider.secure_params() {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, "Secure parameters unavailable");
                listener.notify(StatusCode::InitFailInvalidKey);
                return Err(ControlError::Init(StatusCode::InitFailInvalidKey));
            }
        };

        let clock = self.clock;
        let mut engine: Box<dyn LogEngine> = match self.engine {
            Some(engine) => engine,
            None => Box::new(FileEngine::with_clock(clock.clone())),
        };
        let init_code = engine.init(&self.config.engine, params);
        listener.notify(init_code);
        if !init_code.is_success() {
            return Err(ControlError::Init(init_code));
        }

        let selector = Arc::new(UploadSelector::with_clock(
            engine.catalog_view(),
            provider,
            clock.clone(),
        ));
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let writer = WriterContext::new(engine, rx, listener.clone()).spawn()?;

        let ticker = CancellationToken::new();
        spawn_ticker(&runtime, tx.clone(), ticker.clone(), self.config.tick_interval);

        info!(
            %init_code,
            queue_capacity = self.config.queue_capacity,
            "Control center started"
        );

        Ok(ControlCenter {
            inner: Arc::new(Inner {
                tx,
                gate: RwLock::new(false),
                listener,
                uploads: Arc::new(UploadRegistry::default()),
                selector,
                clock,
                runtime,
                ticker,
                writer: Mutex::new(Some(writer)),
                debug_switch: self.debug_switch,
                init_code,
            }),
        })
    }
}

struct Inner {
    tx: mpsc::Sender<Command>,
    /// `true` once quit has started
    gate: RwLock<bool>,
    listener: Arc<ListenerSlot>,
    uploads: Arc<UploadRegistry>,
    selector: Arc<UploadSelector>,
    clock: Arc<dyn Clock>,
    runtime: Handle,
    ticker: CancellationToken,
    writer: Mutex<Option<std::thread::JoinHandle<()>>>,
    debug_switch: Option<DebugSwitch>,
    init_code: StatusCode,
}

impl Inner {
    async fn submit(&self, command: Command) -> ControlResult<()> {
        let closed = self.gate.read().await;
        if *closed {
            return Err(ControlError::Quit);
        }
        self.tx.send(command).await?;
        Ok(())
    }

    /// Push pending records into the files before they are read
    async fn flush_before_read(&self) {
        let (ack, done) = oneshot::channel();
        match self.submit(Command::Flush(Some(ack))).await {
            Ok(()) => {
                let _ = done.await;
            }
            Err(_) => debug!("Writer closed, reading committed data only"),
        }
    }
}

/// Coordinates writes, flushes, uploads and shutdown of one store
///
/// Write methods return once the record is queued; the engine status of
/// each write reaches the listener instead. The queue is bounded: `write`
/// and `blocking_write` wait for room, `try_write` fails with
/// [`ControlError::QueueFull`].
pub struct ControlCenter {
    inner: Arc<Inner>,
}

impl ControlCenter {
    pub fn builder(config: ControlConfig) -> ControlCenterBuilder {
        ControlCenterBuilder::new(config)
    }

    /// Status the engine reported at init
    pub fn init_status(&self) -> StatusCode {
        self.inner.init_code
    }

    /// Queue a record, waiting for queue capacity
    pub async fn write(&self, record: Record) -> ControlResult<()> {
        self.inner.submit(Command::Write(record)).await
    }

    /// Queue a record or fail immediately
    pub fn try_write(&self, record: Record) -> ControlResult<()> {
        // A contended gate means quit holds it
        let closed = self.inner.gate.try_read().map_err(|_| ControlError::Quit)?;
        if *closed {
            return Err(ControlError::Quit);
        }
        self.inner
            .tx
            .try_send(Command::Write(record))
            .map_err(|e| match e {
                TrySendError::Full(_) => ControlError::QueueFull,
                TrySendError::Closed(_) => ControlError::WriterGone,
            })
    }

    /// Queue a record from synchronous code, blocking for capacity
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_write(&self, record: Record) -> ControlResult<()> {
        let closed = self.inner.gate.blocking_read();
        if *closed {
            return Err(ControlError::Quit);
        }
        self.inner.tx.blocking_send(Command::Write(record))?;
        Ok(())
    }

    /// Queue a flush without waiting for it
    pub async fn flush(&self) -> ControlResult<()> {
        self.inner.submit(Command::Flush(None)).await
    }

    /// Flush everything queued so far and return the engine status
    pub async fn flush_and_wait(&self) -> ControlResult<StatusCode> {
        let (ack, done) = oneshot::channel();
        self.inner.submit(Command::Flush(Some(ack))).await?;
        Ok(done.await?)
    }

    /// Make the named file the append target
    pub async fn open(&self, name: impl Into<String>) -> ControlResult<StatusCode> {
        let (ack, done) = oneshot::channel();
        self.inner.submit(Command::Open(name.into(), ack)).await?;
        Ok(done.await?)
    }

    /// Run the retention sweep now; returns the number of files removed
    pub async fn sweep(&self) -> ControlResult<usize> {
        let (ack, done) = oneshot::channel();
        self.inner.submit(Command::Sweep(ack)).await?;
        Ok(done.await?)
    }

    /// Toggle verbose diagnostics; persisted data is unaffected
    pub async fn set_debug(&self, enabled: bool) -> ControlResult<()> {
        self.inner.submit(Command::SetDebug(enabled)).await?;
        if let Some(switch) = &self.inner.debug_switch {
            if let Err(e) = switch.set_debug(enabled) {
                warn!(error = %e, "Failed to reload diagnostics filter");
            }
        }
        Ok(())
    }

    /// Register the listener, replacing any previous one
    pub fn set_listener(&self, listener: impl StatusListener + 'static) {
        self.inner.listener.set(Some(Arc::new(listener)));
    }

    pub fn clear_listener(&self) {
        self.inner.listener.set(None);
    }

    pub fn has_listener(&self) -> bool {
        self.inner.listener.is_set()
    }

    /// Start an upload of `[begin, end]` for the given types
    pub fn upload(&self, filter: TypeFilter, begin_millis: i64, end_millis: i64) -> UploadHandle {
        self.upload_selection(UploadSelection::new(filter, begin_millis, end_millis))
    }

    /// Start an upload of the last `days` days
    pub fn fast_upload(&self, filter: TypeFilter, days: u32) -> UploadHandle {
        let now = self.inner.clock.now_millis();
        self.upload_selection(UploadSelection::recent_days(filter, days, now))
    }

    /// Start an upload
    ///
    /// Queued records are flushed first, then the scan runs on the blocking
    /// pool. Works after quit too, over what was committed.
    pub fn upload_selection(&self, selection: UploadSelection) -> UploadHandle {
        let (id, token) = self.inner.uploads.register();
        let inner = self.inner.clone();
        let scan_token = token.clone();

        let join = self.inner.runtime.spawn(async move {
            let _registered = RegistryGuard::new(inner.uploads.clone(), id);
            inner.flush_before_read().await;

            let selector = inner.selector.clone();
            let text = tokio::task::spawn_blocking(move || selector.select(&selection, &scan_token))
                .await
                .map_err(|e| ControlError::UploadTask(e.to_string()))??;
            debug!(upload = id, bytes = text.len(), "Upload finished");
            Ok(text)
        });

        debug!(upload = id, "Upload started");
        UploadHandle::new(id, token, join)
    }

    /// Cancel one upload; `false` when it is no longer running
    pub fn cancel_upload(&self, id: UploadId) -> bool {
        self.inner.uploads.cancel(id)
    }

    /// Cancel every running upload; returns how many were signalled
    pub fn cancel_all_uploads(&self) -> usize {
        self.inner.uploads.cancel_all()
    }

    pub fn running_uploads(&self) -> usize {
        self.inner.uploads.len()
    }

    /// Drain the queue, optionally flush, close the engine and refuse
    /// every later write
    ///
    /// Returns the flush status (or the close status when the flush
    /// succeeded or was skipped). A second call fails with
    /// [`ControlError::Quit`].
    #[instrument(skip(self))]
    pub async fn quit(&self, flush: bool) -> ControlResult<StatusCode> {
        let mut closed = self.inner.gate.write().await;
        if *closed {
            return Err(ControlError::Quit);
        }
        *closed = true;
        self.inner.ticker.cancel();

        let (ack, done) = oneshot::channel();
        self.inner.tx.send(Command::Quit { flush, ack }).await?;
        let code = done.await?;
        drop(closed);

        let writer = self.inner.writer.lock().take();
        if let Some(writer) = writer {
            let joined = tokio::task::spawn_blocking(move || writer.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Writer thread did not exit cleanly");
            }
        }
        info!(%code, "Control center quit");
        Ok(code)
    }
}

impl Drop for ControlCenter {
    fn drop(&mut self) {
        self.inner.ticker.cancel();
    }
}

fn spawn_ticker(
    runtime: &Handle,
    tx: mpsc::Sender<Command>,
    token: CancellationToken,
    period: Duration,
) {
    let period = period.max(Duration::from_millis(1));
    runtime.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => match tx.try_send(Command::Tick) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => break,
                },
            }
        }
        debug!("Ticker stopped");
    });
}

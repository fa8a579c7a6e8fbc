use crate::entry::{Context, process};
use crate::error::{ErrorKind, Result};
use crate::models::EntryReport;
use crate::options::Options;
use crate::summary::Summary;
use async_stream::stream;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, Stream, StreamExt};
use newmonkey_diskcache::error::Result as CacheResult;
use newmonkey_diskcache::{CacheHandle, EntryRef};
use newmonkey_storage::OutputRoot;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Progress events emitted by [`Exporter::run`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started), exactly once.
/// 2. [`Entry`](Self::Entry), once per entry the index yielded and that was
///    dispatched before cancellation, in completion order.
/// 3. [`Complete`](Self::Complete), exactly once, ending the stream.
#[derive(Debug, Clone)]
pub enum ExportEvent {
    /// The run has begun. `estimated` is the index's own entry count and is
    /// only good for progress bars.
    Started { estimated: u64 },
    Entry(EntryReport),
    Complete(Summary),
}

/// A cache opened for export into an output directory.
///
/// # Examples
///
/// ```no_run
/// use futures::StreamExt;
/// use newmonkey_export::{ExportEvent, Exporter, Options};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() -> newmonkey_export::error::Result<()> {
/// let exporter = Exporter::open("Cache_Data", "newmonkey_output", Options::default())?;
/// let mut events = std::pin::pin!(exporter.run(CancellationToken::new()));
/// while let Some(event) = events.next().await {
///     if let ExportEvent::Complete(summary) = event {
///         println!("{} extracted, {} failed", summary.extracted, summary.failed);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Exporter {
    context: Arc<Context>,
}

impl Exporter {
    /// Open the cache at `cache_root` and create `output_root` if needed.
    ///
    /// These are the only failures that end a run: everything that goes wrong
    /// afterwards is reported per entry.
    pub fn open(cache_root: impl AsRef<Path>, output_root: impl AsRef<Path>, options: Options) -> Result<Self> {
        let cache_root = cache_root.as_ref();
        let cache = newmonkey_diskcache::open(cache_root)
            .map_err(|err| err.raise(ErrorKind::CacheRoot(cache_root.to_path_buf())))?;
        Self::with_cache(cache, output_root, options)
    }

    /// Export from an already opened cache.
    pub fn with_cache(cache: CacheHandle, output_root: impl AsRef<Path>, options: Options) -> Result<Self> {
        let output_root = output_root.as_ref();
        let output = OutputRoot::open(output_root, options.overwrite)
            .map_err(|err| err.raise(ErrorKind::OutputRoot(output_root.to_path_buf())))?;
        tracing::info!(
            cache = %cache.root().display(),
            format = %cache.format(),
            output = %output.root().display(),
            workers = options.workers.get(),
            "opened cache for export",
        );
        Ok(Self { context: Arc::new(Context { cache, output, options }) })
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.context.cache
    }

    /// The canonical output directory.
    pub fn output_root(&self) -> &Path {
        self.context.output.root()
    }

    /// Stream [`ExportEvent`]s while exporting every entry of the cache.
    ///
    /// The index is walked on the blocking pool and fed through a bounded
    /// channel; up to `workers` entries are exported at once, each on its
    /// own blocking task. Once `cancel` fires no further entry is started,
    /// in-flight entries are allowed to finish, and the stream completes with
    /// [`Summary::cancelled`] set.
    pub fn run(&self, cancel: CancellationToken) -> impl Stream<Item = ExportEvent> + Send + 'static {
        let ctx = Arc::clone(&self.context);
        let workers = ctx.options.workers.get();
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            yield ExportEvent::Started { estimated: ctx.cache.estimated_entries() };

            let (tx, mut rx) = mpsc::channel(workers * 2);
            let dispatcher = tokio::task::spawn_blocking({
                let cache = Arc::clone(&ctx.cache);
                let cancel = cancel.clone();
                move || dispatch(&cache, &tx, &cancel)
            });

            let mut summary = Summary::default();
            let mut processing: FuturesUnordered<EntryTask> = FuturesUnordered::new();
            let mut exhausted = false;
            loop {
                let accepting = !exhausted && processing.len() < workers && !cancel.is_cancelled();
                let step = tokio::select! {
                    biased;
                    Some(report) = processing.next(), if !processing.is_empty() => Step::Report(report),
                    item = rx.recv(), if accepting => match item {
                        Some(Ok(entry)) => Step::Dispatch(entry),
                        Some(Err(err)) => {
                            tracing::warn!(error = %*err, "cannot enumerate entry");
                            Step::Report(EntryReport::failed(None, None, (*ErrorKind::cache(err)).to_string()))
                        },
                        None => Step::Exhausted,
                    },
                    _ = cancel.cancelled(), if accepting => Step::Cancelled,
                    else => Step::Done,
                };
                match step {
                    Step::Report(report) => {
                        summary.record(&report);
                        yield ExportEvent::Entry(report);
                    },
                    Step::Dispatch(entry) => processing.push(spawn_entry(Arc::clone(&ctx), entry)),
                    Step::Exhausted => exhausted = true,
                    Step::Cancelled => {
                        tracing::info!(in_flight = processing.len(), "cancelled, finishing in-flight entries")
                    },
                    Step::Done => break,
                }
            }

            summary.cancelled = cancel.is_cancelled() && !exhausted;
            // Unblocks the dispatcher if it is waiting on a full channel.
            drop(rx);
            if let Err(err) = dispatcher.await {
                tracing::error!(error = %err, "index walker panicked");
            }
            tracing::info!(
                extracted = summary.extracted,
                skipped = summary.skipped,
                failed = summary.failed,
                cancelled = summary.cancelled,
                "export finished",
            );
            yield ExportEvent::Complete(summary);
        })
    }
}

enum Step {
    Report(EntryReport),
    Dispatch(EntryRef),
    Exhausted,
    Cancelled,
    Done,
}

/// Walk the index, handing entries to the orchestrator until the index is
/// exhausted, the run is cancelled or nobody is listening any more.
fn dispatch(cache: &CacheHandle, tx: &mpsc::Sender<CacheResult<EntryRef>>, cancel: &CancellationToken) {
    let mut sent = 0u64;
    for item in cache.entries() {
        if cancel.is_cancelled() || tx.blocking_send(item).is_err() {
            tracing::debug!(sent, "stopped walking the index early");
            return;
        }
        sent += 1;
    }
    tracing::debug!(sent, "walked the whole index");
}

/// One entry being exported on the blocking pool.
type EntryTask = BoxFuture<'static, EntryReport>;

fn spawn_entry(ctx: Arc<Context>, entry: EntryRef) -> EntryTask {
    let hash = entry.hash;
    let handle = tokio::task::spawn_blocking(move || process(&ctx, &entry));
    async move {
        handle.await.unwrap_or_else(|err| {
            tracing::error!(%hash, error = %err, "worker panicked");
            EntryReport::failed(Some(hash), None, format!("worker panicked: {err}"))
        })
    }
    .boxed()
}

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::record::DetectionRecord;

enum StoreCommand {
    Append(DetectionRecord, oneshot::Sender<Result<()>>),
    Snapshot(oneshot::Sender<Vec<DetectionRecord>>),
}

type StoreCommandTx = mpsc::UnboundedSender<StoreCommand>;
type StoreCommandRx = mpsc::UnboundedReceiver<StoreCommand>;

/// The detection log. A single writer task owns the records and the file;
/// everyone else talks to it through a [`StoreHandle`].
pub struct DetectionStore {
    command_tx: StoreCommandTx,
    worker: JoinHandle<()>,
}

impl DetectionStore {
    pub async fn open(path: &Path, stop: CancellationToken) -> Result<Self> {
        let records = load(path).await?;
        tracing::info!(path = %path.display(), records = records.len(), "opened detection log");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(Self::run(path.to_path_buf(), records, command_rx, stop));
        Ok(Self { command_tx, worker })
    }

    pub fn handle(&self) -> StoreHandle {
        StoreHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    /// Waits for the writer to drain. The stop token passed to `open` must be
    /// cancelled first.
    pub async fn join(self) {
        drop(self.command_tx);
        let _ = self.worker.await;
        tracing::trace!("detection store stopped");
    }

    async fn run(
        path: PathBuf,
        mut records: Vec<DetectionRecord>,
        mut command_rx: StoreCommandRx,
        stop: CancellationToken,
    ) {
        loop {
            select! {
                // CANCEL SAFETY: `mpsc::UnboundedReceiver::recv` is cancel safe.
                command = command_rx.recv() => {
                    match command {
                        Some(StoreCommand::Append(record, reply)) => {
                            tracing::trace!(kind = %record.kind, confidence = record.confidence, "appending record");
                            records.push(record);
                            let result = persist(&path, &records).await;
                            if result.is_err() {
                                // keep memory and file in step
                                records.pop();
                            }
                            let _ = reply.send(result);
                        },
                        Some(StoreCommand::Snapshot(reply)) => {
                            let _ = reply.send(records.clone());
                        },
                        None => break,
                    }
                },
                _ = stop.cancelled() => {
                    tracing::trace!(path = %path.display(), "stopping detection store");
                    break;
                },
            }
        }
    }
}

async fn load(path: &Path) -> Result<Vec<DetectionRecord>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| Error::CorruptLog {
            path: path.to_path_buf(),
            source,
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

async fn persist(path: &Path, records: &[DetectionRecord]) -> Result<()> {
    let mut bytes = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
    records.serialize(&mut serializer)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[derive(Clone)]
pub struct StoreHandle {
    command_tx: StoreCommandTx,
}

impl StoreHandle {
    /// Appends a record; resolves once the whole log has been written out.
    pub async fn append(&self, record: DetectionRecord) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(StoreCommand::Append(record, reply_tx))
            .map_err(|_| Error::StoreGone)?;
        reply_rx.await.map_err(|_| Error::StoreGone)?
    }

    /// Same as [`StoreHandle::append`], for frame loops on blocking threads.
    pub fn append_blocking(&self, record: DetectionRecord) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(StoreCommand::Append(record, reply_tx))
            .map_err(|_| Error::StoreGone)?;
        reply_rx.blocking_recv().map_err(|_| Error::StoreGone)?
    }

    pub async fn records(&self) -> Result<Vec<DetectionRecord>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(StoreCommand::Snapshot(reply_tx))
            .map_err(|_| Error::StoreGone)?;
        reply_rx.await.map_err(|_| Error::StoreGone)
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.records().await?.len())
    }
}

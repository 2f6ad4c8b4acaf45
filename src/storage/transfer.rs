// Copyright 2025 Adobe. All rights reserved.
// This file is licensed to you under the Apache License,
// Version 2.0 (http://www.apache.org/licenses/LICENSE-2.0)
// or the MIT license (http://opensource.org/licenses/MIT),
// at your option.
//
// Unless required by applicable law or agreed to in writing,
// this software is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR REPRESENTATIONS OF ANY KIND, either express or
// implied. See the LICENSE-MIT and LICENSE-APACHE files for the
// specific language governing permissions and limitations under
// each license.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, GetRange, MultipartUpload, ObjectStore, PutPayload, PutResult};
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinSet;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::context::CallGuard;
use super::error::{StorageError, StorageResult};
use super::provider::ObjectMetadata;
use crate::util::retry::{RetryPolicy, Retryable};

/// Read buffer used when cutting a reader into parts.
const READ_CHUNK: usize = 64 * 1024;

/// Upper bound on up-front allocation for a declared size.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Bytes to upload.
pub enum UploadSource {
    /// An in-memory payload.
    Bytes(Bytes),
    /// A reader, optionally with the number of bytes it will yield.
    ///
    /// A declared size is enforced: a reader that yields more or fewer bytes
    /// fails the upload with `InvalidInput` and nothing is stored.
    Reader {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        size: Option<u64>,
    },
}

impl UploadSource {
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static, size: Option<u64>) -> Self {
        UploadSource::Reader {
            reader: Box::new(reader),
            size,
        }
    }

    /// Open a local file, declaring its current length.
    pub async fn file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let size = file.metadata().await?.len();
        Ok(Self::reader(file, Some(size)))
    }

    /// Length known before any byte is read.
    pub fn declared_size(&self) -> Option<u64> {
        match self {
            UploadSource::Bytes(bytes) => Some(bytes.len() as u64),
            UploadSource::Reader { size, .. } => *size,
        }
    }
}

impl Debug for UploadSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadSource::Bytes(bytes) => write!(f, "UploadSource::Bytes(len={})", bytes.len()),
            UploadSource::Reader { size, .. } => write!(f, "UploadSource::Reader(size={:?})", size),
        }
    }
}

impl From<Bytes> for UploadSource {
    fn from(bytes: Bytes) -> Self {
        UploadSource::Bytes(bytes)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(bytes: Vec<u8>) -> Self {
        UploadSource::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for UploadSource {
    fn from(bytes: &'static [u8]) -> Self {
        UploadSource::Bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for UploadSource {
    fn from(text: String) -> Self {
        UploadSource::Bytes(Bytes::from(text))
    }
}

fn size_mismatch(declared: u64, actual: u64) -> StorageError {
    if actual > declared {
        StorageError::InvalidInput(format!(
            "source yielded more than the declared {} bytes",
            declared
        ))
    } else {
        StorageError::InvalidInput(format!(
            "source yielded {} bytes, declared {}",
            actual, declared
        ))
    }
}

fn over_limit(limit: u64) -> StorageError {
    StorageError::InvalidInput(format!(
        "payload exceeds the single request limit of {} bytes",
        limit
    ))
}

/// Read the whole source into memory, enforcing a declared size and `limit`.
///
/// A declared size above `limit` is rejected before any byte is read. An
/// unsized reader is read up to `limit` bytes and rejected if it goes past.
pub(crate) async fn buffer_source(source: UploadSource, limit: u64) -> StorageResult<Bytes> {
    if source.declared_size().is_some_and(|size| size > limit) {
        return Err(over_limit(limit));
    }
    match source {
        UploadSource::Bytes(bytes) => Ok(bytes),
        UploadSource::Reader { mut reader, size } => {
            let capacity = size.unwrap_or(0).min(MAX_PREALLOC) as usize;
            let mut buf = Vec::with_capacity(capacity);
            // one byte past the bound is enough to detect an overrun
            let bound = size.unwrap_or(limit);
            (&mut reader)
                .take(bound.saturating_add(1))
                .read_to_end(&mut buf)
                .await?;
            let read = buf.len() as u64;
            match size {
                Some(declared) if read != declared => Err(size_mismatch(declared, read)),
                None if read > limit => Err(over_limit(limit)),
                _ => Ok(Bytes::from(buf)),
            }
        }
    }
}

type PartTasks = JoinSet<object_store::Result<()>>;

/// Wait until at most `limit` parts are still uploading.
async fn settle_parts(in_flight: &mut PartTasks, limit: usize) -> StorageResult<()> {
    while in_flight.len() > limit {
        match in_flight.join_next().await {
            Some(Ok(result)) => result.map_err(StorageError::from_backend)?,
            Some(Err(e)) => {
                return Err(StorageError::transport(format!("part upload task failed: {}", e)))
            }
            None => break,
        }
    }
    Ok(())
}

/// Cut `reader` into parts of `part_size` bytes and send them, keeping at most
/// `max_in_flight` parts uploading at once.
///
/// Returns once every part has been acknowledged, with the number of bytes
/// sent. The upload is neither completed nor aborted here. Dropping the
/// future cancels the parts still in flight.
pub(crate) async fn send_parts(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    upload: &mut dyn MultipartUpload,
    declared: Option<u64>,
    part_size: usize,
    max_in_flight: usize,
) -> StorageResult<u64> {
    let part_size = part_size.max(1);
    let queued = max_in_flight.saturating_sub(1);
    let mut in_flight = PartTasks::new();
    let mut part = BytesMut::with_capacity(part_size.min(MAX_PREALLOC as usize));
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if let Some(declared) = declared {
            if total > declared {
                return Err(size_mismatch(declared, total));
            }
        }

        let mut chunk = &buf[..n];
        while !chunk.is_empty() {
            let take = (part_size - part.len()).min(chunk.len());
            part.extend_from_slice(&chunk[..take]);
            chunk = &chunk[take..];
            if part.len() == part_size {
                settle_parts(&mut in_flight, queued).await?;
                in_flight.spawn(upload.put_part(PutPayload::from(part.split().freeze())));
            }
        }
    }

    if let Some(declared) = declared {
        if declared != total {
            return Err(size_mismatch(declared, total));
        }
    }

    // the last part may be short, and an empty object still needs one part
    if !part.is_empty() || total == 0 {
        settle_parts(&mut in_flight, queued).await?;
        in_flight.spawn(upload.put_part(PutPayload::from(part.freeze())));
    }
    settle_parts(&mut in_flight, 0).await?;
    Ok(total)
}

/// Run a multipart upload to completion under `guard`.
///
/// Reading and every part upload, including the last, run under the guard.
/// Any failure, cancellation or timeout aborts the upload before returning.
/// Only the final completion request is left uninterrupted.
pub(crate) async fn upload_parts(
    mut upload: Box<dyn MultipartUpload>,
    reader: &mut (dyn AsyncRead + Send + Unpin),
    declared: Option<u64>,
    part_size: usize,
    max_in_flight: usize,
    guard: &CallGuard,
    key: &str,
) -> StorageResult<(u64, PutResult)> {
    let sent = guard
        .run(send_parts(
            reader,
            upload.as_mut(),
            declared,
            part_size,
            max_in_flight,
        ))
        .await;
    let size = match sent {
        Ok(size) => size,
        Err(e) => {
            abort_multipart(upload.as_mut(), key).await;
            return Err(e);
        }
    };

    match upload.complete().await {
        Ok(result) => Ok((size, result)),
        Err(e) => {
            abort_multipart(upload.as_mut(), key).await;
            Err(StorageError::from_backend(e))
        }
    }
}

/// Abort a multipart upload, logging rather than returning a failure.
async fn abort_multipart(upload: &mut dyn MultipartUpload, key: &str) {
    if let Err(e) = upload.abort().await {
        warn!("Failed to abort multipart upload key={}: {}", key, e);
    } else {
        debug!("Aborted multipart upload key={}", key);
    }
}

/// Body of an object being downloaded.
///
/// Pulls chunks from the transport and, after a transient failure, reopens the
/// object at the current offset. The reopened request is pinned to the e_tag
/// seen when the download started, so a concurrent replacement surfaces as
/// `PreconditionFailed` instead of a mixed body.
pub(crate) struct BodyReader {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) path: ObjectPath,
    pub(crate) e_tag: Option<String>,
    pub(crate) offset: u64,
    pub(crate) end: u64,
    pub(crate) body: Option<BoxStream<'static, object_store::Result<Bytes>>>,
    pub(crate) policy: RetryPolicy,
    pub(crate) guard: CallGuard,
}

impl BodyReader {
    pub(crate) fn into_stream(self) -> BoxStream<'static, StorageResult<Bytes>> {
        stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            let guard = reader.guard.clone();
            match guard.run(reader.next_chunk()).await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(reader))),
                Ok(None) => None,
                // the transport body is dropped with the reader
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    async fn next_chunk(&mut self) -> StorageResult<Option<Bytes>> {
        let mut failures = 0;
        loop {
            let error = match self.body.as_mut() {
                Some(body) => match body.next().await {
                    Some(Ok(chunk)) => {
                        self.offset += chunk.len() as u64;
                        return Ok(Some(chunk));
                    }
                    Some(Err(e)) => StorageError::from_backend(e),
                    None if self.offset >= self.end => return Ok(None),
                    None => StorageError::TransportError {
                        message: format!(
                            "body of {} ended at byte {} of {}",
                            self.path, self.offset, self.end
                        ),
                        transient: true,
                    },
                },
                None if self.offset >= self.end => return Ok(None),
                None => {
                    let reopened =
                        reopen(&self.store, &self.path, self.offset, self.e_tag.clone()).await;
                    match reopened {
                        Ok(body) => {
                            self.body = Some(body);
                            continue;
                        }
                        Err(e) => e,
                    }
                }
            };

            self.body = None;
            if !error.is_retryable() || failures >= self.policy.max_retries {
                return Err(error);
            }
            let backoff = self.policy.backoff_for(failures);
            warn!(
                "Resuming download key={}, offset={}, attempt={}/{}, backoff_ms={}: {}",
                self.path,
                self.offset,
                failures + 1,
                self.policy.max_retries,
                backoff.as_millis(),
                error
            );
            tokio::time::sleep(backoff).await;
            failures += 1;
        }
    }
}

async fn reopen(
    store: &Arc<dyn ObjectStore>,
    path: &ObjectPath,
    offset: u64,
    e_tag: Option<String>,
) -> StorageResult<BoxStream<'static, object_store::Result<Bytes>>> {
    let options = GetOptions {
        range: Some(GetRange::Offset(offset)),
        if_match: e_tag,
        ..Default::default()
    };
    let result = store
        .get_opts(path, options)
        .await
        .map_err(StorageError::from_backend)?;
    Ok(result.into_stream())
}

/// An object opened for reading.
///
/// Owns the transport body. Dropping the handle releases the connection.
pub struct ObjectDownload {
    metadata: ObjectMetadata,
    body: BoxStream<'static, StorageResult<Bytes>>,
}

impl ObjectDownload {
    pub(crate) fn new(metadata: ObjectMetadata, body: BoxStream<'static, StorageResult<Bytes>>) -> Self {
        Self { metadata, body }
    }

    pub fn metadata(&self) -> &ObjectMetadata {
        &self.metadata
    }

    pub fn into_parts(self) -> (ObjectMetadata, BoxStream<'static, StorageResult<Bytes>>) {
        (self.metadata, self.body)
    }

    pub fn into_stream(self) -> BoxStream<'static, StorageResult<Bytes>> {
        self.body
    }

    /// Collect the remaining body into memory.
    pub async fn bytes(mut self) -> StorageResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.metadata.size.min(MAX_PREALLOC) as usize);
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Expose the body as an [`AsyncRead`].
    ///
    /// Storage errors surface as `std::io::Error` with a matching kind.
    pub fn into_reader(self) -> StreamReader<BoxStream<'static, StorageResult<Bytes>>, Bytes> {
        StreamReader::new(self.body)
    }
}

impl Debug for ObjectDownload {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDownload")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

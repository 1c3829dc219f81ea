//! Async row iteration over a blocking cursor.

use crate::error::{MigrateError, Result};
use crate::value::Row;
use futures::stream::{self, Stream};
use std::marker::PhantomData;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Request for the next page, served by the worker owning the cursor.
pub(super) struct PageRequest {
    pub(super) size: usize,
    pub(super) reply: oneshot::Sender<Result<Vec<Row>>>,
}

/// Row cursor backed by a connection's worker thread.
///
/// Rows are fetched a page at a time and handed out one by one. Dropping
/// the cursor closes it on the worker; the connection it borrows stays
/// busy until then.
pub struct RowCursor<'a> {
    pages: mpsc::UnboundedSender<PageRequest>,
    buffered: std::vec::IntoIter<Row>,
    page_size: usize,
    exhausted: bool,
    cancel: CancellationToken,
    _conn: PhantomData<&'a mut ()>,
}

impl<'a> RowCursor<'a> {
    pub(super) fn new(
        pages: mpsc::UnboundedSender<PageRequest>,
        page_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pages,
            buffered: Vec::new().into_iter(),
            page_size,
            exhausted: false,
            cancel,
            _conn: PhantomData,
        }
    }

    /// Next row, or `None` once the source is exhausted.
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.buffered.next() {
                return Ok(Some(row));
            }
            if self.exhausted {
                return Ok(None);
            }
            let page = self.next_page().await?;
            if page.is_empty() {
                self.exhausted = true;
                return Ok(None);
            }
            self.buffered = page.into_iter();
        }
    }

    /// Fetch the next page from the worker.
    ///
    /// Cancellation is checked before the request goes out; a fetch already
    /// running on the worker is always allowed to finish.
    async fn next_page(&mut self) -> Result<Vec<Row>> {
        if self.cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        let (reply, response) = oneshot::channel();
        self.pages
            .send(PageRequest {
                size: self.page_size,
                reply,
            })
            .map_err(|_| MigrateError::pool("cursor is closed", "fetching source rows"))?;
        response
            .await
            .map_err(|_| MigrateError::pool("worker exited while fetching rows", "fetching source rows"))?
    }

    /// Consume the cursor as a stream of rows.
    pub fn into_stream(self) -> impl Stream<Item = Result<Row>> + Send + 'a {
        stream::try_unfold(self, |mut cursor| async move {
            Ok(cursor.next_row().await?.map(|row| (row, cursor)))
        })
    }
}

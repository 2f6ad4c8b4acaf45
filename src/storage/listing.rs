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

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;

use super::error::{StorageError, StorageResult};
use super::provider::ObjectMetadata;

/// Continuation token for a listing.
///
/// Only valid with the prefix that produced it. Backends with server-side
/// paging also carry the opaque continuation token they returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCursor {
    prefix: String,
    last_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

impl ListCursor {
    pub(crate) fn new(prefix: &str, last_key: impl Into<String>) -> Self {
        Self {
            prefix: prefix.to_string(),
            last_key: last_key.into(),
            page_token: None,
        }
    }

    pub(crate) fn with_page_token(mut self, page_token: impl Into<String>) -> Self {
        self.page_token = Some(page_token.into());
        self
    }

    /// Key after which the next page starts.
    pub(crate) fn last_key(&self) -> &str {
        &self.last_key
    }

    /// Continuation token issued by the backend, if it pages server-side.
    pub(crate) fn page_token(&self) -> Option<&str> {
        self.page_token.as_deref()
    }

    /// Reject a cursor issued for another listing.
    pub(crate) fn check_prefix(&self, prefix: &str) -> StorageResult<()> {
        if self.prefix == prefix {
            Ok(())
        } else {
            Err(StorageError::InvalidInput(format!(
                "list cursor was issued for prefix '{}', not '{}'",
                self.prefix, prefix
            )))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Objects per page; the `list_page_size` option when unset.
    pub page_size: Option<usize>,

    /// Fill `content_type` with one HEAD request per object.
    ///
    /// Listing responses carry no content type, so without this every entry
    /// reports `application/octet-stream`.
    pub fetch_content_type: bool,
}

impl ListOptions {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_content_type(mut self) -> Self {
        self.fetch_content_type = true;
        self
    }
}

/// One round trip worth of listing results.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMetadata>,
    /// Cursor for the following page, `None` on the last one.
    pub next_cursor: Option<ListCursor>,
}

/// Where a key falls relative to a string prefix in lexicographic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PrefixMatch {
    Before,
    Inside,
    After,
}

pub(crate) fn classify(key: &str, prefix: &str) -> PrefixMatch {
    if key.starts_with(prefix) {
        PrefixMatch::Inside
    } else if key < prefix {
        PrefixMatch::Before
    } else {
        PrefixMatch::After
    }
}

/// Cut one page out of a sorted, prefix-filtered key range.
///
/// `items` must hold at most `page_size + 1` entries; the extra one only
/// signals that another page exists.
pub(crate) fn into_page<T, F>(
    prefix: &str,
    mut items: Vec<T>,
    page_size: usize,
    key_of: F,
) -> (Vec<T>, Option<ListCursor>)
where
    F: Fn(&T) -> &str,
{
    if items.len() > page_size {
        items.truncate(page_size);
        let cursor = items.last().map(|last| ListCursor::new(prefix, key_of(last)));
        (items, cursor)
    } else {
        (items, None)
    }
}

/// Flatten successive pages into one lazy stream of objects.
///
/// `fetch` is called with `None` first and then with each page's cursor until
/// a page comes back without one. The first failed page ends the stream with
/// its error.
pub(crate) fn paginate<'a, F, Fut>(fetch: F) -> BoxStream<'a, StorageResult<ObjectMetadata>>
where
    F: FnMut(Option<ListCursor>) -> Fut + Send + 'a,
    Fut: Future<Output = StorageResult<ListPage>> + Send + 'a,
{
    // `None` state means the previous page was the last one
    let pages = stream::try_unfold(
        (fetch, Some(None::<ListCursor>)),
        |(mut fetch, state)| async move {
            let Some(cursor) = state else {
                return Ok::<_, StorageError>(None);
            };
            let page = fetch(cursor).await?;
            let next = page.next_cursor.map(Some);
            Ok(Some((page.objects, (fetch, next))))
        },
    );

    pages
        .map_ok(|objects| stream::iter(objects.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
}

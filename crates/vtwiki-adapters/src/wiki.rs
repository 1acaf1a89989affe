//! MediaWiki page store client and the resumable category walker.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use serde::Deserialize;
use tracing::{debug, trace};
use vtwiki_core::{CrawlCursor, PageId, PageRef, WikiPage};
use vtwiki_storage::{HttpFetcher, HttpRequest, RateLimiter};

use crate::error::AdapterError;

pub const WIKI_SOURCE_ID: &str = "wiki";
pub const DEFAULT_WIKI_API_URL: &str = "https://virtualyoutuber.fandom.com/api.php";
pub const AGENCY_CATEGORY: &str = "Category:Agencies";
pub const CATEGORY_PREFIX: &str = "Category:";

/// One page of a listing plus the token for the next one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageBatch {
    pub items: Vec<PageRef>,
    /// Entries upstream returned, counting red links dropped from `items`.
    pub listed: usize,
    pub next_cursor: Option<CrawlCursor>,
}

impl PageBatch {
    pub fn new(items: Vec<PageRef>, next_cursor: Option<CrawlCursor>) -> Self {
        Self {
            listed: items.len(),
            items,
            next_cursor,
        }
    }
}

#[async_trait]
pub trait PageStore: Send + Sync {
    /// `AdapterError::NotFound` when the page does not exist (any more).
    async fn get_page_by_id(&self, id: PageId) -> Result<WikiPage, AdapterError>;

    /// Main-namespace pages in title order.
    async fn get_pages(
        &self,
        page_size: usize,
        cursor: Option<&CrawlCursor>,
    ) -> Result<PageBatch, AdapterError>;

    async fn get_category_members(
        &self,
        category: &str,
        page_size: usize,
        cursor: Option<&CrawlCursor>,
    ) -> Result<PageBatch, AdapterError>;

    /// Category pages the page belongs to, titles including `Category:`.
    async fn get_page_categories(
        &self,
        id: PageId,
        page_size: usize,
        cursor: Option<&CrawlCursor>,
    ) -> Result<PageBatch, AdapterError>;

    /// Resolves a file name to its full URL.
    async fn get_image_info(&self, image_name: &str) -> Result<String, AdapterError>;
}

/// Strips the `Category:` namespace from a category page title.
pub fn category_display_name(title: &str) -> &str {
    title.strip_prefix(CATEGORY_PREFIX).unwrap_or(title).trim()
}

type Continuation = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Deserialize)]
struct ApiResponse<Q> {
    query: Option<Q>,
    #[serde(default, rename = "continue")]
    continuation: Option<Continuation>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    #[serde(default)]
    pageid: Option<PageId>,
    title: String,
}

#[derive(Debug, Deserialize)]
struct AllPagesQuery {
    #[serde(default)]
    allpages: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct CategoryMembersQuery {
    #[serde(default)]
    categorymembers: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct PagesQuery<P> {
    #[serde(default = "Vec::new")]
    pages: Vec<P>,
}

#[derive(Debug, Deserialize)]
struct RevisionPage {
    #[serde(default)]
    pageid: Option<PageId>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    revisions: Vec<Revision>,
}

#[derive(Debug, Deserialize)]
struct Revision {
    slots: RevisionSlots,
}

#[derive(Debug, Deserialize)]
struct RevisionSlots {
    main: RevisionSlot,
}

#[derive(Debug, Deserialize)]
struct RevisionSlot {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ImagePage {
    #[serde(default)]
    imageinfo: Vec<ImageInfo>,
}

#[derive(Debug, Deserialize)]
struct ImageInfo {
    url: String,
}

impl<Q> ApiResponse<Q> {
    fn into_query(self) -> Result<(Q, Option<Continuation>), AdapterError> {
        if let Some(err) = self.error {
            return Err(AdapterError::Rejected {
                platform: WIKI_SOURCE_ID,
                code: 0,
                message: format!("{}: {}", err.code, err.info),
            });
        }
        let query = self
            .query
            .ok_or_else(|| AdapterError::malformed("wiki response without query"))?;
        Ok((query, self.continuation))
    }
}

fn continuation_token(continuation: Option<&Continuation>, key: &str) -> Option<CrawlCursor> {
    continuation?
        .get(key)?
        .as_str()
        .filter(|token| !token.is_empty())
        .map(CrawlCursor::new)
}

fn page_batch(entries: Vec<ListEntry>, next_cursor: Option<CrawlCursor>) -> PageBatch {
    let listed = entries.len();
    let items = entries
        .into_iter()
        .filter_map(|entry| {
            let Some(id) = entry.pageid else {
                trace!(title = %entry.title, "skipping listing entry without page id");
                return None;
            };
            Some(PageRef {
                id,
                title: entry.title,
            })
        })
        .collect();
    PageBatch {
        items,
        listed,
        next_cursor,
    }
}

/// `api.php` client. Every call first waits on the shared limiter.
#[derive(Debug, Clone)]
pub struct MediaWikiClient {
    api_url: String,
    http: Arc<HttpFetcher>,
    limiter: Arc<dyn RateLimiter>,
}

impl MediaWikiClient {
    pub fn new(
        api_url: impl Into<String>,
        http: Arc<HttpFetcher>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            http,
            limiter,
        }
    }

    fn query(&self) -> HttpRequest {
        HttpRequest::get(&self.api_url)
            .query("action", "query")
            .query("format", "json")
            .query("formatversion", 2)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        request: HttpRequest,
    ) -> Result<ApiResponse<T>, AdapterError> {
        self.limiter.acquire().await;
        Ok(self.http.get_json(WIKI_SOURCE_ID, &request).await?)
    }
}

#[async_trait]
impl PageStore for MediaWikiClient {
    async fn get_page_by_id(&self, id: PageId) -> Result<WikiPage, AdapterError> {
        let request = self
            .query()
            .query("prop", "revisions")
            .query("rvprop", "content")
            .query("rvslots", "main")
            .query("pageids", id);
        let (query, _) = self
            .call::<PagesQuery<RevisionPage>>(request)
            .await?
            .into_query()?;

        let page = query
            .pages
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::NotFound(format!("wiki page {id}")))?;
        if page.missing || page.invalid || page.pageid.is_none() {
            return Err(AdapterError::NotFound(format!("wiki page {id}")));
        }
        let raw_content = page
            .revisions
            .into_iter()
            .next()
            .map(|revision| revision.slots.main.content)
            .ok_or_else(|| AdapterError::malformed(format!("wiki page {id} has no revision")))?;

        debug!(id, title = %page.title, bytes = raw_content.len(), "fetched wiki page");
        Ok(WikiPage {
            id,
            title: page.title,
            raw_content,
        })
    }

    async fn get_pages(
        &self,
        page_size: usize,
        cursor: Option<&CrawlCursor>,
    ) -> Result<PageBatch, AdapterError> {
        let mut request = self
            .query()
            .query("list", "allpages")
            .query("apnamespace", 0)
            .query("aplimit", page_size);
        if let Some(cursor) = cursor {
            request = request.query("apcontinue", cursor.as_str());
        }
        let (query, continuation) = self.call::<AllPagesQuery>(request).await?.into_query()?;
        Ok(page_batch(
            query.allpages,
            continuation_token(continuation.as_ref(), "apcontinue"),
        ))
    }

    async fn get_category_members(
        &self,
        category: &str,
        page_size: usize,
        cursor: Option<&CrawlCursor>,
    ) -> Result<PageBatch, AdapterError> {
        let title = if category.starts_with(CATEGORY_PREFIX) {
            category.to_string()
        } else {
            format!("{CATEGORY_PREFIX}{category}")
        };
        let mut request = self
            .query()
            .query("list", "categorymembers")
            .query("cmtitle", title)
            .query("cmlimit", page_size);
        if let Some(cursor) = cursor {
            request = request.query("cmcontinue", cursor.as_str());
        }
        let (query, continuation) = self
            .call::<CategoryMembersQuery>(request)
            .await?
            .into_query()?;
        Ok(page_batch(
            query.categorymembers,
            continuation_token(continuation.as_ref(), "cmcontinue"),
        ))
    }

    async fn get_page_categories(
        &self,
        id: PageId,
        page_size: usize,
        cursor: Option<&CrawlCursor>,
    ) -> Result<PageBatch, AdapterError> {
        let mut request = self
            .query()
            .query("generator", "categories")
            .query("pageids", id)
            .query("gcllimit", page_size);
        if let Some(cursor) = cursor {
            request = request.query("gclcontinue", cursor.as_str());
        }
        let (query, continuation) = self
            .call::<PagesQuery<ListEntry>>(request)
            .await?
            .into_query()?;
        Ok(page_batch(
            query.pages,
            continuation_token(continuation.as_ref(), "gclcontinue"),
        ))
    }

    async fn get_image_info(&self, image_name: &str) -> Result<String, AdapterError> {
        let title = if image_name.starts_with("File:") {
            image_name.to_string()
        } else {
            format!("File:{image_name}")
        };
        let request = self
            .query()
            .query("prop", "imageinfo")
            .query("iiprop", "url")
            .query("titles", &title);
        let (query, _) = self.call::<PagesQuery<ImagePage>>(request).await?.into_query()?;
        query
            .pages
            .into_iter()
            .flat_map(|page| page.imageinfo)
            .map(|info| info.url)
            .next()
            .ok_or(AdapterError::NotFound(title))
    }
}

/// What a [`CategoryWalker`] enumerates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListKind {
    AllPages,
    CategoryMembers(String),
    PageCategories(PageId),
}

impl ListKind {
    async fn fetch(
        &self,
        store: &dyn PageStore,
        page_size: usize,
        cursor: Option<&CrawlCursor>,
    ) -> Result<PageBatch, AdapterError> {
        match self {
            ListKind::AllPages => store.get_pages(page_size, cursor).await,
            ListKind::CategoryMembers(category) => {
                store.get_category_members(category, page_size, cursor).await
            }
            ListKind::PageCategories(id) => store.get_page_categories(*id, page_size, cursor).await,
        }
    }
}

/// Pages through a listing. The walk ends on a short page (counted before
/// red links are dropped) or a missing continuation token. A failed call leaves the cursor where it was, so the
/// same walker (or one [`resume`](Self::resume)d from [`cursor`](Self::cursor))
/// retries the same page.
pub struct CategoryWalker {
    store: Arc<dyn PageStore>,
    kind: ListKind,
    page_size: usize,
    cursor: Option<CrawlCursor>,
    finished: bool,
}

impl CategoryWalker {
    pub fn new(store: Arc<dyn PageStore>, kind: ListKind, page_size: usize) -> Self {
        Self {
            store,
            kind,
            page_size: page_size.max(1),
            cursor: None,
            finished: false,
        }
    }

    pub fn resume(mut self, cursor: CrawlCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Token for the next page; `None` before the first page or after the end.
    pub fn cursor(&self) -> Option<&CrawlCursor> {
        self.cursor.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<PageRef>>, AdapterError> {
        if self.finished {
            return Ok(None);
        }
        let batch = self
            .kind
            .fetch(self.store.as_ref(), self.page_size, self.cursor.as_ref())
            .await?;

        if batch.listed < self.page_size || batch.next_cursor.is_none() {
            self.finished = true;
            self.cursor = None;
        } else {
            self.cursor = batch.next_cursor;
        }
        trace!(kind = ?self.kind, items = batch.items.len(), finished = self.finished, "walked listing page");
        Ok(Some(batch.items))
    }

    pub async fn collect_all(mut self) -> Result<Vec<PageRef>, AdapterError> {
        let mut all = Vec::new();
        while let Some(items) = self.next_page().await? {
            all.extend(items);
        }
        Ok(all)
    }

    /// Lazily yields each item with the cursor that resumes after its page.
    pub fn into_stream(
        self,
    ) -> impl Stream<Item = Result<(PageRef, Option<CrawlCursor>), AdapterError>> + Send {
        stream::try_unfold(self, |mut walker| async move {
            let Some(items) = walker.next_page().await? else {
                return Ok::<_, AdapterError>(None);
            };
            let cursor = walker.cursor.clone();
            let page = stream::iter(
                items
                    .into_iter()
                    .map(move |item| Ok::<_, AdapterError>((item, cursor.clone()))),
            );
            Ok(Some((page, walker)))
        })
        .try_flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vtwiki_storage::{BackoffPolicy, HttpClientConfig, Unlimited};
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// `total` pages, cursor = index of the next item.
    struct FakeListing {
        total: usize,
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    impl FakeListing {
        fn new(total: usize) -> Self {
            Self {
                total,
                calls: AtomicUsize::new(0),
                fail_on_call: None,
            }
        }
    }

    #[async_trait]
    impl PageStore for FakeListing {
        async fn get_page_by_id(&self, id: PageId) -> Result<WikiPage, AdapterError> {
            Err(AdapterError::NotFound(id.to_string()))
        }

        async fn get_pages(
            &self,
            page_size: usize,
            cursor: Option<&CrawlCursor>,
        ) -> Result<PageBatch, AdapterError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_call == Some(call) {
                return Err(AdapterError::malformed("boom"));
            }
            let start = cursor.map(|c| c.as_str().parse::<usize>().unwrap()).unwrap_or(0);
            let end = (start + page_size).min(self.total);
            let items = (start..end)
                .map(|i| PageRef {
                    id: i as PageId,
                    title: format!("Page {i}"),
                })
                .collect();
            let next_cursor = (end < self.total).then(|| CrawlCursor::new(end.to_string()));
            Ok(PageBatch::new(items, next_cursor))
        }

        async fn get_category_members(
            &self,
            _category: &str,
            page_size: usize,
            cursor: Option<&CrawlCursor>,
        ) -> Result<PageBatch, AdapterError> {
            self.get_pages(page_size, cursor).await
        }

        async fn get_page_categories(
            &self,
            _id: PageId,
            page_size: usize,
            cursor: Option<&CrawlCursor>,
        ) -> Result<PageBatch, AdapterError> {
            self.get_pages(page_size, cursor).await
        }

        async fn get_image_info(&self, image_name: &str) -> Result<String, AdapterError> {
            Err(AdapterError::NotFound(image_name.to_string()))
        }
    }

    #[tokio::test]
    async fn walker_yields_every_item_in_ceil_n_over_p_calls() {
        let store = Arc::new(FakeListing::new(5));
        let walker = CategoryWalker::new(store.clone(), ListKind::AllPages, 2);

        let items = walker.collect_all().await.unwrap();

        assert_eq!(items.len(), 5);
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exact_multiple_stops_on_missing_cursor() {
        let store = Arc::new(FakeListing::new(4));
        let walker = CategoryWalker::new(store.clone(), ListKind::CategoryMembers("X".into()), 2);

        assert_eq!(walker.collect_all().await.unwrap().len(), 4);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_call_keeps_cursor_for_retry() {
        let store = Arc::new(FakeListing {
            fail_on_call: Some(1),
            ..FakeListing::new(5)
        });
        let mut walker = CategoryWalker::new(store.clone(), ListKind::AllPages, 2);

        assert_eq!(walker.next_page().await.unwrap().unwrap().len(), 2);
        let cursor = walker.cursor().cloned();
        assert!(walker.next_page().await.is_err());
        assert_eq!(walker.cursor().cloned(), cursor);

        let resumed = CategoryWalker::new(store, ListKind::AllPages, 2).resume(cursor.unwrap());
        let rest = resumed.collect_all().await.unwrap();
        assert_eq!(rest.iter().map(|i| i.id).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn stream_pairs_items_with_resume_cursor() {
        let store = Arc::new(FakeListing::new(3));
        let pairs = CategoryWalker::new(store, ListKind::AllPages, 2)
            .into_stream()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();

        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].1, Some(CrawlCursor::new("2")));
        assert_eq!(pairs[2].1, None);
    }

    fn client(server: &MockServer) -> MediaWikiClient {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            backoff: BackoffPolicy::none(),
            ..HttpClientConfig::default()
        })
        .unwrap();
        MediaWikiClient::new(
            format!("{}/api.php", server.uri()),
            Arc::new(http),
            Arc::new(Unlimited),
        )
    }

    #[tokio::test]
    async fn fetches_page_content_from_main_slot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("pageids", "42"))
            .and(query_param("prop", "revisions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "query": {"pages": [{
                    "pageid": 42, "ns": 0, "title": "Sample",
                    "revisions": [{"slots": {"main": {"content": "{{Infobox VTuber}}"}}}]
                }]}
            })))
            .mount(&server)
            .await;

        let page = client(&server).get_page_by_id(42).await.unwrap();
        assert_eq!(page.title, "Sample");
        assert_eq!(page.raw_content, "{{Infobox VTuber}}");
    }

    #[tokio::test]
    async fn missing_page_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "query": {"pages": [{"pageid": 7, "missing": true}]}
            })))
            .mount(&server)
            .await;

        let err = client(&server).get_page_by_id(7).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn category_members_carry_continuation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("list", "categorymembers"))
            .and(query_param("cmtitle", "Category:Agencies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "continue": {"cmcontinue": "page|abc|99", "continue": "-||"},
                "query": {"categorymembers": [
                    {"pageid": 1, "ns": 14, "title": "Category:Hololive"},
                    {"pageid": 2, "ns": 14, "title": "Category:Nijisanji"}
                ]}
            })))
            .mount(&server)
            .await;

        let batch = client(&server)
            .get_category_members("Agencies", 2, None)
            .await
            .unwrap();
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.next_cursor, Some(CrawlCursor::new("page|abc|99")));
        assert_eq!(category_display_name(&batch.items[0].title), "Hololive");
    }

    #[tokio::test]
    async fn api_errors_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"code": "badcontinue", "info": "Invalid continue param."}
            })))
            .mount(&server)
            .await;

        let err = client(&server).get_pages(10, None).await.unwrap_err();
        assert!(matches!(err, AdapterError::Rejected { .. }));
    }

    #[tokio::test]
    async fn red_link_categories_do_not_end_the_walk_early() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("generator", "categories"))
            .and(query_param("gclcontinue", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "query": {"pages": [
                    {"pageid": 3, "ns": 14, "title": "Category:Agency Z"}
                ]}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("generator", "categories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "continue": {"gclcontinue": "next", "continue": "gclcontinue||"},
                "query": {"pages": [
                    {"ns": 14, "title": "Category:Unwritten", "missing": true},
                    {"pageid": 2, "ns": 14, "title": "Category:Agency Y"}
                ]}
            })))
            .mount(&server)
            .await;

        let store: Arc<dyn PageStore> = Arc::new(client(&server));
        let titles = CategoryWalker::new(store, ListKind::PageCategories(9), 2)
            .collect_all()
            .await
            .unwrap()
            .into_iter()
            .map(|page| page.title)
            .collect::<Vec<_>>();

        assert_eq!(titles, vec!["Category:Agency Y", "Category:Agency Z"]);
    }
}

//! Concurrent crawl frontier.
//!
//! A fixed pool of workers consumes a bounded FIFO queue of targets. An
//! atomic pending counter tracks outstanding work: it is incremented on
//! every enqueue (seeds included) and decremented only after an item's full
//! processing completes, so the coordinator can observe zero, shut the
//! workers down and close the output stream with no enqueue/close race.

use crate::detection::{self, DetectionResult, FetchedPage};
use crate::error::{CrawlError, Result};
use crate::frontier::FrontierState;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, info, warn};
use url::Url;

/// A URL queued for one fetch. Created on discovery, consumed once.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: Url,
}

impl Target {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

/// `None` is the coordinator's shutdown signal to a worker.
type QueueItem = Option<Target>;

#[derive(Debug, Clone)]
pub struct CrawlerOptions {
    /// Per-host page budget. A count of pages processed per host, not a
    /// true link-depth measure.
    pub max_depth: usize,
    pub user_agent: String,
    pub blacklist_domains: Vec<String>,
    /// Work queue capacity. Workers enqueue the links they discover into
    /// the same queue they drain, so this must comfortably exceed the
    /// links surviving dedup/blacklist per page times the worker count;
    /// with every worker blocked on a full queue nobody is left to drain
    /// it.
    pub queue_size: usize,
    pub workers: usize,
}

pub struct Crawler {
    client: Client,
    options: Arc<CrawlerOptions>,
}

impl Crawler {
    /// Queue construction is the only fatal crawl error: a pool with no
    /// workers or a zero-capacity queue can never drain.
    pub fn new(client: Client, options: CrawlerOptions) -> Result<Self> {
        if options.workers == 0 {
            return Err(CrawlError::InvalidOptions("worker count must be at least 1".into()));
        }
        if options.queue_size == 0 {
            return Err(CrawlError::InvalidOptions("queue size must be at least 1".into()));
        }
        Ok(Self {
            client,
            options: Arc::new(options),
        })
    }

    /// Crawls from `seeds`, emitting one `DetectionResult` per processed
    /// page onto `out`. Returns once the frontier is fully drained and the
    /// output stream is closed; with zero seeds that is immediate.
    ///
    /// `out` is the system's only backpressure: when its buffer is full,
    /// producing workers block until the consumer drains it.
    pub async fn crawl(&self, seeds: Vec<Target>, out: mpsc::Sender<DetectionResult>) -> Result<()> {
        let frontier = Arc::new(FrontierState::new(self.options.max_depth));
        let (queue_tx, queue_rx) = mpsc::channel::<QueueItem>(self.options.queue_size);
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let pending = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());

        let mut workers = Vec::new();
        for worker_id in 0..self.options.workers {
            let client = self.client.clone();
            let options = self.options.clone();
            let frontier = frontier.clone();
            let queue_tx = queue_tx.clone();
            let queue_rx = queue_rx.clone();
            let pending = pending.clone();
            let drained = drained.clone();
            let out = out.clone();

            workers.push(tokio::spawn(async move {
                debug!("worker {} started", worker_id);
                loop {
                    let item = { queue_rx.lock().await.recv().await };
                    let Some(Some(target)) = item else {
                        break;
                    };
                    Self::process_target(
                        &client, &options, &frontier, &queue_tx, &pending, &out, target,
                    )
                    .await;
                    if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                        drained.notify_waiters();
                    }
                }
                debug!("worker {} exiting", worker_id);
            }));
        }

        for seed in seeds {
            pending.fetch_add(1, Ordering::AcqRel);
            if queue_tx.send(Some(seed)).await.is_err() {
                pending.fetch_sub(1, Ordering::AcqRel);
            }
        }

        // Coordinator: wait for the pending counter to hit zero, then tell
        // every worker to exit. The notified() future is created before the
        // counter check so a concurrent final decrement cannot be missed.
        loop {
            let notified = drained.notified();
            if pending.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }
        for _ in 0..self.options.workers {
            let _ = queue_tx.send(None).await;
        }
        drop(queue_tx);

        for worker in workers {
            worker.await?;
        }
        // All output sender clones are gone once the workers have joined;
        // dropping `out` at return closes the stream exactly once.
        Ok(())
    }

    async fn process_target(
        client: &Client,
        options: &CrawlerOptions,
        frontier: &FrontierState,
        queue: &mpsc::Sender<QueueItem>,
        pending: &AtomicUsize,
        out: &mpsc::Sender<DetectionResult>,
        target: Target,
    ) {
        let Some(host) = target.url.host_str().map(str::to_string) else {
            return;
        };

        // Budget gate before any network I/O: the skip is immediate.
        if frontier.budget_exhausted(&host).await {
            debug!("page budget reached for {}, skipping {}", host, target.url);
            return;
        }

        info!("crawling {}", target.url);

        let page = match Self::fetch_page(client, options, &target.url).await {
            Ok(page) => page,
            Err(e) => {
                // Isolated failure: no retry, no budget charge, crawl goes on.
                warn!("fetch failed for {}: {}", target.url, e);
                return;
            }
        };
        // Charge the budget as soon as the fetch lands, before any link
        // discovered here can be picked up by another worker.
        frontier.record_page(&host).await;

        let result = match frontier.detection_for(&host).await {
            Some(cached) => cached,
            None => frontier.cache_detection(&host, detection::detect(&page)).await,
        };
        // Exactly one emission per processed page, cache hit or miss.
        if out.send(result).await.is_err() {
            warn!("output stream closed while crawling {}", target.url);
        }

        for link in Self::extract_links(&page.body) {
            // Fail closed: a link we cannot attribute to a domain is dropped.
            let Some(domain) = registrable_domain(&link) else {
                continue;
            };
            if options.blacklist_domains.iter().any(|entry| *entry == domain) {
                debug!("skipping blacklisted domain {}", domain);
                continue;
            }
            if !frontier.mark_visited(&domain, link.as_str()).await {
                continue;
            }
            pending.fetch_add(1, Ordering::AcqRel);
            if queue.send(Some(Target::new(link))).await.is_err() {
                pending.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    async fn fetch_page(
        client: &Client,
        options: &CrawlerOptions,
        url: &Url,
    ) -> Result<FetchedPage> {
        let mut request = client.get(url.clone());
        if !options.user_agent.is_empty() {
            request = request.header(USER_AGENT, &options.user_agent);
        }
        let response = request.send().await?;

        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(FetchedPage {
            url: final_url,
            status,
            headers,
            body,
        })
    }

    /// Collects every element's `href` attribute that resolves to an
    /// absolute URL. Relative links are dropped by design: expansion is
    /// cross-origin-only.
    fn extract_links(html: &str) -> Vec<Url> {
        let document = Html::parse_document(html);
        let href_selector = Selector::parse("[href]").unwrap();

        document
            .select(&href_selector)
            .filter_map(|element| element.value().attr("href"))
            .filter_map(|href| Url::parse(href).ok())
            .filter(Url::has_host)
            .collect()
    }
}

/// Registrable domain as this scanner models it: the hostname with a
/// leading "www." stripped. Deliberately not public-suffix-list aware.
pub fn registrable_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_crawler(max_depth: usize, blacklist: Vec<String>) -> Crawler {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap();
        Crawler::new(
            client,
            CrawlerOptions {
                max_depth,
                user_agent: "specter-test/0.1".to_string(),
                blacklist_domains: blacklist,
                queue_size: 64,
                workers: 4,
            },
        )
        .unwrap()
    }

    async fn mount_html(server: &MockServer, at: &str, html: String) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(html),
            )
            .mount(server)
            .await;
    }

    async fn collect(mut rx: mpsc::Receiver<DetectionResult>) -> Vec<DetectionResult> {
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        results
    }

    #[test]
    fn test_rejects_zero_workers() {
        let client = Client::new();
        let result = Crawler::new(
            client,
            CrawlerOptions {
                max_depth: 2,
                user_agent: String::new(),
                blacklist_domains: vec![],
                queue_size: 16,
                workers: 0,
            },
        );
        assert!(matches!(result, Err(CrawlError::InvalidOptions(_))));
    }

    #[test]
    fn test_rejects_zero_queue_size() {
        let client = Client::new();
        let result = Crawler::new(
            client,
            CrawlerOptions {
                max_depth: 2,
                user_agent: String::new(),
                blacklist_domains: vec![],
                queue_size: 0,
                workers: 2,
            },
        );
        assert!(matches!(result, Err(CrawlError::InvalidOptions(_))));
    }

    #[tokio::test]
    async fn test_zero_seeds_closes_stream_immediately() {
        let crawler = test_crawler(2, vec![]);
        let (tx, mut rx) = mpsc::channel(8);

        crawler.crawl(vec![], tx).await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_single_seed_without_links_emits_once() {
        let server = MockServer::start().await;
        mount_html(&server, "/", "<html><body>nothing here</body></html>".to_string()).await;

        let crawler = test_crawler(5, vec![]);
        let (tx, rx) = mpsc::channel(8);
        let seed = Target::new(server.uri().parse().unwrap());

        crawler.crawl(vec![seed], tx).await.unwrap();

        let results = collect(rx).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status_code, 200);
    }

    #[tokio::test]
    async fn test_duplicate_links_dispatched_once() {
        let server = MockServer::start().await;
        let root = format!(
            r#"<html><body>
                <a href="{0}/page1">one</a>
                <a href="{0}/page1">one again</a>
                <a href="{0}/page2">two</a>
            </body></html>"#,
            server.uri()
        );
        mount_html(&server, "/", root).await;
        // Both child pages link back to page1, so it is discovered from
        // three different pages but must be fetched only once.
        let back = format!(r#"<html><a href="{}/page1">back</a></html>"#, server.uri());
        mount_html(&server, "/page1", back.clone()).await;
        mount_html(&server, "/page2", back).await;

        let crawler = test_crawler(10, vec![]);
        let (tx, rx) = mpsc::channel(32);
        let seed = Target::new(server.uri().parse().unwrap());
        crawler.crawl(vec![seed], tx).await.unwrap();

        let results = collect(rx).await;
        assert_eq!(results.len(), 3);

        let requests = server.received_requests().await.unwrap();
        let page1_fetches = requests
            .iter()
            .filter(|r| r.url.path() == "/page1")
            .count();
        assert_eq!(page1_fetches, 1);
    }

    #[tokio::test]
    async fn test_page_budget_caps_fetches_per_host() {
        let server = MockServer::start().await;
        let root = format!(
            r#"<html><a href="{0}/page1">a</a><a href="{0}/page2">b</a></html>"#,
            server.uri()
        );
        mount_html(&server, "/", root).await;
        mount_html(&server, "/page1", "<html></html>".to_string()).await;
        mount_html(&server, "/page2", "<html></html>".to_string()).await;

        let crawler = test_crawler(1, vec![]);
        let (tx, rx) = mpsc::channel(32);
        let seed = Target::new(server.uri().parse().unwrap());
        crawler.crawl(vec![seed], tx).await.unwrap();

        // Budget of one page per host: the seed is processed, both
        // discovered links are skipped without a fetch.
        let results = collect(rx).await;
        assert_eq!(results.len(), 1);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_blacklisted_domain_never_enqueued() {
        let server = MockServer::start().await;
        let root = format!(
            r#"<html><a href="{0}/page1">a</a><a href="{0}/page2">b</a></html>"#,
            server.uri()
        );
        mount_html(&server, "/", root).await;

        let blacklisted = server.uri().parse::<Url>().unwrap().host_str().unwrap().to_string();
        let crawler = test_crawler(10, vec![blacklisted]);
        let (tx, rx) = mpsc::channel(32);
        let seed = Target::new(server.uri().parse().unwrap());
        crawler.crawl(vec![seed], tx).await.unwrap();

        let results = collect(rx).await;
        assert_eq!(results.len(), 1);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_detection_computed_once_per_host() {
        let server = MockServer::start().await;
        let root = format!(r#"<html><a href="{}/page1">a</a></html>"#, server.uri());
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .insert_header("server", "nginx")
                    .set_body_string(root),
            )
            .mount(&server)
            .await;
        // Different Server header: a fresh detection here would be visible
        // in the second emission.
        Mock::given(method("GET"))
            .and(path("/page1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .insert_header("server", "apache")
                    .set_body_string("<html></html>"),
            )
            .mount(&server)
            .await;

        let crawler = test_crawler(10, vec![]);
        let (tx, rx) = mpsc::channel(32);
        let seed = Target::new(server.uri().parse().unwrap());
        crawler.crawl(vec![seed], tx).await.unwrap();

        let results = collect(rx).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0].server, "nginx");
    }

    #[tokio::test]
    async fn test_fetch_failure_is_isolated() {
        let server = MockServer::start().await;
        // One link to a port nothing listens on, one healthy link.
        let root = format!(
            r#"<html>
                <a href="http://127.0.0.1:1/dead">dead</a>
                <a href="{}/page1">alive</a>
            </html>"#,
            server.uri()
        );
        mount_html(&server, "/", root).await;
        mount_html(&server, "/page1", "<html></html>".to_string()).await;

        let crawler = test_crawler(10, vec![]);
        let (tx, rx) = mpsc::channel(32);
        let seed = Target::new(server.uri().parse().unwrap());
        crawler.crawl(vec![seed], tx).await.unwrap();

        // Root and the healthy page emit; the dead link emits nothing and
        // does not abort the crawl.
        let results = collect(rx).await;
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_extract_links_absolute_only() {
        let html = r#"<html>
            <a href="http://example.com/abs">abs</a>
            <a href="/relative">rel</a>
            <a href="page.html">rel2</a>
            <link rel="stylesheet" href="http://cdn.example.com/style.css">
        </html>"#;
        let links = Crawler::extract_links(html);
        let strings: Vec<String> = links.iter().map(|u| u.to_string()).collect();
        assert_eq!(
            strings,
            vec![
                "http://example.com/abs".to_string(),
                "http://cdn.example.com/style.css".to_string(),
            ]
        );
    }

    #[test]
    fn test_registrable_domain_strips_www() {
        let url: Url = "https://www.example.com/path".parse().unwrap();
        assert_eq!(registrable_domain(&url), Some("example.com".to_string()));

        let url: Url = "https://sub.example.com/".parse().unwrap();
        assert_eq!(registrable_domain(&url), Some("sub.example.com".to_string()));
    }
}

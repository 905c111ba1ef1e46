//! Fetch orchestration: resolve an emote, look up or produce its rendition,
//! and hand back bytes or a pending marker.

use crate::catalog::{NamespaceCatalog, SqliteCatalog};
use crate::db::Database;
use crate::image::{ImageProcessor, ResizeService, ResizedImage};
use crate::models::{Config, EmoteRequest, OutputFormat, ProcessingMode, Rendition};
use crate::provider::{EmoteProvider, ProviderClient};
use crate::registry::{Claim, ImageRegistry, SqliteRegistry};
use crate::resolver::{SourceReference, SourceResolver};
use crate::store::{ContentStore, FsContentStore};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_retry::{strategy::FixedInterval, Retry};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rendition bytes ready to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmoteImage {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Ready(EmoteImage),
    /// The rendition is being produced; ask again later.
    Pending,
    NotFound,
}

/// Resolves emotes and serves their renditions.
pub struct App {
    resolver: SourceResolver,
    registry: Arc<dyn ImageRegistry>,
    store: Arc<dyn ContentStore>,
    image: Arc<dyn ResizeService>,
    jobs: Arc<Semaphore>,
    mode: ProcessingMode,
    max_dimension: u32,
}

/// Injectable service bundle used to construct [`App`] in tests/harnesses.
pub struct AppServices {
    pub catalog: Arc<dyn NamespaceCatalog>,
    pub provider: Arc<dyn EmoteProvider>,
    pub registry: Arc<dyn ImageRegistry>,
    pub store: Arc<dyn ContentStore>,
    pub image: Arc<dyn ResizeService>,
}

impl App {
    /// Build an app from concrete service dependencies.
    pub fn with_services(services: AppServices, config: &Config) -> Self {
        Self {
            resolver: SourceResolver::new(config, services.catalog, services.provider),
            registry: services.registry,
            store: services.store,
            image: services.image,
            jobs: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            mode: config.processing_mode,
            max_dimension: config.max_dimension,
        }
    }

    /// Open the database and content store named by `config` and wire up the
    /// real services.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = Database::open(&config.database_path)?;

        let registry = SqliteRegistry::new(db.clone());
        let abandoned = registry.reset_unprocessed().await?;
        if abandoned > 0 {
            info!("Cleared {} abandoned rendition claims", abandoned);
        }

        let store = FsContentStore::new(&config.renditions_path())?;
        info!("Rendition store at: {}", store.root().display());

        Ok(Self::with_services(
            AppServices {
                catalog: Arc::new(SqliteCatalog::new(db)),
                provider: Arc::new(ProviderClient::new(config)?),
                registry: Arc::new(registry),
                store: Arc::new(store),
                image: Arc::new(ImageProcessor::new()),
            },
            config,
        ))
    }

    pub async fn fetch(&self, request: &EmoteRequest) -> Result<FetchOutcome> {
        request.dimensions().validate(self.max_dimension)?;

        let source = match self
            .resolver
            .resolve(request.namespace.as_deref(), &request.name)
            .await
        {
            Ok(source) => source,
            Err(Error::NotFound(what)) => {
                debug!("Not found: {}", what);
                return Ok(FetchOutcome::NotFound);
            }
            Err(e) => return Err(e),
        };

        let image = self.registry.get_or_create_image(&source.original).await?;
        let key = request.key();

        // A second pass only happens when stored bytes went missing
        for _ in 0..2 {
            match self.registry.claim_rendition(&image, key, source.kind).await? {
                Claim::Ready(rendition) => match self.store.get(&rendition.path).await? {
                    Some(bytes) => {
                        debug!("Cache hit for {} at {}", source.original, rendition.path);
                        let format = rendition.format.unwrap_or_else(|| {
                            OutputFormat::for_request(source.kind, key.prefer_webp)
                        });
                        return Ok(FetchOutcome::Ready(EmoteImage { bytes, format }));
                    }
                    None => {
                        warn!(
                            "Rendition {} has no stored content at {}, reprocessing",
                            rendition.id, rendition.path
                        );
                        self.registry.invalidate_rendition(rendition.id).await?;
                    }
                },
                Claim::InFlight(rendition) => {
                    debug!("Rendition {} still processing", rendition.id);
                    return Ok(FetchOutcome::Pending);
                }
                Claim::Claimed(rendition) => return self.dispatch(source, rendition).await,
            }
        }

        Err(Error::Invariant(format!(
            "Stored content for {} keeps disappearing",
            source.original
        )))
    }

    /// Poll [`App::fetch`] until the outcome is no longer `Pending`, or give up
    /// after `attempts` retries and report `Pending`.
    pub async fn fetch_until_ready(
        &self,
        request: &EmoteRequest,
        attempts: usize,
        interval: Duration,
    ) -> Result<FetchOutcome> {
        let retry_strategy = FixedInterval::new(interval).take(attempts);

        let result = Retry::spawn(retry_strategy, move || async move {
            match self.fetch(request).await {
                Ok(FetchOutcome::Pending) => Err(()),
                other => Ok(other),
            }
        })
        .await;

        result.unwrap_or(Ok(FetchOutcome::Pending))
    }

    async fn dispatch(&self, source: SourceReference, rendition: Rendition) -> Result<FetchOutcome> {
        let job = ResizeJob {
            id: Uuid::new_v4(),
            source,
            rendition,
            registry: self.registry.clone(),
            store: self.store.clone(),
            image: self.image.clone(),
            permits: self.jobs.clone(),
        };

        match self.mode {
            ProcessingMode::Inline => match job.run().await {
                Ok(resized) => Ok(FetchOutcome::Ready(EmoteImage {
                    bytes: resized.bytes,
                    format: resized.format,
                })),
                Err(Error::NotFound(_)) => Ok(FetchOutcome::NotFound),
                Err(e) => Err(e),
            },
            ProcessingMode::Background => {
                tokio::spawn(async move {
                    // Failures are logged and the claim released inside run()
                    let _ = job.run().await;
                });
                Ok(FetchOutcome::Pending)
            }
        }
    }
}

/// One claimed rendition waiting to be produced.
struct ResizeJob {
    id: Uuid,
    source: SourceReference,
    rendition: Rendition,
    registry: Arc<dyn ImageRegistry>,
    store: Arc<dyn ContentStore>,
    image: Arc<dyn ResizeService>,
    permits: Arc<Semaphore>,
}

impl ResizeJob {
    async fn run(self) -> Result<ResizedImage> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Invariant("Resize job pool closed".to_string()))?;

        info!(
            "[job {}] Resizing {} to {}",
            self.id,
            self.source.original,
            self.rendition.key.dimensions()
        );

        match self.process().await {
            Ok(resized) => {
                info!(
                    "[job {}] Stored {} rendition ({}, {} bytes) at {}",
                    self.id,
                    resized.format,
                    resized.dimensions,
                    resized.bytes.len(),
                    self.rendition.path
                );
                Ok(resized)
            }
            Err(e) => {
                error!("[job {}] Resize of {} failed: {}", self.id, self.source.original, e);
                if let Err(release_err) = self.registry.release_rendition(self.rendition.id).await
                {
                    error!(
                        "[job {}] Failed to release rendition {}: {}",
                        self.id, self.rendition.id, release_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn process(&self) -> Result<ResizedImage> {
        let data = self.source.load().await?;
        let resized = self
            .image
            .resize(
                &data,
                self.rendition.key.dimensions(),
                self.source.kind,
                self.rendition.key.prefer_webp,
            )
            .await?;

        self.store.put(&self.rendition.path, &resized.bytes).await?;
        self.registry
            .complete_rendition(self.rendition.id, resized.format, resized.dimensions)
            .await?;

        Ok(resized)
    }
}

#[cfg(test)]
mod tests {
    use super::{App, AppServices, FetchOutcome};
    use crate::catalog::SqliteCatalog;
    use crate::db::Database;
    use crate::image::MockImageProcessor;
    use crate::models::{Config, EmoteKind, EmoteRequest, OutputFormat, ProcessingMode};
    use crate::provider::{MockProviderClient, Provider};
    use crate::registry::SqliteRegistry;
    use crate::resolver::local::DESCRIPTOR_FILE;
    use crate::store::MockContentStore;
    use crate::Error;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::fs;
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn kappa_png() -> Vec<u8> {
        let img = RgbaImage::from_pixel(8, 8, Rgba([100, 65, 165, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    struct TestApp {
        app: Arc<App>,
        image: MockImageProcessor,
        store: MockContentStore,
        catalog: Arc<SqliteCatalog>,
        _dir: TempDir,
    }

    fn write_local_emote(emotes: &Path, name: &str, kind: EmoteKind) {
        let dir = emotes.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(DESCRIPTOR_FILE),
            format!(r#"{{"path": "source.img", "type": "{}"}}"#, kind.as_tag()),
        )
        .unwrap();
        fs::write(dir.join("source.img"), format!("{} pixels", name)).unwrap();
    }

    fn build_test_app(mode: ProcessingMode, image: MockImageProcessor) -> TestApp {
        let dir = TempDir::new().unwrap();
        let emotes = dir.path().join("emotes");
        write_local_emote(&emotes, "party", EmoteKind::Static);
        write_local_emote(&emotes, "parrot", EmoteKind::Animated);

        let config = Config::new(&emotes, &dir.path().join("uploads"), Path::new(":memory:"))
            .with_processing_mode(mode);
        let db = Database::open_in_memory().unwrap();
        let catalog = Arc::new(SqliteCatalog::new(db.clone()));
        let store = MockContentStore::new();

        let app = App::with_services(
            AppServices {
                catalog: catalog.clone(),
                provider: Arc::new(
                    MockProviderClient::new()
                        .with_emote(Provider::Twitch, "xqc", "Kappa", kappa_png())
                        .with_emote(
                            Provider::Twitch,
                            "xqc",
                            "RateLimited",
                            b"<html>rate limited</html>".to_vec(),
                        ),
                ),
                registry: Arc::new(SqliteRegistry::new(db)),
                store: Arc::new(store.clone()),
                image: Arc::new(image.clone()),
            },
            &config,
        );

        TestApp {
            app: Arc::new(app),
            image,
            store,
            catalog,
            _dir: dir,
        }
    }

    fn expect_ready(outcome: FetchOutcome) -> super::EmoteImage {
        match outcome {
            FetchOutcome::Ready(image) => image,
            other => panic!("expected a ready rendition, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inline_fetch_then_cache_hit() {
        let test = build_test_app(ProcessingMode::Inline, MockImageProcessor::new());
        let request = EmoteRequest::new("party", 32, 32);

        let first = expect_ready(test.app.fetch(&request).await.unwrap());
        let second = expect_ready(test.app.fetch(&request).await.unwrap());

        assert_eq!(first.format, OutputFormat::Png);
        assert_eq!(first, second);
        assert_eq!(test.image.get_process_count(), 1);
        assert_eq!(test.store.get_put_count(), 1);
    }

    #[tokio::test]
    async fn test_background_fetch_is_pending_then_ready() {
        let test = build_test_app(ProcessingMode::Background, MockImageProcessor::new());
        let request = EmoteRequest::new("parrot", 64, 64);

        assert_eq!(test.app.fetch(&request).await.unwrap(), FetchOutcome::Pending);

        let ready = test
            .app
            .fetch_until_ready(&request, 50, Duration::from_millis(10))
            .await
            .unwrap();
        let image = expect_ready(ready);

        assert_eq!(image.format, OutputFormat::Gif);
        assert_eq!(test.image.get_process_count(), 1);
    }

    #[tokio::test]
    async fn test_animated_emote_served_as_webp_when_preferred() {
        let test = build_test_app(ProcessingMode::Inline, MockImageProcessor::new());

        let gif = expect_ready(
            test.app
                .fetch(&EmoteRequest::new("parrot", 32, 32))
                .await
                .unwrap(),
        );
        let webp = expect_ready(
            test.app
                .fetch(&EmoteRequest::new("parrot", 32, 32).with_webp(true))
                .await
                .unwrap(),
        );

        assert_eq!(gif.format, OutputFormat::Gif);
        assert_eq!(webp.format, OutputFormat::Webp);
        assert_eq!(test.image.get_process_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_emotes_are_not_found() {
        let test = build_test_app(ProcessingMode::Inline, MockImageProcessor::new());
        let namespace = test.catalog.create_namespace("streamers/alice").unwrap();
        test.catalog
            .add_emote(&namespace, "wave", "wave.png", EmoteKind::Static)
            .unwrap();

        let requests = [
            EmoteRequest::new("nope", 32, 32),
            EmoteRequest::new("wave", 32, 32).with_namespace("streamers/bob"),
            EmoteRequest::new("nope", 32, 32).with_namespace("streamers/alice"),
            EmoteRequest::new("Kappa", 32, 32).with_namespace("twitch/someone"),
        ];
        for request in &requests {
            assert_eq!(
                test.app.fetch(request).await.unwrap(),
                FetchOutcome::NotFound,
                "{:?}",
                request
            );
        }
        assert_eq!(test.image.get_process_count(), 0);
    }

    #[tokio::test]
    async fn test_catalog_emote_with_missing_upload_is_not_found() {
        let test = build_test_app(ProcessingMode::Inline, MockImageProcessor::new());
        let namespace = test.catalog.create_namespace("streamers/alice").unwrap();
        test.catalog
            .add_emote(&namespace, "wave", "never-uploaded.png", EmoteKind::Static)
            .unwrap();

        let request = EmoteRequest::new("wave", 32, 32).with_namespace("streamers/alice");
        assert_eq!(test.app.fetch(&request).await.unwrap(), FetchOutcome::NotFound);

        // The claim was released, not left dangling as a pending rendition
        assert_eq!(test.app.fetch(&request).await.unwrap(), FetchOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_retyped_catalog_emote_serves_new_format() {
        let test = build_test_app(ProcessingMode::Inline, MockImageProcessor::new());
        let uploads = test._dir.path().join("uploads");
        fs::create_dir_all(&uploads).unwrap();
        fs::write(uploads.join("wave.img"), b"wave pixels").unwrap();

        let namespace = test.catalog.create_namespace("streamers/alice").unwrap();
        let request = EmoteRequest::new("wave", 32, 32).with_namespace("streamers/alice");

        test.catalog
            .add_emote(&namespace, "wave", "wave.img", EmoteKind::Static)
            .unwrap();
        let still = expect_ready(test.app.fetch(&request).await.unwrap());

        test.catalog
            .add_emote(&namespace, "wave", "wave.img", EmoteKind::Animated)
            .unwrap();
        let animated = expect_ready(test.app.fetch(&request).await.unwrap());

        assert_eq!(still.format, OutputFormat::Png);
        assert_eq!(animated.format, OutputFormat::Gif);
        assert_eq!(test.image.get_process_count(), 2);
    }

    #[tokio::test]
    async fn test_provider_emote_is_resized_and_cached() {
        let test = build_test_app(ProcessingMode::Inline, MockImageProcessor::new());
        let request = EmoteRequest::new("Kappa", 28, 28).with_namespace("twitch/xqc");

        let first = expect_ready(test.app.fetch(&request).await.unwrap());
        let second = expect_ready(test.app.fetch(&request).await.unwrap());

        assert_eq!(first.format, OutputFormat::Png);
        let mut expected = b"png:28x28:".to_vec();
        expected.extend(kappa_png());
        assert_eq!(first.bytes, expected);
        assert_eq!(first, second);
        assert_eq!(test.image.get_process_count(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_provider_body_is_not_found() {
        for mode in [ProcessingMode::Inline, ProcessingMode::Background] {
            let test = build_test_app(mode, MockImageProcessor::new());
            let request = EmoteRequest::new("RateLimited", 28, 28).with_namespace("twitch/xqc");

            assert_eq!(
                test.app.fetch(&request).await.unwrap(),
                FetchOutcome::NotFound,
                "{:?}",
                mode
            );
            assert_eq!(
                test.app
                    .fetch_until_ready(&request, 3, Duration::from_millis(5))
                    .await
                    .unwrap(),
                FetchOutcome::NotFound
            );
            assert_eq!(test.image.get_process_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_resize_once() {
        for mode in [ProcessingMode::Inline, ProcessingMode::Background] {
            let test = build_test_app(
                mode,
                MockImageProcessor::new().with_delay(Duration::from_millis(50)),
            );
            let request = EmoteRequest::new("party", 48, 48);

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let app = test.app.clone();
                    let request = request.clone();
                    tokio::spawn(async move { app.fetch(&request).await.unwrap() })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap();
            }

            let ready = test
                .app
                .fetch_until_ready(&request, 50, Duration::from_millis(10))
                .await
                .unwrap();
            expect_ready(ready);
            assert_eq!(test.image.get_process_count(), 1, "{:?}", mode);
        }
    }

    #[tokio::test]
    async fn test_failed_resize_releases_claim() {
        let image = MockImageProcessor::new().with_failure(true);
        let test = build_test_app(ProcessingMode::Inline, image);
        let request = EmoteRequest::new("party", 32, 32);

        let err = test.app.fetch(&request).await.unwrap_err();
        assert!(matches!(err, Error::Encode(_)));

        // Not retried automatically, but the next request may try again
        test.image.set_failure(false);
        expect_ready(test.app.fetch(&request).await.unwrap());
        assert_eq!(test.image.get_process_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_background_job_does_not_stay_pending() {
        let image = MockImageProcessor::new().with_failure(true);
        let test = build_test_app(ProcessingMode::Background, image);
        let request = EmoteRequest::new("party", 32, 32);

        assert_eq!(test.app.fetch(&request).await.unwrap(), FetchOutcome::Pending);
        tokio::time::sleep(Duration::from_millis(50)).await;

        test.image.set_failure(false);
        let ready = test
            .app
            .fetch_until_ready(&request, 50, Duration::from_millis(10))
            .await
            .unwrap();
        expect_ready(ready);
    }

    #[tokio::test]
    async fn test_missing_stored_content_is_reprocessed() {
        let test = build_test_app(ProcessingMode::Inline, MockImageProcessor::new());
        let request = EmoteRequest::new("party", 32, 32);

        let first = expect_ready(test.app.fetch(&request).await.unwrap());
        let files = test.store.get_files();
        let key = files.keys().next().unwrap();
        test.store.remove(key);

        let second = expect_ready(test.app.fetch(&request).await.unwrap());
        assert_eq!(first, second);
        assert_eq!(test.image.get_process_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_dimensions_rejected() {
        let test = build_test_app(ProcessingMode::Inline, MockImageProcessor::new());

        let err = test
            .app
            .fetch(&EmoteRequest::new("party", 0, 32))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDimensions(_)));

        let err = test
            .app
            .fetch(&EmoteRequest::new("party", 32, 4096))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDimensions(_)));
    }
}

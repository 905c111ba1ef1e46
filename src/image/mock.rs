use super::{ResizeService, ResizedImage};
use crate::models::{Dimensions, EmoteKind, OutputFormat};
use crate::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Resize engine stand-in that counts calls and returns predictable bytes.
#[derive(Clone)]
pub struct MockImageProcessor {
    process_count: Arc<Mutex<usize>>,
    should_fail: Arc<Mutex<bool>>,
    delay: Option<Duration>,
}

impl MockImageProcessor {
    pub fn new() -> Self {
        Self {
            process_count: Arc::new(Mutex::new(0)),
            should_fail: Arc::new(Mutex::new(false)),
            delay: None,
        }
    }

    /// Simulate a slow resize so concurrent requests overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_failure(self, should_fail: bool) -> Self {
        self.set_failure(should_fail);
        self
    }

    pub fn set_failure(&self, should_fail: bool) {
        *self.should_fail.lock().unwrap() = should_fail;
    }

    pub fn get_process_count(&self) -> usize {
        *self.process_count.lock().unwrap()
    }
}

impl Default for MockImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResizeService for MockImageProcessor {
    async fn resize(
        &self,
        image_data: &[u8],
        target: Dimensions,
        kind: EmoteKind,
        prefer_webp: bool,
    ) -> Result<ResizedImage> {
        {
            let mut count = self.process_count.lock().unwrap();
            *count += 1;
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if *self.should_fail.lock().unwrap() {
            return Err(crate::Error::Encode(image::ImageError::IoError(
                std::io::Error::other("Mock failure"),
            )));
        }

        let format = OutputFormat::for_request(kind, prefer_webp);
        let mut bytes = format!("{}:{}:", format, target).into_bytes();
        bytes.extend_from_slice(image_data);

        Ok(ResizedImage {
            bytes,
            format,
            dimensions: target,
        })
    }
}

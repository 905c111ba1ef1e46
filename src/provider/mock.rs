use super::{EmoteProvider, Provider};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type EmoteKey = (Provider, String, String);

#[derive(Clone)]
pub struct MockProviderClient {
    emotes: Arc<Mutex<HashMap<EmoteKey, Vec<u8>>>>,
    call_count: Arc<Mutex<usize>>,
    should_fail: Arc<Mutex<bool>>,
}

impl MockProviderClient {
    pub fn new() -> Self {
        Self {
            emotes: Arc::new(Mutex::new(HashMap::new())),
            call_count: Arc::new(Mutex::new(0)),
            should_fail: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_emote(self, provider: Provider, channel: &str, name: &str, bytes: Vec<u8>) -> Self {
        self.emotes
            .lock()
            .unwrap()
            .insert((provider, channel.to_string(), name.to_string()), bytes);
        self
    }

    /// Fail every call with a transport error.
    pub fn with_failure(self, should_fail: bool) -> Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    pub fn get_call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

impl Default for MockProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmoteProvider for MockProviderClient {
    async fn fetch_emote(&self, provider: Provider, channel: &str, name: &str) -> Result<Vec<u8>> {
        let mut count = self.call_count.lock().unwrap();
        *count += 1;

        if *self.should_fail.lock().unwrap() {
            return Err(Error::Transport("Mock connection reset".to_string()));
        }

        self.emotes
            .lock()
            .unwrap()
            .get(&(provider, channel.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{}/{}/{}", provider, channel, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_lookup() {
        let provider = MockProviderClient::new().with_emote(
            Provider::Twitch,
            "xqc",
            "Kappa",
            vec![1, 2, 3],
        );

        let bytes = provider
            .fetch_emote(Provider::Twitch, "xqc", "Kappa")
            .await
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);

        let missing = provider
            .fetch_emote(Provider::Discord, "xqc", "Kappa")
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
        assert_eq!(provider.get_call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_provider_failure() {
        let provider = MockProviderClient::new().with_failure(true);

        let err = provider
            .fetch_emote(Provider::Twitch, "xqc", "Kappa")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}

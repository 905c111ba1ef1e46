use super::ContentStore;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct MockContentStore {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    put_count: Arc<Mutex<usize>>,
    get_count: Arc<Mutex<usize>>,
}

impl MockContentStore {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            put_count: Arc::new(Mutex::new(0)),
            get_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_file(self, key: String, content: Vec<u8>) -> Self {
        self.files.lock().unwrap().insert(key, content);
        self
    }

    /// Drop a stored value, as if it were deleted out from under the registry.
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().remove(key)
    }

    pub fn get_put_count(&self) -> usize {
        *self.put_count.lock().unwrap()
    }

    pub fn get_get_count(&self) -> usize {
        *self.get_count.lock().unwrap()
    }

    pub fn get_files(&self) -> HashMap<String, Vec<u8>> {
        self.files.lock().unwrap().clone()
    }
}

impl Default for MockContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MockContentStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut count = self.put_count.lock().unwrap();
        *count += 1;

        self.files
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut count = self.get_count.lock().unwrap();
        *count += 1;

        Ok(self.files.lock().unwrap().get(key).cloned())
    }
}

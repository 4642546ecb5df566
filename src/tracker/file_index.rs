use log::debug;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::core::FileAdvertisement;
use crate::tracker::store::TrackerStore;
use crate::utils::{Clock, Result};

/// Which peer offers which filename, and where.
pub struct FileIndex {
    store: Arc<dyn TrackerStore>,
    clock: Arc<dyn Clock>,
}

impl FileIndex {
    pub fn new(store: Arc<dyn TrackerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Replace everything `username` advertises with `filenames`.
    ///
    /// The new set is staged first and swapped in by the store in one step,
    /// so concurrent searches see either the old set or the new one. Repeated
    /// filenames are advertised once. An empty list clears the peer's entries.
    pub async fn replace_advertisements(
        &self,
        username: &str,
        filenames: &[String],
        address: SocketAddr,
    ) -> Result<()> {
        let shared_time = self.clock.now();
        let mut seen = HashSet::new();
        let staged: Vec<FileAdvertisement> = filenames
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .map(|name| FileAdvertisement {
                filename: name.clone(),
                owner: username.to_string(),
                address,
                shared_time,
            })
            .collect();

        debug!("Publishing {} files for {} at {}", staged.len(), username, address);
        self.store.replace_advertisements(username, staged).await
    }

    pub async fn remove_all(&self, username: &str) -> Result<usize> {
        self.store.remove_advertisements(username).await
    }

    /// Advertisements matching both substrings whose owner is in `live_usernames`,
    /// sorted by filename then owner.
    pub async fn search(
        &self,
        filename_filter: &str,
        owner_filter: &str,
        live_usernames: &HashSet<String>,
    ) -> Result<Vec<FileAdvertisement>> {
        let mut results: Vec<FileAdvertisement> = self
            .store
            .search_advertisements(filename_filter, owner_filter)
            .await?
            .into_iter()
            .filter(|ad| live_usernames.contains(&ad.owner))
            .collect();

        results.sort_by(|a, b| a.filename.cmp(&b.filename).then_with(|| a.owner.cmp(&b.owner)));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::store::MemoryStore;
    use crate::utils::ManualClock;

    fn index() -> FileIndex {
        FileIndex::new(Arc::new(MemoryStore::new()), Arc::new(ManualClock::default()))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn live(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_replace_drops_previous_set() {
        let index = index();
        index
            .replace_advertisements("alice", &names(&["a.txt", "b.txt"]), addr(7001))
            .await
            .unwrap();
        index
            .replace_advertisements("alice", &names(&["b.txt", "c.txt", "c.txt"]), addr(7002))
            .await
            .unwrap();

        let found = index.search("", "", &live(&["alice"])).await.unwrap();
        let filenames: Vec<&str> = found.iter().map(|ad| ad.filename.as_str()).collect();
        assert_eq!(filenames, vec!["b.txt", "c.txt"]);
        assert!(found.iter().all(|ad| ad.address == addr(7002) && ad.owner == "alice"));
    }

    #[tokio::test]
    async fn test_empty_publish_clears() {
        let index = index();
        index
            .replace_advertisements("alice", &names(&["a.txt"]), addr(7001))
            .await
            .unwrap();
        index.replace_advertisements("alice", &[], addr(7001)).await.unwrap();
        assert!(index.search("", "", &live(&["alice"])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_filters() {
        let index = index();
        index
            .replace_advertisements("alice", &names(&["notes.txt", "Photo.png"]), addr(7001))
            .await
            .unwrap();
        index
            .replace_advertisements("bob", &names(&["notes.txt", "song.mp3"]), addr(7002))
            .await
            .unwrap();
        let everyone = live(&["alice", "bob"]);

        let found = index.search("note", "", &everyone).await.unwrap();
        let owners: Vec<&str> = found.iter().map(|ad| ad.owner.as_str()).collect();
        assert_eq!(owners, vec!["alice", "bob"]);

        assert!(index.search("photo", "", &everyone).await.unwrap().is_empty());
        assert_eq!(index.search("Photo", "", &everyone).await.unwrap().len(), 1);
        assert_eq!(index.search("", "bo", &everyone).await.unwrap().len(), 2);
        assert_eq!(index.search("", "", &everyone).await.unwrap().len(), 4);

        // Only live owners are visible.
        let found = index.search("", "", &live(&["bob"])).await.unwrap();
        assert!(found.iter().all(|ad| ad.owner == "bob"));
        assert!(index.search("", "", &HashSet::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_all() {
        let index = index();
        index
            .replace_advertisements("alice", &names(&["a", "b"]), addr(7001))
            .await
            .unwrap();
        assert_eq!(index.remove_all("alice").await.unwrap(), 2);
        assert_eq!(index.remove_all("alice").await.unwrap(), 0);
    }
}

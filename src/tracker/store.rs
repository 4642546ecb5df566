//! Backing stores for the tracker's peer table and file-advertisement table.
//!
//! The tracker owns one `Arc<dyn TrackerStore>`. [`MemoryStore`] keeps
//! everything in process; [`SqliteStore`] persists both tables so a restarted
//! tracker comes back with the same peers and advertisements.

use async_trait::async_trait;
use log::{debug, info};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::RwLock;

use crate::core::{FileAdvertisement, PeerRecord};
use crate::utils::clock::{from_millis, to_millis};
use crate::utils::{Credential, P2PError, Result};

#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// Fails with `Conflict` if the username is taken.
    async fn insert_peer(&self, peer: &PeerRecord) -> Result<()>;
    async fn get_peer(&self, username: &str) -> Result<Option<PeerRecord>>;
    /// Returns `false` if no such peer exists.
    async fn update_peer(&self, peer: &PeerRecord) -> Result<bool>;
    /// Returns `false` if no such peer existed.
    async fn delete_peer(&self, username: &str) -> Result<bool>;
    async fn list_peers(&self) -> Result<Vec<PeerRecord>>;

    /// Swap the owner's whole advertisement set in one step.
    async fn replace_advertisements(
        &self,
        username: &str,
        advertisements: Vec<FileAdvertisement>,
    ) -> Result<()>;
    /// Returns how many advertisements were dropped.
    async fn remove_advertisements(&self, username: &str) -> Result<usize>;
    /// Case-sensitive substring match on filename and owner; empty matches all.
    async fn search_advertisements(
        &self,
        filename_filter: &str,
        owner_filter: &str,
    ) -> Result<Vec<FileAdvertisement>>;
}

#[derive(Default)]
pub struct MemoryStore {
    peers: RwLock<HashMap<String, PeerRecord>>,
    files: RwLock<HashMap<String, Vec<FileAdvertisement>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackerStore for MemoryStore {
    async fn insert_peer(&self, peer: &PeerRecord) -> Result<()> {
        let mut peers = self.peers.write().await;
        if peers.contains_key(&peer.username) {
            return Err(P2PError::Conflict(peer.username.clone()));
        }
        peers.insert(peer.username.clone(), peer.clone());
        Ok(())
    }

    async fn get_peer(&self, username: &str) -> Result<Option<PeerRecord>> {
        Ok(self.peers.read().await.get(username).cloned())
    }

    async fn update_peer(&self, peer: &PeerRecord) -> Result<bool> {
        let mut peers = self.peers.write().await;
        match peers.get_mut(&peer.username) {
            Some(existing) => {
                *existing = peer.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_peer(&self, username: &str) -> Result<bool> {
        Ok(self.peers.write().await.remove(username).is_some())
    }

    async fn list_peers(&self) -> Result<Vec<PeerRecord>> {
        Ok(self.peers.read().await.values().cloned().collect())
    }

    async fn replace_advertisements(
        &self,
        username: &str,
        advertisements: Vec<FileAdvertisement>,
    ) -> Result<()> {
        let mut files = self.files.write().await;
        if advertisements.is_empty() {
            files.remove(username);
        } else {
            files.insert(username.to_string(), advertisements);
        }
        Ok(())
    }

    async fn remove_advertisements(&self, username: &str) -> Result<usize> {
        Ok(self
            .files
            .write()
            .await
            .remove(username)
            .map(|ads| ads.len())
            .unwrap_or(0))
    }

    async fn search_advertisements(
        &self,
        filename_filter: &str,
        owner_filter: &str,
    ) -> Result<Vec<FileAdvertisement>> {
        let files = self.files.read().await;
        Ok(files
            .values()
            .flatten()
            .filter(|ad| ad.matches(filename_filter, owner_filter))
            .cloned()
            .collect())
    }
}

/// SQLite-backed store. One connection, used from the blocking pool so
/// queries never stall the runtime's worker threads.
pub struct SqliteStore {
    conn: Arc<StdMutex<Connection>>,
}

type PeerRow = (String, String, String, i64, i64, i64);
type FileRow = (String, String, String, i64, i64);

const PEER_COLUMNS: &str = "username, credential, ip, port, last_seen, last_heartbeat";

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!("Opened tracker database at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS peers (
                username TEXT PRIMARY KEY,
                credential TEXT NOT NULL,
                ip TEXT NOT NULL,
                port INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                last_heartbeat INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                username TEXT NOT NULL,
                peer_ip TEXT NOT NULL,
                peer_port INTEGER NOT NULL,
                shared_time INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_files_username ON files(username);",
        )?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut *conn)
        })
        .await
        .map_err(|e| P2PError::Internal(format!("Database task failed: {}", e)))?
    }

    fn peer_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeerRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn peer_from_row(row: PeerRow) -> Result<PeerRecord> {
        let (username, credential, ip, port, last_seen, last_heartbeat) = row;
        let credential = Credential::decode(&credential).ok_or_else(|| {
            P2PError::StorageError(format!("Corrupt credential for {}", username))
        })?;
        Ok(PeerRecord {
            address: parse_address(&ip, port)?,
            username,
            credential,
            last_seen: from_millis(last_seen),
            last_heartbeat: from_millis(last_heartbeat),
        })
    }

    fn advertisement_from_row(row: FileRow) -> Result<FileAdvertisement> {
        let (filename, owner, ip, port, shared_time) = row;
        Ok(FileAdvertisement {
            address: parse_address(&ip, port)?,
            filename,
            owner,
            shared_time: from_millis(shared_time),
        })
    }
}

fn parse_address(ip: &str, port: i64) -> Result<SocketAddr> {
    let ip: IpAddr = ip
        .parse()
        .map_err(|e| P2PError::StorageError(format!("Corrupt ip '{}': {}", ip, e)))?;
    let port = u16::try_from(port)
        .map_err(|_| P2PError::StorageError(format!("Corrupt port {}", port)))?;
    Ok(SocketAddr::new(ip, port))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

#[async_trait]
impl TrackerStore for SqliteStore {
    async fn insert_peer(&self, peer: &PeerRecord) -> Result<()> {
        let peer = peer.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                &format!("INSERT INTO peers ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)", PEER_COLUMNS),
                params![
                    peer.username,
                    peer.credential.encode(),
                    peer.address.ip().to_string(),
                    peer.address.port(),
                    to_millis(peer.last_seen),
                    to_millis(peer.last_heartbeat),
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(P2PError::Conflict(peer.username)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_peer(&self, username: &str) -> Result<Option<PeerRecord>> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM peers WHERE username = ?1", PEER_COLUMNS),
                    params![username],
                    Self::peer_row,
                )
                .optional()?;
            row.map(Self::peer_from_row).transpose()
        })
        .await
    }

    async fn update_peer(&self, peer: &PeerRecord) -> Result<bool> {
        let peer = peer.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE peers SET credential = ?2, ip = ?3, port = ?4, last_seen = ?5, last_heartbeat = ?6
                 WHERE username = ?1",
                params![
                    peer.username,
                    peer.credential.encode(),
                    peer.address.ip().to_string(),
                    peer.address.port(),
                    to_millis(peer.last_seen),
                    to_millis(peer.last_heartbeat),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_peer(&self, username: &str) -> Result<bool> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute("DELETE FROM peers WHERE username = ?1", params![username])?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list_peers(&self) -> Result<Vec<PeerRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM peers", PEER_COLUMNS))?;
            let rows = stmt
                .query_map([], Self::peer_row)?
                .collect::<rusqlite::Result<Vec<PeerRow>>>()?;
            rows.into_iter().map(Self::peer_from_row).collect()
        })
        .await
    }

    async fn replace_advertisements(
        &self,
        username: &str,
        advertisements: Vec<FileAdvertisement>,
    ) -> Result<()> {
        let owner = username.to_string();
        let stored = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM files WHERE username = ?1", params![owner])?;
                {
                    let mut insert = tx.prepare(
                        "INSERT INTO files (filename, username, peer_ip, peer_port, shared_time)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?;
                    for ad in &advertisements {
                        insert.execute(params![
                            ad.filename,
                            owner,
                            ad.address.ip().to_string(),
                            ad.address.port(),
                            to_millis(ad.shared_time),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(advertisements.len())
            })
            .await?;
        debug!("Stored {} advertisements for {}", stored, username);
        Ok(())
    }

    async fn remove_advertisements(&self, username: &str) -> Result<usize> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM files WHERE username = ?1", params![username])?)
        })
        .await
    }

    async fn search_advertisements(
        &self,
        filename_filter: &str,
        owner_filter: &str,
    ) -> Result<Vec<FileAdvertisement>> {
        let filename_filter = filename_filter.to_string();
        let owner_filter = owner_filter.to_string();
        self.with_conn(move |conn| {
            // instr() keeps the match case-sensitive, unlike LIKE.
            let mut stmt = conn.prepare(
                "SELECT filename, username, peer_ip, peer_port, shared_time FROM files
                 WHERE (?1 = '' OR instr(filename, ?1) > 0)
                   AND (?2 = '' OR instr(username, ?2) > 0)
                 ORDER BY filename, username, id",
            )?;
            let rows = stmt
                .query_map(params![filename_filter, owner_filter], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<FileRow>>>()?;
            rows.into_iter().map(Self::advertisement_from_row).collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{Clock, ManualClock};

    fn peer(name: &str, port: u16, clock: &ManualClock) -> PeerRecord {
        PeerRecord::new(
            name.to_string(),
            Credential::hash("pw"),
            SocketAddr::from(([127, 0, 0, 1], port)),
            clock.now(),
        )
    }

    fn ads(owner: &str, port: u16, names: &[&str], clock: &ManualClock) -> Vec<FileAdvertisement> {
        names
            .iter()
            .map(|name| FileAdvertisement {
                filename: name.to_string(),
                owner: owner.to_string(),
                address: SocketAddr::from(([127, 0, 0, 1], port)),
                shared_time: clock.now(),
            })
            .collect()
    }

    async fn exercise_store(store: Arc<dyn TrackerStore>) {
        let clock = ManualClock::default();
        let alice = peer("alice", 7001, &clock);

        store.insert_peer(&alice).await.unwrap();
        assert!(matches!(
            store.insert_peer(&alice).await,
            Err(P2PError::Conflict(_))
        ));
        assert_eq!(store.get_peer("alice").await.unwrap(), Some(alice.clone()));
        assert_eq!(store.get_peer("nobody").await.unwrap(), None);

        let mut moved = alice.clone();
        moved.address = SocketAddr::from(([10, 0, 0, 2], 7100));
        assert!(store.update_peer(&moved).await.unwrap());
        assert_eq!(store.get_peer("alice").await.unwrap().unwrap().address, moved.address);
        assert!(!store.update_peer(&peer("ghost", 1, &clock)).await.unwrap());

        store
            .replace_advertisements("alice", ads("alice", 7001, &["a.txt", "b.txt"], &clock))
            .await
            .unwrap();
        store
            .replace_advertisements("alice", ads("alice", 7001, &["c.txt"], &clock))
            .await
            .unwrap();
        let found = store.search_advertisements("", "").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].filename, "c.txt");

        assert_eq!(store.search_advertisements("C", "").await.unwrap().len(), 0);
        assert_eq!(store.search_advertisements("c.", "lic").await.unwrap().len(), 1);

        assert_eq!(store.remove_advertisements("alice").await.unwrap(), 1);
        assert_eq!(store.remove_advertisements("alice").await.unwrap(), 0);
        assert!(store.delete_peer("alice").await.unwrap());
        assert!(!store.delete_peer("alice").await.unwrap());
        assert!(store.list_peers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise_store(Arc::new(MemoryStore::new())).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        exercise_store(Arc::new(SqliteStore::in_memory().unwrap())).await;
    }

    #[tokio::test]
    async fn test_sqlite_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker").join("p2p.db");
        let clock = ManualClock::default();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_peer(&peer("alice", 7001, &clock)).await.unwrap();
            store
                .replace_advertisements("alice", ads("alice", 7001, &["notes.txt"], &clock))
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let alice = reopened.get_peer("alice").await.unwrap().unwrap();
        assert!(alice.credential.verify("pw"));
        assert_eq!(alice.last_heartbeat, clock.now());

        let files = reopened.search_advertisements("notes", "").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].address, SocketAddr::from(([127, 0, 0, 1], 7001)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sqlite_concurrent_callers() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let clock = ManualClock::default();

        let mut tasks = Vec::new();
        for i in 0..16u16 {
            let store = store.clone();
            let record = peer(&format!("peer{}", i), 7000 + i, &clock);
            let files = ads(&record.username, 7000 + i, &["shared.txt"], &clock);
            tasks.push(tokio::spawn(async move {
                store.insert_peer(&record).await.unwrap();
                store
                    .replace_advertisements(&record.username, files)
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.list_peers().await.unwrap().len(), 16);
        assert_eq!(store.search_advertisements("shared", "").await.unwrap().len(), 16);
    }
}

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};

use zeta_common::{RunnerContainerInfo, RunnerImageInfo, ZetaError, ZetaMetadata};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS zeta_runner_image(
        id                  TEXT PRIMARY KEY NOT NULL,
        tag                 TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS zeta_runner_container(
        id                  TEXT PRIMARY KEY NOT NULL,
        name                TEXT NOT NULL,
        port                INTEGER DEFAULT 8000,
        host_port           INTEGER NOT NULL,
        host_ip             TEXT NOT NULL,
        last_heartbeat      INTEGER DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS zeta_function(
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        name                TEXT NOT NULL UNIQUE,
        created_at          INTEGER NOT NULL,
        runner_image_id     REFERENCES zeta_runner_image(id) NOT NULL,
        runner_container_id REFERENCES zeta_runner_container(id)
    );
";

const JOINED_SELECT: &str = "
    SELECT
        zf.name,
        zf.created_at,
        zri.id   AS runner_image_id,
        zri.tag  AS runner_image_tag,
        zrc.id   AS runner_container_id,
        zrc.name AS runner_container_name,
        zrc.port AS runner_container_port,
        zrc.host_port,
        zrc.host_ip,
        zrc.last_heartbeat
    FROM zeta_function zf
    JOIN zeta_runner_image zri ON zf.runner_image_id = zri.id
    LEFT JOIN zeta_runner_container zrc ON zf.runner_container_id = zrc.id
";

fn store_err(e: rusqlite::Error) -> ZetaError {
    ZetaError::Store(e.to_string())
}

/// Durable registry of functions, runner images and runner containers.
///
/// This is the single piece of state that survives a restart; everything
/// else (ports, locks, live containers) is rebuilt or reconciled against
/// the engine. Compound operations run as one transaction.
pub struct MetaStore {
    db: Mutex<Connection>,
}

impl MetaStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, ZetaError> {
        let conn = Connection::open(path).map_err(store_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        tracing::info!(db = %path.display(), "metadata store ready");
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ZetaError> {
        self.db
            .lock()
            .map_err(|_| ZetaError::Store("metadata store lock poisoned".to_string()))
    }

    /// Register a function together with its freshly built runner image.
    pub fn insert_function(
        &self,
        name: &str,
        created_at: i64,
        image: &RunnerImageInfo,
    ) -> Result<(), ZetaError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        tx.execute(
            "INSERT INTO zeta_runner_image (id, tag) VALUES (?1, ?2)",
            params![image.image_id, image.tag],
        )
        .map_err(store_err)?;
        tx.execute(
            "INSERT INTO zeta_function (name, created_at, runner_image_id) VALUES (?1, ?2, ?3)",
            params![name, created_at, image.image_id],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)
    }

    /// Record a started runner container and link it to its function.
    pub fn insert_container(
        &self,
        function_name: &str,
        container_id: &str,
        container_name: &str,
        host_port: u16,
        host_ip: &str,
    ) -> Result<(), ZetaError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        tx.execute(
            "INSERT INTO zeta_runner_container (id, name, host_port, host_ip) VALUES (?1, ?2, ?3, ?4)",
            params![container_id, container_name, host_port, host_ip],
        )
        .map_err(store_err)?;
        let linked = tx
            .execute(
                "UPDATE zeta_function SET runner_container_id = ?1 WHERE name = ?2",
                params![container_id, function_name],
            )
            .map_err(store_err)?;
        if linked == 0 {
            return Err(ZetaError::Store(format!(
                "no registered function '{function_name}' to link container {container_id} to"
            )));
        }
        tx.commit().map_err(store_err)
    }

    /// Record a heartbeat. Runners report short container ids, so the match
    /// is by id prefix. Returns false when no row matched (the container may
    /// have just been reaped); `last_heartbeat` never moves backwards.
    pub fn update_heartbeat(
        &self,
        container_id_prefix: &str,
        timestamp: i64,
    ) -> Result<bool, ZetaError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE zeta_runner_container
                 SET last_heartbeat = MAX(last_heartbeat, ?1)
                 WHERE id LIKE ?2 || '%'",
                params![timestamp, container_id_prefix],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }

    /// Unlink and delete the function's container row, returning what was
    /// deleted so the caller can release the port it held.
    pub fn delete_container_of_function(
        &self,
        function_name: &str,
    ) -> Result<Option<RunnerContainerInfo>, ZetaError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        let existing = tx
            .query_row(
                "SELECT zrc.id, zrc.name, zrc.port, zrc.host_port, zrc.host_ip, zrc.last_heartbeat
                 FROM zeta_function zf
                 JOIN zeta_runner_container zrc ON zf.runner_container_id = zrc.id
                 WHERE zf.name = ?1",
                params![function_name],
                container_from_row,
            )
            .optional()
            .map_err(store_err)?;
        let Some(container) = existing else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE zeta_function SET runner_container_id = NULL WHERE name = ?1",
            params![function_name],
        )
        .map_err(store_err)?;
        tx.execute(
            "DELETE FROM zeta_runner_container WHERE id = ?1",
            params![container.container_id],
        )
        .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(Some(container))
    }

    /// Delete the function row and its image row. A no-op for unknown names.
    pub fn delete_function(&self, name: &str) -> Result<(), ZetaError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        let image_id: Option<String> = tx
            .query_row(
                "SELECT runner_image_id FROM zeta_function WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err)?;
        tx.execute("DELETE FROM zeta_function WHERE name = ?1", params![name])
            .map_err(store_err)?;
        if let Some(image_id) = image_id {
            tx.execute(
                "DELETE FROM zeta_runner_image WHERE id = ?1",
                params![image_id],
            )
            .map_err(store_err)?;
        }
        tx.commit().map_err(store_err)
    }

    /// All registered functions with their image and (optional) container.
    pub fn fetch_all(&self) -> Result<Vec<ZetaMetadata>, ZetaError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(JOINED_SELECT).map_err(store_err)?;
        let rows = stmt
            .query_map([], metadata_from_row)
            .map_err(store_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(rows)
    }

    pub fn fetch_by_name(&self, name: &str) -> Result<Option<ZetaMetadata>, ZetaError> {
        let conn = self.conn()?;
        let query = format!("{JOINED_SELECT} WHERE zf.name = ?1");
        conn.query_row(&query, params![name], metadata_from_row)
            .optional()
            .map_err(store_err)
    }
}

fn container_from_row(row: &Row<'_>) -> rusqlite::Result<RunnerContainerInfo> {
    Ok(RunnerContainerInfo {
        container_id: row.get(0)?,
        container_name: row.get(1)?,
        container_port: row.get(2)?,
        host_port: row.get(3)?,
        host_ip: row.get(4)?,
        last_heartbeat: row.get(5)?,
    })
}

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<ZetaMetadata> {
    let container_id: Option<String> = row.get("runner_container_id")?;
    let runner_container = match container_id {
        Some(container_id) => Some(RunnerContainerInfo {
            container_id,
            container_name: row.get("runner_container_name")?,
            container_port: row.get("runner_container_port")?,
            host_port: row.get("host_port")?,
            host_ip: row.get("host_ip")?,
            last_heartbeat: row.get("last_heartbeat")?,
        }),
        None => None,
    };
    Ok(ZetaMetadata {
        zeta_name: row.get("name")?,
        created_at: row.get("created_at")?,
        runner_image: RunnerImageInfo {
            image_id: row.get("runner_image_id")?,
            tag: row.get("runner_image_tag")?,
        },
        runner_container,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, MetaStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = MetaStore::open(&dir.path().join("zeta.db")).unwrap();
        (dir, store)
    }

    fn image(n: u32) -> RunnerImageInfo {
        RunnerImageInfo {
            image_id: format!("sha256:img{n}"),
            tag: format!("echo-runner-image-{n}"),
        }
    }

    #[test]
    fn test_insert_and_fetch_function() {
        let (_dir, store) = open_store();
        store.insert_function("echo", 1_700_000_000, &image(1)).unwrap();

        let meta = store.fetch_by_name("echo").unwrap().unwrap();
        assert_eq!(meta.zeta_name, "echo");
        assert_eq!(meta.created_at, 1_700_000_000);
        assert_eq!(meta.runner_image.image_id, "sha256:img1");
        assert!(meta.runner_container.is_none());

        assert!(store.fetch_by_name("missing").unwrap().is_none());
        assert_eq!(store.fetch_all().unwrap().len(), 1);
    }

    #[test]
    fn test_insert_container_links_function() {
        let (_dir, store) = open_store();
        store.insert_function("echo", 0, &image(1)).unwrap();
        store
            .insert_container("echo", "cafebabe1234", "echo", 9090, "127.0.0.1")
            .unwrap();

        let container = store
            .fetch_by_name("echo")
            .unwrap()
            .unwrap()
            .runner_container
            .unwrap();
        assert_eq!(container.container_id, "cafebabe1234");
        assert_eq!(container.container_name, "echo");
        assert_eq!(container.container_port, 8000);
        assert_eq!(container.host_port, 9090);
        assert_eq!(container.last_heartbeat, 0);
    }

    #[test]
    fn test_insert_container_without_function_fails() {
        let (_dir, store) = open_store();
        let result = store.insert_container("ghost", "id1", "ghost", 9090, "127.0.0.1");
        assert!(result.is_err());
        // the transaction must not leave the container row behind
        assert!(store.fetch_all().unwrap().is_empty());
    }

    #[test]
    fn test_update_heartbeat_matches_id_prefix() {
        let (_dir, store) = open_store();
        store.insert_function("echo", 0, &image(1)).unwrap();
        store
            .insert_container("echo", "cafebabe1234deadbeef", "echo", 9090, "127.0.0.1")
            .unwrap();

        // runners report the short id
        assert!(store.update_heartbeat("cafebabe1234", 100).unwrap());
        let container = store
            .fetch_by_name("echo")
            .unwrap()
            .unwrap()
            .runner_container
            .unwrap();
        assert_eq!(container.last_heartbeat, 100);
    }

    #[test]
    fn test_update_heartbeat_is_monotonic() {
        let (_dir, store) = open_store();
        store.insert_function("echo", 0, &image(1)).unwrap();
        store
            .insert_container("echo", "cafebabe", "echo", 9090, "127.0.0.1")
            .unwrap();

        assert!(store.update_heartbeat("cafebabe", 200).unwrap());
        assert!(store.update_heartbeat("cafebabe", 150).unwrap());
        let container = store
            .fetch_by_name("echo")
            .unwrap()
            .unwrap()
            .runner_container
            .unwrap();
        assert_eq!(container.last_heartbeat, 200);
    }

    #[test]
    fn test_update_heartbeat_is_noop_without_matching_row() {
        let (_dir, store) = open_store();
        assert!(!store.update_heartbeat("cafebabe", 100).unwrap());
    }

    #[test]
    fn test_delete_container_unlinks_function() {
        let (_dir, store) = open_store();
        store.insert_function("echo", 0, &image(1)).unwrap();
        store
            .insert_container("echo", "cafebabe", "echo", 9090, "127.0.0.1")
            .unwrap();

        let deleted = store.delete_container_of_function("echo").unwrap().unwrap();
        assert_eq!(deleted.host_port, 9090);

        let meta = store.fetch_by_name("echo").unwrap().unwrap();
        assert!(meta.runner_container.is_none());

        // second delete is a no-op
        assert!(store.delete_container_of_function("echo").unwrap().is_none());
    }

    #[test]
    fn test_delete_function_removes_image_row() {
        let (_dir, store) = open_store();
        store.insert_function("echo", 0, &image(1)).unwrap();
        store.delete_function("echo").unwrap();
        assert!(store.fetch_by_name("echo").unwrap().is_none());

        // the image id is free for reuse after deletion
        store.insert_function("echo", 1, &image(1)).unwrap();
        assert_eq!(store.fetch_all().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_function_is_idempotent() {
        let (_dir, store) = open_store();
        store.delete_function("never-existed").unwrap();
    }
}

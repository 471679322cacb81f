//! Incident snapshot storage: write-once rows, read by timestamp range,
//! deleted only in bulk.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{map_sqlite_err, Store};
use crate::error::Result;

/// A stored incident snapshot. `image` is the raw JPEG bytes; callers that
/// need it on the wire base64-encode it themselves (see `codec`).
#[derive(Debug, Clone)]
pub struct Detection {
    pub image: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Store {
    pub fn insert_detection(&self, image: &[u8], captured_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO detections (image, timestamp) VALUES (?1, ?2)",
            params![image, captured_at.to_rfc3339()],
        )
        .map_err(map_sqlite_err)?;
        Ok(())
    }

    /// Detections with `captured_at` in `[start, end]`, ordered ascending.
    pub fn select_detections_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Detection>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT image, timestamp FROM detections \
                 WHERE timestamp >= ?1 AND timestamp <= ?2 \
                 ORDER BY timestamp ASC",
            )
            .map_err(map_sqlite_err)?;

        let rows = stmt
            .query_map(params![start.to_rfc3339(), end.to_rfc3339()], |row| {
                let image: Vec<u8> = row.get(0)?;
                let ts: String = row.get(1)?;
                Ok((image, ts))
            })
            .map_err(map_sqlite_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (image, ts) = row.map_err(map_sqlite_err)?;
            let captured_at = DateTime::parse_from_rfc3339(&ts)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            out.push(Detection { image, captured_at });
        }
        Ok(out)
    }

    pub fn delete_all_detections(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM detections", [])
            .map_err(map_sqlite_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn insert_and_range_select_orders_ascending() {
        let store = Store::open_in_memory().unwrap();
        let t0 = Utc::now();
        store.insert_detection(b"frame-1", t0).unwrap();
        store.insert_detection(b"frame-2", t0 + Duration::seconds(5)).unwrap();

        let results = store
            .select_detections_between(t0 - Duration::seconds(1), t0 + Duration::seconds(10))
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].image, b"frame-1");
        assert_eq!(results[1].image, b"frame-2");
    }

    #[test]
    fn delete_all_empties_table() {
        let store = Store::open_in_memory().unwrap();
        store.insert_detection(b"x", Utc::now()).unwrap();
        store.delete_all_detections().unwrap();
        let results = store
            .select_detections_between(Utc::now() - Duration::days(1), Utc::now() + Duration::days(1))
            .unwrap();
        assert!(results.is_empty());
    }
}

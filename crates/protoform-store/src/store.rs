//! The generation record store

use crate::schema::{self, RECORD_COLUMNS};
use crate::search::{keywords, like_pattern, register_case_folding};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use protoform_core::{
    now_utc, EditEntry, FieldChange, GenerationRecord, NewRecord, ProtoformError, RecordId,
    RecordMetadata, Result,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Metadata keys owned by the record itself; free-form values may not
/// shadow them
const RESERVED_METADATA_KEYS: [&str; 2] = ["edit_history", "tags"];

/// Aggregate counts over all stored records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total: usize,
    pub complete: usize,
    pub image_only: usize,
    pub incomplete: usize,
}

/// SQLite-backed store of generation records.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct GenerationStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl GenerationStore {
    /// Open (or create) a store at the given database path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path).map_err(|e| {
            ProtoformError::StoreWriteFailed(format!("cannot open {}: {}", path.display(), e))
        })?;
        schema::migrate(&conn, true).map_err(write_err)?;
        register_case_folding(&conn).map_err(write_err)?;
        tracing::debug!(path = %path.display(), "Opened generation store");

        Ok(Self {
            path: Some(path),
            conn: Mutex::new(conn),
        })
    }

    /// A throwaway store (for tests and dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(write_err)?;
        schema::migrate(&conn, false).map_err(write_err)?;
        register_case_folding(&conn).map_err(write_err)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Database file location, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert a record and return its newly assigned id. `created_at` is
    /// stored to the millisecond.
    pub fn create(&self, record: &NewRecord) -> Result<RecordId> {
        record.validate()?;
        let metadata = serde_json::to_string(&record.metadata)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO generations (prompt, enhanced_prompt, image_path, model_path, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.prompt,
                record.enhanced_prompt,
                record.image_path,
                record.model_path,
                format_timestamp(&record.created_at.trunc_subsecs(3)),
                metadata,
            ],
        )
        .map_err(write_err)?;

        let id = RecordId::from_raw(conn.last_insert_rowid());
        tracing::debug!(%id, "Created generation record");
        Ok(id)
    }

    pub fn get(&self, id: RecordId) -> Result<GenerationRecord> {
        let conn = self.lock()?;
        fetch(&conn, id)?.ok_or(ProtoformError::NotFound(id))
    }

    /// Apply field changes, appending one edit-history entry per change.
    ///
    /// History entries and field writes land in the same transaction; a
    /// failed write leaves the record untouched.
    pub fn update(&self, id: RecordId, changes: &[FieldChange]) -> Result<GenerationRecord> {
        self.update_with_metadata(id, changes, |_| {})
    }

    /// Merge free-form metadata values (hashes, notes) without touching
    /// fields or edit history
    pub fn annotate<F>(&self, id: RecordId, f: F) -> Result<GenerationRecord>
    where
        F: FnOnce(&mut serde_json::Map<String, serde_json::Value>),
    {
        self.update_with_metadata(id, &[], f)
    }

    /// Field changes and free-form metadata in one transaction: either both
    /// land or neither does.
    ///
    /// `f` sees the metadata after the changes are applied. Keys it writes
    /// over `edit_history` or `tags` are dropped.
    pub fn update_with_metadata<F>(
        &self,
        id: RecordId,
        changes: &[FieldChange],
        f: F,
    ) -> Result<GenerationRecord>
    where
        F: FnOnce(&mut serde_json::Map<String, serde_json::Value>),
    {
        for change in changes {
            change.validate()?;
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(write_err)?;
        let mut record = fetch(&tx, id)?.ok_or(ProtoformError::NotFound(id))?;

        let at = now_utc();
        for change in changes {
            record.apply_change(change.clone(), at);
        }
        f(&mut record.metadata.extra);
        for key in RESERVED_METADATA_KEYS {
            if record.metadata.extra.remove(key).is_some() {
                tracing::warn!(%id, key, "Ignoring free-form metadata under a reserved key");
            }
        }
        write_record(&tx, &record)?;
        tx.commit().map_err(write_err)?;

        tracing::debug!(%id, changes = changes.len(), "Updated generation record");
        Ok(record)
    }

    /// Case-insensitive substring search over prompt and enhanced prompt,
    /// most recent first. A blank query matches everything.
    pub fn search(&self, query: &str) -> Result<Vec<GenerationRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM generations
             WHERE fold_case(prompt) LIKE ?1 ESCAPE '\\'
                OR fold_case(coalesce(enhanced_prompt, '')) LIKE ?1 ESCAPE '\\'
             ORDER BY created_at DESC, id DESC"
        );
        self.query_records(&sql, params![like_pattern(query.trim())])
    }

    /// A page of records, most recent first
    pub fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<GenerationRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM generations
             ORDER BY created_at DESC, id DESC
             LIMIT ?1 OFFSET ?2"
        );
        self.query_records(&sql, params![to_sql_count(limit), to_sql_count(offset)])
    }

    /// Remove a record, returning what was removed. Files the record points
    /// at are left alone.
    pub fn delete(&self, id: RecordId) -> Result<GenerationRecord> {
        let conn = self.lock()?;
        let record = fetch(&conn, id)?.ok_or(ProtoformError::NotFound(id))?;
        conn.execute("DELETE FROM generations WHERE id = ?1", params![id.raw()])
            .map_err(write_err)?;
        tracing::info!(%id, "Deleted generation record");
        Ok(record)
    }

    /// Remove every record, returning them
    pub fn clear(&self) -> Result<Vec<GenerationRecord>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(write_err)?;
        let removed = {
            let sql = format!("SELECT {RECORD_COLUMNS} FROM generations ORDER BY id");
            collect_records(&tx, &sql, [])?
        };
        tx.execute("DELETE FROM generations", []).map_err(write_err)?;
        tx.commit().map_err(write_err)?;
        tracing::info!(removed = removed.len(), "Cleared generation store");
        Ok(removed)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let (total, complete, image_only): (i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN image_path IS NOT NULL AND model_path IS NOT NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN image_path IS NOT NULL AND model_path IS NULL THEN 1 ELSE 0 END), 0)
                 FROM generations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(read_err)?;

        let total = total as usize;
        let complete = complete as usize;
        let image_only = image_only as usize;
        Ok(StoreStats {
            total,
            complete,
            image_only,
            incomplete: total.saturating_sub(complete + image_only),
        })
    }

    /// The stored record sharing the most words with `prompt`, ties broken
    /// by recency
    pub fn latest_context(&self, prompt: &str) -> Result<Option<GenerationRecord>> {
        let words = keywords(prompt);
        if words.is_empty() {
            return Ok(None);
        }

        let score = (1..=words.len())
            .map(|i| format!("(instr(fold_case(prompt), ?{}) > 0)", i))
            .collect::<Vec<_>>()
            .join(" + ");
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM (
                SELECT *, {score} AS match_count FROM generations
             )
             WHERE match_count > 0
             ORDER BY match_count DESC, created_at DESC, id DESC
             LIMIT 1"
        );

        let mut found = self.query_records(&sql, params_from_iter(words.iter()))?;
        Ok(found.pop())
    }

    /// Edit history of a record, oldest first
    pub fn edit_history(&self, id: RecordId) -> Result<Vec<EditEntry>> {
        Ok(self.get(id)?.metadata.edit_history)
    }

    fn query_records<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<GenerationRecord>> {
        let conn = self.lock()?;
        collect_records(&conn, sql, params)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ProtoformError::StoreWriteFailed("store connection lock poisoned".into()))
    }
}

/// Column values as stored, before timestamp/metadata parsing
struct RawRow {
    id: i64,
    prompt: String,
    enhanced_prompt: Option<String>,
    image_path: Option<String>,
    model_path: Option<String>,
    created_at: String,
    metadata: Option<String>,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        prompt: row.get(1)?,
        enhanced_prompt: row.get(2)?,
        image_path: row.get(3)?,
        model_path: row.get(4)?,
        created_at: row.get(5)?,
        metadata: row.get(6)?,
    })
}

impl RawRow {
    fn into_record(self) -> Result<GenerationRecord> {
        let id = RecordId::from_raw(self.id);
        Ok(GenerationRecord {
            id,
            prompt: self.prompt,
            enhanced_prompt: self.enhanced_prompt,
            image_path: self.image_path,
            model_path: self.model_path,
            created_at: parse_timestamp(&self.created_at)?,
            metadata: parse_metadata(id, self.metadata),
        })
    }
}

fn fetch(conn: &Connection, id: RecordId) -> Result<Option<GenerationRecord>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM generations WHERE id = ?1");
    conn.query_row(&sql, params![id.raw()], read_row)
        .optional()
        .map_err(read_err)?
        .map(RawRow::into_record)
        .transpose()
}

fn collect_records<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<GenerationRecord>> {
    let mut stmt = conn.prepare(sql).map_err(read_err)?;
    let rows = stmt
        .query_map(params, read_row)
        .map_err(read_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(read_err)?;
    rows.into_iter().map(RawRow::into_record).collect()
}

fn write_record(conn: &Connection, record: &GenerationRecord) -> Result<()> {
    let metadata = serde_json::to_string(&record.metadata)?;
    conn.execute(
        "UPDATE generations
         SET prompt = ?1, enhanced_prompt = ?2, image_path = ?3, model_path = ?4, metadata = ?5
         WHERE id = ?6",
        params![
            record.prompt,
            record.enhanced_prompt,
            record.image_path,
            record.model_path,
            metadata,
            record.id.raw(),
        ],
    )
    .map_err(write_err)?;
    Ok(())
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// RFC 3339, or the `YYYY-MM-DD HH:MM:SS` form SQLite's CURRENT_TIMESTAMP writes
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| ProtoformError::StoreReadFailed(format!("bad created_at '{}': {}", raw, e)))
}

/// Metadata that does not fit the current shape is kept verbatim under
/// `legacy_metadata` instead of failing the read.
fn parse_metadata(id: RecordId, raw: Option<String>) -> RecordMetadata {
    let Some(text) = raw else {
        return RecordMetadata::default();
    };

    match serde_json::from_str::<RecordMetadata>(&text) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!(%id, error = %e, "Unrecognised record metadata, keeping it as legacy");
            let mut meta = RecordMetadata::default();
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(value) => meta.set_extra("legacy_metadata", value),
                Err(_) => meta.set_extra("legacy_metadata", text),
            }
            meta
        }
    }
}

fn to_sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn write_err(e: rusqlite::Error) -> ProtoformError {
    ProtoformError::StoreWriteFailed(e.to_string())
}

fn read_err(e: rusqlite::Error) -> ProtoformError {
    ProtoformError::StoreReadFailed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn store() -> GenerationStore {
        GenerationStore::open_in_memory().unwrap()
    }

    /// A record created `age_secs` seconds ago
    fn new_record(prompt: &str, age_secs: i64) -> NewRecord {
        let mut rec = NewRecord::new(prompt);
        rec.created_at = now_utc() - TimeDelta::seconds(age_secs);
        rec
    }

    #[test]
    fn test_create_get_roundtrip() {
        let store = store();
        let mut input = new_record("a glowing dragon on a cliff", 0);
        input.enhanced_prompt = Some("a glowing dragon on a cliff, golden hour".into());
        input.image_path = Some("outputs/images/generated_1.png".into());
        input.metadata = RecordMetadata::with_tags(["dragon", "fantasy"]);
        input.metadata.set_extra("image_hash", "sha256:abc");

        let id = store.create(&input).unwrap();
        let fetched = store.get(id).unwrap();
        assert_eq!(fetched, GenerationRecord::from_new(id, input));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let store = store();
        let err = store.get(RecordId::from_raw(99)).unwrap_err();
        assert!(matches!(err, ProtoformError::NotFound(id) if id.raw() == 99));
    }

    #[test]
    fn test_create_rejects_empty_prompt() {
        let store = store();
        let err = store.create(&NewRecord::new("  ")).unwrap_err();
        assert!(matches!(err, ProtoformError::InvalidInput(_)));
        assert_eq!(store.stats().unwrap().total, 0);
    }

    #[test]
    fn test_update_history_is_append_only() {
        let store = store();
        let id = store.create(&new_record("castle", 0)).unwrap();

        let first = store
            .update(id, &[FieldChange::EnhancedPrompt(Some("castle, misty".into()))])
            .unwrap();
        let snapshot = first.metadata.edit_history.clone();
        assert_eq!(snapshot.len(), 1);

        let changes = [
            FieldChange::ImagePath(Some("a.png".into())),
            FieldChange::ModelPath(Some("a.glb".into())),
            FieldChange::Prompt("castle at night".into()),
            FieldChange::Tags(vec!["night".into()]),
        ];
        for change in &changes {
            store.update(id, std::slice::from_ref(change)).unwrap();
        }

        let history = store.edit_history(id).unwrap();
        assert_eq!(history.len(), snapshot.len() + changes.len());
        assert_eq!(history[0], snapshot[0]);
        assert_eq!(history[3].field, "prompt");
        assert_eq!(history[3].old_value.as_deref(), Some("castle"));

        let record = store.get(id).unwrap();
        assert!(record.is_complete());
        assert_eq!(record.prompt, "castle at night");
        assert_eq!(record.metadata.tags, vec!["night".to_string()]);
    }

    #[test]
    fn test_update_missing_and_invalid() {
        let store = store();
        let err = store
            .update(RecordId::from_raw(5), &[FieldChange::ModelPath(None)])
            .unwrap_err();
        assert!(matches!(err, ProtoformError::NotFound(_)));

        let id = store.create(&new_record("keep me", 0)).unwrap();
        let err = store
            .update(
                id,
                &[
                    FieldChange::ImagePath(Some("x.png".into())),
                    FieldChange::Prompt(String::new()),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, ProtoformError::InvalidInput(_)));

        let record = store.get(id).unwrap();
        assert_eq!(record.image_path, None);
        assert!(record.metadata.edit_history.is_empty());
    }

    #[test]
    fn test_search_is_case_insensitive_and_recent_first() {
        let store = store();
        let old = store.create(&new_record("Sunset over the sea", 30)).unwrap();
        let mut enhanced = new_record("a lighthouse", 20);
        enhanced.enhanced_prompt = Some("a lighthouse under a crimson SUNSET sky".into());
        let mid = store.create(&enhanced).unwrap();
        store.create(&new_record("a forest at dawn", 10)).unwrap();
        let newest = store.create(&new_record("sunset city skyline", 0)).unwrap();

        let results = store.search("sunset").unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newest, mid, old]);
        for r in &results {
            let haystack = format!(
                "{} {}",
                r.prompt.to_lowercase(),
                r.enhanced_prompt.clone().unwrap_or_default().to_lowercase()
            );
            assert!(haystack.contains("sunset"));
        }

        assert!(store.search("volcano").unwrap().is_empty());
    }

    #[test]
    fn test_search_folds_non_ascii_case() {
        let store = store();
        let eclair = store.create(&new_record("Éclair on a plate", 10)).unwrap();
        let mut robot = new_record("a robot", 0);
        robot.enhanced_prompt = Some("ÜBER robot in a neon alley".into());
        let robot = store.create(&robot).unwrap();

        for query in ["Éclair", "éclair", "ÉCLAIR"] {
            let ids: Vec<_> = store.search(query).unwrap().iter().map(|r| r.id).collect();
            assert_eq!(ids, vec![eclair], "query {query}");
        }
        for query in ["über", "ÜBER", "Über"] {
            let ids: Vec<_> = store.search(query).unwrap().iter().map(|r| r.id).collect();
            assert_eq!(ids, vec![robot], "query {query}");
        }

        let found = store.latest_context("ÉCLAIR dessert").unwrap().unwrap();
        assert_eq!(found.id, eclair);
    }

    #[test]
    fn test_search_treats_wildcards_literally() {
        let store = store();
        store.create(&new_record("100% chrome robot", 0)).unwrap();
        store.create(&new_record("1000 robots", 0)).unwrap();
        let results = store.search("100%").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].prompt, "100% chrome robot");
    }

    #[test]
    fn test_list_all_pages() {
        let store = store();
        let ids: Vec<_> = (0..5)
            .map(|i| store.create(&new_record(&format!("prompt {}", i), 50 - i)).unwrap())
            .collect();

        let page1 = store.list_all(2, 0).unwrap();
        let page2 = store.list_all(2, 2).unwrap();
        let page3 = store.list_all(2, 4).unwrap();
        assert_eq!(page1.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);
        assert_eq!(page2.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
        assert_eq!(page3.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[0]]);
        assert!(store.list_all(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_creates_get_distinct_ids() {
        let store = store();
        let (a, b) = std::thread::scope(|s| {
            let ha = s.spawn(|| {
                let mut rec = new_record("a red fox", 0);
                rec.image_path = Some("fox.png".into());
                store.create(&rec).unwrap()
            });
            let hb = s.spawn(|| {
                let mut rec = new_record("a blue whale", 0);
                rec.image_path = Some("whale.png".into());
                store.create(&rec).unwrap()
            });
            (ha.join().unwrap(), hb.join().unwrap())
        });

        assert_ne!(a, b);
        let fox = store.get(a).unwrap();
        let whale = store.get(b).unwrap();
        assert_eq!(fox.prompt, "a red fox");
        assert_eq!(fox.image_path.as_deref(), Some("fox.png"));
        assert_eq!(whale.prompt, "a blue whale");
        assert_eq!(whale.image_path.as_deref(), Some("whale.png"));
    }

    #[test]
    fn test_delete_does_not_reuse_ids() {
        let store = store();
        let first = store.create(&new_record("first", 0)).unwrap();
        let removed = store.delete(first).unwrap();
        assert_eq!(removed.prompt, "first");
        assert!(matches!(store.get(first), Err(ProtoformError::NotFound(_))));
        assert!(matches!(store.delete(first), Err(ProtoformError::NotFound(_))));

        let second = store.create(&new_record("second", 0)).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_clear_and_stats() {
        let store = store();
        let mut complete = new_record("complete", 0);
        complete.image_path = Some("c.png".into());
        complete.model_path = Some("c.glb".into());
        let mut image_only = new_record("image only", 0);
        image_only.image_path = Some("i.png".into());
        store.create(&complete).unwrap();
        store.create(&image_only).unwrap();
        store.create(&new_record("nothing yet", 0)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(
            stats,
            StoreStats {
                total: 3,
                complete: 1,
                image_only: 1,
                incomplete: 1
            }
        );

        let removed = store.clear().unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn test_latest_context_ranks_by_overlap_then_recency() {
        let store = store();
        store.create(&new_record("a dragon", 30)).unwrap();
        let best = store.create(&new_record("a glowing dragon at night", 20)).unwrap();
        store.create(&new_record("a quiet harbor", 0)).unwrap();

        let found = store.latest_context("glowing dragon").unwrap().unwrap();
        assert_eq!(found.id, best);

        let newer = store.create(&new_record("dragon glowing in a cave", 5)).unwrap();
        let found = store.latest_context("glowing dragon").unwrap().unwrap();
        assert_eq!(found.id, newer);

        assert!(store.latest_context("submarine").unwrap().is_none());
        assert!(store.latest_context("   ").unwrap().is_none());
    }

    #[test]
    fn test_annotate_leaves_history_alone() {
        let store = store();
        let id = store.create(&new_record("vase", 0)).unwrap();
        let record = store
            .annotate(id, |extra| {
                extra.insert("model_hash".into(), "sha256:ff".into());
            })
            .unwrap();
        assert_eq!(record.metadata.extra_str("model_hash"), Some("sha256:ff"));
        assert!(store.get(id).unwrap().metadata.edit_history.is_empty());
    }

    #[test]
    fn test_update_with_metadata_is_all_or_nothing() {
        let store = store();
        let id = store.create(&new_record("a clay pot", 0)).unwrap();

        let record = store
            .update_with_metadata(id, &[FieldChange::ImagePath(Some("pot.png".into()))], |extra| {
                extra.insert("image_hash".into(), "sha256:01".into());
            })
            .unwrap();
        assert_eq!(record.image_path.as_deref(), Some("pot.png"));
        assert_eq!(record.metadata.extra_str("image_hash"), Some("sha256:01"));
        assert_eq!(record.metadata.edit_history.len(), 1);
        assert_eq!(store.get(id).unwrap(), record);

        let err = store
            .update_with_metadata(id, &[FieldChange::Prompt(String::new())], |extra| {
                extra.insert("image_hash".into(), "sha256:02".into());
            })
            .unwrap_err();
        assert!(matches!(err, ProtoformError::InvalidInput(_)));
        assert_eq!(store.get(id).unwrap(), record);
    }

    #[test]
    fn test_annotate_cannot_shadow_history_or_tags() {
        let store = store();
        let mut input = new_record("a brass key", 0);
        input.metadata = RecordMetadata::with_tags(["key"]);
        let id = store.create(&input).unwrap();
        store
            .update(id, &[FieldChange::Prompt("an iron key".into())])
            .unwrap();

        let record = store
            .annotate(id, |extra| {
                extra.insert("edit_history".into(), serde_json::json!("wiped"));
                extra.insert("tags".into(), serde_json::json!(["other"]));
                extra.insert("note".into(), "kept".into());
            })
            .unwrap();

        let stored = store.get(id).unwrap();
        assert_eq!(stored, record);
        assert_eq!(stored.metadata.tags, vec!["key".to_string()]);
        assert_eq!(stored.metadata.edit_history.len(), 1);
        assert_eq!(stored.metadata.extra_str("note"), Some("kept"));
        assert!(!stored.metadata.extra.contains_key("edit_history"));
        assert!(!stored.metadata.extra.contains_key("legacy_metadata"));
    }

    #[test]
    fn test_create_keeps_millisecond_timestamps() {
        let store = store();
        let mut input = NewRecord::new("a paper crane");
        input.created_at = DateTime::parse_from_rfc3339("2026-03-14T09:26:53.589793238Z")
            .unwrap()
            .with_timezone(&Utc);

        let id = store.create(&input).unwrap();
        let fetched = store.get(id).unwrap();
        assert_eq!(fetched.created_at.timestamp_subsec_nanos(), 589_000_000);
        assert_eq!(fetched, GenerationRecord::from_new(id, input));
    }

    #[test]
    fn test_reads_rows_from_older_databases() {
        let store = store();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO generations (prompt, enhanced_prompt, created_at, metadata)
                 VALUES ('old prompt', NULL, '2025-01-30 14:05:00', ?1)",
                params![r#"{"edit_history": {"original_prompt": "older"}}"#],
            )
            .unwrap();
        }

        let records = store.list_all(10, 0).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.created_at.to_rfc3339(), "2025-01-30T14:05:00+00:00");
        assert!(record.metadata.edit_history.is_empty());
        assert_eq!(
            record.metadata.extra["legacy_metadata"]["edit_history"]["original_prompt"],
            "older"
        );
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("generations.db");

        let id = {
            let store = GenerationStore::open(&path).unwrap();
            store.create(&new_record("persistent teapot", 0)).unwrap()
        };

        let store = GenerationStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.get(id).unwrap().prompt, "persistent teapot");
    }
}

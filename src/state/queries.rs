// Database CRUD operations
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::db::{DbConnection, DbResult};
use super::models::{Analysis, AnalysisSummary, NewAnalysis};
use crate::notes::Note;

// ==================== ROW PARSING ====================

fn parse_uuid(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_notes(row: &Row, idx: usize) -> rusqlite::Result<Vec<Note>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const ANALYSIS_COLUMNS: &str = "id, user_id, source_id, title, created_at, vocals_path,
     vocals_sha256, frame_count, notes_json";

fn analysis_from_row(row: &Row) -> rusqlite::Result<Analysis> {
    Ok(Analysis {
        id: parse_uuid(row, 0)?,
        user_id: row.get(1)?,
        source_id: row.get(2)?,
        title: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
        vocals_path: row.get(5)?,
        vocals_sha256: row.get(6)?,
        frame_count: row.get(7)?,
        notes: parse_notes(row, 8)?,
    })
}

// ==================== ANALYSIS QUERIES ====================

/// Store an analysis, replacing any earlier one for the same (user, source).
/// Returns the stored analysis and the id of the one it replaced, if any.
pub fn save_analysis(
    db: &DbConnection,
    id: Uuid,
    new: NewAnalysis,
) -> DbResult<(Analysis, Option<Uuid>)> {
    let analysis = Analysis {
        id,
        user_id: new.user_id,
        source_id: new.source_id,
        title: new.title,
        created_at: Utc::now(),
        vocals_path: new.vocals_path,
        vocals_sha256: new.vocals_sha256,
        frame_count: new.frame_count,
        notes: new.notes,
    };
    let notes_json = serde_json::to_string(&analysis.notes)?;

    let mut conn = db.lock();
    let tx = conn.transaction()?;

    let replaced = tx
        .query_row(
            "SELECT id FROM analyses WHERE user_id = ?1 AND source_id = ?2",
            params![analysis.user_id, analysis.source_id],
            |row| parse_uuid(row, 0),
        )
        .optional()?
        .filter(|old| *old != analysis.id);

    tx.execute(
        "INSERT OR REPLACE INTO analyses
            (id, user_id, source_id, title, created_at, vocals_path,
             vocals_sha256, frame_count, note_count, notes_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            analysis.id.to_string(),
            analysis.user_id,
            analysis.source_id,
            analysis.title,
            analysis.created_at.to_rfc3339(),
            analysis.vocals_path,
            analysis.vocals_sha256,
            analysis.frame_count,
            analysis.notes.len() as i64,
            notes_json,
        ],
    )?;
    tx.commit()?;

    log::debug!(
        "Saved analysis {} ({} notes) for {}/{}",
        analysis.id,
        analysis.notes.len(),
        analysis.user_id,
        analysis.source_id
    );

    Ok((analysis, replaced))
}

/// Look up the cached analysis for a user and source
pub fn find_analysis(
    db: &DbConnection,
    user_id: &str,
    source_id: &str,
) -> DbResult<Option<Analysis>> {
    let conn = db.lock();
    let sql = format!(
        "SELECT {} FROM analyses WHERE user_id = ?1 AND source_id = ?2",
        ANALYSIS_COLUMNS
    );
    let analysis = conn
        .query_row(&sql, params![user_id, source_id], analysis_from_row)
        .optional()?;
    Ok(analysis)
}

/// Get an analysis by ID
pub fn get_analysis(db: &DbConnection, id: &Uuid) -> DbResult<Option<Analysis>> {
    let conn = db.lock();
    let sql = format!("SELECT {} FROM analyses WHERE id = ?1", ANALYSIS_COLUMNS);

    let result = conn.query_row(&sql, [id.to_string()], analysis_from_row);

    match result {
        Ok(analysis) => Ok(Some(analysis)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List a user's analyses, newest first
pub fn list_analyses_for_user(db: &DbConnection, user_id: &str) -> DbResult<Vec<AnalysisSummary>> {
    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT id, source_id, title, created_at, note_count
         FROM analyses
         WHERE user_id = ?1
         ORDER BY created_at DESC",
    )?;

    let summaries = stmt
        .query_map([user_id], |row| {
            Ok(AnalysisSummary {
                id: parse_uuid(row, 0)?,
                source_id: row.get(1)?,
                title: row.get(2)?,
                created_at: parse_timestamp(row, 3)?,
                note_count: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(summaries)
}

/// Delete an analysis; returns whether a row was removed
pub fn delete_analysis(db: &DbConnection, id: &Uuid) -> DbResult<bool> {
    let conn = db.lock();
    let affected = conn.execute("DELETE FROM analyses WHERE id = ?1", [id.to_string()])?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_notes() -> Vec<Note> {
        vec![
            Note {
                start: 0.0,
                end: 0.5,
                duration: 0.5,
                frequency: 440.0,
                note_name: "A4".to_string(),
            },
            Note {
                start: 0.6,
                end: 1.0,
                duration: 0.4,
                frequency: 261.63,
                note_name: "C4".to_string(),
            },
        ]
    }

    fn new_analysis(user: &str, source: &str, title: &str) -> NewAnalysis {
        NewAnalysis {
            user_id: user.to_string(),
            source_id: source.to_string(),
            title: title.to_string(),
            vocals_path: "/tmp/vocals.wav".to_string(),
            vocals_sha256: "abc123".to_string(),
            frame_count: 100,
            notes: sample_notes(),
        }
    }

    #[test]
    fn test_save_and_get_analysis() {
        let db = DbConnection::open_in_memory().unwrap();
        let id = Uuid::new_v4();

        let (saved, replaced) =
            save_analysis(&db, id, new_analysis("alice", "song-1", "Song")).unwrap();
        assert!(replaced.is_none());
        let loaded = get_analysis(&db, &id).unwrap().unwrap();

        assert_eq!(loaded.id, saved.id);
        assert_eq!(loaded.notes, sample_notes());
        assert_eq!(loaded.frame_count, 100);
        assert_eq!(loaded.title, "Song");
    }

    #[test]
    fn test_get_missing_analysis() {
        let db = DbConnection::open_in_memory().unwrap();
        assert!(get_analysis(&db, &Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_find_analysis_scoped_by_user() {
        let db = DbConnection::open_in_memory().unwrap();
        save_analysis(&db, Uuid::new_v4(), new_analysis("alice", "song-1", "A")).unwrap();

        assert!(find_analysis(&db, "alice", "song-1").unwrap().is_some());
        assert!(find_analysis(&db, "bob", "song-1").unwrap().is_none());
        assert!(find_analysis(&db, "alice", "song-2").unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_same_source() {
        let db = DbConnection::open_in_memory().unwrap();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        save_analysis(&db, first, new_analysis("alice", "song-1", "Old")).unwrap();
        let (_, replaced) =
            save_analysis(&db, second, new_analysis("alice", "song-1", "New")).unwrap();
        assert_eq!(replaced, Some(first));

        let found = find_analysis(&db, "alice", "song-1").unwrap().unwrap();
        assert_eq!(found.id, second);
        assert_eq!(found.title, "New");
        assert!(get_analysis(&db, &first).unwrap().is_none());
        assert_eq!(list_analyses_for_user(&db, "alice").unwrap().len(), 1);
    }

    #[test]
    fn test_list_and_delete() {
        let db = DbConnection::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        save_analysis(&db, a, new_analysis("alice", "song-1", "One")).unwrap();
        save_analysis(&db, Uuid::new_v4(), new_analysis("alice", "song-2", "Two")).unwrap();
        save_analysis(&db, Uuid::new_v4(), new_analysis("bob", "song-1", "Other")).unwrap();

        let listed = list_analyses_for_user(&db, "alice").unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|s| s.note_count == 2));
        // Newest first
        assert!(listed[0].created_at >= listed[1].created_at);

        assert!(delete_analysis(&db, &a).unwrap());
        assert!(!delete_analysis(&db, &a).unwrap());
        assert_eq!(list_analyses_for_user(&db, "alice").unwrap().len(), 1);
    }
}

// ==========================================
// 批量导入管道 - 上传会话 Repository 实现
// ==========================================
// 职责: 实现上传会话与行数据的存取（使用 rusqlite）
// 表: upload_session（会话）/ upload_row（行级数据）
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::row::{RawRow, ValidRow};
use crate::domain::session::{
    RowError, RowOutcome, SessionPatch, UploadMetadata, UploadSession, UploadSessionSummary,
};
use crate::domain::types::{EntityType, SessionState};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::upload_session_repo::UploadSessionStore;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const SESSION_COLUMNS: &str = "id, entity_type, original_file_name, format, state, \
     detected_row_count, valid_row_count, invalid_row_count, imported_row_count, \
     errors_json, warnings_json, metadata_json, created_at, updated_at";

/// 固定宽度时间戳（保证按文本排序即按时间排序）
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(field: &str, raw: &str) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RepositoryError::FieldValueError {
            field: field.to_string(),
            message: e.to_string(),
        })
}

fn parse_enum<T: FromStr<Err = String>>(field: &str, raw: &str) -> RepositoryResult<T> {
    raw.parse::<T>().map_err(|message| RepositoryError::FieldValueError {
        field: field.to_string(),
        message,
    })
}

fn not_found(id: &str) -> RepositoryError {
    RepositoryError::NotFound {
        entity: "upload_session".to_string(),
        id: id.to_string(),
    }
}

// ==========================================
// SessionRecord - 数据库行（未解码）
// ==========================================
struct SessionRecord {
    id: String,
    entity_type: String,
    original_file_name: String,
    format: String,
    state: String,
    detected_row_count: i64,
    valid_row_count: i64,
    invalid_row_count: i64,
    imported_row_count: i64,
    errors_json: String,
    warnings_json: String,
    metadata_json: String,
    created_at: String,
    updated_at: String,
}

impl SessionRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            original_file_name: row.get(2)?,
            format: row.get(3)?,
            state: row.get(4)?,
            detected_row_count: row.get(5)?,
            valid_row_count: row.get(6)?,
            invalid_row_count: row.get(7)?,
            imported_row_count: row.get(8)?,
            errors_json: row.get(9)?,
            warnings_json: row.get(10)?,
            metadata_json: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_session(self) -> RepositoryResult<UploadSession> {
        Ok(UploadSession {
            entity_type: parse_enum("entity_type", &self.entity_type)?,
            format: parse_enum("format", &self.format)?,
            state: parse_enum("state", &self.state)?,
            detected_row_count: self.detected_row_count as usize,
            valid_row_count: self.valid_row_count as usize,
            invalid_row_count: self.invalid_row_count as usize,
            imported_row_count: self.imported_row_count as usize,
            errors: serde_json::from_str(&self.errors_json)?,
            warnings: serde_json::from_str(&self.warnings_json)?,
            metadata: serde_json::from_str::<UploadMetadata>(&self.metadata_json)?,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
            id: self.id,
            original_file_name: self.original_file_name,
        })
    }
}

// ==========================================
// UploadSessionRepositoryImpl
// ==========================================
pub struct UploadSessionRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl UploadSessionRepositoryImpl {
    /// 创建新的 Repository 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建（与其他仓储共享同一连接）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_tx(conn: &Connection, id: &str) -> RepositoryResult<UploadSession> {
        let record = conn
            .query_row(
                &format!("SELECT {} FROM upload_session WHERE id = ?1", SESSION_COLUMNS),
                params![id],
                SessionRecord::from_row,
            )
            .optional()?
            .ok_or_else(|| not_found(id))?;
        record.into_session()
    }

    /// 整体写回可变字段
    fn write_tx(tx: &Transaction, session: &UploadSession) -> RepositoryResult<()> {
        tx.execute(
            r#"
            UPDATE upload_session SET
                state = ?2, valid_row_count = ?3, invalid_row_count = ?4,
                imported_row_count = ?5, errors_json = ?6, warnings_json = ?7,
                updated_at = ?8
            WHERE id = ?1
            "#,
            params![
                session.id,
                session.state.as_str(),
                session.valid_row_count as i64,
                session.invalid_row_count as i64,
                session.imported_row_count as i64,
                serde_json::to_string(&session.errors)?,
                serde_json::to_string(&session.warnings)?,
                format_ts(&session.updated_at),
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl UploadSessionStore for UploadSessionRepositoryImpl {
    async fn create(&self, session: &UploadSession, rows: &[RawRow]) -> RepositoryResult<()> {
        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO upload_session ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                SESSION_COLUMNS
            ),
            params![
                session.id,
                session.entity_type.as_str(),
                session.original_file_name,
                session.format.as_str(),
                session.state.as_str(),
                session.detected_row_count as i64,
                session.valid_row_count as i64,
                session.invalid_row_count as i64,
                session.imported_row_count as i64,
                serde_json::to_string(&session.errors)?,
                serde_json::to_string(&session.warnings)?,
                serde_json::to_string(&session.metadata)?,
                format_ts(&session.created_at),
                format_ts(&session.updated_at),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO upload_row (session_id, row_index, line, raw_json) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in rows {
                stmt.execute(params![
                    session.id,
                    row.index as i64,
                    row.line as i64,
                    serde_json::to_string(&row.values)?,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    async fn get(&self, id: &str) -> RepositoryResult<UploadSession> {
        let conn = self.conn.lock()?;
        Self::get_tx(&conn, id)
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> RepositoryResult<UploadSession> {
        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut session = Self::get_tx(&tx, id)?;
        if let Some(state) = patch.state {
            session.state = state;
        }
        if let Some(n) = patch.valid_row_count {
            session.valid_row_count = n;
        }
        if let Some(n) = patch.invalid_row_count {
            session.invalid_row_count = n;
        }
        if let Some(n) = patch.imported_row_count {
            session.imported_row_count = n;
        }
        patch.errors.apply(&mut session.errors);
        patch.warnings.apply(&mut session.warnings);
        session.updated_at = Utc::now();

        Self::write_tx(&tx, &session)?;
        tx.commit()?;
        Ok(session)
    }

    async fn list_recent(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> RepositoryResult<Vec<UploadSessionSummary>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM upload_session
             WHERE (?1 IS NULL OR entity_type = ?1)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
            SESSION_COLUMNS
        ))?;

        let records = stmt
            .query_map(
                params![entity_type.map(|e| e.as_str()), limit as i64],
                SessionRecord::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        records
            .into_iter()
            .map(|r| r.into_session().map(|s| s.summary()))
            .collect()
    }

    async fn load_rows(&self, id: &str) -> RepositoryResult<Vec<RawRow>> {
        let conn = self.conn.lock()?;
        Self::get_tx(&conn, id)?;

        let mut stmt = conn.prepare(
            "SELECT row_index, line, raw_json FROM upload_row WHERE session_id = ?1 ORDER BY row_index",
        )?;
        let raw = stmt
            .query_map(params![id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(index, line, json)| {
                let values: BTreeMap<String, String> = serde_json::from_str(&json)?;
                Ok(RawRow::new(index as usize, line as usize, values))
            })
            .collect()
    }

    async fn save_verdicts(&self, id: &str, valid_rows: &[ValidRow]) -> RepositoryResult<()> {
        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;
        Self::get_tx(&tx, id)?;

        tx.execute(
            "UPDATE upload_row SET verdict = 'invalid', parsed_json = NULL WHERE session_id = ?1",
            params![id],
        )?;
        {
            let mut stmt = tx.prepare(
                "UPDATE upload_row SET verdict = 'valid', parsed_json = ?3 WHERE session_id = ?1 AND row_index = ?2",
            )?;
            for row in valid_rows {
                stmt.execute(params![id, row.index as i64, serde_json::to_string(&row.record)?])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    async fn load_valid_rows(&self, id: &str) -> RepositoryResult<Vec<ValidRow>> {
        let conn = self.conn.lock()?;
        Self::get_tx(&conn, id)?;

        let mut stmt = conn.prepare(
            "SELECT row_index, line, parsed_json FROM upload_row
             WHERE session_id = ?1 AND verdict = 'valid' AND import_status IS NULL
             ORDER BY row_index",
        )?;
        let raw = stmt
            .query_map(params![id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, Option<String>>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(index, line, json)| {
                let json = json.ok_or_else(|| RepositoryError::FieldValueError {
                    field: "parsed_json".to_string(),
                    message: format!("有效行 {} 缺少解析结果", index),
                })?;
                Ok(ValidRow {
                    index: index as usize,
                    line: line as usize,
                    record: serde_json::from_str(&json)?,
                })
            })
            .collect()
    }

    async fn record_row_outcome(
        &self,
        id: &str,
        row_index: usize,
        outcome: &RowOutcome,
    ) -> RepositoryResult<()> {
        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;
        let now = format_ts(&Utc::now());

        match outcome {
            RowOutcome::Imported { entity_ids } => {
                tx.execute(
                    "UPDATE upload_row SET import_status = 'imported', entity_ids_json = ?3
                     WHERE session_id = ?1 AND row_index = ?2",
                    params![id, row_index as i64, serde_json::to_string(entity_ids)?],
                )?;
                let changed = tx.execute(
                    "UPDATE upload_session SET imported_row_count = imported_row_count + 1, updated_at = ?2
                     WHERE id = ?1",
                    params![id, now],
                )?;
                if changed == 0 {
                    return Err(not_found(id));
                }
            }
            RowOutcome::Failed { error } => {
                tx.execute(
                    "UPDATE upload_row SET import_status = 'failed' WHERE session_id = ?1 AND row_index = ?2",
                    params![id, row_index as i64],
                )?;
                let current: String = tx
                    .query_row(
                        "SELECT errors_json FROM upload_session WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| not_found(id))?;
                let mut errors: Vec<RowError> = serde_json::from_str(&current)?;
                errors.push(error.clone());
                tx.execute(
                    "UPDATE upload_session SET errors_json = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, serde_json::to_string(&errors)?, now],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    async fn list_by_state(&self, state: SessionState) -> RepositoryResult<Vec<UploadSession>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM upload_session WHERE state = ?1 ORDER BY created_at",
            SESSION_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![state.as_str()], SessionRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        records.into_iter().map(SessionRecord::into_session).collect()
    }
}

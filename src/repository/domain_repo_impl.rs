// ==========================================
// 批量导入管道 - 领域记录 Repository 实现
// ==========================================
// 职责: 实现业务记录写入与参照查询（使用 rusqlite）
// 红线: Repository 不含业务规则，只做数据 CRUD
// 约束: 列名来自白名单，值一律参数化
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::types::{EntityKind, ReferenceKind};
use crate::repository::domain_repo::{DomainRepository, EntityDraft, EntityFields};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// 批量查询时 IN 子句的最大参数个数
const LOOKUP_CHUNK: usize = 500;

/// 记录种类 → (表名, 可写列)
fn table_for(kind: EntityKind) -> (&'static str, &'static [&'static str]) {
    match kind {
        EntityKind::Advance => (
            "advances",
            &[
                "client_id",
                "project_id",
                "amount",
                "payment_method",
                "received_date",
                "estimated_application_date",
                "reference",
                "notes",
                "source_session_id",
            ],
        ),
        EntityKind::Expense => (
            "expenses",
            &[
                "supplier_ruc",
                "supplier_name",
                "invoice_number",
                "issue_date",
                "category_id",
                "project_id",
                "subtotal",
                "tax_amount",
                "amount",
                "payment_method",
                "due_date",
                "description",
                "source_session_id",
            ],
        ),
        EntityKind::Payable => ("payables", &["expense_id", "amount", "due_date", "status"]),
        EntityKind::Sale => (
            "sales",
            &[
                "client_id",
                "project_id",
                "invoice_number",
                "issue_date",
                "subtotal",
                "tax_amount",
                "amount",
                "payment_method",
                "due_date",
                "description",
                "source_session_id",
            ],
        ),
        EntityKind::Receivable => ("receivables", &["sale_id", "amount", "due_date", "status"]),
        EntityKind::Project => (
            "projects",
            &[
                "code",
                "name",
                "client_id",
                "start_date",
                "end_date",
                "budget",
                "status",
                "description",
                "source_session_id",
            ],
        ),
    }
}

/// 参照类型 → (表名, 业务键列)
fn reference_table(kind: ReferenceKind) -> (&'static str, &'static str) {
    match kind {
        ReferenceKind::Client => ("clients", "ruc"),
        ReferenceKind::Project => ("projects", "code"),
        ReferenceKind::Category => ("categories", "code"),
    }
}

// ==========================================
// DomainRepositoryImpl
// ==========================================
pub struct DomainRepositoryImpl {
    conn: Arc<Mutex<Connection>>,
}

impl DomainRepositoryImpl {
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

    /// 在事务中写入一条记录
    fn insert_tx(tx: &Transaction, kind: EntityKind, fields: &EntityFields) -> RepositoryResult<String> {
        let (table, allowed) = table_for(kind);
        if let Some(unknown) = fields.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(RepositoryError::FieldValueError {
                field: unknown.clone(),
                message: format!("{} 不存在该列", table),
            });
        }

        let id = Uuid::new_v4().to_string();
        let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
        let placeholders: Vec<String> = (1..=columns.len() + 1).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} (id{}{}) VALUES ({})",
            table,
            if columns.is_empty() { "" } else { ", " },
            columns.join(", "),
            placeholders.join(", ")
        );

        let values = std::iter::once(id.as_str()).chain(fields.values().map(String::as_str));
        tx.execute(&sql, params_from_iter(values))?;
        Ok(id)
    }

    // ===== 参照数据维护（初始化/测试用） =====

    pub fn insert_client(&self, ruc: &str, name: &str) -> RepositoryResult<String> {
        let conn = self.conn.lock()?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO clients (id, ruc, name) VALUES (?1, ?2, ?3)",
            params![id, ruc, name],
        )?;
        Ok(id)
    }

    pub fn insert_category(&self, code: &str, name: &str) -> RepositoryResult<String> {
        let conn = self.conn.lock()?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO categories (id, code, name) VALUES (?1, ?2, ?3)",
            params![id, code, name],
        )?;
        Ok(id)
    }

    pub fn insert_project(&self, code: &str, name: &str, client_id: &str) -> RepositoryResult<String> {
        let conn = self.conn.lock()?;
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO projects (id, code, name, client_id) VALUES (?1, ?2, ?3, ?4)",
            params![id, code, name, client_id],
        )?;
        Ok(id)
    }

    /// 统计某类记录条数（CLI `stats` 核对导入结果）
    pub fn count(&self, kind: EntityKind) -> RepositoryResult<usize> {
        let (table, _) = table_for(kind);
        let conn = self.conn.lock()?;
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// 读取一条记录的某列（CLI `record` 核对导入结果）
    ///
    /// 列名必须在该表的白名单内，记录不存在返回 NotFound
    pub fn get_field(&self, kind: EntityKind, id: &str, field: &str) -> RepositoryResult<Option<String>> {
        let (table, allowed) = table_for(kind);
        if !allowed.contains(&field) {
            return Err(RepositoryError::FieldValueError {
                field: field.to_string(),
                message: format!("{} 不存在该列", table),
            });
        }
        let conn = self.conn.lock()?;
        let value: Option<Option<String>> = conn
            .query_row(
                &format!("SELECT {} FROM {} WHERE id = ?1", field, table),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        value.ok_or_else(|| RepositoryError::NotFound {
            entity: table.to_string(),
            id: id.to_string(),
        })
    }
}

#[async_trait]
impl DomainRepository for DomainRepositoryImpl {
    async fn create_entity(&self, kind: EntityKind, fields: EntityFields) -> RepositoryResult<String> {
        let mut draft = EntityDraft::new(kind);
        draft.fields = fields;
        let ids = self.create_unit(vec![draft]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| RepositoryError::InternalError("写入未返回 id".to_string()))
    }

    /// 事务化写入记录单元
    async fn create_unit(&self, drafts: Vec<EntityDraft>) -> RepositoryResult<Vec<String>> {
        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut ids: Vec<String> = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let mut fields = draft.fields;
            if let Some(link) = draft.parent {
                let parent_id = ids.get(link.index).ok_or_else(|| RepositoryError::FieldValueError {
                    field: link.field.clone(),
                    message: format!("父记录下标 {} 无效", link.index),
                })?;
                fields.insert(link.field, parent_id.clone());
            }
            ids.push(Self::insert_tx(&tx, draft.kind, &fields)?);
        }

        tx.commit()?;
        Ok(ids)
    }

    async fn find_reference(&self, kind: ReferenceKind, key: &str) -> RepositoryResult<Option<String>> {
        let (table, key_column) = reference_table(kind);
        let conn = self.conn.lock()?;
        let id = conn
            .query_row(
                &format!("SELECT id FROM {} WHERE {} = ?1", table, key_column),
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(id)
    }

    /// 单条 SQL（IN 子句）按块查询
    async fn find_references(
        &self,
        kind: ReferenceKind,
        keys: &[String],
    ) -> RepositoryResult<HashMap<String, String>> {
        let (table, key_column) = reference_table(kind);
        let conn = self.conn.lock()?;

        let mut found = HashMap::new();
        for chunk in keys.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {}, id FROM {} WHERE {} IN ({})",
                key_column, table, key_column, placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (key, id) = row?;
                found.insert(key, id);
            }
        }
        Ok(found)
    }
}

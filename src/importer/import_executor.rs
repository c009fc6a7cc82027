// ==========================================
// 批量导入管道 - 导入执行器
// ==========================================
// 职责: 把有效行写入业务表
// 规则:
// - 每行独立的失败边界：一行失败不回滚其他行，所有行都会尝试
// - 一行可能写入多条记录（赊账费用 = 费用 + 应付款），在同一事务内
// - 行并发度由配置 import.parallelism 控制
// - 每行完成即写回会话（计数原子累加 / 追加导入错误）
// - 未注册导入器的实体类型直接报 NotImplemented，不做模拟
// ==========================================

use crate::domain::row::{
    AdvanceRecord, ExpenseRecord, ParsedRecord, ProjectRecord, SaleRecord, ValidRow,
};
use crate::domain::session::{RowError, RowOutcome};
use crate::domain::types::{EntityKind, EntityType};
use crate::i18n::t_with_args;
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::domain_repo::{DomainRepository, EntityDraft};
use crate::repository::error::RepositoryError;
use crate::repository::upload_session_repo::UploadSessionStore;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 应付/应收初始状态
const PENDING_STATUS: &str = "pendiente";

// ==========================================
// EntityImporter Trait
// ==========================================
// 用途: 把类型化记录转换为待写入的记录单元
// 实现者: AdvanceImporter / ExpenseImporter / SaleImporter / ProjectImporter
pub trait EntityImporter: Send + Sync {
    fn entity_type(&self) -> EntityType;

    /// 生成记录单元（按写入顺序）
    fn drafts(&self, record: &ParsedRecord, session_id: &str) -> ImportResult<Vec<EntityDraft>>;
}

fn mismatch(expected: EntityType, record: &ParsedRecord) -> ImportError {
    ImportError::InternalError(format!(
        "导入器 {} 收到 {} 记录",
        expected,
        record.entity_type()
    ))
}

fn some<T: ToString>(value: T) -> Option<String> {
    Some(value.to_string())
}

fn opt<T: ToString>(value: &Option<T>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

pub struct AdvanceImporter;

impl AdvanceImporter {
    fn draft(a: &AdvanceRecord, session_id: &str) -> EntityDraft {
        EntityDraft::new(EntityKind::Advance)
            .with("client_id", some(&a.client_id))
            .with("project_id", opt(&a.project_id))
            .with("amount", some(a.amount))
            .with("payment_method", some(a.payment_method))
            .with("received_date", some(a.received_date))
            .with("estimated_application_date", opt(&a.estimated_application_date))
            .with("reference", opt(&a.reference))
            .with("notes", opt(&a.notes))
            .with("source_session_id", some(session_id))
    }
}

impl EntityImporter for AdvanceImporter {
    fn entity_type(&self) -> EntityType {
        EntityType::Advance
    }

    fn drafts(&self, record: &ParsedRecord, session_id: &str) -> ImportResult<Vec<EntityDraft>> {
        match record {
            ParsedRecord::Advance(a) => Ok(vec![Self::draft(a, session_id)]),
            other => Err(mismatch(self.entity_type(), other)),
        }
    }
}

pub struct ExpenseImporter;

impl ExpenseImporter {
    fn draft(e: &ExpenseRecord, session_id: &str) -> EntityDraft {
        EntityDraft::new(EntityKind::Expense)
            .with("supplier_ruc", some(&e.supplier_ruc))
            .with("supplier_name", some(&e.supplier_name))
            .with("invoice_number", some(&e.invoice_number))
            .with("issue_date", some(e.issue_date))
            .with("category_id", some(&e.category_id))
            .with("project_id", opt(&e.project_id))
            .with("subtotal", some(e.subtotal))
            .with("tax_amount", some(e.tax_amount))
            .with("amount", some(e.amount))
            .with("payment_method", some(e.payment_method))
            .with("due_date", opt(&e.due_date))
            .with("description", opt(&e.description))
            .with("source_session_id", some(session_id))
    }
}

impl EntityImporter for ExpenseImporter {
    fn entity_type(&self) -> EntityType {
        EntityType::Expense
    }

    fn drafts(&self, record: &ParsedRecord, session_id: &str) -> ImportResult<Vec<EntityDraft>> {
        let ParsedRecord::Expense(e) = record else {
            return Err(mismatch(self.entity_type(), record));
        };

        let mut drafts = vec![Self::draft(e, session_id)];
        if e.payment_method.is_credit() {
            let due_date = e.due_date.ok_or_else(|| {
                ImportError::InternalError(format!("赊账费用 {} 缺少到期日", e.invoice_number))
            })?;
            drafts.push(
                EntityDraft::new(EntityKind::Payable)
                    .with("amount", some(e.amount))
                    .with("due_date", some(due_date))
                    .with("status", some(PENDING_STATUS))
                    .linked_to("expense_id", 0),
            );
        }
        Ok(drafts)
    }
}

pub struct SaleImporter;

impl SaleImporter {
    fn draft(s: &SaleRecord, session_id: &str) -> EntityDraft {
        EntityDraft::new(EntityKind::Sale)
            .with("client_id", some(&s.client_id))
            .with("project_id", opt(&s.project_id))
            .with("invoice_number", some(&s.invoice_number))
            .with("issue_date", some(s.issue_date))
            .with("subtotal", some(s.subtotal))
            .with("tax_amount", some(s.tax_amount))
            .with("amount", some(s.amount))
            .with("payment_method", some(s.payment_method))
            .with("due_date", opt(&s.due_date))
            .with("description", opt(&s.description))
            .with("source_session_id", some(session_id))
    }
}

impl EntityImporter for SaleImporter {
    fn entity_type(&self) -> EntityType {
        EntityType::Sale
    }

    fn drafts(&self, record: &ParsedRecord, session_id: &str) -> ImportResult<Vec<EntityDraft>> {
        let ParsedRecord::Sale(s) = record else {
            return Err(mismatch(self.entity_type(), record));
        };

        let mut drafts = vec![Self::draft(s, session_id)];
        if s.payment_method.is_credit() {
            let due_date = s.due_date.ok_or_else(|| {
                ImportError::InternalError(format!("赊账销售 {} 缺少到期日", s.invoice_number))
            })?;
            drafts.push(
                EntityDraft::new(EntityKind::Receivable)
                    .with("amount", some(s.amount))
                    .with("due_date", some(due_date))
                    .with("status", some(PENDING_STATUS))
                    .linked_to("sale_id", 0),
            );
        }
        Ok(drafts)
    }
}

pub struct ProjectImporter;

impl ProjectImporter {
    fn draft(p: &ProjectRecord, session_id: &str) -> EntityDraft {
        EntityDraft::new(EntityKind::Project)
            .with("code", some(&p.code))
            .with("name", some(&p.name))
            .with("client_id", some(&p.client_id))
            .with("start_date", some(p.start_date))
            .with("end_date", opt(&p.end_date))
            .with("budget", opt(&p.budget))
            .with("status", some(p.status.as_str()))
            .with("description", opt(&p.description))
            .with("source_session_id", some(session_id))
    }
}

impl EntityImporter for ProjectImporter {
    fn entity_type(&self) -> EntityType {
        EntityType::Project
    }

    fn drafts(&self, record: &ParsedRecord, session_id: &str) -> ImportResult<Vec<EntityDraft>> {
        match record {
            ParsedRecord::Project(p) => Ok(vec![Self::draft(p, session_id)]),
            other => Err(mismatch(self.entity_type(), other)),
        }
    }
}

// ==========================================
// ImporterRegistry - 实体类型 → 导入器
// ==========================================
#[derive(Clone, Default)]
pub struct ImporterRegistry {
    importers: HashMap<EntityType, Arc<dyn EntityImporter>>,
}

impl ImporterRegistry {
    /// 空注册表（所有实体类型都会报 NotImplemented）
    pub fn empty() -> Self {
        Self::default()
    }

    /// 注册内置的四种导入器
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(AdvanceImporter));
        registry.register(Arc::new(ExpenseImporter));
        registry.register(Arc::new(SaleImporter));
        registry.register(Arc::new(ProjectImporter));
        registry
    }

    pub fn register(&mut self, importer: Arc<dyn EntityImporter>) {
        self.importers.insert(importer.entity_type(), importer);
    }

    pub fn get(&self, entity_type: EntityType) -> Option<Arc<dyn EntityImporter>> {
        self.importers.get(&entity_type).cloned()
    }
}

// ==========================================
// ImportOutcome - 一次导入调用的结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportOutcome {
    pub imported_count: usize,
    /// 新记录 id（按行号升序，同一行内按写入顺序）
    pub created_ids: Vec<String>,
    /// 导入阶段的行错误（按行号升序）
    pub errors: Vec<RowError>,
}

// ==========================================
// ImportExecutor
// ==========================================
pub struct ImportExecutor {
    domain_repo: Arc<dyn DomainRepository>,
    session_store: Arc<dyn UploadSessionStore>,
    registry: ImporterRegistry,
}

impl ImportExecutor {
    pub fn new(
        domain_repo: Arc<dyn DomainRepository>,
        session_store: Arc<dyn UploadSessionStore>,
        registry: ImporterRegistry,
    ) -> Self {
        Self {
            domain_repo,
            session_store,
            registry,
        }
    }

    /// 是否为该实体类型注册了导入器
    pub fn supports(&self, entity_type: EntityType) -> bool {
        self.registry.get(entity_type).is_some()
    }

    /// 导入有效行
    ///
    /// # 参数
    /// - session_id: 所属会话（每行结果即时写回）
    /// - parallelism: 同时进行的行数（至少 1）
    ///
    /// # 返回
    /// - Ok(ImportOutcome): 行级失败作为数据返回
    /// - Err(NotImplemented): 实体类型没有导入器
    /// - Err(Repository): 会话存储失败
    pub async fn import(
        &self,
        session_id: &str,
        entity_type: EntityType,
        rows: Vec<ValidRow>,
        parallelism: usize,
    ) -> ImportResult<ImportOutcome> {
        let importer = self
            .registry
            .get(entity_type)
            .ok_or_else(|| ImportError::NotImplemented(entity_type.to_string()))?;

        let total = rows.len();
        let results: Vec<ImportResult<(usize, RowOutcome)>> = stream::iter(rows)
            .map(|row| {
                let importer = importer.clone();
                async move {
                    let outcome = self.import_row(importer.as_ref(), session_id, &row).await;
                    self.session_store
                        .record_row_outcome(session_id, row.index, &outcome)
                        .await?;
                    Ok::<_, ImportError>((row.index, outcome))
                }
            })
            .buffer_unordered(parallelism.max(1))
            .collect()
            .await;

        let mut completed = results.into_iter().collect::<ImportResult<Vec<_>>>()?;
        completed.sort_by_key(|(index, _)| *index);

        let mut outcome = ImportOutcome::default();
        for (_, row_outcome) in completed {
            match row_outcome {
                RowOutcome::Imported { entity_ids } => {
                    outcome.imported_count += 1;
                    outcome.created_ids.extend(entity_ids);
                }
                RowOutcome::Failed { error } => outcome.errors.push(error),
            }
        }

        info!(
            session_id = %session_id,
            entity_type = %entity_type,
            total,
            imported = outcome.imported_count,
            failed = outcome.errors.len(),
            "导入执行完成"
        );
        Ok(outcome)
    }

    /// 单行导入（失败不向外传播）
    async fn import_row(
        &self,
        importer: &dyn EntityImporter,
        session_id: &str,
        row: &ValidRow,
    ) -> RowOutcome {
        let drafts = match importer.drafts(&row.record, session_id) {
            Ok(drafts) => drafts,
            Err(e) => {
                warn!(row = row.index, error = %e, "记录单元构建失败");
                return RowOutcome::Failed {
                    error: RowError::import(
                        row.index,
                        row.line,
                        t_with_args("import.row_failed", &[("detail", &e.to_string())]),
                    ),
                };
            }
        };

        match self.domain_repo.create_unit(drafts).await {
            Ok(entity_ids) => {
                debug!(row = row.index, ids = ?entity_ids, "行已导入");
                RowOutcome::Imported { entity_ids }
            }
            Err(e) => {
                warn!(row = row.index, error = %e, "行导入失败");
                RowOutcome::Failed {
                    error: RowError::import(row.index, row.line, persistence_message(&e)),
                }
            }
        }
    }
}

/// 持久化失败 → 行错误描述
fn persistence_message(err: &RepositoryError) -> String {
    match err {
        RepositoryError::UniqueConstraintViolation(detail) => {
            t_with_args("import.duplicate_record", &[("detail", detail)])
        }
        RepositoryError::ForeignKeyViolation(detail) => {
            t_with_args("import.missing_reference", &[("detail", detail)])
        }
        other => t_with_args("import.row_failed", &[("detail", &other.to_string())]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::row::{PaymentMethod, RawRow};
    use crate::domain::session::{ErrorStage, UploadMetadata, UploadSession};
    use crate::domain::types::FileFormat;
    use crate::repository::domain_repo_impl::DomainRepositoryImpl;
    use crate::repository::upload_session_repo_impl::UploadSessionRepositoryImpl;
    use chrono::NaiveDate;
    use rusqlite::Connection;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct Fixture {
        domain: Arc<DomainRepositoryImpl>,
        store: Arc<UploadSessionRepositoryImpl>,
        client_id: String,
        category_id: String,
    }

    fn fixture() -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let domain = Arc::new(DomainRepositoryImpl::from_connection(conn.clone()));
        let client_id = domain.insert_client("1790012344001", "Constructora Andina").unwrap();
        let category_id = domain.insert_category("MAT", "Materiales").unwrap();
        Fixture {
            domain,
            store: Arc::new(UploadSessionRepositoryImpl::from_connection(conn)),
            client_id,
            category_id,
        }
    }

    impl Fixture {
        fn executor(&self, registry: ImporterRegistry) -> ImportExecutor {
            ImportExecutor::new(self.domain.clone(), self.store.clone(), registry)
        }

        async fn session(&self, id: &str, entity_type: EntityType, rows: &[ValidRow]) {
            let session = UploadSession::new_uploaded(
                id.to_string(),
                entity_type,
                "datos.csv".to_string(),
                FileFormat::Csv,
                rows.len(),
                UploadMetadata::default(),
            );
            let raw: Vec<RawRow> = rows
                .iter()
                .map(|r| RawRow::new(r.index, r.line, BTreeMap::new()))
                .collect();
            self.store.create(&session, &raw).await.unwrap();
            self.store.save_verdicts(id, rows).await.unwrap();
        }
    }

    fn sale(index: usize, client_id: &str, invoice: &str, method: PaymentMethod) -> ValidRow {
        let issue = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        ValidRow {
            index,
            line: index + 1,
            record: ParsedRecord::Sale(SaleRecord {
                client_ruc: "1790012344001".to_string(),
                client_id: client_id.to_string(),
                invoice_number: invoice.to_string(),
                issue_date: issue,
                subtotal: Decimal::new(100, 0),
                tax_amount: Decimal::new(15, 0),
                amount: Decimal::new(115, 0),
                payment_method: method,
                due_date: method.is_credit().then(|| issue + chrono::Duration::days(30)),
                project_code: None,
                project_id: None,
                description: None,
            }),
        }
    }

    fn expense(index: usize, category_id: &str, invoice: &str) -> ValidRow {
        let issue = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        ValidRow {
            index,
            line: index + 1,
            record: ParsedRecord::Expense(ExpenseRecord {
                supplier_ruc: "0992339411001".to_string(),
                supplier_name: "Ferretería Guayas".to_string(),
                invoice_number: invoice.to_string(),
                issue_date: issue,
                category_code: "MAT".to_string(),
                category_id: category_id.to_string(),
                project_code: None,
                project_id: None,
                subtotal: Decimal::new(200, 0),
                tax_amount: Decimal::new(30, 0),
                amount: Decimal::new(230, 0),
                payment_method: PaymentMethod::Credito,
                due_date: Some(issue + chrono::Duration::days(15)),
                description: Some("Cemento".to_string()),
            }),
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_is_isolated_per_row() {
        let fx = fixture();
        // 预先存在的发票，使第 2 行在写入时冲突
        fx.domain
            .create_unit(drafts_for(&sale(9, &fx.client_id, "001-001-000000002", PaymentMethod::Efectivo)))
            .await
            .unwrap();

        let rows = vec![
            sale(1, &fx.client_id, "001-001-000000001", PaymentMethod::Efectivo),
            sale(2, &fx.client_id, "001-001-000000002", PaymentMethod::Efectivo),
        ];
        fx.session("s1", EntityType::Sale, &rows).await;

        let outcome = fx
            .executor(ImporterRegistry::with_defaults())
            .import("s1", EntityType::Sale, rows, 4)
            .await
            .unwrap();

        assert_eq!(outcome.imported_count, 1);
        assert_eq!(outcome.created_ids.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].row, 2);
        assert_eq!(outcome.errors[0].stage, ErrorStage::Import);

        let session = fx.store.get("s1").await.unwrap();
        assert_eq!(session.imported_row_count, 1);
        assert_eq!(session.import_errors().count(), 1);
        assert_eq!(fx.domain.count(EntityKind::Sale).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_credit_rows_create_linked_records() {
        let fx = fixture();
        let rows = vec![
            expense(1, &fx.category_id, "001-002-000000010"),
            expense(2, &fx.category_id, "001-002-000000011"),
        ];
        fx.session("s2", EntityType::Expense, &rows).await;

        let outcome = fx
            .executor(ImporterRegistry::with_defaults())
            .import("s2", EntityType::Expense, rows, 1)
            .await
            .unwrap();

        assert_eq!(outcome.imported_count, 2);
        assert_eq!(outcome.created_ids.len(), 4);
        assert_eq!(fx.domain.count(EntityKind::Expense).unwrap(), 2);
        assert_eq!(fx.domain.count(EntityKind::Payable).unwrap(), 2);

        let expense_id = &outcome.created_ids[0];
        let payable_id = &outcome.created_ids[1];
        assert_eq!(
            fx.domain
                .get_field(EntityKind::Payable, payable_id, "expense_id")
                .unwrap()
                .as_deref(),
            Some(expense_id.as_str())
        );
        assert_eq!(
            fx.domain
                .get_field(EntityKind::Payable, payable_id, "due_date")
                .unwrap()
                .as_deref(),
            Some("2026-01-25")
        );
    }

    #[tokio::test]
    async fn test_unregistered_entity_is_not_implemented() {
        let fx = fixture();
        let rows = vec![sale(1, &fx.client_id, "001-001-000000001", PaymentMethod::Efectivo)];
        fx.session("s3", EntityType::Sale, &rows).await;

        let result = fx
            .executor(ImporterRegistry::empty())
            .import("s3", EntityType::Sale, rows, 2)
            .await;

        assert!(matches!(result, Err(ImportError::NotImplemented(_))));
        assert_eq!(fx.domain.count(EntityKind::Sale).unwrap(), 0);
        assert_eq!(fx.store.get("s3").await.unwrap().imported_row_count, 0);
    }

    #[tokio::test]
    async fn test_created_ids_follow_row_order() {
        let fx = fixture();
        let rows: Vec<ValidRow> = (1..=6)
            .map(|i| sale(i, &fx.client_id, &format!("001-001-00000010{}", i), PaymentMethod::Efectivo))
            .collect();
        fx.session("s4", EntityType::Sale, &rows).await;

        let outcome = fx
            .executor(ImporterRegistry::with_defaults())
            .import("s4", EntityType::Sale, rows, 3)
            .await
            .unwrap();

        assert_eq!(outcome.imported_count, 6);
        for (i, id) in outcome.created_ids.iter().enumerate() {
            let invoice = fx.domain.get_field(EntityKind::Sale, id, "invoice_number").unwrap();
            assert_eq!(invoice, Some(format!("001-001-00000010{}", i + 1)));
        }
        // 已导入的行不再出现在待导入列表中
        assert!(fx.store.load_valid_rows("s4").await.unwrap().is_empty());
    }

    fn drafts_for(row: &ValidRow) -> Vec<EntityDraft> {
        ImporterRegistry::with_defaults()
            .get(row.record.entity_type())
            .unwrap()
            .drafts(&row.record, "seed")
            .unwrap()
    }
}

// ==========================================
// 批量导入管道 - 管道编排器
// ==========================================
// 流程: 上传(解析) → 校验 → 导入
// 状态机:
//   (无)                   upload   → subido（解析失败不产生会话）
//   subido / validado      validate → validando → validado | error_validacion
//   validado               import   → importando → importado | error_importacion
//   error_validacion       import   → 仅当允许部分导入且调用方明确接受
//   importado / error_importacion import → AlreadyImported
// 红线:
// - 会话状态只存在于存储中，返回值只是投影
// - 结构错误与状态错误不修改任何会话
// - 同一会话同时只允许一个校验/导入（SessionBusy）
// ==========================================

use crate::config::import_config_trait::{PipelineConfigReader, PipelineSettings};
use crate::domain::session::{
    ListPatch, RowError, SessionPatch, UploadMetadata, UploadSession, UploadSessionSummary,
};
use crate::domain::types::{EntityType, FileFormat, SessionState};
use crate::i18n::t_with_args;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_validator::{FieldValidator, ValidationContext, ValidationOutcome};
use crate::importer::file_parser::UniversalFileParser;
use crate::importer::import_executor::{ImportExecutor, ImporterRegistry};
use crate::importer::schema::TemplateProvider;
use crate::importer::template_writer::TemplateWriter;
use crate::repository::domain_repo::DomainRepository;
use crate::repository::upload_session_repo::UploadSessionStore;
use chrono::{Local, NaiveDate};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

// ==========================================
// 请求 / 结果
// ==========================================
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub entity_type: EntityType,
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// 显式声明的格式（None 时按扩展名推断）
    pub declared_format: Option<FileFormat>,
    pub metadata: UploadMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub upload_id: String,
    pub detected_row_count: usize,
    pub ignored_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub upload_id: String,
    pub state: SessionState,
    pub valid_row_count: usize,
    pub invalid_row_count: usize,
    pub errors: Vec<RowError>,
    pub warnings: Vec<String>,
    pub can_import: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub upload_id: String,
    pub state: SessionState,
    pub imported_row_count: usize,
    pub created_ids: Vec<String>,
    pub errors: Vec<RowError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// validando → subido
    pub reset_to_uploaded: Vec<String>,
    /// importando → error_importacion
    pub marked_import_failed: Vec<String>,
}

// ==========================================
// BusyGuard - 会话占用标记（离开作用域自动释放）
// ==========================================
struct BusyGuard<'a> {
    busy: &'a Mutex<HashSet<String>>,
    session_id: String,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        busy.remove(&self.session_id);
    }
}

fn transition(from: SessionState, to: SessionState) -> ImportError {
    ImportError::InvalidStateTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// 会话能否进入导入阶段（puedeImportar 与导入闸门共用同一判定）
///
/// - 至少一条有效行
/// - validado 直接可导入
/// - error_validacion 需配置允许部分导入且调用方明确接受
fn importable(session: &UploadSession, settings: &PipelineSettings, accept_partial: bool) -> bool {
    if session.valid_row_count == 0 {
        return false;
    }
    match session.state {
        SessionState::Validated => true,
        SessionState::ValidationFailed => settings.allow_partial_import && accept_partial,
        _ => false,
    }
}

// ==========================================
// PipelineOrchestrator
// ==========================================
pub struct PipelineOrchestrator {
    session_store: Arc<dyn UploadSessionStore>,
    config: Arc<dyn PipelineConfigReader>,
    template_provider: Arc<dyn TemplateProvider>,
    validator: FieldValidator,
    executor: ImportExecutor,
    busy: Mutex<HashSet<String>>,
    fixed_today: Option<NaiveDate>,
}

impl PipelineOrchestrator {
    /// 创建编排器（注册内置导入器）
    pub fn new(
        session_store: Arc<dyn UploadSessionStore>,
        domain_repo: Arc<dyn DomainRepository>,
        config: Arc<dyn PipelineConfigReader>,
        template_provider: Arc<dyn TemplateProvider>,
    ) -> Self {
        Self::with_registry(
            session_store,
            domain_repo,
            config,
            template_provider,
            ImporterRegistry::with_defaults(),
        )
    }

    pub fn with_registry(
        session_store: Arc<dyn UploadSessionStore>,
        domain_repo: Arc<dyn DomainRepository>,
        config: Arc<dyn PipelineConfigReader>,
        template_provider: Arc<dyn TemplateProvider>,
        registry: ImporterRegistry,
    ) -> Self {
        Self {
            validator: FieldValidator::new(domain_repo.clone(), template_provider.clone()),
            executor: ImportExecutor::new(domain_repo, session_store.clone(), registry),
            session_store,
            config,
            template_provider,
            busy: Mutex::new(HashSet::new()),
            fixed_today: None,
        }
    }

    /// 固定"今天"（日期规则的基准），用于可重复的校验
    pub fn with_fixed_today(mut self, today: NaiveDate) -> Self {
        self.fixed_today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.fixed_today
            .unwrap_or_else(|| Local::now().date_naive())
    }

    async fn settings(&self) -> ImportResult<PipelineSettings> {
        PipelineSettings::load(self.config.as_ref())
            .await
            .map_err(|e| ImportError::ConfigReadError {
                key: "import.*".to_string(),
                message: e.to_string(),
            })
    }

    fn acquire(&self, session_id: &str) -> ImportResult<BusyGuard<'_>> {
        let mut busy = self
            .busy
            .lock()
            .map_err(|e| ImportError::InternalError(e.to_string()))?;
        if !busy.insert(session_id.to_string()) {
            return Err(ImportError::SessionBusy(session_id.to_string()));
        }
        Ok(BusyGuard {
            busy: &self.busy,
            session_id: session_id.to_string(),
        })
    }

    // ==========================================
    // 阶段 1: 上传
    // ==========================================

    /// 解析文件并创建会话（subido）
    ///
    /// # 返回
    /// - Err(FileTooLarge / UnsupportedFormat / CorruptFile): 不创建会话
    #[instrument(skip(self, request), fields(entity_type = %request.entity_type, file_name = %request.file_name))]
    pub async fn upload(&self, request: UploadRequest) -> ImportResult<UploadReceipt> {
        let settings = self.settings().await?;
        let schema = self.template_provider.schema(request.entity_type);

        let parsed = UniversalFileParser::new(settings.max_file_size_bytes)
            .parse(
                &request.bytes,
                &request.file_name,
                request.declared_format,
                &schema,
            )
            .inspect_err(|e| warn!(error = %e, "上传被拒绝"))?;

        let session = UploadSession::new_uploaded(
            Uuid::new_v4().to_string(),
            request.entity_type,
            request.file_name,
            parsed.format,
            parsed.detected_row_count,
            request.metadata,
        );
        self.session_store.create(&session, &parsed.rows).await?;

        info!(
            upload_id = %session.id,
            rows = parsed.detected_row_count,
            ignored_columns = ?parsed.ignored_columns,
            "上传完成"
        );
        Ok(UploadReceipt {
            upload_id: session.id,
            detected_row_count: parsed.detected_row_count,
            ignored_columns: parsed.ignored_columns,
        })
    }

    // ==========================================
    // 阶段 2: 校验
    // ==========================================

    /// 校验会话的全部行（可重复执行，结果整体覆盖上一次）
    #[instrument(skip(self))]
    pub async fn validate(&self, upload_id: &str) -> ImportResult<ValidationReport> {
        let _guard = self.acquire(upload_id)?;
        let session = self.session_store.get(upload_id).await?;
        match session.state {
            SessionState::Uploaded | SessionState::Validated => {}
            other => return Err(transition(other, SessionState::Validating)),
        }

        let settings = self.settings().await?;
        let ctx = ValidationContext {
            today: self.today(),
            vat_rates: settings.vat_rates.clone(),
        };

        self.session_store
            .update(upload_id, SessionPatch::state(SessionState::Validating))
            .await?;

        let outcome = match self.run_validation(&session, &ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "校验中断，恢复原状态");
                self.session_store
                    .update(upload_id, SessionPatch::state(session.state))
                    .await?;
                return Err(e);
            }
        };

        let valid = outcome.valid_rows.len();
        let invalid = outcome.invalid_row_count();
        let state = if invalid == 0 {
            SessionState::Validated
        } else {
            SessionState::ValidationFailed
        };

        let updated = self
            .session_store
            .update(
                upload_id,
                SessionPatch {
                    state: Some(state),
                    valid_row_count: Some(valid),
                    invalid_row_count: Some(invalid),
                    errors: ListPatch::Replace(outcome.errors),
                    warnings: ListPatch::Replace(outcome.warnings),
                    ..Default::default()
                },
            )
            .await?;

        // 报告的是调用方接受部分导入时能否导入
        let can_import = importable(&updated, &settings, true);
        info!(valid, invalid, state = %state, can_import, "校验完成");
        Ok(ValidationReport {
            upload_id: updated.id,
            state,
            valid_row_count: valid,
            invalid_row_count: invalid,
            errors: updated.errors,
            warnings: updated.warnings,
            can_import,
        })
    }

    async fn run_validation(
        &self,
        session: &UploadSession,
        ctx: &ValidationContext,
    ) -> ImportResult<ValidationOutcome> {
        let rows = self.session_store.load_rows(&session.id).await?;
        let outcome = self
            .validator
            .validate(session.entity_type, &rows, ctx)
            .await?;
        self.session_store
            .save_verdicts(&session.id, &outcome.valid_rows)
            .await?;
        Ok(outcome)
    }

    // ==========================================
    // 阶段 3: 导入
    // ==========================================

    /// 导入有效行
    ///
    /// # 参数
    /// - accept_partial: 调用方接受只导入有效行（仅在配置允许部分导入时生效）
    #[instrument(skip(self))]
    pub async fn import(&self, upload_id: &str, accept_partial: bool) -> ImportResult<ImportReport> {
        let _guard = self.acquire(upload_id)?;
        let session = self.session_store.get(upload_id).await?;
        let settings = self.settings().await?;

        if session.state.is_import_finished() {
            return Err(ImportError::AlreadyImported(upload_id.to_string()));
        }
        if !importable(&session, &settings, accept_partial) {
            return Err(transition(session.state, SessionState::Importing));
        }
        if session.state == SessionState::ValidationFailed {
            info!("按部分导入策略导入有效行");
        }
        if !self.executor.supports(session.entity_type) {
            return Err(ImportError::NotImplemented(session.entity_type.to_string()));
        }

        self.session_store
            .update(upload_id, SessionPatch::state(SessionState::Importing))
            .await?;

        let rows = self.session_store.load_valid_rows(upload_id).await?;
        let result = self
            .executor
            .import(upload_id, session.entity_type, rows, settings.import_parallelism)
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "导入中断");
                self.session_store
                    .update(upload_id, SessionPatch::state(SessionState::ImportFailed))
                    .await?;
                return Err(e);
            }
        };

        let state = if outcome.errors.is_empty() {
            SessionState::Imported
        } else {
            SessionState::ImportFailed
        };
        self.session_store
            .update(upload_id, SessionPatch::state(state))
            .await?;

        info!(
            imported = outcome.imported_count,
            failed = outcome.errors.len(),
            state = %state,
            "导入完成"
        );
        Ok(ImportReport {
            upload_id: upload_id.to_string(),
            state,
            imported_row_count: outcome.imported_count,
            created_ids: outcome.created_ids,
            errors: outcome.errors,
        })
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 最近的会话（limit 为 None 时使用配置的默认条数）
    pub async fn history(
        &self,
        entity_type: Option<EntityType>,
        limit: Option<usize>,
    ) -> ImportResult<Vec<UploadSessionSummary>> {
        let limit = match limit {
            Some(limit) => limit,
            None => self.settings().await?.history_default_limit,
        };
        Ok(self.session_store.list_recent(entity_type, limit).await?)
    }

    pub async fn get_session(&self, upload_id: &str) -> ImportResult<UploadSession> {
        Ok(self.session_store.get(upload_id).await?)
    }

    /// 实体模板（xlsx）
    pub fn template(&self, entity_type: EntityType) -> ImportResult<Vec<u8>> {
        TemplateWriter::write(&self.template_provider.schema(entity_type))
    }

    // ==========================================
    // 中断恢复
    // ==========================================

    /// 处理进程中断后停留在过渡态的会话
    ///
    /// - validando → subido（可重新校验）
    /// - importando → error_importacion（计数保留已记录的行，并追加提示）
    ///
    /// 当前进程中正在处理的会话不受影响
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self) -> ImportResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for session in self.session_store.list_by_state(SessionState::Validating).await? {
            let Ok(_guard) = self.acquire(&session.id) else {
                continue;
            };
            self.session_store
                .update(&session.id, SessionPatch::state(SessionState::Uploaded))
                .await?;
            report.reset_to_uploaded.push(session.id);
        }

        for session in self.session_store.list_by_state(SessionState::Importing).await? {
            let Ok(_guard) = self.acquire(&session.id) else {
                continue;
            };
            let note = t_with_args(
                "warning.interrupted_import",
                &[("count", &session.imported_row_count.to_string())],
            );
            self.session_store
                .update(
                    &session.id,
                    SessionPatch {
                        state: Some(SessionState::ImportFailed),
                        warnings: ListPatch::Append(vec![note]),
                        ..Default::default()
                    },
                )
                .await?;
            report.marked_import_failed.push(session.id);
        }

        if !report.reset_to_uploaded.is_empty() || !report.marked_import_failed.is_empty() {
            warn!(
                reset = report.reset_to_uploaded.len(),
                failed = report.marked_import_failed.len(),
                "已恢复中断的会话"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigManager;
    use crate::domain::row::RawRow;
    use crate::importer::schema::StaticTemplateProvider;
    use crate::repository::domain_repo_impl::DomainRepositoryImpl;
    use crate::repository::upload_session_repo_impl::UploadSessionRepositoryImpl;
    use rusqlite::Connection;

    struct Harness {
        pipeline: PipelineOrchestrator,
        store: Arc<UploadSessionRepositoryImpl>,
        config: Arc<ConfigManager>,
    }

    fn harness() -> Harness {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let domain = Arc::new(DomainRepositoryImpl::from_connection(conn.clone()));
        domain.insert_client("1790012344001", "Constructora Andina").unwrap();
        let store = Arc::new(UploadSessionRepositoryImpl::from_connection(conn.clone()));
        let config = Arc::new(ConfigManager::from_connection(conn).unwrap());

        let pipeline = PipelineOrchestrator::new(
            store.clone(),
            domain,
            config.clone(),
            Arc::new(StaticTemplateProvider),
        )
        .with_fixed_today(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap());
        Harness {
            pipeline,
            store,
            config,
        }
    }

    fn csv_upload(body: &str) -> UploadRequest {
        UploadRequest {
            entity_type: EntityType::Advance,
            file_name: "anticipos.csv".to_string(),
            bytes: format!(
                "RUC Cliente,Monto,Forma de Pago,Fecha de Recepción\n{}",
                body
            )
            .into_bytes(),
            declared_format: None,
            metadata: UploadMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_busy_session_is_rejected() {
        let h = harness();
        let receipt = h
            .pipeline
            .upload(csv_upload("1790012344001,100,efectivo,2026-01-10\n"))
            .await
            .unwrap();

        let guard = h.pipeline.acquire(&receipt.upload_id).unwrap();
        let err = h.pipeline.validate(&receipt.upload_id).await.unwrap_err();
        assert!(matches!(err, ImportError::SessionBusy(_)));
        let err = h.pipeline.import(&receipt.upload_id, false).await.unwrap_err();
        assert!(matches!(err, ImportError::SessionBusy(_)));
        drop(guard);

        // 释放后可以继续
        let report = h.pipeline.validate(&receipt.upload_id).await.unwrap();
        assert_eq!(report.state, SessionState::Validated);
    }

    #[tokio::test]
    async fn test_state_errors_do_not_touch_session() {
        let h = harness();
        let receipt = h
            .pipeline
            .upload(csv_upload("1790012344001,,efectivo,2026-01-10\n"))
            .await
            .unwrap();

        // 未校验不能导入
        let err = h.pipeline.import(&receipt.upload_id, false).await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidStateTransition { .. }));

        let report = h.pipeline.validate(&receipt.upload_id).await.unwrap();
        assert_eq!(report.state, SessionState::ValidationFailed);
        assert!(!report.can_import);

        let before = h.store.get(&receipt.upload_id).await.unwrap();
        let err = h.pipeline.validate(&receipt.upload_id).await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidStateTransition { .. }));
        let err = h.pipeline.import(&receipt.upload_id, true).await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidStateTransition { .. }));
        assert_eq!(h.store.get(&receipt.upload_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_partial_import_requires_config_and_acceptance() {
        let h = harness();
        h.config
            .set_global_config_value(crate::config::config_keys::ALLOW_PARTIAL_IMPORT, "true")
            .unwrap();
        let receipt = h
            .pipeline
            .upload(csv_upload(
                "1790012344001,100,efectivo,2026-01-10\n1790012344001,abc,efectivo,2026-01-10\n",
            ))
            .await
            .unwrap();

        let report = h.pipeline.validate(&receipt.upload_id).await.unwrap();
        assert_eq!(report.state, SessionState::ValidationFailed);
        assert!(report.can_import);

        let err = h.pipeline.import(&receipt.upload_id, false).await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidStateTransition { .. }));

        let report = h.pipeline.import(&receipt.upload_id, true).await.unwrap();
        assert_eq!(report.imported_row_count, 1);
        assert_eq!(report.state, SessionState::Imported);
    }

    #[tokio::test]
    async fn test_session_without_valid_rows_is_never_importable() {
        let h = harness();
        h.config
            .set_global_config_value(crate::config::config_keys::ALLOW_PARTIAL_IMPORT, "true")
            .unwrap();

        // 仅表头：validado 但没有可导入的行
        let empty = h.pipeline.upload(csv_upload("")).await.unwrap();
        let report = h.pipeline.validate(&empty.upload_id).await.unwrap();
        assert_eq!(report.state, SessionState::Validated);
        assert!(!report.can_import);
        let err = h.pipeline.import(&empty.upload_id, false).await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidStateTransition { .. }));

        // 全部无效：即使允许且接受部分导入也不行
        let invalid = h
            .pipeline
            .upload(csv_upload(
                "1790012344001,,efectivo,2026-01-10\n1790012344001,abc,efectivo,2026-01-10\n",
            ))
            .await
            .unwrap();
        let report = h.pipeline.validate(&invalid.upload_id).await.unwrap();
        assert_eq!(report.state, SessionState::ValidationFailed);
        assert!(!report.can_import);
        let err = h.pipeline.import(&invalid.upload_id, true).await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidStateTransition { .. }));

        for id in [&empty.upload_id, &invalid.upload_id] {
            let session = h.store.get(id).await.unwrap();
            assert!(!session.state.is_import_finished());
        }
    }

    #[test]
    fn test_importable_matches_reported_flag() {
        let mut session = UploadSession::new_uploaded(
            "s1".to_string(),
            EntityType::Advance,
            "a.csv".to_string(),
            FileFormat::Csv,
            3,
            UploadMetadata::default(),
        );
        let strict = PipelineSettings::default();
        let partial = PipelineSettings {
            allow_partial_import: true,
            ..PipelineSettings::default()
        };

        // 未校验
        session.valid_row_count = 3;
        assert!(!importable(&session, &partial, true));

        session.state = SessionState::Validated;
        assert!(importable(&session, &strict, false));

        session.state = SessionState::ValidationFailed;
        session.valid_row_count = 2;
        session.invalid_row_count = 1;
        assert!(!importable(&session, &strict, true));
        assert!(!importable(&session, &partial, false));
        assert!(importable(&session, &partial, true));

        session.valid_row_count = 0;
        session.invalid_row_count = 3;
        assert!(!importable(&session, &partial, true));

        session.state = SessionState::Imported;
        session.valid_row_count = 3;
        assert!(!importable(&session, &partial, true));
    }

    #[tokio::test]
    async fn test_recover_interrupted_sessions() {
        let h = harness();
        let mut stuck_validating = UploadSession::new_uploaded(
            "v1".to_string(),
            EntityType::Advance,
            "a.csv".to_string(),
            FileFormat::Csv,
            1,
            UploadMetadata::default(),
        );
        stuck_validating.state = SessionState::Validating;
        let mut stuck_importing = stuck_validating.clone();
        stuck_importing.id = "i1".to_string();
        stuck_importing.state = SessionState::Importing;
        stuck_importing.imported_row_count = 1;

        let rows = vec![RawRow::new(1, 2, Default::default())];
        h.store.create(&stuck_validating, &rows).await.unwrap();
        h.store.create(&stuck_importing, &rows).await.unwrap();

        let report = h.pipeline.recover_interrupted().await.unwrap();
        assert_eq!(report.reset_to_uploaded, vec!["v1".to_string()]);
        assert_eq!(report.marked_import_failed, vec!["i1".to_string()]);

        assert_eq!(h.store.get("v1").await.unwrap().state, SessionState::Uploaded);
        let failed = h.store.get("i1").await.unwrap();
        assert_eq!(failed.state, SessionState::ImportFailed);
        assert_eq!(failed.imported_row_count, 1);
        assert_eq!(failed.warnings.len(), 1);

        // 再次执行无事可做
        assert_eq!(h.pipeline.recover_interrupted().await.unwrap(), RecoveryReport::default());
    }
}

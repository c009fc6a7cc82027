// ==========================================
// 批量导入管道 - 导入 API
// ==========================================
// 职责: 对外暴露上传/校验/导入/历史/模板操作
// 响应字段名与前端约定一致（uploadId、registrosValidos …）
// 说明: 会话状态只在存储中；这里的响应都是投影
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, PipelineConfigReader};
use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::session::{RowError, UploadMetadata, UploadSession, UploadSessionSummary};
use crate::domain::types::{EntityKind, EntityType, FileFormat, SessionState};
use crate::i18n;
use crate::importer::pipeline::{PipelineOrchestrator, UploadRequest};
use crate::importer::schema::StaticTemplateProvider;
use crate::repository::{DomainRepositoryImpl, UploadSessionRepositoryImpl};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::info;

// ==========================================
// 响应 DTO
// ==========================================

/// 上传响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(rename = "detectedRowCount")]
    pub detected_row_count: usize,
    /// 未识别而被忽略的列
    #[serde(rename = "columnasIgnoradas", default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_columns: Vec<String>,
}

/// 校验响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateResponse {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(rename = "estado")]
    pub state: SessionState,
    #[serde(rename = "registrosValidos")]
    pub valid_rows: usize,
    #[serde(rename = "registrosInvalidos")]
    pub invalid_rows: usize,
    #[serde(rename = "errores")]
    pub errors: Vec<RowError>,
    #[serde(rename = "advertencias")]
    pub warnings: Vec<String>,
    #[serde(rename = "puedeImportar")]
    pub can_import: bool,
}

/// 导入响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResponse {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(rename = "estado")]
    pub state: SessionState,
    #[serde(rename = "registrosImportados")]
    pub imported_rows: usize,
    #[serde(rename = "createdIds")]
    pub created_ids: Vec<String>,
    #[serde(rename = "errores")]
    pub errors: Vec<RowError>,
}

/// 中断恢复响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResponse {
    pub reset_to_uploaded: Vec<String>,
    pub marked_import_failed: Vec<String>,
}

// ==========================================
// ImportApi
// ==========================================
pub struct ImportApi {
    pipeline: PipelineOrchestrator,
    config: Arc<ConfigManager>,
    domain_repo: Arc<DomainRepositoryImpl>,
}

impl ImportApi {
    /// 打开（必要时创建）数据库并初始化表结构
    pub fn new(db_path: &str) -> ApiResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| ApiError::DatabaseError(format!("打开数据库失败: {}", e)))?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    /// 使用已有连接（所有仓储共享同一连接）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ApiResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| ApiError::DatabaseError(format!("数据库锁获取失败: {}", e)))?;
            init_schema(&guard)
                .map_err(|e| ApiError::DatabaseError(format!("初始化表结构失败: {}", e)))?;
        }

        let config = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| ApiError::ConfigError(e.to_string()))?,
        );
        let domain_repo = Arc::new(DomainRepositoryImpl::from_connection(conn.clone()));
        let session_store = Arc::new(UploadSessionRepositoryImpl::from_connection(conn));

        let pipeline = PipelineOrchestrator::new(
            session_store,
            domain_repo.clone(),
            config.clone(),
            Arc::new(StaticTemplateProvider),
        );

        Ok(Self {
            pipeline,
            config,
            domain_repo,
        })
    }

    /// 固定日期规则的基准日
    pub fn with_fixed_today(mut self, today: NaiveDate) -> Self {
        self.pipeline = self.pipeline.with_fixed_today(today);
        self
    }

    /// 按配置 i18n.locale 切换消息语言，返回生效的语言
    pub async fn apply_locale(&self) -> ApiResult<String> {
        let locale = self
            .config
            .get_locale()
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;
        i18n::set_locale(&locale);
        Ok(i18n::current_locale())
    }

    // ==========================================
    // 管道操作
    // ==========================================

    /// 上传文件
    ///
    /// # 参数
    /// - bytes: 文件内容
    /// - file_name: 原始文件名（用于推断格式）
    /// - entity_type: 实体类型
    /// - metadata: 上传附加信息（可选）
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        entity_type: EntityType,
        declared_format: Option<FileFormat>,
        metadata: Option<UploadMetadata>,
    ) -> ApiResult<UploadResponse> {
        if file_name.trim().is_empty() {
            return Err(ApiError::InvalidInput("文件名不能为空".to_string()));
        }

        let receipt = self
            .pipeline
            .upload(UploadRequest {
                entity_type,
                file_name: file_name.to_string(),
                bytes,
                declared_format,
                metadata: metadata.unwrap_or_default(),
            })
            .await?;

        Ok(UploadResponse {
            upload_id: receipt.upload_id,
            detected_row_count: receipt.detected_row_count,
            ignored_columns: receipt.ignored_columns,
        })
    }

    /// 校验上传
    pub async fn validate(&self, upload_id: &str) -> ApiResult<ValidateResponse> {
        let report = self.pipeline.validate(upload_id).await?;
        Ok(ValidateResponse {
            upload_id: report.upload_id,
            state: report.state,
            valid_rows: report.valid_row_count,
            invalid_rows: report.invalid_row_count,
            errors: report.errors,
            warnings: report.warnings,
            can_import: report.can_import,
        })
    }

    /// 导入有效行
    pub async fn import(&self, upload_id: &str, accept_partial: bool) -> ApiResult<ImportResponse> {
        let report = self.pipeline.import(upload_id, accept_partial).await?;
        Ok(ImportResponse {
            upload_id: report.upload_id,
            state: report.state,
            imported_rows: report.imported_row_count,
            created_ids: report.created_ids,
            errors: report.errors,
        })
    }

    /// 上传历史（按创建时间倒序）
    pub async fn history(
        &self,
        entity_type: Option<EntityType>,
        limit: Option<usize>,
    ) -> ApiResult<Vec<UploadSessionSummary>> {
        Ok(self.pipeline.history(entity_type, limit).await?)
    }

    /// 完整会话（含错误与提示明细）
    pub async fn get_session(&self, upload_id: &str) -> ApiResult<UploadSession> {
        Ok(self.pipeline.get_session(upload_id).await?)
    }

    /// 实体模板（xlsx 字节）
    pub fn template(&self, entity_type: EntityType) -> ApiResult<Vec<u8>> {
        Ok(self.pipeline.template(entity_type)?)
    }

    /// 处理中断后停留在过渡态的会话
    pub async fn recover_interrupted(&self) -> ApiResult<RecoveryResponse> {
        let report = self.pipeline.recover_interrupted().await?;
        Ok(RecoveryResponse {
            reset_to_uploaded: report.reset_to_uploaded,
            marked_import_failed: report.marked_import_failed,
        })
    }

    // ==========================================
    // 配置与参照数据维护
    // ==========================================

    pub fn set_config(&self, key: &str, value: &str) -> ApiResult<()> {
        self.config
            .set_global_config_value(key, value)
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;
        info!(key, value, "配置已更新");
        Ok(())
    }

    /// 已写入的全部配置项
    pub fn config_snapshot(&self) -> ApiResult<BTreeMap<String, String>> {
        self.config
            .get_config_snapshot()
            .map_err(|e| ApiError::ConfigError(e.to_string()))
    }

    // ==========================================
    // 记录核对
    // ==========================================

    /// 各类已写入记录的条数
    pub fn record_counts(&self) -> ApiResult<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for kind in EntityKind::ALL {
            counts.insert(kind.to_string(), self.domain_repo.count(kind)?);
        }
        Ok(counts)
    }

    /// 读取一条已写入记录的某列
    pub fn record_field(&self, kind: EntityKind, id: &str, field: &str) -> ApiResult<Option<String>> {
        Ok(self.domain_repo.get_field(kind, id.trim(), field.trim())?)
    }

    pub fn add_client(&self, ruc: &str, name: &str) -> ApiResult<String> {
        Ok(self.domain_repo.insert_client(ruc.trim(), name.trim())?)
    }

    pub fn add_category(&self, code: &str, name: &str) -> ApiResult<String> {
        Ok(self
            .domain_repo
            .insert_category(&code.trim().to_uppercase(), name.trim())?)
    }
}

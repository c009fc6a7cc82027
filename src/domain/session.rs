// ==========================================
// 批量导入管道 - 上传会话实体
// ==========================================
// 职责: 定义 UploadSession / RowError / SessionPatch
// 红线: 会话是管道状态的唯一来源，前端只读写此实体
// ==========================================

use crate::domain::types::{EntityType, FileFormat, SessionState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// RowError - 行级错误
// ==========================================
// stage 区分校验阶段错误与导入阶段错误：
// - 校验重跑时整体替换 validation 子集
// - 导入阶段只追加 import 子集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Validation,
    Import,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// 行号（1 起，非空数据行序号）
    pub row: usize,
    /// 源文件中的物理行号（表头为第 1 行）
    pub line: usize,
    /// 逻辑字段名（非原始列名）；整行错误时为 "row"
    pub field: String,
    /// 原始值（可能为空）
    pub value: String,
    /// 可读的错误描述
    pub message: String,
    pub stage: ErrorStage,
}

impl RowError {
    pub fn validation(
        row: usize,
        line: usize,
        field: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row,
            line,
            field: field.into(),
            value: value.into(),
            message: message.into(),
            stage: ErrorStage::Validation,
        }
    }

    pub fn import(row: usize, line: usize, message: impl Into<String>) -> Self {
        Self {
            row,
            line,
            field: "row".to_string(),
            value: String::new(),
            message: message.into(),
            stage: ErrorStage::Import,
        }
    }
}

// ==========================================
// UploadMetadata - 上传附加信息
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub uploaded_by: Option<String>,
    pub notes: Option<String>,
}

// ==========================================
// UploadSession - 上传会话
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: String,
    pub entity_type: EntityType,
    pub original_file_name: String,
    pub format: FileFormat,
    pub state: SessionState,

    // 计数
    pub detected_row_count: usize,
    pub valid_row_count: usize,
    pub invalid_row_count: usize,
    pub imported_row_count: usize,

    // 错误与提示
    pub errors: Vec<RowError>,
    pub warnings: Vec<String>,

    pub metadata: UploadMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// 上传完成时创建会话（状态 subido）
    pub fn new_uploaded(
        id: String,
        entity_type: EntityType,
        original_file_name: String,
        format: FileFormat,
        detected_row_count: usize,
        metadata: UploadMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            entity_type,
            original_file_name,
            format,
            state: SessionState::Uploaded,
            detected_row_count,
            valid_row_count: 0,
            invalid_row_count: 0,
            imported_row_count: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validation_errors(&self) -> impl Iterator<Item = &RowError> {
        self.errors
            .iter()
            .filter(|e| e.stage == ErrorStage::Validation)
    }

    pub fn import_errors(&self) -> impl Iterator<Item = &RowError> {
        self.errors.iter().filter(|e| e.stage == ErrorStage::Import)
    }

    pub fn summary(&self) -> UploadSessionSummary {
        UploadSessionSummary {
            id: self.id.clone(),
            entity_type: self.entity_type,
            original_file_name: self.original_file_name.clone(),
            format: self.format,
            state: self.state,
            detected_row_count: self.detected_row_count,
            valid_row_count: self.valid_row_count,
            invalid_row_count: self.invalid_row_count,
            imported_row_count: self.imported_row_count,
            error_count: self.errors.len(),
            warning_count: self.warnings.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

// ==========================================
// UploadSessionSummary - 历史列表投影（不含错误明细）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSessionSummary {
    pub id: String,
    pub entity_type: EntityType,
    pub original_file_name: String,
    pub format: FileFormat,
    pub state: SessionState,
    pub detected_row_count: usize,
    pub valid_row_count: usize,
    pub invalid_row_count: usize,
    pub imported_row_count: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==========================================
// SessionPatch - 会话更新补丁
// ==========================================
// 规则: 按字段 last-write-wins；None 表示不修改
// errors/warnings 必须显式声明 Replace/Append，默认 Keep
#[derive(Debug, Clone, PartialEq)]
pub enum ListPatch<T> {
    Keep,
    Replace(Vec<T>),
    Append(Vec<T>),
}

impl<T> Default for ListPatch<T> {
    fn default() -> Self {
        ListPatch::Keep
    }
}

impl<T: Clone> ListPatch<T> {
    /// 将补丁应用到现有列表
    pub fn apply(&self, current: &mut Vec<T>) {
        match self {
            ListPatch::Keep => {}
            ListPatch::Replace(items) => *current = items.clone(),
            ListPatch::Append(items) => current.extend(items.iter().cloned()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub state: Option<SessionState>,
    pub valid_row_count: Option<usize>,
    pub invalid_row_count: Option<usize>,
    pub imported_row_count: Option<usize>,
    pub errors: ListPatch<RowError>,
    pub warnings: ListPatch<String>,
}

impl SessionPatch {
    pub fn state(state: SessionState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }
}

// ==========================================
// RowOutcome - 单行导入结果
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Imported { entity_ids: Vec<String> },
    Failed { error: RowError },
}

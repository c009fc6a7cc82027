// ==========================================
// 批量导入管道 - API 层错误类型
// ==========================================
// 职责: 把导入层/仓储层错误转换为调用方可处理的类别
// 说明: 行级校验/导入错误是数据，不经过这里
// ==========================================

use crate::i18n::t_with_args;
use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// API 层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 文件错误（未创建会话）
    // ==========================================
    #[error("文件过大: {size} 字节，上限 {limit} 字节")]
    FileTooLarge { size: usize, limit: usize },

    #[error("文件格式不支持: {0}")]
    UnsupportedFormat(String),

    #[error("文件无法解码: {0}")]
    CorruptFile(String),

    // ==========================================
    // 状态错误（会话未被修改）
    // ==========================================
    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("会话已导入: {0}")]
    AlreadyImported(String),

    #[error("会话正在处理中: {0}")]
    SessionBusy(String),

    #[error("尚未实现: {0}")]
    NotImplemented(String),

    // ==========================================
    // 输入 / 基础设施错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 稳定的错误码（供前端分支处理）
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            ApiError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ApiError::CorruptFile(_) => "CORRUPT_FILE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            ApiError::AlreadyImported(_) => "ALREADY_IMPORTED",
            ApiError::SessionBusy(_) => "SESSION_BUSY",
            ApiError::NotImplemented(_) => "NOT_IMPLEMENTED",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::ConfigError(_) => "CONFIG_ERROR",
            ApiError::InternalError(_) | ApiError::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// 本地化的用户提示
    pub fn user_message(&self) -> String {
        let detail = self.to_string();
        let key = match self {
            ApiError::FileTooLarge { .. }
            | ApiError::UnsupportedFormat(_)
            | ApiError::CorruptFile(_)
            | ApiError::InvalidInput(_) => "api.structural",
            ApiError::NotFound(id) => {
                return t_with_args("api.not_found", &[("detail", id)]);
            }
            ApiError::InvalidStateTransition { .. }
            | ApiError::AlreadyImported(_)
            | ApiError::SessionBusy(_)
            | ApiError::NotImplemented(_) => "api.state",
            _ => "api.internal",
        };
        t_with_args(key, &[("detail", &detail)])
    }

    pub fn to_body(&self) -> ApiErrorBody {
        ApiErrorBody {
            code: self.code().to_string(),
            message: self.user_message(),
        }
    }
}

/// 序列化给调用方的错误体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

// ==========================================
// 从 ImportError 转换
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::FileTooLarge { size, limit } => ApiError::FileTooLarge { size, limit },
            ImportError::UnsupportedFormat(msg) => ApiError::UnsupportedFormat(msg),
            ImportError::CorruptFile(msg) => ApiError::CorruptFile(msg),
            ImportError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            ImportError::AlreadyImported(id) => ApiError::AlreadyImported(id),
            ImportError::SessionBusy(id) => ApiError::SessionBusy(id),
            ImportError::NotFound(id) => ApiError::NotFound(id),
            ImportError::NotImplemented(what) => ApiError::NotImplemented(what),
            ImportError::Repository(err) => err.into(),
            ImportError::ConfigReadError { key, message } => {
                ApiError::ConfigError(format!("{}: {}", key, message))
            }
            ImportError::InternalError(msg) => ApiError::InternalError(msg),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg)
            | RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg)
            | RepositoryError::UniqueConstraintViolation(msg)
            | RepositoryError::ForeignKeyViolation(msg) => ApiError::DatabaseError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::SerializationError(msg) | RepositoryError::InternalError(msg) => {
                ApiError::InternalError(msg)
            }
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

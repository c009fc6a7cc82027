// ==========================================
// 批量导入管道 - 导入模块错误类型
// ==========================================
// 分类:
// - 结构错误: 会话创建之前发生，不产生会话
// - 状态错误: 调用方误用，不修改任何会话
// - 行级校验/导入错误不走这里，作为数据记录在会话上
// 工具: thiserror 派生宏
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 结构错误 =====
    #[error("文件格式不支持: {0}（仅支持 .xlsx/.xls/.ods/.csv/.xml）")]
    UnsupportedFormat(String),

    #[error("文件无法解码: {0}")]
    CorruptFile(String),

    #[error("文件过大: {size} 字节，上限 {limit} 字节")]
    FileTooLarge { size: usize, limit: usize },

    // ===== 状态错误 =====
    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("会话已导入，不能重复导入: {0}")]
    AlreadyImported(String),

    #[error("会话正在处理中: {0}")]
    SessionBusy(String),

    #[error("会话不存在: {0}")]
    NotFound(String),

    #[error("实体类型尚未实现导入: {0}")]
    NotImplemented(String),

    // ===== 基础设施错误 =====
    #[error("仓储错误: {0}")]
    Repository(RepositoryError),

    #[error("配置读取失败 (key: {key}): {message}")]
    ConfigReadError { key: String, message: String },

    #[error("内部错误: {0}")]
    InternalError(String),
}

impl ImportError {
    /// 结构错误（文件层面，未创建会话）
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ImportError::UnsupportedFormat(_)
                | ImportError::CorruptFile(_)
                | ImportError::FileTooLarge { .. }
        )
    }

    /// 状态错误（调用方误用）
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            ImportError::InvalidStateTransition { .. }
                | ImportError::AlreadyImported(_)
                | ImportError::SessionBusy(_)
                | ImportError::NotFound(_)
                | ImportError::NotImplemented(_)
        )
    }
}

// 实现 From<RepositoryError>（NotFound 提升为状态错误）
impl From<RepositoryError> for ImportError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } if entity == "upload_session" => {
                ImportError::NotFound(id)
            }
            other => ImportError::Repository(other),
        }
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CorruptFile(format!("CSV 解析失败: {}", err))
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::CorruptFile(format!("Excel 解析失败: {}", err))
    }
}

// 实现 From<quick_xml::Error>
impl From<quick_xml::Error> for ImportError {
    fn from(err: quick_xml::Error) -> Self {
        ImportError::CorruptFile(format!("XML 解析失败: {}", err))
    }
}

// 实现 From<rust_xlsxwriter::XlsxError>
impl From<rust_xlsxwriter::XlsxError> for ImportError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        ImportError::InternalError(format!("模板生成失败: {}", err))
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ImportError::FileTooLarge { size: 11, limit: 10 }.is_structural());
        assert!(ImportError::CorruptFile("zip".into()).is_structural());
        assert!(!ImportError::SessionBusy("s1".into()).is_structural());
        assert!(ImportError::AlreadyImported("s1".into()).is_state_error());
    }

    #[test]
    fn test_session_not_found_is_promoted() {
        let err: ImportError = RepositoryError::NotFound {
            entity: "upload_session".to_string(),
            id: "abc".to_string(),
        }
        .into();
        assert!(matches!(err, ImportError::NotFound(id) if id == "abc"));

        let err: ImportError = RepositoryError::UniqueConstraintViolation("x".into()).into();
        assert!(matches!(err, ImportError::Repository(_)));
    }
}

// ==========================================
// 批量导入管道 - 领域模型层
// ==========================================
// 职责: 定义上传会话、行数据、领域类型
// 红线: 不含数据访问逻辑,不含管道逻辑
// ==========================================

pub mod row;
pub mod session;
pub mod types;

// 重导出核心类型
pub use row::{
    AdvanceRecord, ExpenseRecord, ParsedRecord, PaymentMethod, ProjectRecord, ProjectStatus,
    RawRow, SaleRecord, ValidRow,
};
pub use session::{
    ErrorStage, ListPatch, RowError, RowOutcome, SessionPatch, UploadMetadata, UploadSession,
    UploadSessionSummary,
};
pub use types::{EntityKind, EntityType, FileFormat, ReferenceKind, SessionState};

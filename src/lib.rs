// ==========================================
// 批量导入管道 - 核心库
// ==========================================
// 三阶段: 上传(解析) → 校验 → 导入
// 实体: 预收款 / 费用 / 销售 / 项目
// 技术栈: Rust + SQLite
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "es");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 导入层 - 解析/校验/导入/编排
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// API 层 - 对外接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{EntityKind, EntityType, FileFormat, ReferenceKind, SessionState};

// 领域实体
pub use domain::row::{ParsedRecord, RawRow, ValidRow};
pub use domain::session::{RowError, UploadMetadata, UploadSession, UploadSessionSummary};

// 管道
pub use importer::{ImportError, ImportResult, PipelineOrchestrator};

// API
pub use api::{ApiError, ImportApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "bulk-import";

// ==========================================
// 批量导入管道 - 配置层
// ==========================================
// 职责: 管道配置读取，支持覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod import_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use import_config_trait::{ConfigResult, PipelineConfigReader, PipelineSettings};

// ==========================================
// 批量导入管道 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod domain_repo;
pub mod domain_repo_impl;
pub mod error;
pub mod upload_session_repo;
pub mod upload_session_repo_impl;

// 重导出核心仓储
pub use domain_repo::{DomainRepository, EntityDraft, EntityFields, ParentLink};
pub use domain_repo_impl::DomainRepositoryImpl;
pub use error::{RepositoryError, RepositoryResult};
pub use upload_session_repo::UploadSessionStore;
pub use upload_session_repo_impl::UploadSessionRepositoryImpl;

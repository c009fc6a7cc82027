// ==========================================
// 批量导入管道 - 上传会话 Repository Trait
// ==========================================
// 职责: 定义上传会话与行数据的存取接口（不包含业务逻辑）
// 红线: 会话状态只存在于此；状态转换规则由编排器负责
// ==========================================

use crate::domain::row::{RawRow, ValidRow};
use crate::domain::session::{RowOutcome, SessionPatch, UploadSession, UploadSessionSummary};
use crate::domain::types::{EntityType, SessionState};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;

// ==========================================
// UploadSessionStore Trait
// ==========================================
// 用途: 上传会话持久化
// 实现者: UploadSessionRepositoryImpl（使用 rusqlite）
#[async_trait]
pub trait UploadSessionStore: Send + Sync {
    /// 创建会话并保存原始行（同一事务）
    async fn create(&self, session: &UploadSession, rows: &[RawRow]) -> RepositoryResult<()>;

    /// 按 id 读取会话
    ///
    /// # 返回
    /// - Err(NotFound): id 不存在
    async fn get(&self, id: &str) -> RepositoryResult<UploadSession>;

    /// 应用补丁（按字段 last-write-wins），返回更新后的会话
    async fn update(&self, id: &str, patch: SessionPatch) -> RepositoryResult<UploadSession>;

    /// 最近的会话（按创建时间倒序）
    async fn list_recent(
        &self,
        entity_type: Option<EntityType>,
        limit: usize,
    ) -> RepositoryResult<Vec<UploadSessionSummary>>;

    /// 读取会话的原始行（按 index 升序）
    async fn load_rows(&self, id: &str) -> RepositoryResult<Vec<RawRow>>;

    /// 保存校验结论：valid_rows 标记为有效，其余行标记为无效
    async fn save_verdicts(&self, id: &str, valid_rows: &[ValidRow]) -> RepositoryResult<()>;

    /// 读取有效行（按 index 升序）；已有导入结果的行不返回
    async fn load_valid_rows(&self, id: &str) -> RepositoryResult<Vec<ValidRow>>;

    /// 记录单行导入结果（原子地累加 imported_row_count 或追加导入错误）
    async fn record_row_outcome(
        &self,
        id: &str,
        row_index: usize,
        outcome: &RowOutcome,
    ) -> RepositoryResult<()>;

    /// 按状态列出会话（用于中断恢复）
    async fn list_by_state(&self, state: SessionState) -> RepositoryResult<Vec<UploadSession>>;
}

// ==========================================
// 批量导入管道 - 领域记录 Repository Trait
// ==========================================
// 职责: 业务记录写入 + 参照数据查询（客户/项目/类别）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::types::{EntityKind, ReferenceKind};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

/// 记录字段（列名 → 文本值）；未出现的列写入 NULL
pub type EntityFields = BTreeMap<String, String>;

// ==========================================
// EntityDraft - 待写入的记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDraft {
    pub kind: EntityKind,
    pub fields: EntityFields,
    /// 指向同一单元中先写入的记录：写入时 field 列填入该记录的 id
    pub parent: Option<ParentLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub field: String,
    pub index: usize,
}

impl EntityDraft {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            fields: EntityFields::new(),
            parent: None,
        }
    }

    /// 设置字段（None 不写入）
    pub fn with(mut self, field: &str, value: Option<String>) -> Self {
        if let Some(value) = value {
            self.fields.insert(field.to_string(), value);
        }
        self
    }

    pub fn linked_to(mut self, field: &str, index: usize) -> Self {
        self.parent = Some(ParentLink {
            field: field.to_string(),
            index,
        });
        self
    }
}

// ==========================================
// DomainRepository Trait
// ==========================================
// 用途: 导入执行器写入业务记录、校验器查询参照数据
// 实现者: DomainRepositoryImpl（使用 rusqlite）
#[async_trait]
pub trait DomainRepository: Send + Sync {
    /// 写入单条记录，返回新 id
    async fn create_entity(&self, kind: EntityKind, fields: EntityFields) -> RepositoryResult<String>;

    /// 原子写入一个记录单元（如 费用 + 应付款）
    ///
    /// # 返回
    /// - Ok(Vec<String>): 按 drafts 顺序的新 id
    /// - Err: 任一记录失败则整个单元回滚
    async fn create_unit(&self, drafts: Vec<EntityDraft>) -> RepositoryResult<Vec<String>>;

    /// 按业务键查找参照记录 id
    async fn find_reference(&self, kind: ReferenceKind, key: &str) -> RepositoryResult<Option<String>>;

    /// 批量查找参照记录（业务键 → id）；找不到的键不出现在结果中
    async fn find_references(
        &self,
        kind: ReferenceKind,
        keys: &[String],
    ) -> RepositoryResult<HashMap<String, String>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(id) = self.find_reference(kind, key).await? {
                found.insert(key.clone(), id);
            }
        }
        Ok(found)
    }
}

// ==========================================
// 批量导入管道 - 管道配置读取 Trait
// ==========================================
// 职责: 定义导入管道所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::error::Error;

/// 配置读取结果
pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// PipelineConfigReader Trait
// ==========================================
// 用途: 导入管道所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait PipelineConfigReader: Send + Sync {
    /// 上传文件大小上限（字节）
    ///
    /// # 默认值
    /// - 10 MiB
    async fn get_max_file_size_bytes(&self) -> ConfigResult<usize>;

    /// 是否允许部分导入（error_validacion 状态下只导入有效行）
    ///
    /// # 默认值
    /// - false
    async fn get_allow_partial_import(&self) -> ConfigResult<bool>;

    /// 导入并发度（同时写入的行数）
    ///
    /// # 默认值
    /// - 4（取值范围 1..=64）
    async fn get_import_parallelism(&self) -> ConfigResult<usize>;

    /// 历史列表默认条数
    ///
    /// # 默认值
    /// - 20
    async fn get_history_default_limit(&self) -> ConfigResult<usize>;

    /// IVA 税率列表（百分比）
    ///
    /// # 默认值
    /// - [0, 5, 15]
    ///
    /// # 用途
    /// - 税额与任何税率都不匹配时产生提示（不阻断导入）
    async fn get_vat_rates(&self) -> ConfigResult<Vec<Decimal>>;

    /// 校验消息语言
    ///
    /// # 默认值
    /// - "es"
    async fn get_locale(&self) -> ConfigResult<String>;
}

// ==========================================
// PipelineSettings - 单次操作使用的配置快照
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub max_file_size_bytes: usize,
    pub allow_partial_import: bool,
    pub import_parallelism: usize,
    pub history_default_limit: usize,
    pub vat_rates: Vec<Decimal>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * 1024 * 1024,
            allow_partial_import: false,
            import_parallelism: 4,
            history_default_limit: 20,
            vat_rates: vec![Decimal::ZERO, Decimal::new(5, 0), Decimal::new(15, 0)],
        }
    }
}

impl PipelineSettings {
    /// 一次性读取全部管道配置
    pub async fn load(reader: &dyn PipelineConfigReader) -> ConfigResult<Self> {
        Ok(Self {
            max_file_size_bytes: reader.get_max_file_size_bytes().await?,
            allow_partial_import: reader.get_allow_partial_import().await?,
            import_parallelism: reader.get_import_parallelism().await?,
            history_default_limit: reader.get_history_default_limit().await?,
            vat_rates: reader.get_vat_rates().await?,
        })
    }
}

// ==========================================
// 批量导入管道 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::{ConfigResult, PipelineConfigReader};
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> ConfigResult<String> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 获取所有 global 配置的快照
    pub fn get_config_snapshot(&self) -> ConfigResult<BTreeMap<String, String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut snapshot = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }
}

// ==========================================
// PipelineConfigReader Trait 实现
// ==========================================
// 配置值格式错误时回落到默认值（与缺省一致）
#[async_trait]
impl PipelineConfigReader for ConfigManager {
    async fn get_max_file_size_bytes(&self) -> ConfigResult<usize> {
        let value = self.get_config_or_default(config_keys::MAX_FILE_SIZE_BYTES, "10485760")?;
        Ok(value
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|&v| v > 0)
            .unwrap_or(10 * 1024 * 1024))
    }

    async fn get_allow_partial_import(&self) -> ConfigResult<bool> {
        let value = self.get_config_or_default(config_keys::ALLOW_PARTIAL_IMPORT, "false")?;
        Ok(matches!(
            value.trim().to_lowercase().as_str(),
            "true" | "1" | "yes" | "si" | "on"
        ))
    }

    async fn get_import_parallelism(&self) -> ConfigResult<usize> {
        let value = self.get_config_or_default(config_keys::IMPORT_PARALLELISM, "4")?;
        Ok(value.trim().parse::<usize>().unwrap_or(4).clamp(1, 64))
    }

    async fn get_history_default_limit(&self) -> ConfigResult<usize> {
        let value = self.get_config_or_default(config_keys::HISTORY_DEFAULT_LIMIT, "20")?;
        Ok(value
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|&v| v > 0)
            .unwrap_or(20))
    }

    async fn get_vat_rates(&self) -> ConfigResult<Vec<Decimal>> {
        let value = self.get_config_or_default(config_keys::VAT_RATES, "0,5,15")?;

        let rates: Vec<Decimal> = value
            .split(',')
            .filter_map(|s| Decimal::from_str(s.trim()).ok())
            .filter(|r| !r.is_sign_negative())
            .collect();

        if rates.is_empty() {
            Ok(vec![Decimal::ZERO, Decimal::new(5, 0), Decimal::new(15, 0)])
        } else {
            Ok(rates)
        }
    }

    async fn get_locale(&self) -> ConfigResult<String> {
        let value = self.get_config_or_default(config_keys::LOCALE, "es")?;
        let locale = value.trim().to_lowercase();
        Ok(if locale.is_empty() { "es".to_string() } else { locale })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 上传
    pub const MAX_FILE_SIZE_BYTES: &str = "import.max_file_size_bytes";

    // 导入
    pub const ALLOW_PARTIAL_IMPORT: &str = "import.allow_partial_import";
    pub const IMPORT_PARALLELISM: &str = "import.parallelism";

    // 历史
    pub const HISTORY_DEFAULT_LIMIT: &str = "import.history_default_limit";

    // 校验提示
    pub const VAT_RATES: &str = "import.vat_rates";

    // 国际化
    pub const LOCALE: &str = "i18n.locale";
}

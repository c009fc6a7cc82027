// ==========================================
// 批量导入管道 - 领域类型定义
// ==========================================
// 职责: 实体类型 / 文件格式 / 会话状态 / 引用类型
// 序列化格式: 与前端、数据库保持一致（小写/下划线）
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 实体类型 (Entity Type)
// ==========================================
// 决定使用哪套校验规则与导入器
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Advance, // 预收款/预付款
    Expense, // 费用
    Sale,    // 销售
    Project, // 项目
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Advance,
        EntityType::Expense,
        EntityType::Sale,
        EntityType::Project,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Advance => "advance",
            EntityType::Expense => "expense",
            EntityType::Sale => "sale",
            EntityType::Project => "project",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "advance" | "anticipo" | "anticipos" => Ok(EntityType::Advance),
            "expense" | "gasto" | "gastos" => Ok(EntityType::Expense),
            "sale" | "venta" | "ventas" => Ok(EntityType::Sale),
            "project" | "proyecto" | "proyectos" => Ok(EntityType::Project),
            other => Err(format!("未知实体类型: {}", other)),
        }
    }
}

// ==========================================
// 文件格式 (File Format)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Spreadsheet, // .xlsx / .xls / .ods
    Csv,         // .csv
    Markup,      // .xml 电子发票
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Spreadsheet => "spreadsheet",
            FileFormat::Csv => "csv",
            FileFormat::Markup => "markup",
        }
    }

    /// 根据文件扩展名推断格式（不区分大小写）
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let ext = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())?;

        match ext.as_str() {
            "xlsx" | "xlsm" | "xls" | "ods" => Some(FileFormat::Spreadsheet),
            "csv" | "txt" => Some(FileFormat::Csv),
            "xml" => Some(FileFormat::Markup),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spreadsheet" | "xlsx" | "excel" => Ok(FileFormat::Spreadsheet),
            "csv" => Ok(FileFormat::Csv),
            "markup" | "xml" => Ok(FileFormat::Markup),
            other => Err(format!("未知文件格式: {}", other)),
        }
    }
}

// ==========================================
// 会话状态 (Session State)
// ==========================================
// 状态机:
//   subido → validando → validado | error_validacion
//   validado → importando → importado | error_importacion
// 序列化格式: 与前端约定的西语状态名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    #[serde(rename = "subido")]
    Uploaded,
    #[serde(rename = "validando")]
    Validating,
    #[serde(rename = "validado")]
    Validated,
    #[serde(rename = "error_validacion")]
    ValidationFailed,
    #[serde(rename = "importando")]
    Importing,
    #[serde(rename = "importado")]
    Imported,
    #[serde(rename = "error_importacion")]
    ImportFailed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uploaded => "subido",
            SessionState::Validating => "validando",
            SessionState::Validated => "validado",
            SessionState::ValidationFailed => "error_validacion",
            SessionState::Importing => "importando",
            SessionState::Imported => "importado",
            SessionState::ImportFailed => "error_importacion",
        }
    }

    /// 过渡态（仅在阶段执行期间出现）
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionState::Validating | SessionState::Importing)
    }

    /// 导入阶段已结束（成功或部分失败），会话只读
    pub fn is_import_finished(&self) -> bool {
        matches!(self, SessionState::Imported | SessionState::ImportFailed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "subido" => Ok(SessionState::Uploaded),
            "validando" => Ok(SessionState::Validating),
            "validado" => Ok(SessionState::Validated),
            "error_validacion" => Ok(SessionState::ValidationFailed),
            "importando" => Ok(SessionState::Importing),
            "importado" => Ok(SessionState::Imported),
            "error_importacion" => Ok(SessionState::ImportFailed),
            other => Err(format!("未知会话状态: {}", other)),
        }
    }
}

// ==========================================
// 引用类型 (Reference Kind)
// ==========================================
// 引用校验时需要查找的外部实体
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Client,   // 客户（按 RUC）
    Project,  // 项目（按编码）
    Category, // 费用类别（按编码）
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Client => "client",
            ReferenceKind::Project => "project",
            ReferenceKind::Category => "category",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 领域记录类型 (Entity Kind)
// ==========================================
// 导入时真正写入的记录种类；一行可能产生多条记录
// （如赊账费用 = 费用 + 应付款）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Advance,
    Expense,
    Payable,
    Sale,
    Receivable,
    Project,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Advance,
        EntityKind::Expense,
        EntityKind::Payable,
        EntityKind::Sale,
        EntityKind::Receivable,
        EntityKind::Project,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Advance => "advance",
            EntityKind::Expense => "expense",
            EntityKind::Payable => "payable",
            EntityKind::Sale => "sale",
            EntityKind::Receivable => "receivable",
            EntityKind::Project => "project",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("未知记录种类: {}", s.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_parses_its_own_name() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>(), Ok(kind));
        }
        assert_eq!(" Payable ".parse::<EntityKind>(), Ok(EntityKind::Payable));
        assert!("cliente".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_session_state_wire_names() {
        let json = serde_json::to_string(&SessionState::ValidationFailed).unwrap();
        assert_eq!(json, "\"error_validacion\"");

        for state in [
            SessionState::Uploaded,
            SessionState::Validating,
            SessionState::Validated,
            SessionState::ValidationFailed,
            SessionState::Importing,
            SessionState::Imported,
            SessionState::ImportFailed,
        ] {
            assert_eq!(state.as_str().parse::<SessionState>().unwrap(), state);
        }
    }

    #[test]
    fn test_file_format_from_extension() {
        assert_eq!(FileFormat::from_file_name("gastos.XLSX"), Some(FileFormat::Spreadsheet));
        assert_eq!(FileFormat::from_file_name("ventas.csv"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_file_name("factura.xml"), Some(FileFormat::Markup));
        assert_eq!(FileFormat::from_file_name("reporte.pdf"), None);
        assert_eq!(FileFormat::from_file_name("sin_extension"), None);
    }

    #[test]
    fn test_entity_type_accepts_spanish_aliases() {
        assert_eq!("gastos".parse::<EntityType>().unwrap(), EntityType::Expense);
        assert_eq!("Anticipo".parse::<EntityType>().unwrap(), EntityType::Advance);
        assert!("factura".parse::<EntityType>().is_err());
    }
}

// ==========================================
// 批量导入管道 - 行数据模型
// ==========================================
// 职责: 原始行 (RawRow) 与类型化记录 (ParsedRecord)
// 说明: ParsedRecord 为按实体类型区分的标签联合，
//       字段集合由实体 schema 固定
// ==========================================

use crate::domain::types::EntityType;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ==========================================
// RawRow - 原始行
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    /// 1 起的行序号（仅计非空数据行）
    pub index: usize,
    /// 源文件物理行号
    pub line: usize,
    /// 逻辑字段名 → 原始字符串
    pub values: BTreeMap<String, String>,
}

impl RawRow {
    pub fn new(index: usize, line: usize, values: BTreeMap<String, String>) -> Self {
        Self {
            index,
            line,
            values,
        }
    }

    /// 取字段原始值（缺失视为空串）
    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map(|v| v.as_str()).unwrap_or("")
    }

    /// 所有列均为空白
    pub fn is_blank(&self) -> bool {
        self.values.values().all(|v| v.trim().is_empty())
    }
}

// ==========================================
// 付款方式 (Payment Method)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Efectivo,
    Transferencia,
    Cheque,
    Tarjeta,
    Credito,
}

impl PaymentMethod {
    pub const ALLOWED: &'static [&'static str] =
        &["efectivo", "transferencia", "cheque", "tarjeta", "credito"];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Efectivo => "efectivo",
            PaymentMethod::Transferencia => "transferencia",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Tarjeta => "tarjeta",
            PaymentMethod::Credito => "credito",
        }
    }

    /// 赊账（需要生成应付/应收）
    pub fn is_credit(&self) -> bool {
        matches!(self, PaymentMethod::Credito)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "efectivo" => Ok(PaymentMethod::Efectivo),
            "transferencia" => Ok(PaymentMethod::Transferencia),
            "cheque" => Ok(PaymentMethod::Cheque),
            "tarjeta" => Ok(PaymentMethod::Tarjeta),
            "credito" => Ok(PaymentMethod::Credito),
            other => Err(format!("未知付款方式: {}", other)),
        }
    }
}

// ==========================================
// 项目状态 (Project Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planificado,
    EnCurso,
    Finalizado,
}

impl ProjectStatus {
    pub const ALLOWED: &'static [&'static str] = &["planificado", "en_curso", "finalizado"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planificado => "planificado",
            ProjectStatus::EnCurso => "en_curso",
            ProjectStatus::Finalizado => "finalizado",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planificado" => Ok(ProjectStatus::Planificado),
            "en_curso" => Ok(ProjectStatus::EnCurso),
            "finalizado" => Ok(ProjectStatus::Finalizado),
            other => Err(format!("未知项目状态: {}", other)),
        }
    }
}

// ==========================================
// 类型化记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvanceRecord {
    pub client_ruc: String,
    pub client_id: String,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub received_date: NaiveDate,
    pub estimated_application_date: Option<NaiveDate>,
    pub project_code: Option<String>,
    pub project_id: Option<String>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub supplier_ruc: String,
    pub supplier_name: String,
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    pub category_code: String,
    pub category_id: String,
    pub project_code: Option<String>,
    pub project_id: Option<String>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub due_date: Option<NaiveDate>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub client_ruc: String,
    pub client_id: String,
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub due_date: Option<NaiveDate>,
    pub project_code: Option<String>,
    pub project_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub code: String,
    pub name: String,
    pub client_ruc: String,
    pub client_id: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub budget: Option<Decimal>,
    pub status: ProjectStatus,
    pub description: Option<String>,
}

/// 按实体类型区分的类型化记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "lowercase")]
pub enum ParsedRecord {
    Advance(AdvanceRecord),
    Expense(ExpenseRecord),
    Sale(SaleRecord),
    Project(ProjectRecord),
}

impl ParsedRecord {
    pub fn entity_type(&self) -> EntityType {
        match self {
            ParsedRecord::Advance(_) => EntityType::Advance,
            ParsedRecord::Expense(_) => EntityType::Expense,
            ParsedRecord::Sale(_) => EntityType::Sale,
            ParsedRecord::Project(_) => EntityType::Project,
        }
    }
}

// ==========================================
// ValidRow - 通过校验的行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidRow {
    pub index: usize,
    pub line: usize,
    pub record: ParsedRecord,
}

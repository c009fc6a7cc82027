// ==========================================
// 批量导入管道 - 实体业务规则
// ==========================================
// 职责:
// - TypedRow: 通过类型转换后的行
// - 各实体的跨字段规则（金额、日期先后、赊账到期日）
// - 构建类型化记录 ParsedRecord（引用 id 已解析）
// ==========================================

use crate::domain::row::{
    AdvanceRecord, ExpenseRecord, ParsedRecord, PaymentMethod, ProjectRecord, ProjectStatus,
    SaleRecord,
};
use crate::domain::session::RowError;
use crate::domain::types::{EntityType, ReferenceKind};
use crate::i18n::t_with_args;
use crate::importer::error::{ImportError, ImportResult};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// 合计容差
pub const TOTAL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

// ==========================================
// TypedValue / TypedRow
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Text(String),
    Decimal(Decimal),
    Date(NaiveDate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedRow {
    pub index: usize,
    pub line: usize,
    pub values: HashMap<&'static str, TypedValue>,
}

impl TypedRow {
    pub fn new(index: usize, line: usize) -> Self {
        Self {
            index,
            line,
            values: HashMap::new(),
        }
    }

    pub fn text(&self, field: &str) -> Option<String> {
        match self.values.get(field) {
            Some(TypedValue::Text(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn decimal(&self, field: &str) -> Option<Decimal> {
        match self.values.get(field) {
            Some(TypedValue::Decimal(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        match self.values.get(field) {
            Some(TypedValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    fn require_text(&self, field: &str) -> ImportResult<String> {
        self.text(field).ok_or_else(|| missing(self.index, field))
    }

    fn require_decimal(&self, field: &str) -> ImportResult<Decimal> {
        self.decimal(field).ok_or_else(|| missing(self.index, field))
    }

    fn require_date(&self, field: &str) -> ImportResult<NaiveDate> {
        self.date(field).ok_or_else(|| missing(self.index, field))
    }

    fn error(&self, field: &str, value: impl Into<String>, message: String) -> RowError {
        RowError::validation(self.index, self.line, field, value, message)
    }
}

fn missing(row: usize, field: &str) -> ImportError {
    ImportError::InternalError(format!("行 {} 缺少已校验字段 {}", row, field))
}

/// 参照解析结果: 引用类型 → (业务键 → id)
pub type ResolvedRefs = HashMap<ReferenceKind, HashMap<String, String>>;

fn resolved(refs: &ResolvedRefs, kind: ReferenceKind, key: Option<&String>) -> Option<String> {
    let key = key?;
    refs.get(&kind).and_then(|m| m.get(key)).cloned()
}

// ==========================================
// 跨字段规则（格式类）
// ==========================================

/// 各实体的跨字段规则；返回全部失败项
pub fn cross_field_errors(entity_type: EntityType, row: &TypedRow, today: NaiveDate) -> Vec<RowError> {
    let mut errors = Vec::new();
    match entity_type {
        EntityType::Advance => {
            check_positive(row, "amount", &mut errors);
            if let Some(estimated) = row.date("estimated_application_date") {
                if estimated < today {
                    errors.push(row.error(
                        "estimated_application_date",
                        estimated.to_string(),
                        t_with_args(
                            "validation.date_in_past",
                            &[("field", "estimated_application_date"), ("value", &estimated.to_string())],
                        ),
                    ));
                }
            }
        }
        EntityType::Expense | EntityType::Sale => {
            check_positive(row, "subtotal", &mut errors);
            check_non_negative(row, "tax_amount", &mut errors);
            check_positive(row, "amount", &mut errors);
            check_total(row, &mut errors);
            check_date_order(row, "due_date", "issue_date", &mut errors);
            check_credit_due_date(row, &mut errors);
        }
        EntityType::Project => {
            check_non_negative(row, "budget", &mut errors);
            check_date_order(row, "end_date", "start_date", &mut errors);
        }
    }
    errors
}

fn check_positive(row: &TypedRow, field: &str, errors: &mut Vec<RowError>) {
    if let Some(v) = row.decimal(field) {
        if v <= Decimal::ZERO {
            errors.push(row.error(field, v.to_string(), t_with_args("validation.not_positive", &[("field", field)])));
        }
    }
}

fn check_non_negative(row: &TypedRow, field: &str, errors: &mut Vec<RowError>) {
    if let Some(v) = row.decimal(field) {
        if v.is_sign_negative() && !v.is_zero() {
            errors.push(row.error(field, v.to_string(), t_with_args("validation.negative", &[("field", field)])));
        }
    }
}

/// amount == subtotal + tax_amount（容差 0.01）
fn check_total(row: &TypedRow, errors: &mut Vec<RowError>) {
    let (Some(amount), Some(subtotal)) = (row.decimal("amount"), row.decimal("subtotal")) else {
        return;
    };
    let expected = subtotal + row.decimal("tax_amount").unwrap_or(Decimal::ZERO);
    if (amount - expected).abs() > TOTAL_TOLERANCE {
        errors.push(row.error(
            "amount",
            amount.to_string(),
            t_with_args(
                "validation.total_mismatch",
                &[("value", &amount.to_string()), ("expected", &expected.to_string())],
            ),
        ));
    }
}

/// later >= earlier（任一缺失则跳过）
fn check_date_order(row: &TypedRow, later: &str, earlier: &str, errors: &mut Vec<RowError>) {
    if let (Some(l), Some(e)) = (row.date(later), row.date(earlier)) {
        if l < e {
            errors.push(row.error(
                later,
                l.to_string(),
                t_with_args(
                    "validation.date_order",
                    &[("field", later), ("value", &l.to_string()), ("other", earlier)],
                ),
            ));
        }
    }
}

fn check_credit_due_date(row: &TypedRow, errors: &mut Vec<RowError>) {
    let on_credit = row.text("payment_method").as_deref() == Some(PaymentMethod::Credito.as_str());
    if on_credit && row.date("due_date").is_none() {
        errors.push(row.error("due_date", "", t_with_args("validation.credit_requires_due_date", &[])));
    }
}

// ==========================================
// 构建类型化记录
// ==========================================
pub fn build_record(entity_type: EntityType, row: &TypedRow, refs: &ResolvedRefs) -> ImportResult<ParsedRecord> {
    let project_code = row.text("project_code");
    let project_id = resolved(refs, ReferenceKind::Project, project_code.as_ref());

    let record = match entity_type {
        EntityType::Advance => {
            let client_ruc = row.require_text("client_ruc")?;
            ParsedRecord::Advance(AdvanceRecord {
                client_id: resolved(refs, ReferenceKind::Client, Some(&client_ruc))
                    .ok_or_else(|| missing(row.index, "client_id"))?,
                client_ruc,
                amount: row.require_decimal("amount")?,
                payment_method: payment_method(row)?,
                received_date: row.require_date("received_date")?,
                estimated_application_date: row.date("estimated_application_date"),
                project_code,
                project_id,
                reference: row.text("reference"),
                notes: row.text("notes"),
            })
        }
        EntityType::Expense => {
            let category_code = row.require_text("category_code")?;
            ParsedRecord::Expense(ExpenseRecord {
                supplier_ruc: row.require_text("supplier_ruc")?,
                supplier_name: row.require_text("supplier_name")?,
                invoice_number: row.require_text("invoice_number")?,
                issue_date: row.require_date("issue_date")?,
                category_id: resolved(refs, ReferenceKind::Category, Some(&category_code))
                    .ok_or_else(|| missing(row.index, "category_id"))?,
                category_code,
                project_code,
                project_id,
                subtotal: row.require_decimal("subtotal")?,
                tax_amount: row.decimal("tax_amount").unwrap_or(Decimal::ZERO),
                amount: row.require_decimal("amount")?,
                payment_method: payment_method(row)?,
                due_date: row.date("due_date"),
                description: row.text("description"),
            })
        }
        EntityType::Sale => {
            let client_ruc = row.require_text("client_ruc")?;
            ParsedRecord::Sale(SaleRecord {
                client_id: resolved(refs, ReferenceKind::Client, Some(&client_ruc))
                    .ok_or_else(|| missing(row.index, "client_id"))?,
                client_ruc,
                invoice_number: row.require_text("invoice_number")?,
                issue_date: row.require_date("issue_date")?,
                subtotal: row.require_decimal("subtotal")?,
                tax_amount: row.decimal("tax_amount").unwrap_or(Decimal::ZERO),
                amount: row.require_decimal("amount")?,
                payment_method: payment_method(row)?,
                due_date: row.date("due_date"),
                project_code,
                project_id,
                description: row.text("description"),
            })
        }
        EntityType::Project => {
            let client_ruc = row.require_text("client_ruc")?;
            let status = match row.text("status") {
                Some(s) => s.parse::<ProjectStatus>().map_err(ImportError::InternalError)?,
                None => ProjectStatus::Planificado,
            };
            ParsedRecord::Project(ProjectRecord {
                code: row.require_text("code")?,
                name: row.require_text("name")?,
                client_id: resolved(refs, ReferenceKind::Client, Some(&client_ruc))
                    .ok_or_else(|| missing(row.index, "client_id"))?,
                client_ruc,
                start_date: row.require_date("start_date")?,
                end_date: row.date("end_date"),
                budget: row.decimal("budget"),
                status,
                description: row.text("description"),
            })
        }
    };
    Ok(record)
}

fn payment_method(row: &TypedRow) -> ImportResult<PaymentMethod> {
    row.require_text("payment_method")?
        .parse::<PaymentMethod>()
        .map_err(ImportError::InternalError)
}

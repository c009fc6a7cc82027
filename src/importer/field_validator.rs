// ==========================================
// 批量导入管道 - 字段校验器
// ==========================================
// 规则按类别顺序执行，某一类失败即停止（同类失败全部报告）:
//   1. Schema      必填、类型转换（日期/金额/枚举）
//   2. Format      税号、发票号、编码格式 + 实体跨字段规则
//   3. Referential 客户/项目/类别存在性（按引用类型批量查询）
// 输出: 有效行（类型化记录）+ 行级错误 + 提示
// 说明: 除参照查询外为纯函数；相同输入相同输出
// ==========================================

use crate::domain::row::{ParsedRecord, RawRow, ValidRow};
use crate::domain::session::RowError;
use crate::domain::types::{EntityType, ReferenceKind};
use crate::i18n::{t, t_with_args};
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::entity_rules::{
    self, build_record, cross_field_errors, ResolvedRefs, TypedRow, TypedValue,
};
use crate::importer::error::ImportResult;
use crate::importer::schema::{ColumnSpec, EntitySchema, FieldKind, TemplateProvider};
use crate::importer::tax_id::validate_tax_id;
use crate::repository::domain_repo::DomainRepository;
use chrono::{Duration, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use tracing::debug;

fn invoice_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{3}-\d{3}-\d{9}$").expect("invalid invoice regex"))
}

fn code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9][A-Z0-9_-]*$").expect("invalid code regex"))
}

// ==========================================
// ValidationContext - 校验上下文
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationContext {
    /// 基准日期（"不得早于今天"/"远期日期"规则）
    pub today: NaiveDate,
    /// IVA 税率（百分比）
    pub vat_rates: Vec<Decimal>,
}

// ==========================================
// ValidationOutcome - 校验结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationOutcome {
    pub valid_rows: Vec<ValidRow>,
    /// 按 (row, 字段顺序) 排序
    pub errors: Vec<RowError>,
    pub warnings: Vec<String>,
    /// 完全空白、不计入任何计数的行
    pub skipped_blank: usize,
}

impl ValidationOutcome {
    /// 含错误的行数
    pub fn invalid_row_count(&self) -> usize {
        self.errors.iter().map(|e| e.row).collect::<BTreeSet<_>>().len()
    }
}

// ==========================================
// FieldValidator
// ==========================================
pub struct FieldValidator {
    domain_repo: Arc<dyn DomainRepository>,
    template_provider: Arc<dyn TemplateProvider>,
}

impl FieldValidator {
    pub fn new(
        domain_repo: Arc<dyn DomainRepository>,
        template_provider: Arc<dyn TemplateProvider>,
    ) -> Self {
        Self {
            domain_repo,
            template_provider,
        }
    }

    /// 校验一组原始行
    pub async fn validate(
        &self,
        entity_type: EntityType,
        rows: &[RawRow],
        ctx: &ValidationContext,
    ) -> ImportResult<ValidationOutcome> {
        let schema = self.template_provider.schema(entity_type);
        let mut outcome = ValidationOutcome::default();
        let mut pending: Vec<TypedRow> = Vec::new();

        for raw in rows {
            if raw.is_blank() {
                outcome.skipped_blank += 1;
                continue;
            }

            // 1. Schema
            let typed = match Self::coerce_row(&schema, raw) {
                Ok(typed) => typed,
                Err(errors) => {
                    outcome.errors.extend(errors);
                    continue;
                }
            };

            // 2. Format
            let mut errors = Self::format_errors(&schema, raw, &typed);
            errors.extend(cross_field_errors(entity_type, &typed, ctx.today));
            if !errors.is_empty() {
                outcome.errors.extend(errors);
                continue;
            }

            pending.push(typed);
        }

        // 3. Referential（每种引用类型一次批量查询）
        let refs = self.resolve_references(&schema, &pending).await?;
        for typed in pending {
            let errors = Self::reference_errors(&schema, &typed, &refs);
            if !errors.is_empty() {
                outcome.errors.extend(errors);
                continue;
            }
            outcome.valid_rows.push(ValidRow {
                index: typed.index,
                line: typed.line,
                record: build_record(entity_type, &typed, &refs)?,
            });
        }

        outcome
            .errors
            .sort_by_key(|e| (e.row, schema.field_order(&e.field)));
        outcome.warnings = Self::warnings(&schema, rows, &outcome.valid_rows, ctx);

        debug!(
            entity_type = %entity_type,
            valid = outcome.valid_rows.len(),
            invalid = outcome.invalid_row_count(),
            skipped_blank = outcome.skipped_blank,
            warnings = outcome.warnings.len(),
            "校验完成"
        );
        Ok(outcome)
    }

    // ==========================================
    // 1. Schema 类
    // ==========================================
    fn coerce_row(schema: &EntitySchema, raw: &RawRow) -> Result<TypedRow, Vec<RowError>> {
        let mut typed = TypedRow::new(raw.index, raw.line);
        let mut errors = Vec::new();

        for column in &schema.columns {
            let original = raw.get(column.field);
            let Some(value) = DataCleaner::normalize_null(original) else {
                if column.required {
                    errors.push(RowError::validation(
                        raw.index,
                        raw.line,
                        column.field,
                        original.trim(),
                        t_with_args("validation.required", &[("field", column.field)]),
                    ));
                }
                continue;
            };

            match Self::coerce_value(column, &value) {
                Some(v) => {
                    typed.values.insert(column.field, v);
                }
                None => errors.push(RowError::validation(
                    raw.index,
                    raw.line,
                    column.field,
                    value.clone(),
                    Self::coerce_message(column, &value),
                )),
            }
        }

        if errors.is_empty() {
            Ok(typed)
        } else {
            Err(errors)
        }
    }

    fn coerce_value(column: &ColumnSpec, value: &str) -> Option<TypedValue> {
        match column.kind {
            FieldKind::Text | FieldKind::TaxId | FieldKind::InvoiceNumber => {
                Some(TypedValue::Text(value.to_string()))
            }
            FieldKind::Code => Some(TypedValue::Text(value.to_uppercase())),
            FieldKind::Decimal => DataCleaner::parse_decimal(value).map(TypedValue::Decimal),
            FieldKind::Date => DataCleaner::parse_date(value).map(TypedValue::Date),
            FieldKind::Enum(allowed) => {
                DataCleaner::match_enum(value, allowed).map(|v| TypedValue::Text(v.to_string()))
            }
        }
    }

    fn coerce_message(column: &ColumnSpec, value: &str) -> String {
        match column.kind {
            FieldKind::Decimal => t_with_args(
                "validation.invalid_decimal",
                &[("field", column.field), ("value", value)],
            ),
            FieldKind::Date => t_with_args(
                "validation.invalid_date",
                &[("field", column.field), ("value", value)],
            ),
            FieldKind::Enum(allowed) => t_with_args(
                "validation.invalid_enum",
                &[
                    ("field", column.field),
                    ("value", value),
                    ("allowed", &allowed.join(", ")),
                ],
            ),
            _ => t_with_args("validation.required", &[("field", column.field)]),
        }
    }

    // ==========================================
    // 2. Format 类（字段级）
    // ==========================================
    fn format_errors(schema: &EntitySchema, raw: &RawRow, typed: &TypedRow) -> Vec<RowError> {
        let mut errors = Vec::new();
        for column in &schema.columns {
            let Some(value) = typed.text(column.field) else {
                continue;
            };
            let message = match column.kind {
                FieldKind::TaxId => validate_tax_id(&value).err().map(|reason| {
                    t_with_args(
                        "validation.invalid_tax_id",
                        &[("value", &value), ("reason", &t(reason.message_key()))],
                    )
                }),
                FieldKind::InvoiceNumber if !invoice_number_re().is_match(&value) => Some(
                    t_with_args("validation.invalid_invoice_number", &[("value", &value)]),
                ),
                FieldKind::Code if !code_re().is_match(&value) => {
                    Some(t_with_args("validation.invalid_code", &[("value", &value)]))
                }
                _ => None,
            };
            if let Some(message) = message {
                errors.push(RowError::validation(
                    raw.index,
                    raw.line,
                    column.field,
                    raw.get(column.field).trim(),
                    message,
                ));
            }
        }
        errors
    }

    // ==========================================
    // 3. Referential 类
    // ==========================================
    async fn resolve_references(
        &self,
        schema: &EntitySchema,
        rows: &[TypedRow],
    ) -> ImportResult<ResolvedRefs> {
        let mut keys: BTreeMap<ReferenceKind, BTreeSet<String>> = BTreeMap::new();
        for column in &schema.columns {
            let Some(kind) = column.reference else {
                continue;
            };
            for row in rows {
                if let Some(key) = row.text(column.field) {
                    keys.entry(kind).or_default().insert(key);
                }
            }
        }

        let mut refs = ResolvedRefs::new();
        for (kind, keys) in keys {
            let keys: Vec<String> = keys.into_iter().collect();
            let found = self.domain_repo.find_references(kind, &keys).await?;
            debug!(kind = %kind, requested = keys.len(), found = found.len(), "参照批量查询");
            refs.insert(kind, found);
        }
        Ok(refs)
    }

    fn reference_errors(schema: &EntitySchema, typed: &TypedRow, refs: &ResolvedRefs) -> Vec<RowError> {
        schema
            .columns
            .iter()
            .filter_map(|column| {
                let kind = column.reference?;
                let key = typed.text(column.field)?;
                if refs.get(&kind).is_some_and(|m| m.contains_key(&key)) {
                    return None;
                }
                let kind_label = t(&format!("reference.{}", kind.as_str()));
                Some(RowError::validation(
                    typed.index,
                    typed.line,
                    column.field,
                    key.clone(),
                    t_with_args(
                        "validation.reference_not_found",
                        &[("kind", &kind_label), ("value", &key)],
                    ),
                ))
            })
            .collect()
    }

    // ==========================================
    // 提示（不阻断导入）
    // ==========================================
    fn warnings(
        schema: &EntitySchema,
        rows: &[RawRow],
        valid_rows: &[ValidRow],
        ctx: &ValidationContext,
    ) -> Vec<String> {
        let mut warnings = Vec::new();

        // 同一文件内重复的发票号
        if schema.column("invoice_number").is_some() {
            let mut seen: BTreeMap<String, Vec<usize>> = BTreeMap::new();
            for raw in rows.iter().filter(|r| !r.is_blank()) {
                let invoice = raw.get("invoice_number").trim();
                if invoice.is_empty() {
                    continue;
                }
                let key = match schema.column("supplier_ruc") {
                    Some(_) => format!("{}|{}", raw.get("supplier_ruc").trim(), invoice),
                    None => invoice.to_string(),
                };
                seen.entry(key).or_default().push(raw.index);
            }
            let mut duplicates: Vec<(String, Vec<usize>)> = seen
                .into_iter()
                .filter(|(_, rows)| rows.len() > 1)
                .map(|(key, rows)| {
                    let invoice = key.rsplit('|').next().unwrap_or(&key).to_string();
                    (invoice, rows)
                })
                .collect();
            duplicates.sort_by_key(|(_, rows)| rows[0]);
            for (invoice, rows) in duplicates {
                let rows = rows.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", ");
                warnings.push(t_with_args(
                    "warning.duplicate_invoice",
                    &[("invoice", &invoice), ("rows", &rows)],
                ));
            }
        }

        // 逐行提示：税率不匹配 / 远期日期
        let horizon = ctx.today + Duration::days(365);
        for row in valid_rows {
            let (tax_pair, primary_date) = match &row.record {
                ParsedRecord::Advance(a) => (None, a.received_date),
                ParsedRecord::Expense(e) => (Some((e.subtotal, e.tax_amount)), e.issue_date),
                ParsedRecord::Sale(s) => (Some((s.subtotal, s.tax_amount)), s.issue_date),
                ParsedRecord::Project(p) => (None, p.start_date),
            };

            if let Some((subtotal, tax)) = tax_pair {
                if !tax.is_zero() && !Self::matches_vat_rate(subtotal, tax, &ctx.vat_rates) {
                    warnings.push(t_with_args(
                        "warning.vat_rate",
                        &[("row", &row.index.to_string()), ("tax", &tax.to_string())],
                    ));
                }
            }

            if primary_date > horizon {
                warnings.push(t_with_args(
                    "warning.far_future",
                    &[
                        ("row", &row.index.to_string()),
                        ("value", &primary_date.to_string()),
                    ],
                ));
            }
        }

        warnings
    }

    /// 税额是否等于 subtotal × 某一税率（容差 0.01）
    fn matches_vat_rate(subtotal: Decimal, tax: Decimal, rates: &[Decimal]) -> bool {
        rates.iter().any(|rate| {
            let expected = (subtotal * rate / Decimal::ONE_HUNDRED).round_dp(2);
            (expected - tax).abs() <= entity_rules::TOTAL_TOLERANCE
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::EntityKind;
    use crate::importer::schema::StaticTemplateProvider;
    use crate::repository::domain_repo::{EntityDraft, EntityFields};
    use crate::repository::error::RepositoryResult;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 内存参照数据，记录批量查询次数
    #[derive(Default)]
    struct MockDomainRepo {
        references: HashMap<(ReferenceKind, String), String>,
        lookups: Mutex<Vec<(ReferenceKind, usize)>>,
    }

    impl MockDomainRepo {
        fn with(mut self, kind: ReferenceKind, key: &str, id: &str) -> Self {
            self.references.insert((kind, key.to_string()), id.to_string());
            self
        }
    }

    #[async_trait]
    impl DomainRepository for MockDomainRepo {
        async fn create_entity(&self, _kind: EntityKind, _fields: EntityFields) -> RepositoryResult<String> {
            unimplemented!()
        }

        async fn create_unit(&self, _drafts: Vec<EntityDraft>) -> RepositoryResult<Vec<String>> {
            unimplemented!()
        }

        async fn find_reference(&self, kind: ReferenceKind, key: &str) -> RepositoryResult<Option<String>> {
            Ok(self.references.get(&(kind, key.to_string())).cloned())
        }

        async fn find_references(
            &self,
            kind: ReferenceKind,
            keys: &[String],
        ) -> RepositoryResult<HashMap<String, String>> {
            self.lookups.lock().unwrap().push((kind, keys.len()));
            Ok(keys
                .iter()
                .filter_map(|k| self.references.get(&(kind, k.clone())).map(|id| (k.clone(), id.clone())))
                .collect())
        }
    }

    const CLIENT: &str = "1790012344001";

    fn ctx() -> ValidationContext {
        ValidationContext {
            today: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            vat_rates: vec![Decimal::ZERO, Decimal::new(15, 0)],
        }
    }

    fn validator(repo: MockDomainRepo) -> (FieldValidator, Arc<MockDomainRepo>) {
        let repo = Arc::new(repo);
        (
            FieldValidator::new(repo.clone(), Arc::new(StaticTemplateProvider)),
            repo,
        )
    }

    fn row(index: usize, pairs: &[(&str, &str)]) -> RawRow {
        let values = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RawRow::new(index, index + 1, values)
    }

    fn advance(index: usize, amount: &str) -> RawRow {
        row(
            index,
            &[
                ("client_ruc", CLIENT),
                ("amount", amount),
                ("payment_method", "Transferencia"),
                ("received_date", "10/01/2026"),
            ],
        )
    }

    #[tokio::test]
    async fn test_required_field_reported_with_row() {
        let (validator, _) = validator(MockDomainRepo::default().with(ReferenceKind::Client, CLIENT, "c1"));
        let rows: Vec<RawRow> = (1..=5)
            .map(|i| advance(i, if i == 3 { "" } else { "1.250,50" }))
            .collect();

        let outcome = validator.validate(EntityType::Advance, &rows, &ctx()).await.unwrap();

        assert_eq!(outcome.valid_rows.len(), 4);
        assert_eq!(outcome.invalid_row_count(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].row, 3);
        assert_eq!(outcome.errors[0].field, "amount");
        match &outcome.valid_rows[0].record {
            ParsedRecord::Advance(a) => {
                assert_eq!(a.amount, Decimal::new(125050, 2));
                assert_eq!(a.client_id, "c1");
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_failing_class() {
        let (validator, repo) = validator(MockDomainRepo::default());
        let rows = vec![
            // Schema 失败：金额与日期都报告，不再检查税号
            row(1, &[("client_ruc", "123"), ("amount", "abc"), ("payment_method", "efectivo"), ("received_date", "ayer")]),
            // Format 失败：税号校验位错误
            row(2, &[("client_ruc", "1790012345001"), ("amount", "10"), ("payment_method", "efectivo"), ("received_date", "2026-01-10")]),
        ];

        let outcome = validator.validate(EntityType::Advance, &rows, &ctx()).await.unwrap();

        let fields: Vec<_> = outcome.errors.iter().map(|e| (e.row, e.field.as_str())).collect();
        assert_eq!(fields, vec![(1, "amount"), (1, "received_date"), (2, "client_ruc")]);
        // 没有行到达参照类，不发生查询
        assert!(repo.lookups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_references_are_batched_per_kind() {
        let (validator, repo) = validator(
            MockDomainRepo::default()
                .with(ReferenceKind::Client, CLIENT, "c1")
                .with(ReferenceKind::Project, "PRJ-1", "p1"),
        );
        let mut rows: Vec<RawRow> = (1..=4).map(|i| advance(i, "10")).collect();
        rows[1].values.insert("project_code".to_string(), "prj-1".to_string());
        rows[2].values.insert("project_code".to_string(), "PRJ-404".to_string());

        let outcome = validator.validate(EntityType::Advance, &rows, &ctx()).await.unwrap();

        let mut lookups = repo.lookups.lock().unwrap().clone();
        lookups.sort();
        assert_eq!(lookups, vec![(ReferenceKind::Client, 1), (ReferenceKind::Project, 2)]);

        assert_eq!(outcome.valid_rows.len(), 3);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].row, 3);
        assert_eq!(outcome.errors[0].field, "project_code");
        assert_eq!(outcome.errors[0].value, "PRJ-404");
    }

    #[tokio::test]
    async fn test_blank_rows_are_skipped() {
        let (validator, _) = validator(MockDomainRepo::default().with(ReferenceKind::Client, CLIENT, "c1"));
        let rows = vec![advance(1, "10"), row(2, &[("amount", "  "), ("notes", "")]), advance(3, "5")];

        let outcome = validator.validate(EntityType::Advance, &rows, &ctx()).await.unwrap();
        assert_eq!(outcome.skipped_blank, 1);
        assert_eq!(outcome.valid_rows.len(), 2);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_validation_is_deterministic() {
        let (validator, _) = validator(MockDomainRepo::default());
        let rows = vec![advance(1, "-5"), advance(2, "x")];

        let first = validator.validate(EntityType::Advance, &rows, &ctx()).await.unwrap();
        let second = validator.validate(EntityType::Advance, &rows, &ctx()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_sale_warnings() {
        let (validator, _) = validator(MockDomainRepo::default().with(ReferenceKind::Client, CLIENT, "c1"));
        let sale = |index: usize, invoice: &str, tax: &str, total: &str, date: &str| {
            row(
                index,
                &[
                    ("client_ruc", CLIENT),
                    ("invoice_number", invoice),
                    ("issue_date", date),
                    ("subtotal", "100"),
                    ("tax_amount", tax),
                    ("amount", total),
                    ("payment_method", "efectivo"),
                ],
            )
        };
        let rows = vec![
            sale(1, "001-001-000000001", "15", "115", "2026-01-10"),
            sale(2, "001-001-000000001", "12", "112", "2026-01-10"),
            sale(3, "001-001-000000003", "0", "100", "2028-01-10"),
        ];

        let outcome = validator.validate(EntityType::Sale, &rows, &ctx()).await.unwrap();

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.valid_rows.len(), 3);
        // 重复发票 + 税率不匹配（行 2）+ 远期日期（行 3）
        assert_eq!(outcome.warnings.len(), 3);
        assert!(outcome.warnings[0].contains("001-001-000000001"));
        assert!(outcome.warnings[1].contains('2'));
        assert!(outcome.warnings[2].contains("2028-01-10"));
    }

    #[tokio::test]
    async fn test_invalid_invoice_number_and_enum() {
        let (validator, _) = validator(MockDomainRepo::default());
        let rows = vec![row(
            1,
            &[
                ("client_ruc", CLIENT),
                ("invoice_number", "1-1-1"),
                ("issue_date", "2026-01-10"),
                ("subtotal", "100"),
                ("amount", "100"),
                ("payment_method", "bitcoin"),
            ],
        )];

        let outcome = validator.validate(EntityType::Sale, &rows, &ctx()).await.unwrap();
        // 枚举错误属于 Schema 类，发票号格式检查不执行
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].field, "payment_method");
        assert_eq!(outcome.errors[0].value, "bitcoin");

        let mut fixed = rows;
        fixed[0].values.insert("payment_method".to_string(), "efectivo".to_string());
        let outcome = validator.validate(EntityType::Sale, &fixed, &ctx()).await.unwrap();
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].field, "invoice_number");
    }
}

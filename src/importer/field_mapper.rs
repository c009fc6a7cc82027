// ==========================================
// 批量导入管道 - 字段映射器
// ==========================================
// 职责: 表头 → 逻辑字段映射（按实体 schema）
// 规则:
// - 表头归一化后匹配 规范表头 / 逻辑字段名 / 别名
// - 未识别的列忽略（不报错）
// - 同一字段出现多列时取第一列
// ==========================================

use crate::importer::data_cleaner::DataCleaner;
use crate::importer::schema::EntitySchema;
use std::collections::{BTreeMap, HashSet};

/// 列位置 → 逻辑字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMapping {
    columns: Vec<Option<&'static str>>,
    ignored: Vec<String>,
}

impl HeaderMapping {
    /// 已识别的逻辑字段（按列顺序）
    pub fn mapped_fields(&self) -> Vec<&'static str> {
        self.columns.iter().flatten().copied().collect()
    }

    /// 被忽略的原始表头
    pub fn ignored_headers(&self) -> &[String] {
        &self.ignored
    }

    /// 把一行单元格映射为 逻辑字段 → 值（已 TRIM）
    pub fn map_row<I, S>(&self, cells: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut values = BTreeMap::new();
        for (col_idx, cell) in cells.into_iter().enumerate() {
            if let Some(Some(field)) = self.columns.get(col_idx) {
                values.insert((*field).to_string(), cell.as_ref().trim().to_string());
            }
        }
        values
    }
}

pub struct FieldMapper;

impl FieldMapper {
    /// 根据表头行构建映射
    pub fn map_headers<S: AsRef<str>>(headers: &[S], schema: &EntitySchema) -> HeaderMapping {
        let mut taken: HashSet<&'static str> = HashSet::new();
        let mut columns = Vec::with_capacity(headers.len());
        let mut ignored = Vec::new();

        for header in headers {
            let key = DataCleaner::normalize_key(header.as_ref());
            let field = Self::resolve_field(&key, schema).filter(|f| taken.insert(*f));
            if field.is_none() && !key.is_empty() {
                ignored.push(header.as_ref().trim().to_string());
            }
            columns.push(field);
        }

        HeaderMapping { columns, ignored }
    }

    /// 归一化表头 → 逻辑字段名
    fn resolve_field(key: &str, schema: &EntitySchema) -> Option<&'static str> {
        if key.is_empty() {
            return None;
        }

        // 规范表头与逻辑字段名优先于别名，避免别名抢占
        schema
            .columns
            .iter()
            .find(|c| DataCleaner::normalize_key(c.header) == key || c.field == key)
            .or_else(|| {
                schema
                    .columns
                    .iter()
                    .find(|c| c.aliases.iter().any(|a| DataCleaner::normalize_key(a) == key))
            })
            .map(|c| c.field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::EntityType;
    use crate::importer::schema::{StaticTemplateProvider, TemplateProvider};

    fn expense_schema() -> EntitySchema {
        StaticTemplateProvider.schema(EntityType::Expense)
    }

    #[test]
    fn test_map_canonical_headers() {
        let schema = expense_schema();
        let headers = schema.headers();
        let mapping = FieldMapper::map_headers(&headers[..], &schema);

        let fields: Vec<_> = schema.columns.iter().map(|c| c.field).collect();
        assert_eq!(mapping.mapped_fields(), fields);
        assert!(mapping.ignored_headers().is_empty());
    }

    #[test]
    fn test_map_aliases_and_ignore_unknown() {
        let schema = expense_schema();
        let headers = ["RUC", "Razón Social", "Columna Extra", "MONTO", "fecha_emision"];
        let mapping = FieldMapper::map_headers(&headers[..], &schema);

        assert_eq!(
            mapping.mapped_fields(),
            vec!["supplier_ruc", "supplier_name", "amount", "issue_date"]
        );
        assert_eq!(mapping.ignored_headers(), &["Columna Extra".to_string()]);

        let row = mapping.map_row(["1790012345001", " ACME S.A. ", "x", "12,50", "2026-01-02"]);
        assert_eq!(row.get("supplier_name").map(String::as_str), Some("ACME S.A."));
        assert_eq!(row.get("amount").map(String::as_str), Some("12,50"));
        assert!(!row.contains_key("Columna Extra"));
    }

    #[test]
    fn test_duplicate_column_keeps_first() {
        let schema = expense_schema();
        let headers = ["Total", "Monto"];
        let mapping = FieldMapper::map_headers(&headers[..], &schema);
        assert_eq!(mapping.mapped_fields(), vec!["amount"]);

        let row = mapping.map_row(["10", "20"]);
        assert_eq!(row.get("amount").map(String::as_str), Some("10"));
    }
}

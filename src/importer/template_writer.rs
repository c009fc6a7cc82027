// ==========================================
// 批量导入管道 - 模板生成
// ==========================================
// 输出: 单个工作表，仅一行表头（schema 顺序），无数据行
// 必填列表头加粗
// ==========================================

use crate::importer::error::ImportResult;
use crate::importer::schema::EntitySchema;
use rust_xlsxwriter::{Format, Workbook};

const SHEET_NAME: &str = "Plantilla";

pub struct TemplateWriter;

impl TemplateWriter {
    /// 生成实体模板（xlsx 字节）
    pub fn write(schema: &EntitySchema) -> ImportResult<Vec<u8>> {
        let mut workbook = Workbook::new();
        let required_format = Format::new().set_bold();
        let optional_format = Format::new();

        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME)?;
        for (col, column) in schema.columns.iter().enumerate() {
            let format = if column.required {
                &required_format
            } else {
                &optional_format
            };
            sheet.write_string_with_format(0, col as u16, column.header, format)?;
            sheet.set_column_width(col as u16, (column.header.chars().count() + 4) as f64)?;
        }

        Ok(workbook.save_to_buffer()?)
    }
}

// ==========================================
// 批量导入管道 - 文件解析器实现
// ==========================================
// 阶段: 上传/识别（不落库，由编排器持久化）
// 支持: Excel/ODS (.xlsx/.xls/.xlsm/.ods) / CSV (.csv/.txt) /
//       SRI 电子发票 XML (.xml，仅销售)
// 输出: 按逻辑字段名组织的 RawRow，空白行不计数
// ==========================================

use crate::domain::row::RawRow;
use crate::domain::types::FileFormat;
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::FieldMapper;
use crate::importer::schema::EntitySchema;
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use chrono::Duration;
use csv::ReaderBuilder;
use quick_xml::events::Event;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::io::Cursor;
use tracing::debug;

/// UTF-8 BOM
const BOM: &str = "\u{feff}";
const CDATA_END: &str = "]]>";

// ==========================================
// ParsedFile - 解析结果
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    pub format: FileFormat,
    pub rows: Vec<RawRow>,
    /// 非空数据行数（= rows.len()）
    pub detected_row_count: usize,
    /// 未识别、被忽略的表头
    pub ignored_columns: Vec<String>,
}

impl ParsedFile {
    fn new(format: FileFormat, rows: Vec<RawRow>, ignored_columns: Vec<String>) -> Self {
        Self {
            format,
            detected_row_count: rows.len(),
            rows,
            ignored_columns,
        }
    }
}

// ==========================================
// FileParser Trait
// ==========================================
// 用途: 把文件字节解析为 RawRow
// 实现者: CsvParser / ExcelParser / MarkupParser
pub trait FileParser: Send + Sync {
    fn parse(&self, bytes: &[u8], schema: &EntitySchema) -> ImportResult<ParsedFile>;
}

/// 表格型数据（表头 + 带物理行号的数据行）→ RawRow
///
/// 空白行丢弃；index 为非空数据行序号（1 起）
fn build_rows<I>(
    format: FileFormat,
    headers: &[String],
    records: I,
    schema: &EntitySchema,
) -> ParsedFile
where
    I: IntoIterator<Item = (usize, Vec<String>)>,
{
    let mapping = FieldMapper::map_headers(headers, schema);

    let mut rows = Vec::new();
    for (line, cells) in records {
        let values = mapping.map_row(cells);
        if values.values().all(|v| v.is_empty()) {
            continue;
        }
        rows.push(RawRow::new(rows.len() + 1, line, values));
    }

    ParsedFile::new(format, rows, mapping.ignored_headers().to_vec())
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

impl CsvParser {
    /// 根据表头行猜测分隔符（, ; \t），默认逗号
    fn sniff_delimiter(text: &str) -> u8 {
        let header_line = text.lines().next().unwrap_or("");
        [b',', b';', b'\t']
            .into_iter()
            .map(|d| (d, header_line.matches(d as char).count()))
            .fold((b',', 0), |best, cur| if cur.1 > best.1 { cur } else { best })
            .0
    }
}

impl FileParser for CsvParser {
    fn parse(&self, bytes: &[u8], schema: &EntitySchema) -> ImportResult<ParsedFile> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ImportError::CorruptFile(format!("CSV 不是有效的 UTF-8: {}", e)))?;
        let text = text.strip_prefix(BOM).unwrap_or(text);

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .delimiter(Self::sniff_delimiter(text))
            .from_reader(text.as_bytes());

        let mut records = reader.records();
        let headers: Vec<String> = match records.next() {
            Some(header) => header?.iter().map(|h| h.trim().to_string()).collect(),
            None => return Err(ImportError::CorruptFile("CSV 文件无表头".to_string())),
        };

        let mut data = Vec::new();
        for (offset, result) in records.enumerate() {
            let record = result?;
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(offset + 2);
            data.push((line, record.iter().map(str::to_string).collect()));
        }

        Ok(build_rows(FileFormat::Csv, &headers, data, schema))
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
pub struct ExcelParser;

impl ExcelParser {
    /// 单元格 → 文本（日期统一为 YYYY-MM-DD，整数浮点不带小数）
    fn cell_to_string(cell: &Data) -> String {
        match cell {
            Data::Empty => String::new(),
            Data::String(s) => s.clone(),
            Data::Float(f) => DataCleaner::format_number(*f),
            Data::Int(i) => i.to_string(),
            Data::Bool(b) => b.to_string(),
            Data::DateTime(_) | Data::DateTimeIso(_) => cell
                .as_date()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| cell.to_string()),
            Data::DurationIso(s) => s.clone(),
            Data::Error(e) => format!("#{:?}", e),
        }
    }
}

impl FileParser for ExcelParser {
    fn parse(&self, bytes: &[u8], schema: &EntitySchema) -> ImportResult<ParsedFile> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;

        // 读取第一个 sheet
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ImportError::CorruptFile("Excel 文件无工作表".to_string()))?;
        let range = workbook.worksheet_range(&sheet_name)?;

        // 物理行号以工作表起始行为基准（A1 = 第 1 行）
        let first_line = range.start().map(|(r, _)| r as usize + 1).unwrap_or(1);

        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .ok_or_else(|| ImportError::CorruptFile("Excel 文件无表头".to_string()))?
            .iter()
            .map(|cell| Self::cell_to_string(cell).trim().to_string())
            .collect();

        let data = rows.enumerate().map(|(offset, row)| {
            (
                first_line + offset + 1,
                row.iter().map(Self::cell_to_string).collect::<Vec<_>>(),
            )
        });

        Ok(build_rows(FileFormat::Spreadsheet, &headers, data, schema))
    }
}

// ==========================================
// Markup Parser 实现（SRI 电子发票）
// ==========================================
// 每个 <factura> 生成一行:
//   client_ruc      ← infoFactura/identificacionComprador
//   invoice_number  ← infoTributaria/estab-ptoEmi-secuencial
//   issue_date      ← infoFactura/fechaEmision
//   subtotal        ← infoFactura/totalSinImpuestos
//   tax_amount      ← Σ totalConImpuestos/totalImpuesto/valor
//   amount          ← infoFactura/importeTotal
//   payment_method  ← pagos/pago/formaPago（plazo > 0 视为赊账）
//   description     ← detalles/detalle/descripcion（多条以 "; " 连接）
// <autorizacion><comprobante> 中的 CDATA 会递归解析
pub struct MarkupParser;

#[derive(Debug, Default)]
struct InvoiceBuilder {
    line: usize,
    estab: String,
    pto_emi: String,
    secuencial: String,
    client_ruc: String,
    issue_date: String,
    subtotal: String,
    amount: String,
    tax_values: Vec<String>,
    payment_code: String,
    term_days: String,
    descriptions: Vec<String>,
}

impl InvoiceBuilder {
    fn set(&mut self, path: &[String], text: &str) {
        let Some(element) = path.last() else {
            return;
        };
        let parent = path.len().checked_sub(2).map(|i| path[i].as_str());

        match (parent, element.as_str()) {
            (Some("infoTributaria"), "estab") => self.estab = text.to_string(),
            (Some("infoTributaria"), "ptoEmi") => self.pto_emi = text.to_string(),
            (Some("infoTributaria"), "secuencial") => self.secuencial = text.to_string(),
            (Some("infoFactura"), "identificacionComprador") => self.client_ruc = text.to_string(),
            (Some("infoFactura"), "fechaEmision") => self.issue_date = text.to_string(),
            (Some("infoFactura"), "totalSinImpuestos") => self.subtotal = text.to_string(),
            (Some("infoFactura"), "importeTotal") => self.amount = text.to_string(),
            (Some("totalImpuesto"), "valor") => self.tax_values.push(text.to_string()),
            (Some("pago"), "formaPago") if self.payment_code.is_empty() => {
                self.payment_code = text.to_string()
            }
            (Some("pago"), "plazo") => self.term_days = text.to_string(),
            (Some("detalle"), "descripcion") => self.descriptions.push(text.to_string()),
            _ => {}
        }
    }

    /// SRI formaPago 编码 → 付款方式
    fn payment_method(&self) -> String {
        let on_credit = self
            .term_days
            .trim()
            .parse::<i64>()
            .map(|d| d > 0)
            .unwrap_or(false);
        if on_credit {
            return "credito".to_string();
        }
        match self.payment_code.trim() {
            "01" => "efectivo".to_string(),
            "16" | "18" | "19" => "tarjeta".to_string(),
            "15" | "17" | "20" | "21" => "transferencia".to_string(),
            other => other.to_string(),
        }
    }

    fn into_values(self) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        let invoice_number = if self.estab.is_empty() && self.secuencial.is_empty() {
            String::new()
        } else {
            format!("{}-{}-{}", self.estab, self.pto_emi, self.secuencial)
        };

        // 税额合计：无法解析的值原样保留，交给校验阶段报错
        let tax_amount = match self
            .tax_values
            .iter()
            .map(|v| DataCleaner::parse_decimal(v))
            .collect::<Option<Vec<_>>>()
        {
            Some(parts) if !parts.is_empty() => parts.into_iter().sum::<Decimal>().to_string(),
            Some(_) => String::new(),
            None => self.tax_values.join("+"),
        };

        let payment_method = self.payment_method();
        if payment_method == "credito" {
            let due = DataCleaner::parse_date(&self.issue_date)
                .zip(self.term_days.trim().parse::<i64>().ok());
            if let Some((issued, days)) = due {
                if let Some(due_date) = issued.checked_add_signed(Duration::days(days)) {
                    values.insert("due_date".to_string(), due_date.format("%Y-%m-%d").to_string());
                }
            }
        }

        values.insert("client_ruc".to_string(), self.client_ruc);
        values.insert("invoice_number".to_string(), invoice_number);
        values.insert("issue_date".to_string(), self.issue_date);
        values.insert("subtotal".to_string(), self.subtotal);
        values.insert("tax_amount".to_string(), tax_amount);
        values.insert("amount".to_string(), self.amount);
        values.insert("payment_method".to_string(), payment_method);
        values.insert("description".to_string(), self.descriptions.join("; "));
        values
    }
}

impl MarkupParser {
    /// 解析一个 XML 文档；base_line 为该文档在源文件中的起始行
    fn parse_document(
        text: &str,
        base_line: usize,
        invoices: &mut Vec<(usize, BTreeMap<String, String>)>,
    ) -> ImportResult<()> {
        let mut reader = quick_xml::Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let line_at = |pos: usize| base_line + text[..pos.min(text.len())].matches('\n').count();

        let mut path: Vec<String> = Vec::new();
        let mut current: Option<InvoiceBuilder> = None;

        loop {
            let event = reader.read_event()?;
            match event {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if name == "factura" {
                        current = Some(InvoiceBuilder {
                            line: line_at(reader.buffer_position() as usize),
                            ..Default::default()
                        });
                    }
                    path.push(name);
                }
                Event::End(_) => {
                    if path.pop().as_deref() == Some("factura") {
                        if let Some(invoice) = current.take() {
                            invoices.push((invoice.line, invoice.into_values()));
                        }
                    }
                }
                Event::Text(t) => {
                    if let Some(invoice) = current.as_mut() {
                        let value = t.unescape()?;
                        invoice.set(&path, value.trim());
                    }
                }
                Event::CData(c) => {
                    let raw = c.into_inner();
                    let inner = std::str::from_utf8(&raw).map_err(|e| {
                        ImportError::CorruptFile(format!("XML CDATA 不是有效的 UTF-8: {}", e))
                    })?;
                    if path.last().map(String::as_str) == Some("comprobante") {
                        // 读取位置已越过 "]]>"，回退到 CDATA 内容起点
                        let content_start = (reader.buffer_position() as usize)
                            .saturating_sub(CDATA_END.len() + raw.len());
                        let leading = &inner[..inner.len() - inner.trim_start().len()];
                        let nested_line = line_at(content_start) + leading.matches('\n').count();
                        Self::parse_document(inner.trim(), nested_line, invoices)?;
                    } else if let Some(invoice) = current.as_mut() {
                        invoice.set(&path, inner.trim());
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !path.is_empty() {
            return Err(ImportError::CorruptFile(format!(
                "XML 元素未闭合: {}",
                path.join("/")
            )));
        }
        Ok(())
    }
}

impl FileParser for MarkupParser {
    fn parse(&self, bytes: &[u8], _schema: &EntitySchema) -> ImportResult<ParsedFile> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ImportError::CorruptFile(format!("XML 不是有效的 UTF-8: {}", e)))?;
        let text = text.strip_prefix(BOM).unwrap_or(text);

        let mut invoices = Vec::new();
        Self::parse_document(text, 1, &mut invoices)?;
        if invoices.is_empty() {
            return Err(ImportError::CorruptFile("XML 中未找到 <factura>".to_string()));
        }

        let rows = invoices
            .into_iter()
            .filter(|(_, values)| values.values().any(|v| !v.is_empty()))
            .enumerate()
            .map(|(i, (line, values))| RawRow::new(i + 1, line, values))
            .collect();

        Ok(ParsedFile::new(FileFormat::Markup, rows, Vec::new()))
    }
}

// ==========================================
// 通用文件解析器（大小检查 + 格式识别 + 分派）
// ==========================================
pub struct UniversalFileParser {
    max_file_size_bytes: usize,
}

impl UniversalFileParser {
    pub fn new(max_file_size_bytes: usize) -> Self {
        Self {
            max_file_size_bytes,
        }
    }

    /// 确定文件格式：显式声明优先，否则按扩展名
    pub fn resolve_format(
        file_name: &str,
        declared_format: Option<FileFormat>,
        schema: &EntitySchema,
    ) -> ImportResult<FileFormat> {
        let format = declared_format
            .or_else(|| FileFormat::from_file_name(file_name))
            .ok_or_else(|| ImportError::UnsupportedFormat(file_name.to_string()))?;

        if format == FileFormat::Markup && !schema.accepts_markup {
            return Err(ImportError::UnsupportedFormat(format!(
                "{}（{} 不支持 XML）",
                file_name, schema.entity_type
            )));
        }
        Ok(format)
    }

    pub fn parse(
        &self,
        bytes: &[u8],
        file_name: &str,
        declared_format: Option<FileFormat>,
        schema: &EntitySchema,
    ) -> ImportResult<ParsedFile> {
        // 大小检查先于任何解码
        if bytes.len() > self.max_file_size_bytes {
            return Err(ImportError::FileTooLarge {
                size: bytes.len(),
                limit: self.max_file_size_bytes,
            });
        }

        let format = Self::resolve_format(file_name, declared_format, schema)?;
        let parser: &dyn FileParser = match format {
            FileFormat::Csv => &CsvParser,
            FileFormat::Spreadsheet => &ExcelParser,
            FileFormat::Markup => &MarkupParser,
        };

        let parsed = parser.parse(bytes, schema)?;
        debug!(
            file_name,
            format = %format,
            rows = parsed.detected_row_count,
            ignored = parsed.ignored_columns.len(),
            "文件解析完成"
        );
        Ok(parsed)
    }
}

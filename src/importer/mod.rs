// ==========================================
// 批量导入管道 - 导入层
// ==========================================
// 职责: 文件解析 → 字段校验 → 导入执行，以及三阶段编排
// 支持: Excel (.xlsx/.xls/.ods), CSV, XML 电子发票
// ==========================================

// 模块声明
pub mod data_cleaner;
pub mod entity_rules;
pub mod error;
pub mod field_mapper;
pub mod field_validator;
pub mod file_parser;
pub mod import_executor;
pub mod pipeline;
pub mod schema;
pub mod tax_id;
pub mod template_writer;

// 重导出核心类型
pub use data_cleaner::DataCleaner;
pub use error::{ImportError, ImportResult};
pub use field_mapper::{FieldMapper, HeaderMapping};
pub use field_validator::{FieldValidator, ValidationContext, ValidationOutcome};
pub use file_parser::{CsvParser, ExcelParser, FileParser, MarkupParser, ParsedFile, UniversalFileParser};
pub use import_executor::{
    AdvanceImporter, EntityImporter, ExpenseImporter, ImportExecutor, ImportOutcome,
    ImporterRegistry, ProjectImporter, SaleImporter,
};
pub use pipeline::{
    ImportReport, PipelineOrchestrator, RecoveryReport, UploadReceipt, UploadRequest,
    ValidationReport,
};
pub use schema::{ColumnSpec, EntitySchema, FieldKind, StaticTemplateProvider, TemplateProvider};
pub use tax_id::{validate_tax_id, TaxIdError, TaxIdKind};
pub use template_writer::TemplateWriter;

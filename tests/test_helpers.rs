// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、参照数据、CSV/XLSX 文件构造
// ==========================================

#![allow(dead_code)]

use bulk_import::api::ImportApi;
use bulk_import::db::open_sqlite_connection;
use bulk_import::domain::EntityKind;
use bulk_import::repository::DomainRepositoryImpl;
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_xlsxwriter::Workbook;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// 已登记客户（公司 RUC）
pub const CLIENT_RUC: &str = "1790012344001";
/// 已登记客户（自然人 cédula）
pub const PERSON_RUC: &str = "1710034065";
/// 合法但未登记的 RUC
pub const UNKNOWN_RUC: &str = "0992339411001";
/// 供应商 RUC（费用不做参照校验）
pub const SUPPLIER_RUC: &str = "1790085783001";
pub const CATEGORY_CODE: &str = "OFICINA";
pub const PROJECT_CODE: &str = "PRJ-001";

/// 测试环境
///
/// 临时文件需要保持存活，数据库随之删除
pub struct TestEnv {
    pub api: ImportApi,
    pub domain: Arc<DomainRepositoryImpl>,
    pub conn: Arc<Mutex<Connection>>,
    _temp_file: NamedTempFile,
}

impl TestEnv {
    pub fn count(&self, kind: EntityKind) -> usize {
        self.domain.count(kind).expect("统计记录失败")
    }

    /// 直接改写会话状态（模拟进程中断）
    pub fn force_state(&self, upload_id: &str, state: &str) {
        let conn = self.conn.lock().expect("数据库锁获取失败");
        conn.execute(
            "UPDATE upload_session SET state = ?1 WHERE id = ?2",
            rusqlite::params![state, upload_id],
        )
        .expect("更新会话状态失败");
    }
}

/// 基准日: 2026-01-15
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
}

/// 创建临时测试数据库与 ImportApi（表结构已初始化）
pub fn create_test_env() -> Result<TestEnv, Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().ok_or("临时路径不是 UTF-8")?.to_string();

    let conn = Arc::new(Mutex::new(open_sqlite_connection(&db_path)?));
    let api = ImportApi::from_connection(conn.clone())?.with_fixed_today(today());
    let domain = Arc::new(DomainRepositoryImpl::from_connection(conn.clone()));

    Ok(TestEnv {
        api,
        domain,
        conn,
        _temp_file: temp_file,
    })
}

/// 创建测试环境并写入参照数据（客户/类别/项目）
pub fn create_seeded_env() -> Result<TestEnv, Box<dyn Error>> {
    let env = create_test_env()?;
    let client_id = env.domain.insert_client(CLIENT_RUC, "Constructora Andina S.A.")?;
    env.domain.insert_client(PERSON_RUC, "María Fernanda Salazar")?;
    env.domain.insert_category(CATEGORY_CODE, "Suministros de oficina")?;
    env.domain.insert_project(PROJECT_CODE, "Edificio Quitumbe", &client_id)?;
    Ok(env)
}

/// 由表头与数据行构造 CSV 字节
pub fn csv_bytes(headers: &[&str], rows: &[Vec<&str>]) -> Vec<u8> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(headers).unwrap();
    for row in rows {
        writer.write_record(row).unwrap();
    }
    writer.into_inner().unwrap()
}

/// 由表头与数据行构造 XLSX 字节（带小数点的值写为数字单元格）
pub fn xlsx_bytes(headers: &[&str], rows: &[Vec<&str>]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string(0, col as u16, *header).unwrap();
    }
    for (r, row) in rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            let (r, col) = (r as u32 + 1, col as u16);
            match value.parse::<f64>() {
                Ok(number) if value.contains('.') => {
                    sheet.write_number(r, col, number).unwrap();
                }
                _ => {
                    sheet.write_string(r, col, *value).unwrap();
                }
            }
        }
    }
    workbook.save_to_buffer().unwrap()
}

// ==========================================
// 实体表头
// ==========================================

pub const ADVANCE_HEADERS: &[&str] = &["RUC Cliente", "Monto", "Forma de Pago", "Fecha de Recepción"];

pub const SALE_HEADERS: &[&str] = &[
    "RUC Cliente",
    "Número de Factura",
    "Fecha de Emisión",
    "Subtotal",
    "IVA",
    "Total",
    "Forma de Pago",
    "Fecha de Vencimiento",
];

pub const EXPENSE_HEADERS: &[&str] = &[
    "RUC Proveedor",
    "Proveedor",
    "Número de Factura",
    "Fecha de Emisión",
    "Código Categoría",
    "Subtotal",
    "IVA",
    "Total",
    "Forma de Pago",
    "Fecha de Vencimiento",
];

/// 合法的预收款行
pub fn advance_row(amount: &'static str) -> Vec<&'static str> {
    vec![CLIENT_RUC, amount, "transferencia", "2026-01-10"]
}

/// 合法的现金销售行（100 + 15% IVA）
pub fn sale_row(invoice: &'static str) -> Vec<&'static str> {
    vec![CLIENT_RUC, invoice, "2026-01-12", "100.00", "15.00", "115.00", "efectivo", ""]
}

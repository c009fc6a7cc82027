// ==========================================
// 导入 API 端到端测试
// ==========================================
// 覆盖: 多格式上传 / 关联记录 / 模板 / 历史 / 中断恢复

mod test_helpers;

use bulk_import::domain::{EntityKind, EntityType, FileFormat, SessionState, UploadMetadata};
use test_helpers::*;

const INVOICE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<factura id="comprobante" version="1.1.0">
  <infoTributaria>
    <ruc>1790085783001</ruc>
    <estab>001</estab>
    <ptoEmi>002</ptoEmi>
    <secuencial>000000123</secuencial>
  </infoTributaria>
  <infoFactura>
    <fechaEmision>15/01/2026</fechaEmision>
    <identificacionComprador>1710034065</identificacionComprador>
    <totalSinImpuestos>100.00</totalSinImpuestos>
    <totalConImpuestos>
      <totalImpuesto>
        <codigo>2</codigo>
        <baseImponible>100.00</baseImponible>
        <valor>15.00</valor>
      </totalImpuesto>
    </totalConImpuestos>
    <importeTotal>115.00</importeTotal>
    <pagos>
      <pago>
        <formaPago>20</formaPago>
        <total>115.00</total>
        <plazo>30</plazo>
        <unidadTiempo>dias</unidadTiempo>
      </pago>
    </pagos>
  </infoFactura>
  <detalles>
    <detalle><descripcion>Servicio de consultoría</descripcion></detalle>
  </detalles>
</factura>"#;

/// XLSX 赊账费用 → 费用 + 应付款
#[tokio::test]
async fn test_credit_expense_from_workbook_creates_payable() {
    let env = create_seeded_env().expect("创建测试环境失败");
    let rows = vec![
        vec![
            SUPPLIER_RUC,
            "Papelería Quito Cía. Ltda.",
            "002-001-000004567",
            "2026-01-05",
            CATEGORY_CODE,
            "200.00",
            "30.00",
            "230.00",
            "credito",
            "2026-02-05",
        ],
        vec![
            SUPPLIER_RUC,
            "Papelería Quito Cía. Ltda.",
            "002-001-000004568",
            "2026-01-06",
            CATEGORY_CODE,
            "50.00",
            "0.00",
            "50.00",
            "efectivo",
            "",
        ],
    ];

    let upload = env
        .api
        .upload(xlsx_bytes(EXPENSE_HEADERS, &rows), "gastos.xlsx", EntityType::Expense, None, None)
        .await
        .expect("上传失败");
    assert_eq!(upload.detected_row_count, 2);

    let report = env.api.validate(&upload.upload_id).await.expect("校验失败");
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(report.can_import);

    let imported = env.api.import(&upload.upload_id, false).await.expect("导入失败");
    assert_eq!(imported.imported_rows, 2);
    assert_eq!(imported.state, SessionState::Imported);
    // 第 1 行: 费用 + 应付款；第 2 行: 费用
    assert_eq!(imported.created_ids.len(), 3);
    assert_eq!(env.count(EntityKind::Expense), 2);
    assert_eq!(env.count(EntityKind::Payable), 1);

    let expense_id = &imported.created_ids[0];
    let payable_id = &imported.created_ids[1];
    let linked = env
        .domain
        .get_field(EntityKind::Payable, payable_id, "expense_id")
        .unwrap();
    assert_eq!(linked.as_deref(), Some(expense_id.as_str()));
    let due = env.domain.get_field(EntityKind::Payable, payable_id, "due_date").unwrap();
    assert_eq!(due.as_deref(), Some("2026-02-05"));
}

/// SRI 电子发票 XML → 销售 + 应收款
#[tokio::test]
async fn test_markup_invoice_import() {
    let env = create_seeded_env().expect("创建测试环境失败");

    let upload = env
        .api
        .upload(
            INVOICE_XML.as_bytes().to_vec(),
            "factura_001-002-000000123.xml",
            EntityType::Sale,
            None,
            None,
        )
        .await
        .expect("上传失败");
    assert_eq!(upload.detected_row_count, 1);

    let report = env.api.validate(&upload.upload_id).await.unwrap();
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    let imported = env.api.import(&upload.upload_id, false).await.unwrap();
    assert_eq!(imported.imported_rows, 1);
    assert_eq!(env.count(EntityKind::Sale), 1);
    assert_eq!(env.count(EntityKind::Receivable), 1);

    let sale_id = &imported.created_ids[0];
    let invoice = env.domain.get_field(EntityKind::Sale, sale_id, "invoice_number").unwrap();
    assert_eq!(invoice.as_deref(), Some("001-002-000000123"));
    let due = env.domain.get_field(EntityKind::Sale, sale_id, "due_date").unwrap();
    assert_eq!(due.as_deref(), Some("2026-02-14"));
}

/// 声明格式优先于扩展名
#[tokio::test]
async fn test_declared_format_overrides_extension() {
    let env = create_seeded_env().expect("创建测试环境失败");
    let bytes = csv_bytes(ADVANCE_HEADERS, &[advance_row("10.00")]);

    let upload = env
        .api
        .upload(bytes, "export", EntityType::Advance, Some(FileFormat::Csv), None)
        .await
        .unwrap();
    let session = env.api.get_session(&upload.upload_id).await.unwrap();
    assert_eq!(session.format, FileFormat::Csv);
    assert_eq!(session.original_file_name, "export");
}

/// 表头别名与重音不敏感匹配；未识别列被忽略
#[tokio::test]
async fn test_header_aliases_are_recognized() {
    let env = create_seeded_env().expect("创建测试环境失败");
    let headers = ["ruc", "VALOR", "Método de Pago", "Fecha", "Sucursal"];
    let rows = vec![vec![CLIENT_RUC, "75.50", "cheque", "12/01/2026", "Norte"]];

    let upload = env
        .api
        .upload(csv_bytes(&headers, &rows), "anticipos.csv", EntityType::Advance, None, None)
        .await
        .unwrap();
    assert_eq!(upload.ignored_columns, vec!["Sucursal".to_string()]);

    let report = env.api.validate(&upload.upload_id).await.unwrap();
    assert_eq!(report.valid_rows, 1, "{:?}", report.errors);
}

/// 项目导入后可被预收款引用
#[tokio::test]
async fn test_imported_project_is_referenceable() {
    let env = create_seeded_env().expect("创建测试环境失败");
    let headers = ["Código", "Nombre", "RUC Cliente", "Fecha de Inicio", "Presupuesto"];
    let rows = vec![vec!["PRJ-777", "Vía Collas", CLIENT_RUC, "2026-02-01", "150000.00"]];

    let upload = env
        .api
        .upload(csv_bytes(&headers, &rows), "proyectos.csv", EntityType::Project, None, None)
        .await
        .unwrap();
    env.api.validate(&upload.upload_id).await.unwrap();
    let imported = env.api.import(&upload.upload_id, false).await.unwrap();
    assert_eq!(imported.imported_rows, 1);
    let status = env
        .domain
        .get_field(EntityKind::Project, &imported.created_ids[0], "status")
        .unwrap();
    assert_eq!(status.as_deref(), Some("planificado"));

    let headers = ["RUC Cliente", "Monto", "Forma de Pago", "Fecha de Recepción", "Código Proyecto"];
    let rows = vec![vec![CLIENT_RUC, "5000.00", "transferencia", "2026-01-14", "PRJ-777"]];
    let upload = env
        .api
        .upload(csv_bytes(&headers, &rows), "anticipos.csv", EntityType::Advance, None, None)
        .await
        .unwrap();
    let report = env.api.validate(&upload.upload_id).await.unwrap();
    assert_eq!(report.valid_rows, 1, "{:?}", report.errors);
}

/// 模板可被原样上传（零数据行，无忽略列）
#[tokio::test]
async fn test_templates_round_trip() {
    let env = create_test_env().expect("创建测试环境失败");

    for entity in EntityType::ALL {
        let bytes = env.api.template(entity).expect("生成模板失败");
        let upload = env
            .api
            .upload(bytes, "plantilla.xlsx", entity, None, None)
            .await
            .expect("上传模板失败");
        assert_eq!(upload.detected_row_count, 0, "{}", entity);
        assert!(upload.ignored_columns.is_empty(), "{}", entity);
    }
}

/// 历史按创建时间倒序，可按实体过滤
#[tokio::test]
async fn test_history_is_newest_first() {
    let env = create_seeded_env().expect("创建测试环境失败");
    let metadata = UploadMetadata {
        uploaded_by: Some("contabilidad".to_string()),
        notes: None,
    };

    let mut ids = Vec::new();
    for name in ["enero.csv", "febrero.csv", "marzo.csv"] {
        let upload = env
            .api
            .upload(
                csv_bytes(ADVANCE_HEADERS, &[advance_row("10.00")]),
                name,
                EntityType::Advance,
                None,
                Some(metadata.clone()),
            )
            .await
            .unwrap();
        ids.push(upload.upload_id);
    }
    env.api
        .upload(csv_bytes(SALE_HEADERS, &[sale_row("001-001-000000001")]), "ventas.csv", EntityType::Sale, None, None)
        .await
        .unwrap();

    let all = env.api.history(None, None).await.unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].entity_type, EntityType::Sale);

    let advances = env.api.history(Some(EntityType::Advance), Some(2)).await.unwrap();
    let listed: Vec<&str> = advances.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(listed, vec![ids[2].as_str(), ids[1].as_str()]);
    assert_eq!(advances[0].original_file_name, "marzo.csv");

    let session = env.api.get_session(&ids[0]).await.unwrap();
    assert_eq!(session.metadata, metadata);
}

/// 进程中断后停留在过渡态的会话
#[tokio::test]
async fn test_recover_interrupted_sessions() {
    let env = create_seeded_env().expect("创建测试环境失败");

    let mut ids = Vec::new();
    for _ in 0..3 {
        let upload = env
            .api
            .upload(
                csv_bytes(ADVANCE_HEADERS, &[advance_row("10.00")]),
                "anticipos.csv",
                EntityType::Advance,
                None,
                None,
            )
            .await
            .unwrap();
        ids.push(upload.upload_id);
    }
    env.force_state(&ids[0], "validando");
    env.force_state(&ids[1], "importando");

    let report = env.api.recover_interrupted().await.unwrap();
    assert_eq!(report.reset_to_uploaded, vec![ids[0].clone()]);
    assert_eq!(report.marked_import_failed, vec![ids[1].clone()]);

    let reset = env.api.get_session(&ids[0]).await.unwrap();
    assert_eq!(reset.state, SessionState::Uploaded);
    // 恢复后可重新校验
    let validated = env.api.validate(&ids[0]).await.unwrap();
    assert_eq!(validated.state, SessionState::Validated);

    let failed = env.api.get_session(&ids[1]).await.unwrap();
    assert_eq!(failed.state, SessionState::ImportFailed);
    assert_eq!(failed.warnings.len(), 1);

    let untouched = env.api.get_session(&ids[2]).await.unwrap();
    assert_eq!(untouched.state, SessionState::Uploaded);

    // 再次执行无事可做
    let again = env.api.recover_interrupted().await.unwrap();
    assert!(again.reset_to_uploaded.is_empty());
    assert!(again.marked_import_failed.is_empty());
}

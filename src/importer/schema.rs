// ==========================================
// 批量导入管道 - 实体列 Schema 与模板提供者
// ==========================================
// 职责: 每种实体的固定列定义（逻辑字段名、模板表头、别名、
//       是否必填、类型、引用类型）
// 用途: 驱动表头映射、字段校验、模板下载
// ==========================================

use crate::domain::row::{PaymentMethod, ProjectStatus};
use crate::domain::types::{EntityType, ReferenceKind};

// ==========================================
// FieldKind - 字段类型（决定类型转换与格式规则）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 自由文本
    Text,
    /// 编码（字母/数字/-/_）
    Code,
    /// 金额（本地化小数）
    Decimal,
    /// 日期
    Date,
    /// RUC / 身份证号
    TaxId,
    /// 发票号 NNN-NNN-NNNNNNNNN
    InvoiceNumber,
    /// 枚举（规范值列表）
    Enum(&'static [&'static str]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub field: &'static str,
    pub header: &'static str,
    pub aliases: &'static [&'static str],
    pub required: bool,
    pub kind: FieldKind,
    pub reference: Option<ReferenceKind>,
}

const fn col(
    field: &'static str,
    header: &'static str,
    aliases: &'static [&'static str],
    required: bool,
    kind: FieldKind,
) -> ColumnSpec {
    ColumnSpec {
        field,
        header,
        aliases,
        required,
        kind,
        reference: None,
    }
}

const fn ref_col(
    field: &'static str,
    header: &'static str,
    aliases: &'static [&'static str],
    required: bool,
    kind: FieldKind,
    reference: ReferenceKind,
) -> ColumnSpec {
    ColumnSpec {
        field,
        header,
        aliases,
        required,
        kind,
        reference: Some(reference),
    }
}

// ==========================================
// EntitySchema
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    pub entity_type: EntityType,
    pub columns: Vec<ColumnSpec>,
    /// 是否接受 XML 电子发票
    pub accepts_markup: bool,
}

impl EntitySchema {
    pub fn column(&self, field: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.field == field)
    }

    /// 模板表头（固定顺序）
    pub fn headers(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.header).collect()
    }

    /// 字段在 schema 中的位置（用于错误排序）
    pub fn field_order(&self, field: &str) -> usize {
        self.columns
            .iter()
            .position(|c| c.field == field)
            .unwrap_or(self.columns.len())
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.required)
    }
}

// ==========================================
// TemplateProvider Trait
// ==========================================
// 用途: 提供实体的规范列定义
// 实现者: StaticTemplateProvider（内置定义）
pub trait TemplateProvider: Send + Sync {
    fn schema(&self, entity_type: EntityType) -> EntitySchema;
}

/// 内置列定义
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTemplateProvider;

impl TemplateProvider for StaticTemplateProvider {
    fn schema(&self, entity_type: EntityType) -> EntitySchema {
        match entity_type {
            EntityType::Advance => advance_schema(),
            EntityType::Expense => expense_schema(),
            EntityType::Sale => sale_schema(),
            EntityType::Project => project_schema(),
        }
    }
}

const PAYMENT: FieldKind = FieldKind::Enum(PaymentMethod::ALLOWED);

fn advance_schema() -> EntitySchema {
    EntitySchema {
        entity_type: EntityType::Advance,
        columns: vec![
            ref_col(
                "client_ruc",
                "RUC Cliente",
                &["ruc", "cliente_ruc", "ruc_del_cliente"],
                true,
                FieldKind::TaxId,
                ReferenceKind::Client,
            ),
            col("amount", "Monto", &["valor", "importe", "monto_anticipo"], true, FieldKind::Decimal),
            col("payment_method", "Forma de Pago", &["metodo_pago", "metodo_de_pago"], true, PAYMENT),
            col(
                "received_date",
                "Fecha de Recepción",
                &["fecha", "fecha_anticipo"],
                true,
                FieldKind::Date,
            ),
            col(
                "estimated_application_date",
                "Fecha Estimada de Aplicación",
                &["fecha_aplicacion", "fecha_estimada"],
                false,
                FieldKind::Date,
            ),
            ref_col(
                "project_code",
                "Código Proyecto",
                &["proyecto", "codigo_del_proyecto"],
                false,
                FieldKind::Code,
                ReferenceKind::Project,
            ),
            col("reference", "Referencia", &["comprobante", "numero_referencia"], false, FieldKind::Text),
            col("notes", "Observaciones", &["notas", "comentarios"], false, FieldKind::Text),
        ],
        accepts_markup: false,
    }
}

fn expense_schema() -> EntitySchema {
    EntitySchema {
        entity_type: EntityType::Expense,
        columns: vec![
            col("supplier_ruc", "RUC Proveedor", &["ruc", "proveedor_ruc"], true, FieldKind::TaxId),
            col("supplier_name", "Proveedor", &["razon_social", "nombre_proveedor"], true, FieldKind::Text),
            col(
                "invoice_number",
                "Número de Factura",
                &["factura", "no_factura", "numero_comprobante"],
                true,
                FieldKind::InvoiceNumber,
            ),
            col("issue_date", "Fecha de Emisión", &["fecha", "fecha_emision", "fecha_factura"], true, FieldKind::Date),
            ref_col(
                "category_code",
                "Código Categoría",
                &["categoria", "codigo_de_categoria"],
                true,
                FieldKind::Code,
                ReferenceKind::Category,
            ),
            ref_col(
                "project_code",
                "Código Proyecto",
                &["proyecto", "codigo_del_proyecto"],
                false,
                FieldKind::Code,
                ReferenceKind::Project,
            ),
            col("subtotal", "Subtotal", &["base_imponible"], true, FieldKind::Decimal),
            col("tax_amount", "IVA", &["impuesto", "valor_iva"], false, FieldKind::Decimal),
            col("amount", "Total", &["monto", "valor_total", "importe"], true, FieldKind::Decimal),
            col("payment_method", "Forma de Pago", &["metodo_pago", "metodo_de_pago"], true, PAYMENT),
            col("due_date", "Fecha de Vencimiento", &["vencimiento"], false, FieldKind::Date),
            col("description", "Descripción", &["detalle", "concepto"], false, FieldKind::Text),
        ],
        accepts_markup: false,
    }
}

fn sale_schema() -> EntitySchema {
    EntitySchema {
        entity_type: EntityType::Sale,
        columns: vec![
            ref_col(
                "client_ruc",
                "RUC Cliente",
                &["ruc", "cliente_ruc", "identificacion_comprador"],
                true,
                FieldKind::TaxId,
                ReferenceKind::Client,
            ),
            col(
                "invoice_number",
                "Número de Factura",
                &["factura", "no_factura", "numero_comprobante"],
                true,
                FieldKind::InvoiceNumber,
            ),
            col("issue_date", "Fecha de Emisión", &["fecha", "fecha_emision", "fecha_factura"], true, FieldKind::Date),
            col("subtotal", "Subtotal", &["base_imponible", "total_sin_impuestos"], true, FieldKind::Decimal),
            col("tax_amount", "IVA", &["impuesto", "valor_iva"], false, FieldKind::Decimal),
            col("amount", "Total", &["monto", "importe_total", "valor_total"], true, FieldKind::Decimal),
            col("payment_method", "Forma de Pago", &["metodo_pago", "metodo_de_pago"], true, PAYMENT),
            col("due_date", "Fecha de Vencimiento", &["vencimiento"], false, FieldKind::Date),
            ref_col(
                "project_code",
                "Código Proyecto",
                &["proyecto", "codigo_del_proyecto"],
                false,
                FieldKind::Code,
                ReferenceKind::Project,
            ),
            col("description", "Descripción", &["detalle", "concepto"], false, FieldKind::Text),
        ],
        accepts_markup: true,
    }
}

fn project_schema() -> EntitySchema {
    EntitySchema {
        entity_type: EntityType::Project,
        columns: vec![
            col("code", "Código", &["codigo_proyecto"], true, FieldKind::Code),
            col("name", "Nombre", &["nombre_proyecto", "proyecto"], true, FieldKind::Text),
            ref_col(
                "client_ruc",
                "RUC Cliente",
                &["ruc", "cliente_ruc"],
                true,
                FieldKind::TaxId,
                ReferenceKind::Client,
            ),
            col("start_date", "Fecha de Inicio", &["inicio"], true, FieldKind::Date),
            col("end_date", "Fecha de Fin", &["fin", "fecha_final"], false, FieldKind::Date),
            col("budget", "Presupuesto", &["monto", "valor"], false, FieldKind::Decimal),
            col("status", "Estado", &["estado_proyecto"], false, FieldKind::Enum(ProjectStatus::ALLOWED)),
            col("description", "Descripción", &["detalle"], false, FieldKind::Text),
        ],
        accepts_markup: false,
    }
}

// ==========================================
// 批量导入管道 - 数据清洗器
// ==========================================
// 职责: TRIM / NULL 标准化 / 键名归一化 /
//       本地化金额解析 / 多格式日期解析 / 枚举匹配
// 说明: 全部为纯函数，不依赖外部状态
// ==========================================

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use std::str::FromStr;

/// 视为空值的占位文本（归一化后比较）
const NULL_MARKERS: &[&str] = &["", "-", "null", "n/a", "na", "none"];

/// 支持的日期格式（按优先级）
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y", "%Y%m%d"];

pub struct DataCleaner;

impl DataCleaner {
    /// TRIM 并把占位空值标准化为 None
    pub fn normalize_null(value: &str) -> Option<String> {
        let trimmed = value.trim();
        if NULL_MARKERS.contains(&trimmed.to_lowercase().as_str()) {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// 键名归一化: 小写、去重音、空白/连字符/点 → 下划线
    ///
    /// 用于表头匹配与枚举匹配，例如 "Fecha de Emisión" → "fecha_de_emision"
    pub fn normalize_key(value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut last_sep = true;
        for ch in value.trim().chars() {
            let mapped = match ch {
                'á' | 'à' | 'ä' | 'â' | 'Á' | 'À' | 'Ä' | 'Â' => 'a',
                'é' | 'è' | 'ë' | 'ê' | 'É' | 'È' | 'Ë' | 'Ê' => 'e',
                'í' | 'ì' | 'ï' | 'î' | 'Í' | 'Ì' | 'Ï' | 'Î' => 'i',
                'ó' | 'ò' | 'ö' | 'ô' | 'Ó' | 'Ò' | 'Ö' | 'Ô' => 'o',
                'ú' | 'ù' | 'ü' | 'û' | 'Ú' | 'Ù' | 'Ü' | 'Û' => 'u',
                'ñ' | 'Ñ' => 'n',
                c if c.is_alphanumeric() => c.to_ascii_lowercase(),
                _ => '_',
            };
            if mapped == '_' {
                if !last_sep {
                    out.push('_');
                }
                last_sep = true;
            } else {
                out.push(mapped);
                last_sep = false;
            }
        }
        while out.ends_with('_') {
            out.pop();
        }
        out
    }

    /// 解析金额（本地化小数分隔符）
    ///
    /// 规则:
    /// - 去除空白、货币符号 ($ / USD)，括号表示负数
    /// - 同时出现 '.' 和 ','：最后出现者为小数点，另一者为千分位
    /// - 仅出现一种分隔符：出现多次视为千分位，出现一次视为小数点
    pub fn parse_decimal(value: &str) -> Option<Decimal> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }

        let parenthesized = trimmed.starts_with('(') && trimmed.ends_with(')');
        let mut cleaned: String = trimmed
            .chars()
            .filter(|c| !c.is_whitespace() && !matches!(c, '$' | '(' | ')' | '\u{a0}'))
            .collect();
        if let Some(rest) = cleaned.strip_prefix("USD") {
            cleaned = rest.to_string();
        }

        let dots = cleaned.matches('.').count();
        let commas = cleaned.matches(',').count();
        let normalized = match (dots, commas) {
            (0, 0) => cleaned,
            (_, 0) if dots > 1 => cleaned.replace('.', ""),
            (_, 0) => cleaned,
            (0, _) if commas > 1 => cleaned.replace(',', ""),
            (0, _) => cleaned.replace(',', "."),
            _ => {
                let last_dot = cleaned.rfind('.').unwrap_or(0);
                let last_comma = cleaned.rfind(',').unwrap_or(0);
                if last_comma > last_dot {
                    cleaned.replace('.', "").replace(',', ".")
                } else {
                    cleaned.replace(',', "")
                }
            }
        };

        let amount = Decimal::from_str(&normalized).ok()?;
        Some(if parenthesized { -amount } else { amount })
    }

    /// 解析日期（多格式 + Excel 序列号）
    pub fn parse_date(value: &str) -> Option<NaiveDate> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }

        for fmt in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
                return Some(date);
            }
        }

        // 带时间部分: "2026-01-05 00:00:00" / "2026-01-05T08:30:00"
        if let Some(date_part) = trimmed.split(|c: char| c == ' ' || c == 'T').next() {
            if date_part.len() < trimmed.len() {
                for fmt in DATE_FORMATS {
                    if let Ok(date) = NaiveDate::parse_from_str(date_part, fmt) {
                        return Some(date);
                    }
                }
            }
        }

        // Excel 序列号（1900 日期系统）
        if trimmed.len() == 5 && trimmed.chars().all(|c| c.is_ascii_digit()) {
            let serial: i64 = trimmed.parse().ok()?;
            let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
            return epoch.checked_add_signed(Duration::days(serial));
        }

        None
    }

    /// 枚举匹配: 返回规范值
    ///
    /// 归一化后完全相同，或以规范值为前缀（如 "tarjeta de crédito" → "tarjeta"）
    pub fn match_enum(value: &str, allowed: &'static [&'static str]) -> Option<&'static str> {
        let key = Self::normalize_key(value);
        if key.is_empty() {
            return None;
        }
        allowed
            .iter()
            .find(|a| key == **a)
            .or_else(|| {
                allowed
                    .iter()
                    .find(|a| key.starts_with(&format!("{}_", a)))
            })
            .copied()
    }

    /// 把电子表格数值单元格转成文本（整数不带小数点）
    pub fn format_number(value: f64) -> String {
        if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            value.to_string()
        }
    }
}

// ==========================================
// 批量导入管道 - 税号校验（厄瓜多尔 RUC / Cédula）
// ==========================================
// 规则:
// - 仅数字，10 位（cédula）或 13 位（RUC）
// - 前两位省份代码 01..=24 或 30（境外）
// - 第三位决定纳税人类型与校验算法:
//   0..=5 自然人: 模 10（系数 2,1,2,1,2,1,2,1,2），校验位为第 10 位
//   6     公共机构: 模 11（系数 3,2,7,6,5,4,3,2），校验位为第 9 位，仅 RUC
//   9     私营公司: 模 11（系数 4,3,2,7,6,5,4,3,2），校验位为第 10 位，仅 RUC
// - RUC 末尾的机构编号不能全为 0
// ==========================================

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxIdKind {
    NaturalPerson,
    PublicEntity,
    PrivateCompany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxIdError {
    Digits,
    Length,
    Province,
    ThirdDigit,
    CheckDigit,
    Establishment,
}

impl TaxIdError {
    /// 对应的 i18n 键
    pub fn message_key(&self) -> &'static str {
        match self {
            TaxIdError::Digits => "tax_id.digits",
            TaxIdError::Length => "tax_id.length",
            TaxIdError::Province => "tax_id.province",
            TaxIdError::ThirdDigit => "tax_id.third_digit",
            TaxIdError::CheckDigit => "tax_id.check_digit",
            TaxIdError::Establishment => "tax_id.establishment",
        }
    }
}

impl fmt::Display for TaxIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message_key())
    }
}

const NATURAL_COEFFICIENTS: [u32; 9] = [2, 1, 2, 1, 2, 1, 2, 1, 2];
const PUBLIC_COEFFICIENTS: [u32; 8] = [3, 2, 7, 6, 5, 4, 3, 2];
const PRIVATE_COEFFICIENTS: [u32; 9] = [4, 3, 2, 7, 6, 5, 4, 3, 2];

/// 校验 RUC / cédula，返回纳税人类型
pub fn validate_tax_id(value: &str) -> Result<TaxIdKind, TaxIdError> {
    let value = value.trim();
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(TaxIdError::Digits);
    }
    if value.len() != 10 && value.len() != 13 {
        return Err(TaxIdError::Length);
    }

    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    let province = digits[0] * 10 + digits[1];
    if !((1..=24).contains(&province) || province == 30) {
        return Err(TaxIdError::Province);
    }

    let is_ruc = digits.len() == 13;
    let kind = match digits[2] {
        0..=5 => {
            if mod10_check(&digits[..9]) != digits[9] {
                return Err(TaxIdError::CheckDigit);
            }
            TaxIdKind::NaturalPerson
        }
        6 if is_ruc => {
            if mod11_check(&digits[..8], &PUBLIC_COEFFICIENTS) != Some(digits[8]) {
                return Err(TaxIdError::CheckDigit);
            }
            TaxIdKind::PublicEntity
        }
        9 if is_ruc => {
            if mod11_check(&digits[..9], &PRIVATE_COEFFICIENTS) != Some(digits[9]) {
                return Err(TaxIdError::CheckDigit);
            }
            TaxIdKind::PrivateCompany
        }
        _ => return Err(TaxIdError::ThirdDigit),
    };

    if is_ruc {
        let establishment = match kind {
            TaxIdKind::PublicEntity => &value[9..],
            _ => &value[10..],
        };
        if establishment.chars().all(|c| c == '0') {
            return Err(TaxIdError::Establishment);
        }
    }

    Ok(kind)
}

/// 模 10（自然人）
fn mod10_check(digits: &[u32]) -> u32 {
    let sum: u32 = digits
        .iter()
        .zip(NATURAL_COEFFICIENTS)
        .map(|(d, c)| {
            let p = d * c;
            if p > 9 {
                p - 9
            } else {
                p
            }
        })
        .sum();
    (10 - sum % 10) % 10
}

/// 模 11（公共机构/私营公司）；余数为 10 时无有效校验位
fn mod11_check(digits: &[u32], coefficients: &[u32]) -> Option<u32> {
    let sum: u32 = digits.iter().zip(coefficients).map(|(d, c)| d * c).sum();
    match 11 - sum % 11 {
        11 => Some(0),
        10 => None,
        r => Some(r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert_eq!(validate_tax_id("1710034065"), Ok(TaxIdKind::NaturalPerson));
        assert_eq!(validate_tax_id("1710034065001"), Ok(TaxIdKind::NaturalPerson));
        assert_eq!(validate_tax_id("0926687856"), Ok(TaxIdKind::NaturalPerson));
        assert_eq!(validate_tax_id("1790012344001"), Ok(TaxIdKind::PrivateCompany));
        assert_eq!(validate_tax_id("0992339411001"), Ok(TaxIdKind::PrivateCompany));
        assert_eq!(validate_tax_id("1760001550001"), Ok(TaxIdKind::PublicEntity));
    }

    #[test]
    fn test_invalid_identifiers() {
        assert_eq!(validate_tax_id("17100340AB"), Err(TaxIdError::Digits));
        assert_eq!(validate_tax_id(""), Err(TaxIdError::Digits));
        assert_eq!(validate_tax_id("171003406"), Err(TaxIdError::Length));
        assert_eq!(validate_tax_id("9910034065"), Err(TaxIdError::Province));
        assert_eq!(validate_tax_id("1780012344001"), Err(TaxIdError::ThirdDigit));
        assert_eq!(validate_tax_id("1790012344"), Err(TaxIdError::ThirdDigit));
        assert_eq!(validate_tax_id("1710034064"), Err(TaxIdError::CheckDigit));
        assert_eq!(validate_tax_id("1790012345001"), Err(TaxIdError::CheckDigit));
        assert_eq!(validate_tax_id("1710034065000"), Err(TaxIdError::Establishment));
    }
}

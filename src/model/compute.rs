//! Computes: table transformations applied in index order to a source result.

use crate::model::resource::{EmbeddedResource, ReferenceTranslationTable, Rewrite};
use crate::model::source::rewrite_opt;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComputeType {
    Add,
    And,
    ArrayTranslate,
    Awk,
    Convert,
    Divide,
    DuplicateColumn,
    ExcludeMatchingLines,
    Extract,
    ExtractPropertyFromWbemPath,
    Json2Csv,
    KeepColumns,
    KeepOnlyMatchingLines,
    LeftConcat,
    Multiply,
    PerBitTranslation,
    Replace,
    RightConcat,
    Substring,
    Subtract,
    Translate,
    Xml2Csv,
}

impl ComputeType {
    pub const ALL: [ComputeType; 22] = [
        ComputeType::Add,
        ComputeType::And,
        ComputeType::ArrayTranslate,
        ComputeType::Awk,
        ComputeType::Convert,
        ComputeType::Divide,
        ComputeType::DuplicateColumn,
        ComputeType::ExcludeMatchingLines,
        ComputeType::Extract,
        ComputeType::ExtractPropertyFromWbemPath,
        ComputeType::Json2Csv,
        ComputeType::KeepColumns,
        ComputeType::KeepOnlyMatchingLines,
        ComputeType::LeftConcat,
        ComputeType::Multiply,
        ComputeType::PerBitTranslation,
        ComputeType::Replace,
        ComputeType::RightConcat,
        ComputeType::Substring,
        ComputeType::Subtract,
        ComputeType::Translate,
        ComputeType::Xml2Csv,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ComputeType::Add => "add",
            ComputeType::And => "and",
            ComputeType::ArrayTranslate => "arrayTranslate",
            ComputeType::Awk => "awk",
            ComputeType::Convert => "convert",
            ComputeType::Divide => "divide",
            ComputeType::DuplicateColumn => "duplicateColumn",
            ComputeType::ExcludeMatchingLines => "excludeMatchingLines",
            ComputeType::Extract => "extract",
            ComputeType::ExtractPropertyFromWbemPath => "extractPropertyFromWbemPath",
            ComputeType::Json2Csv => "json2Csv",
            ComputeType::KeepColumns => "keepColumns",
            ComputeType::KeepOnlyMatchingLines => "keepOnlyMatchingLines",
            ComputeType::LeftConcat => "leftConcat",
            ComputeType::Multiply => "multiply",
            ComputeType::PerBitTranslation => "perBitTranslation",
            ComputeType::Replace => "replace",
            ComputeType::RightConcat => "rightConcat",
            ComputeType::Substring => "substring",
            ComputeType::Subtract => "subtract",
            ComputeType::Translate => "translate",
            ComputeType::Xml2Csv => "xml2Csv",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn parse(value: &str) -> Option<Self> {
        let wanted = value.trim();
        Self::ALL
            .into_iter()
            .find(|ty| ty.name().eq_ignore_ascii_case(wanted))
    }
}

impl fmt::Display for ComputeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `add`, `subtract`, `multiply`, `divide` and `and`: combine a column with a
/// literal, another column (`$N`) or a source reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arithmetic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayTranslate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_table: Option<ReferenceTranslationTable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_separator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_separator: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Awk {
    /// Inline program text or an `EmbeddedFile(N)` token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separators: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_columns: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversionType {
    Hex2Decimal,
    Array2SimpleStatus,
}

impl ConversionType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "hex2decimal" => Some(ConversionType::Hex2Decimal),
            "array2simplestatus" => Some(ConversionType::Array2SimpleStatus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Convert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion: Option<ConversionType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnOnly {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingLines {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_list: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extract {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_separators: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractPropertyFromWbemPath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Json2Csv {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepColumns {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_numbers: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerBitTranslation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_list: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_table: Option<ReferenceTranslationTable>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Substring {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_table: Option<ReferenceTranslationTable>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Xml2Csv {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ComputeKind {
    Add(Arithmetic),
    And(Arithmetic),
    ArrayTranslate(ArrayTranslate),
    Awk(Awk),
    Convert(Convert),
    Divide(Arithmetic),
    DuplicateColumn(ColumnOnly),
    ExcludeMatchingLines(MatchingLines),
    Extract(Extract),
    ExtractPropertyFromWbemPath(ExtractPropertyFromWbemPath),
    Json2Csv(Json2Csv),
    KeepColumns(KeepColumns),
    KeepOnlyMatchingLines(MatchingLines),
    LeftConcat(Concat),
    Multiply(Arithmetic),
    PerBitTranslation(PerBitTranslation),
    Replace(Replace),
    RightConcat(Concat),
    Substring(Substring),
    Subtract(Arithmetic),
    Translate(Translate),
    Xml2Csv(Xml2Csv),
}

impl ComputeKind {
    pub fn new(ty: ComputeType) -> Self {
        match ty {
            ComputeType::Add => ComputeKind::Add(Arithmetic::default()),
            ComputeType::And => ComputeKind::And(Arithmetic::default()),
            ComputeType::ArrayTranslate => ComputeKind::ArrayTranslate(ArrayTranslate::default()),
            ComputeType::Awk => ComputeKind::Awk(Awk::default()),
            ComputeType::Convert => ComputeKind::Convert(Convert::default()),
            ComputeType::Divide => ComputeKind::Divide(Arithmetic::default()),
            ComputeType::DuplicateColumn => ComputeKind::DuplicateColumn(ColumnOnly::default()),
            ComputeType::ExcludeMatchingLines => {
                ComputeKind::ExcludeMatchingLines(MatchingLines::default())
            }
            ComputeType::Extract => ComputeKind::Extract(Extract::default()),
            ComputeType::ExtractPropertyFromWbemPath => {
                ComputeKind::ExtractPropertyFromWbemPath(ExtractPropertyFromWbemPath::default())
            }
            ComputeType::Json2Csv => ComputeKind::Json2Csv(Json2Csv::default()),
            ComputeType::KeepColumns => ComputeKind::KeepColumns(KeepColumns::default()),
            ComputeType::KeepOnlyMatchingLines => {
                ComputeKind::KeepOnlyMatchingLines(MatchingLines::default())
            }
            ComputeType::LeftConcat => ComputeKind::LeftConcat(Concat::default()),
            ComputeType::Multiply => ComputeKind::Multiply(Arithmetic::default()),
            ComputeType::PerBitTranslation => {
                ComputeKind::PerBitTranslation(PerBitTranslation::default())
            }
            ComputeType::Replace => ComputeKind::Replace(Replace::default()),
            ComputeType::RightConcat => ComputeKind::RightConcat(Concat::default()),
            ComputeType::Substring => ComputeKind::Substring(Substring::default()),
            ComputeType::Subtract => ComputeKind::Subtract(Arithmetic::default()),
            ComputeType::Translate => ComputeKind::Translate(Translate::default()),
            ComputeType::Xml2Csv => ComputeKind::Xml2Csv(Xml2Csv::default()),
        }
    }

    pub fn compute_type(&self) -> ComputeType {
        match self {
            ComputeKind::Add(_) => ComputeType::Add,
            ComputeKind::And(_) => ComputeType::And,
            ComputeKind::ArrayTranslate(_) => ComputeType::ArrayTranslate,
            ComputeKind::Awk(_) => ComputeType::Awk,
            ComputeKind::Convert(_) => ComputeType::Convert,
            ComputeKind::Divide(_) => ComputeType::Divide,
            ComputeKind::DuplicateColumn(_) => ComputeType::DuplicateColumn,
            ComputeKind::ExcludeMatchingLines(_) => ComputeType::ExcludeMatchingLines,
            ComputeKind::Extract(_) => ComputeType::Extract,
            ComputeKind::ExtractPropertyFromWbemPath(_) => ComputeType::ExtractPropertyFromWbemPath,
            ComputeKind::Json2Csv(_) => ComputeType::Json2Csv,
            ComputeKind::KeepColumns(_) => ComputeType::KeepColumns,
            ComputeKind::KeepOnlyMatchingLines(_) => ComputeType::KeepOnlyMatchingLines,
            ComputeKind::LeftConcat(_) => ComputeType::LeftConcat,
            ComputeKind::Multiply(_) => ComputeType::Multiply,
            ComputeKind::PerBitTranslation(_) => ComputeType::PerBitTranslation,
            ComputeKind::Replace(_) => ComputeType::Replace,
            ComputeKind::RightConcat(_) => ComputeType::RightConcat,
            ComputeKind::Substring(_) => ComputeType::Substring,
            ComputeKind::Subtract(_) => ComputeType::Subtract,
            ComputeKind::Translate(_) => ComputeType::Translate,
            ComputeKind::Xml2Csv(_) => ComputeType::Xml2Csv,
        }
    }
}

/// One transformation of a source's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compute {
    /// 1-based position within the owning source.
    pub index: u32,
    #[serde(flatten)]
    pub kind: ComputeKind,
}

impl Compute {
    pub fn new(index: u32, ty: ComputeType) -> Self {
        Self {
            index,
            kind: ComputeKind::new(ty),
        }
    }

    pub fn compute_type(&self) -> ComputeType {
        self.kind.compute_type()
    }

    /// Fields that may hold a source reference. Translation-table references
    /// are not source references and are reported by
    /// [`Compute::translation_table`] instead.
    pub fn reference_fields(&self) -> Vec<(&'static str, &str)> {
        let value = match &self.kind {
            ComputeKind::Add(a)
            | ComputeKind::And(a)
            | ComputeKind::Divide(a)
            | ComputeKind::Multiply(a)
            | ComputeKind::Subtract(a) => a.value.as_deref().map(|v| ("value", v)),
            ComputeKind::LeftConcat(c) | ComputeKind::RightConcat(c) => {
                c.value.as_deref().map(|v| ("value", v))
            }
            ComputeKind::Replace(r) => r.new_value.as_deref().map(|v| ("newValue", v)),
            _ => None,
        };
        value.into_iter().collect()
    }

    pub fn translation_table(&self) -> Option<&ReferenceTranslationTable> {
        match &self.kind {
            ComputeKind::ArrayTranslate(c) => c.translation_table.as_ref(),
            ComputeKind::PerBitTranslation(c) => c.translation_table.as_ref(),
            ComputeKind::Translate(c) => c.translation_table.as_ref(),
            _ => None,
        }
    }

    pub fn awk_script(&self) -> Option<&str> {
        match &self.kind {
            ComputeKind::Awk(awk) => awk.script.as_deref(),
            _ => None,
        }
    }
}

impl EmbeddedResource for Compute {
    fn update(&mut self, rewrite: Rewrite<'_>) {
        match &mut self.kind {
            ComputeKind::Add(a)
            | ComputeKind::And(a)
            | ComputeKind::Divide(a)
            | ComputeKind::Multiply(a)
            | ComputeKind::Subtract(a) => rewrite_opt(&mut a.value, rewrite),
            ComputeKind::LeftConcat(c) | ComputeKind::RightConcat(c) => {
                rewrite_opt(&mut c.value, rewrite)
            }
            ComputeKind::ArrayTranslate(c) => {
                rewrite_opt(&mut c.array_separator, rewrite);
                rewrite_opt(&mut c.result_separator, rewrite);
                if let Some(table) = &mut c.translation_table {
                    table.update(rewrite);
                }
            }
            ComputeKind::Awk(c) => {
                for field in [
                    &mut c.script,
                    &mut c.exclude,
                    &mut c.keep,
                    &mut c.separators,
                    &mut c.select_columns,
                ] {
                    rewrite_opt(field, rewrite);
                }
            }
            ComputeKind::ExcludeMatchingLines(c) | ComputeKind::KeepOnlyMatchingLines(c) => {
                rewrite_opt(&mut c.regexp, rewrite);
                rewrite_opt(&mut c.value_list, rewrite);
            }
            ComputeKind::Extract(c) => rewrite_opt(&mut c.sub_separators, rewrite),
            ComputeKind::ExtractPropertyFromWbemPath(c) => rewrite_opt(&mut c.property, rewrite),
            ComputeKind::Json2Csv(c) => {
                rewrite_opt(&mut c.entry_key, rewrite);
                rewrite_opt(&mut c.properties, rewrite);
                rewrite_opt(&mut c.separator, rewrite);
            }
            ComputeKind::KeepColumns(c) => rewrite_opt(&mut c.column_numbers, rewrite),
            ComputeKind::PerBitTranslation(c) => {
                rewrite_opt(&mut c.bit_list, rewrite);
                if let Some(table) = &mut c.translation_table {
                    table.update(rewrite);
                }
            }
            ComputeKind::Replace(c) => {
                rewrite_opt(&mut c.existing_value, rewrite);
                rewrite_opt(&mut c.new_value, rewrite);
            }
            ComputeKind::Substring(c) => {
                rewrite_opt(&mut c.start, rewrite);
                rewrite_opt(&mut c.length, rewrite);
            }
            ComputeKind::Translate(c) => {
                if let Some(table) = &mut c.translation_table {
                    table.update(rewrite);
                }
            }
            ComputeKind::Xml2Csv(c) => {
                rewrite_opt(&mut c.record_tag, rewrite);
                rewrite_opt(&mut c.properties, rewrite);
            }
            ComputeKind::Convert(_) | ComputeKind::DuplicateColumn(_) => {}
        }
    }

    fn description(&self) -> String {
        format!("compute({}) ({})", self.index, self.compute_type())
    }
}

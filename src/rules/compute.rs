//! Compute rules.

use super::{Apply, Prop, Rule, SetError, ValueShape, positive};
use crate::key::{KeyPath, SlotKind};
use crate::model::compute::{Compute, ComputeKind, ComputeType, ConversionType};
use crate::model::resource::ReferenceTranslationTable;

const ARITHMETIC: &[ComputeType] = &[
    ComputeType::Add,
    ComputeType::And,
    ComputeType::Divide,
    ComputeType::Multiply,
    ComputeType::Subtract,
];

const CONCAT: &[ComputeType] = &[ComputeType::LeftConcat, ComputeType::RightConcat];

const MATCHING: &[ComputeType] = &[
    ComputeType::ExcludeMatchingLines,
    ComputeType::KeepOnlyMatchingLines,
];

const TRANSLATING: &[ComputeType] = &[
    ComputeType::ArrayTranslate,
    ComputeType::PerBitTranslation,
    ComputeType::Translate,
];

const WITH_COLUMN: &[ComputeType] = &[
    ComputeType::Add,
    ComputeType::And,
    ComputeType::ArrayTranslate,
    ComputeType::Convert,
    ComputeType::Divide,
    ComputeType::DuplicateColumn,
    ComputeType::ExcludeMatchingLines,
    ComputeType::Extract,
    ComputeType::ExtractPropertyFromWbemPath,
    ComputeType::KeepOnlyMatchingLines,
    ComputeType::LeftConcat,
    ComputeType::Multiply,
    ComputeType::PerBitTranslation,
    ComputeType::Replace,
    ComputeType::RightConcat,
    ComputeType::Substring,
    ComputeType::Subtract,
    ComputeType::Translate,
];

fn column(compute: &mut Compute) -> Result<&mut Option<u32>, SetError> {
    let column = match &mut compute.kind {
        ComputeKind::Add(c)
        | ComputeKind::And(c)
        | ComputeKind::Divide(c)
        | ComputeKind::Multiply(c)
        | ComputeKind::Subtract(c) => &mut c.column,
        ComputeKind::LeftConcat(c) | ComputeKind::RightConcat(c) => &mut c.column,
        ComputeKind::ExcludeMatchingLines(c) | ComputeKind::KeepOnlyMatchingLines(c) => {
            &mut c.column
        }
        ComputeKind::ArrayTranslate(c) => &mut c.column,
        ComputeKind::Convert(c) => &mut c.column,
        ComputeKind::DuplicateColumn(c) => &mut c.column,
        ComputeKind::Extract(c) => &mut c.column,
        ComputeKind::ExtractPropertyFromWbemPath(c) => &mut c.column,
        ComputeKind::PerBitTranslation(c) => &mut c.column,
        ComputeKind::Replace(c) => &mut c.column,
        ComputeKind::Substring(c) => &mut c.column,
        ComputeKind::Translate(c) => &mut c.column,
        ComputeKind::Awk(_)
        | ComputeKind::Json2Csv(_)
        | ComputeKind::KeepColumns(_)
        | ComputeKind::Xml2Csv(_) => return Err(SetError::WrongVariant),
    };
    Ok(column)
}

fn set_column(compute: &mut Compute, _: &KeyPath, value: &str) -> Result<(), SetError> {
    *column(compute)? = Some(positive(value)?);
    Ok(())
}

fn set_value(compute: &mut Compute, _: &KeyPath, value: &str) -> Result<(), SetError> {
    match &mut compute.kind {
        ComputeKind::Add(c)
        | ComputeKind::And(c)
        | ComputeKind::Divide(c)
        | ComputeKind::Multiply(c)
        | ComputeKind::Subtract(c) => c.value = Some(value.to_string()),
        ComputeKind::LeftConcat(c) | ComputeKind::RightConcat(c) => {
            c.value = Some(value.to_string())
        }
        _ => return Err(SetError::WrongVariant),
    }
    Ok(())
}

fn set_translation_table(compute: &mut Compute, _: &KeyPath, value: &str) -> Result<(), SetError> {
    let table = ReferenceTranslationTable::from_reference(value).ok_or(SetError::Invalid {
        expected: "a translation table name",
    })?;
    match &mut compute.kind {
        ComputeKind::ArrayTranslate(c) => c.translation_table = Some(table),
        ComputeKind::PerBitTranslation(c) => c.translation_table = Some(table),
        ComputeKind::Translate(c) => c.translation_table = Some(table),
        _ => return Err(SetError::WrongVariant),
    }
    Ok(())
}

fn set_conversion(compute: &mut Compute, _: &KeyPath, value: &str) -> Result<(), SetError> {
    let ComputeKind::Convert(convert) = &mut compute.kind else {
        return Err(SetError::WrongVariant);
    };
    convert.conversion = Some(ConversionType::parse(value).ok_or(SetError::Invalid {
        expected: "hex2Decimal or array2SimpleStatus",
    })?);
    Ok(())
}

fn set_properties(compute: &mut Compute, _: &KeyPath, value: &str) -> Result<(), SetError> {
    match &mut compute.kind {
        ComputeKind::Json2Csv(c) => c.properties = Some(value.to_string()),
        ComputeKind::Xml2Csv(c) => c.properties = Some(value.to_string()),
        _ => return Err(SetError::WrongVariant),
    }
    Ok(())
}

/// `Some(text)` into a field of the awk variant.
macro_rules! awk_field {
    ($field:ident) => {
        text_field!(ComputeKind::[Awk].$field)
    };
}

pub(super) fn rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "computeType",
            &[SlotKind::Compute],
            Prop::Exact("type"),
            ValueShape::NonBlank,
            None,
            Apply::ComputeType,
        ),
        Rule::compute("column", ValueShape::PositiveInteger, WITH_COLUMN, set_column),
        Rule::compute("value", ValueShape::Any, ARITHMETIC, set_value),
        Rule::compute("value", ValueShape::Any, CONCAT, set_value),
        Rule::new(
            "translationTable",
            &[SlotKind::Compute],
            Prop::OneOf(&["translationtable", "bittranslationtable"]),
            ValueShape::NonBlank,
            Some(super::Gate::Compute(TRANSLATING)),
            Apply::Compute(set_translation_table),
        ),
        Rule::compute(
            "arrayseparator",
            ValueShape::Any,
            &[ComputeType::ArrayTranslate],
            text_field!(ComputeKind::[ArrayTranslate].array_separator),
        ),
        Rule::compute(
            "resultseparator",
            ValueShape::Any,
            &[ComputeType::ArrayTranslate],
            text_field!(ComputeKind::[ArrayTranslate].result_separator),
        ),
        Rule::new(
            "awkScript",
            &[SlotKind::Compute],
            Prop::OneOf(&["script", "awkscript"]),
            ValueShape::NonBlank,
            Some(super::Gate::Compute(&[ComputeType::Awk])),
            Apply::Compute(awk_field!(script)),
        ),
        Rule::compute("exclude", ValueShape::Any, &[ComputeType::Awk], awk_field!(exclude)),
        Rule::compute("keep", ValueShape::Any, &[ComputeType::Awk], awk_field!(keep)),
        Rule::compute("separators", ValueShape::Any, &[ComputeType::Awk], awk_field!(separators)),
        Rule::compute(
            "selectcolumns",
            ValueShape::NonBlank,
            &[ComputeType::Awk],
            awk_field!(select_columns),
        ),
        Rule::new(
            "conversion",
            &[SlotKind::Compute],
            Prop::OneOf(&["conversion", "conversiontype"]),
            ValueShape::NonBlank,
            Some(super::Gate::Compute(&[ComputeType::Convert])),
            Apply::Compute(set_conversion),
        ),
        Rule::compute(
            "regexp",
            ValueShape::Any,
            MATCHING,
            text_field!(ComputeKind::[ExcludeMatchingLines, KeepOnlyMatchingLines].regexp),
        ),
        Rule::compute(
            "valuelist",
            ValueShape::Any,
            MATCHING,
            text_field!(ComputeKind::[ExcludeMatchingLines, KeepOnlyMatchingLines].value_list),
        ),
        Rule::compute(
            "subcolumn",
            ValueShape::PositiveInteger,
            &[ComputeType::Extract],
            parsed_field!(ComputeKind::[Extract].sub_column, positive),
        ),
        Rule::compute(
            "subseparators",
            ValueShape::Any,
            &[ComputeType::Extract],
            text_field!(ComputeKind::[Extract].sub_separators),
        ),
        Rule::compute(
            "property",
            ValueShape::NonBlank,
            &[ComputeType::ExtractPropertyFromWbemPath],
            text_field!(ComputeKind::[ExtractPropertyFromWbemPath].property),
        ),
        Rule::compute(
            "entrykey",
            ValueShape::NonBlank,
            &[ComputeType::Json2Csv],
            text_field!(ComputeKind::[Json2Csv].entry_key),
        ),
        Rule::compute(
            "properties",
            ValueShape::Any,
            &[ComputeType::Json2Csv, ComputeType::Xml2Csv],
            set_properties,
        ),
        Rule::compute(
            "separator",
            ValueShape::Any,
            &[ComputeType::Json2Csv],
            text_field!(ComputeKind::[Json2Csv].separator),
        ),
        Rule::compute(
            "columnnumbers",
            ValueShape::NonBlank,
            &[ComputeType::KeepColumns],
            text_field!(ComputeKind::[KeepColumns].column_numbers),
        ),
        Rule::compute(
            "bitlist",
            ValueShape::NonBlank,
            &[ComputeType::PerBitTranslation],
            text_field!(ComputeKind::[PerBitTranslation].bit_list),
        ),
        Rule::compute(
            "existingvalue",
            ValueShape::Any,
            &[ComputeType::Replace],
            text_field!(ComputeKind::[Replace].existing_value),
        ),
        Rule::new(
            "newValue",
            &[SlotKind::Compute],
            Prop::OneOf(&["newvalue", "replacement"]),
            ValueShape::Any,
            Some(super::Gate::Compute(&[ComputeType::Replace])),
            Apply::Compute(text_field!(ComputeKind::[Replace].new_value)),
        ),
        Rule::compute(
            "start",
            ValueShape::NonBlank,
            &[ComputeType::Substring],
            text_field!(ComputeKind::[Substring].start),
        ),
        Rule::compute(
            "length",
            ValueShape::NonBlank,
            &[ComputeType::Substring],
            text_field!(ComputeKind::[Substring].length),
        ),
        Rule::compute(
            "recordtag",
            ValueShape::NonBlank,
            &[ComputeType::Xml2Csv],
            text_field!(ComputeKind::[Xml2Csv].record_tag),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::key::KeyPath;
    use crate::model::Connector;
    use crate::model::compute::ComputeKind;
    use crate::rules::dispatch;
    use pretty_assertions::assert_eq;

    fn apply(connector: &mut Connector, key: &str, value: &str) -> Result<(), ErrorKind> {
        let key = KeyPath::parse(key).unwrap().unwrap();
        dispatch(connector, &key, value).map(|_| ()).map_err(|e| e.kind())
    }

    fn typed_source(connector: &mut Connector) {
        apply(connector, "enclosure.collect.source(1).type", "SnmpTable").unwrap();
    }

    #[test]
    fn compute_fields_after_type() {
        let mut c = Connector::new("c");
        typed_source(&mut c);
        apply(&mut c, "enclosure.collect.source(1).compute(1).type", "Add").unwrap();
        apply(&mut c, "enclosure.collect.source(1).compute(1).column", "3").unwrap();
        apply(&mut c, "enclosure.collect.source(1).compute(1).value", "$2").unwrap();

        let source = c
            .monitor("enclosure")
            .and_then(|m| m.collect.as_ref())
            .and_then(|t| t.sources.get("source(1)"))
            .unwrap();
        let ComputeKind::Add(add) = &source.computes[0].kind else {
            panic!("not an add compute");
        };
        assert_eq!(add.column, Some(3));
        assert_eq!(add.value.as_deref(), Some("$2"));
    }

    #[test]
    fn compute_field_before_type_fails() {
        let mut c = Connector::new("c");
        typed_source(&mut c);
        assert_eq!(
            apply(&mut c, "enclosure.collect.source(1).compute(1).column", "3"),
            Err(ErrorKind::MissingReferencedEntity)
        );
    }

    #[test]
    fn compute_field_of_other_variant_fails() {
        let mut c = Connector::new("c");
        typed_source(&mut c);
        apply(&mut c, "enclosure.collect.source(1).compute(1).type", "Json2Csv").unwrap();
        assert_eq!(
            apply(&mut c, "enclosure.collect.source(1).compute(1).column", "3"),
            Err(ErrorKind::TypeMismatch)
        );
    }

    #[test]
    fn translation_table_reference_forms() {
        let mut c = Connector::new("c");
        typed_source(&mut c);
        apply(&mut c, "enclosure.collect.source(1).compute(1).type", "Translate").unwrap();
        apply(
            &mut c,
            "enclosure.collect.source(1).compute(1).translationTable",
            "${translation::StatusTable}",
        )
        .unwrap();
        assert_eq!(
            apply(&mut c, "enclosure.collect.source(1).compute(1).translationTable", "two words"),
            Err(ErrorKind::InvalidValue)
        );
    }

    #[test]
    fn computes_keep_index_order() {
        let mut c = Connector::new("c");
        typed_source(&mut c);
        apply(&mut c, "enclosure.collect.source(1).compute(2).type", "DuplicateColumn").unwrap();
        apply(&mut c, "enclosure.collect.source(1).compute(1).type", "KeepColumns").unwrap();
        let source = c
            .monitor("enclosure")
            .and_then(|m| m.collect.as_ref())
            .and_then(|t| t.sources.get("source(1)"))
            .unwrap();
        let indices: Vec<u32> = source.computes.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }
}

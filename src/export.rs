//! Delimited-text export of finalised views and group lists.
//!
//! The exporter formats what it is given, in the order given. Money is
//! rounded to cents before it is written, and the optional footer row is
//! reduced from those rounded cells, so it always reconciles with the
//! body a reader sees. Quoting and CRLF row endings come from `csv`.

use crate::error::EngineError;
use crate::group::{Group, Summary};
use crate::models::{FieldValue, Record, Scope};
use crate::sort::Sortable;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub const DEFAULT_DELIMITER: char = ',';

/// What a column shows in the footer row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Footer {
    Blank,
    Label(String),
    /// Sum of the column's field over the exported rows.
    Total,
    /// Number of records behind the exported rows.
    Count,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub header: String,
    pub field: String,
    pub footer: Footer,
}

impl Column {
    pub fn text(header: &str, field: &str) -> Self {
        Self {
            header: header.into(),
            field: field.into(),
            footer: Footer::Blank,
        }
    }

    pub fn amount(header: &str, field: &str) -> Self {
        Self {
            header: header.into(),
            field: field.into(),
            footer: Footer::Total,
        }
    }

    pub fn count(header: &str) -> Self {
        Self {
            header: header.into(),
            field: "count".into(),
            footer: Footer::Count,
        }
    }

    pub fn labelled(mut self, label: &str) -> Self {
        self.footer = Footer::Label(label.into());
        self
    }
}

/// Ordered columns plus layout options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub columns: Vec<Column>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_footer")]
    pub footer: bool,
}

fn default_delimiter() -> char {
    DEFAULT_DELIMITER
}

fn default_footer() -> bool {
    true
}

impl ColumnSpec {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            delimiter: DEFAULT_DELIMITER,
            footer: true,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn without_footer(mut self) -> Self {
        self.footer = false;
        self
    }

    /// Payroll register: one line per payroll record with statutory
    /// columns and an annual aggregates row.
    pub fn payroll_register() -> Self {
        Self::new(vec![
            Column::text("Employee ID", "employee_id").labelled("Annual Aggregates"),
            Column::text("Employee Name", "employee_name"),
            Column::text("Department", "department"),
            Column::text("Period", "period"),
            Column::amount("Gross", "gross"),
            Column::amount("Tax", "tax"),
            Column::amount("Deductions", "deductions"),
            Column::amount("Net", "net"),
        ])
    }

    /// Bank transfer batch: one credit line per employee.
    pub fn bank_transfer() -> Self {
        Self::new(vec![
            Column::text("Employee ID", "employee_id").labelled("Batch Total"),
            Column::text("Employee Name", "employee_name"),
            Column::text("Bank", "bank"),
            Column::text("Branch", "branch"),
            Column::text("Account Number", "account_number"),
            Column::amount("Amount", "net"),
        ])
    }

    /// One line per group: its key, member count and the given totals.
    pub fn group_summary(key_header: &str, amount_fields: &[&str]) -> Self {
        let mut columns = vec![
            Column::text(key_header, "key").labelled("Total"),
            Column::count("Count"),
        ];
        columns.extend(amount_fields.iter().map(|f| Column::amount(&title(f), f)));
        Self::new(columns)
    }
}

fn title(field: &str) -> String {
    field
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rows the exporter can write: named cells plus their share of the
/// footer totals.
pub trait Exportable: Sortable {
    fn contribution(&self) -> Summary;
}

impl Exportable for Record {
    fn contribution(&self) -> Summary {
        Summary::of_record(self)
    }
}

impl Exportable for Group {
    fn contribution(&self) -> Summary {
        self.summary.clone()
    }
}

/// A finished export ready for download or transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub content: Vec<u8>,
    pub rows: usize,
    pub footer: Option<Summary>,
}

/// Deterministic file name from the scope and an artifact label.
pub fn artifact_name(scope: &Scope, label: &str) -> String {
    let clean = |s: &str| -> String {
        s.trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    };
    format!(
        "{}_{}_{}.csv",
        clean(&scope.company_id),
        clean(&scope.period.to_string()),
        clean(label)
    )
}

/// Rounds an amount to whole cents, halves away from zero.
pub fn money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

// Count columns print whole numbers; every other number is money.
fn render<'a>(value: Option<FieldValue<'a>>, column: &Column) -> Cow<'a, str> {
    match value {
        Some(FieldValue::Text(text)) => Cow::Borrowed(text),
        Some(FieldValue::Number(n)) if column.footer == Footer::Count => {
            Cow::Owned(n.trunc().to_string())
        }
        Some(FieldValue::Number(n)) => Cow::Owned(format!("{:.2}", money(n))),
        None => Cow::Borrowed(""),
    }
}

fn in_cents(mut summary: Summary) -> Summary {
    for amount in summary.totals.values_mut() {
        *amount = money(*amount);
    }
    summary
}

/// Footer summary for `rows`: the reduction of exactly those rows, each
/// amount taken as the cent value its cell shows.
pub fn footer_summary<T: Exportable>(rows: &[T]) -> Result<Summary, EngineError> {
    rows.iter()
        .map(|row| in_cents(row.contribution()))
        .try_fold(Summary::default(), Summary::merge)
}

/// Writes header, body and (if enabled) footer as UTF-8 text.
pub fn export<T: Exportable>(rows: &[T], spec: &ColumnSpec) -> Result<Vec<u8>, EngineError> {
    Ok(write_rows(rows, spec)?.0)
}

fn write_error(err: impl std::fmt::Display) -> EngineError {
    EngineError::Write {
        message: err.to_string(),
    }
}

fn write_rows<T: Exportable>(
    rows: &[T],
    spec: &ColumnSpec,
) -> Result<(Vec<u8>, Option<Summary>), EngineError> {
    if spec.columns.is_empty() {
        return Err(EngineError::NoColumns);
    }
    if !spec.delimiter.is_ascii() {
        return Err(EngineError::DelimiterNotAscii {
            delimiter: spec.delimiter,
        });
    }
    let mut writer = csv::WriterBuilder::new()
        .delimiter(spec.delimiter as u8)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());

    writer
        .write_record(spec.columns.iter().map(|c| c.header.as_bytes()))
        .map_err(write_error)?;
    for row in rows {
        let cells: Vec<Cow<'_, str>> = spec
            .columns
            .iter()
            .map(|c| render(row.sort_value(&c.field), c))
            .collect();
        writer
            .write_record(cells.iter().map(|cell| cell.as_bytes()))
            .map_err(write_error)?;
    }

    let footer = if spec.footer {
        let summary = footer_summary(rows)?;
        let cells: Vec<Cow<'_, str>> = spec
            .columns
            .iter()
            .map(|c| match &c.footer {
                Footer::Blank => Cow::Borrowed(""),
                Footer::Label(label) => Cow::Borrowed(label.as_str()),
                Footer::Total => Cow::Owned(format!("{:.2}", summary.total(&c.field))),
                Footer::Count => Cow::Owned(summary.count.to_string()),
            })
            .collect();
        writer
            .write_record(cells.iter().map(|cell| cell.as_bytes()))
            .map_err(write_error)?;
        Some(summary)
    } else {
        None
    };

    let bytes = writer.into_inner().map_err(|err| write_error(err.error()))?;
    Ok((bytes, footer))
}

/// Exports `rows` and names the artifact after `scope` and `label`.
pub fn export_artifact<T: Exportable>(
    scope: &Scope,
    label: &str,
    rows: &[T],
    spec: &ColumnSpec,
) -> Result<ExportArtifact, EngineError> {
    let (content, footer) = write_rows(rows, spec)?;
    Ok(ExportArtifact {
        file_name: artifact_name(scope, label),
        content,
        rows: rows.len(),
        footer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{group_by, summarize, GroupKey};
    use crate::models::fixtures::{banked, scope};
    use crate::models::Period;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    fn text(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn writes_header_body_and_footer() {
        let view = vec![banked("1", "BNS", 500_000), banked("2", "NCB", 300_000)];
        let spec = ColumnSpec::new(vec![
            Column::text("ID", "id").labelled("Total"),
            Column::text("Bank", "bank"),
            Column::amount("Net", "net"),
        ]);
        let out = text(export(&view, &spec).unwrap());
        assert_eq!(
            out,
            "ID,Bank,Net\r\n1,BNS,500000.00\r\n2,NCB,300000.00\r\nTotal,,800000.00\r\n"
        );
    }

    #[test]
    fn quotes_cells_that_need_it() {
        let mut record = banked("1", "Bank, \"Main\"", 1);
        record.employee_name = "Line\nBreak".into();
        let spec = ColumnSpec::new(vec![
            Column::text("Bank", "bank"),
            Column::text("Name", "employee_name"),
        ])
        .without_footer();
        let out = text(export(&[record], &spec).unwrap());
        assert_eq!(out, "Bank,Name\r\n\"Bank, \"\"Main\"\"\",\"Line\nBreak\"\r\n");
    }

    #[test]
    fn alternate_delimiter_changes_quoting() {
        let record = banked("1", "a,b", 1);
        let spec = ColumnSpec::new(vec![Column::text("Bank", "bank"), Column::text("ID", "id")])
            .with_delimiter(';')
            .without_footer();
        assert_eq!(text(export(&[record], &spec).unwrap()), "Bank;ID\r\na,b;1\r\n");
    }

    #[test]
    fn missing_fields_render_empty_and_utf8_survives() {
        let mut record = banked("1", "BNS", 10);
        record.employee_name = "Zoë Müller".into();
        let spec = ColumnSpec::payroll_register().without_footer();
        let out = text(export(&[record], &spec).unwrap());
        let line = out.lines().nth(1).unwrap();
        assert_eq!(line, "E-1,Zoë Müller,,2024-03,,,,10.00");
    }

    #[test]
    fn group_export_counts_members() {
        let view = vec![
            banked("1", "BNS", 500_000),
            banked("2", "NCB", 300_000),
            banked("3", "BNS", 100_000),
        ];
        let groups = group_by(&view, &GroupKey::by("bank")).unwrap();
        let artifact = export_artifact(
            &scope("ACME"),
            "bank_summary",
            &groups,
            &ColumnSpec::group_summary("Bank", &["net"]),
        )
        .unwrap();
        assert_eq!(artifact.file_name, "ACME_2024-03_bank_summary.csv");
        assert_eq!(artifact.rows, 2);
        assert_eq!(
            text(artifact.content),
            "Bank,Count,Net\r\nBNS,2,600000.00\r\nNCB,1,300000.00\r\nTotal,3,900000.00\r\n"
        );
        assert_eq!(artifact.footer.unwrap().total("net"), Decimal::from(900_000));
    }

    #[test]
    fn artifact_names_are_sanitised() {
        let mut s = scope("Acme Ltd/JM");
        s.period = Period::Year(2024);
        assert_eq!(artifact_name(&s, "tax year"), "Acme_Ltd_JM_2024_tax_year.csv");
    }

    #[test]
    fn bank_transfer_preset_headers() {
        let out = text(export::<Record>(&[], &ColumnSpec::bank_transfer()).unwrap());
        assert_eq!(
            out,
            "Employee ID,Employee Name,Bank,Branch,Account Number,Amount\r\nBatch Total,,,,,0.00\r\n"
        );
    }

    #[test]
    fn no_columns_is_an_error() {
        let spec = ColumnSpec::new(Vec::new());
        assert_eq!(export::<Record>(&[], &spec), Err(EngineError::NoColumns));
    }

    #[test]
    fn footer_adds_the_cents_shown() {
        let view: Vec<Record> = (0..2)
            .map(|_| {
                let mut r = banked("1", "BNS", 0);
                r.amounts.insert("net".into(), Decimal::new(19, 3));
                r
            })
            .collect();
        let spec = ColumnSpec::new(vec![
            Column::text("ID", "id").labelled("Total"),
            Column::amount("Net", "net"),
        ]);
        let artifact = export_artifact(&scope("ACME"), "register", &view, &spec).unwrap();
        assert_eq!(text(artifact.content), "ID,Net\r\n1,0.02\r\n1,0.02\r\nTotal,0.04\r\n");
        assert_eq!(artifact.footer.unwrap().total("net"), Decimal::new(4, 2));
    }

    #[test]
    fn half_cents_round_away_from_zero() {
        assert_eq!(money(Decimal::new(5, 3)), Decimal::new(1, 2));
        assert_eq!(money(Decimal::new(-5, 3)), Decimal::new(-1, 2));
        assert_eq!(money(Decimal::new(1_004, 3)), Decimal::new(100, 2));
    }

    #[test]
    fn non_ascii_delimiter_is_refused() {
        let spec = ColumnSpec::new(vec![Column::text("ID", "id")]).with_delimiter('§');
        assert_eq!(
            export::<Record>(&[], &spec),
            Err(EngineError::DelimiterNotAscii { delimiter: '§' })
        );
    }

    proptest! {
        #[test]
        fn footer_reconciles_with_rows(nets in prop::collection::vec(-1_000_000i64..1_000_000, 0..30)) {
            let view: Vec<Record> = nets
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    let mut r = banked(&i.to_string(), "BNS", 0);
                    r.amounts.insert("net".into(), Decimal::new(*n, 2));
                    r
                })
                .collect();
            let before = view.clone();
            let artifact =
                export_artifact(&scope("ACME"), "register", &view, &ColumnSpec::bank_transfer()).unwrap();
            prop_assert_eq!(&view, &before);
            let footer = artifact.footer.unwrap();
            prop_assert_eq!(footer.count, view.len());
            prop_assert_eq!(footer.total("net"), summarize(&view).unwrap().total("net"));
            let out = text(artifact.content);
            let last = out.lines().last().unwrap().to_string();
            let expected = format!("Batch Total,,,,,{:.2}", summarize(&view).unwrap().total("net"));
            prop_assert_eq!(last, expected);
        }
    }
}

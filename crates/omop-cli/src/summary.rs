use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::{UTF8_FULL, UTF8_FULL_CONDENSED};
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use omop_cli::logging::redact_value;
use omop_model::{RecordErrorKind, RunReport, Severity, TableLoadResult, TableStatus};

use crate::commands::RunOutcome;

/// Unmapped values listed in the terminal summary.
const MAX_UNMAPPED_ROWS: usize = 10;

pub fn print_summary(outcome: &RunOutcome) {
    let report = &outcome.report;
    println!("Trial: {}", report.trial);
    println!("Tables: {}", outcome.tables_dir.display());
    println!("Run report: {}", outcome.report_path.display());
    if !report.missing_source_tables.is_empty() {
        println!(
            "Missing extracts: {}",
            report.missing_source_tables.join(", ")
        );
    }
    print_load_table(report);
    print_source_table(report);
    print_unmapped_table(report);
    print_violation_table(report);
    if let Some(error) = &report.load.truncation_error {
        eprintln!("Truncation failed: {error}");
    }
    for failed in report.load.failed_tables() {
        if let Some(error) = &failed.error {
            eprintln!("- {}: {error}", failed.table);
        }
    }
    if report.rejection_threshold_exceeded() {
        eprintln!(
            "Rejected records ({}) exceed the configured maximum.",
            report.rejected_records()
        );
    }
    if report.validation_failed() {
        eprintln!(
            "Validation found {} error(s).",
            report.validation.error_count()
        );
    }
}

fn print_load_table(report: &RunReport) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Table"),
        header_cell("Status"),
        header_cell("Attempted"),
        header_cell("Inserted"),
        header_cell("Collapsed"),
        header_cell("Rejected rows"),
        header_cell("Rejected records"),
        header_cell("Unmapped"),
        header_cell("Errors"),
        header_cell("Warnings"),
    ]);
    apply_summary_table_style(&mut table);
    for index in 2..table.column_count() {
        align_column(&mut table, index, CellAlignment::Right);
    }
    align_column(&mut table, 1, CellAlignment::Center);

    let by_table = report.validation.by_table();
    let mut total_inserted = 0usize;
    for result in &report.load.tables {
        let violations = by_table.get(&result.table);
        let errors = violations.map(|list| {
            list.iter()
                .filter(|violation| violation.severity == Severity::Error)
                .count()
        });
        let warnings = violations.map(|list| {
            list.iter()
                .filter(|violation| violation.severity == Severity::Warning)
                .count()
        });
        let record_errors: usize = report
            .record_errors
            .get(&result.table)
            .map_or(0, |kinds| kinds.values().sum());
        total_inserted += result.inserted;
        table.add_row(vec![
            Cell::new(&result.table)
                .fg(Color::Blue)
                .add_attribute(Attribute::Bold),
            status_cell(result),
            Cell::new(result.attempted),
            Cell::new(result.inserted),
            count_cell(Some(result.duplicates_collapsed), Color::Yellow),
            count_cell(Some(result.rejected.len()), Color::Red),
            count_cell(Some(record_errors), Color::Red),
            count_cell(
                Some(report.unmapped_warnings.get(&result.table).copied().unwrap_or(0)),
                Color::Yellow,
            ),
            count_cell(errors, Color::Red),
            count_cell(warnings, Color::Yellow),
        ]);
    }
    table.add_row(vec![
        Cell::new("TOTAL")
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        dim_cell("-"),
        dim_cell("-"),
        Cell::new(total_inserted).add_attribute(Attribute::Bold),
        dim_cell("-"),
        dim_cell("-"),
        count_cell(Some(report.rejected_records()), Color::Red).add_attribute(Attribute::Bold),
        count_cell(Some(report.unmapped_warnings.values().sum()), Color::Yellow)
            .add_attribute(Attribute::Bold),
        count_cell(Some(report.validation.error_count()), Color::Red)
            .add_attribute(Attribute::Bold),
        count_cell(Some(report.validation.warning_count()), Color::Yellow)
            .add_attribute(Attribute::Bold),
    ]);
    println!("{table}");
}

fn print_source_table(report: &RunReport) {
    if report.sources.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Source"),
        header_cell("Records"),
        header_cell("Accepted"),
        header_cell("Rejected"),
        header_cell("Rows"),
        header_cell("Empty slots"),
    ]);
    apply_table_style(&mut table);
    for index in 1..table.column_count() {
        align_column(&mut table, index, CellAlignment::Right);
    }
    for source in &report.sources {
        table.add_row(vec![
            Cell::new(&source.source_table),
            Cell::new(source.records),
            Cell::new(source.accepted),
            count_cell(Some(source.rejected), Color::Red),
            Cell::new(source.drafts),
            dim_cell(source.skipped_empty),
        ]);
    }
    println!();
    println!("Sources:");
    println!("{table}");
    print_record_error_table(report);
}

/// Rejected records per target table and error kind.
fn print_record_error_table(report: &RunReport) {
    if report.record_errors.is_empty() {
        return;
    }
    let mut table = Table::new();
    let mut header = vec![header_cell("Table")];
    header.extend(
        RecordErrorKind::ALL
            .iter()
            .map(|kind| header_cell(kind.as_str())),
    );
    table.set_header(header);
    apply_table_style(&mut table);
    for index in 1..table.column_count() {
        align_column(&mut table, index, CellAlignment::Right);
    }
    for (name, kinds) in &report.record_errors {
        let mut row = vec![Cell::new(name)];
        row.extend(
            RecordErrorKind::ALL
                .iter()
                .map(|kind| count_cell(kinds.get(kind).copied(), Color::Red)),
        );
        table.add_row(row);
    }
    println!();
    println!("Rejected records:");
    println!("{table}");
}

fn print_unmapped_table(report: &RunReport) {
    if report.unmapped_values.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Source field"),
        header_cell("Value"),
        header_cell("Concept"),
        header_cell("Count"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 2, CellAlignment::Right);
    align_column(&mut table, 3, CellAlignment::Right);
    for value in report.unmapped_values.iter().take(MAX_UNMAPPED_ROWS) {
        table.add_row(vec![
            Cell::new(&value.source_field),
            Cell::new(redact_value(&value.raw_value)),
            dim_cell(value.concept_id),
            Cell::new(value.occurrences).fg(Color::Yellow),
        ]);
    }
    let hidden = report.unmapped_values.len().saturating_sub(MAX_UNMAPPED_ROWS);
    println!();
    println!("Unmapped values:");
    println!("{table}");
    if hidden > 0 {
        println!("... and {hidden} more in the run report");
    }
}

fn print_violation_table(report: &RunReport) {
    if report.validation.violations.is_empty() {
        return;
    }
    let mut violations: Vec<_> = report.validation.violations.iter().collect();
    violations.sort_by(|a, b| {
        severity_rank(b.severity)
            .cmp(&severity_rank(a.severity))
            .then_with(|| a.table.cmp(&b.table))
            .then_with(|| a.column.cmp(&b.column))
    });
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Table"),
        header_cell("Severity"),
        header_cell("Check"),
        header_cell("Column"),
        header_cell("Count"),
        header_cell("Examples"),
    ]);
    apply_issue_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Center);
    align_column(&mut table, 4, CellAlignment::Right);
    for violation in violations {
        let examples = if violation.examples.is_empty() {
            dim_cell("-")
        } else {
            Cell::new(violation.examples.join(", "))
        };
        table.add_row(vec![
            Cell::new(&violation.table)
                .fg(Color::Blue)
                .add_attribute(Attribute::Bold),
            severity_cell(violation.severity),
            Cell::new(violation.check.as_str()),
            Cell::new(&violation.column),
            Cell::new(violation.count).fg(severity_color(violation.severity)),
            examples,
        ]);
    }
    println!();
    println!("Validation:");
    println!("{table}");
}

fn status_cell(result: &TableLoadResult) -> Cell {
    let cell = Cell::new(result.status.as_str());
    match result.status {
        TableStatus::Committed => cell.fg(Color::Green).add_attribute(Attribute::Bold),
        TableStatus::Failed => cell.fg(Color::Red).add_attribute(Attribute::Bold),
        TableStatus::Cancelled => cell.fg(Color::Yellow),
        TableStatus::Skipped => cell.fg(Color::DarkGrey),
    }
}

fn count_cell(count: Option<usize>, color: Color) -> Cell {
    match count {
        Some(value) if value > 0 => Cell::new(value).fg(color).add_attribute(Attribute::Bold),
        Some(value) => dim_cell(value),
        None => dim_cell("-"),
    }
}

pub fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn apply_summary_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(140);
}

fn apply_issue_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(160);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn severity_cell(severity: Severity) -> Cell {
    match severity {
        Severity::Error => Cell::new("ERROR").fg(Color::Red),
        Severity::Warning => Cell::new("WARN").fg(Color::Yellow),
    }
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Error => 2,
        Severity::Warning => 1,
    }
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Error => Color::Red,
        Severity::Warning => Color::Yellow,
    }
}

pub fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

pub fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}

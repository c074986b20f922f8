//! Plain-text error summary table.

use std::fmt::Write;

/// One line of the error summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    /// Error kind shown to the user
    pub kind: &'static str,
    pub count: i64,
    /// Fully qualified table holding the evidence, empty if none
    pub table: String,
}

const HEADER: [&str; 4] = ["#", "Error Type", "Error Count", "Error Data Table"];

/// Renders `rows` as a boxed table headed by `Import Data Error Summary:`.
pub fn render(rows: &[SummaryRow]) -> String {
    let cells: Vec<[String; 4]> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            [
                (i + 1).to_string(),
                row.kind.to_string(),
                row.count.to_string(),
                row.table.clone(),
            ]
        })
        .collect();

    let mut widths = HEADER.map(str::len);
    for line in &cells {
        for (width, cell) in widths.iter_mut().zip(line) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::from("\nImport Data Error Summary: \n");
    push_rule(&mut out, &widths);
    push_line(&mut out, &widths, &HEADER.map(|h| h.to_uppercase()));
    push_rule(&mut out, &widths);
    for line in &cells {
        push_line(&mut out, &widths, line);
    }
    push_rule(&mut out, &widths);
    out
}

fn push_rule(out: &mut String, widths: &[usize; 4]) {
    for width in widths {
        out.push('+');
        out.push_str(&"-".repeat(width + 2));
    }
    out.push_str("+\n");
}

fn push_line(out: &mut String, widths: &[usize; 4], cells: &[String; 4]) {
    for (col, (width, cell)) in widths.iter().zip(cells).enumerate() {
        // Counts are right aligned.
        let _ = if col == 2 {
            write!(out, "| {:>width$} ", cell, width = width)
        } else {
            write!(out, "| {:<width$} ", cell, width = width)
        };
    }
    out.push_str("|\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_aligns_columns() {
        let out = render(&[
            SummaryRow {
                kind: "Data Type",
                count: 12,
                table: "`task`.`type_error_v1`".to_string(),
            },
            SummaryRow {
                kind: "Unique Key Conflict",
                count: 3,
                table: "`task`.`conflict_error_v1`".to_string(),
            },
        ]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], "Import Data Error Summary: ");
        assert!(lines[3].starts_with("| # | ERROR TYPE "));
        assert!(lines[5].contains("| Data Type           |          12 |"));
        assert!(lines[6].contains("| Unique Key Conflict |           3 |"));
        let width = lines[2].len();
        assert!(lines[2..].iter().all(|line| line.len() == width));
    }
}

use serde::Serialize;
use vlib_core::rule::{RuleResult, Status};

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  ").trim_end());

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

/// Result tree as table rows, children indented under their parent.
pub fn result_rows(results: &[RuleResult]) -> Vec<Vec<String>> {
    fn push(r: &RuleResult, depth: usize, out: &mut Vec<Vec<String>>) {
        out.push(vec![
            format!("{}{}", "  ".repeat(depth), r.rule_id),
            r.status.to_string(),
            r.message.clone(),
        ]);
        for child in &r.children {
            push(child, depth + 1, out);
        }
    }
    let mut out = Vec::new();
    for r in results {
        push(r, 0, &mut out);
    }
    out
}

/// Rows in the tree with FAIL or ERROR status.
pub fn count_failures(results: &[RuleResult]) -> usize {
    let mut all = Vec::new();
    for r in results {
        r.walk(&mut all);
    }
    all.iter()
        .filter(|r| matches!(r.status, Status::Fail | Status::Error))
        .count()
}

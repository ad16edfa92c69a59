use colored::*;
use serde_json::{json, Value as JsonValue};
use base64::prelude::*;
use crate::utils::error::GateError;
use crate::utils::types::{QueryResult, Value};
use crate::cli::cli_args::OutputFormat;

/// Formats query results for CLI output
pub struct OutputFormatter;

impl OutputFormatter {
    /// Format query results according to the specified format
    pub fn format_result(result: &QueryResult, format: &OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::format_table(result),
            OutputFormat::Json => Self::format_json(result),
            OutputFormat::Csv => Self::format_csv(result),
        }
    }

    /// Format results as a colored table
    fn format_table(result: &QueryResult) -> String {
        if result.is_empty() {
            return "No results found.".dimmed().to_string();
        }

        let mut col_widths: Vec<usize> = result.columns.iter().map(|col| col.name.len()).collect();
        for row in &result.rows {
            for (i, value) in row.values.iter().enumerate() {
                if let Some(width) = col_widths.get_mut(i) {
                    *width = (*width).max(Self::value_to_string(value).len());
                }
            }
        }
        for width in &mut col_widths {
            *width = (*width).max(8);
        }

        let mut output = String::new();
        output.push_str(&Self::format_table_separator(&col_widths, true));
        output.push('|');
        for (col, width) in result.columns.iter().zip(&col_widths) {
            output.push_str(&format!(" {:<width$} |", col.name.bold().cyan(), width = width));
        }
        output.push('\n');
        output.push_str(&Self::format_table_separator(&col_widths, false));

        for row in &result.rows {
            output.push('|');
            for (value, width) in row.values.iter().zip(&col_widths) {
                output.push_str(&format!(" {:<width$} |", Self::format_value_colored(value), width = width));
            }
            output.push('\n');
        }
        output.push_str(&Self::format_table_separator(&col_widths, true));

        output.push_str(&format!(
            "\n{} {} in {}ms\n",
            result.row_count().to_string().green().bold(),
            if result.row_count() == 1 { "row" } else { "rows" },
            result.execution_time.as_millis()
        ));
        output
    }

    /// Format table separator line
    fn format_table_separator(col_widths: &[usize], is_border: bool) -> String {
        let edge = if is_border { '+' } else { '|' };
        let mut separator = String::new();
        separator.push(edge);
        for &width in col_widths {
            separator.push_str(&"-".repeat(width + 2));
            separator.push(edge);
        }
        separator.push('\n');
        separator
    }

    /// Format results as JSON
    fn format_json(result: &QueryResult) -> String {
        let rows: Vec<JsonValue> = result
            .rows
            .iter()
            .map(|row| {
                let row_obj: serde_json::Map<String, JsonValue> = result
                    .columns
                    .iter()
                    .zip(&row.values)
                    .map(|(col, value)| (col.name.clone(), Self::value_to_json(value)))
                    .collect();
                JsonValue::Object(row_obj)
            })
            .collect();

        let output = json!({
            "data": rows,
            "metadata": {
                "columns": result.columns.iter().map(|col| {
                    json!({
                        "name": col.name,
                        "type": col.data_type,
                        "nullable": col.nullable
                    })
                }).collect::<Vec<_>>(),
                "row_count": result.row_count(),
                "rows_affected": result.rows_affected,
                "execution_time_ms": result.execution_time.as_millis() as u64
            }
        });

        serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
    }

    /// Format results as CSV
    fn format_csv(result: &QueryResult) -> String {
        let mut output = String::new();

        let headers: Vec<String> = result.columns.iter().map(|col| Self::escape_csv_field(&col.name)).collect();
        output.push_str(&headers.join(","));
        output.push('\n');

        for row in &result.rows {
            let values: Vec<String> = row
                .values
                .iter()
                .map(|value| Self::escape_csv_field(&Self::value_to_string(value)))
                .collect();
            output.push_str(&values.join(","));
            output.push('\n');
        }

        output
    }

    fn value_to_string(value: &Value) -> String {
        match value {
            Value::Float(f) => format!("{:.2}", f),
            other => other.to_string(),
        }
    }

    fn format_value_colored(value: &Value) -> ColoredString {
        match value {
            Value::Text(s) => s.normal(),
            Value::Integer(_) | Value::Unsigned(_) | Value::Decimal(_) => value.to_string().blue(),
            Value::Float(f) => format!("{:.2}", f).blue(),
            Value::Boolean(true) => "true".green(),
            Value::Boolean(false) => "false".red(),
            Value::Date(d) | Value::DateTime(d) => d.yellow(),
            Value::Json(j) => j.magenta(),
            Value::Binary(_) => value.to_string().cyan(),
            Value::Null => "NULL".dimmed(),
        }
    }

    /// Convert a Value to JSON
    fn value_to_json(value: &Value) -> JsonValue {
        match value {
            Value::Text(s) | Value::Date(s) | Value::DateTime(s) => JsonValue::String(s.clone()),
            Value::Integer(i) => JsonValue::Number((*i).into()),
            Value::Unsigned(u) => JsonValue::Number((*u).into()),
            // decimals keep their exact text
            Value::Decimal(d) => JsonValue::String(d.clone()),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null),
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::Json(j) => serde_json::from_str(j).unwrap_or_else(|_| JsonValue::String(j.clone())),
            Value::Binary(b) => JsonValue::String(BASE64_STANDARD.encode(b)),
            Value::Null => JsonValue::Null,
        }
    }

    /// Escape CSV field if it contains special characters
    fn escape_csv_field(field: &str) -> String {
        if field.contains(',') || field.contains('"') || field.contains('\n') {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    /// Format error message for CLI display
    pub fn format_error(error: &GateError) -> String {
        format!("{} {}", "Error:".red().bold(), error.to_string().red())
    }

    /// Format success message for CLI display
    pub fn format_success(message: &str) -> String {
        format!("{} {}", "Success:".green().bold(), message)
    }

    pub fn format_info(message: &str) -> String {
        format!("{} {}", "Info:".blue().bold(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::types::{ColumnMetadata, DataType, Row};

    fn sample() -> QueryResult {
        let mut result = QueryResult::with_columns(vec![
            ColumnMetadata::new("id", DataType::Unsigned),
            ColumnMetadata::new("note", DataType::Text),
            ColumnMetadata::new("price", DataType::Decimal),
            ColumnMetadata::new("raw", DataType::Binary),
        ]);
        result.rows.push(Row::new(vec![
            Value::Unsigned(7),
            Value::Text("a, \"quoted\" note".to_string()),
            Value::Decimal("10.50".to_string()),
            Value::Binary(vec![1, 2, 3]),
        ]));
        result
    }

    #[test]
    fn test_json_output() {
        let output = OutputFormatter::format_result(&sample(), &OutputFormat::Json);
        let parsed: JsonValue = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["data"][0]["id"], json!(7));
        assert_eq!(parsed["data"][0]["price"], json!("10.50"));
        assert_eq!(parsed["data"][0]["raw"], json!("AQID"));
        assert_eq!(parsed["metadata"]["columns"][2]["type"], json!("decimal"));
        assert_eq!(parsed["metadata"]["row_count"], json!(1));
    }

    #[test]
    fn test_csv_escaping() {
        let output = OutputFormatter::format_result(&sample(), &OutputFormat::Csv);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "id,note,price,raw");
        assert_eq!(lines[1], "7,\"a, \"\"quoted\"\" note\",10.50,<binary: 3 bytes>");
    }

    #[test]
    fn test_empty_table() {
        let output = OutputFormatter::format_result(&QueryResult::new(), &OutputFormat::Table);
        assert!(output.contains("No results found."));
    }
}

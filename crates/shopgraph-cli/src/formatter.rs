//! Output formatters for projection results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use shopgraph_core::graph::{Cardinality, FetchStrategy, Schema};
use shopgraph_core::MetricsSnapshot;
use shopgraph_proto::{AssembledDto, EntityDto, FlatDto, RelationValue, Value};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format assembled DTOs.
    fn format_dtos(&self, dtos: &[AssembledDto]) -> String;

    /// Format fetch metrics.
    fn format_metrics(&self, metrics: &MetricsSnapshot) -> String;

    /// Format the entity graph.
    fn format_schema(&self, schema: &Schema) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_dtos(&self, dtos: &[AssembledDto]) -> String {
        let Some((header, rows)) = tabulate(dtos) else {
            return "No results".to_string();
        };

        let mut table = Table::new();
        table.set_header(header);
        for row in rows {
            table.add_row(row.into_iter().map(Cell::new).collect::<Vec<_>>());
        }
        format!("{}\n({} rows)", table, dtos.len())
    }

    fn format_metrics(&self, metrics: &MetricsSnapshot) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Metric", "Value"]);
        let counters = [
            ("requests", metrics.requests),
            ("single_step_plans", metrics.single_step_plans),
            ("join_fetch_plans", metrics.join_fetch_plans),
            ("batched_plans", metrics.batched_plans),
            ("direct_projection_plans", metrics.direct_projection_plans),
            ("plan_cache_hits", metrics.plan_cache_hits),
            ("plan_cache_misses", metrics.plan_cache_misses),
            ("round_trips", metrics.round_trips),
            ("rows_fetched", metrics.rows_fetched),
            ("dtos_assembled", metrics.dtos_assembled),
            ("avg_latency_us", metrics.avg_latency_us),
            ("plan_errors", metrics.plan_errors),
            ("execution_errors", metrics.execution_errors),
        ];
        for (name, value) in counters {
            table.add_row(vec![name.to_string(), value.to_string()]);
        }
        table.to_string()
    }

    fn format_schema(&self, schema: &Schema) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Entity", "Identity", "Fields", "Relations"]);

        for name in schema.entity_names() {
            let Some(idx) = schema.lookup(name) else {
                continue;
            };
            let node = schema.node(idx);
            let relations: Vec<String> = node
                .relations
                .iter()
                .map(|r| {
                    let d = &r.descriptor;
                    let arrow = match d.cardinality {
                        Cardinality::One => "->",
                        Cardinality::Many => "=>",
                    };
                    let mut line = format!("{} {} {}", d.name, arrow, d.target);
                    if d.strategy == FetchStrategy::EagerJoin {
                        line.push_str(" (eager)");
                    }
                    if d.back_reference {
                        line.push_str(" (back-ref)");
                    }
                    line
                })
                .collect();

            table.add_row(vec![
                node.entity.name.clone(),
                node.entity.identity_field.clone(),
                node.entity.fields.join(", "),
                relations.join("\n"),
            ]);
        }

        table.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_dtos(&self, dtos: &[AssembledDto]) -> String {
        serde_json::to_string_pretty(dtos).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_metrics(&self, metrics: &MetricsSnapshot) -> String {
        serde_json::to_string_pretty(metrics).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_schema(&self, schema: &Schema) -> String {
        let entities: Vec<serde_json::Value> = schema
            .entity_names()
            .into_iter()
            .filter_map(|name| schema.lookup(name))
            .map(|idx| {
                let node = schema.node(idx);
                let relations: Vec<serde_json::Value> = node
                    .relations
                    .iter()
                    .map(|r| {
                        let d = &r.descriptor;
                        serde_json::json!({
                            "name": d.name,
                            "target": d.target,
                            "cardinality": d.cardinality,
                            "strategy": d.strategy,
                            "fan_out": d.fan_out,
                            "back_reference": d.back_reference,
                        })
                    })
                    .collect();
                serde_json::json!({
                    "name": node.entity.name,
                    "identity": node.entity.identity_field,
                    "fields": node.entity.fields,
                    "relations": relations,
                })
            })
            .collect();

        serde_json::to_string_pretty(&serde_json::json!({
            "version": schema.version(),
            "entities": entities,
        }))
        .unwrap_or_else(|_| "{}".to_string())
    }
}

/// CSV formatter.
pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn format_dtos(&self, dtos: &[AssembledDto]) -> String {
        let Some((header, rows)) = tabulate(dtos) else {
            return String::new();
        };

        let mut lines = vec![header
            .iter()
            .map(|h| escape_csv(h))
            .collect::<Vec<_>>()
            .join(",")];
        for row in rows {
            lines.push(row.iter().map(|c| escape_csv(c)).collect::<Vec<_>>().join(","));
        }
        lines.join("\n")
    }

    fn format_metrics(&self, metrics: &MetricsSnapshot) -> String {
        format!(
            "requests,round_trips,rows_fetched,dtos_assembled,avg_latency_us,plan_errors,execution_errors\n{},{},{},{},{},{},{}",
            metrics.requests,
            metrics.round_trips,
            metrics.rows_fetched,
            metrics.dtos_assembled,
            metrics.avg_latency_us,
            metrics.plan_errors,
            metrics.execution_errors
        )
    }

    fn format_schema(&self, schema: &Schema) -> String {
        let mut lines = vec!["entity,relation,target,cardinality".to_string()];
        for name in schema.entity_names() {
            let Some(idx) = schema.lookup(name) else {
                continue;
            };
            for r in &schema.node(idx).relations {
                let cardinality = match r.descriptor.cardinality {
                    Cardinality::One => "one",
                    Cardinality::Many => "many",
                };
                lines.push(format!(
                    "{},{},{},{}",
                    name, r.descriptor.name, r.descriptor.target, cardinality
                ));
            }
        }
        lines.join("\n")
    }
}

/// Split DTOs into a header and string cells.
///
/// Graph DTOs get one row per root; relation slots render as compact JSON.
fn tabulate(dtos: &[AssembledDto]) -> Option<(Vec<String>, Vec<Vec<String>>)> {
    match dtos.first()? {
        AssembledDto::Flat(first) => {
            let header = first.columns.iter().map(|(label, _)| label.clone()).collect();
            let rows = dtos
                .iter()
                .filter_map(AssembledDto::as_flat)
                .map(flat_cells)
                .collect();
            Some((header, rows))
        }
        AssembledDto::Entity(first) => {
            let mut header = vec!["id".to_string()];
            header.extend(first.fields.iter().map(|(name, _)| name.clone()));
            header.extend(first.relations.iter().map(|r| r.name.clone()));
            let rows = dtos
                .iter()
                .filter_map(AssembledDto::as_entity)
                .map(entity_cells)
                .collect();
            Some((header, rows))
        }
    }
}

fn flat_cells(row: &FlatDto) -> Vec<String> {
    row.columns.iter().map(|(_, value)| format_value(value)).collect()
}

fn entity_cells(dto: &EntityDto) -> Vec<String> {
    let mut cells = vec![format_value(&dto.id)];
    cells.extend(dto.fields.iter().map(|(_, value)| format_value(value)));
    cells.extend(dto.relations.iter().map(|r| format_relation(&r.value)));
    cells
}

fn format_relation(value: &RelationValue) -> String {
    match value {
        RelationValue::One(None) => "NULL".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Format a Value for display.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int32(i) => i.to_string(),
        Value::Int64(i) => i.to_string(),
        Value::Float64(f) => f.to_string(),
        Value::String(s) => s.clone(),
        Value::Timestamp(ts) => ts.to_string(),
        Value::Uuid(bytes) => format_uuid(bytes),
    }
}

/// Format UUID bytes as a string.
fn format_uuid(bytes: &[u8; 16]) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
    )
}

/// Quote a CSV cell when it contains separators or quotes.
fn escape_csv(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

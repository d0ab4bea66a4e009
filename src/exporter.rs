//! Text Exporter
//!
//! Renders a [`Registry`] in the Prometheus text exposition format:
//!
//! ```text
//! # HELP dirstat_files_in_dir this counts all the files in a directory
//! # TYPE dirstat_files_in_dir gauge
//! dirstat_files_in_dir{dir="logs",recursive="true"} 3
//! ```
//!
//! `current_timestamp` always comes first; the other metrics follow in
//! registration order. Sample lines within a metric are not ordered.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::registry::{MetricDefinition, MetricKind, Registry, NAMESPACE};

/// Content type of the rendered body
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render every metric of `registry`
pub fn render(registry: &Registry) -> String {
    let mut output = String::new();

    render_metric(registry.get(MetricKind::CurrentTimestamp), &mut output);
    for def in registry
        .definitions()
        .filter(|d| d.kind != MetricKind::CurrentTimestamp)
    {
        render_metric(def, &mut output);
    }

    output
}

/// Append the HELP/TYPE header and all sample lines of one metric
pub fn render_metric(def: &MetricDefinition, output: &mut String) {
    let name = def.full_name();
    let _ = writeln!(output, "# HELP {} {}", name, escape_help(def.help()));
    let _ = writeln!(output, "# TYPE {} {}", name, def.metric_type());

    for value in def.values().values() {
        output.push_str(&format_sample(NAMESPACE, def.name(), &value.labels, value.value));
    }
}

/// One sample line, e.g. `ns_name{k="v"} 42\n`.
///
/// An empty label set renders without braces.
pub fn format_sample(
    namespace: &str,
    name: &str,
    labels: &BTreeMap<String, String>,
    value: i64,
) -> String {
    let mut line = format!("{}_{}", namespace, name);

    if !labels.is_empty() {
        let pairs: Vec<String> = labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
            .collect();
        line.push('{');
        line.push_str(&pairs.join(","));
        line.push('}');
    }

    let _ = writeln!(line, " {}", value);
    line
}

/// Escape `\`, `"` and newlines in a label value
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Escape `\` and newlines in help text
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

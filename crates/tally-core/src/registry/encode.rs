//! Scrape rendering: Prometheus text 0.0.4 or OpenMetrics 1.0.

use std::fmt::Write as _;

use prometheus::proto::{MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};

use super::RegistryError;

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
pub const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Prometheus,
    OpenMetrics,
}

impl Format {
    /// OpenMetrics only when enabled and asked for in `Accept`. A media range
    /// with `q=0` is a refusal and does not count.
    pub fn negotiate(accept: Option<&str>, openmetrics_enabled: bool) -> Self {
        let wants_openmetrics = accept.is_some_and(|accept| {
            accept.split(',').any(|range| {
                let mut parts = range.split(';').map(str::trim);
                let media_type = parts.next().unwrap_or_default();
                media_type.eq_ignore_ascii_case("application/openmetrics-text") && quality(parts) > 0.0
            })
        });
        if openmetrics_enabled && wants_openmetrics {
            Format::OpenMetrics
        } else {
            Format::Prometheus
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Prometheus => PROMETHEUS_CONTENT_TYPE,
            Format::OpenMetrics => OPENMETRICS_CONTENT_TYPE,
        }
    }
}

/// The `q` parameter of a media range, 1 when absent or malformed.
fn quality<'a>(params: impl Iterator<Item = &'a str>) -> f64 {
    params
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("q"))
        .and_then(|(_, value)| value.trim().parse::<f64>().ok())
        .unwrap_or(1.0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub content_type: &'static str,
    pub body: String,
}

pub fn encode(families: &[MetricFamily], format: Format) -> Result<Rendered, RegistryError> {
    let body = match format {
        Format::Prometheus => {
            let mut buf = Vec::new();
            TextEncoder::new().encode(families, &mut buf)?;
            String::from_utf8(buf).map_err(|err| RegistryError::Encode(err.to_string()))?
        }
        Format::OpenMetrics => {
            encode_openmetrics(families).map_err(|err| RegistryError::Encode(err.to_string()))?
        }
    };
    Ok(Rendered {
        content_type: format.content_type(),
        body,
    })
}

fn encode_openmetrics(families: &[MetricFamily]) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    for family in families {
        let (kind, suffix) = match family.get_field_type() {
            MetricType::COUNTER => ("counter", "_total"),
            MetricType::GAUGE => ("gauge", ""),
            // only gauges and counters are registered
            _ => continue,
        };
        let name = family.get_name();
        let base = name.strip_suffix(suffix).filter(|_| !suffix.is_empty()).unwrap_or(name);

        writeln!(out, "# HELP {base} {}", escape(family.get_help()))?;
        writeln!(out, "# TYPE {base} {kind}")?;
        for metric in family.get_metric() {
            let value = match family.get_field_type() {
                MetricType::COUNTER => metric.get_counter().get_value(),
                _ => metric.get_gauge().get_value(),
            };
            write!(out, "{base}{suffix}")?;
            let labels = metric.get_label();
            if !labels.is_empty() {
                let rendered = labels
                    .iter()
                    .map(|pair| format!("{}=\"{}\"", pair.get_name(), escape(pair.get_value())))
                    .collect::<Vec<_>>()
                    .join(",");
                write!(out, "{{{rendered}}}")?;
            }
            writeln!(out, " {}", format_value(value))?;
        }
    }
    out.push_str("# EOF\n");
    Ok(out)
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '"' => escaped.push_str("\\\""),
            c => escaped.push(c),
        }
    }
    escaped
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let inf = if value > 0.0 { "+Inf" } else { "-Inf" };
        inf.to_string()
    } else {
        value.to_string()
    }
}

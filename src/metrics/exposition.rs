//! Prometheus text exposition encoding.
//!
//! The encoder turns a drained stream of [`MetricPoint`]s into the text
//! format served on `/metrics` and POSTed in push mode. The parser is the
//! inverse and exists so tests can assert round-trip fidelity of names,
//! label sets and values.

use std::collections::HashMap;

use thiserror::Error;

use super::MetricPoint;

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Label carrying the host identity on every sample.
pub const IDENTITY_LABEL: &str = "machine_id";

/// Label carrying the originating service id on every sample.
pub const SERVICE_LABEL: &str = "service_id";

/// Encode metric points into exposition text.
///
/// Samples are grouped into families by metric name in first-seen order, so
/// two services emitting the same family share one `# TYPE` block. Every
/// sample carries `base_labels` (identity and optional project labels)
/// followed by the service id and the point's domain labels.
pub fn encode(points: &[MetricPoint], base_labels: &[(String, String)]) -> String {
    // name -> position in `families`, preserving first-seen order
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut families: Vec<(&MetricPoint, Vec<&MetricPoint>)> = Vec::new();

    for point in points {
        match index.get(point.desc.metric_name.as_str()) {
            Some(&i) => families[i].1.push(point),
            None => {
                index.insert(&point.desc.metric_name, families.len());
                families.push((point, vec![point]));
            }
        }
    }

    let mut out = String::with_capacity(points.len() * 64);
    for (first, samples) in families {
        let name = &first.desc.metric_name;
        out.push_str("# HELP ");
        out.push_str(name);
        out.push(' ');
        out.push_str(&first.desc.help);
        out.push('\n');
        out.push_str("# TYPE ");
        out.push_str(name);
        out.push(' ');
        out.push_str(first.desc.kind.as_str());
        out.push('\n');

        for point in samples {
            out.push_str(name);
            out.push('{');
            let mut sep = false;
            for (k, v) in base_labels {
                write_label(&mut out, &mut sep, k, v);
            }
            write_label(&mut out, &mut sep, SERVICE_LABEL, &point.service_id);
            for (k, v) in point.desc.label_names.iter().zip(&point.label_values) {
                write_label(&mut out, &mut sep, k, v);
            }
            out.push_str("} ");
            out.push_str(&format_value(point.value));
            out.push('\n');
        }
    }
    out
}

fn write_label(out: &mut String, sep: &mut bool, name: &str, value: &str) {
    if *sep {
        out.push(',');
    }
    *sep = true;
    out.push_str(name);
    out.push_str("=\"");
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn format_value(v: f64) -> String {
    // The default f64 Display renders integers without a fractional part and
    // keeps full precision otherwise, which the parser accepts verbatim.
    format!("{v}")
}

/// One parsed metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct Family {
    pub name: String,
    pub kind: Option<String>,
    pub samples: Vec<Sample>,
}

/// One parsed sample line.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Exposition parse failure.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed sample line: {0}")]
    Sample(String),
    #[error("malformed label pair in: {0}")]
    Label(String),
    #[error("invalid value in: {0}")]
    Value(String),
}

/// Parse exposition text back into families.
///
/// Supports the subset of the format the encoder produces; used by tests to
/// verify round-trip fidelity and by push-mode tests to inspect payloads.
pub fn parse(text: &str) -> Result<Vec<Family>, ParseError> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut families: Vec<Family> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("# TYPE ") {
            let mut parts = rest.split_whitespace();
            if let (Some(name), Some(kind)) = (parts.next(), parts.next()) {
                let i = family_slot(&mut index, &mut families, name);
                families[i].kind = Some(kind.to_string());
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let (name, labels, value) = parse_sample(line)?;
        let i = family_slot(&mut index, &mut families, &name);
        families[i].samples.push(Sample { labels, value });
    }
    Ok(families)
}

fn family_slot(
    index: &mut HashMap<String, usize>,
    families: &mut Vec<Family>,
    name: &str,
) -> usize {
    if let Some(&i) = index.get(name) {
        return i;
    }
    index.insert(name.to_string(), families.len());
    families.push(Family {
        name: name.to_string(),
        kind: None,
        samples: Vec::new(),
    });
    families.len() - 1
}

fn parse_sample(line: &str) -> Result<(String, Vec<(String, String)>, f64), ParseError> {
    let (name, rest) = match line.find('{') {
        Some(brace) => {
            let close = line
                .rfind('}')
                .filter(|&close| close > brace)
                .ok_or_else(|| ParseError::Sample(line.to_string()))?;
            (&line[..brace], Some((&line[brace + 1..close], &line[close + 1..])))
        }
        None => (
            line.split_whitespace()
                .next()
                .ok_or_else(|| ParseError::Sample(line.to_string()))?,
            None,
        ),
    };

    let (labels, value_str) = match rest {
        Some((label_str, tail)) => (parse_labels(label_str)?, tail.trim()),
        None => (
            Vec::new(),
            line.split_whitespace()
                .nth(1)
                .ok_or_else(|| ParseError::Sample(line.to_string()))?,
        ),
    };

    let value: f64 = value_str
        .parse()
        .map_err(|_| ParseError::Value(line.to_string()))?;
    Ok((name.to_string(), labels, value))
}

fn parse_labels(s: &str) -> Result<Vec<(String, String)>, ParseError> {
    let mut labels = Vec::new();
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        let mut name = String::new();
        for c in chars.by_ref() {
            if c == '=' {
                break;
            }
            name.push(c);
        }
        let name = name.trim().to_string();
        if chars.next() != Some('"') {
            return Err(ParseError::Label(s.to_string()));
        }
        let mut value = String::new();
        let mut escaped = false;
        loop {
            let c = chars.next().ok_or_else(|| ParseError::Label(s.to_string()))?;
            if escaped {
                match c {
                    'n' => value.push('\n'),
                    c => value.push(c),
                }
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                break;
            } else {
                value.push(c);
            }
        }
        labels.push((name, value));
        if chars.peek() == Some(&',') {
            chars.next();
        }
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{DescHandle, MetricKind, MetricPoint};
    use std::sync::Arc;

    fn point(
        name: &str,
        kind: MetricKind,
        labels: &[(&str, &str)],
        value: f64,
        service: &str,
    ) -> MetricPoint {
        let names: Vec<&str> = labels.iter().map(|(k, _)| *k).collect();
        MetricPoint {
            desc: DescHandle::new(name, format!("{name}."), kind, &names),
            label_values: labels.iter().map(|(_, v)| v.to_string()).collect(),
            value,
            service_id: Arc::from(service),
        }
    }

    fn base() -> Vec<(String, String)> {
        vec![("machine_id".to_string(), "abc123".to_string())]
    }

    #[test]
    fn test_encode_groups_families() {
        let points = vec![
            point("postgres_up", MetricKind::Gauge, &[], 1.0, "postgres_5432"),
            point("node_uptime_seconds", MetricKind::Counter, &[], 42.5, "system"),
            point("postgres_up", MetricKind::Gauge, &[], 1.0, "postgres_5433"),
        ];
        let text = encode(&points, &base());

        // one TYPE block per family even when samples interleave
        assert_eq!(text.matches("# TYPE postgres_up gauge").count(), 1);
        assert_eq!(text.matches("# TYPE node_uptime_seconds counter").count(), 1);
        assert_eq!(
            text.matches("postgres_up{machine_id=\"abc123\",service_id=").count(),
            2
        );
    }

    #[test]
    fn test_roundtrip_preserves_names_labels_values() {
        let points = vec![
            point(
                "postgres_database_size_bytes",
                MetricKind::Gauge,
                &[("database", "appdb")],
                268435456.0,
                "postgres_5432",
            ),
            point(
                "postgres_bgwriter_checkpoints_timed_total",
                MetricKind::Counter,
                &[],
                1234.0,
                "postgres_5432",
            ),
            point(
                "node_filesystem_size_bytes",
                MetricKind::Gauge,
                &[("device", "/dev/sda1"), ("mountpoint", "/"), ("fstype", "ext4")],
                1.5e9,
                "system",
            ),
        ];
        let text = encode(&points, &base());
        let families = parse(&text).unwrap();

        assert_eq!(families.len(), 3);
        let sizes = &families[0];
        assert_eq!(sizes.name, "postgres_database_size_bytes");
        assert_eq!(sizes.kind.as_deref(), Some("gauge"));
        assert_eq!(sizes.samples.len(), 1);
        assert_eq!(sizes.samples[0].value, 268435456.0);
        assert!(sizes.samples[0]
            .labels
            .contains(&("database".to_string(), "appdb".to_string())));
        assert!(sizes.samples[0]
            .labels
            .contains(&("machine_id".to_string(), "abc123".to_string())));

        let counter = &families[1];
        assert_eq!(counter.kind.as_deref(), Some("counter"));
        assert_eq!(counter.samples[0].value, 1234.0);

        let fs = &families[2];
        assert_eq!(fs.samples[0].value, 1.5e9);
        assert!(fs.samples[0]
            .labels
            .contains(&("mountpoint".to_string(), "/".to_string())));
    }

    #[test]
    fn test_label_escaping_roundtrip() {
        let points = vec![point(
            "postgres_settings",
            MetricKind::Gauge,
            &[("name", "weird\"value\\with\nnewline")],
            0.0,
            "postgres_5432",
        )];
        let text = encode(&points, &[]);
        let families = parse(&text).unwrap();
        assert_eq!(
            families[0].samples[0].labels.last().unwrap().1,
            "weird\"value\\with\nnewline"
        );
    }

    #[test]
    fn test_parse_unlabeled_sample() {
        let families = parse("node_uptime_seconds 17.25\n").unwrap();
        assert_eq!(families[0].name, "node_uptime_seconds");
        assert_eq!(families[0].samples[0].value, 17.25);
        assert!(families[0].samples[0].labels.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage_value() {
        assert!(parse("node_uptime_seconds forty-two\n").is_err());
    }
}

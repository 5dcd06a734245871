//! The pluggable per-record transform and the built-in transforms.
//!
//! A transform sees one record at a time and decides whether to keep it and
//! where to route it. Each worker unit owns a private transform instance, so
//! implementations may carry mutable state without any synchronization.

use crate::record::{Record, Routed};
use crate::stats::Stats;
use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;

/// Per-record processing logic, one instance per worker unit.
///
/// `process` may keep mutable state across calls; the engine never shares an
/// instance between units. Returning `Ok(None)` drops the record silently,
/// returning `Err` skips it and counts a transform error. The routed
/// destination must be less than `destinations`.
pub trait Transform: Send {
    fn process(&mut self, record: Record, destinations: usize) -> Result<Option<Routed>>;

    /// Counters accumulated by this instance so far.
    fn stats(&self) -> &Stats;
}

/// Builds one fresh [`Transform`] instance per worker unit.
pub type TransformFactory = Arc<dyn Fn() -> Box<dyn Transform> + Send + Sync>;

/// Look up a built-in transform by name.
pub fn factory_for(name: &str) -> Option<TransformFactory> {
    match name {
        "passthrough" => Some(Arc::new(|| Box::new(Passthrough::new()))),
        "score_filter" => Some(Arc::new(|| Box::new(ScoreFilter::new()))),
        "text_length_filter" => Some(Arc::new(|| Box::new(TextLengthFilter::new()))),
        "field_extractor" => Some(Arc::new(|| Box::new(FieldExtractor::new()))),
        "data_enricher" => Some(Arc::new(|| Box::new(DataEnricher::new()))),
        _ => None,
    }
}

pub fn builtin_names() -> &'static [&'static str] {
    &[
        "passthrough",
        "score_filter",
        "text_length_filter",
        "field_extractor",
        "data_enricher",
    ]
}

/// Forwards every record unchanged to the first destination.
pub struct Passthrough {
    stats: Stats,
}

impl Passthrough {
    pub fn new() -> Self {
        let mut stats = Stats::new();
        stats.zero("total_processed");
        Self { stats }
    }
}

impl Default for Passthrough {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Passthrough {
    fn process(&mut self, record: Record, _destinations: usize) -> Result<Option<Routed>> {
        self.stats.incr("total_processed", 1.0);
        Ok(Some(Routed {
            record,
            destination: 0,
        }))
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// Grades records by their `score` field and routes passes and failures
/// separately.
///
/// Scores of 60 and above pass, are annotated with a letter grade, and go to
/// the first destination. Failures go to the second destination when one is
/// configured, otherwise they are dropped.
pub struct ScoreFilter {
    stats: Stats,
}

impl ScoreFilter {
    pub fn new() -> Self {
        let mut stats = Stats::new();
        stats.zero("total_processed");
        stats.zero("passed");
        stats.zero("failed");
        Self { stats }
    }
}

impl Default for ScoreFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn grade_for(score: f64) -> &'static str {
    if score >= 90.0 {
        "A"
    } else if score >= 80.0 {
        "B"
    } else if score >= 70.0 {
        "C"
    } else {
        "D"
    }
}

impl Transform for ScoreFilter {
    fn process(&mut self, mut record: Record, destinations: usize) -> Result<Option<Routed>> {
        self.stats.incr("total_processed", 1.0);
        let score = record.get("score").and_then(Value::as_f64).unwrap_or(0.0);
        if score >= 60.0 {
            self.stats.incr("passed", 1.0);
            record.insert("status".into(), json!("passed"));
            record.insert("grade".into(), json!(grade_for(score)));
            return Ok(Some(Routed {
                record,
                destination: 0,
            }));
        }
        self.stats.incr("failed", 1.0);
        if destinations > 1 {
            record.insert("status".into(), json!("failed"));
            record.insert("grade".into(), json!("F"));
            return Ok(Some(Routed {
                record,
                destination: 1,
            }));
        }
        Ok(None)
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// Keeps records whose text length falls within bounds, annotates them, and
/// routes short, medium, and long texts to separate destinations.
pub struct TextLengthFilter {
    min_length: usize,
    max_length: usize,
    stats: Stats,
}

impl TextLengthFilter {
    pub fn new() -> Self {
        let mut stats = Stats::new();
        stats.zero("total_processed");
        stats.zero("short");
        stats.zero("medium");
        stats.zero("long");
        Self {
            min_length: 10,
            max_length: 1000,
            stats,
        }
    }
}

impl Default for TextLengthFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for TextLengthFilter {
    fn process(&mut self, mut record: Record, destinations: usize) -> Result<Option<Routed>> {
        self.stats.incr("total_processed", 1.0);
        let length = record
            .get("text")
            .or_else(|| record.get("content"))
            .and_then(Value::as_str)
            .map(str::len)
            .unwrap_or(0);
        if length < self.min_length || length > self.max_length {
            return Ok(None);
        }
        let (category, destination) = if length < 100 {
            ("short", 0)
        } else if length < 500 {
            ("medium", 1.min(destinations - 1))
        } else {
            ("long", 2.min(destinations - 1))
        };
        self.stats.incr(category, 1.0);
        record.insert("text_length".into(), json!(length));
        record.insert("length_category".into(), json!(category));
        Ok(Some(Routed {
            record,
            destination,
        }))
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// Projects a fixed set of fields out of each record, following dotted paths
/// into nested objects.
///
/// Records with none of the wanted fields are dropped.
pub struct FieldExtractor {
    fields: Vec<String>,
    stats: Stats,
}

impl FieldExtractor {
    pub fn new() -> Self {
        let mut stats = Stats::new();
        stats.zero("total_processed");
        stats.zero("extracted");
        stats.zero("skipped");
        Self {
            fields: ["id", "name", "value", "timestamp"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            stats,
        }
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn nested_value<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

impl Transform for FieldExtractor {
    fn process(&mut self, record: Record, _destinations: usize) -> Result<Option<Routed>> {
        self.stats.incr("total_processed", 1.0);
        let mut projected = Record::new();
        for field in &self.fields {
            let value = if field.contains('.') {
                nested_value(&record, field)
            } else {
                record.get(field)
            };
            if let Some(value) = value {
                projected.insert(field.replace('.', "_"), value.clone());
            }
        }
        if projected.is_empty() {
            self.stats.incr("skipped", 1.0);
            return Ok(None);
        }
        self.stats.incr("extracted", 1.0);
        Ok(Some(Routed {
            record: projected,
            destination: 0,
        }))
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// Annotates every record with derived fields: a processing timestamp, a
/// short content hash, the field count, and numeric aggregates when the
/// record carries numeric values.
pub struct DataEnricher {
    stats: Stats,
}

impl DataEnricher {
    pub fn new() -> Self {
        let mut stats = Stats::new();
        stats.zero("total_processed");
        stats.zero("enriched");
        Self { stats }
    }
}

impl Default for DataEnricher {
    fn default() -> Self {
        Self::new()
    }
}

/// Short hex digest over the record's fields in sorted key order, so the
/// hash does not depend on field order.
fn content_hash(record: &Record) -> String {
    use sha2::{Digest, Sha256};

    let mut keys: Vec<&String> = record.keys().collect();
    keys.sort();
    let mut hasher = Sha256::new();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(record[key].to_string().as_bytes());
        hasher.update(b";");
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..8].to_string()
}

impl Transform for DataEnricher {
    fn process(&mut self, record: Record, _destinations: usize) -> Result<Option<Routed>> {
        self.stats.incr("total_processed", 1.0);

        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let hash = content_hash(&record);
        let field_count = record.len();
        let numeric: Vec<f64> = record.values().filter_map(Value::as_f64).collect();

        let mut enriched = record;
        enriched.insert("processed_at".into(), json!(millis));
        enriched.insert("content_hash".into(), json!(hash));
        enriched.insert("field_count".into(), json!(field_count));
        if !numeric.is_empty() {
            let sum: f64 = numeric.iter().sum();
            enriched.insert("numeric_sum".into(), json!(sum));
            enriched.insert("numeric_avg".into(), json!(sum / numeric.len() as f64));
        }

        self.stats.incr("enriched", 1.0);
        Ok(Some(Routed {
            record: enriched,
            destination: 0,
        }))
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(fields: &[(&str, Value)]) -> Record {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn unknown_transform_name_is_none() {
        assert!(factory_for("no_such_transform").is_none());
        for name in builtin_names() {
            assert!(factory_for(name).is_some());
        }
    }

    #[test]
    fn score_filter_grade_boundaries() {
        let mut t = ScoreFilter::new();
        for (score, grade) in [(90.0, "A"), (85.0, "B"), (70.0, "C"), (60.0, "D")] {
            let routed = t
                .process(rec(&[("score", json!(score))]), 1)
                .unwrap()
                .unwrap();
            assert_eq!(routed.record.get("grade"), Some(&json!(grade)));
            assert_eq!(routed.record.get("status"), Some(&json!("passed")));
            assert_eq!(routed.destination, 0);
        }
        assert_eq!(t.stats().get("passed"), 4.0);
        assert_eq!(t.stats().get("total_processed"), 4.0);
    }

    #[test]
    fn score_filter_drops_or_routes_failures() {
        let mut t = ScoreFilter::new();
        // Single destination: failure is dropped.
        assert!(t
            .process(rec(&[("score", json!(42))]), 1)
            .unwrap()
            .is_none());
        // Two destinations: failure routes to the second.
        let routed = t.process(rec(&[("score", json!(42))]), 2).unwrap().unwrap();
        assert_eq!(routed.destination, 1);
        assert_eq!(routed.record.get("grade"), Some(&json!("F")));
        assert_eq!(t.stats().get("failed"), 2.0);
    }

    #[test]
    fn score_filter_treats_missing_score_as_failure() {
        let mut t = ScoreFilter::new();
        assert!(t.process(rec(&[("id", json!(1))]), 1).unwrap().is_none());
        assert_eq!(t.stats().get("failed"), 1.0);
    }

    #[test]
    fn text_length_filter_buckets_and_bounds() {
        let mut t = TextLengthFilter::new();
        // Too short: dropped without counting.
        assert!(t
            .process(rec(&[("text", json!("tiny"))]), 3)
            .unwrap()
            .is_none());

        let short = t
            .process(rec(&[("text", json!("a".repeat(50)))]), 3)
            .unwrap()
            .unwrap();
        assert_eq!(short.destination, 0);
        assert_eq!(short.record.get("length_category"), Some(&json!("short")));
        assert_eq!(short.record.get("text_length"), Some(&json!(50)));

        let medium = t
            .process(rec(&[("content", json!("b".repeat(200)))]), 3)
            .unwrap()
            .unwrap();
        assert_eq!(medium.destination, 1);

        let long = t
            .process(rec(&[("text", json!("c".repeat(800)))]), 3)
            .unwrap()
            .unwrap();
        assert_eq!(long.destination, 2);

        // With one destination everything collapses onto it.
        let clamped = t
            .process(rec(&[("text", json!("d".repeat(800)))]), 1)
            .unwrap()
            .unwrap();
        assert_eq!(clamped.destination, 0);

        // Dropped records still count as processed.
        assert_eq!(t.stats().get("total_processed"), 5.0);
        assert_eq!(t.stats().get("long"), 2.0);
    }

    #[test]
    fn field_extractor_projects_and_skips() {
        let mut t = FieldExtractor::new();
        let routed = t
            .process(
                rec(&[
                    ("id", json!(7)),
                    ("name", json!("ada")),
                    ("extra", json!("ignored")),
                ]),
                1,
            )
            .unwrap()
            .unwrap();
        assert_eq!(routed.record.get("id"), Some(&json!(7)));
        assert_eq!(routed.record.get("name"), Some(&json!("ada")));
        assert!(routed.record.get("extra").is_none());

        assert!(t
            .process(rec(&[("other", json!(1))]), 1)
            .unwrap()
            .is_none());
        assert_eq!(t.stats().get("total_processed"), 2.0);
        assert_eq!(t.stats().get("extracted"), 1.0);
        assert_eq!(t.stats().get("skipped"), 1.0);
    }

    #[test]
    fn enricher_adds_derived_fields() {
        let mut t = DataEnricher::new();
        let routed = t
            .process(
                rec(&[("name", json!("ada")), ("score", json!(80)), ("bonus", json!(10.5))]),
                1,
            )
            .unwrap()
            .unwrap();
        let out = &routed.record;
        assert_eq!(out.get("field_count"), Some(&json!(3)));
        assert_eq!(out.get("numeric_sum"), Some(&json!(90.5)));
        assert_eq!(out.get("numeric_avg"), Some(&json!(45.25)));
        assert!(out.get("processed_at").is_some());
        assert_eq!(out["content_hash"].as_str().map(str::len), Some(8));
        assert_eq!(t.stats().get("total_processed"), 1.0);
        assert_eq!(t.stats().get("enriched"), 1.0);
    }

    #[test]
    fn enricher_hash_ignores_field_order_and_skips_numeric_aggregates() {
        let a = content_hash(&rec(&[("x", json!(1)), ("y", json!("z"))]));
        let b = content_hash(&rec(&[("y", json!("z")), ("x", json!(1))]));
        let c = content_hash(&rec(&[("x", json!(2)), ("y", json!("z"))]));
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut t = DataEnricher::new();
        let routed = t
            .process(rec(&[("name", json!("ada"))]), 1)
            .unwrap()
            .unwrap();
        assert!(routed.record.get("numeric_sum").is_none());
        assert!(routed.record.get("numeric_avg").is_none());
    }

    #[test]
    fn nested_paths_traverse_objects() {
        let record = rec(&[("user", json!({"profile": {"name": "ada"}}))]);
        assert_eq!(nested_value(&record, "user.profile.name"), Some(&json!("ada")));
        assert!(nested_value(&record, "user.missing.name").is_none());
    }
}

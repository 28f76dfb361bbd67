//! Random replacement values for `update` mode.
//!
//! Every updateable column of a queried table is overwritten with a random
//! value that fits the field's describe type. Reference columns draw from the
//! ids of the referenced object through the [`IdCache`].

use chrono::{Duration as ChronoDuration, Months, NaiveDate, NaiveDateTime};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::id_cache::{IdCache, IdSource};
use crate::salesforce::bulk_query_v2::QueryTable;
use crate::salesforce::describe::{FieldMeta, ObjectMeta};

/// Literal written by `MODIFY_WITH_NULL`.
pub const NULL_VALUE: &str = "null";

const LOREM: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "ut", "labore", "et", "dolore", "magna", "aliqua", "enim",
    "ad", "minim", "veniam", "quis", "nostrud", "exercitation", "ullamco", "laboris", "nisi",
    "aliquip", "ex", "ea", "commodo", "consequat", "duis", "aute", "irure", "in", "voluptate",
    "velit", "esse", "cillum", "fugiat", "nulla", "pariatur",
];

/// Longest generated textarea value.
const MAX_TEXTAREA_LENGTH: usize = 255;

/// Cap on generated digits so values fit in an `i64`/`f64` exactly.
const MAX_DIGITS: u32 = 9;

// ─────────────────────────────────────────────────────────────────────────────
// ValueKind
// ─────────────────────────────────────────────────────────────────────────────

/// The kinds of value the modifier can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Boolean,
    Text,
    Guid,
    Date,
    DateTime,
    Reference,
    Decimal,
    Percent,
    Integer,
    Email,
    Phone,
    Picklist,
    TextArea,
    Url,
}

impl ValueKind {
    /// Returns `None` for types that cannot be generated (id, location, time, ...).
    pub fn for_field(field: &FieldMeta) -> Option<Self> {
        let kind = match field.field_type.as_str() {
            "boolean" => ValueKind::Boolean,
            "string" | "encryptedstring" if field.unique => ValueKind::Guid,
            "string" | "encryptedstring" => ValueKind::Text,
            "date" => ValueKind::Date,
            "datetime" => ValueKind::DateTime,
            "reference" => ValueKind::Reference,
            "currency" | "double" => ValueKind::Decimal,
            "percent" => ValueKind::Percent,
            "int" => ValueKind::Integer,
            "email" => ValueKind::Email,
            "phone" => ValueKind::Phone,
            "picklist" | "multipicklist" if !field.picklist().is_empty() => ValueKind::Picklist,
            "textarea" => ValueKind::TextArea,
            "url" => ValueKind::Url,
            _ => return None,
        };
        Some(kind)
    }
}

/// Object a reference field should draw its ids from. Owners are always users.
pub fn reference_target(field: &FieldMeta) -> Option<&str> {
    if field.name.eq_ignore_ascii_case("OwnerId") {
        return Some("User");
    }
    field.reference_to.first().map(String::as_str)
}

// ─────────────────────────────────────────────────────────────────────────────
// Value generation
// ─────────────────────────────────────────────────────────────────────────────

/// Produces random values relative to a fixed point in time.
pub struct ValueGenerator {
    now: NaiveDateTime,
}

impl ValueGenerator {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now }
    }

    pub fn for_now() -> Self {
        Self::new(chrono::Utc::now().naive_utc())
    }

    /// Random value for one cell. `ids` is only read for references.
    pub fn value<R: Rng + ?Sized>(
        &self,
        kind: ValueKind,
        field: &FieldMeta,
        ids: &[String],
        rng: &mut R,
    ) -> Option<String> {
        let value = match kind {
            ValueKind::Boolean => rng.gen_bool(0.5).to_string(),
            ValueKind::Guid => Uuid::new_v4().to_string(),
            ValueKind::Text => words_within(rng, field.length as usize),
            ValueKind::Date => self.shifted_date(rng).format("%Y-%m-%d").to_string(),
            ValueKind::DateTime => {
                let date = self.shifted_date(rng);
                date.and_time(self.now.time())
                    .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                    .to_string()
            }
            ValueKind::Reference => ids.choose(rng)?.clone(),
            ValueKind::Decimal => {
                let scale = field.scale.min(MAX_DIGITS);
                let whole_digits = field.precision.saturating_sub(field.scale).clamp(1, MAX_DIGITS);
                let whole = rng.gen_range(0..10i64.pow(whole_digits));
                if scale == 0 {
                    whole.to_string()
                } else {
                    let fraction = rng.gen_range(0..10i64.pow(scale));
                    format!("{}.{:0width$}", whole, fraction, width = scale as usize)
                }
            }
            ValueKind::Percent => rng.gen_range(0..100).to_string(),
            ValueKind::Integer => {
                let digits = field.digits.clamp(1, MAX_DIGITS);
                rng.gen_range(0..10i64.pow(digits)).to_string()
            }
            ValueKind::Email => format!(
                "{}.{}@{}.example.com",
                word(rng),
                word(rng),
                word(rng)
            ),
            ValueKind::Phone => format!(
                "+{} {:03} {:03} {:04}",
                rng.gen_range(1..10),
                rng.gen_range(0..1000),
                rng.gen_range(0..1000),
                rng.gen_range(0..10000)
            ),
            ValueKind::Picklist => field.picklist().choose(rng)?.clone(),
            ValueKind::TextArea => {
                let limit = match field.length as usize {
                    0 => MAX_TEXTAREA_LENGTH,
                    n => n.min(MAX_TEXTAREA_LENGTH),
                };
                sentence_within(rng, limit)
            }
            ValueKind::Url => format!("https://www.{}.com/{}", word(rng), word(rng)),
        };
        Some(value)
    }

    /// Up to a year and a month after the reference day.
    fn shifted_date<R: Rng + ?Sized>(&self, rng: &mut R) -> NaiveDate {
        let today = self.now.date();
        today
            .checked_add_months(Months::new(rng.gen_range(0..12)))
            .and_then(|d| d.checked_add_signed(ChronoDuration::days(rng.gen_range(0..30))))
            .unwrap_or(today)
    }
}

fn word<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    LOREM.choose(rng).copied().unwrap_or("lorem")
}

/// Space-separated lorem words no longer than `max_len` (a single word when 0).
fn words_within<R: Rng + ?Sized>(rng: &mut R, max_len: usize) -> String {
    let first = word(rng);
    if max_len == 0 {
        return first.to_string();
    }

    let target = rng.gen_range(1..=max_len);
    let mut text = String::new();
    let mut next = first;
    while text.len() + next.len() + usize::from(!text.is_empty()) <= target {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(next);
        next = word(rng);
    }

    if text.is_empty() {
        text = first.chars().take(max_len).collect();
    }
    text
}

/// A capitalized sentence ending in a period, at most `limit` bytes.
fn sentence_within<R: Rng + ?Sized>(rng: &mut R, limit: usize) -> String {
    let mut sentence = words_within(rng, limit.saturating_sub(1).max(1));
    if let Some(first) = sentence.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    if sentence.len() < limit {
        sentence.push('.');
    }
    sentence
}

// ─────────────────────────────────────────────────────────────────────────────
// Table modification
// ─────────────────────────────────────────────────────────────────────────────

/// Which columns were rewritten and which were left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifySummary {
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Overwrites every updateable column of `table` with random values.
///
/// With `with_null` set, those columns get the literal `null` instead and no
/// ids are fetched. Columns without describe metadata, read-only columns and
/// types that cannot be generated are left unchanged.
///
/// # Errors
///
/// Fails only when ids for a reference column cannot be fetched.
pub async fn modify_table<S: IdSource>(
    table: &mut QueryTable,
    meta: &ObjectMeta,
    ids: &IdCache<S>,
    with_null: bool,
) -> Result<ModifySummary, AppError> {
    let generator = ValueGenerator::for_now();
    let mut summary = ModifySummary::default();
    let header = table.header().to_vec();

    for (index, column) in header.iter().enumerate() {
        let Some(field) = meta.field(column).filter(|f| f.updateable) else {
            debug!("[MODIFY] {} is not updateable, leaving it", column);
            summary.unchanged.push(column.clone());
            continue;
        };

        let Some(kind) = ValueKind::for_field(field) else {
            warn!(
                "[MODIFY] {} values ({}) cannot be generated, leaving {}",
                field.field_type, meta.name, column
            );
            summary.unchanged.push(column.clone());
            continue;
        };

        if with_null {
            fill_column(table, index, |_| Some(NULL_VALUE.to_string()));
            summary.modified.push(column.clone());
            continue;
        }

        let reference_ids = match (kind, reference_target(field)) {
            (ValueKind::Reference, Some(target)) => Some(ids.resolve(target).await?),
            (ValueKind::Reference, None) => {
                warn!("[MODIFY] {} has no reference target, leaving it", column);
                summary.unchanged.push(column.clone());
                continue;
            }
            _ => None,
        };
        let id_slice = reference_ids.as_deref().map(Vec::as_slice).unwrap_or(&[]);

        if kind == ValueKind::Reference && id_slice.is_empty() {
            warn!("[MODIFY] No ids available for {}, leaving it", column);
            summary.unchanged.push(column.clone());
            continue;
        }

        fill_random(table, index, &generator, kind, field, id_slice);
        summary.modified.push(column.clone());
    }

    info!(
        "[MODIFY] {}: {} columns modified, {} unchanged across {} rows",
        meta.name,
        summary.modified.len(),
        summary.unchanged.len(),
        table.len()
    );
    Ok(summary)
}

fn fill_random(
    table: &mut QueryTable,
    index: usize,
    generator: &ValueGenerator,
    kind: ValueKind,
    field: &FieldMeta,
    ids: &[String],
) {
    let mut rng = rand::thread_rng();
    fill_column(table, index, |_| generator.value(kind, field, ids, &mut rng));
}

fn fill_column<F>(table: &mut QueryTable, index: usize, mut value: F)
where
    F: FnMut(&str) -> Option<String>,
{
    for row in table.rows_mut() {
        if let Some(cell) = row.get_mut(index) {
            if let Some(new_value) = value(cell) {
                *cell = new_value;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

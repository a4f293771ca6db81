//! # Domain Model
//! Raw records read from the document store, the four insight categories, and the
//! closed value type stored per category in a customer's insight profile.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One card transaction (`TransactionData/{id}/transactions/*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "Transaction_Amount")]
    pub amount: f64,
    /// Written as `YYYY-MM-DD`, which keeps range queries lexicographic. Timestamps
    /// that share the date prefix are read back as their UTC date.
    #[serde(rename = "Transaction_Date", with = "flexible_date")]
    pub date: NaiveDate,
    #[serde(rename = "Merchant")]
    pub merchant: String,
    #[serde(rename = "Merchant_Category")]
    pub merchant_category: String,
}

/// One app session, an element of the `sessions` array in `AppActivity/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySession {
    #[serde(with = "flexible_datetime")]
    pub date: DateTime<Utc>,
    /// Session length in seconds.
    #[serde(rename = "session_duration", default)]
    pub duration_secs: f64,
    #[serde(rename = "visited", default)]
    pub visited_pages: Vec<String>,
}

/// Records that fell inside the analysis window for one customer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewData {
    pub transactions: Vec<Transaction>,
    pub activity: Vec<ActivitySession>,
}

impl NewData {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.activity.is_empty()
    }
}

/// The four insight dimensions tracked per customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    LifeStage,
    LifeEvents,
    SpendingPatterns,
    RetentionRisk,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown insight category '{0}'")]
pub struct UnknownCategory(pub String);

impl Category {
    pub const ALL: [Category; 4] = [
        Category::LifeStage,
        Category::LifeEvents,
        Category::SpendingPatterns,
        Category::RetentionRisk,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::LifeStage => "life_stage",
            Category::LifeEvents => "life_events",
            Category::SpendingPatterns => "spending_patterns",
            Category::RetentionRisk => "retention_risk",
        }
    }

    /// Value shapes a category may hold in the stored profile. The same rule guards
    /// both reading a profile and merging a change into it.
    ///
    /// - every category: a label, or a record (the initial generator writes records)
    /// - `life_events`: additionally a list of events
    pub fn accepts(self, value: &InsightValue) -> bool {
        match value {
            InsightValue::Label(_) | InsightValue::Record(_) => true,
            InsightValue::List(_) => self == Category::LifeEvents,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// A stored insight value. Anything outside these three shapes is rejected at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InsightValue {
    Label(String),
    List(Vec<String>),
    Record(BTreeMap<String, Value>),
}

impl InsightValue {
    pub fn label(s: impl Into<String>) -> Self {
        InsightValue::Label(s.into())
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InsightValue::List(items.into_iter().map(Into::into).collect())
    }

    /// Narrow an arbitrary JSON value to one of the three shapes.
    ///
    /// A list only qualifies when every element is a string.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(InsightValue::Label(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(InsightValue::List),
            Value::Object(map) => Some(InsightValue::Record(
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )),
            _ => None,
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            InsightValue::Label(_) => "label",
            InsightValue::List(_) => "list",
            InsightValue::Record(_) => "record",
        }
    }
}

impl From<InsightValue> for Value {
    fn from(v: InsightValue) -> Self {
        match v {
            InsightValue::Label(s) => Value::String(s),
            InsightValue::List(items) => Value::Array(items.into_iter().map(Value::String).collect()),
            InsightValue::Record(map) => Value::Object(map.into_iter().collect()),
        }
    }
}

/// Latest persisted snapshot per category plus the customer's base document.
/// A category without any history is absent from `latest` (never null).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoricalProfile {
    pub basic_customer_info: Map<String, Value>,
    #[serde(flatten)]
    pub latest: BTreeMap<Category, Map<String, Value>>,
}

/// Current-state insight document (`CustomerInsights/{id}`), overwritten as a whole.
///
/// Keys are kept as strings so documents carrying legacy keys still load; lookups by
/// [`Category`] go through [`Category::as_str`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerInsightProfile(BTreeMap<String, InsightValue>);

impl CustomerInsightProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for fixtures.
    pub fn with(mut self, category: Category, value: InsightValue) -> Self {
        self.set(category, value);
        self
    }

    pub fn get(&self, category: Category) -> Option<&InsightValue> {
        self.0.get(category.as_str())
    }

    pub fn contains(&self, category: Category) -> bool {
        self.0.contains_key(category.as_str())
    }

    pub fn set(&mut self, category: Category, value: InsightValue) {
        self.0.insert(category.as_str().to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InsightValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Accepts RFC 3339, naive ISO-8601 (assumed UTC) and bare dates (midnight UTC).
mod flexible_datetime {
    use super::*;
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("unrecognized datetime '{raw}'")))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::from_str(raw) {
            return Some(naive.and_utc());
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(naive.and_utc());
        }
        NaiveDate::from_str(raw)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }
}

/// `Transaction_Date` is written as a bare date; anything [`flexible_datetime`] reads
/// is accepted and truncated to its UTC date.
mod flexible_date {
    use super::*;
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&d.format("%Y-%m-%d").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        super::flexible_datetime::parse(&raw)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| de::Error::custom(format!("unrecognized date '{raw}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn category_names_round_trip() {
        for c in Category::ALL {
            assert_eq!(c.as_str().parse::<Category>().unwrap(), c);
            assert_eq!(serde_json::to_value(c).unwrap(), json!(c.as_str()));
        }
        assert!("life_event".parse::<Category>().is_err());
    }

    #[test]
    fn insight_value_shapes_are_closed() {
        let label: InsightValue = serde_json::from_value(json!("young_adult")).unwrap();
        assert_eq!(label, InsightValue::label("young_adult"));

        let list: InsightValue = serde_json::from_value(json!(["new_child", "moved"])).unwrap();
        assert_eq!(list, InsightValue::list(["new_child", "moved"]));

        let rec: InsightValue =
            serde_json::from_value(json!({"top_category": "groceries", "share": 0.4})).unwrap();
        assert_eq!(rec.shape(), "record");

        assert!(serde_json::from_value::<InsightValue>(json!(0.7)).is_err());
        assert!(serde_json::from_value::<InsightValue>(json!(null)).is_err());
    }

    #[test]
    fn category_shape_rules() {
        let label = InsightValue::label("x");
        let list = InsightValue::list(["a"]);
        let record = InsightValue::Record(BTreeMap::new());

        for c in Category::ALL {
            assert!(c.accepts(&label), "{c} rejects a label");
            assert!(c.accepts(&record), "{c} rejects a record");
        }
        assert!(Category::LifeEvents.accepts(&list));
        assert!(!Category::LifeStage.accepts(&list));
        assert!(!Category::RetentionRisk.accepts(&list));
        assert!(!Category::SpendingPatterns.accepts(&list));
    }

    #[test]
    fn json_values_narrow_to_insight_shapes() {
        assert_eq!(
            InsightValue::from_json(&json!("medium")),
            Some(InsightValue::label("medium"))
        );
        assert_eq!(
            InsightValue::from_json(&json!(["new_child"])),
            Some(InsightValue::list(["new_child"]))
        );
        let rec = InsightValue::from_json(&json!({"stage": "young_adult", "confidence": 0.8}));
        assert_eq!(rec.as_ref().map(InsightValue::shape), Some("record"));
        assert_eq!(Value::from(rec.unwrap()), json!({"stage": "young_adult", "confidence": 0.8}));

        assert_eq!(InsightValue::from_json(&json!(0.2)), None);
        assert_eq!(InsightValue::from_json(&json!(null)), None);
        assert_eq!(InsightValue::from_json(&json!(true)), None);
        assert_eq!(InsightValue::from_json(&json!(["a", 1])), None);
    }

    #[test]
    fn transaction_dates_accept_timestamps() {
        let tx: Transaction = serde_json::from_value(json!({
            "Transaction_Amount": 12.5,
            "Transaction_Date": "2024-06-29T23:30:00-02:00",
            "Merchant": "Cafe",
            "Merchant_Category": "food"
        }))
        .unwrap();
        assert_eq!(tx.date, NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());
        assert_eq!(serde_json::to_value(&tx).unwrap()["Transaction_Date"], "2024-06-30");

        let bad = serde_json::from_value::<Transaction>(json!({
            "Transaction_Amount": 1.0,
            "Transaction_Date": "last week",
            "Merchant": "x",
            "Merchant_Category": "y"
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn session_dates_parse_in_several_formats() {
        let want = Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap();
        assert_eq!(flexible_datetime::parse("2024-03-01T10:30:00"), Some(want));
        assert_eq!(flexible_datetime::parse("2024-03-01T10:30:00Z"), Some(want));
        assert_eq!(flexible_datetime::parse("2024-03-01T11:30:00+01:00"), Some(want));
        assert_eq!(flexible_datetime::parse("2024-03-01 10:30:00"), Some(want));
        assert_eq!(
            flexible_datetime::parse("2024-03-01"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(flexible_datetime::parse("yesterday"), None);
    }

    #[test]
    fn session_decodes_from_stored_field_names() {
        let s: ActivitySession = serde_json::from_value(json!({
            "date": "2024-03-01T10:30:00",
            "session_duration": 120.5,
            "visited": ["home", "offers"]
        }))
        .unwrap();
        assert_eq!(s.duration_secs, 120.5);
        assert_eq!(s.visited_pages, vec!["home".to_string(), "offers".to_string()]);
    }

    #[test]
    fn historical_profile_flattens_categories() {
        let mut hp = HistoricalProfile::default();
        hp.latest.insert(
            Category::LifeStage,
            json!({"value": "young_adult"}).as_object().cloned().unwrap(),
        );
        let v = serde_json::to_value(&hp).unwrap();
        assert_eq!(v["life_stage"]["value"], "young_adult");
        assert!(v.get("retention_risk").is_none());
        assert!(v["basic_customer_info"].is_object());
    }

    #[test]
    fn profile_keeps_unknown_keys() {
        let p: CustomerInsightProfile = serde_json::from_value(json!({
            "life_stage": "young_adult",
            "spending_pattern": "legacy"
        }))
        .unwrap();
        assert_eq!(p.len(), 2);
        assert!(p.contains(Category::LifeStage));
        assert!(!p.contains(Category::SpendingPatterns));
    }
}

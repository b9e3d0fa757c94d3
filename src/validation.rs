//! Declarative request validation.
//!
//! Each request type owns a static [`Rules`] table: per field, an ordered list of
//! [`Check`]s. Fields are evaluated in declaration order and evaluation stops at the
//! first violated check, whose custom message (if any) or localized default is
//! returned as the single failure message.

use std::fmt;

use serde::Deserialize;
use uuid::Uuid;
use validator::{ValidateLength, ValidateRange, ValidateRequired};

/// Locale
///
/// Selects the language of default validation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Zh,
}

impl Locale {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en" | "en-us" | "en_us" => Some(Self::En),
            "zh" | "zh-cn" | "zh_cn" => Some(Self::Zh),
            _ => None,
        }
    }
}

/// Constraint
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Non-empty string, `Some`, or non-empty collection.
    Required,
    /// Character count bounds, applied to the trimmed form of every text value
    /// present. Handlers store names trimmed, so this is the length that persists.
    Length { min: usize, max: usize },
    /// Inclusive numeric bounds.
    Range { min: i64, max: i64 },
    /// Every text value present parses as a UUID.
    Uuid,
    /// Collection has at least this many elements.
    MinItems(usize),
    /// Every text value present is one of the listed options.
    OneOf(&'static [&'static str]),
}

impl Constraint {
    fn holds(&self, value: &dyn FieldValue) -> bool {
        match self {
            Self::Required => value.is_present().then_some(()).validate_required(),
            Self::Length { min, max } => value.texts().iter().all(|t| {
                t.trim()
                    .validate_length(Some(*min as u64), Some(*max as u64), None)
            }),
            Self::Range { min, max } => value
                .number()
                .is_none_or(|n| n.validate_range(Some(*min), Some(*max), None, None)),
            Self::Uuid => value.texts().iter().all(|t| Uuid::parse_str(t.trim()).is_ok()),
            Self::MinItems(min) => value
                .count()
                .is_none_or(|n| n.validate_range(Some(*min), None, None, None)),
            Self::OneOf(options) => value.texts().iter().all(|t| options.contains(t)),
        }
    }

    fn default_message(&self, label: &str, locale: Locale) -> String {
        match (self, locale) {
            (Self::Required, Locale::En) => format!("{label} is required"),
            (Self::Required, Locale::Zh) => format!("{label}不能为空"),
            (Self::Length { min, max }, Locale::En) => {
                format!("{label} must be between {min} and {max} characters")
            }
            (Self::Length { min, max }, Locale::Zh) => {
                format!("{label}长度必须在{min}到{max}个字符之间")
            }
            (Self::Range { min, max }, Locale::En) => {
                format!("{label} must be between {min} and {max}")
            }
            (Self::Range { min, max }, Locale::Zh) => format!("{label}必须在{min}到{max}之间"),
            (Self::Uuid, Locale::En) => format!("{label} must be a valid UUID"),
            (Self::Uuid, Locale::Zh) => format!("{label}必须是有效的UUID"),
            (Self::MinItems(min), Locale::En) => {
                format!("{label} must contain at least {min} item(s)")
            }
            (Self::MinItems(min), Locale::Zh) => format!("{label}至少包含{min}项"),
            (Self::OneOf(options), Locale::En) => {
                format!("{label} must be one of: {}", options.join(", "))
            }
            (Self::OneOf(options), Locale::Zh) => {
                format!("{label}必须是以下之一: {}", options.join(", "))
            }
        }
    }
}

/// A constraint paired with an optional custom message.
#[derive(Debug, Clone)]
pub struct Check {
    constraint: Constraint,
    message: Option<&'static str>,
}

impl Check {
    pub fn required() -> Self {
        Constraint::Required.into()
    }

    pub fn length(min: usize, max: usize) -> Self {
        Constraint::Length { min, max }.into()
    }

    pub fn range(min: i64, max: i64) -> Self {
        Constraint::Range { min, max }.into()
    }

    pub fn uuid() -> Self {
        Constraint::Uuid.into()
    }

    pub fn min_items(min: usize) -> Self {
        Constraint::MinItems(min).into()
    }

    pub fn one_of(options: &'static [&'static str]) -> Self {
        Constraint::OneOf(options).into()
    }

    /// Replaces the localized default message for this check.
    pub fn message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }
}

impl From<Constraint> for Check {
    fn from(constraint: Constraint) -> Self {
        Self {
            constraint,
            message: None,
        }
    }
}

/// FieldValue
///
/// A read-only view of a field that constraints can inspect. Absent optional
/// values expose no texts and no number, so only `Required` can reject them.
pub trait FieldValue {
    fn is_present(&self) -> bool;

    fn texts(&self) -> Vec<&str> {
        Vec::new()
    }

    fn number(&self) -> Option<i64> {
        None
    }

    fn count(&self) -> Option<usize> {
        None
    }
}

impl FieldValue for String {
    fn is_present(&self) -> bool {
        !self.trim().is_empty()
    }

    fn texts(&self) -> Vec<&str> {
        vec![self.as_str()]
    }
}

impl FieldValue for Option<String> {
    fn is_present(&self) -> bool {
        self.as_ref().is_some_and(|s| !s.trim().is_empty())
    }

    fn texts(&self) -> Vec<&str> {
        self.as_deref().into_iter().collect()
    }
}

impl FieldValue for i64 {
    fn is_present(&self) -> bool {
        true
    }

    fn number(&self) -> Option<i64> {
        Some(*self)
    }
}

impl FieldValue for Option<i64> {
    fn is_present(&self) -> bool {
        self.is_some()
    }

    fn number(&self) -> Option<i64> {
        *self
    }
}

impl FieldValue for Vec<String> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }

    fn texts(&self) -> Vec<&str> {
        self.iter().map(String::as_str).collect()
    }

    fn count(&self) -> Option<usize> {
        Some(self.len())
    }
}

type RuleFn<T> = Box<dyn Fn(&T, Locale) -> Option<String> + Send + Sync>;

/// Rules
///
/// The ordered constraint table of a request type.
pub struct Rules<T> {
    rules: Vec<RuleFn<T>>,
}

impl<T> Default for Rules<T> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<T> fmt::Debug for Rules<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rules").field("rules", &self.rules.len()).finish()
    }
}

impl<T: 'static> Rules<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the checks for one field. `label` is the human-readable field name used
    /// in default messages.
    pub fn field<V>(
        mut self,
        label: &'static str,
        get: fn(&T) -> &V,
        checks: impl IntoIterator<Item = Check>,
    ) -> Self
    where
        V: FieldValue + 'static,
    {
        let checks: Vec<Check> = checks.into_iter().collect();
        self.rules.push(Box::new(move |target, locale| {
            let value = get(target);
            checks
                .iter()
                .find(|check| !check.constraint.holds(value))
                .map(|check| match check.message {
                    Some(custom) => custom.to_string(),
                    None => check.constraint.default_message(label, locale),
                })
        }));
        self
    }

    /// Validates every element of a nested collection with its own rules.
    pub fn each<U>(mut self, label: &'static str, get: fn(&T) -> &[U]) -> Self
    where
        U: Validate + 'static,
    {
        self.rules.push(Box::new(move |target, locale| {
            get(target)
                .iter()
                .enumerate()
                .find_map(|(i, item)| {
                    item.validate(locale)
                        .err()
                        .map(|m| format!("{label}[{i}]: {m}"))
                })
        }));
        self
    }

    /// Runs the table; the first failure wins.
    pub fn check(&self, target: &T, locale: Locale) -> Result<(), String> {
        match self.rules.iter().find_map(|rule| rule(target, locale)) {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

/// Validate
///
/// Implemented by every request type that goes through the validate stage.
pub trait Validate {
    fn validate(&self, locale: Locale) -> Result<(), String>;
}

/// Multi-source binds (path + body) validate the body part; the path part was
/// already type-checked by the bind stage.
impl<P, B: Validate> Validate for (P, B) {
    fn validate(&self, locale: Locale) -> Result<(), String> {
        self.1.validate(locale)
    }
}

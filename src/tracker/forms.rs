//! URL-encoded form parsing shared by route actions and the reconcile layer.
//!
//! Browsers submit every field as text, so each intent is parsed from a
//! flat list of pairs. Empty strings count as absent, matching how HTML
//! forms submit untouched inputs.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Serialize;

/// Field name → list of messages.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

pub const REQUIRED: &str = "Required";

/// An ordered multimap of submitted fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormData {
    pairs: Vec<(String, String)>,
}

impl FormData {
    pub fn parse(body: &str) -> Result<Self, serde_urlencoded::de::Error> {
        let pairs = serde_urlencoded::from_str::<Vec<(String, String)>>(body)?;
        Ok(Self { pairs })
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// First non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    /// Every non-empty value for `key`, in submission order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Collects per-field errors while an intent is being parsed.
///
/// Accessors always return a value so parsing can continue past the first
/// failure and report every bad field at once; `finish` decides.
#[derive(Debug)]
pub struct Fields<'a> {
    form: &'a FormData,
    errors: FieldErrors,
}

impl<'a> Fields<'a> {
    pub fn new(form: &'a FormData) -> Self {
        Self {
            form,
            errors: FieldErrors::new(),
        }
    }

    fn raw(&self, key: &str) -> Option<&'a str> {
        self.form.get(key)
    }

    pub fn error(&mut self, key: &str, message: impl Into<String>) {
        self.errors
            .entry(key.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn optional(&self, key: &str) -> Option<String> {
        self.raw(key).map(str::to_string)
    }

    pub fn required(&mut self, key: &str) -> String {
        match self.raw(key) {
            Some(value) => value.to_string(),
            None => {
                self.error(key, REQUIRED);
                String::new()
            }
        }
    }

    /// Optional typed field; unparsable input is recorded as an error.
    pub fn optional_parsed<T: FromStr>(&mut self, key: &str) -> Option<T> {
        let raw = self.raw(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.error(key, format!("Invalid value: {}", raw));
                None
            }
        }
    }

    pub fn required_parsed<T: FromStr>(&mut self, key: &str) -> Option<T> {
        if self.raw(key).is_none() {
            self.error(key, REQUIRED);
            return None;
        }
        self.optional_parsed(key)
    }

    /// Integer-coded enum such as a status or priority.
    pub fn code<T: TryFrom<i64>>(&mut self, key: &str) -> Option<T> {
        let code: i64 = self.optional_parsed(key)?;
        match T::try_from(code) {
            Ok(value) => Some(value),
            Err(_) => {
                self.error(key, format!("Invalid value: {}", code));
                None
            }
        }
    }

    pub fn required_code<T: TryFrom<i64>>(&mut self, key: &str) -> Option<T> {
        if self.raw(key).is_none() {
            self.error(key, REQUIRED);
            return None;
        }
        self.code(key)
    }

    /// The errors recorded so far, for a parse that cannot build its value.
    pub fn into_errors(self) -> FieldErrors {
        self.errors
    }

    pub fn finish<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self.errors)
        }
    }
}

/// A form-submitted intent, parsed identically by the route action and by
/// the reconcile layer.
pub trait IntentForm: Sized {
    fn parse(form: &FormData) -> Result<Self, FieldErrors>;
}

/// Errors for a submission whose `intent` is missing or unknown.
pub fn unknown_intent(form: &FormData) -> FieldErrors {
    let message = match form.get("intent") {
        Some(intent) => format!("Unknown intent: {}", intent),
        None => REQUIRED.to_string(),
    };
    FieldErrors::from([("intent".to_string(), vec![message])])
}

//! Query-string encoding.

use std::fmt;

use url::form_urlencoded;

/// A query parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Percent-encode single-valued parameters.
pub fn encode_query<K, V>(params: impl IntoIterator<Item = (K, V)>) -> String
where
    K: AsRef<str>,
    V: Into<QueryValue>,
{
    encode_query_multi(params.into_iter().map(|(key, value)| (key, vec![value.into()])))
}

/// Percent-encode multi-valued parameters, preserving order.
pub fn encode_query_multi<K>(params: impl IntoIterator<Item = (K, Vec<QueryValue>)>) -> String
where
    K: AsRef<str>,
{
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, values) in params {
        for value in values {
            serializer.append_pair(key.as_ref(), &value.to_string());
        }
    }
    serializer.finish()
}

/// Join single-valued parameters without escaping.
pub fn encode_query_raw<K, V>(params: impl IntoIterator<Item = (K, V)>) -> String
where
    K: AsRef<str>,
    V: Into<QueryValue>,
{
    encode_query_multi_raw(params.into_iter().map(|(key, value)| (key, vec![value.into()])))
}

/// Join multi-valued parameters without escaping.
pub fn encode_query_multi_raw<K>(params: impl IntoIterator<Item = (K, Vec<QueryValue>)>) -> String
where
    K: AsRef<str>,
{
    let mut out = String::new();
    for (key, values) in params {
        for value in values {
            if !out.is_empty() {
                out.push('&');
            }
            out.push_str(key.as_ref());
            out.push('=');
            out.push_str(&value.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_ints_and_strings() {
        let encoded = encode_query([("limit", QueryValue::Int(10)), ("q", "hey there".into())]);
        assert_eq!(encoded, "limit=10&q=hey+there");
    }

    #[test]
    fn multi_values_repeat_the_key() {
        let encoded = encode_query_multi([(
            "id",
            vec![QueryValue::Int(1), QueryValue::Int(2), QueryValue::Int(3)],
        )]);
        assert_eq!(encoded, "id=1&id=2&id=3");
    }

    #[test]
    fn raw_variant_skips_escaping() {
        let encoded = encode_query_raw([("path", "a/b c")]);
        assert_eq!(encoded, "path=a/b c");
    }

    #[test]
    fn empty_params_encode_to_empty_string() {
        let encoded = encode_query_multi(Vec::<(&str, Vec<QueryValue>)>::new());
        assert_eq!(encoded, "");
    }
}

//! Template values and the chart-rendering seam
//!
//! Chart values are built explicitly per field as a tree of [`TemplateValue`]s
//! and handed to a [`ChartApplier`], which owns the actual templating.

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;

use crate::Result;

/// Value map passed to a chart
pub type Values = BTreeMap<String, TemplateValue>;

/// A node in a chart value tree
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TemplateValue {
    /// Plain string
    String(String),
    /// Integer
    Int(i64),
    /// Boolean
    Bool(bool),
    /// Ordered list
    List(Vec<TemplateValue>),
    /// Nested map
    Map(Values),
}

impl TemplateValue {
    /// Build a nested map from `(key, value)` pairs
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<TemplateValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        TemplateValue::Map(values(entries))
    }

    /// String content, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TemplateValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Nested map, if this is a map
    pub fn as_map(&self) -> Option<&Values> {
        match self {
            TemplateValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a dotted path (`kubernetes.kubelet.caCert`) in nested maps
    pub fn get_path(&self, path: &str) -> Option<&TemplateValue> {
        path.split('.')
            .try_fold(self, |node, key| node.as_map().and_then(|m| m.get(key)))
    }
}

impl From<&str> for TemplateValue {
    fn from(s: &str) -> Self {
        TemplateValue::String(s.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(s: String) -> Self {
        TemplateValue::String(s)
    }
}

impl From<i64> for TemplateValue {
    fn from(i: i64) -> Self {
        TemplateValue::Int(i)
    }
}

impl From<bool> for TemplateValue {
    fn from(b: bool) -> Self {
        TemplateValue::Bool(b)
    }
}

impl From<Vec<TemplateValue>> for TemplateValue {
    fn from(list: Vec<TemplateValue>) -> Self {
        TemplateValue::List(list)
    }
}

impl From<Values> for TemplateValue {
    fn from(map: Values) -> Self {
        TemplateValue::Map(map)
    }
}

/// Build a value map from `(key, value)` pairs
pub fn values<K, V, I>(entries: I) -> Values
where
    K: Into<String>,
    V: Into<TemplateValue>,
    I: IntoIterator<Item = (K, V)>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Shallow merge: keys of `overlay` replace keys of `base`; nested maps are not merged.
pub fn merge(base: &Values, overlay: &Values) -> Values {
    let mut merged = base.clone();
    merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Manifests produced by rendering a chart, keyed by template file name
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderedChart {
    /// Chart name
    pub name: String,
    /// Rendered file contents by template path
    pub files: BTreeMap<String, String>,
}

impl RenderedChart {
    /// All rendered documents joined into one multi-document YAML stream
    pub fn manifest(&self) -> String {
        self.files
            .values()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect::<Vec<_>>()
            .join("\n---\n")
    }
}

/// Renders charts and applies them to a target cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartApplier: Send + Sync {
    /// Render `chart_path` with `values` and apply the result into `namespace`
    async fn apply(
        &self,
        chart_path: &str,
        namespace: &str,
        release_name: &str,
        values: &Values,
    ) -> Result<()>;

    /// Render `chart_path` with `values` without applying anything
    fn render(
        &self,
        chart_path: &str,
        namespace: &str,
        release_name: &str,
        values: &Values,
    ) -> Result<RenderedChart>;
}

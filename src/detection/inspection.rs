//! Declarative XSS and injection detection over request payloads
//!
//! The payload is normalised into one JSON tree with the roots `body`,
//! `query` and `params`. Every string leaf (and every object key) is
//! addressed by a dotted path such as `body.items.0.name`, and rules are
//! `(path glob, regex)` pairs evaluated in order.

use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;

use crate::config::{InspectionConfig, InspectionRuleConfig};
use crate::models::EventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatKind {
    Xss,
    Injection,
}

impl ThreatKind {
    pub fn event_type(&self) -> EventType {
        match self {
            ThreatKind::Xss => EventType::XssAttempt,
            ThreatKind::Injection => EventType::InjectionAttempt,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ThreatKind::Xss => "XSS",
            ThreatKind::Injection => "Injection",
        }
    }
}

#[derive(Error, Debug)]
pub enum InspectionError {
    #[error("Invalid field glob {0:?}: {1}")]
    Glob(String, glob::PatternError),

    #[error("Invalid pattern {0:?}: {1}")]
    Regex(String, regex::Error),
}

pub struct InspectionRule {
    field: Pattern,
    pattern: Regex,
    kind: ThreatKind,
}

impl InspectionRule {
    pub fn compile(config: &InspectionRuleConfig) -> Result<Self, InspectionError> {
        Ok(InspectionRule {
            field: Pattern::new(&config.field)
                .map_err(|e| InspectionError::Glob(config.field.clone(), e))?,
            pattern: Regex::new(&config.pattern)
                .map_err(|e| InspectionError::Regex(config.pattern.clone(), e))?,
            kind: config.kind,
        })
    }

    fn matches(&self, path: &str, text: &str) -> bool {
        self.field.matches(path) && self.pattern.is_match(text)
    }
}

/// Request input split the way the web layer exposes it
#[derive(Debug, Clone, Default)]
pub struct RequestPayload {
    pub body: Option<Value>,
    pub query: Option<Value>,
    pub params: Option<Value>,
}

impl RequestPayload {
    pub fn body(body: Value) -> Self {
        RequestPayload {
            body: Some(body),
            ..Default::default()
        }
    }

    fn normalized(&self) -> Value {
        let mut root = Map::new();
        for (name, part) in [("body", &self.body), ("query", &self.query), ("params", &self.params)] {
            if let Some(value) = part {
                root.insert(name.to_string(), value.clone());
            }
        }
        Value::Object(root)
    }
}

/// A rule hit on one payload field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreatMatch {
    pub field: String,
    pub kind: ThreatKind,
}

impl ThreatMatch {
    pub fn describe(&self) -> String {
        format!("{} attempt detected in {}", self.kind.label(), self.field)
    }
}

pub struct PayloadInspector {
    rules: Vec<InspectionRule>,
}

impl PayloadInspector {
    pub fn new(rules: Vec<InspectionRule>) -> Self {
        PayloadInspector { rules }
    }

    pub fn from_config(config: &InspectionConfig) -> Result<Self, InspectionError> {
        let rules = if config.enabled {
            config
                .rules
                .iter()
                .map(InspectionRule::compile)
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };
        Ok(PayloadInspector::new(rules))
    }

    /// At most one match per (field, kind), in traversal order
    pub fn inspect(&self, payload: &RequestPayload) -> Vec<ThreatMatch> {
        let mut matches = Vec::new();
        if self.rules.is_empty() {
            return matches;
        }

        let mut seen = HashSet::new();
        let root = payload.normalized();
        if let Value::Object(map) = &root {
            for (name, value) in map {
                self.walk(name, value, &mut seen, &mut matches);
            }
        }
        matches
    }

    fn walk(
        &self,
        path: &str,
        value: &Value,
        seen: &mut HashSet<(String, ThreatKind)>,
        matches: &mut Vec<ThreatMatch>,
    ) {
        match value {
            Value::String(text) => self.check(path, text, seen, matches),
            Value::Object(map) => {
                for (key, child) in map {
                    let child_path = format!("{}.{}", path, key);
                    // Operator keys such as `$ne` carry injections on their own
                    self.check(&child_path, key, seen, matches);
                    self.walk(&child_path, child, seen, matches);
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    self.walk(&format!("{}.{}", path, index), child, seen, matches);
                }
            }
            _ => {}
        }
    }

    fn check(
        &self,
        path: &str,
        text: &str,
        seen: &mut HashSet<(String, ThreatKind)>,
        matches: &mut Vec<ThreatMatch>,
    ) {
        for rule in &self.rules {
            if seen.contains(&(path.to_string(), rule.kind)) {
                continue;
            }
            if rule.matches(path, text) {
                seen.insert((path.to_string(), rule.kind));
                matches.push(ThreatMatch {
                    field: path.to_string(),
                    kind: rule.kind,
                });
            }
        }
    }
}

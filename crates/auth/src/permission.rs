//! Pattern-based document permission evaluator (§4.D).

use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use teleportal_primitives::Permission;

use crate::token::{AccessEntry, Claims};

#[derive(Debug, Clone)]
enum CompiledPattern {
    Exact(String),
    Any,
    Prefix(String),
    Suffix(String),
    Glob(Regex),
}

impl CompiledPattern {
    fn compile(pattern: &str) -> Self {
        if pattern == "*" {
            return Self::Any;
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            if !prefix.contains('*') {
                return Self::Prefix(format!("{prefix}/"));
            }
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            if !suffix.contains('*') {
                return Self::Suffix(suffix.to_owned());
            }
        }
        if pattern.contains('*') {
            let escaped = regex::escape(pattern).replace(r"\*", ".*");
            if let Ok(re) = Regex::new(&format!("^{escaped}$")) {
                return Self::Glob(re);
            }
        }
        Self::Exact(pattern.to_owned())
    }

    fn matches(&self, document_id: &str) -> bool {
        match self {
            Self::Exact(p) => p == document_id,
            Self::Any => true,
            Self::Prefix(p) => document_id.starts_with(p.as_str()),
            Self::Suffix(s) => document_id.ends_with(s.as_str()),
            Self::Glob(re) => re.is_match(document_id),
        }
    }
}

/// Caches compiled patterns across evaluations so a hot document doesn't
/// recompile the same glob on every message.
#[derive(Debug, Default)]
pub struct PatternCache {
    cache: DashMap<String, Arc<CompiledPattern>>,
}

impl PatternCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn compiled(&self, body: &str) -> Arc<CompiledPattern> {
        if let Some(existing) = self.cache.get(body) {
            return Arc::clone(&existing);
        }
        let compiled = Arc::new(CompiledPattern::compile(body));
        self.cache.insert(body.to_owned(), Arc::clone(&compiled));
        compiled
    }
}

/// Evaluates a token's `documentAccess` list against a single
/// `(documentId, requiredPermission)` check (§4.D). Deny always wins over
/// grant, and `Permission::Admin` in an entry's permission list satisfies
/// any required permission.
#[derive(Debug, Default)]
pub struct PermissionEvaluator {
    patterns: PatternCache,
}

impl PermissionEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn evaluate(
        &self,
        claims: &Claims,
        document_id: &str,
        required: Permission,
    ) -> bool {
        self.evaluate_entries(&claims.document_access, document_id, required)
    }

    #[must_use]
    pub fn evaluate_entries(
        &self,
        entries: &[AccessEntry],
        document_id: &str,
        required: Permission,
    ) -> bool {
        let mut grant = false;
        let mut deny = false;

        for entry in entries {
            let compiled = self.patterns.compiled(entry.pattern_body());
            if !compiled.matches(document_id) {
                continue;
            }
            if entry.is_deny() {
                deny = true;
            } else if entry
                .permissions
                .iter()
                .any(|p| *p == required || *p == Permission::Admin)
            {
                grant = true;
            }
        }

        if deny {
            false
        } else {
            grant
        }
    }
}

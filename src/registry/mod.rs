//! Judge and assembly registry.
//!
//! The orchestrator consumes this as a read-only collaborator; the HTTP
//! layer uses the full CRUD surface. Definitions are validated on write so
//! that resolution never sees a structurally broken judge or assembly.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::errors::ValidationError;
use crate::types::{AggregationPolicy, Assembly, Judge};

/// Maximum length accepted for judge and assembly names.
pub const MAX_NAME_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Registry trait
// ---------------------------------------------------------------------------

/// Storage abstraction for judge and assembly definitions.
///
/// `get_*` lookups are the only operations the orchestrator performs; the
/// mutating operations exist for the management API.
#[async_trait]
pub trait Registry: Send + Sync + std::fmt::Debug {
    async fn get_judge(&self, id: &str) -> Option<Judge>;
    async fn get_assembly(&self, id: &str) -> Option<Assembly>;

    /// List judges, optionally filtered by a case-insensitive name substring.
    async fn list_judges(&self, name: Option<&str>) -> Vec<Judge>;

    /// List assemblies, optionally filtered by a case-insensitive name substring.
    async fn list_assemblies(&self, name: Option<&str>) -> Vec<Assembly>;

    async fn upsert_judge(&self, judge: Judge) -> Result<(), ValidationError>;
    async fn upsert_assembly(&self, assembly: Assembly) -> Result<(), ValidationError>;

    /// Returns `true` when something was deleted.
    async fn delete_judge(&self, id: &str) -> bool;
    async fn delete_assembly(&self, id: &str) -> bool;
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a judge definition before it enters the registry.
pub fn validate_judge(judge: &Judge) -> Result<(), ValidationError> {
    let invalid = |message: String| ValidationError::InvalidJudge { message };

    if judge.id.trim().is_empty() {
        return Err(invalid("judge id must not be empty".into()));
    }
    if judge.name.trim().is_empty() || judge.name.len() > MAX_NAME_LEN {
        return Err(invalid(format!(
            "judge name must be 1..={} characters",
            MAX_NAME_LEN
        )));
    }
    if judge.rubric.trim().is_empty() {
        return Err(invalid("rubric must not be empty".into()));
    }
    if !judge.weight.is_finite() || judge.weight <= 0.0 {
        return Err(invalid(format!(
            "weight must be finite and positive, got {}",
            judge.weight
        )));
    }
    let loopback_http = judge.endpoint.starts_with("http://127.0.0.1")
        || judge.endpoint.starts_with("http://localhost");
    if !judge.endpoint.starts_with("https://") && !loopback_http {
        return Err(invalid(
            "endpoint must be an https:// URL (http:// only for loopback)".into(),
        ));
    }
    Ok(())
}

/// Validate an assembly definition before it enters the registry.
///
/// Membership against existing judges is checked at resolution time, not
/// here: judges may legitimately be registered after the assembly.
pub fn validate_assembly(assembly: &Assembly) -> Result<(), ValidationError> {
    let invalid = |message: String| ValidationError::InvalidAssembly { message };

    if assembly.id.trim().is_empty() {
        return Err(invalid("assembly id must not be empty".into()));
    }
    if assembly.name.trim().is_empty() || assembly.name.len() > MAX_NAME_LEN {
        return Err(invalid(format!(
            "assembly name must be 1..={} characters",
            MAX_NAME_LEN
        )));
    }
    if assembly.judges.is_empty() {
        return Err(invalid("assembly must list at least one judge".into()));
    }
    for (i, id) in assembly.judges.iter().enumerate() {
        if assembly.judges[..i].contains(id) {
            return Err(invalid(format!("duplicate member: {}", id)));
        }
    }
    if let AggregationPolicy::Quorum { k } = assembly.policy {
        if k == 0 {
            return Err(invalid("quorum threshold must be at least 1".into()));
        }
        if k > assembly.judges.len() {
            return Err(invalid(format!(
                "quorum threshold {} exceeds member count {}",
                k,
                assembly.judges.len()
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Thread-safe in-memory registry backed by concurrent maps.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    judges: DashMap<String, Judge>,
    assemblies: DashMap<String, Assembly>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn name_matches(name: &str, filter: Option<&str>) -> bool {
    match filter {
        Some(f) => name.to_lowercase().contains(&f.to_lowercase()),
        None => true,
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn get_judge(&self, id: &str) -> Option<Judge> {
        self.judges.get(id).map(|j| j.clone())
    }

    async fn get_assembly(&self, id: &str) -> Option<Assembly> {
        self.assemblies.get(id).map(|a| a.clone())
    }

    async fn list_judges(&self, name: Option<&str>) -> Vec<Judge> {
        let mut judges: Vec<Judge> = self
            .judges
            .iter()
            .filter(|e| name_matches(&e.name, name))
            .map(|e| e.clone())
            .collect();
        judges.sort_by(|a, b| a.id.cmp(&b.id));
        judges
    }

    async fn list_assemblies(&self, name: Option<&str>) -> Vec<Assembly> {
        let mut assemblies: Vec<Assembly> = self
            .assemblies
            .iter()
            .filter(|e| name_matches(&e.name, name))
            .map(|e| e.clone())
            .collect();
        assemblies.sort_by(|a, b| a.id.cmp(&b.id));
        assemblies
    }

    async fn upsert_judge(&self, judge: Judge) -> Result<(), ValidationError> {
        validate_judge(&judge)?;
        log::debug!("Registered judge {} ({})", judge.id, judge.name);
        self.judges.insert(judge.id.clone(), judge);
        Ok(())
    }

    async fn upsert_assembly(&self, assembly: Assembly) -> Result<(), ValidationError> {
        validate_assembly(&assembly)?;
        log::debug!(
            "Registered assembly {} with {} members, policy {}",
            assembly.id,
            assembly.judges.len(),
            assembly.policy
        );
        self.assemblies.insert(assembly.id.clone(), assembly);
        Ok(())
    }

    async fn delete_judge(&self, id: &str) -> bool {
        self.judges.remove(id).is_some()
    }

    async fn delete_assembly(&self, id: &str) -> bool {
        self.assemblies.remove(id).is_some()
    }
}

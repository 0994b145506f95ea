//! Assembly resolution.
//!
//! Expands an assembly definition into its ordered set of enabled member
//! judges. Resolution order equals declared member order; that order is
//! also the tie-break order during aggregation, so it must be stable.

use std::sync::Arc;

use crate::errors::ResolutionError;
use crate::registry::Registry;
use crate::types::{Assembly, Judge};

/// A successfully resolved assembly: the definition plus its enabled
/// member judges in declared order.
#[derive(Debug, Clone)]
pub struct ResolvedAssembly {
    pub assembly: Assembly,
    pub judges: Vec<Judge>,
}

/// Resolves assembly ids against the registry.
#[derive(Debug, Clone)]
pub struct AssemblyResolver {
    registry: Arc<dyn Registry>,
}

impl AssemblyResolver {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    /// Resolve an assembly id to its enabled members.
    ///
    /// Fails when the assembly is missing or disabled, a member id is
    /// unknown or duplicated, or zero enabled judges remain after
    /// filtering.
    pub async fn resolve(&self, assembly_id: &str) -> Result<ResolvedAssembly, ResolutionError> {
        let assembly = self
            .registry
            .get_assembly(assembly_id)
            .await
            .ok_or_else(|| ResolutionError::AssemblyNotFound {
                id: assembly_id.to_string(),
            })?;

        if !assembly.enabled {
            return Err(ResolutionError::Disabled {
                id: assembly_id.to_string(),
            });
        }

        let mut judges = Vec::with_capacity(assembly.judges.len());
        for (i, judge_id) in assembly.judges.iter().enumerate() {
            if assembly.judges[..i].contains(judge_id) {
                return Err(ResolutionError::DuplicateMember {
                    assembly_id: assembly_id.to_string(),
                    judge_id: judge_id.clone(),
                });
            }

            let judge = self.registry.get_judge(judge_id).await.ok_or_else(|| {
                ResolutionError::MemberNotFound {
                    assembly_id: assembly_id.to_string(),
                    judge_id: judge_id.clone(),
                }
            })?;

            if judge.enabled {
                judges.push(judge);
            } else {
                log::debug!(
                    "Filtering disabled judge {} from assembly {}",
                    judge_id,
                    assembly_id
                );
            }
        }

        if judges.is_empty() {
            return Err(ResolutionError::EmptyAssembly {
                id: assembly_id.to_string(),
            });
        }

        Ok(ResolvedAssembly { assembly, judges })
    }
}

//! Offer operations and their application to bundles.
//!
//! Every operation validates against the pre-state and either returns the
//! post-state or fails without partial application.

use serde::{Deserialize, Serialize};

use crate::bundle::ResourceBundle;
use crate::error::{ResourceError, ResourceResult};
use crate::resource::Resource;

/// An operation a framework applies to offered resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Dynamically reserve unreserved resources.
    Reserve(ResourceBundle),
    /// Release dynamically reserved resources back to the unreserved pool.
    Unreserve(ResourceBundle),
    /// Create persistent volumes on reserved disk.
    Create(ResourceBundle),
    /// Destroy persistent volumes, returning plain disk.
    Destroy(ResourceBundle),
    /// Launch consumes no resources at this level; it only validates.
    Launch(ResourceBundle),
}

impl ResourceBundle {
    /// Apply an offer operation, returning the post-operation bundle.
    ///
    /// Fails with `InvalidOperation` when the pre-state does not contain the
    /// operands; `self` is never mutated.
    pub fn apply(&self, operation: &Operation) -> ResourceResult<ResourceBundle> {
        match operation {
            Operation::Reserve(resources) => {
                for r in resources.iter() {
                    if r.is_unreserved() {
                        return Err(ResourceError::InvalidOperation(format!(
                            "RESERVE of unreserved resource {r}"
                        )));
                    }
                }
                let stripped = resources.to_unreserved();
                self.checked_swap("RESERVE", &stripped, resources)
            }
            Operation::Unreserve(resources) => {
                for r in resources.iter() {
                    if r.is_unreserved() {
                        return Err(ResourceError::InvalidOperation(format!(
                            "UNRESERVE of unreserved resource {r}"
                        )));
                    }
                }
                let stripped = resources.to_unreserved();
                self.checked_swap("UNRESERVE", resources, &stripped)
            }
            Operation::Create(volumes) => {
                for v in volumes.iter() {
                    if v.volume.is_none() {
                        return Err(ResourceError::InvalidOperation(format!(
                            "CREATE of non-volume resource {v}"
                        )));
                    }
                }
                let stripped = without_volumes(volumes);
                self.checked_swap("CREATE", &stripped, volumes)
            }
            Operation::Destroy(volumes) => {
                for v in volumes.iter() {
                    if v.volume.is_none() {
                        return Err(ResourceError::InvalidOperation(format!(
                            "DESTROY of non-volume resource {v}"
                        )));
                    }
                }
                let stripped = without_volumes(volumes);
                self.checked_swap("DESTROY", volumes, &stripped)
            }
            Operation::Launch(resources) => {
                if !self.contains(resources) {
                    return Err(ResourceError::InvalidOperation(format!(
                        "LAUNCH needs {resources}, have {self}"
                    )));
                }
                Ok(self.clone())
            }
        }
    }

    /// Replace `from` with `to`, validating containment first.
    fn checked_swap(
        &self,
        op: &str,
        from: &ResourceBundle,
        to: &ResourceBundle,
    ) -> ResourceResult<ResourceBundle> {
        if !self.contains(from) {
            return Err(ResourceError::InvalidOperation(format!(
                "{op} needs {from}, have {self}"
            )));
        }
        Ok(self.clone() - from + to)
    }
}

/// The operands with volume identity (and the shared marker that rides on
/// it) cleared — what CREATE consumes and DESTROY returns.
fn without_volumes(volumes: &ResourceBundle) -> ResourceBundle {
    volumes
        .iter()
        .cloned()
        .map(|mut r: Resource| {
            r.volume = None;
            r.shared = false;
            r
        })
        .collect()
}

//! Procedure validation.
//!
//! Validation is pure: it reads a definition and reports every violation it
//! finds. It never stops at the first problem.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use super::types::ProcedureDefinition;

/// One broken rule in a procedure definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The procedure declares no steps.
    NoSteps,
    /// Two steps resolve to the same id.
    DuplicateStepId { id: String },
    /// A step has an empty `type`.
    MissingStepType { step: String },
    /// `on_success`/`on_failure` names an undeclared step id.
    DanglingTransition {
        step: String,
        edge: &'static str,
        target: String,
    },
    /// The step inherits the procedure device list, which is empty.
    NoDevices { step: String },
    /// A device appears twice in the same list.
    DuplicateDevice { step: Option<String>, device: String },
    /// No handler is registered for the step type.
    UnknownStepType { step: String, step_type: String },
    /// Required handler params are absent.
    MissingParams { step: String, params: Vec<String> },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::NoSteps => write!(f, "procedure has no steps"),
            Violation::DuplicateStepId { id } => write!(f, "duplicate step id '{}'", id),
            Violation::MissingStepType { step } => write!(f, "step '{}' has no type", step),
            Violation::DanglingTransition { step, edge, target } => write!(
                f,
                "step '{}': {} points to undeclared step '{}'",
                step, edge, target
            ),
            Violation::NoDevices { step } => write!(
                f,
                "step '{}' has no devices: the procedure device list is empty and the step does not override it",
                step
            ),
            Violation::DuplicateDevice { step: Some(step), device } => {
                write!(f, "step '{}' lists device '{}' twice", step, device)
            }
            Violation::DuplicateDevice { step: None, device } => {
                write!(f, "procedure lists device '{}' twice", device)
            }
            Violation::UnknownStepType { step, step_type } => {
                write!(f, "step '{}': unknown step type '{}'", step, step_type)
            }
            Violation::MissingParams { step, params } => write!(
                f,
                "step '{}': missing required params: {}",
                step,
                params.join(", ")
            ),
        }
    }
}

/// Every violation found in a definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid procedure: {}", join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// `Ok` when the list is empty.
    pub fn check(violations: Vec<Violation>) -> Result<(), ValidationError> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }
}

/// Resolved step ids in declaration order; unset ids default to the index.
pub fn step_ids(definition: &ProcedureDefinition) -> Vec<String> {
    definition
        .steps
        .iter()
        .enumerate()
        .map(|(idx, step)| step.id.clone().unwrap_or_else(|| idx.to_string()))
        .collect()
}

/// Collect every structural violation.
pub fn collect_violations(definition: &ProcedureDefinition) -> Vec<Violation> {
    let mut violations = Vec::new();

    if definition.steps.is_empty() {
        violations.push(Violation::NoSteps);
    }

    let ids = step_ids(definition);
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in &ids {
        *counts.entry(id.as_str()).or_default() += 1;
    }
    let mut reported = HashSet::new();
    for id in &ids {
        if counts[id.as_str()] > 1 && reported.insert(id.as_str()) {
            violations.push(Violation::DuplicateStepId { id: id.clone() });
        }
    }

    for device in duplicates(&definition.devices) {
        violations.push(Violation::DuplicateDevice { step: None, device });
    }

    let declared: HashSet<&str> = ids.iter().map(String::as_str).collect();
    for (step, id) in definition.steps.iter().zip(&ids) {
        if step.step_type.trim().is_empty() {
            violations.push(Violation::MissingStepType { step: id.clone() });
        }

        for (edge, target) in [("on_success", &step.on_success), ("on_failure", &step.on_failure)] {
            if let Some(target) = target {
                if !declared.contains(target.as_str()) {
                    violations.push(Violation::DanglingTransition {
                        step: id.clone(),
                        edge,
                        target: target.clone(),
                    });
                }
            }
        }

        match &step.devices {
            None if definition.devices.is_empty() => {
                violations.push(Violation::NoDevices { step: id.clone() });
            }
            Some(devices) => {
                for device in duplicates(devices) {
                    violations.push(Violation::DuplicateDevice {
                        step: Some(id.clone()),
                        device,
                    });
                }
            }
            None => {}
        }
    }

    violations
}

/// Validate a definition.
pub fn validate(definition: &ProcedureDefinition) -> Result<(), ValidationError> {
    ValidationError::check(collect_violations(definition))
}

/// Every device listed more than once, each reported once, in list order.
fn duplicates(devices: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    devices
        .iter()
        .filter(|d| !seen.insert(d.as_str()) && reported.insert(d.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::types::StepDefinition;

    #[test]
    fn test_valid_definition() {
        let def = ProcedureDefinition::new("ok")
            .with_devices(["r1"])
            .with_step(StepDefinition::new("A", "check").on_success("1"))
            .with_step(StepDefinition::new("B", "notify"));

        assert!(validate(&def).is_ok());
        assert_eq!(step_ids(&def), vec!["0", "1"]);
    }

    #[test]
    fn test_empty_steps_rejected() {
        let err = validate(&ProcedureDefinition::new("empty").with_devices(["r1"])).unwrap_err();
        assert_eq!(err.violations, vec![Violation::NoSteps]);
    }

    #[test]
    fn test_every_violation_reported() {
        let def = ProcedureDefinition::new("bad")
            .with_step(
                StepDefinition::new("A", "check")
                    .with_id("a")
                    .on_success("missing")
                    .on_failure("gone"),
            )
            .with_step(StepDefinition::new("B", "").with_id("a").deviceless())
            .with_step(StepDefinition::new("C", "command").with_devices(["r1", "r1"]));

        let err = validate(&def).unwrap_err();
        assert_eq!(
            err.violations,
            vec![
                Violation::DuplicateStepId { id: "a".into() },
                Violation::DanglingTransition {
                    step: "a".into(),
                    edge: "on_success",
                    target: "missing".into()
                },
                Violation::DanglingTransition {
                    step: "a".into(),
                    edge: "on_failure",
                    target: "gone".into()
                },
                Violation::NoDevices { step: "a".into() },
                Violation::MissingStepType { step: "a".into() },
                Violation::DuplicateDevice {
                    step: Some("2".into()),
                    device: "r1".into()
                },
            ]
        );
        assert!(err.to_string().contains("undeclared step 'missing'"));
    }

    #[test]
    fn test_deviceless_steps_need_no_procedure_devices() {
        let def = ProcedureDefinition::new("local")
            .with_step(StepDefinition::new("A", "delay").deviceless());
        assert!(validate(&def).is_ok());
    }

    #[test]
    fn test_duplicate_procedure_device() {
        let def = ProcedureDefinition::new("dup")
            .with_devices(["r1", "r2", "r1"])
            .with_step(StepDefinition::new("A", "check"));
        let err = validate(&def).unwrap_err();
        assert_eq!(
            err.violations,
            vec![Violation::DuplicateDevice {
                step: None,
                device: "r1".into()
            }]
        );

        let def = ProcedureDefinition::new("dup")
            .with_devices(["r1", "r1", "r2", "r2", "r1"])
            .with_step(
                StepDefinition::new("A", "check")
                    .with_id("a")
                    .with_devices(["r3", "r3"]),
            );
        let err = validate(&def).unwrap_err();
        assert_eq!(
            err.violations,
            vec![
                Violation::DuplicateDevice {
                    step: None,
                    device: "r1".into()
                },
                Violation::DuplicateDevice {
                    step: None,
                    device: "r2".into()
                },
                Violation::DuplicateDevice {
                    step: Some("a".into()),
                    device: "r3".into()
                },
            ]
        );
    }
}

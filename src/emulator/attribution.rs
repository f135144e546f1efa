//! Fault attribution
//!
//! Turns a raw [`MemFault`] into an [`EmuError`] naming the most specific
//! label around the faulting address. An address no label explains becomes
//! [`EmuError::UnclassifiedFault`]; the report is less useful but never fails.

use super::errors::EmuError;
use crate::memory::flat::MemFault;
use crate::memory::label::LabelRegistry;
use crate::memory::Address;

/// Map a fault to its error without recording it. `pc` is `None` for
/// accesses made by the host itself.
pub fn classify(labels: &LabelRegistry, fault: MemFault, pc: Option<Address>) -> EmuError {
    match labels.resolve(fault.address) {
        Some(range) => EmuError::AccessFault {
            address: fault.address,
            width: fault.width,
            write: fault.write,
            pc,
            label: range.name.clone(),
        },
        None => EmuError::UnclassifiedFault {
            address: fault.address,
            width: fault.width,
            write: fault.write,
            pc,
        },
    }
}

/// Records every attributed fault of a run
#[derive(Debug, Clone, Default)]
pub struct ErrorTracker {
    errors: Vec<EmuError>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute `fault`, raised by the instruction at `pc`, and record it
    pub fn attribute(&mut self, labels: &LabelRegistry, fault: MemFault, pc: Address) -> EmuError {
        let error = classify(labels, fault, Some(pc));
        match labels.resolve(fault.address) {
            Some(range) => log::error!(
                target: "fault",
                "{} (label {}, offset +{:x})",
                error,
                range,
                fault.address - range.start
            ),
            None => log::error!(target: "fault", "{}", error),
        }
        self.errors.push(error.clone());
        error
    }

    /// Record a non-memory error so it shows up in the run report
    pub fn record(&mut self, error: EmuError) {
        log::error!(target: "fault", "{}", error);
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[EmuError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

//! Host fault classification.
//!
//! The [`ErrorTranslator`] turns whatever the host reported into a
//! [`BridgeError`]. Exceptions are matched against an ordered rule table on
//! class name and message; the first matching rule wins. Faults are always
//! taken from the session before translation, so the resulting error holds
//! owned text only.

use bridge_traits::error::HostError;
use bridge_traits::host::HostFault;
use tracing::debug;

use crate::error::{BridgeError, ErrorContext, ErrorKind};

/// One classification rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRule {
    /// Fully qualified class name, or a simple name matched against the
    /// class's last component.
    pub class_name: String,
    /// Required substring of the exception message.
    pub message_contains: Option<String>,
    pub kind: ErrorKind,
}

impl FaultRule {
    pub fn new(class_name: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            class_name: class_name.into(),
            message_contains: None,
            kind,
        }
    }

    pub fn when_message_contains(mut self, needle: impl Into<String>) -> Self {
        self.message_contains = Some(needle.into());
        self
    }

    fn matches(&self, fault: &HostFault) -> bool {
        let class_matches = if self.class_name.contains('.') {
            fault.class_name == self.class_name
        } else {
            fault.simple_name() == self.class_name
        };
        if !class_matches {
            return false;
        }
        match (&self.message_contains, &fault.message) {
            (None, _) => true,
            (Some(needle), Some(message)) => message.contains(needle.as_str()),
            (Some(_), None) => false,
        }
    }
}

/// Classifies host faults into bridge error kinds.
#[derive(Debug, Clone)]
pub struct ErrorTranslator {
    rules: Vec<FaultRule>,
}

impl Default for ErrorTranslator {
    fn default() -> Self {
        Self {
            rules: vec![
                FaultRule::new("SecurityException", ErrorKind::PermissionDenied),
                FaultRule::new("IllegalArgumentException", ErrorKind::ResourceUnavailable)
                    .when_message_contains("Unknown URL"),
                FaultRule::new("IllegalArgumentException", ErrorKind::ResourceUnavailable)
                    .when_message_contains("Unknown authority"),
                FaultRule::new("DeadObjectException", ErrorKind::ResourceUnavailable),
                FaultRule::new("NameNotFoundException", ErrorKind::ResourceUnavailable),
                FaultRule::new("IllegalArgumentException", ErrorKind::Malformed),
                FaultRule::new("NumberFormatException", ErrorKind::Malformed),
                FaultRule::new("SQLiteException", ErrorKind::Malformed),
                FaultRule::new("UnsupportedOperationException", ErrorKind::Malformed),
            ],
        }
    }
}

impl ErrorTranslator {
    /// A translator with no rules: every fault becomes `HostRuntimeFault`.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Adds a rule ahead of the existing ones.
    pub fn with_rule(mut self, rule: FaultRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    pub fn rules(&self) -> &[FaultRule] {
        &self.rules
    }

    pub fn classify(&self, fault: &HostFault) -> ErrorKind {
        self.rules
            .iter()
            .find(|rule| rule.matches(fault))
            .map_or(ErrorKind::HostRuntimeFault, |rule| rule.kind)
    }

    /// Plain-data form of a fault.
    pub fn translate(&self, fault: &HostFault) -> ErrorContext {
        ErrorContext::from(self.to_error(fault.clone()))
    }

    pub fn to_error(&self, fault: HostFault) -> BridgeError {
        let kind = self.classify(&fault);
        let detail = fault
            .message
            .clone()
            .unwrap_or_else(|| fault.simple_name().to_string());
        debug!(class = %fault.class_name, %kind, "Host fault translated");

        let fault = Some(fault);
        match kind {
            ErrorKind::PermissionDenied => BridgeError::PermissionDenied { detail, fault },
            ErrorKind::ResourceUnavailable => BridgeError::ResourceUnavailable { detail, fault },
            ErrorKind::Malformed => BridgeError::Malformed { detail, fault },
            _ => BridgeError::HostRuntimeFault { detail, fault },
        }
    }

    /// Translates a failed session call.
    ///
    /// `fault` must already have been taken from the session when `err` is
    /// `ExceptionPending`.
    pub fn translate_host_error(&self, err: HostError, fault: Option<HostFault>) -> BridgeError {
        match err {
            HostError::ExceptionPending => match fault {
                Some(fault) => self.to_error(fault),
                None => BridgeError::Unknown(
                    "host reported a pending exception but none was found".to_string(),
                ),
            },
            HostError::NotAttachable(message) => BridgeError::ThreadAffinityViolation(message),
            HostError::TableExhausted {
                requested,
                available,
            } => BridgeError::ReferenceTableExhausted(format!(
                "host table refused {requested} references with {available} available"
            )),
            HostError::Unavailable(message) => BridgeError::resource_unavailable(message),
            HostError::InvalidReference(raw) => BridgeError::HostRuntimeFault {
                detail: format!("host rejected reference {raw:#x}"),
                fault: None,
            },
            HostError::OperationFailed(message) => BridgeError::HostRuntimeFault {
                detail: message,
                fault: None,
            },
        }
    }
}

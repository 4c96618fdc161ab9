use crate::component::ComponentKey;
use crate::element::ElementKind;
use std::fmt;
use thiserror::Error;

/// Where an element-level error occurred, when known.
///
/// Element operations run without knowing which component they belong to;
/// the component layer attaches the key and element name afterwards via
/// [`Error::locate`] so user-visible messages carry the full address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locus {
    /// The component the operation was running inside.
    pub key: Option<ComponentKey>,
    /// The named element within that component.
    pub element: Option<String>,
}

impl fmt::Display for Locus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.key, &self.element) {
            (Some(key), Some(element)) => write!(f, " at {}/{}", key, element),
            (Some(key), None) => write!(f, " at {}", key),
            (None, Some(element)) => write!(f, " at element {}", element),
            (None, None) => Ok(()),
        }
    }
}

/// The closed error taxonomy of the state algebra.
///
/// Algebraic operations fail fast with a precise kind; the pipeline
/// surfaces the first error together with the offending key and a human
/// message.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed serialized state or an unknown kind tag.
    #[error("parse error: {0}")]
    Parse(String),

    /// An operation received operands of different element kinds.
    #[error("kind mismatch: cannot {op} {left} against {right}{locus}")]
    KindMismatch {
        op: &'static str,
        left: ElementKind,
        right: ElementKind,
        locus: Locus,
    },

    /// diff/apply/combine across incompatible components: differing
    /// (provider, qualifier) keys, incompatible modes, or disagreeing
    /// element names.
    #[error("component mismatch: cannot {op} {left} against {right}: {reason}")]
    ComponentMismatch {
        op: &'static str,
        left: ComponentKey,
        right: ComponentKey,
        reason: String,
    },

    /// Apply of a DIFF component to a host lacking the matching FULL
    /// component.
    #[error("missing base: no full component for {key} to apply the diff to")]
    MissingBase { key: ComponentKey },

    /// A list-diff hunk could not locate its context during apply.
    #[error("list drift: hunk #{hunk} could not locate its context{locus}")]
    ListDrift { hunk: usize, locus: Locus },

    /// A dependency edge points at a component that is not present, or the
    /// dependency graph cannot be ordered.
    #[error("invalid system: {key}: {reason}")]
    InvalidSystem { key: ComponentKey, reason: String },
}

impl Error {
    pub(crate) fn kind_mismatch(op: &'static str, left: ElementKind, right: ElementKind) -> Self {
        Error::KindMismatch {
            op,
            left,
            right,
            locus: Locus::default(),
        }
    }

    /// Attaches component and element context to an element-level error.
    ///
    /// Errors that already carry their own address are returned unchanged.
    pub fn locate(self, key: &ComponentKey, element: &str) -> Self {
        let locus = Locus {
            key: Some(key.clone()),
            element: Some(element.to_string()),
        };
        match self {
            Error::KindMismatch {
                op, left, right, ..
            } => Error::KindMismatch {
                op,
                left,
                right,
                locus,
            },
            Error::ListDrift { hunk, .. } => Error::ListDrift { hunk, locus },
            other => other,
        }
    }
}

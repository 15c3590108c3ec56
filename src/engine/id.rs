//! Identity types for reactive units.
//!
//! All IDs are newtypes over `u32` that serve as direct indices into the
//! corresponding vectors of [`EngineState`](super::EngineState). Ids are
//! handed out in registration order, so sorting by id is sorting by
//! registration.

use std::fmt;

macro_rules! unit_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_index(index: usize) -> Self {
                Self(index as u32)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

unit_id!(
    /// Index into `EngineState::formulas`.
    FormulaId
);
unit_id!(
    /// Index into `EngineState::rules`.
    RuleId
);
unit_id!(
    /// Index into `EngineState::scripts`.
    ScriptId
);
unit_id!(
    /// Index into `EngineState::traces`.
    TraceId
);

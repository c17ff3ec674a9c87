// Switch tokens: the ordering primitive for room selection.
//
// Every `select_room` mints a fresh token. Continuations (permission checks,
// connect deadlines, session events) carry the token that was current when
// they were started; on resumption a mismatch means a newer selection has
// superseded them and their result is discarded.

use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwitchToken(u64);

impl SwitchToken {
    pub const INITIAL: Self = Self(0);

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SwitchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

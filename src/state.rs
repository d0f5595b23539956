//! Manager lifecycle state shared by central and peripheral façades.

/// Lifecycle state of a central or peripheral façade. All façades start at `Unknown` and
/// transition to `PoweredOn` after `stateUpdateDelay`; the other states are reachable only
/// via explicit configuration for failure testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl Default for ManagerState {
    fn default() -> Self {
        ManagerState::Unknown
    }
}

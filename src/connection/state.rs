//! Write-tracking state

/// Whether the primary has accepted writes the replica has not seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteState {
    #[default]
    Clean,
    Dirty,
}

impl WriteState {
    pub fn mark_dirty(&mut self) {
        *self = WriteState::Dirty;
    }

    pub fn clear(&mut self) {
        *self = WriteState::Clean;
    }

    pub fn is_dirty(&self) -> bool {
        *self == WriteState::Dirty
    }
}

use crate::instructions::instructions::WordType;

#[derive(Clone, Copy, Debug)]
pub(crate) struct CDBEntry {
    pub(crate) result: WordType,
    pub(crate) rob_index: u16,
    pub(crate) rs_index: u16,
}

/// The Common Data Bus: a single-slot broadcast channel between the
/// functional units and the waiting reservation stations / ROB. Only one
/// result can be in flight per cycle; the bus must be drained by writeback
/// before the next result may be pushed.
pub(crate) struct CDB {
    slot: Option<CDBEntry>,
}

impl CDB {
    pub(crate) fn new() -> Self {
        Self { slot: None }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    pub(crate) fn push(&mut self, result: WordType, rob_index: u16, rs_index: u16) {
        assert!(self.is_empty(), "CDB: Can't push on an occupied bus.");
        self.slot = Some(CDBEntry { result, rob_index, rs_index });
    }

    pub(crate) fn data(&self) -> CDBEntry {
        self.slot.expect("CDB: Can't read an empty bus.")
    }

    pub(crate) fn clear(&mut self) {
        self.slot = None;
    }
}

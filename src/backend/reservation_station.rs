use std::fmt;
use std::fmt::Display;
use std::rc::Rc;

use crate::backend::common_data_bus::CDBEntry;
use crate::instructions::instructions::{mnemonic, FUType, Instr, WordType};

/// A source operand of a reservation station entry: either the value is
/// already available, or it will be produced by the reservation station with
/// the given index and arrives over the CDB.
#[derive(Clone, Copy, PartialEq, Debug)]
pub(crate) enum Operand {
    Ready(WordType),
    Pending(u16),
}

impl Operand {
    pub(crate) fn is_ready(&self) -> bool {
        matches!(self, Operand::Ready(_))
    }

    pub(crate) fn value(&self) -> WordType {
        match self {
            Operand::Ready(value) => *value,
            Operand::Pending(rs_index) => {
                panic!("Operand still pending on RS {}", rs_index)
            }
        }
    }
}

// A single reservation station.
pub(crate) struct RS {
    pub(crate) valid: bool,
    pub(crate) running: bool,
    pub(crate) rob_index: u16,
    // issue order; the lock check needs relative instruction age
    pub(crate) seq: u64,
    pub(crate) rs1: Operand,
    pub(crate) rs2: Operand,
    pub(crate) instr: Option<Rc<Instr>>,
}

impl RS {
    fn new() -> Self {
        Self {
            valid: false,
            running: false,
            rob_index: 0,
            seq: 0,
            rs1: Operand::Ready(0),
            rs2: Operand::Ready(0),
            instr: None,
        }
    }

    fn reset(&mut self) {
        self.valid = false;
        self.running = false;
        self.instr = None;
    }

    pub(crate) fn operands_ready(&self) -> bool {
        self.rs1.is_ready() && self.rs2.is_ready()
    }

    // Wakeup: capture the broadcast value for every operand waiting on the
    // producing reservation station.
    fn update_operands(&mut self, cdb_data: &CDBEntry) {
        if self.rs1 == Operand::Pending(cdb_data.rs_index) {
            self.rs1 = Operand::Ready(cdb_data.result);
        }
        if self.rs2 == Operand::Pending(cdb_data.rs_index) {
            self.rs2 = Operand::Ready(cdb_data.result);
        }
    }
}

impl Display for RS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instr {
            Some(instr) => write!(
                f,
                "RS {} rob={} rs1={:?} rs2={:?}",
                mnemonic(instr.opcode),
                self.rob_index,
                self.rs1,
                self.rs2
            ),
            None => write!(f, "RS <free>"),
        }
    }
}

pub(crate) struct RSTable {
    pub(crate) capacity: u16,
    issued_seq: u64,
    array: Vec<RS>,
}

impl RSTable {
    pub(crate) fn new(capacity: u16) -> Self {
        let mut array = Vec::with_capacity(capacity as usize);
        for _ in 0..capacity {
            array.push(RS::new());
        }

        RSTable { capacity, issued_seq: 0, array }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.array.iter().all(|rs| rs.valid)
    }

    pub(crate) fn get(&self, rs_index: u16) -> &RS {
        &self.array[rs_index as usize]
    }

    pub(crate) fn get_mut(&mut self, rs_index: u16) -> &mut RS {
        &mut self.array[rs_index as usize]
    }

    /// Places the instruction in the lowest free slot and returns its index.
    /// Slots are scanned in index order; together with the dispatch scan this
    /// fixes the priority between simultaneously ready entries.
    pub(crate) fn issue(
        &mut self,
        rob_index: u16,
        rs1: Operand,
        rs2: Operand,
        instr: Rc<Instr>,
    ) -> u16 {
        for rs_index in 0..self.capacity {
            let rs = &mut self.array[rs_index as usize];
            if rs.valid {
                continue;
            }

            rs.valid = true;
            rs.running = false;
            rs.rob_index = rob_index;
            rs.seq = self.issued_seq;
            rs.rs1 = rs1;
            rs.rs2 = rs2;
            rs.instr = Some(instr);
            self.issued_seq += 1;
            return rs_index;
        }

        panic!("No free RS")
    }

    /// A load/store entry is locked while an older memory access is still in
    /// flight: memory operations leave the reservation stations in program
    /// order. Other unit categories never lock.
    pub(crate) fn locked(&self, rs_index: u16) -> bool {
        let entry = &self.array[rs_index as usize];
        let instr = entry.instr.as_ref().expect("RS: locked check on a free entry");

        if instr.fu_type != FUType::LSU {
            return false;
        }

        self.array.iter().any(|other| {
            other.valid
                && other.seq < entry.seq
                && other.instr.as_ref().map_or(false, |i| i.fu_type == FUType::LSU)
        })
    }

    pub(crate) fn broadcast(&mut self, cdb_data: &CDBEntry) {
        for rs in &mut self.array {
            if rs.valid {
                rs.update_operands(cdb_data);
            }
        }
    }

    pub(crate) fn release(&mut self, rs_index: u16) {
        let rs = &mut self.array[rs_index as usize];
        debug_assert!(rs.valid, "RS: release of a free entry {}", rs_index);
        rs.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::instructions::Opcode;

    fn add(rd: u16, rs1: u16, rs2: u16) -> Rc<Instr> {
        Rc::new(Instr::new(Opcode::ADD, rd, rs1, rs2, 0, None))
    }

    fn lw(rd: u16, rs1: u16) -> Rc<Instr> {
        Rc::new(Instr::new(Opcode::LW, rd, rs1, 0, 0, None))
    }

    #[test]
    fn test_issue_fills_lowest_free_slot() {
        let mut rs_table = RSTable::new(4);

        let a = rs_table.issue(0, Operand::Ready(1), Operand::Ready(2), add(3, 1, 2));
        let b = rs_table.issue(1, Operand::Ready(1), Operand::Ready(2), add(4, 1, 2));
        assert_eq!(a, 0);
        assert_eq!(b, 1);

        rs_table.release(a);
        let c = rs_table.issue(2, Operand::Ready(1), Operand::Ready(2), add(5, 1, 2));
        assert_eq!(c, 0);
    }

    #[test]
    fn test_broadcast_wakes_matching_operands_only() {
        let mut rs_table = RSTable::new(4);

        let producer = rs_table.issue(0, Operand::Ready(1), Operand::Ready(2), add(3, 1, 2));
        let consumer =
            rs_table.issue(1, Operand::Pending(producer), Operand::Ready(7), add(4, 3, 1));
        let bystander =
            rs_table.issue(2, Operand::Pending(99), Operand::Ready(7), add(5, 6, 1));

        rs_table.broadcast(&CDBEntry { result: 42, rob_index: 0, rs_index: producer });

        assert_eq!(rs_table.get(consumer).rs1, Operand::Ready(42));
        assert!(rs_table.get(consumer).operands_ready());
        assert_eq!(rs_table.get(bystander).rs1, Operand::Pending(99));
        assert!(!rs_table.get(bystander).operands_ready());
    }

    #[test]
    fn test_memory_entries_lock_in_program_order() {
        let mut rs_table = RSTable::new(4);

        let older = rs_table.issue(0, Operand::Ready(0), Operand::Ready(0), lw(1, 2));
        let younger = rs_table.issue(1, Operand::Ready(0), Operand::Ready(0), lw(3, 2));
        let alu = rs_table.issue(2, Operand::Ready(0), Operand::Ready(0), add(4, 1, 3));

        assert!(!rs_table.locked(older));
        assert!(rs_table.locked(younger));
        assert!(!rs_table.locked(alu));

        rs_table.release(older);
        assert!(!rs_table.locked(younger));
    }

    #[test]
    fn test_is_full() {
        let mut rs_table = RSTable::new(2);
        assert!(!rs_table.is_full());

        rs_table.issue(0, Operand::Ready(0), Operand::Ready(0), add(1, 0, 0));
        let b = rs_table.issue(1, Operand::Ready(0), Operand::Ready(0), add(2, 0, 0));
        assert!(rs_table.is_full());

        rs_table.release(b);
        assert!(!rs_table.is_full());
    }
}

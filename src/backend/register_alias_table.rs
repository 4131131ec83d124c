use crate::instructions::instructions::RegisterType;

/// The Register Alias Table. The RAT entry for a given architectural register
/// points to the ROB slot of the youngest in-flight producer of that
/// register. As long as such an entry exists, readers must take the value
/// from the ROB (or wait for it) instead of the architectural register file.
pub(crate) struct RAT {
    table: Vec<Option<u16>>,
}

impl RAT {
    pub(crate) fn new(reg_count: u16) -> Self {
        let mut table = Vec::with_capacity(reg_count as usize);
        for _ in 0..reg_count {
            table.push(None);
        }
        Self { table }
    }

    pub(crate) fn get(&self, arch_reg: RegisterType) -> Option<u16> {
        self.table[arch_reg as usize]
    }

    pub(crate) fn set(&mut self, arch_reg: RegisterType, rob_index: u16) {
        self.table[arch_reg as usize] = Some(rob_index);
    }

    pub(crate) fn clear(&mut self, arch_reg: RegisterType) {
        self.table[arch_reg as usize] = None;
    }
}

/// The Reservation Station Table: maps an ROB slot to the reservation station
/// that produces its result. Issue consults it to find out which station a
/// not-yet-ready operand will arrive from.
pub(crate) struct RST {
    table: Vec<Option<u16>>,
}

impl RST {
    pub(crate) fn new(rob_capacity: u16) -> Self {
        let mut table = Vec::with_capacity(rob_capacity as usize);
        for _ in 0..rob_capacity {
            table.push(None);
        }
        Self { table }
    }

    // Callers must only look up slots for which a producer was recorded; a
    // miss is a scheduler bug, not a runtime condition.
    pub(crate) fn get(&self, rob_index: u16) -> u16 {
        self.table[rob_index as usize]
            .unwrap_or_else(|| panic!("RST: no producing RS recorded for ROB slot {}", rob_index))
    }

    pub(crate) fn set(&mut self, rob_index: u16, rs_index: u16) {
        self.table[rob_index as usize] = Some(rs_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rat_set_get_clear() {
        let mut rat = RAT::new(32);
        assert_eq!(rat.get(5), None);

        rat.set(5, 3);
        assert_eq!(rat.get(5), Some(3));

        rat.clear(5);
        assert_eq!(rat.get(5), None);
    }

    #[test]
    fn test_rat_shadowed_mapping_survives_older_commit() {
        let mut rat = RAT::new(32);

        // older producer of x5 at ROB slot 3, then a renaming to slot 7
        rat.set(5, 3);
        rat.set(5, 7);

        // the older producer commits; the guard must leave the newer mapping
        if rat.get(5) == Some(3) {
            rat.clear(5);
        }
        assert_eq!(rat.get(5), Some(7));

        // the newer producer commits; now the mapping clears
        if rat.get(5) == Some(7) {
            rat.clear(5);
        }
        assert_eq!(rat.get(5), None);
    }

    #[test]
    fn test_rst_roundtrip() {
        let mut rst = RST::new(16);
        rst.set(4, 2);
        assert_eq!(rst.get(4), 2);
    }

    #[test]
    #[should_panic(expected = "no producing RS")]
    fn test_rst_miss_panics() {
        let rst = RST::new(16);
        rst.get(4);
    }
}

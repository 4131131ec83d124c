use std::cell::RefCell;
use std::rc::Rc;

use crate::cpu::CPUConfig;
use crate::instructions::instructions::{FUType, Instr, Opcode, WordType, FU_TYPE_CNT};
use crate::memory_subsystem::memory_subsystem::MemorySubsystem;

pub(crate) struct FUOutput {
    pub(crate) result: WordType,
    pub(crate) rob_index: u16,
    pub(crate) rs_index: u16,
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum FUState {
    IDLE,
    EXECUTING,
    COMPLETED,
}

// Occupancy and latency bookkeeping shared by all unit categories.
struct FUSlot {
    state: FUState,
    instr: Option<Rc<Instr>>,
    rob_index: u16,
    rs_index: u16,
    op1: WordType,
    op2: WordType,
    cycles_remaining: u8,
    result: WordType,
}

impl FUSlot {
    fn new() -> Self {
        Self {
            state: FUState::IDLE,
            instr: None,
            rob_index: 0,
            rs_index: 0,
            op1: 0,
            op2: 0,
            cycles_remaining: 0,
            result: 0,
        }
    }

    fn issue(
        &mut self,
        instr: Rc<Instr>,
        rob_index: u16,
        rs_index: u16,
        op1: WordType,
        op2: WordType,
        latency: u8,
    ) {
        debug_assert!(self.state == FUState::IDLE, "FU: issue to a busy unit");
        debug_assert!(latency > 0, "FU: latency must be at least one cycle");

        self.state = FUState::EXECUTING;
        self.instr = Some(instr);
        self.rob_index = rob_index;
        self.rs_index = rs_index;
        self.op1 = op1;
        self.op2 = op2;
        self.cycles_remaining = latency;
    }

    // Burns one cycle of latency; returns true on the completing cycle.
    fn countdown(&mut self) -> bool {
        if self.state != FUState::EXECUTING {
            return false;
        }

        self.cycles_remaining -= 1;
        if self.cycles_remaining > 0 {
            return false;
        }

        self.state = FUState::COMPLETED;
        true
    }

    fn output(&self) -> FUOutput {
        debug_assert!(self.state == FUState::COMPLETED, "FU: output of an unfinished unit");
        FUOutput { result: self.result, rob_index: self.rob_index, rs_index: self.rs_index }
    }

    fn clear(&mut self) {
        self.state = FUState::IDLE;
        self.instr = None;
        self.cycles_remaining = 0;
    }
}

/// The capability contract every functional unit category offers to the
/// scheduler. The scheduler treats units opaquely: it advances them, drains
/// the first completed one onto the CDB, and issues ready instructions to an
/// idle unit of the matching category.
pub(crate) trait FunctionalUnit {
    fn busy(&self) -> bool;
    fn issue(&mut self, instr: Rc<Instr>, rob_index: u16, rs_index: u16, op1: WordType, op2: WordType);
    fn execute(&mut self);
    fn done(&self) -> bool;
    fn get_output(&self) -> FUOutput;
    fn clear(&mut self);
}

struct ALU {
    latency: u8,
    slot: FUSlot,
}

impl ALU {
    fn new(latency: u8) -> Self {
        Self { latency, slot: FUSlot::new() }
    }

    fn compute(instr: &Instr, op1: WordType, op2: WordType) -> WordType {
        let imm = instr.imm as WordType;
        match instr.opcode {
            Opcode::ADD => op1.wrapping_add(op2),
            Opcode::SUB => op1.wrapping_sub(op2),
            Opcode::AND => op1 & op2,
            Opcode::OR => op1 | op2,
            Opcode::XOR => op1 ^ op2,
            Opcode::ADDI => op1.wrapping_add(imm),
            Opcode::ANDI => op1 & imm,
            Opcode::ORI => op1 | imm,
            Opcode::XORI => op1 ^ imm,
            Opcode::LI => imm,
            Opcode::MV => op1,
            Opcode::PRINTR => {
                println!("PRINTR x{}={}", instr.rs1, op1);
                0
            }
            Opcode::NOP | Opcode::ECALL => 0,
            _ => unreachable!("Opcode {:?} is not an ALU operation", instr.opcode),
        }
    }
}

impl FunctionalUnit for ALU {
    fn busy(&self) -> bool {
        self.slot.state != FUState::IDLE
    }

    fn issue(&mut self, instr: Rc<Instr>, rob_index: u16, rs_index: u16, op1: WordType, op2: WordType) {
        self.slot.issue(instr, rob_index, rs_index, op1, op2, self.latency);
    }

    fn execute(&mut self) {
        if self.slot.countdown() {
            let instr = self.slot.instr.as_ref().unwrap();
            self.slot.result = Self::compute(instr, self.slot.op1, self.slot.op2);
        }
    }

    fn done(&self) -> bool {
        self.slot.state == FUState::COMPLETED
    }

    fn get_output(&self) -> FUOutput {
        self.slot.output()
    }

    fn clear(&mut self) {
        self.slot.clear();
    }
}

/// Multiply/divide unit. Division follows the RISC-V convention: division by
/// zero yields all ones (remainder: the dividend) instead of trapping.
struct MDU {
    latency: u8,
    slot: FUSlot,
}

impl MDU {
    fn new(latency: u8) -> Self {
        Self { latency, slot: FUSlot::new() }
    }

    fn compute(instr: &Instr, op1: WordType, op2: WordType) -> WordType {
        match instr.opcode {
            Opcode::MUL => op1.wrapping_mul(op2),
            Opcode::DIV => {
                if op2 == 0 {
                    WordType::MAX
                } else {
                    (op1 as i32).wrapping_div(op2 as i32) as WordType
                }
            }
            Opcode::REM => {
                if op2 == 0 {
                    op1
                } else {
                    (op1 as i32).wrapping_rem(op2 as i32) as WordType
                }
            }
            _ => unreachable!("Opcode {:?} is not an MDU operation", instr.opcode),
        }
    }
}

impl FunctionalUnit for MDU {
    fn busy(&self) -> bool {
        self.slot.state != FUState::IDLE
    }

    fn issue(&mut self, instr: Rc<Instr>, rob_index: u16, rs_index: u16, op1: WordType, op2: WordType) {
        self.slot.issue(instr, rob_index, rs_index, op1, op2, self.latency);
    }

    fn execute(&mut self) {
        if self.slot.countdown() {
            let instr = self.slot.instr.as_ref().unwrap();
            self.slot.result = Self::compute(instr, self.slot.op1, self.slot.op2);
        }
    }

    fn done(&self) -> bool {
        self.slot.state == FUState::COMPLETED
    }

    fn get_output(&self) -> FUOutput {
        self.slot.output()
    }

    fn clear(&mut self) {
        self.slot.clear();
    }
}

/// Load/store unit. The memory access happens on the completing cycle; a
/// store writes through immediately since nothing retires speculatively.
struct LSU {
    latency: u8,
    slot: FUSlot,
    memory_subsystem: Rc<RefCell<MemorySubsystem>>,
}

impl LSU {
    fn new(latency: u8, memory_subsystem: Rc<RefCell<MemorySubsystem>>) -> Self {
        Self { latency, slot: FUSlot::new(), memory_subsystem }
    }
}

impl FunctionalUnit for LSU {
    fn busy(&self) -> bool {
        self.slot.state != FUState::IDLE
    }

    fn issue(&mut self, instr: Rc<Instr>, rob_index: u16, rs_index: u16, op1: WordType, op2: WordType) {
        self.slot.issue(instr, rob_index, rs_index, op1, op2, self.latency);
    }

    fn execute(&mut self) {
        if !self.slot.countdown() {
            return;
        }

        let instr = self.slot.instr.as_ref().unwrap();
        // word addressed; the offset is in words as well
        let addr = self.slot.op1.wrapping_add(instr.imm as WordType) as usize;
        let mut memory_subsystem = self.memory_subsystem.borrow_mut();

        self.slot.result = match instr.opcode {
            Opcode::LW => memory_subsystem.memory[addr],
            Opcode::SW => {
                memory_subsystem.memory[addr] = self.slot.op2;
                self.slot.op2
            }
            _ => unreachable!("Opcode {:?} is not an LSU operation", instr.opcode),
        };
    }

    fn done(&self) -> bool {
        self.slot.state == FUState::COMPLETED
    }

    fn get_output(&self) -> FUOutput {
        self.slot.output()
    }

    fn clear(&mut self) {
        self.slot.clear();
    }
}

/// The bank of functional units, one instance per category, indexed by
/// [`FUType`]. The iteration order over the bank is the CDB arbitration
/// priority and must stay fixed.
pub(crate) struct FUTable {
    units: Vec<Box<dyn FunctionalUnit>>,
}

impl FUTable {
    pub(crate) fn new(
        cpu_config: &CPUConfig,
        memory_subsystem: Rc<RefCell<MemorySubsystem>>,
    ) -> FUTable {
        let units: Vec<Box<dyn FunctionalUnit>> = vec![
            Box::new(ALU::new(cpu_config.alu_latency)),
            Box::new(MDU::new(cpu_config.mdu_latency)),
            Box::new(LSU::new(cpu_config.lsu_latency, memory_subsystem)),
        ];
        debug_assert!(units.len() == FU_TYPE_CNT);

        FUTable { units }
    }

    pub(crate) fn unit_mut(&mut self, fu_type: FUType) -> &mut dyn FunctionalUnit {
        &mut *self.units[fu_type as usize]
    }

    pub(crate) fn units_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn FunctionalUnit>> {
        self.units.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(opcode: Opcode, imm: i32) -> Rc<Instr> {
        Rc::new(Instr::new(opcode, 1, 2, 3, imm, None))
    }

    #[test]
    fn test_alu_completes_after_latency() {
        let mut alu = ALU::new(2);
        alu.issue(instr(Opcode::ADD, 0), 0, 0, 20, 22);
        assert!(alu.busy());
        assert!(!alu.done());

        alu.execute();
        assert!(!alu.done());

        alu.execute();
        assert!(alu.done());
        assert_eq!(alu.get_output().result, 42);

        alu.clear();
        assert!(!alu.busy());
    }

    #[test]
    fn test_mdu_div_by_zero() {
        let mut mdu = MDU::new(1);
        mdu.issue(instr(Opcode::DIV, 0), 0, 0, 100, 0);
        mdu.execute();
        assert_eq!(mdu.get_output().result, WordType::MAX);
    }

    #[test]
    fn test_lsu_store_then_load() {
        let memory_subsystem = Rc::new(RefCell::new(MemorySubsystem::new(&CPUConfig::default())));
        let mut lsu = LSU::new(1, Rc::clone(&memory_subsystem));

        lsu.issue(instr(Opcode::SW, 3), 0, 0, 2, 99);
        lsu.execute();
        assert_eq!(lsu.get_output().result, 99);
        assert_eq!(memory_subsystem.borrow().memory[5], 99);
        lsu.clear();

        lsu.issue(instr(Opcode::LW, 3), 1, 1, 2, 0);
        lsu.execute();
        assert_eq!(lsu.get_output().result, 99);
    }
}

use std::cell::RefCell;
use std::rc::Rc;

use crate::backend::common_data_bus::CDB;
use crate::backend::functional_unit::FUTable;
use crate::backend::register_alias_table::{RAT, RST};
use crate::backend::reorder_buffer::ROB;
use crate::backend::reservation_station::{Operand, RSTable};
use crate::cpu::{ArchRegFile, CPUConfig, PerfCounters, Trace};
use crate::instructions::instructions::{InstrQueue, RegisterType, GENERAL_ARCH_REG_CNT};
use crate::memory_subsystem::memory_subsystem::MemorySubsystem;

/// The out of order scheduling core: issue, execute, writeback and commit,
/// and the renaming/completion structures they coordinate. The owning CPU
/// invokes the four stage entry points once per cycle, in that order.
pub(crate) struct Backend {
    instr_queue: Rc<RefCell<InstrQueue>>,
    arch_reg_file: Rc<RefCell<ArchRegFile>>,
    rs_table: RSTable,
    rat: RAT,
    rst: RST,
    rob: ROB,
    cdb: CDB,
    fu_table: FUTable,
    trace: Trace,
    perf_counters: Rc<RefCell<PerfCounters>>,
    pub(crate) exited: bool,
}

impl Backend {
    pub(crate) fn new(
        cpu_config: &CPUConfig,
        instr_queue: Rc<RefCell<InstrQueue>>,
        memory_subsystem: Rc<RefCell<MemorySubsystem>>,
        arch_reg_file: Rc<RefCell<ArchRegFile>>,
        perf_counters: Rc<RefCell<PerfCounters>>,
    ) -> Backend {
        Backend {
            trace: cpu_config.trace.clone(),
            instr_queue,
            arch_reg_file,
            rs_table: RSTable::new(cpu_config.rs_count),
            rat: RAT::new(GENERAL_ARCH_REG_CNT),
            rst: RST::new(cpu_config.rob_capacity),
            rob: ROB::new(cpu_config.rob_capacity),
            cdb: CDB::new(),
            fu_table: FUTable::new(cpu_config, memory_subsystem),
            perf_counters,
            exited: false,
        }
    }

    /// Pulls the next instruction from the instruction queue, resolves its
    /// source operands against the register file or in flight ROB entries,
    /// and allocates an ROB slot and a reservation station. On a structural
    /// hazard (ROB or RS table full) the instruction stays queued and issue
    /// is retried next cycle.
    pub(crate) fn issue(&mut self) {
        let mut instr_queue = self.instr_queue.borrow_mut();
        if instr_queue.is_empty() {
            return;
        }

        if self.rs_table.is_full() || self.rob.is_full() {
            return;
        }

        let instr = instr_queue.peek();
        let exe_flags = instr.exe_flags;

        // Operand resolution happens before the destination is renamed, so an
        // instruction reading and writing the same register sees the old
        // producer.
        let rs1 = self.resolve_operand(exe_flags.use_rs1, instr.rs1);
        let rs2 = self.resolve_operand(exe_flags.use_rs2, instr.rs2);

        let rob_index = self.rob.allocate(Rc::clone(&instr));

        if exe_flags.use_rd {
            self.rat.set(instr.rd, rob_index);
        }

        let rs_index = self.rs_table.issue(rob_index, rs1, rs2, Rc::clone(&instr));

        if exe_flags.use_rd {
            self.rst.set(rob_index, rs_index);
        }

        if self.trace.issue {
            println!("Issue: [{}]", instr);
        }
        self.perf_counters.borrow_mut().issue_cnt += 1;

        instr_queue.dequeue();
    }

    // An unused operand resolves to a constant zero so the reservation
    // station never waits on it.
    fn resolve_operand(&self, used: bool, reg: RegisterType) -> Operand {
        if !used {
            return Operand::Ready(0);
        }

        match self.rat.get(reg) {
            Some(rob_index) => {
                let rob_slot = self.rob.get(rob_index);
                if rob_slot.ready {
                    // the producer has completed but not committed; take the
                    // value straight from the ROB
                    Operand::Ready(rob_slot.result)
                } else {
                    Operand::Pending(self.rst.get(rob_index))
                }
            }
            None => Operand::Ready(self.arch_reg_file.borrow().get_value(reg)),
        }
    }

    /// Advances the functional units, drains at most one completed unit onto
    /// the CDB, and dispatches at most one ready reservation station entry
    /// into an idle functional unit of the matching category.
    pub(crate) fn execute(&mut self) {
        for fu in self.fu_table.units_mut() {
            fu.execute();
        }

        // CDB arbitration: the first completed unit in bank order wins the
        // bus; the others keep their result and retry next cycle.
        for fu in self.fu_table.units_mut() {
            if fu.done() && self.cdb.is_empty() {
                let output = fu.get_output();
                self.cdb.push(output.result, output.rob_index, output.rs_index);
                fu.clear();
                break;
            }
        }

        // Dispatch in slot index order; the scan order is the priority
        // between simultaneously ready entries.
        for rs_index in 0..self.rs_table.capacity {
            let entry = self.rs_table.get(rs_index);
            if !entry.valid || entry.running || !entry.operands_ready() {
                continue;
            }
            if self.rs_table.locked(rs_index) {
                continue;
            }

            let instr =
                Rc::clone(entry.instr.as_ref().expect("RS: valid entry without instruction"));
            let rob_index = entry.rob_index;
            let op1 = entry.rs1.value();
            let op2 = entry.rs2.value();

            let fu = self.fu_table.unit_mut(instr.fu_type);
            if fu.busy() {
                continue;
            }

            fu.issue(Rc::clone(&instr), rob_index, rs_index, op1, op2);
            self.rs_table.get_mut(rs_index).running = true;

            if self.trace.dispatch {
                println!("Dispatch: [{}]", instr);
            }
            self.perf_counters.borrow_mut().dispatch_cnt += 1;

            // only one instruction is dispatched per cycle
            break;
        }
    }

    /// Broadcasts the CDB payload to every waiting reservation station and to
    /// the ROB, frees the producing reservation station, and drains the bus.
    /// This is the only path by which an operand goes from pending to ready
    /// and an ROB entry becomes ready.
    pub(crate) fn writeback(&mut self) {
        if self.cdb.is_empty() {
            return;
        }

        let cdb_data = self.cdb.data();

        self.rs_table.broadcast(&cdb_data);
        self.rs_table.release(cdb_data.rs_index);
        self.rob.update(cdb_data.rob_index, cdb_data.result);
        self.cdb.clear();

        if self.trace.writeback {
            if let Some(instr) = &self.rob.get(cdb_data.rob_index).instr {
                println!("Writeback: [{}]", instr);
            }
        }
        self.perf_counters.borrow_mut().execute_cnt += 1;
    }

    /// Retires the ROB head if it is ready: writes the result to the register
    /// file, clears the register alias unless a younger renaming shadows it,
    /// and pops the entry. Strictly in order; a not-yet-ready head blocks
    /// every younger entry.
    pub(crate) fn commit(&mut self) {
        if self.rob.is_empty() {
            return;
        }

        let head_index = self.rob.head_index();
        let rob_head = self.rob.get(head_index);
        if !rob_head.ready {
            return;
        }

        let instr =
            Rc::clone(rob_head.instr.as_ref().expect("ROB: ready head without instruction"));
        let result = rob_head.result;
        let exe_flags = instr.exe_flags;

        if exe_flags.use_rd {
            self.arch_reg_file.borrow_mut().set_value(instr.rd, result);

            // A younger instruction may have renamed the register again; in
            // that case the alias belongs to that producer and must survive.
            if self.rat.get(instr.rd) == Some(head_index) {
                self.rat.clear(instr.rd);
            }
        }

        self.rob.pop();

        if self.trace.commit {
            println!("Commit: [{}]", instr);
        }

        let mut perf_counters = self.perf_counters.borrow_mut();
        perf_counters.retire_cnt += 1;
        assert!(
            perf_counters.retire_cnt <= perf_counters.fetch_cnt,
            "retired instruction count {} exceeds fetched count {} at [{}] (ROB index {})",
            perf_counters.retire_cnt,
            perf_counters.fetch_cnt,
            instr,
            head_index,
        );

        if exe_flags.is_exit {
            self.exited = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::instructions::{Instr, Opcode};

    struct TestCore {
        backend: Backend,
        instr_queue: Rc<RefCell<InstrQueue>>,
        arch_reg_file: Rc<RefCell<ArchRegFile>>,
        perf_counters: Rc<RefCell<PerfCounters>>,
    }

    impl TestCore {
        fn new(cpu_config: &CPUConfig) -> TestCore {
            let instr_queue =
                Rc::new(RefCell::new(InstrQueue::new(cpu_config.instr_queue_capacity)));
            let perf_counters = Rc::new(RefCell::new(PerfCounters::new()));
            let memory_subsystem = Rc::new(RefCell::new(MemorySubsystem::new(cpu_config)));
            let arch_reg_file = Rc::new(RefCell::new(ArchRegFile::new(GENERAL_ARCH_REG_CNT)));

            let backend = Backend::new(
                cpu_config,
                Rc::clone(&instr_queue),
                memory_subsystem,
                Rc::clone(&arch_reg_file),
                Rc::clone(&perf_counters),
            );

            TestCore { backend, instr_queue, arch_reg_file, perf_counters }
        }

        fn fetch(&mut self, instr: Instr) {
            self.instr_queue.borrow_mut().enqueue(Rc::new(instr));
            self.perf_counters.borrow_mut().fetch_cnt += 1;
        }

        fn cycle(&mut self) {
            self.backend.issue();
            self.backend.execute();
            self.backend.writeback();
            self.backend.commit();
        }

        fn reg(&self, reg: RegisterType) -> u32 {
            self.arch_reg_file.borrow().get_value(reg)
        }

        fn retired(&self) -> u64 {
            self.perf_counters.borrow().retire_cnt
        }
    }

    fn li(rd: u16, imm: i32) -> Instr {
        Instr::new(Opcode::LI, rd, 0, 0, imm, None)
    }

    fn add(rd: u16, rs1: u16, rs2: u16) -> Instr {
        Instr::new(Opcode::ADD, rd, rs1, rs2, 0, None)
    }

    fn mul(rd: u16, rs1: u16, rs2: u16) -> Instr {
        Instr::new(Opcode::MUL, rd, rs1, rs2, 0, None)
    }

    fn ecall() -> Instr {
        Instr::new(Opcode::ECALL, 0, 0, 0, 0, None)
    }

    #[test]
    fn test_stages_are_noops_on_an_empty_core() {
        let mut core = TestCore::new(&CPUConfig::default());

        for _ in 0..4 {
            core.cycle();
        }

        let perf_counters = core.perf_counters.borrow();
        assert_eq!(perf_counters.issue_cnt, 0);
        assert_eq!(perf_counters.dispatch_cnt, 0);
        assert_eq!(perf_counters.execute_cnt, 0);
        assert_eq!(perf_counters.retire_cnt, 0);
        assert!(!core.backend.exited);
    }

    #[test]
    fn test_issue_defers_when_rob_is_full() {
        let mut cpu_config = CPUConfig::default();
        cpu_config.rob_capacity = 1;
        let mut core = TestCore::new(&cpu_config);

        core.fetch(li(1, 10));
        core.fetch(li(2, 20));

        // cycle 1: the first instruction takes the only ROB slot
        core.cycle();
        assert_eq!(core.perf_counters.borrow().issue_cnt, 1);
        assert_eq!(core.instr_queue.borrow().size(), 1);

        // cycle 2: the ROB is full; the second instruction stays queued while
        // the first completes and retires
        core.cycle();
        assert_eq!(core.perf_counters.borrow().issue_cnt, 1);
        assert_eq!(core.instr_queue.borrow().size(), 1);
        assert_eq!(core.retired(), 1);
        assert_eq!(core.reg(1), 10);

        // cycle 3: the freed slot lets the deferred instruction through
        core.cycle();
        assert_eq!(core.perf_counters.borrow().issue_cnt, 2);
        assert!(core.instr_queue.borrow().is_empty());

        core.cycle();
        assert_eq!(core.reg(2), 20);
    }

    #[test]
    fn test_single_cdb_broadcast_per_cycle() {
        let mut cpu_config = CPUConfig::default();
        cpu_config.mdu_latency = 2;
        let mut core = TestCore::new(&cpu_config);

        core.fetch(li(1, 6));
        core.cycle();
        core.cycle();
        core.cycle();
        assert_eq!(core.retired(), 1);

        // mul occupies the MDU for 2 cycles, the add issued one cycle later
        // completes in the same cycle: both are done simultaneously.
        core.fetch(mul(2, 1, 1));
        core.fetch(add(3, 1, 1));

        core.cycle(); // issue + dispatch mul
        core.cycle(); // issue + dispatch add; mul at 1 cycle remaining

        // both units complete; the ALU is first in bank order and wins the
        // bus, but the mul at the ROB head blocks the add from retiring
        core.cycle();
        assert_eq!(core.perf_counters.borrow().execute_cnt, 2);
        assert_eq!(core.retired(), 1);

        // the MDU result is drained one cycle later, then both commit in
        // program order
        core.cycle();
        assert_eq!(core.perf_counters.borrow().execute_cnt, 3);
        assert_eq!(core.retired(), 2);
        assert_eq!(core.reg(2), 36);

        core.cycle();
        assert_eq!(core.retired(), 3);
        assert_eq!(core.reg(3), 12);
    }

    #[test]
    fn test_pending_operand_wakes_up_via_broadcast() {
        let mut core = TestCore::new(&CPUConfig::default());

        core.fetch(li(1, 5));
        core.fetch(add(2, 1, 1));

        // the add issues while the li is still executing, so it must wait on
        // the producing reservation station rather than read a stale x1
        core.cycle();
        core.cycle();

        while core.retired() < 2 {
            core.cycle();
        }
        assert_eq!(core.reg(2), 10);
    }

    #[test]
    fn test_operand_read_from_completed_rob_entry() {
        let mut cpu_config = CPUConfig::default();
        cpu_config.mdu_latency = 4;
        let mut core = TestCore::new(&cpu_config);

        core.fetch(li(1, 3));
        core.cycle();
        core.cycle();
        core.cycle();
        assert_eq!(core.retired(), 1);

        // the mul blocks the ROB head; the li behind it completes but cannot
        // commit. The fillers delay the consumer add by two cycles, so when
        // it issues, x2 is ready in the ROB and is read from there.
        core.fetch(mul(4, 1, 1));
        core.fetch(li(2, 7));
        core.fetch(li(7, 1));
        core.fetch(li(8, 1));
        core.fetch(add(3, 2, 2));

        while core.retired() < 6 {
            core.cycle();
        }
        assert_eq!(core.reg(4), 9);
        assert_eq!(core.reg(2), 7);
        assert_eq!(core.reg(3), 14);
    }

    #[test]
    fn test_commit_in_program_order() {
        let mut cpu_config = CPUConfig::default();
        cpu_config.mdu_latency = 4;
        let mut core = TestCore::new(&cpu_config);

        core.fetch(li(1, 2));
        core.cycle();
        core.cycle();
        core.cycle();

        core.fetch(mul(2, 1, 1)); // slow, at the head
        core.fetch(li(3, 9)); // fast, completes first

        let mut retired_before_mul = core.retired();
        for _ in 0..3 {
            core.cycle();
            // nothing may retire while the mul blocks the head
            assert_eq!(core.retired(), retired_before_mul);
        }

        while core.retired() < 3 {
            core.cycle();
        }
        retired_before_mul += 2;
        assert_eq!(core.retired(), retired_before_mul);
        assert_eq!(core.reg(2), 4);
        assert_eq!(core.reg(3), 9);
    }

    #[test]
    fn test_shadowed_rename_survives_older_commit() {
        let mut cpu_config = CPUConfig::default();
        cpu_config.mdu_latency = 4;
        let mut core = TestCore::new(&cpu_config);

        core.fetch(li(1, 2));
        core.cycle();
        core.cycle();
        core.cycle();

        // x5 is renamed twice before the first producer commits; the second
        // producer's mapping must survive the first commit, and a consumer
        // issued after both must see the second value
        core.fetch(mul(5, 1, 1)); // x5 = 4, slow
        core.fetch(li(5, 100)); // x5 = 100, fast
        core.fetch(add(6, 5, 5));

        while core.retired() < 4 {
            core.cycle();
        }
        assert_eq!(core.reg(5), 100);
        assert_eq!(core.reg(6), 200);
    }

    #[test]
    fn test_exit_instruction_sets_exited_once_retired() {
        let mut core = TestCore::new(&CPUConfig::default());

        core.fetch(li(1, 1));
        core.fetch(ecall());

        while !core.backend.exited {
            core.cycle();
        }
        assert_eq!(core.retired(), 2);

        // the flag stays set
        core.cycle();
        assert!(core.backend.exited);
    }
}

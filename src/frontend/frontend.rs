use std::cell::RefCell;
use std::rc::Rc;

use crate::cpu::{CPUConfig, PerfCounters, Trace};
use crate::instructions::instructions::{InstrQueue, Program, PROGRAM_EXIT};

/// Fetches one decoded instruction per cycle into the instruction queue.
/// When the program counter runs past the end of the code an exit
/// instruction is synthesized; fetching stops after an exit.
pub(crate) struct Frontend {
    instr_queue: Rc<RefCell<InstrQueue>>,
    program_option: Option<Rc<Program>>,
    pc: usize,
    trace: Trace,
    exit: bool,
    perf_counters: Rc<RefCell<PerfCounters>>,
}

impl Frontend {
    pub(crate) fn new(
        cpu_config: &CPUConfig,
        instr_queue: Rc<RefCell<InstrQueue>>,
        perf_counters: Rc<RefCell<PerfCounters>>,
    ) -> Frontend {
        Frontend {
            instr_queue,
            program_option: None,
            pc: 0,
            trace: cpu_config.trace.clone(),
            exit: false,
            perf_counters,
        }
    }

    pub(crate) fn init(&mut self, program: &Rc<Program>) {
        self.program_option = Some(Rc::clone(program));
        self.pc = 0;
        self.exit = false;
    }

    pub(crate) fn do_cycle(&mut self) {
        let program = match &self.program_option {
            None => return,
            Some(program) => program,
        };

        if self.exit {
            return;
        }

        let mut instr_queue = self.instr_queue.borrow_mut();
        if instr_queue.is_full() {
            return;
        }

        let instr = if self.pc == program.code.len() {
            Rc::new(PROGRAM_EXIT)
        } else {
            program.get_instr(self.pc)
        };

        if self.trace.fetch {
            println!("Fetch: [{}]", instr);
        }

        if instr.exe_flags.is_exit {
            self.exit = true;
        }

        instr_queue.enqueue(instr);
        self.pc += 1;
        self.perf_counters.borrow_mut().fetch_cnt += 1;
    }
}

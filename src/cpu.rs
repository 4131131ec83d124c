use std::cell::RefCell;
use std::error::Error;
use std::fs::File;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::backend::backend::Backend;
use crate::frontend::frontend::Frontend;
use crate::instructions::instructions::{
    InstrQueue, Program, RegisterType, WordType, GENERAL_ARCH_REG_CNT,
};
use crate::memory_subsystem::memory_subsystem::MemorySubsystem;

pub(crate) struct PerfCounters {
    pub(crate) fetch_cnt: u64,
    pub(crate) issue_cnt: u64,
    pub(crate) dispatch_cnt: u64,
    pub(crate) execute_cnt: u64,
    pub(crate) retire_cnt: u64,
    pub(crate) cycle_cnt: u64,
}

impl PerfCounters {
    pub(crate) fn new() -> Self {
        Self {
            fetch_cnt: 0,
            issue_cnt: 0,
            dispatch_cnt: 0,
            execute_cnt: 0,
            retire_cnt: 0,
            cycle_cnt: 0,
        }
    }
}

#[derive(Clone, Deserialize, Debug, Default)]
pub(crate) struct Trace {
    pub(crate) fetch: bool,
    pub(crate) issue: bool,
    pub(crate) dispatch: bool,
    pub(crate) writeback: bool,
    pub(crate) commit: bool,
    pub(crate) cycle: bool,
}

#[derive(Clone, Deserialize, Debug)]
pub(crate) struct CPUConfig {
    // the size of the instruction queue between frontend and backend
    pub(crate) instr_queue_capacity: u16,
    // the frequency of the CPU in Hz; 0 runs unthrottled
    pub(crate) frequency_hz: u64,
    // the number of reservation stations
    pub(crate) rs_count: u16,
    // the size of the memory in machine words
    pub(crate) memory_size: u32,
    // the capacity of the reorder buffer
    pub(crate) rob_capacity: u16,
    // per functional-unit execution latencies in cycles
    pub(crate) alu_latency: u8,
    pub(crate) mdu_latency: u8,
    pub(crate) lsu_latency: u8,
    // if processing of a single instruction should be traced (printed)
    pub(crate) trace: Trace,
}

impl Default for CPUConfig {
    fn default() -> Self {
        CPUConfig {
            instr_queue_capacity: 8,
            frequency_hz: 0,
            rs_count: 8,
            memory_size: 128,
            rob_capacity: 16,
            alu_latency: 1,
            mdu_latency: 3,
            lsu_latency: 2,
            trace: Trace::default(),
        }
    }
}

pub(crate) fn load_cpu_config(file_path: &str) -> Result<CPUConfig, Box<dyn Error>> {
    let file = File::open(file_path)?;
    let config = serde_yaml::from_reader(file)?;
    Ok(config)
}

struct ArchRegEntry {
    value: WordType,
}

/// The architectural register file. It has no hazard logic of its own: it is
/// read at issue and written at commit, and register x0 is hardwired to zero.
pub(crate) struct ArchRegFile {
    entries: Vec<ArchRegEntry>,
}

impl ArchRegFile {
    pub(crate) fn new(reg_count: u16) -> ArchRegFile {
        let mut entries = Vec::with_capacity(reg_count as usize);
        for _ in 0..reg_count {
            entries.push(ArchRegEntry { value: 0 });
        }

        ArchRegFile { entries }
    }

    pub(crate) fn get_value(&self, reg: RegisterType) -> WordType {
        self.entries[reg as usize].value
    }

    pub(crate) fn set_value(&mut self, reg: RegisterType, value: WordType) {
        if reg == 0 {
            return;
        }
        self.entries[reg as usize].value = value;
    }
}

pub(crate) struct CPU {
    backend: Backend,
    frontend: Frontend,
    pub(crate) memory_subsystem: Rc<RefCell<MemorySubsystem>>,
    pub(crate) arch_reg_file: Rc<RefCell<ArchRegFile>>,
    cycle_period: Duration,
    trace: Trace,
    perf_counters: Rc<RefCell<PerfCounters>>,
}

impl CPU {
    pub(crate) fn new(cpu_config: &CPUConfig) -> CPU {
        let instr_queue = Rc::new(RefCell::new(InstrQueue::new(cpu_config.instr_queue_capacity)));

        let perf_counters = Rc::new(RefCell::new(PerfCounters::new()));

        let memory_subsystem = Rc::new(RefCell::new(MemorySubsystem::new(cpu_config)));

        let arch_reg_file = Rc::new(RefCell::new(ArchRegFile::new(GENERAL_ARCH_REG_CNT)));

        let backend = Backend::new(
            cpu_config,
            Rc::clone(&instr_queue),
            Rc::clone(&memory_subsystem),
            Rc::clone(&arch_reg_file),
            Rc::clone(&perf_counters),
        );

        let frontend = Frontend::new(
            cpu_config,
            Rc::clone(&instr_queue),
            Rc::clone(&perf_counters),
        );

        let cycle_period = if cpu_config.frequency_hz == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(1_000_000 / cpu_config.frequency_hz)
        };

        CPU {
            backend,
            frontend,
            memory_subsystem,
            arch_reg_file,
            cycle_period,
            trace: cpu_config.trace.clone(),
            perf_counters,
        }
    }

    pub(crate) fn run(&mut self, program: &Rc<Program>) {
        self.frontend.init(program);
        self.memory_subsystem.borrow_mut().init(program);

        while !self.backend.exited {
            self.perf_counters.borrow_mut().cycle_cnt += 1;

            if self.trace.cycle {
                let perf_counters = self.perf_counters.borrow();
                println!(
                    "[Cycles:{}][Fetched={}][Issued={}][Dispatched={}][Executed={}][Retired={}][IPC={:.2}]",
                    perf_counters.cycle_cnt,
                    perf_counters.fetch_cnt,
                    perf_counters.issue_cnt,
                    perf_counters.dispatch_cnt,
                    perf_counters.execute_cnt,
                    perf_counters.retire_cnt,
                    perf_counters.retire_cnt as f32 / perf_counters.cycle_cnt as f32,
                );
            }

            self.frontend.do_cycle();

            // The stage order within a cycle is part of the scheduling contract.
            self.backend.issue();
            self.backend.execute();
            self.backend.writeback();
            self.backend.commit();

            if !self.cycle_period.is_zero() {
                thread::sleep(self.cycle_period);
            }
        }

        let perf_counters = self.perf_counters.borrow();
        println!(
            "Program complete! [Cycles={}][Retired={}][IPC={:.2}]",
            perf_counters.cycle_cnt,
            perf_counters.retire_cnt,
            perf_counters.retire_cnt as f32 / perf_counters.cycle_cnt as f32,
        );
    }
}

use std::rc::Rc;

use crate::cpu::CPUConfig;
use crate::instructions::instructions::{Program, WordType};

/// Word addressed main memory. Loads and stores are performed directly by the
/// load/store unit; there is no store buffer because the core never
/// speculates, so a completed store is final.
pub(crate) struct MemorySubsystem {
    pub(crate) memory: Vec<WordType>,
}

impl MemorySubsystem {
    pub(crate) fn new(cpu_config: &CPUConfig) -> MemorySubsystem {
        let mut memory = Vec::with_capacity(cpu_config.memory_size as usize);
        for _ in 0..cpu_config.memory_size {
            memory.push(0);
        }

        MemorySubsystem { memory }
    }

    pub(crate) fn init(&mut self, program: &Rc<Program>) {
        for k in 0..self.memory.len() {
            self.memory[k] = 0;
        }

        for data in program.data_items.values() {
            self.memory[data.offset as usize] = data.value;
        }
    }
}

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub(crate) type RegisterType = u16;
pub(crate) type WordType = u32;

pub(crate) const GENERAL_ARCH_REG_CNT: u16 = 32;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SourceLocation {
    pub(crate) line: usize,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub(crate) enum Opcode {
    ADD,
    SUB,
    AND,
    OR,
    XOR,
    ADDI,
    ANDI,
    ORI,
    XORI,
    LI,
    MV,
    MUL,
    DIV,
    REM,
    LW,
    SW,
    NOP,
    PRINTR,
    ECALL,
}

/// The functional unit category an instruction is scheduled on. The
/// discriminant doubles as the index into the functional unit table, so the
/// declaration order is also the CDB arbitration priority.
#[derive(Clone, Copy, PartialEq, Debug)]
pub(crate) enum FUType {
    ALU = 0,
    MDU = 1,
    LSU = 2,
}

pub(crate) const FU_TYPE_CNT: usize = 3;

#[derive(Clone, Copy, Debug)]
pub(crate) struct ExeFlags {
    pub(crate) use_rs1: bool,
    pub(crate) use_rs2: bool,
    pub(crate) use_rd: bool,
    pub(crate) is_exit: bool,
}

pub(crate) fn mnemonic(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::ADD => "add",
        Opcode::SUB => "sub",
        Opcode::AND => "and",
        Opcode::OR => "or",
        Opcode::XOR => "xor",
        Opcode::ADDI => "addi",
        Opcode::ANDI => "andi",
        Opcode::ORI => "ori",
        Opcode::XORI => "xori",
        Opcode::LI => "li",
        Opcode::MV => "mv",
        Opcode::MUL => "mul",
        Opcode::DIV => "div",
        Opcode::REM => "rem",
        Opcode::LW => "lw",
        Opcode::SW => "sw",
        Opcode::NOP => "nop",
        Opcode::PRINTR => "printr",
        Opcode::ECALL => "ecall",
    }
}

pub(crate) fn get_opcode(mnemonic: &str) -> Option<Opcode> {
    match mnemonic.to_lowercase().as_str() {
        "add" => Some(Opcode::ADD),
        "sub" => Some(Opcode::SUB),
        "and" => Some(Opcode::AND),
        "or" => Some(Opcode::OR),
        "xor" => Some(Opcode::XOR),
        "addi" => Some(Opcode::ADDI),
        "andi" => Some(Opcode::ANDI),
        "ori" => Some(Opcode::ORI),
        "xori" => Some(Opcode::XORI),
        "li" => Some(Opcode::LI),
        "mv" => Some(Opcode::MV),
        "mul" => Some(Opcode::MUL),
        "div" => Some(Opcode::DIV),
        "rem" => Some(Opcode::REM),
        "lw" => Some(Opcode::LW),
        "sw" => Some(Opcode::SW),
        "nop" => Some(Opcode::NOP),
        "printr" => Some(Opcode::PRINTR),
        "ecall" => Some(Opcode::ECALL),
        _ => None,
    }
}

pub(crate) fn get_register(name: &str) -> Option<RegisterType> {
    let name_lowercased = name.to_lowercase();

    if name_lowercased == "zero" {
        return Some(0);
    }

    let reg_name = name_lowercased.strip_prefix('x')?;
    let reg: RegisterType = reg_name.parse().ok()?;
    if reg >= GENERAL_ARCH_REG_CNT {
        return None;
    }
    Some(reg)
}

fn fu_type_of(opcode: Opcode) -> FUType {
    match opcode {
        Opcode::MUL | Opcode::DIV | Opcode::REM => FUType::MDU,
        Opcode::LW | Opcode::SW => FUType::LSU,
        _ => FUType::ALU,
    }
}

fn exe_flags_of(opcode: Opcode, rd: RegisterType) -> ExeFlags {
    let (use_rs1, use_rs2, writes_rd) = match opcode {
        Opcode::ADD
        | Opcode::SUB
        | Opcode::AND
        | Opcode::OR
        | Opcode::XOR
        | Opcode::MUL
        | Opcode::DIV
        | Opcode::REM => (true, true, true),
        Opcode::ADDI | Opcode::ANDI | Opcode::ORI | Opcode::XORI => (true, false, true),
        Opcode::LI => (false, false, true),
        Opcode::MV => (true, false, true),
        Opcode::LW => (true, false, true),
        Opcode::SW => (true, true, false),
        Opcode::PRINTR => (true, false, false),
        Opcode::NOP | Opcode::ECALL => (false, false, false),
    };

    ExeFlags {
        use_rs1,
        use_rs2,
        // x0 is hardwired to zero; an instruction sinking into it writes nothing.
        use_rd: writes_rd && rd != 0,
        is_exit: opcode == Opcode::ECALL,
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Instr {
    pub(crate) opcode: Opcode,
    pub(crate) rd: RegisterType,
    pub(crate) rs1: RegisterType,
    pub(crate) rs2: RegisterType,
    pub(crate) imm: i32,
    pub(crate) exe_flags: ExeFlags,
    pub(crate) fu_type: FUType,
    pub(crate) loc: Option<SourceLocation>,
}

impl Instr {
    pub(crate) fn new(
        opcode: Opcode,
        rd: RegisterType,
        rs1: RegisterType,
        rs2: RegisterType,
        imm: i32,
        loc: Option<SourceLocation>,
    ) -> Instr {
        Instr {
            opcode,
            rd,
            rs1,
            rs2,
            imm,
            exe_flags: exe_flags_of(opcode, rd),
            fu_type: fu_type_of(opcode),
            loc,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", mnemonic(self.opcode))?;

        match self.opcode {
            Opcode::ADD
            | Opcode::SUB
            | Opcode::AND
            | Opcode::OR
            | Opcode::XOR
            | Opcode::MUL
            | Opcode::DIV
            | Opcode::REM => write!(f, "x{},x{},x{}", self.rd, self.rs1, self.rs2)?,
            Opcode::ADDI | Opcode::ANDI | Opcode::ORI | Opcode::XORI => {
                write!(f, "x{},x{},{}", self.rd, self.rs1, self.imm)?
            }
            Opcode::LI => write!(f, "x{},{}", self.rd, self.imm)?,
            Opcode::MV => write!(f, "x{},x{}", self.rd, self.rs1)?,
            Opcode::LW => write!(f, "x{},{}(x{})", self.rd, self.imm, self.rs1)?,
            Opcode::SW => write!(f, "x{},{}(x{})", self.rs2, self.imm, self.rs1)?,
            Opcode::PRINTR => write!(f, "x{}", self.rs1)?,
            Opcode::NOP | Opcode::ECALL => {}
        }

        if let Some(loc) = self.loc {
            write!(f, " ; line {}", loc.line)?;
        }

        Ok(())
    }
}

pub(crate) const NOP: Instr = Instr {
    opcode: Opcode::NOP,
    rd: 0,
    rs1: 0,
    rs2: 0,
    imm: 0,
    exe_flags: ExeFlags { use_rs1: false, use_rs2: false, use_rd: false, is_exit: false },
    fu_type: FUType::ALU,
    loc: None,
};

// Synthesized by the frontend when the program runs off the end of the code.
pub(crate) const PROGRAM_EXIT: Instr = Instr {
    opcode: Opcode::ECALL,
    rd: 0,
    rs1: 0,
    rs2: 0,
    imm: 0,
    exe_flags: ExeFlags { use_rs1: false, use_rs2: false, use_rd: false, is_exit: true },
    fu_type: FUType::ALU,
    loc: None,
};

pub(crate) struct Data {
    pub(crate) value: WordType,
    pub(crate) offset: u64,
}

pub(crate) struct Program {
    pub(crate) data_items: HashMap<String, Rc<Data>>,
    pub(crate) code: Vec<Rc<Instr>>,
}

impl Program {
    pub(crate) fn get_instr(&self, pos: usize) -> Rc<Instr> {
        Rc::clone(&self.code[pos])
    }
}

// The InstrQueue sits between frontend and backend.
pub(crate) struct InstrQueue {
    capacity: u16,
    head: u64,
    tail: u64,
    instructions: Vec<Rc<Instr>>,
}

impl InstrQueue {
    pub(crate) fn new(capacity: u16) -> Self {
        let mut instructions = Vec::with_capacity(capacity as usize);
        for _ in 0..capacity {
            instructions.push(Rc::new(NOP));
        }

        InstrQueue { capacity, head: 0, tail: 0, instructions }
    }

    pub(crate) fn size(&self) -> u16 {
        (self.tail - self.head) as u16
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub(crate) fn is_full(&self) -> bool {
        self.size() == self.capacity
    }

    pub(crate) fn enqueue(&mut self, instr: Rc<Instr>) {
        assert!(!self.is_full(), "Can't enqueue when InstrQueue is full.");

        let index = (self.tail % self.capacity as u64) as usize;
        self.instructions[index] = instr;
        self.tail += 1;
    }

    pub(crate) fn dequeue(&mut self) {
        assert!(!self.is_empty(), "Can't dequeue when InstrQueue is empty.");
        self.head += 1;
    }

    pub(crate) fn peek(&self) -> Rc<Instr> {
        assert!(!self.is_empty(), "Can't peek when InstrQueue is empty.");

        let index = (self.head % self.capacity as u64) as usize;
        Rc::clone(&self.instructions[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instr_queue_fifo() {
        let mut queue = InstrQueue::new(2);
        assert!(queue.is_empty());

        queue.enqueue(Rc::new(Instr::new(Opcode::LI, 1, 0, 0, 10, None)));
        queue.enqueue(Rc::new(Instr::new(Opcode::LI, 2, 0, 0, 20, None)));
        assert!(queue.is_full());

        assert_eq!(queue.peek().rd, 1);
        queue.dequeue();
        assert_eq!(queue.peek().rd, 2);
        queue.dequeue();
        assert!(queue.is_empty());

        // head/tail are sequence numbers; the ring reuses slots after wrap.
        queue.enqueue(Rc::new(Instr::new(Opcode::LI, 3, 0, 0, 30, None)));
        assert_eq!(queue.peek().rd, 3);
    }

    #[test]
    fn test_rd_x0_does_not_write() {
        let instr = Instr::new(Opcode::ADD, 0, 1, 2, 0, None);
        assert!(!instr.exe_flags.use_rd);

        let instr = Instr::new(Opcode::ADD, 3, 1, 2, 0, None);
        assert!(instr.exe_flags.use_rd);
    }
}

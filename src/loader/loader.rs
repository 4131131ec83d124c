use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use log::debug;
use regex::Regex;

use crate::cpu::CPUConfig;
use crate::instructions::instructions::{
    get_opcode, get_register, Data, Instr, Opcode, Program, RegisterType, SourceLocation,
    WordType,
};

#[derive(Debug)]
pub(crate) enum LoadError {
    ParseError(String),
    AnalysisError(Vec<String>),
    NotFoundError(String),
    IOError(String),
}

#[derive(PartialEq)]
enum Section {
    Text,
    Data,
}

struct Loader {
    cpu_config: CPUConfig,
    code: Vec<Instr>,
    data_section: HashMap<String, Rc<Data>>,
    heap_size: u64,
    errors: Vec<String>,
}

impl Loader {
    fn load(&mut self, input: &str) -> Result<(), LoadError> {
        // first pass: the data section, so that 'la' can resolve variables
        // regardless of section order
        self.first_pass(input)?;

        // second pass: the instructions
        self.second_pass(input)?;

        if self.heap_size > self.cpu_config.memory_size as u64 {
            self.errors.push(format!(
                "Data section of {} words does not fit a memory of {} words",
                self.heap_size, self.cpu_config.memory_size
            ));
        }

        if !self.errors.is_empty() {
            return Err(LoadError::AnalysisError(self.errors.drain(..).collect()));
        }

        debug!(
            "loaded {} instructions and {} data items",
            self.code.len(),
            self.data_section.len()
        );

        Ok(())
    }

    fn first_pass(&mut self, input: &str) -> Result<(), LoadError> {
        let data_re = Regex::new(r"^([A-Za-z_]\w*)\s*:\s*(-?\d+)$").unwrap();

        let mut section = Section::Text;
        for (line_nr, raw_line) in input.lines().enumerate() {
            let line_nr = line_nr + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }

            if let Some(directive) = line.strip_prefix('.') {
                section = parse_directive(directive, line_nr)?;
                continue;
            }

            if section != Section::Data {
                continue;
            }

            match data_re.captures(line) {
                Some(captures) => {
                    let name = captures.get(1).unwrap().as_str().to_string();
                    let value = captures.get(2).unwrap().as_str();
                    self.parse_data(name, value, line_nr);
                }
                None => self
                    .errors
                    .push(format!("Illegal data line '{}' at line {}", line, line_nr)),
            }
        }

        Ok(())
    }

    fn second_pass(&mut self, input: &str) -> Result<(), LoadError> {
        let instr_re = Regex::new(r"^([A-Za-z]+)\s*(.*)$").unwrap();

        let mut section = Section::Text;
        for (line_nr, raw_line) in input.lines().enumerate() {
            let line_nr = line_nr + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }

            if let Some(directive) = line.strip_prefix('.') {
                section = parse_directive(directive, line_nr)?;
                continue;
            }

            if section != Section::Text {
                continue;
            }

            match instr_re.captures(line) {
                Some(captures) => {
                    let mnemonic = captures.get(1).unwrap().as_str();
                    let operands = captures.get(2).unwrap().as_str();
                    self.parse_instr(mnemonic, operands, line_nr);
                }
                None => {
                    return Err(LoadError::ParseError(format!(
                        "Can't parse '{}' at line {}",
                        line, line_nr
                    )))
                }
            }
        }

        Ok(())
    }

    fn parse_data(&mut self, name: String, value: &str, line_nr: usize) {
        if !is_valid_variable_name(&name) {
            self.errors
                .push(format!("Illegal variable name '{}' at line {}", name, line_nr));
            return;
        }

        if self.data_section.contains_key(&name) {
            self.errors.push(format!(
                "Duplicate variable declaration '{}' at line {}",
                name, line_nr
            ));
            return;
        }

        // words are 32 bit; accept anything that fits as signed or unsigned
        let value: i64 = value.parse().unwrap_or(i64::MAX);
        if value < i32::MIN as i64 || value > u32::MAX as i64 {
            self.errors.push(format!(
                "Value of variable '{}' out of range at line {}",
                name, line_nr
            ));
            return;
        }

        self.data_section
            .insert(name, Rc::new(Data { value: value as WordType, offset: self.heap_size }));
        self.heap_size += 1;
    }

    fn parse_instr(&mut self, mnemonic: &str, operand_str: &str, line_nr: usize) {
        let loc = Some(SourceLocation { line: line_nr });
        let operands = split_operands(operand_str);

        // 'la' is a pseudo instruction: it materializes the word offset of a
        // data item
        if mnemonic.eq_ignore_ascii_case("la") {
            if operands.len() != 2 {
                self.errors.push(format!(
                    "la expects 2 arguments, but {} are provided at line {}",
                    operands.len(),
                    line_nr
                ));
                return;
            }
            let rd = match self.parse_register(operands[0], line_nr) {
                Some(reg) => reg,
                None => return,
            };
            let offset = match self.data_section.get(operands[1]) {
                Some(data) => data.offset as i32,
                None => {
                    self.errors.push(format!(
                        "Unknown variable '{}' at line {}",
                        operands[1], line_nr
                    ));
                    return;
                }
            };
            self.code.push(Instr::new(Opcode::LI, rd, 0, 0, offset, loc));
            return;
        }

        let opcode = match get_opcode(mnemonic) {
            Some(opcode) => opcode,
            None => {
                self.errors
                    .push(format!("Unknown mnemonic '{}' at line {}", mnemonic, line_nr));
                return;
            }
        };

        let instr = match opcode {
            Opcode::ADD
            | Opcode::SUB
            | Opcode::AND
            | Opcode::OR
            | Opcode::XOR
            | Opcode::MUL
            | Opcode::DIV
            | Opcode::REM => {
                if !self.check_arity(opcode, &operands, 3, line_nr) {
                    return;
                }
                let rd = self.parse_register(operands[0], line_nr);
                let rs1 = self.parse_register(operands[1], line_nr);
                let rs2 = self.parse_register(operands[2], line_nr);
                match (rd, rs1, rs2) {
                    (Some(rd), Some(rs1), Some(rs2)) => Instr::new(opcode, rd, rs1, rs2, 0, loc),
                    _ => return,
                }
            }
            Opcode::ADDI | Opcode::ANDI | Opcode::ORI | Opcode::XORI => {
                if !self.check_arity(opcode, &operands, 3, line_nr) {
                    return;
                }
                let rd = self.parse_register(operands[0], line_nr);
                let rs1 = self.parse_register(operands[1], line_nr);
                let imm = self.parse_immediate(operands[2], line_nr);
                match (rd, rs1, imm) {
                    (Some(rd), Some(rs1), Some(imm)) => Instr::new(opcode, rd, rs1, 0, imm, loc),
                    _ => return,
                }
            }
            Opcode::LI => {
                if !self.check_arity(opcode, &operands, 2, line_nr) {
                    return;
                }
                let rd = self.parse_register(operands[0], line_nr);
                let imm = self.parse_immediate(operands[1], line_nr);
                match (rd, imm) {
                    (Some(rd), Some(imm)) => Instr::new(opcode, rd, 0, 0, imm, loc),
                    _ => return,
                }
            }
            Opcode::MV => {
                if !self.check_arity(opcode, &operands, 2, line_nr) {
                    return;
                }
                let rd = self.parse_register(operands[0], line_nr);
                let rs1 = self.parse_register(operands[1], line_nr);
                match (rd, rs1) {
                    (Some(rd), Some(rs1)) => Instr::new(opcode, rd, rs1, 0, 0, loc),
                    _ => return,
                }
            }
            Opcode::LW => {
                if !self.check_arity(opcode, &operands, 2, line_nr) {
                    return;
                }
                let rd = self.parse_register(operands[0], line_nr);
                let mem = self.parse_memory_access(operands[1], line_nr);
                match (rd, mem) {
                    (Some(rd), Some((imm, rs1))) => Instr::new(opcode, rd, rs1, 0, imm, loc),
                    _ => return,
                }
            }
            Opcode::SW => {
                if !self.check_arity(opcode, &operands, 2, line_nr) {
                    return;
                }
                let rs2 = self.parse_register(operands[0], line_nr);
                let mem = self.parse_memory_access(operands[1], line_nr);
                match (rs2, mem) {
                    (Some(rs2), Some((imm, rs1))) => Instr::new(opcode, 0, rs1, rs2, imm, loc),
                    _ => return,
                }
            }
            Opcode::PRINTR => {
                if !self.check_arity(opcode, &operands, 1, line_nr) {
                    return;
                }
                match self.parse_register(operands[0], line_nr) {
                    Some(rs1) => Instr::new(opcode, 0, rs1, 0, 0, loc),
                    None => return,
                }
            }
            Opcode::NOP | Opcode::ECALL => {
                if !self.check_arity(opcode, &operands, 0, line_nr) {
                    return;
                }
                Instr::new(opcode, 0, 0, 0, 0, loc)
            }
        };

        self.code.push(instr);
    }

    fn check_arity(
        &mut self,
        opcode: Opcode,
        operands: &[&str],
        expected: usize,
        line_nr: usize,
    ) -> bool {
        if operands.len() != expected {
            self.errors.push(format!(
                "{:?} expects {} arguments, but {} are provided at line {}",
                opcode,
                expected,
                operands.len(),
                line_nr
            ));
            return false;
        }
        true
    }

    fn parse_register(&mut self, token: &str, line_nr: usize) -> Option<RegisterType> {
        match get_register(token) {
            Some(reg) => Some(reg),
            None => {
                self.errors
                    .push(format!("Illegal register '{}' at line {}", token, line_nr));
                None
            }
        }
    }

    fn parse_immediate(&mut self, token: &str, line_nr: usize) -> Option<i32> {
        match token.parse() {
            Ok(imm) => Some(imm),
            Err(_) => {
                self.errors
                    .push(format!("Illegal immediate '{}' at line {}", token, line_nr));
                None
            }
        }
    }

    // A memory operand has the form 'offset(base)', e.g. '4(x2)'.
    fn parse_memory_access(&mut self, token: &str, line_nr: usize) -> Option<(i32, RegisterType)> {
        let mem_re = Regex::new(r"^(-?\d+)\s*\(\s*(\w+)\s*\)$").unwrap();

        match mem_re.captures(token) {
            Some(captures) => {
                let imm = self.parse_immediate(captures.get(1).unwrap().as_str(), line_nr)?;
                let base = self.parse_register(captures.get(2).unwrap().as_str(), line_nr)?;
                Some((imm, base))
            }
            None => {
                self.errors
                    .push(format!("Illegal memory access '{}' at line {}", token, line_nr));
                None
            }
        }
    }
}

fn parse_directive(directive: &str, line_nr: usize) -> Result<Section, LoadError> {
    match directive {
        "text" => Ok(Section::Text),
        "data" => Ok(Section::Data),
        _ => Err(LoadError::ParseError(format!(
            "Unknown directive '.{}' at line {}",
            directive, line_nr
        ))),
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(|c: char| c == ';' || c == '#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn split_operands(operand_str: &str) -> Vec<&str> {
    let operand_str = operand_str.trim();
    if operand_str.is_empty() {
        return Vec::new();
    }
    operand_str.split(',').map(str::trim).collect()
}

fn is_valid_variable_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    // it can't shadow a register name
    let re = Regex::new(r"^(?i)(x\d+|zero)$").unwrap();
    if re.is_match(name) {
        return false;
    }

    // it can't be an existing mnemonic
    if get_opcode(name).is_some() {
        return false;
    }

    true
}

pub(crate) fn load(cpu_config: CPUConfig, path: &str) -> Result<Program, LoadError> {
    if !Path::new(path).exists() {
        return Err(LoadError::NotFoundError(format!("File '{}' does not exist.", path)));
    }

    let input = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => return Err(LoadError::IOError(format!("Error reading '{}': {}", path, err))),
    };

    load_from_string(cpu_config, input)
}

pub(crate) fn load_from_string(
    cpu_config: CPUConfig,
    src: String,
) -> Result<Program, LoadError> {
    let mut loader = Loader {
        cpu_config,
        code: Vec::new(),
        data_section: HashMap::new(),
        heap_size: 0,
        errors: Vec::new(),
    };

    loader.load(&src)?;

    let mut code = Vec::with_capacity(loader.code.len());
    for instr in loader.code {
        code.push(Rc::new(instr));
    }
    Ok(Program { code, data_items: loader.data_section })
}

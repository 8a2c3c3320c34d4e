use log::{debug, trace};
use thiserror::Error;

use crate::instruction::{decode_opcode, AddressingMode, Instruction, Operation};

// Status flags
pub const FLAG_C: u8 = 0x01; // Carry
pub const FLAG_Z: u8 = 0x02; // Zero
pub const FLAG_I: u8 = 0x04; // Interrupt Disable
pub const FLAG_D: u8 = 0x08; // Decimal Mode
pub const FLAG_B: u8 = 0x10; // Break
pub const FLAG_U: u8 = 0x20; // Unused (always 1)
pub const FLAG_V: u8 = 0x40; // Overflow
pub const FLAG_N: u8 = 0x80; // Negative

pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// Clocks consumed by the reset sequence before the first fetch.
pub const BOOT_CYCLES: u8 = 7;

pub trait CpuBus {
    fn read(&mut self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);

    /// Little-endian word read; the high byte address wraps at 0xFFFF.
    fn read_word(&mut self, addr: u16) -> u16 {
        let low = self.read(addr) as u16;
        let high = self.read(addr.wrapping_add(1)) as u16;
        (high << 8) | low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuState {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub flags: u8,
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuState {
    pub fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0,
            pc: 0,
            flags: FLAG_U | FLAG_I,
        }
    }

    pub fn get_flag(&self, flag: u8) -> bool {
        (self.flags & flag) != 0
    }

    pub fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    fn update_zero_negative(&mut self, value: u8) {
        self.set_flag(FLAG_Z, value == 0);
        self.set_flag(FLAG_N, (value & FLAG_N) != 0);
    }

    // Stack operations. The stack pointer wraps silently within page one.
    fn push(&mut self, value: u8, bus: &mut dyn CpuBus) {
        bus.write(0x100 + self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pop(&mut self, bus: &mut dyn CpuBus) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        bus.read(0x100 + self.sp as u16)
    }

    fn push_word(&mut self, value: u16, bus: &mut dyn CpuBus) {
        self.push((value >> 8) as u8, bus);
        self.push(value as u8, bus);
    }

    fn pop_word(&mut self, bus: &mut dyn CpuBus) -> u16 {
        let low = self.pop(bus) as u16;
        let high = self.pop(bus) as u16;
        (high << 8) | low
    }

    // ALU operations
    fn ora(&mut self, value: u8) {
        self.a |= value;
        self.update_zero_negative(self.a);
    }

    fn and(&mut self, value: u8) {
        self.a &= value;
        self.update_zero_negative(self.a);
    }

    fn eor(&mut self, value: u8) {
        self.a ^= value;
        self.update_zero_negative(self.a);
    }

    fn adc(&mut self, value: u8) {
        let carry = if self.get_flag(FLAG_C) { 1 } else { 0 };
        let sum = self.a as u16 + value as u16 + carry;
        let binary = sum as u8;
        let overflow = (!(self.a ^ value) & (binary ^ value) & 0x80) != 0;

        if self.get_flag(FLAG_D) {
            let low = (self.a & 0x0F) as u16 + (value & 0x0F) as u16 + carry;
            let high = (self.a >> 4) as u16 + (value >> 4) as u16 + if low > 9 { 1 } else { 0 };
            let result = ((low % 10) | ((high % 10) << 4)) as u8;

            self.set_flag(FLAG_C, high > 9);
            self.set_flag(FLAG_V, overflow);
            self.a = result;
        } else {
            self.set_flag(FLAG_C, sum > 0xFF);
            self.set_flag(FLAG_V, overflow);
            self.a = binary;
        }
        self.update_zero_negative(self.a);
    }

    fn sbc(&mut self, value: u8) {
        let borrow = if self.get_flag(FLAG_C) { 0 } else { 1 };
        let diff = self.a as i16 - value as i16 - borrow;
        let binary = diff as u8;
        let overflow = ((self.a ^ value) & (self.a ^ binary) & 0x80) != 0;

        if self.get_flag(FLAG_D) {
            let mut low = (self.a & 0x0F) as i16 - (value & 0x0F) as i16 - borrow;
            let low_borrow = if low < 0 { 1 } else { 0 };
            let mut high = (self.a >> 4) as i16 - (value >> 4) as i16 - low_borrow;
            if low < 0 {
                low += 10;
            }
            let carry = high >= 0;
            if high < 0 {
                high += 10;
            }

            self.set_flag(FLAG_C, carry);
            self.set_flag(FLAG_V, overflow);
            self.a = ((low as u8) & 0x0F) | (((high as u8) & 0x0F) << 4);
        } else {
            self.set_flag(FLAG_C, diff >= 0);
            self.set_flag(FLAG_V, overflow);
            self.a = binary;
        }
        self.update_zero_negative(self.a);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let diff = register.wrapping_sub(value);
        self.set_flag(FLAG_C, register >= value);
        self.update_zero_negative(diff);
    }

    fn bit(&mut self, value: u8) {
        let result = self.a & value;
        self.set_flag(FLAG_Z, result == 0);
        self.set_flag(FLAG_N, (value & FLAG_N) != 0);
        self.set_flag(FLAG_V, (value & FLAG_V) != 0);
    }

    fn asl(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_C, (value & 0x80) != 0);
        let result = value << 1;
        self.update_zero_negative(result);
        result
    }

    fn lsr(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_C, (value & 0x01) != 0);
        let result = value >> 1;
        self.update_zero_negative(result);
        result
    }

    fn rol(&mut self, value: u8) -> u8 {
        let carry = if self.get_flag(FLAG_C) { 1 } else { 0 };
        self.set_flag(FLAG_C, (value & 0x80) != 0);
        let result = (value << 1) | carry;
        self.update_zero_negative(result);
        result
    }

    fn ror(&mut self, value: u8) -> u8 {
        let carry = if self.get_flag(FLAG_C) { 0x80 } else { 0 };
        self.set_flag(FLAG_C, (value & 0x01) != 0);
        let result = (value >> 1) | carry;
        self.update_zero_negative(result);
        result
    }

    fn inc(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        self.update_zero_negative(result);
        result
    }

    fn dec(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        self.update_zero_negative(result);
        result
    }

    fn branch_taken(&self, operation: Operation) -> bool {
        match operation {
            Operation::Bcc => !self.get_flag(FLAG_C),
            Operation::Bcs => self.get_flag(FLAG_C),
            Operation::Bne => !self.get_flag(FLAG_Z),
            Operation::Beq => self.get_flag(FLAG_Z),
            Operation::Bpl => !self.get_flag(FLAG_N),
            Operation::Bmi => self.get_flag(FLAG_N),
            Operation::Bvc => !self.get_flag(FLAG_V),
            Operation::Bvs => self.get_flag(FLAG_V),
            _ => false,
        }
    }
}

/// Effective address produced by [`decode_operand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub address: u16,
    /// The indexed (or branch) target lies on a different page than its base
    pub page_crossed: bool,
}

impl Operand {
    fn new(address: u16, page_crossed: bool) -> Self {
        Self {
            address,
            page_crossed,
        }
    }
}

fn crosses_page(base: u16, address: u16) -> bool {
    (base & 0xFF00) != (address & 0xFF00)
}

/// Decode the operand of the instruction whose opcode has just been fetched.
///
/// `state.pc` must point at the first operand byte and is advanced past the
/// operand. Immediate operands resolve to the address of the operand byte.
pub fn decode_operand(mode: AddressingMode, state: &mut CpuState, bus: &mut dyn CpuBus) -> Operand {
    let pc = state.pc;
    match mode {
        AddressingMode::Implied => Operand::new(0, false),
        AddressingMode::Immediate => {
            state.pc = pc.wrapping_add(1);
            Operand::new(pc, false)
        }
        AddressingMode::ZeroPage => {
            state.pc = pc.wrapping_add(1);
            Operand::new(bus.read(pc) as u16, false)
        }
        AddressingMode::ZeroPageX => {
            state.pc = pc.wrapping_add(1);
            Operand::new(bus.read(pc).wrapping_add(state.x) as u16, false)
        }
        AddressingMode::ZeroPageY => {
            state.pc = pc.wrapping_add(1);
            Operand::new(bus.read(pc).wrapping_add(state.y) as u16, false)
        }
        AddressingMode::Absolute => {
            state.pc = pc.wrapping_add(2);
            Operand::new(bus.read_word(pc), false)
        }
        AddressingMode::AbsoluteX => {
            state.pc = pc.wrapping_add(2);
            let base = bus.read_word(pc);
            let address = base.wrapping_add(state.x as u16);
            Operand::new(address, crosses_page(base, address))
        }
        AddressingMode::AbsoluteY => {
            state.pc = pc.wrapping_add(2);
            let base = bus.read_word(pc);
            let address = base.wrapping_add(state.y as u16);
            Operand::new(address, crosses_page(base, address))
        }
        AddressingMode::Indirect => {
            state.pc = pc.wrapping_add(2);
            let pointer = bus.read_word(pc);
            // The high byte is fetched without carrying into the next page
            let low = bus.read(pointer) as u16;
            let high = bus.read((pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF)) as u16;
            Operand::new((high << 8) | low, false)
        }
        AddressingMode::Relative => {
            let offset = bus.read(pc) as i8;
            let next = pc.wrapping_add(1);
            state.pc = next;
            let target = next.wrapping_add(offset as u16);
            Operand::new(target, crosses_page(next, target))
        }
        AddressingMode::IndexedIndirectX => {
            state.pc = pc.wrapping_add(1);
            let pointer = bus.read(pc).wrapping_add(state.x);
            let low = bus.read(pointer as u16) as u16;
            let high = bus.read(pointer.wrapping_add(1) as u16) as u16;
            Operand::new((high << 8) | low, false)
        }
        AddressingMode::IndirectIndexedY => {
            state.pc = pc.wrapping_add(1);
            let pointer = bus.read(pc);
            let low = bus.read(pointer as u16) as u16;
            let high = bus.read(pointer.wrapping_add(1) as u16) as u16;
            let base = (high << 8) | low;
            let address = base.wrapping_add(state.y as u16);
            Operand::new(address, crosses_page(base, address))
        }
    }
}

/// Per-opcode execution plan, derived once from the instruction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub operation: Operation,
    pub addressing_mode: AddressingMode,
    /// Cycles without page-crossing or branch penalties
    pub base_cycles: u8,
    /// The operand is read from the effective address before the operation runs
    pub dereference: bool,
    /// Indexed writes pay the page-crossing cycle whether or not a page is crossed
    pub always_penalized: bool,
}

impl ExecutionPlan {
    const fn from_instruction(instruction: Instruction) -> Self {
        let operation = instruction.operation;
        let mode = instruction.addressing_mode;
        let memory_rmw =
            operation.is_read_modify_write() && !matches!(mode, AddressingMode::Implied);

        let base_cycles = match operation {
            Operation::Brk => 7,
            Operation::Rti | Operation::Rts | Operation::Jsr => 6,
            Operation::Pha | Operation::Php => 3,
            Operation::Pla | Operation::Plp => 4,
            Operation::Jmp if matches!(mode, AddressingMode::Absolute) => 3,
            _ if memory_rmw => mode.base_cycles() + 2,
            _ => mode.base_cycles(),
        };

        let dereference = !operation.is_store()
            && !operation.is_branch()
            && !matches!(operation, Operation::Jmp | Operation::Jsr)
            && !matches!(mode, AddressingMode::Implied);

        let always_penalized =
            (operation.is_store() || memory_rmw) && mode.is_indexed_page_crossing();

        Self {
            operation,
            addressing_mode: mode,
            base_cycles,
            dereference,
            always_penalized,
        }
    }
}

pub static EXECUTION_PLANS: [ExecutionPlan; 256] = build_plans();

const fn build_plans() -> [ExecutionPlan; 256] {
    let mut plans = [ExecutionPlan::from_instruction(decode_opcode(0)); 256];
    let mut opcode = 0;
    while opcode < 256 {
        plans[opcode] = ExecutionPlan::from_instruction(decode_opcode(opcode as u8));
        opcode += 1;
    }
    plans
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Boot,
    Fetch,
    Execute,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuFault {
    #[error("invalid instruction 0x{opcode:02X} at 0x{address:04X}")]
    InvalidInstruction { opcode: u8, address: u16 },
}

#[derive(Debug, Clone, Copy)]
struct PendingOperation {
    opcode: u8,
    operand: u16,
}

#[derive(Debug, Clone)]
pub struct Cpu {
    pub state: CpuState,
    execution_state: ExecutionState,
    halted: bool,
    op_cycles: u8,
    pending: Option<PendingOperation>,
    report_invalid: bool,
    fault: Option<CpuFault>,
    cycles: u64,
    instructions: u64,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            state: CpuState::new(),
            execution_state: ExecutionState::Boot,
            halted: false,
            op_cycles: BOOT_CYCLES,
            pending: None,
            report_invalid: false,
            fault: None,
            cycles: 0,
            instructions: 0,
        }
    }

    /// Return to the power-on state. The next [`BOOT_CYCLES`] clocks run the
    /// reset sequence.
    pub fn reset(&mut self) {
        self.state = CpuState::new();
        self.execution_state = ExecutionState::Boot;
        self.halted = false;
        self.op_cycles = BOOT_CYCLES;
        self.pending = None;
        self.fault = None;
        self.cycles = 0;
        self.instructions = 0;
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.execution_state
    }

    /// Stall the fetch phase (RDY low). An instruction already in flight completes.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn resume(&mut self) {
        self.halted = false;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// When enabled, invalid opcodes leave a [`CpuFault`] behind for the owner
    /// to collect; otherwise they run silently as two-cycle NOPs.
    pub fn set_report_invalid_instructions(&mut self, enabled: bool) {
        self.report_invalid = enabled;
    }

    pub fn take_fault(&mut self) -> Option<CpuFault> {
        self.fault.take()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Advance exactly one clock.
    pub fn cycle(&mut self, bus: &mut dyn CpuBus) {
        self.cycles += 1;

        match self.execution_state {
            ExecutionState::Boot => {
                self.op_cycles -= 1;
                if self.op_cycles == 0 {
                    self.complete_boot(bus);
                }
            }
            ExecutionState::Execute => {
                self.op_cycles -= 1;
                if self.op_cycles == 0 {
                    if let Some(pending) = self.pending.take() {
                        self.execute(pending, bus);
                    }
                    self.instructions += 1;
                    self.execution_state = ExecutionState::Fetch;
                }
            }
            ExecutionState::Fetch => {
                if !self.halted {
                    self.fetch(bus);
                }
            }
        }
    }

    fn complete_boot(&mut self, bus: &mut dyn CpuBus) {
        self.state.sp = self.state.sp.wrapping_sub(3);
        self.state.pc = bus.read_word(RESET_VECTOR);
        self.execution_state = ExecutionState::Fetch;
        debug!("CPU boot complete: PC=0x{:04X}", self.state.pc);
    }

    fn fetch(&mut self, bus: &mut dyn CpuBus) {
        let address = self.state.pc;
        let opcode = bus.read(address);
        self.state.pc = address.wrapping_add(1);

        trace!(
            "{:04X} {:02X} A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X}",
            address,
            opcode,
            self.state.a,
            self.state.x,
            self.state.y,
            self.state.flags,
            self.state.sp
        );

        let plan = &EXECUTION_PLANS[opcode as usize];
        let mut cycles = plan.base_cycles;

        self.pending = match plan.operation {
            Operation::Invalid => {
                self.invalid_instruction(opcode, address);
                None
            }
            operation if operation.is_branch() => {
                if self.state.branch_taken(operation) {
                    let operand = decode_operand(plan.addressing_mode, &mut self.state, bus);
                    cycles += if operand.page_crossed { 2 } else { 1 };
                    Some(PendingOperation {
                        opcode,
                        operand: operand.address,
                    })
                } else {
                    self.state.pc = self.state.pc.wrapping_add(1);
                    None
                }
            }
            _ => {
                let operand = decode_operand(plan.addressing_mode, &mut self.state, bus);
                if plan.always_penalized || operand.page_crossed {
                    cycles += 1;
                }
                Some(PendingOperation {
                    opcode,
                    operand: operand.address,
                })
            }
        };

        self.op_cycles = cycles - 1;
        self.execution_state = ExecutionState::Execute;
    }

    fn invalid_instruction(&mut self, opcode: u8, address: u16) {
        if self.report_invalid {
            self.fault = Some(CpuFault::InvalidInstruction { opcode, address });
        } else {
            debug!(
                "Invalid opcode 0x{:02X} at 0x{:04X} executed as NOP",
                opcode, address
            );
        }
    }

    fn execute(&mut self, pending: PendingOperation, bus: &mut dyn CpuBus) {
        let plan = &EXECUTION_PLANS[pending.opcode as usize];
        let address = pending.operand;
        let implied = plan.addressing_mode == AddressingMode::Implied;
        let value = if plan.dereference { bus.read(address) } else { 0 };
        let s = &mut self.state;

        match plan.operation {
            Operation::Adc => s.adc(value),
            Operation::And => s.and(value),
            Operation::Ora => s.ora(value),
            Operation::Eor => s.eor(value),
            Operation::Sbc => s.sbc(value),
            Operation::Cmp => s.compare(s.a, value),
            Operation::Cpx => s.compare(s.x, value),
            Operation::Cpy => s.compare(s.y, value),
            Operation::Bit => s.bit(value),

            Operation::Asl => {
                read_modify_write(s, implied, address, value, bus, CpuState::asl);
            }
            Operation::Lsr => {
                read_modify_write(s, implied, address, value, bus, CpuState::lsr);
            }
            Operation::Rol => {
                read_modify_write(s, implied, address, value, bus, CpuState::rol);
            }
            Operation::Ror => {
                read_modify_write(s, implied, address, value, bus, CpuState::ror);
            }
            Operation::Inc => {
                read_modify_write(s, implied, address, value, bus, CpuState::inc);
            }
            Operation::Dec => {
                read_modify_write(s, implied, address, value, bus, CpuState::dec);
            }

            Operation::Lda => {
                s.a = value;
                s.update_zero_negative(value);
            }
            Operation::Ldx => {
                s.x = value;
                s.update_zero_negative(value);
            }
            Operation::Ldy => {
                s.y = value;
                s.update_zero_negative(value);
            }
            Operation::Sta => bus.write(address, s.a),
            Operation::Stx => bus.write(address, s.x),
            Operation::Sty => bus.write(address, s.y),

            Operation::Tax => {
                s.x = s.a;
                s.update_zero_negative(s.x);
            }
            Operation::Tay => {
                s.y = s.a;
                s.update_zero_negative(s.y);
            }
            Operation::Txa => {
                s.a = s.x;
                s.update_zero_negative(s.a);
            }
            Operation::Tya => {
                s.a = s.y;
                s.update_zero_negative(s.a);
            }
            Operation::Tsx => {
                s.x = s.sp;
                s.update_zero_negative(s.x);
            }
            Operation::Txs => s.sp = s.x,
            Operation::Inx => s.x = s.inc(s.x),
            Operation::Iny => s.y = s.inc(s.y),
            Operation::Dex => s.x = s.dec(s.x),
            Operation::Dey => s.y = s.dec(s.y),

            Operation::Clc => s.set_flag(FLAG_C, false),
            Operation::Sec => s.set_flag(FLAG_C, true),
            Operation::Cli => s.set_flag(FLAG_I, false),
            Operation::Sei => s.set_flag(FLAG_I, true),
            Operation::Cld => s.set_flag(FLAG_D, false),
            Operation::Sed => s.set_flag(FLAG_D, true),
            Operation::Clv => s.set_flag(FLAG_V, false),

            Operation::Pha => s.push(s.a, bus),
            Operation::Php => s.push(s.flags | FLAG_B | FLAG_U, bus),
            Operation::Pla => {
                s.a = s.pop(bus);
                s.update_zero_negative(s.a);
            }
            Operation::Plp => s.flags = (s.pop(bus) & !FLAG_B) | FLAG_U,

            Operation::Bcc
            | Operation::Bcs
            | Operation::Beq
            | Operation::Bmi
            | Operation::Bne
            | Operation::Bpl
            | Operation::Bvc
            | Operation::Bvs
            | Operation::Jmp => s.pc = address,
            Operation::Jsr => {
                s.push_word(s.pc.wrapping_sub(1), bus);
                s.pc = address;
            }
            Operation::Rts => s.pc = s.pop_word(bus).wrapping_add(1),
            Operation::Rti => {
                s.flags = (s.pop(bus) & !FLAG_B) | FLAG_U;
                s.pc = s.pop_word(bus);
            }
            Operation::Brk => {
                // The byte after BRK is skipped
                s.pc = s.pc.wrapping_add(1);
                s.push_word(s.pc, bus);
                s.push(s.flags | FLAG_B | FLAG_U, bus);
                s.set_flag(FLAG_I, true);
                s.pc = bus.read_word(IRQ_VECTOR);
            }

            Operation::Nop | Operation::Invalid => {}

            // *LAX - LDA + LDX
            Operation::Lax => {
                s.a = value;
                s.x = value;
                s.update_zero_negative(value);
            }
            // *SAX - store A & X
            Operation::Sax => bus.write(address, s.a & s.x),
            // *DCP - DEC + CMP
            Operation::Dcp => {
                let result = value.wrapping_sub(1);
                bus.write(address, result);
                s.compare(s.a, result);
            }
            // *ISC - INC + SBC
            Operation::Isc => {
                let result = value.wrapping_add(1);
                bus.write(address, result);
                s.sbc(result);
            }
            // *SLO - ASL + ORA
            Operation::Slo => {
                let result = read_modify_write(s, false, address, value, bus, CpuState::asl);
                s.ora(result);
            }
            // *RLA - ROL + AND
            Operation::Rla => {
                let result = read_modify_write(s, false, address, value, bus, CpuState::rol);
                s.and(result);
            }
            // *SRE - LSR + EOR
            Operation::Sre => {
                let result = read_modify_write(s, false, address, value, bus, CpuState::lsr);
                s.eor(result);
            }
            // *RRA - ROR + ADC
            Operation::Rra => {
                let result = read_modify_write(s, false, address, value, bus, CpuState::ror);
                s.adc(result);
            }
            // *ANC - AND + copy N into C
            Operation::Anc => {
                s.and(value);
                s.set_flag(FLAG_C, (s.a & 0x80) != 0);
            }
            // *ALR - AND + LSR A
            Operation::Alr => {
                s.a &= value;
                s.a = s.lsr(s.a);
            }
            // *ARR - AND + ROR A with C and V taken from bits 6 and 5
            Operation::Arr => {
                s.a &= value;
                s.a = s.ror(s.a);
                s.set_flag(FLAG_C, (s.a & 0x40) != 0);
                s.set_flag(FLAG_V, ((s.a & 0x40) ^ ((s.a & 0x20) << 1)) != 0);
            }
            // *AXS - (A & X) - immediate -> X
            Operation::Axs => {
                let masked = s.a & s.x;
                s.set_flag(FLAG_C, masked >= value);
                s.x = masked.wrapping_sub(value);
                s.update_zero_negative(s.x);
            }
        }
    }
}

/// Apply `op` to the accumulator (implied mode) or to memory, returning the result.
fn read_modify_write(
    state: &mut CpuState,
    implied: bool,
    address: u16,
    value: u8,
    bus: &mut dyn CpuBus,
    op: fn(&mut CpuState, u8) -> u8,
) -> u8 {
    if implied {
        let a = state.a;
        state.a = op(state, a);
        state.a
    } else {
        let result = op(state, value);
        bus.write(address, result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBus {
        memory: Vec<u8>,
    }

    impl TestBus {
        fn new() -> Self {
            Self {
                memory: vec![0; 0x10000],
            }
        }

        fn load_program(&mut self, program: &[u8], start_addr: u16) {
            for (i, &byte) in program.iter().enumerate() {
                self.memory[start_addr as usize + i] = byte;
            }
        }
    }

    impl CpuBus for TestBus {
        fn read(&mut self, addr: u16) -> u8 {
            self.memory[addr as usize]
        }

        fn write(&mut self, addr: u16, value: u8) {
            self.memory[addr as usize] = value;
        }
    }

    const PROGRAM_START: u16 = 0x0200;

    fn setup_cpu(program: &[u8]) -> (Cpu, TestBus) {
        let mut bus = TestBus::new();
        bus.load_program(program, PROGRAM_START);
        bus.write(RESET_VECTOR, PROGRAM_START as u8);
        bus.write(RESET_VECTOR + 1, (PROGRAM_START >> 8) as u8);

        let mut cpu = Cpu::new();
        for _ in 0..BOOT_CYCLES {
            cpu.cycle(&mut bus);
        }
        assert_eq!(cpu.execution_state(), ExecutionState::Fetch);
        (cpu, bus)
    }

    /// Run one instruction to completion and return the clocks it took.
    fn step(cpu: &mut Cpu, bus: &mut TestBus) -> u32 {
        let mut cycles = 0;
        loop {
            cpu.cycle(bus);
            cycles += 1;
            if cpu.execution_state() == ExecutionState::Fetch {
                return cycles;
            }
            assert!(cycles < 16, "instruction did not complete");
        }
    }

    #[rustfmt::skip]
    const CYCLE_TABLE: [u8; 256] = [
        7, 6, 2, 8, 3, 3, 5, 5, 3, 2, 2, 2, 4, 4, 6, 6,
        2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
        6, 6, 2, 8, 3, 3, 5, 5, 4, 2, 2, 2, 4, 4, 6, 6,
        2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
        6, 6, 2, 8, 3, 3, 5, 5, 3, 2, 2, 2, 3, 4, 6, 6,
        2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
        6, 6, 2, 8, 3, 3, 5, 5, 4, 2, 2, 2, 5, 4, 6, 6,
        2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
        2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4,
        2, 6, 2, 6, 4, 4, 4, 4, 2, 5, 2, 5, 5, 5, 5, 5,
        2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4,
        2, 5, 2, 5, 4, 4, 4, 4, 2, 4, 2, 4, 4, 4, 4, 4,
        2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6,
        2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
        2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6,
        2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
    ];

    #[test]
    fn plans_match_reference_cycle_table() {
        for opcode in 0..=255u8 {
            let plan = &EXECUTION_PLANS[opcode as usize];
            if plan.operation == Operation::Invalid {
                assert_eq!(plan.base_cycles, 2, "opcode 0x{:02X}", opcode);
                continue;
            }
            let cycles = plan.base_cycles + plan.always_penalized as u8;
            assert_eq!(cycles, CYCLE_TABLE[opcode as usize], "opcode 0x{:02X}", opcode);
        }
    }

    #[test]
    fn executed_cycles_match_plan_without_page_crossing() {
        // Every non-branching, non-control-flow opcode with X=Y=0 and zeroed memory
        for opcode in 0..=255u8 {
            let plan = EXECUTION_PLANS[opcode as usize];
            if plan.operation.is_branch()
                || matches!(
                    plan.operation,
                    Operation::Jmp | Operation::Jsr | Operation::Rts | Operation::Rti | Operation::Brk
                )
            {
                continue;
            }
            let (mut cpu, mut bus) = setup_cpu(&[opcode, 0x10, 0x03]);
            let expected = plan.base_cycles as u32 + plan.always_penalized as u32;
            assert_eq!(step(&mut cpu, &mut bus), expected, "opcode 0x{:02X}", opcode);
        }
    }

    #[test]
    fn adc_immediate_binary() {
        let (mut cpu, mut bus) = setup_cpu(&[0x69, 0x34]);
        cpu.state.a = 0x01;

        assert_eq!(step(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.state.a, 0x35);
        assert!(!cpu.state.get_flag(FLAG_Z));
        assert!(!cpu.state.get_flag(FLAG_N));
        assert!(!cpu.state.get_flag(FLAG_C));
        assert!(!cpu.state.get_flag(FLAG_V));
        assert_eq!(cpu.state.pc, PROGRAM_START + 2);
    }

    #[test]
    fn adc_signed_overflow() {
        let (mut cpu, mut bus) = setup_cpu(&[0x69, 0x50]);
        cpu.state.a = 0x50;
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.state.a, 0xA0);
        assert!(cpu.state.get_flag(FLAG_V));
        assert!(cpu.state.get_flag(FLAG_N));
        assert!(!cpu.state.get_flag(FLAG_C));
    }

    #[test]
    fn adc_decimal_carries_between_digits() {
        // SED; ADC #$29 with A=$58 -> $87
        let (mut cpu, mut bus) = setup_cpu(&[0xF8, 0x69, 0x29, 0x69, 0x20]);
        cpu.state.a = 0x58;
        step(&mut cpu, &mut bus);
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.state.a, 0x87);
        assert!(!cpu.state.get_flag(FLAG_C));

        // $87 + $20 = $107 -> $07 with carry
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.state.a, 0x07);
        assert!(cpu.state.get_flag(FLAG_C));
    }

    #[test]
    fn sbc_decimal_borrows_between_digits() {
        // SED; SEC; SBC #$19 with A=$42 -> $23
        let (mut cpu, mut bus) = setup_cpu(&[0xF8, 0x38, 0xE9, 0x19]);
        cpu.state.a = 0x42;
        for _ in 0..3 {
            step(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.state.a, 0x23);
        assert!(cpu.state.get_flag(FLAG_C));
    }

    #[test]
    fn lda_indirect_indexed_page_cross() {
        let (mut cpu, mut bus) = setup_cpu(&[0xB1, 0x12]);
        bus.write(0x12, 0x80);
        bus.write(0x13, 0x02);
        bus.write(0x0280 + 0xFF, 0x9C);
        cpu.state.y = 0xFF;

        assert_eq!(step(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.state.a, 0x9C);
        assert!(cpu.state.get_flag(FLAG_N));
        assert!(!cpu.state.get_flag(FLAG_Z));
    }

    #[test]
    fn lda_indirect_indexed_same_page() {
        let (mut cpu, mut bus) = setup_cpu(&[0xB1, 0x12]);
        bus.write(0x12, 0x80);
        bus.write(0x13, 0x02);
        cpu.state.y = 0x01;
        assert_eq!(step(&mut cpu, &mut bus), 5);
        assert!(cpu.state.get_flag(FLAG_Z));
    }

    #[test]
    fn indirect_pointer_on_zero_page_wraps() {
        // LDA ($FF),Y reads the high byte from $00
        let (mut cpu, mut bus) = setup_cpu(&[0xB1, 0xFF]);
        bus.write(0xFF, 0x34);
        bus.write(0x00, 0x12);
        bus.write(0x1234, 0x42);
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.state.a, 0x42);
    }

    #[test]
    fn store_pays_indexed_penalty_without_crossing() {
        // STA $0300,X with X=1 stays on the page but still takes 5 cycles
        let (mut cpu, mut bus) = setup_cpu(&[0x9D, 0x00, 0x03]);
        cpu.state.a = 0x77;
        cpu.state.x = 0x01;
        assert_eq!(step(&mut cpu, &mut bus), 5);
        assert_eq!(bus.read(0x0301), 0x77);
    }

    #[test]
    fn read_pays_indexed_penalty_only_when_crossing() {
        let (mut cpu, mut bus) = setup_cpu(&[0xBD, 0x00, 0x03, 0xBD, 0xFF, 0x03]);
        cpu.state.x = 0x01;
        assert_eq!(step(&mut cpu, &mut bus), 4);
        assert_eq!(step(&mut cpu, &mut bus), 5);
    }

    #[test]
    fn jmp_indirect_wraps_within_page() {
        let (mut cpu, mut bus) = setup_cpu(&[0x6C, 0xFF, 0x02]);
        bus.write(0x02FF, 0x34);
        bus.write(0x0200 + 0x100, 0x99);
        // High byte comes from $0200, which holds the JMP opcode itself
        assert_eq!(step(&mut cpu, &mut bus), 5);
        assert_eq!(cpu.state.pc, 0x6C34);
    }

    #[test]
    fn zero_page_indexed_wraps() {
        let (mut cpu, mut bus) = setup_cpu(&[0xB5, 0xF0]);
        bus.write(0x0010, 0x5A);
        bus.write(0x0110, 0xA5);
        cpu.state.x = 0x20;
        assert_eq!(step(&mut cpu, &mut bus), 4);
        assert_eq!(cpu.state.a, 0x5A);
    }

    #[test]
    fn stack_pointer_wraps_on_push_and_pop() {
        // PHA; PHA; PLA; PLA
        let (mut cpu, mut bus) = setup_cpu(&[0x48, 0x48, 0x68, 0x68]);
        cpu.state.sp = 0x00;
        cpu.state.a = 0x11;
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.state.sp, 0xFF);
        assert_eq!(bus.read(0x0100), 0x11);

        cpu.state.a = 0x22;
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.state.sp, 0xFE);
        assert_eq!(bus.read(0x01FF), 0x22);

        step(&mut cpu, &mut bus);
        assert_eq!(cpu.state.a, 0x22);
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.state.a, 0x11);
        assert_eq!(cpu.state.sp, 0x00);
    }

    #[test]
    fn branch_timing() {
        // BNE +2 not taken (Z set), BEQ +0x7E taken across a page
        let (mut cpu, mut bus) = setup_cpu(&[0xD0, 0x02, 0xF0, 0x7E]);
        cpu.state.set_flag(FLAG_Z, true);
        assert_eq!(step(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.state.pc, PROGRAM_START + 2);

        assert_eq!(step(&mut cpu, &mut bus), 3);
        assert_eq!(cpu.state.pc, PROGRAM_START + 4 + 0x7E);

        let (mut cpu, mut bus) = setup_cpu(&[0xF0, 0xFA]);
        cpu.state.set_flag(FLAG_Z, true);
        assert_eq!(step(&mut cpu, &mut bus), 4);
        assert_eq!(cpu.state.pc, 0x01FC);
    }

    #[test]
    fn jsr_and_rts_round_trip() {
        let (mut cpu, mut bus) = setup_cpu(&[0x20, 0x00, 0x03]);
        bus.write(0x0300, 0x60);
        let sp = cpu.state.sp;
        assert_eq!(step(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.state.pc, 0x0300);
        assert_eq!(step(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.state.pc, PROGRAM_START + 3);
        assert_eq!(cpu.state.sp, sp);
    }

    #[test]
    fn brk_and_rti() {
        let (mut cpu, mut bus) = setup_cpu(&[0x00, 0xFF]);
        bus.write(IRQ_VECTOR, 0x00);
        bus.write(IRQ_VECTOR + 1, 0x04);
        bus.write(0x0400, 0x40);
        cpu.state.set_flag(FLAG_I, false);

        assert_eq!(step(&mut cpu, &mut bus), 7);
        assert_eq!(cpu.state.pc, 0x0400);
        assert!(cpu.state.get_flag(FLAG_I));

        assert_eq!(step(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.state.pc, PROGRAM_START + 2);
        assert!(!cpu.state.get_flag(FLAG_I));
        assert!(!cpu.state.get_flag(FLAG_B));
    }

    #[test]
    fn read_modify_write_on_accumulator_and_memory() {
        // ASL A; ROR $40
        let (mut cpu, mut bus) = setup_cpu(&[0x0A, 0x66, 0x40]);
        cpu.state.a = 0x81;
        bus.write(0x40, 0x01);
        assert_eq!(step(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.state.a, 0x02);
        assert!(cpu.state.get_flag(FLAG_C));

        assert_eq!(step(&mut cpu, &mut bus), 5);
        assert_eq!(bus.read(0x40), 0x80);
        assert!(cpu.state.get_flag(FLAG_C));
        assert!(cpu.state.get_flag(FLAG_N));
    }

    #[test]
    fn undocumented_lax_and_dcp() {
        // LAX $40; DCP $41
        let (mut cpu, mut bus) = setup_cpu(&[0xA7, 0x40, 0xC7, 0x41]);
        bus.write(0x40, 0x33);
        bus.write(0x41, 0x34);
        step(&mut cpu, &mut bus);
        assert_eq!(cpu.state.a, 0x33);
        assert_eq!(cpu.state.x, 0x33);

        assert_eq!(step(&mut cpu, &mut bus), 5);
        assert_eq!(bus.read(0x41), 0x33);
        assert!(cpu.state.get_flag(FLAG_Z));
        assert!(cpu.state.get_flag(FLAG_C));
    }

    #[test]
    fn invalid_opcode_runs_as_nop() {
        let (mut cpu, mut bus) = setup_cpu(&[0x02, 0xEA]);
        assert_eq!(step(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.state.pc, PROGRAM_START + 1);
        assert_eq!(cpu.take_fault(), None);
    }

    #[test]
    fn invalid_opcode_reports_fault_when_enabled() {
        let (mut cpu, mut bus) = setup_cpu(&[0x02]);
        cpu.set_report_invalid_instructions(true);
        step(&mut cpu, &mut bus);
        assert_eq!(
            cpu.take_fault(),
            Some(CpuFault::InvalidInstruction {
                opcode: 0x02,
                address: PROGRAM_START
            })
        );
        assert_eq!(cpu.take_fault(), None);
    }

    #[test]
    fn halted_cpu_makes_no_progress_in_fetch() {
        let (mut cpu, mut bus) = setup_cpu(&[0xE8]);
        cpu.halt();
        for _ in 0..10 {
            cpu.cycle(&mut bus);
        }
        assert_eq!(cpu.state.pc, PROGRAM_START);
        assert_eq!(cpu.execution_state(), ExecutionState::Fetch);

        cpu.resume();
        assert_eq!(step(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.state.x, 1);
    }

    #[test]
    fn reset_returns_to_boot() {
        let (mut cpu, mut bus) = setup_cpu(&[0xEA]);
        step(&mut cpu, &mut bus);
        cpu.reset();
        assert_eq!(cpu.execution_state(), ExecutionState::Boot);
        for _ in 0..BOOT_CYCLES {
            cpu.cycle(&mut bus);
        }
        assert_eq!(cpu.state.pc, PROGRAM_START);
        assert_eq!(cpu.state.sp, 0xFD);
        assert_eq!(cpu.cycles(), BOOT_CYCLES as u64);
    }
}

//! Static 6502 opcode table.
//!
//! Every one of the 256 opcode values maps to an [`Instruction`] describing the
//! operation, the addressing mode and the encoded size. The table is built at
//! compile time and never mutated.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
    // Stable undocumented NMOS opcodes
    Alr,
    Anc,
    Arr,
    Axs,
    Dcp,
    Isc,
    Lax,
    Rla,
    Rra,
    Sax,
    Slo,
    Sre,
    /// Jamming or unstable opcodes
    Invalid,
}

impl Operation {
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Operation::Adc => "ADC",
            Operation::And => "AND",
            Operation::Asl => "ASL",
            Operation::Bcc => "BCC",
            Operation::Bcs => "BCS",
            Operation::Beq => "BEQ",
            Operation::Bit => "BIT",
            Operation::Bmi => "BMI",
            Operation::Bne => "BNE",
            Operation::Bpl => "BPL",
            Operation::Brk => "BRK",
            Operation::Bvc => "BVC",
            Operation::Bvs => "BVS",
            Operation::Clc => "CLC",
            Operation::Cld => "CLD",
            Operation::Cli => "CLI",
            Operation::Clv => "CLV",
            Operation::Cmp => "CMP",
            Operation::Cpx => "CPX",
            Operation::Cpy => "CPY",
            Operation::Dec => "DEC",
            Operation::Dex => "DEX",
            Operation::Dey => "DEY",
            Operation::Eor => "EOR",
            Operation::Inc => "INC",
            Operation::Inx => "INX",
            Operation::Iny => "INY",
            Operation::Jmp => "JMP",
            Operation::Jsr => "JSR",
            Operation::Lda => "LDA",
            Operation::Ldx => "LDX",
            Operation::Ldy => "LDY",
            Operation::Lsr => "LSR",
            Operation::Nop => "NOP",
            Operation::Ora => "ORA",
            Operation::Pha => "PHA",
            Operation::Php => "PHP",
            Operation::Pla => "PLA",
            Operation::Plp => "PLP",
            Operation::Rol => "ROL",
            Operation::Ror => "ROR",
            Operation::Rti => "RTI",
            Operation::Rts => "RTS",
            Operation::Sbc => "SBC",
            Operation::Sec => "SEC",
            Operation::Sed => "SED",
            Operation::Sei => "SEI",
            Operation::Sta => "STA",
            Operation::Stx => "STX",
            Operation::Sty => "STY",
            Operation::Tax => "TAX",
            Operation::Tay => "TAY",
            Operation::Tsx => "TSX",
            Operation::Txa => "TXA",
            Operation::Txs => "TXS",
            Operation::Tya => "TYA",
            Operation::Alr => "ALR",
            Operation::Anc => "ANC",
            Operation::Arr => "ARR",
            Operation::Axs => "AXS",
            Operation::Dcp => "DCP",
            Operation::Isc => "ISC",
            Operation::Lax => "LAX",
            Operation::Rla => "RLA",
            Operation::Rra => "RRA",
            Operation::Sax => "SAX",
            Operation::Slo => "SLO",
            Operation::Sre => "SRE",
            Operation::Invalid => "???",
        }
    }

    /// Conditional branches only decode their target when taken.
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Operation::Bcc
                | Operation::Bcs
                | Operation::Beq
                | Operation::Bmi
                | Operation::Bne
                | Operation::Bpl
                | Operation::Bvc
                | Operation::Bvs
        )
    }

    /// Store-class operations never read their effective address.
    pub const fn is_store(self) -> bool {
        matches!(
            self,
            Operation::Sta | Operation::Stx | Operation::Sty | Operation::Sax
        )
    }

    /// Read-modify-write operations when applied to memory.
    pub const fn is_read_modify_write(self) -> bool {
        matches!(
            self,
            Operation::Asl
                | Operation::Lsr
                | Operation::Rol
                | Operation::Ror
                | Operation::Inc
                | Operation::Dec
                | Operation::Slo
                | Operation::Rla
                | Operation::Sre
                | Operation::Rra
                | Operation::Dcp
                | Operation::Isc
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    /// No operand, or the accumulator for shifts and rotates
    Implied,
    Immediate,
    ZeroPage,
    Absolute,
    Indirect,
    Relative,
    ZeroPageX,
    ZeroPageY,
    AbsoluteX,
    AbsoluteY,
    IndexedIndirectX,
    IndirectIndexedY,
}

impl AddressingMode {
    /// Number of operand bytes following the opcode.
    pub const fn operand_size(self) -> u8 {
        match self {
            AddressingMode::Implied => 0,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::Relative
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::IndexedIndirectX
            | AddressingMode::IndirectIndexedY => 1,
            AddressingMode::Absolute
            | AddressingMode::Indirect
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY => 2,
        }
    }

    /// Cycle cost of a read through this mode, without page-crossing penalty.
    pub const fn base_cycles(self) -> u8 {
        match self {
            AddressingMode::Implied | AddressingMode::Immediate | AddressingMode::Relative => 2,
            AddressingMode::ZeroPage => 3,
            AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY => 4,
            AddressingMode::Indirect | AddressingMode::IndirectIndexedY => 5,
            AddressingMode::IndexedIndirectX => 6,
        }
    }

    /// Modes whose effective address can cross a page when indexed.
    pub const fn is_indexed_page_crossing(self) -> bool {
        matches!(
            self,
            AddressingMode::AbsoluteX | AddressingMode::AbsoluteY | AddressingMode::IndirectIndexedY
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub operation: Operation,
    pub addressing_mode: AddressingMode,
    /// Encoded size in bytes, opcode included
    pub size: u8,
}

impl Instruction {
    const fn new(operation: Operation, addressing_mode: AddressingMode) -> Self {
        Self {
            operation,
            addressing_mode,
            size: 1 + addressing_mode.operand_size(),
        }
    }

    pub fn for_opcode(opcode: u8) -> &'static Instruction {
        &INSTRUCTION_TABLE[opcode as usize]
    }
}

pub static INSTRUCTION_TABLE: [Instruction; 256] = build_table();

const fn build_table() -> [Instruction; 256] {
    let mut table = [Instruction::new(Operation::Invalid, AddressingMode::Implied); 256];
    let mut opcode = 0;
    while opcode < 256 {
        table[opcode] = decode_opcode(opcode as u8);
        opcode += 1;
    }
    table
}

pub(crate) const fn decode_opcode(opcode: u8) -> Instruction {
    use AddressingMode::*;
    use Operation::*;

    let (operation, mode) = match opcode {
        0x00 => (Brk, Implied),
        0x01 => (Ora, IndexedIndirectX),
        0x03 => (Slo, IndexedIndirectX),
        0x04 => (Nop, ZeroPage),
        0x05 => (Ora, ZeroPage),
        0x06 => (Asl, ZeroPage),
        0x07 => (Slo, ZeroPage),
        0x08 => (Php, Implied),
        0x09 => (Ora, Immediate),
        0x0A => (Asl, Implied),
        0x0B => (Anc, Immediate),
        0x0C => (Nop, Absolute),
        0x0D => (Ora, Absolute),
        0x0E => (Asl, Absolute),
        0x0F => (Slo, Absolute),
        0x10 => (Bpl, Relative),
        0x11 => (Ora, IndirectIndexedY),
        0x13 => (Slo, IndirectIndexedY),
        0x14 => (Nop, ZeroPageX),
        0x15 => (Ora, ZeroPageX),
        0x16 => (Asl, ZeroPageX),
        0x17 => (Slo, ZeroPageX),
        0x18 => (Clc, Implied),
        0x19 => (Ora, AbsoluteY),
        0x1A => (Nop, Implied),
        0x1B => (Slo, AbsoluteY),
        0x1C => (Nop, AbsoluteX),
        0x1D => (Ora, AbsoluteX),
        0x1E => (Asl, AbsoluteX),
        0x1F => (Slo, AbsoluteX),
        0x20 => (Jsr, Absolute),
        0x21 => (And, IndexedIndirectX),
        0x23 => (Rla, IndexedIndirectX),
        0x24 => (Bit, ZeroPage),
        0x25 => (And, ZeroPage),
        0x26 => (Rol, ZeroPage),
        0x27 => (Rla, ZeroPage),
        0x28 => (Plp, Implied),
        0x29 => (And, Immediate),
        0x2A => (Rol, Implied),
        0x2B => (Anc, Immediate),
        0x2C => (Bit, Absolute),
        0x2D => (And, Absolute),
        0x2E => (Rol, Absolute),
        0x2F => (Rla, Absolute),
        0x30 => (Bmi, Relative),
        0x31 => (And, IndirectIndexedY),
        0x33 => (Rla, IndirectIndexedY),
        0x34 => (Nop, ZeroPageX),
        0x35 => (And, ZeroPageX),
        0x36 => (Rol, ZeroPageX),
        0x37 => (Rla, ZeroPageX),
        0x38 => (Sec, Implied),
        0x39 => (And, AbsoluteY),
        0x3A => (Nop, Implied),
        0x3B => (Rla, AbsoluteY),
        0x3C => (Nop, AbsoluteX),
        0x3D => (And, AbsoluteX),
        0x3E => (Rol, AbsoluteX),
        0x3F => (Rla, AbsoluteX),
        0x40 => (Rti, Implied),
        0x41 => (Eor, IndexedIndirectX),
        0x43 => (Sre, IndexedIndirectX),
        0x44 => (Nop, ZeroPage),
        0x45 => (Eor, ZeroPage),
        0x46 => (Lsr, ZeroPage),
        0x47 => (Sre, ZeroPage),
        0x48 => (Pha, Implied),
        0x49 => (Eor, Immediate),
        0x4A => (Lsr, Implied),
        0x4B => (Alr, Immediate),
        0x4C => (Jmp, Absolute),
        0x4D => (Eor, Absolute),
        0x4E => (Lsr, Absolute),
        0x4F => (Sre, Absolute),
        0x50 => (Bvc, Relative),
        0x51 => (Eor, IndirectIndexedY),
        0x53 => (Sre, IndirectIndexedY),
        0x54 => (Nop, ZeroPageX),
        0x55 => (Eor, ZeroPageX),
        0x56 => (Lsr, ZeroPageX),
        0x57 => (Sre, ZeroPageX),
        0x58 => (Cli, Implied),
        0x59 => (Eor, AbsoluteY),
        0x5A => (Nop, Implied),
        0x5B => (Sre, AbsoluteY),
        0x5C => (Nop, AbsoluteX),
        0x5D => (Eor, AbsoluteX),
        0x5E => (Lsr, AbsoluteX),
        0x5F => (Sre, AbsoluteX),
        0x60 => (Rts, Implied),
        0x61 => (Adc, IndexedIndirectX),
        0x63 => (Rra, IndexedIndirectX),
        0x64 => (Nop, ZeroPage),
        0x65 => (Adc, ZeroPage),
        0x66 => (Ror, ZeroPage),
        0x67 => (Rra, ZeroPage),
        0x68 => (Pla, Implied),
        0x69 => (Adc, Immediate),
        0x6A => (Ror, Implied),
        0x6B => (Arr, Immediate),
        0x6C => (Jmp, Indirect),
        0x6D => (Adc, Absolute),
        0x6E => (Ror, Absolute),
        0x6F => (Rra, Absolute),
        0x70 => (Bvs, Relative),
        0x71 => (Adc, IndirectIndexedY),
        0x73 => (Rra, IndirectIndexedY),
        0x74 => (Nop, ZeroPageX),
        0x75 => (Adc, ZeroPageX),
        0x76 => (Ror, ZeroPageX),
        0x77 => (Rra, ZeroPageX),
        0x78 => (Sei, Implied),
        0x79 => (Adc, AbsoluteY),
        0x7A => (Nop, Implied),
        0x7B => (Rra, AbsoluteY),
        0x7C => (Nop, AbsoluteX),
        0x7D => (Adc, AbsoluteX),
        0x7E => (Ror, AbsoluteX),
        0x7F => (Rra, AbsoluteX),
        0x80 => (Nop, Immediate),
        0x81 => (Sta, IndexedIndirectX),
        0x82 => (Nop, Immediate),
        0x83 => (Sax, IndexedIndirectX),
        0x84 => (Sty, ZeroPage),
        0x85 => (Sta, ZeroPage),
        0x86 => (Stx, ZeroPage),
        0x87 => (Sax, ZeroPage),
        0x88 => (Dey, Implied),
        0x89 => (Nop, Immediate),
        0x8A => (Txa, Implied),
        0x8C => (Sty, Absolute),
        0x8D => (Sta, Absolute),
        0x8E => (Stx, Absolute),
        0x8F => (Sax, Absolute),
        0x90 => (Bcc, Relative),
        0x91 => (Sta, IndirectIndexedY),
        0x94 => (Sty, ZeroPageX),
        0x95 => (Sta, ZeroPageX),
        0x96 => (Stx, ZeroPageY),
        0x97 => (Sax, ZeroPageY),
        0x98 => (Tya, Implied),
        0x99 => (Sta, AbsoluteY),
        0x9A => (Txs, Implied),
        0x9D => (Sta, AbsoluteX),
        0xA0 => (Ldy, Immediate),
        0xA1 => (Lda, IndexedIndirectX),
        0xA2 => (Ldx, Immediate),
        0xA3 => (Lax, IndexedIndirectX),
        0xA4 => (Ldy, ZeroPage),
        0xA5 => (Lda, ZeroPage),
        0xA6 => (Ldx, ZeroPage),
        0xA7 => (Lax, ZeroPage),
        0xA8 => (Tay, Implied),
        0xA9 => (Lda, Immediate),
        0xAA => (Tax, Implied),
        0xAC => (Ldy, Absolute),
        0xAD => (Lda, Absolute),
        0xAE => (Ldx, Absolute),
        0xAF => (Lax, Absolute),
        0xB0 => (Bcs, Relative),
        0xB1 => (Lda, IndirectIndexedY),
        0xB3 => (Lax, IndirectIndexedY),
        0xB4 => (Ldy, ZeroPageX),
        0xB5 => (Lda, ZeroPageX),
        0xB6 => (Ldx, ZeroPageY),
        0xB7 => (Lax, ZeroPageY),
        0xB8 => (Clv, Implied),
        0xB9 => (Lda, AbsoluteY),
        0xBA => (Tsx, Implied),
        0xBC => (Ldy, AbsoluteX),
        0xBD => (Lda, AbsoluteX),
        0xBE => (Ldx, AbsoluteY),
        0xBF => (Lax, AbsoluteY),
        0xC0 => (Cpy, Immediate),
        0xC1 => (Cmp, IndexedIndirectX),
        0xC2 => (Nop, Immediate),
        0xC3 => (Dcp, IndexedIndirectX),
        0xC4 => (Cpy, ZeroPage),
        0xC5 => (Cmp, ZeroPage),
        0xC6 => (Dec, ZeroPage),
        0xC7 => (Dcp, ZeroPage),
        0xC8 => (Iny, Implied),
        0xC9 => (Cmp, Immediate),
        0xCA => (Dex, Implied),
        0xCB => (Axs, Immediate),
        0xCC => (Cpy, Absolute),
        0xCD => (Cmp, Absolute),
        0xCE => (Dec, Absolute),
        0xCF => (Dcp, Absolute),
        0xD0 => (Bne, Relative),
        0xD1 => (Cmp, IndirectIndexedY),
        0xD3 => (Dcp, IndirectIndexedY),
        0xD4 => (Nop, ZeroPageX),
        0xD5 => (Cmp, ZeroPageX),
        0xD6 => (Dec, ZeroPageX),
        0xD7 => (Dcp, ZeroPageX),
        0xD8 => (Cld, Implied),
        0xD9 => (Cmp, AbsoluteY),
        0xDA => (Nop, Implied),
        0xDB => (Dcp, AbsoluteY),
        0xDC => (Nop, AbsoluteX),
        0xDD => (Cmp, AbsoluteX),
        0xDE => (Dec, AbsoluteX),
        0xDF => (Dcp, AbsoluteX),
        0xE0 => (Cpx, Immediate),
        0xE1 => (Sbc, IndexedIndirectX),
        0xE2 => (Nop, Immediate),
        0xE3 => (Isc, IndexedIndirectX),
        0xE4 => (Cpx, ZeroPage),
        0xE5 => (Sbc, ZeroPage),
        0xE6 => (Inc, ZeroPage),
        0xE7 => (Isc, ZeroPage),
        0xE8 => (Inx, Implied),
        0xE9 => (Sbc, Immediate),
        0xEA => (Nop, Implied),
        0xEB => (Sbc, Immediate),
        0xEC => (Cpx, Absolute),
        0xED => (Sbc, Absolute),
        0xEE => (Inc, Absolute),
        0xEF => (Isc, Absolute),
        0xF0 => (Beq, Relative),
        0xF1 => (Sbc, IndirectIndexedY),
        0xF3 => (Isc, IndirectIndexedY),
        0xF4 => (Nop, ZeroPageX),
        0xF5 => (Sbc, ZeroPageX),
        0xF6 => (Inc, ZeroPageX),
        0xF7 => (Isc, ZeroPageX),
        0xF8 => (Sed, Implied),
        0xF9 => (Sbc, AbsoluteY),
        0xFA => (Nop, Implied),
        0xFB => (Isc, AbsoluteY),
        0xFC => (Nop, AbsoluteX),
        0xFD => (Sbc, AbsoluteX),
        0xFE => (Inc, AbsoluteX),
        0xFF => (Isc, AbsoluteX),
        // KIL/JAM, SHA, SHX, SHY, TAS, LAS, XAA, LXA
        _ => (Invalid, Implied),
    };

    Instruction::new(operation, mode)
}

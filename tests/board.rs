use std::cell::RefCell;
use std::rc::Rc;

use vcs_core::{
    Board, BoardConfig, BoardError, ClockCounts, ExecutionState, RomCartridge, Trap, TrapReason,
    TvMode,
};

const ROM_BASE: u16 = 0xF000;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 4K image with `program` at 0xF000, NOPs elsewhere, reset vector to 0xF000.
fn board_with_program(program: &[u8]) -> Board {
    init_logger();
    let mut rom = vec![0xEA; 4096];
    rom[..program.len()].copy_from_slice(program);
    rom[0xFFC] = ROM_BASE as u8;
    rom[0xFFD] = (ROM_BASE >> 8) as u8;
    let cartridge = RomCartridge::new(rom).unwrap();
    Board::new(BoardConfig::new(TvMode::Ntsc), Box::new(cartridge)).unwrap()
}

#[test]
fn boot_reaches_fetch_in_seven_cpu_clocks() {
    let mut board = board_with_program(&[]);
    let counts = board.boot().unwrap();

    assert_eq!(counts, ClockCounts { cpu: 7, chip: 19 });
    assert_eq!(board.cpu().execution_state(), ExecutionState::Fetch);
    assert_eq!(board.cpu().state.pc, ROM_BASE);
    assert_eq!(board.cpu().state.sp, 0xFD);
    assert_eq!(board.clock_counts(), counts);
}

#[test]
fn tick_runs_cpu_every_third_clock() {
    let mut board = board_with_program(&[]);
    board.boot().unwrap();
    let counts = board.tick(300).unwrap();
    assert_eq!(counts.chip, 300);
    assert_eq!(counts.cpu, 100);
}

#[test]
fn step_instruction_stops_on_boundary() {
    // LDA #$1E
    let mut board = board_with_program(&[0xA9, 0x1E]);
    board.boot().unwrap();
    let counts = board.step_instruction().unwrap();
    assert_eq!(counts, ClockCounts { cpu: 2, chip: 6 });
    assert_eq!(board.cpu().state.a, 0x1E);
    assert_eq!(board.cpu().execution_state(), ExecutionState::Fetch);
}

#[test]
fn invalid_opcode_without_handler_is_fatal() {
    let mut board = board_with_program(&[0x02]);
    board.boot().unwrap();
    match board.tick(100) {
        Err(BoardError::UnhandledTrap { reason, message }) => {
            assert_eq!(reason, TrapReason::Cpu);
            assert!(message.unwrap().contains("0x02"));
        }
        other => panic!("expected unhandled trap, got {:?}", other.map(|_| ())),
    }
    assert!(board.is_suspended());
}

#[test]
fn trap_handler_suspends_board() {
    let mut board = board_with_program(&[0x02, 0xE8]);
    let traps: Rc<RefCell<Vec<Trap>>> = Rc::new(RefCell::new(Vec::new()));
    let recorder = Rc::clone(&traps);
    board.set_trap_handler(Box::new(move |trap: &Trap| {
        recorder.borrow_mut().push(trap.clone())
    }));
    board.boot().unwrap();

    let counts = board.tick(100).unwrap();
    assert!(counts.chip < 100);
    assert_eq!(traps.borrow().len(), 1);
    assert_eq!(traps.borrow()[0].reason, TrapReason::Cpu);
    assert!(board.is_suspended());

    // Suspended boards do not advance
    assert_eq!(board.tick(100).unwrap(), ClockCounts::default());

    // After resuming, the invalid opcode finishes as a NOP and INX runs
    board.resume();
    board.step_instruction().unwrap();
    assert_eq!(board.cpu().state.x, 0);
    board.step_instruction().unwrap();
    assert_eq!(board.cpu().state.x, 1);
    assert_eq!(traps.borrow().len(), 1);
}

#[test]
fn invalid_opcode_can_run_as_nop() {
    let mut board = board_with_program(&[0x02, 0xE8]);
    board.set_trap_on_invalid_instruction(false);
    board.boot().unwrap();
    board.step_instruction().unwrap();
    board.step_instruction().unwrap();
    assert_eq!(board.cpu().state.x, 1);
    assert!(!board.is_suspended());
}

#[test]
fn debug_trap_from_collaborator() {
    let mut board = board_with_program(&[]);
    board.boot().unwrap();
    let result = board.trigger_trap(TrapReason::Debug, Some("breakpoint".to_string()));
    assert!(matches!(
        result,
        Err(BoardError::UnhandledTrap {
            reason: TrapReason::Debug,
            ..
        })
    ));
}

#[test]
fn wsync_holds_cpu_until_next_line() {
    // STA WSYNC; INX
    let mut board = board_with_program(&[0x85, 0x02, 0xE8]);
    board.boot().unwrap();

    board.step_instruction().unwrap();
    assert!(board.tia().is_cpu_halted());
    assert_eq!(board.tia().vctr(), 0);

    let counts = board.step_instruction().unwrap();
    assert_eq!(board.cpu().state.x, 1);
    assert_eq!(board.tia().vctr(), 1);
    assert!(board.tia().hctr() < 12);
    assert!(counts.cpu > 60);
}

#[test]
fn kernel_produces_frames() {
    #[rustfmt::skip]
    let program = [
        0xA9, 0x1E,       // LDA #$1E
        0x85, 0x09,       // STA COLUBK
        0xA9, 0x02,       // start: LDA #$02
        0x85, 0x00,       // STA VSYNC
        0x85, 0x02,       // STA WSYNC
        0xA9, 0x00,       // LDA #$00
        0x85, 0x00,       // STA VSYNC
        0xA2, 0xFA,       // LDX #250
        0x85, 0x02,       // loop: STA WSYNC
        0xCA,             // DEX
        0xD0, 0xFB,       // BNE loop
        0x4C, 0x04, 0xF0, // JMP start
    ];
    let mut board = board_with_program(&program);
    board.boot().unwrap();
    board.tick(228 * 262 * 2).unwrap();

    let frame = board.take_frame().expect("no frame emitted");
    // Frame 0 is the partial frame cut short by the first VSYNC
    assert!(frame.number >= 1);
    assert_eq!((frame.width, frame.height), (160, 192));
    assert!(frame.pixels.iter().all(|&p| p == 0x1E));
    assert!(board.take_frame().is_none());
}

#[test]
fn reset_clears_totals_and_reboots() {
    let mut board = board_with_program(&[]);
    board.boot().unwrap();
    board.tick(1000).unwrap();
    board.reset();
    assert_eq!(board.clock_counts(), ClockCounts::default());
    assert_eq!(board.cpu().execution_state(), ExecutionState::Boot);
    assert_eq!(board.boot().unwrap().cpu, 7);
}

#[test]
fn pal_configuration_from_toml() {
    init_logger();
    let config = BoardConfig::from_toml("tv_mode = \"pal\"").unwrap();
    let cartridge = RomCartridge::new(vec![0xEA; 2048]).unwrap();
    let board = Board::new(config, Box::new(cartridge)).unwrap();
    assert_eq!(board.tia().metrics().visible_lines, 228);
}

#[test]
fn zero_divider_is_rejected() {
    let config = BoardConfig {
        tv_mode: TvMode::Ntsc,
        cpu_divider: 0,
    };
    let cartridge = RomCartridge::new(vec![0xEA; 2048]).unwrap();
    assert!(matches!(
        Board::new(config, Box::new(cartridge)),
        Err(BoardError::Config(_))
    ));
}

#[test]
fn suspend_freezes_every_chip() {
    let mut board = board_with_program(&[]);
    board.boot().unwrap();
    board.tick(90).unwrap();
    let cpu_cycles = board.cpu().cycles();
    let tia_clocks = board.tia().clocks();
    let hctr = board.tia().hctr();

    board.suspend();
    assert_eq!(board.tick(1000).unwrap(), ClockCounts::default());
    assert_eq!(board.step_instruction().unwrap(), ClockCounts::default());
    assert_eq!(board.cpu().cycles(), cpu_cycles);
    assert_eq!(board.tia().clocks(), tia_clocks);
    assert_eq!(board.tia().hctr(), hctr);

    board.resume();
    assert_eq!(board.tick(3).unwrap().chip, 3);
    assert_eq!(board.tia().clocks(), tia_clocks + 3);
}
